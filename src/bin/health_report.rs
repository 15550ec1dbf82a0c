//! Health report binary - prints the corpus health snapshot and evaluation status
//!
//! Usage:
//!   cargo run --bin health-report            # Print the report
//!   cargo run --bin health-report -- --fix   # Delete broken rows and re-translate stale ones
//!
//! Required environment variables:
//! - DATABASE_URL
//! - OPENAI_API_KEY

use anyhow::Result;
use tracing::info;
use translation_sync::config::Config;
use translation_sync::health::{FixReport, HealthDetails};
use translation_sync::pipeline::Pipeline;
use translation_sync::progress::StuckJob;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_sync=info".parse()?),
        )
        .init();

    let fix = std::env::args().skip(1).any(|arg| arg == "--fix");

    let config = Config::from_env()?;
    let pipeline = Pipeline::from_config(&config).await?;

    let details = pipeline.health.scan_detailed().await?;
    let stuck = pipeline.tracker.detect_stuck().await?;
    let average = pipeline.tracker.average_duration().await?;

    println!("{}", format_report(&details, &stuck, average.map(|d| d.num_seconds())));

    if fix {
        info!("Running fix-all");
        let report = pipeline.health.fix_all(&pipeline.shutdown).await?;
        println!("{}", format_fix(&report));
    }

    Ok(())
}

fn format_report(details: &HealthDetails, stuck: &[StuckJob], average_secs: Option<i64>) -> String {
    let s = &details.snapshot;
    let mut out = String::new();

    out.push_str("Translation health\n");
    out.push_str(&format!("  total:    {}\n", s.total_count));
    out.push_str(&format!("  healthy:  {}\n", s.healthy_count));
    out.push_str(&format!("  broken:   {}\n", s.broken_count));
    out.push_str(&format!("  stale:    {}\n", s.stale_count));
    out.push_str(&format!("  orphaned: {}\n", s.orphaned_count));
    out.push_str(&format!("  missing:  {}\n", s.missing_count));

    for (language, keys) in &details.stale {
        out.push_str(&format!("  stale in {}: {}\n", language, keys.len()));
    }
    for (language, keys) in &details.missing {
        out.push_str(&format!("  missing in {}: {} (run a key sync)\n", language, keys.len()));
    }
    for orphan in &details.orphaned {
        out.push_str(&format!("  orphan: {} [{}]\n", orphan.key, orphan.language));
    }

    out.push_str("\nEvaluations\n");
    match average_secs {
        Some(secs) => out.push_str(&format!("  average duration: {}m {}s\n", secs / 60, secs % 60)),
        None => out.push_str("  average duration: n/a\n"),
    }
    if stuck.is_empty() {
        out.push_str("  no stuck runs\n");
    }
    for job in stuck {
        out.push_str(&format!(
            "  STUCK {}: {}/{} keys, silent for {}s\n",
            job.language, job.evaluated_keys, job.total_keys, job.silent_for_secs
        ));
    }

    out
}

fn format_fix(report: &FixReport) -> String {
    let mut out = format!("Fix: deleted {} broken rows\n", report.deleted_broken);
    for (language, job) in &report.retranslated {
        out.push_str(&format!(
            "  {}: {} translated, {} failed ({})\n",
            language, job.count, job.failed, job.status
        ));
    }
    for (language, keys) in &report.skipped_stale {
        out.push_str(&format!(
            "  {}: {} stale rows skipped, source text missing\n",
            language,
            keys.len()
        ));
    }
    for language in &report.failed_languages {
        out.push_str(&format!("  {}: rejected\n", language));
    }
    out
}
