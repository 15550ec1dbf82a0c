//! Translation quality validation module.
//!
//! Two layers:
//! - a hard write-time guard (`check_entry`) that rejects empty translations
//!   and translations that echo their own key;
//! - soft checks (`validate`) that warn when interpolation placeholders,
//!   URLs, markup tags or protected terms from the source are lost.
//!
//! `quality_score` folds both into a 0.0 to 1.0 score for evaluation runs.

use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

/// Terms that must stay verbatim in every language.
pub const PROTECTED_TERMS: &[&str] = &[
    "API", "SDK", "SaaS", "OAuth", "JSON", "CSV", "PDF", "URL", "GDPR", "iOS", "Android",
    "GitHub", "Stripe", "Slack", "Wi-Fi",
];

/// Why a provider entry was refused at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRejection {
    Empty,
    EchoedKey,
}

impl fmt::Display for EntryRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRejection::Empty => f.write_str("empty translation"),
            EntryRejection::EchoedKey => f.write_str("translation echoes its key"),
        }
    }
}

/// Validation report containing errors and warnings about a translation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        !self.has_errors() && !self.has_warnings()
    }
}

pub struct TranslationValidator;

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();
static URL_REGEX: OnceLock<Regex> = OnceLock::new();
static TAG_REGEX: OnceLock<Regex> = OnceLock::new();

impl TranslationValidator {
    /// Write-time guard applied to every provider entry before upsert.
    pub fn check_entry(key: &str, text: &str) -> Result<(), EntryRejection> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EntryRejection::Empty);
        }
        if trimmed == key {
            return Err(EntryRejection::EchoedKey);
        }
        Ok(())
    }

    /// Check that a translation preserves the structural elements of the source.
    pub fn validate(original: &str, translated: &str) -> ValidationReport {
        let mut report = ValidationReport::new();

        let orig_placeholders = Self::extract_placeholders(original);
        let trans_placeholders = Self::extract_placeholders(translated);
        for lost in orig_placeholders.difference(&trans_placeholders) {
            report
                .errors
                .push(format!("Placeholder '{{{}}}' lost in translation", lost));
        }
        let added: Vec<_> = trans_placeholders.difference(&orig_placeholders).collect();
        if !added.is_empty() {
            report
                .warnings
                .push(format!("Unexpected placeholders in translation: {:?}", added));
        }

        let orig_urls = Self::extract_urls(original);
        let trans_urls = Self::extract_urls(translated);
        if orig_urls != trans_urls {
            report.warnings.push(format!(
                "URL mismatch: original has {} URLs, translation has {} URLs",
                orig_urls.len(),
                trans_urls.len()
            ));
        }

        let orig_tags = Self::count_tags(original);
        let trans_tags = Self::count_tags(translated);
        if orig_tags != trans_tags {
            report.warnings.push(format!(
                "Markup tag count mismatch: original has {}, translation has {}",
                orig_tags, trans_tags
            ));
        }

        for term in Self::protected_terms_in(original) {
            if !translated.contains(term) {
                report
                    .warnings
                    .push(format!("Protected term '{}' was not kept verbatim", term));
            }
        }

        report
    }

    /// Score a translation between 0.0 and 1.0.
    ///
    /// Missing, empty or echoed translations score 0. Each lost placeholder
    /// costs 0.3, each warning 0.1, and a wildly different length 0.2.
    pub fn quality_score(key: &str, original: &str, translated: Option<&str>) -> f64 {
        let translated = match translated {
            Some(text) if Self::check_entry(key, text).is_ok() => text,
            _ => return 0.0,
        };

        let report = Self::validate(original, translated);
        let mut score = 1.0;
        score -= 0.3 * report.errors.len() as f64;
        score -= 0.1 * report.warnings.len() as f64;

        let orig_len = original.chars().count().max(1) as f64;
        let ratio = translated.chars().count() as f64 / orig_len;
        if original.chars().count() >= 10 && !(0.3..=3.0).contains(&ratio) {
            score -= 0.2;
        }

        score.clamp(0.0, 1.0)
    }

    /// `{name}` and `{{name}}` interpolation placeholders.
    fn extract_placeholders(text: &str) -> BTreeSet<String> {
        let regex = PLACEHOLDER_REGEX
            .get_or_init(|| Regex::new(r"\{\{?\s*([A-Za-z0-9_.]+)\s*\}?\}").expect("placeholder pattern is valid"));

        regex
            .captures_iter(text)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    fn extract_urls(text: &str) -> Vec<String> {
        let regex = URL_REGEX.get_or_init(|| Regex::new(r#"https?://[^\s)\]"'<>]+"#).expect("url pattern is valid"));

        regex
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    fn count_tags(text: &str) -> usize {
        let regex = TAG_REGEX.get_or_init(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*[^>]*>").expect("tag pattern is valid"));
        regex.find_iter(text).count()
    }

    fn protected_terms_in(text: &str) -> Vec<&'static str> {
        PROTECTED_TERMS
            .iter()
            .copied()
            .filter(|term| text.contains(term))
            .collect()
    }
}
