pub mod config;
pub mod db;
pub mod error;
pub mod evaluation;
pub mod health;
pub mod i18n;
pub mod models;
pub mod openai;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod store;
pub mod sync;
pub mod translation;

#[cfg(test)]
mod test_support;
