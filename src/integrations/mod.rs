//! External system adapters
//!
//! Concrete implementations of the dispatch capabilities:
//! - Elasticsearch as the alert source and delivery ledger
//! - Telegram as the notifier

pub mod elasticsearch;
pub mod telegram;

#[cfg(test)]
pub(crate) mod stub_server;

pub use elasticsearch::{ElasticClient, ElasticConfig, DEFAULT_ALERTS_INDEX};
pub use telegram::{TelegramApiError, TelegramConfig, TelegramNotifier, TELEGRAM_API_BASE};
