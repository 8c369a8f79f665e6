//! alertwire - exactly-once alert delivery from Elasticsearch to Telegram
//!
//! The library exposes the dispatch engine, the error taxonomy and the
//! adapters so they can be driven from integration tests or embedded in
//! another service.

pub mod api;
pub mod app;
pub mod dispatch;
pub mod error;
pub mod integrations;
pub mod logging;
pub mod notification;
pub mod response;
pub mod settings;
