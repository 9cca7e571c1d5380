//! Core transfer pipeline for the Telegram media relay bot.
//!
//! This crate is intentionally framework-agnostic. The Bot API client, the
//! preference storage and media tooling live behind ports (traits) whose
//! adapters sit in other crates or in the small adapter modules here.

pub mod backends;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod naming;
pub mod ops;
pub mod orchestrator;
pub mod ports;
pub mod prefs;
pub mod probe;
pub mod progress;
pub mod resolver;
pub mod scratch;
pub mod splitter;
pub mod strategy;
pub mod user_state;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{Error, Result};
