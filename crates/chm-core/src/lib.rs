//! Core domain + application logic for the channel-manager bot.
//!
//! This crate is intentionally framework-agnostic. The chat transport, the
//! persistence engine and the remote directory live behind ports (traits);
//! Telegram is wired up in an adapter crate.

pub mod commands;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod registry;
pub mod store;

pub use errors::{Error, Result};
