//! Oxigate - a resilient gateway engine for Discord bots.
//!
//! This crate keeps a bot connected to the real-time gateway: it performs the
//! Identify/Resume handshake, keeps the heartbeat alive, reconnects with
//! backoff and routes dispatch events to registered handlers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the gateway engine and its adapters.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "oxigate";
