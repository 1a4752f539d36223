//! Resilient client for the IMA knowledge-base assistant.
//!
//! [`ImaClient`] turns the vendor's browser-session API into a dependable
//! question/answer call: it keeps the access token fresh, opens a session per
//! attempt, decodes the streamed answer into [`Message`]s, and retries within
//! a wall-clock budget. [`Answer`] reduces the messages to text and
//! references.

pub mod aggregate;
pub mod attempt;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod request;
pub mod retry;
pub mod stream;
pub mod trace;
pub mod upstream;

pub use aggregate::{Answer, Reference};
pub use client::ImaClient;
pub use config::Config;
pub use error::{ErrorKind, ImaError, Result};
pub use message::{MediaItem, Message};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
