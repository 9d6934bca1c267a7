//! # postrelay common library
//!
//! Shared code for the postrelay scheduler:
//! - Error type used across crates
//! - Configuration loading (TOML file, environment, built-in defaults)
//! - Task time parsing, validity classification and canonical directory names
//! - Transfer / automation outcome codes and their operator-facing labels
//! - Event bus for watcher notifications

pub mod config;
pub mod error;
pub mod events;
pub mod status;
pub mod time;
pub mod validity;

pub use error::{Error, Result};
pub use status::OutcomeCode;
pub use validity::{TaskKey, Validity};
