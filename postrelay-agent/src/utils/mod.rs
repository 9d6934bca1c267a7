//! Utility modules for postrelay-agent

pub mod retry;

pub use retry::{retry_fixed, retry_on_lock};
