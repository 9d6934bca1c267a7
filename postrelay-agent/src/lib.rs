//! postrelay-agent library
//!
//! Watches the task spreadsheet, materializes per-task folders, pushes media
//! to devices over the debug bridge and publishes posts at their scheduled
//! time. The binary in `main.rs` wires these together via [`app`].

pub mod app;
pub mod automation;
pub mod db;
pub mod services;
pub mod sheet;
pub mod transport;
pub mod utils;

pub use app::{build_agent, Agent, Collaborators};
