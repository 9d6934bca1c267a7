//! Test Helper Utilities
//!
//! Shared fakes and a wired-up agent for postrelay-agent integration tests

#![allow(dead_code)]

pub mod fakes;
pub mod harness;

pub use fakes::{FakeTransport, RecordingAutomator};
pub use harness::{at_offset, task_row, test_config, Harness, DEVICE_LABEL, DEVICE_SERIAL, REMOTE_ROOT};
