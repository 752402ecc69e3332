//! Shared test utilities for intake integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a coordinator to in-memory or on-disk storage
//! - `ConfigBuilder` for creating test configurations programmatically
//! - `RecordingTrigger` for observing worker dispatches

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{RecordingTrigger, TestHarness};
