//! Shared test utilities for docflow integration tests.
//!
//! This module provides:
//! - `TestHarness` running a real orchestrator against a temp documents dir
//! - `SettingsBuilder` for fast, deterministic runtime settings
//! - Scripted stages and a recording notifier

pub mod builders;
pub mod harness;
pub mod stages;

pub use builders::*;
pub use harness::{RecordingNotifier, TestHarness};
pub use stages::*;
