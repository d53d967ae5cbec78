//! Shared test utilities for bookforge integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a file-backed database
//! - Builders for book parameters, worker settings and config JSON

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
