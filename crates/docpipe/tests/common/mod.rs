//! Shared test utilities for docpipe integration tests.
//!
//! This module provides:
//! - `TestHarness` with an on-disk SQLite store and queue in a temp directory
//! - Scripted collaborators whose per-unit behaviour is set up front

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
