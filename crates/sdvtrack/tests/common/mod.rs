//! Shared test utilities for sdvtrack integration tests.
//!
//! This module provides:
//! - `TestHarness` wrapping a service over an isolated store
//! - Builders for configs and CSV extracts

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{TestHarness, COMPANY};
