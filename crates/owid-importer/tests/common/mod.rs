//! Shared test utilities for owid-importer integration tests.
//!
//! This module provides:
//! - In-memory fakes for every collaborator the engine talks to
//! - `TestHarness` wiring them to a fresh database

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::*;
