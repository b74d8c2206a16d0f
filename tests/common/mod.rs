//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Test application setup with a temporary database
//! - Seeded directory fixtures
//! - Request payload factories

pub mod fixtures;
pub mod test_app;

pub use factories::*;
pub use fixtures::*;
pub use test_app::*;
