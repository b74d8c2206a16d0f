//! Integration tests for the approval gateway
//!
//! These tests drive the full router, with every guard layer, against a
//! temporary SQLite database.

mod access_token_tests;
mod audit_tests;
mod auth_tests;
mod directory_tests;
mod rate_limit_tests;
