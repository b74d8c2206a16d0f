//! Step definitions for Cucumber scenarios

pub mod common_steps;
pub mod magic_link_steps;
pub mod tenant_steps;
