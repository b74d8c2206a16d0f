//! Middleware components
//!
//! This module contains middleware for:
//! - The guard chain (identity, tenant access, rate limiting, audit)
//! - Login flood protection
//! - Security headers

pub mod flood_guard;
pub mod guard;
pub mod security_headers;

pub use flood_guard::{flood_guard_middleware, FloodGuard};
pub use guard::{guard_middleware, guarded, public_rate_limit_headers, ClientAddr};
pub use security_headers::security_headers_middleware;
