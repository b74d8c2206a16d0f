//! Business logic services

pub mod audit;
pub mod auth;
pub mod guard;
pub mod identity;
pub mod maintenance;
pub mod rate_limit;
pub mod session;
pub mod tenant_access;
pub mod tokens;

pub use audit::{AuditRecorder, AuditStore, InMemoryAuditStore};
pub use auth::AuthService;
pub use guard::{GuardChain, GuardContext, GuardOutcome, Rejection, RequestDescriptor, RoutePolicy};
pub use identity::{Credential, IdentityResolver, IdentityStore};
pub use maintenance::{start_maintenance_scheduler, Maintenance, MaintenanceReport};
pub use rate_limit::{BucketStore, InMemoryBucketStore, RateLimiter};
pub use session::SessionManager;
pub use tenant_access::{AccessDecision, MembershipStore, TenantAccessResolver};
pub use tokens::TokenService;
