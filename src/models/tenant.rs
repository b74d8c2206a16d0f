//! Tenant (client organization) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TeamId, TenantId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub slug: String,
    pub team_id: Option<TeamId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub slug: String,
    pub team_id: Option<TeamId>,
}
