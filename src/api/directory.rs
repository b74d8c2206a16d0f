//! Directory administration: accounts, teams and team membership

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use super::ADMIN_ONLY;
use crate::{
    db::{AccountRepository, TeamRepository},
    middleware::guarded,
    models::{
        events, Account, AccountId, AuditEventDraft, CreateAccountRequest, Role, Team, TeamId,
    },
    services::{GuardContext, RoutePolicy},
    utils::{AppError, AppResult},
    AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    let admin = |name| RoutePolicy::new(name).with_roles(ADMIN_ONLY);

    Router::new()
        .route(
            "/accounts",
            guarded(post(create_account), state, admin("accounts.create")),
        )
        .route("/teams", guarded(post(create_team), state, admin("teams.create")))
        .route(
            "/teams/{team_id}/members",
            guarded(post(add_member), state, admin("teams.members.add")),
        )
        .route(
            "/teams/{team_id}/members/{account_id}",
            guarded(delete(remove_member), state, admin("teams.members.remove")),
        )
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub account_id: AccountId,
}

/// POST /api/v1/accounts
async fn create_account(
    State(state): State<AppState>,
    context: GuardContext,
    Json(payload): Json<CreateAccountRequest>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let account = state.auth.create_account(&payload).await?;

    state
        .audit
        .append(
            AuditEventDraft::new(events::ACCOUNT_CREATED)
                .actor(context.resolved_identity.actor())
                .tenant(account.tenant_id)
                .target("account", account.id)
                .after(json!(account)),
        )
        .await;

    Ok((StatusCode::CREATED, Json(account)))
}

/// POST /api/v1/teams
async fn create_team(
    State(state): State<AppState>,
    context: GuardContext,
    Json(payload): Json<CreateTeamRequest>,
) -> AppResult<(StatusCode, Json<Team>)> {
    payload.validate()?;
    let team = TeamRepository::new(&state.db).create(payload.name.trim()).await?;

    state
        .audit
        .append(
            AuditEventDraft::new(events::TEAM_CREATED)
                .actor(context.resolved_identity.actor())
                .target("team", team.id)
                .after(json!(team)),
        )
        .await;

    Ok((StatusCode::CREATED, Json(team)))
}

/// POST /api/v1/teams/{team_id}/members
async fn add_member(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    context: GuardContext,
    Json(payload): Json<AddMemberRequest>,
) -> AppResult<StatusCode> {
    let teams = TeamRepository::new(&state.db);
    if teams.get_by_id(team_id).await?.is_none() {
        return Err(AppError::not_found(format!("Team {} not found", team_id)));
    }

    let account = AccountRepository::new(&state.db)
        .get_by_id(payload.account_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Account {} not found", payload.account_id)))?;
    if account.primary_role != Role::Agency {
        return Err(AppError::ValidationError(
            "Only agency accounts can join teams".to_string(),
        ));
    }

    teams.add_member(team_id, account.id).await?;

    state
        .audit
        .append(
            AuditEventDraft::new(events::TEAM_MEMBER_ADDED)
                .actor(context.resolved_identity.actor())
                .target("team", team_id)
                .details(json!({ "account_id": account.id })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/teams/{team_id}/members/{account_id}
async fn remove_member(
    State(state): State<AppState>,
    Path((team_id, account_id)): Path<(TeamId, AccountId)>,
    context: GuardContext,
) -> AppResult<StatusCode> {
    let removed = TeamRepository::new(&state.db)
        .remove_member(team_id, account_id)
        .await?;
    if !removed {
        return Err(AppError::not_found("Team membership not found"));
    }

    state
        .audit
        .append(
            AuditEventDraft::new(events::TEAM_MEMBER_REMOVED)
                .actor(context.resolved_identity.actor())
                .target("team", team_id)
                .details(json!({ "account_id": account_id })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
