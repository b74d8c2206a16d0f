//! Test fixtures for common test data
//!
//! A seeded directory with two agency teams, each managing one tenant, and
//! accounts for every role.

#![allow(dead_code)]

use approval_gateway::{
    db::{TeamRepository, TenantRepository},
    models::{
        Account, AccountId, CreateAccessTokenRequest, IssuedAccessToken, Role, Team, Tenant,
        TenantId,
    },
};

use super::{AccountFactory, TenantFactory, TestApp, team_name};

/// Account plus a valid session for it
#[derive(Debug, Clone)]
pub struct TestAccount {
    pub account: Account,
    pub session: String,
}

impl TestAccount {
    pub fn id(&self) -> AccountId {
        self.account.id
    }

    /// `Cookie` header value carrying the session
    pub fn cookie(&self, app: &TestApp) -> String {
        format!("{}={}", app.state.sessions.cookie_name(), self.session)
    }
}

/// Two isolated agencies with one tenant and one client each
pub struct Seeded {
    pub admin: TestAccount,
    pub team_a: Team,
    pub team_b: Team,
    pub tenant_a: Tenant,
    pub tenant_b: Tenant,
    pub agency_a: TestAccount,
    pub agency_b: TestAccount,
    pub client_a: TestAccount,
    pub client_b: TestAccount,
}

pub async fn create_account(app: &TestApp, role: Role, tenant_id: Option<TenantId>) -> TestAccount {
    let account = app
        .state
        .auth
        .create_account(&AccountFactory::build(role, tenant_id))
        .await
        .expect("Failed to create account");
    let (session, _) = app
        .state
        .sessions
        .issue(account.id)
        .expect("Failed to issue session");
    TestAccount { account, session }
}

pub async fn create_team(app: &TestApp) -> Team {
    TeamRepository::new(&app.state.db)
        .create(&team_name())
        .await
        .expect("Failed to create team")
}

pub async fn create_tenant(app: &TestApp, team: Option<&Team>) -> Tenant {
    TenantRepository::new(&app.state.db)
        .create(&TenantFactory::build(team.map(|t| t.id)))
        .await
        .expect("Failed to create tenant")
}

pub async fn join_team(app: &TestApp, team: &Team, member: &TestAccount) {
    TeamRepository::new(&app.state.db)
        .add_member(team.id, member.id())
        .await
        .expect("Failed to add team member");
}

pub async fn seed_directory(app: &TestApp) -> Seeded {
    let admin = create_account(app, Role::Admin, None).await;

    let team_a = create_team(app).await;
    let team_b = create_team(app).await;
    let tenant_a = create_tenant(app, Some(&team_a)).await;
    let tenant_b = create_tenant(app, Some(&team_b)).await;

    let agency_a = create_account(app, Role::Agency, None).await;
    join_team(app, &team_a, &agency_a).await;
    let agency_b = create_account(app, Role::Agency, None).await;
    join_team(app, &team_b, &agency_b).await;

    let client_a = create_account(app, Role::Client, Some(tenant_a.id)).await;
    let client_b = create_account(app, Role::Client, Some(tenant_b.id)).await;

    Seeded {
        admin,
        team_a,
        team_b,
        tenant_a,
        tenant_b,
        agency_a,
        agency_b,
        client_a,
        client_b,
    }
}

/// Mint a magic-link token for `tenant`; `None` scopes grants all of them
pub async fn issue_token(
    app: &TestApp,
    tenant: &Tenant,
    scopes: Option<&[&str]>,
    created_by: &TestAccount,
) -> IssuedAccessToken {
    let request = CreateAccessTokenRequest {
        expires_in_hours: Some(24),
        scopes: scopes.map(|s| s.iter().map(|v| v.to_string()).collect()),
    };
    app.state
        .tokens
        .create(tenant.id, &request, created_by.id())
        .await
        .expect("Failed to issue access token")
}
