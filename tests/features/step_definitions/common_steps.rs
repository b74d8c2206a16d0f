//! Common step definitions used across features

use cucumber::{given, then};

use crate::features::support::TestWorld;

#[given("two agencies each managing one tenant")]
async fn two_agencies(world: &mut TestWorld) {
    world.seed().await;
}

#[given("I am signed in as an administrator")]
async fn signed_in_as_admin(world: &mut TestWorld) {
    world.session = Some(world.seeded().admin.session.clone());
}

#[given(expr = "I am signed in as the agency for tenant {string}")]
async fn signed_in_as_agency(world: &mut TestWorld, label: String) {
    let seeded = world.seeded();
    let agency = match label.as_str() {
        "A" => &seeded.agency_a,
        _ => &seeded.agency_b,
    };
    world.session = Some(agency.session.clone());
}

#[given(expr = "I am signed in as the client of tenant {string}")]
async fn signed_in_as_client(world: &mut TestWorld, label: String) {
    let seeded = world.seeded();
    let client = match label.as_str() {
        "A" => &seeded.client_a,
        _ => &seeded.client_b,
    };
    world.session = Some(client.session.clone());
}

#[then(expr = "the response status should be {int}")]
async fn response_status(world: &mut TestWorld, status: u16) {
    let response = world.response();
    assert_eq!(response.status.as_u16(), status, "body: {}", response.text());
}

#[then(expr = "the reason should be {string}")]
async fn response_reason(world: &mut TestWorld, reason: String) {
    assert_eq!(world.response().code().as_deref(), Some(reason.as_str()));
}

#[then(expr = "an {string} audit event should be recorded")]
async fn audit_event_recorded(world: &mut TestWorld, event_name: String) {
    let recorded = world.app().events(&event_name).await;
    assert!(!recorded.is_empty(), "no {} event recorded", event_name);
}
