//! Magic-link lifecycle steps

use cucumber::{then, when};
use serde_json::{json, Value};

use crate::features::support::TestWorld;

fn tokens_uri(world: &TestWorld, label: &str) -> String {
    format!("/api/v1/tenants/{}/access-tokens", world.tenant(label).id)
}

/// Remember the raw value and id of a freshly issued link
fn remember_issued(world: &mut TestWorld, body: &Value) {
    world.token = body["token"].as_str().map(str::to_string);
    world.token_id = body["id"].as_str().and_then(|id| id.parse().ok());
}

#[when(expr = "I create a review link for tenant {string} with scopes {string}")]
async fn create_link(world: &mut TestWorld, label: String, scopes: String) {
    let scopes: Vec<&str> = scopes.split(',').map(str::trim).collect();
    let response = world
        .app()
        .post_json_as(
            &tokens_uri(world, &label),
            world.session(),
            json!({ "expires_in_hours": 24, "scopes": scopes }),
        )
        .await;

    if response.status.is_success() {
        let body: Value = response.json();
        remember_issued(world, &body);
    }
    world.last_response = Some(response);
}

#[when("I revoke the review link")]
async fn revoke_link(world: &mut TestWorld) {
    let uri = format!(
        "{}/{}",
        tokens_uri(world, "A"),
        world.token_id.expect("No link issued")
    );
    let response = world.app().delete_as(&uri, world.session()).await;
    response.assert_ok();
    world.last_response = Some(response);
}

#[when("I regenerate the review link")]
async fn regenerate_link(world: &mut TestWorld) {
    let uri = format!(
        "{}/{}/regenerate",
        tokens_uri(world, "A"),
        world.token_id.expect("No link issued")
    );
    let response = world
        .app()
        .post_json_as(&uri, world.session(), json!({}))
        .await;
    response.assert_created();

    let body: Value = response.json();
    world.previous_token = world.token.take();
    remember_issued(world, &body);
    world.last_response = Some(response);
}

#[when("the link holder opens the review")]
async fn open_review(world: &mut TestWorld) {
    let token = world.token.clone().expect("No link issued");
    let response = world.app().get(&format!("/api/v1/review/{}", token)).await;
    world.last_response = Some(response);
}

#[when("the link holder opens the review with the previous link")]
async fn open_review_with_previous(world: &mut TestWorld) {
    let token = world.previous_token.clone().expect("No replaced link");
    let response = world.app().get(&format!("/api/v1/review/{}", token)).await;
    world.last_response = Some(response);
}

#[then(expr = "the review should belong to tenant {string}")]
async fn review_belongs_to(world: &mut TestWorld, label: String) {
    let body: Value = world.response().json();
    assert_eq!(body["tenant"]["id"], world.tenant(&label).id);
}
