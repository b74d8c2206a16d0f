//! Tenant access steps

use cucumber::when;

use crate::features::support::TestWorld;

#[when(expr = "I open tenant {string}")]
async fn open_tenant(world: &mut TestWorld, label: String) {
    let uri = format!("/api/v1/tenants/{}", world.tenant(&label).id);
    let response = world.app().get_as(&uri, world.session()).await;
    world.last_response = Some(response);
}
