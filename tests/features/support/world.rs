//! Test world for Cucumber scenarios

use std::fmt;

use cucumber::World;
use uuid::Uuid;

use approval_gateway::models::Tenant;

use crate::common::{seed_directory, Seeded, TestApp, TestResponse};

/// Test world that maintains state across scenario steps
#[derive(Default, World)]
pub struct TestWorld {
    app: Option<TestApp>,
    seeded: Option<Seeded>,

    /// Session of the signed-in account
    pub session: Option<String>,

    /// Raw value and id of the most recently issued review link
    pub token: Option<String>,
    pub token_id: Option<Uuid>,
    /// Link that was replaced by the last regeneration
    pub previous_token: Option<String>,

    /// Response from last API call
    pub last_response: Option<TestResponse>,
}

impl fmt::Debug for TestWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestWorld")
            .field("session", &self.session.is_some())
            .field("token_id", &self.token_id)
            .field("last_response", &self.last_response.as_ref().map(|r| r.status))
            .finish()
    }
}

impl TestWorld {
    /// Start a fresh gateway with the two-agency directory
    pub async fn seed(&mut self) {
        let app = TestApp::new().await;
        self.seeded = Some(seed_directory(&app).await);
        self.app = Some(app);
    }

    pub fn app(&self) -> &TestApp {
        self.app.as_ref().expect("No gateway running; seed the directory first")
    }

    pub fn seeded(&self) -> &Seeded {
        self.seeded.as_ref().expect("Directory not seeded")
    }

    /// Tenant by its label in the feature files
    pub fn tenant(&self, label: &str) -> &Tenant {
        match label {
            "A" => &self.seeded().tenant_a,
            "B" => &self.seeded().tenant_b,
            other => panic!("Unknown tenant label: {}", other),
        }
    }

    pub fn session(&self) -> &str {
        self.session.as_deref().expect("Not signed in")
    }

    pub fn response(&self) -> &TestResponse {
        self.last_response.as_ref().expect("No response available")
    }
}
