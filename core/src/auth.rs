//! Login, registration and logout.
//!
//! The controller is the only component that establishes a session. It also
//! owns the forced-logout policy: at construction it subscribes to the API
//! client's unauthorized notifications and clears the session when one fires.

use serde_json::Value;
use tracing::{info, warn};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::session::{SessionState, SessionStore};
use crate::types::{AuthResponse, LoginRequest, RegisterRequest, User};

#[derive(Clone)]
pub struct AuthController {
    api: ApiClient,
    session: SessionStore,
}

impl AuthController {
    pub fn new(api: ApiClient, session: SessionStore) -> Self {
        let store = session.clone();
        api.on_unauthorized(move |err| {
            warn!(error = %err, "forcing logout");
            store.clear();
        });
        Self { api, session }
    }

    /// Exchange credentials for a session. Inputs are assumed non-empty.
    ///
    /// A 401 while a session exists ends that session too, like any other
    /// 401 on an authenticated call. Other failures leave it untouched.
    pub fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        info!(username, "logging in");
        let data = self
            .api
            .submit_credentials("/auth/login", &LoginRequest { username, password })?;
        self.establish(data)
    }

    /// Create an account and start a session for it.
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User, ApiError> {
        info!(username, "registering");
        let data = self.api.submit_credentials(
            "/auth/register",
            &RegisterRequest {
                username,
                email,
                password,
            },
        )?;
        self.establish(data)
    }

    pub fn logout(&self) {
        info!("logging out");
        self.session.clear();
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    fn establish(&self, data: Option<Value>) -> Result<User, ApiError> {
        let data = data.ok_or_else(|| ApiError::Shape("empty authentication response".to_string()))?;
        let AuthResponse { access_token, user } = serde_json::from_value(data)
            .map_err(|e| ApiError::Shape(format!("authentication response: {e}")))?;
        self.session.write(access_token, user.clone())?;
        Ok(user)
    }
}
