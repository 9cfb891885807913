//! Composition root for hosts that render the todo UI.
//!
//! `TodoApp` wires one shared `SessionStore` and `EventHub` into the API
//! client, the auth controller and the synchronizer. Hosts subscribe to
//! events once and forward user intents to `auth()` and `todos()`.

use std::sync::Arc;

use tracing::debug;

use crate::auth::AuthController;
use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::events::{ClientEvent, EventHub};
use crate::http::Transport;
use crate::session::{SessionState, SessionStorage, SessionStore};
use crate::todos::TodoSynchronizer;

#[derive(Clone)]
pub struct TodoApp {
    session: SessionStore,
    auth: AuthController,
    todos: TodoSynchronizer,
    events: EventHub,
}

impl TodoApp {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        let events = EventHub::new();
        let session = SessionStore::load(storage, events.clone());
        let api = ApiClient::new(&config.base_url, transport, session.clone());
        let auth = AuthController::new(api.clone(), session.clone());
        let todos = TodoSynchronizer::new(api, events.clone());
        Self {
            session,
            auth,
            todos,
            events,
        }
    }

    /// Build an app that talks HTTP through `ureq`.
    #[cfg(feature = "ureq")]
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let storage = config.open_storage()?;
        Ok(Self::new(
            config,
            Arc::new(crate::http::UreqTransport::new()),
            storage,
        ))
    }

    pub fn subscribe(&self, listener: impl Fn(&ClientEvent) + Send + Sync + 'static) {
        self.events.subscribe(listener);
    }

    /// Report the state seeded from storage and, if a session was restored,
    /// fetch the list for it.
    ///
    /// A restored token the server no longer accepts is not an error here:
    /// the forced logout has already run and the returned state says so.
    pub fn start(&self) -> Result<SessionState, ApiError> {
        if self.session.state().is_authenticated() {
            match self.todos.list() {
                Ok(_) => {}
                Err(e) if e.is_unauthorized() => {
                    debug!("restored session was rejected");
                }
                Err(ApiError::SessionChanged) => {
                    debug!("session changed during startup");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(self.session.state())
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn auth(&self) -> &AuthController {
        &self.auth
    }

    pub fn todos(&self) -> &TodoSynchronizer {
        &self.todos
    }
}
