//! Todo list synchronization.
//!
//! # Design
//! The server is the only source of truth. Every successful mutation is
//! followed by a full `list()` and the caller gets that fresh list back;
//! nothing is patched locally. `snapshot` holds the last list that arrived
//! intact, so a failed or malformed fetch never disturbs what is displayed.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::ApiClient;
use crate::error::{ApiError, SyncError};
use crate::events::{ClientEvent, EventHub};
use crate::http::HttpMethod;
use crate::session::SessionState;
use crate::types::{Todo, TodoId, TodoInput};

#[derive(Clone)]
pub struct TodoSynchronizer {
    api: ApiClient,
    snapshot: Arc<RwLock<Vec<Todo>>>,
    events: EventHub,
}

impl TodoSynchronizer {
    pub fn new(api: ApiClient, events: EventHub) -> Self {
        let snapshot: Arc<RwLock<Vec<Todo>>> = Arc::default();

        // A list belongs to the session that fetched it.
        let owned = snapshot.clone();
        events.subscribe(move |event| {
            if let ClientEvent::SessionChanged(SessionState::Unauthenticated) = event {
                owned.write().unwrap_or_else(PoisonError::into_inner).clear();
            }
        });

        Self {
            api,
            snapshot,
            events,
        }
    }

    /// The last list successfully fetched from the server.
    pub fn todos(&self) -> Vec<Todo> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch the authoritative list.
    ///
    /// A list that arrives after the session was established or cleared is
    /// dropped with `ApiError::SessionChanged` instead of being applied.
    pub fn list(&self) -> Result<Vec<Todo>, ApiError> {
        let generation = self.api.session().generation();
        let data = self.api.request(HttpMethod::Get, "/todos")?;
        let todos = decode_list(data).inspect_err(|e| {
            warn!(error = %e, "todo list response has the wrong shape");
        })?;

        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            if self.api.session().generation() != generation {
                debug!("dropping todo list fetched under a previous session");
                return Err(ApiError::SessionChanged);
            }
            *snapshot = todos.clone();
        }
        debug!(count = todos.len(), "todo list refreshed");

        self.events.emit(ClientEvent::TodosChanged(todos.clone()));
        Ok(todos)
    }

    pub fn create(&self, name: &str, comment: &str) -> Result<Vec<Todo>, SyncError> {
        self.api
            .request_json(HttpMethod::Post, "/todos", &TodoInput::new(name, comment))
            .map_err(SyncError::Mutation)?;
        self.refetch()
    }

    pub fn update(&self, id: TodoId, input: &TodoInput) -> Result<Vec<Todo>, SyncError> {
        self.api
            .request_json(HttpMethod::Put, &format!("/todos/{id}"), input)
            .map_err(SyncError::Mutation)?;
        self.refetch()
    }

    pub fn delete(&self, id: TodoId) -> Result<Vec<Todo>, SyncError> {
        self.api
            .request(HttpMethod::Delete, &format!("/todos/{id}"))
            .map_err(SyncError::Mutation)?;
        self.refetch()
    }

    fn refetch(&self) -> Result<Vec<Todo>, SyncError> {
        self.list().map_err(|e| {
            warn!(error = %e, "mutation committed but refetch failed");
            SyncError::Stale(e)
        })
    }
}

fn decode_list(data: Option<Value>) -> Result<Vec<Todo>, ApiError> {
    match data {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Todo>, _>>()
            .map_err(|e| ApiError::Shape(format!("todo entry: {e}"))),
        Some(other) => Err(ApiError::Shape(format!(
            "expected a list of todos, got {}",
            kind(&other)
        ))),
        None => Err(ApiError::Shape(
            "expected a list of todos, got no content".to_string(),
        )),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::auth::AuthController;
    use crate::http::scripted::ScriptedTransport;
    use crate::session::{MemoryStorage, SessionStore};
    use crate::types::User;

    const ONE: &str = r#"[{"id":1,"name":"Buy milk","comment":"2%","timestamp":"2024-05-01T09:30:00","user_id":1}]"#;
    const TWO: &str = r#"[{"id":1,"name":"Buy milk","comment":"2%","timestamp":"2024-05-01T09:30:00","user_id":1},{"id":2,"name":"Walk dog","comment":null,"timestamp":"2024-05-01T10:00:00","user_id":1}]"#;

    struct Fixture {
        todos: TodoSynchronizer,
        transport: Arc<ScriptedTransport>,
        session: SessionStore,
        events: Arc<Mutex<Vec<ClientEvent>>>,
    }

    fn setup() -> Fixture {
        let hub = EventHub::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        hub.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let transport = Arc::new(ScriptedTransport::new());
        let session = SessionStore::load(Arc::new(MemoryStorage::new()), hub.clone());
        let api = ApiClient::new("http://localhost/api", transport.clone(), session.clone());
        AuthController::new(api.clone(), session.clone());
        let todos = TodoSynchronizer::new(api, hub);

        session
            .write(
                "t1".to_string(),
                User {
                    id: 1,
                    username: "alice".to_string(),
                    email: None,
                },
            )
            .unwrap();
        events.lock().unwrap().clear();

        Fixture {
            todos,
            transport,
            session,
            events,
        }
    }

    #[test]
    fn list_replaces_snapshot_and_notifies() {
        let f = setup();
        f.transport.respond(200, TWO);

        let todos = f.todos.list().unwrap();
        assert_eq!(todos.len(), 2);
        assert_eq!(todos[1].comment, "");
        assert_eq!(f.todos.todos(), todos);
        assert_eq!(
            *f.events.lock().unwrap(),
            vec![ClientEvent::TodosChanged(todos)]
        );
    }

    #[test]
    fn create_posts_then_refetches() {
        let f = setup();
        f.transport
            .respond(201, r#"{"id":1,"name":"Buy milk","comment":"2%","timestamp":"2024-05-01T09:30:00"}"#)
            .respond(200, ONE);

        let todos = f.todos.create("Buy milk", "2%").unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].name, "Buy milk");

        let sent = f.transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, HttpMethod::Post);
        let body: Value = serde_json::from_str(sent[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"name": "Buy milk", "comment": "2%"}));
        assert_eq!(sent[1].method, HttpMethod::Get);
        assert_eq!(sent[1].url, "http://localhost/api/todos");
    }

    #[test]
    fn update_puts_to_todo_url() {
        let f = setup();
        f.transport.respond(200, "{}").respond(200, ONE);

        f.todos
            .update(1, &TodoInput::new("Buy oat milk", ""))
            .unwrap();
        let sent = f.transport.requests();
        assert_eq!(sent[0].method, HttpMethod::Put);
        assert_eq!(sent[0].url, "http://localhost/api/todos/1");
    }

    #[test]
    fn delete_accepts_no_content_and_refetches() {
        let f = setup();
        f.transport.respond(200, ONE);
        f.todos.list().unwrap();

        f.transport.respond(204, "").respond(200, "[]");
        let todos = f.todos.delete(1).unwrap();
        assert!(todos.is_empty());
        assert!(f.todos.todos().is_empty());
    }

    #[test]
    fn failed_mutation_skips_refetch() {
        let f = setup();
        f.transport.respond(200, ONE);
        f.todos.list().unwrap();

        f.transport.respond(404, r#"{"error":"Not found"}"#);
        let err = f.todos.delete(99).unwrap_err();
        assert!(matches!(err, SyncError::Mutation(_)));
        assert_eq!(err.to_string(), "Not found");
        assert_eq!(f.transport.requests().len(), 2);
        assert_eq!(f.todos.todos().len(), 1);
    }

    #[test]
    fn failed_refetch_reports_stale_list() {
        let f = setup();
        f.transport.respond(200, ONE);
        f.todos.list().unwrap();

        f.transport.respond(201, "{}").fail("connection reset");
        let err = f.todos.create("Walk dog", "").unwrap_err();
        assert!(err.is_committed());
        assert_eq!(f.todos.todos().len(), 1);
    }

    #[test]
    fn object_instead_of_list_is_a_shape_error() {
        let f = setup();
        f.transport.respond(200, ONE);
        f.todos.list().unwrap();

        f.transport.respond(200, r#"{"todos":[]}"#);
        let err = f.todos.list().unwrap_err();
        assert!(matches!(err, ApiError::Shape(ref m) if m.contains("an object")));
        assert_eq!(f.todos.todos().len(), 1);
    }

    #[test]
    fn malformed_entry_is_a_shape_error() {
        let f = setup();
        f.transport.respond(200, r#"[{"id":"x"}]"#);
        let err = f.todos.list().unwrap_err();
        assert!(matches!(err, ApiError::Shape(_)));
        assert!(f.todos.todos().is_empty());
    }

    #[test]
    fn unauthorized_list_logs_out_and_empties_snapshot() {
        let f = setup();
        f.transport.respond(200, ONE);
        f.todos.list().unwrap();

        f.transport.respond(401, r#"{"error":"Invalid token"}"#);
        let err = f.todos.list().unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(f.session.state(), SessionState::Unauthenticated);
        assert!(f.todos.todos().is_empty());
    }

    #[test]
    fn list_arriving_after_logout_is_dropped() {
        let f = setup();
        let session = f.session.clone();
        f.transport.respond_after(200, ONE, move || session.clear());

        let err = f.todos.list().unwrap_err();
        assert!(matches!(err, ApiError::SessionChanged));
        assert!(f.todos.todos().is_empty());
        assert_eq!(
            *f.events.lock().unwrap(),
            vec![ClientEvent::SessionChanged(SessionState::Unauthenticated)]
        );
    }

    #[test]
    fn list_arriving_after_relogin_is_dropped() {
        let f = setup();
        let session = f.session.clone();
        f.transport.respond_after(200, ONE, move || {
            session.clear();
            session
                .write(
                    "t2".to_string(),
                    User {
                        id: 2,
                        username: "bob".to_string(),
                        email: None,
                    },
                )
                .unwrap();
        });

        let err = f.todos.list().unwrap_err();
        assert!(matches!(err, ApiError::SessionChanged));
        assert!(f.todos.todos().is_empty());
        assert!(f
            .events
            .lock()
            .unwrap()
            .iter()
            .all(|event| !matches!(event, ClientEvent::TodosChanged(_))));
    }

    #[test]
    fn unauthorized_mutation_logs_out_without_refetch() {
        let f = setup();
        f.transport.respond(401, r#"{"error":"Token expired"}"#);

        let err = f.todos.update(1, &TodoInput::new("x", "")).unwrap_err();
        assert!(err.api_error().is_unauthorized());
        assert_eq!(f.session.state(), SessionState::Unauthenticated);
        assert_eq!(f.transport.requests().len(), 1);
    }
}
