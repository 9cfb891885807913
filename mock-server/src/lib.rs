//! In-memory implementation of the todo API for tests and local development.
//!
//! Accounts, bearer tokens and todos live in a single `RwLock`ed store and
//! vanish with the process. Passwords are kept in plain text.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: i64,
    pub name: String,
    pub comment: Option<String>,
    pub timestamp: NaiveDateTime,
    pub user_id: i64,
}

#[derive(Deserialize)]
struct RegisterInput {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct LoginInput {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct TodoInput {
    name: Option<String>,
    comment: Option<String>,
}

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct Store {
    accounts: Vec<Account>,
    tokens: HashMap<String, i64>,
    todos: BTreeMap<i64, Todo>,
    last_user_id: i64,
    last_todo_id: i64,
}

impl Store {
    fn issue_token(&mut self, user_id: i64) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens.insert(token.clone(), user_id);
        token
    }
}

/// Shared server state. Clones refer to the same store.
#[derive(Clone, Default)]
pub struct AppState {
    store: Arc<RwLock<Store>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate every issued token, as if they had all expired.
    pub async fn revoke_tokens(&self) {
        self.store.write().await.tokens.clear();
    }

    /// All todos across users, in id order.
    pub async fn todos(&self) -> Vec<Todo> {
        self.store.read().await.todos.values().cloned().collect()
    }
}

type Failure = (StatusCode, Json<Value>);

fn failure(status: StatusCode, error: &str) -> Failure {
    (status, Json(json!({ "error": error })))
}

fn failure_with_message(status: StatusCode, error: &str, message: &str) -> Failure {
    (status, Json(json!({ "error": error, "message": message })))
}

fn bad_json(rejection: JsonRejection) -> Failure {
    failure_with_message(
        StatusCode::BAD_REQUEST,
        "Content-Type must be application/json",
        &rejection.body_text(),
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

pub fn app() -> Router {
    router(AppState::new())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/todos", get(list_todos).post(create_todo))
        .route("/api/todos/{id}", put(update_todo).delete(delete_todo))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, AppState::new()).await
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), Failure> {
    let Json(input) = body.map_err(bad_json)?;
    let (Some(username), Some(email), Some(password)) = (
        non_empty(input.username),
        non_empty(input.email),
        non_empty(input.password),
    ) else {
        return Err(failure(StatusCode::BAD_REQUEST, "Missing required fields"));
    };

    let mut store = state.store.write().await;
    if store.accounts.iter().any(|a| a.user.username == username) {
        return Err(failure(StatusCode::BAD_REQUEST, "Username already exists"));
    }
    if store.accounts.iter().any(|a| a.user.email == email) {
        return Err(failure(StatusCode::BAD_REQUEST, "Email already exists"));
    }

    store.last_user_id += 1;
    let user = User {
        id: store.last_user_id,
        username,
        email,
        created_at: Utc::now().naive_utc(),
    };
    store.accounts.push(Account {
        user: user.clone(),
        password,
    });
    let token = store.issue_token(user.id);
    info!(user_id = user.id, username = %user.username, "registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User created successfully",
            "user": user,
            "access_token": token,
        })),
    ))
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginInput>, JsonRejection>,
) -> Result<Json<Value>, Failure> {
    let Json(input) = body.map_err(bad_json)?;
    let (Some(username), Some(password)) = (input.username, input.password) else {
        return Err(failure(StatusCode::BAD_REQUEST, "Missing username or password"));
    };

    let mut store = state.store.write().await;
    let user = store
        .accounts
        .iter()
        .find(|a| a.user.username == username && a.password == password)
        .map(|a| a.user.clone())
        .ok_or_else(|| {
            warn!(%username, "rejected login");
            failure(StatusCode::UNAUTHORIZED, "Invalid username or password")
        })?;
    let token = store.issue_token(user.id);
    info!(user_id = user.id, "logged in");

    Ok(Json(json!({
        "message": "Login successful",
        "user": user,
        "access_token": token,
    })))
}

/// Resolve the bearer token to a user id.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<i64, Failure> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            failure_with_message(
                StatusCode::UNAUTHORIZED,
                "No token provided",
                "Authentication token is missing",
            )
        })?;

    state.store.read().await.tokens.get(token).copied().ok_or_else(|| {
        failure_with_message(
            StatusCode::UNAUTHORIZED,
            "Invalid token",
            "The token is invalid or expired",
        )
    })
}

async fn list_todos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Todo>>, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let store = state.store.read().await;
    Ok(Json(
        store
            .todos
            .values()
            .filter(|todo| todo.user_id == user_id)
            .cloned()
            .collect(),
    ))
}

async fn create_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TodoInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Todo>), Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let Json(input) = body.map_err(bad_json)?;
    let name = non_empty(input.name)
        .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "Name is required"))?;

    let mut store = state.store.write().await;
    store.last_todo_id += 1;
    let todo = Todo {
        id: store.last_todo_id,
        name,
        comment: input.comment,
        timestamp: Utc::now().naive_utc(),
        user_id,
    };
    store.todos.insert(todo.id, todo.clone());
    Ok((StatusCode::CREATED, Json(todo)))
}

/// Look up a todo the caller owns.
fn owned_todo<'a>(store: &'a mut Store, id: i64, user_id: i64) -> Result<&'a mut Todo, Failure> {
    let todo = store
        .todos
        .get_mut(&id)
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "Not found"))?;
    if todo.user_id != user_id {
        return Err(failure(StatusCode::FORBIDDEN, "Unauthorized access"));
    }
    Ok(todo)
}

async fn update_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    body: Result<Json<TodoInput>, JsonRejection>,
) -> Result<Json<Todo>, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let Json(input) = body.map_err(bad_json)?;

    let mut store = state.store.write().await;
    let todo = owned_todo(&mut store, id, user_id)?;
    if let Some(name) = input.name {
        if name.is_empty() {
            return Err(failure(StatusCode::BAD_REQUEST, "Name cannot be empty"));
        }
        todo.name = name;
    }
    if let Some(comment) = input.comment {
        todo.comment = Some(comment);
    }
    Ok(Json(todo.clone()))
}

async fn delete_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, Failure> {
    let user_id = authenticate(&state, &headers).await?;
    let mut store = state.store.write().await;
    owned_todo(&mut store, id, user_id)?;
    store.todos.remove(&id);
    Ok(StatusCode::NO_CONTENT)
}
