//! Session and synchronization core for the todo service client.
//!
//! # Overview
//! Authenticates against the todo API, persists the resulting session, and
//! keeps the todo list consistent with the server by refetching it after
//! every mutation. Rendering is left to the host, which subscribes to
//! `ClientEvent`s and calls into `AuthController` / `TodoSynchronizer`.
//!
//! # Design
//! - `SessionStore` is the single writer of session state; `write` and
//!   `clear` persist both entries together.
//! - `ApiClient` builds plain-data `HttpRequest`s and interprets
//!   `HttpResponse`s; the round-trip goes through a host-provided
//!   `Transport` (`UreqTransport` with the default `ureq` feature).
//! - A 401 on a session-bearing call is published through
//!   `ApiClient::on_unauthorized`; `AuthController` subscribes and clears the
//!   session.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod app;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod session;
pub mod todos;
pub mod types;

pub use app::TodoApp;
pub use auth::AuthController;
pub use client::ApiClient;
pub use config::ClientConfig;
pub use error::{ApiError, SyncError};
pub use events::{ClientEvent, EventHub};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
#[cfg(feature = "ureq")]
pub use http::UreqTransport;
pub use session::{FileStorage, MemoryStorage, Session, SessionState, SessionStorage, SessionStore};
pub use todos::TodoSynchronizer;
pub use types::{Todo, TodoId, TodoInput, User};
