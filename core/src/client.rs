//! Request building, execution and response interpretation for the todo API.
//!
//! # Design
//! Every call is split into `build_request` (pure: envelope headers, JSON
//! body) and `parse_response` (status interpretation). `request` glues the
//! two around the host's `Transport`. The bearer token is read from the
//! `SessionStore` when the request is built, never cached.
//!
//! A 401 on a session-bearing call is announced to `on_unauthorized`
//! subscribers before the error is returned. The client itself never writes
//! the session.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, DEFAULT_ERROR_MESSAGE, SESSION_EXPIRED_MESSAGE};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::session::SessionStore;

type UnauthorizedHook = Arc<dyn Fn(&ApiError) + Send + Sync>;

/// How a 401 answer to a request is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// A 401 means the session is no longer valid.
    ExpiresSession,
    /// A 401 means the submitted credentials were wrong. If the request
    /// carried a session token, that session is dropped as well.
    Credentials,
}

/// JSON API client bound to a base URL, a transport and the session.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    session: SessionStore,
    unauthorized: Arc<RwLock<Vec<UnauthorizedHook>>>,
}

impl ApiClient {
    pub fn new(base_url: &str, transport: Arc<dyn Transport>, session: SessionStore) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            session,
            unauthorized: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// The session whose token this client sends.
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Register a callback fired whenever the server rejects the session.
    pub fn on_unauthorized(&self, hook: impl Fn(&ApiError) + Send + Sync + 'static) {
        self.unauthorized
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Build the request envelope: JSON content type, plus the bearer token
    /// when a session exists.
    pub fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> HttpRequest {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = self.session.token() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        HttpRequest {
            method,
            url: format!("{}{path}", self.base_url),
            headers,
            body,
        }
    }

    /// Interpret a response to a session-bearing request.
    ///
    /// 204 yields `None` without looking at the body. Anything else must be
    /// JSON.
    pub fn parse_response(&self, response: &HttpResponse) -> Result<Option<Value>, ApiError> {
        self.interpret(response, Rejection::ExpiresSession)
    }

    /// Issue a request without a body.
    pub fn request(&self, method: HttpMethod, path: &str) -> Result<Option<Value>, ApiError> {
        self.send(method, path, None, Rejection::ExpiresSession)
    }

    /// Issue a request with a JSON body.
    pub fn request_json<B: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        body: &B,
    ) -> Result<Option<Value>, ApiError> {
        let body = encode(body)?;
        self.send(method, path, Some(body), Rejection::ExpiresSession)
    }

    /// Submit credentials. Without a session, a 401 here is a rejected login
    /// reported as `ApiError::Validation`. With one, it is treated like any
    /// other 401 on an authenticated call: the hooks fire and the caller gets
    /// `ApiError::Auth`.
    pub fn submit_credentials<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<Value>, ApiError> {
        let body = encode(body)?;
        self.send(HttpMethod::Post, path, Some(body), Rejection::Credentials)
    }

    fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
        rejection: Rejection,
    ) -> Result<Option<Value>, ApiError> {
        let request = self.build_request(method, path, body);
        debug!(
            method = method.as_str(),
            url = %request.url,
            authenticated = request.header("authorization").is_some(),
            "sending request"
        );
        let response = self.transport.execute(&request).inspect_err(|e| {
            warn!(method = method.as_str(), url = %request.url, error = %e, "transport failure");
        })?;
        debug!(status = response.status, "received response");

        let rejection = match rejection {
            Rejection::Credentials if request.header("authorization").is_some() => {
                Rejection::ExpiresSession
            }
            other => other,
        };
        self.interpret(&response, rejection)
    }

    fn interpret(
        &self,
        response: &HttpResponse,
        rejection: Rejection,
    ) -> Result<Option<Value>, ApiError> {
        if response.status == 204 {
            return Ok(None);
        }

        let parsed = serde_json::from_str::<Value>(&response.body);

        if response.status == 401 {
            let message = parsed
                .as_ref()
                .ok()
                .and_then(server_message)
                .map(str::to_string);
            return Err(match rejection {
                Rejection::ExpiresSession => {
                    let err = ApiError::Auth {
                        message: message.unwrap_or_else(|| SESSION_EXPIRED_MESSAGE.to_string()),
                    };
                    warn!(error = %err, "server rejected the session");
                    self.notify_unauthorized(&err);
                    err
                }
                Rejection::Credentials => ApiError::Validation {
                    status: 401,
                    message: message.unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
                },
            });
        }

        let data = parsed.map_err(|e| {
            ApiError::Transport(format!(
                "invalid JSON in response (status {}): {e}",
                response.status
            ))
        })?;

        if !(200..300).contains(&response.status) {
            return Err(ApiError::Validation {
                status: response.status,
                message: server_message(&data)
                    .unwrap_or(DEFAULT_ERROR_MESSAGE)
                    .to_string(),
            });
        }

        Ok(Some(data))
    }

    fn notify_unauthorized(&self, err: &ApiError) {
        let hooks = self
            .unauthorized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook(err);
        }
    }
}

fn encode<B: Serialize>(body: &B) -> Result<String, ApiError> {
    serde_json::to_string(body).map_err(|e| ApiError::Serialization(e.to_string()))
}

/// The server's `error` field, falling back to `message`.
fn server_message(data: &Value) -> Option<&str> {
    ["error", "message"]
        .iter()
        .filter_map(|key| data.get(key).and_then(Value::as_str))
        .find(|message| !message.is_empty())
}
