//! Error types for the session and synchronization core.
//!
//! # Design
//! `Auth` gets a dedicated variant because a 401 is not just a failure: by
//! the time the caller sees it the session has already been cleared. All
//! other non-2xx responses land in `Validation` with the status code and the
//! server-supplied message. `Shape` covers well-formed JSON that does not
//! match the expected structure; `Transport` covers everything below HTTP
//! semantics (connection failures, unparseable bodies).

use thiserror::Error;

/// Fallback message when the server gives no usable error text.
pub const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong";

/// Fallback message for a 401 without a server-supplied error.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please login again.";

/// Errors returned by `ApiClient` and the components built on it.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a usable HTTP response.
    #[error("{0}")]
    Transport(String),

    /// The server returned 401. The session has been cleared.
    #[error("{message}")]
    Auth { message: String },

    /// The server returned a non-2xx status other than 401.
    #[error("{message}")]
    Validation { status: u16, message: String },

    /// The response JSON does not have the expected structure.
    #[error("unexpected response shape: {0}")]
    Shape(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Durable session storage failed.
    #[error("session storage failed: {0}")]
    Storage(String),

    /// The session was established or cleared while the request was in
    /// flight, so its result was dropped.
    #[error("session changed while the request was in flight")]
    SessionChanged,
}

impl ApiError {
    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Auth { .. } => Some(401),
            ApiError::Validation { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message suitable for display.
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }
}

/// Errors returned by the mutating `TodoSynchronizer` operations.
///
/// A mutation is a two-step round trip: the write itself, then the refetch of
/// the authoritative list. The variant tells the caller which step failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The write was rejected. Nothing changed server-side and the list was
    /// not refetched.
    #[error(transparent)]
    Mutation(ApiError),

    /// The write succeeded but the refetch failed, so the displayed list may
    /// be out of date.
    #[error("change saved, but the list may be out of date: {0}")]
    Stale(ApiError),
}

impl SyncError {
    /// The underlying API error, whichever step produced it.
    pub fn api_error(&self) -> &ApiError {
        match self {
            SyncError::Mutation(err) | SyncError::Stale(err) => err,
        }
    }

    /// True when the server committed the mutation.
    pub fn is_committed(&self) -> bool {
        matches!(self, SyncError::Stale(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_displays_server_message() {
        let err = ApiError::Validation {
            status: 400,
            message: "Username already exists".to_string(),
        };
        assert_eq!(err.to_string(), "Username already exists");
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn auth_error_reports_401() {
        let err = ApiError::Auth {
            message: SESSION_EXPIRED_MESSAGE.to_string(),
        };
        assert_eq!(err.status(), Some(401));
        assert!(err.is_unauthorized());
    }

    #[test]
    fn message_is_the_display_text() {
        let err = ApiError::Auth {
            message: "Invalid token".to_string(),
        };
        assert_eq!(err.message(), "Invalid token");

        let err = ApiError::Shape("expected a list of todos, got an object".to_string());
        assert_eq!(
            err.message(),
            "unexpected response shape: expected a list of todos, got an object"
        );
        assert_eq!(err.status(), None);
    }

    #[test]
    fn stale_error_mentions_out_of_date_list() {
        let err = SyncError::Stale(ApiError::Transport("connection reset".to_string()));
        assert!(err.is_committed());
        assert_eq!(
            err.to_string(),
            "change saved, but the list may be out of date: connection reset"
        );
    }

    #[test]
    fn mutation_error_is_transparent() {
        let err = SyncError::Mutation(ApiError::Validation {
            status: 404,
            message: "Not found".to_string(),
        });
        assert!(!err.is_committed());
        assert_eq!(err.to_string(), "Not found");
        assert_eq!(err.api_error().status(), Some(404));
    }
}
