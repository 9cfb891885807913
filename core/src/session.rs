//! Session state and its durable persistence.
//!
//! # Design
//! A session is either absent or a (token, user) pair; `Session` makes the
//! half-populated state unrepresentable. `SessionStore` is the single writer:
//! `write` and `clear` are the only mutators, and both keep the in-memory
//! copy and the two persisted entries in step. Storage is abstracted behind
//! `SessionStorage` so hosts can back it with whatever survives a restart.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::events::{ClientEvent, EventHub};
use crate::types::User;

/// Storage key for the bearer token.
pub const TOKEN_KEY: &str = "accessToken";

/// Storage key for the JSON-serialized user.
pub const USER_KEY: &str = "currentUser";

/// The current authentication state, including the credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Absent,
    Active { token: String, user: User },
}

impl Session {
    pub fn token(&self) -> Option<&str> {
        match self {
            Session::Active { token, .. } => Some(token),
            Session::Absent => None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Session::Active { user, .. } => Some(user),
            Session::Absent => None,
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            Session::Active { user, .. } => SessionState::Authenticated(user.clone()),
            Session::Absent => SessionState::Unauthenticated,
        }
    }
}

/// What the presentation layer sees: the session without its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(User),
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Durable string key/value storage.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ApiError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ApiError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), ApiError>;
}

/// Process-local storage. Clones share the same entries, so a second
/// `SessionStore` loaded from a clone behaves like a reload.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ApiError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ApiError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) the storage directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ApiError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

fn storage_error(path: &Path, err: io::Error) -> ApiError {
    ApiError::Storage(format!("{}: {err}", path.display()))
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ApiError> {
        // Write-then-rename so a crash never leaves a truncated entry.
        let path = self.path(key);
        let tmp = self.dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, value).map_err(|e| storage_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| storage_error(&path, e))
    }

    fn remove(&self, key: &str) -> Result<(), ApiError> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(&path, e)),
        }
    }
}

#[derive(Debug, Default)]
struct Current {
    session: Session,
    /// Bumped every time the session actually changes.
    generation: u64,
}

/// Shared handle to the process-wide session.
///
/// `write` and `clear` hold the session lock across both storage operations
/// and the in-memory swap, so overlapping mutators never leave storage and
/// memory disagreeing. Events are emitted after the lock is released.
#[derive(Clone)]
pub struct SessionStore {
    current: Arc<RwLock<Current>>,
    storage: Arc<dyn SessionStorage>,
    events: EventHub,
}

impl SessionStore {
    /// Seed the session from `storage`.
    ///
    /// A token without a user (or the reverse), or a user entry that is not
    /// valid JSON, is discarded and the session starts absent.
    pub fn load(storage: Arc<dyn SessionStorage>, events: EventHub) -> Self {
        let session = match read_persisted(storage.as_ref()) {
            Ok(Some(session)) => session,
            Ok(None) => Session::Absent,
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted session");
                remove_entries(storage.as_ref());
                Session::Absent
            }
        };
        debug!(authenticated = session.token().is_some(), "session loaded");

        Self {
            current: Arc::new(RwLock::new(Current {
                session,
                generation: 0,
            })),
            storage,
            events,
        }
    }

    fn current(&self) -> RwLockReadGuard<'_, Current> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn read(&self) -> Session {
        self.current().session.clone()
    }

    /// The bearer token, read fresh on every call.
    pub fn token(&self) -> Option<String> {
        self.current().session.token().map(str::to_string)
    }

    pub fn state(&self) -> SessionState {
        self.current().session.state()
    }

    /// Changes whenever the session is established or cleared. Results
    /// fetched under one generation must not be applied under another.
    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    /// Persist and activate a new session.
    ///
    /// Either both entries are stored or neither is; the in-memory session
    /// only changes once storage has succeeded.
    pub fn write(&self, token: String, user: User) -> Result<(), ApiError> {
        let user_json =
            serde_json::to_string(&user).map_err(|e| ApiError::Serialization(e.to_string()))?;

        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            self.storage.set(TOKEN_KEY, &token)?;
            if let Err(e) = self.storage.set(USER_KEY, &user_json) {
                if let Err(rollback) = self.storage.remove(TOKEN_KEY) {
                    warn!(error = %rollback, "failed to roll back token entry");
                }
                return Err(e);
            }
            current.session = Session::Active {
                token,
                user: user.clone(),
            };
            current.generation += 1;
        }

        info!(user_id = user.id, username = %user.username, "session established");
        self.events
            .emit(ClientEvent::SessionChanged(SessionState::Authenticated(user)));
        Ok(())
    }

    /// Drop the session. Safe to call when no session exists.
    pub fn clear(&self) {
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            remove_entries(self.storage.as_ref());
            let previous = std::mem::take(&mut current.session);
            if matches!(previous, Session::Active { .. }) {
                current.generation += 1;
            }
            previous
        };

        if let Session::Active { user, .. } = previous {
            info!(user_id = user.id, "session cleared");
            self.events
                .emit(ClientEvent::SessionChanged(SessionState::Unauthenticated));
        }
    }
}

fn read_persisted(storage: &dyn SessionStorage) -> Result<Option<Session>, ApiError> {
    let token = storage.get(TOKEN_KEY)?;
    let user = storage.get(USER_KEY)?;
    match (token, user) {
        (None, None) => Ok(None),
        (Some(token), Some(user)) => {
            let user: User = serde_json::from_str(&user)
                .map_err(|e| ApiError::Shape(format!("persisted user: {e}")))?;
            Ok(Some(Session::Active { token, user }))
        }
        (Some(_), None) => Err(ApiError::Shape("token persisted without a user".to_string())),
        (None, Some(_)) => Err(ApiError::Shape("user persisted without a token".to_string())),
    }
}

fn remove_entries(storage: &dyn SessionStorage) {
    for key in [TOKEN_KEY, USER_KEY] {
        if let Err(e) = storage.remove(key) {
            warn!(key, error = %e, "failed to remove persisted session entry");
        }
    }
}
