//! Client configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ApiError;
use crate::session::{FileStorage, MemoryStorage, SessionStorage};

/// API root of a locally running server.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5001/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root; endpoint paths such as `/todos` are appended to it.
    pub base_url: String,
    /// Directory holding the persisted session. `None` keeps the session in
    /// memory only.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            storage_dir: None,
        }
    }
}

impl ClientConfig {
    /// Read `TODO_API_URL` and `TODO_SESSION_DIR`, falling back to defaults.
    pub fn from_env() -> Self {
        let base_url = std::env::var("TODO_API_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let storage_dir = std::env::var_os("TODO_SESSION_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            storage_dir,
        }
    }

    /// Open the session storage this configuration describes.
    pub fn open_storage(&self) -> Result<Arc<dyn SessionStorage>, ApiError> {
        Ok(match &self.storage_dir {
            Some(dir) => Arc::new(FileStorage::open(dir)?),
            None => Arc::new(MemoryStorage::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TOKEN_KEY;

    #[test]
    fn default_points_at_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:5001/api");
        assert!(config.storage_dir.is_none());
    }

    // No other test reads these variables.
    #[test]
    fn from_env_reads_overrides_and_ignores_empty_values() {
        std::env::set_var("TODO_API_URL", "http://todo.test:8080/api/");
        std::env::set_var("TODO_SESSION_DIR", "/var/lib/todo");
        let config = ClientConfig::from_env();
        assert_eq!(config.base_url, "http://todo.test:8080/api");
        assert_eq!(config.storage_dir, Some(PathBuf::from("/var/lib/todo")));

        std::env::set_var("TODO_API_URL", "  ");
        std::env::set_var("TODO_SESSION_DIR", "");
        assert_eq!(ClientConfig::from_env(), ClientConfig::default());

        std::env::remove_var("TODO_API_URL");
        std::env::remove_var("TODO_SESSION_DIR");
        assert_eq!(ClientConfig::from_env(), ClientConfig::default());
    }

    #[test]
    fn storage_dir_selects_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            storage_dir: Some(dir.path().to_path_buf()),
            ..ClientConfig::default()
        };

        config.open_storage().unwrap().set(TOKEN_KEY, "t1").unwrap();
        assert!(dir.path().join(TOKEN_KEY).exists());
    }
}
