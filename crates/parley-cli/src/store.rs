use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parley_client_core::{AuthSessionState, AuthStateStore};
use thiserror::Error;

pub const ENV_SESSION_FILE: &str = "PARLEY_SESSION_FILE";
const SESSION_DIR: &str = "parley";
const SESSION_FILE_NAME: &str = "session.json";

#[derive(Debug, Error)]
pub enum SessionFileError {
    #[error("session_file_io:{}:{source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("session_file_invalid:{}:{source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("session_file_unresolved: no config directory and {ENV_SESSION_FILE} is unset")]
    Unresolved,
}

/// `--session-file`, then `PARLEY_SESSION_FILE`, then the user config dir.
pub fn resolve_session_path(flag: Option<&Path>) -> Result<PathBuf, SessionFileError> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(ENV_SESSION_FILE).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join(SESSION_DIR).join(SESSION_FILE_NAME))
        .ok_or(SessionFileError::Unresolved)
}

/// Session persisted as pretty JSON. A missing file means signed out.
#[derive(Debug, Clone)]
pub struct FileAuthStateStore {
    path: PathBuf,
}

impl FileAuthStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SessionFileError {
        SessionFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl AuthStateStore for FileAuthStateStore {
    type Error = SessionFileError;

    fn load_auth_state(&self) -> Result<Option<AuthSessionState>, Self::Error> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(self.io_error(error)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| SessionFileError::Json {
                path: self.path.clone(),
                source,
            })
    }

    fn persist_auth_state(&self, state: &AuthSessionState) -> Result<(), Self::Error> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| self.io_error(error))?;
        }
        let body = serde_json::to_vec_pretty(state).map_err(|source| SessionFileError::Json {
            path: self.path.clone(),
            source,
        })?;

        // Atomic replace.
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, body).map_err(|error| self.io_error(error))?;
        restrict_permissions(&staging).map_err(|error| self.io_error(error))?;
        std::fs::rename(&staging, &self.path).map_err(|error| self.io_error(error))
    }

    fn clear_auth_state(&self) -> Result<(), Self::Error> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(self.io_error(error)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
