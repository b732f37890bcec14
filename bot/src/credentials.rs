//! Access token loading.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default token file, relative to the working directory.
pub const TOKEN_FILE: &str = ".env";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("could not read token file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("access token in {0} is empty")]
    Empty(String),
}

/// Returns the explicit token if given, otherwise the trimmed contents of `path`.
pub fn load_token(explicit: Option<&str>, path: &Path) -> Result<String, CredentialError> {
    if let Some(token) = explicit {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty("LICHESS_TOKEN".to_string()));
        }
        return Ok(token.to_string());
    }

    let contents = std::fs::read_to_string(path).map_err(|source| CredentialError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let token = contents.trim();
    if token.is_empty() {
        return Err(CredentialError::Empty(path.display().to_string()));
    }
    Ok(token.to_string())
}
