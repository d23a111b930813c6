//! Environment variable handling.

use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("required environment variable not set: {var}")]
    NotSet { var: String },

    #[error("failed to load .env file: {0}")]
    DotenvError(#[from] dotenvy::Error),
}

/// Environment variable names.
pub mod vars {
    pub const HANGAR_HOME: &str = "HANGAR_HOME";
    pub const HANGAR_PLUGINS_DIR: &str = "HANGAR_PLUGINS_DIR";
    pub const HANGAR_DATA_DIR: &str = "HANGAR_DATA_DIR";
    pub const HANGAR_CACHE_DIR: &str = "HANGAR_CACHE_DIR";
    pub const HANGAR_CATALOG_DIR: &str = "HANGAR_CATALOG_DIR";
}

/// Environment access.
pub struct Environment {
    _guard: (),
}

impl Environment {
    /// Load `.env` from the working directory, then `<home>/.env`.
    ///
    /// Variables already present in the process environment win.
    pub fn init(home: Option<&Path>) -> Result<Self, EnvError> {
        let _ = dotenvy::from_filename(".env");
        if let Some(home) = home {
            let file = home.join(".env");
            if file.is_file() {
                dotenvy::from_path(&file)?;
            }
        }

        Ok(Self { _guard: () })
    }

    /// Get an optional string variable. Empty values count as unset.
    pub fn get(var: &str) -> Option<String> {
        env::var(var).ok().filter(|v| !v.trim().is_empty())
    }

    /// Get an optional path variable.
    pub fn get_path(var: &str) -> Option<PathBuf> {
        Self::get(var).map(PathBuf::from)
    }

    /// The Hangar home directory: `$HANGAR_HOME`, else `~/.hangar`.
    pub fn home_dir() -> Result<PathBuf, EnvError> {
        if let Some(home) = Self::get_path(vars::HANGAR_HOME) {
            return Ok(home);
        }
        dirs::home_dir()
            .map(|h| h.join(".hangar"))
            .ok_or_else(|| EnvError::NotSet {
                var: vars::HANGAR_HOME.to_string(),
            })
    }
}
