//! Token persistence collaborators.
//!
//! The token store hands every outcome of a grant to a [`TokenPersistence`]
//! so tokens survive restarts.

use crate::error::Result;
use crate::token::{Credentials, TokenState};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Load/save interface for token material.
pub trait TokenPersistence: Send + Sync {
    /// Load the last saved token state.
    ///
    /// # Errors
    ///
    /// Returns an error if stored state exists but cannot be read.
    fn load_token(&self) -> Result<TokenState>;

    /// Save token state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    fn save_token(&self, token: &TokenState) -> Result<()>;

    /// Client credentials to use for grants.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be read.
    fn load_credentials(&self) -> Result<Credentials>;
}

/// Stores the token as pretty JSON in a file.
#[derive(Debug)]
pub struct JsonFileTokenPersistence {
    path: PathBuf,
    credentials: Credentials,
}

impl JsonFileTokenPersistence {
    pub fn new(path: impl Into<PathBuf>, credentials: Credentials) -> Self {
        Self {
            path: path.into(),
            credentials,
        }
    }
}

impl TokenPersistence for JsonFileTokenPersistence {
    fn load_token(&self) -> Result<TokenState> {
        if !self.path.exists() {
            info!("No cached token file found at {:?}", self.path);
            return Ok(TokenState::default());
        }

        let content = fs::read_to_string(&self.path)?;
        let token: TokenState = serde_json::from_str(&content)?;
        debug!("Loaded token from {:?}", self.path);
        Ok(token)
    }

    fn save_token(&self, token: &TokenState) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(token)?;
        fs::write(&self.path, content)?;
        debug!("Saved token to {:?}", self.path);
        Ok(())
    }

    fn load_credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Keeps the token in memory and counts saves.
#[derive(Debug, Default)]
pub struct MemoryTokenPersistence {
    inner: Mutex<MemoryInner>,
    credentials: Credentials,
}

#[derive(Debug, Default)]
struct MemoryInner {
    token: TokenState,
    saves: usize,
}

impl MemoryTokenPersistence {
    #[must_use]
    pub fn new(credentials: Credentials, token: TokenState) -> Self {
        Self {
            inner: Mutex::new(MemoryInner { token, saves: 0 }),
            credentials,
        }
    }

    /// Number of times `save_token` has been called.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).saves
    }

    /// The last saved (or initial) state.
    #[must_use]
    pub fn saved(&self) -> TokenState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }
}

impl TokenPersistence for MemoryTokenPersistence {
    fn load_token(&self) -> Result<TokenState> {
        Ok(self.saved())
    }

    fn save_token(&self, token: &TokenState) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.token = token.clone();
        inner.saves += 1;
        Ok(())
    }

    fn load_credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}
