//! Credential pool with rotation.
//!
//! Holds an ordered list of opaque API secrets and an active index. When a
//! provider signals an authorization or rate-limit failure, the retry layer
//! rotates to the next credential before the following attempt, on the
//! assumption that a sibling key may still be valid.
//!
//! The pool is an explicit instance owned by the agent, never process-wide
//! state, so independent sessions (and tests) do not interfere.

use std::sync::Mutex;

use crate::error::CredentialError;

/// A pool of one or more API credentials with a rotating active index.
pub struct CredentialPool {
    secrets: Vec<String>,
    current: Mutex<usize>,
}

impl CredentialPool {
    /// Create a pool from an ordered list of secrets.
    ///
    /// Fails on an empty list: every request needs a credential.
    pub fn new(secrets: Vec<String>) -> Result<Self, CredentialError> {
        if secrets.is_empty() {
            return Err(CredentialError::EmptyPool);
        }
        Ok(Self {
            secrets,
            current: Mutex::new(0),
        })
    }

    /// The currently active credential.
    pub fn current(&self) -> String {
        let idx = *self.current.lock().expect("credential index poisoned");
        self.secrets[idx].clone()
    }

    /// Advance to the next credential, modulo pool size. Returns the new
    /// active index. A single-entry pool rotates back onto itself.
    pub fn rotate(&self) -> usize {
        let mut idx = self.current.lock().expect("credential index poisoned");
        *idx = (*idx + 1) % self.secrets.len();
        tracing::debug!(index = *idx, total = self.secrets.len(), "Rotated credential");
        *idx
    }

    /// The active index.
    pub fn current_index(&self) -> usize {
        *self.current.lock().expect("credential index poisoned")
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("secrets", &"[REDACTED]")
            .field("len", &self.secrets.len())
            .field("current", &self.current_index())
            .finish()
    }
}
