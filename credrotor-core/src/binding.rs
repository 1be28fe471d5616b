//! The shared slot holding the currently active secret.
//!
//! [`SecretBinding`] is the hand-off point between the rotation engine (the
//! only writer) and token acquisition (many readers). Every write bumps a
//! version number so readers can tell that anything derived from an older
//! secret, such as a cached access token, is stale.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::store::Secret;

#[derive(Debug, Default)]
struct BindingState {
    secret: Option<Secret>,
    version: u64,
}

/// Cloneable handle to the active secret.
///
/// Readers must not hold on to a secret beyond a single token acquisition;
/// call [`current`](Self::current) again instead.
#[derive(Debug, Clone, Default)]
pub struct SecretBinding {
    inner: Arc<RwLock<BindingState>>,
}

impl SecretBinding {
    /// Create an empty binding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a binding seeded with `secret`.
    pub fn with_secret(secret: Secret) -> Self {
        let binding = Self::new();
        binding.set_secret(secret);
        binding
    }

    /// Replace the active secret, returning the one it displaced.
    pub fn set_secret(&self, secret: Secret) -> Option<Secret> {
        let mut state = self.inner.write();
        state.version += 1;
        state.secret.replace(secret)
    }

    /// The active secret and the version it was set at.
    pub fn current(&self) -> Option<(u64, Secret)> {
        let state = self.inner.read();
        state.secret.clone().map(|secret| (state.version, secret))
    }

    /// The active secret, without its version.
    pub fn secret(&self) -> Option<Secret> {
        self.inner.read().secret.clone()
    }

    /// Number of writes so far.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }
}
