//! Owner identity as seen by the tracker.
//!
//! Authentication lives elsewhere; the tracker only asks who is signed in
//! at the moment it is about to write.

use std::sync::RwLock;

use crate::error::AdherenceError;
use crate::models::OwnerId;

pub trait IdentityProvider: Send + Sync {
    /// Raw id of the signed-in user, if any. May be blank or a placeholder.
    fn current_owner(&self) -> Option<String>;
}

/// Resolve the provider's answer to a usable owner or fail with a
/// retryable ownership error.
pub fn resolve_owner(provider: &dyn IdentityProvider) -> Result<OwnerId, AdherenceError> {
    match provider.current_owner() {
        Some(raw) => OwnerId::parse(&raw),
        None => Err(AdherenceError::Ownership("no signed-in user".into())),
    }
}

/// Identity held in memory and switched explicitly on sign-in/out.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    owner: RwLock<Option<String>>,
}

impl StaticIdentity {
    pub fn new(owner: Option<&str>) -> Self {
        Self {
            owner: RwLock::new(owner.map(str::to_string)),
        }
    }

    pub fn sign_in(&self, owner: &str) {
        *self.owner.write().unwrap_or_else(|e| e.into_inner()) = Some(owner.to_string());
    }

    pub fn sign_out(&self) {
        *self.owner.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_owner(&self) -> Option<String> {
        self.owner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
