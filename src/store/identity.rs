use anyhow::Result;

use crate::models::OwnerId;

use super::IdentityProvider;

/// Identity fixed at construction, e.g. from the process environment.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    owner: Option<OwnerId>,
}

impl StaticIdentity {
    pub fn new(owner: Option<OwnerId>) -> Self {
        Self { owner }
    }

    pub fn signed_in(owner: impl Into<String>) -> Self {
        Self::new(Some(OwnerId::new(owner)))
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    /// Reads the owner from an environment variable; unset or blank means
    /// anonymous.
    pub fn from_env(var: &str) -> Self {
        let owner = std::env::var(var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(OwnerId::new);
        Self::new(owner)
    }
}

impl IdentityProvider for StaticIdentity {
    async fn current_owner(&self) -> Result<Option<OwnerId>> {
        Ok(self.owner.clone())
    }
}
