//! Credential collaborator boundary.
//!
//! The manager attaches an externally supplied bearer token after the channel
//! opens. Where the token comes from is out of scope here.

use std::sync::Arc;

/// Source of the bearer token attached on open.
pub trait CredentialProvider: Send + Sync {
    /// The current bearer token, or `None` when unauthenticated.
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed-token provider for tests and simple deployments.
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    /// Create a provider that always returns the given token.
    pub fn new(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            token: token.into(),
        })
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials() {
        let provider = StaticCredentials::new("token-123");
        assert_eq!(provider.bearer_token(), Some("token-123".to_string()));
    }
}
