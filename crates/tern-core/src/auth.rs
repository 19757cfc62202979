//! Bearer-token access
//!
//! Token acquisition lives outside this layer; the connection manager and
//! the REST client only need "the current token, if any". [`TokenProvider`]
//! is that seam. [`StaticTokenProvider`] is the in-memory implementation
//! used by the CLI and by tests.

use std::sync::RwLock;

/// Source of the current bearer token
pub trait TokenProvider: Send + Sync {
    /// The current bearer token, or `None` when unauthenticated/expired
    fn token(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

/// Token provider backed by a single replaceable token
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Create an unauthenticated provider
    pub fn empty() -> Self {
        Self {
            token: RwLock::new(None),
        }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write().unwrap() = None;
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider() {
        let provider = StaticTokenProvider::new("abc123");
        assert!(provider.is_authenticated());
        assert_eq!(provider.token().as_deref(), Some("abc123"));

        provider.clear();
        assert!(!provider.is_authenticated());
        assert_eq!(provider.token(), None);

        provider.set_token("def456");
        assert_eq!(provider.token().as_deref(), Some("def456"));
    }

    #[test]
    fn test_empty_provider() {
        let provider = StaticTokenProvider::empty();
        assert!(!provider.is_authenticated());
    }
}
