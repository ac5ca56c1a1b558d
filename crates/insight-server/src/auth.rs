//! Subscriber identity resolution
//!
//! Authentication itself lives elsewhere; the HTTP surface only needs a
//! token turned into a stable subscriber id before it connects a stream or
//! submits work.

use insight_core::{ServerConfig, SubscriberId};
use std::collections::HashMap;

/// Turns a request token into a subscriber identity
#[async_trait::async_trait]
pub trait SubscriberResolver: Send + Sync {
    /// Resolve `token`, `None` if it is not valid
    async fn resolve(&self, token: &str) -> Option<SubscriberId>;
}

/// Resolver backed by a fixed token table
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, SubscriberId>,
}

impl StaticTokenResolver {
    /// Create an empty resolver that accepts nothing
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver for the tokens in `[server.tokens]`
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            tokens: config
                .tokens
                .iter()
                .map(|(token, id)| (token.clone(), SubscriberId(*id)))
                .collect(),
        }
    }

    /// With one more accepted token
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, subscriber: impl Into<SubscriberId>) -> Self {
        self.tokens.insert(token.into(), subscriber.into());
        self
    }

    /// Number of accepted tokens
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if no token is accepted
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait::async_trait]
impl SubscriberResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> Option<SubscriberId> {
        self.tokens.get(token).copied()
    }
}
