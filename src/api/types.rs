//! Shared state for the HTTP layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ApiConfig;
use crate::pipeline::CodingPipeline;

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub pipeline: Arc<CodingPipeline>,
    pub tokens: Arc<Mutex<TokenStore>>,
    pub config: Arc<ApiConfig>,
}

impl ApiContext {
    pub fn new(pipeline: Arc<CodingPipeline>, config: ApiConfig) -> Self {
        Self {
            pipeline,
            tokens: Arc::new(Mutex::new(TokenStore::new(config.token_ttl))),
            config: Arc::new(config),
        }
    }
}

/// Identity of an authenticated caller, injected by the auth middleware.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub identity: String,
}

/// Issued bearer tokens, held only as SHA-256 hashes with an expiry.
pub struct TokenStore {
    issued: HashMap<[u8; 32], (String, Instant)>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            issued: HashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh token for `identity`. The plaintext token is returned
    /// once and never stored.
    pub fn issue(&mut self, identity: &str) -> String {
        self.cleanup();
        let token = generate_token();
        self.issued
            .insert(hash_token(&token), (identity.to_string(), Instant::now() + self.ttl));
        token
    }

    /// Identity bound to `token`, if it was issued here and has not expired.
    pub fn validate(&self, token: &str) -> Option<String> {
        let (identity, expires) = self.issued.get(&hash_token(token))?;
        (Instant::now() < *expires).then(|| identity.clone())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        self.issued.retain(|_, (_, expires)| now < *expires);
    }
}

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
