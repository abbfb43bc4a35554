//! Short lived single purpose tokens, e.g. for account recovery links.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{
    Duration,
    Instant,
};

use log::debug;
use uuid::Uuid;

use crate::error::LdpError;

pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub token: String,
    pub subject_data: HashMap<String, String>,
    pub expiry: Instant,
}

impl TokenRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }
}

/// Token store, keyed by a domain so that tokens of different features never collide.
pub struct TokenService {
    lifetime: Duration,
    tokens: Mutex<HashMap<String, HashMap<String, TokenRecord>>>,
}

impl TokenService {
    pub fn new() -> TokenService {
        TokenService::with_lifetime(DEFAULT_TOKEN_LIFETIME)
    }

    pub fn with_lifetime(lifetime: Duration) -> TokenService {
        TokenService {
            lifetime,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn generate(&self, domain: &str, subject_data: HashMap<String, String>) -> Result<String, LdpError> {
        let token = Uuid::new_v4().simple().to_string();
        let record = TokenRecord {
            token: token.clone(),
            subject_data,
            expiry: Instant::now() + self.lifetime,
        };
        let mut tokens = self.tokens.lock().map_err(|_| LdpError::Internal("token store poisoned".to_string()))?;
        tokens.entry(domain.to_string()).or_default().insert(token.clone(), record);
        debug!("generated {} token", domain);
        Ok(token)
    }

    /// Returns and consumes the record for a live token.
    ///
    /// Expired tokens of the domain are dropped on the way. A token verifies
    /// at most once.
    pub fn verify(&self, domain: &str, token: &str) -> Option<TokenRecord> {
        let mut tokens = self.tokens.lock().ok()?;
        let records = tokens.get_mut(domain)?;
        let now = Instant::now();
        records.retain(|_, r| !r.is_expired(now));
        let record = records.remove(token);
        if record.is_some() {
            debug!("consumed {} token", domain);
        }
        record
    }

    pub fn remove(&self, domain: &str, token: &str) {
        if let Ok(mut tokens) = self.tokens.lock() {
            if let Some(records) = tokens.get_mut(domain) {
                records.remove(token);
            }
        }
    }
}

impl Default for TokenService {
    fn default() -> TokenService {
        TokenService::new()
    }
}
