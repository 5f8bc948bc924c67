//! Session-scoped credential cache.
//!
//! Successful interactive logins are kept in memory (never on disk) so
//! repeated jobs against the same origin skip the prompt. Entries are keyed
//! by origin plus realm; a username in the request narrows the match.

use std::collections::HashMap;

use portage_wire::AuthInfo;

use crate::identity::{host_of, scheme_of};

fn cache_key(url: &str, realm: &str) -> Option<String> {
    let scheme = scheme_of(url).ok()?;
    let host = host_of(url).ok()?;
    Some(format!("{scheme}://{host}#{realm}"))
}

#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: HashMap<String, AuthInfo>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached credentials matching the request, if any.
    pub fn check(&self, info: &AuthInfo) -> Option<AuthInfo> {
        let key = cache_key(&info.url, &info.realm)?;
        let hit = self.entries.get(&key)?;
        if !info.username.is_empty() && hit.username != info.username {
            return None;
        }
        Some(hit.clone())
    }

    /// Store credentials the user allowed to keep.
    pub fn store(&mut self, info: &AuthInfo) {
        if !info.keep_password {
            return;
        }
        if let Some(key) = cache_key(&info.url, &info.realm) {
            self.entries.insert(key, info.clone());
        }
    }

    /// Drop credentials for an origin after an authentication failure.
    pub fn evict(&mut self, url: &str, realm: &str) {
        if let Some(key) = cache_key(url, realm) {
            self.entries.remove(&key);
        }
    }
}
