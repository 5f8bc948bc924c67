//! Credential records exchanged through auth prompts.

use crate::error::WireError;
use crate::payload::{PayloadReader, PayloadWriter};

/// Credentials for one authentication round trip.
///
/// A worker fills `url`, `prompt` and `realm` (plus any username it already
/// knows) when asking; the answer comes back with `username`/`password`
/// filled. `keep_password` is the user's consent to cache the result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthInfo {
    pub url: String,
    pub username: String,
    pub password: String,
    pub prompt: String,
    pub realm: String,
    pub keep_password: bool,
}

impl AuthInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        w.put_str(&self.url);
        w.put_str(&self.username);
        w.put_str(&self.password);
        w.put_str(&self.prompt);
        w.put_str(&self.realm);
        w.put_bool(self.keep_password);
        w.into_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = PayloadReader::new(payload);
        Ok(Self {
            url: r.get_str("auth url")?,
            username: r.get_str("auth username")?,
            password: r.get_str("auth password")?,
            prompt: r.get_str("auth prompt")?,
            realm: r.get_str("auth realm")?,
            keep_password: r.get_bool("auth keep")?,
        })
    }
}
