/// Credentials, tokens and the artifacts attached to outgoing requests
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::utils::unix_now;

/// How requests authenticate against the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Log in once, send `Authorization: bearer <jwt>`
    Jwt,
    /// Send `Authorization: Basic ...` on every request
    Basic,
    /// No authorization header at all
    None,
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jwt" => Ok(AuthMode::Jwt),
            "basic" => Ok(AuthMode::Basic),
            "none" | "" => Ok(AuthMode::None),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid auth mode '{}': expected jwt, basic or none",
                other
            ))),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Jwt => write!(f, "jwt"),
            AuthMode::Basic => write!(f, "basic"),
            AuthMode::None => write!(f, "none"),
        }
    }
}

/// Supplied once at startup, never mutated
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub mode: AuthMode,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P, mode: AuthMode) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            mode,
        }
    }

    pub fn anonymous() -> Self {
        Self::new("", "", AuthMode::None)
    }

    /// Stable key identifying these credentials without revealing them.
    /// Cache entries are only ever reused under an identical fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mode.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.username.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.password.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub(crate) fn basic_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}

/// An issued JWT. Timestamps are unix seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    value: String,
    pub issued_at: u64,
    pub ttl_secs: u64,
}

impl AuthToken {
    pub fn new<S: Into<String>>(value: S, issued_at: u64, ttl_secs: u64) -> Self {
        Self {
            value: value.into(),
            issued_at,
            ttl_secs,
        }
    }

    /// Build from a freshly issued JWT. The `exp` claim wins over the
    /// configured TTL when the token carries one. An `exp` at or before
    /// `issued_at` (clock skew) falls back to the configured TTL.
    pub fn from_jwt<S: Into<String>>(value: S, issued_at: u64, default_ttl: Duration) -> Self {
        let value = value.into();
        let ttl_secs = jwt_expiry(&value)
            .map(|exp| exp.saturating_sub(issued_at))
            .filter(|ttl| *ttl > 0)
            .unwrap_or_else(|| default_ttl.as_secs());
        Self::new(value, issued_at, ttl_secs)
    }

    pub fn expires_at(&self) -> u64 {
        self.issued_at.saturating_add(self.ttl_secs)
    }

    /// Refresh margin applied to this token: capped at half its lifetime,
    /// so a freshly issued short-lived token is usable at least once
    pub fn effective_margin(&self, margin: Duration) -> Duration {
        margin.min(Duration::from_secs(self.ttl_secs / 2))
    }

    /// Usable only while `now < expiry - margin`
    pub fn is_usable_at(&self, now: u64, margin: Duration) -> bool {
        let margin = self.effective_margin(margin).as_secs();
        now < self.expires_at().saturating_sub(margin)
    }

    pub fn is_usable(&self, margin: Duration) -> bool {
        self.is_usable_at(unix_now(), margin)
    }

    /// Raw token value. Never log this.
    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn bearer_header(&self) -> String {
        format!("bearer {}", self.value)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<u64>,
}

/// `exp` claim of a JWT, if the payload segment decodes
fn jwt_expiry(jwt: &str) -> Option<u64> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice::<JwtClaims>(&bytes).ok()?.exp
}

/// What gets attached to an outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Basic(String),
    Bearer(AuthToken),
}

impl Credential {
    /// Value for the `Authorization` header, if any
    pub fn authorization(&self) -> Option<String> {
        match self {
            Credential::Anonymous => None,
            Credential::Basic(header) => Some(header.clone()),
            Credential::Bearer(token) => Some(token.bearer_header()),
        }
    }

    pub fn token(&self) -> Option<&AuthToken> {
        match self {
            Credential::Bearer(token) => Some(token),
            _ => None,
        }
    }
}
