use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

/// Errors reading the token file written by the external OAuth flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token file not found at {0}")]
    Missing(PathBuf),

    #[error("failed to read token file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse token file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Expiry metadata of the current token set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenMetadata {
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// When the refresh token was issued; refresh tokens are only good for
    /// about seven days, so the dashboard surfaces their age.
    pub created_at: Option<DateTime<Utc>>,
}

impl TokenMetadata {
    pub fn refresh_token_age_days(&self, now: DateTime<Utc>) -> Option<f64> {
        let created = self.created_at?;
        Some((now - created).num_seconds() as f64 / 86_400.0)
    }
}

/// Source of token expiry metadata for the watch loop.
///
/// The refresh/re-authentication flow is entirely external; implementations
/// only report what the current token looks like.
pub trait TokenProvider {
    fn metadata(&self) -> Result<TokenMetadata, AuthError>;
}

// On-disk layout of token.json, as written by the OAuth helper:
// { "creation_timestamp": <epoch secs>, "token": { "access_token": "...",
//   "expires_at": <epoch secs>, ... } }
#[derive(Debug, Deserialize)]
struct TokenFileRaw {
    #[serde(default)]
    creation_timestamp: Option<i64>,
    token: InnerTokenRaw,
}

#[derive(Debug, Deserialize)]
struct InnerTokenRaw {
    access_token: String,
    expires_at: i64,
}

/// Reads token.json on demand. The external refresh flow rewrites the file
/// in place, so every read sees the latest token without coordination.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn load_raw(&self) -> Result<TokenFileRaw, AuthError> {
        if !self.path.exists() {
            return Err(AuthError::Missing(self.path.clone()));
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Current access token for broker API calls.
    pub fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.load_raw()?.token.access_token)
    }
}

impl TokenProvider for TokenStore {
    fn metadata(&self) -> Result<TokenMetadata, AuthError> {
        let raw = self.load_raw()?;
        let expires_at = Utc
            .timestamp_opt(raw.token.expires_at, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let created_at = raw
            .creation_timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());
        Ok(TokenMetadata {
            expires_at,
            created_at,
        })
    }
}
