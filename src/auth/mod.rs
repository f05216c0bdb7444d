//! Token providers and the token cache.

use chrono::{DateTime, Duration, TimeDelta, Utc};

pub mod application_default;
pub mod gcloud;
pub mod iam_credentials;
pub mod token_manager;
pub(crate) mod utils;

/// The OAuth2 scope that grants access to everything the caller's IAM
/// permissions allow.
pub const SCOPE_CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";

#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn get_auth_token(&self) -> Result<Token, Self::Error>;
}

#[async_trait::async_trait]
impl<P: TokenProvider + ?Sized> TokenProvider for std::sync::Arc<P> {
    type Error = P::Error;

    async fn get_auth_token(&self) -> Result<Token, Self::Error> {
        (**self).get_auth_token().await
    }
}

/// A token lifetime that does not fit in a timestamp.
#[derive(Debug, thiserror::Error)]
#[error("token lifetime of {0} seconds is out of range")]
pub struct ExpiryOutOfRange(pub i64);

/// An access token and the instant it stops being accepted.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expiry,
        }
    }

    /// Build a token from a relative lifetime, as OAuth2 token endpoints
    /// report it.
    pub fn expiring_in(
        access_token: impl Into<String>,
        expires_in_secs: i64,
    ) -> Result<Self, ExpiryOutOfRange> {
        let expiry = TimeDelta::try_seconds(expires_in_secs)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or(ExpiryOutOfRange(expires_in_secs))?;
        Ok(Self::new(access_token, expiry))
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Whether the token is still usable at `now`, keeping `margin` in
    /// reserve before the expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expiry
    }
}

// Keep access tokens out of logs.
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}
