//! Application default credentials, resolved by `google-cloud-auth`.
//!
//! The credential sources (`GOOGLE_APPLICATION_CREDENTIALS`, gcloud's
//! well-known file, the metadata server) and their token flows belong to
//! [`google_cloud_auth::credentials::Builder`]. This module adapts the result
//! to [`TokenProvider`](super::TokenProvider) and recovers the token's expiry
//! from the tokeninfo endpoint, which the library does not expose.

use std::path::PathBuf;

use google_cloud_auth::credentials::{AccessTokenCredentials, Builder};
use serde::Deserialize;
use tracing::debug;

use super::{
    utils::{check_status, ServerError},
    ExpiryOutOfRange, Token,
};

pub const DEFAULT_TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not find default credentials: {0}")]
    NotFound(String),
    #[error("cannot load default credentials: {0}")]
    Build(#[from] google_cloud_auth::build_errors::Error),
    #[error("cannot get a token from default credentials: {0}")]
    Credentials(#[from] google_cloud_auth::errors::CredentialsError),
    #[error("cannot encode the tokeninfo request: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
    #[error("cannot parse expires_in {0:?}")]
    ExpiresIn(String),
    #[error(transparent)]
    Expiry(#[from] ExpiryOutOfRange),
}

/// The part of the process environment checked before handing over to the
/// library.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// `GOOGLE_APPLICATION_CREDENTIALS`
    pub credentials_file: Option<PathBuf>,
}

impl Environment {
    pub fn from_env() -> Self {
        Self {
            credentials_file: std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS")
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Produces tokens from application default credentials.
pub struct ApplicationDefault {
    pub client: reqwest::Client,
    pub credentials: AccessTokenCredentials,
    pub tokeninfo_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    expires_in: ExpiresIn,
}

// tokeninfo reports the lifetime as a string; accept a number too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(self) -> Result<i64, Error> {
        match self {
            Self::Seconds(seconds) => Ok(seconds),
            Self::Text(text) => text.trim().parse().map_err(|_| Error::ExpiresIn(text)),
        }
    }
}

impl ApplicationDefault {
    /// Application default credentials for `scopes`.
    ///
    /// A `GOOGLE_APPLICATION_CREDENTIALS` that names a missing file is
    /// reported as [`Error::NotFound`].
    pub fn find(client: reqwest::Client, scopes: Vec<String>, env: &Environment) -> Result<Self, Error> {
        if let Some(path) = &env.credentials_file {
            if !path.is_file() {
                return Err(Error::NotFound(format!(
                    "GOOGLE_APPLICATION_CREDENTIALS names {}, which is not a file",
                    path.display()
                )));
            }
        }
        debug!(message = "Loading application default credentials", ?scopes);
        let credentials = Builder::default()
            .with_scopes(scopes)
            .build_access_token_credentials()?;
        Ok(Self::new(client, credentials))
    }

    pub fn new(client: reqwest::Client, credentials: AccessTokenCredentials) -> Self {
        Self {
            client,
            credentials,
            tokeninfo_endpoint: DEFAULT_TOKENINFO_ENDPOINT.to_owned(),
        }
    }

    pub async fn perform(&self) -> Result<Token, Error> {
        let access_token = self.credentials.access_token().await?;
        let expires_in = self.expires_in(&access_token.token).await?;
        Ok(Token::expiring_in(access_token.token, expires_in)?)
    }

    async fn expires_in(&self, access_token: &str) -> Result<i64, Error> {
        let params = serde_urlencoded::to_string([("access_token", access_token)])?;
        let req = self
            .client
            .post(&self.tokeninfo_endpoint)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(params)
            .build()?;

        let res = self.client.execute(req).await?;
        check_status(&res)?;

        let info: TokenInfo = res.json().await?;
        info.expires_in.seconds()
    }
}

#[async_trait::async_trait]
impl super::TokenProvider for ApplicationDefault {
    type Error = Error;

    async fn get_auth_token(&self) -> Result<Token, Self::Error> {
        self.perform().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use google_cloud_auth::credentials::{mds, AccessTokenCredentials};
    use httpmock::prelude::*;
    use serde_json::json;

    /// Credentials backed by a metadata server mock that hands out
    /// `access_token`, plus the matching tokeninfo mock at `/tokeninfo`.
    pub async fn metadata_server_credentials(
        server: &MockServer,
        access_token: &str,
    ) -> AccessTokenCredentials {
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/computeMetadata/v1/instance/service-accounts/default/token")
                    .header("Metadata-Flavor", "Google");
                then.status(200).json_body(
                    json!({"access_token": access_token, "expires_in": 3599, "token_type": "Bearer"}),
                );
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/tokeninfo")
                    .body_includes(format!("access_token={}", access_token));
                then.status(200)
                    .json_body(json!({"expires_in": "1800", "scope": "https://www.googleapis.com/auth/cloud-platform"}));
            })
            .await;

        mds::Builder::default()
            .with_endpoint(server.base_url())
            .build_access_token_credentials()
            .unwrap()
    }
}
