//! Credential helper answers backed by Secret Manager.

use std::io::{BufRead, Write};

use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::{
    auth::{
        application_default::ApplicationDefault, token_manager::TokenManager, TokenProvider,
        SCOPE_CLOUD_PLATFORM,
    },
    helper::{self, Credential},
};

pub const DEFAULT_ENDPOINT: &str = "https://secretmanager.googleapis.com";
/// Environment variable naming the secret version to read.
pub const VERSION_ENV: &str = "GIT_SECRET_MANAGER_VERSION";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error reading stdin: {0}")]
    Input(#[from] helper::Error),
    #[error("failed to access secret version {version}: {source}")]
    Access {
        version: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("cannot write the credential: {0}")]
    Output(#[source] std::io::Error),
}

#[async_trait::async_trait]
pub trait SecretGetter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The payload of `version`, e.g.
    /// `projects/my-project/secrets/my-secret/versions/latest`.
    async fn access_secret_version(&self, version: &str) -> Result<Vec<u8>, Self::Error>;
}

/// Read a credential request from `r`, fill in the password from the secret,
/// and write the answer to `w`.
pub async fn generate_creds<R, W, G>(r: R, w: W, client: &G, version: &str) -> Result<(), Error>
where
    R: BufRead,
    W: Write,
    G: SecretGetter + ?Sized,
{
    let mut credential = Credential::read(r)?;

    let secret = client
        .access_secret_version(version)
        .await
        .map_err(|err| Error::Access {
            version: version.to_owned(),
            source: Box::new(err),
        })?;

    credential.password = Some(String::from_utf8_lossy(&secret).into_owned());
    credential.write(w).map_err(Error::Output)
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("auth: {0}")]
    Auth(#[from] crate::auth::token_manager::Error<crate::auth::application_default::Error>),
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] crate::auth::utils::ServerError),
    #[error("cannot decode the payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// Secret Manager REST client authenticated with application default
/// credentials.
pub struct SecretManagerClient {
    pub client: reqwest::Client,
    pub endpoint: String,
    pub auth_token_provider: TokenManager<ApplicationDefault>,
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    #[serde(default)]
    data: String,
}

impl SecretManagerClient {
    pub fn new(
        client: reqwest::Client,
        env: &crate::auth::application_default::Environment,
    ) -> Result<Self, crate::auth::application_default::Error> {
        let adc = ApplicationDefault::find(
            client.clone(),
            vec![SCOPE_CLOUD_PLATFORM.to_owned()],
            env,
        )?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            auth_token_provider: TokenManager::new(adc),
        })
    }
}

#[async_trait::async_trait]
impl SecretGetter for SecretManagerClient {
    type Error = ClientError;

    async fn access_secret_version(&self, version: &str) -> Result<Vec<u8>, Self::Error> {
        debug!(message = "Accessing secret version", version);

        let token = self.auth_token_provider.get_auth_token().await?;
        let url = format!(
            "{}/v1/{}:access",
            self.endpoint.trim_end_matches('/'),
            version
        );
        let req = self
            .client
            .get(url)
            .bearer_auth(token.access_token())
            .build()?;
        let res = self.client.execute(req).await?;
        crate::auth::utils::check_status(&res)?;

        let resp: AccessSecretVersionResponse = res.json().await?;
        let data = base64::engine::general_purpose::STANDARD.decode(resp.payload.data)?;
        Ok(data)
    }
}
