//! Mint service account tokens through the IAM Service Account Credentials
//! API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::utils::{check_status, ServerError};

pub const DEFAULT_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot obtain a credential for {name}: {source}")]
    Exchange {
        name: String,
        #[source]
        source: ExchangeError,
    },
    #[error("cannot parse expireTime {value:?}: {source}")]
    ExchangeResponse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("auth: {0}")]
    Auth(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
}

/// The resource name the API uses for a service account email.
pub fn service_account_resource_name(email: &str) -> String {
    format!("projects/-/serviceAccounts/{}", email)
}

pub struct IamCredentials<AuthTokenProvider> {
    pub client: reqwest::Client,
    pub endpoint: String,
    /// Authenticates the `generateAccessToken` call itself.
    pub auth_token_provider: AuthTokenProvider,
    /// `projects/-/serviceAccounts/{email}` of the target account.
    pub name: String,
    /// Delegation chain, in resource-name form, from the caller to `name`.
    pub delegates: Vec<String>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GenerateAccessTokenRequest<'a> {
    delegates: &'a [String],
    scope: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    expire_time: String,
}

impl<AuthTokenProvider> IamCredentials<AuthTokenProvider>
where
    AuthTokenProvider: super::TokenProvider,
{
    fn build_url(&self) -> String {
        format!(
            "{endpoint}/v1/{name}:generateAccessToken",
            endpoint = self.endpoint.trim_end_matches('/'),
            name = self.name,
        )
    }

    async fn exchange(&self) -> Result<GenerateAccessTokenResponse, ExchangeError> {
        let auth_token = self
            .auth_token_provider
            .get_auth_token()
            .await
            .map_err(|err| ExchangeError::Auth(Box::new(err)))?;

        let body = GenerateAccessTokenRequest {
            delegates: &self.delegates,
            scope: &self.scopes,
        };
        let req = self
            .client
            .post(self.build_url())
            .bearer_auth(auth_token.access_token())
            .json(&body)
            .build()?;

        let res = self.client.execute(req).await?;
        check_status(&res)?;
        Ok(res.json().await?)
    }

    pub async fn perform(&self) -> Result<super::Token, Error> {
        debug!(message = "Generating a service account token", name = %self.name, delegates = ?self.delegates);

        let resp = self.exchange().await.map_err(|source| Error::Exchange {
            name: self.name.clone(),
            source,
        })?;
        let expiry = parse_expire_time(&resp.expire_time)?;
        Ok(super::Token::new(resp.access_token, expiry))
    }
}

fn parse_expire_time(value: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|source| Error::ExchangeResponse {
            value: value.to_owned(),
            source,
        })
}

#[async_trait::async_trait]
impl<AuthTokenProvider> super::TokenProvider for IamCredentials<AuthTokenProvider>
where
    AuthTokenProvider: super::TokenProvider,
{
    type Error = Error;

    async fn get_auth_token(&self) -> Result<super::Token, Self::Error> {
        self.perform().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::auth::{
        token_manager::testing::CountingProvider, TokenProvider, SCOPE_CLOUD_PLATFORM,
    };

    const TARGET: &str = "projects/-/serviceAccounts/deployer@project.iam.gserviceaccount.com";

    fn exchanger(endpoint: String) -> IamCredentials<CountingProvider> {
        IamCredentials {
            client: reqwest::Client::new(),
            endpoint,
            auth_token_provider: CountingProvider::new(Duration::hours(1)),
            name: TARGET.to_owned(),
            delegates: vec![service_account_resource_name(
                "hop@project.iam.gserviceaccount.com",
            )],
            scopes: vec![SCOPE_CLOUD_PLATFORM.to_owned()],
        }
    }

    #[test]
    fn resource_name() {
        assert_eq!(
            service_account_resource_name("deployer@project.iam.gserviceaccount.com"),
            TARGET
        );
    }

    #[tokio::test]
    async fn generates_access_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("/v1/{}:generateAccessToken", TARGET))
                    .header("authorization", "Bearer token-1")
                    .json_body(json!({
                        "delegates": ["projects/-/serviceAccounts/hop@project.iam.gserviceaccount.com"],
                        "scope": [SCOPE_CLOUD_PLATFORM],
                    }));
                then.status(200).json_body(json!({
                    "accessToken": "ya29.delegated",
                    "expireTime": "2030-01-02T03:04:05.123456789Z",
                }));
            })
            .await;

        let token = exchanger(server.base_url()).get_auth_token().await.unwrap();

        mock.assert_async().await;
        assert_eq!(token.access_token(), "ya29.delegated");
        assert_eq!(
            token.expiry,
            Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap() + Duration::nanoseconds(123_456_789)
        );
    }

    #[tokio::test]
    async fn permission_denied_is_exchange_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(403).json_body(json!({"error": {"status": "PERMISSION_DENIED"}}));
            })
            .await;

        let err = exchanger(server.base_url()).get_auth_token().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Exchange {
                source: ExchangeError::Server(ServerError { status_code: 403 }),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn bad_expire_time_is_response_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(200)
                    .json_body(json!({"accessToken": "x", "expireTime": "tomorrow"}));
            })
            .await;

        let err = exchanger(server.base_url()).get_auth_token().await.unwrap_err();
        assert!(matches!(err, Error::ExchangeResponse { value, .. } if value == "tomorrow"));
    }

    #[tokio::test]
    async fn auth_failure_is_exchange_error() {
        let mut exchanger = exchanger("http://127.0.0.1:9".to_owned());
        exchanger.auth_token_provider.fail = true;

        let err = exchanger.get_auth_token().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Exchange {
                source: ExchangeError::Auth(_),
                ..
            }
        ));
    }
}
