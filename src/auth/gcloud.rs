//! Obtain access tokens from the `gcloud` CLI.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::process::{self, CommandRunner};

/// Layout of `token_expiry.datetime` in `gcloud --format=json` output.
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to run gcloud: {0}")]
    Invocation(#[from] InvocationError),
    #[error("unusable gcloud print-access-token result: {0}")]
    Response(#[from] ResponseError),
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Process(#[from] process::Error),
    #[error("{program} exited with {code}")]
    Exit { program: PathBuf, code: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing access_token")]
    MissingAccessToken,
    #[error("missing token_expiry.datetime")]
    MissingExpiry,
    #[error("cannot parse token expiry {value:?}: {source}")]
    Expiry {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Runs `gcloud --format=json auth print-access-token [ACCOUNT]`.
pub struct Gcloud {
    pub runner: Arc<dyn CommandRunner>,
    /// Absolute path to the gcloud executable.
    pub gcloud_path: PathBuf,
    /// Account to print a token for. `None` uses gcloud's active account.
    pub account: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GcloudCredential {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_expiry: TokenExpiry,
}

#[derive(Debug, Default, Deserialize)]
struct TokenExpiry {
    #[serde(default)]
    datetime: String,
}

impl Gcloud {
    fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--format=json".to_owned(),
            "auth".to_owned(),
            "print-access-token".to_owned(),
        ];
        if let Some(account) = &self.account {
            args.push(account.clone());
        }
        args
    }

    pub async fn perform(&self) -> Result<super::Token, Error> {
        debug!(message = "Asking gcloud for a token", account = ?self.account);

        let output = self
            .runner
            .run(&self.gcloud_path, &self.args())
            .await
            .map_err(InvocationError::from)?;
        if !output.success() {
            let code = output
                .code
                .map_or_else(|| "a signal".to_owned(), |code| format!("status {}", code));
            return Err(InvocationError::Exit {
                program: self.gcloud_path.clone(),
                code,
            }
            .into());
        }

        let token = parse_response(&output.stdout)?;
        Ok(token)
    }
}

fn parse_response(stdout: &[u8]) -> Result<super::Token, ResponseError> {
    let cred: GcloudCredential = serde_json::from_slice(stdout)?;
    if cred.access_token.is_empty() {
        return Err(ResponseError::MissingAccessToken);
    }
    if cred.token_expiry.datetime.is_empty() {
        return Err(ResponseError::MissingExpiry);
    }
    let expiry = parse_expiry(&cred.token_expiry.datetime)?;
    Ok(super::Token::new(cred.access_token, expiry))
}

/// gcloud prints the expiry without a zone; it is UTC.
pub fn parse_expiry(value: &str) -> Result<DateTime<Utc>, ResponseError> {
    NaiveDateTime::parse_from_str(value, EXPIRY_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| ResponseError::Expiry {
            value: value.to_owned(),
            source,
        })
}

pub fn format_expiry(expiry: &DateTime<Utc>) -> String {
    expiry.naive_utc().format(EXPIRY_FORMAT).to_string()
}

#[async_trait::async_trait]
impl super::TokenProvider for Gcloud {
    type Error = Error;

    async fn get_auth_token(&self) -> Result<super::Token, Self::Error> {
        self.perform().await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike};
    use proptest::prelude::*;

    use super::*;
    use crate::{
        auth::TokenProvider,
        process::testing::{exit, ok, FakeRunner},
    };

    const SAMPLE: &str = r#"{
        "access_token": "ya29.sample",
        "id_token": "ignored",
        "token_expiry": {"datetime": "2019-06-10 17:58:02.123456", "tzinfo": null}
    }"#;

    fn gcloud(runner: Arc<FakeRunner>, account: Option<&str>) -> Gcloud {
        Gcloud {
            runner,
            gcloud_path: PathBuf::from("/opt/google-cloud-sdk/bin/gcloud"),
            account: account.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn default_account_token() {
        let runner = Arc::new(FakeRunner::with_outputs([ok(SAMPLE)]));
        let token = gcloud(Arc::clone(&runner), None)
            .get_auth_token()
            .await
            .unwrap();

        assert_eq!(token.access_token(), "ya29.sample");
        assert_eq!(
            token.expiry,
            Utc.with_ymd_and_hms(2019, 6, 10, 17, 58, 2).unwrap()
                + chrono::Duration::microseconds(123_456)
        );
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PathBuf::from("/opt/google-cloud-sdk/bin/gcloud"));
        assert_eq!(calls[0].1, ["--format=json", "auth", "print-access-token"]);
    }

    #[tokio::test]
    async fn named_account_is_passed_last() {
        let runner = Arc::new(FakeRunner::with_outputs([ok(SAMPLE)]));
        gcloud(Arc::clone(&runner), Some("someone@example.com"))
            .get_auth_token()
            .await
            .unwrap();

        assert_eq!(
            runner.calls()[0].1,
            [
                "--format=json",
                "auth",
                "print-access-token",
                "someone@example.com"
            ]
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_invocation_error() {
        let runner = Arc::new(FakeRunner::with_outputs([exit(1)]));
        let err = gcloud(runner, None).get_auth_token().await.unwrap_err();
        assert!(matches!(err, Error::Invocation(InvocationError::Exit { .. })));
    }

    #[test]
    fn rejects_incomplete_responses() {
        assert!(matches!(
            parse_response(b"not json"),
            Err(ResponseError::Json(_))
        ));
        assert!(matches!(
            parse_response(br#"{"token_expiry": {"datetime": "2019-06-10 17:58:02.000000"}}"#),
            Err(ResponseError::MissingAccessToken)
        ));
        assert!(matches!(
            parse_response(br#"{"access_token": "x"}"#),
            Err(ResponseError::MissingExpiry)
        ));
        assert!(matches!(
            parse_response(br#"{"access_token": "x", "token_expiry": {"datetime": "2019-06-10T17:58:02Z"}}"#),
            Err(ResponseError::Expiry { .. })
        ));
    }

    proptest! {
        #[test]
        fn expiry_round_trips(secs in 0i64..4_102_444_800, micros in 0u32..1_000_000) {
            let expiry = Utc.timestamp_opt(secs, micros * 1_000).unwrap();
            let text = format_expiry(&expiry);
            let parsed = parse_expiry(&text).unwrap();
            prop_assert_eq!(parsed, expiry);
            prop_assert_eq!(parsed.nanosecond() % 1_000, 0);
        }
    }
}
