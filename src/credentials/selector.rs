//! Picking and building the token backend for a [`CredentialConfig`].

use std::{path::PathBuf, sync::Arc};

use tracing::{debug, info};

use super::{Account, CredentialConfig, Error, UnsupportedAccount};
use crate::{
    auth::{
        application_default::{self, ApplicationDefault},
        gcloud::Gcloud,
        iam_credentials::{self, service_account_resource_name, IamCredentials},
        token_manager::TokenManager,
        Token, SCOPE_CLOUD_PLATFORM,
    },
    process::{self, CommandRunner, TokioCommandRunner},
};

const GCLOUD: &str = "gcloud";

/// The backend a [`CredentialConfig`] maps to, with its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Gcloud {
        /// `None` for gcloud's active account.
        account: Option<String>,
        gcloud_path: Option<PathBuf>,
    },
    ApplicationDefault {
        scopes: Vec<String>,
    },
    IamCredentials {
        name: String,
        delegates: Vec<String>,
        scopes: Vec<String>,
    },
}

impl Backend {
    pub fn select(config: &CredentialConfig) -> Result<Self, UnsupportedAccount> {
        let scopes: Vec<String> = config.scopes.iter().cloned().collect();
        let backend = match &config.account {
            Account::Gcloud => Self::Gcloud {
                account: None,
                gcloud_path: config.gcloud_path.clone(),
            },
            Account::ApplicationDefault => Self::ApplicationDefault { scopes },
            Account::ServiceAccount(email) => {
                check_account(email)?;
                Self::IamCredentials {
                    name: service_account_resource_name(email),
                    delegates: config
                        .delegates
                        .iter()
                        .map(|delegate| service_account_resource_name(delegate))
                        .collect(),
                    scopes,
                }
            }
            Account::User(name) => {
                check_account(name)?;
                Self::Gcloud {
                    account: Some(name.clone()),
                    gcloud_path: config.gcloud_path.clone(),
                }
            }
        };
        Ok(backend)
    }
}

// gcloud would read these as flags or split them into several arguments.
fn check_account(account: &str) -> Result<(), UnsupportedAccount> {
    if account.starts_with('-')
        || account
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(UnsupportedAccount(account.to_owned()));
    }
    Ok(())
}

/// A backend wrapped in a token cache.
pub enum TokenSource {
    Gcloud(TokenManager<Gcloud>),
    ApplicationDefault(TokenManager<ApplicationDefault>),
    IamCredentials(TokenManager<IamCredentials<TokenManager<ApplicationDefault>>>),
}

impl TokenSource {
    /// The cached token if it is still valid, otherwise a fresh one.
    pub async fn token(&self) -> Result<Token, Error> {
        let token = match self {
            Self::Gcloud(manager) => manager.get_token().await?,
            Self::ApplicationDefault(manager) => manager.get_token().await?,
            Self::IamCredentials(manager) => manager.get_token().await?,
        };
        Ok(token)
    }
}

/// Shared dependencies of every backend.
pub struct Selector {
    pub client: reqwest::Client,
    pub runner: Arc<dyn CommandRunner>,
    pub adc_environment: application_default::Environment,
    pub iam_endpoint: String,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            runner: Arc::new(TokioCommandRunner::default()),
            adc_environment: application_default::Environment::from_env(),
            iam_endpoint: iam_credentials::DEFAULT_ENDPOINT.to_owned(),
        }
    }
}

impl Selector {
    pub async fn token_source(&self, config: &CredentialConfig) -> Result<TokenSource, Error> {
        let backend = Backend::select(config)?;
        info!(message = "Selected token backend", account = %config.account, ?backend);

        let source = match backend {
            Backend::Gcloud {
                account,
                gcloud_path,
            } => {
                let gcloud_path = find_gcloud(gcloud_path)?;
                TokenSource::Gcloud(TokenManager::new(Gcloud {
                    runner: Arc::clone(&self.runner),
                    gcloud_path,
                    account,
                }))
            }
            Backend::ApplicationDefault { scopes } => {
                let adc = self.application_default(scopes)?;
                TokenSource::ApplicationDefault(TokenManager::new(adc))
            }
            Backend::IamCredentials {
                name,
                delegates,
                scopes,
            } => {
                let adc = self.application_default(vec![SCOPE_CLOUD_PLATFORM.to_owned()])?;
                TokenSource::IamCredentials(TokenManager::new(IamCredentials {
                    client: self.client.clone(),
                    endpoint: self.iam_endpoint.clone(),
                    auth_token_provider: TokenManager::new(adc),
                    name,
                    delegates,
                    scopes,
                }))
            }
        };
        Ok(source)
    }

    fn application_default(&self, scopes: Vec<String>) -> Result<ApplicationDefault, Error> {
        ApplicationDefault::find(self.client.clone(), scopes, &self.adc_environment).map_err(|err| {
            match err {
                application_default::Error::NotFound(_) | application_default::Error::Build(_) => {
                    Error::BackendUnavailable {
                        backend: "application-default",
                        reason: err.to_string(),
                    }
                }
                err => Error::ApplicationDefault(err),
            }
        })
    }
}

fn find_gcloud(gcloud_path: Option<PathBuf>) -> Result<PathBuf, Error> {
    let gcloud_path = match gcloud_path {
        Some(path) => path,
        None => process::find_executable(GCLOUD).ok_or_else(|| Error::BackendUnavailable {
            backend: GCLOUD,
            reason: "gcloud is not on PATH".to_owned(),
        })?,
    };
    let gcloud_path = process::absolute(&gcloud_path).map_err(|err| Error::BackendUnavailable {
        backend: GCLOUD,
        reason: format!("cannot get an absolute path to {}: {}", gcloud_path.display(), err),
    })?;
    debug!(message = "Using gcloud", path = %gcloud_path.display());
    Ok(gcloud_path)
}
