//! Turning a URL and git-config into an access token.
//!
//! [`config::resolve`] reads a [`CredentialConfig`], [`selector::Selector`]
//! turns it into a [`TokenSource`], and [`Credentials`] ties both together
//! and shares one source per distinct config.

use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::auth::{self, Token, SCOPE_CLOUD_PLATFORM};

pub mod config;
pub mod selector;

pub use self::{
    config::ConfigStore,
    selector::{Backend, Selector, TokenSource},
};

pub const ACCOUNT_GCLOUD: &str = "gcloud";
pub const ACCOUNT_APPLICATION_DEFAULT: &str = "application-default";
const SERVICE_ACCOUNT_SUFFIX: &str = ".gserviceaccount.com";

/// Which identity to authenticate as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Account {
    /// gcloud's active account.
    Gcloud,
    /// Application default credentials.
    ApplicationDefault,
    /// A service account to impersonate through the IAM Credentials API.
    ServiceAccount(String),
    /// Another account registered with `gcloud auth login`.
    User(String),
}

impl Account {
    /// Classify a `google.account` value. Empty means [`Account::Gcloud`].
    pub fn parse(value: &str) -> Self {
        match value {
            "" | ACCOUNT_GCLOUD => Self::Gcloud,
            ACCOUNT_APPLICATION_DEFAULT => Self::ApplicationDefault,
            _ if value.ends_with(SERVICE_ACCOUNT_SUFFIX) => Self::ServiceAccount(value.to_owned()),
            _ => Self::User(value.to_owned()),
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gcloud => f.write_str(ACCOUNT_GCLOUD),
            Self::ApplicationDefault => f.write_str(ACCOUNT_APPLICATION_DEFAULT),
            Self::ServiceAccount(email) | Self::User(email) => f.write_str(email),
        }
    }
}

/// Everything needed to pick and configure a token backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialConfig {
    pub account: Account,
    /// Never empty; order does not matter.
    pub scopes: BTreeSet<String>,
    /// Service account emails to delegate through, in order.
    pub delegates: Vec<String>,
    /// Override for the gcloud executable.
    pub gcloud_path: Option<PathBuf>,
}

impl CredentialConfig {
    pub fn new(
        account: &str,
        scopes: impl IntoIterator<Item = String>,
        delegates: Vec<String>,
        gcloud_path: Option<PathBuf>,
    ) -> Self {
        let mut scopes: BTreeSet<String> = scopes
            .into_iter()
            .filter(|scope| !scope.is_empty())
            .collect();
        if scopes.is_empty() {
            scopes.insert(SCOPE_CLOUD_PLATFORM.to_owned());
        }
        Self {
            account: Account::parse(account.trim()),
            scopes,
            delegates: delegates
                .into_iter()
                .filter(|delegate| !delegate.is_empty())
                .collect(),
            gcloud_path,
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self::new("", Vec::new(), Vec::new(), None)
    }
}

/// An account value gcloud would not treat as an account name.
#[derive(Debug, thiserror::Error)]
#[error("unsupported account {0:?}")]
pub struct UnsupportedAccount(pub String);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot get configs: {0}")]
    ConfigRead(#[from] config::Error),
    #[error("cannot find the {backend} backend: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },
    #[error(transparent)]
    UnsupportedAccount(#[from] UnsupportedAccount),
    #[error(transparent)]
    Gcloud(#[from] auth::token_manager::Error<auth::gcloud::Error>),
    #[error("cannot get the application default credentials: {0}")]
    ApplicationDefault(#[from] auth::application_default::Error),
    #[error("cannot get a token from the application default credentials: {0}")]
    ApplicationDefaultToken(#[from] auth::token_manager::Error<auth::application_default::Error>),
    #[error(transparent)]
    IamCredentials(#[from] auth::token_manager::Error<auth::iam_credentials::Error>),
}

/// The whole pipeline: config store, backend selection and token caching.
pub struct Credentials<Store> {
    pub store: Store,
    pub selector: Selector,
    sources: Mutex<HashMap<CredentialConfig, Arc<TokenSource>>>,
}

impl<Store> Credentials<Store>
where
    Store: ConfigStore,
{
    pub fn new(store: Store, selector: Selector) -> Self {
        Self {
            store,
            selector,
            sources: Mutex::default(),
        }
    }

    /// The shared token source for `url`, created on first use.
    pub async fn token_source(&self, url: Option<&Url>) -> Result<Arc<TokenSource>, Error> {
        let config = config::resolve(&self.store, url).await?;

        let mut sources = self.sources.lock().await;
        if let Some(source) = sources.get(&config) {
            debug!(message = "Reusing token source", account = %config.account);
            return Ok(Arc::clone(source));
        }
        let source = Arc::new(self.selector.token_source(&config).await?);
        sources.insert(config, Arc::clone(&source));
        Ok(source)
    }

    /// A valid token for `url`, or for the global config when `url` is
    /// `None`.
    pub async fn make_token(&self, url: Option<&Url>) -> Result<Token, Error> {
        let source = self.token_source(url).await?;
        source.token().await
    }
}
