//! Reading [`CredentialConfig`] out of a key/value config store.

use std::path::PathBuf;

use url::Url;

use super::CredentialConfig;

pub const KEY_ACCOUNT: &str = "google.account";
pub const KEY_SCOPES: &str = "google.scopes";
pub const KEY_DELEGATES: &str = "google.serviceAccountDelegateEmails";
pub const KEY_GCLOUD_PATH: &str = "google.gcloudPath";

/// The config store could not be queried. A missing key is not an error.
#[derive(Debug, thiserror::Error)]
#[error("cannot read {key}{}: {source}", scope_suffix(.url.as_ref()))]
pub struct Error {
    pub key: String,
    pub url: Option<Url>,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

fn scope_suffix(url: Option<&Url>) -> String {
    url.map(|url| format!(" for {}", url)).unwrap_or_default()
}

/// How a value should be normalized by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Path,
    String,
}

/// A key/value config store whose lookups can be scoped to a URL.
///
/// Implementors only provide [`ConfigStore::get`]; `Ok(None)` means the key
/// is not set.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, kind: Kind, key: &str, url: Option<&Url>) -> Result<Option<String>, Error>;

    /// `false` only for the literal value `false`; an unset key reads as
    /// `true`.
    async fn bool_config(&self, key: &str, url: Option<&Url>) -> Result<bool, Error> {
        self.bool_config_or(key, url, true).await
    }

    /// Like [`ConfigStore::bool_config`], with an explicit default for an
    /// unset key.
    async fn bool_config_or(&self, key: &str, url: Option<&Url>, default: bool) -> Result<bool, Error> {
        let value = self.get(Kind::Bool, key, url).await?;
        Ok(match value.as_deref() {
            None | Some("") => default,
            Some(value) => value != "false",
        })
    }

    async fn path_config(&self, key: &str, url: Option<&Url>) -> Result<Option<PathBuf>, Error> {
        let value = self.get(Kind::Path, key, url).await?;
        Ok(value.filter(|value| !value.is_empty()).map(PathBuf::from))
    }

    async fn string_config(&self, key: &str, url: Option<&Url>) -> Result<String, Error> {
        Ok(self.get(Kind::String, key, url).await?.unwrap_or_default())
    }

    /// Comma-separated list, each entry trimmed.
    async fn string_list_config(&self, key: &str, url: Option<&Url>) -> Result<Vec<String>, Error> {
        let value = self.string_config(key, url).await?;
        Ok(split_list(&value))
    }
}

pub fn split_list(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(',').map(|s| s.trim().to_owned()).collect()
}

/// Build the [`CredentialConfig`] for `url`, or the global one when `url` is
/// `None`.
pub async fn resolve<S>(store: &S, url: Option<&Url>) -> Result<CredentialConfig, Error>
where
    S: ConfigStore + ?Sized,
{
    let account = store.string_config(KEY_ACCOUNT, url).await?;
    let scopes = store.string_list_config(KEY_SCOPES, url).await?;
    let delegates = store.string_list_config(KEY_DELEGATES, url).await?;
    let gcloud_path = store.path_config(KEY_GCLOUD_PATH, url).await?;

    Ok(CredentialConfig::new(&account, scopes, delegates, gcloud_path))
}
