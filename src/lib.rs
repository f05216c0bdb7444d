//! OAuth2 credentials for git hosted on googlesource.com and Cloud Source
//! Repositories.
//!
//! Tokens come from `gcloud`, application default credentials, or a service
//! account impersonated through the IAM Credentials API, depending on the
//! `google.*` git-config keys that apply to the URL being fetched.

pub mod auth;
pub mod cookieauth;
pub mod cookies;
pub mod credentials;
pub mod gitconfig;
pub mod helper;
pub mod process;
pub mod secretmanager;

use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` or `default_directive`. Stdout is
/// reserved for the helper protocols.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
