use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Token, TokenProvider};

/// How long before its expiry a cached token stops being handed out.
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 10;

/// Reuses the last token from `Provider` until it is about to expire.
///
/// The cache lock is held while a new token is fetched, so concurrent
/// callers wait for the first fetch instead of starting their own.
pub struct TokenManager<Provider>
where
    Provider: TokenProvider,
{
    provider: Provider,
    expiry_margin: Duration,
    cached_token: Mutex<Option<Token>>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error<RenewalError> {
    #[error("token provider: {0}")]
    Provider(#[source] RenewalError),
}

impl<Provider> TokenManager<Provider>
where
    Provider: TokenProvider,
{
    pub fn new(provider: Provider) -> Self {
        Self::with_expiry_margin(provider, Duration::seconds(DEFAULT_EXPIRY_MARGIN_SECS))
    }

    pub fn with_expiry_margin(provider: Provider, expiry_margin: Duration) -> Self {
        Self {
            provider,
            expiry_margin,
            cached_token: Mutex::const_new(None),
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    async fn fetch_new_token(&self) -> Result<Token, Error<Provider::Error>> {
        self.provider
            .get_auth_token()
            .await
            .map_err(Error::Provider)
    }

    pub async fn get_token(&self) -> Result<Token, Error<Provider::Error>> {
        let mut cached_token = self.cached_token.lock().await;

        if let Some(token) = &*cached_token {
            if token.is_valid_at(Utc::now(), self.expiry_margin) {
                debug!(message = "Using preexisting token", token_expires_at = %token.expiry);
                return Ok(token.clone());
            }
            debug!(message = "Existing token expired, refreshing", token_expires_at = %token.expiry);
        }

        info!(
            message = "No active token found, about to get a new one",
            token_is_stale = cached_token.is_some(),
        );

        let new_token = self.fetch_new_token().await?;
        cached_token.replace(new_token.clone());

        debug!(message = "Got new token", token_expires_at = %new_token.expiry);

        Ok(new_token)
    }
}

#[async_trait::async_trait]
impl<Provider> TokenProvider for TokenManager<Provider>
where
    Provider: TokenProvider,
{
    type Error = Error<Provider::Error>;

    async fn get_auth_token(&self) -> Result<Token, Self::Error> {
        self.get_token().await
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::CountingProvider;
    use super::*;

    #[tokio::test]
    async fn reuses_unexpired_token() {
        let manager = TokenManager::new(CountingProvider::new(Duration::hours(1)));

        let first = manager.get_token().await.unwrap();
        let second = manager.get_token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(manager.provider().calls(), 1);
    }

    #[tokio::test]
    async fn refetches_expired_token_exactly_once() {
        let manager = TokenManager::new(CountingProvider::new(Duration::seconds(-1)));

        let first = manager.get_token().await.unwrap();
        assert_eq!(manager.provider().calls(), 1);

        let second = manager.get_token().await.unwrap();
        assert_eq!(manager.provider().calls(), 2);
        assert_ne!(first, second);
        assert_eq!(second.access_token(), "token-2");
    }

    #[tokio::test]
    async fn token_inside_margin_counts_as_expired() {
        let manager = TokenManager::with_expiry_margin(
            CountingProvider::new(Duration::seconds(5)),
            Duration::seconds(30),
        );

        manager.get_token().await.unwrap();
        manager.get_token().await.unwrap();

        assert_eq!(manager.provider().calls(), 2);
    }

    #[tokio::test]
    async fn failure_leaves_cache_empty() {
        let mut provider = CountingProvider::new(Duration::hours(1));
        provider.fail = true;
        let manager = TokenManager::new(provider);

        assert!(matches!(
            manager.get_token().await,
            Err(Error::Provider(_))
        ));
        assert!(manager.get_token().await.is_err());
        assert_eq!(manager.provider().calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_fetch() {
        let mut provider = CountingProvider::new(Duration::hours(1));
        provider.delay = std::time::Duration::from_millis(50);
        let manager = Arc::new(TokenManager::new(provider));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_token().await.unwrap() })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().access_token(), "token-1");
        }
        assert_eq!(manager.provider().calls(), 1);
    }
}
