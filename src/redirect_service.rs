use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{
    config::click_timeout_capsule,
    short_code::ShortCode,
    url_repo::{IncrementOutcome, StoreError, UrlRepository, url_repository_capsule},
};

pub fn redirect_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn RedirectService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let click_timeout = *get.as_ref(click_timeout_capsule);
    Arc::new(RedirectServiceImpl {
        url_repo,
        click_timeout,
    })
}

#[async_trait]
pub trait RedirectService: Send + Sync {
    /// Returns the URL to redirect to, counting the click on a best-effort basis.
    async fn resolve(&self, code: &ShortCode) -> Result<String, ResolveError>;
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("short URL not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct RedirectServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    click_timeout: Duration,
}

impl RedirectServiceImpl {
    /// Never fails: a lost click is logged, the redirect goes ahead regardless.
    async fn record_click(&self, code: &ShortCode) {
        let increment = self.url_repo.increment_click_count(code);
        match tokio::time::timeout(self.click_timeout, increment).await {
            Ok(Ok(IncrementOutcome::Incremented)) => {}
            Ok(Ok(IncrementOutcome::NotFound)) => {
                warn!("Short code disappeared before its click was counted");
            }
            Ok(Err(err)) => warn!(?err, "Failed to increment click count"),
            Err(_) => warn!(timeout = ?self.click_timeout, "Timed out incrementing click count"),
        }
    }
}

#[async_trait]
impl RedirectService for RedirectServiceImpl {
    #[instrument(skip(self))]
    async fn resolve(&self, code: &ShortCode) -> Result<String, ResolveError> {
        let record = match self.url_repo.get(code).await? {
            Some(record) if record.is_active => record,
            Some(_) => {
                info!("Inactive short code accessed");
                return Err(ResolveError::NotFound);
            }
            None => {
                info!("Short code not found");
                return Err(ResolveError::NotFound);
            }
        };

        self.record_click(code).await;
        Ok(record.original_url)
    }
}
