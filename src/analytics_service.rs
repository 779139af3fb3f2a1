use std::sync::Arc;

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
    short_code::ShortCode,
    url_repo::{StoreError, UrlRecord, UrlRepository, url_repository_capsule},
};

pub fn analytics_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn AnalyticsService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    Arc::new(AnalyticsServiceImpl { url_repo })
}

#[async_trait]
pub trait AnalyticsService: Send + Sync {
    /// Reads the record as last committed to the store, including inactive ones.
    ///
    /// The click count is only as fresh as the store's reads; both shipped stores
    /// read their own writes, a replicated backend might lag.
    async fn get_stats(&self, code: &ShortCode) -> Result<UrlRecord, StatsError>;
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("short URL not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct AnalyticsServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
}

#[async_trait]
impl AnalyticsService for AnalyticsServiceImpl {
    #[instrument(skip(self))]
    async fn get_stats(&self, code: &ShortCode) -> Result<UrlRecord, StatsError> {
        let record = self.url_repo.get(code).await?.ok_or(StatsError::NotFound)?;
        info!(click_count = record.click_count, "Retrieved analytics");
        Ok(record)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use time::OffsetDateTime;

    use crate::url_repo::MockUrlRepository;

    use super::*;

    fn code(s: &str) -> ShortCode {
        ShortCode::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_get_stats_success() {
        let expected = UrlRecord {
            short_code: code("abc2345"),
            original_url: "https://example.com".to_owned(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            click_count: 42,
            is_active: false,
            created_by_ip: None,
        };

        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_get()
            .withf(|code| code.as_str() == "abc2345")
            .once()
            .return_once({
                let expected = expected.clone();
                move |_| Ok(Some(expected))
            });
        mock_repo.expect_increment_click_count().never();

        let service = AnalyticsServiceImpl {
            url_repo: Arc::new(mock_repo),
        };
        assert_eq!(service.get_stats(&code("abc2345")).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_get_stats_not_found() {
        let mut mock_repo = MockUrlRepository::new();
        mock_repo.expect_get().once().return_once(|_| Ok(None));

        let service = AnalyticsServiceImpl {
            url_repo: Arc::new(mock_repo),
        };
        let err = service.get_stats(&code("doesNotExist")).await.unwrap_err();
        assert!(matches!(err, StatsError::NotFound));
    }

    #[tokio::test]
    async fn test_get_stats_store_error_is_not_zero_stats() {
        let mut mock_repo = MockUrlRepository::new();
        mock_repo
            .expect_get()
            .once()
            .return_once(|_| Err(StoreError::Unavailable(anyhow::anyhow!("test error"))));

        let service = AnalyticsServiceImpl {
            url_repo: Arc::new(mock_repo),
        };
        let err = service.get_stats(&code("abc2345")).await.unwrap_err();
        assert!(matches!(err, StatsError::Store(StoreError::Unavailable(_))));
    }
}
