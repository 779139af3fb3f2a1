use std::{net::IpAddr, sync::Arc, time::Duration};

use anyhow::anyhow;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveValue::Set,
    ColumnTrait, DbConn, DbErr, EntityTrait, ExprTrait, QueryFilter,
    sea_query::{Expr, OnConflict},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{instrument, warn};

use crate::{
    config::{db_conn_capsule, store_timeout_capsule},
    memory_repo::InMemoryUrlRepository,
    orm::short_url,
    short_code::ShortCode,
};

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let timeout = *get.as_ref(store_timeout_capsule);
    let inner: Arc<dyn UrlRepository> = match get.as_ref(db_conn_capsule).clone() {
        Some(db) => Arc::new(PostgresUrlRepository { db }),
        None => {
            warn!("No database connection configured; records are kept in memory only");
            Arc::new(InMemoryUrlRepository::new())
        }
    };
    Arc::new(TimedUrlRepository::new(inner, timeout))
}

/// The mapping from a short code to its original URL, plus click metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlRecord {
    pub short_code: ShortCode,
    /// Exactly as submitted, so it round-trips unchanged.
    pub original_url: String,
    pub created_at: OffsetDateTime,
    pub click_count: u64,
    pub is_active: bool,
    /// Client address the record was created from, when the transport knows it.
    pub created_by_ip: Option<IpAddr>,
}

impl UrlRecord {
    /// A fresh, active record with no clicks, created now.
    #[must_use]
    pub fn new(short_code: ShortCode, original_url: String) -> Self {
        Self {
            short_code,
            original_url,
            created_at: OffsetDateTime::now_utc(),
            click_count: 0,
            is_active: true,
            created_by_ip: None,
        }
    }

    #[must_use]
    pub fn created_by(mut self, created_by_ip: Option<IpAddr>) -> Self {
        self.created_by_ip = created_by_ip;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncrementOutcome {
    Incremented,
    NotFound,
}

/// Transient or integrity failures of the backing store.
///
/// These are never a definitive answer about whether a code exists;
/// callers must not turn them into "not found".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0:#}")]
    Unavailable(anyhow::Error),
    #[error("stored record is malformed: {0}")]
    Malformed(String),
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        Self::Unavailable(err.into())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlRepository: Send + Sync {
    /// Atomically inserts `record` unless its short code is already taken.
    async fn put_if_absent(&self, record: UrlRecord) -> Result<PutOutcome, StoreError>;

    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>, StoreError>;

    /// Atomically adds one to the click count without touching any other field.
    async fn increment_click_count(&self, code: &ShortCode)
    -> Result<IncrementOutcome, StoreError>;
}

struct PostgresUrlRepository {
    db: DbConn,
}

#[async_trait]
impl UrlRepository for PostgresUrlRepository {
    #[instrument(skip(self))]
    async fn put_if_absent(&self, record: UrlRecord) -> Result<PutOutcome, StoreError> {
        let to_insert = short_url::ActiveModel {
            short_code: Set(record.short_code.into_inner()),
            original_url: Set(record.original_url),
            created_at: Set(record.created_at),
            click_count: Set(i64::try_from(record.click_count)
                .map_err(|_| StoreError::Malformed("click count exceeds i64".to_owned()))?),
            is_active: Set(record.is_active),
            created_by_ip: Set(record.created_by_ip.map(|ip| ip.to_string())),
        };

        let result = short_url::Entity::insert(to_insert)
            .on_conflict(
                OnConflict::column(short_url::Column::ShortCode)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.db)
            .await;

        match result {
            Ok(_) => Ok(PutOutcome::Inserted),
            // NOTE: ON CONFLICT DO NOTHING skipped the row, so the code is taken
            Err(DbErr::RecordNotInserted) => Ok(PutOutcome::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>, StoreError> {
        short_url::Entity::find_by_id(code.as_str())
            .one(&self.db)
            .await?
            .map(record_from_model)
            .transpose()
    }

    #[instrument(skip(self))]
    async fn increment_click_count(
        &self,
        code: &ShortCode,
    ) -> Result<IncrementOutcome, StoreError> {
        let result = short_url::Entity::update_many()
            .col_expr(
                short_url::Column::ClickCount,
                Expr::col(short_url::Column::ClickCount).add(1_i64),
            )
            .filter(short_url::Column::ShortCode.eq(code.as_str()))
            .exec(&self.db)
            .await?;

        Ok(if result.rows_affected == 0 {
            IncrementOutcome::NotFound
        } else {
            IncrementOutcome::Incremented
        })
    }
}

fn record_from_model(
    short_url::Model {
        short_code,
        original_url,
        created_at,
        click_count,
        is_active,
        created_by_ip,
    }: short_url::Model,
) -> Result<UrlRecord, StoreError> {
    Ok(UrlRecord {
        short_code: ShortCode::parse(short_code)
            .map_err(|err| StoreError::Malformed(err.to_string()))?,
        original_url,
        created_at,
        click_count: u64::try_from(click_count)
            .map_err(|_| StoreError::Malformed(format!("negative click count {click_count}")))?,
        is_active,
        created_by_ip: created_by_ip
            .map(|ip| {
                ip.parse()
                    .map_err(|_| StoreError::Malformed(format!("invalid creator address {ip:?}")))
            })
            .transpose()?,
    })
}

/// Bounds every call to the wrapped repository by a fixed timeout.
///
/// An elapsed timeout is reported as [`StoreError::Unavailable`]; the outcome of the
/// abandoned call is unknown, so callers must not assume it did not happen.
pub struct TimedUrlRepository {
    inner: Arc<dyn UrlRepository>,
    timeout: Duration,
}

impl TimedUrlRepository {
    #[must_use]
    pub fn new(inner: Arc<dyn UrlRepository>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                warn!(operation, timeout = ?self.timeout, "Store call timed out");
                Err(StoreError::Unavailable(anyhow!(
                    "{operation} timed out after {:?}",
                    self.timeout
                )))
            })
    }
}

#[async_trait]
impl UrlRepository for TimedUrlRepository {
    async fn put_if_absent(&self, record: UrlRecord) -> Result<PutOutcome, StoreError> {
        self.bounded("put_if_absent", self.inner.put_if_absent(record))
            .await
    }

    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>, StoreError> {
        self.bounded("get", self.inner.get(code)).await
    }

    async fn increment_click_count(
        &self,
        code: &ShortCode,
    ) -> Result<IncrementOutcome, StoreError> {
        self.bounded("increment_click_count", self.inner.increment_click_count(code))
            .await
    }
}
