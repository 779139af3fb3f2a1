use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::instrument;

use crate::{
    short_code::ShortCode,
    url_repo::{IncrementOutcome, PutOutcome, StoreError, UrlRecord, UrlRepository},
};

/// Process-local [`UrlRepository`] backed by a sharded concurrent map.
///
/// Conditional inserts and increments happen under the shard lock of the key, so
/// they are atomic with respect to each other. Nothing survives a restart, and
/// separate replicas do not share records.
#[derive(Debug, Default)]
pub struct InMemoryUrlRepository {
    records: DashMap<ShortCode, UrlRecord>,
}

impl InMemoryUrlRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UrlRepository for InMemoryUrlRepository {
    #[instrument(skip(self))]
    async fn put_if_absent(&self, record: UrlRecord) -> Result<PutOutcome, StoreError> {
        match self.records.entry(record.short_code.clone()) {
            Entry::Occupied(_) => Ok(PutOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(PutOutcome::Inserted)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get(&self, code: &ShortCode) -> Result<Option<UrlRecord>, StoreError> {
        Ok(self.records.get(code).map(|record| record.value().clone()))
    }

    #[instrument(skip(self))]
    async fn increment_click_count(
        &self,
        code: &ShortCode,
    ) -> Result<IncrementOutcome, StoreError> {
        Ok(match self.records.get_mut(code) {
            Some(mut record) => {
                record.click_count += 1;
                IncrementOutcome::Incremented
            }
            None => IncrementOutcome::NotFound,
        })
    }
}
