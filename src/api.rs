use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::url_repo::UrlRecord;

#[derive(Debug, Deserialize)]
pub struct ShortenPayload {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ShortenedUrl {
    pub short_code: String,
    /// Fully-qualified link, assembled by the transport
    pub short_url: String,
    pub original_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ShortenedUrl {
    #[must_use]
    pub fn new(record: UrlRecord, short_url: String) -> Self {
        Self {
            short_code: record.short_code.into_inner(),
            short_url,
            original_url: record.original_url,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UrlStats {
    pub short_code: String,
    pub original_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub click_count: u64,
    pub is_active: bool,
}

impl From<UrlRecord> for UrlStats {
    fn from(
        UrlRecord {
            short_code,
            original_url,
            created_at,
            click_count,
            is_active,
            ..
        }: UrlRecord,
    ) -> Self {
        Self {
            short_code: short_code.into_inner(),
            original_url,
            created_at,
            click_count,
            is_active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Error {
    pub error: String,
    pub error_id: String,
}
