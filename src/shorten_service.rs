use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::{
    short_code::{CodeGenerator, code_generator_capsule},
    url_repo::{PutOutcome, StoreError, UrlRecord, UrlRepository, url_repository_capsule},
};

/// Upper bound on generate-and-insert rounds for a single `shorten` call.
pub const MAX_ATTEMPTS: usize = 5;

pub fn shorten_service_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn ShortenService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let code_generator = Arc::clone(get.as_ref(code_generator_capsule));
    Arc::new(ShortenServiceImpl {
        url_repo,
        code_generator,
    })
}

#[async_trait]
pub trait ShortenService: Send + Sync {
    /// `created_by_ip` is recorded alongside the link when the caller knows it.
    async fn shorten(
        &self,
        original_url: &str,
        created_by_ip: Option<IpAddr>,
    ) -> Result<UrlRecord, ShortenError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("URL is required")]
    Missing,
    #[error("URL must not contain whitespace or control characters")]
    InvalidCharacters,
    #[error("URL must include protocol (http:// or https://)")]
    MissingScheme,
    #[error("only http and https URLs are allowed, got {scheme}")]
    UnsupportedScheme { scheme: String },
    #[error("URL must include a valid domain")]
    MissingHost,
    #[error("invalid URL format: {0}")]
    Malformed(url::ParseError),
}

#[derive(Debug, Error)]
pub enum ShortenError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("failed to generate a unique short code after {attempts} attempts")]
    ExhaustedRetries { attempts: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accepts absolute `http`/`https` URLs with a host, exactly as written.
///
/// # Errors
/// Will return [`Err`] describing the first rule the URL breaks.
pub fn validate_url(raw: &str) -> Result<(), UrlValidationError> {
    if raw.is_empty() {
        return Err(UrlValidationError::Missing);
    }
    // NOTE: the url crate silently strips these, but the stored string is used verbatim
    if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(UrlValidationError::InvalidCharacters);
    }

    let url = Url::parse(raw).map_err(|err| match err {
        url::ParseError::RelativeUrlWithoutBase => UrlValidationError::MissingScheme,
        url::ParseError::EmptyHost => UrlValidationError::MissingHost,
        other => UrlValidationError::Malformed(other),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(UrlValidationError::UnsupportedScheme {
                scheme: scheme.to_owned(),
            });
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(())
}

struct ShortenServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    code_generator: Arc<dyn CodeGenerator>,
}

#[async_trait]
impl ShortenService for ShortenServiceImpl {
    #[instrument(skip(self))]
    async fn shorten(
        &self,
        original_url: &str,
        created_by_ip: Option<IpAddr>,
    ) -> Result<UrlRecord, ShortenError> {
        validate_url(original_url)?;

        for attempt in 1..=MAX_ATTEMPTS {
            let record = UrlRecord::new(self.code_generator.generate(), original_url.to_owned())
                .created_by(created_by_ip);

            // NOTE: store errors are returned as-is; retrying an outage is the caller's call
            match self.url_repo.put_if_absent(record.clone()).await? {
                PutOutcome::Inserted => {
                    info!(short_code = %record.short_code, attempt, "Created short URL");
                    return Ok(record);
                }
                PutOutcome::AlreadyExists => {
                    warn!(short_code = %record.short_code, attempt, "Generated short code was already taken");
                }
            }
        }

        error!(
            attempts = MAX_ATTEMPTS,
            "Exhausted short code generation attempts; the code space may need widening"
        );
        Err(ShortenError::ExhaustedRetries {
            attempts: MAX_ATTEMPTS,
        })
    }
}
