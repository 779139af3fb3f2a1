use std::net::IpAddr;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing,
};
use rearch::Container;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    analytics_service::{StatsError, analytics_service_capsule},
    api::{self, ShortenPayload, ShortenedUrl, UrlStats},
    config::{public_base_url_capsule, request_timeout_capsule},
    redirect_service::{ResolveError, redirect_service_capsule},
    short_code::ShortCode,
    shorten_service::{ShortenError, shorten_service_capsule},
    url_repo::StoreError,
};

type ErrorResponse = (StatusCode, Json<api::Error>);

/// `POST /` creates, `GET /{code}` redirects, `GET /{code}/stats` reports clicks.
pub fn router(container: Container) -> Router {
    let request_timeout = container.read(request_timeout_capsule);

    Router::new()
        .route("/", routing::post(post_url))
        .route("/{code}", routing::get(get_url))
        .route("/{code}/stats", routing::get(get_stats))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::SERVICE_UNAVAILABLE,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(container)
}

#[instrument(skip(container, headers, payload))]
async fn post_url(
    State(container): State<Container>,
    headers: HeaderMap,
    payload: Result<Json<ShortenPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ShortenedUrl>), ErrorResponse> {
    let Json(ShortenPayload { url }) = payload.map_err(|rejection| {
        let err_uuid = Uuid::new_v4();
        info!(?err_uuid, %rejection, "User submitted an unreadable request body");
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid JSON in request body: {}", rejection.body_text()),
            err_uuid,
        )
    })?;

    let record = container
        .read(shorten_service_capsule)
        .shorten(&url, client_ip(&headers))
        .await
        .map_err(|error| shorten_error_response(error, Uuid::new_v4()))?;

    let short_url = short_url_for(
        container.read(public_base_url_capsule).as_ref(),
        &headers,
        &record.short_code,
    );
    Ok((
        StatusCode::CREATED,
        Json(ShortenedUrl::new(record, short_url)),
    ))
}

#[instrument(skip(container, headers))]
async fn get_url(
    State(container): State<Container>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ErrorResponse> {
    let code = parse_code(code)?;

    let url = container
        .read(redirect_service_capsule)
        .resolve(&code)
        .await
        .map_err(|error: ResolveError| {
            let err_uuid = Uuid::new_v4();
            match error {
                ResolveError::NotFound => {
                    info!(?err_uuid, "User requested an unknown short code");
                    error_response(StatusCode::NOT_FOUND, "Short URL not found", err_uuid)
                }
                ResolveError::Store(store_error) => store_error_response(&store_error, err_uuid),
            }
        })?;

    info!(
        short_code = %code,
        user_agent = header_str(&headers, header::USER_AGENT.as_str()),
        forwarded_for = header_str(&headers, "x-forwarded-for"),
        "Redirecting"
    );

    let location = HeaderValue::try_from(url).map_err(|error| {
        let err_uuid = Uuid::new_v4();
        error!(?err_uuid, ?error, "Stored URL is not a valid Location header");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            err_uuid,
        )
    })?;

    Ok((
        StatusCode::TEMPORARY_REDIRECT,
        [
            (header::LOCATION, location),
            // NOTE: cached redirects would bypass click counting
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
    )
        .into_response())
}

#[instrument(skip(container))]
async fn get_stats(
    State(container): State<Container>,
    Path(code): Path<String>,
) -> Result<Json<UrlStats>, ErrorResponse> {
    let code = parse_code(code)?;

    container
        .read(analytics_service_capsule)
        .get_stats(&code)
        .await
        .map(|record| Json(record.into()))
        .map_err(|error: StatsError| {
            let err_uuid = Uuid::new_v4();
            match error {
                StatsError::NotFound => {
                    info!(?err_uuid, "User requested stats for an unknown short code");
                    error_response(StatusCode::NOT_FOUND, "Short URL not found", err_uuid)
                }
                StatsError::Store(store_error) => store_error_response(&store_error, err_uuid),
            }
        })
}

fn parse_code(raw: String) -> Result<ShortCode, ErrorResponse> {
    ShortCode::parse(raw).map_err(|error| {
        let err_uuid = Uuid::new_v4();
        info!(?err_uuid, ?error, "User submitted an invalid short code");
        error_response(
            StatusCode::BAD_REQUEST,
            "Invalid short code format",
            err_uuid,
        )
    })
}

fn shorten_error_response(error: ShortenError, err_uuid: Uuid) -> ErrorResponse {
    match error {
        ShortenError::InvalidUrl(_) => {
            info!(?err_uuid, ?error, "User submitted an invalid URL");
            error_response(StatusCode::BAD_REQUEST, error.to_string(), err_uuid)
        }
        ShortenError::ExhaustedRetries { .. } => {
            error!(?err_uuid, ?error, "Could not allocate a short code");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate unique short code",
                err_uuid,
            )
        }
        ShortenError::Store(store_error) => store_error_response(&store_error, err_uuid),
    }
}

fn store_error_response(error: &StoreError, err_uuid: Uuid) -> ErrorResponse {
    error!(?err_uuid, ?error, "Encountered a store error during a request");
    match error {
        StoreError::Unavailable(_) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Service temporarily unavailable",
            err_uuid,
        ),
        StoreError::Malformed(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            err_uuid,
        ),
    }
}

fn error_response(status: StatusCode, error: impl Into<String>, err_uuid: Uuid) -> ErrorResponse {
    (
        status,
        Json(api::Error {
            error: error.into(),
            error_id: err_uuid.to_string(),
        }),
    )
}

/// Joins the code onto the configured base, else onto the request's `Host`.
fn short_url_for(base_url: Option<&Url>, headers: &HeaderMap, code: &ShortCode) -> String {
    if let Some(short_url) = base_url.and_then(|base_url| base_url.join(code.as_str()).ok()) {
        return short_url.into();
    }
    headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .map_or_else(
            || format!("/{code}"),
            |host| format!("https://{host}/{code}"),
        )
}

/// First hop of `X-Forwarded-For`, if it is a plain address.
fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::{config::normalize_base_url, shorten_service::UrlValidationError};

    use super::*;

    fn code(s: &str) -> ShortCode {
        ShortCode::parse(s).unwrap()
    }

    #[test]
    fn test_short_url_prefers_configured_base() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.example.com"));
        let base_url = Url::parse("https://sho.rt/l/").unwrap();

        assert_eq!(
            short_url_for(Some(&base_url), &headers, &code("abc2345")),
            "https://sho.rt/l/abc2345"
        );
    }

    #[test]
    fn test_short_url_falls_back_to_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.example.com"));

        assert_eq!(
            short_url_for(None, &headers, &code("abc2345")),
            "https://api.example.com/abc2345"
        );
        assert_eq!(
            short_url_for(None, &HeaderMap::new(), &code("abc2345")),
            "/abc2345"
        );
    }

    #[test]
    fn test_short_url_keeps_base_path_without_trailing_slash() {
        let base_url = normalize_base_url(Url::parse("https://sho.rt/links").unwrap());

        assert_eq!(
            short_url_for(Some(&base_url), &HeaderMap::new(), &code("abc2345")),
            "https://sho.rt/links/abc2345"
        );
    }

    fn assert_error(
        (status, Json(body)): ErrorResponse,
        expected_status: StatusCode,
        expected_error: &str,
        err_uuid: Uuid,
    ) {
        assert_eq!(status, expected_status);
        assert_eq!(body.error, expected_error);
        assert_eq!(body.error_id.parse::<Uuid>().unwrap(), err_uuid);
    }

    #[test]
    fn test_store_unavailable_is_503() {
        let err_uuid = Uuid::new_v4();
        assert_error(
            store_error_response(
                &StoreError::Unavailable(anyhow::anyhow!("connection refused")),
                err_uuid,
            ),
            StatusCode::SERVICE_UNAVAILABLE,
            "Service temporarily unavailable",
            err_uuid,
        );
    }

    #[test]
    fn test_malformed_record_is_500() {
        let err_uuid = Uuid::new_v4();
        assert_error(
            store_error_response(
                &StoreError::Malformed("negative click count -1".to_owned()),
                err_uuid,
            ),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            err_uuid,
        );
    }

    #[test]
    fn test_exhausted_retries_is_500() {
        let err_uuid = Uuid::new_v4();
        assert_error(
            shorten_error_response(ShortenError::ExhaustedRetries { attempts: 5 }, err_uuid),
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate unique short code",
            err_uuid,
        );
    }

    #[test]
    fn test_shorten_store_error_uses_store_mapping() {
        let err_uuid = Uuid::new_v4();
        assert_error(
            shorten_error_response(
                ShortenError::Store(StoreError::Unavailable(anyhow::anyhow!("timed out"))),
                err_uuid,
            ),
            StatusCode::SERVICE_UNAVAILABLE,
            "Service temporarily unavailable",
            err_uuid,
        );
    }

    #[test]
    fn test_invalid_url_is_400_with_reason() {
        let err_uuid = Uuid::new_v4();
        assert_error(
            shorten_error_response(
                ShortenError::InvalidUrl(UrlValidationError::MissingHost),
                err_uuid,
            ),
            StatusCode::BAD_REQUEST,
            "invalid URL: URL must include a valid domain",
            err_uuid,
        );
    }

    #[test]
    fn test_client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), Some(IpAddr::from([203, 0, 113, 7])));

        headers.insert("x-forwarded-for", HeaderValue::from_static("unknown"));
        assert_eq!(client_ip(&headers), None);
    }

    #[test]
    fn test_header_str_defaults_to_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8.0"));

        assert_eq!(header_str(&headers, "user-agent"), "curl/8.0");
        assert_eq!(header_str(&headers, "x-forwarded-for"), "unknown");
    }
}
