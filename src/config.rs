use std::{
    env::{self, VarError},
    fmt::Display,
    str::FromStr,
    time::Duration,
};

use rearch::{CData, CapsuleHandle, Container};
use sea_orm::{ConnectOptions, Database, DbConn};
use tracing::{info, instrument, warn};
use url::Url;

use crate::short_code::{DEFAULT_GENERATED_LENGTH, MAX_GENERATED_LENGTH, MIN_GENERATED_LENGTH};

/// # Errors
/// Will return [`Err`] if `DB_URL` is set and the connection to the database fails.
#[instrument]
pub async fn init_container() -> anyhow::Result<Container> {
    info!("Initializing container");
    let container = Container::new();

    let (db_connection_options, set_db_conn) =
        container.read((db_connection_options_capsule, db_conn_init_action));

    if let Some(db_connection_options) = db_connection_options {
        info!("Connecting to database");
        set_db_conn(Database::connect(db_connection_options).await?);
    } else {
        warn!("DB_URL environment variable not set; using the in-memory store");
    }

    info!("Container initialized");
    Ok(container)
}

/// `None` when `DB_URL` is not set.
///
/// # Panics
/// Panics when the environment variable is invalid unicode.
#[must_use]
pub fn db_connection_options_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Option<ConnectOptions> {
    const ENV_VAR_NAME: &str = "DB_URL";
    let acquire_timeout = *get.as_ref(store_timeout_capsule);
    match env::var(ENV_VAR_NAME) {
        Ok(db_url) => {
            let mut options = ConnectOptions::new(db_url);
            options.acquire_timeout(acquire_timeout);
            Some(options)
        }
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!("{ENV_VAR_NAME} is invalid unicode: {}", actual.display());
        }
    }
}

fn db_conn_manager(
    CapsuleHandle { register, .. }: CapsuleHandle,
) -> (Option<DbConn>, impl use<> + CData + Fn(Option<DbConn>)) {
    register.register(rearch_effects::state::<rearch_effects::Cloned<_>>(None))
}

pub fn db_conn_init_action(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> impl use<> + CData + Fn(DbConn) {
    let set_db_conn = get.as_ref(db_conn_manager).1.clone();
    move |db| set_db_conn(Some(db))
}

/// `None` until a connection is set via [`db_conn_init_action`].
pub fn db_conn_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Option<DbConn> {
    get.as_ref(db_conn_manager).0.clone()
}

/// # Panics
/// Panics when environment variable is invalid.
pub fn addr_capsule(_: CapsuleHandle) -> String {
    const ENV_VAR_NAME: &str = "ADDR";
    const DEFAULT_ADDR: &str = "127.0.0.1:0";

    match env::var(ENV_VAR_NAME) {
        Ok(addr) => {
            info!(addr, "{ENV_VAR_NAME} environment variable set");
            addr
        }
        Err(VarError::NotPresent) => {
            warn!(
                addr = DEFAULT_ADDR,
                "{ENV_VAR_NAME} environment variable not set; defaulting to {DEFAULT_ADDR}"
            );
            DEFAULT_ADDR.to_string()
        }
        Err(VarError::NotUnicode(actual)) => {
            panic!(
                "{ENV_VAR_NAME} environment variable is invalid: {}",
                actual.display()
            );
        }
    }
}

/// Base that short links are joined onto, e.g. `https://sho.rt/`.
/// `None` lets the transport derive it from the request's `Host` header.
///
/// # Panics
/// Panics when environment variable is not an absolute URL.
pub fn public_base_url_capsule(_: CapsuleHandle) -> Option<Url> {
    const ENV_VAR_NAME: &str = "PUBLIC_BASE_URL";
    let base_url = optional_env::<Url>(ENV_VAR_NAME)?;
    if base_url.cannot_be_a_base() {
        panic!("{ENV_VAR_NAME} environment variable must be an absolute URL, got {base_url}");
    }
    let base_url = normalize_base_url(base_url);
    info!(%base_url, "{ENV_VAR_NAME} environment variable set");
    Some(base_url)
}

/// Ensures the path ends in `/` so joining a code appends rather than replaces
/// the last segment.
pub(crate) fn normalize_base_url(mut base_url: Url) -> Url {
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }
    base_url
}

/// # Panics
/// Panics when environment variable is invalid or out of range.
pub fn short_code_length_capsule(_: CapsuleHandle) -> usize {
    const ENV_VAR_NAME: &str = "SHORT_CODE_LENGTH";
    let length = optional_env(ENV_VAR_NAME).unwrap_or(DEFAULT_GENERATED_LENGTH);
    if !(MIN_GENERATED_LENGTH..=MAX_GENERATED_LENGTH).contains(&length) {
        panic!(
            "{ENV_VAR_NAME} environment variable must be within \
             {MIN_GENERATED_LENGTH}..={MAX_GENERATED_LENGTH}, got {length}"
        );
    }
    length
}

/// Upper bound for any single call to the backing store.
pub fn store_timeout_capsule(_: CapsuleHandle) -> Duration {
    millis_env("STORE_TIMEOUT_MS", 2000)
}

/// Upper bound for the best-effort click increment on the redirect path.
pub fn click_timeout_capsule(_: CapsuleHandle) -> Duration {
    millis_env("CLICK_TIMEOUT_MS", 500)
}

/// Upper bound for a whole HTTP request.
pub fn request_timeout_capsule(_: CapsuleHandle) -> Duration {
    millis_env("REQUEST_TIMEOUT_MS", 10_000)
}

fn millis_env(name: &str, default_millis: u64) -> Duration {
    Duration::from_millis(optional_env(name).unwrap_or(default_millis))
}

/// # Panics
/// Panics when the environment variable is set but does not parse.
fn optional_env<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => Some(raw.parse().unwrap_or_else(|err| {
            panic!("{name} environment variable is invalid ({raw:?}): {err}")
        })),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(actual)) => {
            panic!(
                "{name} environment variable is invalid: {}",
                actual.display()
            );
        }
    }
}
