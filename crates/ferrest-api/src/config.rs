//! # Process Configuration
//!
//! Read once at startup from environment variables:
//!
//! | Variable                       | Default                         |
//! |--------------------------------|---------------------------------|
//! | `PORT`                         | `8080`                          |
//! | `SECRET_KEY`                   | random per-process key (warns)  |
//! | `HASH_ALGORITHM`               | `HS256`                         |
//! | `ACCESS_TOKEN_EXPIRE_MINUTES`  | `5`                             |
//! | `REFRESH_TOKEN_EXPIRE_DAYS`    | `1`                             |
//! | `DATABASE_URL`                 | composed from `DB_*`, else none |
//! | `PASSWORD_HASH_ITERATIONS`     | `600000`                        |
//! | `LOG_FORMAT`                   | `text` (`json` for JSON lines)  |
//! | `BOOTSTRAP_USERNAME` / `_PASSWORD` | unset                       |
//!
//! Token lifetimes must be positive, at most one year for access tokens and
//! ten years for refresh tokens. Without a database URL the in-memory store
//! is used.

use std::ops::RangeInclusive;

use chrono::Duration;
use ferrest_auth::passwords::DEFAULT_ITERATIONS;
use ferrest_auth::Algorithm;
use rand::distributions::Alphanumeric;
use rand::Rng;
use zeroize::Zeroizing;

/// One year.
const MAX_ACCESS_MINUTES: i64 = 60 * 24 * 365;
/// Ten years.
const MAX_REFRESH_DAYS: i64 = 3650;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("{0} is set but {1} is not")]
    Incomplete(&'static str, &'static str),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Superuser seeded at startup.
#[derive(Clone)]
pub struct BootstrapUser {
    pub username: String,
    pub password: Zeroizing<String>,
}

/// Application configuration.
///
/// Custom `Debug` redacts the signing secret, database credentials and the
/// bootstrap password.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub secret_key: Zeroizing<String>,
    /// Whether `secret_key` was generated rather than configured.
    pub ephemeral_secret: bool,
    pub algorithm: Algorithm,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub database_url: Option<Zeroizing<String>>,
    pub hash_iterations: u32,
    pub log_format: LogFormat,
    pub bootstrap_user: Option<BootstrapUser>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("secret_key", &"[REDACTED]")
            .field("ephemeral_secret", &self.ephemeral_secret)
            .field("algorithm", &self.algorithm)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("hash_iterations", &self.hash_iterations)
            .field("log_format", &self.log_format)
            .field(
                "bootstrap_user",
                &self.bootstrap_user.as_ref().map(|u| u.username.as_str()),
            )
            .finish()
    }
}

impl Default for AppConfig {
    /// Development defaults: random secret, in-memory store.
    fn default() -> Self {
        Self {
            port: 8080,
            secret_key: random_secret(),
            ephemeral_secret: true,
            algorithm: Algorithm::HS256,
            access_ttl: Duration::minutes(5),
            refresh_ttl: Duration::days(1),
            database_url: None,
            hash_iterations: DEFAULT_ITERATIONS,
            log_format: LogFormat::Text,
            bootstrap_user: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.is_empty());

        let (secret_key, ephemeral_secret) = match get("SECRET_KEY") {
            Some(key) => (Zeroizing::new(key), false),
            None => (random_secret(), true),
        };

        let algorithm = match get("HASH_ALGORITHM") {
            Some(raw) => raw.parse::<Algorithm>().map_err(|e| ConfigError::Invalid {
                var: "HASH_ALGORITHM",
                reason: e.to_string(),
            })?,
            None => Algorithm::HS256,
        };

        let bootstrap_user = match (get("BOOTSTRAP_USERNAME"), get("BOOTSTRAP_PASSWORD")) {
            (Some(username), Some(password)) => Some(BootstrapUser {
                username,
                password: Zeroizing::new(password),
            }),
            (Some(_), None) => return Err(ConfigError::Incomplete("BOOTSTRAP_USERNAME", "BOOTSTRAP_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Incomplete("BOOTSTRAP_PASSWORD", "BOOTSTRAP_USERNAME")),
            (None, None) => None,
        };

        Ok(Self {
            port: parse_or(&get, "PORT", 8080)?,
            secret_key,
            ephemeral_secret,
            algorithm,
            access_ttl: Duration::minutes(parse_in(&get, "ACCESS_TOKEN_EXPIRE_MINUTES", 5, 1..=MAX_ACCESS_MINUTES)?),
            refresh_ttl: Duration::days(parse_in(&get, "REFRESH_TOKEN_EXPIRE_DAYS", 1, 1..=MAX_REFRESH_DAYS)?),
            database_url: database_url(&get)?.map(Zeroizing::new),
            hash_iterations: parse_in(&get, "PASSWORD_HASH_ITERATIONS", DEFAULT_ITERATIONS, 1..=u32::MAX)?,
            log_format: match get("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            bootstrap_user,
        })
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// [`parse_or`], rejecting values outside `range`.
fn parse_in<T, G>(get: &G, var: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, var, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid {
            var,
            reason: format!("{value} is outside {}..={}", range.start(), range.end()),
        });
    }
    Ok(value)
}

/// `DATABASE_URL`, or a Postgres URL composed from the `DB_*` parts.
fn database_url<G>(get: &G) -> Result<Option<String>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(url) = get("DATABASE_URL") {
        return Ok(Some(url));
    }
    let Some(host) = get("DB_HOST") else {
        return Ok(None);
    };
    let user = get("DB_USER").ok_or(ConfigError::Incomplete("DB_HOST", "DB_USER"))?;
    let name = get("DB_NAME").ok_or(ConfigError::Incomplete("DB_HOST", "DB_NAME"))?;
    let port: u16 = parse_or(get, "DB_PORT", 5432)?;
    let credentials = match get("DB_PASS") {
        Some(pass) => format!("{user}:{pass}"),
        None => user,
    };
    Ok(Some(format!("postgres://{credentials}@{host}:{port}/{name}")))
}

fn random_secret() -> Zeroizing<String> {
    Zeroizing::new(
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect(),
    )
}
