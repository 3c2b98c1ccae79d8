use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

use crate::decision::{DEFAULT_APPROVE_MAX, DEFAULT_REJECT_ABOVE, DecisionPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub host: IpAddr,
    pub port: u16,
    pub classifier: ClassifierConfig,
    pub download: DownloadConfig,
    pub lease_timeout: Duration,
    pub idle_backoff: Duration,
    pub policy: DecisionPolicy,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the discrete fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub url: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub timeout: Duration,
    pub max_bytes: u64,
    /// When unset a private temporary directory is used for the process lifetime.
    pub scratch_dir: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url);
        }

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name))
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let url = env.get("DATABASE_URL");
        let (user, name) = if url.is_some() {
            (
                env.or("MODERATOR_DB_USER", ""),
                env.or("MODERATOR_DB_NAME", ""),
            )
        } else {
            (
                env.required("MODERATOR_DB_USER")?,
                env.required("MODERATOR_DB_NAME")?,
            )
        };

        let database = DatabaseConfig {
            url,
            host: env.or("MODERATOR_DB_HOST", "localhost"),
            port: env.parse("MODERATOR_DB_PORT", "5432")?,
            user,
            password: env.or("MODERATOR_DB_PASSWORD", ""),
            name,
            max_connections: env.parse("MODERATOR_DB_MAX_CONNECTIONS", "2")?,
        };

        let host: IpAddr = env.parse("MODERATOR_HOST", "0.0.0.0")?;
        let port: u16 = env.parse("MODERATOR_PORT", "8000")?;

        let classifier = ClassifierConfig {
            url: env.required("MODERATOR_CLASSIFIER_URL")?,
            model: env.or("MODERATOR_CLASSIFIER_MODEL", "mobilenet_v2_140_224"),
            timeout: env.secs("MODERATOR_CLASSIFY_TIMEOUT_SECS", "120")?,
        };

        let download = DownloadConfig {
            timeout: env.secs("MODERATOR_DOWNLOAD_TIMEOUT_SECS", "60")?,
            max_bytes: env.parse("MODERATOR_DOWNLOAD_MAX_BYTES", "20971520")?,
            scratch_dir: env.get("MODERATOR_SCRATCH_DIR").map(PathBuf::from),
        };

        let lease_timeout = env.secs("MODERATOR_LEASE_TIMEOUT_SECS", "300")?;
        let idle_backoff = env.secs("MODERATOR_IDLE_BACKOFF_SECS", "5")?;

        let policy = DecisionPolicy::new(
            env.parse("MODERATOR_APPROVE_THRESHOLD", &DEFAULT_APPROVE_MAX.to_string())?,
            env.parse("MODERATOR_REJECT_THRESHOLD", &DEFAULT_REJECT_ABOVE.to_string())?,
        )?;

        let log_level = env.or("MODERATOR_LOG_LEVEL", "info");

        Ok(Config {
            database,
            host,
            port,
            classifier,
            download,
            lease_timeout,
            idle_backoff,
            policy,
            log_level,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, String> {
        self.get(key)
            .ok_or_else(|| format!("Missing required environment variable: {key}"))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: &str) -> Result<T, String>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.or(key, default)
            .trim()
            .parse()
            .map_err(|e| format!("Invalid {key}: {e}"))
    }

    fn secs(&self, key: &str, default: &str) -> Result<Duration, String> {
        self.parse::<u64>(key, default).map(Duration::from_secs)
    }
}
