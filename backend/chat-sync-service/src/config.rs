use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "STORE_BACKEND must be postgres or memory, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: usize,
    pub db_connect_timeout: Duration,
    /// Cross-process fan-out when set; in-process otherwise
    pub redis_url: Option<String>,
    pub port: u16,
    pub session_jwt_secret: String,
    pub fanout_timeout: Duration,
    /// Publish on a spawned task instead of inside the request
    pub fanout_detached: bool,
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} is not valid: {raw}"))),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StoreBackend::Postgres,
        };
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(AppError::Config("DATABASE_URL missing".into()));
        }

        let session_jwt_secret = env::var("SESSION_JWT_SECRET")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config("SESSION_JWT_SECRET missing".into()))?;

        Ok(Self {
            store_backend,
            database_url,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 16)?,
            db_connect_timeout: Duration::from_secs(parse_var("DB_CONNECT_TIMEOUT_SECS", 5)?),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            port: parse_var("PORT", 3000)?,
            session_jwt_secret,
            fanout_timeout: Duration::from_millis(parse_var("FANOUT_TIMEOUT_MS", 2000)?),
            fanout_detached: parse_var("FANOUT_DETACHED", true)?,
        })
    }

    /// In-memory store, local fan-out published before the service call returns
    pub fn test_defaults() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            db_max_connections: 4,
            db_connect_timeout: Duration::from_secs(5),
            redis_url: None,
            port: 0,
            session_jwt_secret: "test-session-secret".to_string(),
            fanout_timeout: Duration::from_millis(500),
            fanout_detached: false,
        }
    }
}
