use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

pub const DEFAULT_VOTES_CHANNEL: &str = "votes_channel";

/// Origins the dashboard is served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    fn parse(value: &str) -> Self {
        let origins: Vec<String> = value
            .split(',')
            .map(|s| s.trim().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        if origins.iter().any(|o| o == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        }
    }

    /// Requests without an `Origin` header are not browsers and are let through
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (AllowedOrigins::Any, _) | (_, None) => true,
            (AllowedOrigins::List(list), Some(origin)) => {
                let origin = origin.trim_end_matches('/');
                list.iter().any(|allowed| allowed == origin)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub channel: String,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub allowed_origins: AllowedOrigins,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub listener: ListenerConfig,
    pub websocket: WebSocketConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so parsing can be tested without the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Config("DATABASE_URL missing".into()))?;

        let port = parse_or(&lookup, "PORT", 8080u16)?;

        let channel = lookup("VOTES_CHANNEL").unwrap_or_else(|| DEFAULT_VOTES_CHANNEL.into());
        validate_channel_name(&channel)?;

        let retry_delay_secs = parse_or(&lookup, "LISTENER_RETRY_DELAY_SECS", 3u64)?;
        if retry_delay_secs == 0 {
            return Err(AppError::Config(
                "LISTENER_RETRY_DELAY_SECS must be greater than 0".into(),
            ));
        }

        let queue_capacity = parse_or(&lookup, "BROADCAST_QUEUE_CAPACITY", 10usize)?;
        if queue_capacity == 0 {
            return Err(AppError::Config(
                "BROADCAST_QUEUE_CAPACITY must be greater than 0".into(),
            ));
        }

        let heartbeat_secs = parse_or(&lookup, "WS_HEARTBEAT_INTERVAL_SECS", 5u64)?;
        let timeout_secs = parse_or(&lookup, "WS_CLIENT_TIMEOUT_SECS", 30u64)?;
        if heartbeat_secs == 0 || timeout_secs <= heartbeat_secs {
            return Err(AppError::Config(format!(
                "WS_CLIENT_TIMEOUT_SECS ({timeout_secs}) must exceed WS_HEARTBEAT_INTERVAL_SECS ({heartbeat_secs}) > 0"
            )));
        }

        let allowed_origins = AllowedOrigins::parse(
            &lookup("ALLOWED_ORIGINS").unwrap_or_else(|| "http://localhost:5500".into()),
        );

        Ok(Self {
            database_url,
            port,
            listener: ListenerConfig {
                channel,
                retry_delay: Duration::from_secs(retry_delay_secs),
            },
            websocket: WebSocketConfig {
                queue_capacity,
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                client_timeout: Duration::from_secs(timeout_secs),
                allowed_origins,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has invalid value '{raw}'"))),
    }
}

/// Channel names are interpolated into `LISTEN`, so only plain identifiers
/// within Postgres' 63-byte limit are accepted.
pub fn validate_channel_name(name: &str) -> Result<(), AppError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "VOTES_CHANNEL '{name}' is not a valid channel identifier"
        )))
    }
}
