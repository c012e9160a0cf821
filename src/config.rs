//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero configuration
//! for local development. Invalid values are logged and ignored.

use std::net::SocketAddr;

use chrono::{Duration, FixedOffset, Offset, Utc};

/// Development-only token secret. A warning is logged when it is in use.
pub const DEV_TOKEN_SECRET: &str = "earthtogether-dev-secret-change-me";

/// Longest accepted token lifetime: ten years.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365 * 10;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Env: `EARTHTOGETHER_PORT`. Default: `3000`.
    pub port: u16,

    /// Env: `EARTHTOGETHER_DATABASE_URL`.
    /// Default: `sqlite:earthtogether.db?mode=rwc`.
    pub database_url: String,

    /// Secret used to sign bearer tokens.
    /// Env: `EARTHTOGETHER_TOKEN_SECRET`. Default: [`DEV_TOKEN_SECRET`].
    pub token_secret: String,

    /// Env: `EARTHTOGETHER_TOKEN_TTL_HOURS`. Default: `168` (one week).
    pub token_ttl: Duration,

    /// Offset defining the local calendar day for streaks.
    /// Env: `EARTHTOGETHER_UTC_OFFSET_MINUTES`. Default: `0`.
    pub utc_offset: FixedOffset,

    /// Allowed CORS origin. Env: `EARTHTOGETHER_CORS_ORIGIN`.
    /// Default: any origin.
    pub cors_origin: Option<String>,
}

// Hand-written so the secret never reaches the logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("token_secret", &"<redacted>")
            .field("token_ttl_hours", &self.token_ttl.num_hours())
            .field("utc_offset", &self.utc_offset)
            .field("cors_origin", &self.cors_origin)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "sqlite:earthtogether.db?mode=rwc".to_string(),
            token_secret: DEV_TOKEN_SECRET.to_string(),
            token_ttl: Duration::hours(168),
            utc_offset: Utc.fix(),
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("EARTHTOGETHER_PORT") {
            match val.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => tracing::warn!(value = %val, "Invalid EARTHTOGETHER_PORT, using default"),
            }
        }

        if let Some(url) = lookup("EARTHTOGETHER_DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(secret) = lookup("EARTHTOGETHER_TOKEN_SECRET") {
            if !secret.is_empty() {
                config.token_secret = secret;
            }
        }

        if let Some(val) = lookup("EARTHTOGETHER_TOKEN_TTL_HOURS") {
            match val.parse::<i64>() {
                Ok(hours) if (1..=MAX_TOKEN_TTL_HOURS).contains(&hours) => {
                    if let Some(ttl) = Duration::try_hours(hours) {
                        config.token_ttl = ttl;
                    }
                }
                _ => tracing::warn!(
                    value = %val,
                    "Invalid EARTHTOGETHER_TOKEN_TTL_HOURS, using default"
                ),
            }
        }

        if let Some(val) = lookup("EARTHTOGETHER_UTC_OFFSET_MINUTES") {
            match parse_offset_minutes(&val) {
                Some(offset) => config.utc_offset = offset,
                None => tracing::warn!(
                    value = %val,
                    "Invalid EARTHTOGETHER_UTC_OFFSET_MINUTES, using UTC"
                ),
            }
        }

        if let Some(origin) = lookup("EARTHTOGETHER_CORS_ORIGIN") {
            if !origin.is_empty() {
                config.cors_origin = Some(origin);
            }
        }

        config
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.token_secret == DEV_TOKEN_SECRET
    }
}

/// Parse a whole-minute UTC offset, limited to ±14 hours.
fn parse_offset_minutes(value: &str) -> Option<FixedOffset> {
    let minutes: i32 = value.trim().parse().ok()?;
    if minutes.abs() > 14 * 60 {
        return None;
    }
    FixedOffset::east_opt(minutes * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.token_ttl, Duration::hours(168));
        assert_eq!(config.utc_offset.local_minus_utc(), 0);
        assert!(config.uses_dev_secret());
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("EARTHTOGETHER_PORT", "8081"),
            ("EARTHTOGETHER_TOKEN_SECRET", "s3cret"),
            ("EARTHTOGETHER_TOKEN_TTL_HOURS", "2"),
            ("EARTHTOGETHER_UTC_OFFSET_MINUTES", "-300"),
            ("EARTHTOGETHER_CORS_ORIGIN", "https://earth.example"),
        ]);

        assert_eq!(config.listen_addr(), SocketAddr::from(([0, 0, 0, 0], 8081)));
        assert!(!config.uses_dev_secret());
        assert_eq!(config.token_ttl, Duration::hours(2));
        assert_eq!(config.utc_offset.local_minus_utc(), -300 * 60);
        assert_eq!(config.cors_origin.as_deref(), Some("https://earth.example"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("EARTHTOGETHER_PORT", "http"),
            ("EARTHTOGETHER_TOKEN_TTL_HOURS", "0"),
            ("EARTHTOGETHER_UTC_OFFSET_MINUTES", "900"),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.token_ttl, Duration::hours(168));
        assert_eq!(config.utc_offset.local_minus_utc(), 0);
    }

    #[test]
    fn test_out_of_range_ttl_falls_back() {
        for value in ["100000000000", "9223372036854775807", "-5"] {
            let config = config_from(&[("EARTHTOGETHER_TOKEN_TTL_HOURS", value)]);
            assert_eq!(config.token_ttl, Duration::hours(168), "ttl {}", value);
        }

        let max = MAX_TOKEN_TTL_HOURS.to_string();
        let config = config_from(&[("EARTHTOGETHER_TOKEN_TTL_HOURS", max.as_str())]);
        assert_eq!(config.token_ttl, Duration::hours(MAX_TOKEN_TTL_HOURS));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = config_from(&[("EARTHTOGETHER_TOKEN_SECRET", "hunter2")]);
        let rendered = format!("{:?}", config);

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
