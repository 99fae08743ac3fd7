//! Configuration loading and representation.
//!
//! | env var | default |
//! |---|---|
//! | `JWT_SECRET` | required, at least 32 bytes |
//! | `JWT_ACCESS_EXPIRY` | `15m` |
//! | `JWT_REFRESH_EXPIRY` | `168h` |
//! | `JWT_ISSUER` | `warden` |
//! | `PASSWORD_HASH_MEMORY_KIB` | `19456` |
//! | `PASSWORD_HASH_ITERATIONS` | `2` |
//! | `PASSWORD_HASH_PARALLELISM` | `1` |
//! | `STORE_TIMEOUT` | `5s` |
//! | `SESSION_PURGE_INTERVAL` | unset (sweeper disabled) |
//! | `DATABASE_URL` | unset |

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use warden_auth::{HashCost, TokenIssuer, TokenSettings};

pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub hash_cost: HashCost,
    pub store_timeout: Duration,
    /// `None` disables the expired-session sweeper.
    pub purge_interval: Option<Duration>,
    pub database_url: Option<SecretString>,
}

impl AuthConfig {
    /// Defaults for everything except the secret.
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            issuer: "warden".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            hash_cost: HashCost::default(),
            store_timeout: Duration::from_secs(5),
            purge_interval: None,
            database_url: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key -> value source (the process env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let mut config = Self::new(SecretString::from(secret));

        if let Some(v) = get("JWT_ISSUER") {
            config.issuer = v;
        }
        if let Some(v) = get("JWT_ACCESS_EXPIRY") {
            config.access_ttl = parse_duration("JWT_ACCESS_EXPIRY", &v)?;
        }
        if let Some(v) = get("JWT_REFRESH_EXPIRY") {
            config.refresh_ttl = parse_duration("JWT_REFRESH_EXPIRY", &v)?;
        }
        if let Some(v) = get("PASSWORD_HASH_MEMORY_KIB") {
            config.hash_cost.memory_kib = parse_u32("PASSWORD_HASH_MEMORY_KIB", &v)?;
        }
        if let Some(v) = get("PASSWORD_HASH_ITERATIONS") {
            config.hash_cost.iterations = parse_u32("PASSWORD_HASH_ITERATIONS", &v)?;
        }
        if let Some(v) = get("PASSWORD_HASH_PARALLELISM") {
            config.hash_cost.parallelism = parse_u32("PASSWORD_HASH_PARALLELISM", &v)?;
        }
        if let Some(v) = get("STORE_TIMEOUT") {
            config.store_timeout = parse_duration("STORE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("SESSION_PURGE_INTERVAL") {
            config.purge_interval = Some(parse_duration("SESSION_PURGE_INTERVAL", &v)?);
        }
        config.database_url = get("DATABASE_URL").map(SecretString::from);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(ConfigError::invalid(
                "JWT_SECRET",
                format!("must be at least {MIN_SECRET_LEN} bytes"),
            ));
        }
        if self.access_ttl.is_zero() {
            return Err(ConfigError::invalid("JWT_ACCESS_EXPIRY", "must be positive"));
        }
        if self.refresh_ttl <= self.access_ttl {
            return Err(ConfigError::invalid(
                "JWT_REFRESH_EXPIRY",
                "must be longer than the access token lifetime",
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::invalid("STORE_TIMEOUT", "must be positive"));
        }
        if self.purge_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::invalid("SESSION_PURGE_INTERVAL", "must be positive"));
        }
        Ok(())
    }

    pub fn token_settings(&self) -> Result<TokenSettings, ConfigError> {
        let convert = |key: &'static str, d: Duration| {
            chrono::Duration::from_std(d).map_err(|e| ConfigError::invalid(key, e.to_string()))
        };
        Ok(TokenSettings {
            issuer: self.issuer.clone(),
            access_ttl: convert("JWT_ACCESS_EXPIRY", self.access_ttl)?,
            refresh_ttl: convert("JWT_REFRESH_EXPIRY", self.refresh_ttl)?,
        })
    }

    pub fn token_issuer(&self) -> Result<TokenIssuer, ConfigError> {
        TokenIssuer::new(self.jwt_secret.expose_secret().as_bytes(), self.token_settings()?)
            .map_err(|e| ConfigError::invalid("JWT_SECRET", e.to_string()))
    }
}

fn parse_u32(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.parse::<u32>()
        .map_err(|e| ConfigError::invalid(key, e.to_string()))
}

/// Parse `90s`, `15m`, `1h30m`, `7d`, `250ms`. A bare number is seconds.
pub fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(ConfigError::invalid(key, format!("expected a number in '{raw}'")));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| ConfigError::invalid(key, format!("number too large in '{raw}'")))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(60 * 60)),
            "d" => Duration::from_secs(value.saturating_mul(24 * 60 * 60)),
            other => {
                return Err(ConfigError::invalid(
                    key,
                    format!("unknown unit '{other}' in '{raw}'"),
                ));
            }
        };
        total = total.saturating_add(part);
    }

    if raw.is_empty() {
        return Err(ConfigError::invalid(key, "empty duration"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = AuthConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(config.access_ttl, Duration::from_secs(900));
        assert_eq!(config.refresh_ttl, Duration::from_secs(168 * 3600));
        assert_eq!(config.issuer, "warden");
        assert_eq!(config.hash_cost, HashCost::default());
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert!(config.purge_interval.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn secret_is_required_and_must_be_long() {
        assert_eq!(
            AuthConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::Missing("JWT_SECRET")
        );
        assert!(matches!(
            AuthConfig::from_lookup(lookup(&[("JWT_SECRET", "short")])),
            Err(ConfigError::Invalid { key: "JWT_SECRET", .. })
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = AuthConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("JWT_ACCESS_EXPIRY", "5m"),
            ("JWT_REFRESH_EXPIRY", "1d"),
            ("PASSWORD_HASH_ITERATIONS", "3"),
            ("SESSION_PURGE_INTERVAL", "1h30m"),
        ]))
        .unwrap();
        assert_eq!(config.access_ttl, Duration::from_secs(300));
        assert_eq!(config.refresh_ttl, Duration::from_secs(86_400));
        assert_eq!(config.hash_cost.iterations, 3);
        assert_eq!(config.purge_interval, Some(Duration::from_secs(5400)));
    }

    #[test]
    fn refresh_must_outlive_access() {
        let err = AuthConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("JWT_ACCESS_EXPIRY", "2h"),
            ("JWT_REFRESH_EXPIRY", "1h"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JWT_REFRESH_EXPIRY", .. }));
    }

    #[test]
    fn durations_accept_units_and_reject_garbage() {
        assert_eq!(parse_duration("K", "250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("K", "90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("K", "1h1m1s").unwrap(), Duration::from_secs(3661));
        assert!(parse_duration("K", "").is_err());
        assert!(parse_duration("K", "ten").is_err());
        assert!(parse_duration("K", "5w").is_err());
        assert!(parse_duration("K", "m5").is_err());
    }

    #[test]
    fn builds_a_working_token_issuer() {
        let config = AuthConfig::new(SecretString::from(SECRET.to_string()));
        let issuer = config.token_issuer().unwrap();
        assert_eq!(issuer.settings().access_ttl, chrono::Duration::minutes(15));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = AuthConfig::new(SecretString::from(SECRET.to_string()));
        assert!(!format!("{config:?}").contains(SECRET));
    }
}
