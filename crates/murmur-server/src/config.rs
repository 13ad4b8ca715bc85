use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), cfg!(debug_assertions))
    }

    /// Builds the config from `lookup`. The development JWT secret is only
    /// used when `allow_dev_secret` is set (debug builds).
    pub fn from_lookup<F>(lookup: F, allow_dev_secret: bool) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = match lookup("MURMUR_JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ if allow_dev_secret => {
                warn!("MURMUR_JWT_SECRET not set, using the insecure development secret");
                DEV_JWT_SECRET.to_string()
            }
            _ => bail!("MURMUR_JWT_SECRET must be set"),
        };

        Ok(Self {
            host: get("MURMUR_HOST", "0.0.0.0"),
            port: parse_value("MURMUR_PORT", &get("MURMUR_PORT", "3000"))?,
            db_path: PathBuf::from(get("MURMUR_DB_PATH", "murmur.db")),
            jwt_secret,
            token_ttl_hours: parse_value("MURMUR_TOKEN_TTL_HOURS", &get("MURMUR_TOKEN_TTL_HOURS", "24"))?,
            upload_dir: PathBuf::from(get("MURMUR_UPLOAD_DIR", "uploads")),
            max_upload_bytes: parse_value(
                "MURMUR_MAX_UPLOAD_BYTES",
                &get("MURMUR_MAX_UPLOAD_BYTES", "52428800"),
            )?,
        })
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours)
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value for {}: {:?}", key, value))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "s3cret")]), false).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("murmur.db"));
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.token_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.max_upload_bytes, 52_428_800);
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_lookup(
            lookup(&[
                ("MURMUR_JWT_SECRET", "s3cret"),
                ("MURMUR_PORT", "8080"),
                ("MURMUR_TOKEN_TTL_HOURS", "2"),
                ("MURMUR_MAX_UPLOAD_BYTES", "1024"),
            ]),
            false,
        )
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.token_ttl_hours, 2);
        assert_eq!(config.max_upload_bytes, 1024);
    }

    #[test]
    fn missing_secret_is_fatal_without_dev_fallback() {
        assert!(Config::from_lookup(lookup(&[]), false).is_err());
        assert!(Config::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "")]), false).is_err());

        let dev = Config::from_lookup(lookup(&[]), true).unwrap();
        assert_eq!(dev.jwt_secret, DEV_JWT_SECRET);
    }

    #[test]
    fn unparsable_numbers_fail_startup() {
        for key in ["MURMUR_PORT", "MURMUR_TOKEN_TTL_HOURS", "MURMUR_MAX_UPLOAD_BYTES"] {
            let err = Config::from_lookup(lookup(&[("MURMUR_JWT_SECRET", "s3cret"), (key, "lots")]), false)
                .unwrap_err();
            assert!(err.to_string().contains(key));
        }
    }
}
