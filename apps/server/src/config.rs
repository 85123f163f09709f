//! Environment-driven server configuration.

use std::path::PathBuf;

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";
const DEFAULT_MEDIA_DIR: &str = "./media";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEV_IDENTITY_SECRET: &str = "dev-only-insecure-default-key-change-me";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub secret: Vec<u8>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub identity: IdentityConfig,
    pub media_dir: PathBuf,
    pub public_url: String,
    pub cors_origin: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests never touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = read("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let bind_addr = read("SCRAPBOOK_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());

        let db_max_connections = match read("SCRAPBOOK_DB_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    key: "SCRAPBOOK_DB_MAX_CONNECTIONS",
                    value,
                })?,
            None => DEFAULT_DB_MAX_CONNECTIONS,
        };

        let secret = match read("SCRAPBOOK_IDENTITY_SECRET").or_else(|| read("JWT_SECRET")) {
            Some(secret) => secret.into_bytes(),
            None => {
                tracing::warn!(
                    component = "config",
                    "SCRAPBOOK_IDENTITY_SECRET not set, using insecure development secret"
                );
                DEV_IDENTITY_SECRET.as_bytes().to_vec()
            }
        };

        let public_url = read("SCRAPBOOK_PUBLIC_URL")
            .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            bind_addr,
            database_url,
            db_max_connections,
            identity: IdentityConfig {
                secret,
                issuer: read("SCRAPBOOK_IDENTITY_ISSUER"),
                audience: read("SCRAPBOOK_IDENTITY_AUDIENCE"),
            },
            media_dir: read("SCRAPBOOK_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_DIR)),
            public_url,
            cors_origin: read("SCRAPBOOK_CORS_ORIGIN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn database_url_is_required() {
        let err = ServerConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn defaults_apply_when_optional_values_are_absent() {
        let config =
            ServerConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db/scrapbook")]))
                .expect("config");

        assert_eq!(config.bind_addr, DEFAULT_BIND);
        assert_eq!(config.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
        assert_eq!(config.identity.secret, DEV_IDENTITY_SECRET.as_bytes());
        assert_eq!(config.media_dir, PathBuf::from(DEFAULT_MEDIA_DIR));
        assert!(config.identity.issuer.is_none());
    }

    #[test]
    fn legacy_jwt_secret_is_honoured_and_public_url_trimmed() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/scrapbook"),
            ("JWT_SECRET", "s3cret"),
            ("SCRAPBOOK_PUBLIC_URL", "https://scrapbook.example/"),
        ]))
        .expect("config");

        assert_eq!(config.identity.secret, b"s3cret");
        assert_eq!(config.public_url, "https://scrapbook.example");
    }

    #[test]
    fn rejects_zero_pool_size() {
        let err = ServerConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/scrapbook"),
            ("SCRAPBOOK_DB_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
