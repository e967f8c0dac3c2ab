use std::time::Duration;

use thiserror::Error;

use crate::auth::Verifier;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Where access tokens are verified against.
#[derive(Clone, Debug)]
pub enum TokenKey {
    RsaPublicPem(String),
    Secret(String),
}

impl TokenKey {
    pub fn verifier(&self) -> Result<Verifier, ConfigError> {
        match self {
            TokenKey::RsaPublicPem(pem) => Verifier::from_rsa_pem(pem.as_bytes()).map_err(|e| ConfigError::Invalid {
                name: "TOKEN_PUBLIC_KEY",
                reason: e.to_string(),
            }),
            TokenKey::Secret(s) => Ok(Verifier::from_secret(s.as_bytes())),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

#[derive(Clone, Debug)]
pub struct RecommenderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub token_key: TokenKey,
    pub pool: PoolConfig,
    pub recommender: Option<RecommenderConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process env.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(
            get: &impl Fn(&str) -> Option<String>,
            name: &'static str,
            default: T,
        ) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            match get(name).filter(|v| !v.trim().is_empty()) {
                Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid { name, reason: e.to_string() }),
                None => Ok(default),
            }
        }
        let secs = |name: &'static str, default: u64| parsed(&get, name, default).map(Duration::from_secs);

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let token_key = match (get("TOKEN_PUBLIC_KEY"), get("JWT_SECRET")) {
            (Some(pem), _) if !pem.trim().is_empty() => TokenKey::RsaPublicPem(pem),
            (_, Some(secret)) if secret.len() >= 32 => TokenKey::Secret(secret),
            (_, Some(_)) => {
                return Err(ConfigError::Invalid {
                    name: "JWT_SECRET",
                    reason: "must be at least 32 characters long".into(),
                })
            }
            _ => return Err(ConfigError::Missing("TOKEN_PUBLIC_KEY")),
        };

        let recommender = match get("RECOMMENDER_URL").filter(|v| !v.trim().is_empty()) {
            Some(base_url) => Some(RecommenderConfig {
                base_url,
                api_key: get("RECOMMENDER_API_KEY").filter(|v| !v.is_empty()),
                timeout: secs("RECOMMENDER_TIMEOUT_SECS", 5)?,
            }),
            None => None,
        };

        Ok(Self {
            database_url,
            port: parsed(&get, "PORT", 8080)?,
            token_key,
            pool: PoolConfig {
                max_connections: parsed(&get, "DB_MAX_CONNECTIONS", 100)?,
                min_connections: parsed(&get, "DB_MIN_CONNECTIONS", 10)?,
                idle_timeout: secs("DB_IDLE_TIMEOUT_SECS", 600)?,
                max_lifetime: secs("DB_MAX_LIFETIME_SECS", 3600)?,
            },
            recommender,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/feed"),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.pool.max_connections, 100);
        assert_eq!(cfg.pool.idle_timeout, Duration::from_secs(600));
        assert!(cfg.recommender.is_none());
        assert!(matches!(cfg.token_key, TokenKey::Secret(_)));
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "x"), ("JWT_SECRET", "short")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "JWT_SECRET", .. }));
    }

    #[test]
    fn missing_key_material_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TOKEN_PUBLIC_KEY")));
    }

    #[test]
    fn recommender_settings_are_read() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "x"),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("RECOMMENDER_URL", "http://gorse:8087"),
            ("RECOMMENDER_TIMEOUT_SECS", "2"),
            ("PORT", "9000"),
        ]))
        .unwrap();
        let rec = cfg.recommender.unwrap();
        assert_eq!(rec.base_url, "http://gorse:8087");
        assert_eq!(rec.timeout, Duration::from_secs(2));
        assert!(rec.api_key.is_none());
        assert_eq!(cfg.port, 9000);
    }

    #[test]
    fn bad_number_is_invalid() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "x"),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
