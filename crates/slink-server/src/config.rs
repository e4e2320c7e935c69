use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};

use slink_api::auth::DEFAULT_HISTORY_LIMIT;
use slink_gateway::coordinator::DEFAULT_MAX_BODY_CHARS;
use slink_gateway::session::DEFAULT_OUTBOUND_QUEUE;

/// Placeholder JWT secrets that MUST NOT be used outside development.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Upper bound on a single store watch; `None` when disabled.
    pub watch_deadline: Option<Duration>,
    pub outbound_queue: usize,
    pub max_body_chars: usize,
    pub history_limit: u32,
    /// Comma-separated words masked in message bodies; empty disables it.
    pub censor_words: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = get("SLINK_ENVIRONMENT").unwrap_or_else(|| "development".into());
        let development = environment == "development";

        let jwt_secret = match get("SLINK_JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if development => DEV_SECRET.to_string(),
            None => bail!("SLINK_JWT_SECRET must be set in {environment}"),
        };
        if !development && PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("SLINK_JWT_SECRET is still a placeholder; set a random secret");
        }

        let watch_deadline_secs: u64 = parse(&get, "SLINK_WATCH_DEADLINE_SECS", 3600)?;

        Ok(Self {
            host: get("SLINK_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "SLINK_PORT", 3000)?,
            db_path: get("SLINK_DB_PATH")
                .unwrap_or_else(|| "slink.db".into())
                .into(),
            jwt_secret,
            watch_deadline: (watch_deadline_secs > 0)
                .then(|| Duration::from_secs(watch_deadline_secs)),
            outbound_queue: parse(&get, "SLINK_OUTBOUND_QUEUE", DEFAULT_OUTBOUND_QUEUE)?,
            max_body_chars: parse(&get, "SLINK_MAX_BODY_CHARS", DEFAULT_MAX_BODY_CHARS)?,
            history_limit: parse(&get, "SLINK_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            censor_words: get("SLINK_CENSOR_WORDS").unwrap_or_default(),
            environment,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

fn parse<F, T>(get: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_suit_development() {
        let config = config(&[]).unwrap();
        assert!(config.is_development());
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("slink.db"));
        assert_eq!(config.jwt_secret, DEV_SECRET);
        assert_eq!(config.watch_deadline, Some(Duration::from_secs(3600)));
        assert_eq!(config.outbound_queue, 64);
        assert_eq!(config.max_body_chars, 2000);
        assert_eq!(config.history_limit, 100);
        assert!(config.censor_words.is_empty());
    }

    #[test]
    fn production_rejects_missing_or_placeholder_secret() {
        assert!(config(&[("SLINK_ENVIRONMENT", "production")]).is_err());
        assert!(
            config(&[
                ("SLINK_ENVIRONMENT", "production"),
                ("SLINK_JWT_SECRET", "dev-secret-change-me"),
            ])
            .is_err()
        );
        let config = config(&[
            ("SLINK_ENVIRONMENT", "production"),
            ("SLINK_JWT_SECRET", "8f3c1e0b9a7d"),
        ])
        .unwrap();
        assert!(!config.is_development());
    }

    #[test]
    fn zero_deadline_disables_it() {
        let config = config(&[("SLINK_WATCH_DEADLINE_SECS", "0")]).unwrap();
        assert_eq!(config.watch_deadline, None);
    }

    #[test]
    fn parses_overrides() {
        let config = config(&[
            ("SLINK_PORT", "8080"),
            ("SLINK_HISTORY_LIMIT", "25"),
            ("SLINK_CENSOR_WORDS", "darn, heck,,"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.history_limit, 25);
        assert_eq!(config.censor_words, "darn, heck,,");
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config(&[("SLINK_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("SLINK_PORT"));
    }
}
