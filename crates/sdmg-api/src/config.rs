// Gateway configuration loaded from environment variables.
// Decision: required variables abort startup with context; everything else
// has a documented default.

use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Complete gateway configuration
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// 64 hex chars, the AES-256-GCM vault key
    pub encryption_key: String,
    pub port: u16,
    /// true unless NODE_ENV=production; relaxes the URL guard to allow http
    pub dev_mode: bool,
    pub jwt_access_expiry: Duration,
    pub jwt_refresh_expiry: Duration,
    /// Requests per minute budgets, enforced by the outer deployment
    pub rate_limit_proxy: u32,
    pub rate_limit_api: u32,
    pub rate_limit_login: u32,
    pub log_level: String,
    pub log_retention_days: u32,
    /// None means permissive CORS
    pub allowed_origins: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
        let jwt_secret =
            std::env::var("JWT_SECRET").context("JWT_SECRET environment variable required")?;

        let encryption_mode = env_or("ENCRYPTION_MODE", "local");
        if encryption_mode != "local" {
            bail!(
                "Unsupported ENCRYPTION_MODE '{}': only 'local' is implemented",
                encryption_mode
            );
        }
        let encryption_key = std::env::var("ENCRYPTION_KEY")
            .context("ENCRYPTION_KEY environment variable required (64 hex chars)")?;

        let port = env_or("PORT", "3000")
            .parse::<u16>()
            .context("PORT must be a number")?;
        let dev_mode = env_or("NODE_ENV", "development") != "production";

        let jwt_access_expiry = parse_duration(&env_or("JWT_ACCESS_EXPIRY", "15m"))
            .context("Invalid JWT_ACCESS_EXPIRY")?;
        let jwt_refresh_expiry = parse_duration(&env_or("JWT_REFRESH_EXPIRY", "7d"))
            .context("Invalid JWT_REFRESH_EXPIRY")?;

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Ok(Self {
            database_url,
            jwt_secret,
            encryption_key,
            port,
            dev_mode,
            jwt_access_expiry,
            jwt_refresh_expiry,
            rate_limit_proxy: parse_u32("RATE_LIMIT_PROXY", 100)?,
            rate_limit_api: parse_u32("RATE_LIMIT_API", 120)?,
            rate_limit_login: parse_u32("RATE_LIMIT_LOGIN", 5)?,
            log_level: env_or("LOG_LEVEL", "info"),
            log_retention_days: parse_u32("LOG_RETENTION_DAYS", 30)?,
            allowed_origins,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_u32(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("{} must be a number", name)),
        Err(_) => Ok(default),
    }
}

/// Parse durations in the `15m` / `7d` / `30s` / `2h` form; a bare number
/// means seconds.
fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration");
    }

    let (value, unit) = match raw.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((split, _)) => raw.split_at(split),
        None => (raw, "s"),
    };
    let value: u64 = value.parse().with_context(|| format!("bad duration '{}'", raw))?;

    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86_400,
        other => bail!("unknown duration unit '{}'", other),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("15x").is_err());
        assert!(parse_duration("m").is_err());
    }
}
