//! Service configuration from environment variables and Docker secrets.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub http_port: u16,
    /// When set, API requests must carry it in the `Authorization` header.
    pub api_key: Option<String>,
    pub atp_base_url: String,
    pub flaresolverr_api: Option<String>,
    pub atp_requests_per_minute: u32,
    pub enrich_workers: usize,
    pub enrich_timeout: Duration,
    pub enrich_max_attempts: u32,
    pub enrich_claim_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Secrets/config:
        // - Docker Compose: read from /run/secrets/*
        // - elsewhere: plain env vars, optionally from a .env file

        let db_user = env::var("DB_USER").unwrap_or_else(|_| "tennis".to_string());
        let db_name = env::var("DB_NAME").unwrap_or_else(|_| "tennis".to_string());
        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "postgres".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());

        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            Err(_) => {
                let db_password = read_secret_file("/run/secrets/db_password", "db_password")?;
                format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    db_user, db_password, db_host, db_port, db_name
                )
            }
        };

        let redis_url = match env::var("REDIS_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("REDIS_URL is set but empty")),
            Err(_) => {
                let redis_password =
                    read_secret_file("/run/secrets/redis_password", "redis_password")?;
                format!("redis://:{}@redis:6379", redis_password)
            }
        };

        Ok(Self {
            database_url,
            redis_url,
            http_port: parse_or("HTTP_PORT", 8000),
            api_key: non_empty("API_KEY"),
            atp_base_url: non_empty("ATP_BASE_URL")
                .unwrap_or_else(|| "https://www.atptour.com".to_string()),
            flaresolverr_api: non_empty("FLARESOLVERR_API"),
            atp_requests_per_minute: parse_or("ATP_REQUESTS_PER_MINUTE", 30),
            enrich_workers: parse_or("ENRICH_WORKERS", 2),
            enrich_timeout: Duration::from_secs(parse_or("ENRICH_TIMEOUT_SECONDS", 120)),
            enrich_max_attempts: parse_or("ENRICH_MAX_ATTEMPTS", 3),
            enrich_claim_ttl: Duration::from_secs(parse_or("ENRICH_CLAIM_TTL_SECONDS", 86400)),
        })
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read a secret from a Docker secret file
fn read_secret_file(file_path: &str, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .context(format!(
            "Secret file not found at {} ({}); set the matching environment variable instead",
            file_path, secret_name
        ))
}
