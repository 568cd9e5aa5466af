// storefront/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for `SESSION_TTL_MINUTES`: one day.
pub const MAX_SESSION_TTL_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  pub database_url: String,
  /// Public base URL, used for provider callback and return URLs.
  pub app_base_url: String,
  pub session_ttl_minutes: i64,
  pub provider_timeout_ms: u64,
  /// Zero disables the housekeeping sweeper.
  pub session_sweep_interval_secs: u64,
  pub stale_claim_secs: i64,
  pub run_migrations: bool,
  pub log_json: bool,
}

fn validate_session_ttl(minutes: i64) -> Result<i64> {
  if !(1..=MAX_SESSION_TTL_MINUTES).contains(&minutes) {
    return Err(AppError::Config(format!(
      "SESSION_TTL_MINUTES must be between 1 and {}, got {}",
      MAX_SESSION_TTL_MINUTES, minutes
    )));
  }
  Ok(minutes)
}

fn parse_env<T>(var_name: &str, default: &str) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  env::var(var_name)
    .unwrap_or_else(|_| default.to_string())
    .parse::<T>()
    .map_err(|e| AppError::Config(format!("Invalid {}: {}", var_name, e)))
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();

    let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let server_port = parse_env::<u16>("SERVER_PORT", "8080")?;
    let database_url = env::var("DATABASE_URL")
      .map_err(|e| AppError::Config(format!("Missing environment variable 'DATABASE_URL': {}", e)))?;
    let app_base_url = env::var("APP_BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", server_host, server_port));

    let session_ttl_minutes = validate_session_ttl(parse_env::<i64>("SESSION_TTL_MINUTES", "30")?)?;

    let config = Self {
      server_host,
      server_port,
      database_url,
      app_base_url: app_base_url.trim_end_matches('/').to_string(),
      session_ttl_minutes,
      provider_timeout_ms: parse_env("PROVIDER_TIMEOUT_MS", "5000")?,
      session_sweep_interval_secs: parse_env("SESSION_SWEEP_INTERVAL_SECS", "60")?,
      stale_claim_secs: parse_env("STALE_CLAIM_SECS", "300")?,
      run_migrations: parse_env("RUN_MIGRATIONS", "false")?,
      log_json: parse_env("LOG_JSON", "false")?,
    };

    tracing::info!(
      server_host = %config.server_host,
      server_port = config.server_port,
      session_ttl_minutes = config.session_ttl_minutes,
      "Application configuration loaded."
    );
    Ok(config)
  }

  pub fn provider_timeout(&self) -> Duration {
    Duration::from_millis(self.provider_timeout_ms)
  }

  /// Session lifetime; `None` when the configured minutes do not fit a duration.
  pub fn session_ttl(&self) -> Option<chrono::Duration> {
    chrono::Duration::try_minutes(self.session_ttl_minutes)
  }

  /// Defaults used by tests and local runs against the in-memory store.
  pub fn for_local(app_base_url: &str) -> Self {
    Self {
      server_host: "127.0.0.1".to_string(),
      server_port: 8080,
      database_url: String::new(),
      app_base_url: app_base_url.trim_end_matches('/').to_string(),
      session_ttl_minutes: 30,
      provider_timeout_ms: 5000,
      session_sweep_interval_secs: 0,
      stale_claim_secs: 300,
      run_migrations: false,
      log_json: false,
    }
  }
}
