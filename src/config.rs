use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

use crate::error::{AppError, AppResult};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub db_max_connections: u32,
    pub log_dir: String,

    // Rate limiting
    pub rate_protected_per_min: u32,
    pub rate_batch_per_min: u32,

    // Background work
    pub overtime_sweep_interval_secs: u64,
    pub leave_sweep_interval_secs: u64,
    pub compensatory_lookback_days: u32,

    pub api_prefix: String,
}

fn required(key: &str) -> AppResult<String> {
    env::var(key).map_err(|_| AppError::Config(format!("{key} must be set")))
}

fn optional<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            db_max_connections: optional("DB_MAX_CONNECTIONS", 10)?,
            log_dir: optional("LOG_DIR", "logs".to_string())?,

            rate_protected_per_min: optional("RATE_PROTECTED_PER_MIN", 1000)?,
            rate_batch_per_min: optional("RATE_BATCH_PER_MIN", 30)?,

            overtime_sweep_interval_secs: optional("OVERTIME_SWEEP_INTERVAL_SECS", 3600)?,
            leave_sweep_interval_secs: optional("LEAVE_SWEEP_INTERVAL_SECS", 86_400)?,
            compensatory_lookback_days: optional("COMPENSATORY_LOOKBACK_DAYS", 30)?,

            api_prefix: optional("API_PREFIX", "/api".to_string())?,
        })
    }
}
