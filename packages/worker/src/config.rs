use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub search_api_key: String,
    pub authority_api_key: String,
    pub workers: usize,
    pub max_db_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            search_api_key: env::var("SEARCH_API_KEY").context("SEARCH_API_KEY must be set")?,
            authority_api_key: env::var("AUTHORITY_API_KEY")
                .context("AUTHORITY_API_KEY must be set")?,
            workers: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("WORKER_COUNT must be a valid number")?,
            max_db_connections: env::var("MAX_DB_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("MAX_DB_CONNECTIONS must be a valid number")?,
        })
    }
}
