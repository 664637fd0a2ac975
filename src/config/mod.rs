//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

use crate::game::terrain::SPAWN_MARGIN;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS (comma-separated for multiple)
    pub client_origin: String,
    /// Terrain grid width in cells
    pub grid_width: usize,
    /// Terrain grid height in cells
    pub grid_height: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting providers usually supply PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            // Spawns sit SPAWN_MARGIN columns from each edge, so the
            // width floor keeps the two spawn columns distinct
            grid_width: parse_dimension("GRID_WIDTH", 50, 2 * SPAWN_MARGIN + 1)?,
            grid_height: parse_dimension("GRID_HEIGHT", 10, 10)?,
        })
    }
}

fn parse_dimension(key: &'static str, default: usize, min: usize) -> Result<usize, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= min)
            .ok_or(ConfigError::InvalidDimension(key, min)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid grid dimension for {0} (must be an integer >= {1})")]
    InvalidDimension(&'static str, usize),
}
