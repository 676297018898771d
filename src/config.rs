//! Server and client connection configuration

use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Bind configuration for the mail server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the JSON snapshot file holding users and messages.
    pub db_path: PathBuf,
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    ///
    /// Reads from `.env` if present. All variables are optional:
    /// - `SIGMAIL_HOST` (default: `0.0.0.0`)
    /// - `SIGMAIL_PORT` (default: `9000`)
    /// - `SIGMAIL_DB` (default: `server_db.json`)
    ///
    /// # Errors
    ///
    /// Returns an error if `SIGMAIL_PORT` is not a valid port number.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("SIGMAIL_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_port()?,
            db_path: env::var("SIGMAIL_DB")
                .unwrap_or_else(|_| "server_db.json".to_string())
                .into(),
        })
    }
}

/// Connection configuration for the mail client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Directory for per-user cache, draft, and export files.
    pub data_dir: PathBuf,
}

impl ClientConfig {
    /// Load client configuration from environment variables.
    ///
    /// Reads from `.env` if present. All variables are optional:
    /// - `SIGMAIL_HOST` (default: `127.0.0.1`)
    /// - `SIGMAIL_PORT` (default: `9000`)
    /// - `SIGMAIL_DATA_DIR` (default: `client_data`)
    ///
    /// # Errors
    ///
    /// Returns an error if `SIGMAIL_PORT` is not a valid port number.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("SIGMAIL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_port()?,
            data_dir: env::var("SIGMAIL_DATA_DIR")
                .unwrap_or_else(|_| "client_data".to_string())
                .into(),
        })
    }
}

fn parse_port() -> Result<u16> {
    env::var("SIGMAIL_PORT")
        .unwrap_or_else(|_| "9000".to_string())
        .parse()
        .map_err(|e| Error::Config(format!("Invalid SIGMAIL_PORT: {e}")))
}
