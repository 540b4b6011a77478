use std::{fs, ops::RangeInclusive, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::services::key::KeyStoreConfig;

const HOUR: u64 = 60 * 60;

#[derive(Parser, Debug, Clone, Deserialize)]
#[command(name = "kstore")]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    #[clap(long)]
    #[arg(short = 'c')]
    #[serde(default)]
    pub config: Option<String>,
    #[clap(long, env)]
    pub database_url: String,
    #[clap(long, env)]
    #[arg(default_value_t = 10)]
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[clap(long, env)]
    #[arg(default_value_t = 1)]
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,
    /// Seconds to wait for a pooled connection.
    #[clap(long, env)]
    #[arg(default_value_t = 5)]
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,
    #[clap(long, env)]
    #[arg(default_value_t = String::from("kstore=info"))]
    #[serde(default = "default_rust_log")]
    pub rust_log: String,
    #[clap(long, env)]
    #[arg(value_parser = port_in_range,short = 'p', default_value_t = 30060)]
    #[serde(default = "default_port")]
    pub port: u16,
    #[clap(long, env)]
    #[arg(default_value_t = 24)]
    #[serde(default = "default_key_rotation_hours")]
    pub key_rotation_hours: u64,
    /// Hours a retired key keeps verifying.
    #[clap(long, env)]
    #[arg(default_value_t = 48)]
    #[serde(default = "default_key_grace_hours")]
    pub key_grace_hours: u64,
    /// Access token lifetime in seconds.
    #[clap(long, env)]
    #[arg(default_value_t = 900)]
    #[serde(default = "default_access_token_expiration")]
    pub access_token_expiration: u64,
    /// Refresh token lifetime in seconds.
    #[clap(long, env)]
    #[arg(default_value_t = 604800)]
    #[serde(default = "default_refresh_token_expiration")]
    pub refresh_token_expiration: u64,
}

impl AppConfig {
    pub fn key_store_config(&self) -> KeyStoreConfig {
        KeyStoreConfig {
            rotation_interval: Duration::from_secs(
                self.key_rotation_hours.saturating_mul(HOUR),
            ),
            grace_period: Duration::from_secs(
                self.key_grace_hours.saturating_mul(HOUR),
            ),
            access_token_ttl: Duration::from_secs(self.access_token_expiration),
            refresh_token_ttl: Duration::from_secs(
                self.refresh_token_expiration,
            ),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }
}

fn default_rust_log() -> String {
    String::from("kstore=info")
}

fn default_port() -> u16 {
    30060
}

fn default_max_size() -> u32 {
    10
}

fn default_min_idle() -> u32 {
    1
}

fn default_acquire_timeout() -> u64 {
    5
}

fn default_key_rotation_hours() -> u64 {
    24
}

fn default_key_grace_hours() -> u64 {
    48
}

fn default_access_token_expiration() -> u64 {
    900
}

fn default_refresh_token_expiration() -> u64 {
    604800
}

const PORT_RANGE: RangeInclusive<usize> = 1..=65535;

fn port_in_range(s: &str) -> Result<u16, String> {
    let port: usize = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a port number"))?;
    if PORT_RANGE.contains(&port) {
        Ok(port as u16)
    } else {
        Err(format!(
            "port not in range {}-{}",
            PORT_RANGE.start(),
            PORT_RANGE.end()
        ))
    }
}

pub fn load(cfg: &str) -> Result<AppConfig> {
    let content =
        fs::read_to_string(cfg).context("could not read config file")?;
    toml::from_str(&content).context("could not parse config file")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_defaults_match_key_store_defaults() {
        let config: AppConfig =
            toml::from_str(r#"database_url = "mysql://kstore@localhost/kstore""#)
                .unwrap();
        assert_eq!(config.port, 30060);
        assert_eq!(config.rust_log, "kstore=info");
        assert_eq!(config.acquire_timeout(), Duration::from_secs(5));
        assert_eq!(config.key_store_config(), KeyStoreConfig::default());
    }

    #[test]
    fn cli_overrides_key_lifetimes() {
        let config = AppConfig::try_parse_from([
            "kstore",
            "--database-url",
            "mysql://kstore@localhost/kstore",
            "--key-rotation-hours",
            "6",
            "--key-grace-hours",
            "12",
            "--access-token-expiration",
            "60",
        ])
        .unwrap();
        let key_store = config.key_store_config();
        assert_eq!(key_store.rotation_interval, Duration::from_secs(6 * HOUR));
        assert_eq!(key_store.grace_period, Duration::from_secs(12 * HOUR));
        assert_eq!(key_store.access_token_ttl, Duration::from_secs(60));
    }

    #[test]
    fn port_must_be_in_range() {
        assert_eq!(port_in_range("8080"), Ok(8080));
        assert!(port_in_range("0").is_err());
        assert!(port_in_range("65536").is_err());
        assert!(port_in_range("http").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load("/nonexistent/kstore.toml").unwrap_err();
        assert_eq!(err.to_string(), "could not read config file");
    }
}
