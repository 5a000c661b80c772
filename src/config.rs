// src/config.rs

//! Manages server configuration: loading, defaults, and validation.
//!
//! The core only reads these values; nothing here is ever written back.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Which of the two cooperating processes this instance is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The background service. Owns the SMTP listener whenever it runs.
    #[default]
    Service,
    /// The foreground process. Binds SMTP only when no service answers.
    Ui,
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "service" => Ok(Role::Service),
            "ui" => Ok(Role::Ui),
            other => Err(anyhow!("unknown role '{other}', expected 'service' or 'ui'")),
        }
    }
}

/// Settings for the SMTP listener.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_ip")]
    pub ip: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// The host name announced in the banner and EHLO reply.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Command lines longer than this are answered with `500 Line too long`.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Lists `AUTH PLAIN LOGIN` in the EHLO reply. Off by default; AUTH
    /// commands are accepted regardless.
    #[serde(default)]
    pub advertise_auth: bool,
}

fn default_smtp_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_smtp_port() -> u16 {
    2525
}
fn default_hostname() -> String {
    "localhost".to_string()
}
fn default_max_line_length() -> usize {
    4096
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            ip: default_smtp_ip(),
            port: default_smtp_port(),
            hostname: default_hostname(),
            max_line_length: default_max_line_length(),
            advertise_auth: false,
        }
    }
}

/// Settings for the peer control protocol.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IpCommConfig {
    #[serde(default = "default_ipcomm_ip")]
    pub ip: String,
    /// The port the service process listens on.
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    /// The port the UI process listens on.
    #[serde(default = "default_ui_port")]
    pub ui_port: u16,
    /// Connect plus exchange budget for every outbound request.
    #[serde(default = "default_ipcomm_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Idle outbound connections kept per peer.
    #[serde(default = "default_max_pooled")]
    pub max_pooled: usize,
    /// Requests announcing a larger payload are rejected.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_ipcomm_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_service_port() -> u16 {
    37402
}
fn default_ui_port() -> u16 {
    37403
}
fn default_ipcomm_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_max_pooled() -> usize {
    4
}
fn default_max_payload_bytes() -> usize {
    16 * 1024 * 1024 // 16 MB
}

impl Default for IpCommConfig {
    fn default() -> Self {
        Self {
            ip: default_ipcomm_ip(),
            service_port: default_service_port(),
            ui_port: default_ui_port(),
            timeout: default_ipcomm_timeout(),
            max_pooled: default_max_pooled(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

/// Lifecycle settings shared by every connection manager.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionsConfig {
    /// Connections silent for longer than this are closed by the reaper.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(default = "default_status_interval", with = "humantime_serde")]
    pub status_interval: Duration,
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(20 * 60)
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_status_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
            status_interval: default_status_interval(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    role: Role,
    #[serde(default)]
    smtp: SmtpConfig,
    #[serde(default)]
    ipcomm: IpCommConfig,
    #[serde(default)]
    connections: ConnectionsConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_level: String,
    pub role: Role,
    pub smtp: SmtpConfig,
    pub ipcomm: IpCommConfig,
    pub connections: ConnectionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            role: Role::default(),
            smtp: SmtpConfig::default(),
            ipcomm: IpCommConfig::default(),
            connections: ConnectionsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Loads `path` if it exists, otherwise falls back to the built-in defaults.
    pub fn from_file_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            log_level: raw_config.log_level,
            role: raw_config.role,
            smtp: raw_config.smtp,
            ipcomm: raw_config.ipcomm,
            connections: raw_config.connections,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.smtp.ip.trim().is_empty() {
            return Err(anyhow!("smtp.ip cannot be empty"));
        }
        if self.smtp.port == 0 {
            return Err(anyhow!("smtp.port cannot be 0"));
        }
        if self.smtp.hostname.trim().is_empty() {
            return Err(anyhow!("smtp.hostname cannot be empty"));
        }
        if self.smtp.max_line_length < 512 {
            return Err(anyhow!(
                "smtp.max_line_length must be at least 512 (RFC 5321 command line limit)"
            ));
        }

        if self.ipcomm.ip.trim().is_empty() {
            return Err(anyhow!("ipcomm.ip cannot be empty"));
        }
        if self.ipcomm.service_port == 0 || self.ipcomm.ui_port == 0 {
            return Err(anyhow!("ipcomm ports cannot be 0"));
        }
        if self.ipcomm.service_port == self.ipcomm.ui_port {
            return Err(anyhow!(
                "ipcomm.service_port and ipcomm.ui_port must be different"
            ));
        }
        if self.ipcomm.timeout.is_zero() {
            return Err(anyhow!("ipcomm.timeout cannot be 0"));
        }
        if self.ipcomm.max_payload_bytes == 0 {
            return Err(anyhow!("ipcomm.max_payload_bytes cannot be 0"));
        }

        if self.connections.sweep_interval.is_zero() {
            return Err(anyhow!("connections.sweep_interval cannot be 0"));
        }
        if self.connections.status_interval.is_zero() {
            return Err(anyhow!("connections.status_interval cannot be 0"));
        }
        if self.connections.idle_timeout < self.connections.sweep_interval {
            warn!(
                "connections.idle_timeout ({:?}) is shorter than the sweep interval ({:?}); idle connections may live up to one extra interval.",
                self.connections.idle_timeout, self.connections.sweep_interval
            );
        }

        for port in [self.ipcomm.service_port, self.ipcomm.ui_port] {
            if port == self.smtp.port {
                return Err(anyhow!(
                    "ipcomm port {port} conflicts with the SMTP listener port"
                ));
            }
        }
        Ok(())
    }
}
