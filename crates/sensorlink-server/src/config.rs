// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.

use sensorlink_carbon::ForwarderConfig;
use sensorlink_proto::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 1234)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum frame payload size (bytes)
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Time allowed for a client to complete the TLS handshake (ms)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    pub tls: TlsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server certificate, key and the CA client certificates must chain to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Server certificate chain (PEM)
    pub cert_path: PathBuf,

    /// Server private key (PEM)
    pub key_path: PathBuf,

    /// Root CA for client certificates (PEM)
    pub root_ca_path: PathBuf,

    /// Serial numbers (hex) of client certificates to turn away
    #[serde(default)]
    pub expired_serials: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// Carbon forwarder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,

    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// Device name table (`device_key,path` per line)
    #[serde(default = "default_names_path")]
    pub names_path: PathBuf,

    /// Pause after each power reading (ms)
    #[serde(default = "default_retention_interval")]
    pub retention_interval_ms: u64,

    /// Pause before reconnecting after a failure (ms)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    1234
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("sensorlink.db")
}

fn default_metrics_host() -> String {
    "127.0.0.1".into()
}

fn default_metrics_port() -> u16 {
    2003
}

fn default_names_path() -> PathBuf {
    PathBuf::from("namespace.csv")
}

fn default_retention_interval() -> u64 {
    1000
}

fn default_reconnect_delay() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_frame_size: default_max_frame_size(),
            handshake_timeout_ms: default_handshake_timeout(),
            tls: TlsConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: default_metrics_port(),
            names_path: default_names_path(),
            retention_interval_ms: default_retention_interval(),
            reconnect_delay_ms: default_reconnect_delay(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl MetricsConfig {
    /// Settings for the forwarder worker.
    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            host: self.host.clone(),
            port: self.port,
            retention_interval: Duration::from_millis(self.retention_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidValue(
                "max_frame_size cannot be 0".into(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "handshake_timeout_ms cannot be 0".into(),
            ));
        }
        if self.tls.cert_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue("tls.cert_path required".into()));
        }
        if self.tls.key_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue("tls.key_path required".into()));
        }
        if self.tls.root_ca_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue(
                "tls.root_ca_path required".into(),
            ));
        }
        if self.metrics.port == 0 {
            return Err(ConfigError::InvalidValue(
                "metrics.port cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
