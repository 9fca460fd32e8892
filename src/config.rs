//! Configuration for the inference client.
//!
//! Configuration is resolved from multiple sources, later ones overriding
//! earlier ones:
//! 1. Default configuration (embedded in the library)
//! 2. User-specified configuration file
//! 3. Environment variables (prefixed with `INFERLINK_`)
//! 4. Builder methods on [`ClientConfig`]
//!
//! # Environment Variables
//!
//! - `INFERLINK_ENDPOINT` - Server endpoint, e.g. `http://host:8001`
//! - `INFERLINK_ATTEMPTS` - Default attempt budget for predictions
//! - `INFERLINK_REQUEST_TIMEOUT_MS` - Per-request timeout (0 disables)
//! - `INFERLINK_TLS__ENABLED` - Enable TLS for the channel
//! - `INFERLINK_TLS__CA_PATH` - CA certificate for server verification

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint. A bare `host:port` is treated as `http://host:port`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Default attempt budget for predictions that do not set their own.
    /// 1 means no retry.
    #[serde(default = "default_attempts")]
    pub attempts: usize,
    /// Per-request timeout in milliseconds. 0 disables the timeout.
    #[serde(default)]
    pub request_timeout_ms: u64,
    /// TLS settings.
    #[serde(default)]
    pub tls: TlsSettings,
}

/// TLS material for the gRPC channel.
///
/// PEM bytes set programmatically take precedence over file paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    #[serde(default)]
    pub enabled: bool,
    /// CA certificate for server verification (PEM file).
    pub ca_path: Option<PathBuf>,
    /// Client certificate for mTLS (PEM file).
    pub cert_path: Option<PathBuf>,
    /// Client private key for mTLS (PEM file).
    pub key_path: Option<PathBuf>,
    #[serde(skip)]
    pub ca_pem: Option<Vec<u8>>,
    #[serde(skip)]
    pub cert_pem: Option<Vec<u8>>,
    #[serde(skip)]
    pub key_pem: Option<Vec<u8>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            attempts: default_attempts(),
            request_timeout_ms: 0,
            tls: TlsSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from defaults, an optional file, and environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            include_str!("../config/default.toml"),
            config::FileFormat::Toml,
        ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder
            .add_source(config::Environment::with_prefix("INFERLINK").separator("__"));

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_tls_ca(mut self, ca: Vec<u8>) -> Self {
        self.tls.enabled = true;
        self.tls.ca_pem = Some(ca);
        self
    }

    pub fn with_client_cert(mut self, cert: Vec<u8>, key: Vec<u8>) -> Self {
        self.tls.enabled = true;
        self.tls.cert_pem = Some(cert);
        self.tls.key_pem = Some(key);
        self
    }

    /// Per-request timeout, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms))
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_attempts() -> usize {
    1
}
