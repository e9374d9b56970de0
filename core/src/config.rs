//! Settings the transport consumes: where to connect and how long to wait.
//!
//! # Design
//! Loading configuration belongs to the layer above; this type only has to
//! be deserializable from whatever that layer reads. The read/write timeout
//! is split into whole seconds and microseconds so callers can ask for
//! sub-second bounds without floating point.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    pub connect_timeout_secs: Option<u64>,
    pub rw_timeout_secs: Option<u64>,
    pub rw_timeout_micros: Option<u32>,
    /// PEM file of trusted certificates. When set, `https` peers are verified
    /// against it; when absent, verification is disabled.
    pub tls_cert_path: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5984,
            scheme: Scheme::Http,
            connect_timeout_secs: None,
            rw_timeout_secs: None,
            rw_timeout_micros: None,
            tls_cert_path: None,
        }
    }
}

impl TransportConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    pub fn with_rw_timeout(mut self, secs: u64, micros: u32) -> Self {
        self.rw_timeout_secs = Some(secs);
        self.rw_timeout_micros = Some(micros);
        self
    }

    pub fn with_tls_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_cert_path = Some(path.into());
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    /// `None` when neither part is set or both are zero: reads and writes
    /// then block indefinitely.
    pub fn rw_timeout(&self) -> Option<Duration> {
        if self.rw_timeout_secs.is_none() && self.rw_timeout_micros.is_none() {
            return None;
        }
        let timeout = Duration::from_secs(self.rw_timeout_secs.unwrap_or(0))
            + Duration::from_micros(u64::from(self.rw_timeout_micros.unwrap_or(0)));
        (!timeout.is_zero()).then_some(timeout)
    }

    /// Value for the `Host` header: the port is omitted when it is the
    /// scheme's default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
