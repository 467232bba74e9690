//! Proxy configuration.
//!
//! The configuration file is YAML. JSON is valid YAML, so JSON files in the
//! same shape are accepted as well:
//!
//! ```yaml
//! sites:
//!   - upstream: "http://api.example.com"
//!     interval: 1000
//!   - name: "billing"
//!     upstream: "https://billing.example.com"
//!     interval: 250
//!     auth: { type: basic, username: "u", password: "p" }
//!     headers: { X-Client: "tollgate" }
//! defaultInterval: 500
//! cacheAge: 60000
//! cachePath: "/var/cache/tollgate"
//! http: 8080
//! https: { port: 8443, ssl: { key: "key.pem", cert: "cert.pem" } }
//! cors: true
//! ```
//!
//! Intervals, `cacheAge` and the timeouts are milliseconds.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::routing::Site;

/// Default time allowed for establishing an upstream connection
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default time allowed for an upstream to send its response head
const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";

/// Errors detected while loading or validating configuration.
///
/// All of them are fatal: the proxy refuses to start rather than discover a
/// broken site on the first request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no listener configured, set `http` and/or `https`")]
    NoListeners,

    #[error("https listener requires `ssl.key` and `ssl.cert`")]
    MissingTls,

    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("unsupported upstream scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("unsupported auth type {0:?}")]
    UnsupportedAuthVariant(String),

    #[error("auth type {kind:?} requires `{field}`")]
    MissingAuthField { kind: String, field: &'static str },

    #[error("site name {0:?} is used by more than one site")]
    DuplicateSiteName(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: &'static str },

    #[error("tls setup failed: {0}")]
    Tls(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// Interval for hosts no site covers; unset means such hosts are refused.
    #[serde(default)]
    pub default_interval: Option<u64>,

    /// Response cache lifetime; unset or zero disables caching.
    #[serde(default)]
    pub cache_age: Option<u64>,

    /// Directory where cached responses are persisted.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,

    #[serde(default)]
    pub http: Option<ListenerConfig>,

    #[serde(default)]
    pub https: Option<ListenerConfig>,

    #[serde(default)]
    pub cors: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    #[serde(default = "default_response_timeout")]
    pub response_timeout: u64,

    /// PEM bundle used to verify upstream certificates. Without it upstream
    /// certificates are not verified.
    #[serde(default)]
    pub upstream_ca: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// Selects the site through the `name` request header.
    #[serde(default)]
    pub name: Option<String>,

    /// Upstream base URL, e.g. `https://api.example.com:8443`.
    pub upstream: String,

    /// Minimum milliseconds between dispatches to the upstream host.
    pub interval: u64,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Extra headers set on every forwarded request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Raw credential descriptor; checked by [`crate::routing::Auth`].
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// A listener given either as a bare port or as a table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ListenerConfig {
    Port(u16),
    Detailed(ListenerOptions),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerOptions {
    pub port: u16,

    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub ssl: Option<SslConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SslConfig {
    pub key: PathBuf,
    pub cert: PathBuf,
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_response_timeout() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}

impl ListenerConfig {
    pub fn port(&self) -> u16 {
        match self {
            ListenerConfig::Port(port) => *port,
            ListenerConfig::Detailed(options) => options.port,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            ListenerConfig::Detailed(ListenerOptions {
                address: Some(address),
                ..
            }) => address,
            _ => DEFAULT_LISTEN_ADDRESS,
        }
    }

    pub fn ssl(&self) -> Option<&SslConfig> {
        match self {
            ListenerConfig::Port(_) => None,
            ListenerConfig::Detailed(options) => options.ssl.as_ref(),
        }
    }

    /// `address:port` suitable for binding.
    pub fn bind_addr(&self) -> String {
        let address = self.address();
        if address.contains(':') && !address.starts_with('[') {
            format!("[{}]:{}", address, self.port())
        } else {
            format!("{}:{}", address, self.port())
        }
    }
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses and validates configuration text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked before binding sockets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.is_none() && self.https.is_none() {
            return Err(ConfigError::NoListeners);
        }
        if let Some(https) = &self.https {
            if https.ssl().is_none() {
                return Err(ConfigError::MissingTls);
            }
        }
        self.build_sites()?;
        Ok(())
    }

    /// Converts the site table into routable sites.
    pub fn build_sites(&self) -> Result<Vec<Site>, ConfigError> {
        let mut names = HashSet::new();
        let mut sites = Vec::with_capacity(self.sites.len());

        for site_config in &self.sites {
            if let Some(name) = &site_config.name {
                if !names.insert(name.clone()) {
                    return Err(ConfigError::DuplicateSiteName(name.clone()));
                }
            }
            sites.push(Site::from_config(site_config)?);
        }

        Ok(sites)
    }

    pub fn default_interval(&self) -> Option<Duration> {
        self.default_interval.map(Duration::from_millis)
    }

    /// Cache lifetime, `None` when caching is off.
    pub fn cache_age(&self) -> Option<Duration> {
        self.cache_age
            .filter(|age| *age > 0)
            .map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout)
    }
}

/// `<config dir>/tollgate/config.yaml`, following the platform convention
/// (XDG on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("tollgate").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_accepts_bare_port() {
        let config = Config::from_yaml_str("http: 8080").unwrap();
        let http = config.http.unwrap();
        assert_eq!(http.port(), 8080);
        assert_eq!(http.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn ipv6_bind_address_is_bracketed() {
        let config = Config::from_yaml_str("http: { port: 80, address: \"::1\" }").unwrap();
        assert_eq!(config.http.unwrap().bind_addr(), "[::1]:80");
    }

    #[test]
    fn zero_cache_age_disables_cache() {
        let config = Config::from_yaml_str("http: 1\ncacheAge: 0").unwrap();
        assert!(config.cache_age().is_none());
    }

    #[test]
    fn timeouts_have_defaults() {
        let config = Config::from_yaml_str("http: 1").unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.response_timeout(), Duration::from_secs(30));
    }
}
