use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::{ConfigError, SiteConfig};
use crate::http::headers::Headers;
use crate::routing::auth::Auth;
use crate::routing::host_key::{HostKey, Scheme};

/// A configured upstream with its own throttle, credentials and headers.
#[derive(Debug, Clone)]
pub struct Site {
    /// Optional identifier, matched against the `name` request header
    pub name: Option<String>,

    /// Upstream URL as configured
    pub upstream: Url,

    pub scheme: Scheme,

    /// Lowercased upstream hostname
    pub host: String,

    pub port: u16,

    /// Minimum spacing between dispatches to the upstream host
    pub interval: Duration,

    pub auth: Option<Auth>,

    /// Extra headers set on every forwarded request
    pub headers: Headers,
}

impl Site {
    /// Create a site for `upstream` with the given dispatch interval.
    pub fn new(upstream: &str, interval: Duration) -> Result<Self, ConfigError> {
        let url = Url::parse(upstream).map_err(|e| ConfigError::InvalidUpstream {
            url: upstream.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = Scheme::parse(url.scheme())
            .ok_or_else(|| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;

        let key = HostKey::from_url(&url).ok_or_else(|| ConfigError::InvalidUpstream {
            url: upstream.to_string(),
            reason: "missing host".to_string(),
        })?;

        Ok(Self {
            name: None,
            host: key.hostname().to_string(),
            port: key.port(),
            scheme,
            upstream: url,
            interval,
            auth: None,
            headers: Headers::new(),
        })
    }

    /// Create a site from its configuration entry.
    pub fn from_config(config: &SiteConfig) -> Result<Self, ConfigError> {
        let mut site = Self::new(&config.upstream, Duration::from_millis(config.interval))?;
        site.name = config.name.clone();
        site.auth = config.auth.as_ref().map(Auth::try_from).transpose()?;

        for (name, value) in &config.headers {
            validate_header(name, value)?;
            site.headers.set(name.as_str(), value.as_str());
        }

        Ok(site)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Key of the dispatch queue throttling this site's upstream.
    pub fn host_key(&self) -> HostKey {
        HostKey::new(self.host.clone(), self.port)
    }

    /// Get a display name for the site (name or upstream URL)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.upstream.as_str())
    }

    /// Headers this site adds to forwarded requests, credentials last.
    pub fn forwarding_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        if let Some(auth) = &self.auth {
            auth.apply(&mut headers);
        }
        headers
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), ConfigError> {
    let valid_name = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid_name {
        return Err(ConfigError::InvalidHeader {
            name: name.to_string(),
            reason: "name contains characters not allowed in a header name",
        });
    }

    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(ConfigError::InvalidHeader {
            name: name.to_string(),
            reason: "value contains control characters",
        });
    }

    Ok(())
}

/// The statically configured sites, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: Vec<Arc<Site>>,
}

impl SiteRegistry {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            sites: sites.into_iter().map(Arc::new).collect(),
        }
    }

    /// Finds the site a request is meant for.
    ///
    /// When `name` is given only a site with exactly that name matches; a
    /// failed name lookup does not fall back to the host. Otherwise the first
    /// site whose upstream hostname equals the hostname of `host` wins.
    pub fn find(&self, name: Option<&str>, host: &str) -> Option<Arc<Site>> {
        match name {
            Some(name) => self
                .sites
                .iter()
                .find(|site| site.name.as_deref() == Some(name))
                .cloned(),
            None => {
                let hostname = HostKey::normalize(Scheme::Http, host);
                self.sites
                    .iter()
                    .find(|site| site.host == hostname.hostname())
                    .cloned()
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Site>> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
