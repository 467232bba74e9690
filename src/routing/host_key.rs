use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol spoken with a client or an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Parses a URL scheme, accepting only the ones the proxy can speak.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical `hostname:port` identity of an upstream.
///
/// Dispatch queues are keyed by this value, so `a.test`, `A.test` and
/// `a.test:80` over http all share one queue.
///
/// # Examples
///
/// ```
/// use tollgate::routing::{HostKey, Scheme};
///
/// let key = HostKey::normalize(Scheme::Https, "API.example.com");
/// assert_eq!(key.to_string(), "api.example.com:443");
/// assert_eq!(key, HostKey::normalize(Scheme::Https, "api.example.com:443"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    hostname: String,
    port: u16,
}

impl HostKey {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Builds the key for a `Host` header value received over `scheme`.
    ///
    /// A missing or empty port becomes the scheme's default. Anything after
    /// the last colon that is not a port number is treated as part of the
    /// hostname, so malformed values still produce a usable key. Bracketed
    /// IPv6 literals keep their brackets.
    ///
    /// Normalizing the string form of a key yields the same key again.
    pub fn normalize(scheme: Scheme, host_header: &str) -> Self {
        let value = host_header.trim();

        match value.rsplit_once(':') {
            Some((host, "")) => Self::new(host, scheme.default_port()),
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => Self::new(host, port),
                Err(_) => Self::new(value, scheme.default_port()),
            },
            None => Self::new(value, scheme.default_port()),
        }
    }

    /// Builds the key of a configured upstream URL.
    pub fn from_url(url: &url::Url) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(host, port))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_default_port(&self, scheme: Scheme) -> bool {
        self.port == scheme.default_port()
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_and_explicit_default_ports_match() {
        assert_eq!(
            HostKey::normalize(Scheme::Http, "a.test"),
            HostKey::normalize(Scheme::Http, "a.test:80")
        );
        assert_eq!(
            HostKey::normalize(Scheme::Https, "a.test"),
            HostKey::normalize(Scheme::Https, "a.test:443")
        );
    }

    #[test]
    fn explicit_port_is_kept() {
        let key = HostKey::normalize(Scheme::Http, "a.test:8080");
        assert_eq!(key.hostname(), "a.test");
        assert_eq!(key.port(), 8080);
        assert!(!key.is_default_port(Scheme::Http));
    }

    #[test]
    fn hostname_is_lowercased() {
        let key = HostKey::normalize(Scheme::Http, "A.Test");
        assert_eq!(key.to_string(), "a.test:80");
    }

    #[test]
    fn ipv6_literals_keep_brackets() {
        let key = HostKey::normalize(Scheme::Http, "[::1]:8080");
        assert_eq!(key.hostname(), "[::1]");
        assert_eq!(key.port(), 8080);

        let key = HostKey::normalize(Scheme::Https, "[::1]");
        assert_eq!(key.hostname(), "[::1]");
        assert_eq!(key.port(), 443);
    }

    #[test]
    fn malformed_port_stays_in_hostname() {
        let key = HostKey::normalize(Scheme::Http, "a.test:abc");
        assert_eq!(key.hostname(), "a.test:abc");
        assert_eq!(key.port(), 80);
    }

    #[test]
    fn empty_port_means_default() {
        let key = HostKey::normalize(Scheme::Http, "host:");
        assert_eq!(key.hostname(), "host");
        assert_eq!(key.port(), 80);
    }

    #[test]
    fn normalizing_a_key_again_is_stable() {
        let inputs = [
            "a.test",
            "A.Test:8080",
            " a.test:443 ",
            "[::1]",
            "[::1]:8080",
            "[::1]:",
            "host:",
            "host::",
            ":",
            "",
            "::1",
            "a.test:abc",
            "a.test:99999",
            "a: 80",
            "a.test:80:80",
        ];

        for scheme in [Scheme::Http, Scheme::Https] {
            for input in inputs {
                let once = HostKey::normalize(scheme, input);
                let twice = HostKey::normalize(scheme, &once.to_string());
                assert_eq!(once, twice, "{scheme} {input:?}");
            }
        }
    }

    #[test]
    fn from_url_uses_known_default_port() {
        let url = url::Url::parse("https://Example.com/path").unwrap();
        let key = HostKey::from_url(&url).unwrap();
        assert_eq!(key.to_string(), "example.com:443");
    }
}
