use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::http::exchange::Exchange;
use crate::http::headers::Headers;
use crate::http::request::RequestHead;
use crate::http::response::Response;
use crate::proxy::ProxyTransport;
use crate::routing::host_key::{HostKey, Scheme};
use crate::routing::queue::DispatchQueue;
use crate::routing::registry::QueueRegistry;
use crate::routing::site::{Site, SiteRegistry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// No site covers the host and no default interval is configured.
    #[error("Proxy has not been configured for host: {host}")]
    UnroutableHost { host: String },
}

/// Where a routed request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: HostKey,
}

impl Target {
    /// `hostname:port` for opening the connection. IPv6 hostnames keep
    /// their brackets.
    pub fn authority(&self) -> String {
        self.host.to_string()
    }

    /// Host header value naming this target, port omitted when default.
    pub fn host_header(&self) -> String {
        if self.host.is_default_port(self.scheme) {
            self.host.hostname().to_string()
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host_header())
    }
}

/// The routing decision for one request.
#[derive(Debug, Clone)]
pub struct Route {
    /// Matched site, `None` for hosts served from the default interval.
    pub site: Option<Arc<Site>>,
    pub target: Target,
    /// Headers the site adds to the forwarded request.
    pub headers: Headers,
    pub queue: Arc<DispatchQueue>,
}

/// How the router finished with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Answered with the unroutable-host error; nothing was queued.
    Rejected,
    /// Admitted and handed to the transport.
    Forwarded,
    /// The client disconnected while queued.
    Abandoned,
}

/// Maps incoming requests to sites and throttles them per upstream host.
///
/// A request walks through these states:
///
/// ```text
/// Received ─► Resolving ─┬─► Rejected (500, no queue touched)
///                        └─► Queued ─► Dispatching ─► Forwarded
///                               └─► Abandoned (client gone)
/// ```
///
/// One router is shared by every listener, so a host's spacing holds no
/// matter which listener its requests arrive on.
#[derive(Debug)]
pub struct Router {
    sites: SiteRegistry,
    queues: QueueRegistry,
}

impl Router {
    /// Builds the router, creating a dispatch queue for every site up front.
    pub fn new(sites: Vec<Site>, default_interval: Option<Duration>) -> Self {
        let sites = SiteRegistry::new(sites);
        let queues = QueueRegistry::from_sites(&sites, default_interval);
        Self { sites, queues }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(config.build_sites()?, config.default_interval()))
    }

    pub fn sites(&self) -> &SiteRegistry {
        &self.sites
    }

    pub fn queues(&self) -> &QueueRegistry {
        &self.queues
    }

    /// Resolves the site, target and queue for a request head.
    ///
    /// The matched site supplies the scheme, auth and extra headers. The
    /// queue and target are keyed by the request's effective host, so a
    /// host with no queue is rejected even when a site matched by name.
    /// `listener_scheme` is used when no site matched.
    pub fn route(&self, head: &RequestHead, listener_scheme: Scheme) -> Result<Route, RouteError> {
        let host = head.effective_host();
        let site = self.sites.find(head.site_name(), host);

        // The site only picks the upstream scheme; the host always comes
        // from the request.
        let scheme = site.as_ref().map_or(listener_scheme, |site| site.scheme);
        let key = HostKey::normalize(scheme, host);

        let queue = self
            .queues
            .for_host(&key)
            .ok_or_else(|| RouteError::UnroutableHost {
                host: host.to_string(),
            })?;

        let headers = site
            .as_ref()
            .map(|site| site.forwarding_headers())
            .unwrap_or_default();

        Ok(Route {
            site,
            target: Target { scheme, host: key },
            headers,
            queue,
        })
    }

    /// Routes, queues and forwards one request.
    ///
    /// Failures to reach the upstream are answered by the transport;
    /// an `Err` means the client connection itself is unusable.
    pub async fn handle<S, T>(&self, exchange: &mut Exchange<'_, S>, transport: &T) -> Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
        T: ProxyTransport,
    {
        let received_at = Instant::now();

        let route = match self.route(exchange.head(), exchange.scheme()) {
            Ok(route) => route,
            Err(RouteError::UnroutableHost { host }) => {
                tracing::warn!(host = %host, method = %exchange.head().method, "Rejecting request for unconfigured host");
                exchange.respond(Response::unroutable(&host)).await?;
                return Ok(Outcome::Rejected);
            }
        };

        tracing::debug!(
            site = route.site.as_ref().map(|s| s.display_name()).unwrap_or("-"),
            upstream = %route.target,
            pending = route.queue.pending(),
            "Request queued"
        );

        let admission = route.queue.admit();
        let Some(admitted_at) = exchange.wait_for_admission(admission).await else {
            tracing::debug!(upstream = %route.target, "Client went away while queued");
            return Ok(Outcome::Abandoned);
        };

        tracing::info!(
            method = %exchange.head().method,
            path = %exchange.head().path,
            upstream = %route.target,
            queued_ms = admitted_at.saturating_duration_since(received_at).as_millis() as u64,
            "Dispatching request"
        );

        transport
            .forward(exchange, &route.target, &route.headers)
            .await?;
        Ok(Outcome::Forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::{Method, RequestBuilder};
    use crate::routing::auth::Auth;

    fn request(headers: &[(&str, &str)]) -> RequestHead {
        headers
            .iter()
            .fold(RequestBuilder::new().method(Method::GET).path("/"), |b, (k, v)| {
                b.header(*k, *v)
            })
            .build()
            .unwrap()
    }

    fn router(default_interval: Option<Duration>) -> Router {
        Router::new(
            vec![
                Site::new("http://a.test", Duration::from_millis(100))
                    .unwrap()
                    .with_auth(Auth::Basic {
                        username: "u".to_string(),
                        password: "p".to_string(),
                    }),
                Site::new("https://b.test:8443", Duration::from_millis(50))
                    .unwrap()
                    .with_name("bee"),
            ],
            default_interval,
        )
    }

    fn router_with_default() -> Router {
        router(Some(Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn routes_by_host_with_site_headers() {
        let router = router(None);
        let route = router.route(&request(&[("Host", "a.test")]), Scheme::Http).unwrap();

        assert_eq!(route.target.to_string(), "http://a.test");
        assert_eq!(route.headers.get("Authorization"), Some("Basic dTpw"));
        assert_eq!(route.queue.interval(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn name_header_takes_priority_over_host() {
        let router = router(None);
        let route = router
            .route(&request(&[("Host", "b.test:8443"), ("name", "bee")]), Scheme::Http)
            .unwrap();

        assert_eq!(route.target.to_string(), "https://b.test:8443");
        assert!(route.headers.get("Authorization").is_none());
    }

    #[tokio::test]
    async fn named_site_does_not_redirect_to_its_upstream() {
        let router = router(None);
        let err = router
            .route(&request(&[("Host", "other.test"), ("name", "bee")]), Scheme::Http)
            .unwrap_err();
        assert_eq!(err, RouteError::UnroutableHost { host: "other.test".to_string() });
        assert_eq!(router.queues().len(), 2);

        let router = router_with_default();
        let route = router
            .route(&request(&[("Host", "other.test"), ("name", "bee")]), Scheme::Http)
            .unwrap();
        assert_eq!(route.target.to_string(), "https://other.test");
        assert_eq!(route.site.unwrap().display_name(), "bee");
    }

    #[tokio::test]
    async fn host_header_port_selects_queue_not_site_port() {
        let router = Router::new(
            vec![Site::new("http://a.test:8080", Duration::from_millis(100)).unwrap()],
            None,
        );
        let err = router
            .route(&request(&[("Host", "a.test")]), Scheme::Http)
            .unwrap_err();
        assert_eq!(err, RouteError::UnroutableHost { host: "a.test".to_string() });

        let route = router
            .route(&request(&[("Host", "a.test:8080")]), Scheme::Http)
            .unwrap();
        assert_eq!(route.target.host, HostKey::new("a.test", 8080));
        assert_eq!(route.queue.interval(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn site_header_overrides_host() {
        let router = router(None);
        let route = router
            .route(&request(&[("Host", "localhost:8080"), ("site", "a.test")]), Scheme::Http)
            .unwrap();
        assert_eq!(route.target.host, HostKey::new("a.test", 80));
    }

    #[tokio::test]
    async fn unknown_host_without_default_is_rejected_without_queue() {
        let router = router(None);
        let err = router
            .route(&request(&[("Host", "c.test")]), Scheme::Http)
            .unwrap_err();

        assert_eq!(err, RouteError::UnroutableHost { host: "c.test".to_string() });
        assert_eq!(router.queues().len(), 2);
    }

    #[tokio::test]
    async fn unknown_name_does_not_fall_back_to_host_site() {
        let router = router(None);
        let route = router
            .route(&request(&[("Host", "a.test"), ("name", "nobody")]), Scheme::Http)
            .unwrap();
        assert!(route.site.is_none());
        assert!(route.headers.get("Authorization").is_none());
        assert_eq!(route.queue.interval(), Duration::from_millis(100));

        assert!(router
            .route(&request(&[("Host", "c.test"), ("name", "nobody")]), Scheme::Http)
            .is_err());
    }

    #[tokio::test]
    async fn default_interval_covers_unknown_hosts_on_listener_scheme() {
        let router = router(Some(Duration::ZERO));
        let route = router
            .route(&request(&[("Host", "c.test:9000")]), Scheme::Https)
            .unwrap();

        assert_eq!(route.target.to_string(), "https://c.test:9000");
        assert!(route.site.is_none());
        assert!(route.headers.is_empty());
        assert_eq!(router.queues().len(), 3);
    }

    #[test]
    fn default_port_is_left_out_of_host_header() {
        let target = Target {
            scheme: Scheme::Http,
            host: HostKey::normalize(Scheme::Http, "[::1]:80"),
        };
        assert_eq!(target.authority(), "[::1]:80");
        assert_eq!(target.host_header(), "[::1]");
    }
}
