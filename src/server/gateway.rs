use anyhow::Result;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::Config;
use crate::http::exchange::Exchange;
use crate::http::request::RequestHead;
use crate::proxy::cache::{CacheKey, MAX_CACHED_BODY, ResponseCache};
use crate::proxy::{Cors, UpstreamTransport};
use crate::routing::{Outcome, Router, Scheme};

/// Everything a listener needs to serve one request.
///
/// Requests pass through CORS, then the cache, then the router:
///
/// ```text
/// request ─► Cors ─┬─► preflight answered
///                  └─► ResponseCache ─┬─► hit replayed
///                                     └─► Router ─► DispatchQueue ─► UpstreamTransport
/// ```
pub struct Gateway {
    router: Router,
    transport: UpstreamTransport,
    cors: Option<Cors>,
    cache: Option<ResponseCache>,
}

impl Gateway {
    pub fn new(router: Router, transport: UpstreamTransport) -> Self {
        Self {
            router,
            transport,
            cors: None,
            cache: None,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut gateway = Self::new(Router::from_config(config)?, UpstreamTransport::from_config(config)?);
        if config.cors {
            gateway = gateway.with_cors(Cors);
        }
        if let Some(cache) = ResponseCache::from_config(config).await? {
            gateway = gateway.with_cache(cache);
        }
        Ok(gateway)
    }

    pub fn with_cors(mut self, cors: Cors) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    /// Serves one request. Returns whether the connection may be reused.
    pub async fn serve<S>(&self, head: RequestHead, scheme: Scheme, stream: &mut S, buffered: &mut BytesMut) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut exchange = Exchange::new(head, scheme, stream, buffered);

        if let Some(cors) = &self.cors {
            cors.decorate(&mut exchange);
            if cors.is_preflight(exchange.head()) {
                let response = cors.preflight(exchange.head());
                exchange.respond(response).await?;
                return Ok(exchange.keep_alive());
            }
        }

        let cached = match &self.cache {
            Some(cache) => CacheKey::for_request(exchange.head(), scheme).map(|key| (cache, key)),
            None => None,
        };

        if let Some((cache, key)) = &cached {
            if let Some(entry) = cache.lookup(key).await {
                exchange.replay(&entry.head, &entry.body).await?;
                return Ok(exchange.keep_alive());
            }
            exchange.capture_response(MAX_CACHED_BODY);
        }

        let outcome = self.router.handle(&mut exchange, &self.transport).await?;

        if let (Some((cache, key)), Outcome::Forwarded) = (cached, outcome) {
            if let Some(capture) = exchange.take_capture() {
                cache.store(key, capture).await;
            }
        }

        Ok(exchange.keep_alive())
    }
}
