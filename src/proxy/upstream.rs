//! Upstream connection and request forwarding
//!
//! This module connects to upstream servers and relays one request and its
//! response between the client and the upstream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::config::{Config, ConfigError};
use crate::http::body::BUFFER_SIZE;
use crate::http::exchange::Exchange;
use crate::http::headers::Headers;
use crate::http::parser::{MAX_HEAD_SIZE, ParseError, parse_response_head};
use crate::http::request::RequestHead;
use crate::http::response::{Response, ResponseHead};
use crate::routing::{Scheme, Target};
use crate::server::tls;

/// Performs the actual forward of an admitted request.
///
/// Implementations answer upstream failures themselves (gateway-style
/// responses); an `Err` is reserved for a client connection that can no
/// longer be used.
pub trait ProxyTransport: Send + Sync {
    fn forward<S>(
        &self,
        exchange: &mut Exchange<'_, S>,
        target: &Target,
        headers: &Headers,
    ) -> impl Future<Output = Result<()>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;
}

/// Request headers meaningful only between the client and the proxy
const PROXY_ONLY_HEADERS: &[&str] = &["site", "name", "Expect"];

/// Forwards requests to upstreams over fresh HTTP/1.1 connections
pub struct UpstreamTransport {
    /// Time allowed for TCP connect and TLS handshake
    connect_timeout: Duration,

    /// Time allowed for the upstream to send its response head
    response_timeout: Duration,

    tls: TlsConnector,
}

impl UpstreamTransport {
    pub fn new(connect_timeout: Duration, response_timeout: Duration, tls: TlsConnector) -> Self {
        Self {
            connect_timeout,
            response_timeout,
            tls,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client_config = tls::client_config(config.upstream_ca.as_deref())?;
        Ok(Self::new(
            config.connect_timeout(),
            config.response_timeout(),
            TlsConnector::from(Arc::new(client_config)),
        ))
    }

    /// Build the request head sent upstream
    ///
    /// Hop-by-hop and proxy-only headers are dropped, `Host` names the
    /// requested host, the route's headers are applied on top and the
    /// upstream connection is closed after the response.
    ///
    /// Note: This method is made public for integration testing purposes
    pub fn build_http_request(&self, head: &RequestHead, target: &Target, route_headers: &Headers) -> Vec<u8> {
        let mut headers = head.headers.clone();
        headers.strip_hop_by_hop();
        for name in PROXY_ONLY_HEADERS {
            headers.remove(name);
        }

        let host = head.effective_host();
        if host.is_empty() {
            headers.set("Host", target.host_header());
        } else {
            headers.set("Host", host);
        }

        headers.merge(route_headers);
        headers.set("Connection", "close");

        let path = if head.path.is_empty() { "/" } else { &head.path };

        let mut buffer = Vec::with_capacity(512);
        buffer.extend_from_slice(format!("{} {} {}\r\n", head.method, path, head.version).as_bytes());
        headers.write_to(&mut buffer);
        buffer.extend_from_slice(b"\r\n");
        buffer
    }

    async fn try_forward<S>(&self, exchange: &mut Exchange<'_, S>, target: &Target, route_headers: &Headers) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let stream = timeout(self.connect_timeout, TcpStream::connect(target.authority()))
            .await
            .context("Connection timeout")?
            .with_context(|| format!("Failed to connect to {target}"))?;
        stream.set_nodelay(true).ok();

        tracing::trace!(upstream = %target, "Connected to upstream");

        match target.scheme {
            Scheme::Http => self.relay(stream, exchange, target, route_headers).await,
            Scheme::Https => {
                let hostname = target.host.hostname().trim_start_matches('[').trim_end_matches(']');
                let server_name = ServerName::try_from(hostname)
                    .with_context(|| format!("Invalid TLS server name {hostname:?}"))?
                    .to_owned();

                let stream = timeout(self.connect_timeout, self.tls.connect(server_name, stream))
                    .await
                    .context("TLS handshake timeout")?
                    .with_context(|| format!("TLS handshake with {target} failed"))?;

                self.relay(stream, exchange, target, route_headers).await
            }
        }
    }

    async fn relay<U, S>(
        &self,
        mut upstream: U,
        exchange: &mut Exchange<'_, S>,
        target: &Target,
        route_headers: &Headers,
    ) -> Result<()>
    where
        U: AsyncRead + AsyncWrite + Unpin + Send,
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let request = self.build_http_request(exchange.head(), target, route_headers);
        upstream.write_all(&request).await?;
        exchange
            .forward_body(&mut upstream)
            .await
            .context("Failed to stream request body")?;
        upstream.flush().await?;

        tracing::trace!(upstream = %target, "Request sent to upstream");

        let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
        let head = timeout(self.response_timeout, read_response_head(&mut upstream, &mut buffer))
            .await
            .context("Response timeout")??;

        let framing = head.body_framing(&exchange.head().method);

        tracing::info!(
            upstream = %target,
            status = head.status,
            method = %exchange.head().method,
            path = %exchange.head().path,
            "Request forwarded"
        );

        exchange.send_response_head(&head, framing).await?;
        exchange.relay_body(framing, &mut upstream, &mut buffer).await?;
        Ok(())
    }
}

impl ProxyTransport for UpstreamTransport {
    async fn forward<S>(&self, exchange: &mut Exchange<'_, S>, target: &Target, headers: &Headers) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let error = match self.try_forward(exchange, target, headers).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if exchange.response_started() {
            return Err(error.context(format!("Upstream {target} failed mid-response")));
        }

        tracing::warn!(
            upstream = %target,
            error = %format!("{error:#}"),
            method = %exchange.head().method,
            path = %exchange.head().path,
            "Failed to proxy request to upstream"
        );

        exchange.close();
        exchange.respond(gateway_error_response(&error)).await
    }
}

/// Handle proxy errors and return the matching gateway response
pub fn gateway_error_response(error: &anyhow::Error) -> Response {
    if error.chain().any(|cause| cause.is::<Elapsed>()) {
        Response::gateway_timeout()
    } else {
        Response::bad_gateway()
    }
}

/// Reads the final response head, skipping interim 1xx responses.
async fn read_response_head<U>(upstream: &mut U, buffer: &mut BytesMut) -> Result<ResponseHead>
where
    U: AsyncRead + Unpin,
{
    loop {
        match parse_response_head(buffer) {
            Ok((head, consumed)) => {
                buffer.advance(consumed);
                if (100..200).contains(&head.status) && head.status != 101 {
                    continue;
                }
                return Ok(head);
            }
            Err(ParseError::Incomplete) => {}
            Err(e) => anyhow::bail!("Invalid upstream response: {e}"),
        }

        if buffer.len() > MAX_HEAD_SIZE {
            anyhow::bail!("Response headers too large");
        }

        buffer.reserve(BUFFER_SIZE);
        let n = upstream.read_buf(buffer).await?;
        if n == 0 {
            anyhow::bail!("Connection closed before complete response received");
        }
    }
}
