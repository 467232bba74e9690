//! One request/response pair on a client connection.
//!
//! An [`Exchange`] is what the router and the transport work with: the
//! parsed request head, the client stream with its unread body, and the
//! bookkeeping needed to decide whether the connection can be reused.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use anyhow::Result;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::http::body::{BodyFraming, copy_body, discard_body};
use crate::http::headers::Headers;
use crate::http::request::RequestHead;
use crate::http::response::{Response, ResponseHead};
use crate::http::writer::ResponseWriter;
use crate::routing::Scheme;
use crate::routing::queue::Admission;

/// Bytes read ahead from a queued client while it waits for admission.
///
/// Past this the client is no longer read until its request is dispatched,
/// so a slow queue never makes the proxy buffer unbounded request bodies.
pub const READ_AHEAD_LIMIT: usize = 64 * 1024;

/// Copy of a relayed response, taken for the response cache.
#[derive(Debug, Default)]
pub struct Capture {
    /// Response head as relayed, without per-connection headers.
    pub head: Option<ResponseHead>,
    pub body: Vec<u8>,
    /// The body was larger than the capture limit and was not kept.
    pub overflowed: bool,
    /// The whole body was relayed.
    pub complete: bool,
    limit: usize,
}

impl Capture {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn record(&mut self, bytes: &[u8]) {
        if self.overflowed {
            return;
        }
        if self.body.len() + bytes.len() > self.limit {
            self.overflowed = true;
            self.body = Vec::new();
            return;
        }
        self.body.extend_from_slice(bytes);
    }
}

pub struct Exchange<'a, S> {
    head: RequestHead,
    scheme: Scheme,
    stream: &'a mut S,
    buffered: &'a mut BytesMut,
    /// Headers added to every response of this exchange (CORS).
    extra_headers: Headers,
    keep_alive: bool,
    body_consumed: bool,
    response_started: bool,
    capture: Option<Capture>,
}

impl<'a, S> Exchange<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// `buffered` holds bytes already read past the request head.
    pub fn new(head: RequestHead, scheme: Scheme, stream: &'a mut S, buffered: &'a mut BytesMut) -> Self {
        let keep_alive = head.keep_alive();
        let body_consumed = head.body_framing() == BodyFraming::Empty;
        Self {
            head,
            scheme,
            stream,
            buffered,
            extra_headers: Headers::new(),
            keep_alive,
            body_consumed,
            response_started: false,
            capture: None,
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// Scheme of the listener the request arrived on.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Whether the connection can serve another request afterwards.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive && self.body_consumed
    }

    /// Marks the connection for closing once this exchange is done.
    pub fn close(&mut self) {
        self.keep_alive = false;
    }

    pub fn response_started(&self) -> bool {
        self.response_started
    }

    pub fn add_response_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extra_headers.set(name, value);
    }

    /// Starts copying the relayed response, keeping at most `limit` body bytes.
    pub fn capture_response(&mut self, limit: usize) {
        self.capture = Some(Capture::new(limit));
    }

    pub fn take_capture(&mut self) -> Option<Capture> {
        self.capture.take()
    }

    /// Waits until `admission` resolves, watching the client meanwhile.
    ///
    /// Up to [`READ_AHEAD_LIMIT`] bytes are read from the client so that a
    /// disconnect is noticed; they stay buffered for the forward. Returns
    /// `None` when the client went away first, which drops `admission` and
    /// turns the queued dispatch into a no-op.
    ///
    /// End of stream after a complete request is a half-close: the request
    /// stays queued and the connection closes after the response. End of
    /// stream before the body is complete, or a read error, is a disconnect.
    pub async fn wait_for_admission(&mut self, mut admission: Admission) -> Option<Instant> {
        let mut temp = [0u8; 4096];
        let mut client_done = false;

        loop {
            let room = READ_AHEAD_LIMIT
                .saturating_sub(self.buffered.len())
                .min(temp.len());
            let watch = room > 0 && !client_done;

            tokio::select! {
                biased;

                admitted = &mut admission => return admitted,

                read = self.stream.read(&mut temp[..room]), if watch => match read {
                    Ok(0) if self.body_buffered() => {
                        tracing::debug!("Client half-closed while queued");
                        self.close();
                        client_done = true;
                    }
                    Ok(0) | Err(_) => {
                        self.close();
                        return None;
                    }
                    Ok(n) => self.buffered.extend_from_slice(&temp[..n]),
                },
            }
        }
    }

    /// Whether the whole request body is already in the buffer.
    fn body_buffered(&self) -> bool {
        match self.head.body_framing() {
            BodyFraming::Empty => true,
            BodyFraming::Length(len) => self.buffered.len() as u64 >= len,
            BodyFraming::Chunked | BodyFraming::UntilClose => false,
        }
    }

    /// Streams the request body to the upstream.
    pub async fn forward_body<W>(&mut self, upstream: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let framing = self.head.body_framing();

        if framing != BodyFraming::Empty && self.head.headers.has_token("Expect", "100-continue") {
            self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            self.stream.flush().await?;
        }

        let n = copy_body(framing, &mut *self.stream, &mut *self.buffered, upstream).await?;
        self.body_consumed = true;
        Ok(n)
    }

    /// Writes a response generated by the proxy.
    ///
    /// A short unread request body is drained first so the connection can
    /// stay open; any other unread body closes it.
    pub async fn respond(&mut self, response: Response) -> Result<()> {
        self.drain_short_body().await;

        let mut extra = self.extra_headers.clone();
        extra.set("Connection", self.connection_header());

        let mut writer = ResponseWriter::with_headers(&response, &extra);
        self.response_started = true;
        writer.write_to_stream(&mut *self.stream).await
    }

    /// Writes the head of a relayed response.
    pub async fn send_response_head(&mut self, head: &ResponseHead, framing: BodyFraming) -> Result<()> {
        let mut head = head.clone();
        head.headers.strip_hop_by_hop();

        if framing == BodyFraming::UntilClose {
            self.close();
        }
        if let Some(capture) = &mut self.capture {
            capture.head = Some(head.clone());
        }

        head.headers.merge(&self.extra_headers);
        head.headers.set("Connection", self.connection_header());

        self.response_started = true;
        self.stream.write_all(&head.encode()).await?;
        Ok(())
    }

    /// Streams a relayed response body to the client.
    pub async fn relay_body<R>(&mut self, framing: BodyFraming, upstream: &mut R, buffered: &mut BytesMut) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut sink = CaptureWriter {
            inner: &mut *self.stream,
            capture: self.capture.as_mut(),
        };
        let n = copy_body(framing, upstream, buffered, &mut sink).await?;

        if let Some(capture) = &mut self.capture {
            capture.complete = true;
        }
        Ok(n)
    }

    /// Replays a stored response.
    pub async fn replay(&mut self, head: &ResponseHead, body: &[u8]) -> Result<()> {
        let framing = head.body_framing(&self.head.method);
        self.send_response_head(head, framing).await?;
        if framing != BodyFraming::Empty {
            self.stream.write_all(body).await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    async fn drain_short_body(&mut self) {
        if self.body_consumed || !self.keep_alive {
            return;
        }
        if let BodyFraming::Length(len) = self.head.body_framing() {
            if len <= READ_AHEAD_LIMIT as u64 {
                let framing = BodyFraming::Length(len);
                if discard_body(framing, &mut *self.stream, &mut *self.buffered).await.is_ok() {
                    self.body_consumed = true;
                }
            }
        }
    }

    fn connection_header(&self) -> &'static str {
        if self.keep_alive() { "keep-alive" } else { "close" }
    }
}

/// Writer that copies what it writes into a [`Capture`].
struct CaptureWriter<'a, S> {
    inner: &'a mut S,
    capture: Option<&'a mut Capture>,
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CaptureWriter<'_, S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut *this.inner).poll_write(cx, buf);
        if let (Poll::Ready(Ok(n)), Some(capture)) = (&poll, this.capture.as_deref_mut()) {
            capture.record(&buf[..*n]);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::parse_request_head;
    use crate::http::response::StatusCode;

    fn head(raw: &[u8]) -> RequestHead {
        parse_request_head(raw).unwrap().0
    }

    #[tokio::test]
    async fn respond_closes_when_body_left_unread() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut buffered = BytesMut::new();
        let request = head(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");

        let mut exchange = Exchange::new(request, Scheme::Http, &mut server, &mut buffered);
        exchange
            .respond(Response::text(StatusCode::BadRequest, "x"))
            .await
            .unwrap();
        assert!(!exchange.keep_alive());
        drop(exchange);
        drop(server);

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn respond_drains_short_body_and_keeps_alive() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut buffered = BytesMut::from(&b"ab"[..]);
        let request = head(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\n");
        client.write_all(b"c").await.unwrap();

        let mut exchange = Exchange::new(request, Scheme::Http, &mut server, &mut buffered);
        exchange.respond(Response::unroutable("a.test")).await.unwrap();
        assert!(exchange.keep_alive());
    }

    #[tokio::test]
    async fn forward_body_streams_buffered_and_pending_bytes() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut buffered = BytesMut::from(&b"hel"[..]);
        let request = head(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n");
        client.write_all(b"lo").await.unwrap();

        let mut exchange = Exchange::new(request, Scheme::Http, &mut server, &mut buffered);
        let mut upstream = Vec::new();
        exchange.forward_body(&mut upstream).await.unwrap();

        assert_eq!(upstream, b"hello");
        assert!(exchange.keep_alive());
    }

    #[tokio::test]
    async fn waiting_client_disconnect_abandons_admission() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut buffered = BytesMut::new();
        let request = head(b"POST / HTTP/1.1\r\nHost: a.test\r\nContent-Length: 10\r\n\r\n");

        let (_tx, rx) = tokio::sync::oneshot::channel::<Instant>();
        let admission = Admission::from_receiver(rx);
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let mut exchange = Exchange::new(request, Scheme::Http, &mut server, &mut buffered);
        assert!(exchange.wait_for_admission(admission).await.is_none());
        assert!(!exchange.keep_alive());
    }

    #[tokio::test]
    async fn half_closed_client_stays_queued() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut buffered = BytesMut::new();
        let request = head(b"POST / HTTP/1.1\r\nHost: a.test\r\nContent-Length: 3\r\n\r\n");

        let (tx, rx) = tokio::sync::oneshot::channel::<Instant>();
        let admission = Admission::from_receiver(rx);
        client.write_all(b"abc").await.unwrap();
        client.shutdown().await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = tx.send(Instant::now());
        });

        let mut exchange = Exchange::new(request, Scheme::Http, &mut server, &mut buffered);
        assert!(exchange.wait_for_admission(admission).await.is_some());
        assert!(!exchange.keep_alive());

        let mut upstream = Vec::new();
        exchange.forward_body(&mut upstream).await.unwrap();
        assert_eq!(upstream, b"abc");
    }

    #[tokio::test]
    async fn capture_keeps_relayed_body() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut buffered = BytesMut::new();
        let request = head(b"GET / HTTP/1.1\r\n\r\n");

        let mut exchange = Exchange::new(request, Scheme::Http, &mut server, &mut buffered);
        exchange.capture_response(16);

        let response_head = ResponseHead {
            version: "HTTP/1.1".to_string(),
            status: 200,
            reason: "OK".to_string(),
            headers: [("Content-Length", "5"), ("Connection", "close")].into_iter().collect(),
        };
        let framing = response_head.body_framing(&exchange.head().method);
        exchange.send_response_head(&response_head, framing).await.unwrap();

        let mut upstream: &[u8] = b"hello";
        let mut upstream_buffer = BytesMut::new();
        exchange
            .relay_body(framing, &mut upstream, &mut upstream_buffer)
            .await
            .unwrap();

        let capture = exchange.take_capture().unwrap();
        assert!(capture.complete);
        assert_eq!(capture.body, b"hello");
        assert!(capture.head.unwrap().headers.get("Connection").is_none());
        drop(exchange);
        drop(server);

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Connection: keep-alive\r\n"));
        assert!(out.ends_with("hello"));
    }
}
