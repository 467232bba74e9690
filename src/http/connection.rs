use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::http::headers::Headers;
use crate::http::parser::{MAX_HEAD_SIZE, ParseError, parse_request_head};
use crate::http::request::RequestHead;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::routing::Scheme;
use crate::server::Gateway;

pub struct Connection<S> {
    stream: S,
    /// Bytes read but not yet consumed, including pipelined requests.
    buffer: BytesMut,
    state: ConnectionState,
    scheme: Scheme,
    gateway: Arc<Gateway>,
}

pub enum ConnectionState {
    Reading,
    Routing(RequestHead),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, scheme: Scheme, gateway: Arc<Gateway>) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Reading,
            scheme,
            gateway,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Reading => {
                    self.state = match self.read_request().await? {
                        Ok(Some(head)) => ConnectionState::Routing(head),
                        Ok(None) => ConnectionState::Closed,
                        Err(e) => {
                            tracing::debug!(error = %e, "Malformed request");
                            let close: Headers = [("Connection", "close")].into_iter().collect();
                            ConnectionState::Writing(ResponseWriter::with_headers(&Response::bad_request(), &close), false)
                        }
                    };
                }

                ConnectionState::Routing(head) => {
                    let keep_alive = self
                        .gateway
                        .serve(head, self.scheme, &mut self.stream, &mut self.buffer)
                        .await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading; // go back for next request
                    }
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        self.state = ConnectionState::Reading;
                    }
                }

                ConnectionState::Closed => {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Reads the next request head.
    ///
    /// `Ok(None)` means the client closed the connection between requests.
    pub async fn read_request(&mut self) -> anyhow::Result<Result<Option<RequestHead>, ParseError>> {
        loop {
            // Try parsing whatever we already have
            match parse_request_head(&self.buffer) {
                Ok((head, consumed)) => {
                    self.buffer.advance(consumed);
                    return Ok(Ok(Some(head)));
                }

                Err(ParseError::Incomplete) => {
                    if self.buffer.len() > MAX_HEAD_SIZE {
                        return Ok(Err(ParseError::HeadTooLarge));
                    }
                }

                Err(e) => return Ok(Err(e)),
            }

            self.buffer.reserve(4096);
            let n = self.stream.read_buf(&mut self.buffer).await?;

            if n == 0 {
                // Client closed connection
                return Ok(Ok(None));
            }
        }
    }
}
