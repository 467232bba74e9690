use crate::http::body::BodyFraming;
use crate::http::headers::Headers;
use crate::http::request::Method;

/// Status codes of responses generated by the proxy itself.
///
/// Upstream responses are relayed with their own numeric status and reason
/// phrase (see [`ResponseHead`]); this enum only covers what the proxy
/// answers on its own:
/// - `Ok` (200): CORS preflight
/// - `BadRequest` (400): Malformed request head
/// - `InternalServerError` (500): No route for the requested host
/// - `BadGateway` (502): Upstream unreachable or misbehaving
/// - `GatewayTimeout` (504): Upstream did not answer in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 500 Internal Server Error
    InternalServerError,
    /// 502 Bad Gateway
    BadGateway,
    /// 504 Gateway Timeout
    GatewayTimeout,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use tollgate::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::BadGateway.as_u16(), 502);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::InternalServerError => 500,
            StatusCode::BadGateway => 502,
            StatusCode::GatewayTimeout => 504,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::GatewayTimeout => "Gateway Timeout",
        }
    }
}

/// A complete response generated by the proxy.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// HTTP headers
    pub headers: Headers,
    /// Response body as bytes
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::BadGateway)
///     .header("Content-Type", "text/plain")
///     .body(b"upstream refused connection".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the final Response.
    ///
    /// Adds the Content-Length header based on body size if not already present.
    pub fn build(mut self) -> Response {
        if !self.headers.contains("Content-Length") {
            self.headers
                .set("Content-Length", self.body.len().to_string());
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// A `text/plain` response with the given status and body.
    pub fn text(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .body(body)
            .build()
    }

    /// The answer for a host no site and no default interval covers.
    pub fn unroutable(host: &str) -> Self {
        Self::text(
            StatusCode::InternalServerError,
            format!("Proxy has not been configured for host: {host}"),
        )
    }

    pub fn bad_request() -> Self {
        Self::text(StatusCode::BadRequest, "400 Bad Request")
    }

    pub fn bad_gateway() -> Self {
        Self::text(
            StatusCode::BadGateway,
            "502 Bad Gateway\r\n\r\nFailed to forward request to upstream server.",
        )
    }

    pub fn gateway_timeout() -> Self {
        Self::text(
            StatusCode::GatewayTimeout,
            "504 Gateway Timeout\r\n\r\nThe upstream server did not respond in time.",
        )
    }
}

/// Status line and headers of an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    /// How the body following this head is delimited.
    ///
    /// `request_method` matters because responses to HEAD never carry a body
    /// whatever their headers announce.
    pub fn body_framing(&self, request_method: &Method) -> BodyFraming {
        if *request_method == Method::HEAD
            || (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
        {
            return BodyFraming::Empty;
        }

        if self.headers.has_token("Transfer-Encoding", "chunked") {
            return BodyFraming::Chunked;
        }

        match self
            .headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(0) => BodyFraming::Empty,
            Some(n) => BodyFraming::Length(n),
            None => BodyFraming::UntilClose,
        }
    }

    /// Serializes the status line and headers, including the blank line.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes(),
        );
        self.headers.write_to(&mut buf);
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(status: u16, headers: &[(&str, &str)]) -> ResponseHead {
        ResponseHead {
            version: "HTTP/1.1".to_string(),
            status,
            reason: "X".to_string(),
            headers: headers.iter().copied().collect(),
        }
    }

    #[test]
    fn framing_follows_headers() {
        assert_eq!(
            head(200, &[("Content-Length", "12")]).body_framing(&Method::GET),
            BodyFraming::Length(12)
        );
        assert_eq!(
            head(200, &[("Transfer-Encoding", "chunked")]).body_framing(&Method::GET),
            BodyFraming::Chunked
        );
        assert_eq!(head(200, &[]).body_framing(&Method::GET), BodyFraming::UntilClose);
    }

    #[test]
    fn framing_is_empty_for_head_and_bodyless_statuses() {
        let with_length = head(200, &[("Content-Length", "12")]);
        assert_eq!(with_length.body_framing(&Method::HEAD), BodyFraming::Empty);
        assert_eq!(head(204, &[]).body_framing(&Method::GET), BodyFraming::Empty);
        assert_eq!(head(304, &[]).body_framing(&Method::GET), BodyFraming::Empty);
    }

    #[test]
    fn unroutable_body_names_the_host() {
        let response = Response::unroutable("a.test");
        assert_eq!(response.status.as_u16(), 500);
        assert_eq!(response.headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(
            response.body,
            b"Proxy has not been configured for host: a.test".to_vec()
        );
    }
}
