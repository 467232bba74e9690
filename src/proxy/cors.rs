use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::exchange::Exchange;
use crate::http::request::{Method, RequestHead};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Permissive CORS layer.
///
/// Every response gets a wildcard origin; `OPTIONS` preflights are answered
/// by the proxy and never reach an upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cors;

impl Cors {
    pub const ALLOW_ORIGIN: &'static str = "*";
    pub const ALLOW_METHODS: &'static str = "OPTIONS, GET";

    /// Adds the CORS headers to every response of `exchange`.
    pub fn decorate<S>(&self, exchange: &mut Exchange<'_, S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        exchange.add_response_header("Access-Control-Allow-Origin", Self::ALLOW_ORIGIN);
        exchange.add_response_header("Access-Control-Request-Method", "GET");
    }

    pub fn is_preflight(&self, head: &RequestHead) -> bool {
        head.method == Method::OPTIONS
    }

    /// The local answer to a preflight request.
    pub fn preflight(&self, head: &RequestHead) -> Response {
        let mut builder = ResponseBuilder::new(StatusCode::Ok)
            .header("Access-Control-Allow-Methods", Self::ALLOW_METHODS);

        if let Some(requested) = head.header("Access-Control-Request-Headers") {
            builder = builder.header("Access-Control-Allow-Headers", requested);
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::RequestBuilder;

    #[test]
    fn preflight_echoes_requested_headers() {
        let head = RequestBuilder::new()
            .method(Method::OPTIONS)
            .path("/items")
            .header("Access-Control-Request-Headers", "x-token, content-type")
            .build()
            .unwrap();

        assert!(Cors.is_preflight(&head));
        let response = Cors.preflight(&head);
        assert_eq!(response.status, StatusCode::Ok);
        assert_eq!(response.headers.get("Access-Control-Allow-Methods"), Some("OPTIONS, GET"));
        assert_eq!(
            response.headers.get("Access-Control-Allow-Headers"),
            Some("x-token, content-type")
        );
        assert_eq!(response.headers.get("Content-Length"), Some("0"));
    }

    #[test]
    fn get_is_not_a_preflight() {
        let head = RequestBuilder::new().method(Method::GET).path("/").build().unwrap();
        assert!(!Cors.is_preflight(&head));
    }
}
