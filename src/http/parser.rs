use crate::http::headers::Headers;
use crate::http::request::{Method, RequestHead};
use crate::http::response::ResponseHead;

/// Largest request or response head accepted, in bytes.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidStatus,
    HeadTooLarge,
    Incomplete,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ParseError::InvalidRequest => "invalid request line",
            ParseError::InvalidMethod => "invalid method token",
            ParseError::InvalidHeader => "malformed header line",
            ParseError::InvalidStatus => "invalid status line",
            ParseError::HeadTooLarge => "message head too large",
            ParseError::Incomplete => "incomplete message head",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Parses a request line and headers from the start of `buf`.
///
/// Returns the head and the number of bytes it occupied. Body bytes that
/// follow are left untouched for the caller to stream.
pub fn parse_request_head(buf: &[u8]) -> Result<(RequestHead, usize), ParseError> {
    let (head_str, consumed) = split_head(buf)?;
    let mut lines = head_str.split("\r\n");

    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let headers = parse_headers(lines)?;

    let request = RequestHead {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
    };

    Ok((request, consumed))
}

/// Parses a status line and headers from the start of `buf`.
pub fn parse_response_head(buf: &[u8]) -> Result<(ResponseHead, usize), ParseError> {
    let (head_str, consumed) = split_head(buf)?;
    let mut lines = head_str.split("\r\n");

    let status_line = lines.next().ok_or(ParseError::InvalidStatus)?;
    let mut parts = status_line.splitn(3, ' ');

    let version = parts.next().ok_or(ParseError::InvalidStatus)?;
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidStatus);
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or(ParseError::InvalidStatus)?;
    let reason = parts.next().unwrap_or("").trim().to_string();

    let headers = parse_headers(lines)?;

    let response = ResponseHead {
        version: version.to_string(),
        status,
        reason,
        headers,
    };

    Ok((response, consumed))
}

fn split_head(buf: &[u8]) -> Result<(&str, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_SIZE => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };

    if headers_end > MAX_HEAD_SIZE {
        return Err(ParseError::HeadTooLarge);
    }

    let head_str =
        std::str::from_utf8(&buf[..headers_end]).map_err(|_| ParseError::InvalidRequest)?;

    Ok((head_str, headers_end + 4))
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Headers, ParseError> {
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    Ok(headers)
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_request_head(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.header("host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn body_bytes_are_not_consumed() {
        let req = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";

        let (parsed, consumed) = parse_request_head(req).unwrap();

        assert_eq!(parsed.content_length(), 5);
        assert_eq!(&req[consumed..], b"hello");
    }

    #[test]
    fn parse_status_line_with_multiword_reason() {
        let resp = b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";

        let (head, consumed) = parse_response_head(resp).unwrap();

        assert_eq!(head.status, 404);
        assert_eq!(head.reason, "Not Found");
        assert_eq!(consumed, resp.len());
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut req = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        req.extend(std::iter::repeat_n(b'a', MAX_HEAD_SIZE + 1));

        assert_eq!(
            parse_request_head(&req).unwrap_err(),
            ParseError::HeadTooLarge
        );
    }
}
