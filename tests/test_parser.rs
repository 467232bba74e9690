use tollgate::http::body::BodyFraming;
use tollgate::http::parser::{ParseError, parse_request_head, parse_response_head};
use tollgate::http::request::Method;

#[test]
fn test_parse_simple_get_request() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, consumed) = parse_request_head(req).unwrap();

    assert_eq!(parsed.method, Method::GET);
    assert_eq!(parsed.path, "/");
    assert_eq!(parsed.version, "HTTP/1.1");
    assert_eq!(parsed.headers.get("Host").unwrap(), "example.com");
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_leaves_body_unread() {
    let req = b"POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello";
    let (parsed, consumed) = parse_request_head(req).unwrap();

    assert_eq!(parsed.method, Method::POST);
    assert_eq!(parsed.body_framing(), BodyFraming::Length(5));
    assert_eq!(&req[consumed..], b"hello");
}

#[test]
fn test_parse_multiple_headers() {
    let req = b"GET /path HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test-client\r\nAccept: */*\r\n\r\n";
    let (parsed, _) = parse_request_head(req).unwrap();

    assert_eq!(parsed.headers.get("host").unwrap(), "example.com");
    assert_eq!(parsed.headers.get("User-Agent").unwrap(), "test-client");
    assert_eq!(parsed.headers.get("Accept").unwrap(), "*/*");
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let req = b"GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (parsed, _) = parse_request_head(req).unwrap();

    assert_eq!(parsed.path, "/search?q=rust");
}

#[test]
fn test_parse_incomplete_request_missing_blank_line() {
    let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
    assert!(matches!(parse_request_head(req), Err(ParseError::Incomplete)));
}

#[test]
fn test_parse_extension_method() {
    let req = b"PROPFIND /dav HTTP/1.1\r\n\r\n";
    let (parsed, _) = parse_request_head(req).unwrap();
    assert_eq!(parsed.method, Method::Other("PROPFIND".to_string()));
    assert_eq!(parsed.method.to_string(), "PROPFIND");
}

#[test]
fn test_parse_invalid_method_token() {
    let req = b"GE(T /pot HTTP/1.1\r\n\r\n";
    assert!(matches!(parse_request_head(req), Err(ParseError::InvalidMethod)));
}

#[test]
fn test_parse_malformed_header_line() {
    let req = b"GET / HTTP/1.1\r\nno-colon-here\r\n\r\n";
    assert!(matches!(parse_request_head(req), Err(ParseError::InvalidHeader)));
}

#[test]
fn test_parse_oversized_head() {
    let mut req = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
    req.extend(std::iter::repeat_n(b'a', 70 * 1024));
    assert!(matches!(parse_request_head(&req), Err(ParseError::HeadTooLarge)));
}

#[test]
fn test_parse_response_head() {
    let resp = b"HTTP/1.1 404 Not Found\r\nContent-Length: 3\r\n\r\nnop";
    let (head, consumed) = parse_response_head(resp).unwrap();

    assert_eq!(head.status, 404);
    assert_eq!(head.reason, "Not Found");
    assert_eq!(head.body_framing(&Method::GET), BodyFraming::Length(3));
    assert_eq!(&resp[consumed..], b"nop");
}

#[test]
fn test_parse_response_invalid_status() {
    let resp = b"HTTP/1.1 abc Weird\r\n\r\n";
    assert!(matches!(parse_response_head(resp), Err(ParseError::InvalidStatus)));
}
