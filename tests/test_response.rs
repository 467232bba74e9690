use tollgate::http::headers::Headers;
use tollgate::http::response::{Response, ResponseBuilder, ResponseHead, StatusCode};
use tollgate::http::writer::ResponseWriter;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::InternalServerError.as_u16(), 500);
    assert_eq!(StatusCode::BadGateway.as_u16(), 502);
    assert_eq!(StatusCode::GatewayTimeout.as_u16(), 504);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::BadRequest.reason_phrase(), "Bad Request");
    assert_eq!(
        StatusCode::InternalServerError.reason_phrase(),
        "Internal Server Error"
    );
    assert_eq!(StatusCode::BadGateway.reason_phrase(), "Bad Gateway");
    assert_eq!(StatusCode::GatewayTimeout.reason_phrase(), "Gateway Timeout");
}

#[test]
fn test_response_builder_sets_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(b"Hello, World!".to_vec())
        .build();

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.headers.get("Content-Length"), Some("13"));
}

#[test]
fn test_response_builder_keeps_explicit_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "0")
        .body("ignored")
        .build();

    assert_eq!(response.headers.get("content-length"), Some("0"));
}

#[test]
fn test_unroutable_response() {
    let response = Response::unroutable("nowhere.test:81");
    assert_eq!(response.status, StatusCode::InternalServerError);
    assert_eq!(
        String::from_utf8(response.body).unwrap(),
        "Proxy has not been configured for host: nowhere.test:81"
    );
}

#[test]
fn test_writer_layers_extra_headers() {
    let extra: Headers = [("Access-Control-Allow-Origin", "*"), ("Connection", "close")]
        .into_iter()
        .collect();
    let writer = ResponseWriter::with_headers(&Response::bad_request(), &extra);
    let text = String::from_utf8_lossy(writer.as_bytes()).into_owned();

    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("\r\n\r\n400 Bad Request"));
}

#[test]
fn test_response_head_encode() {
    let head = ResponseHead {
        version: "HTTP/1.0".to_string(),
        status: 201,
        reason: "Created".to_string(),
        headers: [("Location", "/items/7")].into_iter().collect(),
    };

    assert_eq!(
        head.encode(),
        b"HTTP/1.1 201 Created\r\nLocation: /items/7\r\n\r\n".to_vec()
    );
}
