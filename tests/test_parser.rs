use httpagent::http::parser::{Limits, ParseError, Progress, RequestParser, ResponseParser};
use httpagent::http::request::Method;
use httpagent::ioda::Ioda;

fn parse_request(raw: &str) -> Result<Progress<httpagent::http::parser::RequestHead>, ParseError> {
    let mut input = Ioda::from(raw.as_bytes().to_vec());
    RequestParser::new(Limits::default()).parse(&mut input)
}

#[test]
fn test_parse_simple_get_request() {
    let mut input = Ioda::from("GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
    let mut parser = RequestParser::new(Limits::default());

    let Ok(Progress::Head(head)) = parser.parse(&mut input) else {
        panic!("expected a head");
    };
    assert_eq!(head.method, Method::GET);
    assert_eq!(head.path, "/");
    assert_eq!(head.protocol, "HTTP/1.1");
    assert_eq!(head.options.locate("Host"), Some("example.com"));
    assert!(matches!(parser.parse(&mut input), Ok(Progress::Complete)));
    assert!(input.is_empty());
}

#[test]
fn test_parse_post_request_with_body() {
    let mut input = Ioda::from("POST /api HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello");
    let mut parser = RequestParser::new(Limits::default());

    assert!(matches!(parser.parse(&mut input), Ok(Progress::Head(_))));
    match parser.parse(&mut input) {
        Ok(Progress::Body(chunk)) => assert_eq!(&chunk.to_contiguous()[..], b"hello"),
        other => panic!("expected body, got {other:?}"),
    }
    assert!(matches!(parser.parse(&mut input), Ok(Progress::Complete)));
}

#[test]
fn test_parse_pipelined_requests() {
    let mut input = Ioda::from("GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
    let mut parser = RequestParser::new(Limits::default());
    let mut paths = Vec::new();
    while !input.is_empty() {
        if let Progress::Head(head) = parser.parse(&mut input).unwrap() {
            paths.push(head.path);
        }
    }
    assert_eq!(paths, vec!["/a", "/b"]);
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let Ok(Progress::Head(head)) = parse_request("GET /search?q=rust HTTP/1.1\r\nHost: example.com\r\n\r\n") else {
        panic!("expected a head");
    };
    assert_eq!(head.path, "/search?q=rust");
}

#[test]
fn test_parse_incomplete_request_missing_blank_line() {
    assert!(matches!(
        parse_request("GET / HTTP/1.1\r\nHost: example.com\r\n"),
        Ok(Progress::Incomplete)
    ));
}

#[test]
fn test_parse_start_line_without_target() {
    assert_eq!(parse_request("GET\r\n\r\n").unwrap_err(), ParseError::StartLine);
}

#[test]
fn test_parse_unknown_method_is_501() {
    let err = parse_request("BREW /pot HTTP/1.1\r\n\r\n").unwrap_err();
    assert_eq!(err, ParseError::Method("BREW".to_string()));
    assert_eq!(err.status(), 501);
}

#[test]
fn test_parse_malformed_header() {
    let err = parse_request("GET / HTTP/1.1\r\nBrokenHeader\r\n\r\n").unwrap_err();
    assert_eq!(err, ParseError::Header);
    assert_eq!(err.status(), 400);
}

#[test]
fn test_parse_folded_header_rejected() {
    let err = parse_request("GET / HTTP/1.1\r\nX-A: one\r\n two\r\n\r\n").unwrap_err();
    assert_eq!(err, ParseError::ObsFold);
}

#[test]
fn test_parse_empty_header_value_allowed() {
    let Ok(Progress::Head(head)) = parse_request("GET / HTTP/1.1\r\nX-Empty:\r\n\r\n") else {
        panic!("expected a head");
    };
    assert_eq!(head.options.locate("x-empty"), Some(""));
}

#[test]
fn test_parse_post_without_length_is_411() {
    let err = parse_request("POST /x HTTP/1.1\r\n\r\n").unwrap_err();
    assert_eq!(err, ParseError::LengthRequired);
    assert_eq!(err.status(), 411);
}

#[test]
fn test_parse_get_with_body_rejected() {
    let err = parse_request("GET / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc").unwrap_err();
    assert_eq!(err, ParseError::BodyNotAllowed(Method::GET));
    assert_eq!(err.status(), 400);
}

#[test]
fn test_parse_content_length_errors() {
    let negative = parse_request("PUT / HTTP/1.1\r\nContent-Length: -4\r\n\r\n").unwrap_err();
    assert_eq!(negative, ParseError::NegativeLength);
    assert_eq!(negative.status(), 413);

    let junk = parse_request("PUT / HTTP/1.1\r\nContent-Length: ten\r\n\r\n").unwrap_err();
    assert_eq!(junk, ParseError::ContentLength);
    assert_eq!(junk.status(), 400);
}

#[test]
fn test_parse_body_over_limit_is_413() {
    let err = parse_request("POST / HTTP/1.1\r\nContent-Length: 2000000\r\n\r\n").unwrap_err();
    assert_eq!(err, ParseError::TooLarge(2_000_000));
    assert_eq!(err.status(), 413);
}

#[test]
fn test_parse_header_over_limit_is_431() {
    let limits = Limits { header: 64, body: 1024 };
    let mut input = Ioda::from(format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(100)).into_bytes());
    let err = RequestParser::new(limits).parse(&mut input).unwrap_err();
    assert_eq!(err.status(), 431);
}

#[test]
fn test_parse_response_without_length_has_no_body() {
    let mut input = Ioda::from("HTTP/1.1 200 OK\r\n\r\nstray");
    let mut parser = ResponseParser::new(Limits::default(), false);
    assert!(matches!(parser.parse(&mut input), Ok(Progress::Head(_))));
    assert!(matches!(parser.parse(&mut input), Ok(Progress::Complete)));
    assert_eq!(&input.to_contiguous()[..], b"stray");
}

#[test]
fn test_parse_no_content_response_ignores_length() {
    let mut input = Ioda::from("HTTP/1.1 204 NO CONTENT\r\nContent-Length: 12\r\n\r\n");
    let mut parser = ResponseParser::new(Limits::default(), false);
    assert!(matches!(parser.parse(&mut input), Ok(Progress::Head(_))));
    assert!(matches!(parser.parse(&mut input), Ok(Progress::Complete)));
}

#[test]
fn test_parse_bad_status_code() {
    let mut input = Ioda::from("HTTP/1.1 20 OK\r\n\r\n");
    let mut parser = ResponseParser::new(Limits::default(), false);
    assert_eq!(parser.parse(&mut input).unwrap_err(), ParseError::Status);
}
