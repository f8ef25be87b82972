use bytes::{BufMut, BytesMut};

use crate::http::options::{CONTENT_LENGTH, Options};
use crate::http::parser::{RequestHead, ResponseHead};
use crate::http::response::status_text;
use crate::ioda::Ioda;

fn put_options(buf: &mut BytesMut, options: &Options) {
    for (name, value) in options.iter() {
        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            continue;
        }
        buf.put_slice(name.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
}

fn put_content_length(buf: &mut BytesMut, length: impl std::fmt::Display) {
    buf.put_slice(format!("{CONTENT_LENGTH}: {length}\r\n").as_bytes());
}

/// Serialises a request.
///
/// A user-supplied Content-Length is dropped; one is computed when the body
/// is non-empty.
pub fn write_request(head: &RequestHead, body: &Ioda) -> Ioda {
    let mut buf = BytesMut::with_capacity(256);

    // Request line
    buf.put_slice(
        format!("{} {} {}\r\n", head.method.as_str(), head.path, head.protocol).as_bytes(),
    );

    put_options(&mut buf, &head.options);
    if !body.is_empty() {
        put_content_length(&mut buf, body.len());
    }

    // Header/body separator
    buf.put_slice(b"\r\n");

    let mut out = Ioda::from(buf.freeze());
    out.append_ioda(body.clone());
    out
}

/// Serialises a response.
///
/// Content-Length always appears: the body length when there is a body,
/// otherwise the user's value or 0. With `head_only` the body is left out.
pub fn write_response(head: &ResponseHead, body: &Ioda, head_only: bool) -> Ioda {
    let mut buf = BytesMut::with_capacity(256);

    // Status line
    buf.put_slice(
        format!("{} {} {}\r\n", head.protocol, head.code, status_text(head.code)).as_bytes(),
    );

    put_options(&mut buf, &head.options);
    match head.options.locate(CONTENT_LENGTH) {
        Some(declared) if body.is_empty() => put_content_length(&mut buf, declared.trim()),
        _ => put_content_length(&mut buf, body.len()),
    }

    buf.put_slice(b"\r\n");

    let mut out = Ioda::from(buf.freeze());
    if !head_only {
        out.append_ioda(body.clone());
    }
    out
}

/// Status-line-only response used for rejections.
pub fn write_reject(protocol: &str, code: u16) -> Ioda {
    Ioda::from(
        format!("{protocol} {code} {}\r\n\r\n", status_text(code)).into_bytes(),
    )
}
