use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::http::options::{CONTENT_LENGTH, Options};
use crate::http::parser::ResponseHead;
use crate::http::{Callbacks, writer};
use crate::ioda::Ioda;
use crate::stream::Stream;

/// Reason phrase used for codes missing from the table.
pub const UNKNOWN_CODE: &str = "UNKNOWN CODE";

macro_rules! status_codes {
    ($( $(#[$doc:meta])* $name:ident = $code:literal, $text:literal; )+) => {
        /// HTTP status codes with a fixed reason phrase.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode {
            $( $(#[$doc])* $name, )+
        }

        impl StatusCode {
            pub fn from_u16(code: u16) -> Option<Self> {
                match code {
                    $( $code => Some(StatusCode::$name), )+
                    _ => None,
                }
            }

            /// Returns the numeric HTTP status code.
            pub fn as_u16(&self) -> u16 {
                match self {
                    $( StatusCode::$name => $code, )+
                }
            }

            /// Returns the reason phrase written on the status line.
            pub fn reason_phrase(&self) -> &'static str {
                match self {
                    $( StatusCode::$name => $text, )+
                }
            }
        }
    };
}

status_codes! {
    Continue = 100, "CONTINUE";
    SwitchingProtocols = 101, "SWITCHING PROTOCOLS";
    Ok = 200, "OK";
    Created = 201, "CREATED";
    Accepted = 202, "ACCEPTED";
    NoContent = 204, "NO CONTENT";
    PartialContent = 206, "PARTIAL CONTENT";
    MovedPermanently = 301, "MOVED PERMANENTLY";
    Found = 302, "FOUND";
    NotModified = 304, "NOT MODIFIED";
    TemporaryRedirect = 307, "TEMPORARY REDIRECT";
    PermanentRedirect = 308, "PERMANENT REDIRECT";
    BadRequest = 400, "BAD REQUEST";
    NotAuthorized = 401, "NOT AUTHORIZED";
    Forbidden = 403, "FORBIDDEN";
    NotFound = 404, "NOT FOUND";
    MethodNotAllowed = 405, "METHOD NOT ALLOWED";
    RequestTimeout = 408, "REQUEST TIMEOUT";
    Conflict = 409, "CONFLICT";
    LengthRequired = 411, "LENGTH REQUIRED";
    PayloadTooLarge = 413, "PAYLOAD TOO LARGE";
    UriTooLong = 414, "URI TOO LONG";
    UnsupportedMediaType = 415, "UNSUPPORTED MEDIA TYPE";
    HeaderFieldsTooLarge = 431, "REQUEST HEADER FIELDS TOO LARGE";
    InternalServerError = 500, "INTERNAL SERVER ERROR";
    NotImplemented = 501, "NOT IMPLEMENTED";
    BadGateway = 502, "BAD GATEWAY";
    ServiceUnavailable = 503, "SERVICE UNAVAILABLE";
    VersionNotSupported = 505, "HTTP VERSION NOT SUPPORTED";
    /// Simulated on the client when the peer goes away mid-exchange.
    ClientDisconnected = 599, "CLIENT DISCONNECTED";
}

/// Reason phrase for any numeric code.
///
/// # Example
///
/// ```
/// # use httpagent::http::response::status_text;
/// assert_eq!(status_text(404), "NOT FOUND");
/// assert_eq!(status_text(299), "UNKNOWN CODE");
/// ```
pub fn status_text(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .map(|s| s.reason_phrase())
        .unwrap_or(UNKNOWN_CODE)
}

/// The response half of a [`Stream`].
///
/// On a server stream the request handler fills it in and calls
/// [`write`](Response::write). On a client stream the parser fills it in and
/// `on_end` fires once the whole body has arrived.
pub struct Response {
    stream: Weak<Stream>,
    head: Mutex<ResponseHead>,
    body: Mutex<Ioda>,
    callbacks: Callbacks<Response>,
    ended: AtomicBool,
}

impl Response {
    pub(crate) fn new(stream: Weak<Stream>, protocol: &str) -> Self {
        Self {
            stream,
            head: Mutex::new(ResponseHead {
                protocol: protocol.to_string(),
                code: 200,
                reason: String::new(),
                options: Options::new(),
            }),
            body: Mutex::new(Ioda::new()),
            callbacks: Callbacks::default(),
            ended: AtomicBool::new(false),
        }
    }

    pub fn stream(&self) -> Option<Arc<Stream>> {
        self.stream.upgrade()
    }

    pub fn code(&self) -> u16 {
        self.head.lock().code
    }

    /// Sets the status; the reason phrase reverts to the table entry.
    pub fn set_code(&self, code: u16) {
        let mut head = self.head.lock();
        head.code = code;
        head.reason.clear();
    }

    /// Reason phrase received on the status line, or the table entry.
    pub fn reason(&self) -> String {
        let head = self.head.lock();
        if head.reason.is_empty() {
            status_text(head.code).to_string()
        } else {
            head.reason.clone()
        }
    }

    pub fn protocol(&self) -> String {
        self.head.lock().protocol.clone()
    }

    pub fn options(&self) -> Options {
        self.head.lock().options.clone()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lock().options.locate(name).map(str::to_string)
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.head.lock().options.insert(name, value);
    }

    pub fn remove_header(&self, name: &str) -> Option<String> {
        self.head.lock().options.remove(name)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.head
            .lock()
            .options
            .locate(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn keep_alive(&self) -> bool {
        let head = self.head.lock();
        crate::http::keep_alive(&head.protocol, &head.options)
    }

    pub fn body(&self) -> Bytes {
        self.body.lock().to_contiguous()
    }

    pub fn body_len(&self) -> usize {
        self.body.lock().len()
    }

    pub fn set_body(&self, body: impl Into<Bytes>) {
        let mut ioda = self.body.lock();
        ioda.clear();
        ioda.append(body);
    }

    pub fn append_body(&self, chunk: impl Into<Bytes>) {
        self.body.lock().append(chunk);
    }

    pub fn on_ioda(&self, f: impl Fn(&Response, &Ioda) + Send + Sync + 'static) {
        self.callbacks.set_ioda(Arc::new(f));
    }

    pub fn on_end(&self, f: impl Fn(&Response) + Send + Sync + 'static) {
        self.callbacks.set_end(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(&Response, &str) + Send + Sync + 'static) {
        self.callbacks.set_error(Arc::new(f));
    }

    /// Queues the owning stream's response on its server connection.
    pub fn write(&self) -> Result<()> {
        let stream = self.stream().ok_or(Error::NotReady)?;
        stream.write()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Serialises the response. `head_only` drops the body bytes but keeps
    /// their Content-Length.
    pub(crate) fn encode(&self, head_only: bool) -> Ioda {
        let head = self.head.lock();
        let body = self.body.lock();
        writer::write_response(&head, &body, head_only)
    }

    pub(crate) fn apply(&self, head: ResponseHead) {
        *self.head.lock() = head;
    }

    pub(crate) fn push_body(&self, chunk: Ioda) {
        self.body.lock().append_ioda(chunk.clone());
        self.callbacks.ioda(self, &chunk);
    }

    pub(crate) fn error(&self, reason: &str) {
        if !self.is_ended() {
            self.callbacks.error(self, reason);
        }
    }

    pub(crate) fn end(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        self.callbacks.end(self);
        self.callbacks.clear();
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.head.lock();
        f.debug_struct("Response")
            .field("protocol", &head.protocol)
            .field("code", &head.code)
            .field("options", &head.options)
            .field("body_len", &self.body.lock().len())
            .finish()
    }
}
