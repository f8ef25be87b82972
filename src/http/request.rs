use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::http::options::{CONTENT_LENGTH, Options};
use crate::http::parser::RequestHead;
use crate::http::{Callbacks, writer};
use crate::ioda::Ioda;
use crate::stream::Stream;

/// HTTP request methods.
///
/// Only POST and PUT may carry a body; a request line with any other token
/// is answered with 501.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// TRACE - Loop the request back
    TRACE,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use httpagent::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "HEAD" => Some(Method::HEAD),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "OPTIONS" => Some(Method::OPTIONS),
            "CONNECT" => Some(Method::CONNECT),
            "TRACE" => Some(Method::TRACE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }

    /// Whether a request with this method may carry a body.
    pub fn allows_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request half of a [`Stream`].
///
/// On a client stream the application fills it in and calls
/// [`write`](Request::write). On a server stream the parser fills it in and
/// the stream is handed to the listener's request handler once complete.
pub struct Request {
    stream: Weak<Stream>,
    head: Mutex<RequestHead>,
    body: Mutex<Ioda>,
    callbacks: Callbacks<Request>,
    ended: AtomicBool,
}

impl Request {
    pub(crate) fn new(stream: Weak<Stream>, protocol: &str, options: Options) -> Self {
        Self {
            stream,
            head: Mutex::new(RequestHead {
                method: Method::GET,
                path: "/".to_string(),
                protocol: protocol.to_string(),
                options,
            }),
            body: Mutex::new(Ioda::new()),
            callbacks: Callbacks::default(),
            ended: AtomicBool::new(false),
        }
    }

    /// The owning stream, while it is still mapped.
    pub fn stream(&self) -> Option<Arc<Stream>> {
        self.stream.upgrade()
    }

    pub fn method(&self) -> Method {
        self.head.lock().method
    }

    pub fn set_method(&self, method: Method) {
        self.head.lock().method = method;
    }

    pub fn path(&self) -> String {
        self.head.lock().path.clone()
    }

    pub fn set_path(&self, path: impl Into<String>) {
        self.head.lock().path = path.into();
    }

    pub fn protocol(&self) -> String {
        self.head.lock().protocol.clone()
    }

    pub fn set_protocol(&self, protocol: impl Into<String>) {
        self.head.lock().protocol = protocol.into();
    }

    /// Snapshot of the request headers.
    pub fn options(&self) -> Options {
        self.head.lock().options.clone()
    }

    /// Retrieves a header value by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lock().options.locate(name).map(str::to_string)
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.head.lock().options.insert(name, value);
    }

    pub fn remove_header(&self, name: &str) -> Option<String> {
        self.head.lock().options.remove(name)
    }

    /// The declared Content-Length, if present and numeric.
    pub fn content_length(&self) -> Option<usize> {
        self.head
            .lock()
            .options
            .locate(CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the connection should remain open after the response.
    pub fn keep_alive(&self) -> bool {
        let head = self.head.lock();
        crate::http::keep_alive(&head.protocol, &head.options)
    }

    /// Body received (server) or to be sent (client), joined.
    pub fn body(&self) -> Bytes {
        self.body.lock().to_contiguous()
    }

    pub fn body_len(&self) -> usize {
        self.body.lock().len()
    }

    /// Replaces the body.
    pub fn set_body(&self, body: impl Into<Bytes>) {
        let mut ioda = self.body.lock();
        ioda.clear();
        ioda.append(body);
    }

    pub fn append_body(&self, chunk: impl Into<Bytes>) {
        self.body.lock().append(chunk);
    }

    pub fn on_ioda(&self, f: impl Fn(&Request, &Ioda) + Send + Sync + 'static) {
        self.callbacks.set_ioda(Arc::new(f));
    }

    pub fn on_end(&self, f: impl Fn(&Request) + Send + Sync + 'static) {
        self.callbacks.set_end(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(&Request, &str) + Send + Sync + 'static) {
        self.callbacks.set_error(Arc::new(f));
    }

    /// Queues the owning stream on its client connection.
    ///
    /// Only the enqueue can fail synchronously; everything after arrives
    /// through the response callbacks.
    pub fn write(&self) -> Result<()> {
        let stream = self.stream().ok_or(Error::NotReady)?;
        stream.write()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Serialises the request for the wire.
    pub(crate) fn encode(&self) -> Ioda {
        let head = self.head.lock();
        let body = self.body.lock();
        writer::write_request(&head, &body)
    }

    pub(crate) fn apply(&self, head: RequestHead) {
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

    /// Finalises the request. Only the first call has any effect.
    pub(crate) fn end(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        self.callbacks.end(self);
        self.callbacks.clear();
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.head.lock();
        f.debug_struct("Request")
            .field("method", &head.method)
            .field("path", &head.path)
            .field("protocol", &head.protocol)
            .field("options", &head.options)
            .field("body_len", &self.body.lock().len())
            .finish()
    }
}
