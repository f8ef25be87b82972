use crate::http::options::{CONTENT_LENGTH, Options};
use crate::http::request::Method;
use crate::ioda::Ioda;

/// Malformed or unacceptable message.
///
/// Every variant maps to the status a server answers with; see
/// [`ParseError::status`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid start line")]
    StartLine,
    #[error("unsupported method `{0}`")]
    Method(String),
    #[error("invalid status code")]
    Status,
    #[error("invalid header line")]
    Header,
    #[error("obsolete header line folding")]
    ObsFold,
    #[error("invalid Content-Length")]
    ContentLength,
    #[error("negative Content-Length")]
    NegativeLength,
    #[error("body not allowed on {0:?}")]
    BodyNotAllowed(Method),
    #[error("Content-Length required")]
    LengthRequired,
    /// Declared body of the given size exceeds the limit. The header block
    /// has already been consumed.
    #[error("body of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("header block exceeds {0} bytes")]
    HeaderTooLarge(usize),
}

impl ParseError {
    /// Status code a server rejects the message with.
    pub fn status(&self) -> u16 {
        match self {
            ParseError::StartLine
            | ParseError::Status
            | ParseError::Header
            | ParseError::ObsFold
            | ParseError::ContentLength
            | ParseError::BodyNotAllowed(_) => 400,
            ParseError::Method(_) => 501,
            ParseError::LengthRequired => 411,
            ParseError::NegativeLength | ParseError::TooLarge(_) => 413,
            ParseError::HeaderTooLarge(_) => 431,
        }
    }
}

/// Size limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Largest header block, start line included.
    pub header: usize,
    /// Largest accepted body.
    pub body: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            header: 16 * 1024,
            body: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub path: String,
    pub protocol: String,
    pub options: Options,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub protocol: String,
    pub code: u16,
    pub reason: String,
    pub options: Options,
}

/// One step of parser output.
#[derive(Debug)]
pub enum Progress<H> {
    /// More bytes are needed; not an error.
    Incomplete,
    Head(H),
    Body(Ioda),
    /// The message is complete; the parser is ready for the next one.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Reset,
    Header,
    Body,
}

/// Incremental HTTP/1.x request parser.
#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    limits: Limits,
    remaining: usize,
}

impl RequestParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            state: ParseState::Reset,
            limits,
            remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ParseState::Reset;
        self.remaining = 0;
    }

    /// Advances one step over `input`, consuming what it parses.
    pub fn parse(&mut self, input: &mut Ioda) -> Result<Progress<RequestHead>, ParseError> {
        match self.state {
            ParseState::Reset => {
                skip_blank_lines(input);
                if input.is_empty() {
                    return Ok(Progress::Incomplete);
                }
                self.state = ParseState::Header;
                self.parse(input)
            }
            ParseState::Header => {
                let Some((block, consumed)) = header_block(input, self.limits.header)
                    .inspect_err(|_| self.reset())?
                else {
                    return Ok(Progress::Incomplete);
                };
                let head = match parse_request_head(&block) {
                    Ok(head) => head,
                    Err(e) => {
                        self.reset();
                        return Err(e);
                    }
                };
                match request_body_length(&head, self.limits.body) {
                    Ok(length) => {
                        input.discard(consumed);
                        self.remaining = length;
                        self.state = ParseState::Body;
                        Ok(Progress::Head(head))
                    }
                    Err(e) => {
                        self.reset();
                        if let ParseError::TooLarge(_) = e {
                            input.discard(consumed);
                        }
                        Err(e)
                    }
                }
            }
            ParseState::Body => Ok(body_step(&mut self.state, &mut self.remaining, input)),
        }
    }
}

/// Incremental HTTP/1.x response parser.
///
/// A response to HEAD ends with its header block, whatever Content-Length
/// says; so do 1xx, 204 and 304 responses. A response without
/// Content-Length has no body.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    limits: Limits,
    remaining: usize,
    head_request: bool,
}

impl ResponseParser {
    pub fn new(limits: Limits, head_request: bool) -> Self {
        Self {
            state: ParseState::Reset,
            limits,
            remaining: 0,
            head_request,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn parse(&mut self, input: &mut Ioda) -> Result<Progress<ResponseHead>, ParseError> {
        match self.state {
            ParseState::Reset => {
                skip_blank_lines(input);
                if input.is_empty() {
                    return Ok(Progress::Incomplete);
                }
                self.state = ParseState::Header;
                self.parse(input)
            }
            ParseState::Header => {
                let Some((block, consumed)) = header_block(input, self.limits.header)? else {
                    return Ok(Progress::Incomplete);
                };
                let head = parse_response_head(&block)?;
                let bodiless = self.head_request
                    || head.code < 200
                    || head.code == 204
                    || head.code == 304;
                let length = match content_length(&head.options)? {
                    _ if bodiless => 0,
                    None => 0,
                    Some(n) if n > self.limits.body => return Err(ParseError::TooLarge(n)),
                    Some(n) => n,
                };
                input.discard(consumed);
                self.remaining = length;
                self.state = ParseState::Body;
                Ok(Progress::Head(head))
            }
            ParseState::Body => Ok(body_step(&mut self.state, &mut self.remaining, input)),
        }
    }
}

fn body_step<H>(state: &mut ParseState, remaining: &mut usize, input: &mut Ioda) -> Progress<H> {
    if *remaining == 0 {
        *state = ParseState::Reset;
        return Progress::Complete;
    }
    if input.is_empty() {
        return Progress::Incomplete;
    }
    let chunk = input.split(*remaining);
    *remaining -= chunk.len();
    Progress::Body(chunk)
}

fn skip_blank_lines(input: &mut Ioda) {
    while let Some(b'\r' | b'\n') = input.first() {
        input.discard(1);
    }
}

/// Finds the empty line ending the header block.
///
/// Returns the block text without its terminator and the number of bytes to
/// consume, or `None` if the terminator has not arrived yet.
fn header_block(input: &Ioda, limit: usize) -> Result<Option<(String, usize)>, ParseError> {
    let view = input.peek(limit.saturating_add(4));
    match view.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => {
            let text = std::str::from_utf8(&view[..end]).map_err(|_| ParseError::Header)?;
            Ok(Some((text.to_string(), end + 4)))
        }
        None if input.len() >= limit => Err(ParseError::HeaderTooLarge(limit)),
        None => Ok(None),
    }
}

fn parse_request_head(block: &str) -> Result<RequestHead, ParseError> {
    let mut lines = block.split("\r\n");
    let start = lines.next().ok_or(ParseError::StartLine)?;

    let (method, rest) = start.split_once(' ').ok_or(ParseError::StartLine)?;
    let (path, protocol) = rest.split_once(' ').ok_or(ParseError::StartLine)?;
    if method.is_empty() || path.is_empty() || protocol.is_empty() {
        return Err(ParseError::StartLine);
    }
    if !protocol.starts_with("HTTP/") {
        return Err(ParseError::StartLine);
    }
    let method = Method::from_str(method).ok_or_else(|| ParseError::Method(method.to_string()))?;

    Ok(RequestHead {
        method,
        path: path.to_string(),
        protocol: protocol.to_string(),
        options: parse_header_lines(lines)?,
    })
}

fn parse_response_head(block: &str) -> Result<ResponseHead, ParseError> {
    let mut lines = block.split("\r\n");
    let start = lines.next().ok_or(ParseError::StartLine)?;

    let (protocol, rest) = start.split_once(' ').ok_or(ParseError::StartLine)?;
    if !protocol.starts_with("HTTP/") {
        return Err(ParseError::StartLine);
    }
    let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
    if code.len() != 3 {
        return Err(ParseError::Status);
    }
    let code: u16 = code.parse().map_err(|_| ParseError::Status)?;
    if !(100..=599).contains(&code) {
        return Err(ParseError::Status);
    }

    Ok(ResponseHead {
        protocol: protocol.to_string(),
        code,
        reason: reason.to_string(),
        options: parse_header_lines(lines)?,
    })
}

fn parse_header_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Options, ParseError> {
    let mut options = Options::new();
    for line in lines {
        if line.starts_with([' ', '\t']) {
            return Err(ParseError::ObsFold);
        }
        let (name, value) = line.split_once(':').ok_or(ParseError::Header)?;
        if name.is_empty() || name.contains([' ', '\t']) {
            return Err(ParseError::Header);
        }
        options.insert(name, value.trim_matches([' ', '\t']));
    }
    Ok(options)
}

fn content_length(options: &Options) -> Result<Option<usize>, ParseError> {
    let Some(value) = options.locate(CONTENT_LENGTH) else {
        return Ok(None);
    };
    let value = value.trim();
    if let Some(digits) = value.strip_prefix('-') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::NegativeLength);
        }
    }
    value
        .parse::<usize>()
        .map(Some)
        .map_err(|_| ParseError::ContentLength)
}

fn request_body_length(head: &RequestHead, limit: usize) -> Result<usize, ParseError> {
    match content_length(&head.options)? {
        Some(n) if n > limit => Err(ParseError::TooLarge(n)),
        Some(n) if n > 0 && !head.method.allows_body() => {
            Err(ParseError::BodyNotAllowed(head.method))
        }
        Some(n) => Ok(n),
        None if head.method.allows_body() => Err(ParseError::LengthRequired),
        None => Ok(0),
    }
}
