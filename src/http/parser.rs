//! Callback-driven HTTP/1.x request parser built on [`httparse`].
//!
//! [`HttpParser`] is a push parser: the connection feeds it whatever bytes
//! arrived from the transport, and it reports protocol events through
//! [`ParserCallbacks`] synchronously, before [`HttpParser::feed`] returns.
//! For each message the events arrive in this order:
//!
//! ```text
//! on_request_line → on_header* → on_headers_complete → on_body_chunk* → on_message_complete
//! ```
//!
//! Bodies are delimited by `Content-Length` only. Chunked transfer coding is
//! not supported and is rejected as a parse error.

use bytes::{Buf, BytesMut};
use thiserror::Error;

use super::{Method, Version};

/// Maximum number of headers accepted per request.
const MAX_HEADERS: usize = 64;

/// Maximum size of a request head (request line plus headers) we will buffer.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Errors raised while parsing a request stream.
///
/// A parse error leaves the stream in an unknown position, so the parser
/// refuses further input after reporting one.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("HTTP parse error: {0}")]
    Syntax(#[from] httparse::Error),

    #[error("request head exceeds maximum allowed size of {max_bytes} bytes")]
    HeadTooLarge { max_bytes: usize },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("unsupported HTTP version 1.{minor}")]
    UnsupportedVersion { minor: u8 },

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    #[error("Transfer-Encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("parser already failed on earlier input")]
    Failed,
}

/// The request line of a message, reported before its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    /// The raw request target, including any query string.
    pub target: String,
    pub version: Version,
}

/// Receiver of parser events.
///
/// Implementations run inside [`HttpParser::feed`] and must not block.
pub trait ParserCallbacks {
    /// A request line was parsed. Called once per message, before any header.
    fn on_request_line(&mut self, _line: RequestLine) {}

    /// One header line was parsed.
    fn on_header(&mut self, name: &str, value: &[u8]);

    /// All headers of the current message have been parsed.
    fn on_headers_complete(&mut self);

    /// A slice of the current message body arrived.
    fn on_body_chunk(&mut self, chunk: &[u8]);

    /// The current message, including its body, is complete.
    fn on_message_complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Head,
    Body { remaining: usize },
    Failed,
}

/// Incremental HTTP/1.x request parser.
///
/// # Examples
///
/// ```
/// use webcontainer::http::{HttpParser, ParserCallbacks};
///
/// #[derive(Default)]
/// struct Count { headers: usize, messages: usize }
///
/// impl ParserCallbacks for Count {
///     fn on_header(&mut self, _: &str, _: &[u8]) { self.headers += 1; }
///     fn on_headers_complete(&mut self) {}
///     fn on_body_chunk(&mut self, _: &[u8]) {}
///     fn on_message_complete(&mut self) { self.messages += 1; }
/// }
///
/// let mut parser = HttpParser::new();
/// let mut count = Count::default();
/// parser.feed(b"GET / HTTP/1.1\r\nHost: x\r\n", &mut count).unwrap();
/// parser.feed(b"\r\n", &mut count).unwrap();
/// assert_eq!((count.headers, count.messages), (1, 1));
/// ```
#[derive(Debug)]
pub struct HttpParser {
    state: ParseState,
    buffer: BytesMut,
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Head,
            buffer: BytesMut::new(),
        }
    }

    /// Feeds `data` into the parser, invoking `callbacks` for every event it
    /// completes. Bytes that do not yet form a full event are kept for the
    /// next call.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the stream is malformed. The parser is
    /// unusable afterwards and every further call returns [`ParseError::Failed`].
    pub fn feed<C>(&mut self, data: &[u8], callbacks: &mut C) -> Result<(), ParseError>
    where
        C: ParserCallbacks + ?Sized,
    {
        if self.state == ParseState::Failed {
            return Err(ParseError::Failed);
        }
        self.buffer.extend_from_slice(data);

        loop {
            match self.state {
                ParseState::Head => match self.parse_head(callbacks) {
                    Ok(Some(0)) => {
                        callbacks.on_message_complete();
                    }
                    Ok(Some(content_length)) => {
                        self.state = ParseState::Body {
                            remaining: content_length,
                        };
                    }
                    Ok(None) => return Ok(()),
                    Err(e) => {
                        self.state = ParseState::Failed;
                        self.buffer.clear();
                        return Err(e);
                    }
                },
                ParseState::Body { remaining } => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    let n = remaining.min(self.buffer.len());
                    callbacks.on_body_chunk(&self.buffer[..n]);
                    self.buffer.advance(n);

                    if n == remaining {
                        self.state = ParseState::Head;
                        callbacks.on_message_complete();
                    } else {
                        self.state = ParseState::Body {
                            remaining: remaining - n,
                        };
                        return Ok(());
                    }
                }
                ParseState::Failed => return Err(ParseError::Failed),
            }
        }
    }

    // Parses one request head out of the buffer. Returns the body length once
    // the head is complete, or `None` if more bytes are needed.
    fn parse_head<C>(&mut self, callbacks: &mut C) -> Result<Option<usize>, ParseError>
    where
        C: ParserCallbacks + ?Sized,
    {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let head_len = match raw_req.parse(&self.buffer)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => {
                if self.buffer.len() > MAX_HEAD_SIZE {
                    return Err(ParseError::HeadTooLarge {
                        max_bytes: MAX_HEAD_SIZE,
                    });
                }
                return Ok(None);
            }
        };

        let method: Method = raw_req
            .method
            .ok_or(ParseError::MissingField { field: "method" })?
            .parse()
            .unwrap_or_else(|never| match never {});
        let target = raw_req
            .path
            .ok_or(ParseError::MissingField { field: "path" })?
            .to_owned();
        let minor = raw_req
            .version
            .ok_or(ParseError::MissingField { field: "version" })?;
        let version = Version::from_minor(minor).ok_or(ParseError::UnsupportedVersion { minor })?;

        let mut content_length = 0;
        for header in raw_req.headers.iter() {
            if header.name.eq_ignore_ascii_case("transfer-encoding") {
                return Err(ParseError::UnsupportedTransferEncoding);
            }
            if header.name.eq_ignore_ascii_case("content-length") {
                content_length = parse_content_length(header.value)?;
            }
        }

        callbacks.on_request_line(RequestLine {
            method,
            target,
            version,
        });
        for header in raw_req.headers.iter() {
            callbacks.on_header(header.name, header.value);
        }
        callbacks.on_headers_complete();

        self.buffer.advance(head_len);
        Ok(Some(content_length))
    }
}

fn parse_content_length(value: &[u8]) -> Result<usize, ParseError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or(ParseError::InvalidContentLength)
}
