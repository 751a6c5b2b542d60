//! Minimal HTTP/1.0 front end
//!
//! One request per connection, then close. Only enough of HTTP is parsed to
//! route a scrape: the request line is tokenized, header lines are read and
//! discarded up to the blank line, and the body (if any) is ignored.
//!
//! # Routes
//!
//! | request           | response                                  |
//! |-------------------|-------------------------------------------|
//! | `GET /`           | 200, static HTML page linking `/metrics`  |
//! | `GET /metrics`    | 200, metrics streamed as they are queried |
//! | `GET <other>`     | 404, static HTML page                     |
//! | other method      | 405 with `Allow: GET`                     |
//! | malformed request | 400                                       |
//!
//! The request line is validated before the method is looked at, so
//! `POST / HTTP/0.9` is a 400, not a 405.
//!
//! # Streaming and errors
//!
//! `/metrics` writes lines while the kernel is still being queried. The
//! status line is only sent together with the first body bytes, so a
//! collection that fails before producing output still gets a proper 500.
//! After that point a failure can only cut the body short.

use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::collector::run_collection;
use crate::netlink::{Connector, Nl80211Client};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const ROOT_PAGE: &str = "<html><head><title>Metrics exporter</title></head><body><ul><li><a href=\"/metrics\">metrics</a></li></ul></body></html>";

pub const NOT_FOUND_PAGE: &str = "<html><head><title>Document not found</title></head><body><h1>404 - Document not found</h1></body></html>";

pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Longest accepted request or header line, terminator included
pub const MAX_LINE_LEN: usize = 8192;

pub const MAX_HEADER_LINES: usize = 100;

/// Buffer between the formatter and the socket
const BODY_BUFFER_SIZE: usize = 8192;

// ============================================================================
// CONNECTION STATE
// ============================================================================

/// Lifecycle of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    HeaderRead,
    Dispatched,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::HeaderRead => "header-read",
            ConnectionState::Dispatched => "dispatched",
            ConnectionState::Closed => "closed",
        })
    }
}

/// Response status codes this server sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalServerError,
}

impl Status {
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::MethodNotAllowed => 405,
            Status::InternalServerError => 500,
        }
    }

    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

// ============================================================================
// REQUEST PARSING
// ============================================================================

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request line {0:?}")]
    Malformed(String),

    #[error("unsupported protocol version {0:?}")]
    UnsupportedVersion(String),

    #[error("request line or header longer than {} bytes", MAX_LINE_LEN)]
    LineTooLong,

    #[error("more than {} header lines", MAX_HEADER_LINES)]
    TooManyHeaders,

    #[error("reading request failed: {0}")]
    Io(#[from] io::Error),
}

/// Parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: String,
}

impl Request {
    /// Request target with any query string removed
    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }
}

/// Tokenize `METHOD TARGET HTTP/1.x`
///
/// # Errors
///
/// `Malformed` unless there are exactly three tokens, `UnsupportedVersion`
/// unless the version is `HTTP/1.` followed by one digit.
pub fn parse_request_line(line: &str) -> Result<Request, RequestError> {
    let mut tokens = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(RequestError::Malformed(line.to_owned()));
    };

    let minor = version.strip_prefix("HTTP/1.").unwrap_or_default();
    if minor.len() != 1 || !minor.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RequestError::UnsupportedVersion(version.to_owned()));
    }

    Ok(Request {
        method: method.to_owned(),
        target: target.to_owned(),
        version: version.to_owned(),
    })
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, RequestError> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') && buf.len() >= MAX_LINE_LEN {
        return Err(RequestError::LineTooLong);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Read the request line and discard headers up to the blank line
///
/// Returns `Ok(None)` when the peer closes before sending anything.
///
/// # Errors
///
/// Any `RequestError` except `Io` should be answered with 400.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<Option<Request>, RequestError> {
    let Some(line) = read_line(reader)? else {
        return Ok(None);
    };
    let request = parse_request_line(&line)?;

    let mut headers = 0;
    while let Some(header) = read_line(reader)? {
        if header.is_empty() {
            break;
        }
        headers += 1;
        if headers > MAX_HEADER_LINES {
            return Err(RequestError::TooManyHeaders);
        }
    }

    Ok(Some(request))
}

// ============================================================================
// RESPONSES
// ============================================================================

fn write_response<W: Write>(
    out: &mut W,
    status: Status,
    content_type: &str,
    extra_headers: &str,
    body: &str,
) -> io::Result<()> {
    write!(
        out,
        "HTTP/1.0 {} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
        status.code(),
        status.reason(),
        body.len(),
    )?;
    out.flush()
}

/// Body writer that sends the 200 status line with the first bytes
///
/// No `Content-Length` is sent; the body ends when the connection closes.
pub struct StreamingBody<W: Write> {
    inner: W,
    started: bool,
}

impl<W: Write> StreamingBody<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            started: false,
        }
    }

    /// Whether the status line has gone out
    #[must_use]
    pub fn started(&self) -> bool {
        self.started
    }

    fn start(&mut self) -> io::Result<()> {
        if !self.started {
            write!(
                self.inner,
                "HTTP/1.0 200 OK\r\nContent-Type: {METRICS_CONTENT_TYPE}\r\nConnection: close\r\n\r\n"
            )?;
            self.started = true;
        }
        Ok(())
    }

    /// Complete the response, sending headers for an empty body if needed
    ///
    /// # Errors
    ///
    /// Propagates write errors from the connection.
    pub fn finish(mut self) -> io::Result<()> {
        self.start()?;
        self.inner.flush()
    }
}

impl<W: Write> Write for StreamingBody<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.start()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ============================================================================
// CONNECTION HANDLER
// ============================================================================

struct Exchange {
    state: ConnectionState,
}

impl Exchange {
    fn advance(&mut self, next: ConnectionState) {
        debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
    }
}

/// Serve exactly one request on `stream`
///
/// Returns the status sent, or `None` when nothing was written.
pub fn handle_connection<S, C>(mut stream: S, client: &Nl80211Client<C>) -> Option<Status>
where
    S: Read + Write,
    C: Connector,
{
    let mut exchange = Exchange {
        state: ConnectionState::Accepted,
    };

    let parsed = {
        let mut reader = BufReader::new(&mut stream);
        read_request(&mut reader)
    };

    let status = match parsed {
        Ok(None) => {
            debug!("peer closed before sending a request");
            None
        }
        Err(RequestError::Io(e)) => {
            debug!(error = %e, "failed to read request");
            None
        }
        Err(e) => {
            debug!(error = %e, "rejecting request");
            send(&mut stream, Status::BadRequest, "text/plain", "", "Bad Request\n")
        }
        Ok(Some(request)) => {
            exchange.advance(ConnectionState::HeaderRead);
            if request.method != "GET" {
                debug!(method = %request.method, "method not allowed");
                send(
                    &mut stream,
                    Status::MethodNotAllowed,
                    "text/plain",
                    "Allow: GET\r\n",
                    "Method Not Allowed\n",
                )
            } else {
                exchange.advance(ConnectionState::Dispatched);
                debug!(path = %request.path(), "routing request");
                route(&mut stream, request.path(), client)
            }
        }
    };

    exchange.advance(ConnectionState::Closed);
    status
}

fn send<W: Write>(
    stream: &mut W,
    status: Status,
    content_type: &str,
    extra_headers: &str,
    body: &str,
) -> Option<Status> {
    match write_response(stream, status, content_type, extra_headers, body) {
        Ok(()) => Some(status),
        Err(e) => {
            debug!(error = %e, status = status.code(), "failed to write response");
            None
        }
    }
}

fn route<S, C>(stream: &mut S, path: &str, client: &Nl80211Client<C>) -> Option<Status>
where
    S: Write,
    C: Connector,
{
    match path {
        "/" => send(stream, Status::Ok, "text/html", "", ROOT_PAGE),
        "/metrics" => serve_metrics(stream, client),
        _ => send(stream, Status::NotFound, "text/html", "", NOT_FOUND_PAGE),
    }
}

fn serve_metrics<S, C>(stream: &mut S, client: &Nl80211Client<C>) -> Option<Status>
where
    S: Write,
    C: Connector,
{
    let mut body = BufWriter::with_capacity(BODY_BUFFER_SIZE, StreamingBody::new(&mut *stream));

    match run_collection(client, &mut body) {
        Ok(_) => match body.into_inner() {
            Ok(streaming) => match streaming.finish() {
                Ok(()) => Some(Status::Ok),
                Err(e) => {
                    debug!(error = %e, "client went away while finishing response");
                    None
                }
            },
            Err(e) => {
                debug!(error = %e.error(), "client went away during scrape");
                None
            }
        },
        Err(e) => {
            // Buffered lines are discarded, not flushed.
            let started = body.into_parts().0.started();
            if started {
                warn!(error = %e, "collection failed after streaming began, response truncated");
                None
            } else {
                error!(error = %e, "collection failed");
                send(
                    stream,
                    Status::InternalServerError,
                    "text/plain",
                    "",
                    &format!("metrics collection failed: {e}\n"),
                )
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
