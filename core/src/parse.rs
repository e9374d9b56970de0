//! HTTP/1.1 response parser: status line, headers, then a body framed by
//! `Content-Length`, chunked transfer coding, or the peer closing the socket.
//!
//! # Design
//! All parse state lives in a [`ResponseParser`] created for one response
//! and dropped afterwards; nothing is kept on the transport between calls.
//! The parser pulls bounded lines from a [`LineReader`] and advances an
//! explicit [`ParseState`]. Any error leaves the parser in
//! [`ParseState::Failed`] and no partial response is ever returned.

use std::collections::BTreeMap;
use std::io::Read;
use std::mem;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpResponse, StatusLine};
use crate::reader::LineReader;

/// Upper bound for a status, header, chunk-size or trailer line.
const MAX_LINE: usize = 64 * 1024;
/// Read size used while draining a close-delimited body.
const DRAIN_STEP: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitingStatusLine,
    ParsingHeaders,
    ParsingFixedBody { remaining: usize },
    ParsingChunkedBody(ChunkPhase),
    /// Neither `Content-Length` nor `Transfer-Encoding: chunked`: the body
    /// ends when the peer closes the connection.
    ReadingUntilClose,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    Size,
    Data { remaining: usize },
    /// The CRLF that terminates a chunk's data.
    DataEnd,
    Trailers,
}

/// Per-response parser state.
#[derive(Debug)]
pub struct ResponseParser {
    head_request: bool,
    state: ParseState,
    status_line: Option<StatusLine>,
    headers: BTreeMap<String, String>,
    cookies: Option<BTreeMap<String, String>>,
    body: Vec<u8>,
}

impl ResponseParser {
    pub fn new(method: &HttpMethod) -> Self {
        Self {
            head_request: *method == HttpMethod::Head,
            state: ParseState::AwaitingStatusLine,
            status_line: None,
            headers: BTreeMap::new(),
            cookies: None,
            body: Vec::new(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Whether the body was delimited by the peer closing the connection.
    /// Such a connection cannot be reused.
    pub fn close_delimited(&self) -> bool {
        matches!(self.state, ParseState::ReadingUntilClose)
    }

    /// Drive the state machine until a complete response has been read.
    pub fn run<R: Read>(&mut self, reader: &mut LineReader<R>) -> Result<HttpResponse, TransportError> {
        let mut close_delimited = false;
        while self.state != ParseState::Done {
            close_delimited |= self.close_delimited();
            if let Err(err) = self.step(reader) {
                tracing::trace!(state = ?self.state, error = %err, "response parse failed");
                self.state = ParseState::Failed;
                return Err(err);
            }
        }
        if close_delimited {
            tracing::trace!("body ended at connection close");
        }
        self.finish()
    }

    fn step<R: Read>(&mut self, reader: &mut LineReader<R>) -> Result<(), TransportError> {
        match self.state {
            ParseState::AwaitingStatusLine => {
                let line = next_line(reader, MAX_LINE)?;
                if line.is_empty() {
                    return Err(TransportError::malformed("connection closed before a status line"));
                }
                let text = complete_line(&line, "status")?;
                // Blank lines ahead of the status line are noise, not the
                // header delimiter.
                if text.trim().is_empty() {
                    return Ok(());
                }
                let status_line = parse_status_line(text.trim())?;
                tracing::trace!(status = status_line.status, version = %status_line.version, "status line");
                self.status_line = Some(status_line);
                self.state = ParseState::ParsingHeaders;
            }
            ParseState::ParsingHeaders => {
                let line = next_line(reader, MAX_LINE)?;
                if line.is_empty() {
                    return Err(TransportError::malformed("connection closed inside the header block"));
                }
                let text = complete_line(&line, "header")?;
                if text.trim().is_empty() {
                    self.begin_body()?;
                } else {
                    self.record_header(text.trim())?;
                }
            }
            ParseState::ParsingFixedBody { remaining } => {
                let line = next_line(reader, remaining)?;
                if line.is_empty() {
                    return Err(TransportError::malformed(format!(
                        "connection closed with {remaining} body bytes outstanding"
                    )));
                }
                self.body.extend_from_slice(&line);
                let remaining = remaining - line.len();
                self.state = if remaining == 0 {
                    ParseState::Done
                } else {
                    ParseState::ParsingFixedBody { remaining }
                };
            }
            ParseState::ParsingChunkedBody(phase) => self.step_chunked(reader, phase)?,
            ParseState::ReadingUntilClose => {
                let data = next_line(reader, DRAIN_STEP)?;
                if data.is_empty() {
                    self.state = ParseState::Done;
                } else {
                    self.body.extend_from_slice(&data);
                }
            }
            ParseState::Done | ParseState::Failed => {}
        }
        Ok(())
    }

    fn step_chunked<R: Read>(
        &mut self,
        reader: &mut LineReader<R>,
        phase: ChunkPhase,
    ) -> Result<(), TransportError> {
        let next = match phase {
            ChunkPhase::Size => {
                let line = next_line(reader, MAX_LINE)?;
                if line.is_empty() {
                    return Err(TransportError::malformed("connection closed before a chunk size"));
                }
                let size = parse_chunk_size(complete_line(&line, "chunk size")?)?;
                tracing::trace!(size, "chunk");
                if size == 0 {
                    ChunkPhase::Trailers
                } else {
                    ChunkPhase::Data { remaining: size }
                }
            }
            ChunkPhase::Data { remaining } => {
                // Allow the terminator to arrive on the same read as the data.
                let line = next_line(reader, remaining.saturating_add(2))?;
                if line.is_empty() {
                    return Err(TransportError::malformed("connection closed inside a chunk"));
                }
                if line.len() <= remaining {
                    self.body.extend_from_slice(&line);
                    match remaining - line.len() {
                        0 => ChunkPhase::DataEnd,
                        left => ChunkPhase::Data { remaining: left },
                    }
                } else {
                    let (data, overrun) = line.split_at(remaining);
                    if !is_line_terminator(overrun) {
                        return Err(TransportError::malformed(
                            "chunk data runs past its declared size",
                        ));
                    }
                    self.body.extend_from_slice(data);
                    ChunkPhase::Size
                }
            }
            ChunkPhase::DataEnd => {
                let line = next_line(reader, 2)?;
                if !is_line_terminator(&line) {
                    return Err(TransportError::malformed("chunk data not followed by CRLF"));
                }
                ChunkPhase::Size
            }
            ChunkPhase::Trailers => {
                let line = next_line(reader, MAX_LINE)?;
                // Trailers are read and dropped; a peer that closes right
                // after the last chunk has still sent a complete body.
                if line.is_empty() || String::from_utf8_lossy(&line).trim().is_empty() {
                    self.state = ParseState::Done;
                    return Ok(());
                }
                ChunkPhase::Trailers
            }
        };
        self.state = ParseState::ParsingChunkedBody(next);
        Ok(())
    }

    fn record_header(&mut self, text: &str) -> Result<(), TransportError> {
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| TransportError::malformed(format!("header line without a colon: {text:?}")))?;
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(TransportError::malformed(format!("header line without a name: {text:?}")));
        }
        let value = value.trim();
        if name == "set-cookie" {
            let cookies = self.cookies.get_or_insert_with(BTreeMap::new);
            parse_cookies(value, cookies);
        }
        self.headers.insert(name, value.to_string());
        Ok(())
    }

    /// Called on the blank line ending a header block: pick the body framing.
    fn begin_body(&mut self) -> Result<(), TransportError> {
        let status = self.status_line.as_ref().map_or(0, |s| s.status);

        if (100..200).contains(&status) && status != 101 {
            tracing::trace!(status, "skipping interim response");
            self.status_line = None;
            self.headers.clear();
            self.cookies = None;
            self.state = ParseState::AwaitingStatusLine;
            return Ok(());
        }

        self.state = if self.head_request || (100..200).contains(&status) || status == 204 || status == 304 {
            ParseState::Done
        } else if let Some(coding) = self.headers.get("transfer-encoding") {
            if is_chunked(coding) {
                ParseState::ParsingChunkedBody(ChunkPhase::Size)
            } else {
                ParseState::ReadingUntilClose
            }
        } else if let Some(length) = self.headers.get("content-length") {
            match parse_content_length(length)? {
                0 => ParseState::Done,
                remaining => {
                    self.body.reserve(remaining.min(1 << 20));
                    ParseState::ParsingFixedBody { remaining }
                }
            }
        } else {
            ParseState::ReadingUntilClose
        };
        tracing::trace!(state = ?self.state, "header block complete");
        Ok(())
    }

    fn finish(&mut self) -> Result<HttpResponse, TransportError> {
        let status_line = self
            .status_line
            .take()
            .ok_or_else(|| TransportError::malformed("response finished without a status line"))?;
        Ok(HttpResponse {
            status_line,
            headers: mem::take(&mut self.headers),
            cookies: self.cookies.take(),
            body: mem::take(&mut self.body),
        })
    }
}

/// Parse one complete response for a request made with `method`.
pub fn read_response<R: Read>(
    reader: &mut LineReader<R>,
    method: &HttpMethod,
) -> Result<HttpResponse, TransportError> {
    ResponseParser::new(method).run(reader)
}

/// Read the next bounded line, enforcing the timeout and empty-read rules.
fn next_line<R: Read>(reader: &mut LineReader<R>, limit: usize) -> Result<Vec<u8>, TransportError> {
    if reader.timed_out() {
        return Err(TransportError::Timeout("connection timed out while reading".to_string()));
    }
    let line = reader.read_line(limit)?;
    if line.is_empty() && !reader.at_eof() {
        return Err(TransportError::malformed(
            "read returned no data before the end of the stream",
        ));
    }
    Ok(line)
}

/// A grammar line must end in `\n`; anything else was cut short by the
/// limit or by end of stream.
fn complete_line<'a>(line: &'a [u8], what: &str) -> Result<&'a str, TransportError> {
    if !line.ends_with(b"\n") {
        return Err(TransportError::malformed(format!("{what} line is truncated or too long")));
    }
    std::str::from_utf8(line)
        .map_err(|_| TransportError::malformed(format!("{what} line is not valid UTF-8")))
}

fn is_line_terminator(bytes: &[u8]) -> bool {
    bytes == b"\r\n" || bytes == b"\n"
}

/// `HTTP/<major>.<minor> <status>[ <reason>]`
pub fn parse_status_line(text: &str) -> Result<StatusLine, TransportError> {
    let malformed = || TransportError::malformed(format!("invalid status line: {text:?}"));

    let rest = text.strip_prefix("HTTP/").ok_or_else(malformed)?;
    let (version, rest) = rest
        .split_once(|c: char| c.is_ascii_whitespace())
        .ok_or_else(malformed)?;
    let valid_version = version
        .split_once('.')
        .is_some_and(|(major, minor)| is_digits(major) && is_digits(minor));
    if !valid_version {
        return Err(malformed());
    }

    let rest = rest.trim_start();
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return Err(malformed());
    }
    let (digits, tail) = rest.split_at(digits_end);
    if !tail.is_empty() && !tail.starts_with(|c: char| c.is_ascii_whitespace()) {
        return Err(malformed());
    }
    let status: u16 = digits.parse().map_err(|_| malformed())?;
    let reason = tail.trim();

    Ok(StatusLine {
        raw: text.to_string(),
        version: version.to_string(),
        status,
        reason: (!reason.is_empty()).then(|| reason.to_string()),
    })
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Hex size, optionally followed by `;extension` data which is ignored.
fn parse_chunk_size(text: &str) -> Result<usize, TransportError> {
    let text = text.trim_end_matches(['\r', '\n']);
    let size = text.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TransportError::malformed(format!("invalid chunk size: {text:?}")));
    }
    usize::from_str_radix(size, 16)
        .map_err(|_| TransportError::malformed(format!("chunk size out of range: {text:?}")))
}

fn parse_content_length(value: &str) -> Result<usize, TransportError> {
    let value = value.trim();
    if !is_digits(value) {
        return Err(TransportError::malformed(format!("invalid content-length: {value:?}")));
    }
    value
        .parse()
        .map_err(|_| TransportError::malformed(format!("content-length out of range: {value:?}")))
}

/// The final transfer coding decides the framing.
fn is_chunked(transfer_encoding: &str) -> bool {
    transfer_encoding
        .rsplit(',')
        .next()
        .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
}

/// `a=1; b=2; HttpOnly` into the cookie map. Pieces without `=` map to an
/// empty value.
fn parse_cookies(value: &str, cookies: &mut BTreeMap<String, String>) {
    for piece in value.split(';') {
        let (name, val) = piece.split_once('=').unwrap_or((piece, ""));
        let name = name.trim();
        if !name.is_empty() {
            cookies.insert(name.to_string(), val.trim().to_string());
        }
    }
}
