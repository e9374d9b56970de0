//! Buffered, bounded line reads over a byte stream.
//!
//! # Design
//! The parser consumes the socket one line at a time, but a line read must
//! never ask for more bytes than the framing allows: a fixed-length body
//! that does not end in `\n` would otherwise block until the read timeout
//! fires, and chunk data may run straight into the next chunk-size line.
//! Every read therefore takes a byte limit and stops at whichever comes
//! first: a `\n`, the limit, or end of stream.
//!
//! The reader remembers whether it has seen end of stream or a timeout.
//! Those two flags are what the connection pool and the parser consult to
//! decide whether a socket is still trustworthy.

use std::io::{self, BufRead, BufReader, Read};

use crate::error::TransportError;

const DEFAULT_CAPACITY: usize = 8 * 1024;

pub struct LineReader<R> {
    inner: BufReader<R>,
    eof: bool,
    timed_out: bool,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            inner: BufReader::with_capacity(capacity, inner),
            eof: false,
            timed_out: false,
        }
    }

    /// Read up to and including the next `\n`, but never more than `limit`
    /// bytes. Returns an empty vector only at end of stream.
    pub fn read_line(&mut self, limit: usize) -> Result<Vec<u8>, TransportError> {
        let mut line = Vec::new();
        while line.len() < limit {
            let available = match self.inner.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // rustls reports a TCP close without close_notify this way.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    break;
                }
                Err(e) => {
                    let err = TransportError::from_io("read", &e);
                    if err.is_timeout() {
                        self.timed_out = true;
                    }
                    return Err(err);
                }
            };
            if available.is_empty() {
                self.eof = true;
                break;
            }

            let window = &available[..available.len().min(limit - line.len())];
            let (take, complete) = match window.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (window.len(), false),
            };
            line.extend_from_slice(&window[..take]);
            self.inner.consume(take);
            if complete {
                break;
            }
        }
        Ok(line)
    }

    pub fn at_eof(&self) -> bool {
        self.eof
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Bytes already pulled off the stream but not yet handed out.
    pub fn buffered_len(&self) -> usize {
        self.inner.buffer().len()
    }

    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}
