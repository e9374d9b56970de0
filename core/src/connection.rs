//! One open socket to the database, plain or TLS, plus the bookkeeping the
//! pool needs to decide whether it can be handed out again.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ClientConnection, StreamOwned};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpResponse};
use crate::parse;
use crate::reader::LineReader;
use crate::tls;

pub(crate) enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(tls) => tls.get_ref(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(tcp) => tcp.write(buf),
            Stream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(tcp) => tcp.flush(),
            Stream::Tls(tls) => tls.flush(),
        }
    }
}

/// A socket bound to one host:port. Owned by at most one in-flight request,
/// otherwise by the pool.
pub struct Connection {
    id: u64,
    peer: String,
    reader: LineReader<Stream>,
    dead: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("tls", &matches!(self.reader.get_ref(), Stream::Tls(_)))
            .field("dead", &self.is_dead())
            .finish()
    }
}

impl Connection {
    /// Resolve `host`, connect to the first address that accepts within
    /// `connect_timeout`, and complete the TLS handshake when `tls` is set.
    pub fn open(
        id: u64,
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        tls: Option<&Arc<ClientConfig>>,
    ) -> Result<Self, TransportError> {
        let peer = format!("{host}:{port}");
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connection(format!("cannot resolve {peer}: {e}")))?
            .collect();

        let mut last_err = None;
        let mut tcp = None;
        for addr in &addrs {
            let attempt = match connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let tcp = match (tcp, last_err) {
            (Some(tcp), _) => tcp,
            (None, Some(e)) => return Err(TransportError::from_io(&format!("connect to {peer}"), &e)),
            (None, None) => {
                return Err(TransportError::Connection(format!("{peer} resolved to no addresses")))
            }
        };
        tcp.set_nodelay(true)
            .map_err(|e| TransportError::from_io(&format!("configure socket to {peer}"), &e))?;

        let stream = match tls {
            None => Stream::Plain(tcp),
            Some(config) => Stream::Tls(Box::new(handshake(config, host, tcp, connect_timeout)?)),
        };
        tracing::debug!(conn = id, %peer, tls = tls.is_some(), "connection opened");

        Ok(Self {
            id,
            peer,
            reader: LineReader::new(stream),
            dead: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Set after a timeout, end of stream, or any failed exchange. A dead
    /// connection is never pooled.
    pub fn is_dead(&self) -> bool {
        self.dead || self.reader.at_eof() || self.reader.timed_out()
    }

    pub fn mark_dead(&mut self) {
        self.dead = true;
    }

    /// Check an idle connection before reuse: it must not have timed out or
    /// hit end of stream, and the peer must not have sent anything since the
    /// last response ended. For TLS that includes plaintext rustls already
    /// decrypted but nobody read.
    pub fn probe_alive(&mut self) -> bool {
        if self.is_dead() || self.reader.buffered_len() > 0 {
            return false;
        }
        if self.reader.get_ref().tcp().set_nonblocking(true).is_err() {
            return false;
        }
        let alive = match self.reader.get_mut() {
            Stream::Plain(tcp) => tcp_idle(tcp),
            Stream::Tls(tls) => tls_idle(tls),
        };
        self.reader.get_ref().tcp().set_nonblocking(false).is_ok() && alive
    }

    pub fn set_timeouts(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        let tcp = self.reader.get_ref().tcp();
        tcp.set_read_timeout(timeout)
            .and_then(|()| tcp.set_write_timeout(timeout))
            .map_err(|e| TransportError::from_io("set socket timeouts", &e))
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.reader.get_mut();
        if let Err(e) = stream.write_all(bytes).and_then(|()| stream.flush()) {
            self.dead = true;
            return Err(TransportError::from_io(&format!("write to {}", self.peer), &e));
        }
        Ok(())
    }

    pub fn read_response(&mut self, method: &HttpMethod) -> Result<HttpResponse, TransportError> {
        let result = parse::read_response(&mut self.reader, method);
        if result.is_err() {
            self.dead = true;
        }
        result
    }

    pub fn close(self) {
        tracing::debug!(conn = self.id, peer = %self.peer, "connection closed");
        match self.reader.into_inner() {
            Stream::Plain(tcp) => {
                let _ = tcp.shutdown(Shutdown::Both);
            }
            Stream::Tls(mut tls) => {
                tls.conn.send_close_notify();
                while tls.conn.wants_write() {
                    if tls.conn.write_tls(&mut tls.sock).is_err() {
                        break;
                    }
                }
                let _ = tls.sock.shutdown(Shutdown::Both);
            }
        }
    }
}

/// Expects a nonblocking socket.
fn tcp_idle(tcp: &TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match tcp.peek(&mut byte) {
        // 0 is end of stream; anything else is data nobody asked for.
        Ok(_) => false,
        Err(e) => e.kind() == io::ErrorKind::WouldBlock,
    }
}

/// Expects a nonblocking socket. Records that arrived while idle are pulled
/// in and processed: a session ticket leaves the connection usable, while
/// application data, close_notify or end of stream does not.
fn tls_idle(tls: &mut StreamOwned<ClientConnection, TcpStream>) -> bool {
    loop {
        match tls.conn.read_tls(&mut tls.sock) {
            Ok(0) => return false,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(_) => return false,
        }
    }
    match tls.conn.process_new_packets() {
        Ok(state) => state.plaintext_bytes_to_read() == 0 && !state.peer_has_closed(),
        Err(_) => false,
    }
}

fn handshake(
    config: &Arc<ClientConfig>,
    host: &str,
    mut tcp: TcpStream,
    timeout: Option<Duration>,
) -> Result<StreamOwned<ClientConnection, TcpStream>, TransportError> {
    let name = tls::server_name(host)?;
    let mut session = ClientConnection::new(Arc::clone(config), name)
        .map_err(|e| TransportError::Connection(format!("tls setup for {host}: {e}")))?;

    tcp.set_read_timeout(timeout)
        .and_then(|()| tcp.set_write_timeout(timeout))
        .map_err(|e| TransportError::from_io("set handshake timeouts", &e))?;
    while session.is_handshaking() {
        session
            .complete_io(&mut tcp)
            .map_err(|e| TransportError::from_io(&format!("tls handshake with {host}"), &e))?;
    }
    Ok(StreamOwned::new(session, tcp))
}
