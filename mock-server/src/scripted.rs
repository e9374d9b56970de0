//! A raw TCP server that answers each request with the next canned reply.
//!
//! Replies are shared across all accepted connections and consumed in order.
//! Every request the server sees is recorded verbatim, which lets tests
//! assert on the exact bytes a client put on the wire and on how many
//! sockets it opened.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Reply {
    bytes: Vec<u8>,
    close_after: bool,
    delay: Option<Duration>,
}

impl Reply {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            close_after: false,
            delay: None,
        }
    }

    /// Shut the socket down once this reply is written.
    pub fn then_close(mut self) -> Self {
        self.close_after = true;
        self
    }

    /// Wait before writing anything.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct Log {
    connections: usize,
    requests: Vec<Vec<u8>>,
}

#[derive(Clone)]
pub struct ScriptedServer {
    addr: SocketAddr,
    log: Arc<Mutex<Log>>,
}

impl ScriptedServer {
    /// Bind an ephemeral loopback port and serve `replies` from a background
    /// thread. Once the script runs out, connections are closed after reading
    /// the next request.
    pub fn start(replies: Vec<Reply>) -> io::Result<Self> {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = std_listener.local_addr()?;
        std_listener.set_nonblocking(true)?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let log = Arc::new(Mutex::new(Log::default()));
        let script = Arc::new(Mutex::new(VecDeque::from(replies)));
        let server_log = Arc::clone(&log);
        std::thread::spawn(move || {
            let served = rt.block_on(async {
                let listener = TcpListener::from_std(std_listener)?;
                serve(listener, script, server_log).await
            });
            if let Err(e) = served {
                tracing::error!(error = %e, "scripted server stopped");
            }
        });
        Ok(Self { addr, log })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Connections accepted so far. Must not be called from async code.
    pub fn connections(&self) -> usize {
        self.log.blocking_lock().connections
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.log.blocking_lock().requests.clone()
    }
}

async fn serve(
    listener: TcpListener,
    script: Arc<Mutex<VecDeque<Reply>>>,
    log: Arc<Mutex<Log>>,
) -> io::Result<()> {
    loop {
        let (sock, peer) = listener.accept().await?;
        log.lock().await.connections += 1;
        tracing::debug!(%peer, "scripted server accepted connection");
        let script = Arc::clone(&script);
        let log = Arc::clone(&log);
        tokio::spawn(async move {
            if let Err(e) = handle(sock, script, log).await {
                tracing::debug!(error = %e, "scripted connection ended");
            }
        });
    }
}

async fn handle(
    mut sock: TcpStream,
    script: Arc<Mutex<VecDeque<Reply>>>,
    log: Arc<Mutex<Log>>,
) -> io::Result<()> {
    let mut pending = Vec::new();
    while let Some(request) = read_request(&mut sock, &mut pending).await? {
        log.lock().await.requests.push(request);

        let Some(reply) = script.lock().await.pop_front() else {
            return Ok(());
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        sock.write_all(&reply.bytes).await?;
        sock.flush().await?;
        if reply.close_after {
            sock.shutdown().await?;
            return Ok(());
        }
    }
    Ok(())
}

/// Read one request: the head up to the blank line plus a `Content-Length`
/// body. Stray CRLFs between requests are dropped. `None` once the client
/// hangs up.
async fn read_request(sock: &mut TcpStream, pending: &mut Vec<u8>) -> io::Result<Option<Vec<u8>>> {
    loop {
        while pending.starts_with(b"\r\n") {
            pending.drain(..2);
        }
        if let Some(head_end) = find(pending, b"\r\n\r\n") {
            let total = head_end + 4 + content_length(&pending[..head_end]);
            if pending.len() >= total {
                return Ok(Some(pending.drain(..total).collect()));
            }
        }

        let mut chunk = [0u8; 4096];
        let n = sock.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        pending.extend_from_slice(&chunk[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &[u8]) -> usize {
    String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}
