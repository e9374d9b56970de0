//! Servers the transport is tested against.
//!
//! [`couch`] is a small CouchDB look-alike served by axum, used to check the
//! transport against a real HTTP/1.1 stack (keep-alive, chunked streaming,
//! cookies, `Connection: close`). [`scripted`] is a raw TCP server that
//! replays canned bytes, for framing cases no well-behaved server produces.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;

pub mod couch;
pub mod scripted;

pub use couch::app;
pub use scripted::{Reply, ScriptedServer};

pub async fn run(listener: TcpListener) -> Result<(), io::Error> {
    axum::serve(listener, app()).await
}

/// Serve [`app`] on an ephemeral loopback port from a background thread with
/// its own single-threaded runtime. The server lives until the process exits.
pub fn spawn_background() -> io::Result<SocketAddr> {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = std_listener.local_addr()?;
    std_listener.set_nonblocking(true)?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::spawn(move || {
        let served = rt.block_on(async {
            let listener = TcpListener::from_std(std_listener)?;
            run(listener).await
        });
        if let Err(e) = served {
            tracing::error!(error = %e, "mock couch server stopped");
        }
    });
    Ok(addr)
}
