//! Idle-connection pool for one host:port.
//!
//! # Design
//! The pool is an owned FIFO of idle sockets behind a mutex. The lock is
//! held only to pop or push, never across a probe, a connect, or a close,
//! so two callers can never be handed the same socket and a slow connect
//! does not stall a concurrent release. Dropping the pool closes everything
//! still idle in it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::ClientConfig;

use crate::connection::Connection;
use crate::error::TransportError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Sockets opened over the pool's lifetime.
    pub opened: u64,
    /// Idle sockets picked up again by `acquire`.
    pub reused: u64,
    /// Sockets closed, whether found dead, refused by `release`, or drained.
    pub closed: u64,
    pub idle: usize,
}

pub struct ConnectionPool {
    host: String,
    port: u16,
    connect_timeout: Option<Duration>,
    tls: Option<Arc<ClientConfig>>,
    idle: Mutex<VecDeque<Connection>>,
    next_id: AtomicU64,
    opened: AtomicU64,
    reused: AtomicU64,
    closed: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        tls: Option<Arc<ClientConfig>>,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout,
            tls,
            idle: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
            opened: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    /// Hand out the oldest idle connection that is still alive, closing any
    /// dead ones found on the way, or open a new one.
    pub fn acquire(&self) -> Result<Connection, TransportError> {
        loop {
            let candidate = self.idle.lock().pop_front();
            let Some(mut conn) = candidate else { break };
            if conn.probe_alive() {
                self.reused.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(conn = conn.id(), "reusing pooled connection");
                return Ok(conn);
            }
            tracing::warn!(conn = conn.id(), "pooled connection went stale, discarding");
            self.discard(conn);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let conn = Connection::open(id, &self.host, self.port, self.connect_timeout, self.tls.as_ref())?;
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    /// Return `conn` to the pool when `keep_alive` holds and it is still
    /// usable; close it otherwise.
    pub fn release(&self, conn: Connection, keep_alive: bool) {
        if keep_alive && !conn.is_dead() {
            tracing::debug!(conn = conn.id(), "connection returned to pool");
            self.idle.lock().push_back(conn);
        } else {
            tracing::debug!(conn = conn.id(), keep_alive, dead = conn.is_dead(), "connection discarded");
            self.discard(conn);
        }
    }

    /// Close every idle connection.
    pub fn close_all(&self) {
        let drained: Vec<Connection> = self.idle.lock().drain(..).collect();
        for conn in drained {
            self.discard(conn);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            opened: self.opened.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            idle: self.idle_count(),
        }
    }

    fn discard(&self, conn: Connection) {
        self.closed.fetch_add(1, Ordering::Relaxed);
        conn.close();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.close_all();
    }
}
