//! The transport adapter: one call in, one parsed response out.
//!
//! # Design
//! `send` acquires a pooled or fresh connection, writes the serialized
//! request, parses the response, and then decides the connection's fate.
//! It goes back to the pool only after a complete response whose
//! `Connection` header is not `close` and whose body did not end at end of
//! stream; on every error path it is closed, because its framing can no
//! longer be trusted. Nothing about an individual exchange is stored on the
//! transport, so one instance can be shared across threads.

use crate::config::{Scheme, TransportConfig};
use crate::connection::Connection;
use crate::error::TransportError;
use crate::http::{Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::pool::{ConnectionPool, PoolStats};
use crate::result::{MakeResult, RawResult};
use crate::serialize::encode_request;
use crate::tls;

pub struct Transport<B = RawResult> {
    config: TransportConfig,
    pool: ConnectionPool,
    results: B,
}

impl Transport<RawResult> {
    /// A transport whose `send` returns the parsed [`HttpResponse`].
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        Self::with_results(config, RawResult)
    }
}

impl<B: MakeResult> Transport<B> {
    pub fn with_results(config: TransportConfig, results: B) -> Result<Self, TransportError> {
        let tls = match config.scheme {
            Scheme::Http => None,
            Scheme::Https => Some(tls::client_config(config.tls_cert_path.as_deref())?),
        };
        let pool = ConnectionPool::new(&config.host, config.port, config.connect_timeout(), tls);
        Ok(Self { config, pool, results })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Send one request and build the caller's result from the response.
    pub fn send(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&[u8]>,
        headers: &Headers,
    ) -> Result<B::Output, TransportError> {
        let mut request = HttpRequest::new(method, path);
        request.headers = headers.clone();
        request.body = body.map(<[u8]>::to_vec);
        self.execute(request)
    }

    pub fn execute(&self, mut request: HttpRequest) -> Result<B::Output, TransportError> {
        self.fill_headers(&mut request);
        let response = self.exchange(&request)?;
        self.results.make_result(response, &request.method)
    }

    /// Close every idle connection. The transport stays usable and opens new
    /// sockets on demand.
    pub fn close(&self) {
        self.pool.close_all();
    }

    /// `Host` when the caller left it out, and `Content-Length` for a body
    /// the caller did not frame. Bodyless requests get no framing header.
    fn fill_headers(&self, request: &mut HttpRequest) {
        if !request.headers.contains("host") {
            request.headers.set("Host", self.config.host_header());
        }
        if let Some(len) = request.body_bytes().map(<[u8]>::len) {
            if !request.headers.contains("content-length") && !request.headers.contains("transfer-encoding") {
                request.headers.set("Content-Length", len.to_string());
            }
        }
    }

    fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let wire = encode_request(request);
        let mut conn = self.pool.acquire()?;
        let span = tracing::debug_span!("exchange", conn = conn.id(), method = %request.method, path = %request.path);
        let _enter = span.enter();

        match self.round_trip(&mut conn, &wire, &request.method) {
            Ok(response) => {
                let keep_alive = !response.wants_close();
                tracing::debug!(status = response.status(), body_len = response.body.len(), keep_alive, "response complete");
                self.pool.release(conn, keep_alive);
                Ok(response)
            }
            Err(err) => {
                tracing::debug!(error = %err, "exchange failed");
                conn.mark_dead();
                self.pool.release(conn, false);
                Err(err)
            }
        }
    }

    fn round_trip(
        &self,
        conn: &mut Connection,
        wire: &[u8],
        method: &HttpMethod,
    ) -> Result<HttpResponse, TransportError> {
        conn.set_timeouts(self.config.rw_timeout())?;
        conn.send(wire)?;
        conn.read_response(method)
    }
}
