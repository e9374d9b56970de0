//! End-to-end tests against live servers on loopback.
//!
//! # Design
//! The axum-backed couch mock checks the transport against a real HTTP/1.1
//! stack: keep-alive reuse, chunked streaming, cookies, `Connection: close`,
//! and a cross-check of the same reads made through ureq. The scripted
//! server replays fixed bytes for the cases a well-behaved server never
//! produces, and records what the transport wrote and how many sockets it
//! opened.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use couch_transport::{Headers, HttpMethod, HttpResponse, JsonResult, Transport, TransportConfig, TransportError};
use mock_server::{Reply, ScriptedServer};
use serde_json::{json, Value};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn couch() -> SocketAddr {
    init_logging();
    mock_server::spawn_background().unwrap()
}

fn json_transport(addr: SocketAddr) -> Transport<JsonResult> {
    let config = TransportConfig::new("127.0.0.1", addr.port()).with_rw_timeout(5, 0);
    Transport::with_results(config, JsonResult).unwrap()
}

fn raw_transport(port: u16) -> Transport {
    Transport::new(TransportConfig::new("127.0.0.1", port).with_rw_timeout(5, 0)).unwrap()
}

fn json_headers() -> Headers {
    Headers::new().with("Content-Type", "application/json")
}

fn get(transport: &Transport, path: &str) -> Result<HttpResponse, TransportError> {
    transport.send(HttpMethod::Get, path, None, &Headers::new())
}

// ---------------------------------------------------------------------------
// Against the couch mock
// ---------------------------------------------------------------------------

#[test]
fn document_lifecycle() {
    let addr = couch();
    let db = json_transport(addr);
    let none = Headers::new();

    // Step 1: database.
    let created = db.send(HttpMethod::Put, "/records", None, &none).unwrap();
    assert_eq!(created.status, 201);
    assert_eq!(created.body, Some(json!({ "ok": true })));

    // Step 2: document.
    let body = br#"{"title":"Blue Train"}"#;
    let created = db
        .send(HttpMethod::Put, "/records/lp-1", Some(body), &json_headers())
        .unwrap();
    assert_eq!(created.status, 201);
    let rev = created.body.as_ref().unwrap()["rev"].as_str().unwrap().to_string();
    assert!(rev.starts_with("1-"));

    // Step 3: read it back.
    let fetched = db.send(HttpMethod::Get, "/records/lp-1", None, &none).unwrap();
    assert!(fetched.is_success());
    let doc = fetched.body.unwrap();
    assert_eq!(doc["_id"], "lp-1");
    assert_eq!(doc["_rev"], rev.as_str());
    assert_eq!(doc["title"], "Blue Train");

    // Step 4: HEAD gets headers only.
    let head = db.send(HttpMethod::Head, "/records/lp-1", None, &none).unwrap();
    assert_eq!(head.status, 200);
    assert_eq!(head.headers.get("etag").map(String::as_str), Some(format!("\"{rev}\"").as_str()));
    assert!(head.body.is_none());
    assert!(head.raw_body.is_empty());

    // Step 5: update with the current revision.
    let update = format!(r#"{{"_rev":"{rev}","title":"Blue Train (mono)"}}"#);
    let updated = db
        .send(HttpMethod::Put, "/records/lp-1", Some(update.as_bytes()), &json_headers())
        .unwrap();
    assert_eq!(updated.status, 201);
    let rev2 = updated.body.unwrap()["rev"].as_str().unwrap().to_string();

    // Step 6: a stale revision conflicts.
    let stale = db
        .send(HttpMethod::Delete, &format!("/records/lp-1?rev={rev}"), None, &none)
        .unwrap();
    assert_eq!(stale.status, 409);
    assert_eq!(stale.body.unwrap()["error"], "conflict");

    // Step 7: delete, then 404.
    let deleted = db
        .send(HttpMethod::Delete, &format!("/records/lp-1?rev={rev2}"), None, &none)
        .unwrap();
    assert_eq!(deleted.status, 200);
    let missing = db.send(HttpMethod::Get, "/records/lp-1", None, &none).unwrap();
    assert_eq!(missing.status, 404);
    assert_eq!(missing.body.unwrap()["reason"], "missing");

    // Every step rode the same keep-alive connection.
    let stats = db.pool_stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.reused, 7);
    assert_eq!(stats.idle, 1);
}

#[test]
fn reads_match_ureq() {
    let addr = couch();
    let transport = raw_transport(addr.port());
    transport.send(HttpMethod::Put, "/albums", None, &Headers::new()).unwrap();
    transport
        .send(HttpMethod::Put, "/albums/kind-of-blue", Some(br#"{"year":1959}"#), &json_headers())
        .unwrap();

    let agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .new_agent();

    for path in ["/", "/_all_dbs", "/albums/kind-of-blue", "/albums/missing", "/albums/_all_docs"] {
        let ours = get(&transport, path).unwrap();

        let mut theirs = agent.get(&format!("http://{addr}{path}")).call().unwrap();
        let status = theirs.status().as_u16();
        let body = theirs.body_mut().read_to_string().unwrap();

        assert_eq!(ours.status(), status, "{path}: status");
        let ours: Value = serde_json::from_slice(&ours.body).unwrap();
        let theirs: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(ours, theirs, "{path}: body");
    }
}

#[test]
fn session_cookie_is_parsed() {
    let addr = couch();
    let transport = raw_transport(addr.port());

    let login = transport
        .send(
            HttpMethod::Post,
            "/_session",
            Some(br#"{"name":"admin","password":"secret"}"#),
            &json_headers(),
        )
        .unwrap();
    assert_eq!(login.status(), 200);
    assert!(!login.cookie("AuthSession").unwrap().is_empty());
    assert_eq!(login.cookie("Path"), Some("/"));
    assert_eq!(login.cookie("HttpOnly"), Some(""));

    // The CRLFs written after the POST body must not upset the next request
    // on the same connection.
    let after = get(&transport, "/").unwrap();
    assert_eq!(after.status(), 200);
    assert!(after.cookies.is_none());
    assert_eq!(transport.pool_stats().opened, 1);
}

#[test]
fn chunked_listing_is_reassembled() {
    let addr = couch();
    let transport = raw_transport(addr.port());
    transport.send(HttpMethod::Put, "/db", None, &Headers::new()).unwrap();
    for id in ["a", "b", "c"] {
        transport
            .send(HttpMethod::Put, &format!("/db/{id}"), Some(b"{}"), &json_headers())
            .unwrap();
    }

    let listing = get(&transport, "/db/_all_docs").unwrap();
    assert_eq!(listing.header("transfer-encoding"), Some("chunked"));
    assert!(listing.header("content-length").is_none());

    let body: Value = serde_json::from_slice(&listing.body).unwrap();
    assert_eq!(body["total_rows"], 3);
    let ids: Vec<&str> = body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);

    // A chunked body ends in-band, so the connection goes back to the pool.
    assert_eq!(transport.pool_stats().idle, 1);
    assert_eq!(transport.pool_stats().opened, 1);
}

#[test]
fn connection_close_header_is_honoured() {
    let addr = couch();
    let transport = raw_transport(addr.port());

    let response = get(&transport, "/_close").unwrap();
    assert!(response.wants_close());
    assert_eq!(transport.pool_stats().idle, 0);

    get(&transport, "/").unwrap();
    let stats = transport.pool_stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.reused, 0);
}

#[test]
fn shared_across_threads() {
    let addr = couch();
    let transport = Arc::new(raw_transport(addr.port()));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let transport = Arc::clone(&transport);
            thread::spawn(move || {
                for _ in 0..5 {
                    let response = get(&transport, "/").unwrap();
                    assert_eq!(response.status(), 200);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = transport.pool_stats();
    assert!(stats.opened >= 1 && stats.opened <= 4, "opened {}", stats.opened);
    assert_eq!(stats.opened + stats.reused, 20);
    assert_eq!(stats.idle as u64, stats.opened);
}

#[test]
fn close_drains_idle_connections() {
    let addr = couch();
    let transport = raw_transport(addr.port());
    get(&transport, "/").unwrap();
    assert_eq!(transport.pool_stats().idle, 1);

    transport.close();
    assert_eq!(transport.pool_stats().idle, 0);

    // Still usable afterwards.
    get(&transport, "/").unwrap();
    assert_eq!(transport.pool_stats().opened, 2);
}

// ---------------------------------------------------------------------------
// Against the scripted server
// ---------------------------------------------------------------------------

const OK_EMPTY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}";

#[test]
fn keep_alive_uses_one_socket() {
    init_logging();
    let server = ScriptedServer::start(vec![Reply::new(OK_EMPTY), Reply::new(OK_EMPTY), Reply::new(OK_EMPTY)]).unwrap();
    let transport = raw_transport(server.port());

    for _ in 0..3 {
        assert_eq!(get(&transport, "/").unwrap().body, b"{}");
    }
    assert_eq!(server.connections(), 1);
    assert_eq!(server.requests().len(), 3);
}

#[test]
fn wire_bytes_are_exact() {
    init_logging();
    let server = ScriptedServer::start(vec![Reply::new(OK_EMPTY), Reply::new(OK_EMPTY), Reply::new(OK_EMPTY)]).unwrap();
    let transport = raw_transport(server.port());
    let port = server.port();

    transport
        .send(HttpMethod::Put, "/db/doc", Some(b"{\"a\":1}"), &json_headers())
        .unwrap();
    transport
        .send(HttpMethod::Post, "/db", Some(b"{\"b\":2}"), &json_headers())
        .unwrap();
    get(&transport, "/db/doc").unwrap();

    let requests: Vec<String> = server
        .requests()
        .into_iter()
        .map(|r| String::from_utf8(r).unwrap())
        .collect();
    assert_eq!(
        requests[0],
        format!("PUT /db/doc HTTP/1.1\r\nContent-Type: application/json\r\nHost: 127.0.0.1:{port}\r\nContent-Length: 7\r\n\r\n{{\"a\":1}}")
    );
    assert_eq!(
        requests[1],
        format!("POST /db HTTP/1.1\r\nContent-Type: application/json\r\nHost: 127.0.0.1:{port}\r\nContent-Length: 7\r\n\r\n{{\"b\":2}}")
    );
    // The POST's trailing CRLFs were skipped as noise between requests.
    assert_eq!(requests[2], format!("GET /db/doc HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n\r\n"));
    assert_eq!(server.connections(), 1);
}

#[test]
fn close_delimited_body_is_not_pooled() {
    init_logging();
    let server = ScriptedServer::start(vec![
        Reply::new(&b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nuntil the end"[..]).then_close(),
        Reply::new(OK_EMPTY),
    ])
    .unwrap();
    let transport = raw_transport(server.port());

    let first = get(&transport, "/_log").unwrap();
    assert_eq!(first.body, b"until the end");
    assert_eq!(transport.pool_stats().idle, 0);

    get(&transport, "/").unwrap();
    assert_eq!(server.connections(), 2);
}

#[test]
fn peer_hangup_between_requests_opens_new_socket() {
    init_logging();
    let server = ScriptedServer::start(vec![Reply::new(OK_EMPTY).then_close(), Reply::new(OK_EMPTY)]).unwrap();
    let transport = raw_transport(server.port());

    get(&transport, "/").unwrap();
    assert_eq!(transport.pool_stats().idle, 1);
    thread::sleep(Duration::from_millis(100));

    let second = get(&transport, "/").unwrap();
    assert_eq!(second.status(), 200);
    let stats = transport.pool_stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.reused, 0);
    assert_eq!(server.connections(), 2);
}

#[test]
fn unsolicited_bytes_poison_the_socket() {
    init_logging();
    let server = ScriptedServer::start(vec![
        Reply::new(&b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}HTTP/1.1 500 Oops\r\n\r\n"[..]),
        Reply::new(OK_EMPTY),
    ])
    .unwrap();
    let transport = raw_transport(server.port());

    get(&transport, "/").unwrap();
    thread::sleep(Duration::from_millis(50));
    let second = get(&transport, "/").unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(server.connections(), 2);
}

#[test]
fn slow_response_times_out() {
    init_logging();
    let server =
        ScriptedServer::start(vec![Reply::new(OK_EMPTY).after(Duration::from_millis(500))]).unwrap();
    let config = TransportConfig::new("127.0.0.1", server.port()).with_rw_timeout(0, 100_000);
    let transport = Transport::new(config).unwrap();

    let started = Instant::now();
    let err = get(&transport, "/").unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
    assert!(started.elapsed() < Duration::from_millis(450));
    assert_eq!(transport.pool_stats().idle, 0);
}

#[test]
fn garbage_reply_is_malformed() {
    init_logging();
    let server = ScriptedServer::start(vec![Reply::new(&b"220 smtp.example.com ESMTP\r\n"[..]).then_close()]).unwrap();
    let transport = raw_transport(server.port());

    let err = get(&transport, "/").unwrap_err();
    assert!(matches!(err, TransportError::MalformedResponse(_)), "{err:?}");
    assert_eq!(transport.pool_stats().idle, 0);
}

// ---------------------------------------------------------------------------
// Connect failures
// ---------------------------------------------------------------------------

#[test]
fn refused_connection_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = raw_transport(port);
    let err = get(&transport, "/").unwrap_err();
    assert!(matches!(err, TransportError::Connection(_)), "{err:?}");
}

#[test]
fn unreachable_host_is_bounded_by_connect_timeout() {
    // Non-routable address: the SYN goes nowhere.
    let config = TransportConfig::new("10.255.255.1", 5984).with_connect_timeout(1);
    let transport = Transport::new(config).unwrap();

    let started = Instant::now();
    let err = get(&transport, "/").unwrap_err();
    assert!(
        matches!(err, TransportError::Timeout(_) | TransportError::Connection(_)),
        "{err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}
