//! A tiny in-memory document database that answers the way CouchDB does for
//! the handful of endpoints the transport tests touch.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Doc {
    rev: String,
    body: Value,
}

type Database = BTreeMap<String, Doc>;
pub type Db = Arc<RwLock<HashMap<String, Database>>>;

#[derive(Deserialize)]
pub struct RevQuery {
    pub rev: Option<String>,
}

#[derive(Deserialize)]
pub struct Login {
    pub name: String,
    pub password: String,
}

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/", get(welcome))
        .route("/_all_dbs", get(all_dbs))
        .route("/_session", post(login))
        .route("/_close", get(close_after_reply))
        .route("/{db}", put(create_db).delete(delete_db).post(post_doc))
        .route("/{db}/_all_docs", get(all_docs))
        .route(
            "/{db}/{id}",
            get(get_doc).put(put_doc).delete(delete_doc),
        )
        .with_state(db)
}

fn error(status: StatusCode, error: &str, reason: &str) -> Response {
    (status, Json(json!({ "error": error, "reason": reason }))).into_response()
}

fn next_rev(previous: Option<&str>) -> String {
    let generation = previous
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

async fn welcome() -> Json<Value> {
    Json(json!({ "couchdb": "Welcome", "vendor": { "name": "mock-server" } }))
}

async fn all_dbs(State(db): State<Db>) -> Json<Vec<String>> {
    let mut names: Vec<String> = db.read().await.keys().cloned().collect();
    names.sort();
    Json(names)
}

async fn login(Json(input): Json<Login>) -> Response {
    let token = Uuid::new_v4().simple().to_string();
    (
        [(
            header::SET_COOKIE,
            format!("AuthSession={token}; Version=1; Path=/; HttpOnly"),
        )],
        Json(json!({ "ok": true, "name": input.name, "roles": [] })),
    )
        .into_response()
}

async fn close_after_reply() -> Response {
    ([(header::CONNECTION, "close")], Json(json!({ "ok": true }))).into_response()
}

async fn create_db(State(db): State<Db>, Path(name): Path<String>) -> Response {
    let mut dbs = db.write().await;
    if dbs.contains_key(&name) {
        return error(StatusCode::PRECONDITION_FAILED, "file_exists", "The database could not be created, the file already exists.");
    }
    dbs.insert(name, Database::new());
    (StatusCode::CREATED, Json(json!({ "ok": true }))).into_response()
}

async fn delete_db(State(db): State<Db>, Path(name): Path<String>) -> Response {
    match db.write().await.remove(&name) {
        Some(_) => Json(json!({ "ok": true })).into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found", "Database does not exist."),
    }
}

/// Rows are streamed one at a time so the response goes out chunked.
async fn all_docs(State(db): State<Db>, Path(name): Path<String>) -> Response {
    let dbs = db.read().await;
    let Some(database) = dbs.get(&name) else {
        return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
    };

    let mut parts = vec![format!("{{\"total_rows\":{},\"offset\":0,\"rows\":[\r\n", database.len())];
    let rows = database.iter().map(|(id, doc)| {
        json!({ "id": id, "key": id, "value": { "rev": doc.rev } }).to_string()
    });
    parts.extend(rows.enumerate().map(|(i, row)| {
        if i == 0 {
            row
        } else {
            format!(",\r\n{row}")
        }
    }));
    parts.push("\r\n]}\n".to_string());

    let stream = futures::stream::iter(parts.into_iter().map(Ok::<_, Infallible>));
    ([(header::CONTENT_TYPE, "application/json")], Body::from_stream(stream)).into_response()
}

async fn post_doc(State(db): State<Db>, Path(name): Path<String>, body: Bytes) -> Response {
    let id = Uuid::new_v4().simple().to_string();
    store(db, name, id, None, body).await
}

async fn put_doc(
    State(db): State<Db>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
    body: Bytes,
) -> Response {
    store(db, name, id, query.rev, body).await
}

async fn store(db: Db, name: String, id: String, query_rev: Option<String>, body: Bytes) -> Response {
    let Ok(mut doc) = serde_json::from_slice::<Value>(&body) else {
        return error(StatusCode::BAD_REQUEST, "bad_request", "invalid UTF-8 JSON");
    };
    let Some(fields) = doc.as_object_mut() else {
        return error(StatusCode::BAD_REQUEST, "bad_request", "Document must be a JSON object");
    };
    let given_rev = fields
        .remove("_rev")
        .and_then(|v| v.as_str().map(str::to_string))
        .or(query_rev);
    fields.remove("_id");

    let mut dbs = db.write().await;
    let Some(database) = dbs.get_mut(&name) else {
        return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
    };
    let current = database.get(&id).map(|d| d.rev.clone());
    if current != given_rev {
        return error(StatusCode::CONFLICT, "conflict", "Document update conflict.");
    }

    let rev = next_rev(current.as_deref());
    database.insert(id.clone(), Doc { rev: rev.clone(), body: doc });
    (
        StatusCode::CREATED,
        [(header::ETAG, format!("\"{rev}\""))],
        Json(json!({ "ok": true, "id": id, "rev": rev })),
    )
        .into_response()
}

async fn get_doc(State(db): State<Db>, Path((name, id)): Path<(String, String)>) -> Response {
    let dbs = db.read().await;
    let Some(database) = dbs.get(&name) else {
        return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
    };
    let Some(doc) = database.get(&id) else {
        return error(StatusCode::NOT_FOUND, "not_found", "missing");
    };

    let mut body = doc.body.clone();
    if let Some(fields) = body.as_object_mut() {
        fields.insert("_id".to_string(), Value::String(id.clone()));
        fields.insert("_rev".to_string(), Value::String(doc.rev.clone()));
    }
    let mut headers = HeaderMap::new();
    if let Ok(etag) = format!("\"{}\"", doc.rev).parse() {
        headers.insert(header::ETAG, etag);
    }
    (headers, Json(body)).into_response()
}

async fn delete_doc(
    State(db): State<Db>,
    Path((name, id)): Path<(String, String)>,
    Query(query): Query<RevQuery>,
) -> Response {
    let mut dbs = db.write().await;
    let Some(database) = dbs.get_mut(&name) else {
        return error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.");
    };
    let Some(current) = database.get(&id).map(|d| d.rev.clone()) else {
        return error(StatusCode::NOT_FOUND, "not_found", "missing");
    };
    if query.rev.as_deref() != Some(current.as_str()) {
        return error(StatusCode::CONFLICT, "conflict", "Document update conflict.");
    }
    database.remove(&id);
    let rev = next_rev(Some(&current));
    Json(json!({ "ok": true, "id": id, "rev": rev })).into_response()
}
