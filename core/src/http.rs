//! HTTP/1.1 wire types shared by the serializer, the parser and the adapter.
//!
//! # Design
//! These types describe one request and one response as plain data. They
//! carry no socket and no parser state, so the same values flow from the
//! caller into the serializer and from the parser out to the result
//! collaborator.
//!
//! Request headers keep insertion order because that is the order they are
//! written to the wire. Response headers are keyed by lower-cased name in a
//! sorted map; a repeated header overwrites the earlier value.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// HTTP method for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Copy,
    Options,
    /// Any other token, written to the wire verbatim.
    Other(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Copy => "COPY",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Other(token) => token,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for HttpMethod {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "COPY" => HttpMethod::Copy,
            "OPTIONS" => HttpMethod::Options,
            _ => HttpMethod::Other(s.to_string()),
        }
    }
}

/// Request header block: case-insensitive names, insertion order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`. An existing header with the same name (in any
    /// case) is replaced in place and keeps its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

/// A request described as plain data, alive for the duration of one call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The body, treating `Some(empty)` the same as `None`.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref().filter(|b| !b.is_empty())
    }
}

/// First line of a response, e.g. `HTTP/1.1 404 Object Not Found`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// The line as received, without its terminator.
    pub raw: String,
    /// Protocol version digits, e.g. `1.1`.
    pub version: String,
    pub status: u16,
    pub reason: Option<String>,
}

/// A fully parsed response. Only complete responses are ever built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_line: StatusLine,
    /// Lower-cased header name to value; later duplicates overwrite.
    pub headers: BTreeMap<String, String>,
    /// Present only when at least one `Set-Cookie` header was seen.
    pub cookies: Option<BTreeMap<String, String>>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn status(&self) -> u16 {
        self.status_line.status
    }

    pub fn version(&self) -> &str {
        &self.status_line.version
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.as_ref()?.get(name).map(String::as_str)
    }

    /// The server asked for the connection to be closed after this response.
    pub fn wants_close(&self) -> bool {
        self.header("connection")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("close"))
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
