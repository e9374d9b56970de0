//! Hand-off from a parsed response to the envelope the caller expects.
//!
//! # Design
//! The transport finishes its job once a response is fully parsed. What the
//! caller receives is decided by a [`MakeResult`] implementation chosen when
//! the transport is built, so the database client above can plug in its own
//! envelope without the transport knowing about documents or views.
//!
//! Two implementations ship here: [`RawResult`] returns the parsed response
//! untouched, and [`JsonResult`] decodes the body the way a database client
//! usually wants it.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpResponse};

pub trait MakeResult {
    type Output;

    fn make_result(&self, response: HttpResponse, method: &HttpMethod) -> Result<Self::Output, TransportError>;
}

/// Returns the parsed [`HttpResponse`] as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawResult;

impl MakeResult for RawResult {
    type Output = HttpResponse;

    fn make_result(&self, response: HttpResponse, _method: &HttpMethod) -> Result<HttpResponse, TransportError> {
        Ok(response)
    }
}

/// Status, headers and cookies plus the body decoded as JSON when possible.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonEnvelope {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub cookies: Option<BTreeMap<String, String>>,
    /// `None` for `HEAD`, empty bodies, and bodies that are not JSON.
    pub body: Option<serde_json::Value>,
    pub raw_body: Vec<u8>,
}

impl JsonEnvelope {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the JSON body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| TransportError::Result("response has no JSON body".to_string()))?;
        serde_json::from_value(body).map_err(|e| TransportError::Result(e.to_string()))
    }
}

/// Decodes bodies as JSON. A body the server labelled as JSON that fails to
/// decode is an error; any other undecodable body is kept only as raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResult;

impl MakeResult for JsonResult {
    type Output = JsonEnvelope;

    fn make_result(&self, response: HttpResponse, method: &HttpMethod) -> Result<JsonEnvelope, TransportError> {
        let labelled_json = response
            .header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));

        let body = if *method == HttpMethod::Head || response.body.is_empty() {
            None
        } else {
            match serde_json::from_slice(&response.body) {
                Ok(value) => Some(value),
                Err(e) if labelled_json => {
                    return Err(TransportError::Result(format!("invalid JSON body: {e}")));
                }
                Err(_) => None,
            }
        };

        Ok(JsonEnvelope {
            status: response.status(),
            headers: response.headers,
            cookies: response.cookies,
            body,
            raw_body: response.body,
        })
    }
}
