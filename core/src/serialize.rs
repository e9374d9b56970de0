//! Request serializer: turns an [`HttpRequest`] into the exact bytes written
//! to the socket.
//!
//! The serializer never adds headers of its own. Header values are written
//! unescaped; callers must not pass values containing `\r` or `\n`.

use crate::http::{HttpMethod, HttpRequest};

const CRLF: &[u8] = b"\r\n";

/// Encode `METHOD path HTTP/1.1`, the header block, a blank line, then the
/// body.
///
/// A `PUT` body is written as-is. Any other method with a non-empty body
/// gets two extra CRLF pairs after it, which older CouchDB releases expect.
pub fn encode_request(request: &HttpRequest) -> Vec<u8> {
    let body = request.body_bytes();
    let mut buf = Vec::with_capacity(128 + body.map_or(0, <[u8]>::len));

    buf.extend_from_slice(request.method.as_str().as_bytes());
    buf.push(b' ');
    buf.extend_from_slice(request.path.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in request.headers.iter() {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(CRLF);
    }
    buf.extend_from_slice(CRLF);

    if let Some(body) = body {
        buf.extend_from_slice(body);
        if request.method != HttpMethod::Put {
            buf.extend_from_slice(CRLF);
            buf.extend_from_slice(CRLF);
        }
    }

    buf
}
