//! Message types exchanged between the gateway and a worker.
//!
//! A request travels parent → worker on the worker's stdin, a response
//! travels back on its stdout. Both are plain values, built fresh for each
//! exchange.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// String-to-string mapping used for headers and query parameters.
///
/// Ordered so that encoding the same message always yields the same bytes.
pub type Fields = BTreeMap<String, String>;

/// Reserved request header carrying the request target below the script.
pub const PATH_HEADER: &str = "x-path";

/// Reserved request header carrying the HTTP verb.
pub const METHOD_HEADER: &str = "x-method";

/// Which side of the exchange a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Request,
    Response,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Request => f.write_str("request"),
            Role::Response => f.write_str("response"),
        }
    }
}

/// Request sent into a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub headers: Fields,
    pub query: Fields,
    pub body: Bytes,
}

impl Request {
    /// Create a request carrying the two reserved headers.
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self::default()
            .with_header(PATH_HEADER, path)
            .with_header(METHOD_HEADER, method)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> Option<&str> {
        self.headers.get(PATH_HEADER).map(String::as_str)
    }

    pub fn method(&self) -> Option<&str> {
        self.headers.get(METHOD_HEADER).map(String::as_str)
    }
}

/// Response written back by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Fields,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, headers: Fields, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_new_sets_reserved_headers() {
        let req = Request::new("users/42", "DELETE");
        assert_eq!(req.path(), Some("users/42"));
        assert_eq!(req.method(), Some("DELETE"));
        assert!(req.query.is_empty());
        assert!(req.body.is_empty());
    }

    #[test]
    fn default_request_has_no_reserved_headers() {
        let req = Request::default().with_header("accept", "*/*");
        assert_eq!(req.path(), None);
        assert_eq!(req.method(), None);
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Request.to_string(), "request");
        assert_eq!(Role::Response.to_string(), "response");
    }
}
