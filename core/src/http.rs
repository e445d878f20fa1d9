//! HTTP exchange types for the host-does-IO pattern.
//!
//! # Design
//! A connection never touches the network itself. It builds an `HttpRequest`
//! value, hands it to an injected `Transport`, and later parses the
//! `HttpResponse` the transport returns. Bodies are raw bytes because batch
//! and POST bodies are gzip-compressed and responses must be checked for
//! valid UTF-8 before JSON parsing.

use std::fmt;
use std::time::Duration;

/// HTTP method of a Graph API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully serialized HTTP request.
///
/// Built by `GraphRequestConnection::build_http_request`. The transport is
/// responsible for executing it and reporting back exactly once.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Vec::len)
    }
}

/// An HTTP response as returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_renders_uppercase() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Post.to_string(), "POST");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = HttpRequest {
            method: HttpMethod::Post,
            url: "https://graph.facebook.com/v17.0".to_string(),
            headers: vec![("Content-Encoding".to_string(), "gzip".to_string())],
            body: Some(vec![1, 2, 3]),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(req.header("content-encoding"), Some("gzip"));
        assert_eq!(req.header("content-type"), None);
        assert_eq!(req.body_len(), 3);
    }
}
