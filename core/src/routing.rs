//! Host selection for outgoing requests.

use crate::request::GraphRequest;
use crate::token::AuthenticationToken;

pub const DEFAULT_GRAPH_DOMAIN: &str = "facebook.com";
pub const GAMING_GRAPH_DOMAIN: &str = "fb.gg";

/// Decides the scheme and host (no trailing slash, no version) for a request.
///
/// Batch envelopes are routed with `request == None`.
pub trait DomainRouter: Send + Sync {
    fn base_url(&self, request: Option<&GraphRequest>, authentication: Option<&AuthenticationToken>) -> String;
}

/// `graph.facebook.com`, with the video upload host for `.../videos`
/// paths and `fb.gg` for gaming identities.
#[derive(Debug, Default)]
pub struct DefaultDomainRouter;

impl DomainRouter for DefaultDomainRouter {
    fn base_url(&self, request: Option<&GraphRequest>, authentication: Option<&AuthenticationToken>) -> String {
        let prefix = match request {
            Some(request) if request.path().trim_end_matches('/').ends_with("videos") => "graph-video.",
            _ => "graph.",
        };
        let domain = match authentication {
            Some(token) if token.is_gaming() => GAMING_GRAPH_DOMAIN,
            _ => DEFAULT_GRAPH_DOMAIN,
        };
        format!("https://{prefix}{domain}")
    }
}

/// Sends everything to one base URL, e.g. a local mock server.
#[derive(Debug, Clone)]
pub struct FixedDomainRouter {
    base: String,
}

impl FixedDomainRouter {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }
}

impl DomainRouter for FixedDomainRouter {
    fn base_url(&self, _request: Option<&GraphRequest>, _authentication: Option<&AuthenticationToken>) -> String {
        self.base.clone()
    }
}
