//! Route multiplexer.
//!
//! Terminal handlers are registered by pattern. An exact-path match always
//! wins; otherwise the longest registered pattern ending in `/` that
//! prefixes the request path is used, with `/` matching everything.
//! Registration is expected before start but is serialized by the registry
//! lock, so handlers added from an `on_ready` callback become routable.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::handler::HttpHandler;

/// Pattern-keyed handler registry
#[derive(Default)]
pub struct RouteMux {
    routes: RwLock<HashMap<String, HttpHandler>>,
}

impl std::fmt::Debug for RouteMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMux")
            .field("routes", &self.patterns())
            .finish()
    }
}

impl RouteMux {
    /// Create an empty mux
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a terminal handler for a pattern. Re-registering a pattern
    /// replaces the previous handler.
    pub fn handle(&self, pattern: impl Into<String>, handler: HttpHandler) {
        let pattern = pattern.into();
        debug!(pattern = %pattern, "Route registered");
        self.routes.write().insert(pattern, handler);
    }

    /// Whether an exact pattern is registered
    pub fn has_exact(&self, pattern: &str) -> bool {
        self.routes.read().contains_key(pattern)
    }

    /// Resolve the handler for a request path
    pub fn resolve(&self, path: &str) -> Option<HttpHandler> {
        let routes = self.routes.read();
        if let Some(handler) = routes.get(path) {
            return Some(handler.clone());
        }
        // Longest prefix pattern ending in '/' wins.
        let mut best: Option<(&String, &HttpHandler)> = None;
        for (pattern, handler) in routes.iter() {
            if !pattern.ends_with('/') || !path.starts_with(pattern.as_str()) {
                continue;
            }
            if best.is_none_or(|(b, _)| pattern.len() > b.len()) {
                best = Some((pattern, handler));
            }
        }
        best.map(|(_, h)| h.clone())
    }

    /// Registered patterns (sorted, for inspection)
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self.routes.read().keys().cloned().collect();
        patterns.sort();
        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, text_response};
    use http::StatusCode;

    fn tagged(tag: &'static str) -> HttpHandler {
        handler_fn(move |_req| async move { text_response(StatusCode::OK, tag) })
    }

    #[tokio::test]
    async fn test_exact_match_wins() {
        let mux = RouteMux::new();
        mux.handle("/api/", tagged("prefix"));
        mux.handle("/api/users", tagged("exact"));

        let handler = mux.resolve("/api/users").unwrap();
        let req = http::Request::builder()
            .uri("/api/users")
            .body(crate::handler::empty_body())
            .unwrap();
        let resp = handler(req).await;
        let body = crate::handler::collect_body(resp.into_body()).await.unwrap();
        assert_eq!(&body[..], b"exact");
    }

    #[test]
    fn test_longest_prefix() {
        let mux = RouteMux::new();
        mux.handle("/", tagged("root"));
        mux.handle("/api/", tagged("api"));
        mux.handle("/api/v2/", tagged("v2"));

        assert!(mux.resolve("/api/v2/things").is_some());
        // Longest prefix "/api/v2/" should be chosen over "/api/" and "/".
        let patterns = mux.patterns();
        assert_eq!(patterns, vec!["/", "/api/", "/api/v2/"]);
    }

    #[test]
    fn test_no_match() {
        let mux = RouteMux::new();
        mux.handle("/api/users", tagged("exact"));
        assert!(mux.resolve("/other").is_none());
    }

    #[test]
    fn test_root_matches_everything() {
        let mux = RouteMux::new();
        mux.handle("/", tagged("root"));
        assert!(mux.resolve("/anything/at/all").is_some());
    }
}
