//! Security-header and CORS middleware.

use std::sync::Arc;

use http::{HeaderValue, Method, StatusCode, header};

use crate::handler::{HttpHandler, HttpRequest, empty_body};
use crate::middleware::Middleware;
use crate::options::CorsConfig;

/// Sets the hardened response-header set
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    csp: Option<String>,
    hsts: bool,
    frame_options: bool,
}

impl SecurityHeaders {
    /// Headers for browser-facing routes, with a restrictive default CSP
    pub fn web(tls: bool) -> Self {
        Self {
            csp: Some("default-src 'self'".to_string()),
            hsts: tls,
            frame_options: true,
        }
    }

    /// Headers for API routes: no CSP, everything else on
    pub fn api(tls: bool) -> Self {
        Self {
            csp: None,
            hsts: tls,
            frame_options: true,
        }
    }

    /// Sniffing protection only
    pub fn bare() -> Self {
        Self {
            csp: None,
            hsts: false,
            frame_options: false,
        }
    }

    /// Override the Content-Security-Policy value
    pub fn with_csp(mut self, csp: impl Into<String>) -> Self {
        self.csp = Some(csp.into());
        self
    }
}

impl Middleware for SecurityHeaders {
    fn name(&self) -> &str {
        "security-headers"
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        let config = self.clone();
        Arc::new(move |req: HttpRequest| {
            let config = config.clone();
            let next = next.clone();
            Box::pin(async move {
                let mut resp = next(req).await;
                let headers = resp.headers_mut();
                headers.insert(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                );
                headers.insert(
                    header::X_XSS_PROTECTION,
                    HeaderValue::from_static("1; mode=block"),
                );
                if config.frame_options {
                    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
                }
                if config.hsts {
                    headers.insert(
                        header::STRICT_TRANSPORT_SECURITY,
                        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
                    );
                }
                if let Some(csp) = &config.csp
                    && let Ok(value) = HeaderValue::from_str(csp)
                {
                    headers.insert(header::CONTENT_SECURITY_POLICY, value);
                }
                resp
            })
        })
    }
}

/// CORS middleware: preflight short-circuit, origin allow-listing,
/// `Vary: Origin` on every CORS response
#[derive(Debug, Clone)]
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    /// Build from a [`CorsConfig`]
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        self.config
            .allowed_origins
            .iter()
            .any(|o| o == "*" || o.eq_ignore_ascii_case(origin))
    }

    fn wildcard(&self) -> bool {
        self.config.allowed_origins.iter().any(|o| o == "*")
    }
}

impl Middleware for Cors {
    fn name(&self) -> &str {
        "cors"
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        let cors = self.clone();
        Arc::new(move |req: HttpRequest| {
            let cors = cors.clone();
            let next = next.clone();
            Box::pin(async move {
                let origin = req
                    .headers()
                    .get(header::ORIGIN)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                let Some(origin) = origin else {
                    // Not a CORS request.
                    return next(req).await;
                };

                if !cors.origin_allowed(&origin) {
                    let mut resp = http::Response::builder()
                        .status(StatusCode::FORBIDDEN)
                        .body(empty_body())
                        .unwrap_or_else(|_| http::Response::new(empty_body()));
                    resp.headers_mut()
                        .insert(header::VARY, HeaderValue::from_static("Origin"));
                    return resp;
                }

                // Wildcard origin disables credentials.
                let allow_origin = if cors.wildcard() {
                    HeaderValue::from_static("*")
                } else {
                    HeaderValue::from_str(&origin)
                        .unwrap_or_else(|_| HeaderValue::from_static("*"))
                };
                let credentials = cors.config.allow_credentials && !cors.wildcard();

                if req.method() == Method::OPTIONS {
                    let mut builder = http::Response::builder()
                        .status(StatusCode::NO_CONTENT)
                        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin)
                        .header(header::VARY, "Origin")
                        .header(
                            header::ACCESS_CONTROL_ALLOW_METHODS,
                            cors.config.allowed_methods.join(", "),
                        )
                        .header(
                            header::ACCESS_CONTROL_ALLOW_HEADERS,
                            cors.config.allowed_headers.join(", "),
                        )
                        .header(
                            header::ACCESS_CONTROL_MAX_AGE,
                            cors.config.max_age_secs.to_string(),
                        );
                    if credentials {
                        builder =
                            builder.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
                    }
                    return builder
                        .body(empty_body())
                        .unwrap_or_else(|_| http::Response::new(empty_body()));
                }

                let mut resp = next(req).await;
                let headers = resp.headers_mut();
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
                headers.insert(header::VARY, HeaderValue::from_static("Origin"));
                if credentials {
                    headers.insert(
                        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                        HeaderValue::from_static("true"),
                    );
                }
                resp
            })
        })
    }
}
