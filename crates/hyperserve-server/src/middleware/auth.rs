//! Bearer-token authentication middleware.
//!
//! Token validation is delegated to a caller-supplied callback; the
//! middleware only extracts the token and maps failures to a generic 401.
//! [`static_token_validator`] builds a validator comparing against a fixed
//! secret in constant time.

use std::sync::Arc;

use http::{StatusCode, header};
use subtle::ConstantTimeEq;

use crate::handler::{HttpHandler, HttpRequest, text_response};
use crate::middleware::Middleware;
use crate::options::AuthValidator;

/// Requires a valid bearer token on every wrapped request
#[derive(Clone)]
pub struct AuthToken {
    validator: AuthValidator,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken").finish_non_exhaustive()
    }
}

impl AuthToken {
    /// Build from a validator callback
    pub fn new(validator: AuthValidator) -> Self {
        Self { validator }
    }
}

impl Middleware for AuthToken {
    fn name(&self) -> &str {
        "auth-token"
    }

    fn wrap(&self, next: HttpHandler) -> HttpHandler {
        let validator = self.validator.clone();
        Arc::new(move |req: HttpRequest| {
            let validator = validator.clone();
            let next = next.clone();
            Box::pin(async move {
                let token = req
                    .headers()
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "));
                match token {
                    Some(token) if validator(token) => next(req).await,
                    _ => text_response(StatusCode::UNAUTHORIZED, "unauthorized"),
                }
            })
        })
    }
}

/// Validator comparing tokens against `expected` in constant time
pub fn static_token_validator(expected: impl Into<String>) -> AuthValidator {
    let expected = expected.into();
    Arc::new(move |token: &str| {
        token.as_bytes().ct_eq(expected.as_bytes()).into()
    })
}
