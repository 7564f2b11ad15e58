//! Handler and body types shared across the kernel.
//!
//! Handlers are boxed async functions over `http` requests and responses
//! with a type-erased body. Erasing the body lets the same handler type
//! serve hyper's streaming `Incoming` bodies and buffered replacements
//! installed by interceptors, and keeps the request's upgrade extension
//! (`hyper::upgrade::OnUpgrade`) intact as it flows through middleware.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full, combinators::BoxBody};

/// Type-erased response/request body
pub type HttpBody = BoxBody<Bytes, hyper::Error>;

/// HTTP request with a type-erased body
pub type HttpRequest = Request<HttpBody>;

/// HTTP response with a type-erased body
pub type HttpResponse = Response<HttpBody>;

/// Boxed async request handler
pub type HttpHandler = Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, HttpResponse> + Send + Sync>;

/// Remote peer address, inserted into request extensions by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Build a full in-memory body
pub fn full_body(data: impl Into<Bytes>) -> HttpBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Build an empty body
pub fn empty_body() -> HttpBody {
    full_body(Bytes::new())
}

/// Wrap a plain async function as a boxed handler
pub fn handler_fn<F, Fut>(f: F) -> HttpHandler
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Plain-text response with the given status
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

/// JSON response with the given status
pub fn json_response(status: StatusCode, value: &serde_json::Value) -> HttpResponse {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .unwrap_or_else(|_| Response::new(empty_body()))
}

/// Collect a request body into memory
pub async fn collect_body(body: HttpBody) -> Result<Bytes, hyper::Error> {
    Ok(body.collect().await?.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_body_collects() {
        let body = full_body("hello");
        let bytes = collect_body(body).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_handler_fn_dispatch() {
        let handler = handler_fn(|_req| async { text_response(StatusCode::OK, "ok") });
        let req = Request::builder().uri("/x").body(empty_body()).unwrap();
        let resp = handler(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
