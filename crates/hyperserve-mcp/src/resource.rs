//! Resource model.
//!
//! A resource is a readable URI. `read()` returns any JSON-encodable value;
//! the handler wraps non-string payloads as JSON-encoded text when
//! answering `resources/read`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::ResourceError;

/// A readable resource exposed through the control plane
#[async_trait]
pub trait Resource: Send + Sync {
    /// Opaque resource URI
    fn uri(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// MIME type of the payload
    fn mime_type(&self) -> &str {
        "application/json"
    }

    /// Read the current payload
    async fn read(&self) -> Result<Value, ResourceError>;

    /// URIs this resource answers for (single-URI by default)
    fn list(&self) -> Vec<String> {
        vec![self.uri().to_string()]
    }
}

type ReadFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, ResourceError>> + Send + Sync>;

/// A resource built from a closure
#[derive(Clone)]
pub struct FnResource {
    uri: String,
    name: String,
    description: String,
    mime_type: String,
    read: ReadFn,
}

impl std::fmt::Debug for FnResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnResource")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .finish()
    }
}

impl FnResource {
    /// Build a resource from an async closure
    pub fn new<F>(
        uri: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        read: F,
    ) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Value, ResourceError>> + Send + Sync + 'static,
    {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: description.into(),
            mime_type: "application/json".to_string(),
            read: Arc::new(read),
        }
    }

    /// Override the MIME type
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

#[async_trait]
impl Resource for FnResource {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn read(&self) -> Result<Value, ResourceError> {
        (self.read)().await
    }
}
