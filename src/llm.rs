//! Inference endpoint abstraction
//!
//! The session only needs one thing from the outside world: open a request and
//! get its response body back as a stream of byte chunks.

mod client;
mod error;
mod types;

pub use client::{HttpTransport, TransportConfig, DEFAULT_ENDPOINT};
pub use error::{LlmError, LlmErrorKind};
pub use types::*;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Raw response body; dropping it closes the request
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, LlmError>>;

/// Request/stream boundary to the inference endpoint
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send the request and return the response body once headers arrive.
    ///
    /// Non-success statuses are errors; the body is not streamed.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError>;

    /// Identifies the transport in logs
    fn name(&self) -> &str;
}

/// Logging wrapper for transports
pub struct LoggingTransport {
    inner: Arc<dyn ChatTransport>,
    name: String,
}

impl LoggingTransport {
    pub fn new(inner: Arc<dyn ChatTransport>) -> Self {
        let name = inner.name().to_string();
        Self { inner, name }
    }
}

#[async_trait]
impl ChatTransport for LoggingTransport {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.open_stream(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    transport = %self.name,
                    model = %request.model,
                    messages = request.messages.len(),
                    duration_ms = %duration.as_millis(),
                    "Chat stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    transport = %self.name,
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.is_retryable(),
                    "Chat stream failed to open"
                );
            }
        }

        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
