//! Generative text client abstraction.
//!
//! [`TextGenerator`] is the seam between MindFlow and whatever produces
//! text. Callers hand it a role-tagged message list and get back either
//! one completed string or a stream of fragments. Failures are a typed
//! [`GenerationError`], never text that could be mistaken for content.
//!
//! | Implementation | Module |
//! |----------------|--------|
//! | [`OpenAiCompatClient`] | [`openai`] |
//!
//! Streams are plain `futures` streams: dropping one stops reading the
//! upstream body and releases the connection.

pub mod openai;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use mindflow_core::models::ChatMessage;

pub use openai::OpenAiCompatClient;

/// Why a generation request produced no usable text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The service answered with a non-success status.
    #[error("generation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generation request timed out")]
    Timeout,

    /// A response body or stream frame that could not be decoded.
    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("generation transport error: {0}")]
    Transport(String),

    /// The service answered successfully but with no text.
    #[error("generation service returned no content")]
    Empty,
}

impl GenerationError {
    /// Short machine-readable category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Status { .. } => "upstream_status",
            Self::Timeout => "upstream_timeout",
            Self::Malformed(_) => "upstream_malformed",
            Self::Transport(_) => "upstream_transport",
            Self::Empty => "upstream_empty",
        }
    }
}

/// Per-request overrides. `None` fields fall back to the client's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn with_model(model: Option<&str>) -> Self {
        Self {
            model: model.map(str::to_string),
            ..Self::default()
        }
    }
}

/// Incremental text fragments. Ends after the final fragment or the first error.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model used when a request does not name one.
    fn default_model(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;

    /// Start a streaming completion. Errors before the first byte are
    /// returned directly, later ones arrive as stream items.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TextStream, GenerationError>;
}
