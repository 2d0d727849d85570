//! Errors returned by the core operations.

use thiserror::Error;

use mindflow_core::lifecycle::TransitionError;

use crate::llm::GenerationError;
use crate::notify::NotifyError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing, or owned by someone else. The two are not distinguished.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error("{step} generation failed: {source}")]
    Generation {
        step: &'static str,
        #[source]
        source: GenerationError,
    },

    #[error(transparent)]
    Notification(#[from] NotifyError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn generation(step: &'static str) -> impl FnOnce(GenerationError) -> Self {
        move |source| Self::Generation { step, source }
    }
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// Keep `item` only if it exists and belongs to `owner_id`.
pub(crate) fn owned<T>(
    item: Option<T>,
    owner_of: impl Fn(&T) -> &str,
    owner_id: &str,
    what: &'static str,
) -> ServiceResult<T> {
    match item {
        Some(item) if owner_of(&item) == owner_id => Ok(item),
        _ => Err(ServiceError::NotFound(what)),
    }
}
