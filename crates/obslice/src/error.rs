#![forbid(unsafe_code)]

//! Error type for slice operations.

use thiserror::Error;

/// Boxed error returned by fallible mutation templates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, SliceError>;

/// Errors surfaced to the direct caller of a slice operation.
///
/// None of these leave the slice in a modified state: a failed publish never
/// commits and never notifies.
#[derive(Debug, Error)]
pub enum SliceError {
    /// A named publisher's mutation template failed.
    #[error("publisher '{publisher}' failed: {source}")]
    Mutation {
        publisher: String,
        #[source]
        source: BoxError,
    },

    #[error("no publisher named '{0}'")]
    UnknownPublisher(String),

    #[error("no subscription template named '{0}'")]
    UnknownTemplate(String),

    /// The publisher exists but takes a different payload type.
    #[error("publisher '{name}' expects a payload of type {expected}")]
    PayloadMismatch { name: String, expected: &'static str },

    /// The template exists but its argument or projection type differs.
    #[error("template '{name}' is registered as ({arg}) -> {projection}")]
    TemplateMismatch {
        name: String,
        arg: &'static str,
        projection: &'static str,
    },

    /// A handle outlived the slice it was created from.
    #[error("slice '{0}' has been dropped")]
    Closed(String),

    #[error("invalid notify configuration: {0}")]
    Config(String),
}

impl SliceError {
    /// Wrap a template failure for the named publisher.
    #[must_use]
    pub fn mutation(publisher: impl Into<String>, source: BoxError) -> Self {
        Self::Mutation {
            publisher: publisher.into(),
            source,
        }
    }

    /// Whether this error came from the mutation itself rather than from
    /// looking up the publisher.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Mutation { .. })
    }
}
