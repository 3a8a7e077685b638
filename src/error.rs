use thiserror::Error;

/// Structured error context for configuration and construction failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "max_batch_size", "closing_thresholds[1]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "batcher_builder", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Crate-level error for building and configuring a batcher.
///
/// Failures of individual submissions never use this type; they are reported
/// per entry through [`BatchError`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Outcome of a single submission that did not produce a value.
///
/// `Batch`, `Pacing`, `InvalidOutputLength` and `Panicked` are batch-level:
/// every member of the batch receives the same error. `Item` is isolated to
/// the one entry whose position carried it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError<E> {
    #[error("batch operation failed: {0}")]
    Batch(E),

    #[error("{0}")]
    Item(E),

    #[error("pacing step failed: {0}")]
    Pacing(E),

    #[error("invalid output length: expected {expected}, got {actual}")]
    InvalidOutputLength { expected: usize, actual: usize },

    #[error("batch collaborator panicked")]
    Panicked,

    #[error("entry abandoned before its batch settled")]
    Abandoned,
}

impl<E> BatchError<E> {
    /// The collaborator's own error, if this outcome carries one.
    pub fn inner(&self) -> Option<&E> {
        match self {
            BatchError::Batch(e) | BatchError::Item(e) | BatchError::Pacing(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            BatchError::Batch(e) | BatchError::Item(e) | BatchError::Pacing(e) => Some(e),
            _ => None,
        }
    }

    /// True when every member of the batch received this same outcome.
    pub fn is_batch_level(&self) -> bool {
        !matches!(self, BatchError::Item(_) | BatchError::Abandoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_formatting() {
        let err = Error::validation_with_context(
            "max_batch_size must be positive",
            ErrorContext::new()
                .with_field_path("max_batch_size")
                .with_source("config_loader"),
        );
        assert_eq!(
            err.to_string(),
            "Validation error: max_batch_size must be positive (field: max_batch_size, source: config_loader)"
        );
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("max_batch_size")
        );
    }

    #[test]
    fn test_context_empty() {
        let err = Error::runtime_with_context("no runtime", ErrorContext::default());
        assert_eq!(err.to_string(), "Runtime error: no runtime");
    }

    #[test]
    fn test_batch_error_scopes() {
        let item: BatchError<String> = BatchError::Item("missing".into());
        assert!(!item.is_batch_level());
        assert_eq!(item.to_string(), "missing");
        assert_eq!(item.inner().map(String::as_str), Some("missing"));

        let len: BatchError<String> = BatchError::InvalidOutputLength {
            expected: 3,
            actual: 4,
        };
        assert!(len.is_batch_level());
        assert_eq!(len.to_string(), "invalid output length: expected 3, got 4");
        assert!(len.into_inner().is_none());
    }
}
