use std::path::PathBuf;
use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the image-analysis engine.
///
/// # Why structured errors
///
/// Each variant captures context specific to its error domain (filesystem, image processing,
/// model operations, input validation), providing diagnostic information without requiring
/// callers to parse error strings. Models and utilities return this type; the orchestrator
/// wraps it into [`InferenceError`] at the request boundary.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing error: {operation} failed")]
    ImageProcessing {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },

    #[error("Degenerate image: {width}x{height} cannot be analysed")]
    DegenerateImage { width: u32, height: u32 },
}

pub type Result<T> = std::result::Result<T, VisionError>;

impl VisionError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// # Why default values for context
///
/// Some I/O errors occur without specific path/operation context. Code that has context
/// should construct `VisionError::FileSystem` directly with the specific path and operation.
impl From<std::io::Error> for VisionError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors to image processing errors.
impl From<image::ImageError> for VisionError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert result serialization errors to model errors.
///
/// # Why model error category
///
/// Serialization only happens while a model assembles its result map, so a failure there
/// is a failure of the procedure itself rather than of the caller's input.
impl From<serde_json::Error> for VisionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Model {
            operation: "result serialization".to_string(),
            source: Box::new(err),
        }
    }
}

/// Convert ndarray shape errors to model errors.
///
/// # Why model error category
///
/// Shape errors occur while pixel buffers are reshaped into the matrices a model works on,
/// so they're categorized as model errors rather than a separate tensor error type.
impl From<ndarray::ShapeError> for VisionError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "pixel matrix reshape".to_string(),
            source: Box::new(err),
        }
    }
}

/// Coarse classification of an [`InferenceError`], for transport layers that map
/// failures onto status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    ExecutionFailure,
}

/// Request-level failures reported by the orchestrator.
///
/// `NotFound` and `InvalidInput` are raised before a model runs; everything that goes wrong
/// inside `predict` (or while loading the instance) surfaces as `ExecutionFailure`.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model not found: {model_id}")]
    NotFound { model_id: String },

    #[error("invalid input: {field} {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("model {model_id} failed during execution")]
    ExecutionFailure {
        model_id: String,
        #[source]
        source: VisionError,
    },
}

impl InferenceError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
        }
    }
}

/// Validation errors raised by input parsing become `InvalidInput`; any other engine error
/// has no model to attribute it to, so it is reported as a failure of an unnamed execution.
impl From<VisionError> for InferenceError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Validation { field, reason } => Self::InvalidInput { field, reason },
            other => Self::ExecutionFailure {
                model_id: "unknown".to_string(),
                source: other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_invalid_input() {
        let err: InferenceError = VisionError::validation("color", "must be #RRGGBB").into();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "invalid input: color must be #RRGGBB");
    }

    #[test]
    fn test_execution_failure_keeps_source() {
        let err = InferenceError::ExecutionFailure {
            model_id: "edge-detector".to_string(),
            source: VisionError::DegenerateImage {
                width: 0,
                height: 0,
            },
        };
        assert_eq!(err.kind(), ErrorKind::ExecutionFailure);
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("Degenerate image: 0x0 cannot be analysed")
        );
    }
}
