use thiserror::Error;

/// Unified error type for every crate in the workspace.
///
/// Mirrors the four error kinds the training engine distinguishes:
/// usage (bad CLI input), I/O (unopenable files), data (corpus/vocabulary
/// shape problems), and persistence (malformed model files). Numeric
/// guards inside the loss kernels (theta near zero, sigmoid saturation)
/// are never surfaced here — they are handled locally and silently, per
/// design.
#[derive(Debug, Clone, Error)]
pub enum TempovecError {
    /// A CLI flag was missing, unknown, or malformed.
    #[error("usage error: {message}")]
    Usage { message: String },

    /// A file could not be opened, read, or written.
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    /// The corpus or vocabulary is shaped in a way training cannot proceed
    /// with (e.g. empty vocabulary after thresholding, dimension mismatch
    /// against pretrained vectors).
    #[error("data error: {message}")]
    Data { message: String },

    /// A persisted model file is malformed or from an incompatible build.
    #[error("persistence error: {message}")]
    Persistence { message: String },
}

impl TempovecError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }
}

/// Convenience conversion for the common "open this path" failure shape.
///
/// # Example
///
/// ```
/// use tempovec_core::TempovecError;
///
/// let err = TempovecError::usage("missing -input");
/// assert!(err.to_string().contains("missing -input"));
/// ```
pub type Result<T> = std::result::Result<T, TempovecError>;
