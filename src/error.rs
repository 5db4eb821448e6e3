use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArdatError {
    #[error("Corrupted archive: {0}")]
    CorruptedArchive(String),

    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Usage error: {0}")]
    Usage(String),
}

pub type Result<T> = std::result::Result<T, ArdatError>;

impl ArdatError {
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::CorruptedArchive(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Prefix a corruption message with the entry it was found in.
    /// Other kinds pass through untouched.
    pub fn in_entry(self, path: &str) -> Self {
        match self {
            Self::CorruptedArchive(msg) => Self::CorruptedArchive(format!("{}: {}", path, msg)),
            other => other,
        }
    }

    pub fn is_corrupted(&self) -> bool {
        matches!(self, Self::CorruptedArchive(_))
    }
}

/// Unwraps an `ArdatError` that travelled through a `std::io::Read` boundary.
impl From<io::Error> for ArdatError {
    fn from(err: io::Error) -> Self {
        let carries_ardat = err
            .get_ref()
            .map_or(false, |inner| inner.is::<ArdatError>());
        if carries_ardat {
            if let Some(inner) = err.into_inner() {
                match inner.downcast::<ArdatError>() {
                    Ok(ardat) => return *ardat,
                    Err(other) => return Self::Io(io::Error::new(io::ErrorKind::Other, other)),
                }
            }
            return Self::corrupted("lost error context");
        }
        Self::Io(err)
    }
}

impl From<ArdatError> for io::Error {
    fn from(err: ArdatError) -> Self {
        match err {
            ArdatError::Io(inner) => inner,
            ArdatError::CorruptedArchive(_) | ArdatError::Json(_) => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
            ArdatError::NotSupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            ArdatError::Usage(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
        }
    }
}
