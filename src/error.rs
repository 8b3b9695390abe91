use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, PopenError>;

/// Error returned by spawn, stream and lifecycle operations.
#[derive(Debug, Error)]
pub enum PopenError {
    /// An OS primitive such as `pipe`, `fork`, `dup2` or `wait4` failed.
    #[error(transparent)]
    Os(#[from] OsError),

    /// A configuration or argument problem detected before reaching the OS:
    /// a missing or duplicated builder field, an empty argument vector, a
    /// path that does not exist.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A stream-level I/O failure: reading or writing a closed stream, a
    /// stream without the required capability, or a hard read/write error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A deadline passed before the child terminated.
    #[error("{message}: timed out after {elapsed:?}")]
    TimeoutExpired {
        /// What was being waited for.
        message: String,
        /// Time spent waiting before giving up.
        elapsed: Duration,
    },

    /// `wait4` produced a status word that is neither a normal exit nor a
    /// signal termination.  Should be unreachable on conforming kernels.
    #[error("unrecognized wait status {0:#x}")]
    BadStatus(i32),
}

impl PopenError {
    pub(crate) fn os(source: io::Error, message: impl Into<String>) -> PopenError {
        PopenError::Os(OsError::new(source, message))
    }
}

/// Failure of an OS primitive, carrying the errno-level cause and the file
/// paths involved in the operation, if any.
#[derive(Debug)]
pub struct OsError {
    message: String,
    path: Option<PathBuf>,
    path2: Option<PathBuf>,
    source: io::Error,
}

impl OsError {
    pub(crate) fn new(source: io::Error, message: impl Into<String>) -> OsError {
        OsError {
            message: message.into(),
            path: None,
            path2: None,
            source,
        }
    }

    pub(crate) fn with_path(
        source: io::Error,
        message: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> OsError {
        OsError {
            message: message.into(),
            path: Some(path.as_ref().to_owned()),
            path2: None,
            source,
        }
    }

    /// The raw `errno` value reported by the OS, if there was one.
    pub fn errno(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    /// The first file path involved in the failed operation.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The second file path involved in the failed operation.
    pub fn path2(&self) -> Option<&Path> {
        self.path2.as_deref()
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(path) = &self.path {
            write!(f, " '{}'", path.display())?;
        }
        if let Some(path2) = &self.path2 {
            write!(f, " '{}'", path2.display())?;
        }
        write!(f, ": {}", self.source)
    }
}

impl std::error::Error for OsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
