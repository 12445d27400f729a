//! Error types for handle and filesystem operations.

use thiserror::Error;

/// Result type alias for handle operations.
pub type HandleResult<T> = Result<T, HandleError>;

/// Domain a numeric error code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// An errno-domain code reported by the operating system.
    Errno,
    /// A kernel-status-domain code, on platforms that report them.
    KernelStatus,
    /// A portable code defined by this library.
    Generic,
}

/// Error variants for handle operations.
///
/// OS-reported errors are propagated with their original code and domain
/// intact; nothing is translated into a different code on the way up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// An errno-domain error reported by a syscall.
    #[error("OS error {errno}")]
    Os {
        /// The raw errno value.
        errno: i32,
    },

    /// A kernel-status-domain error, on platforms that report them.
    #[error("kernel status {status:#x}")]
    KernelStatus {
        /// The raw kernel status value.
        status: i64,
    },

    /// A retry loop could not converge before the caller's deadline.
    #[error("deadline expired before the operation could complete")]
    TimedOut,

    /// The platform cannot provide the requested information.
    #[error("function not supported on this platform")]
    FunctionNotSupported,

    /// The kernel handed back path bytes that are not a valid path.
    #[error("illegal byte sequence in path")]
    IllegalByteSequence,

    /// The operation is valid but not supported by this handle.
    #[error("operation not supported")]
    OperationNotSupported,
}

impl HandleError {
    /// Captures `errno` from the calling thread immediately after a failed
    /// syscall.
    pub fn last_os_error() -> Self {
        HandleError::Os {
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// Constructs an errno-domain error from a raw code.
    pub fn from_errno(errno: i32) -> Self {
        HandleError::Os { errno }
    }

    /// Returns the numeric code carried by this error.
    ///
    /// For errno-domain errors this is the errno; for kernel-status errors
    /// the raw status; portable errors use small library-defined codes.
    pub fn code(&self) -> i64 {
        match self {
            HandleError::Os { errno } => *errno as i64,
            HandleError::KernelStatus { status } => *status,
            HandleError::TimedOut => 1,
            HandleError::FunctionNotSupported => 2,
            HandleError::IllegalByteSequence => 3,
            HandleError::OperationNotSupported => 4,
        }
    }

    /// Returns the domain the numeric code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            HandleError::Os { .. } => ErrorCategory::Errno,
            HandleError::KernelStatus { .. } => ErrorCategory::KernelStatus,
            _ => ErrorCategory::Generic,
        }
    }

    /// True if this is the errno-domain error with the given code.
    pub fn is_errno(&self, errno: i32) -> bool {
        matches!(self, HandleError::Os { errno: e } if *e == errno)
    }
}

impl From<std::io::Error> for HandleError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(errno) => HandleError::Os { errno },
            None => HandleError::Os { errno: libc::EIO },
        }
    }
}
