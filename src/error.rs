//! Custom error types for the client.
//!
//! This module defines the primary error type, `MrcError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report failures, from a dead RPC binding to a script that exited with an error.
//!
//! ## Error Hierarchy
//!
//! `MrcError` separates failures by where they were detected:
//!
//! - **`Remote`**: A remote call returned a non-zero code. The error normalizer
//!   has already asked the server to translate the code, so the variant carries
//!   both the numeric code and the display string, plus the [`ErrorKind`] the
//!   code belongs to.
//! - **Local variants** (`InvalidHandle`, `ClientBusy`, `NoScriptSource`, ...):
//!   Raised by the client before the server is contacted.
//! - **`ScriptExecution`**: The script ran to completion but reported a
//!   non-zero result code. This is distinct from a transport failure.
//! - **`Config`**: Wraps [`ConfigError`] from configuration loading.
//!
//! Every variant maps onto exactly one [`ErrorKind`], so callers can match on
//! `err.kind()` without caring whether the client or the server caught it.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::codes::*;
use crate::config::ConfigError;

/// Convenience alias for results using the client error type.
pub type MrcResult<T> = std::result::Result<T, MrcError>;

/// A raw status code returned by the server or the client library.
///
/// `0` means success. Values at or above [`MRC_ERR_BASE`] belong to the MRC
/// taxonomy; smaller values come from the OS or the RPC runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// The success code.
    pub const NONE: ErrorCode = ErrorCode(MRC_ERR_NONE);

    /// Returns true for the success code.
    pub fn is_success(self) -> bool {
        self.0 == MRC_ERR_NONE
    }

    /// The raw integer value.
    pub fn value(self) -> i32 {
        self.0
    }

    /// Classify the code into the client's error taxonomy.
    pub fn kind(self) -> ErrorKind {
        match self.0 {
            MRC_ERR_INVALID_HANDLE => ErrorKind::InvalidHandle,
            MRC_ERR_INVALID_PARAM => ErrorKind::InvalidArgument,
            MRC_ERR_NO_MEM => ErrorKind::Allocation,
            MRC_ERR_CLIENT_INTERFACE_BUSY => ErrorKind::ClientBusy,
            MRC_ERR_CLIENT_INTERFACE_NOT_OPEN => ErrorKind::NotInitialized,
            MRC_ERR_REQUEST_CONTROL_FAILED | MRC_ERR_RELEASE_CONTROL_FAILED => {
                ErrorKind::TransitionRefused
            }
            MRC_ERR_NO_SCRIPT_FILENAME_OR_TEXT => ErrorKind::NoScriptSource,
            MRC_ERR_TIMEOUT_WAITING_FOR_IDLE | MRC_ERR_TIMEOUT_WAITING_FOR_SCRIPT => {
                ErrorKind::Timeout
            }
            MRC_ERR_RUN_SCRIPT_FAILED | MRC_ERR_SCRIPT_CONTEXT_NO_APP => {
                ErrorKind::ScriptExecution
            }
            _ => ErrorKind::Transport,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode(code)
    }
}

/// The error taxonomy every failure is sorted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Server unreachable or communication failure.
    Transport,
    /// The handle was never created or has already been freed.
    InvalidHandle,
    /// A parameter value was rejected.
    InvalidArgument,
    /// The local session is not idle.
    ClientBusy,
    /// The operation was attempted before the interface was set up.
    NotInitialized,
    /// Memory could not be allocated.
    Allocation,
    /// The server could not reach the requested control state.
    TransitionRefused,
    /// Neither a script filename nor script text was set.
    NoScriptSource,
    /// The script ran but reported a non-zero result code.
    ScriptExecution,
    /// A wait exceeded its timeout.
    Timeout,
    /// A status code outside the fixed status-kind enumeration.
    UnknownStatusKind,
    /// Configuration could not be loaded or failed validation.
    Config,
}

/// Primary error type for the client.
#[derive(Error, Debug)]
pub enum MrcError {
    #[error("Error code {code}: {message}")]
    Remote {
        kind: ErrorKind,
        code: ErrorCode,
        message: String,
    },

    #[error("Invalid handle")]
    InvalidHandle,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Client interface is busy")]
    ClientBusy,

    #[error("Client interface is not initialized")]
    NotInitialized,

    #[error("No script filename or text was specified")]
    NoScriptSource,

    #[error("Script error code {code}: {message}")]
    ScriptExecution {
        code: ErrorCode,
        message: String,
        /// Whatever the script printed before it failed.
        output: String,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown status kind: {0}")]
    UnknownStatusKind(i32),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MrcError {
    /// Build the error for a failed remote call from its code and translated message.
    pub fn remote(code: ErrorCode, message: impl Into<String>) -> Self {
        MrcError::Remote {
            kind: code.kind(),
            code,
            message: message.into(),
        }
    }

    /// The taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MrcError::Remote { kind, .. } => *kind,
            MrcError::InvalidHandle => ErrorKind::InvalidHandle,
            MrcError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MrcError::ClientBusy => ErrorKind::ClientBusy,
            MrcError::NotInitialized => ErrorKind::NotInitialized,
            MrcError::NoScriptSource => ErrorKind::NoScriptSource,
            MrcError::ScriptExecution { .. } => ErrorKind::ScriptExecution,
            MrcError::Timeout(_) => ErrorKind::Timeout,
            MrcError::UnknownStatusKind(_) => ErrorKind::UnknownStatusKind,
            MrcError::Config(_) => ErrorKind::Config,
        }
    }

    /// The numeric code, when the error originated from a status code.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            MrcError::Remote { code, .. } | MrcError::ScriptExecution { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MrcError::remote(ErrorCode(MRC_ERR_INVALID_HANDLE), "The handle is invalid.");
        assert_eq!(
            err.to_string(),
            "Error code 0x20000008: The handle is invalid."
        );
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn test_code_classification() {
        assert_eq!(ErrorCode(MRC_ERR_CLIENT_INTERFACE_BUSY).kind(), ErrorKind::ClientBusy);
        assert_eq!(
            ErrorCode(MRC_ERR_REQUEST_CONTROL_FAILED).kind(),
            ErrorKind::TransitionRefused
        );
        assert_eq!(ErrorCode(MRC_ERR_TIMEOUT_WAITING_FOR_IDLE).kind(), ErrorKind::Timeout);
        assert_eq!(ErrorCode(RPC_S_SERVER_UNAVAILABLE).kind(), ErrorKind::Transport);
        assert_eq!(ErrorCode(MRC_ERR_SERVER_BUSY).kind(), ErrorKind::Transport);
        assert!(ErrorCode::NONE.is_success());
    }

    #[test]
    fn test_script_error_keeps_code() {
        let err = MrcError::ScriptExecution {
            code: ErrorCode(MRC_ERR_RUN_SCRIPT_FAILED),
            message: "A run-script command failed.".into(),
            output: String::new(),
        };
        assert_eq!(err.kind(), ErrorKind::ScriptExecution);
        assert_eq!(err.code(), Some(ErrorCode(MRC_ERR_RUN_SCRIPT_FAILED)));
        assert!(MrcError::ClientBusy.code().is_none());
    }
}
