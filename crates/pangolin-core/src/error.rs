//! Error types for the tunnel control surface
//!
//! Every operation reachable from the mobile runtime reports failure through
//! [`TunnelError`]. Errors are grouped so callers can tell lifecycle misuse
//! (calling things in the wrong order) apart from bad input and environment
//! failures.
//!
//! # Error Categories
//!
//! - **Input**: the caller supplied something malformed (config JSON, descriptor, mode)
//! - **Lifecycle misuse**: the operation is not legal in the current state
//! - **Environment**: the host refused a resource (log file not writable)
//!
//! No variant is fatal. An operation that fails leaves the controller in the
//! state it was in before the call (or `Idle`, for a failed start).

use std::borrow::Cow;
use thiserror::Error;

use crate::controller::TunnelState;

/// Errors that can occur in tunnel control operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TunnelError {
    // ============ Input Errors ============
    /// Malformed configuration or missing required fields
    #[error("Decode error: {0}")]
    Decode(Cow<'static, str>),

    /// Descriptor cannot back a tunnel or device
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(i32),

    /// Power mode string not recognized
    #[error("Unknown power mode: {0:?}")]
    UnknownMode(String),

    // ============ Lifecycle Errors ============
    /// Operation not permitted in the current tunnel state
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: Cow<'static, str>,
        /// State the controller was in
        state: TunnelState,
    },

    /// Device registration attempted without a starting or running tunnel
    #[error("Tunnel not running")]
    NotRunning,

    /// Session initialization attempted twice
    #[error("Session already initialized")]
    AlreadyInitialized,

    /// Tunnel start attempted before session initialization
    #[error("Session not ready: initialize the session before starting the tunnel")]
    SessionNotReady,

    /// A device with the same derived identity is already registered
    #[error("Duplicate device for descriptor {0}")]
    DuplicateDevice(i32),

    // ============ Environment Errors ============
    /// Log sink could not be opened or written
    #[error("I/O error: {0}")]
    Io(String),
}

impl TunnelError {
    /// Stable short name of the error kind, used as the boundary error prefix
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            TunnelError::Decode(_) => "DecodeError",
            TunnelError::InvalidDescriptor(_) => "InvalidDescriptor",
            TunnelError::UnknownMode(_) => "UnknownMode",
            TunnelError::InvalidState { .. } => "InvalidState",
            TunnelError::NotRunning => "NotRunning",
            TunnelError::AlreadyInitialized => "AlreadyInitialized",
            TunnelError::SessionNotReady => "SessionNotReady",
            TunnelError::DuplicateDevice(_) => "DuplicateDevice",
            TunnelError::Io(_) => "IOError",
        }
    }

    /// Returns true if the caller used the lifecycle out of order
    ///
    /// These never indicate a fault in the backend; retrying after the
    /// missing prerequisite (session init, start, stop) is enough.
    #[must_use]
    pub fn is_lifecycle_misuse(&self) -> bool {
        matches!(
            self,
            TunnelError::InvalidState { .. }
                | TunnelError::NotRunning
                | TunnelError::AlreadyInitialized
                | TunnelError::SessionNotReady
        )
    }

    /// Returns true if the input itself was rejected
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TunnelError::Decode(_)
                | TunnelError::InvalidDescriptor(_)
                | TunnelError::UnknownMode(_)
                | TunnelError::DuplicateDevice(_)
        )
    }

    /// Create a decode error with static context (zero allocation)
    #[must_use]
    pub const fn decode(context: &'static str) -> Self {
        TunnelError::Decode(Cow::Borrowed(context))
    }

    /// Create an invalid state error for `operation` attempted in `state`
    #[must_use]
    pub const fn invalid_state(operation: &'static str, state: TunnelState) -> Self {
        TunnelError::InvalidState {
            operation: Cow::Borrowed(operation),
            state,
        }
    }
}

impl From<serde_json::Error> for TunnelError {
    fn from(err: serde_json::Error) -> Self {
        TunnelError::Decode(Cow::Owned(err.to_string()))
    }
}

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        TunnelError::Io(err.to_string())
    }
}

/// Result type for tunnel control operations
pub type Result<T> = std::result::Result<T, TunnelError>;
