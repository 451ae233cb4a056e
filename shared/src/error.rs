/*!
Common error types for the acquisition core.

Every failure the control surface can report maps onto one [`ErrorKind`].
Errors raised on driver callback threads are never propagated through the
driver; they are parked as a status and surfaced on the next poll.
*/

use thiserror::Error;

/// Common result type used throughout the workspace
pub type Result<T> = std::result::Result<T, AcqError>;

/// Coarse classification of an [`AcqError`], used by callers to decide
/// whether to adjust and retry or to give up on the acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigurationInvalid,
    DriverRejected,
    CallbackContractViolation,
    StopTimeout,
    InvalidTransition,
}

/// Comprehensive error type for all acquisition operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcqError {
    /// Shape, ROI or binning inconsistent; rejected before arming
    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Hardware refused the start call
    #[error("Driver rejected the request: {0}")]
    DriverRejected(String),

    /// Driver invoked a callback for a channel that is not armed, or the
    /// buffer contract was otherwise broken
    #[error("Callback contract violation on {channel}: {reason}")]
    CallbackContractViolation { channel: String, reason: String },

    /// In-flight callbacks did not drain in time; the mode is Idle anyway
    #[error("Stop timed out after {waited_ms} ms with {in_flight} buffer(s) still lent")]
    StopTimeout { waited_ms: u64, in_flight: usize },

    /// Control request not legal in the current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: &'static str, state: String },
}

impl AcqError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationInvalid(msg.into())
    }

    /// Create a new driver rejection error
    pub fn driver(msg: impl Into<String>) -> Self {
        Self::DriverRejected(msg.into())
    }

    /// Create a new contract violation for the named channel
    pub fn violation(channel: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::CallbackContractViolation {
            channel: channel.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid transition error
    pub fn transition(action: &'static str, state: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            action,
            state: state.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationInvalid(_) => ErrorKind::ConfigurationInvalid,
            Self::DriverRejected(_) => ErrorKind::DriverRejected,
            Self::CallbackContractViolation { .. } => ErrorKind::CallbackContractViolation,
            Self::StopTimeout { .. } => ErrorKind::StopTimeout,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
        }
    }

    /// Configuration and arming errors can be fixed by the caller and retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConfigurationInvalid | ErrorKind::DriverRejected | ErrorKind::InvalidTransition
        )
    }
}
