//! Caller-visible errors of the machine entry points

use thiserror::Error;

use vsphere_common::Error;

/// Status code reported to the machine controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineErrorCode {
    /// The machine's VM does not exist
    NotFound,
    /// Spec or secrets are invalid
    InvalidArgument,
    /// The VM or one of its files already exists
    AlreadyExists,
    /// A provider-side wait ran out of time
    DeadlineExceeded,
    /// The request was cancelled
    Canceled,
    /// Anything else
    Internal,
}

impl std::fmt::Display for MachineErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MachineErrorCode::NotFound => "NotFound",
            MachineErrorCode::InvalidArgument => "InvalidArgument",
            MachineErrorCode::AlreadyExists => "AlreadyExists",
            MachineErrorCode::DeadlineExceeded => "DeadlineExceeded",
            MachineErrorCode::Canceled => "Canceled",
            MachineErrorCode::Internal => "Internal",
        };
        f.write_str(s)
    }
}

impl From<&Error> for MachineErrorCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::MachineNotFound { .. } => MachineErrorCode::NotFound,
            Error::Validation { .. } | Error::Serialization { .. } => {
                MachineErrorCode::InvalidArgument
            }
            Error::Conflict { .. } => MachineErrorCode::AlreadyExists,
            Error::Timeout { .. } => MachineErrorCode::DeadlineExceeded,
            Error::Cancelled { .. } => MachineErrorCode::Canceled,
            Error::Provider { .. } | Error::Kube { .. } => MachineErrorCode::Internal,
        }
    }
}

/// Error returned by a machine entry point
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct MachineError {
    /// Status code
    pub code: MachineErrorCode,
    /// Human readable message
    pub message: String,
}

impl MachineError {
    /// Wrap a provider error with the failed request's description
    ///
    /// Not-found errors keep their own message so callers can match on it.
    pub fn wrap(err: &Error, description: impl std::fmt::Display) -> Self {
        let code = MachineErrorCode::from(err);
        let message = match code {
            MachineErrorCode::NotFound => err.to_string(),
            _ => format!("{description}: {err}"),
        };
        Self { code, message }
    }

    /// Whether the machine's VM does not exist
    pub fn is_not_found(&self) -> bool {
        self.code == MachineErrorCode::NotFound
    }
}
