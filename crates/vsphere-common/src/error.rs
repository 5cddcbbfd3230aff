//! Error types for the vSphere machine provider
//!
//! Errors are structured with fields so the entry points can map them to a
//! stable caller-visible code. `MachineNotFound` is never folded into another
//! variant: the control plane relies on it to tell "VM gone" from "call failed".

use std::fmt;

use thiserror::Error;

/// Default context value when no specific operation is known
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// A single invalid or missing field found while validating a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Path of the offending field (e.g. "spec.templateVM", "secret.vsphereHost")
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl FieldError {
    /// Create a field error
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn namespace_suffix(namespace: &Option<String>) -> String {
    match namespace {
        Some(ns) => format!(" in namespace {ns}"),
        None => String::new(),
    }
}

fn phase_suffix(phase: &Option<String>) -> String {
    format!(". phase={}", phase.as_deref().unwrap_or(""))
}

/// Main error type for machine provider operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// One or more request fields are invalid; all of them are reported at once
    #[error("validation failed: {}", join_field_errors(.errors))]
    Validation {
        /// Every problem found, never a partial list
        errors: Vec<FieldError>,
    },

    /// The VM backing a machine does not exist
    #[error("machine {name} not found{}", namespace_suffix(.namespace))]
    MachineNotFound {
        /// Machine name
        name: String,
        /// Namespace, for backends that scope machines by namespace
        namespace: Option<String>,
    },

    /// A provider call failed
    #[error("provider error [{operation}]: {message}")]
    Provider {
        /// Step that failed (e.g. "clone", "power on", "create virtual machine")
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// The existing provider state rejects the request
    #[error("conflict: {message}")]
    Conflict {
        /// What is in the way
        message: String,
    },

    /// A provider-side wait did not finish in time
    #[error("timeout on vm create of virtual machine {machine}{}", phase_suffix(.phase))]
    Timeout {
        /// Machine being created
        machine: String,
        /// Last phase reported by the provider, if any
        phase: Option<String>,
    },

    /// The caller cancelled the request or its deadline passed
    #[error("request for machine {machine} cancelled")]
    Cancelled {
        /// Machine being processed
        machine: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being decoded (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create a validation error from a list of field problems
    pub fn validation(errors: Vec<FieldError>) -> Self {
        Self::Validation { errors }
    }

    /// Create a validation error for a single field
    pub fn invalid_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![FieldError::new(field, msg)],
        }
    }

    /// Create a not-found error for a machine without namespace scope
    pub fn machine_not_found(name: impl Into<String>) -> Self {
        Self::MachineNotFound {
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a not-found error for a namespaced machine
    pub fn machine_not_found_in(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::MachineNotFound {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Create a provider error for the given step
    pub fn provider(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Whether this error means the machine's VM does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::MachineNotFound { .. })
    }

    /// Check if this error is retryable
    ///
    /// Validation, conflict and serialization errors need a spec or state fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::MachineNotFound { .. } => false,
            Error::Provider { .. } => true,
            Error::Conflict { .. } => false,
            Error::Timeout { .. } => true,
            Error::Cancelled { .. } => true,
            Error::Serialization { .. } => false,
        }
    }

    /// Prefix provider errors with an outer step, leaving structural variants intact
    ///
    /// Not-found, validation, conflict, timeout and cancellation keep their
    /// variant so callers can still branch on them after wrapping.
    pub fn context(self, operation: &str) -> Self {
        match self {
            Error::Provider {
                operation: inner,
                message,
            } => Error::Provider {
                operation: operation.to_string(),
                message: format!("{inner}: {message}"),
            },
            Error::Kube { source } => Error::Provider {
                operation: operation.to_string(),
                message: source.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: How failures surface to the control plane
    // ==========================================================================

    /// Story: a machine whose VM was removed out-of-band reports not-found
    #[test]
    fn story_missing_vm_stays_not_found_through_wrapping() {
        let err = Error::machine_not_found("worker-1").context("get machine status");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "machine worker-1 not found");

        let err = Error::machine_not_found_in("worker-2", "shoot--dev").context("delete");
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "machine worker-2 not found in namespace shoot--dev"
        );
    }

    /// Story: every invalid field is reported in one go
    #[test]
    fn story_validation_reports_all_fields() {
        let err = Error::validation(vec![
            FieldError::new("spec.templateVM", "TemplateVM is required"),
            FieldError::new("spec.network", "Network is required"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("spec.templateVM: TemplateVM is required"));
        assert!(msg.contains("spec.network: Network is required"));
        assert!(!err.is_retryable());
    }

    /// Story: provider errors accumulate step context as they bubble up
    #[test]
    fn story_provider_errors_gain_context() {
        let err = Error::provider("find datastore", "datastore 'ds9' not found")
            .context("resolve placement");
        match &err {
            Error::Provider { operation, message } => {
                assert_eq!(operation, "resolve placement");
                assert_eq!(message, "find datastore: datastore 'ds9' not found");
            }
            _ => panic!("Expected Provider variant"),
        }
        assert!(err.is_retryable());
    }

    #[test]
    fn timeout_message_carries_phase() {
        let err = Error::Timeout {
            machine: "m1".to_string(),
            phase: Some("Creating".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "timeout on vm create of virtual machine m1. phase=Creating"
        );
    }

    #[test]
    fn conflicts_are_not_retryable() {
        let err = Error::conflict("file [ds1] m1/m1.vmx already exists").context("clone");
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(!err.is_retryable());
    }
}
