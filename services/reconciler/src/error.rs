//! Request error types.

use azvnet_crypto::CryptoError;
use azvnet_events::EventError;
use thiserror::Error;

/// Result type for request handling.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors that end a request.
///
/// None of these are retried internally; each is folded into the event's
/// `error` field and answered on the `.error` subject.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The subject or body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] EventError),

    /// The event failed resource validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A credential field could not be decrypted.
    #[error("unable to decrypt {field}: {source}")]
    CredentialDecrypt {
        field: &'static str,
        #[source]
        source: CryptoError,
    },

    /// The tenant's OAuth configuration could not be resolved.
    #[error("auth config error: {0}")]
    AuthConfig(String),

    /// A provider call failed or did not complete.
    #[error("{operation} virtual network {name} (resource group {resource_group}): {reason}")]
    RemoteOperation {
        operation: &'static str,
        name: String,
        resource_group: String,
        reason: String,
    },

    /// A same-named network already exists in the configuration document.
    #[error("virtual network {0} already exists")]
    AlreadyExists(String),

    /// Security group convergence failed for a subnet.
    #[error("security group {security_group} on subnet {subnet}: {reason}")]
    Convergence {
        subnet: String,
        security_group: String,
        reason: String,
    },

    /// The requested operation is not available.
    #[error("{0} not supported")]
    UnsupportedOperation(String),
}

impl HandlerError {
    /// Short, stable name of the error class for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Decode(_) => "decode",
            HandlerError::Validation(_) => "validation",
            HandlerError::CredentialDecrypt { .. } => "credential_decrypt",
            HandlerError::AuthConfig(_) => "auth_config",
            HandlerError::RemoteOperation { .. } => "remote_operation",
            HandlerError::AlreadyExists(_) => "already_exists",
            HandlerError::Convergence { .. } => "convergence",
            HandlerError::UnsupportedOperation(_) => "unsupported_operation",
        }
    }

    pub(crate) fn remote(
        operation: &'static str,
        name: &str,
        resource_group: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        HandlerError::RemoteOperation {
            operation,
            name: name.to_string(),
            resource_group: resource_group.to_string(),
            reason: reason.to_string(),
        }
    }
}
