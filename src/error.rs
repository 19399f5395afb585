//! Error taxonomy shared by every provider.
//!
//! [`ClientError`] classifies what a backend SDK call reported.
//! [`ProviderError`] is what callers of a [`crate::Provider`] see.

use std::fmt;

use thiserror::Error;

use crate::poll::{CancelReason, PollError};

/// Failure reported by a backend SDK seam.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// The addressed resource does not exist (or no longer exists).
    #[error("resource {resource} not found")]
    NotFound {
        /// Identifier or name the backend could not find.
        resource: String,
    },
    /// The backend accepted a dry-run request; nothing was committed.
    #[error("request would have succeeded but dry run was set")]
    DryRun,
    /// The request conflicts with the current resource state.
    #[error("conflict: {message}")]
    Conflict {
        /// Backend explanation of the conflict.
        message: String,
    },
    /// The backend throttled the caller.
    #[error("throttled: {message}")]
    Throttled {
        /// Backend explanation of the throttling.
        message: String,
    },
    /// Any other API-level rejection.
    #[error("api error {code}: {message}")]
    Api {
        /// HTTP status when the backend speaks HTTP.
        status: Option<u16>,
        /// Backend error code (for example `InvalidParameterValue`).
        code: String,
        /// Backend error message.
        message: String,
    },
    /// The request never reached the backend or the connection dropped.
    #[error("transport error: {message}")]
    Transport {
        /// Underlying transport message.
        message: String,
    },
    /// The resource reached a failed terminal state.
    #[error("resource entered terminal state '{state}'")]
    FailedState {
        /// State reported by the backend.
        state: String,
    },
    /// The backend answered with a payload that could not be interpreted.
    #[error("malformed response: {message}")]
    Malformed {
        /// Description of what was wrong with the payload.
        message: String,
    },
}

impl ClientError {
    /// Returns `true` for [`ClientError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for the dry-run sentinel.
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun)
    }

    /// Returns `true` for failures that usually clear up on their own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Transport { .. })
    }
}

/// The kind of resource an error refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    /// A block volume.
    Volume,
    /// A snapshot.
    Snapshot,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume => f.write_str("volume"),
            Self::Snapshot => f.write_str("snapshot"),
        }
    }
}

/// Errors surfaced by [`crate::Provider`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// The caller supplied an invalid or incomplete request.
    #[error("invalid {operation} request: {message}")]
    Configuration {
        /// Operation that rejected the request.
        operation: String,
        /// What was wrong with it.
        message: String,
    },
    /// The resource is absent.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind that was looked up.
        kind: ResourceKind,
        /// Identifier that was looked up.
        id: String,
    },
    /// A backend call failed.
    #[error("{operation} failed for '{resource_id}': {source}")]
    Backend {
        /// Operation that issued the call.
        operation: String,
        /// Resource the call addressed, empty before one exists.
        resource_id: String,
        /// Classified SDK failure.
        #[source]
        source: ClientError,
    },
    /// The caller cancelled the operation or its deadline passed.
    #[error("{operation} on '{resource_id}' stopped: {reason}")]
    Cancelled {
        /// Operation that was waiting.
        operation: String,
        /// Resource being waited on.
        resource_id: String,
        /// Why waiting stopped.
        reason: CancelReason,
    },
}

impl ProviderError {
    /// Builds a [`ProviderError::Configuration`].
    #[must_use]
    pub fn configuration(operation: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            operation: operation.to_owned(),
            message: message.into(),
        }
    }

    /// Builds a [`ProviderError::Backend`].
    #[must_use]
    pub fn backend(operation: &str, resource_id: &str, source: ClientError) -> Self {
        Self::Backend {
            operation: operation.to_owned(),
            resource_id: resource_id.to_owned(),
            source,
        }
    }

    /// Builds a [`ProviderError::Cancelled`].
    #[must_use]
    pub fn cancelled(operation: &str, resource_id: &str, reason: CancelReason) -> Self {
        Self::Cancelled {
            operation: operation.to_owned(),
            resource_id: resource_id.to_owned(),
            reason,
        }
    }

    /// Builds the error returned when a backend does not offer an operation.
    #[must_use]
    pub fn unsupported(operation: &str, backend: &str) -> Self {
        Self::configuration(operation, format!("not implemented by the {backend} backend"))
    }

    /// Maps a client failure, turning `NotFound` into [`ProviderError::NotFound`].
    #[must_use]
    pub fn from_lookup(
        operation: &str,
        kind: ResourceKind,
        resource_id: &str,
        source: ClientError,
    ) -> Self {
        if source.is_not_found() {
            return Self::NotFound {
                kind,
                id: resource_id.to_owned(),
            };
        }
        Self::backend(operation, resource_id, source)
    }

    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` when waiting was cancelled or timed out.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl PollError<ProviderError> {
    /// Flattens a poll outcome into a [`ProviderError`], tagging
    /// cancellation with the operation and resource being waited on.
    #[must_use]
    pub fn into_provider_error(self, operation: &str, resource_id: &str) -> ProviderError {
        match self {
            Self::Cancelled(reason) => ProviderError::cancelled(operation, resource_id, reason),
            Self::Check(err) => err,
        }
    }
}
