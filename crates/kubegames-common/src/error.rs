//! Error types for the kubegames operator
//!
//! Errors carry the game or pod they concern so that a failed reconcile can be
//! traced from the logs alone. Two variants are not failures in the usual
//! sense: [`Error::DrainPending`] and [`Error::PodsRemaining`] report that a
//! reconcile is waiting on the outside world and must simply be retried.

use thiserror::Error;

/// Main error type for kubegames operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A Game spec cannot be turned into a valid pod
    #[error("validation error for {game}: {message}")]
    Validation {
        /// Name of the offending Game
        game: String,
        /// Description of what's invalid
        message: String,
    },

    /// The drain RPC to a game server failed (transport or RPC status)
    #[error("drain call to {pod} failed: {message}")]
    Drain {
        /// Pod (or address) that was called
        pod: String,
        /// Description of what failed
        message: String,
    },

    /// The game server reported it cannot be terminated yet
    #[error("waiting for game server {pod} to allow termination")]
    DrainPending {
        /// Pod that refused termination
        pod: String,
    },

    /// A terminating Game still owns pods
    #[error("waiting for {remaining} pod(s) of {game} to close")]
    PodsRemaining {
        /// Name of the terminating Game
        game: String,
        /// Number of pods still present
        remaining: usize,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "startup", "informer")
        context: String,
    },
}

impl Error {
    /// Create a validation error for a Game
    pub fn validation(game: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            game: game.into(),
            message: msg.into(),
        }
    }

    /// Create a drain RPC error
    pub fn drain(pod: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Drain {
            pod: pod.into(),
            message: msg.into(),
        }
    }

    /// Create a drain-pending marker for a pod that refused termination
    pub fn drain_pending(pod: impl Into<String>) -> Self {
        Self::DrainPending { pod: pod.into() }
    }

    /// Create a pods-remaining marker for a terminating Game
    pub fn pods_remaining(game: impl Into<String>, remaining: usize) -> Self {
        Self::PodsRemaining {
            game: game.into(),
            remaining,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error only signals that the reconcile is waiting on progress elsewhere
    pub fn is_waiting(&self) -> bool {
        matches!(self, Error::DrainPending { .. } | Error::PodsRemaining { .. })
    }

    /// Whether this error is an optimistic-concurrency conflict on write
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Kube { source } => crate::kube_utils::is_conflict(source),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
