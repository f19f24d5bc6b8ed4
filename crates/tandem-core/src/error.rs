//! Error types for the Tandem frame pipeline.
//!
//! Organized by where the failure surfaces: packet application on the
//! consumer side, batch/ingress bookkeeping, and the simulation step on
//! the producer side.

use std::error::Error;
use std::fmt;

use crate::id::OwnerId;

/// Errors from applying a single packet on the consumer thread.
///
/// Never fatal: the drain loop logs the error, counts it, and moves on
/// to the next packet in the same batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyError {
    /// The packet's apply step reported a failure.
    Failed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// The consumer-side representation of the packet's owner no longer
    /// exists (destroyed by an earlier packet or never created).
    TargetGone {
        /// The owner the packet was derived from.
        owner: OwnerId,
    },
    /// The packet's apply step panicked and the panic was contained.
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "apply failed: {reason}"),
            Self::TargetGone { owner } => write!(f, "target for owner {owner} is gone"),
            Self::Panicked { message } => write!(f, "apply panicked: {message}"),
        }
    }
}

impl Error for ApplyError {}

/// Errors from appending to a [`Batch`](crate::Batch).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchError {
    /// The batch has already been sealed; it is immutable from here on.
    Sealed,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sealed => write!(f, "batch is sealed"),
        }
    }
}

impl Error for BatchError {}

/// Errors from the packet ingress path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueError {
    /// The pipeline has been shut down; the packet was dropped.
    ShutDown,
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown => write!(f, "pipeline is shut down"),
        }
    }
}

impl Error for EnqueueError {}

/// Errors from the host's simulation step.
///
/// A step failure is not recoverable in place: the producer loop stops
/// and the failure is surfaced to the host, which tears the session down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepError {
    /// The simulation step failed.
    Failed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// The step could not enqueue its output because the pipeline is
    /// shutting down.
    Enqueue(EnqueueError),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "simulation step failed: {reason}"),
            Self::Enqueue(e) => write!(f, "simulation step could not enqueue: {e}"),
        }
    }
}

impl Error for StepError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Enqueue(e) => Some(e),
            Self::Failed { .. } => None,
        }
    }
}

impl From<EnqueueError> for StepError {
    fn from(e: EnqueueError) -> Self {
        Self::Enqueue(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_error_display() {
        let e = ApplyError::TargetGone { owner: OwnerId(9) };
        assert_eq!(e.to_string(), "target for owner 9 is gone");
        let e = ApplyError::Panicked {
            message: "boom".into(),
        };
        assert!(e.to_string().contains("boom"));
    }

    #[test]
    fn step_error_wraps_enqueue() {
        let e: StepError = EnqueueError::ShutDown.into();
        assert!(e.source().is_some());
        assert!(e.to_string().contains("shut down"));
    }
}
