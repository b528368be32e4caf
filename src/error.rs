//! Error taxonomy for memory dumps.
//!
//! A dump fails in one of two distinguishable ways:
//!
//! - [`ResolutionError`]: the subject could not be turned into a node key.
//!   Raised before any traversal starts, with a user-facing message.
//! - [`DumpError::Interrupted`]: the traversal was cancelled or a graph fetch
//!   failed mid-way. No partial tally is ever returned.

use crate::policy::ModeParseError;
use crate::types::{LabelSyntaxError, NodeKey};
use crate::walker::WalkInterrupted;

/// Failure to resolve a subject string to a graph node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// The subject is not a valid label or package identifier.
    #[error("Cannot parse label: {0}")]
    Label(#[from] LabelSyntaxError),
    /// The memory mode string itself is malformed.
    #[error("Invalid memory mode: {0}")]
    Mode(#[from] ModeParseError),
    /// The configuration prefix matched zero or several configurations.
    #[error("ambiguous configuration '{prefix}': {matches} candidates match, list the realized configurations to pick one")]
    AmbiguousConfiguration {
        /// The checksum prefix given by the caller.
        prefix: String,
        /// How many realized configurations matched.
        matches: usize,
    },
    /// No prefix was given and the graph has no target configuration.
    #[error("no target configuration is available; specify a configuration checksum prefix")]
    NoTargetConfiguration,
    /// The key is well-formed but the graph has no entry for it.
    #[error("The requested node is not present: {0}")]
    NodeNotPresent(NodeKey),
}

/// Top-level error of a memory dump.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DumpError {
    /// The subject could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    /// The dump was cancelled or a graph fetch failed.
    #[error("memory dump interrupted: {reason}")]
    Interrupted {
        /// What interrupted the dump.
        reason: String,
    },
}

impl DumpError {
    /// Create an interruption error.
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::Interrupted {
            reason: reason.into(),
        }
    }

    /// Classify a graph store failure as an interruption.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::interrupted(format!("graph fetch failed: {}", e))
    }

    /// Whether this is an interruption rather than a resolution failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

impl From<WalkInterrupted> for DumpError {
    fn from(_: WalkInterrupted) -> Self {
        Self::interrupted("cancelled during object walk")
    }
}

impl From<LabelSyntaxError> for DumpError {
    fn from(e: LabelSyntaxError) -> Self {
        Self::Resolution(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let interrupted = DumpError::interrupted("ctrl-c");
        assert!(interrupted.is_interrupted());

        let resolution: DumpError = ResolutionError::NoTargetConfiguration.into();
        assert!(!resolution.is_interrupted());
    }

    #[test]
    fn test_messages() {
        let err = DumpError::from(ResolutionError::AmbiguousConfiguration {
            prefix: "ab".to_string(),
            matches: 2,
        });
        assert!(err.to_string().starts_with("ambiguous configuration 'ab'"));

        let walk: DumpError = WalkInterrupted.into();
        assert_eq!(walk.to_string(), "memory dump interrupted: cancelled during object walk");
    }
}
