//! Dump policies: what to attribute, how to display it, and to whom.

pub mod mode;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use mode::{MemoryMode, ModeParseError};

/// Which objects count toward a node's footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalPolicy {
    /// Objects reachable from the node but from none of its direct dependencies.
    Isolated,
    /// Every object reachable from the node's own value.
    Reachable,
    /// Every object reachable from the node or anything in its transitive closure.
    Transitive,
}

impl TraversalPolicy {
    /// Parse a policy word. Accepts both `isolated`/`shallow` and `reachable`/`deep`.
    pub fn from_word(s: &str) -> Option<Self> {
        match s {
            "isolated" | "shallow" => Some(Self::Isolated),
            "reachable" | "deep" => Some(Self::Reachable),
            "transitive" => Some(Self::Transitive),
            _ => None,
        }
    }
}

impl fmt::Display for TraversalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isolated => write!(f, "isolated"),
            Self::Reachable => write!(f, "reachable"),
            Self::Transitive => write!(f, "transitive"),
        }
    }
}

/// How a finished tally is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// One summary line.
    Summary,
    /// Object count per class.
    Count,
    /// Bytes per class.
    Bytes,
}

impl DisplayMode {
    /// Parse a display word.
    pub fn from_word(s: &str) -> Option<Self> {
        match s {
            "summary" => Some(Self::Summary),
            "count" => Some(Self::Count),
            "bytes" => Some(Self::Bytes),
            _ => None,
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Summary => write!(f, "summary"),
            Self::Count => write!(f, "count"),
            Self::Bytes => write!(f, "bytes"),
        }
    }
}

/// Kind of node a subject string names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// A Starlark module, named by its canonical label.
    StarlarkModule,
    /// A package, named by its package identifier.
    Package,
    /// A configured target: `<label>[@<configuration checksum prefix>]`.
    ConfiguredTarget,
}

impl SubjectKind {
    /// Parse a subject kind, case-insensitively.
    pub fn from_word(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "starlark_module" => Some(Self::StarlarkModule),
            "package" => Some(Self::Package),
            "configured_target" => Some(Self::ConfiguredTarget),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StarlarkModule => write!(f, "starlark_module"),
            Self::Package => write!(f, "package"),
            Self::ConfiguredTarget => write!(f, "configured_target"),
        }
    }
}

/// Which object families are reported. Everything is reported by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportOptions {
    /// Follow transient fields.
    pub transient: bool,
    /// Report build configuration objects.
    pub configuration: bool,
    /// Report precomputed values.
    pub precomputed: bool,
    /// Report workspace status objects.
    pub workspace_status: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            transient: true,
            configuration: true,
            precomputed: true,
            workspace_status: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_kind_words() {
        assert_eq!(SubjectKind::from_word("package"), Some(SubjectKind::Package));
        assert_eq!(
            SubjectKind::from_word("Configured_Target"),
            Some(SubjectKind::ConfiguredTarget)
        );
        assert_eq!(
            SubjectKind::from_word("STARLARK_MODULE"),
            Some(SubjectKind::StarlarkModule)
        );
        assert_eq!(SubjectKind::from_word("rule"), None);

        for kind in [SubjectKind::StarlarkModule, SubjectKind::Package, SubjectKind::ConfiguredTarget] {
            assert_eq!(SubjectKind::from_word(&kind.to_string()), Some(kind));
        }
    }
}
