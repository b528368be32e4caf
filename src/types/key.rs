//! Node keys for the dependency graph.
//!
//! A [`NodeKey`] identifies one entry in the graph. Keys are produced by
//! parsing subject strings (package identifiers, canonical labels) and are
//! immutable once constructed. All key types implement `Ord` so that the
//! in-memory store can keep them in `BTreeMap`s with a stable iteration order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;

/// Characters accepted in a single package path segment.
const PACKAGE_SEGMENT_PATTERN: &str = r"^[A-Za-z0-9_\-.+=,@~ ]+$";

/// Characters accepted in a target name.
const TARGET_NAME_PATTERN: &str = r"^[A-Za-z0-9_\-.+=,@~/ !%^#$&()<>*?\[\]{}|;']+$";

/// Characters accepted in a repository name.
const REPOSITORY_PATTERN: &str = r"^[A-Za-z0-9_\-.+~]+$";

fn package_segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PACKAGE_SEGMENT_PATTERN).expect("valid package segment pattern"))
}

fn target_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TARGET_NAME_PATTERN).expect("valid target name pattern"))
}

fn repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REPOSITORY_PATTERN).expect("valid repository pattern"))
}

/// Error raised when a package identifier or label cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid label '{input}': {reason}")]
pub struct LabelSyntaxError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl LabelSyntaxError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Identifier of a package: an optional repository plus a slash-separated path.
///
/// The main repository is represented by an empty repository name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId {
    repository: String,
    path: String,
}

impl PackageId {
    /// Create a package identifier in the main repository without validation.
    pub fn main(path: impl Into<String>) -> Self {
        Self {
            repository: String::new(),
            path: path.into(),
        }
    }

    /// Parse `@repo//some/path`, `//some/path` or `some/path`.
    pub fn parse(input: &str) -> Result<Self, LabelSyntaxError> {
        let (repository, path) = split_repository(input)?;
        let path = path.strip_prefix("//").unwrap_or(path);
        validate_package_path(input, path)?;
        Ok(Self {
            repository: repository.to_string(),
            path: path.to_string(),
        })
    }

    /// Repository name (empty for the main repository).
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Package path relative to the repository root.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repository.is_empty() {
            write!(f, "//{}", self.path)
        } else {
            write!(f, "@{}//{}", self.repository, self.path)
        }
    }
}

/// A canonical label: package plus target name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    package: PackageId,
    name: String,
}

impl Label {
    /// Parse a canonical label such as `//pkg:name`, `@repo//pkg:name` or `//pkg`.
    ///
    /// Canonical labels must be absolute: relative forms (`:name`, `name`)
    /// are rejected.
    pub fn parse_canonical(input: &str) -> Result<Self, LabelSyntaxError> {
        if !input.starts_with("//") && !input.starts_with('@') {
            return Err(LabelSyntaxError::new(input, "label must start with '//' or '@'"));
        }
        let (repository, rest) = split_repository(input)?;
        let rest = rest
            .strip_prefix("//")
            .ok_or_else(|| LabelSyntaxError::new(input, "missing '//' after repository"))?;

        let (path, name) = match rest.split_once(':') {
            Some((path, name)) => (path, name.to_string()),
            None => {
                let name = rest.rsplit('/').next().unwrap_or(rest);
                if name.is_empty() {
                    return Err(LabelSyntaxError::new(input, "cannot infer target name"));
                }
                (rest, name.to_string())
            }
        };

        validate_package_path(input, path)?;
        validate_target_name(input, &name)?;

        Ok(Self {
            package: PackageId {
                repository: repository.to_string(),
                path: path.to_string(),
            },
            name,
        })
    }

    /// The package this label belongs to.
    pub fn package(&self) -> &PackageId {
        &self.package
    }

    /// The target name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package, self.name)
    }
}

fn split_repository(input: &str) -> Result<(&str, &str), LabelSyntaxError> {
    let Some(stripped) = input.strip_prefix('@') else {
        return Ok(("", input));
    };
    let Some(idx) = stripped.find("//") else {
        return Err(LabelSyntaxError::new(input, "repository must be followed by '//'"));
    };
    let repository = &stripped[..idx];
    if !repository.is_empty() && !repository_regex().is_match(repository) {
        return Err(LabelSyntaxError::new(input, "invalid repository name"));
    }
    Ok((repository, &stripped[idx..]))
}

fn validate_package_path(input: &str, path: &str) -> Result<(), LabelSyntaxError> {
    if path.is_empty() {
        return Ok(());
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(LabelSyntaxError::new(input, "package path must not start or end with '/'"));
    }
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(LabelSyntaxError::new(input, "package path contains an empty segment"));
        }
        if segment == "." || segment == ".." {
            return Err(LabelSyntaxError::new(input, "package path contains an up-level reference"));
        }
        if !package_segment_regex().is_match(segment) {
            return Err(LabelSyntaxError::new(
                input,
                format!("invalid character in package segment '{}'", segment),
            ));
        }
    }
    Ok(())
}

fn validate_target_name(input: &str, name: &str) -> Result<(), LabelSyntaxError> {
    if name.is_empty() {
        return Err(LabelSyntaxError::new(input, "empty target name"));
    }
    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return Err(LabelSyntaxError::new(input, "target name contains a malformed path"));
    }
    if name.split('/').any(|part| part == "." || part == "..") {
        return Err(LabelSyntaxError::new(input, "target name contains an up-level reference"));
    }
    if !target_name_regex().is_match(name) {
        return Err(LabelSyntaxError::new(input, "invalid character in target name"));
    }
    Ok(())
}

/// Key of a realized build configuration, identified by its options checksum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigurationKey {
    checksum: String,
}

impl ConfigurationKey {
    /// Create a key from a known checksum.
    pub fn new(checksum: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
        }
    }

    /// Derive the key from a set of build options.
    ///
    /// The checksum is the canonical hash of the (sorted) option map.
    pub fn from_options(options: &BTreeMap<String, String>) -> Self {
        Self::new(canonical_hash_hex(options))
    }

    /// The options checksum.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Whether the checksum starts with `prefix`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.checksum.starts_with(prefix)
    }
}

impl fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.checksum)
    }
}

/// Identifier of one entry in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKey {
    /// A loaded package.
    Package {
        /// Package identifier.
        package: PackageId,
    },
    /// A loaded Starlark module.
    StarlarkModule {
        /// Label of the `.bzl` file.
        label: Label,
    },
    /// A configured target.
    ConfiguredTarget {
        /// Target label.
        label: Label,
        /// Configuration the target was analyzed in.
        configuration: ConfigurationKey,
    },
    /// A realized build configuration.
    BuildConfiguration {
        /// Configuration key.
        configuration: ConfigurationKey,
    },
    /// Any other node, named by its function and argument.
    Other {
        /// Function that computes this node (e.g. `FILE_STATE`).
        function: String,
        /// Function-specific argument.
        argument: String,
    },
}

impl NodeKey {
    /// Key of a package node.
    pub fn package(package: PackageId) -> Self {
        Self::Package { package }
    }

    /// Key of a Starlark module node.
    pub fn starlark_module(label: Label) -> Self {
        Self::StarlarkModule { label }
    }

    /// Key of a configured target node.
    pub fn configured_target(label: Label, configuration: ConfigurationKey) -> Self {
        Self::ConfiguredTarget {
            label,
            configuration,
        }
    }

    /// Key of a build configuration node.
    pub fn build_configuration(configuration: ConfigurationKey) -> Self {
        Self::BuildConfiguration { configuration }
    }

    /// Key of an arbitrary node.
    pub fn other(function: impl Into<String>, argument: impl Into<String>) -> Self {
        Self::Other {
            function: function.into(),
            argument: argument.into(),
        }
    }

    /// Name of the function that computes this node.
    pub fn function_name(&self) -> &str {
        match self {
            Self::Package { .. } => "PACKAGE",
            Self::StarlarkModule { .. } => "BZL_LOAD",
            Self::ConfiguredTarget { .. } => "CONFIGURED_TARGET",
            Self::BuildConfiguration { .. } => "BUILD_CONFIGURATION",
            Self::Other { function, .. } => function,
        }
    }

    /// The configuration key, if this is a build configuration node.
    pub fn as_configuration(&self) -> Option<&ConfigurationKey> {
        match self {
            Self::BuildConfiguration { configuration } => Some(configuration),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package { package } => write!(f, "PACKAGE:{}", package),
            Self::StarlarkModule { label } => write!(f, "BZL_LOAD:{}", label),
            Self::ConfiguredTarget {
                label,
                configuration,
            } => write!(f, "CONFIGURED_TARGET:{}@{}", label, configuration),
            Self::BuildConfiguration { configuration } => {
                write!(f, "BUILD_CONFIGURATION:{}", configuration)
            }
            Self::Other { function, argument } => write!(f, "{}:{}", function, argument),
        }
    }
}
