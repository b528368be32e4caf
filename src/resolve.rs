//! Subject resolution.
//!
//! Turns a subject string into a [`NodeKey`] and checks that the graph has
//! an entry for it. Configured targets carry an optional configuration
//! checksum prefix after the last `@`: `//foo:bar@8a1f`. Without a prefix the
//! build's target configuration is used; with one, exactly one realized
//! configuration must match.

use crate::error::{DumpError, ResolutionError};
use crate::policy::SubjectKind;
use crate::store::GraphStore;
use crate::types::{ConfigurationKey, Label, NodeKey, PackageId};

/// Split `label[@prefix]` into the label and the configuration prefix.
///
/// An `@` only starts a configuration suffix when what follows contains no
/// `/` or `:`, so external repository labels (`@repo//pkg:name`) are left
/// intact.
pub fn split_configuration_suffix(subject: &str) -> (&str, Option<&str>) {
    match subject.rfind('@') {
        Some(idx) if idx > 0 => {
            let suffix = &subject[idx + 1..];
            if suffix.contains('/') || suffix.contains(':') {
                (subject, None)
            } else {
                (&subject[..idx], Some(suffix))
            }
        }
        _ => (subject, None),
    }
}

/// Pick the configuration for a configured-target subject.
pub async fn resolve_configuration<S: GraphStore>(
    store: &S,
    prefix: Option<&str>,
) -> Result<ConfigurationKey, DumpError> {
    let Some(prefix) = prefix else {
        return store
            .target_configuration()
            .await
            .map_err(DumpError::from_store)?
            .ok_or_else(|| ResolutionError::NoTargetConfiguration.into());
    };

    let mut candidates: Vec<ConfigurationKey> = store
        .realized_configurations()
        .await
        .map_err(DumpError::from_store)?
        .into_iter()
        .filter(|c| c.matches_prefix(prefix))
        .collect();

    if candidates.len() != 1 {
        return Err(ResolutionError::AmbiguousConfiguration {
            prefix: prefix.to_string(),
            matches: candidates.len(),
        }
        .into());
    }
    Ok(candidates.remove(0))
}

/// Parse `subject` as a key of the given kind, without checking presence.
pub async fn subject_key<S: GraphStore>(
    store: &S,
    kind: SubjectKind,
    subject: &str,
) -> Result<NodeKey, DumpError> {
    match kind {
        SubjectKind::Package => Ok(NodeKey::package(PackageId::parse(subject)?)),
        SubjectKind::StarlarkModule => Ok(NodeKey::starlark_module(Label::parse_canonical(subject)?)),
        SubjectKind::ConfiguredTarget => {
            let (label, prefix) = split_configuration_suffix(subject);
            let label = Label::parse_canonical(label)?;
            let configuration = resolve_configuration(store, prefix).await?;
            Ok(NodeKey::configured_target(label, configuration))
        }
    }
}

/// Resolve `subject` to a key that is present in the graph.
pub async fn resolve_subject<S: GraphStore>(
    store: &S,
    kind: SubjectKind,
    subject: &str,
) -> Result<NodeKey, DumpError> {
    let key = subject_key(store, kind, subject).await?;
    let present = store.contains(&key).await.map_err(DumpError::from_store)?;
    if !present {
        return Err(ResolutionError::NodeNotPresent(key).into());
    }
    Ok(key)
}
