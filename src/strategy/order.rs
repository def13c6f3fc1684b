//! Dependency-ordered source scheduling.
//!
//! Before a job runs, its sources are layered into waves: every source lands
//! strictly after each source it references, and sources within one wave have
//! no references among themselves, so a wave may execute concurrently. The
//! dependency graph comes from a preprocessing scan, never from lazy
//! resolution at execution time.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::connector::Source;
use crate::strategy::engine::EngineError;
use crate::strategy::reference::source_refs;

/// Source keys referenced anywhere in a source's definition.
///
/// Scans every string field of the source and its computes by serializing the
/// definition and extracting reference tokens from the serialization.
pub fn source_dependencies(source: &Source) -> Vec<String> {
    match serde_yaml::to_string(source) {
        Ok(text) => source_refs(&text),
        Err(e) => {
            warn!(source = %source.name, error = %e, "Source not scannable for references");
            Vec::new()
        }
    }
}

/// Reorder a job's sources according to its execution-order hint.
///
/// Hinted names come first, in hint order; sources the hint omits keep their
/// declaration order after them.
pub fn apply_execution_order<'a>(sources: &'a [Source], hint: &[String]) -> Vec<&'a Source> {
    if hint.is_empty() {
        return sources.iter().collect();
    }

    let mut ordered: Vec<&Source> = hint
        .iter()
        .filter_map(|name| sources.iter().find(|s| &s.name == name))
        .collect();
    for source in sources {
        if !hint.contains(&source.name) {
            ordered.push(source);
        }
    }
    ordered
}

/// Layer keyed sources into dependency waves (Kahn's algorithm).
///
/// Only references to keys within the given set constrain the schedule;
/// references to other jobs' keys point at tables that already exist. Ties
/// within a wave keep the input order. A cycle is fatal and names every key
/// still unplaced.
pub fn resolve_execution_waves(
    keyed_sources: &[(String, &Source)],
) -> Result<Vec<Vec<String>>, EngineError> {
    let key_set: BTreeSet<&str> = keyed_sources.iter().map(|(key, _)| key.as_str()).collect();

    // key -> keys it depends on, restricted to this job
    let mut dependencies: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (key, source) in keyed_sources {
        let refs = source_dependencies(source);
        // Resolve through key_set so the borrow outlives the refs scan.
        let internal: BTreeSet<&str> = refs
            .iter()
            .filter_map(|r| key_set.get(r.as_str()).copied())
            .collect();
        dependencies.insert(key.as_str(), internal);
    }

    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut waves: Vec<Vec<String>> = Vec::new();

    while placed.len() < keyed_sources.len() {
        // Ready = unplaced keys whose dependencies are all placed.
        let wave: Vec<&str> = keyed_sources
            .iter()
            .map(|(key, _)| key.as_str())
            .filter(|key| !placed.contains(key))
            .filter(|key| {
                dependencies
                    .get(key)
                    .is_none_or(|deps| deps.iter().all(|d| placed.contains(d) || d == key))
            })
            .collect();

        if wave.is_empty() {
            let remaining: Vec<String> = keyed_sources
                .iter()
                .map(|(key, _)| key.clone())
                .filter(|key| !placed.contains(key.as_str()))
                .collect();
            return Err(EngineError::DependencyCycle { keys: remaining });
        }

        placed.extend(wave.iter().copied());
        waves.push(wave.into_iter().map(String::from).collect());
    }

    Ok(waves)
}
