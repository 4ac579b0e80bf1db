//! Rotation ordering for secrets that read other secrets.
//!
//! Ordering is an iterative fixed point: each pass processes every secret
//! whose direct references are all processed, recording the transitive set of
//! secrets it depends on. The engine uses those sets for cascading rotations.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{Error, Result};

/// A secret and the names of the secrets it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNode {
    /// Secret name.
    pub name: String,
    /// Names of directly referenced secrets.
    pub references: BTreeSet<String>,
}

impl SecretNode {
    /// Creates a node.
    pub fn new<I, S>(name: impl Into<String>, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            references: references.into_iter().map(Into::into).collect(),
        }
    }
}

/// A secret in rotation order with everything it transitively depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedSecret {
    /// Secret name.
    pub name: String,
    /// Every secret reachable through references, excluding the secret itself.
    pub references: BTreeSet<String>,
}

/// Orders `nodes` so every secret comes after the secrets it references.
///
/// Self-references are ignored. Within a pass, secrets keep their input
/// order, so the result is deterministic.
///
/// # Errors
///
/// Returns [`Error::UnresolvedReferences`] naming the secrets that can never
/// be processed, either because they sit on a cycle or reference a name not
/// present in `nodes`.
pub fn order_secrets(nodes: &[SecretNode]) -> Result<Vec<OrderedSecret>> {
    let mut expanded: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    let mut ordered = Vec::with_capacity(nodes.len());

    loop {
        let mut progressed = false;
        for node in nodes {
            if expanded.contains_key(node.name.as_str()) {
                continue;
            }
            let direct: Vec<&String> = node
                .references
                .iter()
                .filter(|r| **r != node.name)
                .collect();
            if !direct.iter().all(|r| expanded.contains_key(r.as_str())) {
                continue;
            }

            let mut references = BTreeSet::new();
            for reference in direct {
                references.insert(reference.clone());
                if let Some(transitive) = expanded.get(reference.as_str()) {
                    references.extend(transitive.iter().cloned());
                }
            }
            references.remove(&node.name);

            debug!(secret = %node.name, references = ?references, "ordered secret");
            expanded.insert(node.name.as_str(), references.clone());
            ordered.push(OrderedSecret {
                name: node.name.clone(),
                references,
            });
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    if ordered.len() < nodes.len() {
        let names = nodes
            .iter()
            .filter(|n| !expanded.contains_key(n.name.as_str()))
            .map(|n| n.name.clone())
            .collect();
        return Err(Error::UnresolvedReferences { names });
    }
    Ok(ordered)
}
