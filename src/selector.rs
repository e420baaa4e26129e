use std::collections::BTreeSet;

use glob::Pattern;

use crate::model::{NamespaceInfo, NamespacePhase};

/// Pure function computing the target namespace set for one ClusterSecret.
///
/// `namespaces` is filtered to exclude `Terminating` entries before
/// selection. `match_namespace` absent or containing only `"*"` is
/// equivalent to "all"; `avoid_namespaces` absent is equivalent to "none". A
/// name matched by both wins for avoid.
pub fn select_namespaces(
    namespaces: &[NamespaceInfo],
    match_namespace: Option<&[String]>,
    avoid_namespaces: Option<&[String]>,
) -> BTreeSet<String> {
    let match_patterns = compile(match_namespace);
    let avoid_patterns = compile(avoid_namespaces);

    namespaces
        .iter()
        .filter(|ns| ns.phase != NamespacePhase::Terminating)
        .filter(|ns| {
            let matched = match_patterns.is_empty() || match_patterns.iter().any(|p| p.matches(&ns.name));
            let avoided = avoid_patterns.iter().any(|p| p.matches(&ns.name));
            matched && !avoided
        })
        .map(|ns| ns.name.clone())
        .collect()
}

fn compile(globs: Option<&[String]>) -> Vec<Pattern> {
    globs
        .unwrap_or(&[])
        .iter()
        .filter(|g| g.as_str() != "*")
        .filter_map(|g| Pattern::new(g).ok())
        .collect()
}
