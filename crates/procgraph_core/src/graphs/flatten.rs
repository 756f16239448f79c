// SPDX-License-Identifier: MIT OR Apache-2.0
//! Call-graph flattening.
//!
//! Collects every function reachable through call nodes, each target once by
//! name and never the root itself. Callees are ordered ahead of their callers
//! so definitions precede their uses in generated source.

use crate::graphs::function::{Function, SharedFunction};
use crate::nodes::call::CallBinding;
use std::collections::HashSet;

/// Resolve a call target, preferring the bound ID over the name
fn resolve<'a>(
    library: &'a [SharedFunction],
    name: &str,
    binding: Option<CallBinding>,
) -> Option<&'a SharedFunction> {
    if let Some(found) = binding.and_then(|b| library.iter().find(|f| f.id() == b.id)) {
        return Some(found);
    }
    library
        .iter()
        .find(|f| f.try_lock().is_some_and(|g| g.name() == name))
}

/// Transitive call targets of `root` in post-order, excluding `root`.
///
/// Every function appears after all of its own callees, so emitting the list in
/// order defines each callee before its first caller.
pub fn flatten(root: &Function, library: &[SharedFunction]) -> Vec<SharedFunction> {
    let mut seen: HashSet<String> = HashSet::from([root.name().to_string()]);
    let mut ordered = Vec::new();
    visit(root, root.call_targets(), library, &mut seen, &mut ordered);
    ordered
}

/// Depth-first walk pushing each target after its callees
fn visit(
    root: &Function,
    targets: Vec<(String, Option<CallBinding>)>,
    library: &[SharedFunction],
    seen: &mut HashSet<String>,
    ordered: &mut Vec<SharedFunction>,
) {
    for (name, binding) in targets {
        if seen.contains(&name) {
            continue;
        }
        let Some(target) = resolve(library, &name, binding) else {
            tracing::debug!("Call target {name:?} of {} is not available", root.name());
            continue;
        };
        if target.id() == root.id() {
            continue;
        }
        seen.insert(name);

        let callees = match target.try_lock() {
            Some(f) => f.call_targets(),
            None => {
                tracing::warn!("Function {} is busy; its callees are not flattened", target.id());
                Vec::new()
            }
        };
        visit(root, callees, library, seen, ordered);
        ordered.push(target.clone());
    }
}
