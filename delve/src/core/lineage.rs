//! Ancestor lookups over the node arena.

use crate::state::{ResearchNode, ResearchState};

/// Ancestors of `id`, root first, excluding the node itself.
///
/// Walks `parent_id` links. Stops early on a missing parent, and bounds the
/// walk by arena size so a corrupted (cyclic) state cannot loop forever.
pub fn lineage<'a>(state: &'a ResearchState, id: &str) -> Vec<&'a ResearchNode> {
    let mut chain = Vec::new();
    let mut current = state.node(id).and_then(|node| node.parent_id.as_deref());
    while let Some(parent_id) = current {
        if chain.len() >= state.nodes.len() {
            break;
        }
        let Some(parent) = state.node(parent_id) else {
            break;
        };
        chain.push(parent);
        current = parent.parent_id.as_deref();
    }
    chain.reverse();
    chain
}

/// Return the `/`-separated id path from the root to `id`.
pub fn node_path(state: &ResearchState, id: &str) -> Option<String> {
    let node = state.node(id)?;
    let mut ids: Vec<&str> = lineage(state, id)
        .into_iter()
        .map(|ancestor| ancestor.id.as_str())
        .collect();
    ids.push(node.id.as_str());
    Some(ids.join("/"))
}

/// Direct children of `id` in creation order.
pub fn children<'a>(state: &'a ResearchState, id: &str) -> Vec<&'a ResearchNode> {
    state
        .nodes
        .iter()
        .filter(|node| node.parent_id.as_deref() == Some(id))
        .collect()
}
