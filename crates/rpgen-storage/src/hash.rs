//! Deterministic blake3 digests for stored runs.
//!
//! The structure digest covers node identity (id, kind, name) and every
//! edge, in document order. Statuses and metadata are left out, so the
//! incremental status writes of a build never invalidate it; an edge
//! insertion does, and refreshes it.

use rpgen_core::GraphSnapshot;

/// Length-prefixed so that ("ab", "c") and ("a", "bc") hash differently.
fn update_field(hasher: &mut blake3::Hasher, field: &str) {
    hasher.update(&(field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

pub fn structure_digest(snapshot: &GraphSnapshot) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"nodes");
    hasher.update(&(snapshot.nodes.len() as u64).to_le_bytes());
    for node in &snapshot.nodes {
        update_field(&mut hasher, node.id.as_str());
        update_field(&mut hasher, node.kind.as_str());
        update_field(&mut hasher, &node.name);
    }
    hasher.update(b"edges");
    hasher.update(&(snapshot.edges.len() as u64).to_le_bytes());
    for edge in &snapshot.edges {
        update_field(&mut hasher, edge.source.as_str());
        update_field(&mut hasher, edge.target.as_str());
        update_field(&mut hasher, edge.kind.as_str());
        update_field(&mut hasher, edge.data_id.as_deref().unwrap_or(""));
        update_field(&mut hasher, edge.note.as_deref().unwrap_or(""));
    }
    hasher.finalize()
}

/// Digest of generated content.
pub fn content_digest(content: &str) -> blake3::Hash {
    blake3::hash(content.as_bytes())
}
