//! Similarity search over node descriptions.

use std::collections::HashSet;

use crate::graph::GraphStore;
use crate::id::NodeId;
use crate::node::Node;

/// Ranks node ids by semantic closeness to free text.
pub trait SimilaritySearch: Send + Sync {
    /// At most `limit` ids, best match first.
    fn query(&self, text: &str, limit: usize) -> Vec<NodeId>;
}

/// Lowercased terms of `text`, split on non-alphanumerics and camelCase
/// boundaries. Single-character terms are dropped; order of first
/// occurrence is kept.
pub fn terms(text: &str) -> Vec<String> {
    fn flush(current: &mut String, out: &mut Vec<String>) {
        let term = std::mem::take(current);
        if term.chars().count() >= 2 && !out.contains(&term) {
            out.push(term);
        }
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if ch.is_uppercase() && prev_lower {
                flush(&mut current, &mut out);
            }
            prev_lower = ch.is_lowercase() || ch.is_numeric();
            current.extend(ch.to_lowercase());
        } else {
            flush(&mut current, &mut out);
            prev_lower = false;
        }
    }
    flush(&mut current, &mut out);
    out
}

/// Text of a node that similarity and keyword matching look at.
pub(crate) fn node_text(node: &Node) -> String {
    let meta = &node.metadata;
    let mut parts = vec![node.name.as_str()];
    parts.extend(meta.doc.as_deref());
    parts.extend(meta.signature.as_deref());
    parts.extend(meta.tags.iter().map(String::as_str));
    parts.join(" ")
}

/// Term-overlap index: cosine similarity over binary term vectors.
#[derive(Debug, Clone, Default)]
pub struct TermIndex {
    entries: Vec<(NodeId, HashSet<String>)>,
}

impl TermIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every node of `graph` in insertion order.
    pub fn build(graph: &GraphStore) -> Self {
        let mut index = TermIndex::new();
        for node in graph.nodes() {
            index.insert(node.id.clone(), &node_text(node));
        }
        index
    }

    pub fn insert(&mut self, id: NodeId, text: &str) {
        let set: HashSet<String> = terms(text).into_iter().collect();
        match self.entries.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = set,
            None => self.entries.push((id, set)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SimilaritySearch for TermIndex {
    fn query(&self, text: &str, limit: usize) -> Vec<NodeId> {
        let wanted: HashSet<String> = terms(text).into_iter().collect();
        if wanted.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, (_, set))| {
                let overlap = set.intersection(&wanted).count();
                if overlap == 0 {
                    return None;
                }
                let norm = ((set.len() * wanted.len()) as f64).sqrt();
                Some((i, overlap as f64 / norm))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(limit)
            .map(|(i, _)| self.entries[i].0.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn terms_split_case_and_punctuation() {
        assert_eq!(
            terms("parseHTTPRequest, read_body() x"),
            vec!["parse", "httprequest", "read", "body"]
        );
        assert_eq!(terms("Token token TOKEN"), vec!["token"]);
    }

    #[test]
    fn query_ranks_by_overlap() {
        let mut g = GraphStore::new();
        g.add_node(Node::new("a", NodeKind::BehavioralUnit, "hash_password").with_doc("bcrypt hashing"))
            .unwrap();
        g.add_node(Node::new("b", NodeKind::BehavioralUnit, "verify_password")).unwrap();
        g.add_node(Node::new("c", NodeKind::BehavioralUnit, "render_page")).unwrap();

        let index = TermIndex::build(&g);
        assert_eq!(index.len(), 3);
        let hits = index.query("verify password", 5);
        assert_eq!(hits, vec![NodeId::from("b"), NodeId::from("a")]);
        assert_eq!(index.query("password", 1), vec![NodeId::from("b")]);
        assert!(index.query("", 5).is_empty());
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let mut index = TermIndex::new();
        index.insert("a".into(), "alpha");
        index.insert("a".into(), "beta");
        assert_eq!(index.len(), 1);
        assert!(index.query("alpha", 3).is_empty());
        assert_eq!(index.query("beta", 3), vec![NodeId::from("a")]);
    }
}
