//! LocalizationEngine: "what is relevant to node X".
//!
//! Structural relevance comes from bounded breadth-first traversal over
//! `depends_on` and `data_flow` edges. Functional relevance comes from
//! keyword scoring over names and metadata, optionally merged with an
//! external [`SimilaritySearch`]. Structural neighbors are always part of
//! [`LocalizationEngine::find_related`]'s answer.

use std::collections::HashSet;

use petgraph::Direction;
use serde::Serialize;

use crate::edge::EdgeKind;
use crate::error::CoreError;
use crate::graph::GraphStore;
use crate::id::NodeId;
use crate::schedule::Schedule;
use crate::search::{terms, SimilaritySearch};

/// Why a node was considered relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Relevance {
    /// Reached by traversal, `distance` hops from the anchor.
    Structural { distance: usize },
    Keyword { score: u32 },
    /// Position in the similarity collaborator's ranking.
    Semantic { rank: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedNode {
    pub id: NodeId,
    pub relevance: Relevance,
}

pub struct LocalizationEngine<'a> {
    graph: &'a GraphStore,
    schedule: Option<&'a Schedule>,
    similarity: Option<&'a dyn SimilaritySearch>,
    radius: usize,
}

impl<'a> LocalizationEngine<'a> {
    /// Structural radius used by `find_related` unless overridden.
    pub const DEFAULT_RADIUS: usize = 2;

    pub fn new(graph: &'a GraphStore) -> Self {
        LocalizationEngine {
            graph,
            schedule: None,
            similarity: None,
            radius: Self::DEFAULT_RADIUS,
        }
    }

    /// Ties at equal distance follow this schedule's order. Without one,
    /// insertion order is used.
    pub fn with_schedule(mut self, schedule: &'a Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn with_similarity(mut self, similarity: &'a dyn SimilaritySearch) -> Self {
        self.similarity = Some(similarity);
        self
    }

    pub fn with_radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    /// Nodes `id` depends on (directly or through data flow), nearest first,
    /// at most `max_depth` hops away.
    pub fn ancestors(&self, id: &str, max_depth: usize) -> Result<Vec<RelatedNode>, CoreError> {
        self.traverse(id, max_depth, Direction::Incoming)
    }

    /// Nodes that depend on `id`, nearest first.
    pub fn descendants(&self, id: &str, max_depth: usize) -> Result<Vec<RelatedNode>, CoreError> {
        self.traverse(id, max_depth, Direction::Outgoing)
    }

    /// Ancestors and descendants together, ordered by distance then rank.
    pub fn neighborhood(&self, id: &str, max_depth: usize) -> Result<Vec<RelatedNode>, CoreError> {
        let mut all = self.ancestors(id, max_depth)?;
        let seen: HashSet<NodeId> = all.iter().map(|r| r.id.clone()).collect();
        all.extend(
            self.descendants(id, max_depth)?
                .into_iter()
                .filter(|r| !seen.contains(&r.id)),
        );
        all.sort_by_key(|r| (distance(r), self.rank(&r.id)));
        Ok(all)
    }

    /// Keyword score of every node against `query`, best first. A query
    /// term found in the name scores 3, in the doc 2, in the signature 1,
    /// in a tag 2.
    pub fn keyword_matches(&self, query: &str) -> Vec<(NodeId, u32)> {
        let wanted = terms(query);
        if wanted.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(NodeId, u32)> = self
            .graph
            .nodes()
            .filter_map(|node| {
                let name = node.name.to_lowercase();
                let doc = node.metadata.doc.as_deref().unwrap_or("").to_lowercase();
                let sig = node.metadata.signature.as_deref().unwrap_or("").to_lowercase();
                let tags: Vec<String> = node.metadata.tags.iter().map(|t| t.to_lowercase()).collect();

                let score: u32 = wanted
                    .iter()
                    .map(|term| {
                        let mut s = 0;
                        if name.contains(term.as_str()) {
                            s += 3;
                        }
                        if doc.contains(term.as_str()) {
                            s += 2;
                        }
                        if sig.contains(term.as_str()) {
                            s += 1;
                        }
                        if tags.iter().any(|t| t.contains(term.as_str())) {
                            s += 2;
                        }
                        s
                    })
                    .sum();
                (score > 0).then(|| (node.id.clone(), score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(self.rank(&a.0).cmp(&self.rank(&b.0))));
        scored
    }

    /// Nodes relevant to `query`.
    ///
    /// When `anchor` is given, its structural neighborhood (within the
    /// engine's radius) comes first and is never truncated. Up to `limit`
    /// further nodes follow: keyword matches, then the similarity
    /// collaborator's ranking. Ids the collaborator returns that are not
    /// in the graph are ignored.
    pub fn find_related(
        &self,
        query: &str,
        anchor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RelatedNode>, CoreError> {
        let mut related = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::new();

        if let Some(anchor) = anchor {
            seen.insert(self.graph.get_node(anchor)?.id.clone());
            for node in self.neighborhood(anchor, self.radius)? {
                if seen.insert(node.id.clone()) {
                    related.push(node);
                }
            }
        }

        let mut budget = limit;
        for (id, score) in self.keyword_matches(query) {
            if budget == 0 {
                break;
            }
            if seen.insert(id.clone()) {
                related.push(RelatedNode {
                    id,
                    relevance: Relevance::Keyword { score },
                });
                budget -= 1;
            }
        }

        if let Some(similarity) = self.similarity {
            for (rank, id) in similarity.query(query, limit).into_iter().enumerate() {
                if budget == 0 {
                    break;
                }
                if self.graph.contains_node(&id) && seen.insert(id.clone()) {
                    related.push(RelatedNode {
                        id,
                        relevance: Relevance::Semantic { rank },
                    });
                    budget -= 1;
                }
            }
        }

        Ok(related)
    }

    fn traverse(
        &self,
        id: &str,
        max_depth: usize,
        direction: Direction,
    ) -> Result<Vec<RelatedNode>, CoreError> {
        let start = self.graph.get_node(id)?.id.clone();
        let mut seen = HashSet::from([start.clone()]);
        let mut frontier = vec![start];
        let mut found = Vec::new();

        for distance in 1..=max_depth {
            let mut next = Vec::new();
            for current in &frontier {
                for other in self
                    .graph
                    .adjacent(current, direction, EdgeKind::is_contextual)?
                {
                    if seen.insert(other.clone()) {
                        next.push(other);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            next.sort_by_key(|n| self.rank(n));
            found.extend(next.iter().map(|n| RelatedNode {
                id: n.clone(),
                relevance: Relevance::Structural { distance },
            }));
            frontier = next;
        }
        Ok(found)
    }

    fn rank(&self, id: &str) -> usize {
        self.schedule
            .and_then(|s| s.position(id))
            .or_else(|| self.graph.position(id))
            .unwrap_or(usize::MAX)
    }
}

fn distance(node: &RelatedNode) -> usize {
    match node.relevance {
        Relevance::Structural { distance } => distance,
        _ => usize::MAX,
    }
}
