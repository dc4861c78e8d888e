//! Planning-graph engine: the typed node/edge model, the [`GraphStore`]
//! that owns it, and the queries the generation controller is built on.
//!
//! - [`graph`]: [`GraphStore`], the single owner of nodes and typed edges
//! - [`validate`]: [`Validator`], structural checks that decide buildability
//! - [`schedule`]: [`Scheduler`] and [`Schedule`], the deterministic order
//! - [`localize`]: [`LocalizationEngine`], ancestor/descendant and related-node queries
//! - [`search`]: [`TermIndex`], a term-overlap [`SimilaritySearch`]
//! - [`snapshot`]: [`GraphSnapshot`], the persisted graph document

pub mod edge;
pub mod error;
pub mod graph;
pub mod id;
pub mod localize;
pub mod node;
pub mod schedule;
pub mod search;
pub mod snapshot;
pub mod status;
pub mod validate;

pub use edge::{Edge, EdgeKey, EdgeKind};
pub use error::CoreError;
pub use graph::{GraphMetrics, GraphStore};
pub use id::NodeId;
pub use localize::{LocalizationEngine, RelatedNode, Relevance};
pub use node::{GeneratedOutput, Node, NodeKind, NodeMetadata};
pub use petgraph::Direction;
pub use schedule::{Schedule, Scheduler};
pub use search::{SimilaritySearch, TermIndex};
pub use snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
pub use status::NodeStatus;
pub use validate::{Advisory, Validator, Violation};
