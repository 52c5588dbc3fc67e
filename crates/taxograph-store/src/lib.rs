//! Taxograph Store: property-graph access for taxonomy navigation
//!
//! The navigation engine never talks to a database directly. It sees the
//! taxonomy through the [`GraphStore`] trait, which exposes exactly the
//! operations the engine needs:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        GraphStore                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  read   neighbors(node, direction, limit) -> [{name, id}]    │
//! │         labels(node)                      -> [label]         │
//! │         property(node, key)               -> value?          │
//! │         count_inbound(node, label)        -> usize           │
//! │         inbound_with_payload(..)          -> [{name,id,data}]│
//! │  write  create_attached(request)          -> {id, target}    │
//! │  misc   ping()                                               │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲                                   ▲
//!   ┌──────┴───────┐                   ┌───────┴────────┐
//!   │ MemoryGraph  │                   │ Neo4jHttpStore │
//!   │ (in-process) │                   │ (Cypher/HTTP)  │
//!   └──────────────┘                   └────────────────┘
//! ```
//!
//! The taxonomy is read-only from the engine's point of view; the single
//! write operation creates one node plus one edge to an existing node and
//! must be atomic.

pub mod memory;
#[cfg(feature = "neo4j")]
pub mod neo4j;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use memory::{GraphSnapshot, MemoryGraph, SnapshotEdge, SnapshotNode};
#[cfg(feature = "neo4j")]
pub use neo4j::{Neo4jConfig, Neo4jHttpStore};

// ============================================================================
// Core Types
// ============================================================================

/// Opaque graph identifier (Neo4j `elementId`, or `mem:<n>` for [`MemoryGraph`]).
///
/// Identity of a taxonomy node is its id, never its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for NodeId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Edge orientation used to enumerate neighbours of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `(a)-[]->(b)`
    Outbound,
    /// `(a)<-[]-(b)`
    Inbound,
    /// `(a)-[]-(b)`
    Undirected,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Outbound
    }
}

/// A `{name, id}` tuple returned by neighbour queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    /// `None` when the node has no `name` property.
    pub name: Option<String>,
    pub id: NodeId,
}

/// A neighbour together with its serialized payload property, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadNode {
    pub name: Option<String>,
    pub id: NodeId,
    /// Parsed payload. A payload stored as a JSON string is decoded; a
    /// payload that does not parse is kept as a plain string value.
    pub payload: Option<serde_json::Value>,
}

/// Request to create one node and exactly one edge from it to `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachRequest {
    /// Label of the new node.
    pub label: String,
    /// Properties of the new node.
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Type of the single edge `(new)-[rel_type]->(target)`.
    pub rel_type: String,
    pub target: NodeId,
}

/// Result of a successful [`GraphStore::create_attached`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedNode {
    pub id: NodeId,
    pub target_name: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph store unreachable: {0}")]
    Unreachable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("write returned no row")]
    NoRowReturned,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ============================================================================
// GraphStore Trait
// ============================================================================

/// Access to a property graph holding the taxonomy.
///
/// Implementations are shared as one long-lived session; callers never issue
/// two operations concurrently.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Neighbours of `node` along `direction`, at most `limit` of them.
    async fn neighbors(
        &self,
        node: &NodeId,
        direction: Direction,
        limit: usize,
    ) -> GraphResult<Vec<NodeRef>>;

    /// Labels of `node`. Errors with [`GraphError::NodeNotFound`] when absent.
    async fn labels(&self, node: &NodeId) -> GraphResult<Vec<String>>;

    /// A single property of `node`.
    async fn property(&self, node: &NodeId, key: &str) -> GraphResult<Option<serde_json::Value>>;

    /// Number of nodes labelled `source_label` with an edge into `node`.
    async fn count_inbound(&self, node: &NodeId, source_label: &str) -> GraphResult<usize>;

    /// Nodes labelled `source_label` with an edge into `node`, together with
    /// their `payload_key` property.
    async fn inbound_with_payload(
        &self,
        node: &NodeId,
        source_label: &str,
        payload_key: &str,
        limit: usize,
    ) -> GraphResult<Vec<PayloadNode>>;

    /// Create one node and one edge to an existing target, atomically.
    ///
    /// On error nothing has been persisted.
    async fn create_attached(&self, request: AttachRequest) -> GraphResult<AttachedNode>;

    /// Connectivity check.
    async fn ping(&self) -> GraphResult<()>;
}

/// Decode a payload property: JSON strings are parsed, other values pass through.
pub fn decode_payload(raw: serde_json::Value) -> Option<serde_json::Value> {
    match raw {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => match serde_json::from_str(&s) {
            Ok(parsed) => Some(parsed),
            Err(_) => Some(serde_json::Value::String(s)),
        },
        other => Some(other),
    }
}
