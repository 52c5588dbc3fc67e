//! In-memory property graph
//!
//! Columnar node storage with a label bitmap index and an edge list with
//! forward/backward indexes. Strings that repeat across the graph (labels,
//! relationship types, property keys) are interned once.
//!
//! All writes go through one lock, so [`GraphStore::create_attached`] is
//! atomic: either both the node and its edge exist afterwards, or neither.

use crate::{
    decode_payload, AttachRequest, AttachedNode, Direction, GraphError, GraphResult, GraphStore,
    NodeId, NodeRef, PayloadNode,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

const ID_PREFIX: &str = "mem:";

// ============================================================================
// String Interning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StrId(u32);

/// Maps labels / relationship types / property keys to compact IDs.
struct StringInterner {
    str_to_id: DashMap<String, StrId>,
    id_to_str: DashMap<StrId, String>,
    next_id: AtomicU32,
}

impl StringInterner {
    fn new() -> Self {
        Self {
            str_to_id: DashMap::new(),
            id_to_str: DashMap::new(),
            next_id: AtomicU32::new(0),
        }
    }

    fn intern(&self, s: &str) -> StrId {
        if let Some(id) = self.str_to_id.get(s) {
            return *id;
        }
        let id = *self
            .str_to_id
            .entry(s.to_string())
            .or_insert_with(|| StrId(self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.id_to_str.entry(id).or_insert_with(|| s.to_string());
        id
    }

    /// Look up an existing ID without inserting.
    fn id_of(&self, s: &str) -> Option<StrId> {
        self.str_to_id.get(s).map(|id| *id)
    }

    fn lookup(&self, id: StrId) -> Option<String> {
        self.id_to_str.get(&id).map(|s| s.clone())
    }
}

// ============================================================================
// Node Storage (Columnar)
// ============================================================================

#[derive(Default)]
struct NodeStore {
    /// node -> `name` property (kept out of `props`, it is read on every query)
    names: Vec<Option<String>>,
    /// node -> labels
    labels: Vec<Vec<StrId>>,
    /// label -> bitmap of nodes
    label_index: HashMap<StrId, RoaringBitmap>,
    /// property key -> (node -> value)
    props: HashMap<StrId, HashMap<u32, serde_json::Value>>,
}

impl NodeStore {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn contains(&self, node: u32) -> bool {
        (node as usize) < self.names.len()
    }

    fn add(&mut self, labels: Vec<StrId>, name: Option<String>) -> u32 {
        let id = self.names.len() as u32;
        for label in &labels {
            self.label_index.entry(*label).or_default().insert(id);
        }
        self.names.push(name);
        self.labels.push(labels);
        id
    }

    fn has_label(&self, node: u32, label: StrId) -> bool {
        self.label_index
            .get(&label)
            .map(|nodes| nodes.contains(node))
            .unwrap_or(false)
    }

    fn name(&self, node: u32) -> Option<String> {
        self.names.get(node as usize).cloned().flatten()
    }

    fn set_prop(&mut self, node: u32, key: StrId, value: serde_json::Value) {
        self.props.entry(key).or_default().insert(node, value);
    }

    fn prop(&self, node: u32, key: StrId) -> Option<&serde_json::Value> {
        self.props.get(&key)?.get(&node)
    }
}

// ============================================================================
// Edge Storage (Edge-List with Indexes)
// ============================================================================

struct Edge {
    rel_type: StrId,
    source: u32,
    target: u32,
}

#[derive(Default)]
struct EdgeStore {
    edges: Vec<Edge>,
    /// source -> edge ids, insertion order
    forward_index: HashMap<u32, Vec<u32>>,
    /// target -> edge ids, insertion order
    backward_index: HashMap<u32, Vec<u32>>,
}

impl EdgeStore {
    fn len(&self) -> usize {
        self.edges.len()
    }

    fn add(&mut self, edge: Edge) -> u32 {
        let id = self.edges.len() as u32;
        self.forward_index.entry(edge.source).or_default().push(id);
        self.backward_index.entry(edge.target).or_default().push(id);
        self.edges.push(edge);
        id
    }

    fn outgoing(&self, source: u32) -> impl Iterator<Item = &Edge> {
        self.forward_index
            .get(&source)
            .into_iter()
            .flatten()
            .filter_map(|&id| self.edges.get(id as usize))
    }

    fn incoming(&self, target: u32) -> impl Iterator<Item = &Edge> {
        self.backward_index
            .get(&target)
            .into_iter()
            .flatten()
            .filter_map(|&id| self.edges.get(id as usize))
    }

    /// Neighbour node ids of `node`, one per edge, in edge insertion order.
    fn neighbors(&self, node: u32, direction: Direction) -> Vec<u32> {
        match direction {
            Direction::Outbound => self.outgoing(node).map(|e| e.target).collect(),
            Direction::Inbound => self.incoming(node).map(|e| e.source).collect(),
            Direction::Undirected => {
                let ids = self
                    .forward_index
                    .get(&node)
                    .into_iter()
                    .flatten()
                    .chain(self.backward_index.get(&node).into_iter().flatten());
                let mut ids: Vec<u32> = ids.copied().collect();
                ids.sort_unstable();
                ids.dedup();
                ids.into_iter()
                    .filter_map(|id| self.edges.get(id as usize))
                    .map(|e| if e.source == node { e.target } else { e.source })
                    .collect()
            }
        }
    }
}

// ============================================================================
// Snapshot Format
// ============================================================================

/// JSON-friendly description of a graph, for fixtures and offline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<SnapshotNode>,
    #[serde(default)]
    pub edges: Vec<SnapshotEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Snapshot-local key referenced by edges.
    pub key: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub from: String,
    pub to: String,
    #[serde(default = "default_rel_type")]
    pub rel_type: String,
}

fn default_rel_type() -> String {
    "SUBCLASS".to_string()
}

// ============================================================================
// MemoryGraph
// ============================================================================

struct GraphData {
    nodes: NodeStore,
    edges: EdgeStore,
}

/// In-process [`GraphStore`].
pub struct MemoryGraph {
    interner: StringInterner,
    data: RwLock<GraphData>,
    /// When set, every store operation fails with [`GraphError::Unreachable`].
    offline: AtomicBool,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            interner: StringInterner::new(),
            data: RwLock::new(GraphData {
                nodes: NodeStore::default(),
                edges: EdgeStore::default(),
            }),
            offline: AtomicBool::new(false),
        }
    }

    /// Build a graph from a snapshot, returning the snapshot key -> id mapping.
    pub fn from_snapshot(
        snapshot: &GraphSnapshot,
    ) -> GraphResult<(Self, BTreeMap<String, NodeId>)> {
        let graph = Self::new();
        let mut keys = BTreeMap::new();
        for node in &snapshot.nodes {
            let labels: Vec<&str> = node.labels.iter().map(String::as_str).collect();
            let id = graph.insert_node(&labels, node.name.clone());
            for (key, value) in &node.properties {
                graph.set_property(&id, key, value.clone())?;
            }
            if keys.insert(node.key.clone(), id).is_some() {
                return Err(GraphError::Query(format!(
                    "duplicate snapshot key '{}'",
                    node.key
                )));
            }
        }
        for edge in &snapshot.edges {
            let from = keys
                .get(&edge.from)
                .ok_or_else(|| GraphError::Query(format!("unknown edge source '{}'", edge.from)))?;
            let to = keys
                .get(&edge.to)
                .ok_or_else(|| GraphError::Query(format!("unknown edge target '{}'", edge.to)))?;
            graph.add_edge(from, &edge.rel_type, to)?;
        }
        Ok((graph, keys))
    }

    /// Add a named node.
    pub fn add_node(&self, labels: &[&str], name: &str) -> NodeId {
        self.insert_node(labels, Some(name.to_string()))
    }

    /// Add a node without a `name` property.
    pub fn add_unnamed_node(&self, labels: &[&str]) -> NodeId {
        self.insert_node(labels, None)
    }

    fn insert_node(&self, labels: &[&str], name: Option<String>) -> NodeId {
        let labels = labels.iter().map(|l| self.interner.intern(l)).collect();
        let raw = self.data.write().nodes.add(labels, name);
        encode_id(raw)
    }

    pub fn set_property(
        &self,
        node: &NodeId,
        key: &str,
        value: serde_json::Value,
    ) -> GraphResult<()> {
        let key = self.interner.intern(key);
        let mut data = self.data.write();
        let raw = resolve(&data.nodes, node)?;
        data.nodes.set_prop(raw, key, value);
        Ok(())
    }

    /// Add `(source)-[rel_type]->(target)`.
    pub fn add_edge(&self, source: &NodeId, rel_type: &str, target: &NodeId) -> GraphResult<()> {
        let rel_type = self.interner.intern(rel_type);
        let mut data = self.data.write();
        let source = resolve(&data.nodes, source)?;
        let target = resolve(&data.nodes, target)?;
        data.edges.add(Edge {
            rel_type,
            source,
            target,
        });
        Ok(())
    }

    /// Simulate an unreachable store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn node_count(&self) -> usize {
        self.data.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.data.read().edges.len()
    }

    /// Name of a node, if it exists and is named.
    pub fn name_of(&self, node: &NodeId) -> Option<String> {
        let data = self.data.read();
        let raw = resolve(&data.nodes, node).ok()?;
        data.nodes.name(raw)
    }

    /// Relationship types of the edges leaving `node`.
    pub fn outgoing_rel_types(&self, node: &NodeId) -> Vec<String> {
        let data = self.data.read();
        let Ok(raw) = resolve(&data.nodes, node) else {
            return Vec::new();
        };
        data.edges
            .outgoing(raw)
            .filter_map(|e| self.interner.lookup(e.rel_type))
            .collect()
    }

    fn check_online(&self) -> GraphResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GraphError::Unreachable("memory graph is offline".to_string()));
        }
        Ok(())
    }

    /// Inbound neighbours carrying `label`, one per edge.
    fn inbound_labelled(data: &GraphData, node: u32, label: Option<StrId>) -> Vec<u32> {
        let Some(label) = label else {
            return Vec::new();
        };
        data.edges
            .incoming(node)
            .map(|e| e.source)
            .filter(|&src| data.nodes.has_label(src, label))
            .collect()
    }
}

fn encode_id(raw: u32) -> NodeId {
    NodeId::new(format!("{ID_PREFIX}{raw}"))
}

fn resolve(nodes: &NodeStore, id: &NodeId) -> GraphResult<u32> {
    id.as_str()
        .strip_prefix(ID_PREFIX)
        .and_then(|n| n.parse::<u32>().ok())
        .filter(|&n| nodes.contains(n))
        .ok_or_else(|| GraphError::NodeNotFound(id.clone()))
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn neighbors(
        &self,
        node: &NodeId,
        direction: Direction,
        limit: usize,
    ) -> GraphResult<Vec<NodeRef>> {
        self.check_online()?;
        let data = self.data.read();
        let raw = resolve(&data.nodes, node)?;
        Ok(data
            .edges
            .neighbors(raw, direction)
            .into_iter()
            .take(limit)
            .map(|n| NodeRef {
                name: data.nodes.name(n),
                id: encode_id(n),
            })
            .collect())
    }

    async fn labels(&self, node: &NodeId) -> GraphResult<Vec<String>> {
        self.check_online()?;
        let data = self.data.read();
        let raw = resolve(&data.nodes, node)?;
        Ok(data.nodes.labels[raw as usize]
            .iter()
            .filter_map(|l| self.interner.lookup(*l))
            .collect())
    }

    async fn property(&self, node: &NodeId, key: &str) -> GraphResult<Option<serde_json::Value>> {
        self.check_online()?;
        let data = self.data.read();
        let raw = resolve(&data.nodes, node)?;
        if key == "name" {
            return Ok(data.nodes.name(raw).map(serde_json::Value::String));
        }
        Ok(self
            .interner
            .id_of(key)
            .and_then(|k| data.nodes.prop(raw, k).cloned()))
    }

    async fn count_inbound(&self, node: &NodeId, source_label: &str) -> GraphResult<usize> {
        self.check_online()?;
        let data = self.data.read();
        let raw = resolve(&data.nodes, node)?;
        Ok(Self::inbound_labelled(&data, raw, self.interner.id_of(source_label)).len())
    }

    async fn inbound_with_payload(
        &self,
        node: &NodeId,
        source_label: &str,
        payload_key: &str,
        limit: usize,
    ) -> GraphResult<Vec<PayloadNode>> {
        self.check_online()?;
        let data = self.data.read();
        let raw = resolve(&data.nodes, node)?;
        let payload_key = self.interner.id_of(payload_key);
        Ok(
            Self::inbound_labelled(&data, raw, self.interner.id_of(source_label))
                .into_iter()
                .take(limit)
                .map(|src| PayloadNode {
                    name: data.nodes.name(src),
                    id: encode_id(src),
                    payload: payload_key
                        .and_then(|k| data.nodes.prop(src, k).cloned())
                        .and_then(decode_payload),
                })
                .collect(),
        )
    }

    async fn create_attached(&self, request: AttachRequest) -> GraphResult<AttachedNode> {
        self.check_online()?;
        let label = self.interner.intern(&request.label);
        let rel_type = self.interner.intern(&request.rel_type);
        let mut name = None;
        let mut props: Vec<(StrId, serde_json::Value)> = Vec::new();
        for (key, value) in request.properties {
            match (key.as_str(), value) {
                ("name", serde_json::Value::String(s)) => name = Some(s),
                (_, value) => props.push((self.interner.intern(&key), value)),
            }
        }

        let mut data = self.data.write();
        // Resolve the target before touching anything.
        let target = resolve(&data.nodes, &request.target)?;
        let raw = data.nodes.add(vec![label], name);
        for (key, value) in props {
            data.nodes.set_prop(raw, key, value);
        }
        data.edges.add(Edge {
            rel_type,
            source: raw,
            target,
        });
        Ok(AttachedNode {
            id: encode_id(raw),
            target_name: data.nodes.name(target),
        })
    }

    async fn ping(&self) -> GraphResult<()> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> (MemoryGraph, NodeId, NodeId, NodeId) {
        let g = MemoryGraph::new();
        let root = g.add_node(&["Class"], "Material");
        let metal = g.add_node(&["Class"], "Metal");
        let ceramic = g.add_node(&["Class"], "Ceramic");
        g.add_edge(&root, "SUBCLASS", &metal).unwrap();
        g.add_edge(&root, "SUBCLASS", &ceramic).unwrap();
        (g, root, metal, ceramic)
    }

    #[tokio::test]
    async fn test_neighbors_by_direction() {
        let (g, root, metal, _) = sample();

        let out = g.neighbors(&root, Direction::Outbound, 10).await.unwrap();
        let names: Vec<_> = out.iter().map(|n| n.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["Metal", "Ceramic"]);

        let inbound = g.neighbors(&metal, Direction::Inbound, 10).await.unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].id, root);

        let both = g.neighbors(&metal, Direction::Undirected, 10).await.unwrap();
        assert_eq!(both.len(), 1);

        let limited = g.neighbors(&root, Direction::Outbound, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_count_inbound_filters_by_label() {
        let (g, root, metal, _) = sample();
        for i in 0..3 {
            let e = g.add_node(&["Entity"], &format!("E{i}"));
            g.add_edge(&e, "INSTANCE_OF", &metal).unwrap();
        }
        // The parent edge is inbound too, but is not an Entity.
        assert_eq!(g.count_inbound(&metal, "Entity").await.unwrap(), 3);
        assert_eq!(g.count_inbound(&root, "Entity").await.unwrap(), 0);
        assert_eq!(g.count_inbound(&metal, "Unknown").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inbound_with_payload_decodes_json_strings() {
        let (g, _, metal, _) = sample();
        let e = g.add_node(&["Entity"], "E1");
        g.set_property(&e, "data", json!("{\"Fe\": 1.0}")).unwrap();
        g.add_edge(&e, "INSTANCE_OF", &metal).unwrap();
        let bare = g.add_node(&["Entity"], "E2");
        g.add_edge(&bare, "INSTANCE_OF", &metal).unwrap();

        let rows = g
            .inbound_with_payload(&metal, "Entity", "data", 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload, Some(json!({"Fe": 1.0})));
        assert_eq!(rows[1].payload, None);
    }

    #[tokio::test]
    async fn test_create_attached_is_all_or_nothing() {
        let (g, _, metal, _) = sample();
        let nodes_before = g.node_count();
        let edges_before = g.edge_count();

        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), json!("Material_x"));
        properties.insert("data".to_string(), json!("{}"));

        let missing = AttachRequest {
            label: "Material".to_string(),
            properties: properties.clone(),
            rel_type: "BELONGS_TO".to_string(),
            target: NodeId::new("mem:9999"),
        };
        assert!(matches!(
            g.create_attached(missing).await,
            Err(GraphError::NodeNotFound(_))
        ));
        assert_eq!(g.node_count(), nodes_before);
        assert_eq!(g.edge_count(), edges_before);

        let ok = AttachRequest {
            label: "Material".to_string(),
            properties,
            rel_type: "BELONGS_TO".to_string(),
            target: metal.clone(),
        };
        let attached = g.create_attached(ok).await.unwrap();
        assert_eq!(attached.target_name.as_deref(), Some("Metal"));
        assert_eq!(g.node_count(), nodes_before + 1);
        assert_eq!(g.edge_count(), edges_before + 1);
        assert_eq!(g.name_of(&attached.id).as_deref(), Some("Material_x"));
        assert_eq!(g.outgoing_rel_types(&attached.id), vec!["BELONGS_TO"]);
        assert_eq!(g.count_inbound(&metal, "Material").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_graph_fails_every_operation() {
        let (g, root, _, _) = sample();
        g.set_offline(true);
        assert!(matches!(g.ping().await, Err(GraphError::Unreachable(_))));
        assert!(g.neighbors(&root, Direction::Outbound, 10).await.is_err());
        g.set_offline(false);
        assert!(g.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_loads_properties_and_edges() {
        let snapshot: GraphSnapshot = serde_json::from_value(json!({
            "nodes": [
                {"key": "root", "labels": ["Class"], "name": "Material"},
                {"key": "hea", "labels": ["Class"], "name": "HEA",
                 "properties": {"description": "high entropy alloys"}}
            ],
            "edges": [{"from": "root", "to": "hea"}]
        }))
        .unwrap();
        let (g, keys) = MemoryGraph::from_snapshot(&snapshot).unwrap();
        let hea = &keys["hea"];
        assert_eq!(
            g.property(hea, "description").await.unwrap(),
            Some(json!("high entropy alloys"))
        );
        assert_eq!(g.labels(hea).await.unwrap(), vec!["Class"]);
        assert_eq!(g.outgoing_rel_types(&keys["root"]), vec!["SUBCLASS"]);
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let (g, _, _, _) = sample();
        let err = g.labels(&NodeId::new("4:abc:0")).await.unwrap_err();
        assert!(matches!(err, GraphError::NodeNotFound(_)));
    }
}
