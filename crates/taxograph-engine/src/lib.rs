//! Taxograph Engine: oracle-driven taxonomy navigation and record mounting
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                         NAVIGATION PIPELINE                            │
//! ├────────────────────────────────────────────────────────────────────────┤
//! │                                                                        │
//! │   MaterialRecord ──► Navigator ──────────────────────► MountOutput     │
//! │                        │   ▲                                           │
//! │            position    │   │ validated decision                        │
//! │                        ▼   │                                           │
//! │   ┌───────────────┐  menu  ┌────────────────┐  tools  ┌───────────┐   │
//! │   │ CandidateSet  │───────►│ Decision       │────────►│  Oracle   │   │
//! │   │ Builder       │        │ Protocol       │◄────────│ (LLM)     │   │
//! │   └───────┬───────┘        └───────┬────────┘  calls  └───────────┘   │
//! │           │                        │ executor                          │
//! │           │   ┌────────────────┐   ▼                                   │
//! │           │   │ Similarity     │  ┌────────────────┐                   │
//! │           │   │ Ranker (top-k) │  │ Mount          │                   │
//! │           │   └────────────────┘  │ Transaction    │                   │
//! │           ▼                       └───────┬────────┘                   │
//! │   ┌──────────────────────────────────────▼──────────────────────┐     │
//! │   │                        GraphStore                           │     │
//! │   └─────────────────────────────────────────────────────────────┘     │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The taxonomy is read-only. The only write is the mount: one new record
//! node plus one edge to the chosen instance node.

pub mod batch;
pub mod candidates;
pub mod config;
pub mod error;
pub mod mount;
pub mod navigator;
pub mod protocol;
pub mod similarity;
pub mod special;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use batch::{BatchEvent, BatchReport, BatchRunner, RecordOutcome};
pub use candidates::CandidateSetBuilder;
pub use config::{
    DecisionStrategy, EngineConfig, LayerDirections, MountConfig, NavigationConfig, RecordSchema,
    TaxonomyConfig,
};
pub use error::{BatchError, DecisionError, FailureReason, MountError, NavigationError};
pub use mount::MountTransaction;
pub use navigator::{NavigationState, Navigator, NavigatorState};
pub use protocol::{DecisionProtocol, StepExecutor, DECISION_TEMPERATURE};
pub use similarity::{rank, shortlist, Ranked};
pub use special::SpecialNodeRegistry;

pub use taxograph_store::{Direction, NodeId};

// ============================================================================
// Taxonomy View
// ============================================================================

/// What a taxonomy node offers to navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Children are further categories.
    Branch,
    /// Concrete instances hang off the node through inbound edges.
    InstancePool,
}

/// Read-only view of one taxonomy node. Identity is `id`, never `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
}

// ============================================================================
// Candidate Menu
// ============================================================================

/// One legal choice offered to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub element_id: NodeId,
    /// Real node name. May differ from the menu label when names collide.
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Similarity to the record when the menu is a ranked shortlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl CandidateEntry {
    pub fn new(element_id: NodeId, name: impl Into<String>) -> Self {
        Self {
            element_id,
            name: name.into(),
            examples: Vec::new(),
            description: None,
            score: None,
        }
    }
}

/// Ordered label -> entry menu. Labels are unique within one set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    entries: Vec<(String, CandidateEntry)>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the entry's name, suffixing ` #2`, ` #3`, ... on collision.
    /// Returns the label actually used.
    pub fn insert(&mut self, entry: CandidateEntry) -> String {
        let mut label = entry.name.clone();
        let mut n = 1;
        while self.contains(&label) {
            n += 1;
            label = format!("{} #{}", entry.name, n);
        }
        self.entries.push((label.clone(), entry));
        label
    }

    pub fn get(&self, label: &str) -> Option<&CandidateEntry> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, entry)| entry)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|(l, _)| l == label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CandidateEntry)> {
        self.entries.iter().map(|(l, e)| (l.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Classification Path
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub name: String,
    pub element_id: NodeId,
}

/// Append-only route from the taxonomy root to the mount target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationPath(Vec<PathStep>);

impl ClassificationPath {
    pub fn starting_at(name: impl Into<String>, element_id: NodeId) -> Self {
        let mut path = Self::default();
        path.push(name, element_id);
        path
    }

    pub fn push(&mut self, name: impl Into<String>, element_id: NodeId) {
        self.0.push(PathStep {
            name: name.into(),
            element_id,
        });
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ClassificationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.names().join(" → "))
    }
}

// ============================================================================
// Material Records
// ============================================================================

/// An incoming record. The payload is passed through untouched; the engine
/// only reads the composition map and the display title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    /// Position of the record in its source file.
    pub index: usize,
    pub payload: serde_json::Value,
}

impl MaterialRecord {
    pub fn new(index: usize, payload: serde_json::Value) -> Self {
        Self { index, payload }
    }

    /// Element -> fraction map read at `schema.composition_path`.
    pub fn composition(&self, schema: &RecordSchema) -> BTreeMap<String, f64> {
        composition_of(&self.payload, schema)
    }

    pub fn title(&self, schema: &RecordSchema) -> Option<String> {
        lookup(&self.payload, &schema.title_path).and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
    }
}

/// Follow a dotted path (`data.成分比重`) into a JSON value.
pub fn lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| current.get(segment))
}

/// Composition map of a record or instance payload.
///
/// Instance payloads are stored either as a full record or with the
/// composition at top level, so the last path segment is tried as a fallback.
/// Values may be numbers or numeric strings; anything else is skipped.
pub fn composition_of(payload: &serde_json::Value, schema: &RecordSchema) -> BTreeMap<String, f64> {
    let map = lookup(payload, &schema.composition_path).or_else(|| {
        schema
            .composition_path
            .rsplit('.')
            .next()
            .and_then(|last| payload.get(last))
    });

    map.and_then(|m| m.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(element, v)| {
                    let fraction = match v {
                        serde_json::Value::Number(n) => n.as_f64(),
                        serde_json::Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    }?;
                    fraction.is_finite().then(|| (element.clone(), fraction))
                })
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Decisions and Mounts
// ============================================================================

/// Validated answer of one decision step.
#[derive(Debug, Clone)]
pub struct DecisionResult {
    pub chosen_label: String,
    pub entry: CandidateEntry,
    pub reasoning: Option<String>,
    /// Final natural-language confirmation (execute-and-confirm only).
    pub confirmation: Option<String>,
    /// Proposals consumed, including rejected ones.
    pub attempts: usize,
}

/// A record node created by the mount transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountRecord {
    pub new_node_id: NodeId,
    pub new_node_name: String,
    pub mounted_at: DateTime<Utc>,
    pub target_node_id: NodeId,
    pub target_name: String,
    /// Serialized record payload stored on the node.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountedNode {
    pub name: String,
    pub element_id: NodeId,
    pub mounted_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Audit record of one successful classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountOutput {
    pub classification_path: ClassificationPath,
    pub mounted_node: MountedNode,
    pub target_node: PathStep,
}

impl MountOutput {
    pub fn new(path: ClassificationPath, mount: &MountRecord, record: &MaterialRecord) -> Self {
        Self {
            classification_path: path,
            mounted_node: MountedNode {
                name: mount.new_node_name.clone(),
                element_id: mount.new_node_id.clone(),
                mounted_at: mount.mounted_at,
                payload: record.payload.clone(),
            },
            target_node: PathStep {
                name: mount.target_name.clone(),
                element_id: mount.target_node_id.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidate_labels_are_unique() {
        let mut set = CandidateSet::new();
        assert_eq!(set.insert(CandidateEntry::new("a".into(), "Steel")), "Steel");
        assert_eq!(set.insert(CandidateEntry::new("b".into(), "Steel")), "Steel #2");
        assert_eq!(set.insert(CandidateEntry::new("c".into(), "Steel")), "Steel #3");

        assert_eq!(set.len(), 3);
        assert_eq!(set.get("Steel #2").unwrap().element_id.as_str(), "b");
        assert_eq!(set.get("Steel #2").unwrap().name, "Steel");
        assert!(set.get("Iron").is_none());
    }

    #[test]
    fn test_classification_path_display() {
        let mut path = ClassificationPath::starting_at("Material", "r".into());
        path.push("Metal", "m".into());
        assert_eq!(path.to_string(), "Material → Metal");
        assert_eq!(path.len(), 2);

        let encoded = serde_json::to_value(&path).unwrap();
        assert_eq!(encoded[1], json!({"name": "Metal", "element_id": "m"}));
    }

    #[test]
    fn test_record_composition_and_title() {
        let schema = RecordSchema::default();
        let record = MaterialRecord::new(
            0,
            json!({"data": {"成分比重": {"Fe": 0.5, "Cr": "0.25", "note": "n/a"}, "MGE18_标题": "FeCr"}}),
        );
        let comp = record.composition(&schema);
        assert_eq!(comp.len(), 2);
        assert_eq!(comp["Cr"], 0.25);
        assert_eq!(record.title(&schema).as_deref(), Some("FeCr"));
    }

    #[test]
    fn test_composition_falls_back_to_top_level() {
        let schema = RecordSchema::default();
        let flat = json!({"成分比重": {"Al": 1.0}});
        assert_eq!(composition_of(&flat, &schema)["Al"], 1.0);
        assert!(composition_of(&json!("opaque"), &schema).is_empty());
    }
}
