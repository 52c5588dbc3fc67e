//! Engine configuration
//!
//! Every section deserializes with defaults so a configuration file only
//! needs to name the taxonomy root.

use serde::{Deserialize, Serialize};
use taxograph_store::{Direction, NodeId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub taxonomy: TaxonomyConfig,
    pub navigation: NavigationConfig,
    pub mount: MountConfig,
    pub record: RecordSchema,
}

// ============================================================================
// Taxonomy Shape
// ============================================================================

/// Edge orientations used at one navigation depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerDirections {
    /// Orientation enumerating the children of the current node.
    pub children: Direction,
    /// Orientation enumerating the examples of each child.
    pub examples: Direction,
}

impl LayerDirections {
    pub fn new(children: Direction, examples: Direction) -> Self {
        Self { children, examples }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    pub root_id: NodeId,
    pub root_name: String,
    /// Per-depth directions. Depths past the end reuse the last entry.
    pub layers: Vec<LayerDirections>,
    /// Names of nodes resolved by instance selection instead of branching.
    pub special_nodes: Vec<String>,
    /// Label carried by concrete instance nodes.
    pub instance_label: String,
    /// Labels marking a node as an instance pool.
    ///
    /// The default `InstancePool` is a placeholder. Graphs that only use
    /// `Class`/`Entity` labels carry no such marker, so every category is
    /// treated as a branch unless this is set to a label the graph really
    /// uses on its leaf categories.
    pub instance_pool_labels: Vec<String>,
    /// Instance property holding the serialized payload.
    pub payload_key: String,
    /// Instance property used as a menu description.
    pub description_key: String,
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            root_id: NodeId::new(""),
            root_name: "Material".to_string(),
            layers: Vec::new(),
            special_nodes: Vec::new(),
            instance_label: "Entity".to_string(),
            instance_pool_labels: vec!["InstancePool".to_string()],
            payload_key: "data".to_string(),
            description_key: "description".to_string(),
        }
    }
}

impl TaxonomyConfig {
    pub fn directions_at(&self, depth: usize) -> LayerDirections {
        self.layers
            .get(depth)
            .or_else(|| self.layers.last())
            .copied()
            .unwrap_or_default()
    }
}

// ============================================================================
// Navigation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    /// One constrained request, trusted iff the answer is on the menu.
    SingleShot,
    /// Propose, validate with correction retries, execute, confirm.
    #[default]
    ExecuteAndConfirm,
}

impl std::str::FromStr for DecisionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "single_shot" | "single" => Ok(Self::SingleShot),
            "execute_and_confirm" | "confirm" => Ok(Self::ExecuteAndConfirm),
            other => Err(format!("unknown decision strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub strategy: DecisionStrategy,
    /// Cap on neighbours per query (children and examples alike).
    pub neighbor_limit: usize,
    /// Pools at or above this size are shortlisted by similarity.
    pub similarity_threshold: usize,
    pub similarity_fetch_limit: usize,
    pub shortlist_size: usize,
    /// Oracle proposals per decision step, rejected ones included.
    pub max_attempts: usize,
    pub max_rounds: usize,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            strategy: DecisionStrategy::default(),
            neighbor_limit: 10,
            similarity_threshold: 20,
            similarity_fetch_limit: 100,
            shortlist_size: 5,
            max_attempts: 3,
            max_rounds: 20,
        }
    }
}

// ============================================================================
// Mount + Record Shape
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub label: String,
    pub rel_type: String,
    pub name_prefix: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            label: "Material".to_string(),
            rel_type: "BELONGS_TO".to_string(),
            name_prefix: "Material".to_string(),
        }
    }
}

/// Where the engine finds the fields it reads in a record payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSchema {
    pub composition_path: String,
    pub title_path: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            composition_path: "data.成分比重".to_string(),
            title_path: "data.MGE18_标题".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.navigation.similarity_threshold, 20);
        assert_eq!(config.navigation.shortlist_size, 5);
        assert_eq!(config.navigation.max_attempts, 3);
        assert_eq!(config.navigation.strategy, DecisionStrategy::ExecuteAndConfirm);
        assert_eq!(config.mount.rel_type, "BELONGS_TO");
        assert_eq!(config.taxonomy.instance_label, "Entity");
    }

    #[test]
    fn test_directions_reuse_last_layer() {
        let mut taxonomy = TaxonomyConfig::default();
        assert_eq!(taxonomy.directions_at(3), LayerDirections::default());

        taxonomy.layers = vec![
            LayerDirections::default(),
            LayerDirections::new(Direction::Outbound, Direction::Inbound),
        ];
        assert_eq!(taxonomy.directions_at(0).examples, Direction::Outbound);
        assert_eq!(taxonomy.directions_at(1).examples, Direction::Inbound);
        assert_eq!(taxonomy.directions_at(7).examples, Direction::Inbound);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"taxonomy": {"root_id": "4:x:0", "root_name": "材料"},
                "navigation": {"strategy": "single_shot"}}"#,
        )
        .unwrap();
        assert_eq!(config.taxonomy.root_id.as_str(), "4:x:0");
        assert_eq!(config.navigation.strategy, DecisionStrategy::SingleShot);
        assert_eq!(config.navigation.max_rounds, 20);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("single-shot".parse::<DecisionStrategy>(), Ok(DecisionStrategy::SingleShot));
        assert!("random".parse::<DecisionStrategy>().is_err());
    }
}
