//! CLI configuration: a TOML file plus environment overrides
//!
//! ```toml
//! [graph]
//! uri = "http://localhost:7474"
//! user = "neo4j"
//!
//! [taxonomy]
//! root_id = "4:bf9f3e2f-...:0"
//! root_name = "材料"
//! special_nodes = ["高熵合金"]
//! # Label of leaf categories holding instances. Set it explicitly: the
//! # default "InstancePool" matches nothing in a Class/Entity graph.
//! instance_pool_labels = ["InstancePool"]
//! layers = [
//!     { children = "outbound", examples = "outbound" },
//!     { children = "outbound", examples = "outbound" },
//!     { children = "outbound", examples = "inbound" },
//! ]
//!
//! [navigation]
//! strategy = "execute_and_confirm"
//! ```
//!
//! Secrets never need to live in the file: `NEO4J_PASSWORD` (and
//! `NEO4J_URI` / `NEO4J_USER`) override the `[graph]` section.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taxograph_engine::EngineConfig;
use taxograph_store::Neo4jConfig;

/// File looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "taxograph.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub graph: GraphSection,
    pub records: RecordsSection,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSection {
    /// Neo4j HTTP endpoint.
    pub uri: String,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub timeout_secs: u64,
    /// JSON graph snapshot; when set, an in-memory graph is used instead of Neo4j.
    pub snapshot: Option<PathBuf>,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".to_string(),
            database: "neo4j".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            timeout_secs: 30,
            snapshot: None,
        }
    }
}

impl GraphSection {
    pub fn neo4j(&self) -> Neo4jConfig {
        let mut config = Neo4jConfig::new(&self.uri, &self.user, &self.password);
        config.database = self.database.clone();
        config.timeout_secs = self.timeout_secs;
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsSection {
    /// JSON file holding one record or an array of records.
    pub path: Option<PathBuf>,
    pub results_dir: PathBuf,
    pub result_prefix: String,
}

impl Default for RecordsSection {
    fn default() -> Self {
        Self {
            path: None,
            results_dir: PathBuf::from("results"),
            result_prefix: "mount_result".to_string(),
        }
    }
}

impl CliConfig {
    /// Load `path`, or `taxograph.toml` if present, or defaults; then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(password) = var("NEO4J_PASSWORD") {
            self.graph.password = password;
        }
        if let Some(uri) = var("NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Some(user) = var("NEO4J_USER") {
            self.graph.user = user;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use taxograph_engine::{DecisionStrategy, Direction};

    const SAMPLE: &str = r#"
[graph]
uri = "http://graph:7474"

[records]
path = "data/high_entropy_alloy.json"

[taxonomy]
root_id = "4:abc:0"
root_name = "材料"
special_nodes = ["高熵合金"]
instance_pool_labels = ["LeafClass"]
layers = [
    { children = "outbound", examples = "outbound" },
    { children = "outbound", examples = "inbound" },
]

[navigation]
strategy = "single_shot"
similarity_threshold = 25
"#;

    #[test]
    fn test_parse_sample() {
        let config = CliConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.graph.uri, "http://graph:7474");
        assert_eq!(config.graph.user, "neo4j");
        assert_eq!(config.engine.taxonomy.root_name, "材料");
        assert_eq!(config.engine.taxonomy.special_nodes, vec!["高熵合金"]);
        assert_eq!(config.engine.taxonomy.instance_pool_labels, vec!["LeafClass"]);
        assert_eq!(config.engine.taxonomy.instance_label, "Entity");
        assert_eq!(config.engine.taxonomy.directions_at(5).examples, Direction::Inbound);
        assert_eq!(config.engine.navigation.strategy, DecisionStrategy::SingleShot);
        assert_eq!(config.engine.navigation.similarity_threshold, 25);
        assert_eq!(config.engine.navigation.shortlist_size, 5);
        assert_eq!(config.records.result_prefix, "mount_result");
    }

    #[test]
    fn test_env_overrides_password() {
        let mut config = CliConfig::from_toml(SAMPLE).unwrap();
        config.apply_env(|key| (key == "NEO4J_PASSWORD").then(|| "s3cret".to_string()));
        assert_eq!(config.graph.password, "s3cret");
        let neo4j = config.graph.neo4j();
        assert_eq!(neo4j.password, "s3cret");
        assert_eq!(neo4j.uri, "http://graph:7474");
        assert_eq!(neo4j.database, "neo4j");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = CliConfig::from_file(file.path()).unwrap();
        assert_eq!(config.engine.taxonomy.root_id.as_str(), "4:abc:0");

        assert!(CliConfig::from_file(Path::new("/nonexistent/taxograph.toml")).is_err());
    }
}
