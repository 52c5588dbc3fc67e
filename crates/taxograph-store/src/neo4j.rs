//! Neo4j over the HTTP transactional Cypher endpoint
//!
//! Every operation is one auto-commit transaction
//! (`POST {uri}/db/{database}/tx/commit`), so the mount write (node + edge in
//! a single statement) is atomic on the server side.

use crate::{
    decode_payload, AttachRequest, AttachedNode, Direction, GraphError, GraphResult, GraphStore,
    NodeId, NodeRef, PayloadNode,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    /// HTTP base URL, e.g. `http://localhost:7474`.
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_database() -> String {
    "neo4j".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Neo4jConfig {
    pub fn new(uri: &str, user: &str, password: &str) -> Self {
        Self {
            uri: uri.trim_end_matches('/').to_string(),
            database: default_database(),
            user: user.to_string(),
            password: password.to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.uri.trim_end_matches('/'),
            self.database
        )
    }
}

// ============================================================================
// Cypher helpers
// ============================================================================

/// Quote a label or relationship type as a Cypher identifier.
fn ident(raw: &str) -> String {
    format!("`{}`", raw.replace('`', "``"))
}

fn neighbors_query(direction: Direction) -> &'static str {
    match direction {
        Direction::Outbound => {
            "MATCH (a)-[]->(b) WHERE elementId(a) = $id \
             RETURN b.name AS name, elementId(b) AS id LIMIT $limit"
        }
        Direction::Inbound => {
            "MATCH (a)<-[]-(b) WHERE elementId(a) = $id \
             RETURN b.name AS name, elementId(b) AS id LIMIT $limit"
        }
        Direction::Undirected => {
            "MATCH (a)-[]-(b) WHERE elementId(a) = $id \
             RETURN b.name AS name, elementId(b) AS id LIMIT $limit"
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

fn string_at(row: &[Value], idx: usize) -> Option<String> {
    row.get(idx).and_then(|v| v.as_str()).map(str::to_string)
}

fn node_ref(row: &[Value]) -> GraphResult<NodeRef> {
    let id = string_at(row, 1)
        .ok_or_else(|| GraphError::InvalidResponse("row without elementId".to_string()))?;
    Ok(NodeRef {
        name: string_at(row, 0),
        id: NodeId::new(id),
    })
}

// ============================================================================
// Store
// ============================================================================

pub struct Neo4jHttpStore {
    client: Client,
    config: Neo4jConfig,
}

impl Neo4jHttpStore {
    pub fn new(config: Neo4jConfig) -> GraphResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GraphError::Unreachable(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &Neo4jConfig {
        &self.config
    }

    /// Run one statement in its own transaction and return its rows.
    async fn run(&self, statement: &str, parameters: Value) -> GraphResult<Vec<Vec<Value>>> {
        tracing::debug!(statement, "neo4j query");
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });

        let response = self
            .client
            .post(self.config.commit_url())
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GraphError::Query(format!("HTTP {status}: {error_text}")));
        }

        let data: CommitResponse = response
            .json()
            .await
            .map_err(|e| GraphError::InvalidResponse(e.to_string()))?;

        if let Some(err) = data.errors.first() {
            return Err(GraphError::Query(format!("{}: {}", err.code, err.message)));
        }

        Ok(data
            .results
            .into_iter()
            .next()
            .map(|r| r.data.into_iter().map(|row| row.row).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl GraphStore for Neo4jHttpStore {
    async fn neighbors(
        &self,
        node: &NodeId,
        direction: Direction,
        limit: usize,
    ) -> GraphResult<Vec<NodeRef>> {
        let rows = self
            .run(
                neighbors_query(direction),
                json!({ "id": node.as_str(), "limit": limit }),
            )
            .await?;
        rows.iter().map(|r| node_ref(r)).collect()
    }

    async fn labels(&self, node: &NodeId) -> GraphResult<Vec<String>> {
        let rows = self
            .run(
                "MATCH (a) WHERE elementId(a) = $id RETURN labels(a)",
                json!({ "id": node.as_str() }),
            )
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| GraphError::NodeNotFound(node.clone()))?;
        Ok(row
            .first()
            .and_then(|v| v.as_array())
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn property(&self, node: &NodeId, key: &str) -> GraphResult<Option<Value>> {
        let rows = self
            .run(
                "MATCH (a) WHERE elementId(a) = $id RETURN a[$key]",
                json!({ "id": node.as_str(), "key": key }),
            )
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| GraphError::NodeNotFound(node.clone()))?;
        Ok(row.first().cloned().filter(|v| !v.is_null()))
    }

    async fn count_inbound(&self, node: &NodeId, source_label: &str) -> GraphResult<usize> {
        let statement = format!(
            "MATCH (a)<-[]-(b:{}) WHERE elementId(a) = $id RETURN count(b)",
            ident(source_label)
        );
        let rows = self.run(&statement, json!({ "id": node.as_str() })).await?;
        rows.first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .ok_or_else(|| GraphError::InvalidResponse("count returned no row".to_string()))
    }

    async fn inbound_with_payload(
        &self,
        node: &NodeId,
        source_label: &str,
        payload_key: &str,
        limit: usize,
    ) -> GraphResult<Vec<PayloadNode>> {
        let statement = format!(
            "MATCH (a)<-[]-(b:{}) WHERE elementId(a) = $id \
             RETURN b.name AS name, elementId(b) AS id, b[$key] AS payload LIMIT $limit",
            ident(source_label)
        );
        let rows = self
            .run(
                &statement,
                json!({ "id": node.as_str(), "key": payload_key, "limit": limit }),
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                let head = node_ref(&row)?;
                Ok(PayloadNode {
                    name: head.name,
                    id: head.id,
                    payload: row.get(2).cloned().and_then(decode_payload),
                })
            })
            .collect()
    }

    async fn create_attached(&self, request: AttachRequest) -> GraphResult<AttachedNode> {
        // MATCH + CREATE in one statement: no target, no row, nothing created.
        let statement = format!(
            "MATCH (target) WHERE elementId(target) = $target_id \
             CREATE (n:{label}) SET n = $props \
             CREATE (n)-[:{rel}]->(target) \
             RETURN elementId(n) AS id, target.name AS target_name",
            label = ident(&request.label),
            rel = ident(&request.rel_type),
        );
        let rows = self
            .run(
                &statement,
                json!({ "target_id": request.target.as_str(), "props": request.properties }),
            )
            .await?;
        let row = rows.first().ok_or(GraphError::NoRowReturned)?;
        let id = string_at(row, 0).ok_or(GraphError::NoRowReturned)?;
        Ok(AttachedNode {
            id: NodeId::new(id),
            target_name: string_at(row, 1),
        })
    }

    async fn ping(&self) -> GraphResult<()> {
        let rows = self.run("RETURN 1", json!({})).await?;
        if rows.is_empty() {
            return Err(GraphError::Unreachable("ping returned no row".to_string()));
        }
        Ok(())
    }
}
