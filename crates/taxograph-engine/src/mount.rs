//! Mount transaction: attach a record node under a chosen instance
//!
//! One store call creates the record node and its single edge to the
//! target. Names carry a v4 UUID, so repeated mounts of the same record
//! always create distinct nodes.

use crate::config::MountConfig;
use crate::error::MountError;
use crate::protocol::StepExecutor;
use crate::{CandidateEntry, MaterialRecord, MountRecord};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use taxograph_store::{AttachRequest, GraphStore, NodeId};
use uuid::Uuid;

pub struct MountTransaction<'a> {
    store: &'a dyn GraphStore,
    config: &'a MountConfig,
}

impl<'a> MountTransaction<'a> {
    pub fn new(store: &'a dyn GraphStore, config: &'a MountConfig) -> Self {
        Self { store, config }
    }

    /// Generated node name: `<prefix>_<32 hex digits>`.
    pub fn generate_name(&self) -> String {
        format!("{}_{}", self.config.name_prefix, Uuid::new_v4().simple())
    }

    /// Create the record node and its edge to `target_id`.
    ///
    /// Not idempotent: every call creates a new node.
    pub async fn mount(
        &self,
        target_id: &NodeId,
        target_name: &str,
        record: &MaterialRecord,
    ) -> Result<MountRecord, MountError> {
        let name = self.generate_name();
        let mounted_at = Utc::now();
        let payload = serde_json::to_string(&record.payload)?;

        let properties = BTreeMap::from([
            ("name".to_string(), json!(name)),
            (
                "mounted_at".to_string(),
                json!(mounted_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            ),
            ("data".to_string(), json!(payload)),
        ]);

        let attached = self
            .store
            .create_attached(AttachRequest {
                label: self.config.label.clone(),
                properties,
                rel_type: self.config.rel_type.clone(),
                target: target_id.clone(),
            })
            .await?;

        tracing::info!(node = %name, target = target_name, "mounted record");

        Ok(MountRecord {
            new_node_id: attached.id,
            new_node_name: name,
            mounted_at,
            target_node_id: target_id.clone(),
            target_name: attached.target_name.unwrap_or_else(|| target_name.to_string()),
            payload,
        })
    }

    /// Number of records mounted under `target_id`.
    pub async fn count_mounted(&self, target_id: &NodeId) -> Result<usize, MountError> {
        Ok(self.store.count_inbound(target_id, &self.config.label).await?)
    }
}

/// Executor that mounts the record on the chosen entry.
pub struct MountExecutor<'a> {
    transaction: MountTransaction<'a>,
    record: &'a MaterialRecord,
    mounted: Option<MountRecord>,
    failure: Option<MountError>,
}

impl<'a> MountExecutor<'a> {
    pub fn new(transaction: MountTransaction<'a>, record: &'a MaterialRecord) -> Self {
        Self {
            transaction,
            record,
            mounted: None,
            failure: None,
        }
    }

    pub fn take_mounted(&mut self) -> Option<MountRecord> {
        self.mounted.take()
    }

    /// The transaction error behind a failed execution, if any.
    pub fn take_failure(&mut self) -> Option<MountError> {
        self.failure.take()
    }
}

#[async_trait]
impl StepExecutor for MountExecutor<'_> {
    async fn execute(&mut self, _label: &str, entry: &CandidateEntry) -> Result<Value, String> {
        let mount = match self
            .transaction
            .mount(&entry.element_id, &entry.name, self.record)
            .await
        {
            Ok(mount) => mount,
            Err(e) => {
                let message = e.to_string();
                self.failure = Some(e);
                return Err(message);
            }
        };

        let result = json!({
            "success": true,
            "mounted_node": mount.new_node_name,
            "element_id": mount.new_node_id,
            "target": mount.target_name,
        });
        self.mounted = Some(mount);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxograph_store::MemoryGraph;

    fn setup() -> (MemoryGraph, NodeId) {
        let g = MemoryGraph::new();
        let target = g.add_node(&["Entity"], "Y");
        (g, target)
    }

    #[tokio::test]
    async fn test_mount_creates_node_and_edge() {
        let (g, target) = setup();
        let config = MountConfig::default();
        let tx = MountTransaction::new(&g, &config);
        let record = MaterialRecord::new(3, json!({"data": {"成分比重": {"Fe": 1.0}}}));

        let mount = tx.mount(&target, "Y", &record).await.unwrap();
        assert!(mount.new_node_name.starts_with("Material_"));
        assert_eq!(mount.new_node_name.len(), "Material_".len() + 32);
        assert_eq!(mount.target_name, "Y");
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.outgoing_rel_types(&mount.new_node_id), vec!["BELONGS_TO"]);

        let stored = g.property(&mount.new_node_id, "data").await.unwrap().unwrap();
        assert_eq!(stored, json!(mount.payload));
        assert_eq!(tx.count_mounted(&target).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_double_mount_is_distinct() {
        let (g, target) = setup();
        let config = MountConfig::default();
        let tx = MountTransaction::new(&g, &config);
        let record = MaterialRecord::new(0, json!({"k": 1}));

        let a = tx.mount(&target, "Y", &record).await.unwrap();
        let b = tx.mount(&target, "Y", &record).await.unwrap();
        assert_ne!(a.new_node_id, b.new_node_id);
        assert_ne!(a.new_node_name, b.new_node_name);
        assert_eq!(tx.count_mounted(&target).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_target_leaves_no_node() {
        let (g, _) = setup();
        let config = MountConfig::default();
        let tx = MountTransaction::new(&g, &config);
        let record = MaterialRecord::new(0, json!({}));

        let err = tx
            .mount(&NodeId::new("mem:404"), "ghost", &record)
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::TargetNotFound(_)));
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_executor_keeps_mount_record() {
        let (g, target) = setup();
        let config = MountConfig::default();
        let record = MaterialRecord::new(0, json!({}));
        let mut executor = MountExecutor::new(MountTransaction::new(&g, &config), &record);

        let entry = CandidateEntry::new(target.clone(), "Y");
        let result = executor.execute("Y", &entry).await.unwrap();
        assert_eq!(result["success"], true);
        let mount = executor.take_mounted().unwrap();
        assert_eq!(mount.target_node_id, target);
        assert!(executor.take_mounted().is_none());
    }

    #[tokio::test]
    async fn test_executor_keeps_transaction_error() {
        let (g, _) = setup();
        let config = MountConfig::default();
        let record = MaterialRecord::new(0, json!({}));
        let mut executor = MountExecutor::new(MountTransaction::new(&g, &config), &record);

        let entry = CandidateEntry::new(NodeId::new("mem:404"), "ghost");
        assert!(executor.execute("ghost", &entry).await.is_err());
        assert!(matches!(executor.take_failure(), Some(MountError::TargetNotFound(_))));
    }
}
