//! Batch runner: sequential processing with per-record failure isolation
//!
//! Records are processed one at a time. A failed record is logged and
//! reported; the batch always continues with the next record. Only a store
//! that cannot be reached before the first record aborts the run.

use crate::error::{BatchError, FailureReason};
use crate::navigator::Navigator;
use crate::{MaterialRecord, MountOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Events
// ============================================================================

/// Progress notifications emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { total: usize },
    RecordStarted { index: usize, title: Option<String> },
    RecordMounted { index: usize, path: String, node: String },
    RecordFailed { index: usize, reason: FailureReason, error: String },
    Finished { success: usize, failed: usize },
}

pub type BatchEventHandler = Box<dyn Fn(BatchEvent) + Send + Sync>;

// ============================================================================
// Report
// ============================================================================

/// Outcome of one record, in result-file form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RecordOutcome {
    Success {
        material_index: usize,
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        output: MountOutput,
    },
    Error {
        material_index: usize,
        timestamp: DateTime<Utc>,
        reason: FailureReason,
        error: String,
        material_data: serde_json::Value,
    },
}

impl RecordOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RecordOutcome::Success { .. })
    }
}

/// Batch summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<RecordOutcome>,
}

impl BatchReport {
    pub fn new(results: Vec<RecordOutcome>) -> Self {
        let success = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            success,
            failed: results.len() - success,
            generated_at: Utc::now(),
            results,
        }
    }

    /// `(index, reason)` of every failed record.
    pub fn failures(&self) -> Vec<(usize, FailureReason)> {
        self.results
            .iter()
            .filter_map(|r| match r {
                RecordOutcome::Error {
                    material_index,
                    reason,
                    ..
                } => Some((*material_index, *reason)),
                RecordOutcome::Success { .. } => None,
            })
            .collect()
    }
}

// ============================================================================
// Runner
// ============================================================================

pub struct BatchRunner {
    navigator: Navigator,
    event_handlers: Vec<BatchEventHandler>,
}

impl BatchRunner {
    pub fn new(navigator: Navigator) -> Self {
        Self {
            navigator,
            event_handlers: Vec::new(),
        }
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    /// Register an event handler
    pub fn on_event(&mut self, handler: BatchEventHandler) {
        self.event_handlers.push(handler);
    }

    fn emit(&self, event: BatchEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Process `records` in order.
    pub async fn run(&self, records: &[MaterialRecord]) -> Result<BatchReport, BatchError> {
        self.navigator
            .store()
            .ping()
            .await
            .map_err(BatchError::StoreUnreachable)?;

        self.emit(BatchEvent::Started {
            total: records.len(),
        });
        let model = self.navigator.model_info();
        tracing::info!(
            total = records.len(),
            model = %model.name,
            tools = model.supports_tools,
            "batch started"
        );

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.run_one(record).await);
        }

        let report = BatchReport::new(results);
        tracing::info!(
            total = report.total,
            success = report.success,
            failed = report.failed,
            "batch finished"
        );
        self.emit(BatchEvent::Finished {
            success: report.success,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Process a single record; never fails.
    pub async fn run_one(&self, record: &MaterialRecord) -> RecordOutcome {
        self.emit(BatchEvent::RecordStarted {
            index: record.index,
            title: record.title(&self.navigator.config().record),
        });

        match self.navigator.navigate(record).await {
            Ok(output) => {
                self.emit(BatchEvent::RecordMounted {
                    index: record.index,
                    path: output.classification_path.to_string(),
                    node: output.mounted_node.name.clone(),
                });
                RecordOutcome::Success {
                    material_index: record.index,
                    timestamp: Utc::now(),
                    output,
                }
            }
            Err(e) => {
                let reason = e.reason();
                tracing::error!(index = record.index, %reason, error = %e, "record failed");
                self.emit(BatchEvent::RecordFailed {
                    index: record.index,
                    reason,
                    error: e.to_string(),
                });
                RecordOutcome::Error {
                    material_index: record.index,
                    timestamp: Utc::now(),
                    reason,
                    error: e.to_string(),
                    material_data: record.payload.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use taxograph_oracle::ScriptedOracle;
    use taxograph_store::MemoryGraph;

    fn runner(graph: Arc<MemoryGraph>, oracle: Arc<ScriptedOracle>) -> BatchRunner {
        let root = graph.add_node(&["Category"], "Material");
        let pool = graph.add_node(&["Category", "InstancePool"], "Metal");
        graph.add_edge(&root, "SUBCLASS", &pool).unwrap();
        let iron = graph.add_node(&["Entity"], "Iron");
        graph.add_edge(&iron, "INSTANCE_OF", &pool).unwrap();

        let mut config = EngineConfig::default();
        config.taxonomy.root_id = root;
        BatchRunner::new(Navigator::new(graph, oracle, config))
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let graph = Arc::new(MemoryGraph::new());
        let oracle = Arc::new(ScriptedOracle::new());
        // record 0: answers off-menu three times; record 1: succeeds
        for _ in 0..3 {
            oracle.push_call("classify_to_subtype", json!({"subtype": "Wood", "reasoning": ""}));
        }
        oracle
            .push_call("classify_to_subtype", json!({"subtype": "Metal", "reasoning": ""}))
            .push_text("ok")
            .push_call("select_instance", json!({"instance": "Iron", "reasoning": ""}))
            .push_text("ok");

        let mut runner = runner(graph, oracle);
        let events = Arc::new(AtomicUsize::new(0));
        let seen = events.clone();
        runner.on_event(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let records = vec![
            MaterialRecord::new(0, json!({"id": "a"})),
            MaterialRecord::new(1, json!({"id": "b"})),
        ];
        let report = runner.run(&records).await.unwrap();
        assert_eq!((report.total, report.success, report.failed), (2, 1, 1));
        assert_eq!(report.failures(), vec![(0, FailureReason::InvalidChoice)]);
        // started, 2 x record started, failed, mounted, finished
        assert_eq!(events.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_unreachable_store_aborts_before_records() {
        let graph = Arc::new(MemoryGraph::new());
        let oracle = Arc::new(ScriptedOracle::new());
        let runner = runner(graph.clone(), oracle.clone());
        graph.set_offline(true);

        let err = runner
            .run(&[MaterialRecord::new(0, json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::StoreUnreachable(_)));
        assert!(oracle.requests().is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = RecordOutcome::Error {
            material_index: 4,
            timestamp: Utc::now(),
            reason: FailureReason::DeadEnd,
            error: "dead end".to_string(),
            material_data: json!({"id": "x"}),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["reason"], "dead_end");
        assert_eq!(value["material_data"]["id"], "x");

        let report = BatchReport::new(vec![outcome]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["failed"], 1);
    }
}
