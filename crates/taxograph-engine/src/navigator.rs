//! Navigator: drives one record from the taxonomy root to a mount
//!
//! ```text
//!              ┌──────────── chosen child (depth + 1) ───────────┐
//!              ▼                                                  │
//!   ┌─────────────────┐  kind = Branch   ┌────────────┐  menu ok  │
//!   │ resolve kind    │─────────────────►│ AtBranch   │───────────┘
//!   │ (labels)        │                  └─────┬──────┘
//!   └──┬─────────┬────┘                        │ empty menu
//!      │special  │ kind = InstancePool         ▼
//!      │         ▼                          Failed(DeadEnd)
//!      │  ┌───────────────────────────┐
//!      └─►│ AtInstancePool            │ count == 0 ─► Failed(DeadEnd)
//!         │  count >= threshold:      │
//!         │   rank + shortlist top-k  │
//!         └────────────┬──────────────┘
//!                      │ oracle picks, executor mounts
//!                      ▼
//!                   Mounted
//! ```
//!
//! All position data lives in a [`NavigationState`] owned by the loop; a
//! fresh state is created for every record.

use crate::candidates::{scored, unranked, CandidateSetBuilder};
use crate::config::{EngineConfig, TaxonomyConfig};
use crate::error::{DecisionError, NavigationError};
use crate::mount::{MountExecutor, MountTransaction};
use crate::protocol::{DecisionProtocol, Instructions, SelectionEcho};
use crate::similarity::{rank, shortlist};
use crate::special::SpecialNodeRegistry;
use crate::{
    composition_of, CandidateEntry, CandidateSet, ClassificationPath, MaterialRecord, MountOutput,
    NodeKind, TaxonomyNode,
};
use std::sync::Arc;
use taxograph_oracle::{DecisionOracle, ModelInfo};
use taxograph_store::{GraphStore, NodeId, PayloadNode};
use tracing::instrument;

/// Phase of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigatorState {
    AtBranch,
    AtInstancePool { needs_similarity: bool },
    Mounted,
}

/// Mutable navigation data for one record.
#[derive(Debug, Clone)]
pub struct NavigationState {
    pub position: TaxonomyNode,
    pub depth: usize,
    pub path: ClassificationPath,
    pub rounds: usize,
    pub phase: NavigatorState,
}

impl NavigationState {
    pub fn start(taxonomy: &TaxonomyConfig) -> Self {
        Self {
            position: TaxonomyNode {
                id: taxonomy.root_id.clone(),
                name: taxonomy.root_name.clone(),
                kind: NodeKind::Branch,
            },
            depth: 0,
            path: ClassificationPath::starting_at(
                taxonomy.root_name.clone(),
                taxonomy.root_id.clone(),
            ),
            rounds: 0,
            phase: NavigatorState::AtBranch,
        }
    }

    fn advance(&mut self, entry: &CandidateEntry) {
        self.position = TaxonomyNode {
            id: entry.element_id.clone(),
            name: entry.name.clone(),
            kind: NodeKind::Branch,
        };
        self.depth += 1;
        self.path.push(entry.name.clone(), entry.element_id.clone());
    }
}

pub struct Navigator {
    store: Arc<dyn GraphStore>,
    oracle: Arc<dyn DecisionOracle>,
    config: EngineConfig,
    special: SpecialNodeRegistry,
}

impl Navigator {
    pub fn new(store: Arc<dyn GraphStore>, oracle: Arc<dyn DecisionOracle>, config: EngineConfig) -> Self {
        let special = SpecialNodeRegistry::from_config(&config.taxonomy);
        Self {
            store,
            oracle,
            config,
            special,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn model_info(&self) -> ModelInfo {
        self.oracle.model_info()
    }

    fn builder(&self) -> CandidateSetBuilder<'_> {
        CandidateSetBuilder::new(self.store.as_ref(), &self.config)
    }

    fn protocol(&self) -> DecisionProtocol<'_> {
        let nav = &self.config.navigation;
        DecisionProtocol::new(self.oracle.as_ref(), nav.strategy, nav.max_attempts)
    }

    /// Branch menu offered at `node_id` when reached at `depth`.
    pub async fn menu_at(&self, node_id: &NodeId, node_name: &str, depth: usize) -> CandidateSet {
        self.builder()
            .build(node_id, node_name, self.config.taxonomy.directions_at(depth))
            .await
    }

    /// Classify `record` and mount it.
    ///
    /// The outcome is deterministic given the oracle's answers and the order
    /// in which the store enumerates neighbours. Neither is under the
    /// engine's control: the same record may land on a different instance
    /// on another run, and instances with equal similarity scores keep the
    /// store's enumeration order when a pool is shortlisted.
    #[instrument(skip_all, fields(index = record.index, title = tracing::field::Empty))]
    pub async fn navigate(&self, record: &MaterialRecord) -> Result<MountOutput, NavigationError> {
        if let Some(title) = record.title(&self.config.record) {
            tracing::Span::current().record("title", title.as_str());
        }

        let builder = self.builder();
        let protocol = self.protocol();
        let mut state = NavigationState::start(&self.config.taxonomy);

        loop {
            if state.rounds >= self.config.navigation.max_rounds {
                return Err(NavigationError::IterationBudgetExceeded {
                    rounds: state.rounds,
                });
            }
            state.rounds += 1;

            state.position.kind = builder.node_kind(&state.position.id).await?;

            if self.special.is_special(&state.position) {
                tracing::info!(node = %state.position.name, "special node, selecting instance directly");
                let listing = builder.special_listing(&state.position.id).await?;
                let needs_similarity =
                    listing.len() >= self.config.navigation.similarity_threshold;
                return self
                    .select_and_mount(&mut state, record, listing, needs_similarity)
                    .await;
            }

            match state.position.kind {
                NodeKind::Branch => {
                    state.phase = NavigatorState::AtBranch;
                    let menu = self
                        .menu_at(&state.position.id, &state.position.name, state.depth)
                        .await;
                    if menu.is_empty() {
                        return Err(self.dead_end(&state));
                    }

                    let instructions = Instructions::branch(&state.position.name, &menu);
                    let decision = protocol
                        .decide(&menu, record, &instructions, &mut SelectionEcho)
                        .await?;
                    tracing::info!(
                        from = %state.position.name,
                        to = %decision.chosen_label,
                        attempts = decision.attempts,
                        reasoning = decision.reasoning.as_deref().unwrap_or(""),
                        "branch chosen"
                    );
                    state.advance(&decision.entry);
                }
                NodeKind::InstancePool => {
                    let count = builder.count_instances(&state.position.id).await?;
                    if count == 0 {
                        return Err(self.dead_end(&state));
                    }
                    let needs_similarity = count >= self.config.navigation.similarity_threshold;
                    let limit = if needs_similarity {
                        self.config.navigation.similarity_fetch_limit
                    } else {
                        count
                    };
                    let listing = builder.instances(&state.position.id, limit).await?;
                    return self
                        .select_and_mount(&mut state, record, listing, needs_similarity)
                        .await;
                }
            }
        }
    }

    /// Offer the instances in `listing` (shortlisted when large) and mount
    /// the record on the oracle's pick.
    async fn select_and_mount(
        &self,
        state: &mut NavigationState,
        record: &MaterialRecord,
        listing: Vec<PayloadNode>,
        needs_similarity: bool,
    ) -> Result<MountOutput, NavigationError> {
        state.phase = NavigatorState::AtInstancePool { needs_similarity };
        if listing.is_empty() {
            return Err(self.dead_end(state));
        }

        let nav = &self.config.navigation;
        let schema = &self.config.record;
        let listing = if needs_similarity {
            let composition = record.composition(schema);
            let ranked = rank(&composition, listing, |node| {
                node.payload
                    .as_ref()
                    .map(|p| composition_of(p, schema))
                    .unwrap_or_default()
            });
            let top = shortlist(ranked, nav.shortlist_size);
            tracing::info!(
                node = %state.position.name,
                kept = top.len(),
                best = top.first().map(|r| r.score).unwrap_or(0.0),
                "pool shortlisted by composition similarity"
            );
            scored(top)
        } else {
            unranked(listing)
        };

        let menu = self.builder().instance_menu(listing).await?;
        if menu.is_empty() {
            return Err(self.dead_end(state));
        }

        let transaction = MountTransaction::new(self.store.as_ref(), &self.config.mount);
        let mut executor = MountExecutor::new(transaction, record);
        let instructions = Instructions::instance(&state.position.name, &menu);
        let decision = match self
            .protocol()
            .decide(&menu, record, &instructions, &mut executor)
            .await
        {
            Ok(decision) => decision,
            // A failed mount is reported as such, not as a generic executor error.
            Err(DecisionError::ExecutedFunctionFailed(message)) => {
                return Err(match executor.take_failure() {
                    Some(mount_error) => NavigationError::Mount(mount_error),
                    None => DecisionError::ExecutedFunctionFailed(message).into(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mount = executor.take_mounted().ok_or_else(|| {
            DecisionError::ExecutedFunctionFailed("executor finished without a mount".to_string())
        })?;
        state.path.push(decision.entry.name.clone(), decision.entry.element_id.clone());
        state.phase = NavigatorState::Mounted;
        tracing::info!(
            target_node = %mount.target_name,
            attempts = decision.attempts,
            confirmation = decision.confirmation.as_deref().unwrap_or(""),
            "instance chosen"
        );

        let verification = MountTransaction::new(self.store.as_ref(), &self.config.mount);
        match verification.count_mounted(&mount.target_node_id).await {
            Ok(n) => tracing::debug!(target = %mount.target_name, mounted = n, "mount verified"),
            Err(e) => tracing::warn!(error = %e, "could not verify mount"),
        }

        Ok(MountOutput::new(state.path.clone(), &mount, record))
    }

    fn dead_end(&self, state: &NavigationState) -> NavigationError {
        tracing::warn!(
            node = %state.position.name,
            depth = state.depth,
            phase = ?state.phase,
            "dead end"
        );
        NavigationError::DeadEnd {
            node: state.position.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use serde_json::json;
    use taxograph_oracle::ScriptedOracle;
    use taxograph_store::MemoryGraph;

    fn config_for(root: &NodeId) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.taxonomy.root_id = root.clone();
        config.taxonomy.root_name = "Material".to_string();
        config
    }

    fn record() -> MaterialRecord {
        MaterialRecord::new(0, json!({"data": {"成分比重": {"Fe": 1.0}, "MGE18_标题": "pure iron"}}))
    }

    #[tokio::test]
    async fn test_branch_then_pool_mount() {
        let g = Arc::new(MemoryGraph::new());
        let root = g.add_node(&["Category"], "Material");
        let metal = g.add_node(&["Category", "InstancePool"], "Metal");
        g.add_edge(&root, "SUBCLASS", &metal).unwrap();
        let iron = g.add_node(&["Entity"], "Iron");
        g.add_edge(&iron, "INSTANCE_OF", &metal).unwrap();

        let oracle = Arc::new(ScriptedOracle::new());
        oracle
            .push_call("classify_to_subtype", json!({"subtype": "Metal", "reasoning": "Fe"}))
            .push_text("Metal")
            .push_call("select_instance", json!({"instance": "Iron", "reasoning": "Fe"}))
            .push_text("Mounted under Iron");

        let nav = Navigator::new(g.clone(), oracle.clone(), config_for(&root));
        let out = nav.navigate(&record()).await.unwrap();
        assert_eq!(out.classification_path.names(), vec!["Material", "Metal", "Iron"]);
        assert_eq!(out.target_node.element_id, iron);
        assert_eq!(g.edge_count(), 3);
    }

    #[tokio::test]
    async fn test_branch_without_children_is_dead_end() {
        let g = Arc::new(MemoryGraph::new());
        let root = g.add_node(&["Category"], "Material");
        let oracle = Arc::new(ScriptedOracle::new());

        let nav = Navigator::new(g, oracle.clone(), config_for(&root));
        let err = nav.navigate(&record()).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::DeadEnd);
        assert!(oracle.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_root_is_graph_failure() {
        let g = Arc::new(MemoryGraph::new());
        let oracle = Arc::new(ScriptedOracle::new());
        let nav = Navigator::new(g, oracle, config_for(&NodeId::new("mem:77")));
        let err = nav.navigate(&record()).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::GraphQuery);
    }

    #[tokio::test]
    async fn test_iteration_budget() {
        // A cycle of branches never reaches a pool.
        let g = Arc::new(MemoryGraph::new());
        let root = g.add_node(&["Category"], "Material");
        let loop_node = g.add_node(&["Category"], "Loop");
        g.add_edge(&root, "SUBCLASS", &loop_node).unwrap();
        g.add_edge(&loop_node, "SUBCLASS", &root).unwrap();

        let oracle = Arc::new(ScriptedOracle::new());
        for i in 0..4 {
            let choice = if i % 2 == 0 { "Loop" } else { "Material" };
            oracle
                .push_call("classify_to_subtype", json!({"subtype": choice, "reasoning": "?"}))
                .push_text("moved");
        }

        let mut config = config_for(&root);
        config.navigation.max_rounds = 4;
        let nav = Navigator::new(g, oracle, config);
        let err = nav.navigate(&record()).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::IterationBudgetExceeded);
    }

    #[tokio::test]
    async fn test_state_starts_at_root() {
        let mut taxonomy = TaxonomyConfig::default();
        taxonomy.root_id = NodeId::new("4:abc:0");
        taxonomy.root_name = "材料".to_string();
        let state = NavigationState::start(&taxonomy);
        assert_eq!(state.path.names(), vec!["材料"]);
        assert_eq!(state.depth, 0);
        assert_eq!(state.phase, NavigatorState::AtBranch);
    }
}
