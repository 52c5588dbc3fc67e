//! Candidate menu construction
//!
//! Menus are rebuilt from the graph at every step. A branch menu maps each
//! child category to a handful of example names; an instance menu maps each
//! concrete instance to a short description.

use crate::config::{EngineConfig, LayerDirections};
use crate::similarity::Ranked;
use crate::{CandidateEntry, CandidateSet, NodeKind};
use taxograph_store::{Direction, GraphResult, GraphStore, NodeId, NodeRef, PayloadNode};

/// Examples kept per menu entry.
pub const MAX_EXAMPLES: usize = 10;

pub struct CandidateSetBuilder<'a> {
    store: &'a dyn GraphStore,
    config: &'a EngineConfig,
}

impl<'a> CandidateSetBuilder<'a> {
    pub fn new(store: &'a dyn GraphStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Menu of the children of `node_id`.
    ///
    /// Graph errors are logged and yield an empty menu, the same as a node
    /// without children. An error fetching one child's examples only empties
    /// that child's example list.
    pub async fn build(
        &self,
        node_id: &NodeId,
        node_name: &str,
        directions: LayerDirections,
    ) -> CandidateSet {
        let limit = self.config.navigation.neighbor_limit;
        let children = match self.store.neighbors(node_id, directions.children, limit).await {
            Ok(children) => children,
            Err(e) => {
                tracing::error!(node = node_name, error = %e, "failed to query children");
                return CandidateSet::new();
            }
        };

        let mut menu = CandidateSet::new();
        for child in children {
            let Some(name) = child.name.clone() else {
                continue;
            };
            let mut entry = CandidateEntry::new(child.id.clone(), name);
            entry.examples = self.examples_of(&child, directions.examples).await;
            menu.insert(entry);
        }

        tracing::debug!(node = node_name, options = menu.len(), "built branch menu");
        menu
    }

    async fn examples_of(&self, child: &NodeRef, direction: Direction) -> Vec<String> {
        match self
            .store
            .neighbors(&child.id, direction, self.config.navigation.neighbor_limit)
            .await
        {
            Ok(examples) => examples
                .into_iter()
                .filter_map(|e| e.name)
                .take(MAX_EXAMPLES)
                .collect(),
            Err(e) => {
                tracing::error!(child = ?child.name, error = %e, "failed to query examples");
                Vec::new()
            }
        }
    }

    /// Resolve the kind of a node from its labels.
    pub async fn node_kind(&self, node_id: &NodeId) -> GraphResult<NodeKind> {
        let labels = self.store.labels(node_id).await?;
        let is_pool = labels
            .iter()
            .any(|l| self.config.taxonomy.instance_pool_labels.contains(l));
        Ok(if is_pool {
            NodeKind::InstancePool
        } else {
            NodeKind::Branch
        })
    }

    /// Number of concrete instances hanging off `node_id`.
    pub async fn count_instances(&self, node_id: &NodeId) -> GraphResult<usize> {
        self.store
            .count_inbound(node_id, &self.config.taxonomy.instance_label)
            .await
    }

    /// Up to `limit` instances of `node_id`, with their payloads.
    pub async fn instances(&self, node_id: &NodeId, limit: usize) -> GraphResult<Vec<PayloadNode>> {
        let taxonomy = &self.config.taxonomy;
        self.store
            .inbound_with_payload(node_id, &taxonomy.instance_label, &taxonomy.payload_key, limit)
            .await
    }

    /// Concrete realizations of a special node: its instances, or its
    /// outbound children when it has none.
    pub async fn special_listing(&self, node_id: &NodeId) -> GraphResult<Vec<PayloadNode>> {
        let fetch_limit = self.config.navigation.similarity_fetch_limit;
        let instances = self.instances(node_id, fetch_limit).await?;
        if !instances.is_empty() {
            return Ok(instances);
        }

        let children = self
            .store
            .neighbors(node_id, Direction::Outbound, fetch_limit)
            .await?;
        let mut listing = Vec::with_capacity(children.len());
        for child in children {
            let payload = self
                .store
                .property(&child.id, &self.config.taxonomy.payload_key)
                .await?
                .and_then(taxograph_store::decode_payload);
            listing.push(PayloadNode {
                name: child.name,
                id: child.id,
                payload,
            });
        }
        Ok(listing)
    }

    /// Menu of concrete instances, annotated with descriptions.
    ///
    /// A node's `description` property is used when present, otherwise
    /// `"<name> instance"`. Scores are attached when the listing is ranked.
    pub async fn instance_menu(
        &self,
        listing: Vec<(PayloadNode, Option<f64>)>,
    ) -> GraphResult<CandidateSet> {
        let mut menu = CandidateSet::new();
        for (node, score) in listing {
            let Some(name) = node.name else {
                continue;
            };
            let description = self
                .store
                .property(&node.id, &self.config.taxonomy.description_key)
                .await?
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{name} instance"));

            let mut entry = CandidateEntry::new(node.id, name);
            entry.description = Some(description);
            entry.score = score;
            menu.insert(entry);
        }
        Ok(menu)
    }
}

/// Listing without scores, for [`CandidateSetBuilder::instance_menu`].
pub fn unranked(listing: Vec<PayloadNode>) -> Vec<(PayloadNode, Option<f64>)> {
    listing.into_iter().map(|node| (node, None)).collect()
}

/// Ranked listing with scores, for [`CandidateSetBuilder::instance_menu`].
pub fn scored(ranked: Vec<Ranked<PayloadNode>>) -> Vec<(PayloadNode, Option<f64>)> {
    ranked
        .into_iter()
        .map(|r| (r.candidate, Some(r.score)))
        .collect()
}
