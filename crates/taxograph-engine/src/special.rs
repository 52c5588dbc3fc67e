//! Registry of special nodes
//!
//! A special node is a branch whose children do not form a clean choice; it
//! is resolved by picking a concrete instance directly. The registry is the
//! only place that decides whether a node is special.

use crate::config::TaxonomyConfig;
use crate::TaxonomyNode;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct SpecialNodeRegistry {
    names: BTreeSet<String>,
}

impl SpecialNodeRegistry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &TaxonomyConfig) -> Self {
        Self::new(config.special_nodes.iter().cloned())
    }

    pub fn is_special(&self, node: &TaxonomyNode) -> bool {
        self.names.contains(node.name.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeKind;

    #[test]
    fn test_is_special_by_configured_name() {
        let mut config = TaxonomyConfig::default();
        config.special_nodes = vec!["高熵合金".to_string()];
        let registry = SpecialNodeRegistry::from_config(&config);

        let node = |name: &str| TaxonomyNode {
            id: "x".into(),
            name: name.to_string(),
            kind: NodeKind::Branch,
        };
        assert!(registry.is_special(&node("高熵合金")));
        assert!(!registry.is_special(&node("金属材料")));
        assert!(registry.is_special(&node(" 高熵合金 ")));
    }
}
