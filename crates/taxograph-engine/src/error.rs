//! Failure taxonomy
//!
//! Every per-record failure maps onto one [`FailureReason`]. Only
//! [`BatchError`] aborts a whole run.

use serde::{Deserialize, Serialize};
use taxograph_oracle::OracleError;
use taxograph_store::{GraphError, NodeId};

/// Classification of a failed record, as reported in the batch summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    GraphQuery,
    OracleUnavailable,
    NoChoice,
    InvalidChoice,
    ExecutedFunctionFailed,
    DeadEnd,
    IterationBudgetExceeded,
    MountTransactionFailed,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::GraphQuery => "graph_query",
            FailureReason::OracleUnavailable => "oracle_unavailable",
            FailureReason::NoChoice => "no_choice",
            FailureReason::InvalidChoice => "invalid_choice",
            FailureReason::ExecutedFunctionFailed => "executed_function_failed",
            FailureReason::DeadEnd => "dead_end",
            FailureReason::IterationBudgetExceeded => "iteration_budget_exceeded",
            FailureReason::MountTransactionFailed => "mount_transaction_failed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("decision oracle unavailable: {0}")]
    OracleUnavailable(#[from] OracleError),

    #[error("oracle returned no choice: {0}")]
    NoChoice(String),

    #[error("oracle chose '{last}' outside the menu after {attempts} attempt(s)")]
    InvalidChoice { attempts: usize, last: String },

    #[error("executed function failed: {0}")]
    ExecutedFunctionFailed(String),

    #[error("empty menu offered to the oracle")]
    EmptyMenu,
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("mount target {0} not found")]
    TargetNotFound(NodeId),

    #[error("mount transaction failed: {0}")]
    Store(GraphError),

    #[error("record payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<GraphError> for MountError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::NodeNotFound(id) => MountError::TargetNotFound(id),
            other => MountError::Store(other),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("graph query failed: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error("dead end at '{node}': neither sub-category nor concrete instance available")]
    DeadEnd { node: String },

    #[error("navigation exceeded {rounds} rounds")]
    IterationBudgetExceeded { rounds: usize },

    #[error(transparent)]
    Mount(#[from] MountError),
}

impl NavigationError {
    pub fn reason(&self) -> FailureReason {
        match self {
            NavigationError::Graph(_) => FailureReason::GraphQuery,
            NavigationError::Decision(d) => match d {
                DecisionError::OracleUnavailable(_) => FailureReason::OracleUnavailable,
                DecisionError::NoChoice(_) => FailureReason::NoChoice,
                DecisionError::InvalidChoice { .. } => FailureReason::InvalidChoice,
                DecisionError::ExecutedFunctionFailed(_) => FailureReason::ExecutedFunctionFailed,
                DecisionError::EmptyMenu => FailureReason::DeadEnd,
            },
            NavigationError::DeadEnd { .. } => FailureReason::DeadEnd,
            NavigationError::IterationBudgetExceeded { .. } => {
                FailureReason::IterationBudgetExceeded
            }
            NavigationError::Mount(_) => FailureReason::MountTransactionFailed,
        }
    }
}

/// Errors that stop a batch before any record is processed.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("graph store unreachable: {0}")]
    StoreUnreachable(GraphError),
}
