use serde::{Deserialize, Serialize};

use crate::graph_utils::graph::NodeId;

/// Progress update published while a workflow runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(default)]
    pub run_id: Option<String>,
    pub status: RunStatus,
    #[serde(default, alias = "currentNode", alias = "current_node_id")]
    pub current_node: Option<NodeId>,
}

impl ExecutionEvent {
    pub fn running(node: NodeId) -> Self {
        Self { run_id: None, status: RunStatus::Running, current_node: Some(node) }
    }

    pub fn status(status: RunStatus) -> Self {
        Self { run_id: None, status, current_node: None }
    }

    pub fn in_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Breakpoint,
    Completed,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
    #[serde(other)]
    Other,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Canceled)
    }

    /// Statuses that stop on a node and show it right away.
    pub fn is_halt(&self) -> bool {
        matches!(self, RunStatus::Paused | RunStatus::Breakpoint)
    }
}
