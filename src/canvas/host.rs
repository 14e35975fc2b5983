use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use egui::Pos2;

use crate::graph_utils::graph::NodeId;
use crate::graph_utils::registry::NodeKind;
use crate::persistence::settings::EditorSettings;

/// What the user picked in the node-type prompt.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeChoice {
    pub kind: NodeKind,
    pub data: serde_json::Value,
}

impl NodeChoice {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: NodeKind::new(kind), data: serde_json::Value::Null }
    }
}

/// The node-type picker. `None` means the user dismissed it.
#[async_trait(?Send)]
pub trait NodePrompt {
    async fn prompt_for_node_type(
        &self,
        position: Pos2,
        container: Option<NodeId>,
    ) -> Option<NodeChoice>;
}

/// The rendering layer as seen by the engine.
#[async_trait(?Send)]
pub trait LayoutHost {
    /// Height the node actually rendered at, when it has been laid out.
    fn rendered_height(&self, node: NodeId) -> Option<f32>;

    /// Resolves once a freshly created node has been laid out and its ports
    /// can be anchored.
    async fn first_layout(&self, node: NodeId);

    /// Resolves once the layout pass triggered by a container geometry write
    /// has completed.
    async fn layout_settled(&self);
}

/// Host without layout signals: waits a fixed delay for each of them, and
/// reports heights pushed to it by whoever measures nodes.
#[derive(Debug, Default)]
pub struct TickLayoutHost {
    wiring_tick: Duration,
    anchor_pass_delay: Duration,
    heights: RefCell<HashMap<NodeId, f32>>,
}

impl TickLayoutHost {
    pub fn new(wiring_tick: Duration, anchor_pass_delay: Duration) -> Self {
        Self { wiring_tick, anchor_pass_delay, heights: RefCell::new(HashMap::new()) }
    }

    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self::new(settings.wiring_tick(), settings.anchor_pass_delay())
    }

    pub fn set_rendered_height(&self, node: NodeId, height: f32) {
        self.heights.borrow_mut().insert(node, height);
    }

    pub fn forget(&self, node: NodeId) {
        self.heights.borrow_mut().remove(&node);
    }
}

#[async_trait(?Send)]
impl LayoutHost for TickLayoutHost {
    fn rendered_height(&self, node: NodeId) -> Option<f32> {
        self.heights.borrow().get(&node).copied()
    }

    async fn first_layout(&self, _node: NodeId) {
        tokio::time::sleep(self.wiring_tick).await;
    }

    async fn layout_settled(&self) {
        tokio::time::sleep(self.anchor_pass_delay).await;
    }
}
