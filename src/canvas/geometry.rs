//! Collapse/expand geometry for container nodes.
//!
//! A toggle is committed in two phases. Phase one writes the container's
//! position, size and collapsed flag in one transform update. Phase two runs
//! once the host reports the layout has settled: it re-reads the rendered
//! height, places the block-start/block-end anchors and notifies the renderer.

use egui::{Pos2, Vec2, pos2, vec2};
use log::{debug, trace, warn};

use crate::graph_utils::error::GraphError;
use crate::graph_utils::graph::{
    GraphDocument, NodeId, NodeTransform, SavedLayout, centered_block_positions,
};
use crate::persistence::settings::EditorSettings;

use super::SharedDocument;
use super::host::LayoutHost;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeometrySettings {
    pub collapsed_width: f32,
    /// Used when expanding a container with no saved layout.
    pub default_expanded_size: Vec2,
}

impl From<&EditorSettings> for GeometrySettings {
    fn from(s: &EditorSettings) -> Self {
        Self { collapsed_width: s.collapsed_width, default_expanded_size: s.expanded_size() }
    }
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self::from(&EditorSettings::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum AnchorPlan {
    /// Center the anchors on the collapsed box using the rendered height.
    Collapsed,
    /// Put the anchors back where they were before collapsing.
    Restore { start: Pos2, end: Pos2 },
    /// No saved anchors: center them in a canvas of this outer size.
    Centered { size: Vec2 },
}

/// Second phase of a toggle, applied after the layout settles.
#[must_use = "the block anchors are only placed once the pass is applied"]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingAnchorPass {
    node: NodeId,
    plan: AnchorPlan,
}

impl PendingAnchorPass {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn apply(
        self,
        doc: &mut GraphDocument,
        host: &dyn LayoutHost,
        settings: &GeometrySettings,
    ) {
        let Some(node) = doc.get_node(self.node) else {
            trace!("anchor pass for removed node {} dropped", self.node);
            return;
        };
        let collapsed = node.collapsed;
        let blocks = node.blocks.clone();
        let padding = doc.padding(self.node);

        let anchors = match self.plan {
            AnchorPlan::Collapsed => {
                if !collapsed {
                    debug!(
                        "collapse anchor pass for {} is stale, container expanded again",
                        self.node
                    );
                    return;
                }
                let node = &doc.nodes[&self.node];
                let actual_height = host.rendered_height(self.node).unwrap_or(node.size.y);
                let size = vec2(settings.collapsed_width, actual_height);
                if node.size != size {
                    let position = node.position;
                    // Size must be final before the anchors are derived from it.
                    let transform = NodeTransform { position, size, collapsed: true };
                    if let Err(e) = doc.update_transform(self.node, transform) {
                        warn!("resizing collapsed container {} failed: {}", self.node, e);
                    }
                }
                let canvas_width = settings.collapsed_width - padding.horizontal();
                let port_y = actual_height / 2.0 - padding.top;
                (pos2(0.0, port_y), pos2(canvas_width, port_y))
            }
            AnchorPlan::Restore { start, end } => {
                if collapsed {
                    debug!(
                        "expand anchor pass for {} is stale, container collapsed again",
                        self.node
                    );
                    return;
                }
                (start, end)
            }
            AnchorPlan::Centered { size } => {
                if collapsed {
                    debug!(
                        "expand anchor pass for {} is stale, container collapsed again",
                        self.node
                    );
                    return;
                }
                centered_block_positions(size, padding)
            }
        };

        if let [start, end] = blocks[..] {
            for (block, position) in [(start, anchors.0), (end, anchors.1)] {
                if let Err(e) = doc.set_position(block, position) {
                    warn!("placing block {} of {} failed: {}", block, self.node, e);
                }
            }
        }
        doc.notify_changed(self.node);
        for block in blocks {
            doc.notify_changed(block);
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GeometryEngine {
    settings: GeometrySettings,
}

impl GeometryEngine {
    pub fn new(settings: GeometrySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &GeometrySettings {
        &self.settings
    }

    /// Phase one of a toggle. The returned pass must be applied once the
    /// layout has settled.
    pub fn set_container_expanded(
        &self,
        doc: &mut GraphDocument,
        host: &dyn LayoutHost,
        id: NodeId,
        expanded: bool,
    ) -> Result<PendingAnchorPass, GraphError> {
        let node = doc.get_node(id).ok_or(GraphError::UnknownNode(id))?;
        if !doc.meta(&node.kind).is_container {
            return Err(GraphError::NotAContainer(id));
        }
        let was_collapsed = node.collapsed;
        let position = node.position;
        let current_size = node.size;
        let blocks = node.blocks.clone();
        let shift = doc.padding(id).top_left();

        let plan = if expanded {
            let saved = doc.saved_layout_mut(id).and_then(|slot| slot.take());
            let size = saved
                .map(|s| s.expanded_size)
                .unwrap_or(self.settings.default_expanded_size);
            let position = if was_collapsed { position + shift } else { position };
            doc.update_transform(id, NodeTransform { position, size, collapsed: false })?;
            debug!("expanded {} to {:?} (saved layout: {})", id, size, saved.is_some());
            match saved.and_then(|s| s.block_positions) {
                Some((start, end)) => AnchorPlan::Restore { start, end },
                None => AnchorPlan::Centered { size },
            }
        } else {
            let current_height = host.rendered_height(id).unwrap_or(current_size.y);
            if !was_collapsed {
                let block_positions = match blocks[..] {
                    [start, end] => doc
                        .get_node(start)
                        .zip(doc.get_node(end))
                        .map(|(s, e)| (s.position, e.position)),
                    _ => None,
                };
                if let Some(slot) = doc.saved_layout_mut(id) {
                    // A record from an earlier collapse holds the true expanded geometry.
                    if slot.is_none() {
                        *slot = Some(SavedLayout { expanded_size: current_size, block_positions });
                    }
                }
            }
            let position = if was_collapsed { position } else { position - shift };
            let size = vec2(self.settings.collapsed_width, current_height);
            doc.update_transform(id, NodeTransform { position, size, collapsed: true })?;
            debug!("collapsed {} to {:?}", id, size);
            AnchorPlan::Collapsed
        };

        let interior = doc.descendants(id);
        for line in doc.lines_touching(&interior) {
            let hidden = doc.touches_hidden_node(line);
            doc.set_line_hidden(line, hidden);
        }
        Ok(PendingAnchorPass { node: id, plan })
    }

    /// Full toggle: phase one now, phase two after the host settles.
    pub async fn toggle(
        &self,
        doc: &SharedDocument,
        host: &dyn LayoutHost,
        id: NodeId,
        expanded: bool,
    ) -> Result<(), GraphError> {
        self.toggle_many(doc, host, &[(id, expanded)]).await
    }

    /// Toggle several containers (e.g. nested ones) together: every phase one
    /// completes before any phase two reads rendered heights.
    pub async fn toggle_many(
        &self,
        doc: &SharedDocument,
        host: &dyn LayoutHost,
        toggles: &[(NodeId, bool)],
    ) -> Result<(), GraphError> {
        let mut passes = Vec::with_capacity(toggles.len());
        {
            let mut doc = doc.borrow_mut();
            for &(id, _) in toggles {
                let node = doc.get_node(id).ok_or(GraphError::UnknownNode(id))?;
                if !doc.meta(&node.kind).is_container {
                    return Err(GraphError::NotAContainer(id));
                }
            }
            for &(id, expanded) in toggles {
                passes.push(self.set_container_expanded(&mut doc, host, id, expanded)?);
            }
        }
        host.layout_settled().await;
        let mut doc = doc.borrow_mut();
        for pass in passes {
            pass.apply(&mut doc, host, &self.settings);
        }
        Ok(())
    }
}
