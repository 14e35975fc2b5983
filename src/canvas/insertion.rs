//! Gesture-driven node insertion.
//!
//! Clicking an output port, releasing a dragged line over empty canvas,
//! clicking the add button on a line and the canvas context menu all end up
//! in [`InsertionPipeline::insert_node_on_edge`], parameterized by an
//! [`EdgeContext`].

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use egui::{Pos2, Rect, vec2};
use log::{debug, info, warn};
use thiserror::Error;

use crate::graph_utils::error::GraphError;
use crate::graph_utils::graph::{GraphDocument, LineId, NodeId, PortDirection, PortId};
use crate::graph_utils::registry::NodeKind;
use crate::persistence::settings::EditorSettings;

use super::SharedDocument;
use super::host::{LayoutHost, NodePrompt};
use super::viewport::Viewport;

// Upper bound on anti-overlap nudges for one placement
const MAX_NUDGES: usize = 64;

/// Which edge, if any, the new node is inserted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeContext {
    /// Canvas context menu: the node is placed but not wired.
    None,
    /// Click on an output port.
    FromPort(PortId),
    /// Provisional line released over empty canvas.
    DraggedLine(LineId),
    /// Add button at the midpoint of a committed line.
    ExistingLine(LineId),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InsertRequest {
    pub context: EdgeContext,
    /// Gesture location in canvas coordinates.
    pub position: Pos2,
    pub container_hint: Option<NodeId>,
}

impl InsertRequest {
    pub fn new(context: EdgeContext, position: Pos2) -> Self {
        Self { context, position, container_hint: None }
    }

    pub fn from_screen(context: EdgeContext, screen: Pos2, viewport: &Viewport) -> Self {
        Self::new(context, viewport.to_canvas(screen))
    }

    pub fn with_container(mut self, container: NodeId) -> Self {
        self.container_hint = Some(container);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKey {
    Port(PortId),
    Line(LineId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InsertAbort {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("another insertion is in progress on {0:?}")]
    EdgeBusy(EdgeKey),

    #[error("a '{0}' node has no port to wire on this edge")]
    MissingPort(NodeKind),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    Inserted {
        node: NodeId,
        lines: Vec<LineId>,
        replaced: Option<LineId>,
    },
    /// The user dismissed the node-type prompt.
    Canceled,
    /// The gesture does not call for an insertion.
    NoOp,
    Aborted { reason: InsertAbort },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InsertionSettings {
    /// Horizontal distance between an output port and a node created from it.
    pub gap: f32,
    /// Fixed downward offset applied while the new node overlaps a sibling.
    pub anti_overlap_step: f32,
    /// Rightward shift of the downstream side of a split line.
    pub downstream_offset: f32,
}

impl From<&EditorSettings> for InsertionSettings {
    fn from(s: &EditorSettings) -> Self {
        Self {
            gap: s.insertion_gap,
            anti_overlap_step: s.anti_overlap_step,
            downstream_offset: s.insertion_offset,
        }
    }
}

impl Default for InsertionSettings {
    fn default() -> Self {
        Self::from(&EditorSettings::default())
    }
}

/// Token-based locks on edges, held for the duration of one insertion.
#[derive(Clone, Debug, Default)]
pub struct EdgeLocks {
    held: Rc<RefCell<HashSet<EdgeKey>>>,
}

impl EdgeLocks {
    pub fn try_acquire(&self, key: EdgeKey) -> Option<EdgeLockGuard> {
        if self.held.borrow_mut().insert(key) {
            Some(EdgeLockGuard { key, held: Rc::clone(&self.held) })
        } else {
            None
        }
    }

    pub fn is_held(&self, key: EdgeKey) -> bool {
        self.held.borrow().contains(&key)
    }
}

#[derive(Debug)]
pub struct EdgeLockGuard {
    key: EdgeKey,
    held: Rc<RefCell<HashSet<EdgeKey>>>,
}

impl Drop for EdgeLockGuard {
    fn drop(&mut self) {
        self.held.borrow_mut().remove(&self.key);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Placement {
    /// To the right of an output port anchor.
    RightOf(Pos2),
    /// Input side under the released drag point.
    DropPoint(Pos2),
    /// On the line between two port anchors, once the target side has moved
    /// right by the downstream offset. Block anchors never move.
    Between { from: Pos2, to: Pos2, target_moves: bool },
    /// Top-left at the gesture point.
    At(Pos2),
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct EdgePlan {
    source: Option<PortId>,
    target: Option<PortId>,
    superseded: Option<LineId>,
    placement: Placement,
    key: Option<EdgeKey>,
    /// Container of the source node, for insertions rooted on an existing node.
    source_container: Option<Option<NodeId>>,
}

fn source_port(doc: &GraphDocument, port: PortId) -> Result<PortId, InsertAbort> {
    match doc.get_port(port) {
        Some(p) if doc.get_node(p.node).is_some() => {
            if p.direction == PortDirection::Source {
                Ok(port)
            } else {
                let reason = "insertion starts from an output port";
                Err(GraphError::InvalidConnection { from: port, to: port, reason }.into())
            }
        }
        _ => Err(GraphError::DanglingPort(port).into()),
    }
}

fn parent_of_port(doc: &GraphDocument, port: PortId) -> Option<NodeId> {
    doc.get_port(port).and_then(|p| doc.get_node(p.node)).and_then(|n| n.parent)
}

fn live_anchor(doc: &GraphDocument, port: PortId) -> Result<Pos2, InsertAbort> {
    doc.port_anchor(port).ok_or_else(|| GraphError::DanglingPort(port).into())
}

/// Dispatch the edge context once into the ports to wire and the line to replace.
fn resolve_edge(
    doc: &GraphDocument,
    request: &InsertRequest,
) -> Result<Option<EdgePlan>, InsertAbort> {
    let plan = match request.context {
        EdgeContext::None => EdgePlan {
            source: None,
            target: None,
            superseded: None,
            placement: Placement::At(request.position),
            key: None,
            source_container: None,
        },
        EdgeContext::FromPort(port) => {
            let source = source_port(doc, port)?;
            EdgePlan {
                source: Some(source),
                target: None,
                superseded: None,
                placement: Placement::RightOf(live_anchor(doc, source)?),
                key: Some(EdgeKey::Port(source)),
                source_container: Some(parent_of_port(doc, source)),
            }
        }
        EdgeContext::DraggedLine(line_id) => {
            let line = doc.get_line(line_id).ok_or(GraphError::UnknownLine(line_id))?;
            // The drag ended on a port: the line is wired already.
            if line.to_port.is_some() {
                return Ok(None);
            }
            let Some(from) = line.from_port else {
                return Ok(None);
            };
            EdgePlan {
                source: Some(source_port(doc, from)?),
                target: None,
                superseded: Some(line_id),
                placement: Placement::DropPoint(request.position),
                key: Some(EdgeKey::Line(line_id)),
                source_container: None,
            }
        }
        EdgeContext::ExistingLine(line_id) => {
            let line = doc.get_line(line_id).ok_or(GraphError::UnknownLine(line_id))?;
            let (Some(from), Some(to)) = (line.from_port, line.to_port) else {
                return Ok(None);
            };
            let source = source_port(doc, from)?;
            let from_anchor = live_anchor(doc, source)?;
            let to_anchor = live_anchor(doc, to)?;
            let target_moves = doc
                .get_port(to)
                .and_then(|p| doc.get_node(p.node))
                .is_some_and(|n| !doc.meta(&n.kind).is_anchor);
            EdgePlan {
                source: Some(source),
                target: Some(to),
                superseded: Some(line_id),
                placement: Placement::Between { from: from_anchor, to: to_anchor, target_moves },
                key: Some(EdgeKey::Line(line_id)),
                source_container: Some(parent_of_port(doc, source)),
            }
        }
    };
    Ok(Some(plan))
}

/// Insertions rooted on a node stay in that node's container. Free placements
/// use a valid hint, else the container under the gesture point.
fn resolve_container(
    doc: &GraphDocument,
    request: &InsertRequest,
    plan: &EdgePlan,
) -> Option<NodeId> {
    if let Some(container) = plan.source_container {
        return container;
    }
    request
        .container_hint
        .filter(|id| doc.get_node(*id).is_some_and(|n| doc.meta(&n.kind).is_container))
        .or_else(|| doc.get_container_at(request.position))
}

pub struct InsertionPipeline {
    document: SharedDocument,
    prompt: Rc<dyn NodePrompt>,
    host: Rc<dyn LayoutHost>,
    settings: InsertionSettings,
    locks: EdgeLocks,
}

impl InsertionPipeline {
    pub fn new(
        document: SharedDocument,
        prompt: Rc<dyn NodePrompt>,
        host: Rc<dyn LayoutHost>,
        settings: InsertionSettings,
    ) -> Self {
        Self { document, prompt, host, settings, locks: EdgeLocks::default() }
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn locks(&self) -> &EdgeLocks {
        &self.locks
    }

    // Gesture entry points

    pub async fn on_port_click(&self, port: PortId) -> InsertOutcome {
        let at = self.document.borrow().port_anchor(port).unwrap_or(Pos2::ZERO);
        self.insert_node_on_edge(InsertRequest::new(EdgeContext::FromPort(port), at)).await
    }

    pub async fn on_drag_line_end(&self, line: LineId, drop_point: Pos2) -> InsertOutcome {
        let request = InsertRequest::new(EdgeContext::DraggedLine(line), drop_point);
        self.insert_node_on_edge(request).await
    }

    pub async fn on_line_add_button(&self, line: LineId) -> InsertOutcome {
        let at = self.document.borrow().line_midpoint(line).unwrap_or(Pos2::ZERO);
        self.insert_node_on_edge(InsertRequest::new(EdgeContext::ExistingLine(line), at)).await
    }

    pub async fn on_canvas_context_menu(&self, at: Pos2) -> InsertOutcome {
        self.insert_node_on_edge(InsertRequest::new(EdgeContext::None, at)).await
    }

    /// Prompt for a node type, create the node on the edge described by the
    /// request and wire it. Failures leave the document as it was.
    pub async fn insert_node_on_edge(&self, request: InsertRequest) -> InsertOutcome {
        match self.run(request).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!("insertion on {:?} aborted: {}", request.context, reason);
                InsertOutcome::Aborted { reason }
            }
        }
    }

    async fn run(&self, request: InsertRequest) -> Result<InsertOutcome, InsertAbort> {
        let (plan, container) = {
            let doc = self.document.borrow();
            let Some(plan) = resolve_edge(&doc, &request)? else {
                debug!("{:?} needs no insertion", request.context);
                return Ok(InsertOutcome::NoOp);
            };
            let container = resolve_container(&doc, &request, &plan);
            (plan, container)
        };

        let _guard = match plan.key {
            Some(key) => Some(self.locks.try_acquire(key).ok_or(InsertAbort::EdgeBusy(key))?),
            None => None,
        };

        let prompt = self.prompt.prompt_for_node_type(request.position, container);
        let Some(choice) = prompt.await else {
            debug!("node prompt dismissed for {:?}", request.context);
            return Ok(InsertOutcome::Canceled);
        };

        let (node, plan, checkpoint) = {
            let mut doc = self.document.borrow_mut();
            // The prompt may have been open for a long time.
            let Some(current) = resolve_edge(&doc, &request)? else {
                return Ok(InsertOutcome::NoOp);
            };
            let position = self.place(&doc, &current, &choice.kind, container);
            let checkpoint = doc.checkpoint();
            let node = doc.create_node(choice.kind.clone(), position, choice.data, container)?;
            (node, current, checkpoint)
        };

        // Ports resolve only after the node's first layout pass.
        self.host.first_layout(node).await;

        let mut doc = self.document.borrow_mut();
        let mut lines = Vec::new();
        if let Err(reason) = wire(&mut doc, &plan, node, &mut lines) {
            doc.revert_creation(checkpoint, node, &lines);
            return Err(reason);
        }
        if let Some(old) = plan.superseded {
            doc.dispose_line(old);
        }
        let target = plan.target.and_then(|p| doc.get_port(p)).map(|p| p.node);
        if let Some(target) = target {
            let downstream: Vec<NodeId> = doc
                .downstream(target)
                .into_iter()
                .filter(|id| doc.get_node(*id).is_some_and(|n| !doc.meta(&n.kind).is_anchor))
                .collect();
            doc.shift_nodes(&downstream, vec2(self.settings.downstream_offset, 0.0));
            debug!("shifted {} downstream node(s) of {}", downstream.len(), node);
        }
        info!("inserted {} on {:?} with {} line(s)", node, request.context, lines.len());
        Ok(InsertOutcome::Inserted { node, lines, replaced: plan.superseded })
    }

    /// Container-local top-left for a new node. Free placements are nudged
    /// down until they clear their siblings; a split line's node stays on the line.
    fn place(
        &self,
        doc: &GraphDocument,
        plan: &EdgePlan,
        kind: &NodeKind,
        container: Option<NodeId>,
    ) -> Pos2 {
        let size = doc.meta(kind).default_size;
        let origin = doc.canvas_origin(container).to_vec2();
        let min = match plan.placement {
            Placement::RightOf(anchor) => anchor + vec2(self.settings.gap, -size.y / 2.0),
            Placement::DropPoint(p) => p - vec2(0.0, size.y / 2.0),
            Placement::Between { from, to, target_moves } => {
                let shift = if target_moves { self.settings.downstream_offset } else { 0.0 };
                return from.lerp(to + vec2(shift, 0.0), 0.5) - size / 2.0 - origin;
            }
            Placement::At(p) => p,
        };
        let siblings: Vec<Rect> = doc
            .get_all_nodes()
            .into_iter()
            .filter(|n| n.parent == container && !doc.meta(&n.kind).is_anchor)
            .filter_map(|n| doc.node_bounds(n.id))
            .collect();
        let step = vec2(0.0, self.settings.anti_overlap_step);
        let mut rect = Rect::from_min_size(min, size);
        for _ in 0..MAX_NUDGES {
            if !siblings.iter().any(|r| r.intersects(rect)) {
                break;
            }
            rect = rect.translate(step);
        }
        rect.min - origin
    }
}

fn missing_port(doc: &GraphDocument, node: NodeId) -> InsertAbort {
    let kind = doc.get_node(node).map(|n| n.kind.clone());
    InsertAbort::MissingPort(kind.unwrap_or_else(|| NodeKind::new("unknown")))
}

fn wire(
    doc: &mut GraphDocument,
    plan: &EdgePlan,
    node: NodeId,
    lines: &mut Vec<LineId>,
) -> Result<(), InsertAbort> {
    if let Some(source) = plan.source {
        let input = doc.input_port(node).ok_or_else(|| missing_port(doc, node))?;
        lines.push(doc.connect(source, input)?);
    }
    if let Some(target) = plan.target {
        let output = doc.output_port(node).ok_or_else(|| missing_port(doc, node))?;
        lines.push(doc.connect(output, target)?);
    }
    Ok(())
}
