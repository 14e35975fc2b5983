use std::collections::{HashMap, HashSet, VecDeque};

use egui::{Pos2, Rect, Vec2, pos2, vec2};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::GraphError;
use super::registry::{NodeKind, NodeMeta, NodeRegistry, Padding, kinds};

// Basic type aliases for clarity
pub type NodeId = Uuid;
pub type PortId = Uuid;
pub type LineId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    /// Output side; lines start here.
    Source,
    /// Input side; lines end here.
    Target,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub node: NodeId,
    pub direction: PortDirection,
}

/// Geometry captured when a container collapses, consumed by the matching expand.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedLayout {
    pub expanded_size: Vec2,
    pub block_positions: Option<(Pos2, Pos2)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Relative to the parent container's canvas origin (or the root canvas).
    pub position: Pos2,
    pub size: Vec2,
    pub collapsed: bool,
    pub parent: Option<NodeId>,
    /// block-start and block-end, in that order, for kinds that own blocks.
    pub blocks: Vec<NodeId>,
    pub ports: Vec<PortId>,
    pub data: serde_json::Value,
    pub saved_layout: Option<SavedLayout>,
    created_seq: u64,
}

impl Node {
    pub fn created_seq(&self) -> u64 {
        self.created_seq
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    pub from_port: Option<PortId>,
    pub to_port: Option<PortId>,
    /// Style-only suppression; the line still exists.
    pub hidden: bool,
}

impl Line {
    pub fn is_committed(&self) -> bool {
        self.from_port.is_some() && self.to_port.is_some()
    }
}

/// Combined position/size/collapsed write applied as a single change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeTransform {
    pub position: Pos2,
    pub size: Vec2,
    pub collapsed: bool,
}

/// Mutation feed consumed by the rendering layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentChange {
    NodeCreated(NodeId),
    NodeChanged(NodeId),
    NodeRemoved(NodeId),
    LineCreated(LineId),
    LineChanged(LineId),
    LineRemoved(LineId),
}

impl DocumentChange {
    /// Node or line the change is about.
    pub fn subject(&self) -> Uuid {
        match *self {
            DocumentChange::NodeCreated(id)
            | DocumentChange::NodeChanged(id)
            | DocumentChange::NodeRemoved(id)
            | DocumentChange::LineCreated(id)
            | DocumentChange::LineChanged(id)
            | DocumentChange::LineRemoved(id) => id,
        }
    }
}

/// Bookkeeping captured before a tentative creation, see [`GraphDocument::revert_creation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    next_seq: u64,
    drains: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub nodes: HashMap<NodeId, Node>,
    pub ports: HashMap<PortId, Port>,
    pub lines: HashMap<LineId, Line>,
    next_seq: u64,
    #[serde(skip)]
    registry: NodeRegistry,
    #[serde(skip)]
    changes: Vec<DocumentChange>,
    #[serde(skip)]
    drains: u64,
}

impl GraphDocument {
    // Instantiate a new, empty document
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: NodeRegistry) -> Self {
        Self { registry, ..Self::default() }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn meta(&self, kind: &NodeKind) -> &NodeMeta {
        self.registry.meta(kind)
    }

    /// Serialized form of the document, used to compare states.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn drain_changes(&mut self) -> Vec<DocumentChange> {
        self.drains += 1;
        std::mem::take(&mut self.changes)
    }

    pub fn notify_changed(&mut self, id: NodeId) {
        if self.nodes.contains_key(&id) {
            self.changes.push(DocumentChange::NodeChanged(id));
        }
    }

    // Create operations

    /// Allocate a node of `kind`. With a parent, the parent must be a container
    /// that accepts the kind.
    pub fn create_node(
        &mut self,
        kind: NodeKind,
        position: Pos2,
        data: serde_json::Value,
        parent: Option<NodeId>,
    ) -> Result<NodeId, GraphError> {
        if let Some(pid) = parent {
            let parent_node = self.nodes.get(&pid).ok_or(GraphError::UnknownNode(pid))?;
            if let Some(reason) = self.registry.placement_error(&kind, &parent_node.kind) {
                return Err(GraphError::InvalidParent {
                    parent: pid,
                    kind: kind.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        let id = self.insert_node(kind.clone(), position, data, parent);
        if self.registry.meta(&kind).has_blocks {
            let size = self.nodes[&id].size;
            let (start, end) = centered_block_positions(size, self.registry.meta(&kind).padding);
            let null = serde_json::Value::Null;
            let bs = self.insert_node(kinds::BLOCK_START.into(), start, null.clone(), Some(id));
            let be = self.insert_node(kinds::BLOCK_END.into(), end, null, Some(id));
            if let Some(n) = self.nodes.get_mut(&id) {
                n.blocks = vec![bs, be];
            }
        }
        debug!("created {} node {}", kind, id);
        Ok(id)
    }

    fn insert_node(
        &mut self,
        kind: NodeKind,
        position: Pos2,
        data: serde_json::Value,
        parent: Option<NodeId>,
    ) -> NodeId {
        let meta = self.registry.meta(&kind).clone();
        let id = Uuid::now_v7();
        let mut ports = Vec::new();
        if meta.ports.input {
            ports.push(self.insert_port(id, PortDirection::Target));
        }
        if meta.ports.output {
            ports.push(self.insert_port(id, PortDirection::Source));
        }
        self.next_seq += 1;
        let node = Node {
            id,
            kind,
            position,
            size: meta.default_size,
            collapsed: false,
            parent,
            blocks: Vec::new(),
            ports,
            data,
            saved_layout: None,
            created_seq: self.next_seq,
        };
        self.nodes.insert(id, node);
        self.changes.push(DocumentChange::NodeCreated(id));
        id
    }

    fn insert_port(&mut self, node: NodeId, direction: PortDirection) -> PortId {
        let id = Uuid::now_v7();
        self.ports.insert(id, Port { id, node, direction });
        id
    }

    /// Create a committed line between an output and an input port.
    /// Connecting an already connected pair returns the existing line.
    pub fn connect(&mut self, from: PortId, to: PortId) -> Result<LineId, GraphError> {
        let from_port = self.live_port(from)?;
        let to_port = self.live_port(to)?;
        let invalid = |reason| GraphError::InvalidConnection { from, to, reason };
        if from_port.direction != PortDirection::Source
            || to_port.direction != PortDirection::Target
        {
            return Err(invalid("lines run from an output port to an input port"));
        }
        if from_port.node == to_port.node {
            return Err(invalid("a node cannot connect to itself"));
        }
        let from_parent = self.nodes[&from_port.node].parent;
        let to_parent = self.nodes[&to_port.node].parent;
        let in_group = |p: Option<NodeId>| {
            p.and_then(|id| self.nodes.get(&id)).is_some_and(|n| n.kind.is(kinds::GROUP))
        };
        if from_parent != to_parent && !in_group(from_parent) && !in_group(to_parent) {
            return Err(invalid("both nodes must live in the same container"));
        }
        if self.reaches(to_port.node, from_port.node) {
            return Err(invalid("the connection would close a cycle"));
        }
        if let Some(existing) = self
            .lines
            .values()
            .find(|l| l.from_port == Some(from) && l.to_port == Some(to))
        {
            return Ok(existing.id);
        }
        let id = Uuid::now_v7();
        self.lines.insert(id, Line { id, from_port: Some(from), to_port: Some(to), hidden: false });
        self.changes.push(DocumentChange::LineCreated(id));
        trace!("connected {} -> {} as {}", from, to, id);
        Ok(id)
    }

    /// Start a provisional line from `from` while the user drags its loose end.
    pub fn begin_drag(&mut self, from: PortId) -> Result<LineId, GraphError> {
        self.live_port(from)?;
        let id = Uuid::now_v7();
        self.lines.insert(id, Line { id, from_port: Some(from), to_port: None, hidden: false });
        self.changes.push(DocumentChange::LineCreated(id));
        Ok(id)
    }

    /// Resolve the loose end of a provisional line onto a target port.
    pub fn resolve_drag(&mut self, line: LineId, to: PortId) -> Result<(), GraphError> {
        self.live_port(to)?;
        let l = self.lines.get_mut(&line).ok_or(GraphError::UnknownLine(line))?;
        l.to_port = Some(to);
        self.changes.push(DocumentChange::LineChanged(line));
        Ok(())
    }

    fn live_port(&self, id: PortId) -> Result<&Port, GraphError> {
        match self.ports.get(&id) {
            Some(p) if self.nodes.contains_key(&p.node) => Ok(p),
            _ => Err(GraphError::DanglingPort(id)),
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint { next_seq: self.next_seq, drains: self.drains }
    }

    /// Undo the creation of `node` (and `lines` wired to it) since `checkpoint`.
    /// When the renderer has not drained the feed in between, the feed entries
    /// for the removed items are dropped instead of reporting a create/remove pair.
    pub fn revert_creation(&mut self, checkpoint: Checkpoint, node: NodeId, lines: &[LineId]) {
        let mut removed: HashSet<Uuid> = self.descendants(node).into_iter().collect();
        removed.insert(node);
        let doomed: Vec<NodeId> = removed.iter().copied().collect();
        removed.extend(self.lines_touching(&doomed));
        removed.extend(lines.iter().copied());
        for line in lines {
            self.dispose_line(*line);
        }
        self.remove_node(node);
        if self.drains == checkpoint.drains {
            self.changes.retain(|c| !removed.contains(&c.subject()));
        }
        if self.nodes.values().all(|n| n.created_seq <= checkpoint.next_seq) {
            self.next_seq = checkpoint.next_seq;
        }
    }

    // Update operations

    pub fn update_transform(&mut self, id: NodeId, t: NodeTransform) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?;
        node.position = t.position;
        node.size = t.size;
        node.collapsed = t.collapsed;
        self.changes.push(DocumentChange::NodeChanged(id));
        Ok(())
    }

    pub fn set_position(&mut self, id: NodeId, position: Pos2) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::UnknownNode(id))?;
        if node.position != position {
            node.position = position;
            self.changes.push(DocumentChange::NodeChanged(id));
        }
        Ok(())
    }

    pub fn set_line_hidden(&mut self, id: LineId, hidden: bool) -> bool {
        match self.lines.get_mut(&id) {
            Some(line) if line.hidden != hidden => {
                line.hidden = hidden;
                self.changes.push(DocumentChange::LineChanged(id));
                true
            }
            _ => false,
        }
    }

    /// Move `nodes` by `delta` within their containers.
    pub fn shift_nodes(&mut self, nodes: &[NodeId], delta: Vec2) {
        for id in nodes {
            if let Some(node) = self.nodes.get_mut(id) {
                node.position += delta;
                self.changes.push(DocumentChange::NodeChanged(*id));
            }
        }
    }

    pub(crate) fn saved_layout_mut(&mut self, id: NodeId) -> Option<&mut Option<SavedLayout>> {
        self.nodes.get_mut(&id).map(|n| &mut n.saved_layout)
    }

    // Delete operations

    /// Idempotent: disposing a missing line is a no-op returning false.
    pub fn dispose_line(&mut self, id: LineId) -> bool {
        if self.lines.remove(&id).is_some() {
            self.changes.push(DocumentChange::LineRemoved(id));
            true
        } else {
            false
        }
    }

    /// Remove a node with its descendants, their ports and every line touching them.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }
        let mut doomed = self.descendants(id);
        doomed.push(id);
        let doomed_ports: HashSet<PortId> = doomed
            .iter()
            .filter_map(|nid| self.nodes.get(nid))
            .flat_map(|n| n.ports.iter().copied())
            .collect();
        let to_remove: Vec<LineId> = self
            .lines
            .values()
            .filter(|l| {
                l.from_port.is_some_and(|p| doomed_ports.contains(&p))
                    || l.to_port.is_some_and(|p| doomed_ports.contains(&p))
            })
            .map(|l| l.id)
            .collect();
        for lid in to_remove {
            self.dispose_line(lid);
        }
        for pid in doomed_ports {
            self.ports.remove(&pid);
        }
        for nid in doomed {
            self.nodes.remove(&nid);
            self.changes.push(DocumentChange::NodeRemoved(nid));
        }
        true
    }

    // Queries

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn get_line(&self, id: LineId) -> Option<&Line> {
        self.lines.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn committed_line_count(&self) -> usize {
        self.lines.values().filter(|l| l.is_committed()).count()
    }

    /// All nodes in creation order.
    pub fn get_all_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.created_seq);
        nodes
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get_all_nodes()
            .into_iter()
            .filter(|n| n.parent == Some(id))
            .map(|n| n.id)
            .collect()
    }

    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([id]);
        while let Some(cur) = queue.pop_front() {
            for child in self.children(cur) {
                out.push(child);
                queue.push_back(child);
            }
        }
        out
    }

    pub fn port_of(&self, node: NodeId, direction: PortDirection) -> Option<PortId> {
        self.nodes.get(&node)?.ports.iter().copied().find(|p| {
            self.ports.get(p).is_some_and(|port| port.direction == direction)
        })
    }

    pub fn input_port(&self, node: NodeId) -> Option<PortId> {
        self.port_of(node, PortDirection::Target)
    }

    pub fn output_port(&self, node: NodeId) -> Option<PortId> {
        self.port_of(node, PortDirection::Source)
    }

    /// Lines with at least one endpoint on one of `nodes`.
    pub fn lines_touching(&self, nodes: &[NodeId]) -> Vec<LineId> {
        let ports: HashSet<PortId> = nodes
            .iter()
            .filter_map(|n| self.nodes.get(n))
            .flat_map(|n| n.ports.iter().copied())
            .collect();
        self.lines
            .values()
            .filter(|l| {
                l.from_port.is_some_and(|p| ports.contains(&p))
                    || l.to_port.is_some_and(|p| ports.contains(&p))
            })
            .map(|l| l.id)
            .collect()
    }

    /// True when either endpoint of `line` sits on a node hidden by a collapsed ancestor.
    pub fn touches_hidden_node(&self, line: LineId) -> bool {
        let Some(l) = self.lines.get(&line) else { return false };
        [l.from_port, l.to_port]
            .into_iter()
            .flatten()
            .filter_map(|p| self.ports.get(&p))
            .any(|p| self.is_hidden(p.node))
    }

    /// True when `to` is reachable from `from` following committed lines.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(cur) = queue.pop_front() {
            if cur == to {
                return true;
            }
            if !seen.insert(cur) {
                continue;
            }
            for line in self.lines.values().filter(|l| l.is_committed()) {
                let (Some(f), Some(t)) = (line.from_port, line.to_port) else { continue };
                let (Some(fp), Some(tp)) = (self.ports.get(&f), self.ports.get(&t)) else {
                    continue;
                };
                if fp.node == cur {
                    queue.push_back(tp.node);
                }
            }
        }
        false
    }

    /// `from` and every node reachable from it over committed lines without
    /// leaving its container.
    pub fn downstream(&self, from: NodeId) -> Vec<NodeId> {
        let Some(parent) = self.nodes.get(&from).map(|n| n.parent) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(cur) = queue.pop_front() {
            if !seen.insert(cur) {
                continue;
            }
            out.push(cur);
            for line in self.lines.values().filter(|l| l.is_committed()) {
                let (Some(f), Some(t)) = (line.from_port, line.to_port) else {
                    continue;
                };
                let (Some(fp), Some(tp)) = (self.ports.get(&f), self.ports.get(&t)) else {
                    continue;
                };
                let same_container = self.nodes.get(&tp.node).is_some_and(|n| n.parent == parent);
                if fp.node == cur && same_container {
                    queue.push_back(tp.node);
                }
            }
        }
        out
    }

    // Geometry

    pub fn padding(&self, id: NodeId) -> Padding {
        self.nodes.get(&id).map(|n| self.registry.meta(&n.kind).padding).unwrap_or(Padding::ZERO)
    }

    /// Origin of the child canvas of `container` in root canvas coordinates.
    /// `None` refers to the root canvas itself.
    pub fn canvas_origin(&self, container: Option<NodeId>) -> Pos2 {
        match container.and_then(|id| self.absolute_position(id).map(|p| (id, p))) {
            Some((id, p)) => p + self.padding(id).top_left(),
            None => Pos2::ZERO,
        }
    }

    pub fn absolute_position(&self, id: NodeId) -> Option<Pos2> {
        let node = self.nodes.get(&id)?;
        let origin = match node.parent {
            Some(pid) if self.nodes.contains_key(&pid) => self.canvas_origin(Some(pid)),
            _ => Pos2::ZERO,
        };
        Some(origin + node.position.to_vec2())
    }

    pub fn node_bounds(&self, id: NodeId) -> Option<Rect> {
        let node = self.nodes.get(&id)?;
        Some(Rect::from_min_size(self.absolute_position(id)?, node.size))
    }

    /// True when some ancestor of `id` is collapsed, hiding it from the canvas.
    pub fn is_hidden(&self, id: NodeId) -> bool {
        let mut cur = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(pid) = cur {
            match self.nodes.get(&pid) {
                Some(p) if p.collapsed => return true,
                Some(p) => cur = p.parent,
                None => return false,
            }
        }
        false
    }

    fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(pid) = cur {
            depth += 1;
            cur = self.nodes.get(&pid).and_then(|n| n.parent);
        }
        depth
    }

    /// Innermost visible, expanded container whose bounds contain `point`; among
    /// equally deep matches the most recently created one wins.
    pub fn get_container_at(&self, point: Pos2) -> Option<NodeId> {
        self.nodes
            .values()
            .filter(|n| self.registry.meta(&n.kind).is_container && !n.collapsed)
            .filter(|n| !self.is_hidden(n.id))
            .filter(|n| self.node_bounds(n.id).is_some_and(|r| r.contains(point)))
            .max_by_key(|n| (self.depth(n.id), n.created_seq))
            .map(|n| n.id)
    }

    /// Screen-independent point a line endpoint binds to.
    pub fn port_anchor(&self, id: PortId) -> Option<Pos2> {
        let port = self.ports.get(&id)?;
        let node = self.nodes.get(&port.node)?;
        let origin = self.absolute_position(node.id)?;
        if self.registry.meta(&node.kind).is_anchor {
            return Some(origin);
        }
        let y = origin.y + node.size.y / 2.0;
        Some(match port.direction {
            PortDirection::Target => pos2(origin.x, y),
            PortDirection::Source => pos2(origin.x + node.size.x, y),
        })
    }

    pub fn line_midpoint(&self, id: LineId) -> Option<Pos2> {
        let line = self.lines.get(&id)?;
        let a = self.port_anchor(line.from_port?)?;
        let b = self.port_anchor(line.to_port?)?;
        Some(a.lerp(b, 0.5))
    }

    /// Closest visible committed line within `tolerance` of `point`.
    pub fn line_at(&self, point: Pos2, tolerance: f32) -> Option<LineId> {
        self.lines
            .values()
            .filter(|l| l.is_committed() && !l.hidden)
            .filter_map(|l| {
                let a = self.port_anchor(l.from_port?)?;
                let b = self.port_anchor(l.to_port?)?;
                let d = point_segment_distance(point, a, b);
                (d <= tolerance).then_some((l.id, d))
            })
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(id, _)| id)
    }
}

/// Block-start/block-end positions vertically centered in a container's canvas.
pub fn centered_block_positions(size: Vec2, padding: Padding) -> (Pos2, Pos2) {
    let canvas = vec2(size.x - padding.horizontal(), size.y - padding.vertical());
    let y = canvas.y / 2.0;
    (pos2(0.0, y), pos2(canvas.x, y))
}

// Geometry helper: distance from point P to segment AB
fn point_segment_distance(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ap = p - a;
    let ab = b - a;
    let ab_len2 = ab.length_sq();
    if ab_len2 <= f32::EPSILON {
        return ap.length();
    }
    let t = (ap.dot(ab) / ab_len2).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}
