use std::collections::HashMap;
use std::fmt;

use egui::{Vec2, vec2};
use serde::{Deserialize, Serialize};

use crate::persistence::settings::EditorSettings;

/// Built-in node kinds. The set is open: any other string is a valid kind and
/// resolves to the fallback metadata.
pub mod kinds {
    pub const START: &str = "start";
    pub const END: &str = "end";
    pub const LLM: &str = "llm";
    pub const CODE: &str = "code";
    pub const CONDITION: &str = "condition";
    pub const HTTP_API: &str = "http-api";
    pub const LOOP: &str = "loop";
    pub const GROUP: &str = "group";
    pub const BLOCK_START: &str = "block-start";
    pub const BLOCK_END: &str = "block-end";
    pub const CONTINUE: &str = "continue";
    pub const BREAK: &str = "break";
    pub const COMMENT: &str = "comment";
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKind(String);

impl NodeKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is(&self, kind: &str) -> bool {
        self.0 == kind
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Inner spacing between a container's outer box and its child canvas.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Padding {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

impl Padding {
    pub const ZERO: Padding = Padding { top: 0.0, bottom: 0.0, left: 0.0, right: 0.0 };

    /// Offset from the outer top-left corner to the child canvas origin.
    pub fn top_left(&self) -> Vec2 {
        vec2(self.left, self.top)
    }

    pub fn horizontal(&self) -> f32 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f32 {
        self.top + self.bottom
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLayout {
    pub input: bool,
    pub output: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub is_container: bool,
    /// Containers of this kind own a block-start / block-end pair.
    pub has_blocks: bool,
    pub default_size: Vec2,
    pub padding: Padding,
    pub ports: PortLayout,
    /// Block markers are anchors: their position is the port location.
    pub is_anchor: bool,
}

impl NodeMeta {
    fn plain(size: Vec2, input: bool, output: bool) -> Self {
        Self {
            is_container: false,
            has_blocks: false,
            default_size: size,
            padding: Padding::ZERO,
            ports: PortLayout { input, output },
            is_anchor: false,
        }
    }
}

const NODE_SIZE: Vec2 = vec2(280.0, 120.0);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistry {
    metas: HashMap<NodeKind, NodeMeta>,
    fallback: NodeMeta,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::from_settings(&EditorSettings::default())
    }
}

impl NodeRegistry {
    pub fn from_settings(settings: &EditorSettings) -> Self {
        let mut metas = HashMap::new();
        metas.insert(kinds::START.into(), NodeMeta::plain(NODE_SIZE, false, true));
        metas.insert(kinds::END.into(), NodeMeta::plain(NODE_SIZE, true, false));
        for k in [kinds::LLM, kinds::CODE, kinds::CONDITION, kinds::HTTP_API] {
            metas.insert(k.into(), NodeMeta::plain(NODE_SIZE, true, true));
        }
        metas.insert(kinds::CONTINUE.into(), NodeMeta::plain(vec2(200.0, 60.0), true, false));
        metas.insert(kinds::BREAK.into(), NodeMeta::plain(vec2(200.0, 60.0), true, false));
        metas.insert(kinds::COMMENT.into(), NodeMeta::plain(vec2(240.0, 150.0), false, false));
        metas.insert(
            kinds::BLOCK_START.into(),
            NodeMeta { is_anchor: true, ..NodeMeta::plain(Vec2::ZERO, false, true) },
        );
        metas.insert(
            kinds::BLOCK_END.into(),
            NodeMeta { is_anchor: true, ..NodeMeta::plain(Vec2::ZERO, true, false) },
        );
        metas.insert(
            kinds::LOOP.into(),
            NodeMeta {
                is_container: true,
                has_blocks: true,
                default_size: settings.expanded_size(),
                padding: settings.loop_padding,
                ports: PortLayout { input: true, output: true },
                is_anchor: false,
            },
        );
        metas.insert(
            kinds::GROUP.into(),
            NodeMeta {
                is_container: true,
                has_blocks: false,
                default_size: vec2(560.0, 360.0),
                padding: settings.group_padding,
                ports: PortLayout { input: false, output: false },
                is_anchor: false,
            },
        );
        Self { metas, fallback: NodeMeta::plain(NODE_SIZE, true, true) }
    }

    pub fn meta(&self, kind: &NodeKind) -> &NodeMeta {
        self.metas.get(kind).unwrap_or(&self.fallback)
    }

    pub fn register(&mut self, kind: NodeKind, meta: NodeMeta) {
        self.metas.insert(kind, meta);
    }

    /// Placement rule for dropping `kind` into a container of kind `parent`.
    /// Returns the reason when the placement is refused.
    pub fn placement_error(&self, kind: &NodeKind, parent: &NodeKind) -> Option<&'static str> {
        if !self.meta(parent).is_container {
            return Some("parent does not accept children");
        }
        match kind.as_str() {
            kinds::START | kinds::END | kinds::BLOCK_START | kinds::BLOCK_END => {
                Some("start, end and block markers cannot change container")
            }
            kinds::CONTINUE | kinds::BREAK if !parent.is(kinds::LOOP) => {
                Some("continue and break can only live inside a loop")
            }
            kinds::LOOP if parent.is(kinds::LOOP) => Some("loops cannot nest loops"),
            _ => None,
        }
    }
}
