//! Editing core for node-based skill workflows: gesture-driven node insertion,
//! container collapse/expand geometry and the live run highlight.

pub mod canvas;
pub mod editor;
pub mod graph_utils;
pub mod persistence;
pub mod runtime;

pub use editor::SkillEditor;
