use std::rc::Rc;

use log::warn;
use tokio::sync::watch;

use crate::canvas::geometry::{GeometryEngine, GeometrySettings};
use crate::canvas::host::{LayoutHost, NodePrompt, TickLayoutHost};
use crate::canvas::insertion::{InsertOutcome, InsertRequest, InsertionPipeline, InsertionSettings};
use crate::canvas::{SharedDocument, shared};
use crate::graph_utils::error::GraphError;
use crate::graph_utils::graph::{GraphDocument, NodeId};
use crate::graph_utils::registry::NodeRegistry;
use crate::persistence::settings::EditorSettings;
use crate::runtime::highlight::{HighlightDriver, HighlightTiming};

/// Wires the document, the insertion pipeline and the geometry engine to one
/// set of settings and host collaborators.
pub struct SkillEditor {
    settings: EditorSettings,
    document: SharedDocument,
    pipeline: InsertionPipeline,
    geometry: GeometryEngine,
    host: Rc<dyn LayoutHost>,
}

impl SkillEditor {
    pub fn new(
        settings: EditorSettings,
        prompt: Rc<dyn NodePrompt>,
        host: Rc<dyn LayoutHost>,
    ) -> Self {
        let document = shared(GraphDocument::with_registry(NodeRegistry::from_settings(&settings)));
        let pipeline = InsertionPipeline::new(
            Rc::clone(&document),
            prompt,
            Rc::clone(&host),
            InsertionSettings::from(&settings),
        );
        let geometry = GeometryEngine::new(GeometrySettings::from(&settings));
        Self { settings, document, pipeline, geometry, host }
    }

    /// Editor for a renderer without layout signals: the wiring tick and the
    /// anchor-pass delay come from `settings`. The returned host takes the
    /// measured node heights.
    pub fn with_tick_host(
        settings: EditorSettings,
        prompt: Rc<dyn NodePrompt>,
    ) -> (Self, Rc<TickLayoutHost>) {
        let host = Rc::new(TickLayoutHost::from_settings(&settings));
        let editor = Self::new(settings, prompt, host.clone());
        (editor, host)
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn pipeline(&self) -> &InsertionPipeline {
        &self.pipeline
    }

    pub fn geometry(&self) -> &GeometryEngine {
        &self.geometry
    }

    pub async fn insert_node_on_edge(&self, request: InsertRequest) -> InsertOutcome {
        self.pipeline.insert_node_on_edge(request).await
    }

    /// Toggle control of a container. Failures are logged and leave the node untouched.
    pub async fn set_container_expanded(
        &self,
        node: NodeId,
        expanded: bool,
    ) -> Result<(), GraphError> {
        let result = self.geometry.toggle(&self.document, self.host.as_ref(), node, expanded).await;
        if let Err(e) = &result {
            warn!("toggling container {} failed: {}", node, e);
        }
        result
    }

    /// Highlight driver configured from the editor settings, with its receiver.
    pub fn highlight(&self) -> (HighlightDriver, watch::Receiver<Option<NodeId>>) {
        HighlightDriver::new(HighlightTiming::from(&self.settings))
    }
}
