use std::cell::RefCell;
use std::rc::Rc;

use crate::graph_utils::graph::GraphDocument;

pub mod geometry;
pub mod host;
pub mod insertion;
pub mod viewport;

/// The document as shared between gesture handlers on the UI thread.
pub type SharedDocument = Rc<RefCell<GraphDocument>>;

pub fn shared(doc: GraphDocument) -> SharedDocument {
    Rc::new(RefCell::new(doc))
}
