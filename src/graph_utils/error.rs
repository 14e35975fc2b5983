use thiserror::Error;
use uuid::Uuid;

/// Failures raised by graph document primitives.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("node '{parent}' cannot own a '{kind}' node: {reason}")]
    InvalidParent {
        parent: Uuid,
        kind: String,
        reason: String,
    },

    #[error("port '{0}' no longer resolves to a live node")]
    DanglingPort(Uuid),

    #[error("node '{0}' not found")]
    UnknownNode(Uuid),

    #[error("line '{0}' not found")]
    UnknownLine(Uuid),

    #[error("cannot connect port '{from}' to port '{to}': {reason}")]
    InvalidConnection {
        from: Uuid,
        to: Uuid,
        reason: &'static str,
    },

    #[error("node '{0}' is not a container")]
    NotAContainer(Uuid),
}
