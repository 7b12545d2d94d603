use thiserror::Error;

/// Errors raised by the scheduler, the controller tree and the scope binder.
///
/// Misuse of the API fails fast with one of these variants at the point of
/// misuse. Cancellation is not an error; see [`crate::Cancelled`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MvcError {
    #[error("no controller in the chain starting at `{node_type}` defines action `{action}`")]
    NoSuchAction {
        action: String,
        node_type: &'static str,
    },

    #[error("action `{action}` was dispatched with {detail}")]
    ActionSignature { action: String, detail: String },

    #[error("invalid scheduler configuration: {0}")]
    Configuration(&'static str),

    #[error("no controller found: {0}")]
    NotFound(String),

    #[error("controller ref must be a callback or a node slot, found `{found}`")]
    ControllerRefType { found: String },

    #[error("controller {node} failed to initialize: {message}")]
    Initialization { node: String, message: String },

    #[error("controller {node} is already destroyed")]
    NodeDestroyed { node: String },

    #[error("no runtime is active on this thread")]
    NoRuntime,
}

impl MvcError {
    pub(crate) fn initialization(node: String, error: &anyhow::Error) -> Self {
        MvcError::Initialization {
            node,
            message: format!("{error:#}"),
        }
    }
}
