use thiserror::Error;

use crate::meshtastic::RadioError;
use crate::telegram::ChatError;
use crate::validation::ValidationError;

/// Failure inside one event handler. Caught by the server loop, logged, and
/// never allowed to stop the loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("radio: {0}")]
    Radio(#[from] RadioError),

    #[error("chat: {0}")]
    Chat(#[from] ChatError),

    #[error("invalid input: {0}")]
    Invalid(#[from] ValidationError),

    /// Command needs a node id and neither an argument nor a default exists.
    #[error("No node ID provided and no default node ID set.")]
    NoNode,
}
