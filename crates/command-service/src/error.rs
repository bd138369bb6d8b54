use std::io;

use command_store::StoreError;
use protocol::{CommandId, CommandStatus};

#[derive(Debug, thiserror::Error)]
pub(crate) enum EngineError {
    #[error("Empty Script")]
    EmptyScript,
    #[error("command {0} not found")]
    NotFound(CommandId),
    /// Stop requested for a command that already reached a terminal state.
    #[error("script already {0}")]
    StateConflict(CommandStatus),
    #[error("command {0} is running but has no registered executor")]
    InternalInconsistency(CommandId),
    #[error("persistence failed: {0}")]
    Persistence(#[source] StoreError),
    #[error("termination could not be confirmed: {0}")]
    Process(#[source] io::Error),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::Persistence(other),
        }
    }
}
