//! Stage-level errors. These never leave a target: the stage boundary maps
//! them to the stage's failure `Outcome`.

use fpgabuild_core::{ChannelError, CoreError, EditError};

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{tool} reported failure")]
    ToolFailed { tool: String },

    #[error("missing input: {0}")]
    Missing(String),

    #[error("{operation} failed: {detail}")]
    Command { operation: String, detail: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StageOutcome = std::result::Result<(), StageError>;
