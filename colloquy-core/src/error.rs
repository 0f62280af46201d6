use thiserror::Error;

/// All errors produced by colloquy-core.
#[derive(Debug, Error)]
pub enum ColloquyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("recognition error: {0}")]
    Recognition(String),

    #[error("answer engine error: {0}")]
    Answer(String),

    #[error("synthesis failed for sentence {sequence}: {message}")]
    Synthesis { sequence: u64, message: String },

    #[error("recognizer did not confirm stop within {0:?}")]
    EngineStopTimeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ColloquyError {
    /// True for failures that abort the whole session rather than one turn
    /// or one sentence.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ColloquyError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, ColloquyError>;
