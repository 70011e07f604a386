use std::{io, sync::Arc};

use thiserror::Error;

use crate::model::ServoId;

#[derive(Debug, Error, Clone)]
pub enum ServoError {
    #[error("position out of 0...1.0 range: {0}")]
    PositionOutOfRange(f64),
    #[error("no servo {id}, controller has {count}")]
    NoSuchServo { id: usize, count: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("servo {0} is disabled")]
    Disabled(ServoId),
    #[error("controller is not initialized")]
    NotInitialized,
    #[error("controller is already initialized")]
    AlreadyInitialized,
    #[error("transition hasn't completed yet")]
    NotCompleted,
    #[error("transition has already completed")]
    AlreadyCompleted,
    #[error("invalid token, refusing to set status")]
    AccessDenied,
    #[error("not supported: {0}")]
    Unsupported(String),
    #[error("transport failure: {0}")]
    Transport(#[source] Arc<io::Error>),
    #[error("communication error: {0}")]
    Communication(String),
    #[error("mechanical limit reached at {0}")]
    LimitReached(f64),
    #[error("failed to start background worker: {0}")]
    Worker(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("controller closed")]
    Closed,
}

impl ServoError {
    /// Errors that end a transition without making it a failure.
    pub fn is_expected_stop(&self) -> bool {
        matches!(self, ServoError::Disabled(_) | ServoError::LimitReached(_))
    }
}

impl From<io::Error> for ServoError {
    fn from(e: io::Error) -> Self {
        ServoError::Transport(Arc::new(e))
    }
}
