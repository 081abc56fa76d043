use thiserror::Error;
use uuid::Uuid;

/// A rejected project configuration, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn blank(field: &'static str) -> Self {
        Self::new(field, "can't be blank")
    }

    pub fn taken(field: &'static str) -> Self {
        Self::new(field, "has already been taken")
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("Build not found: {0}")]
    BuildNotFound(Uuid),

    #[error("Invalid build status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}
