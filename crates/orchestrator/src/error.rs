use keelson_core::ValidationError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("Build not found: {0}")]
    BuildNotFound(Uuid),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(db::DbError),

    #[error("VCS error: {0}")]
    Vcs(#[from] vcs::VcsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build queue is closed")]
    QueueClosed,
}

impl From<db::DbError> for OrchestratorError {
    /// Lift the store's not-found and uniqueness errors to their own variants
    /// so callers can match on them without reaching into `db`.
    fn from(error: db::DbError) -> Self {
        match error {
            db::DbError::ProjectNotFound(id) => Self::ProjectNotFound(id),
            db::DbError::BuildNotFound(id) => Self::BuildNotFound(id),
            db::DbError::Validation(e) => Self::Validation(e),
            other => Self::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_errors_are_lifted() {
        let id = Uuid::new_v4();
        assert!(matches!(
            OrchestratorError::from(db::DbError::ProjectNotFound(id)),
            OrchestratorError::ProjectNotFound(found) if found == id
        ));
        assert!(matches!(
            OrchestratorError::from(db::DbError::Validation(ValidationError::taken("name"))),
            OrchestratorError::Validation(_)
        ));
    }

    #[test]
    fn test_validation_message() {
        let err = OrchestratorError::from(ValidationError::blank("vcs_branch"));
        assert_eq!(err.to_string(), "Validation failed: vcs_branch can't be blank");
    }
}
