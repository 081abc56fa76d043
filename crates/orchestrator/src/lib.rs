pub mod error;
pub mod executor;
pub mod notifier;
pub mod resources;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod state_machine;

pub use error::{OrchestratorError, Result};
pub use executor::BuildExecutor;
pub use notifier::{EventBusNotifier, HookNotifier};
pub use resources::{ProjectLock, ProjectLocks};
pub use retention::RetentionPolicy;
pub use scheduler::{BuildQueue, InlineScheduler, Scheduler};
pub use service::{ProjectService, ProjectUpdate};
pub use state_machine::BuildStateMachine;
