pub mod error;
pub mod git;
pub mod registry;
pub mod runner;
pub mod traits;
pub mod workspace;

pub use error::{Result, RunnerError, VcsError};
pub use git::GitVcs;
pub use registry::{VcsKind, VcsRegistry};
pub use runner::{shell_quote, CommandOutput, CommandRunner, ShellRunner};
pub use traits::{FetchOutput, HeadInfo, VersionControl};
pub use workspace::WorkspaceLayout;
