//! Resource management for build execution.
//!
//! - [`ProjectLocks`]: one lock per project, across processes, so nothing else
//!   touches its working directory while a build runs
//! - [`BuildGuard`]: reports builds that were abandoned mid-run

mod build_guard;
mod project_locks;

pub use build_guard::BuildGuard;
pub use project_locks::{ProjectLock, ProjectLocks};
