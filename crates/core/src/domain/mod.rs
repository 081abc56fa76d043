mod build;
mod hook;
mod project;

pub use build::*;
pub use hook::*;
pub use project::*;
