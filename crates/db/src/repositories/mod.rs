mod build_repository;
mod hook_repository;
mod project_repository;

pub use build_repository::BuildRepository;
pub use hook_repository::HookRepository;
pub use project_repository::ProjectRepository;
