//! Table of the version control backends a project may use.

use keelson_core::VcsDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{Result, VcsError};
use crate::git::GitVcs;
use crate::runner::CommandRunner;
use crate::traits::VersionControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VcsKind {
    Git,
}

impl VcsKind {
    pub const ALL: [VcsKind; 1] = [VcsKind::Git];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "git" => Some(Self::Git),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Git => "Git",
        }
    }

    /// Command whose success shows the client tool is installed.
    fn probe_command(&self) -> &'static str {
        match self {
            Self::Git => "git --version",
        }
    }
}

/// Registered backends plus a cached "is the client installed" probe.
///
/// The probe runs at most once per backend for the lifetime of the registry
/// (in practice once per process start). Call [`VcsRegistry::refresh_support`]
/// after installing a client, or [`VcsRegistry::assume_support`] to pin the
/// answer in tests.
pub struct VcsRegistry {
    kinds: Vec<VcsKind>,
    runner: Arc<dyn CommandRunner>,
    base_dir: PathBuf,
    support: RwLock<HashMap<VcsKind, bool>>,
}

impl VcsRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            kinds: VcsKind::ALL.to_vec(),
            runner,
            base_dir: PathBuf::from("."),
            support: RwLock::new(HashMap::new()),
        }
    }

    /// Directory VCS commands without a checkout (clone, probe) start from.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.runner)
    }

    /// Identifiers accepted in a project's `vcs.kind`.
    pub fn identifiers(&self) -> Vec<&'static str> {
        self.kinds.iter().map(VcsKind::as_str).collect()
    }

    pub fn resolve(&self, identifier: &str) -> Result<VcsKind> {
        VcsKind::parse(identifier)
            .filter(|kind| self.kinds.contains(kind))
            .ok_or_else(|| VcsError::UnsupportedBackend(identifier.to_string()))
    }

    /// Build the backend for a project's VCS descriptor.
    pub fn open(&self, descriptor: &VcsDescriptor) -> Result<Box<dyn VersionControl>> {
        match self.resolve(&descriptor.kind)? {
            VcsKind::Git => Ok(Box::new(
                GitVcs::new(
                    descriptor.source.clone(),
                    descriptor.branch.clone(),
                    self.runner(),
                )
                .with_base_dir(self.base_dir.clone()),
            )),
        }
    }

    /// Whether the backend's client tool can be invoked here.
    pub async fn supported(&self, kind: VcsKind) -> bool {
        if let Some(cached) = self.cached_support(kind) {
            return cached;
        }

        let supported = self.probe(kind, &self.base_dir).await;
        info!(vcs = kind.as_str(), supported, "Probed VCS client");
        self.assume_support(kind, supported);
        supported
    }

    /// Pin the probe result for `kind`.
    pub fn assume_support(&self, kind: VcsKind, supported: bool) {
        if let Ok(mut support) = self.support.write() {
            support.insert(kind, supported);
        }
    }

    /// Forget cached probe results so the next query probes again.
    pub fn refresh_support(&self) {
        if let Ok(mut support) = self.support.write() {
            support.clear();
        }
    }

    fn cached_support(&self, kind: VcsKind) -> Option<bool> {
        self.support
            .read()
            .ok()
            .and_then(|support| support.get(&kind).copied())
    }

    async fn probe(&self, kind: VcsKind, dir: &Path) -> bool {
        match self.runner.execute(dir, kind.probe_command()).await {
            Ok(output) => output.is_success(),
            Err(e) => {
                debug!(vcs = kind.as_str(), error = %e, "VCS probe could not run");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::runner::CommandOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
        exit_code: i32,
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn execute(
            &self,
            _working_dir: &Path,
            _command: &str,
        ) -> std::result::Result<CommandOutput, RunnerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput {
                stdout: vec!["git version 2.43.0".to_string()],
                exit_code: self.exit_code,
            })
        }
    }

    fn registry(exit_code: i32) -> (VcsRegistry, Arc<CountingRunner>) {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            exit_code,
        });
        (VcsRegistry::new(runner.clone()), runner)
    }

    #[test]
    fn test_identifiers() {
        let (registry, _) = registry(0);
        assert_eq!(registry.identifiers(), vec!["git"]);
    }

    #[test]
    fn test_resolve() {
        let (registry, _) = registry(0);
        assert_eq!(registry.resolve("git").unwrap(), VcsKind::Git);
        assert!(matches!(
            registry.resolve("lol"),
            Err(VcsError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_open_dispatches_on_kind() {
        let (registry, _) = registry(0);
        let vcs = registry
            .open(&VcsDescriptor::new("git", "repo", "main"))
            .unwrap();
        assert_eq!(vcs.kind(), VcsKind::Git);
        assert_eq!(vcs.source(), "repo");
        assert_eq!(vcs.branch(), "main");

        assert!(registry
            .open(&VcsDescriptor::new("svn", "repo", "trunk"))
            .is_err());
    }

    #[tokio::test]
    async fn test_support_probe_is_cached() {
        let (registry, runner) = registry(0);

        assert!(registry.supported(VcsKind::Git).await);
        assert!(registry.supported(VcsKind::Git).await);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        registry.refresh_support();
        assert!(registry.supported(VcsKind::Git).await);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_probe_is_unsupported() {
        let (registry, _) = registry(127);
        assert!(!registry.supported(VcsKind::Git).await);
    }

    #[tokio::test]
    async fn test_assume_support_skips_probe() {
        let (registry, runner) = registry(0);
        registry.assume_support(VcsKind::Git, false);

        assert!(!registry.supported(VcsKind::Git).await);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(VcsKind::Git.as_str(), "git");
        assert_eq!(VcsKind::Git.display_name(), "Git");
        assert_eq!(VcsKind::parse("git"), Some(VcsKind::Git));
        assert_eq!(VcsKind::parse("hg"), None);
    }
}
