use anyhow::{Context, Result};
use keelson_core::DEFAULT_MAX_BUILDS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = ".keelson";
pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DB_NAME: &str = "keelson.db";
pub const DEFAULT_BUILDS_ROOT: &str = "builds";

/// Contents of `<data dir>/config.toml`. Relative paths are resolved against
/// the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelsonConfig {
    pub database: String,
    pub builds_root: String,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: Option<String>,
    pub default_max_builds: u32,
}

impl Default for KeelsonConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DB_NAME.to_string(),
            builds_root: DEFAULT_BUILDS_ROOT.to_string(),
            log_filter: None,
            default_max_builds: DEFAULT_MAX_BUILDS,
        }
    }
}

impl KeelsonConfig {
    /// Read the config of `data_dir`, falling back to defaults when there is
    /// no config file.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub async fn save(&self, data_dir: &Path) -> Result<PathBuf> {
        let path = data_dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database)
    }

    pub fn database_url(&self, data_dir: &Path) -> String {
        format!("sqlite:{}", self.database_path(data_dir).display())
    }

    pub fn builds_root(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.builds_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = KeelsonConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, KeelsonConfig::default());
        assert_eq!(config.default_max_builds, 10);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config = KeelsonConfig {
            log_filter: Some("keelson=debug".to_string()),
            default_max_builds: 3,
            ..Default::default()
        };

        config.save(dir.path()).await.unwrap();
        assert_eq!(KeelsonConfig::load(dir.path()).await.unwrap(), config);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "builds_root = \"/srv/builds\"\n").unwrap();

        let config = KeelsonConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.database, DEFAULT_DB_NAME);
        assert_eq!(config.builds_root(dir.path()), PathBuf::from("/srv/builds"));
    }

    #[test]
    fn test_paths_relative_to_data_dir() {
        let config = KeelsonConfig::default();
        let data_dir = Path::new("/work/.keelson");
        assert_eq!(config.database_url(data_dir), "sqlite:/work/.keelson/keelson.db");
        assert_eq!(config.builds_root(data_dir), PathBuf::from("/work/.keelson/builds"));
    }
}
