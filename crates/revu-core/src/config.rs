//! Configuration management for revu.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use revu_git::{MergeStrategy, PersonIdent};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Site configuration loaded from `<site>/etc/revu.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    /// Per-label vote copy policy.
    #[serde(default = "default_labels")]
    pub labels: BTreeMap<String, LabelConfig>,
}

impl Config {
    /// Load config from a TOML file.
    ///
    /// # Errors
    /// Returns error if file can't be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.merge.strategy()?;
        Ok(config)
    }

    /// Save config to a TOML file.
    ///
    /// # Errors
    /// Returns error if serialization or write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Copy conditions for `label`; unknown labels are never copied.
    #[must_use]
    pub fn copy_conditions(&self, label: &str) -> &[CopyCondition] {
        self.labels
            .get(label)
            .map_or(&[], |l| l.copy_conditions.as_slice())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            update: UpdateConfig::default(),
            merge: MergeConfig::default(),
            cache: CacheConfig::default(),
            notify: NotifyConfig::default(),
            labels: default_labels(),
        }
    }
}

/// Server identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,

    #[serde(default = "default_server_email")]
    pub email: String,

    /// Base URL used for `Reviewed-on` footers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_web_url: Option<String>,
}

impl ServerConfig {
    /// The server's own identity at `when`.
    #[must_use]
    pub fn ident(&self, when: DateTime<Utc>) -> PersonIdent {
        PersonIdent::new(&self.name, &self.email, when)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            email: default_server_email(),
            canonical_web_url: None,
        }
    }
}

fn default_server_name() -> String {
    "Revu Code Review".into()
}

fn default_server_email() -> String {
    "revu@localhost".into()
}

/// Retry budget for batch updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl UpdateConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_ms: default_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_timeout_ms() -> u64 {
    20_000
}

const fn default_initial_backoff_ms() -> u64 {
    10
}

const fn default_max_backoff_ms() -> u64 {
    1_000
}

/// Merge behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Include the base section in conflict markers.
    #[serde(default)]
    pub diff3: bool,

    /// Refuse speculative content merges of blobs above this many bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_object_size: Option<u64>,
}

impl MergeConfig {
    /// Parsed merge strategy.
    ///
    /// # Errors
    /// Returns `BadRequest` for an unknown strategy name.
    pub fn strategy(&self) -> Result<MergeStrategy> {
        self.strategy
            .parse()
            .map_err(|e: revu_git::Error| Error::BadRequest(e.to_string()))
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            diff3: false,
            max_object_size: None,
        }
    }
}

fn default_strategy() -> String {
    MergeStrategy::Recursive.name().into()
}

/// Persistent cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory; relative paths resolve against the site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_change_kind_weight")]
    pub change_kind_max_weight: u64,

    #[serde(default = "default_mergeability_weight")]
    pub mergeability_max_weight: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            change_kind_max_weight: default_change_kind_weight(),
            mergeability_max_weight: default_mergeability_weight(),
        }
    }
}

const fn default_change_kind_weight() -> u64 {
    1 << 20
}

const fn default_mergeability_weight() -> u64 {
    1 << 20
}

/// Notification worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            sync_timeout_ms: default_sync_timeout_ms(),
        }
    }
}

const fn default_worker_threads() -> usize {
    2
}

const fn default_sync_timeout_ms() -> u64 {
    5_000
}

/// When a vote on a label survives a new patch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopyCondition {
    AnyChange,
    NoChange,
    NoCodeChange,
    TrivialRebase,
    MergeFirstParentUpdate,
}

/// Label settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default)]
    pub copy_conditions: Vec<CopyCondition>,
}

fn default_labels() -> BTreeMap<String, LabelConfig> {
    BTreeMap::from([
        (
            "Code-Review".to_string(),
            LabelConfig {
                copy_conditions: vec![
                    CopyCondition::NoChange,
                    CopyCondition::NoCodeChange,
                    CopyCondition::TrivialRebase,
                ],
            },
        ),
        (
            "Verified".to_string(),
            LabelConfig {
                copy_conditions: vec![CopyCondition::NoChange],
            },
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::load("/nonexistent/path/revu.toml").unwrap();
        assert_eq!(config.update.max_attempts, 5);
        assert_eq!(config.update.timeout_ms, 20_000);
        assert_eq!(config.notify.worker_threads, 2);
        assert_eq!(config.merge.strategy().unwrap(), MergeStrategy::Recursive);
        assert!(config.labels.contains_key("Code-Review"));
    }

    #[test]
    fn test_config_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("revu.toml");

        let mut config = Config::load(&path).unwrap();
        config.server.canonical_web_url = Some("https://review.example.com".into());
        config.merge.strategy = "resolve".into();
        config.merge.max_object_size = Some(1024);
        config.labels.insert(
            "Library-Compliance".into(),
            LabelConfig {
                copy_conditions: vec![CopyCondition::AnyChange],
            },
        );

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(
            loaded.server.canonical_web_url.as_deref(),
            Some("https://review.example.com")
        );
        assert_eq!(loaded.merge.strategy().unwrap(), MergeStrategy::Resolve);
        assert_eq!(loaded.merge.max_object_size, Some(1024));
        assert_eq!(
            loaded.copy_conditions("Library-Compliance"),
            [CopyCondition::AnyChange]
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("revu.toml");
        fs::write(
            &path,
            "[update]\nmax_attempts = 2\n\n[labels.Verified]\ncopy_conditions = [\"no-code-change\"]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.update.max_attempts, 2);
        assert_eq!(config.update.max_backoff_ms, 1_000);
        assert_eq!(config.copy_conditions("Verified"), [CopyCondition::NoCodeChange]);
        assert!(config.copy_conditions("Code-Review").is_empty());
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("revu.toml");
        fs::write(&path, "[merge]\nstrategy = \"octopus\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
