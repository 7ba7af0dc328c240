use crate::ident::{ClassIdentity, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Versions participating in a merge run, in provider order.
    #[serde(default)]
    pub versions: Vec<VersionId>,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub split: SplitSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Per-version class trees, one sub-directory per version.
    #[serde(default = "default_input_dir")]
    pub input: PathBuf,
    #[serde(default = "default_merged_dir")]
    pub merged: PathBuf,
    /// Projected trees, one sub-directory per target version.
    #[serde(default = "default_split_dir")]
    pub split: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            input: default_input_dir(),
            merged: default_merged_dir(),
            split: default_split_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            threads: default_threads(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSettings {
    /// Physical superclass to use when versions disagree and the common
    /// ancestor cannot be determined from the known hierarchy.
    #[serde(default)]
    pub pinned_superclasses: BTreeMap<ClassIdentity, ClassIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSettings {
    /// Fail a projected class that still references something absent in the
    /// target version.
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self { verify: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filter: default_filter(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    "versions".into()
}
fn default_merged_dir() -> PathBuf {
    "merged".into()
}
fn default_split_dir() -> PathBuf {
    "split".into()
}
fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_true() -> bool {
    true
}
fn default_log_dir() -> PathBuf {
    "logs".into()
}
fn default_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionSetError {
    #[error("no versions configured")]
    Empty,
    #[error("version `{0}` is listed more than once")]
    Duplicate(VersionId),
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The ordered version list for a merge run.
    pub fn version_set(&self) -> Result<Vec<VersionId>, VersionSetError> {
        if self.versions.is_empty() {
            return Err(VersionSetError::Empty);
        }
        let mut seen = HashSet::new();
        for version in &self.versions {
            if !seen.insert(version) {
                return Err(VersionSetError::Duplicate(version.clone()));
            }
        }
        Ok(self.versions.clone())
    }

    /// Make every relative directory relative to `base` (the directory the
    /// settings file lives in).
    pub fn resolve_paths(&mut self, base: &Path) {
        for dir in [
            &mut self.store.input,
            &mut self.store.merged,
            &mut self.store.split,
            &mut self.logging.dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}
