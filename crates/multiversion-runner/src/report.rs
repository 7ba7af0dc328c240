use chrono::{DateTime, Utc};
use multiversion_core::{ClassIdentity, VersionId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunKind {
    Merge,
    Split { target: VersionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Written,
    /// Split only: the class does not exist in the target.
    Removed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub class: ClassIdentity,
    pub status: GroupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl GroupReport {
    pub fn written(class: ClassIdentity, warnings: Vec<String>) -> Self {
        Self {
            class,
            status: GroupStatus::Written,
            error: None,
            warnings,
        }
    }

    pub fn removed(class: ClassIdentity, warnings: Vec<String>) -> Self {
        Self {
            class,
            status: GroupStatus::Removed,
            error: None,
            warnings,
        }
    }

    pub fn failed(class: ClassIdentity, error: impl Into<String>) -> Self {
        Self {
            class,
            status: GroupStatus::Failed,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}

/// Outcome of one merge or split run, one entry per class group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub versions: Vec<VersionId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub groups: Vec<GroupReport>,
}

impl RunReport {
    pub fn start(kind: RunKind, versions: Vec<VersionId>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            versions,
            started_at: Utc::now(),
            finished_at: None,
            groups: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.groups.sort_by(|a, b| a.class.cmp(&b.class));
        self.finished_at = Some(Utc::now());
    }

    pub fn count(&self, status: GroupStatus) -> usize {
        self.groups.iter().filter(|g| g.status == status).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups.iter().filter(|g| g.status == GroupStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn warning_count(&self) -> usize {
        self.groups.iter().map(|g| g.warnings.len()).sum()
    }

    /// File name of the report inside the logging directory.
    pub fn file_name(&self) -> String {
        match &self.kind {
            RunKind::Merge => "report-merge.json".to_string(),
            RunKind::Split { target } => format!("report-split-{}.json", target.tag()),
        }
    }

    /// Write the report into `dir`. Uses tmp+rename for atomicity.
    pub async fn save(&self, dir: &Path) -> anyhow::Result<std::path::PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let file_name = self.file_name();
        let path = dir.join(&file_name);
        let tmp = dir.join(format!(".{}.tmp", file_name));
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&tmp, &content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    pub fn summary(&self) -> String {
        let what = match &self.kind {
            RunKind::Merge => "Merge".to_string(),
            RunKind::Split { target } => format!("Split for {target}"),
        };
        let mut line = format!(
            "{what}: {} written, {} failed",
            self.count(GroupStatus::Written),
            self.count(GroupStatus::Failed)
        );
        let removed = self.count(GroupStatus::Removed);
        if removed > 0 {
            line.push_str(&format!(", {removed} removed"));
        }
        let warnings = self.warning_count();
        if warnings > 0 {
            line.push_str(&format!(", {warnings} warnings"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::start(
            RunKind::Split { target: "b".into() },
            vec!["a".into(), "b".into()],
        );
        report.groups.push(GroupReport::failed("x/B".into(), "boom"));
        report.groups.push(GroupReport::written("x/A".into(), vec!["careful".into()]));
        report.finish();

        let path = report.save(dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "report-split-b.json");
        let loaded: RunReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, report.run_id);
        assert_eq!(loaded.kind, RunKind::Split { target: "b".into() });
        assert_eq!(loaded.groups[0].class, ClassIdentity::new("x/A"));
        assert!(loaded.has_failures());
        assert_eq!(report.summary(), "Split for b: 1 written, 1 failed, 1 warnings");
    }
}
