use crate::class::ClassTree;
use crate::ident::{ClassIdentity, VersionId};
use dashmap::{DashMap, DashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no class tree for {class}{}", .version.as_ref().map(|v| format!(" in version {v}")).unwrap_or_default())]
    NotFound {
        class: ClassIdentity,
        version: Option<VersionId>,
    },
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt class tree {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("class group {0} is already leased")]
    Locked(ClassIdentity),
}

/// Exclusive hold on one class group's output. Released on drop, including
/// when the group fails.
pub struct GroupLease {
    class: ClassIdentity,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl GroupLease {
    pub fn new(class: ClassIdentity, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            class,
            release: Some(Box::new(release)),
        }
    }

    pub fn class(&self) -> &ClassIdentity {
        &self.class
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Where class trees live between runs. Per-version inputs are addressed by
/// `(class, version)`; merged and projected trees by class alone.
pub trait ClassTreeStore: Send + Sync {
    fn read(&self, class: &ClassIdentity, version: &VersionId) -> Result<ClassTree, StoreError>;

    fn read_merged(&self, class: &ClassIdentity) -> Result<ClassTree, StoreError>;

    fn write(&self, class: &ClassIdentity, tree: &ClassTree) -> Result<(), StoreError>;

    /// Classes present for `version`, or the unversioned classes for `None`.
    fn list(&self, version: Option<&VersionId>) -> Result<Vec<ClassIdentity>, StoreError>;

    fn lease(&self, class: &ClassIdentity) -> Result<GroupLease, StoreError>;
}

/// Directory-backed store: `<root>/<version>/<class>.json` for per-version
/// input and `<root>/<class>.json` for unversioned trees.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
    /// Top-level directories holding per-version input, left out of
    /// unversioned listings.
    versions: Vec<VersionId>,
}

impl DirStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            versions: Vec::new(),
        })
    }

    pub fn with_versions(mut self, versions: impl IntoIterator<Item = VersionId>) -> Self {
        self.versions = versions.into_iter().collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn class_path(&self, base: &Path, class: &ClassIdentity) -> PathBuf {
        base.join(format!("{}.json", class.as_str()))
    }

    fn read_path(&self, path: &Path, class: &ClassIdentity, version: Option<&VersionId>) -> Result<ClassTree, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    class: class.clone(),
                    version: version.cloned(),
                })
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn collect(&self, base: &Path, dir: &Path, out: &mut Vec<ClassIdentity>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        };
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            let name = entry.file_name();
            // Skip temp files, locks and other dotfiles
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            if path.is_dir() {
                let version_dir = dir == self.root.as_path()
                    && self.versions.iter().any(|v| name.to_str() == Some(v.as_str()));
                if !version_dir {
                    self.collect(base, &path, out)?;
                }
            } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Ok(relative) = path.with_extension("").strip_prefix(base) {
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(ClassIdentity::new(name));
                }
            }
        }
        Ok(())
    }
}

impl ClassTreeStore for DirStore {
    fn read(&self, class: &ClassIdentity, version: &VersionId) -> Result<ClassTree, StoreError> {
        let path = self.class_path(&self.root.join(version.as_str()), class);
        self.read_path(&path, class, Some(version))
    }

    fn read_merged(&self, class: &ClassIdentity) -> Result<ClassTree, StoreError> {
        let path = self.class_path(&self.root, class);
        self.read_path(&path, class, None)
    }

    /// Uses tmp+rename so readers never observe a half-written tree.
    fn write(&self, class: &ClassIdentity, tree: &ClassTree) -> Result<(), StoreError> {
        let path = self.class_path(&self.root, class);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(tree).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.tmp", file_name));
        std::fs::write(&tmp, &content).map_err(io_err)?;
        std::fs::rename(&tmp, &path).map_err(io_err)?;
        Ok(())
    }

    fn list(&self, version: Option<&VersionId>) -> Result<Vec<ClassIdentity>, StoreError> {
        let base = match version {
            Some(version) => self.root.join(version.as_str()),
            None => self.root.clone(),
        };
        let mut out = Vec::new();
        if base.is_dir() {
            self.collect(&base, &base, &mut out)?;
        }
        out.sort();
        Ok(out)
    }

    fn lease(&self, class: &ClassIdentity) -> Result<GroupLease, StoreError> {
        let path = self.root.join(format!("{}.lock", class.as_str()));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        // Lock files are dotted so listings skip them
        let lock = path.with_file_name(format!(
            ".{}",
            path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default()
        ));
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(_) => Ok(GroupLease::new(class.clone(), move || {
                if let Err(e) = std::fs::remove_file(&lock) {
                    tracing::warn!(path = %lock.display(), error = %e, "Failed to release lease");
                }
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::Locked(class.clone())),
            Err(source) => Err(StoreError::Io { path: lock, source }),
        }
    }
}

/// In-memory store, for embedding the engine and for tests.
#[derive(Default, Clone)]
pub struct MemoryStore {
    trees: Arc<DashMap<(Option<VersionId>, ClassIdentity), ClassTree>>,
    leases: Arc<DashSet<ClassIdentity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, version: Option<VersionId>, tree: ClassTree) {
        self.trees.insert((version, tree.name.clone()), tree);
    }

    pub fn is_leased(&self, class: &ClassIdentity) -> bool {
        self.leases.contains(class)
    }
}

impl ClassTreeStore for MemoryStore {
    fn read(&self, class: &ClassIdentity, version: &VersionId) -> Result<ClassTree, StoreError> {
        self.trees
            .get(&(Some(version.clone()), class.clone()))
            .map(|t| t.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                class: class.clone(),
                version: Some(version.clone()),
            })
    }

    fn read_merged(&self, class: &ClassIdentity) -> Result<ClassTree, StoreError> {
        self.trees
            .get(&(None, class.clone()))
            .map(|t| t.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                class: class.clone(),
                version: None,
            })
    }

    fn write(&self, class: &ClassIdentity, tree: &ClassTree) -> Result<(), StoreError> {
        self.trees.insert((None, class.clone()), tree.clone());
        Ok(())
    }

    fn list(&self, version: Option<&VersionId>) -> Result<Vec<ClassIdentity>, StoreError> {
        let mut out: Vec<ClassIdentity> = self
            .trees
            .iter()
            .filter(|entry| entry.key().0.as_ref() == version)
            .map(|entry| entry.key().1.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    fn lease(&self, class: &ClassIdentity) -> Result<GroupLease, StoreError> {
        if !self.leases.insert(class.clone()) {
            return Err(StoreError::Locked(class.clone()));
        }
        let leases = self.leases.clone();
        let held = class.clone();
        Ok(GroupLease::new(class.clone(), move || {
            leases.remove(&held);
        }))
    }
}
