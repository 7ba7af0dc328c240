use crate::pool::run_groups;
use crate::report::{GroupReport, RunKind, RunReport};
use multiversion_core::{ClassIdentity, ClassTree, ClassTreeStore, VersionId};
use multiversion_engine::verify;
use multiversion_engine::{
    decode, ClassDirectives, ClassView, HookRegistry, Linker, MergedClass, MergedIndex, Projection,
    Projector, RedirectTable,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Parameters of one split run.
#[derive(Debug, Clone)]
pub struct SplitRun {
    /// Versions a class without merge annotations is assumed to exist in.
    pub versions: Vec<VersionId>,
    pub target: VersionId,
    /// Fail classes that still reference something absent in the target.
    pub verify: bool,
    pub threads: usize,
}

struct Loaded {
    index: MergedIndex,
    directives: HashMap<ClassIdentity, ClassDirectives>,
    failed: Vec<(ClassIdentity, String)>,
}

/// Read and decode every stored class. Trees without merge annotations are
/// taken as identical in every configured version.
fn load(store: &dyn ClassTreeStore, versions: &BTreeSet<VersionId>) -> anyhow::Result<Loaded> {
    let classes = store
        .list(None)
        .map_err(|e| anyhow::anyhow!("Failed to list merged classes: {e}"))?;
    let mut loaded = Loaded {
        index: MergedIndex::new(),
        directives: HashMap::new(),
        failed: Vec::new(),
    };
    for class in classes {
        let decoded = store
            .read_merged(&class)
            .map_err(|e| e.to_string())
            .and_then(|tree| {
                let merged = match tree.merged {
                    Some(_) => decode(&tree).map_err(|e| e.to_string())?,
                    None => MergedClass::universal(&tree, versions),
                };
                let directives = ClassDirectives::from_tree(&tree).map_err(|e| e.to_string())?;
                Ok((merged, directives))
            });
        match decoded {
            Ok((merged, directives)) => {
                loaded.directives.insert(class, directives);
                loaded.index.insert(merged);
            }
            Err(e) => {
                tracing::error!(class = %class, error = %e, "Failed to load class");
                loaded.failed.push((class, e));
            }
        }
    }
    Ok(loaded)
}

/// Project every stored class for `run.target`, link the projections
/// against each other and write them to `output`.
///
/// Projection runs first for every class: call-site redirects and class
/// stubs one class records apply to all others, so linking waits until all
/// are known.
pub async fn run_split(
    merged: Arc<dyn ClassTreeStore>,
    output: Arc<dyn ClassTreeStore>,
    hooks: Arc<HookRegistry>,
    run: SplitRun,
) -> anyhow::Result<RunReport> {
    let target = run.target.clone();
    let mut report = RunReport::start(RunKind::Split { target: target.clone() }, run.versions.clone());

    let versions: BTreeSet<VersionId> = run.versions.iter().cloned().collect();
    let known_version = versions.clone();
    let loaded = tokio::task::spawn_blocking(move || load(merged.as_ref(), &known_version)).await??;

    if !versions.contains(&target) && !loaded.index.classes().any(|c| c.versions.contains(&target)) {
        anyhow::bail!("Unknown target version: {target}");
    }
    for (class, e) in loaded.failed {
        report.groups.push(GroupReport::failed(class, e));
    }

    let mut classes: Vec<ClassIdentity> = loaded.index.classes().map(|c| c.identity.clone()).collect();
    classes.sort();
    tracing::info!(classes = classes.len(), target = %target, "Starting split");

    let index = Arc::new(loaded.index);
    let directives = Arc::new(loaded.directives);

    // Phase 1: project
    let projected = {
        let index = index.clone();
        let target = target.clone();
        run_groups(classes, run.threads, move |class| {
            let merged = index
                .get(class)
                .ok_or_else(|| anyhow::anyhow!("{class} vanished from the index"))?;
            let empty = ClassDirectives::default();
            let class_directives = directives.get(class).unwrap_or(&empty);
            let lookup = |owner: &ClassIdentity, version: &VersionId| -> Option<ClassView> {
                index.view(owner, version)
            };
            let projector = Projector::new(hooks.as_ref(), &lookup);
            Ok(projector.project(merged, class_directives, &target)?)
        })
        .await
    };

    let mut redirects = RedirectTable::new();
    let mut trees: HashMap<ClassIdentity, ClassTree> = HashMap::new();
    let mut warnings: BTreeMap<ClassIdentity, Vec<String>> = BTreeMap::new();
    for (class, result) in projected {
        match result {
            Ok(Projection::Projected(out)) => {
                out.redirects.into_iter().for_each(|r| redirects.add(r));
                out.type_remaps.into_iter().for_each(|t| redirects.add_type(t));
                warnings.insert(class.clone(), out.warnings.iter().map(ToString::to_string).collect());
                trees.insert(class, out.tree);
            }
            Ok(Projection::Removed) => report.groups.push(GroupReport::removed(class, Vec::new())),
            Err(e) => report.groups.push(GroupReport::failed(class, e)),
        }
    }
    tracing::debug!(
        redirects = redirects.len(),
        type_remaps = redirects.type_count(),
        "Pooled call-site redirects"
    );

    // Phase 2: link, verify, write
    let mut classes: Vec<ClassIdentity> = trees.keys().cloned().collect();
    classes.sort();
    let trees = Arc::new(trees);
    let redirects = Arc::new(redirects);
    let linked = {
        let target = target.clone();
        run_groups(classes, run.threads, move |class| {
            let mut tree = trees
                .get(class)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("{class} has no projection"))?;
            Linker::new(&index, &redirects, &target).link(&mut tree)?;
            if run.verify {
                verify::check(&tree, &target, &index)?;
            }
            let _lease = output.lease(class)?;
            output.write(class, &tree)?;
            Ok(())
        })
        .await
    };

    for (class, result) in linked {
        let class_warnings = warnings.remove(&class).unwrap_or_default();
        report.groups.push(match result {
            Ok(()) => GroupReport::written(class, class_warnings),
            Err(e) => GroupReport {
                warnings: class_warnings,
                ..GroupReport::failed(class, e)
            },
        });
    }
    report.finish();
    tracing::info!("{}", report.summary());
    Ok(report)
}
