use crate::pool::run_groups;
use crate::report::{GroupReport, RunKind, RunReport};
use multiversion_core::{ClassIdentity, ClassTree, ClassTreeStore, VersionId};
use multiversion_engine::{encode, HierarchyIndex, MergeOptions, Merger};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Parameters of one merge run.
#[derive(Debug, Clone)]
pub struct MergeRun {
    /// Versions in provider order.
    pub versions: Vec<VersionId>,
    pub options: MergeOptions,
    pub threads: usize,
}

type Inputs = Result<Vec<(VersionId, ClassTree)>, String>;

/// Read every version's trees, grouped by class. A tree that cannot be read
/// fails its group only; a version that cannot be listed fails the run.
fn load_inputs(
    store: &dyn ClassTreeStore,
    versions: &[VersionId],
) -> anyhow::Result<BTreeMap<ClassIdentity, Inputs>> {
    let mut groups: BTreeMap<ClassIdentity, Inputs> = BTreeMap::new();
    for version in versions {
        let classes = store
            .list(Some(version))
            .map_err(|e| anyhow::anyhow!("Failed to list version {version}: {e}"))?;
        tracing::debug!(version = %version, classes = classes.len(), "Listed version");
        for class in classes {
            let read = store
                .read(&class, version)
                .map_err(|e| e.to_string());
            let group = groups.entry(class).or_insert_with(|| Ok(Vec::new()));
            match read {
                Ok(tree) => {
                    if let Ok(trees) = group {
                        trees.push((version.clone(), tree));
                    }
                }
                // keep the first error of the group
                Err(e) => {
                    if group.is_ok() {
                        *group = Err(e);
                    }
                }
            }
        }
    }
    Ok(groups)
}

/// Merge every class group found in `input` and write the annotated result
/// to `output`.
pub async fn run_merge(
    input: Arc<dyn ClassTreeStore>,
    output: Arc<dyn ClassTreeStore>,
    run: MergeRun,
) -> anyhow::Result<RunReport> {
    let mut report = RunReport::start(RunKind::Merge, run.versions.clone());

    let versions = run.versions.clone();
    let groups = tokio::task::spawn_blocking(move || load_inputs(input.as_ref(), &versions)).await??;

    let hierarchy = HierarchyIndex::from_trees(
        groups
            .values()
            .filter_map(|g| g.as_ref().ok())
            .flatten()
            .map(|(v, t)| (v, t)),
    );
    tracing::info!(
        classes = groups.len(),
        versions = run.versions.len(),
        known_supers = hierarchy.len(),
        "Starting merge"
    );

    let classes: Vec<ClassIdentity> = groups.keys().cloned().collect();
    let groups = Arc::new(groups);
    let merger = Arc::new(Merger::new(hierarchy, run.options));

    let results = run_groups(classes, run.threads, move |class| {
        let inputs = match groups.get(class) {
            Some(Ok(inputs)) => inputs,
            Some(Err(e)) => anyhow::bail!("{e}"),
            None => anyhow::bail!("no input for {class}"),
        };
        let _lease = output.lease(class)?;
        let merged = merger.merge(class, inputs)?;
        output.write(class, &encode(&merged))?;
        tracing::debug!(class = %class, members = merged.members.len(), "Wrote merged class");
        Ok(())
    })
    .await;

    for (class, result) in results {
        report.groups.push(match result {
            Ok(()) => GroupReport::written(class, Vec::new()),
            Err(e) => GroupReport::failed(class, e),
        });
    }
    report.finish();
    tracing::info!("{}", report.summary());
    Ok(report)
}
