//! Access Reconciler: the physical visibility is the widest any version
//! declared, and versions that declared something narrower keep an override.

use crate::types::VersionAccessTable;
use multiversion_core::{VersionId, Visibility};
use std::collections::BTreeMap;

pub fn reconcile<'a, I>(declared: I) -> VersionAccessTable
where
    I: IntoIterator<Item = (&'a VersionId, Visibility)>,
{
    let declared: Vec<_> = declared.into_iter().collect();
    let physical = declared
        .iter()
        .map(|(_, access)| *access)
        .max()
        .unwrap_or(Visibility::Public);
    let overrides: BTreeMap<VersionId, Visibility> = declared
        .into_iter()
        .filter(|(_, access)| *access != physical)
        .map(|(version, access)| (version.clone(), access))
        .collect();
    VersionAccessTable { physical, overrides }
}
