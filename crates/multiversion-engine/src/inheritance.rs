//! Inheritance Reconciler.
//!
//! Picks the physical superclass and interface list of a merged class and
//! records per-version overrides. Versions whose real superclass differs from
//! the physical one get a synthetic cast accessor (a "bridge") so code
//! compiled against the merged class can still reach the real superclass.

use crate::error::MergeError;
use crate::types::{
    Inheritance, MergedMember, VersionAccessTable, VersionInheritanceTable, BRIDGE_PREFIX,
};
use multiversion_core::{ClassIdentity, ClassTree, MemberKind, VersionId, Visibility};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Read-only `(class, version) -> superclass` lookup used to walk
/// superclass chains.
pub trait Hierarchy: Send + Sync {
    /// `None` when the class is unknown in that version.
    fn super_of(&self, class: &ClassIdentity, version: &VersionId) -> Option<ClassIdentity>;
}

/// Hierarchy built from every input tree of a merge run.
#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    supers: HashMap<(VersionId, ClassIdentity), ClassIdentity>,
}

impl HierarchyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, version: VersionId, class: ClassIdentity, super_class: ClassIdentity) {
        self.supers.insert((version, class), super_class);
    }

    pub fn from_trees<'a, I>(trees: I) -> Self
    where
        I: IntoIterator<Item = (&'a VersionId, &'a ClassTree)>,
    {
        let mut index = Self::new();
        for (version, tree) in trees {
            index.insert(version.clone(), tree.name.clone(), tree.super_class.clone());
        }
        index
    }

    pub fn len(&self) -> usize {
        self.supers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supers.is_empty()
    }
}

impl Hierarchy for HierarchyIndex {
    fn super_of(&self, class: &ClassIdentity, version: &VersionId) -> Option<ClassIdentity> {
        self.supers.get(&(version.clone(), class.clone())).cloned()
    }
}

/// A hierarchy that knows nothing; only agreeing versions or a pinned
/// superclass can be merged with it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHierarchy;

impl Hierarchy for NoHierarchy {
    fn super_of(&self, _class: &ClassIdentity, _version: &VersionId) -> Option<ClassIdentity> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct InheritanceOutcome {
    pub table: VersionInheritanceTable,
    pub bridges: Vec<MergedMember>,
}

struct Chain {
    classes: Vec<ClassIdentity>,
    truncated: bool,
}

/// Superclass chain of `version` starting at its direct superclass. Stops at
/// the root, at an unknown link or at a cycle.
fn chain(start: &ClassIdentity, version: &VersionId, hierarchy: &dyn Hierarchy) -> Chain {
    let mut classes = vec![start.clone()];
    let mut current = start.clone();
    loop {
        if current.is_object() {
            return Chain {
                classes,
                truncated: false,
            };
        }
        match hierarchy.super_of(&current, version) {
            Some(next) if !classes.contains(&next) => {
                classes.push(next.clone());
                current = next;
            }
            _ => {
                return Chain {
                    classes,
                    truncated: true,
                }
            }
        }
    }
}

/// Reconcile the inheritance of one class across versions. `per_version`
/// is in input order.
pub fn reconcile(
    class: &ClassIdentity,
    per_version: &[(VersionId, Inheritance)],
    hierarchy: &dyn Hierarchy,
    pinned: Option<&ClassIdentity>,
) -> Result<InheritanceOutcome, MergeError> {
    let supers: BTreeMap<VersionId, ClassIdentity> = per_version
        .iter()
        .map(|(v, i)| (v.clone(), i.super_class.clone()))
        .collect();
    let distinct: BTreeSet<&ClassIdentity> = supers.values().collect();

    let physical_super = match (distinct.len(), pinned) {
        (0, _) => ClassIdentity::object(),
        (1, _) => distinct
            .into_iter()
            .next()
            .cloned()
            .unwrap_or_else(ClassIdentity::object),
        (_, Some(pinned)) => pinned.clone(),
        (_, None) => common_ancestor(class, per_version, hierarchy, &supers)?,
    };

    let first_interfaces = per_version.first().map(|(_, i)| &i.interfaces);
    let physical_interfaces: Vec<ClassIdentity> =
        if per_version.iter().all(|(_, i)| Some(&i.interfaces) == first_interfaces) {
            first_interfaces.cloned().unwrap_or_default()
        } else {
            per_version
                .iter()
                .flat_map(|(_, i)| i.interfaces.iter().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };

    let physical = Inheritance {
        super_class: physical_super,
        interfaces: physical_interfaces,
    };
    let overrides: BTreeMap<VersionId, Inheritance> = per_version
        .iter()
        .filter(|(_, i)| *i != physical)
        .map(|(v, i)| (v.clone(), i.clone()))
        .collect();

    let bridges = bridges(&physical.super_class, per_version);
    if !bridges.is_empty() {
        tracing::debug!(
            class = %class,
            physical = %physical.super_class,
            bridges = bridges.len(),
            "Versions disagree on superclass"
        );
    }

    Ok(InheritanceOutcome {
        table: VersionInheritanceTable { physical, overrides },
        bridges,
    })
}

/// Deepest class every version's chain goes through. The root is common to
/// all chains. Fails when a truncated chain leaves the answer in doubt.
fn common_ancestor(
    class: &ClassIdentity,
    per_version: &[(VersionId, Inheritance)],
    hierarchy: &dyn Hierarchy,
    supers: &BTreeMap<VersionId, ClassIdentity>,
) -> Result<ClassIdentity, MergeError> {
    let chains: Vec<Chain> = per_version
        .iter()
        .map(|(v, i)| chain(&i.super_class, v, hierarchy))
        .collect();

    let deepest = chains
        .first()
        .and_then(|first| {
            first
                .classes
                .iter()
                .find(|c| chains.iter().all(|other| other.classes.contains(c)))
                .cloned()
        })
        .unwrap_or_else(ClassIdentity::object);

    let complete = chains.iter().all(|c| !c.truncated);
    let is_direct_super = supers.values().any(|s| *s == deepest);
    if complete || is_direct_super {
        Ok(deepest)
    } else {
        Err(MergeError::AmbiguousInheritance {
            class: class.clone(),
            supers: supers.clone(),
        })
    }
}

/// One cast accessor per distinct real superclass that is neither the
/// physical superclass nor the root.
fn bridges(physical: &ClassIdentity, per_version: &[(VersionId, Inheritance)]) -> Vec<MergedMember> {
    let mut by_super: Vec<(ClassIdentity, BTreeSet<VersionId>)> = Vec::new();
    for (version, inheritance) in per_version {
        let real = &inheritance.super_class;
        if real == physical || real.is_object() {
            continue;
        }
        match by_super.iter_mut().find(|(s, _)| s == real) {
            Some((_, versions)) => {
                versions.insert(version.clone());
            }
            None => by_super.push((real.clone(), [version.clone()].into_iter().collect())),
        }
    }

    by_super
        .into_iter()
        .map(|(real, versions)| {
            let name = format!("{BRIDGE_PREFIX}{}", real.flattened());
            MergedMember {
                physical_name: name.clone(),
                declared_name: name,
                declared_versions: versions,
                synthetic: true,
                compiler_generated: false,
                kind: MemberKind::Method,
                descriptor: format!("(){}", real.descriptor()),
                is_static: false,
                access: VersionAccessTable::uniform(Visibility::Public),
                bodies: BTreeMap::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inh(super_class: &str, interfaces: &[&str]) -> Inheritance {
        Inheritance {
            super_class: super_class.into(),
            interfaces: interfaces.iter().map(|i| ClassIdentity::new(*i)).collect(),
        }
    }

    fn index(entries: &[(&str, &str, &str)]) -> HierarchyIndex {
        let mut index = HierarchyIndex::new();
        for (version, class, super_class) in entries {
            index.insert((*version).into(), (*class).into(), (*super_class).into());
        }
        index
    }

    #[test]
    fn test_agreeing_versions() {
        let per_version = vec![
            ("a".into(), inh("x/Base", &["java/lang/Runnable"])),
            ("b".into(), inh("x/Base", &["java/lang/Runnable"])),
        ];
        let out = reconcile(&"x/C".into(), &per_version, &NoHierarchy, None).unwrap();
        assert_eq!(out.table.physical, inh("x/Base", &["java/lang/Runnable"]));
        assert!(out.table.overrides.is_empty());
        assert!(out.bridges.is_empty());
    }

    #[test]
    fn test_superclass_only_in_one_version() {
        let per_version = vec![
            ("a".into(), inh("java/lang/Object", &[])),
            ("b".into(), inh("com/example/ClassA", &[])),
        ];
        let hierarchy = index(&[("b", "com/example/ClassA", "java/lang/Object")]);
        let out = reconcile(&"com/example/ClassB".into(), &per_version, &hierarchy, None).unwrap();
        assert!(out.table.physical.super_class.is_object());
        assert_eq!(out.table.overrides.len(), 1);
        assert_eq!(
            out.table.for_version(&"b".into()).super_class,
            ClassIdentity::new("com/example/ClassA")
        );

        assert_eq!(out.bridges.len(), 1);
        let bridge = &out.bridges[0];
        assert_eq!(bridge.physical_name, "mv$castTo$com_example_ClassA");
        assert_eq!(bridge.descriptor, "()Lcom/example/ClassA;");
        assert!(bridge.synthetic);
        assert_eq!(bridge.declared_versions, [VersionId::new("b")].into_iter().collect());
    }

    #[test]
    fn test_deepest_common_ancestor() {
        let per_version = vec![
            ("a".into(), inh("x/Left", &[])),
            ("b".into(), inh("x/Right", &[])),
        ];
        let hierarchy = index(&[
            ("a", "x/Left", "x/Base"),
            ("a", "x/Base", "java/lang/Object"),
            ("b", "x/Right", "x/Base"),
            ("b", "x/Base", "java/lang/Object"),
        ]);
        let out = reconcile(&"x/C".into(), &per_version, &hierarchy, None).unwrap();
        assert_eq!(out.table.physical.super_class, ClassIdentity::new("x/Base"));
        assert_eq!(out.bridges.len(), 2);
    }

    #[test]
    fn test_truncated_chain_is_ambiguous_unless_pinned() {
        let per_version = vec![
            ("a".into(), inh("x/Left", &[])),
            ("b".into(), inh("x/Right", &[])),
        ];
        let err = reconcile(&"x/C".into(), &per_version, &NoHierarchy, None).unwrap_err();
        assert!(matches!(err, MergeError::AmbiguousInheritance { .. }));

        let pinned = ClassIdentity::new("x/Base");
        let out = reconcile(&"x/C".into(), &per_version, &NoHierarchy, Some(&pinned)).unwrap();
        assert_eq!(out.table.physical.super_class, pinned);
    }

    #[test]
    fn test_truncated_chain_through_direct_super() {
        // a's chain is unknown past x/Base, but x/Base is b's direct super
        let per_version = vec![
            ("a".into(), inh("x/Left", &[])),
            ("b".into(), inh("x/Base", &[])),
        ];
        let hierarchy = index(&[("a", "x/Left", "x/Base")]);
        let out = reconcile(&"x/C".into(), &per_version, &hierarchy, None).unwrap();
        assert_eq!(out.table.physical.super_class, ClassIdentity::new("x/Base"));
    }

    #[test]
    fn test_cyclic_hierarchy_is_truncated() {
        let hierarchy = index(&[("a", "x/P", "x/Q"), ("a", "x/Q", "x/P")]);
        let c = chain(&"x/P".into(), &"a".into(), &hierarchy);
        assert!(c.truncated);
        assert_eq!(c.classes.len(), 2);
    }

    #[test]
    fn test_interfaces_union_and_overrides() {
        let per_version = vec![
            ("a".into(), inh("java/lang/Object", &["x/I2"])),
            ("b".into(), inh("java/lang/Object", &["x/I1", "x/I2"])),
        ];
        let out = reconcile(&"x/C".into(), &per_version, &NoHierarchy, None).unwrap();
        assert_eq!(out.table.physical.interfaces, vec![ClassIdentity::new("x/I1"), ClassIdentity::new("x/I2")]);
        assert_eq!(out.table.overrides.len(), 1);
        assert_eq!(out.table.for_version(&"a".into()).interfaces, vec![ClassIdentity::new("x/I2")]);
        assert!(out.bridges.is_empty());
    }
}
