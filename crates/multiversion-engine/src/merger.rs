//! Class Tree Merger.
//!
//! Combines the trees of one class identity from several versions into a
//! single [`MergedClass`]. The merge is all-or-nothing: any error leaves no
//! partial output for the identity.

use crate::access;
use crate::conflict;
use crate::error::MergeError;
use crate::inheritance::{self, Hierarchy};
use crate::types::{Inheritance, MergedClass, MergedMember};
use multiversion_core::{ClassIdentity, ClassTree, MemberDecl, VersionId};
use std::collections::{BTreeMap, BTreeSet};

/// Configuration for the merge pipeline.
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Physical superclass to use for a class whose versions disagree on
    /// their superclass.
    pub pinned_superclasses: BTreeMap<ClassIdentity, ClassIdentity>,
}

pub struct Merger<H: Hierarchy> {
    hierarchy: H,
    options: MergeOptions,
}

impl<H: Hierarchy> Merger<H> {
    pub fn new(hierarchy: H, options: MergeOptions) -> Self {
        Self { hierarchy, options }
    }

    pub fn hierarchy(&self) -> &H {
        &self.hierarchy
    }

    /// Merge the trees of `identity`, given in version-provider order.
    pub fn merge(
        &self,
        identity: &ClassIdentity,
        inputs: &[(VersionId, ClassTree)],
    ) -> Result<MergedClass, MergeError> {
        if inputs.is_empty() {
            return Err(MergeError::NoVersions {
                class: identity.clone(),
            });
        }
        let mut versions = BTreeSet::new();
        for (version, tree) in inputs {
            if !versions.insert(version.clone()) {
                return Err(MergeError::DuplicateVersion {
                    class: identity.clone(),
                    version: version.clone(),
                });
            }
            if &tree.name != identity {
                return Err(MergeError::IdentityMismatch {
                    expected: identity.clone(),
                    found: tree.name.clone(),
                    version: version.clone(),
                });
            }
        }

        let class_access = access::reconcile(inputs.iter().map(|(v, t)| (v, t.access)));

        let per_version: Vec<(VersionId, Inheritance)> = inputs
            .iter()
            .map(|(v, t)| (v.clone(), Inheritance::of(t)))
            .collect();
        let inheritance = inheritance::reconcile(
            identity,
            &per_version,
            &self.hierarchy,
            self.options.pinned_superclasses.get(identity),
        )?;

        let declarations: Vec<(VersionId, Vec<MemberDecl>)> = inputs
            .iter()
            .map(|(v, t)| (v.clone(), t.members.clone()))
            .collect();
        let mut members: Vec<MergedMember> = conflict::group_members(identity, &declarations)
            .into_iter()
            .map(|group| MergedMember {
                access: access::reconcile(group.decls.iter().map(|(v, d)| (*v, d.access))),
                bodies: group
                    .decls
                    .iter()
                    .filter_map(|(v, d)| d.body.clone().map(|b| ((*v).clone(), b)))
                    .collect(),
                declared_versions: group.version_set(),
                physical_name: group.physical_name,
                declared_name: group.declared_name,
                synthetic: false,
                compiler_generated: group.is_synthetic,
                kind: group.kind,
                descriptor: group.descriptor,
                is_static: group.is_static,
            })
            .collect();
        members.extend(inheritance.bridges);
        conflict::ensure_unique(identity, &members)?;

        tracing::debug!(
            class = %identity,
            versions = versions.len(),
            members = members.len(),
            "Merged class"
        );

        Ok(MergedClass {
            identity: identity.clone(),
            versions,
            access: class_access,
            inheritance: inheritance.table,
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, CLASS_A, CLASS_B, CLASS_C};
    use crate::inheritance::NoHierarchy;
    use multiversion_core::Visibility;

    #[test]
    fn test_merge_class_a() {
        let merged = fixtures::merged_class_a();
        assert_eq!(merged.versions.len(), 2);
        let names: Vec<_> = merged.members.iter().map(|m| m.physical_name.as_str()).collect();
        assert_eq!(names, vec!["fieldA", "<init>", "methodA", "methodC", "methodB"]);

        let method_c = &merged.members[3];
        assert_eq!(method_c.access.physical, Visibility::Public);
        assert_eq!(method_c.access.for_version(&"b".into()), Visibility::Protected);

        let field_a = &merged.members[0];
        assert_eq!(field_a.declared_versions, [VersionId::new("a")].into_iter().collect());
    }

    #[test]
    fn test_merge_class_b_conflict_and_bridge() {
        let merged = fixtures::merged_class_b();
        let conflict_a = merged
            .members
            .iter()
            .find(|m| m.physical_name == "conflict$mv$a")
            .unwrap();
        assert_eq!(conflict_a.declared_name, "conflict");
        assert_eq!(conflict_a.descriptor, "()J");
        assert!(merged.members.iter().any(|m| m.physical_name == "conflict$mv$b"));

        assert!(merged.inheritance.physical.super_class.is_object());
        assert_eq!(
            merged.inheritance.for_version(&"b".into()).super_class,
            ClassIdentity::new(CLASS_A)
        );
        let bridge = merged.bridges().next().unwrap();
        assert_eq!(bridge.physical_name, "mv$castTo$com_example_ClassA");
        assert!(bridge.in_version(&"b".into()));
        assert!(!bridge.in_version(&"a".into()));
    }

    #[test]
    fn test_merge_class_c_keeps_narrow_access() {
        let merged = fixtures::merged_class_c();
        assert_eq!(merged.inheritance.physical.super_class, ClassIdentity::new(CLASS_B));
        let field = merged.members.iter().find(|m| m.physical_name == "fieldA").unwrap();
        assert_eq!(field.access.physical, Visibility::Private);
        assert!(field.access.overrides.is_empty());
    }

    #[test]
    fn test_merge_is_commutative() {
        let merger = fixtures::merger();
        for class in [CLASS_A, CLASS_B, CLASS_C] {
            let forward = fixtures::inputs(class);
            let mut backward = forward.clone();
            backward.reverse();
            let left = merger.merge(&class.into(), &forward).unwrap();
            let right = merger.merge(&class.into(), &backward).unwrap();

            assert_eq!(left.versions, right.versions);
            assert_eq!(left.access, right.access);
            assert_eq!(left.inheritance, right.inheritance);
            let mut l = left.members.clone();
            let mut r = right.members.clone();
            l.sort_by_key(|m| m.key());
            r.sort_by_key(|m| m.key());
            assert_eq!(l, r, "{class}");
        }
    }

    #[test]
    fn test_input_validation() {
        let merger = Merger::new(NoHierarchy, MergeOptions::default());
        let identity = ClassIdentity::new(CLASS_A);
        assert!(matches!(
            merger.merge(&identity, &[]),
            Err(MergeError::NoVersions { .. })
        ));

        let tree = ClassTree::new(CLASS_A, Visibility::Public);
        let dup = vec![("a".into(), tree.clone()), ("a".into(), tree.clone())];
        assert!(matches!(
            merger.merge(&identity, &dup),
            Err(MergeError::DuplicateVersion { .. })
        ));

        let wrong = vec![("a".into(), ClassTree::new(CLASS_B, Visibility::Public))];
        assert!(matches!(
            merger.merge(&identity, &wrong),
            Err(MergeError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_pinned_superclass() {
        let left = ClassTree::new("x/C", Visibility::Public).with_super("x/Left");
        let right = ClassTree::new("x/C", Visibility::Public).with_super("x/Right");
        let inputs = vec![("a".into(), left), ("b".into(), right)];

        let merger = Merger::new(NoHierarchy, MergeOptions::default());
        assert!(matches!(
            merger.merge(&"x/C".into(), &inputs),
            Err(MergeError::AmbiguousInheritance { .. })
        ));

        let mut options = MergeOptions::default();
        options.pinned_superclasses.insert("x/C".into(), "x/Base".into());
        let merged = Merger::new(NoHierarchy, options).merge(&"x/C".into(), &inputs).unwrap();
        assert_eq!(merged.inheritance.physical.super_class, ClassIdentity::new("x/Base"));
        assert_eq!(merged.bridges().count(), 2);
    }
}
