//! Conflict Resolver: decides the physical name of every member declaration.
//!
//! Declarations from all versions are grouped by
//! `(name, descriptor, kind, static)`. A group whose versions are pairwise
//! exclusive becomes one physical member. Groups from disjoint versions that
//! would collide at the source level (same method name and parameters, or
//! same field name, but a different return type, field type or static-ness)
//! are each renamed with [`mangle`]. Compiler-generated declarations never
//! count as a collision.

use crate::error::MergeError;
use crate::types::{MergedMember, MANGLE_MARKER};
use multiversion_core::descriptor;
use multiversion_core::{ClassIdentity, MemberDecl, MemberKind, VersionId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// `name$mv$<tag>`, where the tag is the lexicographically first version id
/// with every character outside `[A-Za-z0-9_]` replaced by `_`.
///
/// Deterministic and independent of input order, so a split implementation
/// can recompute it without sharing code.
pub fn mangle(name: &str, versions: &BTreeSet<VersionId>) -> String {
    match versions.first() {
        Some(first) => format!("{name}{MANGLE_MARKER}{}", first.tag()),
        None => name.to_string(),
    }
}

/// Split a mangled name into `(declared name, version tag)`.
pub fn demangle(physical: &str) -> Option<(&str, &str)> {
    physical.split_once(MANGLE_MARKER)
}

/// One physical member in the making: every declaration that merges into it.
#[derive(Debug, Clone)]
pub struct MemberGroup<'a> {
    pub physical_name: String,
    pub declared_name: String,
    pub descriptor: String,
    pub kind: MemberKind,
    pub is_static: bool,
    /// Every declaration in the group is compiler-generated.
    pub is_synthetic: bool,
    /// Versions in input order.
    pub versions: Vec<VersionId>,
    pub decls: Vec<(&'a VersionId, &'a MemberDecl)>,
}

impl MemberGroup<'_> {
    pub fn version_set(&self) -> BTreeSet<VersionId> {
        self.versions.iter().cloned().collect()
    }
}

type GroupKey = (String, String, MemberKind, bool);

/// Source-level identity: what two declarations may not share in one class.
fn collision_key(name: &str, desc: &str, kind: MemberKind) -> (String, String, MemberKind) {
    match kind {
        MemberKind::Method => (name.to_string(), descriptor::parameter_part(desc).to_string(), kind),
        MemberKind::Field => (name.to_string(), String::new(), kind),
    }
}

/// Group the declarations of every version and assign physical names.
/// Output keeps first-seen order: versions in input order, members in tree
/// order.
pub fn group_members<'a>(
    class: &ClassIdentity,
    inputs: &'a [(VersionId, Vec<MemberDecl>)],
) -> Vec<MemberGroup<'a>> {
    let mut groups: Vec<MemberGroup<'a>> = Vec::new();
    let mut by_key: HashMap<GroupKey, Vec<usize>> = HashMap::new();
    // keys declared twice by one version
    let mut repeated: HashSet<GroupKey> = HashSet::new();

    for (version, decls) in inputs {
        for decl in decls {
            let key: GroupKey = (decl.name.clone(), decl.descriptor.clone(), decl.kind, decl.is_static);
            let slots = by_key.entry(key.clone()).or_default();
            let open = slots
                .iter()
                .copied()
                .find(|&i| !groups[i].versions.contains(version));
            match open {
                Some(i) => {
                    groups[i].versions.push(version.clone());
                    groups[i].decls.push((version, decl));
                    groups[i].is_synthetic &= decl.is_synthetic;
                }
                None => {
                    if !slots.is_empty() {
                        repeated.insert(key);
                    }
                    slots.push(groups.len());
                    groups.push(MemberGroup {
                        physical_name: decl.name.clone(),
                        declared_name: decl.name.clone(),
                        descriptor: decl.descriptor.clone(),
                        kind: decl.kind,
                        is_static: decl.is_static,
                        is_synthetic: decl.is_synthetic,
                        versions: vec![version.clone()],
                        decls: vec![(version, decl)],
                    });
                }
            }
        }
    }

    let colliding = collisions(&groups);

    for (i, group) in groups.iter_mut().enumerate() {
        let key: GroupKey = (
            group.declared_name.clone(),
            group.descriptor.clone(),
            group.kind,
            group.is_static,
        );
        let collides = colliding.contains(&i);

        if let Some(name) = name_override(class, group) {
            group.physical_name = name;
        } else if collides || repeated.contains(&key) {
            group.physical_name = mangle(&group.declared_name, &group.version_set());
            tracing::debug!(
                class = %class,
                member = %group.declared_name,
                desc = %group.descriptor,
                physical = %group.physical_name,
                "Mangled conflicting member"
            );
        }
    }

    groups
}

/// Indices of groups that share a source-level identity with another group
/// and never appear in the same version as it. Groups that coexist in one
/// version were already distinct there (a covariant bridge next to its
/// target) and stay so.
fn collisions(groups: &[MemberGroup<'_>]) -> HashSet<usize> {
    let mut buckets: HashMap<(String, String, MemberKind), Vec<usize>> = HashMap::new();
    for (i, group) in groups.iter().enumerate() {
        if group.is_synthetic {
            continue;
        }
        buckets
            .entry(collision_key(&group.declared_name, &group.descriptor, group.kind))
            .or_default()
            .push(i);
    }

    let mut colliding = HashSet::new();
    for bucket in buckets.values() {
        for (n, &i) in bucket.iter().enumerate() {
            for &j in &bucket[n + 1..] {
                let disjoint = groups[i].versions.iter().all(|v| !groups[j].versions.contains(v));
                if disjoint {
                    colliding.insert(i);
                    colliding.insert(j);
                }
            }
        }
    }
    colliding
}

/// First explicit override in the group. Disagreeing overrides are logged
/// and the first one wins.
fn name_override(class: &ClassIdentity, group: &MemberGroup<'_>) -> Option<String> {
    let mut chosen: Option<&String> = None;
    for (version, decl) in &group.decls {
        if let Some(name) = &decl.name_override {
            match chosen {
                None => chosen = Some(name),
                Some(first) if first != name => tracing::warn!(
                    class = %class,
                    member = %group.declared_name,
                    version = %version,
                    kept = %first,
                    ignored = %name,
                    "Conflicting name overrides"
                ),
                Some(_) => {}
            }
        }
    }
    chosen.cloned()
}

/// No two members of a merged class may share `(physical name, descriptor,
/// kind)`. Bridges take part in the check.
pub fn ensure_unique(class: &ClassIdentity, members: &[MergedMember]) -> Result<(), MergeError> {
    let mut seen: HashMap<(String, String, MemberKind), usize> = HashMap::new();
    for (i, member) in members.iter().enumerate() {
        let key = (member.physical_name.clone(), member.descriptor.clone(), member.kind);
        if let Some(&first) = seen.get(&key) {
            let mut versions: BTreeSet<VersionId> = members[first].declared_versions.clone();
            versions.extend(member.declared_versions.iter().cloned());
            return Err(MergeError::UnresolvedConflict {
                class: class.clone(),
                name: member.declared_name.clone(),
                descriptor: member.descriptor.clone(),
                versions: versions.into_iter().collect(),
            });
        }
        seen.insert(key, i);
    }
    Ok(())
}
