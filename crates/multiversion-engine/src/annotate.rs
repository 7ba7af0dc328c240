//! Annotation codec.
//!
//! Encodes a [`MergedClass`] as an annotated physical [`ClassTree`] (the
//! stored merge output), decodes it back, and turns the split-side
//! annotations authors place on code into [`Directive`]s.

use crate::error::SchemaError;
use crate::types::{
    Directive, DirectiveKind, Inheritance, MergedClass, MergedMember, Ref, VersionAccessTable,
    VersionInheritanceTable,
};
use multiversion_core::descriptor;
use multiversion_core::schema::{
    AccessAnnotation, DirectiveAnnotation, InheritanceAnnotation, MergedClassAnnotation,
    MergedMemberAnnotation, RefAnnotation,
};
use multiversion_core::{
    Body, ClassIdentity, ClassTree, MemberDecl, MemberKey, MemberKind, RuntimeFault, VersionId,
    Visibility,
};
use std::collections::{BTreeMap, BTreeSet};

// ──────────────────────────────────────────────
// Merge side
// ──────────────────────────────────────────────

/// Override entries grouped by equal value, each with sorted versions.
fn access_annotations(table: &VersionAccessTable) -> Vec<AccessAnnotation> {
    let mut grouped: BTreeMap<Visibility, Vec<VersionId>> = BTreeMap::new();
    for (version, access) in &table.overrides {
        grouped.entry(*access).or_default().push(version.clone());
    }
    grouped
        .into_iter()
        .rev()
        .map(|(access, versions)| AccessAnnotation {
            value: access.as_str().to_string(),
            versions,
        })
        .collect()
}

fn inheritance_annotations(table: &VersionInheritanceTable) -> Vec<InheritanceAnnotation> {
    let mut grouped: Vec<(&Inheritance, Vec<VersionId>)> = Vec::new();
    for (version, inheritance) in &table.overrides {
        match grouped.iter_mut().find(|(i, _)| *i == inheritance) {
            Some((_, versions)) => versions.push(version.clone()),
            None => grouped.push((inheritance, vec![version.clone()])),
        }
    }
    grouped
        .into_iter()
        .map(|(inheritance, versions)| InheritanceAnnotation {
            versions,
            super_class: if inheritance.super_class == table.physical.super_class {
                String::new()
            } else {
                inheritance.super_class.as_str().to_string()
            },
            interfaces: inheritance
                .interfaces
                .iter()
                .map(|i| i.as_str().to_string())
                .collect(),
        })
        .collect()
}

/// Body of the physical member. Methods get a placeholder that fails when
/// reached; abstract-everywhere methods and fields get none.
fn physical_body(class: &ClassIdentity, member: &MergedMember) -> Option<Body> {
    if member.is_field() || (member.bodies.is_empty() && !member.synthetic) {
        return None;
    }
    Some(Body::fails(RuntimeFault::CrossVersionMisuse {
        owner: class.clone(),
        member: member.declared_name.clone(),
        allowed: member.declared_versions.iter().cloned().collect(),
    }))
}

pub fn encode(merged: &MergedClass) -> ClassTree {
    let members = merged
        .members
        .iter()
        .map(|member| MemberDecl {
            name: member.physical_name.clone(),
            descriptor: member.descriptor.clone(),
            kind: member.kind,
            is_static: member.is_static,
            is_synthetic: member.compiler_generated,
            access: member.access.physical,
            body: physical_body(&merged.identity, member),
            version_bodies: member.bodies.clone(),
            name_override: None,
            merged: Some(MergedMemberAnnotation {
                name: if member.is_mangled() {
                    member.declared_name.clone()
                } else {
                    String::new()
                },
                versions: member.declared_versions.iter().cloned().collect(),
                synthetic: member.synthetic,
                access: access_annotations(&member.access),
            }),
            directives: Vec::new(),
        })
        .collect();

    let mut tree = ClassTree::new(merged.identity.clone(), merged.access.physical)
        .with_super(merged.inheritance.physical.super_class.clone());
    tree.interfaces = merged.inheritance.physical.interfaces.clone();
    tree.members = members;
    tree.merged = Some(MergedClassAnnotation {
        versions: merged.versions.iter().cloned().collect(),
        access: access_annotations(&merged.access),
        inheritance: inheritance_annotations(&merged.inheritance),
    });
    tree
}

fn check_version(
    class: &ClassIdentity,
    versions: &BTreeSet<VersionId>,
    version: &VersionId,
    site: impl FnOnce() -> String,
) -> Result<(), SchemaError> {
    if versions.contains(version) {
        Ok(())
    } else {
        Err(SchemaError::UnknownVersion {
            class: class.clone(),
            site: site(),
            version: version.clone(),
        })
    }
}

fn decode_access(
    class: &ClassIdentity,
    physical: Visibility,
    annotations: &[AccessAnnotation],
    versions: &BTreeSet<VersionId>,
    site: &str,
) -> Result<VersionAccessTable, SchemaError> {
    let mut table = VersionAccessTable::uniform(physical);
    for annotation in annotations {
        let access: Visibility = annotation.value.parse().map_err(|_| SchemaError::BadAccess {
            class: class.clone(),
            value: annotation.value.clone(),
        })?;
        for version in &annotation.versions {
            check_version(class, versions, version, || site.to_string())?;
            table.overrides.insert(version.clone(), access);
        }
    }
    Ok(table)
}

/// Decode a stored merge output. Members without a merged-member annotation
/// were added to the merged class by hand and count as present in every
/// version.
pub fn decode(tree: &ClassTree) -> Result<MergedClass, SchemaError> {
    let class = &tree.name;
    let annotation = tree
        .merged
        .as_ref()
        .ok_or_else(|| SchemaError::NotMerged(class.clone()))?;
    let versions: BTreeSet<VersionId> = annotation.versions.iter().cloned().collect();

    let access = decode_access(class, tree.access, &annotation.access, &versions, "class access")?;

    let physical = Inheritance::of(tree);
    let mut inheritance = VersionInheritanceTable::uniform(physical.clone());
    for entry in &annotation.inheritance {
        let value = Inheritance {
            super_class: if entry.super_class.is_empty() {
                physical.super_class.clone()
            } else {
                ClassIdentity::new(entry.super_class.as_str())
            },
            interfaces: entry.interfaces.iter().map(|i| ClassIdentity::new(i.as_str())).collect(),
        };
        for version in &entry.versions {
            check_version(class, &versions, version, || "inheritance".to_string())?;
            inheritance.overrides.insert(version.clone(), value.clone());
        }
    }

    let mut members = Vec::with_capacity(tree.members.len());
    for decl in &tree.members {
        let member = match &decl.merged {
            Some(ann) => {
                let site = || format!("member {}", decl.key());
                let declared_versions: BTreeSet<VersionId> = ann.versions.iter().cloned().collect();
                for version in declared_versions.iter().chain(decl.version_bodies.keys()) {
                    check_version(class, &versions, version, site)?;
                }
                MergedMember {
                    physical_name: decl.name.clone(),
                    declared_name: if ann.name.is_empty() {
                        decl.name.clone()
                    } else {
                        ann.name.clone()
                    },
                    declared_versions,
                    synthetic: ann.synthetic,
                    compiler_generated: decl.is_synthetic,
                    kind: decl.kind,
                    descriptor: decl.descriptor.clone(),
                    is_static: decl.is_static,
                    access: decode_access(class, decl.access, &ann.access, &versions, &site())?,
                    bodies: decl.version_bodies.clone(),
                }
            }
            None => MergedMember {
                physical_name: decl.name.clone(),
                declared_name: decl.name.clone(),
                declared_versions: versions.clone(),
                synthetic: false,
                compiler_generated: decl.is_synthetic,
                kind: decl.kind,
                descriptor: decl.descriptor.clone(),
                is_static: decl.is_static,
                access: VersionAccessTable::uniform(decl.access),
                bodies: match &decl.body {
                    Some(body) => versions.iter().map(|v| (v.clone(), body.clone())).collect(),
                    None => BTreeMap::new(),
                },
            },
        };
        members.push(member);
    }

    Ok(MergedClass {
        identity: class.clone(),
        versions,
        access,
        inheritance,
        members,
    })
}

// ──────────────────────────────────────────────
// Split side
// ──────────────────────────────────────────────

/// Every directive found on one class tree, by attachment site. Member
/// directives are keyed by the member's key in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDirectives {
    pub class: Vec<Directive>,
    pub super_class: Vec<Directive>,
    pub interfaces: BTreeMap<ClassIdentity, Vec<Directive>>,
    pub members: BTreeMap<MemberKey, Vec<Directive>>,
}

impl ClassDirectives {
    pub fn from_tree(tree: &ClassTree) -> Result<Self, SchemaError> {
        let site = |annotations: &[DirectiveAnnotation]| -> Result<Vec<Directive>, SchemaError> {
            annotations
                .iter()
                .map(|a| directive(&tree.name, None, a))
                .collect()
        };

        let mut out = ClassDirectives {
            class: site(&tree.directives)?,
            super_class: site(&tree.super_directives)?,
            ..Default::default()
        };
        for (interface, annotations) in &tree.interface_directives {
            out.interfaces.insert(interface.clone(), site(annotations)?);
        }
        for decl in &tree.members {
            if decl.directives.is_empty() {
                continue;
            }
            let directives = decl
                .directives
                .iter()
                .map(|a| directive(&tree.name, Some(decl), a))
                .collect::<Result<Vec<_>, _>>()?;
            out.members.insert(decl.key(), directives);
        }
        Ok(out)
    }

    pub fn for_member(&self, key: &MemberKey) -> &[Directive] {
        self.members.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.class.is_empty()
            && self.super_class.is_empty()
            && self.interfaces.is_empty()
            && self.members.is_empty()
    }
}

fn directive(
    class: &ClassIdentity,
    member: Option<&MemberDecl>,
    annotation: &DirectiveAnnotation,
) -> Result<Directive, SchemaError> {
    let versions: BTreeSet<VersionId> = annotation.versions().iter().cloned().collect();
    let (kind, target, receiver) = match annotation {
        DirectiveAnnotation::Remove { .. } => (DirectiveKind::Remove, None, false),
        DirectiveAnnotation::Replace { target, field, .. } => {
            let (target, receiver) = default_ref(class, member, target, *field, true);
            (DirectiveKind::Replace, target, receiver)
        }
        DirectiveAnnotation::Stub { target, field, .. } => {
            let (target, receiver) = default_ref(class, member, target, *field, false);
            (DirectiveKind::Stub, target, receiver)
        }
        DirectiveAnnotation::Modify { target, field, .. } => {
            if target.value.is_empty() || target.member.is_empty() {
                return Err(SchemaError::MissingRef {
                    class: class.clone(),
                    member: member.map(|m| m.name.clone()).unwrap_or_default(),
                });
            }
            let reference = Ref {
                owner: ClassIdentity::new(target.value.as_str()),
                member: target.member.clone(),
                descriptor: target.desc.clone(),
                is_field: *field || is_field_desc(&target.desc),
            };
            (DirectiveKind::Modify, Some(reference), false)
        }
    };
    Ok(Directive {
        kind,
        versions,
        target,
        receiver,
    })
}

fn is_field_desc(desc: &str) -> bool {
    !desc.is_empty() && !descriptor::is_method(desc)
}

/// Fill in the parts of a ref the author left empty.
///
/// An empty owner is the member's first parameter type, which then stands
/// for the receiver. Without such a parameter, a `Replace` points into its
/// own class and a `Stub` has no target. An empty member name is the
/// annotated member's own name. An empty descriptor is derived from the
/// member's descriptor. On a class or edge site only an explicit owner
/// counts.
fn default_ref(
    class: &ClassIdentity,
    member: Option<&MemberDecl>,
    annotation: &RefAnnotation,
    field: bool,
    own_class_fallback: bool,
) -> (Option<Ref>, bool) {
    let is_field = field || is_field_desc(&annotation.desc);
    let Some(member) = member else {
        let reference = (!annotation.value.is_empty()).then(|| Ref {
            owner: ClassIdentity::new(annotation.value.as_str()),
            member: annotation.member.clone(),
            descriptor: annotation.desc.clone(),
            is_field,
        });
        return (reference, false);
    };

    let params: Vec<&str> = if member.kind == MemberKind::Method {
        descriptor::parameter_types(&member.descriptor).unwrap_or_default()
    } else {
        Vec::new()
    };

    let (owner, receiver) = if !annotation.value.is_empty() {
        (ClassIdentity::new(annotation.value.as_str()), false)
    } else if let Some(owner) = params.first().and_then(|p| descriptor::object_type(p)) {
        (owner, true)
    } else if own_class_fallback {
        (class.clone(), false)
    } else {
        return (None, false);
    };

    let name = if annotation.member.is_empty() {
        member.name.clone()
    } else {
        annotation.member.clone()
    };

    let desc = if !annotation.desc.is_empty() {
        annotation.desc.clone()
    } else if member.kind == MemberKind::Field {
        member.descriptor.clone()
    } else if is_field {
        // getter returns the field type, setter takes it last
        match descriptor::return_type(&member.descriptor) {
            Ok("V") => params.last().map(|p| p.to_string()).unwrap_or_default(),
            Ok(ret) => ret.to_string(),
            Err(_) => String::new(),
        }
    } else if receiver {
        descriptor::without_first_parameter(&member.descriptor).unwrap_or_default()
    } else {
        member.descriptor.clone()
    };

    (
        Some(Ref {
            owner,
            member: name,
            descriptor: desc,
            is_field,
        }),
        receiver,
    )
}
