//! Core types for the merge/split engine.
//!
//! A [`MergedClass`] is the in-memory form of one physical class that carries
//! every version's members. Per-version facts (visibility, inheritance,
//! bodies) live in version tables keyed by [`VersionId`], so projecting a
//! single version back out never needs the original inputs.

use multiversion_core::class::{FieldAccess, InvokeKind};
use multiversion_core::{Body, ClassIdentity, ClassTree, Insn, MemberKey, MemberKind, VersionId, Visibility};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Separator between a declared name and its version tag in a mangled name.
pub const MANGLE_MARKER: &str = "$mv$";

/// Name prefix of the synthetic cast accessors added for divergent
/// superclasses.
pub const BRIDGE_PREFIX: &str = "mv$castTo$";

pub const CONSTRUCTOR: &str = "<init>";

/// Physical visibility plus the versions that declared something narrower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionAccessTable {
    pub physical: Visibility,
    pub overrides: BTreeMap<VersionId, Visibility>,
}

impl VersionAccessTable {
    pub fn uniform(access: Visibility) -> Self {
        Self {
            physical: access,
            overrides: BTreeMap::new(),
        }
    }

    pub fn for_version(&self, version: &VersionId) -> Visibility {
        self.overrides.get(version).copied().unwrap_or(self.physical)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Inheritance {
    pub super_class: ClassIdentity,
    pub interfaces: Vec<ClassIdentity>,
}

impl Inheritance {
    pub fn of(tree: &ClassTree) -> Self {
        Self {
            super_class: tree.super_class.clone(),
            interfaces: tree.interfaces.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInheritanceTable {
    pub physical: Inheritance,
    pub overrides: BTreeMap<VersionId, Inheritance>,
}

impl VersionInheritanceTable {
    pub fn uniform(inheritance: Inheritance) -> Self {
        Self {
            physical: inheritance,
            overrides: BTreeMap::new(),
        }
    }

    pub fn for_version(&self, version: &VersionId) -> &Inheritance {
        self.overrides.get(version).unwrap_or(&self.physical)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedMember {
    pub physical_name: String,
    pub declared_name: String,
    pub declared_versions: BTreeSet<VersionId>,
    /// Added by the merge (a cast bridge).
    pub synthetic: bool,
    /// Compiler-generated in every declaring version.
    pub compiler_generated: bool,
    pub kind: MemberKind,
    pub descriptor: String,
    pub is_static: bool,
    pub access: VersionAccessTable,
    pub bodies: BTreeMap<VersionId, Body>,
}

impl MergedMember {
    pub fn is_field(&self) -> bool {
        self.kind == MemberKind::Field
    }

    /// Key of the member inside the physical class.
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.physical_name.clone(), self.descriptor.clone(), self.kind)
    }

    /// Key the member had in the versions that declared it.
    pub fn declared_key(&self) -> MemberKey {
        MemberKey::new(self.declared_name.clone(), self.descriptor.clone(), self.kind)
    }

    pub fn is_mangled(&self) -> bool {
        self.physical_name != self.declared_name
    }

    pub fn in_version(&self, version: &VersionId) -> bool {
        self.declared_versions.contains(version)
    }

    pub fn is_bridge(&self) -> bool {
        self.synthetic && self.physical_name.starts_with(BRIDGE_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedClass {
    pub identity: ClassIdentity,
    pub versions: BTreeSet<VersionId>,
    pub access: VersionAccessTable,
    pub inheritance: VersionInheritanceTable,
    pub members: Vec<MergedMember>,
}

impl MergedClass {
    /// Treat a plain class tree as present, unchanged, in every version of
    /// `versions`.
    pub fn universal(tree: &ClassTree, versions: &BTreeSet<VersionId>) -> Self {
        let members = tree
            .members
            .iter()
            .map(|decl| MergedMember {
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
            })
            .collect();
        Self {
            identity: tree.name.clone(),
            versions: versions.clone(),
            access: VersionAccessTable::uniform(tree.access),
            inheritance: VersionInheritanceTable::uniform(Inheritance::of(tree)),
            members,
        }
    }

    /// Look up a member by its physical key.
    pub fn member(&self, key: &MemberKey) -> Option<&MergedMember> {
        self.members.iter().find(|m| {
            m.physical_name == key.name && m.descriptor == key.descriptor && m.kind == key.kind
        })
    }

    /// Members whose declared key matches, across all versions.
    pub fn declared<'a>(&'a self, key: &'a MemberKey) -> impl Iterator<Item = &'a MergedMember> + 'a {
        self.members.iter().filter(move |m| {
            m.declared_name == key.name && m.descriptor == key.descriptor && m.kind == key.kind
        })
    }

    pub fn bridges(&self) -> impl Iterator<Item = &MergedMember> {
        self.members.iter().filter(|m| m.is_bridge())
    }

    /// What the class looked like in `version`, or `None` if it did not
    /// exist there.
    pub fn view(&self, version: &VersionId) -> Option<ClassView> {
        if !self.versions.contains(version) {
            return None;
        }
        let inheritance = self.inheritance.for_version(version);
        let members = self
            .members
            .iter()
            .filter(|m| m.in_version(version))
            .map(|m| ViewMember {
                name: m.declared_name.clone(),
                physical_name: m.physical_name.clone(),
                descriptor: m.descriptor.clone(),
                kind: m.kind,
                is_static: m.is_static,
                access: m.access.for_version(version),
            })
            .collect();
        Some(ClassView {
            identity: self.identity.clone(),
            version: version.clone(),
            access: self.access.for_version(version),
            super_class: inheritance.super_class.clone(),
            interfaces: inheritance.interfaces.clone(),
            members,
        })
    }
}

/// One version's view of a class, with members under their declared names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassView {
    pub identity: ClassIdentity,
    pub version: VersionId,
    pub access: Visibility,
    pub super_class: ClassIdentity,
    pub interfaces: Vec<ClassIdentity>,
    pub members: Vec<ViewMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewMember {
    pub name: String,
    pub physical_name: String,
    pub descriptor: String,
    pub kind: MemberKind,
    pub is_static: bool,
    pub access: Visibility,
}

/// Symbolic pointer to a member. An empty descriptor matches on name and
/// kind alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ref {
    pub owner: ClassIdentity,
    pub member: String,
    pub descriptor: String,
    pub is_field: bool,
}

impl Ref {
    pub fn kind(&self) -> MemberKind {
        if self.is_field {
            MemberKind::Field
        } else {
            MemberKind::Method
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.member)?;
        if !self.descriptor.is_empty() {
            if self.is_field {
                write!(f, ":")?;
            }
            write!(f, "{}", self.descriptor)?;
        }
        Ok(())
    }
}

/// Directive kinds in precedence order: the derived `Ord` is the order in
/// which directives on one site are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirectiveKind {
    Remove,
    Replace,
    Stub,
    Modify,
}

impl DirectiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectiveKind::Remove => "remove",
            DirectiveKind::Replace => "replace",
            DirectiveKind::Stub => "stub",
            DirectiveKind::Modify => "modify",
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub versions: BTreeSet<VersionId>,
    pub target: Option<Ref>,
    /// The target's owner was taken from the member's first parameter, which
    /// therefore stands for the receiver.
    pub receiver: bool,
}

impl Directive {
    pub fn remove<I, V>(versions: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<VersionId>,
    {
        Self {
            kind: DirectiveKind::Remove,
            versions: versions.into_iter().map(Into::into).collect(),
            target: None,
            receiver: false,
        }
    }

    pub fn applies_to(&self, version: &VersionId) -> bool {
        self.versions.contains(version)
    }
}

/// A resolved [`Ref`]: the concrete member it names in one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub owner: ClassIdentity,
    pub name: String,
    pub physical_name: String,
    pub descriptor: String,
    pub kind: MemberKind,
    pub is_static: bool,
}

impl Binding {
    pub fn is_field(&self) -> bool {
        self.kind == MemberKind::Field
    }

    /// Instruction reading (`get`) or writing the bound field, or invoking
    /// the bound method.
    pub fn access_insn(&self, get: bool) -> Insn {
        if self.is_field() {
            Insn::field(
                FieldAccess::from_parts(get, self.is_static),
                self.owner.clone(),
                self.name.clone(),
                self.descriptor.clone(),
            )
        } else {
            let kind = if self.is_static {
                InvokeKind::Static
            } else if self.name == CONSTRUCTOR {
                InvokeKind::Special
            } else {
                InvokeKind::Virtual
            };
            Insn::invoke(kind, self.owner.clone(), self.name.clone(), self.descriptor.clone())
        }
    }
}

/// How a member is used at a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SiteUse {
    Call,
    Get,
    Put,
}

/// A member reference as it appears in an instruction, after de-mangling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallSite {
    pub owner: ClassIdentity,
    pub name: String,
    pub descriptor: String,
    pub usage: SiteUse,
}

impl CallSite {
    pub fn of(insn: &Insn) -> Option<CallSite> {
        match insn {
            Insn::Field {
                access,
                owner,
                name,
                desc,
            } => Some(CallSite {
                owner: owner.clone(),
                name: name.clone(),
                descriptor: desc.clone(),
                usage: if access.is_get() { SiteUse::Get } else { SiteUse::Put },
            }),
            Insn::Invoke { owner, name, desc, .. } => Some(CallSite {
                owner: owner.clone(),
                name: name.clone(),
                descriptor: desc.clone(),
                usage: SiteUse::Call,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage = match self.usage {
            SiteUse::Call => "call",
            SiteUse::Get => "get",
            SiteUse::Put => "put",
        };
        write!(f, "{usage} {}.{} {}", self.owner, self.name, self.descriptor)
    }
}

/// Call-site rewrite recorded by `Replace` and `Stub`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub from: CallSite,
    pub to: Insn,
}

/// Type rewrite recorded by a class-level `Stub`: in the target version every
/// use of `from` becomes a use of the stub class `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRemap {
    pub from: ClassIdentity,
    pub to: ClassIdentity,
}
