//! In-memory class trees.
//!
//! This is the shape the external class-file layer hands us: a class with its
//! inheritance edges and members, where method bodies keep only the
//! instructions that name other classes or members. Everything else a real
//! body contains survives untouched as [`Insn::Raw`].

use crate::ident::{ClassIdentity, VersionId, Visibility};
use crate::schema::{DirectiveAnnotation, MergedClassAnnotation, MergedMemberAnnotation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Field,
    Method,
}

/// `(name, descriptor, kind)`: how a member is addressed inside one class.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberKey {
    pub name: String,
    pub descriptor: String,
    pub kind: MemberKind,
}

impl MemberKey {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            kind,
        }
    }

    pub fn method(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::new(name, descriptor, MemberKind::Method)
    }

    pub fn field(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::new(name, descriptor, MemberKind::Field)
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.descriptor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldAccess {
    Get,
    Put,
    GetStatic,
    PutStatic,
}

impl FieldAccess {
    pub fn is_static(&self) -> bool {
        matches!(self, FieldAccess::GetStatic | FieldAccess::PutStatic)
    }

    pub fn is_get(&self) -> bool {
        matches!(self, FieldAccess::Get | FieldAccess::GetStatic)
    }

    pub fn from_parts(get: bool, is_static: bool) -> Self {
        match (get, is_static) {
            (true, false) => FieldAccess::Get,
            (true, true) => FieldAccess::GetStatic,
            (false, false) => FieldAccess::Put,
            (false, true) => FieldAccess::PutStatic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeKind {
    Virtual,
    Static,
    Special,
    Interface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeOp {
    New,
    CheckCast,
    InstanceOf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Insn {
    Field {
        access: FieldAccess,
        owner: ClassIdentity,
        name: String,
        desc: String,
    },
    Invoke {
        kind: InvokeKind,
        owner: ClassIdentity,
        name: String,
        desc: String,
    },
    Type {
        kind: TypeOp,
        class: ClassIdentity,
    },
    Raw {
        text: String,
    },
}

impl Insn {
    pub fn raw(text: impl Into<String>) -> Self {
        Insn::Raw { text: text.into() }
    }

    pub fn invoke(
        kind: InvokeKind,
        owner: impl Into<ClassIdentity>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Invoke {
            kind,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }

    pub fn field(
        access: FieldAccess,
        owner: impl Into<ClassIdentity>,
        name: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Insn::Field {
            access,
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }
}

/// Failure raised when a placeholder body is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "fault", rename_all = "camelCase")]
pub enum RuntimeFault {
    #[error("{owner}.{member} has no implementation for version {version}")]
    Unimplemented {
        owner: ClassIdentity,
        member: String,
        version: VersionId,
    },
    #[error("{owner}.{member} is only valid for versions {allowed:?}")]
    CrossVersionMisuse {
        owner: ClassIdentity,
        member: String,
        allowed: Vec<VersionId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Body {
    #[serde(rename_all = "camelCase")]
    Code { max_locals: u16, insns: Vec<Insn> },
    /// Placeholder that fails unconditionally when entered.
    Fails { fault: RuntimeFault },
}

impl Body {
    pub fn code(max_locals: u16, insns: Vec<Insn>) -> Self {
        Body::Code { max_locals, insns }
    }

    pub fn fails(fault: RuntimeFault) -> Self {
        Body::Fails { fault }
    }

    pub fn max_locals(&self) -> u16 {
        match self {
            Body::Code { max_locals, .. } => *max_locals,
            Body::Fails { .. } => 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Body::Fails { .. })
    }

    /// Enter the body: the instruction stream, or the fault a placeholder
    /// raises at call time.
    pub fn enter(&self) -> Result<&[Insn], RuntimeFault> {
        match self {
            Body::Code { insns, .. } => Ok(insns),
            Body::Fails { fault } => Err(fault.clone()),
        }
    }

    pub fn insns_mut(&mut self) -> Option<&mut Vec<Insn>> {
        match self {
            Body::Code { insns, .. } => Some(insns),
            Body::Fails { .. } => None,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDecl {
    pub name: String,
    pub descriptor: String,
    pub kind: MemberKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_static: bool,
    /// Compiler-generated, such as the bridge a covariant override leaves
    /// behind.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_synthetic: bool,
    pub access: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    /// Per-version bodies; only populated on merged trees.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub version_bodies: BTreeMap<VersionId, Body>,
    /// Explicit physical name chosen by the author, bypassing mangling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<MergedMemberAnnotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<DirectiveAnnotation>,
}

impl MemberDecl {
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        kind: MemberKind,
        access: Visibility,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            kind,
            is_static: false,
            is_synthetic: false,
            access,
            body: None,
            version_bodies: BTreeMap::new(),
            name_override: None,
            merged: None,
            directives: Vec::new(),
        }
    }

    pub fn method(name: impl Into<String>, descriptor: impl Into<String>, access: Visibility) -> Self {
        Self::new(name, descriptor, MemberKind::Method, access)
    }

    pub fn field(name: impl Into<String>, descriptor: impl Into<String>, access: Visibility) -> Self {
        Self::new(name, descriptor, MemberKind::Field, access)
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_synthetic(mut self) -> Self {
        self.is_synthetic = true;
        self
    }

    pub fn with_directive(mut self, directive: DirectiveAnnotation) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn is_field(&self) -> bool {
        self.kind == MemberKind::Field
    }

    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.name.clone(), self.descriptor.clone(), self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassTree {
    pub name: ClassIdentity,
    pub access: Visibility,
    #[serde(default = "ClassIdentity::object")]
    pub super_class: ClassIdentity,
    #[serde(default)]
    pub interfaces: Vec<ClassIdentity>,
    #[serde(default)]
    pub members: Vec<MemberDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<MergedClassAnnotation>,
    /// Directives on the class declaration itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directives: Vec<DirectiveAnnotation>,
    /// Directives on the `extends` edge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub super_directives: Vec<DirectiveAnnotation>,
    /// Directives on individual `implements` edges.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub interface_directives: BTreeMap<ClassIdentity, Vec<DirectiveAnnotation>>,
}

impl ClassTree {
    pub fn new(name: impl Into<ClassIdentity>, access: Visibility) -> Self {
        Self {
            name: name.into(),
            access,
            super_class: ClassIdentity::object(),
            interfaces: Vec::new(),
            members: Vec::new(),
            merged: None,
            directives: Vec::new(),
            super_directives: Vec::new(),
            interface_directives: BTreeMap::new(),
        }
    }

    pub fn with_super(mut self, super_class: impl Into<ClassIdentity>) -> Self {
        self.super_class = super_class.into();
        self
    }

    pub fn with_interface(mut self, interface: impl Into<ClassIdentity>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn with_member(mut self, member: MemberDecl) -> Self {
        self.members.push(member);
        self
    }

    pub fn member(&self, key: &MemberKey) -> Option<&MemberDecl> {
        self.members
            .iter()
            .find(|m| m.name == key.name && m.descriptor == key.descriptor && m.kind == key.kind)
    }

    pub fn member_mut(&mut self, key: &MemberKey) -> Option<&mut MemberDecl> {
        self.members
            .iter_mut()
            .find(|m| m.name == key.name && m.descriptor == key.descriptor && m.kind == key.kind)
    }

    /// Copy with members sorted by key, for comparisons that ignore member
    /// order.
    pub fn normalized(&self) -> ClassTree {
        let mut out = self.clone();
        out.members.sort_by(|a, b| a.key().cmp(&b.key()));
        out
    }
}
