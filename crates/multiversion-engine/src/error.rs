use crate::types::{DirectiveKind, Ref};
use multiversion_core::{ClassIdentity, VersionId};
use std::collections::BTreeMap;

/// Fatal to one class group during merge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("no versions supplied for {class}")]
    NoVersions { class: ClassIdentity },

    #[error("version {version} supplied more than once for {class}")]
    DuplicateVersion {
        class: ClassIdentity,
        version: VersionId,
    },

    #[error("tree for version {version} is {found}, expected {expected}")]
    IdentityMismatch {
        expected: ClassIdentity,
        found: ClassIdentity,
        version: VersionId,
    },

    #[error("unresolved conflict in {class}: {name} {descriptor} in versions {versions:?}")]
    UnresolvedConflict {
        class: ClassIdentity,
        name: String,
        descriptor: String,
        versions: Vec<VersionId>,
    },

    #[error("cannot pick a physical superclass for {class}: versions extend {supers:?}")]
    AmbiguousInheritance {
        class: ClassIdentity,
        supers: BTreeMap<VersionId, ClassIdentity>,
    },
}

/// Fatal only to the directive that needed the reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{reference} does not exist in version {version}")]
    UnresolvedReference { reference: Ref, version: VersionId },

    #[error("{reference} is ambiguous in version {version}: {candidates:?}")]
    AmbiguousReference {
        reference: Ref,
        version: VersionId,
        candidates: Vec<String>,
    },
}

/// Reported during split, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitWarning {
    #[error("stub {class}.{member} has no body for version {version}")]
    MissingStubBody {
        class: ClassIdentity,
        member: String,
        version: VersionId,
    },

    #[error("{kind} on {class}.{member} failed: {reason}")]
    DirectiveFailed {
        class: ClassIdentity,
        member: String,
        kind: DirectiveKind,
        reason: String,
    },

    #[error("{kind} on {site} of {class} has no effect")]
    IgnoredDirective {
        class: ClassIdentity,
        site: String,
        kind: DirectiveKind,
    },
}

/// Fatal to one `(class, target)` pair during split.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    #[error("{class}: removing superclass {super_class} needs its constructor {descriptor} to take no arguments")]
    SuperConstructorArguments {
        class: ClassIdentity,
        super_class: ClassIdentity,
        descriptor: String,
    },

    #[error("{class}.{member}: no NEW/DUP pair for the redirected {site}")]
    UnmatchedConstructor {
        class: ClassIdentity,
        member: String,
        site: String,
    },

    #[error("{class} references things absent in version {version}: {}", .violations.join("; "))]
    VersionLeak {
        class: ClassIdentity,
        version: VersionId,
        violations: Vec<String>,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// A stored tree does not follow the annotation schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("{0} carries no merged-class annotation")]
    NotMerged(ClassIdentity),

    #[error("{class}: {site} names version {version}, which the class was not merged from")]
    UnknownVersion {
        class: ClassIdentity,
        site: String,
        version: VersionId,
    },

    #[error("{class}: unknown access value `{value}`")]
    BadAccess { class: ClassIdentity, value: String },

    #[error("{class}.{member}: modify needs both an owner and a member in its ref")]
    MissingRef { class: ClassIdentity, member: String },
}
