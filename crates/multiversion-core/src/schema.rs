//! Annotation schema: the persisted contract between merge output and split
//! input.
//!
//! Merge-side annotations describe where each physical class and member came
//! from. Split-side annotations are the directives authors put on code that
//! was compiled against a merged class. Field names and defaults are part of
//! the wire format, so changes here break previously merged artifacts.

use crate::ident::VersionId;
use serde::{Deserialize, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Visibility override for a set of versions. `value` is `public`,
/// `protected`, `package` (or empty) or `private`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAnnotation {
    pub value: String,
    pub versions: Vec<VersionId>,
}

/// Inheritance override for a set of versions. An empty `super_class` keeps
/// the physical superclass; `interfaces` is the complete interface list of
/// those versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritanceAnnotation {
    pub versions: Vec<VersionId>,
    #[serde(default)]
    pub super_class: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedClassAnnotation {
    pub versions: Vec<VersionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access: Vec<AccessAnnotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inheritance: Vec<InheritanceAnnotation>,
}

/// `name` is set only when the physical name differs from the declared one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedMemberAnnotation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub versions: Vec<VersionId>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub synthetic: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access: Vec<AccessAnnotation>,
}

/// Symbolic pointer to a member. Empty `member`/`desc` broaden the match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefAnnotation {
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub member: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desc: String,
}

impl RefAnnotation {
    pub fn is_empty(&self) -> bool {
        self.value.is_empty() && self.member.is_empty() && self.desc.is_empty()
    }
}

/// One split-side directive. Sites carry an ordered list of these; each entry
/// is evaluated independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DirectiveAnnotation {
    Remove {
        versions: Vec<VersionId>,
    },
    Replace {
        versions: Vec<VersionId>,
        #[serde(rename = "ref", default, skip_serializing_if = "RefAnnotation::is_empty")]
        target: RefAnnotation,
        #[serde(default, skip_serializing_if = "is_false")]
        field: bool,
    },
    Stub {
        versions: Vec<VersionId>,
        #[serde(rename = "ref", default, skip_serializing_if = "RefAnnotation::is_empty")]
        target: RefAnnotation,
        #[serde(default, skip_serializing_if = "is_false")]
        field: bool,
    },
    Modify {
        versions: Vec<VersionId>,
        #[serde(rename = "ref")]
        target: RefAnnotation,
        #[serde(default, skip_serializing_if = "is_false")]
        field: bool,
    },
}

impl DirectiveAnnotation {
    pub fn versions(&self) -> &[VersionId] {
        match self {
            DirectiveAnnotation::Remove { versions }
            | DirectiveAnnotation::Replace { versions, .. }
            | DirectiveAnnotation::Stub { versions, .. }
            | DirectiveAnnotation::Modify { versions, .. } => versions,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            DirectiveAnnotation::Remove { .. } => "remove",
            DirectiveAnnotation::Replace { .. } => "replace",
            DirectiveAnnotation::Stub { .. } => "stub",
            DirectiveAnnotation::Modify { .. } => "modify",
        }
    }
}
