//! # multiversion-engine
//!
//! Merges the class trees several target versions declare for one class into
//! a single physical class, and splits such a class back into the tree one
//! version would have compiled to.
//!
//! ## Merge
//!
//! 1. **Conflict resolution**: declarations are grouped across versions;
//!    groups that would collide in one class get a mangled physical name
//!    (`name$mv$<first version>`).
//! 2. **Access widening**: the physical visibility is the widest any version
//!    declared, narrower versions are recorded as overrides.
//! 3. **Inheritance reconciliation**: disagreeing superclasses collapse to
//!    their deepest common ancestor, with a synthetic `mv$castTo$...`
//!    accessor for each real superclass.
//! 4. **Encoding**: the result is stored as an annotated [`ClassTree`].
//!
//! ## Split
//!
//! 1. **Projection**: `Remove`, `Replace`, `Stub` and `Modify` directives are
//!    applied in that order of precedence for the target version.
//! 2. **Linking**: references to mangled members and cast accessors are
//!    rewritten, and call sites redirected by `Replace` and `Stub`.
//! 3. **Verification**: anything still pointing at a class or member absent
//!    in the target is reported.
//!
//! ## Example
//!
//! ```rust
//! use multiversion_engine::{split, ClassDirectives, MergeOptions, Merger, NoHierarchy};
//! use multiversion_core::{ClassTree, MemberDecl, Visibility};
//!
//! let a = ClassTree::new("com/example/Greeter", Visibility::Public)
//!     .with_member(MemberDecl::method("hello", "()V", Visibility::Public));
//! let b = ClassTree::new("com/example/Greeter", Visibility::Public)
//!     .with_member(MemberDecl::method("hello", "()I", Visibility::Public));
//!
//! let merger = Merger::new(NoHierarchy, MergeOptions::default());
//! let merged = merger
//!     .merge(&"com/example/Greeter".into(), &[("a".into(), a), ("b".into(), b)])
//!     .unwrap();
//! assert!(merged.members.iter().any(|m| m.physical_name == "hello$mv$a"));
//!
//! let only_b = split(&merged, &"b".into(), &ClassDirectives::default())
//!     .unwrap()
//!     .projected()
//!     .unwrap();
//! assert_eq!(only_b.tree.members[0].descriptor, "()I");
//! ```
//!
//! [`ClassTree`]: multiversion_core::ClassTree

pub mod access;
pub mod annotate;
pub mod conflict;
pub mod directive;
pub mod error;
pub mod inheritance;
pub mod link;
pub mod merger;
pub mod projector;
pub mod reference;
pub mod types;
pub mod verify;

#[cfg(test)]
mod fixtures;
#[cfg(test)]
mod scenarios;

// Re-export primary public API
pub use annotate::{decode, encode, ClassDirectives};
pub use directive::{HookError, HookRegistry, PatchHook};
pub use error::{MergeError, ResolveError, SchemaError, SplitError, SplitWarning};
pub use inheritance::{Hierarchy, HierarchyIndex, NoHierarchy};
pub use link::{Linker, MergedIndex, RedirectTable};
pub use merger::{MergeOptions, Merger};
pub use projector::{split, ClassLookup, ProjectedClass, Projection, Projector};
pub use types::{
    Binding, ClassView, Directive, DirectiveKind, MergedClass, MergedMember, Redirect, Ref,
    TypeRemap,
};
