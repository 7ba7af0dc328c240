//! Directive Engine: picks which directives apply to a target version, and
//! holds the patch hooks `Modify` directives call into.

use crate::types::{Directive, MergedClass};
use multiversion_core::{Body, ClassIdentity, VersionId};
use std::collections::HashMap;

/// Directives on one site that contain `target`, in the order they are
/// tried: `Remove`, `Replace`, `Stub`, `Modify`. Declaration order is kept
/// within a kind.
pub fn applicable<'a>(directives: &'a [Directive], target: &VersionId) -> Vec<&'a Directive> {
    let mut out: Vec<&Directive> = directives.iter().filter(|d| d.applies_to(target)).collect();
    out.sort_by_key(|d| d.kind);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

/// Rewrites one member body for a `Modify` directive.
pub trait PatchHook: Send + Sync {
    /// `body` is the member's body for the target version; the returned body
    /// replaces it in the projected class.
    fn patch(
        &self,
        body: Body,
        max_locals: u16,
        physical_name: &str,
        owner: &MergedClass,
    ) -> Result<Body, HookError>;
}

impl<F> PatchHook for F
where
    F: Fn(Body, u16, &str, &MergedClass) -> Result<Body, HookError> + Send + Sync,
{
    fn patch(
        &self,
        body: Body,
        max_locals: u16,
        physical_name: &str,
        owner: &MergedClass,
    ) -> Result<Body, HookError> {
        self(body, max_locals, physical_name, owner)
    }
}

/// Registry of patch hooks, keyed by the `(owner, member)` a `Modify` ref
/// names.
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<(ClassIdentity, String), Box<dyn PatchHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        owner: impl Into<ClassIdentity>,
        member: impl Into<String>,
        hook: impl PatchHook + 'static,
    ) {
        self.hooks.insert((owner.into(), member.into()), Box::new(hook));
    }

    pub fn get(&self, owner: &ClassIdentity, member: &str) -> Option<&dyn PatchHook> {
        self.hooks
            .get(&(owner.clone(), member.to_string()))
            .map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DirectiveKind;
    use multiversion_core::Insn;

    fn directive(kind: DirectiveKind, versions: &[&str]) -> Directive {
        Directive {
            kind,
            versions: versions.iter().map(|v| VersionId::new(*v)).collect(),
            target: None,
            receiver: false,
        }
    }

    #[test]
    fn test_applicable_filters_and_orders() {
        let directives = vec![
            directive(DirectiveKind::Stub, &["a", "b"]),
            directive(DirectiveKind::Replace, &["b"]),
            directive(DirectiveKind::Remove, &["a"]),
            directive(DirectiveKind::Replace, &["a"]),
        ];
        let kinds: Vec<_> = applicable(&directives, &"a".into())
            .into_iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![DirectiveKind::Remove, DirectiveKind::Replace, DirectiveKind::Stub]
        );
        assert!(applicable(&directives, &"c".into()).is_empty());
    }

    #[test]
    fn test_registry_calls_closure_hooks() {
        let mut registry = HookRegistry::new();
        registry.register(
            "com/example/ClassA",
            "methodA",
            |body: Body, max_locals: u16, _name: &str, _owner: &MergedClass| {
                let mut insns = body.enter().map(|i| i.to_vec()).unwrap_or_default();
                insns.insert(0, Insn::raw("NOP"));
                Ok(Body::code(max_locals + 1, insns))
            },
        );
        assert_eq!(registry.len(), 1);

        let owner = crate::fixtures::merged_class_a();
        let hook = registry.get(&"com/example/ClassA".into(), "methodA").unwrap();
        let patched = hook.patch(Body::code(1, vec![]), 1, "methodA", &owner).unwrap();
        assert_eq!(patched, Body::code(2, vec![Insn::raw("NOP")]));
        assert!(registry.get(&"com/example/ClassA".into(), "methodC").is_none());
    }
}
