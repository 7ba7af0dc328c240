//! Reference Resolver: binds a symbolic [`Ref`] to the member it names in
//! one version.

use crate::error::ResolveError;
use crate::types::{Binding, ClassView, Ref};
use multiversion_core::{ClassIdentity, VersionId};

/// Resolve `reference` against the class views of `version`.
///
/// `class_of` returns the per-version view of a class, or `None` when the
/// class does not exist in that version. Views list members under their
/// declared names, so a `Ref` always uses the name the author wrote.
pub fn resolve<F>(reference: &Ref, version: &VersionId, class_of: F) -> Result<Binding, ResolveError>
where
    F: Fn(&ClassIdentity, &VersionId) -> Option<ClassView>,
{
    let unresolved = || ResolveError::UnresolvedReference {
        reference: reference.clone(),
        version: version.clone(),
    };
    let view = class_of(&reference.owner, version).ok_or_else(unresolved)?;
    let kind = reference.kind();

    let candidates: Vec<_> = view
        .members
        .iter()
        .filter(|m| m.name == reference.member && m.kind == kind)
        .filter(|m| reference.descriptor.is_empty() || m.descriptor == reference.descriptor)
        .collect();

    match candidates.as_slice() {
        [] => Err(unresolved()),
        [member] => Ok(Binding {
            owner: view.identity.clone(),
            name: member.name.clone(),
            physical_name: member.physical_name.clone(),
            descriptor: member.descriptor.clone(),
            kind: member.kind,
            is_static: member.is_static,
        }),
        many => Err(ResolveError::AmbiguousReference {
            reference: reference.clone(),
            version: version.clone(),
            candidates: many.iter().map(|m| format!("{} {}", m.name, m.descriptor)).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::types::MergedClass;
    use multiversion_core::MemberKind;

    fn class_a() -> MergedClass {
        fixtures::merged_class_a()
    }

    fn lookup(merged: &MergedClass) -> impl Fn(&ClassIdentity, &VersionId) -> Option<ClassView> + '_ {
        move |class, version| (class == &merged.identity).then(|| merged.view(version)).flatten()
    }

    fn field_ref(member: &str) -> Ref {
        Ref {
            owner: fixtures::CLASS_A.into(),
            member: member.into(),
            descriptor: String::new(),
            is_field: true,
        }
    }

    #[test]
    fn test_resolves_field_in_declaring_version() {
        let merged = class_a();
        let binding = resolve(&field_ref("fieldA"), &"a".into(), lookup(&merged)).unwrap();
        assert_eq!(binding.kind, MemberKind::Field);
        assert_eq!(binding.descriptor, "Ljava/lang/String;");
        assert!(!binding.is_static);
    }

    #[test]
    fn test_unresolved_outside_declaring_version() {
        let merged = class_a();
        let err = resolve(&field_ref("fieldA"), &"b".into(), lookup(&merged)).unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_unknown_owner_is_unresolved() {
        let merged = class_a();
        let mut reference = field_ref("fieldA");
        reference.owner = "x/Missing".into();
        assert!(matches!(
            resolve(&reference, &"a".into(), lookup(&merged)),
            Err(ResolveError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_empty_descriptor_with_overloads_is_ambiguous() {
        let merged = fixtures::merged_class_b();
        let reference = Ref {
            owner: fixtures::CLASS_B.into(),
            member: "<init>".into(),
            descriptor: String::new(),
            is_field: false,
        };
        let err = resolve(&reference, &"b".into(), lookup(&merged)).unwrap_err();
        match err {
            ResolveError::AmbiguousReference { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        // a single constructor in version a
        assert!(resolve(&reference, &"a".into(), lookup(&merged)).is_ok());
    }

    #[test]
    fn test_mangled_member_resolves_by_declared_name() {
        let merged = fixtures::merged_class_b();
        let reference = Ref {
            owner: fixtures::CLASS_B.into(),
            member: "conflict".into(),
            descriptor: String::new(),
            is_field: false,
        };
        let binding = resolve(&reference, &"b".into(), lookup(&merged)).unwrap();
        assert_eq!(binding.name, "conflict");
        assert_eq!(binding.physical_name, "conflict$mv$b");
        assert_eq!(binding.descriptor, "()I");
    }
}
