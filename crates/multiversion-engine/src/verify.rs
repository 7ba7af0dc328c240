//! Split verifier: finds references in a projected tree to classes or
//! members that do not exist in the target version.
//!
//! Only merged classes are checked. A class the index does not know is
//! assumed to come from the platform and is never reported.

use crate::error::SplitError;
use crate::link::MergedIndex;
use multiversion_core::descriptor;
use multiversion_core::{ClassIdentity, ClassTree, Insn, MemberKey, MemberKind, VersionId};

fn class_leaks<'a, I>(
    classes: I,
    site: &'a str,
    target: &'a VersionId,
    index: &'a MergedIndex,
) -> impl Iterator<Item = String> + 'a
where
    I: IntoIterator<Item = ClassIdentity>,
    I::IntoIter: 'a,
{
    classes.into_iter().filter_map(move |class| {
        let merged = index.get(&class)?;
        (!merged.versions.contains(target)).then(|| format!("{site} references {class}, absent in {target}"))
    })
}

/// Every version leak in `tree` for `target`, as human-readable lines.
pub fn verify(tree: &ClassTree, target: &VersionId, index: &MergedIndex) -> Vec<String> {
    let mut violations: Vec<String> = Vec::new();

    violations.extend(class_leaks([tree.super_class.clone()], "superclass", target, index));
    violations.extend(class_leaks(tree.interfaces.iter().cloned(), "interface", target, index));
    for member in &tree.members {
        let site = format!("signature of {}", member.name);
        violations.extend(class_leaks(
            descriptor::referenced_classes(&member.descriptor),
            &site,
            target,
            index,
        ));
    }

    for member in &tree.members {
        let Some(Ok(insns)) = member.body.as_ref().map(|b| b.enter()) else {
            continue;
        };
        let site = format!("{}{}", member.name, member.descriptor);
        for insn in insns {
            let (owner, key) = match insn {
                Insn::Type { class, .. } => {
                    let class = descriptor::element_class(class.as_str()).unwrap_or_else(|| class.clone());
                    violations.extend(class_leaks([class], &site, target, index));
                    continue;
                }
                Insn::Field { owner, name, desc, .. } => (owner, MemberKey::field(name.clone(), desc.clone())),
                Insn::Invoke { owner, name, desc, .. } => (owner, MemberKey::method(name.clone(), desc.clone())),
                Insn::Raw { .. } => continue,
            };
            let referenced = std::iter::once(owner.clone()).chain(descriptor::referenced_classes(&key.descriptor));
            violations.extend(class_leaks(referenced, &site, target, index));
            if let Some(leak) = member_leak(owner, key, target, index) {
                violations.push(format!("{site}: {leak}"));
            }
        }
    }
    violations
}

/// Walk the target's superclass chain from `owner`. The reference leaks when
/// some merged class on the chain declares the member, but only for other
/// versions, and none declares it for the target.
fn member_leak(
    owner: &ClassIdentity,
    key: MemberKey,
    target: &VersionId,
    index: &MergedIndex,
) -> Option<String> {
    let mut declared_elsewhere = false;
    let mut current = owner.clone();
    let mut seen = Vec::new();
    while let Some(merged) = index.get(&current) {
        if seen.contains(&current) {
            break;
        }
        let mut matching = merged.declared(&key).peekable();
        if matching.peek().is_some() {
            if matching.any(|m| m.in_version(target)) {
                return None;
            }
            declared_elsewhere = true;
        }
        // constructors are not inherited
        if key.kind == MemberKind::Method && key.name == crate::types::CONSTRUCTOR {
            break;
        }
        seen.push(current.clone());
        current = merged.inheritance.for_version(target).super_class.clone();
    }
    declared_elsewhere.then(|| format!("{owner}.{} {} is absent in {target}", key.name, key.descriptor))
}

/// [`verify`], failing with [`SplitError::VersionLeak`] on any violation.
pub fn check(tree: &ClassTree, target: &VersionId, index: &MergedIndex) -> Result<(), SplitError> {
    let violations = verify(tree, target, index);
    if violations.is_empty() {
        return Ok(());
    }
    Err(SplitError::VersionLeak {
        class: tree.name.clone(),
        version: target.clone(),
        violations,
    })
}
