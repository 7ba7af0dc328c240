//! Split Projector.
//!
//! Projects a [`MergedClass`] down to the class tree one target version
//! would have compiled to. Member directives are evaluated in precedence
//! order and the first one that succeeds decides the member:
//!
//! 1. **Remove** drops the member.
//! 2. **Replace** drops the member and redirects its call sites to the
//!    member its ref resolves to in the target version.
//! 3. **Stub** keeps the member (a failing placeholder when it has no body
//!    for the target) and redirects call sites of its ref to it.
//! 4. **Modify** runs the registered patch hook over the member's body.
//!
//! A member no directive decides is kept when the target declared it. Call
//! site redirects are returned alongside the tree; the linker applies them
//! once every class of a split run is projected.
//!
//! A class-level **Stub** makes the class stand in for the type its ref names:
//! the projection records a type remap for the linker, and the class only
//! exists in the versions its stubs name.

use crate::annotate::ClassDirectives;
use crate::directive::{self, HookRegistry};
use crate::error::{SplitError, SplitWarning};
use crate::reference;
use crate::types::{
    CallSite, ClassView, Directive, DirectiveKind, MergedClass, MergedMember, Redirect, Ref,
    SiteUse, TypeRemap, CONSTRUCTOR,
};
use multiversion_core::class::{FieldAccess, InvokeKind};
use multiversion_core::descriptor;
use multiversion_core::{Body, ClassIdentity, ClassTree, Insn, MemberDecl, MemberKind, RuntimeFault, VersionId};

/// Per-version class lookup used to resolve directive refs.
pub type ClassLookup<'a> = dyn Fn(&ClassIdentity, &VersionId) -> Option<ClassView> + 'a;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedClass {
    pub tree: ClassTree,
    pub redirects: Vec<Redirect>,
    pub type_remaps: Vec<TypeRemap>,
    pub warnings: Vec<SplitWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Projected(ProjectedClass),
    /// The class does not exist in the target version.
    Removed,
}

impl Projection {
    pub fn projected(self) -> Option<ProjectedClass> {
        match self {
            Projection::Projected(p) => Some(p),
            Projection::Removed => None,
        }
    }
}

#[derive(Default)]
struct Outcome {
    redirects: Vec<Redirect>,
    type_remaps: Vec<TypeRemap>,
    warnings: Vec<SplitWarning>,
}

impl Outcome {
    fn warn(&mut self, warning: SplitWarning) {
        tracing::warn!(warning = %warning, "Split warning");
        self.warnings.push(warning);
    }
}

pub struct Projector<'a> {
    hooks: &'a HookRegistry,
    class_of: &'a ClassLookup<'a>,
}

impl<'a> Projector<'a> {
    pub fn new(hooks: &'a HookRegistry, class_of: &'a ClassLookup<'a>) -> Self {
        Self { hooks, class_of }
    }

    pub fn project(
        &self,
        merged: &MergedClass,
        directives: &ClassDirectives,
        target: &VersionId,
    ) -> Result<Projection, SplitError> {
        let class = &merged.identity;
        if !merged.versions.contains(target) {
            tracing::debug!(class = %class, target = %target, "Class absent in target");
            return Ok(Projection::Removed);
        }

        let mut out = Outcome::default();

        let mut stands_in = false;
        for d in directive::applicable(&directives.class, target) {
            match (d.kind, &d.target) {
                (DirectiveKind::Remove, _) => {
                    tracing::debug!(class = %class, target = %target, "Class removed by directive");
                    return Ok(Projection::Removed);
                }
                (DirectiveKind::Stub, Some(reference)) => {
                    stands_in = true;
                    out.type_remaps.push(TypeRemap {
                        from: reference.owner.clone(),
                        to: class.clone(),
                    });
                }
                (DirectiveKind::Stub, None) => {
                    stands_in = true;
                    out.warn(ignored(class, "class", d));
                }
                _ => out.warn(ignored(class, "class", d)),
            }
        }
        if !stands_in && directives.class.iter().any(|d| d.kind == DirectiveKind::Stub) {
            tracing::debug!(class = %class, target = %target, "Class stub not used by target");
            return Ok(Projection::Removed);
        }

        let mut inheritance = merged.inheritance.for_version(target).clone();
        let mut removed_super: Option<ClassIdentity> = None;
        for d in directive::applicable(&directives.super_class, target) {
            if d.kind != DirectiveKind::Remove {
                out.warn(ignored(class, "superclass", d));
            } else if removed_super.is_none() && !inheritance.super_class.is_object() {
                removed_super = Some(std::mem::replace(
                    &mut inheritance.super_class,
                    ClassIdentity::object(),
                ));
            }
        }
        for (interface, site_directives) in &directives.interfaces {
            for d in directive::applicable(site_directives, target) {
                if d.kind == DirectiveKind::Remove {
                    inheritance.interfaces.retain(|i| i != interface);
                } else {
                    out.warn(ignored(class, &format!("interface {interface}"), d));
                }
            }
        }

        let mut members = Vec::new();
        for member in &merged.members {
            let site_directives = directives.for_member(&member.key());
            if let Some(decl) = self.project_member(merged, member, site_directives, target, &mut out) {
                members.push(decl);
            }
        }

        if let Some(old) = removed_super {
            detach_constructors(class, &old, &mut members)?;
        }

        let mut tree = ClassTree::new(class.clone(), merged.access.for_version(target))
            .with_super(inheritance.super_class);
        tree.interfaces = inheritance.interfaces;
        tree.members = members;

        tracing::debug!(
            class = %class,
            target = %target,
            members = tree.members.len(),
            redirects = out.redirects.len(),
            type_remaps = out.type_remaps.len(),
            "Projected class"
        );

        Ok(Projection::Projected(ProjectedClass {
            tree,
            redirects: out.redirects,
            type_remaps: out.type_remaps,
            warnings: out.warnings,
        }))
    }

    fn project_member(
        &self,
        merged: &MergedClass,
        member: &MergedMember,
        directives: &[Directive],
        target: &VersionId,
        out: &mut Outcome,
    ) -> Option<MemberDecl> {
        for d in directive::applicable(directives, target) {
            match d.kind {
                DirectiveKind::Remove => return None,
                DirectiveKind::Replace => match self.replace(merged, member, d, target) {
                    Ok(redirects) => {
                        out.redirects.extend(redirects);
                        return None;
                    }
                    Err(reason) => out.warn(failed(merged, member, d, reason)),
                },
                DirectiveKind::Stub => return Some(self.stub(merged, member, d, target, out)),
                DirectiveKind::Modify => match self.modify(merged, member, d, target) {
                    Ok(body) => return Some(emit(member, target, Some(body))),
                    Err(reason) => out.warn(failed(merged, member, d, reason)),
                },
            }
        }

        // bridges only exist for code compiled against the merged class
        if member.is_bridge() || !member.in_version(target) {
            return None;
        }
        Some(emit(member, target, member.bodies.get(target).cloned()))
    }

    fn replace(
        &self,
        merged: &MergedClass,
        member: &MergedMember,
        d: &Directive,
        target: &VersionId,
    ) -> Result<Vec<Redirect>, String> {
        let reference = d.target.as_ref().ok_or("no ref to replace with")?;
        let binding = reference::resolve(reference, target, self.class_of).map_err(|e| e.to_string())?;

        let site = |usage| CallSite {
            owner: merged.identity.clone(),
            name: member.declared_name.clone(),
            descriptor: member.descriptor.clone(),
            usage,
        };
        Ok(match member.kind {
            MemberKind::Method => vec![Redirect {
                from: site(SiteUse::Call),
                to: binding.access_insn(!descriptor::returns_void(&member.descriptor)),
            }],
            MemberKind::Field => vec![
                Redirect {
                    from: site(SiteUse::Get),
                    to: binding.access_insn(true),
                },
                Redirect {
                    from: site(SiteUse::Put),
                    to: binding.access_insn(false),
                },
            ],
        })
    }

    fn stub(
        &self,
        merged: &MergedClass,
        member: &MergedMember,
        d: &Directive,
        target: &VersionId,
        out: &mut Outcome,
    ) -> MemberDecl {
        let body = match (member.kind, member.bodies.get(target)) {
            (MemberKind::Field, _) => None,
            (MemberKind::Method, Some(body)) => Some(body.clone()),
            (MemberKind::Method, None) => {
                out.warn(SplitWarning::MissingStubBody {
                    class: merged.identity.clone(),
                    member: member.declared_name.clone(),
                    version: target.clone(),
                });
                Some(Body::fails(RuntimeFault::Unimplemented {
                    owner: merged.identity.clone(),
                    member: member.declared_name.clone(),
                    version: target.clone(),
                }))
            }
        };

        if let Some(reference) = &d.target {
            match stub_redirects(merged, member, reference) {
                Ok(redirects) => out.redirects.extend(redirects),
                Err(reason) => out.warn(failed(merged, member, d, reason)),
            }
        }

        emit(member, target, body)
    }

    fn modify(
        &self,
        merged: &MergedClass,
        member: &MergedMember,
        d: &Directive,
        target: &VersionId,
    ) -> Result<Body, String> {
        let reference = d.target.as_ref().ok_or("no ref naming a patch hook")?;
        let hook = self
            .hooks
            .get(&reference.owner, &reference.member)
            .ok_or_else(|| format!("no patch hook registered for {}.{}", reference.owner, reference.member))?;
        let body = member
            .bodies
            .get(target)
            .cloned()
            .ok_or_else(|| format!("no body to patch for version {target}"))?;
        let max_locals = body.max_locals();
        hook.patch(body, max_locals, &member.physical_name, merged)
            .map_err(|e| e.to_string())
    }
}

/// Call sites of the stubbed-out member become calls of the stub (or
/// accesses of a stub field). A static stub is called with `invokestatic`,
/// an instance stub with `invokevirtual` on the receiver already on the stack
/// and a stub constructor with `invokespecial`.
fn stub_redirects(
    merged: &MergedClass,
    member: &MergedMember,
    reference: &Ref,
) -> Result<Vec<Redirect>, String> {
    if reference.descriptor.is_empty() {
        return Err(format!("cannot derive a descriptor for {reference}"));
    }
    let site = |usage| CallSite {
        owner: reference.owner.clone(),
        name: reference.member.clone(),
        descriptor: reference.descriptor.clone(),
        usage,
    };
    let kind = if member.is_static {
        InvokeKind::Static
    } else if member.declared_name == CONSTRUCTOR {
        InvokeKind::Special
    } else {
        InvokeKind::Virtual
    };
    let call_stub = Insn::invoke(
        kind,
        merged.identity.clone(),
        member.declared_name.clone(),
        member.descriptor.clone(),
    );

    Ok(match (member.kind, reference.is_field) {
        (MemberKind::Field, _) => [true, false]
            .into_iter()
            .map(|get| Redirect {
                from: site(if get { SiteUse::Get } else { SiteUse::Put }),
                to: Insn::field(
                    FieldAccess::from_parts(get, member.is_static),
                    merged.identity.clone(),
                    member.declared_name.clone(),
                    member.descriptor.clone(),
                ),
            })
            .collect(),
        (MemberKind::Method, true) => {
            let usage = if descriptor::returns_void(&member.descriptor) {
                SiteUse::Put
            } else {
                SiteUse::Get
            };
            vec![Redirect {
                from: site(usage),
                to: call_stub,
            }]
        }
        (MemberKind::Method, false) => vec![Redirect {
            from: site(SiteUse::Call),
            to: call_stub,
        }],
    })
}

/// The member as the target version declares it.
fn emit(member: &MergedMember, target: &VersionId, body: Option<Body>) -> MemberDecl {
    let mut decl = MemberDecl::new(
        member.declared_name.clone(),
        member.descriptor.clone(),
        member.kind,
        member.access.for_version(target),
    );
    decl.is_static = member.is_static;
    decl.is_synthetic = member.compiler_generated;
    decl.body = body;
    decl
}

/// With the superclass gone, the first super-constructor call of every
/// constructor must call the root constructor instead.
fn detach_constructors(
    class: &ClassIdentity,
    old_super: &ClassIdentity,
    members: &mut [MemberDecl],
) -> Result<(), SplitError> {
    for decl in members.iter_mut().filter(|m| m.kind == MemberKind::Method && m.name == CONSTRUCTOR) {
        let Some(insns) = decl.body.as_mut().and_then(Body::insns_mut) else {
            continue;
        };
        let super_call = insns.iter_mut().find(|insn| {
            matches!(insn, Insn::Invoke { kind: InvokeKind::Special, owner, name, .. }
                if owner == old_super && name == CONSTRUCTOR)
        });
        if let Some(Insn::Invoke { owner, desc, .. }) = super_call {
            if desc.as_str() != "()V" {
                return Err(SplitError::SuperConstructorArguments {
                    class: class.clone(),
                    super_class: old_super.clone(),
                    descriptor: desc.clone(),
                });
            }
            *owner = ClassIdentity::object();
        }
    }
    Ok(())
}

fn ignored(class: &ClassIdentity, site: &str, d: &Directive) -> SplitWarning {
    SplitWarning::IgnoredDirective {
        class: class.clone(),
        site: site.to_string(),
        kind: d.kind,
    }
}

fn failed(merged: &MergedClass, member: &MergedMember, d: &Directive, reason: String) -> SplitWarning {
    SplitWarning::DirectiveFailed {
        class: merged.identity.clone(),
        member: member.declared_name.clone(),
        kind: d.kind,
        reason,
    }
}

/// Project one merged class that only references itself.
///
/// Directive refs can only resolve into `merged`; split runs that need refs
/// into other classes or patch hooks use a [`Projector`] directly.
pub fn split(
    merged: &MergedClass,
    target: &VersionId,
    directives: &ClassDirectives,
) -> Result<Projection, SplitError> {
    let hooks = HookRegistry::new();
    let class_of = |class: &ClassIdentity, version: &VersionId| {
        (class == &merged.identity).then(|| merged.view(version)).flatten()
    };
    Projector::new(&hooks, &class_of).project(merged, directives, target)
}
