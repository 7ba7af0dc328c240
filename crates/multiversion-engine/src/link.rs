//! Linker: rewrites member references in projected bodies.
//!
//! Code compiled against merged classes refers to physical (possibly
//! mangled) names and to synthetic cast accessors. After projection every
//! body is rewritten, in this order:
//!
//! 1. calls to a cast accessor valid in the target become a `checkcast` to
//!    the accessor's return type;
//! 2. references to merged members switch to their declared names;
//! 3. call-site redirects recorded by `Replace` and `Stub` are applied. A
//!    site whose owner only inherits the member matches a redirect recorded
//!    on the declaring superclass;
//! 4. classes replaced by a class-level `Stub` are renamed everywhere.
//!
//! A redirected constructor call drops its `NEW`/`DUP` pair, or retargets
//! the `NEW` when the replacement is itself a constructor. A redirect whose
//! value type differs from the one the site expected is followed by a
//! `checkcast`.

use crate::error::SplitError;
use crate::types::{CallSite, ClassView, MergedClass, Redirect, SiteUse, TypeRemap, CONSTRUCTOR};
use multiversion_core::class::{InvokeKind, TypeOp};
use multiversion_core::descriptor;
use multiversion_core::{ClassIdentity, ClassTree, Insn, MemberKey, MemberKind, VersionId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Immutable snapshot of every merged class in a split run.
#[derive(Debug, Clone, Default)]
pub struct MergedIndex {
    classes: HashMap<ClassIdentity, Arc<MergedClass>>,
}

impl MergedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: MergedClass) {
        self.classes.insert(class.identity.clone(), Arc::new(class));
    }

    pub fn get(&self, class: &ClassIdentity) -> Option<&Arc<MergedClass>> {
        self.classes.get(class)
    }

    pub fn contains(&self, class: &ClassIdentity) -> bool {
        self.classes.contains_key(class)
    }

    pub fn view(&self, class: &ClassIdentity, version: &VersionId) -> Option<ClassView> {
        self.classes.get(class).and_then(|c| c.view(version))
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<MergedClass>> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<MergedClass> for MergedIndex {
    fn from_iter<I: IntoIterator<Item = MergedClass>>(iter: I) -> Self {
        let mut index = Self::new();
        for class in iter {
            index.insert(class);
        }
        index
    }
}

/// Redirects and type remaps pooled from every class of a split run. When
/// two entries claim the same call site or class the first one is kept.
#[derive(Debug, Clone, Default)]
pub struct RedirectTable {
    sites: HashMap<CallSite, Insn>,
    types: HashMap<ClassIdentity, ClassIdentity>,
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, redirect: Redirect) {
        match self.sites.get(&redirect.from) {
            Some(existing) if *existing != redirect.to => {
                tracing::warn!(site = %redirect.from, "Conflicting redirects, keeping the first");
            }
            Some(_) => {}
            None => {
                self.sites.insert(redirect.from, redirect.to);
            }
        }
    }

    pub fn add_type(&mut self, remap: TypeRemap) {
        match self.types.get(&remap.from) {
            Some(existing) if *existing != remap.to => {
                tracing::warn!(
                    class = %remap.from,
                    kept = %existing,
                    dropped = %remap.to,
                    "Conflicting class stubs, keeping the first"
                );
            }
            Some(_) => {}
            None => {
                self.types.insert(remap.from, remap.to);
            }
        }
    }

    pub fn get(&self, site: &CallSite) -> Option<&Insn> {
        self.sites.get(site)
    }

    pub fn type_for(&self, class: &ClassIdentity) -> Option<&ClassIdentity> {
        self.types.get(class)
    }

    /// Number of call-site redirects.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty() && self.types.is_empty()
    }
}

impl FromIterator<Redirect> for RedirectTable {
    fn from_iter<I: IntoIterator<Item = Redirect>>(iter: I) -> Self {
        let mut table = Self::new();
        for redirect in iter {
            table.add(redirect);
        }
        table
    }
}

pub struct Linker<'a> {
    index: &'a MergedIndex,
    redirects: &'a RedirectTable,
    target: &'a VersionId,
}

impl<'a> Linker<'a> {
    pub fn new(index: &'a MergedIndex, redirects: &'a RedirectTable, target: &'a VersionId) -> Self {
        Self {
            index,
            redirects,
            target,
        }
    }

    /// Rewrite every body of `tree`, then apply class remaps to the whole
    /// tree. Returns the number of instructions and declarations changed.
    pub fn link(&self, tree: &mut ClassTree) -> Result<usize, SplitError> {
        let mut changed = 0;
        for member in &mut tree.members {
            let Some(insns) = member.body.as_mut().and_then(|b| b.insns_mut()) else {
                continue;
            };
            changed += self.link_body(&tree.name, &member.name, insns)?;
        }
        changed += self.remap_types(tree);
        if changed > 0 {
            tracing::debug!(class = %tree.name, target = %self.target, changed, "Linked class");
        }
        Ok(changed)
    }

    fn link_body(
        &self,
        class: &ClassIdentity,
        member: &str,
        insns: &mut Vec<Insn>,
    ) -> Result<usize, SplitError> {
        let mut changed = 0;
        let mut i = 0;
        while i < insns.len() {
            if let Some(cast) = self.bridge_cast(&insns[i]) {
                insns[i] = cast;
                changed += 1;
                i += 1;
                continue;
            }
            let mut touched = false;
            if let Some(demangled) = self.demangle(&insns[i]) {
                insns[i] = demangled;
                touched = true;
            }
            if let Some((site, to)) = self.redirect_for(&insns[i]) {
                insns[i] = to.clone();
                touched = true;
                if site.name == CONSTRUCTOR && site.usage == SiteUse::Call {
                    i = adapt_constructor(class, member, insns, i, &site)?;
                } else if let Some(cast) = return_cast(&site, to) {
                    let discarded = matches!(
                        insns.get(i + 1),
                        Some(Insn::Raw { text }) if text.trim().eq_ignore_ascii_case("POP")
                    );
                    if !discarded {
                        insns.insert(i + 1, cast);
                        i += 1;
                        changed += 1;
                    }
                }
            }
            if touched {
                changed += 1;
            }
            i += 1;
        }
        Ok(changed)
    }

    /// The redirect for `insn`, looked up on its owner and then on each
    /// superclass the target version gives it, up to the class that declares
    /// the member.
    fn redirect_for(&self, insn: &Insn) -> Option<(CallSite, &'a Insn)> {
        let mut site = CallSite::of(insn)?;
        let kind = match site.usage {
            SiteUse::Call => MemberKind::Method,
            SiteUse::Get | SiteUse::Put => MemberKind::Field,
        };
        let redirects: &'a RedirectTable = self.redirects;
        let mut seen = HashSet::new();
        loop {
            if let Some(to) = redirects.get(&site) {
                return Some((site, to));
            }
            if site.name == CONSTRUCTOR || !seen.insert(site.owner.clone()) {
                return None;
            }
            let view = self.index.view(&site.owner, self.target)?;
            let declares = view
                .members
                .iter()
                .any(|m| m.name == site.name && m.descriptor == site.descriptor && m.kind == kind);
            if declares {
                return None;
            }
            site.owner = view.super_class;
        }
    }

    fn bridge_cast(&self, insn: &Insn) -> Option<Insn> {
        let Insn::Invoke { owner, name, desc, .. } = insn else {
            return None;
        };
        let merged = self.index.get(owner)?;
        let member = merged.member(&MemberKey::method(name.clone(), desc.clone()))?;
        if !member.is_bridge() || !member.in_version(self.target) {
            return None;
        }
        let class = descriptor::return_type(desc)
            .ok()
            .and_then(descriptor::object_type)?;
        Some(Insn::Type {
            kind: TypeOp::CheckCast,
            class,
        })
    }

    fn demangle(&self, insn: &Insn) -> Option<Insn> {
        let (owner, name, desc, kind) = match insn {
            Insn::Field { owner, name, desc, .. } => (owner, name, desc, MemberKind::Field),
            Insn::Invoke { owner, name, desc, .. } => (owner, name, desc, MemberKind::Method),
            _ => return None,
        };
        let merged = self.index.get(owner)?;
        let member = merged.member(&MemberKey::new(name.clone(), desc.clone(), kind))?;
        if !member.is_mangled() {
            return None;
        }
        let mut out = insn.clone();
        if let Insn::Field { name, .. } | Insn::Invoke { name, .. } = &mut out {
            *name = member.declared_name.clone();
        }
        Some(out)
    }

    fn remap_types(&self, tree: &mut ClassTree) -> usize {
        if self.redirects.type_count() == 0 {
            return 0;
        }
        let mut changed = 0;
        changed += usize::from(self.remap_class(&mut tree.super_class));
        for interface in &mut tree.interfaces {
            changed += usize::from(self.remap_class(interface));
        }
        for member in &mut tree.members {
            changed += usize::from(self.remap_desc(&mut member.descriptor));
            let Some(insns) = member.body.as_mut().and_then(|b| b.insns_mut()) else {
                continue;
            };
            for insn in insns.iter_mut() {
                let touched = match insn {
                    Insn::Field { owner, desc, .. } | Insn::Invoke { owner, desc, .. } => {
                        // both sides run
                        self.remap_class(owner) | self.remap_desc(desc)
                    }
                    Insn::Type { class, .. } => self.remap_class(class),
                    Insn::Raw { .. } => false,
                };
                changed += usize::from(touched);
            }
        }
        changed
    }

    /// Rename a class, or the element class of an array type.
    fn remap_class(&self, class: &mut ClassIdentity) -> bool {
        if class.as_str().starts_with('[') {
            let mut desc = class.as_str().to_string();
            if self.remap_desc(&mut desc) {
                *class = ClassIdentity::new(desc);
                return true;
            }
            return false;
        }
        match self.redirects.type_for(class) {
            Some(to) => {
                *class = to.clone();
                true
            }
            None => false,
        }
    }

    fn remap_desc(&self, desc: &mut String) -> bool {
        match descriptor::map_classes(desc, |c| self.redirects.type_for(c).cloned()) {
            Some(mapped) => {
                *desc = mapped;
                true
            }
            None => false,
        }
    }
}

/// Drop or retarget the `NEW`/`DUP` pair feeding the redirected constructor
/// call at `at`. Returns the call's new position.
fn adapt_constructor(
    class: &ClassIdentity,
    member: &str,
    insns: &mut Vec<Insn>,
    at: usize,
    site: &CallSite,
) -> Result<usize, SplitError> {
    let Some(new_at) = find_new(insns, at, &site.owner) else {
        return Err(SplitError::UnmatchedConstructor {
            class: class.clone(),
            member: member.to_string(),
            site: site.to_string(),
        });
    };
    match &mut insns[at] {
        Insn::Invoke { kind, owner, name, .. } if name == CONSTRUCTOR => {
            *kind = InvokeKind::Special;
            insns[new_at] = Insn::Type {
                kind: TypeOp::New,
                class: owner.clone(),
            };
            Ok(at)
        }
        _ => {
            insns.drain(new_at..new_at + 2);
            Ok(at - 2)
        }
    }
}

/// Position of the `NEW owner; DUP` pair matching the constructor call at
/// `at`, skipping pairs consumed by nested constructions of the same class.
fn find_new(insns: &[Insn], at: usize, owner: &ClassIdentity) -> Option<usize> {
    let mut depth = 0usize;
    for j in (0..at).rev() {
        match &insns[j] {
            Insn::Invoke { kind: InvokeKind::Special, owner: o, name, .. }
                if o == owner && name == CONSTRUCTOR =>
            {
                depth += 1;
            }
            Insn::Type { kind: TypeOp::New, class } if class == owner => {
                if depth > 0 {
                    depth -= 1;
                    continue;
                }
                let dup = matches!(
                    insns.get(j + 1),
                    Some(Insn::Raw { text }) if text.trim().eq_ignore_ascii_case("DUP")
                );
                return dup.then_some(j);
            }
            _ => {}
        }
    }
    None
}

/// A `checkcast` to the type the site expected, when the redirect leaves a
/// different reference type on the stack.
fn return_cast(site: &CallSite, to: &Insn) -> Option<Insn> {
    let expected = match site.usage {
        SiteUse::Call => descriptor::return_type(&site.descriptor).ok()?,
        SiteUse::Get => site.descriptor.as_str(),
        SiteUse::Put => return None,
    };
    let produced = match to {
        Insn::Invoke { desc, .. } => descriptor::return_type(desc).ok()?,
        Insn::Field { access, desc, .. } if access.is_get() => desc.as_str(),
        _ => return None,
    };
    if expected == produced {
        return None;
    }
    let class = if expected.starts_with('[') {
        ClassIdentity::new(expected)
    } else {
        descriptor::object_type(expected)?
    };
    Some(Insn::Type {
        kind: TypeOp::CheckCast,
        class,
    })
}
