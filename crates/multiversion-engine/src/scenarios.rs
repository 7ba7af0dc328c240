//! End-to-end runs over the fixtures: merge, store round trip, project,
//! link and verify, the way the runner drives the engine.

use crate::annotate::{self, ClassDirectives};
use crate::directive::HookRegistry;
use crate::fixtures::{self, CLASS_A, CLASS_A_TEST, CLASS_B, CLASS_C};
use crate::link::{Linker, MergedIndex, RedirectTable};
use crate::projector::Projector;
use crate::types::{ClassView, MergedClass};
use crate::verify;
use multiversion_core::class::{InvokeKind, TypeOp};
use multiversion_core::schema::{DirectiveAnnotation, RefAnnotation};
use multiversion_core::{
    Body, ClassIdentity, ClassTree, Insn, MemberDecl, MemberKey, RuntimeFault, VersionId, Visibility,
};
use std::collections::{BTreeMap, BTreeSet};

/// Merged fixture classes as the merge run stores them.
fn stored_merge_output() -> Vec<ClassTree> {
    let merger = fixtures::merger();
    [CLASS_A, CLASS_B, CLASS_C]
        .into_iter()
        .map(|class| {
            let merged = merger.merge(&class.into(), &fixtures::inputs(class)).unwrap();
            let json = serde_json::to_string(&annotate::encode(&merged)).unwrap();
            serde_json::from_str(&json).unwrap()
        })
        .collect()
}

struct SplitOutput {
    trees: BTreeMap<ClassIdentity, ClassTree>,
    violations: BTreeMap<ClassIdentity, Vec<String>>,
}

impl SplitOutput {
    fn tree(&self, class: &str) -> &ClassTree {
        &self.trees[&ClassIdentity::new(class)]
    }

    fn body(&self, class: &str, member: &str) -> &Body {
        self.tree(class)
            .members
            .iter()
            .find(|m| m.name == member)
            .and_then(|m| m.body.as_ref())
            .unwrap()
    }

    fn clean(&self) -> bool {
        self.violations.values().all(Vec::is_empty)
    }
}

fn split_run(trees: &[ClassTree], target: &str) -> SplitOutput {
    let target = VersionId::new(target);
    let versions: BTreeSet<VersionId> = fixtures::versions().into_iter().collect();

    let decoded: Vec<(MergedClass, ClassDirectives)> = trees
        .iter()
        .map(|tree| {
            let merged = match tree.merged {
                Some(_) => annotate::decode(tree).unwrap(),
                None => MergedClass::universal(tree, &versions),
            };
            (merged, ClassDirectives::from_tree(tree).unwrap())
        })
        .collect();
    let index: MergedIndex = decoded.iter().map(|(m, _)| m.clone()).collect();

    let hooks = HookRegistry::new();
    let lookup = |class: &ClassIdentity, version: &VersionId| -> Option<ClassView> { index.view(class, version) };
    let projector = Projector::new(&hooks, &lookup);

    let mut projected = Vec::new();
    let mut table = RedirectTable::new();
    for (merged, directives) in &decoded {
        if let Some(out) = projector.project(merged, directives, &target).unwrap().projected() {
            out.redirects.into_iter().for_each(|r| table.add(r));
            out.type_remaps.into_iter().for_each(|t| table.add_type(t));
            projected.push(out.tree);
        }
    }

    let linker = Linker::new(&index, &table, &target);
    let mut out = SplitOutput {
        trees: BTreeMap::new(),
        violations: BTreeMap::new(),
    };
    for mut tree in projected {
        linker.link(&mut tree).unwrap();
        out.violations
            .insert(tree.name.clone(), verify::verify(&tree, &target, &index));
        out.trees.insert(tree.name.clone(), tree);
    }
    out
}

#[test]
fn test_field_or_method_by_version() {
    let mut trees = stored_merge_output();
    trees.push(fixtures::class_a_test());

    let a = split_run(&trees, "a");
    let main = a.body(CLASS_A_TEST, "main").enter().unwrap();
    assert_eq!(
        main[5],
        Insn::field(
            multiversion_core::class::FieldAccess::Get,
            CLASS_A,
            "fieldA",
            "Ljava/lang/String;"
        )
    );
    // direct calls of the missing ClassA.methodB go to the stub
    assert_eq!(
        main[8],
        Insn::invoke(
            InvokeKind::Static,
            CLASS_A_TEST,
            "methodB",
            "(Lcom/example/ClassA;)Ljava/lang/String;"
        )
    );
    let test_a = a.tree(CLASS_A_TEST);
    assert!(test_a.members.iter().all(|m| m.name != "fieldToMethod"));
    assert!(test_a.members.iter().any(|m| m.name == "methodB"));
    assert!(a.clean(), "{:?}", a.violations);

    let b = split_run(&trees, "b");
    let main = b.body(CLASS_A_TEST, "main").enter().unwrap();
    let call_method_b = Insn::invoke(InvokeKind::Virtual, CLASS_A, "methodB", "()Ljava/lang/String;");
    assert_eq!(main[5], call_method_b);
    assert_eq!(main[8], call_method_b);
    assert!(b.tree(CLASS_A_TEST).members.iter().all(|m| m.name != "methodB"));
    assert!(b.clean(), "{:?}", b.violations);
}

fn class_b_user(call: Insn, desc: &str) -> ClassTree {
    ClassTree::new("com/example/ClassBUser", Visibility::Public).with_member(
        MemberDecl::method("use", desc, Visibility::Public)
            .with_static()
            .with_body(Body::code(1, vec![Insn::raw("ALOAD 0"), call, Insn::raw("ARETURN")])),
    )
}

#[test]
fn test_conflicting_members_demangle_per_version() {
    let mut trees = stored_merge_output();
    let stored_b = &trees[1];
    let physical: Vec<_> = stored_b.members.iter().map(|m| m.name.as_str()).collect();
    assert!(physical.contains(&"conflict$mv$a"));
    assert!(physical.contains(&"conflict$mv$b"));

    trees.push(class_b_user(
        Insn::invoke(InvokeKind::Virtual, CLASS_B, "conflict$mv$a", "()J"),
        "(Lcom/example/ClassB;)J",
    ));

    let a = split_run(&trees, "a");
    let conflict: Vec<_> = a
        .tree(CLASS_B)
        .members
        .iter()
        .filter(|m| m.name == "conflict")
        .map(|m| m.descriptor.as_str())
        .collect();
    assert_eq!(conflict, vec!["()J"]);
    assert_eq!(
        a.body("com/example/ClassBUser", "use").enter().unwrap()[1],
        Insn::invoke(InvokeKind::Virtual, CLASS_B, "conflict", "()J")
    );
    assert!(a.clean(), "{:?}", a.violations);

    // the wide variant does not exist in b
    let b = split_run(&trees, "b");
    assert_eq!(b.violations[&ClassIdentity::new("com/example/ClassBUser")].len(), 1);
}

#[test]
fn test_superclass_override_and_bridge() {
    let mut trees = stored_merge_output();
    let stored_b = &trees[1];
    assert!(stored_b.super_class.is_object());
    assert!(stored_b
        .members
        .iter()
        .any(|m| m.name == "mv$castTo$com_example_ClassA"));

    let mut user = class_b_user(
        Insn::invoke(
            InvokeKind::Virtual,
            CLASS_B,
            "mv$castTo$com_example_ClassA",
            "()Lcom/example/ClassA;",
        ),
        "(Lcom/example/ClassB;)Lcom/example/ClassA;",
    );
    trees.push(user.clone());

    let b = split_run(&trees, "b");
    assert_eq!(b.tree(CLASS_B).super_class, ClassIdentity::new(CLASS_A));
    assert_eq!(
        b.body("com/example/ClassBUser", "use").enter().unwrap()[1],
        Insn::Type {
            kind: TypeOp::CheckCast,
            class: CLASS_A.into()
        }
    );
    assert!(b.clean(), "{:?}", b.violations);

    let a = split_run(&trees, "a");
    assert!(a.tree(CLASS_B).super_class.is_object());
    assert!(!a.clean());

    // removing the caller in a leaves nothing to leak
    user.members[0]
        .directives
        .push(DirectiveAnnotation::Remove { versions: vec!["a".into()] });
    *trees.last_mut().unwrap() = user;
    assert!(split_run(&trees, "a").clean());
}

#[test]
fn test_stub_without_body_for_target() {
    let mut trees = stored_merge_output();
    let stored_c = &mut trees[2];
    let legacy = stored_c
        .member_mut(&MemberKey::method("legacy", "()V"))
        .unwrap();
    legacy.directives.push(DirectiveAnnotation::Stub {
        versions: vec!["b".into()],
        target: RefAnnotation::default(),
        field: false,
    });

    let b = split_run(&trees, "b");
    match b.body(CLASS_C, "legacy").enter() {
        Err(RuntimeFault::Unimplemented { member, version, .. }) => {
            assert_eq!(member, "legacy");
            assert_eq!(version, VersionId::new("b"));
        }
        other => panic!("expected a failing placeholder, got {other:?}"),
    }

    let a = split_run(&trees, "a");
    assert!(a.body(CLASS_C, "legacy").enter().is_ok());
}

#[test]
fn test_remove_on_superclass_edge() {
    let mut trees = stored_merge_output();
    trees.push(fixtures::class_a_test());

    let a = split_run(&trees, "a");
    let test_a = a.tree(CLASS_A_TEST);
    assert!(test_a.super_class.is_object());
    assert!(a
        .body(CLASS_A_TEST, "<init>")
        .enter()
        .unwrap()
        .contains(&Insn::invoke(InvokeKind::Special, "java/lang/Object", "<init>", "()V")));

    let b = split_run(&trees, "b");
    assert_eq!(b.tree(CLASS_A_TEST).super_class, ClassIdentity::new(CLASS_A));
}

fn caller_of(name: &str, desc: &str, insns: Vec<Insn>) -> ClassTree {
    ClassTree::new("com/example/Caller", Visibility::Public).with_member(
        MemberDecl::method(name, desc, Visibility::Public)
            .with_static()
            .with_body(Body::code(1, insns)),
    )
}

#[test]
fn test_subclass_call_reaches_stub() {
    let mut trees = stored_merge_output();
    trees.push(fixtures::class_a_test());
    trees.push(ClassTree::new("com/example/Sub", Visibility::Public).with_super(CLASS_A));
    trees.push(caller_of(
        "read",
        "(Lcom/example/Sub;)Ljava/lang/String;",
        vec![
            Insn::raw("ALOAD 0"),
            Insn::invoke(InvokeKind::Virtual, "com/example/Sub", "methodB", "()Ljava/lang/String;"),
            Insn::raw("ARETURN"),
        ],
    ));

    let a = split_run(&trees, "a");
    assert_eq!(
        a.body("com/example/Caller", "read").enter().unwrap()[1],
        Insn::invoke(
            InvokeKind::Static,
            CLASS_A_TEST,
            "methodB",
            "(Lcom/example/ClassA;)Ljava/lang/String;"
        )
    );
    assert!(a.clean(), "{:?}", a.violations);

    // b inherits the real methodB
    let b = split_run(&trees, "b");
    assert_eq!(
        b.body("com/example/Caller", "read").enter().unwrap()[1],
        Insn::invoke(InvokeKind::Virtual, "com/example/Sub", "methodB", "()Ljava/lang/String;")
    );
}

#[test]
fn test_class_stub_replaces_missing_class() {
    const LEGACY: &str = "com/example/Legacy";
    const LEGACY_STUB: &str = "com/example/LegacyStub";

    let mut stub = ClassTree::new(LEGACY_STUB, Visibility::Public).with_member(
        MemberDecl::method("<init>", "()V", Visibility::Public).with_body(Body::code(
            1,
            vec![
                Insn::raw("ALOAD 0"),
                Insn::invoke(InvokeKind::Special, "java/lang/Object", "<init>", "()V"),
                Insn::raw("RETURN"),
            ],
        )),
    );
    stub.directives.push(DirectiveAnnotation::Stub {
        versions: vec!["a".into()],
        target: RefAnnotation {
            value: LEGACY.into(),
            ..Default::default()
        },
        field: false,
    });

    let mut trees = stored_merge_output();
    trees.push(stub);
    trees.push(caller_of(
        "make",
        "()Lcom/example/Legacy;",
        vec![
            Insn::Type {
                kind: TypeOp::New,
                class: LEGACY.into(),
            },
            Insn::raw("DUP"),
            Insn::invoke(InvokeKind::Special, LEGACY, "<init>", "()V"),
            Insn::raw("ARETURN"),
        ],
    ));

    let a = split_run(&trees, "a");
    let make = a.tree("com/example/Caller").members[0].clone();
    assert_eq!(make.descriptor, "()Lcom/example/LegacyStub;");
    let insns = make.body.as_ref().unwrap().enter().unwrap();
    assert_eq!(
        insns[0],
        Insn::Type {
            kind: TypeOp::New,
            class: LEGACY_STUB.into(),
        }
    );
    assert_eq!(insns[2], Insn::invoke(InvokeKind::Special, LEGACY_STUB, "<init>", "()V"));
    assert!(a.clean(), "{:?}", a.violations);

    // b has no stand-in, so the stub class is not emitted
    let b = split_run(&trees, "b");
    assert!(!b.trees.contains_key(&ClassIdentity::new(LEGACY_STUB)));
}
