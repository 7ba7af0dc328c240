//! Test fixtures: `ClassA`, `ClassB` and `ClassC` as versions `a` and `b`
//! declare them, plus `ClassATest`, code written against merged `ClassA`.

use crate::inheritance::HierarchyIndex;
use crate::merger::{MergeOptions, Merger};
use crate::types::MergedClass;
use multiversion_core::class::{FieldAccess, InvokeKind, TypeOp};
use multiversion_core::schema::{DirectiveAnnotation, RefAnnotation};
use multiversion_core::{Body, ClassTree, Insn, MemberDecl, VersionId, Visibility};

pub const CLASS_A: &str = "com/example/ClassA";
pub const CLASS_B: &str = "com/example/ClassB";
pub const CLASS_C: &str = "com/example/ClassC";
pub const CLASS_A_TEST: &str = "com/example/ClassATest";

const OBJECT: &str = "java/lang/Object";
const STRING: &str = "Ljava/lang/String;";

fn ctor(super_class: &str) -> MemberDecl {
    MemberDecl::method("<init>", "()V", Visibility::Public).with_body(Body::code(
        1,
        vec![
            Insn::raw("ALOAD 0"),
            Insn::invoke(InvokeKind::Special, super_class, "<init>", "()V"),
            Insn::raw("RETURN"),
        ],
    ))
}

fn returns(insns: Vec<Insn>) -> Body {
    let mut insns = insns;
    insns.push(Insn::raw("RETURN"));
    Body::code(1, insns)
}

fn class_a(version: &str) -> ClassTree {
    let tree = ClassTree::new(CLASS_A, Visibility::Public);
    match version {
        "a" => tree
            .with_member(MemberDecl::field("fieldA", STRING, Visibility::Public))
            .with_member(ctor(OBJECT))
            .with_member(MemberDecl::method("methodA", "()V", Visibility::Public).with_body(returns(vec![
                Insn::raw("ALOAD 0"),
                Insn::field(FieldAccess::Get, CLASS_A, "fieldA", STRING),
                Insn::raw("POP"),
            ])))
            .with_member(MemberDecl::method("methodC", "()V", Visibility::Public).with_body(returns(vec![]))),
        _ => tree
            .with_member(ctor(OBJECT))
            .with_member(MemberDecl::method("methodA", "()V", Visibility::Public).with_body(returns(vec![])))
            .with_member(
                MemberDecl::method("methodC", "()V", Visibility::Protected).with_body(returns(vec![])),
            )
            .with_member(
                MemberDecl::method("methodB", "()Ljava/lang/String;", Visibility::Public).with_body(Body::code(
                    1,
                    vec![Insn::raw("LDC \"b\""), Insn::raw("ARETURN")],
                )),
            ),
    }
}

fn class_b(version: &str) -> ClassTree {
    match version {
        "a" => ClassTree::new(CLASS_B, Visibility::Public)
            .with_member(ctor(OBJECT))
            .with_member(MemberDecl::method("conflict", "()J", Visibility::Public).with_body(Body::code(
                1,
                vec![Insn::raw("LCONST_1"), Insn::raw("LRETURN")],
            ))),
        _ => ClassTree::new(CLASS_B, Visibility::Public)
            .with_super(CLASS_A)
            .with_member(ctor(CLASS_A))
            .with_member(
                MemberDecl::method("<init>", "(Ljava/lang/String;)V", Visibility::Public).with_body(Body::code(
                    2,
                    vec![
                        Insn::raw("ALOAD 0"),
                        Insn::invoke(InvokeKind::Special, CLASS_A, "<init>", "()V"),
                        Insn::raw("RETURN"),
                    ],
                )),
            )
            .with_member(MemberDecl::method("conflict", "()I", Visibility::Public).with_body(Body::code(
                1,
                vec![Insn::raw("ICONST_1"), Insn::raw("IRETURN")],
            ))),
    }
}

fn class_c(version: &str) -> ClassTree {
    let conflict = match version {
        "a" => "()J",
        _ => "()I",
    };
    let tree = ClassTree::new(CLASS_C, Visibility::Public)
        .with_super(CLASS_B)
        .with_member(MemberDecl::field("fieldA", STRING, Visibility::Private))
        .with_member(ctor(CLASS_B))
        .with_member(MemberDecl::method("callConflict", "()V", Visibility::Public).with_body(returns(vec![
            Insn::raw("ALOAD 0"),
            Insn::invoke(InvokeKind::Virtual, CLASS_B, "conflict", conflict),
            Insn::raw("POP"),
        ])));
    match version {
        "a" => tree.with_member(
            MemberDecl::method("legacy", "()V", Visibility::Package)
                .with_static()
                .with_body(returns(vec![])),
        ),
        _ => tree.with_member(MemberDecl::method("modern", "()V", Visibility::Public).with_body(returns(vec![]))),
    }
}

pub fn versions() -> Vec<VersionId> {
    vec!["a".into(), "b".into()]
}

/// Per-version trees of `class`, in provider order.
pub fn inputs(class: &str) -> Vec<(VersionId, ClassTree)> {
    let build: fn(&str) -> ClassTree = match class {
        CLASS_A => class_a,
        CLASS_B => class_b,
        CLASS_C => class_c,
        other => panic!("no fixture for {other}"),
    };
    versions()
        .into_iter()
        .map(|v| {
            let tree = build(v.as_str());
            (v, tree)
        })
        .collect()
}

/// Merger whose hierarchy knows every fixture class.
pub fn merger() -> Merger<HierarchyIndex> {
    let all: Vec<(VersionId, ClassTree)> = [CLASS_A, CLASS_B, CLASS_C]
        .into_iter()
        .flat_map(inputs)
        .collect();
    let hierarchy = HierarchyIndex::from_trees(all.iter().map(|(v, t)| (v, t)));
    Merger::new(hierarchy, MergeOptions::default())
}

fn merged(class: &str) -> MergedClass {
    merger()
        .merge(&class.into(), &inputs(class))
        .unwrap_or_else(|e| panic!("fixture {class} does not merge: {e}"))
}

pub fn merged_class_a() -> MergedClass {
    merged(CLASS_A)
}

pub fn merged_class_b() -> MergedClass {
    merged(CLASS_B)
}

pub fn merged_class_c() -> MergedClass {
    merged(CLASS_C)
}

fn versions_of(v: &[&str]) -> Vec<VersionId> {
    v.iter().map(|v| VersionId::new(*v)).collect()
}

/// Code compiled against merged `ClassA`.
///
/// `fieldToMethod` reads `fieldA` in `a` and calls `methodB` in `b`; the
/// static `methodB` stands in for `ClassA.methodB` in `a`, where it does not
/// exist. The class only extends `ClassA` in `b`.
pub fn class_a_test() -> ClassTree {
    let accessor = "(Lcom/example/ClassA;)Ljava/lang/String;";

    let field_to_method = MemberDecl::method("fieldToMethod", accessor, Visibility::Public)
        .with_static()
        .with_body(Body::code(1, vec![Insn::raw("ACONST_NULL"), Insn::raw("ARETURN")]))
        .with_directive(DirectiveAnnotation::Replace {
            versions: versions_of(&["a"]),
            target: RefAnnotation {
                member: "fieldA".into(),
                ..Default::default()
            },
            field: true,
        })
        .with_directive(DirectiveAnnotation::Replace {
            versions: versions_of(&["b"]),
            target: RefAnnotation {
                member: "methodB".into(),
                ..Default::default()
            },
            field: false,
        });

    let method_b = MemberDecl::method("methodB", accessor, Visibility::Public)
        .with_static()
        .with_body(Body::code(
            1,
            vec![
                Insn::raw("ALOAD 0"),
                Insn::field(FieldAccess::Get, CLASS_A, "fieldA", STRING),
                Insn::raw("ARETURN"),
            ],
        ))
        .with_directive(DirectiveAnnotation::Stub {
            versions: versions_of(&["a"]),
            target: RefAnnotation::default(),
            field: false,
        })
        .with_directive(DirectiveAnnotation::Remove {
            versions: versions_of(&["b"]),
        });

    let main = MemberDecl::method("main", "([Ljava/lang/String;)V", Visibility::Public)
        .with_static()
        .with_body(Body::code(
            2,
            vec![
                Insn::Type {
                    kind: TypeOp::New,
                    class: CLASS_A.into(),
                },
                Insn::raw("DUP"),
                Insn::invoke(InvokeKind::Special, CLASS_A, "<init>", "()V"),
                Insn::raw("ASTORE 1"),
                Insn::raw("ALOAD 1"),
                Insn::invoke(InvokeKind::Static, CLASS_A_TEST, "fieldToMethod", accessor),
                Insn::raw("POP"),
                Insn::raw("ALOAD 1"),
                Insn::invoke(InvokeKind::Virtual, CLASS_A, "methodB", "()Ljava/lang/String;"),
                Insn::raw("POP"),
                Insn::raw("RETURN"),
            ],
        ));

    let mut tree = ClassTree::new(CLASS_A_TEST, Visibility::Public)
        .with_super(CLASS_A)
        .with_interface("java/lang/Runnable")
        .with_member(ctor(CLASS_A))
        .with_member(MemberDecl::method("run", "()V", Visibility::Public).with_body(returns(vec![])))
        .with_member(field_to_method)
        .with_member(method_b)
        .with_member(main);
    tree.super_directives.push(DirectiveAnnotation::Remove {
        versions: versions_of(&["a"]),
    });
    tree
}
