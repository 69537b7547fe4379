use schemac_core::parsed::{
    ParsedAugment, ParsedDeviate, ParsedDeviateProps, ParsedDeviation, ParsedExtInstance, ParsedExtensionDef,
    ParsedFeature, ParsedGrouping, ParsedIdentity, ParsedModule, ParsedNode, ParsedNodeKind, ParsedRefine,
    ParsedType, ParsedUses,
};
use schemac_core::{ContextOptions, FeatureSelection, ModuleId, NodeKind, SchemaContext, Status, Value};

fn identity(name: &str, bases: &[&str]) -> ParsedIdentity {
    ParsedIdentity {
        name: name.into(),
        bases: bases.iter().map(|b| b.to_string()).collect(),
        ..Default::default()
    }
}

fn base_module() -> ParsedModule {
    let mut m = ParsedModule::new("base", "b");
    m.identities.push(identity("root", &[]));
    m.features.push(ParsedFeature {
        name: "fast".into(),
        ..Default::default()
    });
    m.extensions.push(ParsedExtensionDef {
        name: "tag".into(),
        argument: Some("value".into()),
        status: None,
    });
    m.data = vec![ParsedNode::container(
        "top",
        vec![
            ParsedNode::leaf("x", ParsedType::named("string")),
            ParsedNode::leaf("y", ParsedType::named("uint8")),
        ],
    )];
    m
}

fn load(sctx: &mut SchemaContext, modules: Vec<ParsedModule>) -> Vec<ModuleId> {
    modules
        .into_iter()
        .map(|m| sctx.load_module(m).unwrap())
        .collect()
}

#[test]
fn test_identity_derived_across_modules() {
    let mut user = ParsedModule::new("user", "u").import("base", "b");
    user.identities.push(identity("child", &["b:root"]));

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), user]);
    sctx.implement(ids[1], FeatureSelection::None).unwrap();

    let root = sctx.find_identity(ids[0], "root").unwrap();
    let child = sctx.find_identity(ids[1], "child").unwrap();
    assert_eq!(sctx.identities[child].bases, vec![root]);
    assert_eq!(sctx.identities[root].derived, vec![child]);
    // referencing a base implements its module
    assert!(sctx.is_implemented(ids[0]));
    assert_eq!(sctx.feature_enabled(ids[0], "fast"), Some(false));
}

#[test]
fn test_status_lattice_on_identity_bases() {
    let mut m = ParsedModule::new("m", "m");
    m.identities.push(identity("root", &[]));
    m.identities.push(ParsedIdentity {
        status: Some(Status::Deprecated),
        ..identity("child", &["root"])
    });

    let mut sctx = SchemaContext::new();
    let id = sctx.load_module(m).unwrap();
    let err = sctx.implement(id, FeatureSelection::None).unwrap_err();
    assert!(err.message().contains(
        "A deprecated definition \"m:child\" is not permitted to reference a current definition \"m:root\"."
    ));

    let mut m = ParsedModule::new("n", "n");
    m.identities.push(ParsedIdentity {
        status: Some(Status::Obsolete),
        ..identity("root", &[])
    });
    m.identities.push(identity("child", &["root"]));
    let id = sctx.load_module(m).unwrap();
    sctx.implement(id, FeatureSelection::None).unwrap();
}

#[test]
fn test_extension_instance_and_implicit_implement() {
    let mut user = ParsedModule::new("user", "u").import("base", "b");
    user.exts.push(ParsedExtInstance {
        name: "b:tag".into(),
        argument: Some("hello".into()),
        substmts: Vec::new(),
    });

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), user.clone()]);
    sctx.implement(ids[1], FeatureSelection::None).unwrap();
    assert!(sctx.is_implemented(ids[0]));
    let exts = &sctx.compiled(ids[1]).unwrap().exts;
    assert_eq!(exts.len(), 1);

    let mut sctx = SchemaContext::with_options(ContextOptions {
        implicit_implement: false,
    });
    let ids = load(&mut sctx, vec![base_module(), user]);
    let err = sctx.implement(ids[1], FeatureSelection::None).unwrap_err();
    assert!(err.message().contains("Module \"base\" is not implemented."));
    assert!(!sctx.is_implemented(ids[1]));
    assert!(!sctx.is_implemented(ids[0]));
}

#[test]
fn test_extension_argument_mismatch() {
    let mut user = ParsedModule::new("user", "u").import("base", "b");
    user.exts.push(ParsedExtInstance {
        name: "b:tag".into(),
        argument: None,
        substmts: Vec::new(),
    });
    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), user]);
    let err = sctx.implement(ids[1], FeatureSelection::None).unwrap_err();
    assert!(err.message().contains("Extension instance \"b:tag\" misses argument \"value\"."));
}

#[test]
fn test_undeclared_feature_reference() {
    let mut m = ParsedModule::new("m", "m");
    m.features.push(ParsedFeature {
        name: "f1".into(),
        if_features: vec!["f2".into()],
        ..Default::default()
    });
    let mut sctx = SchemaContext::new();
    let id = sctx.load_module(m).unwrap();
    let err = sctx.implement(id, FeatureSelection::All).unwrap_err();
    assert!(err.message().contains("unable to find feature \"f2\""));
    assert!(!sctx.is_implemented(id));
}

#[test]
fn test_cross_module_if_feature() {
    let mut user = ParsedModule::new("user", "u").import("base", "b");
    let mut gated = ParsedNode::leaf("gated", ParsedType::named("string"));
    gated.if_features = vec!["b:fast".into()];
    user.data = vec![gated];

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), user.clone()]);
    sctx.implement(ids[0], FeatureSelection::All).unwrap();
    sctx.implement(ids[1], FeatureSelection::None).unwrap();
    assert!(sctx.find_top_node(ids[1], "gated").is_some());

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), user]);
    sctx.implement(ids[1], FeatureSelection::None).unwrap();
    assert!(sctx.find_top_node(ids[1], "gated").is_none());
}

#[test]
fn test_failed_compile_can_be_retried() {
    let mut m = ParsedModule::new("m", "m");
    m.identities.push(identity("root", &[]));
    m.identities.push(identity("child", &["root"]));
    m.data = vec![ParsedNode::leaf("x", ParsedType::named("missing"))];

    let mut sctx = SchemaContext::new();
    let id = sctx.load_module(m).unwrap();
    let first = sctx.implement(id, FeatureSelection::None).unwrap_err();
    let child = sctx.find_identity(id, "child").unwrap();
    let root = sctx.find_identity(id, "root").unwrap();
    assert!(sctx.identities[child].bases.is_empty());
    assert!(sctx.identities[root].derived.is_empty());

    let second = sctx.implement(id, FeatureSelection::None).unwrap_err();
    assert_eq!(first, second);
    assert!(sctx.identities[root].derived.is_empty());
}

#[test]
fn test_uses_refine_and_augment() {
    let grouping = ParsedGrouping {
        name: "g".into(),
        children: vec![ParsedNode::container(
            "c",
            vec![
                ParsedNode::leaf("x", ParsedType::named("string")),
                ParsedNode::leaf("y", ParsedType::named("int8")),
            ],
        )],
        ..Default::default()
    };
    let uses = ParsedNode::new(
        "",
        ParsedNodeKind::Uses(ParsedUses {
            grouping: "g".into(),
            refines: vec![
                ParsedRefine {
                    target: "c/x".into(),
                    defaults: vec!["hello".into()],
                    ..Default::default()
                },
                ParsedRefine {
                    target: "c/y".into(),
                    mandatory: Some(true),
                    ..Default::default()
                },
            ],
            augments: vec![ParsedAugment {
                target: "c".into(),
                children: vec![ParsedNode::leaf("added", ParsedType::named("boolean"))],
                ..Default::default()
            }],
        }),
    );
    let mut m = ParsedModule::new("m", "m");
    m.groupings.push(grouping);
    m.data = vec![ParsedNode::container("top", vec![uses])];

    let mut sctx = SchemaContext::new();
    let id = sctx.load_module(m).unwrap();
    sctx.implement(id, FeatureSelection::None).unwrap();

    let tree = sctx.compiled(id).unwrap();
    let top = sctx.find_top_node(id, "top").unwrap();
    let c = sctx.find_child(tree, top, "c").unwrap();
    let x = sctx.find_child(tree, c, "x").unwrap();
    let y = sctx.find_child(tree, c, "y").unwrap();
    assert!(sctx.find_child(tree, c, "added").is_some());

    match &tree.node(x).kind {
        NodeKind::Leaf {
            default: Some(Value::String(s)),
            ..
        } => assert_eq!(&*sctx.str(*s), "hello"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(tree.node(y).kind, NodeKind::Leaf { mandatory: true, .. }));
}

#[test]
fn test_refine_target_missing() {
    let grouping = ParsedGrouping {
        name: "g".into(),
        children: vec![ParsedNode::leaf("x", ParsedType::named("string"))],
        ..Default::default()
    };
    let uses = ParsedNode::new(
        "",
        ParsedNodeKind::Uses(ParsedUses {
            grouping: "g".into(),
            refines: vec![ParsedRefine {
                target: "z".into(),
                mandatory: Some(true),
                ..Default::default()
            }],
            augments: Vec::new(),
        }),
    );
    let mut m = ParsedModule::new("m", "m");
    m.groupings.push(grouping);
    m.data = vec![ParsedNode::container("top", vec![uses])];

    let mut sctx = SchemaContext::new();
    let id = sctx.load_module(m).unwrap();
    let err = sctx.implement(id, FeatureSelection::None).unwrap_err();
    assert!(err.message().contains("Refine target node \"z\" in grouping was not found."));
    assert!(sctx.compiled(id).is_none());
}

#[test]
fn test_cross_module_deviations() {
    let mut dev = ParsedModule::new("dev", "d").import("base", "b");
    dev.deviations = vec![
        ParsedDeviation {
            target: "/b:top/b:x".into(),
            deviates: vec![ParsedDeviate::NotSupported],
        },
        ParsedDeviation {
            target: "/b:top/b:y".into(),
            deviates: vec![ParsedDeviate::Add(ParsedDeviateProps {
                units: Some("ms".into()),
                defaults: vec!["7".into()],
                ..Default::default()
            })],
        },
    ];

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), dev]);
    sctx.implement(ids[0], FeatureSelection::None).unwrap();
    sctx.implement(ids[1], FeatureSelection::None).unwrap();

    let tree = sctx.compiled(ids[0]).unwrap();
    let top = sctx.find_top_node(ids[0], "top").unwrap();
    assert!(sctx.find_child(tree, top, "x").is_none());
    let y = sctx.find_child(tree, top, "y").unwrap();
    match &tree.node(y).kind {
        NodeKind::Leaf {
            units: Some(units),
            default: Some(Value::Int(7)),
            ..
        } => assert_eq!(&*sctx.str(*units), "ms"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_cross_module_augment_of_uncompiled_target() {
    let mut ext = ParsedModule::new("ext", "e").import("base", "b");
    ext.augments.push(ParsedAugment {
        target: "/b:top".into(),
        children: vec![ParsedNode::leaf("extra", ParsedType::named("string"))],
        ..Default::default()
    });

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), ext]);
    sctx.implement(ids[1], FeatureSelection::None).unwrap();

    assert!(sctx.is_implemented(ids[0]));
    let tree = sctx.compiled(ids[0]).unwrap();
    let top = sctx.find_top_node(ids[0], "top").unwrap();
    let extra = sctx.find_child(tree, top, "extra").unwrap();
    assert_eq!(sctx.node_path(tree, extra), "/base:top/ext:extra");
}

#[test]
fn test_augment_adding_mandatory_node() {
    let mut mandatory = ParsedNode::leaf("must-have", ParsedType::named("string"));
    if let ParsedNodeKind::Leaf(leaf) = &mut mandatory.kind {
        leaf.mandatory = Some(true);
    }
    let mut ext = ParsedModule::new("ext", "e").import("base", "b");
    ext.augments.push(ParsedAugment {
        target: "/b:top".into(),
        children: vec![mandatory],
        ..Default::default()
    });

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), ext]);
    let err = sctx.implement(ids[1], FeatureSelection::None).unwrap_err();
    assert!(err.message().contains("Invalid augment adding mandatory node \"must-have\""));
    assert!(!sctx.is_implemented(ids[1]));
}

#[test]
fn test_leafref_into_other_module() {
    let mut user = ParsedModule::new("user", "u").import("base", "b");
    let mut ty = ParsedType::named("leafref");
    ty.path = Some("/b:top/b:y".into());
    user.data = vec![ParsedNode::leaf("ref", ty)];

    let mut sctx = SchemaContext::new();
    let ids = load(&mut sctx, vec![base_module(), user]);
    sctx.implement(ids[1], FeatureSelection::None).unwrap();

    assert!(sctx.is_implemented(ids[0]));
    let tree = sctx.compiled(ids[1]).unwrap();
    let reference = sctx.find_top_node(ids[1], "ref").unwrap();
    let ty = tree.node(reference).kind.ty().unwrap();
    assert_eq!(ty.real().base.as_str(), "uint8");
    assert_eq!(ty.leafref().unwrap().target.as_deref(), Some("/base:top/y"));
}

#[test]
fn test_leafref_into_unimplemented_module_without_implicit_implement() {
    let mut user = ParsedModule::new("user", "u").import("base", "b");
    let mut ty = ParsedType::named("leafref");
    ty.path = Some("/b:top/b:y".into());
    user.data = vec![ParsedNode::leaf("ref", ty)];

    let mut sctx = SchemaContext::with_options(ContextOptions {
        implicit_implement: false,
    });
    let ids = load(&mut sctx, vec![base_module(), user]);
    let err = sctx.implement(ids[1], FeatureSelection::None).unwrap_err();
    assert!(err.message().contains("Module \"base\""));
    assert!(err.message().contains("is not implemented"));
}
