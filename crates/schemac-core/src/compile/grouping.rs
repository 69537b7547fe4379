//! Groupings: `uses` instantiation and template validation.

use super::cctx::{CompileCtx, Inherit, PendingRefine, PendingUsesAugment, Scope, UsesSite};
use super::extension::compile_exts;
use super::node::{compile_constraint, compile_nodes, if_features_hold, scoped};
use super::status::{check_status, StatusRef};
use crate::error::CompileResult;
use crate::ids::{ModuleId, NodeId};
use crate::options::CompileFlags;
use crate::parsed::{ParsedGrouping, ParsedNode, ParsedUses};
use crate::schema::{ExtParent, NodeKind, SchemaNode, Status};
use crate::syntax::split_prefix;

struct FoundGrouping {
    grp: ParsedGrouping,
    module: ModuleId,
    /// Scope the grouping was defined in.
    scope: Scope,
}

fn find_grouping(cctx: &CompileCtx<'_>, qname: &str) -> CompileResult<FoundGrouping> {
    let (prefix, name) = split_prefix(qname);
    let module = cctx
        .sctx
        .resolve_opt_prefix(cctx.pmod, prefix)
        .map_err(|err| cctx.locate(err))?;

    if module == cctx.pmod {
        let mut frame = cctx.scope.clone();
        while let Some(f) = frame {
            if let Some(grp) = f.groupings.iter().find(|g| g.name == name) {
                return Ok(FoundGrouping {
                    grp: grp.clone(),
                    module,
                    scope: Some(f.clone()),
                });
            }
            frame = f.parent.clone();
        }
    }

    cctx.sctx
        .module(module)
        .parsed
        .groupings
        .iter()
        .find(|g| g.name == name)
        .map(|grp| FoundGrouping {
            grp: grp.clone(),
            module,
            scope: None,
        })
        .ok_or_else(|| {
            cctx.invalid(format!(
                "Grouping \"{qname}\" referenced by a uses statement not found."
            ))
        })
}

/// Instantiate a grouping under `parent`. Refines and augments of the
/// `uses` are deferred to the finishing pass.
pub fn compile_uses(
    cctx: &mut CompileCtx<'_>,
    pnode: &ParsedNode,
    uses: &ParsedUses,
    parent: Option<NodeId>,
    inherit: &Inherit,
) -> CompileResult<()> {
    if !if_features_hold(cctx, &pnode.if_features)? {
        return Ok(());
    }
    cctx.path.push(&format!("/{{uses='{}'}}", uses.grouping));
    let result = instantiate(cctx, pnode, uses, parent, inherit);
    cctx.path.pop();
    result
}

fn instantiate(
    cctx: &mut CompileCtx<'_>,
    pnode: &ParsedNode,
    uses: &ParsedUses,
    parent: Option<NodeId>,
    inherit: &Inherit,
) -> CompileResult<()> {
    let found = find_grouping(cctx, &uses.grouping)?;
    let key = (found.module, found.grp.name.clone());
    if cctx.groupings.contains(&key) {
        return Err(cctx.invalid(format!(
            "Grouping \"{}\" references itself through a uses statement.",
            uses.grouping
        )));
    }

    let status = match pnode.status {
        Some(own) if own < inherit.status => {
            return Err(cctx.invalid(format!(
                "A \"{}\" status is in conflict with the parent's \"{}\" status.",
                own.as_str(),
                inherit.status.as_str()
            )))
        }
        Some(own) => own,
        None => inherit.status,
    };
    check_status(
        StatusRef::new(status, &cctx.module_name(cctx.pmod), &uses.grouping),
        StatusRef::new(
            found.grp.status.unwrap_or_default(),
            &cctx.module_name(found.module),
            &found.grp.name,
        ),
    )
    .map_err(|err| cctx.locate(err))?;

    let mut when = inherit.when.clone();
    if let Some(text) = &pnode.when {
        when.push(compile_constraint(cctx, text)?);
    }
    let exts = compile_exts(cctx, &pnode.exts, ExtParent::Node)?;

    let using_pmod = cctx.pmod;
    let using_scope = cctx.scope.clone();
    let before = cctx.tree.siblings(parent);

    cctx.groupings.push(key);
    let saved_pmod = std::mem::replace(&mut cctx.pmod, found.module);
    let saved_scope = std::mem::replace(&mut cctx.scope, found.scope);
    let result = scoped(cctx, &found.grp.typedefs, &found.grp.groupings).and_then(|scope| {
        cctx.scope = scope;
        compile_nodes(cctx, &found.grp.children, parent, &Inherit { status, when })
    });
    cctx.scope = saved_scope;
    cctx.pmod = saved_pmod;
    cctx.groupings.pop();
    result?;

    let roots: Vec<NodeId> = cctx
        .tree
        .siblings(parent)
        .into_iter()
        .filter(|id| !before.contains(id))
        .collect();
    for root in &roots {
        cctx.tree.nodes[*root].exts.extend(exts.iter().cloned());
    }

    if cctx.in_grouping() || (uses.refines.is_empty() && uses.augments.is_empty()) {
        return Ok(());
    }
    let site = UsesSite {
        parent,
        roots,
        pmod: using_pmod,
        ns: cctx.ns,
        scope: using_scope,
        status,
        flags: cctx.flags,
        path: cctx.path.render(),
    };
    for refine in &uses.refines {
        cctx.uses_rfns.push(PendingRefine {
            site: site.clone(),
            refine: refine.clone(),
        });
    }
    for aug in &uses.augments {
        cctx.uses_augs.push(PendingUsesAugment {
            site: site.clone(),
            aug: aug.clone(),
        });
    }
    Ok(())
}

/// Validate every top-level grouping of the module as a template, outside
/// of any instantiation. Template nodes are removed from the tree again.
pub fn compile_templates(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    let parsed = std::sync::Arc::clone(&cctx.sctx.module(cctx.module).parsed);
    let module = cctx.module;

    for grp in &parsed.groupings {
        let mark = cctx.tree.nodes.len();
        let root = SchemaNode {
            name: cctx.sctx.intern(&grp.name),
            module,
            kind: NodeKind::Container { presence: None },
            parent: None,
            children: Vec::new(),
            config: None,
            config_explicit: false,
            status: Status::Current,
            when: Vec::new(),
            musts: Vec::new(),
            exts: Vec::new(),
            disabled: false,
        };
        let root = cctx.tree.nodes.try_push(root)?;

        let path = format!("/{}:{{grouping='{}'}}", cctx.module_name(module), grp.name);
        let flags = cctx.flags | CompileFlags::GROUPING;
        let saved = cctx.switch_env(module, module, None, flags, path);
        cctx.groupings.push((module, grp.name.clone()));
        let inherit = Inherit {
            status: grp.status.unwrap_or_default(),
            when: Vec::new(),
        };
        let result = scoped(cctx, &grp.typedefs, &grp.groupings).and_then(|scope| {
            cctx.scope = scope;
            compile_nodes(cctx, &grp.children, Some(root), &inherit)
        });
        cctx.groupings.pop();
        cctx.restore_env(saved);
        cctx.tree.nodes.truncate(mark);
        result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SchemaContext;
    use crate::options::FeatureSelection;
    use crate::parsed::{ParsedModule, ParsedNodeKind, ParsedType};

    fn grouping(name: &str, children: Vec<ParsedNode>) -> ParsedGrouping {
        ParsedGrouping {
            name: name.into(),
            children,
            ..Default::default()
        }
    }

    fn implement(modules: Vec<ParsedModule>) -> CompileResult<(SchemaContext, ModuleId)> {
        let mut sctx = SchemaContext::new();
        let mut last = None;
        for m in modules {
            last = Some(sctx.load_module(m)?);
        }
        let id = last.unwrap();
        sctx.implement(id, FeatureSelection::None)?;
        Ok((sctx, id))
    }

    #[test]
    fn test_imported_grouping_nodes_belong_to_user() {
        let mut lib = ParsedModule::new("lib", "l");
        lib.typedefs.push(crate::parsed::ParsedTypedef {
            name: "name-type".into(),
            ty: ParsedType::named("string"),
            units: None,
            default: None,
            status: None,
        });
        lib.groupings.push(grouping(
            "named",
            vec![ParsedNode::leaf("name", ParsedType::named("name-type"))],
        ));
        let mut user = ParsedModule::new("user", "u").import("lib", "l");
        user.data = vec![ParsedNode::container("box", vec![ParsedNode::uses("l:named")])];

        let (sctx, id) = implement(vec![lib, user]).unwrap();
        let tree = sctx.compiled(id).unwrap();
        let boxed = sctx.find_top_node(id, "box").unwrap();
        let name = sctx.find_child(tree, boxed, "name").unwrap();
        assert_eq!(tree.node(name).module, id);
        assert_eq!(
            tree.node(name).kind.ty().and_then(|t| t.typedef).map(|n| sctx.str(n).to_string()),
            Some("name-type".to_string())
        );
        let lib = sctx.find_module("lib").unwrap();
        assert!(!sctx.is_implemented(lib));
    }

    #[test]
    fn test_grouping_references_itself() {
        let mut m = ParsedModule::new("m", "m");
        m.groupings.push(grouping("g", vec![ParsedNode::container("c", vec![ParsedNode::uses("g")])]));
        m.data = vec![ParsedNode::uses("g")];
        let err = implement(vec![m]).unwrap_err();
        assert!(err.message().contains("references itself"));
    }

    #[test]
    fn test_unused_grouping_is_validated() {
        let mut m = ParsedModule::new("m", "m");
        m.groupings.push(grouping(
            "broken",
            vec![ParsedNode::leaf("x", ParsedType::named("no-such-type"))],
        ));
        let err = implement(vec![m]).unwrap_err();
        assert!(err.message().contains("Referenced type \"no-such-type\" not found"));
        assert_eq!(err.path(), Some("/m:{grouping='broken'}/x"));
    }

    #[test]
    fn test_templates_leave_no_nodes() {
        let mut m = ParsedModule::new("m", "m");
        m.groupings.push(grouping("g", vec![ParsedNode::leaf("x", ParsedType::named("string"))]));
        m.data = vec![ParsedNode::new(
            "c",
            ParsedNodeKind::Container(Default::default()),
        )];
        let (sctx, id) = implement(vec![m]).unwrap();
        assert_eq!(sctx.compiled(id).unwrap().nodes.len(), 1);
    }

    #[test]
    fn test_scoped_grouping() {
        let mut inner = ParsedNode::container("c", vec![ParsedNode::uses("local")]);
        if let ParsedNodeKind::Container(c) = &mut inner.kind {
            c.groupings.push(grouping("local", vec![ParsedNode::leaf("x", ParsedType::named("int8"))]));
        }
        let mut m = ParsedModule::new("m", "m");
        m.data = vec![inner, ParsedNode::uses("local")];
        let err = implement(vec![m]).unwrap_err();
        assert!(err.message().contains("Grouping \"local\" referenced by a uses statement not found"));
    }

    #[test]
    fn test_refine_config_true_reinherits_subtree() {
        use crate::parsed::{ParsedRefine, ParsedUses};
        use crate::schema::Config;

        let mut pinned = ParsedNode::leaf("pinned", ParsedType::named("string"));
        pinned.config = Some(false);
        let mut boxed = ParsedNode::container(
            "box",
            vec![ParsedNode::leaf("x", ParsedType::named("string")), pinned],
        );
        boxed.config = Some(false);

        let uses = ParsedNode::new(
            "",
            ParsedNodeKind::Uses(ParsedUses {
                grouping: "g".into(),
                refines: vec![ParsedRefine {
                    target: "box".into(),
                    config: Some(true),
                    ..Default::default()
                }],
                augments: Vec::new(),
            }),
        );
        let mut m = ParsedModule::new("m", "m");
        m.groupings.push(grouping("g", vec![boxed]));
        m.data = vec![ParsedNode::container("top", vec![uses])];

        let (sctx, id) = implement(vec![m]).unwrap();
        let tree = sctx.compiled(id).unwrap();
        let top = sctx.find_top_node(id, "top").unwrap();
        let boxed = sctx.find_child(tree, top, "box").unwrap();
        let x = sctx.find_child(tree, boxed, "x").unwrap();
        let pinned = sctx.find_child(tree, boxed, "pinned").unwrap();
        assert_eq!(tree.node(boxed).config, Some(Config::ReadWrite));
        assert_eq!(tree.node(x).config, Some(Config::ReadWrite));
        assert_eq!(tree.node(pinned).config, Some(Config::ReadOnly));
    }
}
