//! The finishing pass: everything that needs the complete shape of the
//! tree.

use std::sync::Arc;

use tracing::{trace, warn};

use super::augment::{apply_augment, apply_deviations, apply_refine, apply_uses_augment};
use super::cctx::{CompileCtx, PendingAugment, PendingDeviation};
use super::grouping::compile_templates;
use super::implement::{compile_expr_implement, PrefixData};
use super::path::{first_prefix, is_location_path, resolve_absolute, resolve_data_path, target_module};
use super::status::{check_status, StatusRef};
use super::types::{leafref_slots, parse_value, type_at, type_at_mut};
use crate::error::{CompileError, CompileResult};
use crate::ids::{ModuleId, NodeId};
use crate::parsed::{ParsedAugment, ParsedDeviate, ParsedDeviation};
use crate::schema::{Config, Leafref, NodeKind, Type, TypeKind, Value};
use crate::syntax::{Expr, Token};

/// Drain every deferred category, in order.
pub fn finish(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    compile_templates(cctx)?;
    trace!(module = %cctx.module_name(cctx.module), "groupings validated");

    collect_augments(cctx)?;
    resolve_augments(cctx)?;
    trace!("augments applied");

    collect_deviations(cctx)?;
    resolve_deviations(cctx)?;
    trace!("deviations applied");

    while !cctx.uses_augs.is_empty() || !cctx.uses_rfns.is_empty() {
        for pending in std::mem::take(&mut cctx.uses_augs) {
            apply_uses_augment(cctx, &pending)?;
        }
        for pending in std::mem::take(&mut cctx.uses_rfns) {
            apply_refine(cctx, &pending)?;
        }
    }
    trace!("uses augments and refines applied");

    check_xpath(cctx)?;
    trace!("xpath expressions checked");
    resolve_leafrefs(cctx)?;
    trace!("leafrefs resolved");
    resolve_defaults(cctx)?;
    trace!("defaults resolved");

    debug_assert!(cctx.deferred_is_empty());
    Ok(())
}

/// Run `f` with the diagnostic path set to the schema path of `id`.
fn at_node<R>(
    cctx: &mut CompileCtx<'_>,
    id: NodeId,
    f: impl FnOnce(&mut CompileCtx<'_>) -> CompileResult<R>,
) -> CompileResult<R> {
    let path = cctx.sctx.node_path(&cctx.tree, id);
    let saved = cctx.path.replace(path);
    let result = f(cctx);
    cctx.path = saved;
    result
}

fn statement_path(cctx: &CompileCtx<'_>, source: ModuleId, keyword: &str, target: &str) -> String {
    format!("/{}:{{{keyword}='{target}'}}", cctx.module_name(source))
}

// ============================================================================
// Augments and deviations
// ============================================================================

/// Module the absolute target of a statement of `source` points into.
fn statement_target(
    cctx: &CompileCtx<'_>,
    source: ModuleId,
    keyword: &str,
    target: &str,
) -> CompileResult<ModuleId> {
    target_module(cctx.sctx, target, source)
        .map_err(|err| err.at(&statement_path(cctx, source, keyword, target)))
}

fn note_foreign(cctx: &mut CompileCtx<'_>, target: ModuleId) {
    if !cctx.foreign.contains(&target) {
        cctx.foreign.push(target);
    }
}

/// Statements of other implemented modules whose target lies in the module
/// being compiled.
fn foreign_statements<T>(
    cctx: &CompileCtx<'_>,
    pick: impl Fn(&crate::parsed::ParsedModule) -> Vec<(String, T)>,
) -> Vec<(ModuleId, T)> {
    let module = cctx.module;
    let mut out = Vec::new();
    for (id, other) in cctx.sctx.modules() {
        if id == module || !other.implemented {
            continue;
        }
        for (target, item) in pick(other.parsed.as_ref()) {
            // statements that do not resolve are reported by their own module
            if target_module(cctx.sctx, &target, id).ok() == Some(module) {
                out.push((id, item));
            }
        }
    }
    out
}

fn collect_augments(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    let module = cctx.module;
    let parsed = Arc::clone(&cctx.sctx.module(module).parsed);
    for aug in &parsed.augments {
        let target = statement_target(cctx, module, "augment", &aug.target)?;
        if target == module {
            cctx.augs.push(PendingAugment {
                source: module,
                aug: aug.clone(),
            });
        } else {
            note_foreign(cctx, target);
        }
    }

    let foreign = foreign_statements(cctx, |m| {
        m.augments
            .iter()
            .map(|aug| (aug.target.clone(), aug.clone()))
            .collect::<Vec<(String, ParsedAugment)>>()
    });
    for (source, aug) in foreign {
        cctx.augs.push(PendingAugment { source, aug });
    }
    Ok(())
}

/// Apply pending augments until none is left, so that augments may target
/// nodes added by other augments.
fn resolve_augments(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    let mut pending = std::mem::take(&mut cctx.augs);
    while !pending.is_empty() {
        let before = pending.len();
        let mut rest = Vec::new();
        for p in pending {
            let found = resolve_absolute(cctx.sctx, &cctx.tree, &p.aug.target, p.source)
                .map_err(|err| err.at(&statement_path(cctx, p.source, "augment", &p.aug.target)))?;
            match found {
                Some(target) => apply_augment(cctx, p.source, &p.aug, target)?,
                None => rest.push(p),
            }
        }
        if rest.len() == before {
            let p = &rest[0];
            return Err(CompileError::invalid(format!(
                "Augment target node \"{}\" from module \"{}\" was not found.",
                p.aug.target,
                cctx.module_name(p.source)
            ))
            .at(&statement_path(cctx, p.source, "augment", &p.aug.target)));
        }
        pending = rest;
    }
    Ok(())
}

fn collect_deviations(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    let module = cctx.module;
    let parsed = Arc::clone(&cctx.sctx.module(module).parsed);
    for dev in &parsed.deviations {
        let target = statement_target(cctx, module, "deviation", &dev.target)?;
        if target == module {
            cctx.devs.push(PendingDeviation {
                source: module,
                dev: dev.clone(),
            });
        } else {
            note_foreign(cctx, target);
        }
    }

    let foreign = foreign_statements(cctx, |m| {
        m.deviations
            .iter()
            .map(|dev| (dev.target.clone(), dev.clone()))
            .collect::<Vec<(String, ParsedDeviation)>>()
    });
    for (source, dev) in foreign {
        cctx.devs.push(PendingDeviation { source, dev });
    }
    Ok(())
}

/// Group the deviates of every pending deviation by target node and apply
/// them.
fn resolve_deviations(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    let mut groups: Vec<(NodeId, String, Vec<(ModuleId, ParsedDeviate)>)> = Vec::new();
    for p in std::mem::take(&mut cctx.devs) {
        let path = statement_path(cctx, p.source, "deviation", &p.dev.target);
        let target = resolve_absolute(cctx.sctx, &cctx.tree, &p.dev.target, p.source)
            .map_err(|err| err.at(&path))?
            .ok_or_else(|| {
                CompileError::invalid(format!(
                    "Deviation(s) target node \"{}\" from module \"{}\" was not found.",
                    p.dev.target,
                    cctx.module_name(p.source)
                ))
                .at(&path)
            })?;

        let deviates = p.dev.deviates.into_iter().map(|d| (p.source, d));
        match groups.iter_mut().find(|(node, _, _)| *node == target) {
            Some((_, _, list)) => list.extend(deviates),
            None => groups.push((target, p.dev.target, deviates.collect())),
        }
    }

    for (target, text, deviates) in groups {
        apply_deviations(cctx, target, &text, &deviates)?;
    }
    Ok(())
}

// ============================================================================
// XPath
// ============================================================================

/// Make sure every module the when/must expressions name is implemented and
/// warn about simple location paths that select nothing.
fn check_xpath(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    for id in std::mem::take(&mut cctx.xpath) {
        if cctx.tree.nodes[id].disabled {
            continue;
        }
        at_node(cctx, id, |cctx| {
            let node = &cctx.tree.nodes[id];
            let whens = node.when.iter().map(|c| (c, false));
            let exprs: Vec<_> = whens
                .chain(node.musts.iter().map(|c| (c, true)))
                .map(|(c, is_must)| (Arc::clone(&c.expr), c.pmod, is_must))
                .collect();

            for (expr, pmod, is_must) in exprs {
                ensure_expr_modules(cctx, &expr, pmod)?;
                if is_must && only_local(cctx, &expr, pmod) && is_location_path(&expr) {
                    let ns = cctx.tree.nodes[id].module;
                    let found = resolve_data_path(cctx.sctx, &cctx.tree, Some(id), ns, &expr, pmod)
                        .map_err(|err| cctx.locate(err))?;
                    if found.is_none() {
                        warn!(
                            path = %cctx.path.render(),
                            expr = %expr.text,
                            "must expression does not select any schema node"
                        );
                    }
                }
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Implement (or, when implicit implementation is off, require) every
/// module named by a prefix of `expr`.
fn ensure_expr_modules(cctx: &mut CompileCtx<'_>, expr: &Expr, pmod: ModuleId) -> CompileResult<()> {
    let implement = cctx.sctx.options.implicit_implement;
    let blocking = compile_expr_implement(cctx.sctx, expr, PrefixData::Schema(pmod), implement)
        .map_err(|err| cctx.locate(err))?;
    match blocking {
        Some(module) => Err(cctx.invalid(format!(
            "Module \"{}\" referenced by expression \"{}\" is not implemented.",
            cctx.module_name(module),
            expr.text
        ))),
        None => Ok(()),
    }
}

/// Every prefix of `expr` names the module being compiled.
fn only_local(cctx: &CompileCtx<'_>, expr: &Expr, pmod: ModuleId) -> bool {
    expr.prefixes()
        .into_iter()
        .all(|prefix| cctx.sctx.resolve_prefix(pmod, prefix).ok() == Some(cctx.module))
}

// ============================================================================
// Leafrefs
// ============================================================================

/// What a leafref resolved to.
struct LeafrefTarget {
    ty: Type,
    path: String,
    config: Option<Config>,
    status: crate::schema::Status,
    module: ModuleId,
    name: String,
}

fn resolve_leafrefs(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    let nodes = std::mem::take(&mut cctx.leafrefs);
    let mut chain = Vec::new();
    for id in nodes {
        resolve_node_leafrefs(cctx, id, &mut chain)?;
    }
    Ok(())
}

fn has_unresolved_leafref(ty: &Type) -> bool {
    leafref_slots(ty).iter().any(|slot| {
        type_at(ty, slot)
            .and_then(Type::leafref)
            .is_some_and(|lref| lref.realtype.is_none())
    })
}

/// Resolve the leafrefs in the type of `id`, resolving leafref targets
/// first when they are leafrefs themselves. `chain` holds the nodes being
/// resolved.
fn resolve_node_leafrefs(cctx: &mut CompileCtx<'_>, id: NodeId, chain: &mut Vec<NodeId>) -> CompileResult<()> {
    let node = &cctx.tree.nodes[id];
    let Some(ty) = node.kind.ty() else {
        return Ok(());
    };
    if node.disabled || !has_unresolved_leafref(ty) {
        return Ok(());
    }
    let slots = leafref_slots(ty);

    chain.push(id);
    let result = at_node(cctx, id, |cctx| {
        for slot in slots {
            let lref = cctx.tree.nodes[id]
                .kind
                .ty()
                .and_then(|ty| type_at(ty, &slot))
                .and_then(Type::leafref)
                .cloned();
            let Some(lref) = lref else { continue };

            let target = leafref_target(cctx, id, &lref, chain)?;
            check_leafref_target(cctx, id, &lref, &target)?;

            let slot_ty = cctx.tree.nodes[id]
                .kind
                .ty_mut()
                .and_then(|ty| type_at_mut(ty, &slot));
            if let Some(Type {
                kind: TypeKind::Leafref(lref),
                ..
            }) = slot_ty
            {
                lref.realtype = Some(Box::new(target.ty));
                lref.target = Some(target.path);
            }
        }
        Ok(())
    });
    chain.pop();
    result
}

fn leafref_target(
    cctx: &mut CompileCtx<'_>,
    id: NodeId,
    lref: &Leafref,
    chain: &mut Vec<NodeId>,
) -> CompileResult<LeafrefTarget> {
    ensure_expr_modules(cctx, &lref.path, lref.pmod)?;

    let ns = cctx.tree.nodes[id].module;
    let absolute = matches!(lref.path.tokens.first(), Some(Token::Slash));
    let tree_module = match first_prefix(&lref.path) {
        _ if !absolute => cctx.module,
        Some(prefix) => {
            let module = cctx
                .sctx
                .resolve_prefix(lref.pmod, prefix)
                .map_err(|err| cctx.locate(err))?;
            if module == lref.pmod { ns } else { module }
        }
        None => ns,
    };

    let not_found = || {
        cctx.invalid(format!(
            "Invalid leafref path \"{}\" - target node not found.",
            lref.path.text
        ))
    };

    if tree_module != cctx.module {
        let Some(tree) = cctx.sctx.compiled(tree_module) else {
            return Err(cctx.invalid(format!(
                "Invalid leafref path \"{}\" - module \"{}\" is not compiled yet.",
                lref.path.text,
                cctx.module_name(tree_module)
            )));
        };
        let target = resolve_data_path(cctx.sctx, tree, None, ns, &lref.path, lref.pmod)
            .map_err(|err| cctx.locate(err))?
            .ok_or_else(not_found)?;
        return target_info(cctx, tree, target, &lref.path);
    }

    let target = resolve_data_path(cctx.sctx, &cctx.tree, Some(id), ns, &lref.path, lref.pmod)
        .map_err(|err| cctx.locate(err))?
        .ok_or_else(not_found)?;
    if let Some(ty) = cctx.tree.nodes[target].kind.ty() {
        if has_unresolved_leafref(ty) {
            if chain.contains(&target) {
                return Err(cctx.invalid(format!(
                    "Invalid leafref path \"{}\" - circular chain of leafrefs detected.",
                    lref.path.text
                )));
            }
            resolve_node_leafrefs(cctx, target, chain)?;
        }
    }
    let tree = &cctx.tree;
    target_info(cctx, tree, target, &lref.path)
}

fn target_info(
    cctx: &CompileCtx<'_>,
    tree: &crate::schema::CompiledModule,
    target: NodeId,
    path: &Expr,
) -> CompileResult<LeafrefTarget> {
    let node = &tree.nodes[target];
    let Some(ty) = node.kind.ty() else {
        return Err(cctx.invalid(format!(
            "Invalid leafref path \"{}\" - target node is {} instead of leaf or leaf-list.",
            path.text,
            node.kind.keyword()
        )));
    };
    Ok(LeafrefTarget {
        ty: ty.clone(),
        path: cctx.sctx.node_path(tree, target),
        config: node.config,
        status: node.status,
        module: node.module,
        name: cctx.sctx.str(node.name).to_string(),
    })
}

fn check_leafref_target(
    cctx: &CompileCtx<'_>,
    id: NodeId,
    lref: &Leafref,
    target: &LeafrefTarget,
) -> CompileResult<()> {
    let node = &cctx.tree.nodes[id];
    if lref.require_instance
        && node.config == Some(Config::ReadWrite)
        && target.config == Some(Config::ReadOnly)
    {
        return Err(cctx.invalid(format!(
            "Invalid leafref path \"{}\" - target is supposed to represent configuration data (as the leafref does), but it does not.",
            lref.path.text
        )));
    }
    let name = cctx.sctx.str(node.name);
    check_status(
        StatusRef::new(node.status, &cctx.module_name(node.module), &name),
        StatusRef::new(target.status, &cctx.module_name(target.module), &target.name),
    )
    .map_err(|err| cctx.locate(err))
}

// ============================================================================
// Defaults
// ============================================================================

fn resolve_defaults(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    for dflt in std::mem::take(&mut cctx.dflts) {
        if cctx.tree.nodes[dflt.node].disabled {
            continue;
        }
        at_node(cctx, dflt.node, |cctx| {
            let node = &cctx.tree.nodes[dflt.node];
            let Some(ty) = node.kind.ty() else {
                return Ok(());
            };
            // typedef defaults give way to mandatory leaves and required entries
            let denied = match &node.kind {
                NodeKind::Leaf { mandatory, .. } => *mandatory,
                NodeKind::LeafList { min_elements, .. } => *min_elements > 0,
                _ => false,
            };
            if denied && !dflt.explicit {
                return Ok(());
            }
            let mut values: Vec<Value> = Vec::new();
            for text in &dflt.values {
                values.push(parse_value(cctx, ty, text, dflt.pmod)?);
            }

            match &node.kind {
                NodeKind::Leaf { mandatory: true, .. } => {
                    Err(cctx.invalid("Invalid mandatory leaf with a default value."))
                }
                NodeKind::Leaf { .. } if values.len() > 1 => {
                    Err(cctx.invalid("Invalid leaf with multiple default values."))
                }
                NodeKind::LeafList { min_elements, .. } if *min_elements > 0 => Err(cctx.invalid(
                    "The default statement is present on leaf-list with a nonzero min-elements.",
                )),
                NodeKind::LeafList { .. } => {
                    if node.config == Some(Config::ReadWrite) {
                        for (i, value) in values.iter().enumerate() {
                            if values[..i].contains(value) {
                                return Err(cctx.invalid(format!(
                                    "Configuration leaf-list has multiple defaults of the same value \"{}\".",
                                    dflt.values[i]
                                )));
                            }
                        }
                    }
                    if let NodeKind::LeafList { defaults, .. } = &mut cctx.tree.nodes[dflt.node].kind {
                        *defaults = values;
                    }
                    Ok(())
                }
                _ => {
                    if let NodeKind::Leaf { default, .. } = &mut cctx.tree.nodes[dflt.node].kind {
                        *default = values.into_iter().next();
                    }
                    Ok(())
                }
            }
        })?;
    }
    Ok(())
}
