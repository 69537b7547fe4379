//! Augments, uses refines and deviations.

use super::cctx::{CompileCtx, DeferredDefault, Inherit, PendingRefine, PendingUsesAugment};
use super::extension::compile_exts;
use super::node::{
    check_min_max, compile_constraint, compile_node, find_case, find_mandatory, if_features_hold,
    is_mandatory, set_default_case,
};
use super::path::{parse_nodeid, resolve_steps};
use super::types::{compile_type, leafref_slots};
use crate::error::CompileResult;
use crate::ids::{ModuleId, NodeId};
use crate::options::CompileFlags;
use crate::parsed::{ParsedAugment, ParsedDeviate, ParsedDeviateProps, ParsedRefine};
use crate::schema::{Config, ExtParent, NodeKind};

/// RPC/notification flags implied by where `id` sits in the tree.
fn placement_flags(cctx: &CompileCtx<'_>, id: NodeId) -> CompileFlags {
    let mut cur = Some(id);
    while let Some(node) = cur {
        match cctx.tree.nodes[node].kind {
            NodeKind::Input => return CompileFlags::RPC_INPUT,
            NodeKind::Output => return CompileFlags::RPC_OUTPUT,
            NodeKind::Notification => return CompileFlags::NOTIFICATION,
            _ => cur = cctx.tree.nodes[node].parent,
        }
    }
    CompileFlags::NONE
}

/// Compile the children of an augment into `target`. The environment
/// (parsed module, namespace, scope) is already switched to the augment's.
fn augment_children(
    cctx: &mut CompileCtx<'_>,
    aug: &ParsedAugment,
    target: NodeId,
    status: crate::schema::Status,
) -> CompileResult<Vec<NodeId>> {
    let kind = &cctx.tree.nodes[target].kind;
    match kind {
        NodeKind::Leaf { .. } | NodeKind::LeafList { .. } | NodeKind::Anydata { .. } | NodeKind::Anyxml { .. } => {
            return Err(cctx.invalid(format!(
                "Augment's target node is a {}, which cannot be augmented.",
                kind.keyword()
            )));
        }
        NodeKind::Rpc | NodeKind::Action => {
            return Err(cctx.invalid(
                "Augment's target node is an operation, augment its input or output instead.",
            ));
        }
        _ => {}
    }

    let mut when = Vec::new();
    if let Some(text) = &aug.when {
        when.push(compile_constraint(cctx, text)?);
    }
    let inherit = Inherit { status, when };
    let before = cctx.tree.nodes[target].children.clone();
    for child in &aug.children {
        compile_node(cctx, child, Some(target), &inherit)?;
    }
    Ok(cctx.tree.nodes[target]
        .children
        .iter()
        .copied()
        .filter(|c| !before.contains(c))
        .collect())
}

/// Apply a top-level augment of `source` to `target` in the tree being built.
pub fn apply_augment(
    cctx: &mut CompileCtx<'_>,
    source: ModuleId,
    aug: &ParsedAugment,
    target: NodeId,
) -> CompileResult<()> {
    let path = format!("/{}:{{augment='{}'}}", cctx.module_name(source), aug.target);
    let flags = placement_flags(cctx, target);
    let saved = cctx.switch_env(source, source, None, flags, path);
    let result = apply_augment_inner(cctx, source, aug, target);
    cctx.restore_env(saved);
    result
}

fn apply_augment_inner(
    cctx: &mut CompileCtx<'_>,
    source: ModuleId,
    aug: &ParsedAugment,
    target: NodeId,
) -> CompileResult<()> {
    if !if_features_hold(cctx, &aug.if_features)? {
        return Ok(());
    }
    let added = augment_children(cctx, aug, target, aug.status.unwrap_or_default())?;

    // augmenting another module must not add unconditional mandatory nodes
    if aug.when.is_none() && cctx.tree.nodes[target].module != source {
        for id in added {
            let mandatory = if is_mandatory(&cctx.tree.nodes[id]) {
                Some(id)
            } else if matches!(cctx.tree.nodes[id].kind, NodeKind::Container { presence: None } | NodeKind::Case) {
                find_mandatory(&cctx.tree, id)
            } else {
                None
            };
            if let Some(node) = mandatory {
                return Err(cctx.invalid(format!(
                    "Invalid augment adding mandatory node \"{}\" without making it conditional via when statement.",
                    cctx.sctx.str(cctx.tree.nodes[node].name)
                )));
            }
        }
    }
    Ok(())
}

/// Apply the augment of a `uses`, relative to the nodes the grouping
/// produced.
pub fn apply_uses_augment(cctx: &mut CompileCtx<'_>, pending: &PendingUsesAugment) -> CompileResult<()> {
    let site = &pending.site;
    let path = format!("{}/{{augment='{}'}}", site.path, pending.aug.target);
    let saved = cctx.switch_env(site.pmod, site.ns, site.scope.clone(), site.flags, path);
    let result = (|| -> CompileResult<()> {
        let steps = parse_nodeid(&pending.aug.target, false).map_err(|err| cctx.locate(err))?;
        let target = resolve_steps(cctx.sctx, &cctx.tree, &site.roots, &steps, site.pmod, site.ns)
            .map_err(|err| cctx.locate(err))?
            .ok_or_else(|| {
                cctx.invalid(format!(
                    "Augment target node \"{}\" in grouping was not found.",
                    pending.aug.target
                ))
            })?;
        if !if_features_hold(cctx, &pending.aug.if_features)? {
            return Ok(());
        }
        let status = pending.aug.status.unwrap_or(site.status);
        augment_children(cctx, &pending.aug, target, status).map(|_| ())
    })();
    cctx.restore_env(saved);
    result
}

/// Apply one `refine` of a `uses`.
pub fn apply_refine(cctx: &mut CompileCtx<'_>, pending: &PendingRefine) -> CompileResult<()> {
    let site = &pending.site;
    let path = format!("{}/{{refine='{}'}}", site.path, pending.refine.target);
    let saved = cctx.switch_env(site.pmod, site.ns, site.scope.clone(), site.flags, path);
    let result = (|| -> CompileResult<()> {
        let steps = parse_nodeid(&pending.refine.target, false).map_err(|err| cctx.locate(err))?;
        let target = resolve_steps(cctx.sctx, &cctx.tree, &site.roots, &steps, site.pmod, site.ns)
            .map_err(|err| cctx.locate(err))?
            .ok_or_else(|| {
                cctx.invalid(format!(
                    "Refine target node \"{}\" in grouping was not found.",
                    pending.refine.target
                ))
            })?;
        refine_node(cctx, &pending.refine, target)
    })();
    cctx.restore_env(saved);
    result
}

fn not_applicable(cctx: &CompileCtx<'_>, action: &str, prop: &str, target: NodeId) -> crate::error::CompileError {
    cctx.invalid(format!(
        "Invalid {action} of {} node - it is not possible to {action} \"{prop}\" property.",
        cctx.tree.nodes[target].kind.keyword()
    ))
}

fn refine_node(cctx: &mut CompileCtx<'_>, refine: &ParsedRefine, target: NodeId) -> CompileResult<()> {
    if !refine.defaults.is_empty() {
        match &cctx.tree.nodes[target].kind {
            NodeKind::Leaf { .. } if refine.defaults.len() > 1 => {
                return Err(cctx.invalid("Invalid refine of default - leaf can have only a single default value."));
            }
            NodeKind::Leaf { .. } | NodeKind::LeafList { .. } => {
                set_defaults(cctx, target, refine.defaults.clone());
            }
            NodeKind::Choice { .. } => {
                if refine.defaults.len() > 1 {
                    return Err(cctx.invalid("Invalid refine of default - choice can have only a single default case."));
                }
                let case = find_case(cctx, target, &refine.defaults[0])?;
                set_default_case(cctx, target, case)?;
            }
            _ => return Err(not_applicable(cctx, "refine", "default", target)),
        }
    }

    if let Some(value) = refine.mandatory {
        set_mandatory(cctx, target, value, "refine")?;
    }
    if let Some(value) = refine.config {
        set_config(cctx, target, value)?;
    }
    if let Some(presence) = &refine.presence {
        let presence_name = cctx.sctx.intern(presence);
        match &mut cctx.tree.nodes[target].kind {
            NodeKind::Container { presence } => *presence = Some(presence_name),
            _ => return Err(not_applicable(cctx, "refine", "presence", target)),
        }
    }
    set_elements(cctx, target, refine.min_elements, refine.max_elements, "refine")?;

    if !refine.musts.is_empty() {
        add_musts(cctx, target, &refine.musts, "refine")?;
    }
    if !refine.if_features.is_empty() && !if_features_hold(cctx, &refine.if_features)? {
        cctx.tree.unlink(target);
        cctx.tree.disable(target);
    }
    if !refine.exts.is_empty() {
        let exts = compile_exts(cctx, &refine.exts, ExtParent::Refine)?;
        cctx.tree.nodes[target].exts.extend(exts);
    }

    // a default and a mandatory flag may only clash once both are applied
    check_mandatory_default(cctx, target)
}

fn check_mandatory_default(cctx: &CompileCtx<'_>, target: NodeId) -> CompileResult<()> {
    let has_default = cctx.dflts.iter().any(|d| d.node == target && d.explicit);
    match &cctx.tree.nodes[target].kind {
        NodeKind::Leaf { mandatory: true, .. } if has_default => {
            Err(cctx.invalid("Invalid mandatory leaf with a default value."))
        }
        NodeKind::Choice {
            mandatory: true,
            default: Some(_),
        } => Err(cctx.invalid("Invalid mandatory choice with a default case.")),
        NodeKind::LeafList { min_elements, .. } if *min_elements > 0 && has_default => Err(cctx.invalid(
            "The default statement is present on leaf-list with a nonzero min-elements.",
        )),
        _ => Ok(()),
    }
}

/// Replace the deferred default values of a leaf or leaf-list.
fn set_defaults(cctx: &mut CompileCtx<'_>, target: NodeId, values: Vec<String>) {
    cctx.dflts.retain(|d| d.node != target);
    cctx.dflts.push(DeferredDefault {
        node: target,
        values,
        pmod: cctx.pmod,
        explicit: true,
    });
}

fn set_mandatory(cctx: &mut CompileCtx<'_>, target: NodeId, value: bool, action: &str) -> CompileResult<()> {
    match &mut cctx.tree.nodes[target].kind {
        NodeKind::Leaf { mandatory, .. }
        | NodeKind::Choice { mandatory, .. }
        | NodeKind::Anydata { mandatory }
        | NodeKind::Anyxml { mandatory } => {
            *mandatory = value;
            Ok(())
        }
        _ => Err(not_applicable(cctx, action, "mandatory", target)),
    }
}

/// Set the config of a node and recompute the inherited config of its
/// subtree. Descendants with their own `config` keep it unless the new
/// value makes them state data.
fn set_config(cctx: &mut CompileCtx<'_>, target: NodeId, value: bool) -> CompileResult<()> {
    if cctx.tree.nodes[target].config.is_none() {
        return Err(cctx.invalid("Invalid \"config\" of a node inside an RPC, action or notification."));
    }
    let parent_config = cctx.tree.nodes[target]
        .parent
        .and_then(|p| cctx.tree.nodes[p].config)
        .unwrap_or(Config::ReadWrite);
    if value && parent_config == Config::ReadOnly {
        return Err(cctx.invalid("Configuration node cannot be child of any state data node."));
    }
    let config = if value { Config::ReadWrite } else { Config::ReadOnly };
    let node = &mut cctx.tree.nodes[target];
    node.config = Some(config);
    node.config_explicit = true;

    let mut stack: Vec<(NodeId, Config)> = node.children.iter().map(|c| (*c, config)).collect();
    while let Some((next, inherited)) = stack.pop() {
        let node = &mut cctx.tree.nodes[next];
        // operations and their content carry no config
        let Some(current) = node.config else {
            continue;
        };
        let config = if node.config_explicit && inherited == Config::ReadWrite {
            current
        } else {
            inherited
        };
        node.config = Some(config);
        stack.extend(node.children.iter().map(|c| (*c, config)));
    }
    Ok(())
}

fn set_elements(
    cctx: &mut CompileCtx<'_>,
    target: NodeId,
    min: Option<u32>,
    max: Option<u32>,
    action: &str,
) -> CompileResult<()> {
    if min.is_none() && max.is_none() {
        return Ok(());
    }
    let (cur_min, cur_max) = match &cctx.tree.nodes[target].kind {
        NodeKind::List {
            min_elements,
            max_elements,
            ..
        }
        | NodeKind::LeafList {
            min_elements,
            max_elements,
            ..
        } => (*min_elements, *max_elements),
        _ => {
            let prop = if min.is_some() { "min-elements" } else { "max-elements" };
            return Err(not_applicable(cctx, action, prop, target));
        }
    };
    let new_min = min.unwrap_or(cur_min);
    let new_max = if max.is_some() { max } else { cur_max };
    check_min_max(cctx, Some(new_min), new_max)?;
    match &mut cctx.tree.nodes[target].kind {
        NodeKind::List {
            min_elements,
            max_elements,
            ..
        }
        | NodeKind::LeafList {
            min_elements,
            max_elements,
            ..
        } => {
            *min_elements = new_min;
            *max_elements = new_max;
        }
        _ => {}
    }
    Ok(())
}

fn add_musts(cctx: &mut CompileCtx<'_>, target: NodeId, musts: &[String], action: &str) -> CompileResult<()> {
    if matches!(
        cctx.tree.nodes[target].kind,
        NodeKind::Choice { .. } | NodeKind::Case | NodeKind::Rpc | NodeKind::Action
    ) {
        return Err(not_applicable(cctx, action, "must", target));
    }
    for text in musts {
        let constraint = compile_constraint(cctx, text)?;
        cctx.tree.nodes[target].musts.push(constraint);
    }
    if !cctx.xpath.contains(&target) {
        cctx.xpath.push(target);
    }
    Ok(())
}

// ============================================================================
// Deviations
// ============================================================================

/// Apply every deviate that deviations of the modules in `deviates` make
/// on `target`.
pub fn apply_deviations(
    cctx: &mut CompileCtx<'_>,
    target: NodeId,
    target_text: &str,
    deviates: &[(ModuleId, ParsedDeviate)],
) -> CompileResult<()> {
    let not_supported = deviates
        .iter()
        .any(|(_, d)| matches!(d, ParsedDeviate::NotSupported));
    if not_supported && deviates.len() > 1 {
        return Err(cctx.invalid(format!(
            "Multiple deviations of \"{target_text}\" with one of them being \"not-supported\"."
        )));
    }

    for (source, deviate) in deviates {
        let path = format!("/{}:{{deviation='{target_text}'}}", cctx.module_name(*source));
        let (ns, flags, scope) = (cctx.ns, cctx.flags, None);
        let saved = cctx.switch_env(*source, ns, scope, flags, path);
        let result = apply_deviate(cctx, target, deviate);
        cctx.restore_env(saved);
        result?;
    }
    Ok(())
}

fn apply_deviate(cctx: &mut CompileCtx<'_>, target: NodeId, deviate: &ParsedDeviate) -> CompileResult<()> {
    match deviate {
        ParsedDeviate::NotSupported => {
            if let Some(parent) = cctx.tree.nodes[target].parent {
                match &mut cctx.tree.nodes[parent].kind {
                    NodeKind::List { keys, .. } if keys.contains(&target) => {
                        return Err(cctx.invalid("Invalid deviation removing a key of a list."));
                    }
                    NodeKind::Choice { default, .. } if *default == Some(target) => *default = None,
                    _ => {}
                }
            }
            cctx.tree.unlink(target);
            cctx.tree.disable(target);
            Ok(())
        }
        ParsedDeviate::Add(props) => deviate_add(cctx, target, props),
        ParsedDeviate::Replace(props) => deviate_replace(cctx, target, props),
        ParsedDeviate::Delete(props) => deviate_delete(cctx, target, props),
    }
}

fn exists(cctx: &CompileCtx<'_>, prop: &str, what: &str) -> crate::error::CompileError {
    cctx.invalid(format!(
        "Invalid deviation adding \"{prop}\" property which already exists (with value \"{what}\")."
    ))
}

fn missing(cctx: &CompileCtx<'_>, action: &str, prop: &str) -> crate::error::CompileError {
    cctx.invalid(format!(
        "Invalid deviation {action} \"{prop}\" property which does not exist."
    ))
}

fn units_slot<'c>(cctx: &'c mut CompileCtx<'_>, target: NodeId) -> Option<&'c mut Option<crate::interner::Name>> {
    match &mut cctx.tree.nodes[target].kind {
        NodeKind::Leaf { units, .. } | NodeKind::LeafList { units, .. } => Some(units),
        _ => None,
    }
}

fn deviate_add(cctx: &mut CompileCtx<'_>, target: NodeId, props: &ParsedDeviateProps) -> CompileResult<()> {
    if props.ty.is_some() {
        return Err(not_applicable(cctx, "deviation", "type", target));
    }

    if let Some(units) = &props.units {
        let name = cctx.sctx.intern(units);
        let Some(slot) = units_slot(cctx, target) else {
            return Err(not_applicable(cctx, "deviation", "units", target));
        };
        if let Some(old) = *slot {
            let old = cctx.sctx.str(old).to_string();
            return Err(exists(cctx, "units", &old));
        }
        *slot = Some(name);
    }

    if !props.defaults.is_empty() {
        let existing = cctx.dflts.iter().position(|d| d.node == target);
        match &cctx.tree.nodes[target].kind {
            NodeKind::Leaf { .. } => {
                if let Some(pos) = existing {
                    let old = cctx.dflts[pos].values.join(" ");
                    return Err(exists(cctx, "default", &old));
                }
                if props.defaults.len() > 1 {
                    return Err(cctx.invalid("Invalid deviation adding multiple defaults to a leaf."));
                }
                set_defaults(cctx, target, props.defaults.clone());
            }
            NodeKind::LeafList { .. } => {
                let mut values = existing.map(|pos| cctx.dflts[pos].values.clone()).unwrap_or_default();
                values.extend(props.defaults.iter().cloned());
                set_defaults(cctx, target, values);
            }
            NodeKind::Choice { default, .. } => {
                if let Some(case) = default {
                    let old = cctx.sctx.str(cctx.tree.nodes[*case].name).to_string();
                    return Err(exists(cctx, "default", &old));
                }
                let case = find_case(cctx, target, &props.defaults[0])?;
                set_default_case(cctx, target, case)?;
            }
            _ => return Err(not_applicable(cctx, "deviation", "default", target)),
        }
    }

    if !props.musts.is_empty() {
        add_musts(cctx, target, &props.musts, "deviation")?;
    }
    if let Some(value) = props.config {
        set_config(cctx, target, value)?;
    }
    if let Some(value) = props.mandatory {
        let already = is_mandatory(&cctx.tree.nodes[target]);
        if already && !matches!(cctx.tree.nodes[target].kind, NodeKind::List { .. } | NodeKind::LeafList { .. }) {
            return Err(exists(cctx, "mandatory", "true"));
        }
        set_mandatory(cctx, target, value, "deviation")?;
    }
    if props.min_elements.is_some() || props.max_elements.is_some() {
        let (cur_min, cur_max) = match &cctx.tree.nodes[target].kind {
            NodeKind::List {
                min_elements,
                max_elements,
                ..
            }
            | NodeKind::LeafList {
                min_elements,
                max_elements,
                ..
            } => (*min_elements, *max_elements),
            _ => (0, None),
        };
        if props.min_elements.is_some() && cur_min > 0 {
            return Err(exists(cctx, "min-elements", &cur_min.to_string()));
        }
        if let (Some(_), Some(max)) = (props.max_elements, cur_max) {
            return Err(exists(cctx, "max-elements", &max.to_string()));
        }
        set_elements(cctx, target, props.min_elements, props.max_elements, "deviation")?;
    }
    check_mandatory_default(cctx, target)
}

fn deviate_replace(cctx: &mut CompileCtx<'_>, target: NodeId, props: &ParsedDeviateProps) -> CompileResult<()> {
    if !props.musts.is_empty() {
        return Err(not_applicable(cctx, "deviation", "must", target));
    }

    if let Some(pty) = &props.ty {
        let status = cctx.tree.nodes[target].status;
        let name = cctx.sctx.str(cctx.tree.nodes[target].name).to_string();
        if cctx.tree.nodes[target].kind.ty().is_none() {
            return Err(not_applicable(cctx, "deviation", "type", target));
        }
        let resolved = compile_type(cctx, pty, status, &name)?;
        let has_leafref = !leafref_slots(&resolved.ty).is_empty();
        if let Some(ty) = cctx.tree.nodes[target].kind.ty_mut() {
            *ty = resolved.ty;
        }
        if has_leafref && !cctx.leafrefs.contains(&target) {
            cctx.leafrefs.push(target);
        }
    }

    if let Some(units) = &props.units {
        let name = cctx.sctx.intern(units);
        let Some(slot) = units_slot(cctx, target) else {
            return Err(not_applicable(cctx, "deviation", "units", target));
        };
        if slot.is_none() {
            return Err(missing(cctx, "replacing", "units"));
        }
        *slot = Some(name);
    }

    if !props.defaults.is_empty() {
        match &cctx.tree.nodes[target].kind {
            NodeKind::Leaf { .. } | NodeKind::LeafList { .. } => {
                if !cctx.dflts.iter().any(|d| d.node == target) {
                    return Err(missing(cctx, "replacing", "default"));
                }
                set_defaults(cctx, target, props.defaults.clone());
            }
            NodeKind::Choice { default: None, .. } => {
                return Err(missing(cctx, "replacing", "default"));
            }
            NodeKind::Choice { .. } => {
                let case = find_case(cctx, target, &props.defaults[0])?;
                set_default_case(cctx, target, case)?;
            }
            _ => return Err(not_applicable(cctx, "deviation", "default", target)),
        }
    }

    if let Some(value) = props.config {
        set_config(cctx, target, value)?;
    }
    if let Some(value) = props.mandatory {
        set_mandatory(cctx, target, value, "deviation")?;
    }
    set_elements(cctx, target, props.min_elements, props.max_elements, "deviation")?;
    check_mandatory_default(cctx, target)
}

fn deviate_delete(cctx: &mut CompileCtx<'_>, target: NodeId, props: &ParsedDeviateProps) -> CompileResult<()> {
    if props.ty.is_some() || props.config.is_some() || props.mandatory.is_some() {
        let prop = if props.ty.is_some() {
            "type"
        } else if props.config.is_some() {
            "config"
        } else {
            "mandatory"
        };
        return Err(not_applicable(cctx, "deviation", prop, target));
    }
    if props.min_elements.is_some() || props.max_elements.is_some() {
        return Err(cctx.invalid(
            "Invalid deviation deleting \"min-elements\" or \"max-elements\" property, use replace instead.",
        ));
    }

    if let Some(units) = &props.units {
        let Some(slot) = units_slot(cctx, target) else {
            return Err(not_applicable(cctx, "deviation", "units", target));
        };
        let current = *slot;
        match current {
            Some(current) if &*cctx.sctx.str(current) == units.as_str() => {
                if let Some(slot) = units_slot(cctx, target) {
                    *slot = None;
                }
            }
            _ => return Err(missing(cctx, "deleting", "units")),
        }
    }

    if !props.defaults.is_empty() {
        match &cctx.tree.nodes[target].kind {
            NodeKind::Leaf { .. } | NodeKind::LeafList { .. } => {
                let Some(pos) = cctx.dflts.iter().position(|d| d.node == target) else {
                    return Err(missing(cctx, "deleting", "default"));
                };
                let mut values = cctx.dflts[pos].values.clone();
                for value in &props.defaults {
                    let Some(i) = values.iter().position(|v| v == value) else {
                        return Err(cctx.invalid(format!(
                            "Invalid deviation deleting \"default\" property \"{value}\" which does not match any of the target's property values."
                        )));
                    };
                    values.remove(i);
                }
                if values.is_empty() {
                    cctx.dflts.remove(pos);
                } else {
                    cctx.dflts[pos].values = values;
                }
            }
            NodeKind::Choice { default: Some(case), .. } => {
                let case_name = cctx.sctx.str(cctx.tree.nodes[*case].name);
                if &*case_name != crate::syntax::split_prefix(&props.defaults[0]).1 {
                    return Err(missing(cctx, "deleting", "default"));
                }
                if let NodeKind::Choice { default, .. } = &mut cctx.tree.nodes[target].kind {
                    *default = None;
                }
            }
            NodeKind::Choice { .. } => return Err(missing(cctx, "deleting", "default")),
            _ => return Err(not_applicable(cctx, "deviation", "default", target)),
        }
    }

    for text in &props.musts {
        let musts = &mut cctx.tree.nodes[target].musts;
        let Some(i) = musts.iter().position(|m| m.expr.text == *text) else {
            return Err(cctx.invalid(format!(
                "Invalid deviation deleting \"must\" property \"{text}\" which does not match any of the target's property values."
            )));
        };
        musts.remove(i);
    }
    Ok(())
}
