//! The structural walk over data definitions.

use std::rc::Rc;
use std::sync::Arc;

use super::cctx::{CompileCtx, DeferredDefault, Inherit, Scope, ScopeFrame};
use super::extension::compile_exts;
use super::feature::compile_if_features;
use super::grouping::compile_uses;
use super::implement::ensure_implemented;
use super::types::{compile_type, leafref_slots};
use crate::error::CompileResult;
use crate::ids::NodeId;
use crate::options::CompileFlags;
use crate::parsed::{
    ParsedChoice, ParsedGrouping, ParsedLeaf, ParsedLeafList, ParsedList, ParsedNode, ParsedNodeKind,
    ParsedOperation, ParsedOperationIo, ParsedTypedef,
};
use crate::schema::{
    BuiltinType, CompiledModule, Config, Constraint, ExtParent, NodeKind, SchemaNode, Status,
};
use crate::syntax::{split_prefix, Expr};

/// Evaluate if-feature expressions written in the current parsed module.
pub fn if_features_hold(cctx: &mut CompileCtx<'_>, exprs: &[String]) -> CompileResult<bool> {
    if exprs.is_empty() {
        return Ok(true);
    }
    let (compiled, unimplemented) = compile_if_features(cctx, cctx.pmod, exprs)?;
    for module in unimplemented {
        ensure_implemented(cctx.sctx, module).map_err(|err| cctx.locate(err))?;
    }
    Ok(compiled.iter().all(|expr| expr.eval(&cctx.sctx.features)))
}

/// Compile a `when` or `must` expression written in the current parsed module.
pub fn compile_constraint(cctx: &CompileCtx<'_>, text: &str) -> CompileResult<Constraint> {
    let expr = Expr::parse(text).map_err(|err| cctx.invalid(err.to_string()))?;
    Ok(Constraint {
        expr: Arc::new(expr),
        pmod: cctx.pmod,
    })
}

/// Open a scope holding scoped typedefs and groupings on top of the
/// current one. Returns the current scope unchanged if there are none.
pub fn scoped(
    cctx: &CompileCtx<'_>,
    typedefs: &[ParsedTypedef],
    groupings: &[ParsedGrouping],
) -> CompileResult<Scope> {
    if typedefs.is_empty() && groupings.is_empty() {
        return Ok(cctx.scope.clone());
    }
    check_typedef_names(cctx, typedefs)?;
    for (i, grp) in groupings.iter().enumerate() {
        if groupings[..i].iter().any(|other| other.name == grp.name) {
            return Err(cctx.invalid(format!(
                "Duplicate identifier \"{}\" of grouping statement.",
                grp.name
            )));
        }
    }
    Ok(Some(Rc::new(ScopeFrame {
        typedefs: typedefs.to_vec(),
        groupings: groupings.to_vec(),
        parent: cctx.scope.clone(),
    })))
}

/// Typedef names must be unique and must not shadow built-in types.
pub fn check_typedef_names(cctx: &CompileCtx<'_>, typedefs: &[ParsedTypedef]) -> CompileResult<()> {
    for (i, tpdf) in typedefs.iter().enumerate() {
        if BuiltinType::from_name(&tpdf.name).is_some() {
            return Err(cctx.invalid(format!(
                "Invalid name \"{}\" of typedef - name collision with a built-in type.",
                tpdf.name
            )));
        }
        if typedefs[..i].iter().any(|other| other.name == tpdf.name) {
            return Err(cctx.invalid(format!(
                "Duplicate identifier \"{}\" of typedef statement.",
                tpdf.name
            )));
        }
    }
    Ok(())
}

/// Diagnostic path segment of a node created under `parent`.
fn segment(cctx: &CompileCtx<'_>, parent: Option<NodeId>, name: &str) -> String {
    match parent {
        Some(p) if cctx.tree.nodes[p].module == cctx.ns => format!("/{name}"),
        _ => format!("/{}:{name}", cctx.module_name(cctx.ns)),
    }
}

/// Compile every node of `pnodes` under `parent`.
pub fn compile_nodes(
    cctx: &mut CompileCtx<'_>,
    pnodes: &[ParsedNode],
    parent: Option<NodeId>,
    inherit: &Inherit,
) -> CompileResult<()> {
    for pnode in pnodes {
        compile_node(cctx, pnode, parent, inherit)?;
    }
    Ok(())
}

/// Compile one data definition (or instantiate a `uses`) under `parent`.
///
/// A node disabled by its if-feature is not created.
pub fn compile_node(
    cctx: &mut CompileCtx<'_>,
    pnode: &ParsedNode,
    parent: Option<NodeId>,
    inherit: &Inherit,
) -> CompileResult<()> {
    if let ParsedNodeKind::Uses(uses) = &pnode.kind {
        return compile_uses(cctx, pnode, uses, parent, inherit);
    }
    if parent.is_some_and(|p| matches!(cctx.tree.nodes[p].kind, NodeKind::Choice { .. }))
        && !matches!(pnode.kind, ParsedNodeKind::Case(_))
    {
        return compile_shorthand_case(cctx, pnode, parent, inherit);
    }
    if !if_features_hold(cctx, &pnode.if_features)? {
        return Ok(());
    }

    let segment = segment(cctx, parent, &pnode.name);
    cctx.path.push(&segment);
    let result = compile_node_inner(cctx, pnode, parent, inherit);
    cctx.path.pop();
    result
}

/// A case-less child of a choice gets an implicit case of the same name.
fn compile_shorthand_case(
    cctx: &mut CompileCtx<'_>,
    pnode: &ParsedNode,
    choice: Option<NodeId>,
    inherit: &Inherit,
) -> CompileResult<()> {
    if !if_features_hold(cctx, &pnode.if_features)? {
        return Ok(());
    }
    let case = ParsedNode::new(
        pnode.name.clone(),
        ParsedNodeKind::Case(crate::parsed::ParsedCase {
            children: vec![ParsedNode {
                if_features: Vec::new(),
                ..pnode.clone()
            }],
        }),
    );
    compile_node(cctx, &case, choice, inherit)
}

fn resolve_status(cctx: &CompileCtx<'_>, own: Option<Status>, inherited: Status) -> CompileResult<Status> {
    match own {
        Some(own) if own < inherited => Err(cctx.invalid(format!(
            "A \"{}\" status is in conflict with the parent's \"{}\" status.",
            own.as_str(),
            inherited.as_str()
        ))),
        Some(own) => Ok(own),
        None => Ok(inherited),
    }
}

fn resolve_config(
    cctx: &CompileCtx<'_>,
    pnode: &ParsedNode,
    parent: Option<NodeId>,
) -> CompileResult<Option<Config>> {
    let operation = matches!(
        pnode.kind,
        ParsedNodeKind::Rpc(_) | ParsedNodeKind::Action(_) | ParsedNodeKind::Notification(_)
    );
    if cctx.flags.is_operation() || operation {
        if pnode.config.is_some() {
            return Err(cctx.invalid(
                "Invalid \"config\" statement inside an RPC, action or notification.",
            ));
        }
        return Ok(None);
    }

    let explicit = pnode.config.map(|c| if c { Config::ReadWrite } else { Config::ReadOnly });
    if cctx.in_grouping() {
        return Ok(explicit);
    }
    let inherited = parent
        .and_then(|p| cctx.tree.nodes[p].config)
        .unwrap_or(Config::ReadWrite);
    match (explicit, inherited) {
        (Some(Config::ReadWrite), Config::ReadOnly) => Err(cctx.invalid(
            "Configuration node cannot be child of any state data node.",
        )),
        (Some(config), _) => Ok(Some(config)),
        (None, inherited) => Ok(Some(inherited)),
    }
}

fn compile_node_inner(
    cctx: &mut CompileCtx<'_>,
    pnode: &ParsedNode,
    parent: Option<NodeId>,
    inherit: &Inherit,
) -> CompileResult<()> {
    let status = resolve_status(cctx, pnode.status, inherit.status)?;
    let config = resolve_config(cctx, pnode, parent)?;

    let mut when = inherit.when.clone();
    if let Some(text) = &pnode.when {
        when.push(compile_constraint(cctx, text)?);
    }
    let mut musts = Vec::new();
    for text in &pnode.musts {
        musts.push(compile_constraint(cctx, text)?);
    }
    let exts = compile_exts(cctx, &pnode.exts, ExtParent::Node)?;

    let mut defaults = None;
    let kind = match &pnode.kind {
        ParsedNodeKind::Container(c) => NodeKind::Container {
            presence: c.presence.as_deref().map(|p| cctx.sctx.intern(p)),
        },
        ParsedNodeKind::Leaf(leaf) => compile_leaf(cctx, pnode, leaf, status, &mut defaults)?,
        ParsedNodeKind::LeafList(llist) => {
            compile_leaf_list(cctx, pnode, llist, status, &mut defaults)?
        }
        ParsedNodeKind::List(list) => {
            check_min_max(cctx, list.min_elements, list.max_elements)?;
            NodeKind::List {
                keys: Vec::new(),
                min_elements: list.min_elements.unwrap_or(0),
                max_elements: list.max_elements,
            }
        }
        ParsedNodeKind::Choice(choice) => NodeKind::Choice {
            default: None,
            mandatory: choice.mandatory.unwrap_or(false),
        },
        ParsedNodeKind::Case(_) => NodeKind::Case,
        ParsedNodeKind::Anydata(any) => NodeKind::Anydata {
            mandatory: any.mandatory.unwrap_or(false),
        },
        ParsedNodeKind::Anyxml(any) => NodeKind::Anyxml {
            mandatory: any.mandatory.unwrap_or(false),
        },
        ParsedNodeKind::Rpc(_) => {
            if parent.is_some() {
                return Err(cctx.invalid("The rpc statement is allowed only at the top level."));
            }
            NodeKind::Rpc
        }
        ParsedNodeKind::Action(_) => {
            if parent.is_none() {
                return Err(cctx.invalid(
                    "The action statement is not allowed at the top level, use rpc instead.",
                ));
            }
            if cctx.flags.is_operation() {
                return Err(cctx.invalid(
                    "Action is not allowed inside an RPC, action or notification.",
                ));
            }
            NodeKind::Action
        }
        ParsedNodeKind::Notification(_) => {
            if cctx.flags.is_operation() {
                return Err(cctx.invalid(
                    "Notification is not allowed inside an RPC, action or notification.",
                ));
            }
            NodeKind::Notification
        }
        ParsedNodeKind::Uses(_) => {
            return Err(cctx.invalid("Unexpected uses statement."));
        }
    };

    let has_leafref = kind.ty().is_some_and(|ty| !leafref_slots(ty).is_empty());
    let has_xpath = !when.is_empty() || !musts.is_empty();
    let node = SchemaNode {
        name: cctx.sctx.intern(&pnode.name),
        module: cctx.ns,
        kind,
        parent,
        children: Vec::new(),
        config,
        config_explicit: pnode.config.is_some(),
        status,
        when,
        musts,
        exts,
        disabled: false,
    };
    let id = cctx.tree.nodes.try_push(node)?;
    attach(cctx, parent, id)?;

    if !cctx.in_grouping() {
        if has_xpath {
            cctx.xpath.push(id);
        }
        if has_leafref {
            cctx.leafrefs.push(id);
        }
        if let Some((values, pmod, explicit)) = defaults {
            cctx.dflts.push(DeferredDefault {
                node: id,
                values,
                pmod,
                explicit,
            });
        }
    }

    let children = Inherit {
        status,
        when: Vec::new(),
    };
    match &pnode.kind {
        ParsedNodeKind::Container(c) => {
            with_scope(cctx, &c.typedefs, &c.groupings, |cctx| {
                compile_nodes(cctx, &c.children, Some(id), &children)
            })?;
        }
        ParsedNodeKind::List(list) => {
            with_scope(cctx, &list.typedefs, &list.groupings, |cctx| {
                compile_nodes(cctx, &list.children, Some(id), &children)
            })?;
            finish_list(cctx, id, list)?;
        }
        ParsedNodeKind::Choice(choice) => {
            compile_nodes(cctx, &choice.children, Some(id), &children)?;
            finish_choice(cctx, id, choice)?;
        }
        ParsedNodeKind::Case(case) => {
            compile_nodes(cctx, &case.children, Some(id), &children)?;
        }
        ParsedNodeKind::Rpc(op) | ParsedNodeKind::Action(op) => {
            compile_operation(cctx, id, op, &children)?;
        }
        ParsedNodeKind::Notification(notif) => {
            let saved = cctx.flags;
            cctx.flags |= CompileFlags::NOTIFICATION;
            let result = with_scope(cctx, &notif.typedefs, &notif.groupings, |cctx| {
                compile_nodes(cctx, &notif.children, Some(id), &children)
            });
            cctx.flags = saved;
            result?;
        }
        _ => {}
    }
    Ok(())
}

/// Run `f` with scoped typedefs and groupings in effect.
fn with_scope<R>(
    cctx: &mut CompileCtx<'_>,
    typedefs: &[ParsedTypedef],
    groupings: &[ParsedGrouping],
    f: impl FnOnce(&mut CompileCtx<'_>) -> CompileResult<R>,
) -> CompileResult<R> {
    let scope = scoped(cctx, typedefs, groupings)?;
    let saved = std::mem::replace(&mut cctx.scope, scope);
    let result = f(cctx);
    cctx.scope = saved;
    result
}

type PendingDefault = Option<(Vec<String>, crate::ids::ModuleId, bool)>;

fn compile_leaf(
    cctx: &mut CompileCtx<'_>,
    pnode: &ParsedNode,
    leaf: &ParsedLeaf,
    status: Status,
    defaults: &mut PendingDefault,
) -> CompileResult<NodeKind> {
    let resolved = compile_type(cctx, &leaf.ty, status, &pnode.name)?;
    let mandatory = leaf.mandatory.unwrap_or(false);
    if mandatory && leaf.default.is_some() {
        return Err(cctx.invalid("Invalid mandatory leaf with a default value."));
    }

    *defaults = match (&leaf.default, resolved.default) {
        (Some(value), _) => Some((vec![value.clone()], cctx.pmod, true)),
        (None, Some((value, pmod))) if !mandatory => Some((vec![value], pmod, false)),
        _ => None,
    };
    let units = leaf.units.clone().or(resolved.units);
    Ok(NodeKind::Leaf {
        ty: resolved.ty,
        units: units.as_deref().map(|u| cctx.sctx.intern(u)),
        default: None,
        mandatory,
    })
}

fn compile_leaf_list(
    cctx: &mut CompileCtx<'_>,
    pnode: &ParsedNode,
    llist: &ParsedLeafList,
    status: Status,
    defaults: &mut PendingDefault,
) -> CompileResult<NodeKind> {
    check_min_max(cctx, llist.min_elements, llist.max_elements)?;
    let min_elements = llist.min_elements.unwrap_or(0);
    if min_elements > 0 && !llist.defaults.is_empty() {
        return Err(cctx.invalid(
            "The default statement is present on leaf-list with a nonzero min-elements.",
        ));
    }

    let resolved = compile_type(cctx, &llist.ty, status, &pnode.name)?;
    *defaults = match resolved.default {
        _ if !llist.defaults.is_empty() => Some((llist.defaults.clone(), cctx.pmod, true)),
        Some((value, pmod)) if min_elements == 0 => Some((vec![value], pmod, false)),
        _ => None,
    };
    let units = llist.units.clone().or(resolved.units);
    Ok(NodeKind::LeafList {
        ty: resolved.ty,
        units: units.as_deref().map(|u| cctx.sctx.intern(u)),
        defaults: Vec::new(),
        min_elements,
        max_elements: llist.max_elements,
    })
}

pub fn check_min_max(cctx: &CompileCtx<'_>, min: Option<u32>, max: Option<u32>) -> CompileResult<()> {
    if max == Some(0) {
        return Err(cctx.invalid("Invalid value \"0\" of \"max-elements\"."));
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(cctx.invalid(format!(
                "Invalid combination of min-elements and max-elements: min value {min} is bigger than the max value {max}."
            )));
        }
    }
    Ok(())
}

fn compile_operation(
    cctx: &mut CompileCtx<'_>,
    id: NodeId,
    op: &ParsedOperation,
    inherit: &Inherit,
) -> CompileResult<()> {
    let empty = ParsedOperationIo::default();
    with_scope(cctx, &op.typedefs, &op.groupings, |cctx| {
        for (io, kind, flag) in [
            (op.input.as_ref(), NodeKind::Input, CompileFlags::RPC_INPUT),
            (op.output.as_ref(), NodeKind::Output, CompileFlags::RPC_OUTPUT),
        ] {
            let io = io.unwrap_or(&empty);
            let name = kind.keyword();
            cctx.path.push(&format!("/{name}"));

            let mut musts = Vec::new();
            for text in &io.musts {
                musts.push(compile_constraint(cctx, text)?);
            }
            let has_xpath = !musts.is_empty();
            let node = SchemaNode {
                name: cctx.sctx.intern(name),
                module: cctx.ns,
                kind,
                parent: Some(id),
                children: Vec::new(),
                config: None,
                config_explicit: false,
                status: inherit.status,
                when: Vec::new(),
                musts,
                exts: Vec::new(),
                disabled: false,
            };
            let io_id = cctx.tree.nodes.try_push(node)?;
            cctx.tree.nodes[id].children.push(io_id);
            if has_xpath && !cctx.in_grouping() {
                cctx.xpath.push(io_id);
            }

            let saved = cctx.flags;
            cctx.flags |= flag;
            let result = with_scope(cctx, &io.typedefs, &io.groupings, |cctx| {
                compile_nodes(cctx, &io.children, Some(io_id), inherit)
            });
            cctx.flags = saved;
            result?;
            cctx.path.pop();
        }
        Ok(())
    })
}

/// Link a new node under its parent (or into the top-level lists) after
/// checking its name is unique among its siblings.
pub fn attach(cctx: &mut CompileCtx<'_>, parent: Option<NodeId>, id: NodeId) -> CompileResult<()> {
    if let Some(clash) = find_clash(&cctx.tree, parent, id) {
        let node = &cctx.tree.nodes[clash];
        return Err(cctx.invalid(format!(
            "Duplicate identifier \"{}\" of {} statement.",
            cctx.sctx.str(node.name),
            cctx.tree.nodes[id].kind.keyword()
        )));
    }

    match parent {
        Some(parent) => cctx.tree.nodes[parent].children.push(id),
        None => match cctx.tree.nodes[id].kind {
            NodeKind::Rpc => cctx.tree.rpcs.push(id),
            NodeKind::Notification => cctx.tree.notifications.push(id),
            _ => cctx.tree.data.push(id),
        },
    }
    Ok(())
}

/// An existing node sharing the identifier of `id` in its namespace.
fn find_clash(tree: &CompiledModule, parent: Option<NodeId>, id: NodeId) -> Option<NodeId> {
    let node = &tree.nodes[id];
    let same = |other: NodeId| {
        let other = &tree.nodes[other];
        other.name == node.name && other.module == node.module
    };

    match node.kind {
        NodeKind::Input | NodeKind::Output => None,
        // case names are unique among the cases of one choice
        NodeKind::Case => parent.and_then(|p| tree.nodes[p].children.iter().copied().find(|c| same(*c))),
        _ => {
            let mut top = parent;
            while let Some(p) = top {
                if !tree.nodes[p].kind.is_schema_only() {
                    break;
                }
                top = tree.nodes[p].parent;
            }

            let mut stack = tree.siblings(top);
            while let Some(next) = stack.pop() {
                let other = &tree.nodes[next];
                if !matches!(other.kind, NodeKind::Case) && same(next) {
                    return Some(next);
                }
                if other.kind.is_schema_only() {
                    stack.extend(other.children.iter().copied());
                }
            }
            None
        }
    }
}

fn finish_list(cctx: &mut CompileCtx<'_>, id: NodeId, list: &ParsedList) -> CompileResult<()> {
    let list_config = cctx.tree.nodes[id].config;
    let mut keys: Vec<NodeId> = Vec::new();

    for key in list.keys.iter().flat_map(|k| k.split_whitespace()) {
        let (_, name) = split_prefix(key);
        let found = cctx.tree.nodes[id]
            .children
            .iter()
            .copied()
            .find(|c| &*cctx.sctx.str(cctx.tree.nodes[*c].name) == name);
        let Some(found) = found else {
            return Err(cctx.invalid(format!("The list's key \"{name}\" not found.")));
        };
        let node = &cctx.tree.nodes[found];
        let NodeKind::Leaf { ty, .. } = &node.kind else {
            return Err(cctx.invalid(format!(
                "The list's key \"{name}\" is a {}, not a leaf.",
                node.kind.keyword()
            )));
        };
        if keys.contains(&found) {
            return Err(cctx.invalid(format!("Duplicated key identifier \"{name}\".")));
        }
        if ty.base == BuiltinType::Empty {
            return Err(cctx.invalid(format!(
                "The list's key \"{name}\" cannot be of \"empty\" type."
            )));
        }
        if !cctx.in_grouping() && node.config != list_config {
            return Err(cctx.invalid(format!(
                "The list's key \"{name}\" must have the same \"config\" as the list."
            )));
        }

        // explicit key defaults are invalid, typedef ones are dropped
        if let Some(pos) = cctx.dflts.iter().position(|d| d.node == found) {
            if cctx.dflts[pos].explicit {
                return Err(cctx.invalid(format!(
                    "The list's key \"{name}\" must not have a default value."
                )));
            }
            cctx.dflts.remove(pos);
        }
        keys.push(found);
    }

    if keys.is_empty() && list_config == Some(Config::ReadWrite) && !cctx.in_grouping() {
        return Err(cctx.invalid("Missing key in list representing configuration data."));
    }
    if let NodeKind::List { keys: slot, .. } = &mut cctx.tree.nodes[id].kind {
        *slot = keys;
    }
    Ok(())
}

fn finish_choice(cctx: &mut CompileCtx<'_>, id: NodeId, choice: &ParsedChoice) -> CompileResult<()> {
    let Some(default) = &choice.default else {
        return Ok(());
    };
    if choice.mandatory == Some(true) {
        return Err(cctx.invalid("Invalid mandatory choice with a default case."));
    }
    let case = find_case(cctx, id, default)?;
    set_default_case(cctx, id, case)
}

/// Look a case of `choice` up by (possibly prefixed) name.
pub fn find_case(cctx: &CompileCtx<'_>, choice: NodeId, name: &str) -> CompileResult<NodeId> {
    let (_, name) = split_prefix(name);
    cctx.tree.nodes[choice]
        .children
        .iter()
        .copied()
        .find(|c| &*cctx.sctx.str(cctx.tree.nodes[*c].name) == name)
        .ok_or_else(|| cctx.invalid(format!("Default case \"{name}\" not found.")))
}

/// Make `case` the default of `choice`; the case must hold no mandatory node.
pub fn set_default_case(cctx: &mut CompileCtx<'_>, choice: NodeId, case: NodeId) -> CompileResult<()> {
    if let Some(node) = find_mandatory(&cctx.tree, case) {
        return Err(cctx.invalid(format!(
            "Mandatory node \"{}\" under the default case \"{}\".",
            cctx.sctx.str(cctx.tree.nodes[node].name),
            cctx.sctx.str(cctx.tree.nodes[case].name)
        )));
    }
    if let NodeKind::Choice { default, .. } = &mut cctx.tree.nodes[choice].kind {
        *default = Some(case);
    }
    Ok(())
}

/// Whether a node must be instantiated whenever its parent is.
pub fn is_mandatory(node: &SchemaNode) -> bool {
    match &node.kind {
        NodeKind::Leaf { mandatory, .. }
        | NodeKind::Choice { mandatory, .. }
        | NodeKind::Anydata { mandatory }
        | NodeKind::Anyxml { mandatory } => *mandatory,
        NodeKind::LeafList { min_elements, .. } | NodeKind::List { min_elements, .. } => {
            *min_elements > 0
        }
        _ => false,
    }
}

/// First mandatory node reachable from `id` without passing a presence
/// container, list or leaf-list instance.
pub fn find_mandatory(tree: &CompiledModule, id: NodeId) -> Option<NodeId> {
    let mut stack: Vec<NodeId> = tree.nodes[id].children.clone();
    while let Some(next) = stack.pop() {
        let node = &tree.nodes[next];
        if node.disabled {
            continue;
        }
        if is_mandatory(node) {
            return Some(next);
        }
        match node.kind {
            NodeKind::Container { presence: None } | NodeKind::Case => {
                stack.extend(node.children.iter().copied());
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SchemaContext;
    use crate::options::FeatureSelection;
    use crate::parsed::{
        ParsedAny, ParsedCase, ParsedContainer, ParsedFeature, ParsedModule, ParsedNotification,
        ParsedType,
    };

    fn compile(m: ParsedModule) -> CompileResult<(SchemaContext, crate::ids::ModuleId)> {
        let mut sctx = SchemaContext::new();
        let id = sctx.load_module(m)?;
        sctx.implement(id, FeatureSelection::All)?;
        Ok((sctx, id))
    }

    fn module(data: Vec<ParsedNode>) -> ParsedModule {
        let mut m = ParsedModule::new("m", "m");
        m.data = data;
        m
    }

    fn list(name: &str, keys: &[&str], children: Vec<ParsedNode>) -> ParsedNode {
        ParsedNode::new(
            name,
            ParsedNodeKind::List(ParsedList {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                children,
                ..Default::default()
            }),
        )
    }

    fn string_leaf(name: &str) -> ParsedNode {
        ParsedNode::leaf(name, ParsedType::named("string"))
    }

    #[test]
    fn test_config_inheritance() {
        let mut state = ParsedNode::container("state", vec![string_leaf("counter")]);
        state.config = Some(false);
        let (sctx, id) = compile(module(vec![ParsedNode::container("top", vec![state])])).unwrap();

        let tree = sctx.compiled(id).unwrap();
        let top = sctx.find_top_node(id, "top").unwrap();
        let state = sctx.find_child(tree, top, "state").unwrap();
        let counter = sctx.find_child(tree, state, "counter").unwrap();
        assert_eq!(tree.node(top).config, Some(Config::ReadWrite));
        assert_eq!(tree.node(counter).config, Some(Config::ReadOnly));
        assert_eq!(sctx.node_path(tree, counter), "/m:top/state/counter");
    }

    #[test]
    fn test_config_true_under_state() {
        let mut inner = string_leaf("x");
        inner.config = Some(true);
        let mut state = ParsedNode::container("state", vec![inner]);
        state.config = Some(false);
        let err = compile(module(vec![state])).unwrap_err();
        assert!(err.message().contains("cannot be child of any state data node"));
        assert_eq!(err.path(), Some("/m:state/x"));
    }

    #[test]
    fn test_config_inside_notification() {
        let mut leaf = string_leaf("x");
        leaf.config = Some(true);
        let notif = ParsedNode::new(
            "event",
            ParsedNodeKind::Notification(ParsedNotification {
                children: vec![leaf],
                ..Default::default()
            }),
        );
        let err = compile(module(vec![notif])).unwrap_err();
        assert!(err.message().contains("Invalid \"config\" statement"));
    }

    #[test]
    fn test_list_keys() {
        let (sctx, id) = compile(module(vec![list(
            "servers",
            &["name"],
            vec![string_leaf("name"), string_leaf("address")],
        )]))
        .unwrap();
        let tree = sctx.compiled(id).unwrap();
        let servers = sctx.find_top_node(id, "servers").unwrap();
        let name = sctx.find_child(tree, servers, "name").unwrap();
        assert!(matches!(&tree.node(servers).kind, NodeKind::List { keys, .. } if keys == &vec![name]));

        let err = compile(module(vec![list("l", &[], vec![string_leaf("a")])])).unwrap_err();
        assert!(err.message().contains("Missing key"));

        let err = compile(module(vec![list("l", &["b"], vec![string_leaf("a")])])).unwrap_err();
        assert!(err.message().contains("key \"b\" not found"));

        let empty = ParsedNode::leaf("e", ParsedType::named("empty"));
        let err = compile(module(vec![list("l", &["e"], vec![empty])])).unwrap_err();
        assert!(err.message().contains("\"empty\" type"));

        let mut keyed = string_leaf("k");
        if let ParsedNodeKind::Leaf(leaf) = &mut keyed.kind {
            leaf.default = Some("x".into());
        }
        let err = compile(module(vec![list("l", &["k"], vec![keyed])])).unwrap_err();
        assert!(err.message().contains("must not have a default value"));
    }

    #[test]
    fn test_state_list_needs_no_key() {
        let mut l = list("l", &[], vec![string_leaf("a")]);
        l.config = Some(false);
        compile(module(vec![l])).unwrap();
    }

    #[test]
    fn test_duplicate_siblings_through_choice() {
        let choice = ParsedNode::new(
            "ch",
            ParsedNodeKind::Choice(ParsedChoice {
                children: vec![string_leaf("a")],
                ..Default::default()
            }),
        );
        let err = compile(module(vec![ParsedNode::container(
            "top",
            vec![string_leaf("a"), choice],
        )]))
        .unwrap_err();
        assert!(err.message().contains("Duplicate identifier \"a\""));
    }

    #[test]
    fn test_choice_shorthand_and_default() {
        let choice = ParsedNode::new(
            "ch",
            ParsedNodeKind::Choice(ParsedChoice {
                default: Some("b".into()),
                children: vec![
                    string_leaf("a"),
                    ParsedNode::new(
                        "b",
                        ParsedNodeKind::Case(ParsedCase {
                            children: vec![string_leaf("b1")],
                        }),
                    ),
                ],
                ..Default::default()
            }),
        );
        let (sctx, id) = compile(module(vec![choice])).unwrap();
        let tree = sctx.compiled(id).unwrap();
        let ch = sctx.find_top_node(id, "ch").unwrap();
        let cases: Vec<_> = tree.node(ch).children.clone();
        assert_eq!(cases.len(), 2);
        assert!(matches!(tree.node(cases[0]).kind, NodeKind::Case));
        assert!(matches!(tree.node(ch).kind, NodeKind::Choice { default: Some(c), .. } if c == cases[1]));
        assert!(sctx.find_child(tree, ch, "a").is_some());
    }

    #[test]
    fn test_mandatory_in_default_case() {
        let mut mandatory = string_leaf("x");
        if let ParsedNodeKind::Leaf(leaf) = &mut mandatory.kind {
            leaf.mandatory = Some(true);
        }
        let choice = ParsedNode::new(
            "ch",
            ParsedNodeKind::Choice(ParsedChoice {
                default: Some("x".into()),
                children: vec![mandatory],
                ..Default::default()
            }),
        );
        let err = compile(module(vec![choice])).unwrap_err();
        assert!(err.message().contains("Mandatory node \"x\" under the default case"));
    }

    #[test]
    fn test_if_feature_removes_node() {
        let mut m = module(vec![]);
        m.features.push(ParsedFeature {
            name: "extra".into(),
            ..Default::default()
        });
        let mut gated = ParsedNode::new("gated", ParsedNodeKind::Anydata(ParsedAny::default()));
        gated.if_features = vec!["extra".into()];
        m.data = vec![gated, ParsedNode::new("c", ParsedNodeKind::Container(ParsedContainer::default()))];

        let mut sctx = SchemaContext::new();
        let id = sctx.load_module(m).unwrap();
        sctx.implement(id, FeatureSelection::None).unwrap();
        assert!(sctx.find_top_node(id, "gated").is_none());
        assert!(sctx.find_top_node(id, "c").is_some());
    }

    #[test]
    fn test_status_conflict() {
        let mut child = string_leaf("x");
        child.status = Some(Status::Current);
        let mut top = ParsedNode::container("top", vec![child]);
        top.status = Some(Status::Deprecated);
        let err = compile(module(vec![top])).unwrap_err();
        assert!(err.message().contains("in conflict with the parent's \"deprecated\" status"));
    }

    #[test]
    fn test_rpc_has_input_and_output() {
        let rpc = ParsedNode::new(
            "reset",
            ParsedNodeKind::Rpc(ParsedOperation {
                input: Some(ParsedOperationIo {
                    children: vec![string_leaf("reason")],
                    ..Default::default()
                }),
                ..Default::default()
            }),
        );
        let (sctx, id) = compile(module(vec![rpc])).unwrap();
        let tree = sctx.compiled(id).unwrap();
        assert_eq!(tree.rpcs.len(), 1);
        let io: Vec<_> = tree.node(tree.rpcs[0]).children.iter().map(|c| tree.node(*c).kind.keyword()).collect();
        assert_eq!(io, vec!["input", "output"]);
        let input = tree.node(tree.rpcs[0]).children[0];
        let reason = tree.node(input).children[0];
        assert_eq!(tree.node(reason).config, None);
    }

    #[test]
    fn test_leaf_list_bounds() {
        let llist = ParsedNode::new(
            "ll",
            ParsedNodeKind::LeafList(ParsedLeafList {
                ty: ParsedType::named("string"),
                min_elements: Some(3),
                max_elements: Some(2),
                ..Default::default()
            }),
        );
        let err = compile(module(vec![llist])).unwrap_err();
        assert!(err.message().contains("min value 3 is bigger than the max value 2"));
    }
}
