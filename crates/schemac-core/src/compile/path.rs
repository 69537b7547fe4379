//! Schema node identifiers and simple data paths.

use crate::context::SchemaContext;
use crate::error::{CompileError, CompileResult};
use crate::ids::{ModuleId, NodeId};
use crate::schema::{CompiledModule, NodeKind};
use crate::syntax::{split_prefix, Expr, Token};

/// One `prefix:name` step of a schema node identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<'a> {
    pub prefix: Option<&'a str>,
    pub name: &'a str,
}

/// Split an absolute (`/a:b/c`) or descendant (`b/c`) schema node identifier.
pub fn parse_nodeid(text: &str, absolute: bool) -> CompileResult<Vec<Step<'_>>> {
    let text = text.trim();
    let rest = match (text.strip_prefix('/'), absolute) {
        (Some(rest), true) => rest,
        (None, false) => text,
        (_, true) => {
            return Err(CompileError::invalid(format!(
                "Invalid absolute-schema-nodeid value \"{text}\" - missing starting \"/\"."
            )))
        }
        (_, false) => {
            return Err(CompileError::invalid(format!(
                "Invalid descendant-schema-nodeid value \"{text}\" - absolute-schema-nodeid used."
            )))
        }
    };

    rest.split('/')
        .map(|step| {
            let (prefix, name) = split_prefix(step);
            if name.is_empty() || prefix.is_some_and(str::is_empty) {
                return Err(CompileError::invalid(format!(
                    "Invalid schema-nodeid value \"{text}\" - empty step."
                )));
            }
            Ok(Step { prefix, name })
        })
        .collect()
}

/// Module a step's prefix refers to. Unprefixed steps, and steps prefixed
/// with `pmod`'s own prefix, name nodes of `ns`.
pub fn step_module(sctx: &SchemaContext, step: &Step<'_>, pmod: ModuleId, ns: ModuleId) -> CompileResult<ModuleId> {
    match step.prefix {
        None => Ok(ns),
        Some(prefix) => {
            let module = sctx.resolve_prefix(pmod, prefix)?;
            Ok(if module == pmod { ns } else { module })
        }
    }
}

/// Module of the first step of an absolute identifier, i.e. the module
/// whose tree the identifier points into.
pub fn target_module(sctx: &SchemaContext, text: &str, pmod: ModuleId) -> CompileResult<ModuleId> {
    let steps = parse_nodeid(text, true)?;
    match steps.first() {
        Some(first) => step_module(sctx, first, pmod, pmod),
        None => Err(CompileError::invalid(format!("Empty schema-nodeid \"{text}\"."))),
    }
}

/// Walk `steps` down from the candidates `start`. Choice, case, input and
/// output nodes are ordinary steps.
pub fn resolve_steps(
    sctx: &SchemaContext,
    tree: &CompiledModule,
    start: &[NodeId],
    steps: &[Step<'_>],
    pmod: ModuleId,
    ns: ModuleId,
) -> CompileResult<Option<NodeId>> {
    let mut candidates = start.to_vec();
    let mut found = None;
    for step in steps {
        let module = step_module(sctx, step, pmod, ns)?;
        found = candidates.iter().copied().find(|id| {
            let node = &tree.nodes[*id];
            !node.disabled && node.module == module && &*sctx.str(node.name) == step.name
        });
        match found {
            Some(id) => candidates = tree.nodes[id].children.clone(),
            None => return Ok(None),
        }
    }
    Ok(found)
}

/// Resolve an absolute schema node identifier over `tree`.
pub fn resolve_absolute(
    sctx: &SchemaContext,
    tree: &CompiledModule,
    text: &str,
    pmod: ModuleId,
) -> CompileResult<Option<NodeId>> {
    let steps = parse_nodeid(text, true)?;
    let top: Vec<NodeId> = tree.top_level().collect();
    resolve_steps(sctx, tree, &top, &steps, pmod, pmod)
}

/// Parent of a node in the data tree: choice, case, input and output are
/// not data nodes.
fn data_parent(tree: &CompiledModule, id: NodeId) -> Option<NodeId> {
    let mut cur = tree.nodes[id].parent;
    while let Some(p) = cur {
        match tree.nodes[p].kind {
            NodeKind::Choice { .. } | NodeKind::Case | NodeKind::Input | NodeKind::Output => {
                cur = tree.nodes[p].parent;
            }
            _ => return Some(p),
        }
    }
    None
}

/// Data child of `parent` (or a top-level data node), looking through
/// choice, case, input and output.
fn data_child(
    sctx: &SchemaContext,
    tree: &CompiledModule,
    parent: Option<NodeId>,
    module: ModuleId,
    name: &str,
) -> Option<NodeId> {
    let mut stack = tree.siblings(parent);
    while let Some(next) = stack.pop() {
        let node = &tree.nodes[next];
        if node.disabled {
            continue;
        }
        match node.kind {
            NodeKind::Choice { .. } | NodeKind::Case | NodeKind::Input | NodeKind::Output => {
                stack.extend(node.children.iter().copied());
            }
            _ if node.module == module && &*sctx.str(node.name) == name => return Some(next),
            _ => {}
        }
    }
    None
}

/// Whether an expression is a plain location path (steps, `.`, `..` and
/// predicates only).
pub fn is_location_path(expr: &Expr) -> bool {
    let mut depth = 0usize;
    !expr.tokens.is_empty()
        && expr.tokens.iter().all(|token| match token {
            Token::LBracket => {
                depth += 1;
                true
            }
            Token::RBracket => {
                depth = depth.saturating_sub(1);
                true
            }
            _ if depth > 0 => true,
            Token::Slash | Token::Dot | Token::DotDot | Token::NameTest { .. } => true,
            _ => false,
        })
}

/// First prefix of an absolute location path, if any.
pub fn first_prefix(expr: &Expr) -> Option<&str> {
    match expr.tokens.as_slice() {
        [Token::Slash, Token::NameTest { prefix, .. }, ..] => prefix.as_deref(),
        _ => None,
    }
}

/// Resolve a location path to the data node of `tree` it selects, starting
/// at `context` for relative paths. Returns `None` for paths that do not
/// resolve, or that are not plain location paths.
///
/// Unprefixed names (and names prefixed with `pmod`'s prefix) belong to
/// `ns`.
pub fn resolve_data_path(
    sctx: &SchemaContext,
    tree: &CompiledModule,
    context: Option<NodeId>,
    ns: ModuleId,
    expr: &Expr,
    pmod: ModuleId,
) -> CompileResult<Option<NodeId>> {
    if let Some(Token::Function(name)) = expr.tokens.first() {
        if name == "deref" {
            return Err(CompileError::invalid(format!(
                "Unsupported deref() in path \"{}\".",
                expr.text
            )));
        }
    }
    if !is_location_path(expr) {
        return Ok(None);
    }

    let absolute = matches!(expr.tokens.first(), Some(Token::Slash));
    let mut cur = match (absolute, context) {
        (true, _) => None,
        (false, Some(context)) => Some(context),
        (false, None) => return Ok(None),
    };
    let mut depth = 0usize;

    for token in &expr.tokens {
        match token {
            Token::LBracket => depth += 1,
            Token::RBracket => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            Token::Slash | Token::Dot => {}
            Token::DotDot => match cur {
                Some(id) => cur = data_parent(tree, id),
                None => return Ok(None),
            },
            Token::NameTest { prefix, name } => {
                let step = Step {
                    prefix: prefix.as_deref(),
                    name,
                };
                let module = step_module(sctx, &step, pmod, ns)?;
                match data_child(sctx, tree, cur, module, name) {
                    Some(id) => cur = Some(id),
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        }
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FeatureSelection;
    use crate::parsed::{ParsedChoice, ParsedModule, ParsedNode, ParsedNodeKind, ParsedType};

    fn fixture() -> (SchemaContext, ModuleId) {
        let choice = ParsedNode::new(
            "ch",
            ParsedNodeKind::Choice(ParsedChoice {
                children: vec![ParsedNode::leaf("opt", ParsedType::named("string"))],
                ..Default::default()
            }),
        );
        let mut m = ParsedModule::new("m", "m");
        m.data = vec![ParsedNode::container(
            "top",
            vec![ParsedNode::leaf("a", ParsedType::named("string")), choice],
        )];
        let mut sctx = SchemaContext::new();
        let id = sctx.load_module(m).unwrap();
        sctx.implement(id, FeatureSelection::None).unwrap();
        (sctx, id)
    }

    #[test]
    fn test_parse_nodeid() {
        let steps = parse_nodeid("/m:top/x:a", true).unwrap();
        assert_eq!(steps, vec![
            Step { prefix: Some("m"), name: "top" },
            Step { prefix: Some("x"), name: "a" },
        ]);
        assert!(parse_nodeid("top/a", true).is_err());
        assert!(parse_nodeid("/top", false).is_err());
        assert!(parse_nodeid("/m:top//a", true).is_err());
    }

    #[test]
    fn test_schema_nodeid_names_choice_and_case() {
        let (sctx, id) = fixture();
        let tree = sctx.compiled(id).unwrap();
        let found = resolve_absolute(&sctx, tree, "/m:top/ch/opt/opt", id).unwrap();
        assert_eq!(found.map(|n| sctx.node_path(tree, n)), Some("/m:top/ch/opt/opt".to_string()));
        assert_eq!(resolve_absolute(&sctx, tree, "/m:top/opt", id).unwrap(), None);
    }

    #[test]
    fn test_data_path_skips_choice() {
        let (sctx, id) = fixture();
        let tree = sctx.compiled(id).unwrap();
        let top = sctx.find_top_node(id, "top").unwrap();
        let a = sctx.find_child(tree, top, "a").unwrap();
        let opt = sctx.find_child(tree, top, "opt").unwrap();

        let expr = Expr::parse("../opt").unwrap();
        assert_eq!(resolve_data_path(&sctx, tree, Some(a), id, &expr, id).unwrap(), Some(opt));
        let expr = Expr::parse("/m:top/opt").unwrap();
        assert_eq!(resolve_data_path(&sctx, tree, Some(a), id, &expr, id).unwrap(), Some(opt));
        let expr = Expr::parse("../../../x").unwrap();
        assert_eq!(resolve_data_path(&sctx, tree, Some(a), id, &expr, id).unwrap(), None);
        let expr = Expr::parse("count(../opt) > 1").unwrap();
        assert_eq!(resolve_data_path(&sctx, tree, Some(a), id, &expr, id).unwrap(), None);
        let expr = Expr::parse("deref(../opt)/x").unwrap();
        assert!(resolve_data_path(&sctx, tree, Some(a), id, &expr, id).is_err());
    }

    #[test]
    fn test_location_path_detection() {
        assert!(is_location_path(&Expr::parse("/a/b[c = 'x']/d").unwrap()));
        assert!(!is_location_path(&Expr::parse("../a = 'x'").unwrap()));
        assert_eq!(first_prefix(&Expr::parse("/if:interfaces/if:name").unwrap()), Some("if"));
    }
}
