//! Command line support for the schemac schema compiler.
//!
//! Modules come in as JSON bundles of parsed modules (one module object, or
//! an array of them). This crate loads bundles into a [`SchemaContext`] and
//! renders compiled modules as an indented tree or as JSON.

use std::fmt::Write as _;

use anyhow::{bail, Context, Result};
use schemac_core::{
    CompiledModule, Config, FeatureSelection, FeatureState, ModuleId, NodeId, NodeKind, ParsedModule,
    SchemaContext, Type, Value,
};
use serde::Deserialize;
use serde_json::{json, Value as Json};

/// Contents of one input file.
#[derive(Deserialize)]
#[serde(untagged)]
enum Bundle {
    Many(Vec<ParsedModule>),
    One(Box<ParsedModule>),
}

/// Parse a bundle file into its modules.
pub fn parse_bundle(text: &str) -> Result<Vec<ParsedModule>> {
    let bundle: Bundle = serde_json::from_str(text).context("Invalid module bundle")?;
    Ok(match bundle {
        Bundle::Many(modules) => modules,
        Bundle::One(module) => vec![*module],
    })
}

/// Parse a `--features` argument: `module:f1,f2`, `module:*` or `module:`.
pub fn parse_feature_arg(arg: &str) -> Result<(String, FeatureSelection)> {
    let Some((module, list)) = arg.split_once(':') else {
        bail!("Invalid feature selection \"{arg}\", expected module:feature[,feature...]");
    };
    if module.is_empty() {
        bail!("Invalid feature selection \"{arg}\", missing module name");
    }
    let selection = match list.trim() {
        "" => FeatureSelection::None,
        "*" => FeatureSelection::All,
        list => FeatureSelection::Named(
            list.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect(),
        ),
    };
    Ok((module.to_string(), selection))
}

/// Load every module of every bundle, in order.
pub fn load_bundles(sctx: &mut SchemaContext, bundles: Vec<Vec<ParsedModule>>) -> Result<Vec<ModuleId>> {
    let mut loaded = Vec::new();
    for module in bundles.into_iter().flatten() {
        let name = module.name.clone();
        let id = sctx
            .load_module(module)
            .with_context(|| format!("Failed to load module \"{name}\""))?;
        loaded.push(id);
    }
    Ok(loaded)
}

// ============================================================================
// Text rendering
// ============================================================================

/// Render a compiled module: its identities, features and data tree.
pub fn render_module(sctx: &SchemaContext, module: ModuleId) -> String {
    let mut out = String::new();
    let m = sctx.module(module);
    let _ = write!(out, "module {}", sctx.str(m.name));
    if let Some(rev) = m.revision {
        let _ = write!(out, "@{}", sctx.str(rev));
    }
    out.push('\n');

    for id in &m.identities {
        let ident = &sctx.identities[*id];
        let _ = write!(out, "  identity {}", sctx.str(ident.name));
        if !ident.bases.is_empty() {
            let bases: Vec<String> = ident.bases.iter().map(|b| sctx.identity_qname(*b)).collect();
            let _ = write!(out, " (base {})", bases.join(", "));
        }
        out.push('\n');
    }
    for id in &m.features {
        let feature = &sctx.features[*id];
        let _ = writeln!(
            out,
            "  feature {}: {}",
            sctx.str(feature.name),
            feature_state(feature.state)
        );
    }

    if let Some(tree) = sctx.compiled(module) {
        for id in tree.top_level() {
            render_node(sctx, tree, module, id, 1, &mut out);
        }
    }
    out
}

fn feature_state(state: FeatureState) -> &'static str {
    match state {
        FeatureState::Enabled => "enabled",
        FeatureState::Disabled => "disabled",
        FeatureState::Unevaluated => "unevaluated",
    }
}

fn render_node(
    sctx: &SchemaContext,
    tree: &CompiledModule,
    owner: ModuleId,
    id: NodeId,
    depth: usize,
    out: &mut String,
) {
    let node = tree.node(id);
    if node.disabled {
        return;
    }
    let pad = "  ".repeat(depth);
    let _ = write!(out, "{pad}{} {}", node.kind.keyword(), node_name(sctx, tree, owner, id));

    match &node.kind {
        NodeKind::Leaf {
            ty,
            default,
            mandatory,
            ..
        } => {
            let _ = write!(out, " : {}", type_name(sctx, ty));
            if let Some(value) = default {
                let _ = write!(out, " = {}", render_value(sctx, value));
            }
            if *mandatory {
                out.push_str(" mandatory");
            }
        }
        NodeKind::LeafList { ty, defaults, .. } => {
            let _ = write!(out, " : {}", type_name(sctx, ty));
            if !defaults.is_empty() {
                let values: Vec<String> = defaults.iter().map(|v| render_value(sctx, v)).collect();
                let _ = write!(out, " = [{}]", values.join(", "));
            }
        }
        NodeKind::List { keys, .. } if !keys.is_empty() => {
            let keys: Vec<String> = keys.iter().map(|k| sctx.str(tree.node(*k).name).to_string()).collect();
            let _ = write!(out, " [{}]", keys.join(" "));
        }
        NodeKind::Choice {
            default: Some(case), ..
        } => {
            let _ = write!(out, " (default {})", sctx.str(tree.node(*case).name));
        }
        _ => {}
    }
    if node.config == Some(Config::ReadOnly) {
        out.push_str(" ro");
    }
    out.push('\n');

    for child in &node.children {
        render_node(sctx, tree, owner, *child, depth + 1, out);
    }
}

/// Node name, qualified with its module when it comes from another module.
fn node_name(sctx: &SchemaContext, tree: &CompiledModule, owner: ModuleId, id: NodeId) -> String {
    let node = tree.node(id);
    if node.module == owner {
        sctx.str(node.name).to_string()
    } else {
        format!("{}:{}", sctx.module_name(node.module), sctx.str(node.name))
    }
}

fn type_name(sctx: &SchemaContext, ty: &Type) -> String {
    let name = match ty.typedef {
        Some(tpdf) => sctx.str(tpdf).to_string(),
        None => ty.base.as_str().to_string(),
    };
    match ty.leafref() {
        Some(lref) if lref.realtype.is_some() => format!("{name} -> {}", ty.real().base.as_str()),
        _ => name,
    }
}

/// Canonical text of a default value.
pub fn render_value(sctx: &SchemaContext, value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Empty => String::new(),
        Value::Int(i) => i.to_string(),
        Value::Decimal { value, fraction_digits } => {
            let scale = 10i128.pow(u32::from(*fraction_digits));
            let sign = if *value < 0 { "-" } else { "" };
            let abs = value.abs();
            format!(
                "{sign}{}.{:0width$}",
                abs / scale,
                abs % scale,
                width = usize::from(*fraction_digits)
            )
        }
        Value::String(s) | Value::Enum(s) | Value::InstanceId(s) => sctx.str(*s).to_string(),
        Value::Bits(bits) => bits
            .iter()
            .map(|b| sctx.str(*b).to_string())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Identity(id) => sctx.identity_qname(*id),
    }
}

// ============================================================================
// JSON rendering
// ============================================================================

/// JSON summary of a compiled module.
pub fn module_json(sctx: &SchemaContext, module: ModuleId) -> Json {
    let m = sctx.module(module);
    let identities: Vec<Json> = m
        .identities
        .iter()
        .map(|id| {
            let ident = &sctx.identities[*id];
            json!({
                "name": sctx.identity_qname(*id),
                "bases": ident.bases.iter().map(|b| sctx.identity_qname(*b)).collect::<Vec<_>>(),
                "derived": ident.derived.iter().map(|d| sctx.identity_qname(*d)).collect::<Vec<_>>(),
            })
        })
        .collect();
    let features: serde_json::Map<String, Json> = m
        .features
        .iter()
        .map(|id| {
            let feature = &sctx.features[*id];
            (
                sctx.str(feature.name).to_string(),
                json!(feature_state(feature.state)),
            )
        })
        .collect();
    let nodes: Vec<Json> = sctx
        .compiled(module)
        .map(|tree| {
            tree.top_level()
                .filter(|id| !tree.node(*id).disabled)
                .map(|id| node_json(sctx, tree, module, id))
                .collect()
        })
        .unwrap_or_default();

    json!({
        "module": sctx.str(m.name).to_string(),
        "implemented": m.implemented,
        "identities": identities,
        "features": features,
        "nodes": nodes,
    })
}

fn node_json(sctx: &SchemaContext, tree: &CompiledModule, owner: ModuleId, id: NodeId) -> Json {
    let node = tree.node(id);
    let mut obj = serde_json::Map::new();
    obj.insert("kind".into(), json!(node.kind.keyword()));
    obj.insert("name".into(), json!(node_name(sctx, tree, owner, id)));
    obj.insert("path".into(), json!(sctx.node_path(tree, id)));
    obj.insert("status".into(), json!(node.status.as_str()));
    if let Some(config) = node.config {
        obj.insert("config".into(), json!(config == Config::ReadWrite));
    }
    if let Some(ty) = node.kind.ty() {
        obj.insert("type".into(), json!(type_name(sctx, ty)));
        if let Some(target) = ty.leafref().and_then(|l| l.target.as_ref()) {
            obj.insert("leafref-target".into(), json!(target));
        }
    }
    match &node.kind {
        NodeKind::Leaf {
            default: Some(value), ..
        } => {
            obj.insert("default".into(), json!(render_value(sctx, value)));
        }
        NodeKind::LeafList { defaults, .. } if !defaults.is_empty() => {
            let values: Vec<String> = defaults.iter().map(|v| render_value(sctx, v)).collect();
            obj.insert("default".into(), json!(values));
        }
        _ => {}
    }
    let children: Vec<Json> = node
        .children
        .iter()
        .filter(|c| !tree.node(**c).disabled)
        .map(|c| node_json(sctx, tree, owner, *c))
        .collect();
    if !children.is_empty() {
        obj.insert("children".into(), Json::Array(children));
    }
    Json::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemac_core::parsed::{ParsedNode, ParsedType};

    #[test]
    fn test_parse_feature_arg() {
        assert_eq!(
            parse_feature_arg("m:a, b").unwrap(),
            ("m".to_string(), FeatureSelection::Named(vec!["a".into(), "b".into()]))
        );
        assert_eq!(parse_feature_arg("m:*").unwrap().1, FeatureSelection::All);
        assert_eq!(parse_feature_arg("m:").unwrap().1, FeatureSelection::None);
        assert!(parse_feature_arg("m").is_err());
        assert!(parse_feature_arg(":a").is_err());
    }

    #[test]
    fn test_parse_bundle_single_and_many() {
        let one = parse_bundle(r#"{"name": "a", "prefix": "a"}"#).unwrap();
        assert_eq!(one.len(), 1);
        let many = parse_bundle(r#"[{"name": "a", "prefix": "a"}, {"name": "b", "prefix": "b"}]"#).unwrap();
        assert_eq!(many.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert!(parse_bundle("42").is_err());
    }

    #[test]
    fn test_render_module() {
        let mut m = ParsedModule::new("m", "m");
        let mut mtu = ParsedNode::leaf("mtu", ParsedType::named("uint16"));
        if let schemac_core::parsed::ParsedNodeKind::Leaf(leaf) = &mut mtu.kind {
            leaf.default = Some("1500".into());
        }
        m.data = vec![ParsedNode::container("top", vec![mtu])];

        let mut sctx = SchemaContext::new();
        let id = sctx.load_module(m).unwrap();
        sctx.implement(id, FeatureSelection::None).unwrap();
        assert_eq!(
            render_module(&sctx, id),
            "module m\n  container top\n    leaf mtu : uint16 = 1500\n"
        );

        let json = module_json(&sctx, id);
        assert_eq!(json["nodes"][0]["children"][0]["path"], "/m:top/mtu");
        assert_eq!(json["nodes"][0]["children"][0]["default"], "1500");
    }

    #[test]
    fn test_render_decimal() {
        let sctx = SchemaContext::new();
        let value = Value::Decimal {
            value: -1205,
            fraction_digits: 2,
        };
        assert_eq!(render_value(&sctx, &value), "-12.05");
    }
}
