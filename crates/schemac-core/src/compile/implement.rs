//! Module implementation and expression prefix resolution.

use tracing::debug;

use crate::context::SchemaContext;
use crate::error::{CompileError, CompileResult};
use crate::ids::ModuleId;
use crate::options::{CompileFlags, FeatureSelection};
use crate::syntax::Expr;

/// How the prefixes of an expression map to modules.
#[derive(Debug, Clone, Copy)]
pub enum PrefixData<'a> {
    /// Schema prefixes, resolved against the imports of a module.
    Schema(ModuleId),
    /// JSON prefixes are module names.
    Json,
    /// XML prefixes mapped by the namespace declarations in scope, as
    /// `(prefix, module name)` pairs.
    Xml(&'a [(String, String)]),
}

/// Resolve one prefix according to `data`.
pub fn resolve_prefix(sctx: &SchemaContext, prefix: &str, data: PrefixData<'_>) -> CompileResult<ModuleId> {
    match data {
        PrefixData::Schema(pmod) => sctx.resolve_prefix(pmod, prefix),
        PrefixData::Json => sctx.find_module(prefix).ok_or_else(|| {
            CompileError::invalid(format!("Module \"{prefix}\" not found."))
        }),
        PrefixData::Xml(ns) => {
            let (_, module) = ns.iter().find(|(p, _)| p == prefix).ok_or_else(|| {
                CompileError::invalid(format!("Prefix \"{prefix}\" has no namespace in scope."))
            })?;
            sctx.find_module(module).ok_or_else(|| {
                CompileError::invalid(format!("Module \"{module}\" not found."))
            })
        }
    }
}

/// Make sure every module referenced by a prefix of `expr` is implemented.
///
/// With `implement` set, non-implemented modules are implemented (and
/// compiled) on the way and `None` is returned. Otherwise the first
/// non-implemented module is returned and nothing is implemented.
pub fn compile_expr_implement(
    sctx: &mut SchemaContext,
    expr: &Expr,
    data: PrefixData<'_>,
    implement: bool,
) -> CompileResult<Option<ModuleId>> {
    for prefix in expr.prefixes() {
        let module = resolve_prefix(sctx, prefix, data)?;
        if sctx.is_implemented(module) {
            continue;
        }
        if !implement {
            return Ok(Some(module));
        }
        implement_module(sctx, module, None)?;
    }
    Ok(None)
}

/// Implement `module` and compile it.
///
/// `features` is `None` when the module is implemented implicitly because
/// something references it; its features then stay disabled. On failure
/// the module is left not implemented.
pub fn implement_module(
    sctx: &mut SchemaContext,
    module: ModuleId,
    features: Option<FeatureSelection>,
) -> CompileResult<()> {
    let name = sctx.module_name(module);

    if sctx.is_implemented(module) {
        return match features {
            Some(features) if features != sctx.module(module).feature_selection => {
                Err(CompileError::invalid(format!(
                    "Module \"{name}\" is already implemented with a different set of features."
                )))
            }
            _ => Ok(()),
        };
    }

    let features = features.unwrap_or_default();
    if let FeatureSelection::Named(names) = &features {
        for feature in names {
            if sctx.find_feature(module, feature).is_none() {
                return Err(CompileError::invalid(format!(
                    "Feature \"{feature}\" not found in module \"{name}\"."
                )));
            }
        }
    }

    debug!(module = %name, ?features, "implementing module");
    let m = sctx.module_mut(module);
    m.implemented = true;
    m.feature_selection = features;

    if let Err(err) = super::compile(sctx, module, CompileFlags::NONE) {
        let m = sctx.module_mut(module);
        m.implemented = false;
        m.feature_selection = FeatureSelection::None;
        return Err(err);
    }
    Ok(())
}

/// Make sure a module whose definition is referenced is implemented,
/// implementing it if the context allows that.
pub fn ensure_implemented(sctx: &mut SchemaContext, module: ModuleId) -> CompileResult<()> {
    if sctx.is_implemented(module) {
        return Ok(());
    }
    if !sctx.options.implicit_implement {
        return Err(CompileError::invalid(format!(
            "Module \"{}\" is not implemented.",
            sctx.module_name(module)
        )));
    }
    implement_module(sctx, module, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ContextOptions;
    use crate::parsed::{ParsedFeature, ParsedModule};

    fn context(implicit: bool) -> (SchemaContext, ModuleId, ModuleId) {
        let mut sctx = SchemaContext::with_options(ContextOptions {
            implicit_implement: implicit,
        });
        let target = sctx.load_module(ParsedModule::new("target", "t")).unwrap();
        let user = sctx
            .load_module(ParsedModule::new("user", "u").import("target", "tg"))
            .unwrap();
        (sctx, target, user)
    }

    #[test]
    fn test_reports_first_unimplemented_module() {
        let (mut sctx, target, user) = context(true);
        let expr = Expr::parse("/tg:a/u:b").unwrap();

        let found = compile_expr_implement(&mut sctx, &expr, PrefixData::Schema(user), false).unwrap();
        assert_eq!(found, Some(target));
        assert!(!sctx.is_implemented(target));
    }

    #[test]
    fn test_implements_referenced_modules() {
        let (mut sctx, target, user) = context(true);
        let expr = Expr::parse("/tg:a").unwrap();

        let found = compile_expr_implement(&mut sctx, &expr, PrefixData::Schema(user), true).unwrap();
        assert_eq!(found, None);
        assert!(sctx.is_implemented(target));
        assert!(sctx.compiled(target).is_some());
    }

    #[test]
    fn test_unknown_prefix() {
        let (mut sctx, _, user) = context(true);
        let expr = Expr::parse("/zz:a").unwrap();
        let err = compile_expr_implement(&mut sctx, &expr, PrefixData::Schema(user), true).unwrap_err();
        assert!(err.message().contains("Prefix \"zz\""));
    }

    #[test]
    fn test_json_and_xml_prefixes() {
        let (sctx, target, _) = context(true);
        assert_eq!(resolve_prefix(&sctx, "target", PrefixData::Json).unwrap(), target);
        let ns = vec![("x".to_string(), "target".to_string())];
        assert_eq!(resolve_prefix(&sctx, "x", PrefixData::Xml(&ns)).unwrap(), target);
        assert!(resolve_prefix(&sctx, "y", PrefixData::Xml(&ns)).is_err());
    }

    #[test]
    fn test_ensure_implemented_respects_options() {
        let (mut sctx, target, _) = context(false);
        let err = ensure_implemented(&mut sctx, target).unwrap_err();
        assert!(err.message().contains("\"target\""));

        sctx.options.implicit_implement = true;
        ensure_implemented(&mut sctx, target).unwrap();
        assert!(sctx.is_implemented(target));
    }

    #[test]
    fn test_feature_selection_checks() {
        let mut m = ParsedModule::new("feat", "f");
        m.features.push(ParsedFeature {
            name: "a".into(),
            ..Default::default()
        });
        let mut sctx = SchemaContext::new();
        let id = sctx.load_module(m).unwrap();

        let err = implement_module(&mut sctx, id, Some(FeatureSelection::Named(vec!["b".into()])))
            .unwrap_err();
        assert!(err.message().contains("Feature \"b\" not found"));
        assert!(!sctx.is_implemented(id));

        implement_module(&mut sctx, id, Some(FeatureSelection::All)).unwrap();
        assert_eq!(sctx.feature_enabled(id, "a"), Some(true));

        implement_module(&mut sctx, id, Some(FeatureSelection::All)).unwrap();
        assert!(implement_module(&mut sctx, id, Some(FeatureSelection::None)).is_err());
        implement_module(&mut sctx, id, None).unwrap();
    }
}
