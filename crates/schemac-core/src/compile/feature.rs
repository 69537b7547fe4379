//! Feature precompilation, finishing and revert.

use tracing::debug;

use super::array::compile_array;
use super::cctx::CompileCtx;
use super::extension::compile_ext;
use super::implement::ensure_implemented;
use crate::context::SchemaContext;
use crate::error::{CompileError, CompileResult};
use crate::ids::{FeatureId, ModuleId};
use crate::parsed::ParsedFeature;
use crate::schema::{ExtParent, Feature, FeatureState, IfFeatureExpr};
use crate::syntax::{parse_if_feature, IfFeatureAst};

/// Append skeletons for the features of a module. if-feature expressions
/// stay uncompiled until the module is implemented.
pub fn precompile_features(
    sctx: &mut SchemaContext,
    module: ModuleId,
    features: &[ParsedFeature],
) -> CompileResult<()> {
    let module_name = sctx.module_name(module);
    for (i, feature) in features.iter().enumerate() {
        let clash = features[..i].iter().any(|other| other.name == feature.name)
            || sctx.find_feature(module, &feature.name).is_some();
        if clash {
            return Err(CompileError::invalid(format!(
                "Duplicate identifier \"{}\" of feature statement.",
                feature.name
            ))
            .at(&format!("/{module_name}:{{feature='{}'}}", feature.name)));
        }
    }

    for feature in features {
        let skeleton = Feature::skeleton(sctx.intern(&feature.name), module, feature.status.unwrap_or_default());
        let id = sctx.features.try_push(skeleton)?;
        sctx.module_mut(module).features.push(id);
    }
    Ok(())
}

/// Compile if-feature expressions written in `pmod`.
///
/// Returns the compiled expressions and the modules owning referenced
/// features that are not implemented yet.
pub fn compile_if_features(
    cctx: &CompileCtx<'_>,
    pmod: ModuleId,
    exprs: &[String],
) -> CompileResult<(Vec<IfFeatureExpr>, Vec<ModuleId>)> {
    let mut compiled = Vec::new();
    let mut unimplemented = Vec::new();
    compile_array(&mut compiled, exprs, |text| {
        let ast = parse_if_feature(text).map_err(|err| cctx.invalid(err.to_string()))?;
        Ok(Some(resolve_ast(cctx, pmod, text, &ast, &mut unimplemented)?))
    })?;
    Ok((compiled, unimplemented))
}

fn resolve_ast(
    cctx: &CompileCtx<'_>,
    pmod: ModuleId,
    text: &str,
    ast: &IfFeatureAst,
    unimplemented: &mut Vec<ModuleId>,
) -> CompileResult<IfFeatureExpr> {
    Ok(match ast {
        IfFeatureAst::Feature { prefix, name } => {
            let module = cctx
                .sctx
                .resolve_opt_prefix(pmod, prefix.as_deref())
                .map_err(|err| cctx.locate(err))?;
            let id = cctx.sctx.find_feature(module, name).ok_or_else(|| {
                cctx.invalid(format!(
                    "Invalid value \"{text}\" of if-feature - unable to find feature \"{name}\" in module \"{}\".",
                    cctx.module_name(module)
                ))
            })?;
            if !cctx.sctx.is_implemented(module) && !unimplemented.contains(&module) {
                unimplemented.push(module);
            }
            IfFeatureExpr::Feature(id)
        }
        IfFeatureAst::Not(inner) => {
            IfFeatureExpr::Not(Box::new(resolve_ast(cctx, pmod, text, inner, unimplemented)?))
        }
        IfFeatureAst::And(lhs, rhs) => IfFeatureExpr::And(
            Box::new(resolve_ast(cctx, pmod, text, lhs, unimplemented)?),
            Box::new(resolve_ast(cctx, pmod, text, rhs, unimplemented)?),
        ),
        IfFeatureAst::Or(lhs, rhs) => IfFeatureExpr::Or(
            Box::new(resolve_ast(cctx, pmod, text, lhs, unimplemented)?),
            Box::new(resolve_ast(cctx, pmod, text, rhs, unimplemented)?),
        ),
    })
}

/// Compile the if-feature expressions of the features of the module being
/// compiled and evaluate every feature. A no-op once finished.
pub fn finish_features(cctx: &mut CompileCtx<'_>) -> CompileResult<()> {
    let module = cctx.module;
    if cctx.sctx.module(module).features_finished {
        return Ok(());
    }

    let parsed = std::sync::Arc::clone(&cctx.sctx.module(module).parsed);
    let ids = cctx.sctx.module(module).features.clone();

    // compile the expressions first, so modules implemented below see them
    let mut to_implement = Vec::new();
    if !cctx.sctx.module(module).features_compiled {
        for (id, pfeature) in ids.iter().zip(&parsed.features) {
            cctx.path.push(&format!("/{}:{{feature='{}'}}", cctx.module_name(module), pfeature.name));
            let (exprs, unimplemented) = compile_if_features(cctx, module, &pfeature.if_features)?;
            let mut exts = Vec::new();
            for ext in &pfeature.exts {
                exts.push(compile_ext(cctx, ext, ExtParent::Feature, None)?);
            }
            let feature = &mut cctx.sctx.features[*id];
            feature.if_features = exprs;
            feature.exts = exts;
            for m in unimplemented {
                if !to_implement.contains(&m) {
                    to_implement.push(m);
                }
            }
            cctx.path.pop();
        }
        cctx.sctx.module_mut(module).features_compiled = true;
    }

    for m in to_implement {
        ensure_implemented(cctx.sctx, m).map_err(|err| cctx.locate(err))?;
    }

    let mut visiting = Vec::new();
    for id in &ids {
        feature_state(cctx.sctx, *id, &mut visiting).map_err(|err| cctx.locate(err))?;
    }
    cctx.sctx.module_mut(module).features_finished = true;
    debug!(module = %cctx.module_name(module), "features finished");
    Ok(())
}

/// Evaluate (and cache) whether a feature is enabled: it must be selected
/// and all of its if-feature expressions must hold.
fn feature_state(sctx: &mut SchemaContext, id: FeatureId, visiting: &mut Vec<FeatureId>) -> CompileResult<bool> {
    match sctx.features[id].state {
        FeatureState::Enabled => return Ok(true),
        FeatureState::Disabled => return Ok(false),
        FeatureState::Unevaluated => {}
    }

    let module = sctx.features[id].module;
    if !sctx.module(module).features_compiled {
        // expressions unknown yet, counts as disabled without caching
        return Ok(false);
    }
    if visiting.contains(&id) {
        return Err(CompileError::invalid(format!(
            "Circular feature dependency detected for feature \"{}:{}\".",
            sctx.module_name(module),
            sctx.str(sctx.features[id].name)
        )));
    }

    let mut refs = Vec::new();
    for expr in &sctx.features[id].if_features {
        expr.features(&mut refs);
    }
    visiting.push(id);
    for dep in refs {
        feature_state(sctx, dep, visiting)?;
    }
    visiting.pop();

    let feature = &sctx.features[id];
    let selected = sctx
        .module(module)
        .feature_selection
        .selects(&sctx.str(feature.name));
    let enabled = selected
        && feature
            .if_features
            .iter()
            .all(|expr| expr.eval(&sctx.features));

    sctx.features[id].state = if enabled {
        FeatureState::Enabled
    } else {
        FeatureState::Disabled
    };
    Ok(enabled)
}

/// Put the features of a module back into their precompiled state.
/// Calling it on a module that never finished, or twice, is a no-op.
pub fn revert_features(sctx: &mut SchemaContext, module: ModuleId) {
    let ids = sctx.module(module).features.clone();
    for id in ids {
        let feature = &mut sctx.features[id];
        feature.if_features.clear();
        feature.exts.clear();
        feature.state = FeatureState::Unevaluated;
    }
    let m = sctx.module_mut(module);
    m.features_compiled = false;
    m.features_finished = false;
    debug!(module = %sctx.module_name(module), "features reverted");
}
