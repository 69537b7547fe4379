//! The schema compiler.
//!
//! [`compile`] turns the parsed form of one module into its compiled tree:
//!
//! ```text
//!   Uncompiled ──► structural walk ──► finishing ──► published
//!        │                │                 │
//!        └────────────────┴─────────────────┴──► failed ──► reverted
//! ```
//!
//! The structural walk creates nodes and types and queues what needs the
//! complete tree in the [`CompileCtx`](cctx::CompileCtx); the finishing pass
//! ([`unres`]) drains those queues in a fixed order. Modules referenced on
//! the way are implemented (and compiled) recursively, each with its own
//! context.

pub mod array;
pub mod augment;
pub mod cctx;
pub mod extension;
pub mod feature;
pub mod grouping;
pub mod identity;
pub mod implement;
pub mod node;
pub mod path;
pub mod status;
pub mod types;
pub mod unres;

use std::sync::Arc;

use tracing::debug;

use self::cctx::{CompileCtx, Inherit};
use self::extension::compile_exts;
use self::implement::ensure_implemented;
use crate::context::SchemaContext;
use crate::error::{CompileError, CompileResult};
use crate::ids::ModuleId;
use crate::options::{CompileFlags, FeatureSelection};
use crate::schema::{CompiledModule, ExtParent};

/// Compile `module` and publish its compiled tree.
///
/// The module must be implemented first, so its feature selection is
/// known. Compiling an already compiled module is a no-op, as is compiling
/// a module whose compile is already running further up the stack. On
/// failure the module's features and identities are reverted to their
/// precompiled state and nothing is published.
pub fn compile(sctx: &mut SchemaContext, module: ModuleId, flags: CompileFlags) -> CompileResult<()> {
    let name = sctx.module_name(module);
    if sctx.compiled(module).is_some() {
        debug!(module = %name, "module already compiled");
        return Ok(());
    }
    if sctx.is_in_progress(module) {
        debug!(module = %name, "module compile in progress");
        return Ok(());
    }
    if !sctx.is_implemented(module) {
        return Err(CompileError::invalid(format!("Module \"{name}\" is not implemented.")));
    }
    check_import_cycle(sctx, module)?;

    debug!(module = %name, "compiling module");
    let foreign = match run(sctx, module, flags) {
        Ok(foreign) => foreign,
        Err(err) => {
            revert(sctx, module);
            return Err(err);
        }
    };

    if let Err(err) = update_foreign(sctx, &foreign) {
        sctx.module_mut(module).compiled = None;
        revert(sctx, module);
        return Err(err);
    }
    debug!(module = %name, "module compiled");
    Ok(())
}

/// Compile and publish, returning the other modules the module augments or
/// deviates.
fn run(sctx: &mut SchemaContext, module: ModuleId, flags: CompileFlags) -> CompileResult<Vec<ModuleId>> {
    sctx.push_in_progress(module);
    let result = compile_module(sctx, module, flags);
    sctx.pop_in_progress(module);

    let (tree, foreign) = result?;
    sctx.module_mut(module).compiled = Some(tree);
    Ok(foreign)
}

fn revert(sctx: &mut SchemaContext, module: ModuleId) {
    feature::revert_features(sctx, module);
    identity::revert_identities(sctx, module);
    debug!(module = %sctx.module_name(module), "compile failed, module reverted");
}

/// The structural walk followed by the finishing pass.
fn compile_module(
    sctx: &mut SchemaContext,
    module: ModuleId,
    flags: CompileFlags,
) -> CompileResult<(CompiledModule, Vec<ModuleId>)> {
    let parsed = Arc::clone(&sctx.module(module).parsed);
    let mut cctx = CompileCtx::new(sctx, module, flags);

    node::check_typedef_names(&cctx, &parsed.typedefs)?;
    feature::finish_features(&mut cctx)?;
    identity::compile_identities(&mut cctx, &parsed)?;
    cctx.tree.exts = compile_exts(&mut cctx, &parsed.exts, ExtParent::Module)?;

    let inherit = Inherit::default();
    for pnode in &parsed.data {
        node::compile_node(&mut cctx, pnode, None, &inherit)?;
    }
    unres::finish(&mut cctx)?;

    let CompileCtx { tree, foreign, .. } = cctx;
    Ok((tree, foreign))
}

/// Bring the modules a freshly compiled module augments or deviates up to
/// date: implement them, or recompile them if they were compiled before.
/// If one of them fails, recompiled trees are put back and the modules
/// implemented here are unimplemented again.
fn update_foreign(sctx: &mut SchemaContext, foreign: &[ModuleId]) -> CompileResult<()> {
    let mut replaced: Vec<(ModuleId, CompiledModule)> = Vec::new();
    let mut implemented: Vec<ModuleId> = Vec::new();
    let result = (|| -> CompileResult<()> {
        for &target in foreign {
            // a running compile collects this module's statements itself
            if sctx.is_in_progress(target) {
                continue;
            }
            if sctx.compiled(target).is_none() {
                let was_implemented = sctx.is_implemented(target);
                ensure_implemented(sctx, target)?;
                if !was_implemented {
                    implemented.push(target);
                }
                continue;
            }
            debug!(module = %sctx.module_name(target), "recompiling module");
            if let Some(old) = sctx.module_mut(target).compiled.take() {
                replaced.push((target, old));
            }
            run(sctx, target, CompileFlags::NONE)?;
        }
        Ok(())
    })();

    if result.is_err() {
        for (target, old) in replaced {
            sctx.module_mut(target).compiled = Some(old);
        }
        for target in implemented.into_iter().rev() {
            let m = sctx.module_mut(target);
            m.compiled = None;
            m.implemented = false;
            m.feature_selection = FeatureSelection::None;
            revert(sctx, target);
        }
    }
    result
}

/// Reject import chains leading back to `module`.
fn check_import_cycle(sctx: &SchemaContext, module: ModuleId) -> CompileResult<()> {
    fn visit(
        sctx: &SchemaContext,
        start: ModuleId,
        current: ModuleId,
        chain: &mut Vec<ModuleId>,
        seen: &mut Vec<ModuleId>,
    ) -> Option<Vec<ModuleId>> {
        for import in &sctx.module(current).parsed.imports {
            let Some(next) = sctx.find_module(&import.module) else {
                continue;
            };
            if next == start {
                let mut cycle = chain.clone();
                cycle.push(next);
                return Some(cycle);
            }
            if seen.contains(&next) {
                continue;
            }
            seen.push(next);
            chain.push(next);
            if let Some(cycle) = visit(sctx, start, next, chain, seen) {
                return Some(cycle);
            }
            chain.pop();
        }
        None
    }

    let mut chain = vec![module];
    let mut seen = Vec::new();
    match visit(sctx, module, module, &mut chain, &mut seen) {
        Some(cycle) => {
            let names: Vec<String> = cycle.iter().map(|m| sctx.module_name(*m).to_string()).collect();
            Err(CompileError::invalid(format!(
                "Circular import chain detected: {}.",
                names.join(" -> ")
            )))
        }
        None => Ok(()),
    }
}
