//! Identity precompilation and base resolution.

use tracing::debug;

use super::cctx::CompileCtx;
use super::extension::compile_ext;
use super::implement::ensure_implemented;
use super::status::{check_status, StatusRef};
use crate::context::SchemaContext;
use crate::error::{CompileError, CompileResult};
use crate::ids::{IdentId, ModuleId};
use crate::parsed::{ParsedIdentity, ParsedModule};
use crate::schema::{ExtParent, Identity};
use crate::syntax::split_prefix;

/// Append skeletons (name and module only) for the identities of a module.
///
/// Existing identities keep their ids. A name colliding with another
/// identity of the module fails before anything is appended.
pub fn precompile_identities(
    sctx: &mut SchemaContext,
    module: ModuleId,
    identities: &[ParsedIdentity],
) -> CompileResult<()> {
    let module_name = sctx.module_name(module);
    for (i, ident) in identities.iter().enumerate() {
        let clash = identities[..i].iter().any(|other| other.name == ident.name)
            || sctx.find_identity(module, &ident.name).is_some();
        if clash {
            return Err(CompileError::invalid(format!(
                "Duplicate identifier \"{}\" of identity statement.",
                ident.name
            ))
            .at(&format!("/{module_name}:{{identity='{}'}}", ident.name)));
        }
    }

    for ident in identities {
        let skeleton = Identity::skeleton(sctx.intern(&ident.name), module, ident.status.unwrap_or_default());
        let id = sctx.identities.try_push(skeleton)?;
        sctx.module_mut(module).identities.push(id);
    }
    Ok(())
}

/// Where resolved bases are stored.
pub enum BaseTarget<'a> {
    /// Bases of an `identity` statement; also links the identity into the
    /// bases' derived lists.
    Identity(IdentId),
    /// Bases of an `identityref` type.
    Identityref(&'a mut Vec<IdentId>),
}

/// Resolve base names, given as written in `base_pmod`.
pub fn compile_identity_bases(
    cctx: &mut CompileCtx<'_>,
    base_pmod: ModuleId,
    bases: &[String],
    mut target: BaseTarget<'_>,
) -> CompileResult<()> {
    for base in bases {
        let (prefix, name) = split_prefix(base);
        let module = cctx
            .sctx
            .resolve_opt_prefix(base_pmod, prefix)
            .map_err(|err| cctx.locate(err))?;

        let Some(found) = cctx.sctx.find_identity(module, name) else {
            let what = match &target {
                BaseTarget::Identity(id) => {
                    format!("identity \"{}\"", cctx.sctx.str(cctx.sctx.identities[*id].name))
                }
                BaseTarget::Identityref(_) => "identityref".to_string(),
            };
            return Err(cctx.invalid(format!(
                "Unable to find base ({base}) of {what} in module \"{}\".",
                cctx.module_name(module)
            )));
        };

        ensure_implemented(cctx.sctx, module).map_err(|err| cctx.locate(err))?;

        match &mut target {
            BaseTarget::Identity(ident) => {
                let ident = *ident;
                if found == ident || is_derived_from(cctx.sctx, found, ident) {
                    return Err(cctx.invalid(format!(
                        "Identity \"{}\" is indirectly derived from itself.",
                        cctx.sctx.str(cctx.sctx.identities[ident].name)
                    )));
                }
                let (me, base_ident) = (&cctx.sctx.identities[ident], &cctx.sctx.identities[found]);
                check_status(
                    StatusRef::new(me.status, &cctx.sctx.module_name(me.module), &cctx.sctx.str(me.name)),
                    StatusRef::new(
                        base_ident.status,
                        &cctx.sctx.module_name(base_ident.module),
                        &cctx.sctx.str(base_ident.name),
                    ),
                )
                .map_err(|err| cctx.locate(err))?;

                cctx.sctx.identities[ident].bases.push(found);
                cctx.sctx.identities[found].derived.push(ident);
            }
            BaseTarget::Identityref(out) => out.push(found),
        }
    }
    Ok(())
}

/// Whether `ident` is (transitively) derived from `base`.
pub fn is_derived_from(sctx: &SchemaContext, ident: IdentId, base: IdentId) -> bool {
    let mut stack = sctx.identities[base].derived.clone();
    let mut seen = Vec::new();
    while let Some(next) = stack.pop() {
        if next == ident {
            return true;
        }
        if !seen.contains(&next) {
            seen.push(next);
            stack.extend(sctx.identities[next].derived.iter().copied());
        }
    }
    false
}

/// Resolve the bases and extension instances of every identity of the
/// module being compiled.
pub fn compile_identities(cctx: &mut CompileCtx<'_>, parsed: &ParsedModule) -> CompileResult<()> {
    let module = cctx.module;
    let ids = cctx.sctx.module(module).identities.clone();
    for (id, pident) in ids.into_iter().zip(&parsed.identities) {
        if cctx.sctx.identities[id].resolved {
            continue;
        }
        cctx.path.push(&format!("/{}:{{identity='{}'}}", cctx.module_name(module), pident.name));
        compile_identity_bases(cctx, module, &pident.bases, BaseTarget::Identity(id))?;

        let mut exts = Vec::new();
        for ext in &pident.exts {
            exts.push(compile_ext(cctx, ext, ExtParent::Identity, None)?);
        }
        let ident = &mut cctx.sctx.identities[id];
        ident.exts = exts;
        ident.resolved = true;
        cctx.path.pop();
    }
    Ok(())
}

/// Put the identities of a module back into their skeleton state, unlinking
/// them from their bases. Calling it again is a no-op.
pub fn revert_identities(sctx: &mut SchemaContext, module: ModuleId) {
    let ids = sctx.module(module).identities.clone();
    for id in ids {
        let bases = std::mem::take(&mut sctx.identities[id].bases);
        for base in bases {
            sctx.identities[base].derived.retain(|d| *d != id);
        }
        let ident = &mut sctx.identities[id];
        ident.exts.clear();
        ident.resolved = false;
    }
    debug!(module = %sctx.module_name(module), "identities reverted");
}
