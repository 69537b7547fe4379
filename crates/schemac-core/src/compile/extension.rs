//! Extension instances and extension plugins.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::array::compile_array;
use super::cctx::CompileCtx;
use super::implement::ensure_implemented;
use super::node::if_features_hold;
use super::types::compile_type;
use crate::error::CompileResult;
use crate::ids::ExtDefId;
use crate::parsed::ParsedExtInstance;
use crate::schema::{ExtData, ExtInstance, ExtParent, NacmRule, Status};
use crate::syntax::split_prefix;

/// Compiles the substatements of the instances of one extension.
pub trait ExtensionPlugin: Send + Sync {
    /// Name of the module defining the extension.
    fn module(&self) -> &str;

    /// Name of the extension.
    fn name(&self) -> &str;

    /// Validate the instance's placement and substatements and fill in
    /// `ext.data`. Argument arity is already checked.
    fn compile(
        &self,
        cctx: &mut CompileCtx<'_>,
        ext_p: &ParsedExtInstance,
        ext: &mut ExtInstance,
    ) -> CompileResult<()>;
}

/// Registered extension plugins.
#[derive(Clone)]
pub struct ExtensionPlugins {
    plugins: Vec<Arc<dyn ExtensionPlugin>>,
}

impl fmt::Debug for ExtensionPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| format!("{}:{}", p.module(), p.name())))
            .finish()
    }
}

impl Default for ExtensionPlugins {
    /// The built-in plugins.
    fn default() -> Self {
        let mut plugins = Self::empty();
        plugins.register(Arc::new(AnnotationPlugin));
        plugins.register(Arc::new(NacmPlugin {
            name: "default-deny-write",
            rule: NacmRule::DenyWrite,
        }));
        plugins.register(Arc::new(NacmPlugin {
            name: "default-deny-all",
            rule: NacmRule::DenyAll,
        }));
        plugins
    }
}

impl ExtensionPlugins {
    pub fn empty() -> Self {
        Self { plugins: Vec::new() }
    }

    /// Register a plugin, replacing one for the same extension.
    pub fn register(&mut self, plugin: Arc<dyn ExtensionPlugin>) {
        self.plugins
            .retain(|p| !(p.module() == plugin.module() && p.name() == plugin.name()));
        self.plugins.push(plugin);
    }

    pub fn find(&self, module: &str, name: &str) -> Option<Arc<dyn ExtensionPlugin>> {
        self.plugins
            .iter()
            .find(|p| p.module() == module && p.name() == name)
            .cloned()
    }
}

/// Compile one extension instance attached to `parent`.
///
/// The definition is looked up through the instance's prefix, implementing
/// its module if needed, unless `override_def` supplies it.
pub fn compile_ext(
    cctx: &mut CompileCtx<'_>,
    ext_p: &ParsedExtInstance,
    parent: ExtParent,
    override_def: Option<ExtDefId>,
) -> CompileResult<ExtInstance> {
    let def = match override_def {
        Some(def) => def,
        None => {
            let (prefix, name) = split_prefix(&ext_p.name);
            let Some(prefix) = prefix else {
                return Err(cctx.invalid(format!(
                    "Extension instance \"{}\" without a prefix.",
                    ext_p.name
                )));
            };
            let module = cctx
                .sctx
                .resolve_prefix(cctx.pmod, prefix)
                .map_err(|err| cctx.locate(err))?;
            let def = cctx.sctx.find_extension(module, name).ok_or_else(|| {
                cctx.invalid(format!(
                    "Extension definition of extension instance \"{}\" not found.",
                    ext_p.name
                ))
            })?;
            ensure_implemented(cctx.sctx, module).map_err(|err| cctx.locate(err))?;
            def
        }
    };

    let (def_module, def_name, def_arg) = {
        let d = &cctx.sctx.extensions[def];
        (d.module, cctx.sctx.str(d.name), d.argument)
    };
    match (def_arg, &ext_p.argument) {
        (Some(arg), None) => {
            return Err(cctx.invalid(format!(
                "Extension instance \"{}\" misses argument \"{}\".",
                ext_p.name,
                cctx.sctx.str(arg)
            )))
        }
        (None, Some(value)) => {
            return Err(cctx.invalid(format!(
                "Extension instance \"{}\" with unexpected argument \"{value}\".",
                ext_p.name
            )))
        }
        _ => {}
    }

    let mut ext = ExtInstance {
        def,
        module: cctx.pmod,
        argument: ext_p.argument.as_deref().map(|a| cctx.sctx.intern(a)),
        parent,
        data: ExtData::None,
        nested: Vec::new(),
    };

    let plugin = cctx
        .sctx
        .plugins
        .find(&cctx.sctx.module_name(def_module), &def_name);
    match plugin {
        Some(plugin) => plugin.compile(cctx, ext_p, &mut ext)?,
        None => {
            let mut nested = Vec::new();
            compile_array(&mut nested, &ext_p.substmts, |stmt| {
                if !stmt.keyword.contains(':') {
                    warn!(
                        extension = %ext_p.name,
                        keyword = %stmt.keyword,
                        "ignoring substatement of an extension instance without a plugin"
                    );
                    return Ok(None);
                }
                let inner = ParsedExtInstance {
                    name: stmt.keyword.clone(),
                    argument: stmt.argument.clone(),
                    substmts: stmt.substmts.clone(),
                };
                compile_ext(cctx, &inner, ExtParent::ExtInstance, None).map(Some)
            })?;
            ext.nested = nested;
        }
    }
    Ok(ext)
}

/// Compile every instance in `exts`.
pub fn compile_exts(
    cctx: &mut CompileCtx<'_>,
    exts: &[ParsedExtInstance],
    parent: ExtParent,
) -> CompileResult<Vec<ExtInstance>> {
    let mut out = Vec::new();
    compile_array(&mut out, exts, |ext| compile_ext(cctx, ext, parent, None).map(Some))?;
    Ok(out)
}

/// `ietf-yang-metadata:annotation`.
struct AnnotationPlugin;

impl ExtensionPlugin for AnnotationPlugin {
    fn module(&self) -> &str {
        "ietf-yang-metadata"
    }

    fn name(&self) -> &str {
        "annotation"
    }

    fn compile(
        &self,
        cctx: &mut CompileCtx<'_>,
        ext_p: &ParsedExtInstance,
        ext: &mut ExtInstance,
    ) -> CompileResult<()> {
        if ext.parent != ExtParent::Module {
            return Err(cctx.invalid(format!(
                "Extension plugin \"{}\": annotation is allowed only at the top level of a module, not in a {}.",
                ext_p.name,
                ext.parent.as_str()
            )));
        }

        let mut ty = None;
        let mut units = None;
        let mut if_features = Vec::new();
        for stmt in &ext_p.substmts {
            match stmt.keyword.as_str() {
                "type" if ty.is_none() => {
                    let pty = stmt.to_type().map_err(|msg| cctx.invalid(msg))?;
                    ty = Some(compile_type(cctx, &pty, Status::Current, &ext_p.name)?.ty);
                }
                "units" if units.is_none() => {
                    units = stmt.argument.as_deref().map(|u| cctx.sctx.intern(u));
                }
                "if-feature" => {
                    let expr = stmt.argument.clone().ok_or_else(|| {
                        cctx.invalid(format!(
                            "Extension plugin \"{}\": missing argument of \"if-feature\".",
                            ext_p.name
                        ))
                    })?;
                    if_features.push(expr);
                }
                "description" | "reference" | "status" => {}
                other => {
                    return Err(cctx.invalid(format!(
                        "Extension plugin \"{}\": invalid or duplicate substatement \"{other}\".",
                        ext_p.name
                    )))
                }
            }
        }

        let ty = ty.ok_or_else(|| {
            cctx.invalid(format!(
                "Extension plugin \"{}\": missing mandatory \"type\" substatement.",
                ext_p.name
            ))
        })?;
        // a disabled annotation stays without data
        if !if_features_hold(cctx, &if_features)? {
            return Ok(());
        }
        ext.data = ExtData::Annotation {
            ty: Box::new(ty),
            units,
        };
        Ok(())
    }
}

/// `ietf-netconf-acm:default-deny-write` and `default-deny-all`.
struct NacmPlugin {
    name: &'static str,
    rule: NacmRule,
}

impl ExtensionPlugin for NacmPlugin {
    fn module(&self) -> &str {
        "ietf-netconf-acm"
    }

    fn name(&self) -> &str {
        self.name
    }

    fn compile(
        &self,
        cctx: &mut CompileCtx<'_>,
        ext_p: &ParsedExtInstance,
        ext: &mut ExtInstance,
    ) -> CompileResult<()> {
        if !matches!(ext.parent, ExtParent::Node | ExtParent::Module) {
            return Err(cctx.invalid(format!(
                "Extension plugin \"{}\": allowed only in a data node, not in a {}.",
                ext_p.name,
                ext.parent.as_str()
            )));
        }
        if let Some(stmt) = ext_p.substmts.first() {
            return Err(cctx.invalid(format!(
                "Extension plugin \"{}\": unexpected substatement \"{}\".",
                ext_p.name, stmt.keyword
            )));
        }
        ext.data = ExtData::Nacm(self.rule);
        Ok(())
    }
}
