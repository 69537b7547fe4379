//! The schema registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::compile::extension::ExtensionPlugins;
use crate::compile::{self, feature, identity};
use crate::error::{CompileError, CompileResult};
use crate::ids::{ExtDefId, FeatureId, IdentId, ModuleId, NodeId};
use crate::index_vec::IndexVec;
use crate::interner::{ArcStr, Dictionary, Name};
use crate::options::{CompileFlags, ContextOptions, FeatureSelection};
use crate::parsed::ParsedModule;
use crate::schema::{CompiledModule, ExtensionDef, Feature, Identity, NodeKind};

/// A module known to the registry.
///
/// A loaded module is "known but inert" until it is implemented; its
/// identities, features and extension definitions are precompiled at load
/// time so other modules can reference them regardless of compile order.
#[derive(Debug)]
pub struct Module {
    pub name: Name,
    pub prefix: Name,
    pub revision: Option<Name>,
    pub parsed: Arc<ParsedModule>,
    pub identities: Vec<IdentId>,
    pub features: Vec<FeatureId>,
    pub extensions: Vec<ExtDefId>,
    pub implemented: bool,
    pub feature_selection: FeatureSelection,
    /// if-feature expressions of the features are compiled.
    pub features_compiled: bool,
    /// Feature states are evaluated.
    pub features_finished: bool,
    /// Published compiled form; `None` until a compile succeeds.
    pub compiled: Option<CompiledModule>,
}

/// Process-wide registry of modules and their compiled entities.
///
/// Not internally synchronized: callers sharing a context across threads
/// must hold an exclusive lock around every mutating call.
#[derive(Debug)]
pub struct SchemaContext {
    pub dict: Arc<Dictionary>,
    modules: IndexVec<ModuleId, Module>,
    by_name: HashMap<String, ModuleId>,
    pub identities: IndexVec<IdentId, Identity>,
    pub features: IndexVec<FeatureId, Feature>,
    pub extensions: IndexVec<ExtDefId, ExtensionDef>,
    pub plugins: ExtensionPlugins,
    pub options: ContextOptions,
    /// Modules whose compile is running, outermost first.
    in_progress: Vec<ModuleId>,
}

impl Default for SchemaContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaContext {
    pub fn new() -> Self {
        Self::with_options(ContextOptions::default())
    }

    pub fn with_options(options: ContextOptions) -> Self {
        Self {
            dict: Arc::new(Dictionary::new()),
            modules: IndexVec::new(),
            by_name: HashMap::new(),
            identities: IndexVec::new(),
            features: IndexVec::new(),
            extensions: IndexVec::new(),
            plugins: ExtensionPlugins::default(),
            options,
            in_progress: Vec::new(),
        }
    }

    // ========================================================================
    // Strings
    // ========================================================================

    pub fn intern(&self, s: &str) -> Name {
        self.dict.insert(s)
    }

    pub fn str(&self, name: Name) -> ArcStr {
        self.dict.resolve(name)
    }

    // ========================================================================
    // Modules
    // ========================================================================

    /// Register a parsed module and precompile its identities, features and
    /// extension definitions.
    pub fn load_module(&mut self, parsed: ParsedModule) -> CompileResult<ModuleId> {
        if self.by_name.contains_key(&parsed.name) {
            return Err(CompileError::invalid(format!(
                "Module \"{}\" is already loaded.",
                parsed.name
            )));
        }

        let module = Module {
            name: self.intern(&parsed.name),
            prefix: self.intern(&parsed.prefix),
            revision: parsed.revision.as_deref().map(|r| self.intern(r)),
            parsed: Arc::new(parsed),
            identities: Vec::new(),
            features: Vec::new(),
            extensions: Vec::new(),
            implemented: false,
            feature_selection: FeatureSelection::None,
            features_compiled: false,
            features_finished: false,
            compiled: None,
        };
        let parsed = Arc::clone(&module.parsed);
        let marks = (self.identities.len(), self.features.len(), self.extensions.len());
        let id = self.modules.try_push(module)?;
        self.by_name.insert(parsed.name.clone(), id);

        let precompiled = identity::precompile_identities(self, id, &parsed.identities)
            .and_then(|()| feature::precompile_features(self, id, &parsed.features))
            .and_then(|()| self.precompile_extensions(id, &parsed));
        if let Err(err) = precompiled {
            self.by_name.remove(&parsed.name);
            self.modules.truncate(id.index());
            self.identities.truncate(marks.0);
            self.features.truncate(marks.1);
            self.extensions.truncate(marks.2);
            return Err(err);
        }

        debug!(module = %parsed.name, "module loaded");
        Ok(id)
    }

    fn precompile_extensions(&mut self, module: ModuleId, parsed: &ParsedModule) -> CompileResult<()> {
        for (i, ext) in parsed.extensions.iter().enumerate() {
            if parsed.extensions[..i].iter().any(|e| e.name == ext.name) {
                return Err(CompileError::invalid(format!(
                    "Duplicate identifier \"{}\" of extension statement.",
                    ext.name
                ))
                .at(&format!("/{}:{{extension='{}'}}", parsed.name, ext.name)));
            }
            let def = ExtensionDef {
                name: self.intern(&ext.name),
                module,
                argument: ext.argument.as_deref().map(|a| self.intern(a)),
                status: ext.status.unwrap_or_default(),
            };
            let id = self.extensions.try_push(def)?;
            self.modules[module].extensions.push(id);
        }
        Ok(())
    }

    /// Implement a module with the given feature selection, compiling it.
    pub fn implement(&mut self, module: ModuleId, features: FeatureSelection) -> CompileResult<()> {
        compile::implement::implement_module(self, module, Some(features))
    }

    /// Compile a module (see [`compile::compile`]).
    pub fn compile(&mut self, module: ModuleId, flags: CompileFlags) -> CompileResult<()> {
        compile::compile(self, module, flags)
    }

    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id]
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter_enumerated()
    }

    pub fn module_name(&self, id: ModuleId) -> ArcStr {
        self.str(self.modules[id].name)
    }

    pub fn is_implemented(&self, id: ModuleId) -> bool {
        self.modules[id].implemented
    }

    /// Resolve `prefix` as seen from the parsed module `pmod`: its own prefix
    /// or the prefix of one of its imports.
    pub fn resolve_prefix(&self, pmod: ModuleId, prefix: &str) -> CompileResult<ModuleId> {
        let module = &self.modules[pmod];
        if &*self.str(module.prefix) == prefix {
            return Ok(pmod);
        }
        let import = module
            .parsed
            .imports
            .iter()
            .find(|imp| imp.prefix == prefix)
            .ok_or_else(|| {
                CompileError::invalid(format!(
                    "Prefix \"{prefix}\" not found in module \"{}\".",
                    module.parsed.name
                ))
            })?;
        self.find_module(&import.module).ok_or_else(|| {
            CompileError::invalid(format!(
                "Import module \"{}\" of module \"{}\" not found.",
                import.module, module.parsed.name
            ))
        })
    }

    /// Resolve an optional prefix, an absent prefix meaning `pmod` itself.
    pub fn resolve_opt_prefix(&self, pmod: ModuleId, prefix: Option<&str>) -> CompileResult<ModuleId> {
        match prefix {
            Some(prefix) => self.resolve_prefix(pmod, prefix),
            None => Ok(pmod),
        }
    }

    // ========================================================================
    // Compile bookkeeping
    // ========================================================================

    pub fn is_in_progress(&self, id: ModuleId) -> bool {
        self.in_progress.contains(&id)
    }

    pub(crate) fn push_in_progress(&mut self, id: ModuleId) {
        self.in_progress.push(id);
    }

    pub(crate) fn pop_in_progress(&mut self, id: ModuleId) {
        if let Some(pos) = self.in_progress.iter().rposition(|m| *m == id) {
            self.in_progress.remove(pos);
        }
    }

    // ========================================================================
    // Entities
    // ========================================================================

    pub fn find_identity(&self, module: ModuleId, name: &str) -> Option<IdentId> {
        self.modules[module]
            .identities
            .iter()
            .copied()
            .find(|id| &*self.str(self.identities[*id].name) == name)
    }

    pub fn find_feature(&self, module: ModuleId, name: &str) -> Option<FeatureId> {
        self.modules[module]
            .features
            .iter()
            .copied()
            .find(|id| &*self.str(self.features[*id].name) == name)
    }

    pub fn find_extension(&self, module: ModuleId, name: &str) -> Option<ExtDefId> {
        self.modules[module]
            .extensions
            .iter()
            .copied()
            .find(|id| &*self.str(self.extensions[*id].name) == name)
    }

    /// `module:name` of an identity.
    pub fn identity_qname(&self, id: IdentId) -> String {
        let ident = &self.identities[id];
        format!("{}:{}", self.module_name(ident.module), self.str(ident.name))
    }

    /// Whether a feature of a module is enabled.
    pub fn feature_enabled(&self, module: ModuleId, name: &str) -> Option<bool> {
        self.find_feature(module, name)
            .map(|id| self.features[id].is_enabled())
    }

    pub fn compiled(&self, module: ModuleId) -> Option<&CompiledModule> {
        self.modules[module].compiled.as_ref()
    }

    /// Schema path of a node of `tree`, printing the module name whenever
    /// the namespace changes.
    pub fn node_path(&self, tree: &CompiledModule, id: NodeId) -> String {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(node) = cur {
            chain.push(node);
            cur = tree.nodes[node].parent;
        }

        let mut path = String::new();
        let mut prev_module = None;
        for node in chain.into_iter().rev() {
            let node = &tree.nodes[node];
            path.push('/');
            if prev_module != Some(node.module) {
                path.push_str(&self.module_name(node.module));
                path.push(':');
            }
            path.push_str(&self.str(node.name));
            prev_module = Some(node.module);
        }
        path
    }

    /// Look a top-level node up by name.
    pub fn find_top_node(&self, module: ModuleId, name: &str) -> Option<NodeId> {
        let tree = self.compiled(module)?;
        tree.top_level()
            .find(|id| &*self.str(tree.nodes[*id].name) == name)
    }

    /// Look a child up by name, looking through choice and case nodes.
    pub fn find_child(&self, tree: &CompiledModule, parent: NodeId, name: &str) -> Option<NodeId> {
        for child in &tree.nodes[parent].children {
            let node = &tree.nodes[*child];
            if matches!(node.kind, NodeKind::Choice { .. } | NodeKind::Case) {
                if let Some(found) = self.find_child(tree, *child, name) {
                    return Some(found);
                }
            } else if &*self.str(node.name) == name {
                return Some(*child);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsed::{ParsedExtensionDef, ParsedFeature, ParsedIdentity};

    fn module_with_entities() -> ParsedModule {
        let mut m = ParsedModule::new("base", "b");
        m.identities.push(ParsedIdentity {
            name: "root".into(),
            ..Default::default()
        });
        m.features.push(ParsedFeature {
            name: "fast".into(),
            ..Default::default()
        });
        m.extensions.push(ParsedExtensionDef {
            name: "tag".into(),
            argument: Some("value".into()),
            status: None,
        });
        m
    }

    #[test]
    fn test_load_precompiles_entities() {
        let mut sctx = SchemaContext::new();
        let id = sctx.load_module(module_with_entities()).unwrap();

        let module = sctx.module(id);
        assert!(!module.implemented);
        assert!(module.compiled.is_none());
        assert_eq!(module.identities.len(), 1);
        assert_eq!(module.features.len(), 1);
        assert_eq!(module.extensions.len(), 1);

        let root = sctx.find_identity(id, "root").unwrap();
        assert!(!sctx.identities[root].resolved);
        let fast = sctx.find_feature(id, "fast").unwrap();
        assert_eq!(sctx.feature_enabled(id, "fast"), Some(false));
        assert_eq!(sctx.features[fast].module, id);
        assert!(sctx.find_extension(id, "tag").is_some());
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let mut sctx = SchemaContext::new();
        sctx.load_module(ParsedModule::new("a", "a")).unwrap();
        let err = sctx.load_module(ParsedModule::new("a", "x")).unwrap_err();
        assert!(err.message().contains("already loaded"));
    }

    #[test]
    fn test_duplicate_identity_rejected_and_module_not_registered() {
        let mut m = ParsedModule::new("dup", "d");
        for _ in 0..2 {
            m.identities.push(ParsedIdentity {
                name: "same".into(),
                ..Default::default()
            });
        }
        let mut sctx = SchemaContext::new();
        let err = sctx.load_module(m).unwrap_err();
        assert!(err.message().contains("Duplicate identifier \"same\""));
        assert!(sctx.find_module("dup").is_none());
    }

    #[test]
    fn test_failed_load_drops_entities() {
        let mut m = module_with_entities();
        m.name = "broken".into();
        m.extensions.push(m.extensions[0].clone());
        let mut sctx = SchemaContext::new();
        let err = sctx.load_module(m).unwrap_err();
        assert!(err.message().contains("Duplicate identifier \"tag\""));
        assert_eq!(sctx.identities.len(), 0);
        assert_eq!(sctx.features.len(), 0);
        assert_eq!(sctx.extensions.len(), 0);

        let id = sctx.load_module(module_with_entities()).unwrap();
        assert_eq!(sctx.identities.len(), 1);
        assert_eq!(sctx.features.len(), 1);
        assert_eq!(sctx.extensions.len(), 1);
        let root = sctx.find_identity(id, "root").unwrap();
        assert_eq!(sctx.identities[root].module, id);
    }

    #[test]
    fn test_resolve_prefix() {
        let mut sctx = SchemaContext::new();
        let base = sctx.load_module(ParsedModule::new("base", "b")).unwrap();
        let user = sctx
            .load_module(ParsedModule::new("user", "u").import("base", "bp").import("gone", "g"))
            .unwrap();

        assert_eq!(sctx.resolve_prefix(user, "u").unwrap(), user);
        assert_eq!(sctx.resolve_prefix(user, "bp").unwrap(), base);
        assert_eq!(sctx.resolve_opt_prefix(user, None).unwrap(), user);
        assert!(sctx
            .resolve_prefix(user, "g")
            .unwrap_err()
            .message()
            .contains("Import module \"gone\""));
        assert!(sctx
            .resolve_prefix(user, "zz")
            .unwrap_err()
            .message()
            .contains("Prefix \"zz\" not found"));
    }
}
