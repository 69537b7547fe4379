//! Per-compile state.

use std::rc::Rc;

use crate::context::SchemaContext;
use crate::error::CompileError;
use crate::ids::{ModuleId, NodeId};
use crate::options::CompileFlags;
use crate::parsed::{ParsedAugment, ParsedDeviation, ParsedGrouping, ParsedRefine, ParsedTypedef};
use crate::schema::{CompiledModule, Constraint, Status};

/// Capacity of the diagnostic path buffer.
pub const LOG_PATH_MAX: usize = 4078;

/// Schema path of the statement being compiled, for diagnostics only.
#[derive(Debug, Default, Clone)]
pub struct LogPath {
    buf: String,
    marks: Vec<usize>,
}

impl LogPath {
    pub fn push(&mut self, segment: &str) {
        self.marks.push(self.buf.len());
        self.buf.push_str(segment);
    }

    pub fn pop(&mut self) {
        if let Some(mark) = self.marks.pop() {
            self.buf.truncate(mark);
        }
    }

    /// Temporarily replace the whole path, returning the old one.
    pub fn replace(&mut self, path: String) -> LogPath {
        std::mem::replace(
            self,
            LogPath {
                buf: path,
                marks: Vec::new(),
            },
        )
    }

    /// The path, truncated to [`LOG_PATH_MAX`] bytes with a trailing `...`.
    pub fn render(&self) -> String {
        if self.buf.len() <= LOG_PATH_MAX {
            return self.buf.clone();
        }
        let mut end = LOG_PATH_MAX - 3;
        while !self.buf.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &self.buf[..end])
    }
}

/// Lexical scope of scoped typedefs and groupings (containers, lists,
/// groupings, operations).
#[derive(Debug)]
pub struct ScopeFrame {
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub parent: Option<Rc<ScopeFrame>>,
}

pub type Scope = Option<Rc<ScopeFrame>>;

/// Values inherited by nodes from the statement that places them.
#[derive(Debug, Clone, Default)]
pub struct Inherit {
    pub status: Status,
    /// Conditions of an enclosing `uses` or `augment`.
    pub when: Vec<Constraint>,
}

#[derive(Debug, Clone)]
pub struct DeferredDefault {
    pub node: NodeId,
    pub values: Vec<String>,
    /// Module the values' prefixes resolve against.
    pub pmod: ModuleId,
    /// Written on the node itself rather than inherited from a typedef.
    pub explicit: bool,
}

#[derive(Debug)]
pub struct PendingAugment {
    /// Module the augment statement belongs to.
    pub source: ModuleId,
    pub aug: ParsedAugment,
}

#[derive(Debug)]
pub struct PendingDeviation {
    pub source: ModuleId,
    pub dev: ParsedDeviation,
}

/// Where a `uses` was instantiated, for its deferred refines and augments.
#[derive(Debug, Clone)]
pub struct UsesSite {
    pub parent: Option<NodeId>,
    /// Top-level nodes the grouping produced.
    pub roots: Vec<NodeId>,
    pub pmod: ModuleId,
    pub ns: ModuleId,
    pub scope: Scope,
    pub status: Status,
    pub flags: CompileFlags,
    pub path: String,
}

#[derive(Debug)]
pub struct PendingUsesAugment {
    pub site: UsesSite,
    pub aug: ParsedAugment,
}

#[derive(Debug)]
pub struct PendingRefine {
    pub site: UsesSite,
    pub refine: ParsedRefine,
}

/// Environment saved by [`CompileCtx::switch_env`].
#[derive(Debug)]
pub struct SavedEnv {
    pmod: ModuleId,
    ns: ModuleId,
    scope: Scope,
    flags: CompileFlags,
    path: LogPath,
}

/// State threaded through one compile of one module.
///
/// Dependencies compiled on the way get their own context.
pub struct CompileCtx<'a> {
    pub sctx: &'a mut SchemaContext,
    /// Module whose tree is being built.
    pub module: ModuleId,
    /// Module names and prefixes are resolved against.
    pub pmod: ModuleId,
    /// Namespace of nodes being created.
    pub ns: ModuleId,
    pub flags: CompileFlags,
    pub path: LogPath,
    pub tree: CompiledModule,
    pub scope: Scope,

    /// Groupings being instantiated, innermost last.
    pub groupings: Vec<(ModuleId, String)>,
    /// Typedefs being expanded, innermost last.
    pub tpdf_chain: Vec<(ModuleId, String)>,
    /// Nodes with when/must expressions.
    pub xpath: Vec<NodeId>,
    /// Nodes whose type contains a leafref.
    pub leafrefs: Vec<NodeId>,
    pub dflts: Vec<DeferredDefault>,
    pub augs: Vec<PendingAugment>,
    pub devs: Vec<PendingDeviation>,
    pub uses_augs: Vec<PendingUsesAugment>,
    pub uses_rfns: Vec<PendingRefine>,

    /// Other modules this module augments or deviates.
    pub foreign: Vec<ModuleId>,
}

impl<'a> CompileCtx<'a> {
    pub fn new(sctx: &'a mut SchemaContext, module: ModuleId, flags: CompileFlags) -> Self {
        Self {
            sctx,
            module,
            pmod: module,
            ns: module,
            flags,
            path: LogPath::default(),
            tree: CompiledModule::default(),
            scope: None,
            groupings: Vec::new(),
            tpdf_chain: Vec::new(),
            xpath: Vec::new(),
            leafrefs: Vec::new(),
            dflts: Vec::new(),
            augs: Vec::new(),
            devs: Vec::new(),
            uses_augs: Vec::new(),
            uses_rfns: Vec::new(),
            foreign: Vec::new(),
        }
    }

    /// An `Invalid` error located at the current path.
    pub fn invalid(&self, message: impl Into<String>) -> CompileError {
        CompileError::invalid(message).at(&self.path.render())
    }

    /// Attach the current path to an error that carries none yet.
    pub fn locate(&self, err: CompileError) -> CompileError {
        err.at(&self.path.render())
    }

    /// Name of a module, for diagnostics.
    pub fn module_name(&self, module: ModuleId) -> String {
        self.sctx.module_name(module).to_string()
    }

    /// Switch to compiling statements written in `pmod` that create nodes in
    /// `ns`, at diagnostic path `path`.
    pub fn switch_env(
        &mut self,
        pmod: ModuleId,
        ns: ModuleId,
        scope: Scope,
        flags: CompileFlags,
        path: String,
    ) -> SavedEnv {
        SavedEnv {
            pmod: std::mem::replace(&mut self.pmod, pmod),
            ns: std::mem::replace(&mut self.ns, ns),
            scope: std::mem::replace(&mut self.scope, scope),
            flags: std::mem::replace(&mut self.flags, flags),
            path: self.path.replace(path),
        }
    }

    pub fn restore_env(&mut self, saved: SavedEnv) {
        self.pmod = saved.pmod;
        self.ns = saved.ns;
        self.scope = saved.scope;
        self.flags = saved.flags;
        self.path = saved.path;
    }

    pub fn in_grouping(&self) -> bool {
        self.flags.contains(CompileFlags::GROUPING)
    }

    pub fn deferred_is_empty(&self) -> bool {
        self.xpath.is_empty()
            && self.leafrefs.is_empty()
            && self.dflts.is_empty()
            && self.augs.is_empty()
            && self.devs.is_empty()
            && self.uses_augs.is_empty()
            && self.uses_rfns.is_empty()
            && self.groupings.is_empty()
            && self.tpdf_chain.is_empty()
    }
}
