//! Schema compiler core
//!
//! Links parsed YANG modules into validated, self-contained compiled
//! schema trees:
//! - Registry of modules with precompiled identities, features and
//!   extension definitions
//! - Append-only arenas addressed by typed ids
//! - Two-phase compile: structural walk, then a finishing pass over
//!   deferred work (augments, deviations, leafrefs, defaults, ...)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          SchemaContext                           │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐  │
//! │  │ Dictionary │  │  Modules   │  │ Identities │  │  Features  │  │
//! │  │ (strings)  │  │ (ModuleId) │  │ (IdentId)  │  │(FeatureId) │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//!         ↑                 ↑
//!    ┌────┴─────┐    ┌──────┴─────┐    ┌───────────┐    ┌──────────┐
//!    │  Parsed  │ →  │ Structural │ →  │ Finishing │ →  │ Compiled │
//!    │  module  │    │    walk    │    │   pass    │    │   tree   │
//!    └──────────┘    └────────────┘    └───────────┘    └──────────┘
//! ```

// Core modules
pub mod context;
pub mod error;
pub mod ids;
pub mod index_vec;
pub mod interner;
pub mod options;
pub mod parsed;
pub mod schema;
pub mod syntax;

// Compiler
pub mod compile;

// Re-exports
pub use compile::compile;
pub use compile::extension::{ExtensionPlugin, ExtensionPlugins};
pub use context::{Module, SchemaContext};
pub use error::{CompileError, CompileResult, ErrorKind};
pub use ids::{ExtDefId, FeatureId, IdentId, ModuleId, NodeId};
pub use index_vec::{Idx, IndexVec};
pub use interner::{ArcStr, Dictionary, Name};
pub use options::{CompileFlags, ContextOptions, FeatureSelection};
pub use parsed::ParsedModule;
pub use schema::{
    CompiledModule, Config, Feature, FeatureState, Identity, NodeKind, SchemaNode, Status, Type, TypeKind, Value,
};
pub use syntax::{Expr, SyntaxError};
