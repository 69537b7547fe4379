//! Compiled schema entities.
//!
//! Identities, features and extension definitions live in global arenas of
//! the [`SchemaContext`](crate::SchemaContext) so that any module can refer to
//! them by id. Compiled data trees live per module in a [`CompiledModule`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{ExtDefId, FeatureId, IdentId, ModuleId, NodeId};
use crate::index_vec::IndexVec;
use crate::interner::Name;
use crate::syntax::xpath::Expr;

/// `status` of a definition.
///
/// Ordered from most to least current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Current,
    Deprecated,
    Obsolete,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Current => "current",
            Status::Deprecated => "deprecated",
            Status::Obsolete => "obsolete",
        }
    }
}

/// Effective `config` of a data node. Nodes inside RPCs, actions and
/// notifications have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Config {
    ReadWrite,
    ReadOnly,
}

// ============================================================================
// Identities
// ============================================================================

/// An identity. Created as a skeleton when its module is loaded; bases are
/// filled in when the owning module compiles.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: Name,
    pub module: ModuleId,
    pub status: Status,
    pub bases: Vec<IdentId>,
    /// Identities naming this one as a base. Filled lazily by their own
    /// resolution.
    pub derived: Vec<IdentId>,
    /// Bases have been resolved.
    pub resolved: bool,
    pub exts: Vec<ExtInstance>,
}

impl Identity {
    pub fn skeleton(name: Name, module: ModuleId, status: Status) -> Self {
        Self {
            name,
            module,
            status,
            bases: Vec::new(),
            derived: Vec::new(),
            resolved: false,
            exts: Vec::new(),
        }
    }
}

// ============================================================================
// Features
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeatureState {
    /// Precompiled only, or reverted.
    #[default]
    Unevaluated,
    Disabled,
    Enabled,
}

/// Compiled if-feature expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfFeatureExpr {
    Feature(FeatureId),
    Not(Box<IfFeatureExpr>),
    And(Box<IfFeatureExpr>, Box<IfFeatureExpr>),
    Or(Box<IfFeatureExpr>, Box<IfFeatureExpr>),
}

impl IfFeatureExpr {
    /// Evaluate against the current feature states. Unevaluated features
    /// count as disabled.
    pub fn eval(&self, features: &IndexVec<FeatureId, Feature>) -> bool {
        match self {
            IfFeatureExpr::Feature(id) => features[*id].state == FeatureState::Enabled,
            IfFeatureExpr::Not(inner) => !inner.eval(features),
            IfFeatureExpr::And(lhs, rhs) => lhs.eval(features) && rhs.eval(features),
            IfFeatureExpr::Or(lhs, rhs) => lhs.eval(features) || rhs.eval(features),
        }
    }

    /// Every feature referenced by the expression.
    pub fn features(&self, out: &mut Vec<FeatureId>) {
        match self {
            IfFeatureExpr::Feature(id) => out.push(*id),
            IfFeatureExpr::Not(inner) => inner.features(out),
            IfFeatureExpr::And(lhs, rhs) | IfFeatureExpr::Or(lhs, rhs) => {
                lhs.features(out);
                rhs.features(out);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub name: Name,
    pub module: ModuleId,
    pub status: Status,
    pub if_features: Vec<IfFeatureExpr>,
    pub state: FeatureState,
    pub exts: Vec<ExtInstance>,
}

impl Feature {
    pub fn skeleton(name: Name, module: ModuleId, status: Status) -> Self {
        Self {
            name,
            module,
            status,
            if_features: Vec::new(),
            state: FeatureState::Unevaluated,
            exts: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == FeatureState::Enabled
    }
}

// ============================================================================
// Extensions
// ============================================================================

/// An `extension` definition.
#[derive(Debug, Clone)]
pub struct ExtensionDef {
    pub name: Name,
    pub module: ModuleId,
    /// Name of the argument, if the extension takes one.
    pub argument: Option<Name>,
    pub status: Status,
}

/// What an extension instance is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtParent {
    Module,
    Identity,
    Feature,
    Node,
    Type,
    Refine,
    ExtInstance,
}

impl ExtParent {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtParent::Module => "module",
            ExtParent::Identity => "identity",
            ExtParent::Feature => "feature",
            ExtParent::Node => "data node",
            ExtParent::Type => "type",
            ExtParent::Refine => "refine",
            ExtParent::ExtInstance => "extension instance",
        }
    }
}

/// A compiled use of an extension.
#[derive(Debug, Clone)]
pub struct ExtInstance {
    pub def: ExtDefId,
    /// Module the instance appears in.
    pub module: ModuleId,
    pub argument: Option<Name>,
    pub parent: ExtParent,
    pub data: ExtData,
    pub nested: Vec<ExtInstance>,
}

/// Data produced by an extension plugin.
#[derive(Debug, Clone, Default)]
pub enum ExtData {
    #[default]
    None,
    /// `md:annotation`.
    Annotation { ty: Box<Type>, units: Option<Name> },
    /// `nacm:default-deny-write` / `nacm:default-deny-all`.
    Nacm(NacmRule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NacmRule {
    DenyWrite,
    DenyAll,
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Binary,
    Bits,
    Boolean,
    Decimal64,
    Empty,
    Enumeration,
    Identityref,
    InstanceIdentifier,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Leafref,
    String,
    Union,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 19] = [
        BuiltinType::Binary,
        BuiltinType::Bits,
        BuiltinType::Boolean,
        BuiltinType::Decimal64,
        BuiltinType::Empty,
        BuiltinType::Enumeration,
        BuiltinType::Identityref,
        BuiltinType::InstanceIdentifier,
        BuiltinType::Int8,
        BuiltinType::Int16,
        BuiltinType::Int32,
        BuiltinType::Int64,
        BuiltinType::Uint8,
        BuiltinType::Uint16,
        BuiltinType::Uint32,
        BuiltinType::Uint64,
        BuiltinType::Leafref,
        BuiltinType::String,
        BuiltinType::Union,
    ];

    pub fn from_name(name: &str) -> Option<BuiltinType> {
        BuiltinType::ALL.into_iter().find(|b| b.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinType::Binary => "binary",
            BuiltinType::Bits => "bits",
            BuiltinType::Boolean => "boolean",
            BuiltinType::Decimal64 => "decimal64",
            BuiltinType::Empty => "empty",
            BuiltinType::Enumeration => "enumeration",
            BuiltinType::Identityref => "identityref",
            BuiltinType::InstanceIdentifier => "instance-identifier",
            BuiltinType::Int8 => "int8",
            BuiltinType::Int16 => "int16",
            BuiltinType::Int32 => "int32",
            BuiltinType::Int64 => "int64",
            BuiltinType::Uint8 => "uint8",
            BuiltinType::Uint16 => "uint16",
            BuiltinType::Uint32 => "uint32",
            BuiltinType::Uint64 => "uint64",
            BuiltinType::Leafref => "leafref",
            BuiltinType::String => "string",
            BuiltinType::Union => "union",
        }
    }

    /// Value bounds of integer types.
    pub fn int_bounds(self) -> Option<(i128, i128)> {
        Some(match self {
            BuiltinType::Int8 => (i8::MIN as i128, i8::MAX as i128),
            BuiltinType::Int16 => (i16::MIN as i128, i16::MAX as i128),
            BuiltinType::Int32 => (i32::MIN as i128, i32::MAX as i128),
            BuiltinType::Int64 => (i64::MIN as i128, i64::MAX as i128),
            BuiltinType::Uint8 => (0, u8::MAX as i128),
            BuiltinType::Uint16 => (0, u16::MAX as i128),
            BuiltinType::Uint32 => (0, u32::MAX as i128),
            BuiltinType::Uint64 => (0, u64::MAX as i128),
            _ => return None,
        })
    }
}

/// Union of closed intervals, sorted and disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet(pub Vec<(i128, i128)>);

impl RangeSet {
    pub fn full(min: i128, max: i128) -> Self {
        RangeSet(vec![(min, max)])
    }

    pub fn min(&self) -> Option<i128> {
        self.0.first().map(|(lo, _)| *lo)
    }

    pub fn max(&self) -> Option<i128> {
        self.0.last().map(|(_, hi)| *hi)
    }

    pub fn contains(&self, value: i128) -> bool {
        self.0.iter().any(|(lo, hi)| *lo <= value && value <= *hi)
    }

    /// Every interval of `self` lies inside an interval of `outer`.
    pub fn is_within(&self, outer: &RangeSet) -> bool {
        self.0
            .iter()
            .all(|(lo, hi)| outer.0.iter().any(|(olo, ohi)| olo <= lo && hi <= ohi))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumItem {
    pub name: Name,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitItem {
    pub name: Name,
    pub position: u32,
}

#[derive(Debug, Clone)]
pub struct Leafref {
    pub path: Arc<Expr>,
    /// Module the path's prefixes resolve against.
    pub pmod: ModuleId,
    pub require_instance: bool,
    /// Type of the target, once resolved.
    pub realtype: Option<Box<Type>>,
    /// Schema path of the target, once resolved.
    pub target: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    /// boolean, empty.
    Plain,
    Number {
        range: RangeSet,
        /// decimal64 only; range bounds are scaled by 10^fraction_digits.
        fraction_digits: Option<u8>,
    },
    /// string, binary.
    String { length: RangeSet },
    Enumeration(Vec<EnumItem>),
    Bits(Vec<BitItem>),
    Identityref { bases: Vec<IdentId> },
    Leafref(Leafref),
    InstanceIdentifier { require_instance: bool },
    Union(Vec<Type>),
}

#[derive(Debug, Clone)]
pub struct Type {
    pub base: BuiltinType,
    /// Nearest typedef this type was derived through.
    pub typedef: Option<Name>,
    pub kind: TypeKind,
    pub exts: Vec<ExtInstance>,
}

impl Type {
    pub fn leafref(&self) -> Option<&Leafref> {
        match &self.kind {
            TypeKind::Leafref(lref) => Some(lref),
            _ => None,
        }
    }

    /// Leafrefs are replaced by their resolved target type.
    pub fn real(&self) -> &Type {
        match &self.kind {
            TypeKind::Leafref(Leafref {
                realtype: Some(real),
                ..
            }) => real.real(),
            _ => self,
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// A canonical default value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Empty,
    Int(i128),
    /// Scaled by 10^fraction_digits.
    Decimal { value: i128, fraction_digits: u8 },
    String(Name),
    Enum(Name),
    Bits(Vec<Name>),
    Identity(IdentId),
    InstanceId(Name),
}

// ============================================================================
// Data tree
// ============================================================================

/// A `when` or `must` expression.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub expr: Arc<Expr>,
    /// Module the expression's prefixes resolve against.
    pub pmod: ModuleId,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Container {
        presence: Option<Name>,
    },
    Leaf {
        ty: Type,
        units: Option<Name>,
        default: Option<Value>,
        mandatory: bool,
    },
    LeafList {
        ty: Type,
        units: Option<Name>,
        defaults: Vec<Value>,
        min_elements: u32,
        max_elements: Option<u32>,
    },
    List {
        keys: Vec<NodeId>,
        min_elements: u32,
        max_elements: Option<u32>,
    },
    Choice {
        default: Option<NodeId>,
        mandatory: bool,
    },
    Case,
    Anydata {
        mandatory: bool,
    },
    Anyxml {
        mandatory: bool,
    },
    Rpc,
    Action,
    Input,
    Output,
    Notification,
}

impl NodeKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            NodeKind::Container { .. } => "container",
            NodeKind::Leaf { .. } => "leaf",
            NodeKind::LeafList { .. } => "leaf-list",
            NodeKind::List { .. } => "list",
            NodeKind::Choice { .. } => "choice",
            NodeKind::Case => "case",
            NodeKind::Anydata { .. } => "anydata",
            NodeKind::Anyxml { .. } => "anyxml",
            NodeKind::Rpc => "rpc",
            NodeKind::Action => "action",
            NodeKind::Input => "input",
            NodeKind::Output => "output",
            NodeKind::Notification => "notification",
        }
    }

    /// Choice and case do not appear in data paths.
    pub fn is_schema_only(&self) -> bool {
        matches!(self, NodeKind::Choice { .. } | NodeKind::Case)
    }

    pub fn is_operation(&self) -> bool {
        matches!(
            self,
            NodeKind::Rpc | NodeKind::Action | NodeKind::Notification
        )
    }

    pub fn ty(&self) -> Option<&Type> {
        match self {
            NodeKind::Leaf { ty, .. } | NodeKind::LeafList { ty, .. } => Some(ty),
            _ => None,
        }
    }

    pub fn ty_mut(&mut self) -> Option<&mut Type> {
        match self {
            NodeKind::Leaf { ty, .. } | NodeKind::LeafList { ty, .. } => Some(ty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub name: Name,
    /// Namespace of the node. Differs from the tree owner for augment
    /// content.
    pub module: ModuleId,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub config: Option<Config>,
    /// `config` was set by a statement rather than inherited.
    pub config_explicit: bool,
    pub status: Status,
    pub when: Vec<Constraint>,
    pub musts: Vec<Constraint>,
    pub exts: Vec<ExtInstance>,
    /// Removed by a `not-supported` deviation.
    pub disabled: bool,
}

/// The published compiled form of a module.
#[derive(Debug, Clone, Default)]
pub struct CompiledModule {
    pub nodes: IndexVec<NodeId, SchemaNode>,
    pub data: Vec<NodeId>,
    pub rpcs: Vec<NodeId>,
    pub notifications: Vec<NodeId>,
    pub exts: Vec<ExtInstance>,
}

impl CompiledModule {
    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id]
    }

    /// Top-level siblings of every kind.
    pub fn top_level(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.data
            .iter()
            .chain(self.rpcs.iter())
            .chain(self.notifications.iter())
            .copied()
    }

    /// Siblings of `parent` (or of the top level).
    pub fn siblings(&self, parent: Option<NodeId>) -> Vec<NodeId> {
        match parent {
            Some(parent) => self.nodes[parent].children.clone(),
            None => self.top_level().collect(),
        }
    }

    /// Remove `id` from its parent's (or the top-level) child list.
    pub fn unlink(&mut self, id: NodeId) {
        match self.nodes[id].parent {
            Some(parent) => self.nodes[parent].children.retain(|c| *c != id),
            None => {
                self.data.retain(|c| *c != id);
                self.rpcs.retain(|c| *c != id);
                self.notifications.retain(|c| *c != id);
            }
        }
    }

    /// Mark `id` and its whole subtree disabled.
    pub fn disable(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = &mut self.nodes[next];
            node.disabled = true;
            stack.extend(node.children.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order() {
        assert!(Status::Current < Status::Deprecated);
        assert!(Status::Deprecated < Status::Obsolete);
        assert_eq!(Status::default(), Status::Current);
    }

    #[test]
    fn test_range_set_within() {
        let base = RangeSet(vec![(0, 10), (20, 30)]);
        assert!(RangeSet(vec![(1, 5), (21, 30)]).is_within(&base));
        assert!(!RangeSet(vec![(5, 25)]).is_within(&base));
        assert!(base.contains(25));
        assert!(!base.contains(15));
        assert_eq!(base.min(), Some(0));
        assert_eq!(base.max(), Some(30));
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(BuiltinType::from_name("uint8"), Some(BuiltinType::Uint8));
        assert_eq!(
            BuiltinType::from_name("instance-identifier"),
            Some(BuiltinType::InstanceIdentifier)
        );
        assert_eq!(BuiltinType::from_name("uint128"), None);
        assert_eq!(BuiltinType::Uint8.int_bounds(), Some((0, 255)));
        assert_eq!(BuiltinType::String.int_bounds(), None);
    }

    #[test]
    fn test_if_feature_eval() {
        let mut features = IndexVec::new();
        let a = features.push(Feature::skeleton(Name(0), ModuleId(0), Status::Current));
        let b = features.push(Feature::skeleton(Name(1), ModuleId(0), Status::Current));
        features[a].state = FeatureState::Enabled;
        features[b].state = FeatureState::Disabled;

        let expr = IfFeatureExpr::Or(
            Box::new(IfFeatureExpr::Feature(b)),
            Box::new(IfFeatureExpr::Not(Box::new(IfFeatureExpr::Feature(b)))),
        );
        assert!(expr.eval(&features));

        let expr = IfFeatureExpr::And(
            Box::new(IfFeatureExpr::Feature(a)),
            Box::new(IfFeatureExpr::Feature(b)),
        );
        assert!(!expr.eval(&features));

        let mut refs = Vec::new();
        expr.features(&mut refs);
        assert_eq!(refs, vec![a, b]);
    }
}
