//! Parsed (purely syntactic) module representation.
//!
//! This is the input of the compiler. It is produced by a YANG parser that
//! is not part of this crate, so every type here derives serde traits and
//! can be loaded from JSON. Names are kept as raw, possibly prefixed,
//! strings; nothing is resolved.

use serde::{Deserialize, Serialize};

use crate::schema::Status;

/// A whole parsed module.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedModule {
    pub name: String,
    pub prefix: String,
    pub revision: Option<String>,
    pub imports: Vec<ParsedImport>,
    pub extensions: Vec<ParsedExtensionDef>,
    pub features: Vec<ParsedFeature>,
    pub identities: Vec<ParsedIdentity>,
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub data: Vec<ParsedNode>,
    pub augments: Vec<ParsedAugment>,
    pub deviations: Vec<ParsedDeviation>,
    pub exts: Vec<ParsedExtInstance>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedImport {
    pub module: String,
    pub prefix: String,
    pub revision: Option<String>,
}

/// `extension` statement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedExtensionDef {
    pub name: String,
    pub argument: Option<String>,
    pub status: Option<Status>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedFeature {
    pub name: String,
    pub if_features: Vec<String>,
    pub status: Option<Status>,
    pub exts: Vec<ParsedExtInstance>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedIdentity {
    pub name: String,
    pub bases: Vec<String>,
    pub status: Option<Status>,
    pub exts: Vec<ParsedExtInstance>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedTypedef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParsedType,
    pub units: Option<String>,
    pub default: Option<String>,
    pub status: Option<Status>,
}

/// A `type` statement with its restrictions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedType {
    pub name: String,
    pub range: Option<String>,
    pub length: Option<String>,
    pub enums: Vec<ParsedEnum>,
    pub bits: Vec<ParsedBit>,
    pub fraction_digits: Option<u8>,
    pub bases: Vec<String>,
    pub path: Option<String>,
    pub require_instance: Option<bool>,
    pub types: Vec<ParsedType>,
    pub exts: Vec<ParsedExtInstance>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedEnum {
    pub name: String,
    pub value: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedBit {
    pub name: String,
    pub position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedGrouping {
    pub name: String,
    pub status: Option<Status>,
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub children: Vec<ParsedNode>,
}

/// A data definition, operation or `uses` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParsedNode {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: ParsedNodeKind,
    #[serde(default)]
    pub config: Option<bool>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub if_features: Vec<String>,
    #[serde(default)]
    pub musts: Vec<String>,
    #[serde(default)]
    pub exts: Vec<ParsedExtInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "keyword", rename_all = "kebab-case")]
pub enum ParsedNodeKind {
    Container(ParsedContainer),
    Leaf(ParsedLeaf),
    LeafList(ParsedLeafList),
    List(ParsedList),
    Choice(ParsedChoice),
    Case(ParsedCase),
    Anydata(ParsedAny),
    Anyxml(ParsedAny),
    Uses(ParsedUses),
    Rpc(ParsedOperation),
    Action(ParsedOperation),
    Notification(ParsedNotification),
}

impl ParsedNodeKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            ParsedNodeKind::Container(_) => "container",
            ParsedNodeKind::Leaf(_) => "leaf",
            ParsedNodeKind::LeafList(_) => "leaf-list",
            ParsedNodeKind::List(_) => "list",
            ParsedNodeKind::Choice(_) => "choice",
            ParsedNodeKind::Case(_) => "case",
            ParsedNodeKind::Anydata(_) => "anydata",
            ParsedNodeKind::Anyxml(_) => "anyxml",
            ParsedNodeKind::Uses(_) => "uses",
            ParsedNodeKind::Rpc(_) => "rpc",
            ParsedNodeKind::Action(_) => "action",
            ParsedNodeKind::Notification(_) => "notification",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedContainer {
    pub presence: Option<String>,
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub children: Vec<ParsedNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedLeaf {
    #[serde(rename = "type")]
    pub ty: ParsedType,
    pub units: Option<String>,
    pub default: Option<String>,
    pub mandatory: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedLeafList {
    #[serde(rename = "type")]
    pub ty: ParsedType,
    pub units: Option<String>,
    pub defaults: Vec<String>,
    pub min_elements: Option<u32>,
    pub max_elements: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedList {
    pub keys: Vec<String>,
    pub min_elements: Option<u32>,
    pub max_elements: Option<u32>,
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub children: Vec<ParsedNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedChoice {
    pub default: Option<String>,
    pub mandatory: Option<bool>,
    pub children: Vec<ParsedNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedCase {
    pub children: Vec<ParsedNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedAny {
    pub mandatory: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedUses {
    pub grouping: String,
    pub refines: Vec<ParsedRefine>,
    pub augments: Vec<ParsedAugment>,
}

/// `rpc` or `action`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedOperation {
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub input: Option<ParsedOperationIo>,
    pub output: Option<ParsedOperationIo>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedOperationIo {
    pub musts: Vec<String>,
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub children: Vec<ParsedNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedNotification {
    pub typedefs: Vec<ParsedTypedef>,
    pub groupings: Vec<ParsedGrouping>,
    pub children: Vec<ParsedNode>,
}

/// `refine` inside `uses`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedRefine {
    pub target: String,
    pub defaults: Vec<String>,
    pub mandatory: Option<bool>,
    pub config: Option<bool>,
    pub presence: Option<String>,
    pub min_elements: Option<u32>,
    pub max_elements: Option<u32>,
    pub musts: Vec<String>,
    pub if_features: Vec<String>,
    pub exts: Vec<ParsedExtInstance>,
}

/// Top-level `augment`, or `augment` inside `uses`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedAugment {
    pub target: String,
    pub when: Option<String>,
    pub if_features: Vec<String>,
    pub status: Option<Status>,
    pub children: Vec<ParsedNode>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedDeviation {
    pub target: String,
    pub deviates: Vec<ParsedDeviate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ParsedDeviate {
    NotSupported,
    Add(ParsedDeviateProps),
    Replace(ParsedDeviateProps),
    Delete(ParsedDeviateProps),
}

impl ParsedDeviate {
    pub fn keyword(&self) -> &'static str {
        match self {
            ParsedDeviate::NotSupported => "not-supported",
            ParsedDeviate::Add(_) => "add",
            ParsedDeviate::Replace(_) => "replace",
            ParsedDeviate::Delete(_) => "delete",
        }
    }
}

/// Properties carried by a `deviate add/replace/delete`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ParsedDeviateProps {
    pub units: Option<String>,
    pub defaults: Vec<String>,
    pub musts: Vec<String>,
    pub config: Option<bool>,
    pub mandatory: Option<bool>,
    pub min_elements: Option<u32>,
    pub max_elements: Option<u32>,
    #[serde(rename = "type")]
    pub ty: Option<ParsedType>,
}

/// A use of an extension (`prefix:name argument { ... }`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedExtInstance {
    pub name: String,
    pub argument: Option<String>,
    pub substmts: Vec<ParsedStmt>,
}

/// A generic statement nested inside an extension instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsedStmt {
    pub keyword: String,
    pub argument: Option<String>,
    pub substmts: Vec<ParsedStmt>,
}

impl ParsedStmt {
    pub fn new(keyword: impl Into<String>, argument: Option<&str>) -> Self {
        Self {
            keyword: keyword.into(),
            argument: argument.map(str::to_string),
            substmts: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ParsedStmt) -> Self {
        self.substmts.push(child);
        self
    }

    /// Reinterpret a generic `type` statement (as found inside extension
    /// instances) as a [`ParsedType`].
    pub fn to_type(&self) -> Result<ParsedType, String> {
        let mut ty = ParsedType {
            name: self.argument.clone().unwrap_or_default(),
            ..ParsedType::default()
        };
        for sub in &self.substmts {
            let arg = || {
                sub.argument
                    .clone()
                    .ok_or_else(|| format!("missing argument of \"{}\"", sub.keyword))
            };
            match sub.keyword.as_str() {
                "range" => ty.range = Some(arg()?),
                "length" => ty.length = Some(arg()?),
                "path" => ty.path = Some(arg()?),
                "base" => ty.bases.push(arg()?),
                "fraction-digits" => {
                    ty.fraction_digits = Some(
                        arg()?
                            .parse()
                            .map_err(|_| "invalid fraction-digits value".to_string())?,
                    )
                }
                "require-instance" => ty.require_instance = Some(arg()? == "true"),
                "enum" => {
                    let mut item = ParsedEnum {
                        name: arg()?,
                        value: None,
                    };
                    for v in sub.substmts.iter().filter(|s| s.keyword == "value") {
                        let text = v.argument.as_deref().unwrap_or_default();
                        item.value = Some(
                            text.parse()
                                .map_err(|_| format!("invalid enum value \"{text}\""))?,
                        );
                    }
                    ty.enums.push(item);
                }
                "bit" => {
                    let mut item = ParsedBit {
                        name: arg()?,
                        position: None,
                    };
                    for p in sub.substmts.iter().filter(|s| s.keyword == "position") {
                        let text = p.argument.as_deref().unwrap_or_default();
                        item.position = Some(
                            text.parse()
                                .map_err(|_| format!("invalid bit position \"{text}\""))?,
                        );
                    }
                    ty.bits.push(item);
                }
                "type" => ty.types.push(sub.to_type()?),
                other => return Err(format!("unexpected \"{other}\" in a type statement")),
            }
        }
        Ok(ty)
    }
}

// ============================================================================
// Construction helpers
// ============================================================================

impl ParsedModule {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn import(mut self, module: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.imports.push(ParsedImport {
            module: module.into(),
            prefix: prefix.into(),
            revision: None,
        });
        self
    }
}

impl ParsedType {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl ParsedNode {
    pub fn new(name: impl Into<String>, kind: ParsedNodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            config: None,
            status: None,
            when: None,
            if_features: Vec::new(),
            musts: Vec::new(),
            exts: Vec::new(),
        }
    }

    pub fn container(name: impl Into<String>, children: Vec<ParsedNode>) -> Self {
        Self::new(
            name,
            ParsedNodeKind::Container(ParsedContainer {
                children,
                ..ParsedContainer::default()
            }),
        )
    }

    pub fn leaf(name: impl Into<String>, ty: ParsedType) -> Self {
        Self::new(
            name,
            ParsedNodeKind::Leaf(ParsedLeaf {
                ty,
                ..ParsedLeaf::default()
            }),
        )
    }

    pub fn uses(grouping: impl Into<String>) -> Self {
        Self::new(
            "",
            ParsedNodeKind::Uses(ParsedUses {
                grouping: grouping.into(),
                ..ParsedUses::default()
            }),
        )
    }

    /// The children of statements that have plain data children.
    pub fn children(&self) -> &[ParsedNode] {
        match &self.kind {
            ParsedNodeKind::Container(c) => &c.children,
            ParsedNodeKind::List(l) => &l.children,
            ParsedNodeKind::Choice(c) => &c.children,
            ParsedNodeKind::Case(c) => &c.children,
            ParsedNodeKind::Notification(n) => &n.children,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_from_json() {
        let node: ParsedNode = serde_json::from_str(
            r#"{
                "keyword": "leaf",
                "name": "mtu",
                "type": { "name": "uint16", "range": "68..max" },
                "default": "1500",
                "if-features": ["jumbo"]
            }"#,
        )
        .unwrap();

        assert_eq!(node.name, "mtu");
        assert_eq!(node.if_features, vec!["jumbo".to_string()]);
        match &node.kind {
            ParsedNodeKind::Leaf(leaf) => {
                assert_eq!(leaf.ty.name, "uint16");
                assert_eq!(leaf.ty.range.as_deref(), Some("68..max"));
                assert_eq!(leaf.default.as_deref(), Some("1500"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_module_from_json() {
        let module: ParsedModule = serde_json::from_str(
            r#"{
                "name": "derived",
                "prefix": "d",
                "imports": [{ "module": "base", "prefix": "b" }],
                "identities": [{ "name": "child", "bases": ["b:root"] }],
                "deviations": [{ "target": "/b:top", "deviates": [{ "kind": "not-supported" }] }]
            }"#,
        )
        .unwrap();

        assert_eq!(module.imports[0].prefix, "b");
        assert_eq!(module.identities[0].bases, vec!["b:root".to_string()]);
        assert_eq!(module.deviations[0].deviates, vec![ParsedDeviate::NotSupported]);
    }

    #[test]
    fn test_stmt_to_type() {
        let stmt = ParsedStmt::new("type", Some("enumeration"))
            .with_child(ParsedStmt::new("enum", Some("up")))
            .with_child(
                ParsedStmt::new("enum", Some("down"))
                    .with_child(ParsedStmt::new("value", Some("7"))),
            );

        let ty = stmt.to_type().unwrap();
        assert_eq!(ty.name, "enumeration");
        assert_eq!(ty.enums.len(), 2);
        assert_eq!(ty.enums[1].value, Some(7));

        let bad = ParsedStmt::new("type", Some("string")).with_child(ParsedStmt::new("units", Some("s")));
        assert!(bad.to_type().is_err());
    }
}
