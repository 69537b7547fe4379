//! if-feature expression parser.

use std::sync::LazyLock;

use pest::iterators::Pairs;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use super::{split_prefix, SyntaxError};

#[derive(Parser)]
#[grammar = "syntax/if_feature.pest"]
struct IfFeatureParser;

/// `not` binds tighter than `and`, which binds tighter than `or`.
static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
});

/// Parsed if-feature expression with unresolved feature names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfFeatureAst {
    Feature {
        prefix: Option<String>,
        name: String,
    },
    Not(Box<IfFeatureAst>),
    And(Box<IfFeatureAst>, Box<IfFeatureAst>),
    Or(Box<IfFeatureAst>, Box<IfFeatureAst>),
}

impl IfFeatureAst {
    /// Every feature reference in source order.
    pub fn refs(&self) -> Vec<(Option<&str>, &str)> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<(Option<&'a str>, &'a str)>) {
        match self {
            IfFeatureAst::Feature { prefix, name } => out.push((prefix.as_deref(), name)),
            IfFeatureAst::Not(inner) => inner.collect_refs(out),
            IfFeatureAst::And(lhs, rhs) | IfFeatureAst::Or(lhs, rhs) => {
                lhs.collect_refs(out);
                rhs.collect_refs(out);
            }
        }
    }
}

/// Parse the argument of an `if-feature` statement.
pub fn parse_if_feature(text: &str) -> Result<IfFeatureAst, SyntaxError> {
    let mut pairs = IfFeatureParser::parse(Rule::if_feature, text)
        .map_err(|err| SyntaxError::from_pest("if-feature", text, err))?;

    match pairs.next() {
        Some(expr) if expr.as_rule() == Rule::expr => Ok(parse_expr(expr.into_inner())),
        _ => Err(SyntaxError::Invalid {
            kind: "if-feature",
            text: text.to_string(),
            message: "empty expression".to_string(),
            column: 1,
        }),
    }
}

fn parse_expr(pairs: Pairs<Rule>) -> IfFeatureAst {
    PRATT_PARSER
        .map_primary(|primary| match primary.as_rule() {
            Rule::feature_ref => {
                let (prefix, name) = split_prefix(primary.as_str());
                IfFeatureAst::Feature {
                    prefix: prefix.map(str::to_string),
                    name: name.to_string(),
                }
            }
            // parenthesized
            _ => parse_expr(primary.into_inner()),
        })
        .map_prefix(|_not, rhs| IfFeatureAst::Not(Box::new(rhs)))
        .map_infix(|lhs, op, rhs| match op.as_rule() {
            Rule::and_op => IfFeatureAst::And(Box::new(lhs), Box::new(rhs)),
            _ => IfFeatureAst::Or(Box::new(lhs), Box::new(rhs)),
        })
        .parse(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature(name: &str) -> IfFeatureAst {
        IfFeatureAst::Feature {
            prefix: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_single_prefixed_feature() {
        let ast = parse_if_feature("if:jumbo").unwrap();
        assert_eq!(
            ast,
            IfFeatureAst::Feature {
                prefix: Some("if".to_string()),
                name: "jumbo".to_string()
            }
        );
    }

    #[test]
    fn test_precedence() {
        let ast = parse_if_feature("a or not b and c").unwrap();
        assert_eq!(
            ast,
            IfFeatureAst::Or(
                Box::new(feature("a")),
                Box::new(IfFeatureAst::And(
                    Box::new(IfFeatureAst::Not(Box::new(feature("b")))),
                    Box::new(feature("c")),
                )),
            )
        );
    }

    #[test]
    fn test_parentheses() {
        let ast = parse_if_feature("not (a or b)").unwrap();
        assert_eq!(
            ast,
            IfFeatureAst::Not(Box::new(IfFeatureAst::Or(
                Box::new(feature("a")),
                Box::new(feature("b")),
            )))
        );
        assert_eq!(ast.refs(), vec![(None, "a"), (None, "b")]);
    }

    #[test]
    fn test_keyword_prefixed_names() {
        assert_eq!(parse_if_feature("notify").unwrap(), feature("notify"));
        assert_eq!(parse_if_feature("order").unwrap(), feature("order"));
    }

    #[test]
    fn test_errors() {
        assert!(parse_if_feature("").is_err());
        assert!(parse_if_feature("a and").is_err());
        assert!(parse_if_feature("(a").is_err());
        assert!(parse_if_feature("a b").is_err());
    }
}
