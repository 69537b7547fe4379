//! Expression syntax: if-feature expressions and XPath token streams.

pub mod iffeature;
pub mod xpath;

pub use iffeature::{parse_if_feature, IfFeatureAst};
pub use xpath::{Expr, Token};

/// Syntax error in an expression argument.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    #[error("Invalid {kind} expression \"{text}\": {message} at column {column}.")]
    Invalid {
        kind: &'static str,
        text: String,
        message: String,
        column: usize,
    },
}

impl SyntaxError {
    fn from_pest<R: pest::RuleType>(
        kind: &'static str,
        text: &str,
        err: pest::error::Error<R>,
    ) -> Self {
        let column = match err.line_col {
            pest::error::LineColLocation::Pos((_, c)) => c,
            pest::error::LineColLocation::Span((_, c), _) => c,
        };
        SyntaxError::Invalid {
            kind,
            text: text.to_string(),
            message: err.variant.message().to_string(),
            column,
        }
    }
}

/// Split `prefix:name` into its parts.
pub fn split_prefix(qname: &str) -> (Option<&str>, &str) {
    match qname.split_once(':') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, qname),
    }
}
