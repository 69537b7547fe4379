//! XPath tokenizer.
//!
//! Expressions of `when`, `must` and leafref `path` statements are only
//! tokenized here. Evaluation belongs to the data validation layer; the
//! compiler needs the token stream to find the prefixes an expression uses
//! and to walk simple location paths.

use pest::Parser;
use pest_derive::Parser;

use super::{split_prefix, SyntaxError};

#[derive(Parser)]
#[grammar = "syntax/xpath.pest"]
struct XPathParser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Slash,
    DoubleSlash,
    Dot,
    DotDot,
    At,
    Comma,
    Union,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Operator(String),
    Literal(String),
    Number(String),
    /// `child::`, without the colons.
    Axis(String),
    Function(String),
    NameTest {
        prefix: Option<String>,
        name: String,
    },
}

impl Token {
    /// Tokens after which `*` and the `and`/`or`/`div`/`mod` names are
    /// operators rather than name tests.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::NameTest { .. }
                | Token::Literal(_)
                | Token::Number(_)
                | Token::RParen
                | Token::RBracket
                | Token::Dot
                | Token::DotDot
        )
    }
}

/// A tokenized expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub text: String,
    pub tokens: Vec<Token>,
}

impl Expr {
    pub fn parse(text: &str) -> Result<Expr, SyntaxError> {
        let pairs = XPathParser::parse(Rule::xpath, text)
            .map_err(|err| SyntaxError::from_pest("XPath", text, err))?;

        let mut tokens: Vec<Token> = Vec::new();
        for pair in pairs {
            let s = pair.as_str();
            let token = match pair.as_rule() {
                Rule::EOI => continue,
                Rule::double_slash => Token::DoubleSlash,
                Rule::slash => Token::Slash,
                Rule::dot_dot => Token::DotDot,
                Rule::dot => Token::Dot,
                Rule::at => Token::At,
                Rule::comma => Token::Comma,
                Rule::union => Token::Union,
                Rule::lparen => Token::LParen,
                Rule::rparen => Token::RParen,
                Rule::lbracket => Token::LBracket,
                Rule::rbracket => Token::RBracket,
                Rule::operator => Token::Operator(s.to_string()),
                Rule::literal => Token::Literal(s[1..s.len() - 1].to_string()),
                Rule::number => Token::Number(s.to_string()),
                Rule::axis => Token::Axis(s.trim_end_matches("::").to_string()),
                Rule::function => Token::Function(s.to_string()),
                _ => {
                    let operand_before = tokens.last().is_some_and(Token::ends_operand);
                    if operand_before && matches!(s, "*" | "and" | "or" | "div" | "mod") {
                        Token::Operator(s.to_string())
                    } else {
                        let (prefix, name) = split_prefix(s);
                        Token::NameTest {
                            prefix: prefix.map(str::to_string),
                            name: name.to_string(),
                        }
                    }
                }
            };
            tokens.push(token);
        }

        Ok(Expr {
            text: text.to_string(),
            tokens,
        })
    }

    /// Prefixes of every name test, in order of appearance, without
    /// duplicates.
    pub fn prefixes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for token in &self.tokens {
            if let Token::NameTest {
                prefix: Some(prefix),
                ..
            } = token
            {
                if !out.contains(&prefix.as_str()) {
                    out.push(prefix);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(prefix: Option<&str>, name: &str) -> Token {
        Token::NameTest {
            prefix: prefix.map(str::to_string),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_relative_path_with_predicate() {
        let expr = Expr::parse("../if:interface[if:name = current()/../ifname]/if:mtu").unwrap();
        assert_eq!(
            expr.tokens,
            vec![
                Token::DotDot,
                Token::Slash,
                name(Some("if"), "interface"),
                Token::LBracket,
                name(Some("if"), "name"),
                Token::Operator("=".into()),
                Token::Function("current".into()),
                Token::LParen,
                Token::RParen,
                Token::Slash,
                Token::DotDot,
                Token::Slash,
                name(None, "ifname"),
                Token::RBracket,
                Token::Slash,
                name(Some("if"), "mtu"),
            ]
        );
        assert_eq!(expr.prefixes(), vec!["if"]);
    }

    #[test]
    fn test_operator_names() {
        let expr = Expr::parse("count(a) > 2 and b * 3 != 'x'").unwrap();
        assert!(expr.tokens.contains(&Token::Operator("and".into())));
        assert!(expr.tokens.contains(&Token::Operator("*".into())));
        assert!(expr.tokens.contains(&Token::Literal("x".into())));
        assert_eq!(expr.tokens[0], Token::Function("count".into()));
    }

    #[test]
    fn test_wildcard_and_axis() {
        let expr = Expr::parse("/m:*/child::and").unwrap();
        assert_eq!(
            expr.tokens,
            vec![
                Token::Slash,
                name(Some("m"), "*"),
                Token::Slash,
                Token::Axis("child".into()),
                name(None, "and"),
            ]
        );
    }

    #[test]
    fn test_unterminated_literal() {
        assert!(Expr::parse("a = 'x").is_err());
    }
}
