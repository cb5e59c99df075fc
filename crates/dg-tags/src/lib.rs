//! Boolean tag-expression evaluator.
//!
//! Compiles a filter string like `@smoke and not @wip` into an AST
//! once, then evaluates it against scenario tag sets many times.
//! Precedence: NOT > AND > OR, parentheses group. Keywords are
//! case-insensitive; the `@` marker on literals is stripped before
//! comparison.
//!
//! Hand-written recursive descent rather than an expression library so
//! that parse errors carry positions and the AST stays inspectable.

use tracing::warn;

/// Parse failure for a tag expression, with the byte offset of the
/// offending token.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid tag expression '{expression}': {message} at position {position}")]
pub struct TagParseError {
    pub expression: String,
    pub message: String,
    pub position: usize,
}

impl From<TagParseError> for dg_core::GridError {
    fn from(err: TagParseError) -> Self {
        dg_core::GridError::TagParse {
            expression: err.expression,
            message: err.message,
            position: err.position,
        }
    }
}

/// AST for a compiled tag expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpression {
    Literal(String),
    Not(Box<TagExpression>),
    And(Box<TagExpression>, Box<TagExpression>),
    Or(Box<TagExpression>, Box<TagExpression>),
}

impl TagExpression {
    fn evaluate(&self, tags: &[String]) -> bool {
        match self {
            Self::Literal(lit) => tags.iter().any(|t| strip_marker(t) == lit.as_str()),
            Self::Not(inner) => !inner.evaluate(tags),
            Self::And(lhs, rhs) => lhs.evaluate(tags) && rhs.evaluate(tags),
            Self::Or(lhs, rhs) => lhs.evaluate(tags) || rhs.evaluate(tags),
        }
    }
}

/// Compiled predicate over a tag set. Pure: identical (expression,
/// tag set) pairs always evaluate identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPredicate {
    ast: TagExpression,
}

impl TagPredicate {
    pub fn matches<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owned: Vec<String> = tags.into_iter().map(|s| s.as_ref().to_string()).collect();
        self.ast.evaluate(&owned)
    }

    pub fn ast(&self) -> &TagExpression {
        &self.ast
    }
}

/// Strip the optional `@` marker from a tag literal.
fn strip_marker(tag: &str) -> &str {
    tag.strip_prefix('@').unwrap_or(tag)
}

/// Compile a tag expression into a reusable predicate.
pub fn compile(expression: &str) -> Result<TagPredicate, TagParseError> {
    let tokens = lex(expression)?;
    let mut parser = Parser {
        expression,
        tokens,
        pos: 0,
    };
    let ast = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(parser.error(format!("unexpected token '{}'", tok.text), tok.offset));
    }
    Ok(TagPredicate { ast })
}

/// A filter with a caller-selected fallback: either a compiled
/// expression or a conservative exact-literal match used when the
/// expression failed to parse. Keeps the partitioning pipeline alive
/// on malformed filter input.
#[derive(Debug, Clone)]
pub enum TagFilter {
    Expression(TagPredicate),
    /// Fallback: the raw filter string matched as a single literal.
    LiteralFallback(String),
}

impl TagFilter {
    /// Compile, degrading to exact-literal matching on parse failure.
    pub fn compile_or_literal(expression: &str) -> Self {
        match compile(expression) {
            Ok(predicate) => Self::Expression(predicate),
            Err(err) => {
                warn!(
                    expression,
                    error = %err,
                    "tag expression failed to parse, falling back to literal match"
                );
                Self::LiteralFallback(strip_marker(expression.trim()).to_string())
            }
        }
    }

    pub fn matches<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self {
            Self::Expression(predicate) => predicate.matches(tags),
            Self::LiteralFallback(lit) => tags
                .into_iter()
                .any(|t| strip_marker(t.as_ref()) == lit.as_str()),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    And,
    Or,
    Not,
    LParen,
    RParen,
    Literal,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    offset: usize,
}

fn lex(expression: &str) -> Result<Vec<Token>, TagParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' || c == ')' {
            tokens.push(Token {
                kind: if c == '(' {
                    TokenKind::LParen
                } else {
                    TokenKind::RParen
                },
                text: c.to_string(),
                offset: i,
            });
            i += 1;
            continue;
        }

        // A word: everything up to whitespace or a parenthesis.
        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        let kind = match word.to_ascii_lowercase().as_str() {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            _ => TokenKind::Literal,
        };
        tokens.push(Token {
            kind,
            text: word,
            offset: start,
        });
    }

    if tokens.is_empty() {
        return Err(TagParseError {
            expression: expression.to_string(),
            message: "empty expression".to_string(),
            position: 0,
        });
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: String, position: usize) -> TagParseError {
        TagParseError {
            expression: self.expression.to_string(),
            message,
            position,
        }
    }

    fn end_offset(&self) -> usize {
        self.expression.chars().count()
    }

    fn parse_or(&mut self) -> Result<TagExpression, TagParseError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = TagExpression::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<TagExpression, TagParseError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = TagExpression::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<TagExpression, TagParseError> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Not)) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(TagExpression::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<TagExpression, TagParseError> {
        let Some(tok) = self.advance() else {
            return Err(self.error("expected operand".to_string(), self.end_offset()));
        };
        match tok.kind {
            TokenKind::Literal => Ok(TagExpression::Literal(
                strip_marker(&tok.text).to_string(),
            )),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(close) if close.kind == TokenKind::RParen => Ok(inner),
                    Some(other) => {
                        Err(self.error(format!("expected ')', found '{}'", other.text), other.offset))
                    }
                    None => Err(self.error("unbalanced parenthesis".to_string(), tok.offset)),
                }
            }
            _ => Err(self.error(
                format!("expected operand, found '{}'", tok.text),
                tok.offset,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str, tags: &[&str]) -> bool {
        compile(expr).unwrap().matches(tags.iter().copied())
    }

    #[test]
    fn test_single_literal() {
        assert!(eval("@smoke", &["@smoke", "@wip"]));
        assert!(!eval("@smoke", &["@wip"]));
    }

    #[test]
    fn test_marker_stripped_both_sides() {
        assert!(eval("smoke", &["@smoke"]));
        assert!(eval("@smoke", &["smoke"]));
    }

    #[test]
    fn test_and_not() {
        assert!(!eval("A and not B", &["A", "B"]));
        assert!(eval("A and not B", &["A"]));
    }

    #[test]
    fn test_parens_with_or() {
        assert!(eval("(A or B) and not C", &["B"]));
        assert!(!eval("(A or B) and not C", &["B", "C"]));
        assert!(!eval("(A or B) and not C", &["D"]));
    }

    #[test]
    fn test_precedence_not_over_and_over_or() {
        // Parsed as A or (B and (not C)), not (A or B) and not C.
        assert!(eval("A or B and not C", &["A", "C"]));
        assert!(!eval("A or B and not C", &["B", "C"]));
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert!(eval("A AND NOT B", &["A"]));
        assert!(eval("a Or b", &["b"]));
    }

    #[test]
    fn test_double_negation() {
        assert!(eval("not not A", &["A"]));
        assert!(!eval("not not A", &["B"]));
    }

    #[test]
    fn test_empty_expression_is_error() {
        let err = compile("").unwrap_err();
        assert_eq!(err.message, "empty expression");
        let err = compile("   ").unwrap_err();
        assert_eq!(err.position, 0);
    }

    #[test]
    fn test_dangling_operator() {
        let err = compile("@a and").unwrap_err();
        assert!(err.message.contains("expected operand"));
        assert_eq!(err.position, 6);
    }

    #[test]
    fn test_unbalanced_parenthesis() {
        let err = compile("(@a or @b").unwrap_err();
        assert!(err.message.contains("unbalanced parenthesis"));
    }

    #[test]
    fn test_trailing_garbage() {
        let err = compile("@a @b").unwrap_err();
        assert!(err.message.contains("unexpected token '@b'"));
        assert_eq!(err.position, 3);
    }

    #[test]
    fn test_operator_in_operand_position() {
        let err = compile("and @a").unwrap_err();
        assert!(err.message.contains("expected operand, found 'and'"));
        assert_eq!(err.position, 0);
    }

    #[test]
    fn test_deterministic_evaluation() {
        let predicate = compile("(@a or @b) and not @c").unwrap();
        for _ in 0..10 {
            assert!(predicate.matches(["@a"]));
            assert!(!predicate.matches(["@a", "@c"]));
        }
    }

    #[test]
    fn test_ast_shape() {
        let predicate = compile("not @a and @b").unwrap();
        assert_eq!(
            predicate.ast(),
            &TagExpression::And(
                Box::new(TagExpression::Not(Box::new(TagExpression::Literal(
                    "a".to_string()
                )))),
                Box::new(TagExpression::Literal("b".to_string())),
            )
        );
    }

    #[test]
    fn test_filter_fallback_on_malformed() {
        let filter = TagFilter::compile_or_literal("@release and");
        assert!(matches!(filter, TagFilter::LiteralFallback(_)));
        // Conservative: the whole raw string is the literal, which no
        // tag will normally equal.
        assert!(!filter.matches(["@release"]));
    }

    #[test]
    fn test_filter_fallback_exact_literal() {
        let filter = TagFilter::compile_or_literal("((@smoke");
        match &filter {
            TagFilter::LiteralFallback(lit) => assert_eq!(lit, "((@smoke"),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_wellformed_uses_expression() {
        let filter = TagFilter::compile_or_literal("@smoke or @fast");
        assert!(matches!(filter, TagFilter::Expression(_)));
        assert!(filter.matches(["@fast"]));
        assert!(!filter.matches(["@slow"]));
    }

    #[test]
    fn test_parse_error_converts_to_grid_error() {
        let err: dg_core::GridError = compile("@a or").unwrap_err().into();
        assert!(err.to_string().contains("Invalid tag expression"));
    }
}
