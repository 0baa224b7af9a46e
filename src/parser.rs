use thiserror::Error;

use crate::ast::{BinaryOp, Node, NodeKind, Pattern, UnaryOp};
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Expected {expected}, got {found} at position {position}")]
    UnexpectedToken {
        expected: String,
        found: String,
        position: usize,
    },
    #[error("Invalid regular expression '{pattern}' at position {position}: {message}")]
    InvalidPattern {
        pattern: String,
        position: usize,
        message: String,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

const LOWEST: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InfixOp {
    Binary(BinaryOp),
    Matches,
}

pub struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    current: Token<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token<'a>>) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eof, Span::default()));
        }
        let current = tokens[0].clone();
        Self {
            tokens,
            pos: 0,
            current,
        }
    }

    pub fn parse(mut self) -> ParseResult<Node> {
        let node = self.parse_expression()?;
        if !matches!(self.current.kind, TokenKind::Eof) {
            return Err(self.error("end of expression"));
        }
        Ok(node)
    }

    fn parse_expression(&mut self) -> ParseResult<Node> {
        let cond = self.parse_binary(LOWEST)?;
        if !matches!(self.current.kind, TokenKind::Question) {
            return Ok(cond);
        }

        self.advance();
        let then = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':'")?;
        // Recursing keeps `a ? b : c ? d : e` right-associative.
        let otherwise = self.parse_expression()?;

        let span = cond.span.merge(otherwise.span);
        Ok(Node::new(
            NodeKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            span,
        ))
    }

    fn parse_binary(&mut self, min_bp: u8) -> ParseResult<Node> {
        let mut left = self.parse_unary()?;

        loop {
            let Some((op, bp, right_assoc)) = self.peek_binary_op() else {
                break;
            };
            if bp < min_bp {
                break;
            }

            self.advance();
            if op == InfixOp::Binary(BinaryOp::NotIn) {
                self.advance(); // the merged `in`
            }

            let next_bp = if right_assoc { bp } else { bp + 1 };
            let right = self.parse_binary(next_bp)?;
            left = match op {
                InfixOp::Binary(op) => self.make_binary(op, left, right),
                InfixOp::Matches => self.make_matches(left, right)?,
            };
        }

        Ok(left)
    }

    /// Infix operator table: operator, binding power, right-associativity.
    fn peek_binary_op(&self) -> Option<(InfixOp, u8, bool)> {
        use InfixOp::Binary;

        Some(match self.current.kind {
            TokenKind::Or | TokenKind::PipePipe => (Binary(BinaryOp::Or), 1, false),
            TokenKind::And | TokenKind::AmpAmp => (Binary(BinaryOp::And), 2, false),
            TokenKind::Pipe => (Binary(BinaryOp::BitOr), 3, false),
            TokenKind::Caret => (Binary(BinaryOp::BitXor), 4, false),
            TokenKind::Amp => (Binary(BinaryOp::BitAnd), 5, false),
            TokenKind::Eq => (Binary(BinaryOp::Eq), 6, false),
            TokenKind::NotEq => (Binary(BinaryOp::NotEq), 6, false),
            TokenKind::In => (Binary(BinaryOp::In), 6, false),
            TokenKind::Matches => (InfixOp::Matches, 6, false),
            TokenKind::Not if matches!(self.peek_kind(), TokenKind::In) => {
                (Binary(BinaryOp::NotIn), 6, false)
            }
            TokenKind::Less => (Binary(BinaryOp::Less), 7, false),
            TokenKind::LessEq => (Binary(BinaryOp::LessEq), 7, false),
            TokenKind::Greater => (Binary(BinaryOp::More), 7, false),
            TokenKind::GreaterEq => (Binary(BinaryOp::MoreEq), 7, false),
            TokenKind::DotDot => (Binary(BinaryOp::Range), 8, false),
            TokenKind::Plus => (Binary(BinaryOp::Add), 9, false),
            TokenKind::Minus => (Binary(BinaryOp::Sub), 9, false),
            TokenKind::Tilde => (Binary(BinaryOp::Concat), 9, false),
            TokenKind::Star => (Binary(BinaryOp::Mul), 10, false),
            TokenKind::Slash => (Binary(BinaryOp::Div), 10, false),
            TokenKind::Percent => (Binary(BinaryOp::Mod), 10, false),
            TokenKind::StarStar => (Binary(BinaryOp::Exp), 11, true),
            _ => return None,
        })
    }

    fn make_binary(&self, op: BinaryOp, left: Node, right: Node) -> Node {
        let span = left.span.merge(right.span);
        Node::new(
            NodeKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn make_matches(&self, left: Node, right: Node) -> ParseResult<Node> {
        let pattern = if let NodeKind::Text(pattern) = &right.kind {
            let compiled =
                Pattern::compile(pattern).map_err(|err| ParseError::InvalidPattern {
                    pattern: pattern.clone(),
                    position: right.span.start,
                    message: err.to_string(),
                })?;
            Some(compiled)
        } else {
            None
        };

        let span = left.span.merge(right.span);
        Ok(Node::new(
            NodeKind::Matches {
                left: Box::new(left),
                right: Box::new(right),
                pattern,
            },
            span,
        ))
    }

    fn parse_unary(&mut self) -> ParseResult<Node> {
        let op = match self.current.kind {
            TokenKind::Minus => UnaryOp::Minus,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Not if !matches!(self.peek_kind(), TokenKind::In) => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };

        let start = self.current.span;
        self.advance();
        let node = self.parse_unary()?;
        let span = start.merge(node.span);
        Ok(Node::new(
            NodeKind::Unary {
                op,
                node: Box::new(node),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_primary()?;

        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    self.advance();
                    let name_span = self.current.span;
                    let name = self.expect_identifier()?;
                    if matches!(self.current.kind, TokenKind::LParen) {
                        let (arguments, end) = self.parse_arguments()?;
                        let span = node.span.merge(end);
                        node = Node::new(
                            NodeKind::Method {
                                node: Box::new(node),
                                method: name,
                                arguments,
                            },
                            span,
                        );
                    } else {
                        let span = node.span.merge(name_span);
                        node = Node::new(
                            NodeKind::Property {
                                node: Box::new(node),
                                property: name,
                            },
                            span,
                        );
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    let end = self.current.span;
                    self.expect(TokenKind::RBracket, "']'")?;
                    let span = node.span.merge(end);
                    node = Node::new(
                        NodeKind::Index {
                            node: Box::new(node),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::LParen => {
                    let name = match &node.kind {
                        NodeKind::Name(name) => name.clone(),
                        _ => return Err(self.error("a function name before '('")),
                    };
                    let (arguments, end) = self.parse_arguments()?;
                    let span = node.span.merge(end);
                    node = if name == "len" {
                        Node::new(NodeKind::Builtin { name, arguments }, span)
                    } else {
                        Node::new(NodeKind::Function { name, arguments }, span)
                    };
                }
                _ => break,
            }
        }

        Ok(node)
    }

    fn parse_arguments(&mut self) -> ParseResult<(Vec<Node>, Span)> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut arguments = Vec::new();
        if !matches!(self.current.kind, TokenKind::RParen) {
            loop {
                arguments.push(self.parse_expression()?);
                if matches!(self.current.kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let end = self.current.span;
        self.expect(TokenKind::RParen, "')'")?;
        Ok((arguments, end))
    }

    fn parse_primary(&mut self) -> ParseResult<Node> {
        let span = self.current.span;
        match &self.current.kind {
            TokenKind::Number(value) => {
                let value = *value;
                self.advance();
                Ok(Node::new(NodeKind::Number(value), span))
            }
            TokenKind::Text(value) => {
                let value = value.clone();
                self.advance();
                Ok(Node::new(NodeKind::Text(value), span))
            }
            TokenKind::True => {
                self.advance();
                Ok(Node::new(NodeKind::Bool(true), span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Node::new(NodeKind::Bool(false), span))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Node::new(NodeKind::Nil, span))
            }
            TokenKind::Identifier(name) => {
                let name = name.to_string();
                self.advance();
                Ok(Node::new(NodeKind::Name(name), span))
            }
            TokenKind::LParen => {
                self.advance();
                let node = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(node)
            }
            TokenKind::LBracket => self.parse_array(span),
            TokenKind::LBrace => self.parse_map(span),
            _ => Err(self.error("an expression")),
        }
    }

    fn parse_array(&mut self, start: Span) -> ParseResult<Node> {
        self.advance(); // [
        let mut nodes = Vec::new();
        if !matches!(self.current.kind, TokenKind::RBracket) {
            loop {
                nodes.push(self.parse_expression()?);
                if matches!(self.current.kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let end = self.current.span;
        self.expect(TokenKind::RBracket, "']'")?;
        Ok(Node::new(NodeKind::Array(nodes), start.merge(end)))
    }

    fn parse_map(&mut self, start: Span) -> ParseResult<Node> {
        self.advance(); // {
        let mut pairs = Vec::new();
        if !matches!(self.current.kind, TokenKind::RBrace) {
            loop {
                let key = self.parse_map_key()?;
                self.expect(TokenKind::Colon, "':'")?;
                let value = self.parse_expression()?;
                pairs.push((key, value));
                if matches!(self.current.kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let end = self.current.span;
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Node::new(NodeKind::Map(pairs), start.merge(end)))
    }

    /// Map keys are bare identifiers (treated as text), string literals, or
    /// `[expr]` for computed keys.
    fn parse_map_key(&mut self) -> ParseResult<Node> {
        let span = self.current.span;
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.to_string();
                self.advance();
                Ok(Node::new(NodeKind::Identifier(name), span))
            }
            TokenKind::Text(value) => {
                let value = value.clone();
                self.advance();
                Ok(Node::new(NodeKind::Text(value), span))
            }
            TokenKind::LBracket => {
                self.advance();
                let key = self.parse_expression()?;
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(key)
            }
            _ => Err(self.error("a map key")),
        }
    }

    fn expect(&mut self, kind: TokenKind<'a>, expected: &str) -> ParseResult<()> {
        if self.current.kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.to_string();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("an identifier"))
        }
    }

    fn advance(&mut self) -> Token<'a> {
        let next = self
            .tokens
            .get(self.pos + 1)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, Span::default()));
        self.pos = self.pos.saturating_add(1);
        std::mem::replace(&mut self.current, next)
    }

    fn peek_kind(&self) -> TokenKind<'a> {
        self.tokens
            .get(self.pos + 1)
            .map(|token| token.kind.clone())
            .unwrap_or(TokenKind::Eof)
    }

    fn error(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: format!("{:?}", self.current.kind),
            position: self.current.span.start,
        }
    }
}

pub fn parse_tokens(tokens: Vec<Token<'_>>) -> ParseResult<Node> {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(input: &str) -> Node {
        let tokens = tokenize(input).expect("tokenize should succeed");
        parse_tokens(tokens).expect("parse should succeed")
    }

    fn parse_err(input: &str) -> ParseError {
        let tokens = tokenize(input).expect("tokenize should succeed");
        parse_tokens(tokens).expect_err("expected parse failure")
    }

    fn number(value: f64) -> NodeKind {
        NodeKind::Number(value)
    }

    fn binary(op: BinaryOp, left: NodeKind, right: NodeKind) -> NodeKind {
        NodeKind::Binary {
            op,
            left: Box::new(Node::new(left, Span::default())),
            right: Box::new(Node::new(right, Span::default())),
        }
    }

    /// Structural comparison ignoring spans.
    fn shape_eq(node: &Node, kind: &NodeKind) -> bool {
        match (&node.kind, kind) {
            (NodeKind::Binary { op, left, right }, NodeKind::Binary { op: o, left: l, right: r }) => {
                op == o && shape_eq(left, &l.kind) && shape_eq(right, &r.kind)
            }
            (NodeKind::Unary { op, node }, NodeKind::Unary { op: o, node: n }) => {
                op == o && shape_eq(node, &n.kind)
            }
            (a, b) => a == b,
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expected = binary(
            BinaryOp::Add,
            number(1.0),
            binary(BinaryOp::Mul, number(2.0), number(3.0)),
        );
        assert!(shape_eq(&parse("1 + 2 * 3"), &expected));
    }

    #[test]
    fn exponent_is_right_associative() {
        let expected = binary(
            BinaryOp::Exp,
            number(2.0),
            binary(BinaryOp::Exp, number(3.0), number(4.0)),
        );
        assert!(shape_eq(&parse("2 ** 3 ** 4"), &expected));
    }

    #[test]
    fn unary_minus_binds_tighter_than_exponent() {
        let expected = binary(
            BinaryOp::Exp,
            NodeKind::Unary {
                op: UnaryOp::Minus,
                node: Box::new(Node::new(number(2.0), Span::default())),
            },
            number(3.0),
        );
        assert!(shape_eq(&parse("-2 ** 3"), &expected));
    }

    #[test]
    fn comparison_binds_tighter_than_logic() {
        let expected = binary(
            BinaryOp::And,
            binary(BinaryOp::Less, number(1.0), number(2.0)),
            binary(BinaryOp::More, number(3.0), number(2.0)),
        );
        assert!(shape_eq(&parse("1 < 2 and 3 > 2"), &expected));
    }

    #[test]
    fn parses_not_in_as_one_operator() {
        let node = parse(r#"kind not in ["misc"]"#);
        match node.kind {
            NodeKind::Binary { op, .. } => assert_eq!(op, BinaryOp::NotIn),
            other => panic!("expected binary node, got {other:?}"),
        }
    }

    #[test]
    fn ternary_is_right_associative() {
        let node = parse("true ? 1 : false ? 2 : 3");
        match node.kind {
            NodeKind::Conditional { otherwise, .. } => {
                assert!(matches!(otherwise.kind, NodeKind::Conditional { .. }));
            }
            other => panic!("expected conditional node, got {other:?}"),
        }
    }

    #[test]
    fn parses_postfix_chain() {
        let node = parse("user.Accounts[0].Balance");
        match node.kind {
            NodeKind::Property { node, property } => {
                assert_eq!(property, "Balance");
                assert!(matches!(node.kind, NodeKind::Index { .. }));
            }
            other => panic!("expected property node, got {other:?}"),
        }
    }

    #[test]
    fn parses_method_and_function_calls() {
        let node = parse("user.IsMember(1, 2)");
        match node.kind {
            NodeKind::Method {
                method, arguments, ..
            } => {
                assert_eq!(method, "IsMember");
                assert_eq!(arguments.len(), 2);
            }
            other => panic!("expected method node, got {other:?}"),
        }

        let node = parse("Lookup(name)");
        assert!(matches!(node.kind, NodeKind::Function { .. }));

        let node = parse("len(items)");
        assert!(matches!(node.kind, NodeKind::Builtin { .. }));
    }

    #[test]
    fn matches_with_literal_precompiles_pattern() {
        let node = parse(r#"name matches "^a""#);
        match node.kind {
            NodeKind::Matches { pattern, .. } => {
                let pattern = pattern.expect("expected precompiled pattern");
                assert_eq!(pattern.as_str(), "^a");
            }
            other => panic!("expected matches node, got {other:?}"),
        }
    }

    #[test]
    fn matches_with_dynamic_rhs_defers_compilation() {
        let node = parse("name matches suffix");
        match node.kind {
            NodeKind::Matches { pattern, .. } => assert!(pattern.is_none()),
            other => panic!("expected matches node, got {other:?}"),
        }
    }

    #[test]
    fn parses_map_literal_key_forms() {
        let node = parse(r#"{name: 1, "kind": 2, [3 + 4]: 5}"#);
        match node.kind {
            NodeKind::Map(pairs) => {
                assert_eq!(pairs.len(), 3);
                assert!(matches!(pairs[0].0.kind, NodeKind::Identifier(_)));
                assert!(matches!(pairs[1].0.kind, NodeKind::Text(_)));
                assert!(matches!(pairs[2].0.kind, NodeKind::Binary { .. }));
            }
            other => panic!("expected map node, got {other:?}"),
        }
    }

    #[test]
    fn errors_on_invalid_literal_pattern() {
        let err = parse_err(r#"name matches "[""#);
        assert!(matches!(err, ParseError::InvalidPattern { .. }));
    }

    #[test]
    fn errors_on_trailing_tokens() {
        let err = parse_err("1 2");
        assert_eq!(
            err,
            ParseError::UnexpectedToken {
                expected: "end of expression".to_string(),
                found: "Number(2.0)".to_string(),
                position: 2,
            }
        );
    }

    #[test]
    fn errors_on_missing_operand() {
        let err = parse_err("1 +");
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn errors_on_call_of_non_name() {
        let err = parse_err("(1 + 2)(3)");
        assert!(err.to_string().contains("function name"));
    }
}
