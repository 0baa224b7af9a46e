use std::fmt;

use regex::Regex;

use crate::token::Span;

/// A regex compiled at parse time for `matches` with a literal right-hand
/// side. Compares by pattern text so AST equality stays derivable.
#[derive(Debug, Clone)]
pub struct Pattern(pub Regex);

impl Pattern {
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Pattern)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    NotEq,
    In,
    NotIn,
    Less,
    LessEq,
    More,
    MoreEq,
    Range,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
    Exp,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Minus => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "not",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::More => ">",
            BinaryOp::MoreEq => ">=",
            BinaryOp::Range => "..",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Concat => "~",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Exp => "**",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Nil,
    Bool(bool),
    Number(f64),
    Text(String),
    /// A bare name in key position (map literals); evaluates to its text.
    Identifier(String),
    /// An environment lookup by name.
    Name(String),
    Unary {
        op: UnaryOp,
        node: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Matches {
        left: Box<Node>,
        right: Box<Node>,
        /// Present when the right-hand side was a string literal.
        pattern: Option<Pattern>,
    },
    Property {
        node: Box<Node>,
        property: String,
    },
    Index {
        node: Box<Node>,
        index: Box<Node>,
    },
    Method {
        node: Box<Node>,
        method: String,
        arguments: Vec<Node>,
    },
    Builtin {
        name: String,
        arguments: Vec<Node>,
    },
    Function {
        name: String,
        arguments: Vec<Node>,
    },
    Conditional {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Array(Vec<Node>),
    Map(Vec<(Node, Node)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

impl Node {
    pub fn new(kind: NodeKind, span: Span) -> Self {
        Self { kind, span }
    }
}
