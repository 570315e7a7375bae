//! Token-tree types produced by the parser and consumed by the evaluator.
//!
//! A program is a sequence of pipelines, a pipeline a sequence of statements
//! joined by `|`, a statement a sequence of tokens. The first token of a
//! statement names the operation; the shape `[T, ASSIGN, ..]` encodes an
//! assignment. Closure, execution, array, and expression tokens carry their
//! bracketed body as raw text which is re-parsed lazily when evaluated.

use std::fmt;

/// The contracted token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A word, possibly carrying interpolation parts.
    Word,
    /// `{ .. }` — a deferred subprogram.
    Closure,
    /// `( .. )` — a subprogram executed in place.
    Execution,
    /// `[ .. ]` — a list or map literal, re-parsed on evaluation.
    Array,
    /// `=` — the assignment marker.
    Assign,
    /// `%( .. )` — an expression handed to the session's expression
    /// evaluator.
    Expr,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Word => "word",
            TokenKind::Closure => "closure",
            TokenKind::Execution => "execution",
            TokenKind::Array => "array",
            TokenKind::Assign => "assign",
            TokenKind::Expr => "expr",
        };
        write!(f, "{name}")
    }
}

/// One interpolation directive inside a word.
#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Literal text.
    Literal(String),
    /// `$name` or `${name}` — a variable read.
    Var(String),
    /// `$( .. )` — a nested execution whose result is substituted.
    Exec(String),
}

/// A single token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Exact source slice, including quotes and brackets.
    pub source: String,
    /// 1-based line of the first character.
    pub line: usize,
    /// 1-based column of the first character.
    pub column: usize,
    /// Bracket-stripped body for closure/execution/array/expr tokens;
    /// the unquoted literal text for pure-literal words.
    pub body: String,
    /// Interpolation directives; only words carry parts.
    pub parts: Vec<WordPart>,
    /// True when any part of the word was quoted. Quoted words never go
    /// through the typed-value ladder.
    pub quoted: bool,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, source: String, line: usize, column: usize) -> Self {
        Self {
            kind,
            source,
            line,
            column,
            body: String::new(),
            parts: Vec::new(),
            quoted: false,
        }
    }

    /// True when evaluating this word applies no substitution: nothing was
    /// quoted and there are no variable or execution parts.
    pub fn is_pure_literal(&self) -> bool {
        self.kind == TokenKind::Word
            && !self.quoted
            && self
                .parts
                .iter()
                .all(|p| matches!(p, WordPart::Literal(_)))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// An ordered sequence of tokens; the first names the operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub tokens: Vec<Token>,
}

impl Statement {
    /// Raw source of the statement, tokens joined by single spaces.
    /// Used for the `echo` execution trace.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token.source);
        }
        out
    }
}

/// Statements connected stdout-to-stdin by `|`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub statements: Vec<Statement>,
}

/// A parsed program: pipelines executed serially in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub pipelines: Vec<Pipeline>,
}

impl Program {
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
