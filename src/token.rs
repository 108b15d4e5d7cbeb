use std::fmt;

use crate::error::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Elif,
    Else,
    Endif,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "if" => Some(Keyword::If),
            "elif" => Some(Keyword::Elif),
            "else" => Some(Keyword::Else),
            "endif" => Some(Keyword::Endif),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Elif => "elif",
            Keyword::Else => "else",
            Keyword::Endif => "endif",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Decoded string literal.
    String { value: String },
    SegmentHeader { name: String },
    Divert { target: String },
    ChoiceMarker,
    Condition { expr: String },
    /// Code native to the host platform, `{ ... }`.
    InlineScript { code: String },
    ActorLine { actor: String },
    ControlFlow { keyword: Keyword },
    /// Identifier that is not a keyword.
    Symbol { value: String },
}

impl TokenKind {
    /// Short human description used in syntax errors.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::String { value } => format!("string {:?}", value),
            TokenKind::SegmentHeader { name } => format!("header `{}`", name),
            TokenKind::Divert { target } => format!("divert to `{}`", target),
            TokenKind::ChoiceMarker => "choice marker `*`".to_string(),
            TokenKind::Condition { expr } => format!("condition `[{}]`", expr),
            TokenKind::InlineScript { .. } => "inline script".to_string(),
            TokenKind::ActorLine { actor } => format!("actor line `{}:`", actor),
            TokenKind::ControlFlow { keyword } => format!("`{}`", keyword),
            TokenKind::Symbol { value } => format!("symbol `{}`", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Self {
            kind,
            position: Position::new(line, column),
        }
    }

    pub fn line(&self) -> usize {
        self.position.line
    }
}
