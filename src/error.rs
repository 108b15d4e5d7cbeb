use std::fmt;

/// Zero-based location of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

// Diagnostics are 1-based.
impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line: {}, column: {}", self.line + 1, self.column + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{message} at {position}")]
    Lex { message: String, position: Position },

    #[error("{message} at {position}")]
    Syntax { message: String, position: Position },

    /// The pipeline reached a state its own invariants rule out.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn lex(message: impl Into<String>, position: Position) -> Self {
        Error::Lex {
            message: message.into(),
            position,
        }
    }

    pub fn syntax(message: impl Into<String>, position: Position) -> Self {
        Error::Syntax {
            message: message.into(),
            position,
        }
    }

    pub fn position(&self) -> Option<Position> {
        match self {
            Error::Lex { position, .. } | Error::Syntax { position, .. } => Some(*position),
            Error::Internal(_) => None,
        }
    }
}

/// An [`Error`] tagged with the logical name of the script it came from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {error}")]
pub struct Diagnostic {
    pub name: String,
    #[source]
    pub error: Error,
}

impl Diagnostic {
    pub fn new(name: impl Into<String>, error: Error) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
