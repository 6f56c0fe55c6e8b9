use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A dotenv file could not be read.
    #[error("unable to read the {path:?} environment file: {source}")]
    Path {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid UTF-8 input: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),
    /// The environment refused a name or value before anything was written.
    #[error("cannot set environment variable {name:?}: {reason}")]
    EnvWrite { name: String, reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line the lexer was on when it failed.
    pub line: u32,
    /// Byte offset into the newline-normalized input.
    pub position: usize,
    pub kind: ParseErrorKind,
    pub path: Option<PathBuf>,
}

impl ParseError {
    pub(crate) fn new(line: u32, position: usize, kind: ParseErrorKind) -> Self {
        Self {
            line,
            position,
            kind,
            path: None,
        }
    }

    pub(crate) fn with_path(mut self, path: Option<PathBuf>) -> Self {
        self.path = path;
        self
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "parse error in {} at line {}, position {}: {}",
                path.display(),
                self.line,
                self.position,
                self.kind
            ),
            None => write!(
                f,
                "parse error at line {}, position {}: {}",
                self.line, self.position, self.kind
            ),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseErrorKind {
    #[error("invalid character in variable name")]
    InvalidVariableName,
    #[error("missing = in the environment variable declaration")]
    MissingAssign,
    #[error("unable to unset an environment variable")]
    UnsetVariable,
    #[error("whitespace characters are not supported after the variable name")]
    WhitespaceAfterName,
    #[error("whitespace characters are not supported before the value")]
    WhitespaceBeforeValue,
    #[error("missing quote to end the value")]
    UnterminatedQuote,
    #[error("missing closing parenthesis")]
    UnclosedParenthesis,
    #[error("unclosed braces on variable expansion")]
    UnclosedBrace,
    #[error("unsupported character {ch:?} found in the default value of variable \"${name}\"")]
    UnsupportedDefaultChar { ch: char, name: String },
    #[error("a value containing spaces must be surrounded by quotes")]
    UnquotedSpaces,
}
