//! Error reporting.

use std::rc::Rc;

/// A source code location.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub byte: usize,
    pub line: u32,
    pub column: u32,
}

impl Location {
    /// The unset location, used for nodes and errors that do not come from source code.
    pub const UNINIT: Self = Self {
        byte: 0,
        line: 0,
        column: 0,
    };
}

impl Default for Location {
    fn default() -> Self {
        Self {
            byte: 0,
            line: 1,
            column: 1,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The kind of an error.
#[derive(Debug)]
pub enum ErrorKind {
    // Lexer
    InvalidCharacter(char),
    MissingDigitsAfterDecimalPoint,
    MissingClosingQuote,

    // Parser
    UnexpectedToken(&'static str),
    ExpectedToken {
        expected: &'static str,
        got: &'static str,
    },
    IdentifierExpected,
    PropertyNameExpected,
    InvalidAssignment,
    BreakOutsideOfLoop,
    ContinueOutsideOfLoop,
    ReturnOutsideOfFunction,

    // Runtime
    ReferenceError,
    NotAFunction,
    OutOfMemory,
    AssertionFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCharacter(c) => write!(f, "invalid character: {c:?}"),
            Self::MissingDigitsAfterDecimalPoint => write!(f, "missing digits after decimal point"),
            Self::MissingClosingQuote => write!(f, "missing closing quote '\"'"),

            Self::UnexpectedToken(got) => write!(f, "unexpected token `{got}`"),
            Self::ExpectedToken { expected, got } => {
                write!(f, "expected `{expected}`, but got `{got}`")
            }
            Self::IdentifierExpected => write!(f, "identifier expected"),
            Self::PropertyNameExpected => write!(f, "property name expected"),
            Self::InvalidAssignment => write!(f, "invalid left hand side of assignment"),
            Self::BreakOutsideOfLoop => write!(f, "'break' cannot be used outside of a loop"),
            Self::ContinueOutsideOfLoop => write!(f, "'continue' cannot be used outside of a loop"),
            Self::ReturnOutsideOfFunction => {
                write!(f, "'return' cannot be used outside of a function")
            }

            Self::ReferenceError => write!(f, "reference error"),
            Self::NotAFunction => write!(f, "value is not a function"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::AssertionFailed => write!(f, "assertion failed"),
        }
    }
}

/// An error, either from compiling or from running a script.
#[derive(Debug)]
pub enum Error {
    Compile {
        kind: ErrorKind,
        module_name: Rc<str>,
        location: Location,
    },
    Runtime {
        kind: ErrorKind,
        module_name: Rc<str>,
        location: Location,
    },
}

impl Error {
    /// Returns the kind of the error.
    pub fn kind(&self) -> &ErrorKind {
        match self {
            Error::Compile { kind, .. } | Error::Runtime { kind, .. } => kind,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Compile {
                kind,
                module_name,
                location,
            } => {
                write!(f, "{module_name}:{location}: error: {kind}")
            }
            Error::Runtime {
                kind,
                module_name,
                location,
            } => {
                write!(f, "{module_name}:{location}: runtime error: {kind}")
            }
        }
    }
}

impl std::error::Error for Error {}
