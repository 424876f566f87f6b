//! Interpreter error type
//!
//! Every fallible operation in the core returns [`EvalResult`]. Runtime
//! errors unwind to the read-eval-print loop, which resets the machine and
//! resumes; reader syntax errors never become a `SchemeError` (the reader
//! resynchronizes internally and reports a status instead).

use std::fmt;

/// Classification of an interpreter error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ill-formed special form caught by the syntax checker.
    Syntax,
    /// Reference to a symbol with no binding.
    Unbound,
    /// Application of something that is not a procedure.
    Unapplicable,
    /// Attempt to define or set! a reserved symbol.
    Reserved,
    /// Built-in invoked with the wrong number or kind of arguments.
    Arity,
    /// Raised by the `error` built-in.
    User,
    /// Integer or block size out of representable range.
    Overflow,
    /// Heap, stack or label stack exhausted.
    Resource,
    /// Internal invariant violation.
    Fatal,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Unbound => "unbound variable",
            ErrorKind::Unapplicable => "unapplicable",
            ErrorKind::Reserved => "reserved word",
            ErrorKind::Arity => "bad arguments",
            ErrorKind::User => "error",
            ErrorKind::Overflow => "overflow",
            ErrorKind::Resource => "out of resources",
            ErrorKind::Fatal => "internal error",
        }
    }
}

/// An interpreter error with its diagnostic text.
#[derive(Debug, Clone)]
pub struct SchemeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SchemeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        SchemeError {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for SchemeError {}

pub type EvalResult<T = ()> = Result<T, SchemeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_label() {
        let e = SchemeError::new(ErrorKind::Unbound, "no binding for foo");
        assert_eq!(e.to_string(), "unbound variable: no binding for foo");
    }
}
