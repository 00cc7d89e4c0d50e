//! Runtime errors for the virtual machine

use crate::lexer::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Error raised by a single execution step.
///
/// Every failure unwinds out of `execute_instruction` as one of these;
/// the driving loop decides whether to halt the machine or carry on.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
}

/// Kinds of runtime errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unbalanced `{`/`}` in a block
    UnmatchedBrace,
    /// Operator applied to operand kinds with no defined behaviour
    UnsupportedOperands,
    /// Operation the language reserves but does not define
    NotImplemented,
    /// Operator needed more operands than the stack holds
    StackUnderflow,
    /// Operand stack capacity exceeded
    StackOverflow,
    /// `]` with no open `[` recorded
    BracketUnderflow,
    /// Stack pick or uncons outside the valid range
    IndexOutOfBounds,
    /// Division or modulo by zero
    DivisionByZero,
    /// A literal or digit sequence that does not form a number
    InvalidNumber,
}

impl RuntimeError {
    fn new(kind: ErrorKind, message: String) -> Self {
        RuntimeError {
            kind,
            message,
            span: None,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn unmatched_brace(span: Span) -> Self {
        RuntimeError::new(
            ErrorKind::UnmatchedBrace,
            "unmatched '{' in block".to_string(),
        )
        .with_span(span)
    }

    pub fn unsupported(op: &str, kinds: &[&str]) -> Self {
        RuntimeError::new(
            ErrorKind::UnsupportedOperands,
            format!("operator '{op}' not defined for ({})", kinds.join(", ")),
        )
    }

    pub fn invalid_operand(op: &str, detail: &str) -> Self {
        RuntimeError::new(
            ErrorKind::UnsupportedOperands,
            format!("operator '{op}': {detail}"),
        )
    }

    pub fn not_implemented(op: &str, detail: &str) -> Self {
        RuntimeError::new(
            ErrorKind::NotImplemented,
            format!("operator '{op}' is not implemented for {detail}"),
        )
    }

    pub fn stack_underflow(op: &str, needed: usize) -> Self {
        RuntimeError::new(
            ErrorKind::StackUnderflow,
            format!("operator '{op}' needs {needed} operand(s)"),
        )
    }

    pub fn stack_overflow() -> Self {
        RuntimeError::new(
            ErrorKind::StackOverflow,
            "operand stack capacity exceeded".to_string(),
        )
    }

    pub fn bracket_underflow() -> Self {
        RuntimeError::new(
            ErrorKind::BracketUnderflow,
            "']' without a matching '['".to_string(),
        )
    }

    pub fn index_out_of_bounds(op: &str, index: i64) -> Self {
        RuntimeError::new(
            ErrorKind::IndexOutOfBounds,
            format!("operator '{op}': index {index} out of range"),
        )
    }

    pub fn division_by_zero(op: &str) -> Self {
        RuntimeError::new(
            ErrorKind::DivisionByZero,
            format!("operator '{op}': division by zero"),
        )
    }

    pub fn invalid_number(literal: &str) -> Self {
        RuntimeError::new(
            ErrorKind::InvalidNumber,
            format!("'{literal}' is not a representable number"),
        )
    }
}
