//! Token definitions

use super::Span;
use logos::Logos;
use std::fmt;

/// Raw token classes, in matching precedence order.
///
/// Strings are scanned greedily and tolerate a missing closing quote.
/// The single-character fallback makes the scanner total: whatever the
/// other classes reject becomes a one-character token, including
/// whitespace and newlines.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
pub(super) enum RawToken {
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[regex(r"'(?:\\.|[^'])*'?")]
    #[regex(r#""(?:\\.|[^"])*"?"#)]
    Str,

    #[regex(r"-?[0-9]+")]
    Int,

    #[regex(r"#[^\n\r]*")]
    Comment,

    #[regex(r".", priority = 0)]
    #[token("\n")]
    Char,
}

/// A token: the exact source text plus its byte span
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        Self {
            text: text.into(),
            span,
        }
    }

    /// A token manufactured at runtime (the implicit `;` appended to
    /// loop blocks, the fold's closing `]`); carries no source span.
    pub fn synthetic(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            span: Span::synthetic(),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
