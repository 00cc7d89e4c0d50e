//! Grit interpreter library
//!
//! A terse stack-based scripting language whose control flow lives in
//! explicit, resumable execution frames, plus a Debug Adapter Protocol
//! server that steps the machine one instruction at a time.

pub mod dap;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod repl;

pub use error::{Result, RuntimeError};
pub use lexer::Span;
