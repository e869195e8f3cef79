//! T86 assembly parsing.
//!
//! Grounded in `t86/parser.h`'s lexer and the debugger's
//! `common/parsing.h` (`Lexer`/`Token`/`TokenKind`), restructured as two
//! small modules: a generic [`lexer`] shared with the debug-info and
//! expression grammars in the `t86-debug` crate's design, and an
//! [`asm`] module that turns a token stream into a [`crate::program::Program`].

pub mod asm;
pub mod lexer;

pub use asm::{parse, AsmParseError};
