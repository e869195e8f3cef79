//! Source-level debug info: DIEs, types, locations, and expressions.
//!
//! Grounded in `t86/debugger/Source`: a DWARF-inspired but much smaller
//! model, parsed from the textual debug-info format the T86 toolchain
//! emits alongside an assembled program (spec §4.16, "Debug info format").

/// Debug-info entry tree (compilation units, functions, lexical blocks,
/// variables) and scope lookup.
pub mod die;
/// Abstract syntax for watch/print expressions.
pub mod expr_ast;
/// Recursive evaluation of parsed expressions against live machine state.
pub mod expr_eval;
/// Precedence-climbing parser turning expression text into [`expr_ast::Expr`].
pub mod expr_parser;
/// Address-to-source-line mapping.
pub mod line_mapping;
/// Stack-VM location expressions resolving a variable's address.
pub mod loc_expr;
/// Recursive-descent parser for the textual debug-info format.
pub mod parser;
/// Adapts a [`crate::native::Native`] client to the expression evaluator's
/// [`expr_eval::EvalContext`], and bundles it with a debug-info tree.
pub mod remote;
/// A parsed source file: its DIE tree, line mapping, and source text.
pub mod source_file;
/// Type system (integers, floats, pointers, arrays, structs).
pub mod type_info;
/// Typed runtime value model.
pub mod value;

pub use die::Die;
pub use expr_ast::{BinaryOp, Expr, UnaryOp};
pub use expr_eval::{evaluate, EvalContext, EvalError};
pub use expr_parser::{parse, ExpressionError};
pub use line_mapping::LineMapping;
pub use loc_expr::{LocExpr, LocExprError, LocOp};
pub use parser::{parse_debug_info, DebugInfoParseError};
pub use remote::{Session, SessionError};
pub use source_file::SourceFile;
pub use type_info::{StructField, Type};
pub use value::TypedValue;
