//! Abstract syntax for watch/print expressions.
//!
//! Grounded in `t86/debugger/Source/Expression.h`'s expression node
//! hierarchy, collapsed into one enum per the operand-hierarchy redesign
//! principle (spec §9) rather than a virtual-dispatch class per node kind.

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation (`-x`).
    Neg,
    /// Pointer dereference (`*x`).
    Deref,
    /// Address-of (`&x`).
    AddressOf,
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A parsed expression, ready for [`crate::source::expr_eval::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// A single-character literal (`'a'`).
    Char(char),
    /// A bare identifier naming a variable visible in the current scope.
    Ident(String),
    /// A reference to a previously evaluated expression (`$3`), so a
    /// debugger session can build on an earlier result without re-typing
    /// it (spec §4.12, "EvaluatedExpr").
    EvaluatedExpr(usize),
    /// A unary operator application.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operator application.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Array/pointer indexing (`base[index]`).
    Index(Box<Expr>, Box<Expr>),
    /// Struct member access (`base.field`).
    Member(Box<Expr>, String),
    /// Struct member access through a pointer (`base->field`), equivalent
    /// to `(*base).field`.
    MemberDeref(Box<Expr>, String),
    /// Assignment (`lhs = rhs`), evaluates to the assigned value.
    Assign(Box<Expr>, Box<Expr>),
}
