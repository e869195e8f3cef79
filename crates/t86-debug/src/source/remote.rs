//! Wires the source-level expression evaluator to a live [`Native`]
//! debugger session, so `x.y + *z` can be typed against a program running
//! in a separate process rather than only against the in-memory
//! [`crate::source::expr_eval::EvalContext`] fakes the evaluator's own
//! tests use.
//!
//! Grounded in spec §4.16's supplement to §4.12/§4.13: the expression
//! parser and evaluator are pure functions over an abstract memory/
//! register context; this module is the one concrete context that reads
//! that state off the wire protocol instead of a plain buffer.

use std::cell::RefCell;

use thiserror::Error;

use crate::channel::Channel;
use crate::native::Native;
use crate::source::die::Die;
use crate::source::expr_eval::{evaluate, EvalContext, EvalError};
use crate::source::expr_parser::{self, ExpressionError};
use crate::source::value::TypedValue;

/// A failure evaluating a watch/print expression against a live session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The expression's text did not parse.
    #[error(transparent)]
    Parse(#[from] ExpressionError),
    /// Evaluation failed once the expression's AST was walked.
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Adapts a [`Native`] client to [`EvalContext`] by reading/writing memory
/// and the frame-base register over the wire protocol, one request per
/// access. Wrapped in a [`RefCell`] because [`EvalContext::read_memory`]
/// and [`EvalContext::frame_base`] take `&self`, but every [`Native`]
/// operation needs `&mut self` to drive the channel.
struct RemoteContext<'a, C: Channel> {
    native: RefCell<&'a mut Native<C>>,
}

impl<C: Channel> EvalContext for RemoteContext<'_, C> {
    fn read_memory(&self, address: u64) -> Option<i64> {
        self.native.borrow_mut().read_memory(address).ok()
    }

    fn write_memory(&mut self, address: u64, value: i64) {
        let _ = self.native.borrow_mut().write_memory(address, value);
    }

    fn frame_base(&self) -> i64 {
        self.native.borrow_mut().read_register("BP").unwrap_or(0)
    }
}

/// A debugging session pairing a [`Native`] client with the debug-info
/// tree for the program it is attached to, so watch expressions can be
/// evaluated against whatever is visible at the current program counter
/// (spec §4.12, "Identifier resolution").
pub struct Session<C: Channel> {
    native: Native<C>,
    debug_info: Die,
    /// Results of previously evaluated expressions, oldest first, so a
    /// later expression can reference `$N` (spec §4.12, "EvaluatedExpr").
    history: Vec<TypedValue>,
}

impl<C: Channel> Session<C> {
    /// Pairs a connected client with the debug-info tree for the program
    /// it is attached to.
    pub const fn new(native: Native<C>, debug_info: Die) -> Self {
        Self { native, debug_info, history: Vec::new() }
    }

    /// The underlying client, for operations this session does not wrap
    /// (breakpoints, stepping, raw register/memory access).
    pub fn native(&mut self) -> &mut Native<C> {
        &mut self.native
    }

    /// Parses and evaluates `text` against the variables visible at the
    /// current program counter, recording the result in this session's
    /// `$N` history.
    ///
    /// # Errors
    /// Returns [`SessionError::Parse`] if `text` is not a valid expression,
    /// or [`SessionError::Eval`] if evaluation fails (unknown variable,
    /// type mismatch, out-of-bounds access, or an unresolved `$N`).
    pub fn evaluate(&mut self, text: &str) -> Result<TypedValue, SessionError> {
        let expr = expr_parser::parse(text)?;
        let pc = self.native.get_ip().unwrap_or(0);
        let scope = self.debug_info.variables_visible_at(pc);
        let mut ctx = RemoteContext { native: RefCell::new(&mut self.native) };
        let value = evaluate(&expr, &scope, &mut ctx, &self.history)?;
        self.history.push(value.clone());
        Ok(value)
    }

    /// Previously evaluated results in this session, oldest first.
    #[must_use]
    pub fn history(&self) -> &[TypedValue] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InMemoryChannel;

    fn empty_session() -> Session<InMemoryChannel> {
        Session::new(Native::new(InMemoryChannel::new()), Die::CompilationUnit { children: vec![] })
    }

    #[test]
    fn evaluates_pure_arithmetic_without_touching_the_channel() {
        let mut session = empty_session();
        let value = session.evaluate("2 + 3 * 4").unwrap();
        assert_eq!(value, TypedValue::Integer(14));
    }

    #[test]
    fn results_accumulate_into_dollar_history() {
        let mut session = empty_session();
        session.evaluate("10").unwrap();
        let second = session.evaluate("$0 + 1").unwrap();
        assert_eq!(second, TypedValue::Integer(11));
        assert_eq!(session.history(), &[TypedValue::Integer(10), TypedValue::Integer(11)]);
    }

    #[test]
    fn unknown_variable_surfaces_as_a_session_error() {
        let mut session = empty_session();
        let err = session.evaluate("no_such_variable").unwrap_err();
        assert!(matches!(err, SessionError::Eval(EvalError::UnknownVariable(_))));
    }

    #[test]
    fn malformed_expression_is_a_parse_error() {
        let mut session = empty_session();
        let err = session.evaluate("1 +").unwrap_err();
        assert!(matches!(err, SessionError::Parse(_)));
    }
}
