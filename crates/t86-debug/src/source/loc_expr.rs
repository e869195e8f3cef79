//! Location expressions: a tiny stack VM describing where a variable lives.
//!
//! Grounded in `t86/debugger/Source/LocExpr.h`: debug info does not record
//! a fixed address for each variable (locals move as the frame base
//! changes), so each variable's location is instead a short program of
//! stack-machine opcodes evaluated against the current frame-base register
//! to produce an address (spec §4.16 supplement, "Location expressions").

/// One opcode in a location-expression program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocOp {
    /// Pushes a constant.
    Push(i64),
    /// Pops two values and pushes their sum.
    Add,
    /// Pushes the current frame-base register's value (`BP`, per T86's
    /// calling convention) plus a fixed offset recorded in debug info.
    FrameBaseRegisterOffset(i64),
}

/// A failure evaluating a location expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LocExprError {
    /// An `Add` opcode executed without two values on the stack.
    #[error("stack underflow evaluating location expression")]
    StackUnderflow,
    /// The program left zero or more than one value on the stack.
    #[error("location expression did not reduce to exactly one address")]
    NotASingleAddress,
}

/// A location expression: a sequence of [`LocOp`]s that reduce to exactly
/// one address when evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocExpr(pub Vec<LocOp>);

impl LocExpr {
    /// Evaluates the program against `frame_base`, the current value of
    /// the stack base pointer.
    ///
    /// # Errors
    /// Returns [`LocExprError`] if the program underflows the stack or
    /// does not reduce to a single address.
    pub fn evaluate(&self, frame_base: i64) -> Result<u64, LocExprError> {
        let mut stack = Vec::new();
        for op in &self.0 {
            match op {
                LocOp::Push(n) => stack.push(*n),
                LocOp::FrameBaseRegisterOffset(offset) => stack.push(frame_base + offset),
                LocOp::Add => {
                    let b = stack.pop().ok_or(LocExprError::StackUnderflow)?;
                    let a = stack.pop().ok_or(LocExprError::StackUnderflow)?;
                    stack.push(a + b);
                }
            }
        }
        match stack.as_slice() {
            [address] => Ok(*address as u64),
            _ => Err(LocExprError::NotASingleAddress),
        }
    }
}
