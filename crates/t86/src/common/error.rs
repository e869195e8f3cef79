//! Execution-failure taxonomy.
//!
//! Spec §7 distinguishes three kinds of failure; this module implements the
//! second kind, execution failures, raised synchronously from
//! [`crate::cpu::Cpu::tick`] and surfaced by the OS as a `CpuError` break
//! reason. Parse failures live in [`crate::parser`]; debugger failures live
//! in the `t86-debug` crate.

use thiserror::Error;

/// A fatal failure raised synchronously during instruction execution.
///
/// Every variant corresponds to a case spec §7 calls out explicitly:
/// division/modulus by zero, an unhandled interrupt code, or an attempt to
/// modify a special register through ordinary arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Division or modulus by zero in the ALU.
    #[error("division by zero")]
    DivisionByZero,
    /// The interrupt register held a code with no registered handler.
    #[error("unhandled interrupt code {0}")]
    UnhandledInterrupt(u8),
    /// An ordinary arithmetic instruction tried to target a special
    /// register (PC, SP, BP, Flags), which may only be modified through
    /// dedicated instructions.
    #[error("cannot write special register {0} via ordinary arithmetic")]
    InvalidSpecialWrite(crate::common::Register),
    /// A register index fell outside the configured register count.
    #[error("register index {0} out of bounds (count = {1})")]
    RegisterOutOfBounds(usize, usize),
    /// A memory address fell outside the configured RAM size.
    #[error("memory address {0:#x} out of bounds (size = {1})")]
    MemoryOutOfBounds(u64, usize),
    /// No free physical register could be found; a hard configuration error
    /// (too few physical registers for the reservation-station capacity),
    /// never a speculative-execution bug.
    #[error("no free physical register available (misconfigured register count)")]
    NoFreeRegister,
}
