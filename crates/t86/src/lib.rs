//! Cycle-accurate superscalar simulator core for the T86 teaching
//! instruction set.
//!
//! This crate owns everything needed to load and run a T86 program:
//! assembly parsing ([`parser`]), the instruction catalogue
//! ([`instruction`]), the out-of-order execution engine
//! ([`reservation_station`], [`rat`], [`ram`], [`writes_manager`],
//! [`branch_predictor`]), and the [`cpu::Cpu`] that drives them tick by
//! tick. The `t86-debug` crate builds a debugger on top of this crate's
//! public API without reaching into its internals.

pub mod alu;
pub mod branch_predictor;
pub mod common;
pub mod config;
pub mod cpu;
pub mod disasm;
pub mod instruction;
pub mod operand;
pub mod os;
pub mod parser;
pub mod program;
pub mod ram;
pub mod rat;
pub mod reservation_station;
pub mod stats;
pub mod writes_manager;

pub use common::ExecutionError;
pub use config::Config;
pub use cpu::{Cpu, HaltReason};
pub use instruction::Instruction;
pub use program::Program;
