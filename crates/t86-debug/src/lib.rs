//! Remote source-level debugger control plane for the T86 simulator.
//!
//! Grounded in the original's `t86/debugger` tree: [`channel`]/[`protocol`]
//! implement the wire transport between a debug server embedded in the
//! simulator process and a native client; [`native`] is that client;
//! [`server`] is the in-simulation side driving a [`t86::cpu::Cpu`]; and
//! [`source`] layers source-level debug info (DIEs, types, location
//! expressions, and a watch/print expression evaluator) on top of both.

/// Transport abstraction between debugger and simulator.
pub mod channel;
/// Client-side debugger operations (breakpoints, stepping, registers).
pub mod native;
/// Length-prefixed JSON wire protocol.
pub mod protocol;
/// In-simulation request handler driving a live [`t86::cpu::Cpu`].
pub mod server;
/// Debug info: DIE tree, types, location expressions, and expression
/// evaluation over live machine state.
pub mod source;

pub use native::{BreakReason, DebugEvent, DebuggerError, Native};
pub use server::DebugServer;
