//! Wire protocol between the in-simulation debug server and the native
//! debugger client.
//!
//! Grounded in `t86/common/TCP.h`: every message is a UTF-8 text frame
//! prefixed by an 8-byte little-endian length. The original multiplexes a
//! handful of line-oriented commands over raw sockets; this module keeps
//! the same framing but gives each message a typed Rust shape instead of
//! hand-parsed strings, serialized with `serde_json` for forward
//! compatibility (spec §4.10, "Wire protocol").

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::native::BreakReason;

/// A failure reading or writing a protocol frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying channel failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A frame's payload was not valid JSON for the expected message type.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A frame's declared length exceeded the configured maximum.
    #[error("frame length {0} exceeds maximum {1}")]
    TooLarge(u64, u64),
}

/// Maximum frame payload size accepted, guarding against a corrupt length
/// prefix causing an unbounded allocation.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// A request sent from the native client to the debug server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Resume execution until the next break.
    Continue,
    /// Execute exactly one instruction.
    SingleStep,
    /// Install a software breakpoint at an address.
    SetBreakpoint(u64),
    /// Remove a software breakpoint.
    ClearBreakpoint(u64),
    /// Arm a hardware watchpoint in one of the four debug-register slots.
    SetWatchpoint { slot: u8, address: u64 },
    /// Disarm a hardware watchpoint slot.
    ClearWatchpoint { slot: u8 },
    /// Read a logical register's current value.
    ReadRegister(String),
    /// Write a logical register.
    WriteRegister { register: String, value: i64 },
    /// Read one word of memory.
    ReadMemory(u64),
    /// Write one word of memory.
    WriteMemory { address: u64, value: i64 },
    /// Read a floating-point register's current value.
    ReadFloatRegister(String),
    /// Write a floating-point register.
    WriteFloatRegister { register: String, value: f64 },
    /// Read `count` instructions of program text starting at `address`,
    /// in their textual `.text` form (spec §4.10, "PEEKTEXT").
    ReadText { address: u64, count: usize },
    /// Replace program text starting at `address` with `instructions`,
    /// parsed from their textual `.text` form (spec §4.10, "POKETEXT").
    WriteText { address: u64, instructions: Vec<String> },
    /// Ask for the size of the loaded program's text segment.
    TextSize,
    /// Ask the server to report why it last stopped.
    WhyStopped,
    /// Close the debug session.
    Disconnect,
}

/// A response sent from the debug server back to the native client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Acknowledges a state-changing request with no payload.
    Ok,
    /// The CPU stopped, with the reason.
    Stopped(BreakReason),
    /// A register's value.
    Register(i64),
    /// A floating-point register's value.
    FloatRegister(f64),
    /// A memory word's value.
    Memory(i64),
    /// Program text, each entry in its textual `.text` form.
    Text(Vec<String>),
    /// The loaded program's text-segment size, in instructions.
    TextSize(usize),
    /// An error occurred servicing the request.
    Error(String),
}

/// Reads one length-prefixed JSON frame from `reader`.
///
/// # Errors
/// Returns [`ProtocolError::Io`] on a read failure, [`ProtocolError::TooLarge`]
/// if the declared length exceeds [`MAX_FRAME_LEN`], or
/// [`ProtocolError::Malformed`] if the payload does not deserialize to `T`.
pub fn read_frame<T: for<'de> Deserialize<'de>>(mut reader: impl Read) -> Result<T, ProtocolError> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::TooLarge(len, MAX_FRAME_LEN));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Writes `value` as one length-prefixed JSON frame to `writer`.
///
/// # Errors
/// Returns [`ProtocolError::Io`] on a write failure.
pub fn write_frame<T: Serialize>(mut writer: impl Write, value: &T) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(value)?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Request::SetBreakpoint(42)).unwrap();
        let decoded: Request = read_frame(buf.as_slice()).unwrap();
        assert_eq!(decoded, Request::SetBreakpoint(42));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        let result: Result<Request, _> = read_frame(buf.as_slice());
        assert!(matches!(result, Err(ProtocolError::TooLarge(_, _))));
    }
}
