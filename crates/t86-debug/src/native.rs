//! Native debugger client: breakpoint/watchpoint bookkeeping and
//! step operations.
//!
//! Grounded in the original debugger's `Native` class (referenced from
//! `t86/debugger/Source/*` and the CLI's debug mode): the piece that talks
//! the wire protocol to the running simulator and exposes step/step-over/
//! step-out as client-side compositions of `SingleStep` and temporary
//! breakpoints, since the server only understands single-step and
//! breakpoint primitives (spec §4.12, "Stepping").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::Channel;
use crate::protocol::{ProtocolError, Request, Response};

/// Why the simulator most recently stopped (spec §4.11, "Break reasons").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakReason {
    /// A software breakpoint (`BREAK` instruction, or a `SetBreakpoint`
    /// substitution) was hit.
    SoftwareBreakpoint,
    /// A hardware watchpoint fired: the monitored address was read or
    /// written.
    HardwareWatchpoint { slot: u8 },
    /// `SingleStep` completed exactly one instruction.
    Step,
    /// The program halted.
    Halted,
    /// An unhandled interrupt occurred.
    Interrupt(u8),
}

/// The event [`Native::wait_for_debug_event`] (and, incidentally,
/// [`Native::continue_execution`]/[`Native::single_step`]) resolves a stop
/// to, widening the wire-level [`BreakReason`] with the one event the wire
/// protocol never sends: [`Self::ExecutionBegin`], synthesized locally the
/// first time a session asks (spec §4.11, "WaitForDebugEvent").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// The very first event a session observes, before anything has run.
    ExecutionBegin,
    /// A software breakpoint was hit. By the time this is returned, PC has
    /// already been rewound to the breakpoint's address and the original
    /// instruction restored there (spec §4.11).
    SoftwareBreakpoint,
    /// A hardware watchpoint fired, naming its DR0-DR3 slot.
    HardwareBreakpoint(u8),
    /// `SingleStep`/`ContinueExecution` completed exactly one instruction.
    SingleStep,
    /// The program halted.
    Halt,
    /// The simulator reported an execution error (e.g. an unhandled
    /// interrupt) rather than a normal stop.
    CpuError(String),
}

impl From<BreakReason> for DebugEvent {
    fn from(reason: BreakReason) -> Self {
        match reason {
            BreakReason::SoftwareBreakpoint => Self::SoftwareBreakpoint,
            BreakReason::HardwareWatchpoint { slot } => Self::HardwareBreakpoint(slot),
            BreakReason::Step => Self::SingleStep,
            BreakReason::Halted => Self::Halt,
            BreakReason::Interrupt(code) => Self::CpuError(format!("unhandled interrupt {code}")),
        }
    }
}

/// A failure in the native debugger client.
#[derive(Debug, Error)]
pub enum DebuggerError {
    /// The transport or protocol layer failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The server reported an error servicing a request.
    #[error("server error: {0}")]
    Server(String),
    /// The server's response did not match what the request expected.
    #[error("unexpected response to {request:?}: {response:?}")]
    UnexpectedResponse { request: Request, response: Response },
    /// All four hardware watchpoint slots (DR0-DR3) are already in use.
    #[error("no free watchpoint slot")]
    NoFreeWatchpointSlot,
    /// `EnableSoftwareBreakpoint`/`DisableSoftwareBreakpoint` was called on
    /// an address not currently in the state the operation requires (spec
    /// §4.11, "Breakpoint state machine").
    #[error("breakpoint at {0:#x} is not in a state that operation allows")]
    InvalidBreakpointState(u64),
}

/// The four hardware watchpoint slots modeled after x86's DR0-DR3,
/// addressed 0-3 with DR7 enable bits tracked alongside (spec §4.11).
const WATCHPOINT_SLOTS: u8 = 4;

/// A tracked software breakpoint's place in the four-state lifecycle (spec
/// §4.11, "Breakpoint state machine"). `absent` is not represented here —
/// it is simply the address not being a key in [`Native::software_breakpoints`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakpointState {
    /// The address's text currently holds `BKPT`; `original_instruction` is
    /// held server-side and restored on disable/unset.
    Enabled,
    /// The original instruction has been restored in text; the debugger
    /// still remembers the address so `EnableSoftwareBreakpoint` can
    /// re-arm it without the caller re-supplying the address.
    Disabled,
}

/// Client-side debugger state layered over a [`Channel`].
#[derive(Debug)]
pub struct Native<C: Channel> {
    channel: C,
    software_breakpoints: HashMap<u64, BreakpointState>,
    watchpoint_slots: [Option<u64>; WATCHPOINT_SLOTS as usize],
    /// An address whose `BKPT` was swapped back out for the original
    /// instruction by [`Self::rewind_after_breakpoint`] and must be
    /// re-armed (one single-step, then re-write `BKPT`) before execution
    /// resumes (spec §4.11, "ContinueExecution").
    pending_reenable: Option<u64>,
    /// Whether [`Self::wait_for_debug_event`] has already reported
    /// `ExecutionBegin` for this session.
    execution_begun: bool,
}

impl<C: Channel> Native<C> {
    /// Wraps an already-connected channel.
    pub const fn new(channel: C) -> Self {
        Self {
            channel,
            software_breakpoints: HashMap::new(),
            watchpoint_slots: [None; WATCHPOINT_SLOTS as usize],
            pending_reenable: None,
            execution_begun: false,
        }
    }

    fn request(&mut self, request: Request) -> Result<Response, DebuggerError> {
        self.channel.send(&request)?;
        Ok(self.channel.receive()?)
    }

    /// Sends `SetBreakpoint`, without touching [`Self::software_breakpoints`].
    fn send_set_breakpoint(&mut self, address: u64) -> Result<(), DebuggerError> {
        match self.request(Request::SetBreakpoint(address))? {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::SetBreakpoint(address), response }),
        }
    }

    /// Sends `ClearBreakpoint` (restoring the original instruction in
    /// text), without touching [`Self::software_breakpoints`].
    fn send_clear_breakpoint(&mut self, address: u64) -> Result<(), DebuggerError> {
        match self.request(Request::ClearBreakpoint(address))? {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::ClearBreakpoint(address), response }),
        }
    }

    /// Installs a software breakpoint at `address`: `absent`/`disabled` →
    /// `enabled`.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn set_breakpoint(&mut self, address: u64) -> Result<(), DebuggerError> {
        self.send_set_breakpoint(address)?;
        self.software_breakpoints.insert(address, BreakpointState::Enabled);
        Ok(())
    }

    /// Removes a software breakpoint entirely: `enabled`/`disabled` →
    /// `absent`.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn unset_breakpoint(&mut self, address: u64) -> Result<(), DebuggerError> {
        self.send_clear_breakpoint(address)?;
        self.software_breakpoints.remove(&address);
        if self.pending_reenable == Some(address) {
            self.pending_reenable = None;
        }
        Ok(())
    }

    /// Re-arms a breakpoint the debugger previously disabled: `disabled` →
    /// `enabled`.
    ///
    /// # Errors
    /// Returns [`DebuggerError::InvalidBreakpointState`] if `address` is
    /// not currently tracked as `disabled`, or a server/protocol error.
    pub fn enable_software_breakpoint(&mut self, address: u64) -> Result<(), DebuggerError> {
        match self.software_breakpoints.get(&address) {
            Some(BreakpointState::Disabled) => {
                self.send_set_breakpoint(address)?;
                self.software_breakpoints.insert(address, BreakpointState::Enabled);
                Ok(())
            }
            _ => Err(DebuggerError::InvalidBreakpointState(address)),
        }
    }

    /// Restores the original instruction at a breakpoint without
    /// forgetting it: `enabled` → `disabled`.
    ///
    /// # Errors
    /// Returns [`DebuggerError::InvalidBreakpointState`] if `address` is
    /// not currently tracked as `enabled`, or a server/protocol error.
    pub fn disable_software_breakpoint(&mut self, address: u64) -> Result<(), DebuggerError> {
        match self.software_breakpoints.get(&address) {
            Some(BreakpointState::Enabled) => {
                self.send_clear_breakpoint(address)?;
                self.software_breakpoints.insert(address, BreakpointState::Disabled);
                Ok(())
            }
            _ => Err(DebuggerError::InvalidBreakpointState(address)),
        }
    }

    /// Arms a hardware watchpoint on `address`, allocating the first free
    /// of the four slots.
    ///
    /// # Errors
    /// Returns [`DebuggerError::NoFreeWatchpointSlot`] if all four slots
    /// are occupied, or a server/protocol error.
    pub fn set_watchpoint(&mut self, address: u64) -> Result<u8, DebuggerError> {
        let slot = self
            .watchpoint_slots
            .iter()
            .position(Option::is_none)
            .ok_or(DebuggerError::NoFreeWatchpointSlot)? as u8;
        match self.request(Request::SetWatchpoint { slot, address })? {
            Response::Ok => {
                self.watchpoint_slots[slot as usize] = Some(address);
                Ok(slot)
            }
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse {
                request: Request::SetWatchpoint { slot, address },
                response,
            }),
        }
    }

    /// Disarms watchpoint `slot`.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn clear_watchpoint(&mut self, slot: u8) -> Result<(), DebuggerError> {
        match self.request(Request::ClearWatchpoint { slot })? {
            Response::Ok => {
                if let Some(entry) = self.watchpoint_slots.get_mut(slot as usize) {
                    *entry = None;
                }
                Ok(())
            }
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::ClearWatchpoint { slot }, response }),
        }
    }

    /// Rewinds PC by one past a just-hit `BKPT` and restores the original
    /// instruction at that address, so a subsequent `ContinueExecution`
    /// makes progress instead of hitting the same breakpoint immediately
    /// (spec §4.11, "WaitForDebugEvent"). A no-op if the address at the
    /// rewound PC is not a breakpoint this client tracks as `enabled` —
    /// e.g. a literal `BREAK` instruction baked into the program, which
    /// this client never installed and has no original instruction to
    /// restore.
    fn rewind_after_breakpoint(&mut self) -> Result<(), DebuggerError> {
        let pc = self.get_ip()?;
        let address = pc.wrapping_sub(1);
        self.set_ip(address)?;
        if self.software_breakpoints.get(&address) == Some(&BreakpointState::Enabled) {
            self.send_clear_breakpoint(address)?;
            self.pending_reenable = Some(address);
        }
        Ok(())
    }

    /// If a breakpoint is pending re-enable, performs the atomic
    /// single-step + re-write `BKPT` that restores the invariant "every
    /// breakpoint tracked as `enabled` is currently `BKPT` in text" before
    /// execution is allowed to resume (spec §4.11, "ContinueExecution").
    fn reenable_pending_breakpoint(&mut self) -> Result<(), DebuggerError> {
        if let Some(address) = self.pending_reenable.take() {
            match self.request(Request::SingleStep)? {
                Response::Stopped(_) => {}
                Response::Error(msg) => return Err(DebuggerError::Server(msg)),
                response => return Err(DebuggerError::UnexpectedResponse { request: Request::SingleStep, response }),
            }
            self.send_set_breakpoint(address)?;
        }
        Ok(())
    }

    /// Blocks until the simulator reports a stop, returning the resolved
    /// [`DebugEvent`]. The first call on a session synthesizes
    /// `ExecutionBegin` locally rather than round-tripping the channel,
    /// since nothing has run yet for the server to report on.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn wait_for_debug_event(&mut self) -> Result<DebugEvent, DebuggerError> {
        if !self.execution_begun {
            self.execution_begun = true;
            return Ok(DebugEvent::ExecutionBegin);
        }
        match self.request(Request::WhyStopped)? {
            Response::Stopped(reason) => {
                let event = DebugEvent::from(reason);
                if event == DebugEvent::SoftwareBreakpoint {
                    self.rewind_after_breakpoint()?;
                }
                Ok(event)
            }
            Response::Error(msg) => Ok(DebugEvent::CpuError(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::WhyStopped, response }),
        }
    }

    /// Resumes execution until the next break, first re-arming any
    /// breakpoint left pending-re-enable by a prior stop.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn continue_execution(&mut self) -> Result<DebugEvent, DebuggerError> {
        self.reenable_pending_breakpoint()?;
        match self.request(Request::Continue)? {
            Response::Stopped(reason) => {
                let event = DebugEvent::from(reason);
                if event == DebugEvent::SoftwareBreakpoint {
                    self.rewind_after_breakpoint()?;
                }
                Ok(event)
            }
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::Continue, response }),
        }
    }

    /// Executes exactly one instruction ("step into"), first re-arming any
    /// breakpoint left pending-re-enable by a prior stop.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn single_step(&mut self) -> Result<DebugEvent, DebuggerError> {
        self.reenable_pending_breakpoint()?;
        match self.request(Request::SingleStep)? {
            Response::Stopped(reason) => {
                let event = DebugEvent::from(reason);
                if event == DebugEvent::SoftwareBreakpoint {
                    self.rewind_after_breakpoint()?;
                }
                Ok(event)
            }
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::SingleStep, response }),
        }
    }

    /// Steps over the current instruction: identical to [`Self::single_step`]
    /// unless the instruction about to execute is a `CALL`, in which case a
    /// temporary breakpoint is set at `return_address` (the instruction
    /// immediately after the call, which the caller determines from
    /// disassembly) and execution resumes until that breakpoint, swallowing
    /// any software breakpoints already installed inside the callee
    /// (spec §4.12: "step-over does not stop on breakpoints hit inside the
    /// callee" is an explicit Open Question — see `DESIGN.md`, resolved in
    /// favor of NOT swallowing them, matching the original's behavior of
    /// treating any stop inside the call as a real stop).
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects any request issued.
    pub fn step_over(&mut self, is_call: bool, return_address: u64) -> Result<DebugEvent, DebuggerError> {
        if !is_call {
            return self.single_step();
        }
        let already_set = self.software_breakpoints.contains_key(&return_address);
        if !already_set {
            self.set_breakpoint(return_address)?;
        }
        let event = self.continue_execution()?;
        if !already_set {
            self.unset_breakpoint(return_address)?;
        }
        Ok(event)
    }

    /// Steps out of the current function: resumes execution until
    /// `return_address` (the caller-supplied return address read off the
    /// stack) is reached, same mechanism as [`Self::step_over`].
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects any request issued.
    pub fn step_out(&mut self, return_address: u64) -> Result<DebugEvent, DebuggerError> {
        let already_set = self.software_breakpoints.contains_key(&return_address);
        if !already_set {
            self.set_breakpoint(return_address)?;
        }
        let event = self.continue_execution()?;
        if !already_set {
            self.unset_breakpoint(return_address)?;
        }
        Ok(event)
    }

    /// Reads a logical register by name (e.g. `"R0"`, `"IP"`).
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn read_register(&mut self, name: &str) -> Result<i64, DebuggerError> {
        match self.request(Request::ReadRegister(name.to_string()))? {
            Response::Register(value) => Ok(value),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse {
                request: Request::ReadRegister(name.to_string()),
                response,
            }),
        }
    }

    /// Writes a logical register by name.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn write_register(&mut self, name: &str, value: i64) -> Result<(), DebuggerError> {
        let request = Request::WriteRegister { register: name.to_string(), value };
        match self.request(request.clone())? {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request, response }),
        }
    }

    /// Reads one word of memory.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn read_memory(&mut self, address: u64) -> Result<i64, DebuggerError> {
        match self.request(Request::ReadMemory(address))? {
            Response::Memory(value) => Ok(value),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::ReadMemory(address), response }),
        }
    }

    /// Writes one word of memory.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn write_memory(&mut self, address: u64, value: i64) -> Result<(), DebuggerError> {
        let request = Request::WriteMemory { address, value };
        match self.request(request.clone())? {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request, response }),
        }
    }

    /// Reads a floating-point register by name (e.g. `"FR0"`).
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn read_float_register(&mut self, name: &str) -> Result<f64, DebuggerError> {
        match self.request(Request::ReadFloatRegister(name.to_string()))? {
            Response::FloatRegister(value) => Ok(value),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse {
                request: Request::ReadFloatRegister(name.to_string()),
                response,
            }),
        }
    }

    /// Writes a floating-point register by name.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn write_float_register(&mut self, name: &str, value: f64) -> Result<(), DebuggerError> {
        let request = Request::WriteFloatRegister { register: name.to_string(), value };
        match self.request(request.clone())? {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request, response }),
        }
    }

    /// Reads the instruction pointer (a thin wrapper over
    /// [`Self::read_register`] for callers that only track control flow).
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn get_ip(&mut self) -> Result<u64, DebuggerError> {
        self.read_register("IP").map(|v| v as u64)
    }

    /// Sets the instruction pointer.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn set_ip(&mut self, address: u64) -> Result<(), DebuggerError> {
        self.write_register("IP", address as i64)
    }

    /// Reads `count` instructions of program text starting at `address`,
    /// in their textual `.text` form (spec §4.11, "ReadText").
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn read_text(&mut self, address: u64, count: usize) -> Result<Vec<String>, DebuggerError> {
        let request = Request::ReadText { address, count };
        match self.request(request.clone())? {
            Response::Text(lines) => Ok(lines),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request, response }),
        }
    }

    /// Replaces program text starting at `address` with `instructions`,
    /// each given in their textual `.text` form (spec §4.11, "WriteText").
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn write_text(&mut self, address: u64, instructions: Vec<String>) -> Result<(), DebuggerError> {
        let request = Request::WriteText { address, instructions };
        match self.request(request.clone())? {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request, response }),
        }
    }

    /// Size of the loaded program's text segment, in instructions
    /// (spec §4.11, "TextSize").
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn text_size(&mut self) -> Result<usize, DebuggerError> {
        match self.request(Request::TextSize)? {
            Response::TextSize(size) => Ok(size),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::TextSize, response }),
        }
    }

    /// Closes the session.
    ///
    /// # Errors
    /// Returns [`DebuggerError`] if the server rejects the request.
    pub fn disconnect(&mut self) -> Result<(), DebuggerError> {
        match self.request(Request::Disconnect)? {
            Response::Ok => Ok(()),
            Response::Error(msg) => Err(DebuggerError::Server(msg)),
            response => Err(DebuggerError::UnexpectedResponse { request: Request::Disconnect, response }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InMemoryChannel;

    /// Queues `responses` to be returned, in order, one per request the
    /// client under test sends — standing in for a debug server without
    /// driving a real `Cpu` or socket.
    fn scripted_client(responses: impl IntoIterator<Item = Response>) -> Native<InMemoryChannel> {
        let mut server = InMemoryChannel::new();
        let mut client = InMemoryChannel::new();
        for response in responses {
            server.send(&response).unwrap();
        }
        server.deliver_to(&mut client);
        Native::new(client)
    }

    #[test]
    fn set_breakpoint_then_unset_round_trips() {
        let mut native = scripted_client([Response::Ok, Response::Ok]);
        native.set_breakpoint(10).unwrap();
        assert_eq!(native.software_breakpoints.get(&10), Some(&BreakpointState::Enabled));
        native.unset_breakpoint(10).unwrap();
        assert!(!native.software_breakpoints.contains_key(&10));
    }

    #[test]
    fn disable_then_enable_round_trips_through_the_disabled_state() {
        let mut native = scripted_client([Response::Ok, Response::Ok, Response::Ok]);
        native.set_breakpoint(10).unwrap();
        native.disable_software_breakpoint(10).unwrap();
        assert_eq!(native.software_breakpoints.get(&10), Some(&BreakpointState::Disabled));
        native.enable_software_breakpoint(10).unwrap();
        assert_eq!(native.software_breakpoints.get(&10), Some(&BreakpointState::Enabled));
    }

    #[test]
    fn enabling_an_address_that_is_not_disabled_is_an_invalid_state_error() {
        let mut native = scripted_client([Response::Ok]);
        native.set_breakpoint(10).unwrap();
        assert!(matches!(native.enable_software_breakpoint(10), Err(DebuggerError::InvalidBreakpointState(10))));
    }

    #[test]
    fn disabling_an_address_that_is_not_enabled_is_an_invalid_state_error() {
        let mut native = scripted_client([]);
        assert!(matches!(native.disable_software_breakpoint(10), Err(DebuggerError::InvalidBreakpointState(10))));
    }

    #[test]
    fn wait_for_debug_event_first_call_synthesizes_execution_begin() {
        let mut native = scripted_client([]);
        assert_eq!(native.wait_for_debug_event().unwrap(), DebugEvent::ExecutionBegin);
    }

    #[test]
    fn wait_for_debug_event_rewinds_pc_and_restores_text_on_breakpoint() {
        let mut native = scripted_client([
            Response::Stopped(BreakReason::SoftwareBreakpoint), // WhyStopped
            Response::Register(11),                             // ReadRegister IP
            Response::Ok,                                        // WriteRegister IP := 10
            Response::Ok,                                        // ClearBreakpoint(10), restoring the original instruction
        ]);
        native.execution_begun = true;
        native.software_breakpoints.insert(10, BreakpointState::Enabled);
        let event = native.wait_for_debug_event().unwrap();
        assert_eq!(event, DebugEvent::SoftwareBreakpoint);
        assert_eq!(native.pending_reenable, Some(10));
    }

    #[test]
    fn wait_for_debug_event_on_an_untracked_breakpoint_only_rewinds_pc() {
        // A literal BREAK instruction in the program text, not one this
        // client installed: PC still rewinds, but there is no original
        // instruction of ours to restore.
        let mut native = scripted_client([
            Response::Stopped(BreakReason::SoftwareBreakpoint),
            Response::Register(6),
            Response::Ok,
        ]);
        native.execution_begun = true;
        let event = native.wait_for_debug_event().unwrap();
        assert_eq!(event, DebugEvent::SoftwareBreakpoint);
        assert_eq!(native.pending_reenable, None);
    }

    #[test]
    fn continue_execution_reenables_a_pending_breakpoint_before_resuming() {
        let mut native = scripted_client([
            Response::Stopped(BreakReason::Step), // the atomic single-step re-arm
            Response::Ok,                         // SetBreakpoint(10), re-writing BKPT
            Response::Stopped(BreakReason::Halted),
        ]);
        native.pending_reenable = Some(10);
        native.software_breakpoints.insert(10, BreakpointState::Enabled);
        let event = native.continue_execution().unwrap();
        assert_eq!(event, DebugEvent::Halt);
        assert_eq!(native.pending_reenable, None);
    }

    #[test]
    fn halt_event_converts_from_break_reason() {
        let mut native = scripted_client([Response::Stopped(BreakReason::Halted)]);
        assert_eq!(native.continue_execution().unwrap(), DebugEvent::Halt);
    }

    #[test]
    fn hardware_watchpoint_converts_to_an_indexed_debug_event() {
        let mut native = scripted_client([Response::Stopped(BreakReason::HardwareWatchpoint { slot: 2 })]);
        assert_eq!(native.continue_execution().unwrap(), DebugEvent::HardwareBreakpoint(2));
    }

    #[test]
    fn interrupt_converts_to_a_cpu_error_event() {
        let mut native = scripted_client([Response::Stopped(BreakReason::Interrupt(7))]);
        assert_eq!(native.continue_execution().unwrap(), DebugEvent::CpuError("unhandled interrupt 7".to_string()));
    }

    #[test]
    fn server_error_surfaces_as_debugger_error_server() {
        let mut native = scripted_client([Response::Error("no such address".to_string())]);
        let err = native.set_breakpoint(10).unwrap_err();
        assert!(matches!(err, DebuggerError::Server(msg) if msg == "no such address"));
    }

    #[test]
    fn unexpected_response_kind_is_reported() {
        let mut native = scripted_client([Response::TextSize(0)]);
        let err = native.set_breakpoint(10).unwrap_err();
        assert!(matches!(err, DebuggerError::UnexpectedResponse { .. }));
    }

    #[test]
    fn watchpoint_allocates_slots_in_order_and_exhausts_after_four() {
        let mut native = scripted_client([Response::Ok, Response::Ok, Response::Ok, Response::Ok]);
        assert_eq!(native.set_watchpoint(100).unwrap(), 0);
        assert_eq!(native.set_watchpoint(200).unwrap(), 1);
        assert_eq!(native.set_watchpoint(300).unwrap(), 2);
        assert_eq!(native.set_watchpoint(400).unwrap(), 3);
        assert!(matches!(native.set_watchpoint(500), Err(DebuggerError::NoFreeWatchpointSlot)));
    }

    #[test]
    fn clearing_a_watchpoint_frees_its_slot_for_reuse() {
        let mut native = scripted_client([Response::Ok, Response::Ok, Response::Ok]);
        let slot = native.set_watchpoint(100).unwrap();
        native.clear_watchpoint(slot).unwrap();
        assert_eq!(native.set_watchpoint(200).unwrap(), slot);
    }

    #[test]
    fn single_step_returns_the_resolved_debug_event() {
        let mut native = scripted_client([Response::Stopped(BreakReason::Step)]);
        assert_eq!(native.single_step().unwrap(), DebugEvent::SingleStep);
    }

    #[test]
    fn step_over_a_non_call_is_a_plain_single_step() {
        let mut native = scripted_client([Response::Stopped(BreakReason::Step)]);
        let event = native.step_over(false, 0xdead).unwrap();
        assert_eq!(event, DebugEvent::SingleStep);
        assert!(native.software_breakpoints.is_empty());
    }

    #[test]
    fn step_over_a_call_plants_and_clears_a_temporary_breakpoint() {
        let mut native = scripted_client([
            Response::Ok,                                        // SetBreakpoint(0x20)
            Response::Stopped(BreakReason::SoftwareBreakpoint),  // Continue
            Response::Register(0x21),                            // ReadRegister IP (rewind)
            Response::Ok,                                        // WriteRegister IP := 0x20
            Response::Ok,                                        // ClearBreakpoint(0x20), rewind's restore
            Response::Ok,                                        // ClearBreakpoint(0x20), final unset
        ]);
        let event = native.step_over(true, 0x20).unwrap();
        assert_eq!(event, DebugEvent::SoftwareBreakpoint);
        assert!(!native.software_breakpoints.contains_key(&0x20));
    }

    #[test]
    fn step_over_a_call_leaves_a_preexisting_breakpoint_at_the_return_address_installed() {
        let mut native = scripted_client([
            Response::Stopped(BreakReason::SoftwareBreakpoint), // Continue
            Response::Register(0x21),                            // ReadRegister IP (rewind)
            Response::Ok,                                        // WriteRegister IP := 0x20
            Response::Ok,                                        // ClearBreakpoint(0x20), rewind's restore
        ]);
        native.software_breakpoints.insert(0x20, BreakpointState::Enabled);
        let event = native.step_over(true, 0x20).unwrap();
        assert_eq!(event, DebugEvent::SoftwareBreakpoint);
        assert!(native.software_breakpoints.contains_key(&0x20));
    }

    #[test]
    fn step_out_resumes_until_the_return_address_then_clears_its_breakpoint() {
        let mut native = scripted_client([
            Response::Ok,                                        // SetBreakpoint(0x40)
            Response::Stopped(BreakReason::SoftwareBreakpoint),  // Continue
            Response::Register(0x41),                            // ReadRegister IP (rewind)
            Response::Ok,                                        // WriteRegister IP := 0x40
            Response::Ok,                                        // ClearBreakpoint(0x40), rewind's restore
            Response::Ok,                                        // ClearBreakpoint(0x40), final unset
        ]);
        let event = native.step_out(0x40).unwrap();
        assert_eq!(event, DebugEvent::SoftwareBreakpoint);
        assert!(!native.software_breakpoints.contains_key(&0x40));
    }

    #[test]
    fn get_ip_reads_the_ip_register_as_unsigned() {
        let mut native = scripted_client([Response::Register(256)]);
        assert_eq!(native.get_ip().unwrap(), 256);
    }

    #[test]
    fn read_and_write_memory_round_trip() {
        let mut native = scripted_client([Response::Ok, Response::Memory(99)]);
        native.write_memory(8, 99).unwrap();
        assert_eq!(native.read_memory(8).unwrap(), 99);
    }

    #[test]
    fn disconnect_acknowledges() {
        let mut native = scripted_client([Response::Ok]);
        native.disconnect().unwrap();
    }
}
