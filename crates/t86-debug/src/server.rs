//! In-simulation debug server: services [`Request`]s against a running
//! [`Cpu`].
//!
//! Grounded in the original's in-process debug loop that the simulator's
//! main binary runs when started with `--debug` (`t86-cli/main.cpp`):
//! each request blocks until the CPU either halts, hits a software
//! breakpoint, or (for `Continue`/`SingleStep`) a hardware watchpoint
//! fires. Watchpoints are checked by comparing the watched word's value
//! before and after each tick, since the simulator core has no separate
//! memory-access-trap mechanism (spec §4.11 leaves the detection strategy
//! unspecified; see `DESIGN.md`).

use t86::cpu::{Cpu, HaltReason};
use t86::program::Program;
use t86::ExecutionError;

use crate::native::BreakReason;
use crate::protocol::{Request, Response};

const WATCHPOINT_SLOTS: usize = 4;

fn register_by_name(name: &str) -> Option<t86::common::Register> {
    match name {
        "IP" => Some(t86::common::Register::ProgramCounter),
        "SP" => Some(t86::common::Register::StackPointer),
        "BP" => Some(t86::common::Register::StackBasePointer),
        "FLAGS" => Some(t86::common::Register::Flags),
        _ if name.starts_with('R') => name[1..].parse().ok().map(t86::common::Register::General),
        _ => None,
    }
}

fn float_register_by_name(name: &str) -> Option<t86::common::FloatRegister> {
    name.strip_prefix("FR").and_then(|idx| idx.parse().ok()).map(t86::common::FloatRegister)
}

/// Parses a single `.text` line into an [`t86::instruction::Instruction`],
/// reusing the whole-program assembler rather than duplicating its grammar
/// (spec §4.10, "POKETEXT": instructions are exchanged in the same textual
/// form the simulator parses on startup).
fn parse_one_instruction(text: &str) -> Result<t86::instruction::Instruction, String> {
    let source = format!(".text\n{text}\n");
    let program = t86::parser::parse(&source).map_err(|err| err.to_string())?;
    program.instruction_at(0).ok_or_else(|| "no instruction parsed".to_string())
}

/// Drives a [`Cpu`] on behalf of a connected debugger, tracking software
/// breakpoints (delegated to the CPU) and hardware watchpoints (checked
/// here, since the CPU has no notion of them).
pub struct DebugServer {
    cpu: Cpu,
    watchpoints: [Option<u64>; WATCHPOINT_SLOTS],
}

impl DebugServer {
    /// Creates a server around a CPU with `program` already loaded.
    ///
    /// # Errors
    /// Returns [`ExecutionError`] if the program's data section does not
    /// fit in the configured RAM.
    pub fn new(mut cpu: Cpu, program: Program) -> Result<Self, ExecutionError> {
        cpu.start(program)?;
        Ok(Self {
            cpu,
            watchpoints: [None; WATCHPOINT_SLOTS],
        })
    }

    /// Services one request, blocking (ticking the CPU) as needed for
    /// `Continue`/`SingleStep`.
    pub fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::Continue => self.run_until_stop(None),
            Request::SingleStep => self.run_until_stop(Some(1)),
            Request::SetBreakpoint(addr) => {
                self.cpu.set_software_breakpoint(addr);
                Response::Ok
            }
            Request::ClearBreakpoint(addr) => {
                self.cpu.clear_software_breakpoint(addr);
                Response::Ok
            }
            Request::SetWatchpoint { slot, address } => {
                if (slot as usize) < WATCHPOINT_SLOTS {
                    self.watchpoints[slot as usize] = Some(address);
                    Response::Ok
                } else {
                    Response::Error(format!("invalid watchpoint slot {slot}"))
                }
            }
            Request::ClearWatchpoint { slot } => {
                if let Some(entry) = self.watchpoints.get_mut(slot as usize) {
                    *entry = None;
                    Response::Ok
                } else {
                    Response::Error(format!("invalid watchpoint slot {slot}"))
                }
            }
            Request::ReadRegister(name) => match register_by_name(&name).and_then(|r| self.cpu.read_register(r).ok()) {
                Some(value) => Response::Register(value),
                None => Response::Error(format!("unknown register {name:?}")),
            },
            Request::WriteRegister { register, value } => match register_by_name(&register) {
                Some(reg) => {
                    self.cpu.write_register(reg, value);
                    Response::Ok
                }
                None => Response::Error(format!("unknown register {register:?}")),
            },
            Request::ReadMemory(addr) => match self.cpu.read_memory(addr) {
                Ok(value) => Response::Memory(value),
                Err(err) => Response::Error(err.to_string()),
            },
            Request::WriteMemory { address, value } => match self.cpu.write_memory(address, value) {
                Ok(()) => Response::Ok,
                Err(err) => Response::Error(err.to_string()),
            },
            Request::ReadFloatRegister(name) => match float_register_by_name(&name).and_then(|r| self.cpu.read_float_register(r).ok()) {
                Some(value) => Response::FloatRegister(value),
                None => Response::Error(format!("unknown float register {name:?}")),
            },
            Request::WriteFloatRegister { register, value } => match float_register_by_name(&register) {
                Some(reg) => {
                    self.cpu.write_float_register(reg, value);
                    Response::Ok
                }
                None => Response::Error(format!("unknown float register {register:?}")),
            },
            Request::ReadText { address, count } => {
                let lines = (0..count as u64)
                    .map(|i| match self.cpu.read_text(address + i) {
                        Some(instr) => instr.to_string(),
                        None => String::new(),
                    })
                    .collect();
                Response::Text(lines)
            }
            Request::WriteText { address, instructions } => {
                for (i, text) in instructions.iter().enumerate() {
                    match parse_one_instruction(text) {
                        Ok(instr) => {
                            let _ = self.cpu.write_text(address + i as u64, instr);
                        }
                        Err(err) => return Response::Error(err),
                    }
                }
                Response::Ok
            }
            Request::TextSize => Response::TextSize(self.cpu.text_size()),
            Request::WhyStopped => match self.cpu.halt_reason() {
                Some(HaltReason::Halt) => Response::Stopped(BreakReason::Halted),
                Some(HaltReason::Breakpoint) => Response::Stopped(BreakReason::SoftwareBreakpoint),
                Some(HaltReason::Interrupt(code)) => Response::Stopped(BreakReason::Interrupt(code)),
                None => Response::Stopped(BreakReason::Step),
            },
            Request::Disconnect => Response::Ok,
        }
    }

    fn snapshot_watchpoints(&self) -> [Option<i64>; WATCHPOINT_SLOTS] {
        let mut values = [None; WATCHPOINT_SLOTS];
        for (slot, addr) in self.watchpoints.iter().enumerate() {
            if let Some(addr) = addr {
                values[slot] = self.cpu.read_memory(*addr).ok();
            }
        }
        values
    }

    fn run_until_stop(&mut self, max_instructions: Option<u64>) -> Response {
        let before = self.snapshot_watchpoints();
        let retired_start = self.cpu.stats().retired;
        loop {
            match self.cpu.tick() {
                Ok(_) => {}
                Err(err) => return Response::Error(err.to_string()),
            }

            let after = self.snapshot_watchpoints();
            for (slot, (b, a)) in before.iter().zip(after.iter()).enumerate() {
                if b != a {
                    return Response::Stopped(BreakReason::HardwareWatchpoint { slot: slot as u8 });
                }
            }

            if let Some(reason) = self.cpu.halt_reason() {
                let break_reason = match reason {
                    HaltReason::Halt => BreakReason::Halted,
                    HaltReason::Breakpoint => BreakReason::SoftwareBreakpoint,
                    HaltReason::Interrupt(code) => BreakReason::Interrupt(code),
                };
                return Response::Stopped(break_reason);
            }

            if let Some(limit) = max_instructions {
                let retired_now = self.cpu.stats().retired;
                if retired_now - retired_start >= limit {
                    return Response::Stopped(BreakReason::Step);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use t86::config::Config;
    use t86::instruction::Instruction;
    use t86::operand::Operand;
    use t86::common::Register;

    fn program_with(text: Vec<(u64, Instruction)>) -> Program {
        Program {
            text: text.into_iter().collect(),
            data: vec![],
            entry: 0,
        }
    }

    #[test]
    fn breakpoint_stops_before_executing_the_instruction() {
        let program = program_with(vec![(0, Instruction::Nop), (1, Instruction::Halt)]);
        let mut server = DebugServer::new(Cpu::new(Config::default()), program).unwrap();
        assert_eq!(server.handle(Request::SetBreakpoint(1)), Response::Ok);
        let response = server.handle(Request::Continue);
        assert_eq!(response, Response::Stopped(BreakReason::SoftwareBreakpoint));
    }

    #[test]
    fn read_register_returns_current_value() {
        let program = program_with(vec![
            (0, Instruction::Mov { dst: Register::General(0), src: Operand::Immediate(7) }),
            (1, Instruction::Halt),
        ]);
        let mut server = DebugServer::new(Cpu::new(Config::default()), program).unwrap();
        server.handle(Request::Continue);
        assert_eq!(server.handle(Request::ReadRegister("R0".to_string())), Response::Register(7));
    }

    #[test]
    fn watchpoint_fires_on_value_change() {
        let program = program_with(vec![
            (0, Instruction::Mov { dst: Register::General(0), src: Operand::Immediate(1) }),
            (1, Instruction::Push { src: Operand::register(Register::General(0)) }),
            (2, Instruction::Halt),
        ]);
        let mut server = DebugServer::new(Cpu::new(Config::default()), program).unwrap();
        server.handle(Request::SetWatchpoint { slot: 0, address: 0 });
        let response = server.handle(Request::Continue);
        assert!(matches!(response, Response::Stopped(_)));
    }
}
