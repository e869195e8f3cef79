//! Host-facing run loop: wires console I/O to a [`Cpu`] and runs it to
//! completion.
//!
//! Grounded in `t86-cli/main.cpp`'s non-debug run path, which ticks the
//! CPU in a loop, forwards `PUTCHAR`/`PUTNUM` output to standard out, and
//! blocks on standard input for `GETCHAR`. Kept separate from [`Cpu`]
//! itself so the debug server (`t86-debug`) can drive the same `Cpu`
//! without going through this loop.

use std::io::{self, Read, Write};

use crate::cpu::{Cpu, HaltReason};
use crate::program::Program;
use crate::ExecutionError;

/// Outcome of running a program to completion outside the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The program executed a `HALT`.
    Halted,
    /// The program hit a `BREAK` with no debugger attached; treated as a
    /// clean stop since there is nothing to resume it (spec §4.14).
    Breakpoint,
    /// An unhandled interrupt code was raised.
    Interrupt(u8),
}

/// Drives `cpu` to completion, writing console output to `out` and
/// reading `GETCHAR` input from `in_`.
///
/// # Errors
/// Propagates any [`ExecutionError`] raised during execution.
pub fn run(cpu: &mut Cpu, mut out: impl Write, mut in_: impl Read) -> Result<RunOutcome, ExecutionError> {
    loop {
        let activity = cpu.tick()?;
        for c in activity.output {
            let mut buf = [0u8; 4];
            let _ = out.write_all(c.encode_utf8(&mut buf).as_bytes());
        }
        if activity.awaiting_input {
            let mut byte = [0u8; 1];
            if in_.read_exact(&mut byte).is_ok() {
                cpu.feed_input(i64::from(byte[0]));
            } else {
                cpu.feed_input(-1);
            }
        }
        if let Some(reason) = cpu.halt_reason() {
            if cpu.is_drained() {
                let _ = out.flush();
                let outcome = match reason {
                    HaltReason::Halt => RunOutcome::Halted,
                    HaltReason::Breakpoint => RunOutcome::Breakpoint,
                    HaltReason::Interrupt(code) => RunOutcome::Interrupt(code),
                };
                tracing::info!(?outcome, stats = ?cpu.stats(), "run finished");
                return Ok(outcome);
            }
        }
    }
}

/// Convenience wrapper over [`run`] using real standard I/O, as used by
/// the CLI's non-debug mode.
///
/// # Errors
/// Propagates any [`ExecutionError`] raised during execution.
pub fn run_with_stdio(cpu: &mut Cpu, program: Program) -> Result<RunOutcome, ExecutionError> {
    cpu.start(program)?;
    run(cpu, io::stdout(), io::stdin())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::instruction::Instruction;
    use crate::operand::Operand;

    fn program_with(text: Vec<(u64, Instruction)>) -> Program {
        Program {
            text: text.into_iter().collect(),
            data: vec![],
            entry: 0,
        }
    }

    #[test]
    fn run_reports_halted_and_flushes_output() {
        let mut cpu = Cpu::new(Config::default());
        cpu.start(program_with(vec![
            (0, Instruction::Putchar { src: Operand::Immediate('!' as i64) }),
            (1, Instruction::Halt),
        ]))
        .unwrap();
        let mut out = Vec::new();
        let outcome = run(&mut cpu, &mut out, io::empty()).unwrap();
        assert_eq!(outcome, RunOutcome::Halted);
        assert_eq!(String::from_utf8(out).unwrap(), "!");
    }
}
