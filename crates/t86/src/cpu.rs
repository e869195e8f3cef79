//! The superscalar CPU: fetch, rename, issue, and architectural state.
//!
//! Grounded in `t86/t86/cpu.cpp`'s `Cpu::tick`, `fetchInstruction`,
//! `jump`, `checkBranchPrediction`, and `unrollSpeculation`. Owns the
//! [`RegisterAllocationTable`], [`Ram`], [`ReservationStation`],
//! [`WritesManager`], and [`BranchPredictor`], and drives them one tick at
//! a time (spec §4.6–§4.9).

use std::collections::HashMap;

use crate::alu::Flags;
use crate::branch_predictor::BranchPredictor;
use crate::common::{ExecutionError, FloatRegister, PhysicalRegister, Register};
use crate::config::Config;
use crate::instruction::Instruction;
use crate::operand::Operand;
use crate::program::Program;
use crate::ram::Ram;
use crate::rat::{LogicalRegister, RegisterAllocationTable};
use crate::reservation_station::{AluOp, ReservationStation, RetiredEntry};
use crate::stats::SimStats;
use crate::writes_manager::WritesManager;

/// Why the CPU stopped ticking (spec §4.14, "Halting").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// A `HALT` instruction retired.
    Halt,
    /// A software breakpoint (`BREAK`) was fetched.
    Breakpoint,
    /// An interrupt raised by an instruction was not handled.
    Interrupt(u8),
}

/// Console side effects produced by retiring I/O instructions, surfaced to
/// the host (CLI or debugger) after each `tick` (spec §4.13).
#[derive(Debug, Clone, Default)]
pub struct ConsoleActivity {
    /// Characters written by `PUTCHAR`, in retirement order.
    pub output: Vec<char>,
    /// Whether a `GETCHAR` is blocking retirement, waiting for
    /// [`Cpu::feed_input`].
    pub awaiting_input: bool,
}

/// Fixed program counter the architectural state resumes fetching from
/// after the pipeline stalls (distinct from the speculative fetch PC,
/// which the branch predictor may have moved ahead).
type Seq = u64;

/// One in-flight fetched instruction not yet fully resolved into a
/// reservation-station entry (control-flow and special-register writes
/// retire directly rather than through the ALU pipeline).
#[derive(Debug, Clone)]
struct InFlight {
    pc: u64,
    instruction: Instruction,
    /// This instruction's [`WritesManager`] registration, for `STORE`,
    /// `PUSH`/`FPUSH`, and `CALL` (which pushes a return address).
    write_seq: Option<u64>,
}

/// The cycle-accurate superscalar simulator core.
#[derive(Debug, Clone)]
pub struct Cpu {
    config: Config,
    rat: RegisterAllocationTable,
    ram: Ram,
    reservation_station: ReservationStation,
    writes: WritesManager,
    branch_predictor: BranchPredictor,
    stats: SimStats,
    program: Option<Program>,
    pc: u64,
    next_seq: Seq,
    fetched: HashMap<Seq, InFlight>,
    /// Instructions a software breakpoint has temporarily replaced with
    /// `Instruction::Break`, keyed by address, so `clear_software_breakpoint`
    /// can put the original back (spec §9, "index-based swap, not a pointer
    /// swap").
    saved_breakpoints: HashMap<u64, Instruction>,
    halted: Option<HaltReason>,
    pending_input: Option<i64>,
}

impl Cpu {
    /// Creates a CPU with no program loaded, sized per `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let physical_count = config.physical_register_count();
        let mut initial = Vec::new();
        for i in 0..config.register_count {
            initial.push(LogicalRegister::General(Register::General(i)));
        }
        initial.push(LogicalRegister::General(Register::ProgramCounter));
        initial.push(LogicalRegister::General(Register::StackPointer));
        initial.push(LogicalRegister::General(Register::StackBasePointer));
        initial.push(LogicalRegister::General(Register::Flags));
        for i in 0..config.float_register_count {
            initial.push(LogicalRegister::Float(FloatRegister(i)));
        }

        let rat = RegisterAllocationTable::new(physical_count, &initial);
        let ram = Ram::new(config.ram_size, config.ram_gates_count, config.ram_gate_latency);
        let reservation_station = ReservationStation::new(config.reservation_station_entries, config.alu_count);

        Self {
            config,
            rat,
            ram,
            reservation_station,
            writes: WritesManager::new(),
            branch_predictor: BranchPredictor::new(),
            stats: SimStats::default(),
            program: None,
            pc: 0,
            next_seq: 0,
            fetched: HashMap::new(),
            saved_breakpoints: HashMap::new(),
            halted: None,
            pending_input: None,
        }
    }

    /// Loads `program`'s text and data into the CPU, resetting the
    /// program counter to the program's entry point (spec §4.15).
    ///
    /// # Errors
    /// Returns [`ExecutionError::MemoryOutOfBounds`] if the data section
    /// does not fit in the configured RAM.
    pub fn start(&mut self, program: Program) -> Result<(), ExecutionError> {
        self.ram.load(&program.data)?;
        let entry = program.entry;
        self.program = Some(program);
        self.halted = None;
        self.set_pc(entry);
        Ok(())
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accumulated statistics for the run so far.
    #[must_use]
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Current value of the program counter.
    #[must_use]
    pub fn program_counter(&self) -> u64 {
        self.pc
    }

    /// Reads a logical register's current (speculative) value, as shown
    /// by the debugger's register-inspection command (spec §4.11).
    pub fn read_register(&self, reg: Register) -> Result<i64, ExecutionError> {
        self.rat.read(LogicalRegister::General(reg))
    }

    /// Reads a logical floating-point register, reinterpreting its raw
    /// bits as `f64` (spec §4.11, "PEEKREGS" over the float file).
    pub fn read_float_register(&self, reg: FloatRegister) -> Result<f64, ExecutionError> {
        self.rat.read(LogicalRegister::Float(reg)).map(|bits| f64::from_bits(bits as u64))
    }

    /// Writes a logical floating-point register directly, bypassing
    /// renaming (spec §4.11, "POKEREGS" over the float file).
    pub fn write_float_register(&mut self, reg: FloatRegister, value: f64) {
        if let Some(phys) = self.rat.lookup(LogicalRegister::Float(reg)) {
            self.rat.write(phys, value.to_bits() as i64);
        }
    }

    /// Writes a logical register directly, bypassing renaming — used only
    /// by the debugger to patch state while the CPU is halted
    /// (spec §4.11, "Register/memory mutation"). A write to the program
    /// counter goes through [`Self::set_pc`] so the next fetch actually
    /// honors it, rather than being shadowed by the RAT's separately
    /// tracked `pc` mirror.
    pub fn write_register(&mut self, reg: Register, value: i64) {
        if reg == Register::ProgramCounter {
            self.set_pc(value as u64);
            return;
        }
        if let Some(phys) = self.rat.lookup(LogicalRegister::General(reg)) {
            self.rat.write(phys, value);
        }
    }

    /// Moves the fetch program counter to `pc`, keeping the architectural
    /// `PC` register mirror in sync so a debugger reading it back sees the
    /// same value (spec §4.11).
    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
        if let Some(phys) = self.rat.lookup(LogicalRegister::General(Register::ProgramCounter)) {
            self.rat.write(phys, pc as i64);
        }
    }

    /// Reads a word of memory directly, bypassing the gate queue.
    pub fn read_memory(&self, address: u64) -> Result<i64, ExecutionError> {
        self.ram.peek(address)
    }

    /// Writes a word of memory directly, bypassing the gate queue.
    pub fn write_memory(&mut self, address: u64, value: i64) -> Result<(), ExecutionError> {
        self.ram.poke(address, value)
    }

    /// Installs a software breakpoint at `address` (spec §4.11) by
    /// substituting the instruction there with `Instruction::Break`, which
    /// retires into [`HaltReason::Breakpoint`] exactly like a `BREAK`
    /// written into the source. A no-op if the address already has one.
    pub fn set_software_breakpoint(&mut self, address: u64) {
        if self.saved_breakpoints.contains_key(&address) {
            return;
        }
        let Some(program) = &mut self.program else { return };
        if let Some(previous) = program.replace_instruction(address, Instruction::Break) {
            self.saved_breakpoints.insert(address, previous);
        }
    }

    /// Removes a previously installed software breakpoint, restoring the
    /// instruction it replaced.
    pub fn clear_software_breakpoint(&mut self, address: u64) {
        if let Some(previous) = self.saved_breakpoints.remove(&address) {
            if let Some(program) = &mut self.program {
                program.replace_instruction(address, previous);
            }
        }
    }

    /// Reads the instruction at `address` in the loaded program's text
    /// (spec §4.10, "PEEKTEXT") — used by the debugger to list or
    /// disassemble code, independent of the software-breakpoint mechanism.
    #[must_use]
    pub fn read_text(&self, address: u64) -> Option<Instruction> {
        self.program.as_ref().and_then(|program| program.instruction_at(address))
    }

    /// Overwrites the instruction at `address` in the loaded program's text
    /// (spec §4.10, "POKETEXT"), returning the instruction it replaced.
    /// A debugger-issued overwrite of a live software breakpoint's saved
    /// original is also updated, so a later `clear_software_breakpoint`
    /// restores what the debugger just wrote rather than stale text.
    pub fn write_text(&mut self, address: u64, instruction: Instruction) -> Option<Instruction> {
        if let Some(saved) = self.saved_breakpoints.get_mut(&address) {
            return Some(std::mem::replace(saved, instruction));
        }
        self.program.as_mut().and_then(|program| program.replace_instruction(address, instruction))
    }

    /// Size of the loaded program's text segment, in instructions
    /// (spec §4.10, "TEXTSIZE").
    #[must_use]
    pub fn text_size(&self) -> usize {
        self.program.as_ref().map_or(0, |program| program.text.len())
    }

    /// Supplies the value a blocked `GETCHAR` is waiting on (spec §4.13).
    pub fn feed_input(&mut self, value: i64) {
        self.pending_input = Some(value);
    }

    /// Why the CPU last stopped, if it has.
    #[must_use]
    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.halted
    }

    /// Advances the simulation by one tick: fetches at most one new
    /// instruction, advances the reservation station, commits retired
    /// results to architectural state, and resolves any branch that
    /// retired this tick.
    ///
    /// # Errors
    /// Propagates [`ExecutionError`] raised by execution (division by
    /// zero, an unhandled interrupt, out-of-bounds access).
    pub fn tick(&mut self) -> Result<ConsoleActivity, ExecutionError> {
        self.stats.new_tick();
        let mut activity = ConsoleActivity::default();

        // A halt only suppresses new fetches. The reservation station keeps
        // draining: a bogus halt fetched down a mispredicted path (running
        // off the end of the program, or tripping a breakpoint that the
        // real control flow never reaches) must not freeze the pipeline
        // before the branch that corrects it gets a chance to retire.
        if self.halted.is_none() {
            self.fetch_one()?;
        }

        let outcome = self
            .reservation_station
            .tick(&mut self.rat, &mut self.ram, &self.writes, &mut self.stats)?;

        for retired in outcome.retired {
            let Some(in_flight) = self.fetched.remove(&retired.seq) else {
                continue;
            };
            self.commit(&in_flight, &retired, &mut activity)?;
        }

        Ok(activity)
    }

    fn fetch_one(&mut self) -> Result<(), ExecutionError> {
        if !self.reservation_station.has_free_entry() {
            return Ok(());
        }
        let Some(program) = &self.program else {
            return Ok(());
        };
        let Some(&instruction) = program.text.get(&self.pc) else {
            self.halted = Some(HaltReason::Halt);
            return Ok(());
        };

        self.stats.fetch();
        let seq = self.next_seq;
        self.next_seq += 1;
        let fetch_pc = self.pc;

        let (op, operands, dst_phys, logical, prev_phys, write_seq) = self.decode(seq, instruction)?;
        self.reservation_station
            .issue(seq, op, operands, dst_phys, logical, prev_phys, write_seq)?;
        self.fetched.insert(
            seq,
            InFlight {
                pc: fetch_pc,
                instruction,
                write_seq,
            },
        );

        if instruction.is_control_flow() {
            let fallthrough = fetch_pc + 1;
            let guess = instruction.static_target().unwrap_or(fallthrough);
            let predicted = self.branch_predictor.predict(fetch_pc, guess);
            self.branch_predictor.record_prediction(fetch_pc, predicted, seq + 1);
            self.set_pc(predicted);
        } else {
            self.set_pc(fetch_pc + 1);
        }
        Ok(())
    }

    /// Translates a fetched [`Instruction`] into the reservation station's
    /// operand-supply protocol: which [`AluOp`] its ALU stage computes,
    /// which operands feed it, and which physical register (if any) the
    /// RAT renamed for its destination, alongside the rename's own
    /// logical/previous-physical pair for rollback.
    #[allow(clippy::type_complexity)]
    fn decode(
        &mut self,
        seq: Seq,
        instruction: Instruction,
    ) -> Result<
        (
            AluOp,
            Vec<Operand>,
            Option<PhysicalRegister>,
            Option<LogicalRegister>,
            Option<PhysicalRegister>,
            Option<Seq>,
        ),
        ExecutionError,
    > {
        // Any binary op that reads-then-overwrites `dst` must capture the
        // pre-rename value first: once `rat.rename` below allocates a
        // fresh physical register for `dst`, reading it again would target
        // that unwritten register and stall forever.
        let dst_current = match instruction {
            Instruction::Add { dst, .. }
            | Instruction::Sub { dst, .. }
            | Instruction::Mul { dst, .. }
            | Instruction::Imul { dst, .. }
            | Instruction::Div { dst, .. }
            | Instruction::Idiv { dst, .. }
            | Instruction::Mod { dst, .. }
            | Instruction::And { dst, .. }
            | Instruction::Or { dst, .. }
            | Instruction::Xor { dst, .. }
            | Instruction::Lsh { dst, .. }
            | Instruction::Rsh { dst, .. }
            | Instruction::Inc { dst }
            | Instruction::Dec { dst }
            | Instruction::Neg { dst }
            | Instruction::Not { dst }
            | Instruction::Loop { counter: dst, .. } => Some(Operand::Immediate(self.rat.read(LogicalRegister::General(dst))?)),
            _ => None,
        };
        let dst_current_float = match instruction {
            Instruction::FAdd { dst, .. } | Instruction::FSub { dst, .. } | Instruction::FMul { dst, .. } | Instruction::FDiv { dst, .. } => {
                Some(Operand::FloatImmediate(self.rat.read(LogicalRegister::Float(dst))?))
            }
            _ => None,
        };

        let logical = instruction
            .produces()
            .map(LogicalRegister::General)
            .or_else(|| instruction.produces_float().map(LogicalRegister::Float));
        let (dst_phys, prev_phys) = match logical {
            Some(logical) => {
                let prev_phys = self.rat.lookup(logical);
                (Some(self.rat.rename(logical)?), prev_phys)
            }
            None => (None, None),
        };

        let (op, operands) = match instruction {
            Instruction::Mov { src, .. } | Instruction::Lea { src, .. } | Instruction::FMov { src, .. } => (AluOp::Identity, vec![src]),
            Instruction::Store { addr, src } => (AluOp::Identity, vec![addr, src]),
            Instruction::Add { src, .. } => (AluOp::Add, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Sub { src, .. } => (AluOp::Sub, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Mul { src, .. } => (AluOp::Mul, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Imul { src, .. } => (AluOp::SignedMul, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Div { src, .. } => (AluOp::Div, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Idiv { src, .. } => (AluOp::SignedDiv, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Mod { src, .. } => (AluOp::Mod, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::And { src, .. } => (AluOp::And, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Or { src, .. } => (AluOp::Or, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Xor { src, .. } => (AluOp::Xor, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Lsh { src, .. } => (AluOp::Lsh, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Rsh { src, .. } => (AluOp::Rsh, vec![dst_current.unwrap_or(Operand::Immediate(0)), src]),
            Instruction::Inc { .. } => (AluOp::Add, vec![dst_current.unwrap_or(Operand::Immediate(0)), Operand::Immediate(1)]),
            Instruction::Dec { .. } => (AluOp::Sub, vec![dst_current.unwrap_or(Operand::Immediate(0)), Operand::Immediate(1)]),
            Instruction::Neg { .. } => (AluOp::Neg, vec![dst_current.unwrap_or(Operand::Immediate(0))]),
            Instruction::Not { .. } => (AluOp::Not, vec![dst_current.unwrap_or(Operand::Immediate(0))]),
            Instruction::FAdd { src, .. } => (AluOp::FAdd, vec![dst_current_float.unwrap_or(Operand::FloatImmediate(0)), src]),
            Instruction::FSub { src, .. } => (AluOp::FSub, vec![dst_current_float.unwrap_or(Operand::FloatImmediate(0)), src]),
            Instruction::FMul { src, .. } => (AluOp::FMul, vec![dst_current_float.unwrap_or(Operand::FloatImmediate(0)), src]),
            Instruction::FDiv { src, .. } => (AluOp::FDiv, vec![dst_current_float.unwrap_or(Operand::FloatImmediate(0)), src]),
            Instruction::Cmp { lhs, rhs } => (AluOp::Sub, vec![lhs, rhs]),
            Instruction::FCmp { lhs, rhs } => (AluOp::FSub, vec![lhs, rhs]),
            Instruction::Jmp { target }
            | Instruction::Jz { target }
            | Instruction::Jnz { target }
            | Instruction::Jg { target }
            | Instruction::Jge { target }
            | Instruction::Jl { target }
            | Instruction::Jle { target }
            | Instruction::Jc { target }
            | Instruction::Call { target } => (AluOp::Identity, vec![target]),
            Instruction::Ret => (AluOp::Identity, vec![]),
            Instruction::Push { src } | Instruction::FPush { src } => (AluOp::Identity, vec![src]),
            // The real popped value is computed synchronously in `commit`
            // from the stack pointer and memory; the reservation station's
            // own write of this placeholder result is overwritten there
            // before anything else can observe it.
            Instruction::Pop { .. } | Instruction::FPop { .. } => (AluOp::Identity, vec![Operand::Immediate(0)]),
            Instruction::Putchar { src } | Instruction::Putnum { src } => (AluOp::Identity, vec![src]),
            Instruction::Getchar { .. } => (AluOp::Identity, vec![Operand::Immediate(self.pending_input.take().unwrap_or(0))]),
            Instruction::Ext { src, .. } => (AluOp::IntToFloat, vec![src]),
            Instruction::Nrw { src, .. } => (AluOp::FloatToInt, vec![src]),
            // Operand 2 (the jump target) rides alongside the decrement so
            // retire can make the branch decision from `retired.operands`
            // without a second read of either the counter or the target.
            Instruction::Loop { target, .. } => (
                AluOp::Sub,
                vec![dst_current.unwrap_or(Operand::Immediate(0)), Operand::Immediate(1), target],
            ),
            Instruction::Break | Instruction::Nop | Instruction::Halt => (AluOp::Identity, vec![]),
        };

        let write_seq = matches!(
            instruction,
            Instruction::Push { .. } | Instruction::FPush { .. } | Instruction::Store { .. } | Instruction::Call { .. }
        )
        .then(|| {
            self.writes.register(seq);
            seq
        });

        Ok((op, operands, dst_phys, logical, prev_phys, write_seq))
    }

    fn commit(&mut self, in_flight: &InFlight, retired: &RetiredEntry, activity: &mut ConsoleActivity) -> Result<(), ExecutionError> {
        let instruction = &in_flight.instruction;
        match instruction {
            Instruction::Putchar { .. } => {
                if let Some(c) = char::from_u32(retired.value as u32) {
                    activity.output.push(c);
                }
            }
            Instruction::Putnum { .. } => {
                for c in retired.value.to_string().chars() {
                    activity.output.push(c);
                }
            }
            Instruction::Getchar { .. } => {
                activity.awaiting_input = self.pending_input.is_none();
            }
            Instruction::Halt => {
                self.halted = Some(HaltReason::Halt);
            }
            Instruction::Break => {
                self.stats.software_breakpoints += 1;
                self.halted = Some(HaltReason::Breakpoint);
            }
            Instruction::Store { .. } => {
                let write_seq = in_flight.write_seq.ok_or(ExecutionError::NoFreeRegister)?;
                let address = retired.operands[0] as u64;
                let value = retired.operands[1];
                self.writes.resolve_address(write_seq, address);
                self.ram.poke(address, value)?;
                self.writes.retire(write_seq);
            }
            Instruction::Push { .. } | Instruction::FPush { .. } => {
                let write_seq = in_flight.write_seq.ok_or(ExecutionError::NoFreeRegister)?;
                let value = retired.operands[0];
                let address = self.push_value(value)?;
                self.writes.resolve_address(write_seq, address);
                self.writes.retire(write_seq);
            }
            Instruction::Pop { .. } | Instruction::FPop { .. } => {
                let value = self.pop_value()?;
                if let Some(phys) = retired.dst_phys {
                    self.rat.write(phys, value);
                }
            }
            Instruction::Call { .. } => {
                let write_seq = in_flight.write_seq.ok_or(ExecutionError::NoFreeRegister)?;
                let return_addr = (in_flight.pc + 1) as i64;
                let address = self.push_value(return_addr)?;
                self.writes.resolve_address(write_seq, address);
                self.writes.retire(write_seq);
                let target = retired.operands[0] as u64;
                self.resolve_branch(in_flight.pc, target);
            }
            Instruction::Ret => {
                let target = self.pop_value()? as u64;
                self.resolve_branch(in_flight.pc, target);
            }
            Instruction::Jmp { .. } => {
                let target = retired.operands[0] as u64;
                self.resolve_branch(in_flight.pc, target);
            }
            Instruction::Loop { .. } => {
                let flags = Flags {
                    carry: retired.carry,
                    overflow: retired.overflow,
                    sign: retired.value < 0,
                    zero: retired.value == 0,
                };
                let phys = self
                    .rat
                    .lookup(LogicalRegister::General(Register::Flags))
                    .ok_or(ExecutionError::NoFreeRegister)?;
                self.rat.write(phys, flags.to_bits());

                let taken = retired.value != 0;
                let target = retired.operands[2] as u64;
                let actual = if taken { target } else { in_flight.pc + 1 };
                self.resolve_branch(in_flight.pc, actual);
            }
            Instruction::Jz { .. }
            | Instruction::Jnz { .. }
            | Instruction::Jg { .. }
            | Instruction::Jge { .. }
            | Instruction::Jl { .. }
            | Instruction::Jle { .. }
            | Instruction::Jc { .. } => {
                let flags = Flags::from_bits(self.rat.read(LogicalRegister::General(Register::Flags))?);
                let taken = match instruction {
                    Instruction::Jz { .. } => flags.zero,
                    Instruction::Jnz { .. } => !flags.zero,
                    Instruction::Jg { .. } => !flags.zero && flags.sign == flags.overflow,
                    Instruction::Jge { .. } => flags.sign == flags.overflow,
                    Instruction::Jl { .. } => flags.sign != flags.overflow,
                    Instruction::Jle { .. } => flags.zero || flags.sign != flags.overflow,
                    Instruction::Jc { .. } => flags.carry,
                    _ => unreachable!("matched above"),
                };
                let target = retired.operands[0] as u64;
                let actual = if taken { target } else { in_flight.pc + 1 };
                self.resolve_branch(in_flight.pc, actual);
            }
            _ => {
                if instruction.writes_flags() {
                    let flags = Flags {
                        carry: retired.carry,
                        overflow: retired.overflow,
                        sign: retired.value < 0,
                        zero: retired.value == 0,
                    };
                    let phys = self
                        .rat
                        .lookup(LogicalRegister::General(Register::Flags))
                        .ok_or(ExecutionError::NoFreeRegister)?;
                    self.rat.write(phys, flags.to_bits());
                }
            }
        }
        Ok(())
    }

    /// Rolls the pipeline back to `prediction.speculation_point` if
    /// `branch_pc`'s actual target disagrees with what was predicted at
    /// fetch time, undoing every entry issued past the mispredicted branch
    /// across the reservation station, RAT, write buffer, and outstanding
    /// predictions (spec §4.9, "Speculative rollback"). A correct
    /// prediction leaves everything untouched, since `pc` is already
    /// sitting at the right place from speculative fetching.
    fn resolve_branch(&mut self, branch_pc: u64, actual_target: u64) {
        if let Some(prediction) = self.branch_predictor.resolve(branch_pc, actual_target) {
            let point = prediction.speculation_point;
            self.reservation_station.rollback_from(point, &mut self.rat);
            self.writes.rollback_from(point);
            self.branch_predictor.discard_from(point);
            self.fetched.retain(|&seq, _| seq < point);
            self.next_seq = point;
            self.stats.rollback();
            self.halted = None;
            self.set_pc(actual_target);
        }
    }

    /// Decrements the stack pointer by one word and stores `value` there,
    /// stack growing down (spec §4.2, "PUSH"/"CALL"). Returns the address
    /// written, for write-hazard bookkeeping.
    fn push_value(&mut self, value: i64) -> Result<u64, ExecutionError> {
        let sp_phys = self
            .rat
            .lookup(LogicalRegister::General(Register::StackPointer))
            .ok_or(ExecutionError::NoFreeRegister)?;
        let sp = self.rat.read(LogicalRegister::General(Register::StackPointer))?;
        let new_sp = sp - 8;
        self.ram.poke(new_sp as u64, value)?;
        self.rat.write(sp_phys, new_sp);
        Ok(new_sp as u64)
    }

    /// Loads the word at the stack pointer and increments it by one word
    /// (spec §4.2, "POP"/"RET").
    fn pop_value(&mut self) -> Result<i64, ExecutionError> {
        let sp_phys = self
            .rat
            .lookup(LogicalRegister::General(Register::StackPointer))
            .ok_or(ExecutionError::NoFreeRegister)?;
        let sp = self.rat.read(LogicalRegister::General(Register::StackPointer))?;
        let value = self.ram.peek(sp as u64)?;
        self.rat.write(sp_phys, sp + 8);
        Ok(value)
    }

    /// Whether the pipeline has fully drained (no fetched-but-not-retired
    /// instructions remain), relevant once `halt_reason` is set and the
    /// host wants to know it is safe to stop calling `tick`.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.reservation_station.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;

    fn program_with(text: Vec<(u64, Instruction)>) -> Program {
        Program {
            text: text.into_iter().collect(),
            data: vec![],
            entry: 0,
        }
    }

    #[test]
    fn halts_cleanly_on_halt_instruction() {
        let mut cpu = Cpu::new(Config::default());
        cpu.start(program_with(vec![(0, Instruction::Halt)])).unwrap();
        for _ in 0..8 {
            cpu.tick().unwrap();
            if cpu.halt_reason().is_some() {
                break;
            }
        }
        assert_eq!(cpu.halt_reason(), Some(HaltReason::Halt));
    }

    #[test]
    fn fetch_past_program_end_halts() {
        let mut cpu = Cpu::new(Config::default());
        cpu.start(program_with(vec![])).unwrap();
        cpu.tick().unwrap();
        assert_eq!(cpu.halt_reason(), Some(HaltReason::Halt));
    }

    #[test]
    fn software_breakpoint_halts_before_executing() {
        let mut cpu = Cpu::new(Config::default());
        cpu.start(program_with(vec![(0, Instruction::Nop), (1, Instruction::Halt)]))
            .unwrap();
        cpu.set_software_breakpoint(1);
        for _ in 0..8 {
            cpu.tick().unwrap();
            if cpu.halt_reason().is_some() {
                break;
            }
        }
        assert_eq!(cpu.halt_reason(), Some(HaltReason::Breakpoint));
    }

    #[test]
    fn clearing_a_software_breakpoint_restores_the_original_instruction() {
        let mut cpu = Cpu::new(Config::default());
        cpu.start(program_with(vec![(0, Instruction::Nop), (1, Instruction::Halt)]))
            .unwrap();
        cpu.set_software_breakpoint(1);
        cpu.clear_software_breakpoint(1);
        for _ in 0..8 {
            cpu.tick().unwrap();
            if cpu.halt_reason().is_some() {
                break;
            }
        }
        assert_eq!(cpu.halt_reason(), Some(HaltReason::Halt));
    }

    #[test]
    fn putchar_emits_console_output() {
        let mut cpu = Cpu::new(Config::default());
        cpu.start(program_with(vec![
            (0, Instruction::Putchar { src: Operand::Immediate('A' as i64) }),
            (1, Instruction::Halt),
        ]))
        .unwrap();
        let mut output = Vec::new();
        for _ in 0..8 {
            let activity = cpu.tick().unwrap();
            output.extend(activity.output);
            if cpu.halt_reason().is_some() {
                break;
            }
        }
        assert_eq!(output, vec!['A']);
    }
}
