//! Two-pass T86 assembler.
//!
//! Grounded in `t86/parser.h`'s `Parser::parse`: a first pass walks every
//! line to resolve label addresses, a second pass decodes each line into
//! an [`Instruction`] now that jump/call targets can be rewritten as
//! concrete addresses.

use std::collections::HashMap;

use thiserror::Error;

use crate::common::{FloatRegister, Register};
use crate::instruction::Instruction;
use crate::operand::Operand;
use crate::program::Program;

use super::lexer::{Lexer, LocatedToken, Token};

/// A failure while assembling T86 source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmParseError {
    /// An identifier was not a recognized mnemonic, register, or label.
    #[error("line {line}: unknown symbol {symbol:?}")]
    UnknownSymbol {
        /// 1-based source line.
        line: usize,
        /// The offending text.
        symbol: String,
    },
    /// A token appeared where the grammar did not expect it.
    #[error("line {line}: unexpected token {found}")]
    UnexpectedToken {
        /// 1-based source line.
        line: usize,
        /// The token found.
        found: Token,
    },
    /// Input ended in the middle of an instruction or operand.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// A jump, call, or memory operand referenced a label that was never
    /// defined anywhere in the source.
    #[error("undefined label {0:?}")]
    UndefinedLabel(String),
}

/// Parses `source` into a loadable [`Program`].
///
/// # Errors
/// Returns [`AsmParseError`] on any malformed line or undefined label
/// reference.
pub fn parse(source: &str) -> Result<Program, AsmParseError> {
    let tokens = Lexer::new(source).tokenize();
    let lines = split_lines(&tokens);

    let mut labels = HashMap::new();
    let mut text_address = 0u64;
    let mut data_address = 0u64;
    let mut in_data = false;
    for line in &lines {
        let mut iter = line.iter().peekable();
        while let Some(lt) = iter.peek() {
            if let Token::Label(name) = &lt.token {
                labels.insert(name.clone(), if in_data { data_address } else { text_address });
                iter.next();
            } else {
                break;
            }
        }
        match iter.peek().map(|lt| &lt.token) {
            Some(Token::Directive(d)) if d == "text" => in_data = false,
            Some(Token::Directive(d)) if d == "data" => in_data = true,
            Some(Token::Directive(_)) => {}
            Some(_) if in_data => {
                for lt in iter {
                    match &lt.token {
                        Token::Int(_) => data_address += 1,
                        Token::Str(s) => data_address += s.chars().count() as u64 + 1,
                        _ => {}
                    }
                }
            }
            Some(_) => text_address += 1,
            None => {}
        }
    }

    let mut program = Program::default();
    let mut address = 0u64;
    let mut data_address = 0u64;
    let mut in_data = false;
    for line in &lines {
        let mut iter = line.iter().peekable();
        while let Some(lt) = iter.peek() {
            if matches!(lt.token, Token::Label(_)) {
                iter.next();
            } else {
                break;
            }
        }
        let Some(lt) = iter.peek() else { continue };
        match &lt.token {
            Token::Directive(d) if d == "text" => {
                in_data = false;
                iter.next();
            }
            Token::Directive(d) if d == "data" => {
                in_data = true;
                iter.next();
            }
            Token::Directive(_) => {
                iter.next();
            }
            _ if in_data => {
                for lt in iter {
                    match &lt.token {
                        Token::Int(n) => {
                            program.data.push(*n);
                            data_address += 1;
                        }
                        // Strings are laid out char by char, NUL-terminated
                        // (spec §6, ".data" section).
                        Token::Str(s) => {
                            for c in s.chars() {
                                program.data.push(i64::from(u32::from(c)));
                                data_address += 1;
                            }
                            program.data.push(0);
                            data_address += 1;
                        }
                        _ => {}
                    }
                }
                let _ = data_address;
            }
            _ => {
                let instruction = parse_instruction(&mut iter, &labels)?;
                program.text.insert(address, instruction);
                address += 1;
            }
        }
    }

    Ok(program)
}

fn split_lines(tokens: &[LocatedToken]) -> Vec<Vec<LocatedToken>> {
    let mut lines: Vec<Vec<LocatedToken>> = Vec::new();
    let mut current_line = None;
    for lt in tokens {
        if matches!(lt.token, Token::Eof) {
            break;
        }
        if current_line != Some(lt.line) {
            lines.push(Vec::new());
            current_line = Some(lt.line);
        }
        if let Some(line) = lines.last_mut() {
            line.push(lt.clone());
        }
    }
    lines
}

type TokenIter<'a> = std::iter::Peekable<std::slice::Iter<'a, LocatedToken>>;

fn next_ident(iter: &mut TokenIter<'_>) -> Result<(String, usize), AsmParseError> {
    let lt = iter.next().ok_or(AsmParseError::UnexpectedEof)?;
    match &lt.token {
        Token::Ident(s) => Ok((s.clone(), lt.line)),
        other => Err(AsmParseError::UnexpectedToken { line: lt.line, found: other.clone() }),
    }
}

fn expect(iter: &mut TokenIter<'_>, expected: &Token) -> Result<(), AsmParseError> {
    let lt = iter.next().ok_or(AsmParseError::UnexpectedEof)?;
    if &lt.token == expected {
        Ok(())
    } else {
        Err(AsmParseError::UnexpectedToken { line: lt.line, found: lt.token.clone() })
    }
}

fn parse_register(name: &str, line: usize) -> Result<Register, AsmParseError> {
    match name {
        "IP" => Ok(Register::ProgramCounter),
        "SP" => Ok(Register::StackPointer),
        "BP" => Ok(Register::StackBasePointer),
        "FLAGS" => Ok(Register::Flags),
        _ if name.starts_with('R') && name[1..].chars().all(|c| c.is_ascii_digit()) => {
            name[1..]
                .parse()
                .map(Register::General)
                .map_err(|_| AsmParseError::UnknownSymbol { line, symbol: name.to_string() })
        }
        _ => Err(AsmParseError::UnknownSymbol { line, symbol: name.to_string() }),
    }
}

fn parse_float_register(name: &str, line: usize) -> Result<FloatRegister, AsmParseError> {
    if name.starts_with("FR") && name[2..].chars().all(|c| c.is_ascii_digit()) {
        name[2..]
            .parse()
            .map(FloatRegister)
            .map_err(|_| AsmParseError::UnknownSymbol { line, symbol: name.to_string() })
    } else {
        Err(AsmParseError::UnknownSymbol { line, symbol: name.to_string() })
    }
}

/// Parses one operand: a register, float register, immediate, label
/// reference, or a bracketed memory addressing expression.
fn parse_operand(iter: &mut TokenIter<'_>, labels: &HashMap<String, u64>) -> Result<Operand, AsmParseError> {
    let lt = iter.next().ok_or(AsmParseError::UnexpectedEof)?;
    match &lt.token {
        Token::Int(n) => Ok(Operand::Immediate(*n)),
        Token::Float(f) => Ok(Operand::FloatImmediate(f.to_bits() as i64)),
        Token::Ident(name) => {
            if let Ok(reg) = parse_register(name, lt.line) {
                Ok(Operand::register(reg))
            } else if let Ok(freg) = parse_float_register(name, lt.line) {
                Ok(Operand::float_register(freg))
            } else if let Some(&addr) = labels.get(name) {
                Ok(Operand::Immediate(addr as i64))
            } else {
                Err(AsmParseError::UndefinedLabel(name.clone()))
            }
        }
        Token::LBracket => {
            let operand = parse_memory_expr(iter, labels, lt.line)?;
            expect(iter, &Token::RBracket)?;
            Ok(operand.dereference())
        }
        other => Err(AsmParseError::UnexpectedToken { line: lt.line, found: other.clone() }),
    }
}

/// Like [`parse_operand`], but a bracketed form resolves to the effective
/// *address* rather than its dereferenced contents — `LEA`'s defining
/// property.
fn parse_lea_src(iter: &mut TokenIter<'_>, labels: &HashMap<String, u64>) -> Result<Operand, AsmParseError> {
    if let Some(lt) = iter.peek() {
        if lt.token == Token::LBracket {
            let line = lt.line;
            iter.next();
            let operand = parse_memory_expr(iter, labels, line)?;
            expect(iter, &Token::RBracket)?;
            return Ok(operand);
        }
    }
    parse_operand(iter, labels)
}

/// `MOV`'s destination may be a register (`MOV R0, ...`) or a bracketed
/// memory address (`MOV [R0 + 4], ...`), the latter assembling to a
/// [`Instruction::Store`] rather than a register-destination `Mov`.
fn parse_mov(iter: &mut TokenIter<'_>, labels: &HashMap<String, u64>, line: usize) -> Result<Instruction, AsmParseError> {
    if let Some(lt) = iter.peek() {
        if lt.token == Token::LBracket {
            let bracket_line = lt.line;
            iter.next();
            let addr = parse_memory_expr(iter, labels, bracket_line)?;
            expect(iter, &Token::RBracket)?;
            expect(iter, &Token::Comma)?;
            let src = parse_operand(iter, labels)?;
            return Ok(Instruction::Store { addr, src });
        }
    }
    let dst = parse_dst(iter, line)?;
    expect(iter, &Token::Comma)?;
    let src = parse_operand(iter, labels)?;
    Ok(Instruction::Mov { dst, src })
}

fn parse_memory_expr(iter: &mut TokenIter<'_>, labels: &HashMap<String, u64>, line: usize) -> Result<Operand, AsmParseError> {
    let lt = iter.next().ok_or(AsmParseError::UnexpectedEof)?;
    let base = match &lt.token {
        Token::Ident(name) => parse_register(name, lt.line)?,
        Token::Int(n) => return Ok(Operand::Immediate(*n)),
        other => return Err(AsmParseError::UnexpectedToken { line: lt.line, found: other.clone() }),
    };

    let mut offset = 0i64;
    let mut index = None;
    while let Some(next) = iter.peek() {
        match &next.token {
            Token::Plus => {
                iter.next();
                let lt = iter.next().ok_or(AsmParseError::UnexpectedEof)?;
                match &lt.token {
                    Token::Int(n) => offset += n,
                    Token::Ident(name) => {
                        let reg = parse_register(name, lt.line)?;
                        if let Some(next) = iter.peek() {
                            if next.token == Token::Star {
                                iter.next();
                                let scale_lt = iter.next().ok_or(AsmParseError::UnexpectedEof)?;
                                let Token::Int(scale) = scale_lt.token else {
                                    return Err(AsmParseError::UnexpectedToken { line: scale_lt.line, found: scale_lt.token.clone() });
                                };
                                index = Some((reg, scale));
                                continue;
                            }
                        }
                        index = Some((reg, 1));
                    }
                    other => return Err(AsmParseError::UnexpectedToken { line: lt.line, found: other.clone() }),
                }
            }
            Token::Minus => {
                iter.next();
                let lt = iter.next().ok_or(AsmParseError::UnexpectedEof)?;
                let Token::Int(n) = lt.token else {
                    return Err(AsmParseError::UnexpectedToken { line: lt.line, found: lt.token.clone() });
                };
                offset -= n;
            }
            _ => break,
        }
    }
    let _ = labels;
    let _ = line;

    Ok(if let Some((idx_reg, scale)) = index {
        match Operand::base_index(base, idx_reg, scale) {
            Operand::Unresolved(mut p) => {
                p.offset = offset;
                Operand::Unresolved(p)
            }
            other => other,
        }
    } else {
        Operand::register_offset(Some(base), offset)
    })
}

fn parse_instruction(iter: &mut TokenIter<'_>, labels: &HashMap<String, u64>) -> Result<Instruction, AsmParseError> {
    // A `.text` line may open with an address, purely for readability
    // (spec §6: "optional leading integer address (ignored)"); `disasm`
    // emits one on every line so re-parsing its own output round-trips.
    if matches!(iter.peek().map(|lt| &lt.token), Some(Token::Int(_))) {
        iter.next();
    }
    let (mnemonic, line) = next_ident(iter)?;
    let upper = mnemonic.to_uppercase();

    macro_rules! reg_src {
        () => {{
            let dst = parse_dst(iter, line)?;
            expect(iter, &Token::Comma)?;
            let src = parse_operand(iter, labels)?;
            (dst, src)
        }};
    }
    macro_rules! freg_src {
        () => {{
            let dst = parse_float_dst(iter, line)?;
            expect(iter, &Token::Comma)?;
            let src = parse_operand(iter, labels)?;
            (dst, src)
        }};
    }

    Ok(match upper.as_str() {
        "MOV" => parse_mov(iter, labels, line)?,
        "FMOV" => {
            let (dst, src) = freg_src!();
            Instruction::FMov { dst, src }
        }
        "LEA" => {
            let dst = parse_dst(iter, line)?;
            expect(iter, &Token::Comma)?;
            let src = parse_lea_src(iter, labels)?;
            Instruction::Lea { dst, src }
        }
        "ADD" => {
            let (dst, src) = reg_src!();
            Instruction::Add { dst, src }
        }
        "SUB" => {
            let (dst, src) = reg_src!();
            Instruction::Sub { dst, src }
        }
        "MUL" => {
            let (dst, src) = reg_src!();
            Instruction::Mul { dst, src }
        }
        "IMUL" => {
            let (dst, src) = reg_src!();
            Instruction::Imul { dst, src }
        }
        "DIV" => {
            let (dst, src) = reg_src!();
            Instruction::Div { dst, src }
        }
        "IDIV" => {
            let (dst, src) = reg_src!();
            Instruction::Idiv { dst, src }
        }
        "MOD" => {
            let (dst, src) = reg_src!();
            Instruction::Mod { dst, src }
        }
        "AND" => {
            let (dst, src) = reg_src!();
            Instruction::And { dst, src }
        }
        "OR" => {
            let (dst, src) = reg_src!();
            Instruction::Or { dst, src }
        }
        "XOR" => {
            let (dst, src) = reg_src!();
            Instruction::Xor { dst, src }
        }
        "LSH" => {
            let (dst, src) = reg_src!();
            Instruction::Lsh { dst, src }
        }
        "RSH" => {
            let (dst, src) = reg_src!();
            Instruction::Rsh { dst, src }
        }
        "FADD" => {
            let (dst, src) = freg_src!();
            Instruction::FAdd { dst, src }
        }
        "FSUB" => {
            let (dst, src) = freg_src!();
            Instruction::FSub { dst, src }
        }
        "FMUL" => {
            let (dst, src) = freg_src!();
            Instruction::FMul { dst, src }
        }
        "FDIV" => {
            let (dst, src) = freg_src!();
            Instruction::FDiv { dst, src }
        }
        "INC" => Instruction::Inc { dst: parse_dst(iter, line)? },
        "DEC" => Instruction::Dec { dst: parse_dst(iter, line)? },
        "NEG" => Instruction::Neg { dst: parse_dst(iter, line)? },
        "NOT" => Instruction::Not { dst: parse_dst(iter, line)? },
        "POP" => Instruction::Pop { dst: parse_dst(iter, line)? },
        "FPOP" => Instruction::FPop { dst: parse_float_dst(iter, line)? },
        "GETCHAR" => Instruction::Getchar { dst: parse_dst(iter, line)? },
        "PUSH" => Instruction::Push { src: parse_operand(iter, labels)? },
        "FPUSH" => Instruction::FPush { src: parse_operand(iter, labels)? },
        "PUTCHAR" => Instruction::Putchar { src: parse_operand(iter, labels)? },
        "PUTNUM" => Instruction::Putnum { src: parse_operand(iter, labels)? },
        "CMP" => {
            let lhs = parse_operand(iter, labels)?;
            expect(iter, &Token::Comma)?;
            let rhs = parse_operand(iter, labels)?;
            Instruction::Cmp { lhs, rhs }
        }
        "FCMP" => {
            let lhs = parse_operand(iter, labels)?;
            expect(iter, &Token::Comma)?;
            let rhs = parse_operand(iter, labels)?;
            Instruction::FCmp { lhs, rhs }
        }
        "JMP" => Instruction::Jmp { target: parse_operand(iter, labels)? },
        "JZ" => Instruction::Jz { target: parse_operand(iter, labels)? },
        "JNZ" => Instruction::Jnz { target: parse_operand(iter, labels)? },
        "JG" => Instruction::Jg { target: parse_operand(iter, labels)? },
        "JGE" => Instruction::Jge { target: parse_operand(iter, labels)? },
        "JL" => Instruction::Jl { target: parse_operand(iter, labels)? },
        "JLE" => Instruction::Jle { target: parse_operand(iter, labels)? },
        "JC" => Instruction::Jc { target: parse_operand(iter, labels)? },
        "CALL" => Instruction::Call { target: parse_operand(iter, labels)? },
        "RET" => Instruction::Ret,
        "BREAK" => Instruction::Break,
        "NOP" => Instruction::Nop,
        "HALT" => Instruction::Halt,
        "EXT" => {
            let dst = parse_float_dst(iter, line)?;
            expect(iter, &Token::Comma)?;
            let src = parse_operand(iter, labels)?;
            Instruction::Ext { dst, src }
        }
        "NRW" => {
            let dst = parse_dst(iter, line)?;
            expect(iter, &Token::Comma)?;
            let src = parse_operand(iter, labels)?;
            Instruction::Nrw { dst, src }
        }
        "LOOP" => {
            let counter = parse_dst(iter, line)?;
            expect(iter, &Token::Comma)?;
            let target = parse_operand(iter, labels)?;
            Instruction::Loop { counter, target }
        }
        _ => return Err(AsmParseError::UnknownSymbol { line, symbol: mnemonic }),
    })
}

fn parse_dst(iter: &mut TokenIter<'_>, line: usize) -> Result<Register, AsmParseError> {
    let (name, ident_line) = next_ident(iter)?;
    parse_register(&name, ident_line).map_err(|_| AsmParseError::UnknownSymbol { line, symbol: name })
}

fn parse_float_dst(iter: &mut TokenIter<'_>, line: usize) -> Result<FloatRegister, AsmParseError> {
    let (name, ident_line) = next_ident(iter)?;
    parse_float_register(&name, ident_line).map_err(|_| AsmParseError::UnknownSymbol { line, symbol: name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_program() {
        let program = parse("MOV R0, 5\nHALT").unwrap();
        assert_eq!(program.instruction_at(0), Some(Instruction::Mov { dst: Register::General(0), src: Operand::Immediate(5) }));
        assert_eq!(program.instruction_at(1), Some(Instruction::Halt));
    }

    #[test]
    fn resolves_forward_label_reference() {
        let program = parse("JMP end\nNOP\nend: HALT").unwrap();
        assert_eq!(program.instruction_at(0), Some(Instruction::Jmp { target: Operand::Immediate(2) }));
    }

    #[test]
    fn parses_memory_operand_with_scaled_index() {
        let program = parse("MOV R0, [R1 + R2 * 8]").unwrap();
        let Some(Instruction::Mov { src, .. }) = program.instruction_at(0) else {
            panic!("expected MOV");
        };
        assert!(matches!(src, Operand::Unresolved(_)));
    }

    #[test]
    fn bracketed_mov_destination_assembles_to_a_store() {
        let program = parse("MOV [R0 + 4], R1").unwrap();
        let Some(Instruction::Store { addr, src }) = program.instruction_at(0) else {
            panic!("expected Store");
        };
        assert_eq!(addr, Operand::register_offset(Some(Register::General(0)), 4));
        assert_eq!(src, Operand::register(Register::General(1)));
    }

    #[test]
    fn lea_does_not_dereference_its_memory_operand() {
        let program = parse("LEA R0, [R1 + 4]").unwrap();
        let Some(Instruction::Lea { src, .. }) = program.instruction_at(0) else {
            panic!("expected LEA");
        };
        assert_eq!(src, Operand::register_offset(Some(Register::General(1)), 4));
    }

    #[test]
    fn undefined_label_is_an_error() {
        assert!(matches!(parse("JMP nowhere"), Err(AsmParseError::UndefinedLabel(_))));
    }

    #[test]
    fn data_section_populates_program_data() {
        let program = parse(".data\n1\n2\n3\n.text\nHALT").unwrap();
        assert_eq!(program.data, vec![1, 2, 3]);
        assert_eq!(program.instruction_at(0), Some(Instruction::Halt));
    }

    #[test]
    fn string_literal_is_laid_out_char_by_char_with_nul_terminator() {
        let program = parse(".data\n\"hi\"\n.text\nHALT").unwrap();
        assert_eq!(program.data, vec!['h' as i64, 'i' as i64, 0]);
    }

    #[test]
    fn string_literal_expands_standard_escapes() {
        let program = parse(".data\n\"a\\nb\"\n.text\nHALT").unwrap();
        assert_eq!(program.data, vec!['a' as i64, '\n' as i64, 'b' as i64, 0]);
    }

    #[test]
    fn label_after_a_string_points_past_its_expansion() {
        let program = parse(".data\n\"hi\"\nafter: 42\n.text\nMOV R0, after\nHALT").unwrap();
        assert_eq!(
            program.instruction_at(0),
            Some(Instruction::Mov { dst: Register::General(0), src: Operand::Immediate(3) })
        );
        assert_eq!(program.data, vec!['h' as i64, 'i' as i64, 0, 42]);
    }

    #[test]
    fn loop_parses_counter_and_target() {
        let program = parse("top: DEC R0\nLOOP R0, top\nHALT").unwrap();
        assert_eq!(
            program.instruction_at(1),
            Some(Instruction::Loop { counter: Register::General(0), target: Operand::Immediate(0) })
        );
    }

    #[test]
    fn leading_address_prefix_is_ignored() {
        let program = parse("0 MOV R0, 5\n1 HALT").unwrap();
        assert_eq!(program.instruction_at(0), Some(Instruction::Mov { dst: Register::General(0), src: Operand::Immediate(5) }));
        assert_eq!(program.instruction_at(1), Some(Instruction::Halt));
    }

    #[test]
    fn ext_and_nrw_parse_with_mixed_register_kinds() {
        let program = parse("EXT FR0, R0\nNRW R1, FR0\nHALT").unwrap();
        assert_eq!(
            program.instruction_at(0),
            Some(Instruction::Ext { dst: FloatRegister(0), src: Operand::register(Register::General(0)) })
        );
        assert_eq!(
            program.instruction_at(1),
            Some(Instruction::Nrw { dst: Register::General(1), src: Operand::float_register(FloatRegister(0)) })
        );
    }
}
