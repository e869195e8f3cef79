//! Recursive-descent parser for the textual debug-info format.
//!
//! Grounded in `t86/debugger/Source/Source.cpp` and `Parser.cpp`: the
//! original reads three sections out of one file — `.debug_line` (an
//! address-to-line table), `.debug_info` (the DIE tree), and
//! `.debug_source` (the verbatim compiler input, always last) — spec §6
//! ("Debug-info file format"). This parser produces the same three
//! structures as plain Rust values instead of populating a mutable
//! `Source` object field by field.

use std::collections::HashMap;

use thiserror::Error;

use crate::source::die::Die;
use crate::source::line_mapping::{LineMapping, LineRow};
use crate::source::loc_expr::{LocExpr, LocOp};
use crate::source::source_file::SourceFile;
use crate::source::type_info::{StructField, Type};

/// The three sections parsed out of one debug-info file.
#[derive(Debug, Clone)]
pub struct DebugInfo {
    /// Address-to-source-line table (`.debug_line`).
    pub line_mapping: LineMapping,
    /// Root of the DIE tree (`.debug_info`).
    pub root: Die,
    /// The compiler's verbatim input (`.debug_source`), if the file
    /// carried one.
    pub source: Option<SourceFile>,
}

/// A failure parsing a debug-info file, carrying the 1-based row and
/// column the grammar broke at (spec §7, "fail fast with a location").
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebugInfoParseError {
    /// A required section header (`.debug_line` / `.debug_info`) was
    /// missing entirely.
    #[error("missing required section {0:?}")]
    MissingSection(&'static str),
    /// `.debug_source`, when present, was not the file's final section.
    #[error("line {0}: .debug_source must be the final section")]
    SourceNotLast(usize),
    /// A `.debug_line` row was not `row:address`.
    #[error("line {line}: malformed .debug_line row {text:?}")]
    MalformedLineRow {
        /// 1-based row within the debug-info file.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// A token appeared where the DIE-tree grammar did not expect it.
    #[error("line {line}, column {col}: unexpected token {found:?}")]
    UnexpectedToken {
        /// 1-based row within the debug-info file.
        line: usize,
        /// 1-based column within that row.
        col: usize,
        /// The offending text.
        found: String,
    },
    /// Input ended in the middle of a DIE tree, type expression, or
    /// location expression.
    #[error("unexpected end of input while parsing .debug_info")]
    UnexpectedEof,
    /// A `type:` attribute named a struct that was never defined.
    #[error("line {line}: unknown struct type {name:?}")]
    UnknownStruct {
        /// 1-based row within the debug-info file.
        line: usize,
        /// The offending struct name.
        name: String,
    },
}

/// Parses a complete debug-info file (`.debug_line` + `.debug_info` +
/// optional `.debug_source`).
///
/// # Errors
/// Returns [`DebugInfoParseError`] with a `(row, column)` location on any
/// malformed section.
pub fn parse_debug_info(text: &str) -> Result<DebugInfo, DebugInfoParseError> {
    let sections = split_sections(text)?;

    let line_section = sections.get(".debug_line").ok_or(DebugInfoParseError::MissingSection(".debug_line"))?;
    let line_mapping = parse_debug_line(line_section)?;

    let info_section = sections.get(".debug_info").ok_or(DebugInfoParseError::MissingSection(".debug_info"))?;
    let root = parse_debug_info_tree(info_section)?;

    let source = sections.get(".debug_source").map(|text| SourceFile::new("source", text));

    Ok(DebugInfo { line_mapping, root, source })
}

/// Splits the file into its named sections, keyed by the directive that
/// introduces them (`.debug_line`, `.debug_info`, `.debug_source`),
/// enforcing that `.debug_source`, if present, is the last one.
fn split_sections(text: &str) -> Result<HashMap<&'static str, String>, DebugInfoParseError> {
    const HEADERS: [&str; 3] = [".debug_line", ".debug_info", ".debug_source"];

    let mut sections: HashMap<&'static str, String> = HashMap::new();
    let mut current: Option<&'static str> = None;
    let mut buf = String::new();
    let mut saw_source_at: Option<usize> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if let Some(header) = HEADERS.iter().find(|h| raw_line.trim() == **h) {
            if let Some(name) = current.take() {
                sections.insert(name, std::mem::take(&mut buf));
            }
            if saw_source_at.is_some() {
                return Err(DebugInfoParseError::SourceNotLast(line_no));
            }
            current = Some(header);
            if *header == ".debug_source" {
                saw_source_at = Some(line_no);
            }
            continue;
        }
        if current.is_some() {
            buf.push_str(raw_line);
            buf.push('\n');
        }
    }
    if let Some(name) = current.take() {
        sections.insert(name, buf);
    }
    Ok(sections)
}

fn parse_debug_line(section: &str) -> Result<LineMapping, DebugInfoParseError> {
    let mut rows = Vec::new();
    for (idx, raw_line) in section.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (line_part, addr_part) = trimmed.split_once(':').ok_or_else(|| DebugInfoParseError::MalformedLineRow { line: line_no, text: trimmed.to_string() })?;
        let line: u32 = line_part.trim().parse().map_err(|_| DebugInfoParseError::MalformedLineRow { line: line_no, text: trimmed.to_string() })?;
        let address: u64 = addr_part.trim().parse().map_err(|_| DebugInfoParseError::MalformedLineRow { line: line_no, text: trimmed.to_string() })?;
        rows.push(LineRow { address, file: "source".to_string(), line });
    }
    Ok(LineMapping::new(rows))
}

/// One lexical token of the `.debug_info` DIE-tree grammar.
#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Str(String),
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    At,
    Comma,
    Semicolon,
    Star,
    LBracket,
    RBracket,
    Eof,
}

#[derive(Debug, Clone)]
struct Located {
    tok: Tok,
    line: usize,
    col: usize,
}

fn tokenize(section: &str) -> Result<Vec<Located>, DebugInfoParseError> {
    let mut out = Vec::new();
    for (idx, raw_line) in section.lines().enumerate() {
        let line_no = idx + 1;
        let chars: Vec<char> = raw_line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let col = i + 1;
            let c = chars[i];
            match c {
                ' ' | '\t' | '\r' => i += 1,
                '#' => break,
                '{' => {
                    out.push(Located { tok: Tok::LBrace, line: line_no, col });
                    i += 1;
                }
                '}' => {
                    out.push(Located { tok: Tok::RBrace, line: line_no, col });
                    i += 1;
                }
                '(' => {
                    out.push(Located { tok: Tok::LParen, line: line_no, col });
                    i += 1;
                }
                ')' => {
                    out.push(Located { tok: Tok::RParen, line: line_no, col });
                    i += 1;
                }
                '[' => {
                    out.push(Located { tok: Tok::LBracket, line: line_no, col });
                    i += 1;
                }
                ']' => {
                    out.push(Located { tok: Tok::RBracket, line: line_no, col });
                    i += 1;
                }
                ':' => {
                    out.push(Located { tok: Tok::Colon, line: line_no, col });
                    i += 1;
                }
                '@' => {
                    out.push(Located { tok: Tok::At, line: line_no, col });
                    i += 1;
                }
                ',' => {
                    out.push(Located { tok: Tok::Comma, line: line_no, col });
                    i += 1;
                }
                ';' => {
                    out.push(Located { tok: Tok::Semicolon, line: line_no, col });
                    i += 1;
                }
                '*' => {
                    out.push(Located { tok: Tok::Star, line: line_no, col });
                    i += 1;
                }
                '-' | '0'..='9' => {
                    let start = i;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    let value = text.parse().map_err(|_| DebugInfoParseError::UnexpectedToken { line: line_no, col, found: text.clone() })?;
                    out.push(Located { tok: Tok::Int(value), line: line_no, col });
                }
                '"' => {
                    let mut j = i + 1;
                    let mut s = String::new();
                    while j < chars.len() && chars[j] != '"' {
                        s.push(chars[j]);
                        j += 1;
                    }
                    out.push(Located { tok: Tok::Str(s), line: line_no, col });
                    i = j + 1;
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    out.push(Located { tok: Tok::Ident(chars[start..i].iter().collect()), line: line_no, col });
                }
                other => return Err(DebugInfoParseError::UnexpectedToken { line: line_no, col, found: other.to_string() }),
            }
        }
    }
    let eof_line = section.lines().count() + 1;
    out.push(Located { tok: Tok::Eof, line: eof_line, col: 1 });
    Ok(out)
}

struct Parser<'a> {
    tokens: &'a [Located],
    pos: usize,
    structs: HashMap<String, Type>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Located {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Located {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, found: &Located) -> DebugInfoParseError {
        if found.tok == Tok::Eof {
            DebugInfoParseError::UnexpectedEof
        } else {
            DebugInfoParseError::UnexpectedToken { line: found.line, col: found.col, found: format!("{:?}", found.tok) }
        }
    }

    fn expect(&mut self, expected: &Tok) -> Result<(), DebugInfoParseError> {
        let found = self.advance();
        if &found.tok == expected {
            Ok(())
        } else {
            Err(self.unexpected(&found))
        }
    }

    fn expect_ident(&mut self) -> Result<String, DebugInfoParseError> {
        match self.advance() {
            Located { tok: Tok::Ident(name), .. } => Ok(name),
            found => Err(self.unexpected(&found)),
        }
    }

    fn expect_int(&mut self) -> Result<i64, DebugInfoParseError> {
        match self.advance() {
            Located { tok: Tok::Int(n), .. } => Ok(n),
            found => Err(self.unexpected(&found)),
        }
    }

    fn expect_str(&mut self) -> Result<String, DebugInfoParseError> {
        match self.advance() {
            Located { tok: Tok::Str(s), .. } => Ok(s),
            found => Err(self.unexpected(&found)),
        }
    }

    /// Parses the single top-level `DIE_compilation_unit : { ... }` node.
    fn parse_root(&mut self) -> Result<Die, DebugInfoParseError> {
        self.parse_die()
    }

    fn parse_die(&mut self) -> Result<Die, DebugInfoParseError> {
        let tag = self.expect_ident()?;
        self.expect(&Tok::Colon)?;
        self.expect(&Tok::LBrace)?;

        match tag.as_str() {
            "DIE_compilation_unit" => {
                let children = self.parse_children()?;
                self.expect(&Tok::RBrace)?;
                Ok(Die::CompilationUnit { children })
            }
            "DIE_function" => {
                let mut name = String::new();
                let mut low_pc = 0u64;
                let mut high_pc = 0u64;
                let mut children = Vec::new();
                loop {
                    if self.peek().tok == Tok::RBrace {
                        break;
                    }
                    match self.peek().tok.clone() {
                        Tok::Ident(ref attr) if attr == "name" => {
                            self.advance();
                            self.expect(&Tok::Colon)?;
                            name = self.expect_str()?;
                        }
                        Tok::Ident(ref attr) if attr == "begin_addr" => {
                            self.advance();
                            self.expect(&Tok::Colon)?;
                            low_pc = self.expect_int()? as u64;
                        }
                        Tok::Ident(ref attr) if attr == "end_addr" => {
                            self.advance();
                            self.expect(&Tok::Colon)?;
                            high_pc = self.expect_int()? as u64;
                        }
                        Tok::Ident(ref child_tag) if child_tag.starts_with("DIE_") => {
                            children.push(self.parse_die()?);
                        }
                        _ => {
                            let found = self.advance();
                            return Err(self.unexpected(&found));
                        }
                    }
                    self.eat_separator();
                }
                self.expect(&Tok::RBrace)?;
                Ok(Die::Function { name, low_pc, high_pc, children })
            }
            "DIE_lexical_block" => {
                let mut low_pc = 0u64;
                let mut high_pc = 0u64;
                let mut children = Vec::new();
                loop {
                    if self.peek().tok == Tok::RBrace {
                        break;
                    }
                    match self.peek().tok.clone() {
                        Tok::Ident(ref attr) if attr == "begin_addr" => {
                            self.advance();
                            self.expect(&Tok::Colon)?;
                            low_pc = self.expect_int()? as u64;
                        }
                        Tok::Ident(ref attr) if attr == "end_addr" => {
                            self.advance();
                            self.expect(&Tok::Colon)?;
                            high_pc = self.expect_int()? as u64;
                        }
                        Tok::Ident(ref child_tag) if child_tag.starts_with("DIE_") => {
                            children.push(self.parse_die()?);
                        }
                        _ => {
                            let found = self.advance();
                            return Err(self.unexpected(&found));
                        }
                    }
                    self.eat_separator();
                }
                self.expect(&Tok::RBrace)?;
                Ok(Die::LexicalBlock { low_pc, high_pc, children })
            }
            "DIE_variable" => {
                let mut name = String::new();
                let mut ty = None;
                let mut location = None;
                loop {
                    if self.peek().tok == Tok::RBrace {
                        break;
                    }
                    let attr = self.expect_ident()?;
                    self.expect(&Tok::Colon)?;
                    match attr.as_str() {
                        "name" => name = self.expect_str()?,
                        "type" => ty = Some(self.parse_type()?),
                        "location" => location = Some(self.parse_location()?),
                        _ => {
                            return Err(DebugInfoParseError::UnexpectedToken {
                                line: self.peek().line,
                                col: self.peek().col,
                                found: format!("attribute {attr:?}"),
                            })
                        }
                    }
                    self.eat_separator();
                }
                self.expect(&Tok::RBrace)?;
                Ok(Die::Variable {
                    name,
                    ty: ty.unwrap_or(Type::Integer),
                    location: location.unwrap_or_else(|| LocExpr(vec![])),
                })
            }
            other => Err(DebugInfoParseError::UnexpectedToken {
                line: self.peek().line,
                col: self.peek().col,
                found: format!("unknown DIE tag {other:?}"),
            }),
        }
    }

    fn parse_children(&mut self) -> Result<Vec<Die>, DebugInfoParseError> {
        let mut children = Vec::new();
        loop {
            if self.peek().tok == Tok::RBrace {
                break;
            }
            children.push(self.parse_die()?);
            self.eat_separator();
        }
        Ok(children)
    }

    fn eat_separator(&mut self) {
        if self.peek().tok == Tok::Comma || self.peek().tok == Tok::Semicolon {
            self.advance();
        }
    }

    /// `type-expr := 'int' | 'float' | 'char' | '*' type-expr
    ///             | '[' type-expr ';' INT ']'
    ///             | 'struct' IDENT '{' (IDENT ':' type-expr '@' INT ','?)* '}'
    ///             | IDENT` (a reference to a previously defined struct).
    fn parse_type(&mut self) -> Result<Type, DebugInfoParseError> {
        if self.peek().tok == Tok::Star {
            self.advance();
            return Ok(Type::Pointer(Box::new(self.parse_type()?)));
        }
        if self.peek().tok == Tok::LBracket {
            self.advance();
            let element = self.parse_type()?;
            self.expect(&Tok::Semicolon)?;
            let length = self.expect_int()? as usize;
            self.expect(&Tok::RBracket)?;
            return Ok(Type::Array { element: Box::new(element), length });
        }
        let name = self.expect_ident()?;
        match name.as_str() {
            "int" => Ok(Type::Integer),
            "float" => Ok(Type::Float),
            "char" => Ok(Type::Char),
            "struct" => {
                let struct_name = self.expect_ident()?;
                self.expect(&Tok::LBrace)?;
                let mut fields = Vec::new();
                loop {
                    if self.peek().tok == Tok::RBrace {
                        break;
                    }
                    let field_name = self.expect_ident()?;
                    self.expect(&Tok::Colon)?;
                    let field_ty = self.parse_type()?;
                    self.expect(&Tok::At)?;
                    let offset = self.expect_int()? as u64;
                    fields.push(StructField { name: field_name, ty: field_ty, offset });
                    self.eat_separator();
                }
                self.expect(&Tok::RBrace)?;
                let ty = Type::Struct { name: struct_name.clone(), fields };
                self.structs.insert(struct_name, ty.clone());
                Ok(ty)
            }
            other => self.structs.get(other).cloned().ok_or_else(|| DebugInfoParseError::UnknownStruct { line: self.peek().line, name: other.to_string() }),
        }
    }

    /// `location-expr := op (';' op)*`, `op := 'fbreg' '(' INT ')' | 'push'
    /// '(' INT ')' | 'add'`.
    fn parse_location(&mut self) -> Result<LocExpr, DebugInfoParseError> {
        let mut ops = Vec::new();
        loop {
            let name = self.expect_ident()?;
            match name.as_str() {
                "fbreg" => {
                    self.expect(&Tok::LParen)?;
                    let offset = self.expect_int()?;
                    self.expect(&Tok::RParen)?;
                    ops.push(LocOp::FrameBaseRegisterOffset(offset));
                }
                "push" => {
                    self.expect(&Tok::LParen)?;
                    let value = self.expect_int()?;
                    self.expect(&Tok::RParen)?;
                    ops.push(LocOp::Push(value));
                }
                "add" => ops.push(LocOp::Add),
                other => {
                    return Err(DebugInfoParseError::UnexpectedToken { line: self.peek().line, col: self.peek().col, found: format!("location op {other:?}") })
                }
            }
            if self.peek().tok == Tok::Semicolon {
                self.advance();
            } else {
                break;
            }
        }
        Ok(LocExpr(ops))
    }
}

fn parse_debug_info_tree(section: &str) -> Result<Die, DebugInfoParseError> {
    let tokens = tokenize(section)?;
    let mut parser = Parser { tokens: &tokens, pos: 0, structs: HashMap::new() };
    let root = parser.parse_root()?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> String {
        r#"
.debug_line
1:0
2:3
3:7

.debug_info
DIE_compilation_unit : {
  DIE_function : {
    name: "main",
    begin_addr: 0,
    end_addr: 10,
    DIE_variable : {
      name: "x",
      type: int,
      location: fbreg(-2)
    },
    DIE_lexical_block : {
      begin_addr: 4,
      end_addr: 8,
      DIE_variable : {
        name: "y",
        type: struct Point { x: int @ 0, y: int @ 1 },
        location: fbreg(-4)
      }
    }
  }
}

.debug_source
int main() {
  int x = 1;
}
"#
        .to_string()
    }

    #[test]
    fn parses_all_three_sections() {
        let info = parse_debug_info(&sample_file()).unwrap();
        assert_eq!(info.line_mapping.locate(5).unwrap().line, 2);
        assert!(info.root.function_containing(5).is_some());
        assert!(info.source.is_some());
    }

    #[test]
    fn resolves_nested_variables_and_struct_fields() {
        let info = parse_debug_info(&sample_file()).unwrap();
        let scope = info.root.variables_visible_at(6);
        let (ty, _) = scope.get("y").unwrap();
        assert_eq!(ty.field("x").unwrap().offset, 0);
    }

    #[test]
    fn missing_debug_line_section_is_an_error() {
        let text = ".debug_info\nDIE_compilation_unit : {}\n";
        assert_eq!(parse_debug_info(text), Err(DebugInfoParseError::MissingSection(".debug_line")));
    }

    #[test]
    fn source_not_last_is_rejected() {
        let text = ".debug_source\nfoo\n.debug_line\n1:0\n";
        assert!(matches!(parse_debug_info(text), Err(DebugInfoParseError::SourceNotLast(_))));
    }

    #[test]
    fn malformed_line_row_reports_its_row_number() {
        let text = ".debug_line\nnotanumber\n.debug_info\nDIE_compilation_unit : {}\n";
        assert_eq!(parse_debug_info(text), Err(DebugInfoParseError::MalformedLineRow { line: 1, text: "notanumber".to_string() }));
    }

    #[test]
    fn unterminated_die_is_eof_error() {
        let text = ".debug_line\n1:0\n.debug_info\nDIE_compilation_unit : {\n";
        assert_eq!(parse_debug_info(text), Err(DebugInfoParseError::UnexpectedEof));
    }
}
