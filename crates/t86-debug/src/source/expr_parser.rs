//! Precedence-climbing parser for watch/print expressions.
//!
//! Grounded in `t86/debugger/Source/ExpressionParser.h`. The original
//! shares its lexer's low-level character classification with the
//! assembler's parser but has its own token set (comparisons, `.`, `&`)
//! that the assembly grammar has no use for; this keeps that split,
//! tokenizing with a small scanner local to this module rather than
//! overloading [`t86::parser::lexer`].

use thiserror::Error;

use super::expr_ast::{BinaryOp, Expr, UnaryOp};

/// A failure parsing a watch/print expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// An unrecognized character appeared in the input.
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),
    /// A token appeared where the grammar did not expect it.
    #[error("unexpected token {0:?}")]
    UnexpectedToken(String),
    /// Input ended mid-expression.
    #[error("unexpected end of expression")]
    UnexpectedEof,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Char(char),
    Ident(String),
    /// `$N`, a reference to the `N`th previously evaluated expression.
    EvaluatedExpr(usize),
    Symbol(&'static str),
    Eof,
}

fn tokenize(source: &str) -> Result<Vec<Tok>, ExpressionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    tokens.push(Tok::Float(text.parse().unwrap_or(0.0)));
                } else {
                    tokens.push(Tok::Int(text.parse().unwrap_or(0)));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            '\'' => {
                let literal = *chars.get(i + 1).ok_or(ExpressionError::UnexpectedEof)?;
                if chars.get(i + 2) != Some(&'\'') {
                    return Err(ExpressionError::UnexpectedChar(literal));
                }
                tokens.push(Tok::Char(literal));
                i += 3;
            }
            '$' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
                if j == start {
                    return Err(ExpressionError::UnexpectedChar('$'));
                }
                let text: String = chars[start..j].iter().collect();
                tokens.push(Tok::EvaluatedExpr(text.parse().unwrap_or(0)));
                i = j;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Symbol("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Symbol("!="));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Symbol("<="));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Tok::Symbol(">="));
                i += 2;
            }
            '=' => {
                tokens.push(Tok::Symbol("="));
                i += 1;
            }
            '<' => {
                tokens.push(Tok::Symbol("<"));
                i += 1;
            }
            '>' => {
                tokens.push(Tok::Symbol(">"));
                i += 1;
            }
            '+' => {
                tokens.push(Tok::Symbol("+"));
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Tok::Symbol("->"));
                i += 2;
            }
            '-' => {
                tokens.push(Tok::Symbol("-"));
                i += 1;
            }
            '*' => {
                tokens.push(Tok::Symbol("*"));
                i += 1;
            }
            '/' => {
                tokens.push(Tok::Symbol("/"));
                i += 1;
            }
            '%' => {
                tokens.push(Tok::Symbol("%"));
                i += 1;
            }
            '&' => {
                tokens.push(Tok::Symbol("&"));
                i += 1;
            }
            '.' => {
                tokens.push(Tok::Symbol("."));
                i += 1;
            }
            '[' => {
                tokens.push(Tok::Symbol("["));
                i += 1;
            }
            ']' => {
                tokens.push(Tok::Symbol("]"));
                i += 1;
            }
            '(' => {
                tokens.push(Tok::Symbol("("));
                i += 1;
            }
            ')' => {
                tokens.push(Tok::Symbol(")"));
                i += 1;
            }
            other => return Err(ExpressionError::UnexpectedChar(other)),
        }
    }
    tokens.push(Tok::Eof);
    Ok(tokens)
}

/// Parses `source` as a single expression.
///
/// # Errors
/// Returns [`ExpressionError`] on any malformed input.
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    parser.parse_assignment()
}

struct Parser<'a> {
    tokens: &'a [Tok],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).unwrap_or(&Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let token = self.peek().clone();
        self.pos += 1;
        token
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Tok::Symbol(s) if *s == symbol) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_assignment(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.parse_comparison()?;
        if self.eat_symbol("=") {
            let rhs = self.parse_assignment()?;
            return Ok(Expr::Assign(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_symbol("==") {
                BinaryOp::Eq
            } else if self.eat_symbol("!=") {
                BinaryOp::Ne
            } else if self.eat_symbol("<=") {
                BinaryOp::Le
            } else if self.eat_symbol(">=") {
                BinaryOp::Ge
            } else if self.eat_symbol("<") {
                BinaryOp::Lt
            } else if self.eat_symbol(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Mul
            } else if self.eat_symbol("/") {
                BinaryOp::Div
            } else if self.eat_symbol("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_symbol("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        if self.eat_symbol("*") {
            return Ok(Expr::Unary(UnaryOp::Deref, Box::new(self.parse_unary()?)));
        }
        if self.eat_symbol("&") {
            return Ok(Expr::Unary(UnaryOp::AddressOf, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_symbol("[") {
                let index = self.parse_assignment()?;
                if !self.eat_symbol("]") {
                    return Err(ExpressionError::UnexpectedToken(format!("{:?}", self.peek())));
                }
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_symbol(".") {
                match self.advance() {
                    Tok::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    other => return Err(ExpressionError::UnexpectedToken(format!("{other:?}"))),
                }
            } else if self.eat_symbol("->") {
                match self.advance() {
                    Tok::Ident(name) => expr = Expr::MemberDeref(Box::new(expr), name),
                    other => return Err(ExpressionError::UnexpectedToken(format!("{other:?}"))),
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_symbol("(") {
            let expr = self.parse_assignment()?;
            if !self.eat_symbol(")") {
                return Err(ExpressionError::UnexpectedToken(format!("{:?}", self.peek())));
            }
            return Ok(expr);
        }
        match self.advance() {
            Tok::Int(n) => Ok(Expr::Int(n)),
            Tok::Float(f) => Ok(Expr::Float(f)),
            Tok::Char(c) => Ok(Expr::Char(c)),
            Tok::Ident(name) => Ok(Expr::Ident(name)),
            Tok::EvaluatedExpr(n) => Ok(Expr::EvaluatedExpr(n)),
            Tok::Eof => Err(ExpressionError::UnexpectedEof),
            other => Err(ExpressionError::UnexpectedToken(format!("{other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_with_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(BinaryOp::Add, Box::new(Expr::Int(1)), Box::new(Expr::Binary(BinaryOp::Mul, Box::new(Expr::Int(2)), Box::new(Expr::Int(3)))))
        );
    }

    #[test]
    fn parses_member_and_index_chains() {
        let expr = parse("arr[0]").unwrap();
        assert_eq!(expr, Expr::Index(Box::new(Expr::Ident("arr".to_string())), Box::new(Expr::Int(0))));
    }

    #[test]
    fn parses_deref_and_negation() {
        let expr = parse("-x").unwrap();
        assert_eq!(expr, Expr::Unary(UnaryOp::Neg, Box::new(Expr::Ident("x".to_string()))));
    }

    #[test]
    fn parses_member_access() {
        let expr = parse("point.x").unwrap();
        assert_eq!(expr, Expr::Member(Box::new(Expr::Ident("point".to_string())), "x".to_string()));
    }

    #[test]
    fn parses_assignment() {
        let expr = parse("x = 5").unwrap();
        assert_eq!(expr, Expr::Assign(Box::new(Expr::Ident("x".to_string())), Box::new(Expr::Int(5))));
    }

    #[test]
    fn parses_char_literal() {
        assert_eq!(parse("'a'").unwrap(), Expr::Char('a'));
    }

    #[test]
    fn parses_evaluated_expr_reference() {
        assert_eq!(parse("$3 + 1").unwrap(), Expr::Binary(BinaryOp::Add, Box::new(Expr::EvaluatedExpr(3)), Box::new(Expr::Int(1))));
    }

    #[test]
    fn parses_modulo_at_multiplicative_precedence() {
        let expr = parse("7 % 3").unwrap();
        assert_eq!(expr, Expr::Binary(BinaryOp::Mod, Box::new(Expr::Int(7)), Box::new(Expr::Int(3))));
    }

    #[test]
    fn parses_member_deref_access() {
        let expr = parse("p->x").unwrap();
        assert_eq!(expr, Expr::MemberDeref(Box::new(Expr::Ident("p".to_string())), "x".to_string()));
    }

    #[test]
    fn member_deref_chains_with_index() {
        let expr = parse("p->arr[0]").unwrap();
        assert_eq!(
            expr,
            Expr::Index(
                Box::new(Expr::MemberDeref(Box::new(Expr::Ident("p".to_string())), "arr".to_string())),
                Box::new(Expr::Int(0))
            )
        );
    }
}
