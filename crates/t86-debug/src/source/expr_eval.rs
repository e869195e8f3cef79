//! Evaluates a parsed expression against a running CPU's memory and the
//! variables visible at the current program counter.
//!
//! Grounded in `t86/debugger/Source/Expression.h`'s visitor-based
//! evaluator, restructured as a plain recursive function over
//! [`Expr`] since Rust's `match` makes the visitor pattern unnecessary
//! (spec §4.16 supplement, "Expression evaluation").

use std::collections::HashMap;

use thiserror::Error;

use crate::source::expr_ast::{BinaryOp, Expr, UnaryOp};
use crate::source::loc_expr::{LocExpr, LocExprError};
use crate::source::type_info::Type;
use crate::source::value::TypedValue;

/// A failure evaluating an expression against live state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// No variable of that name is visible at the current program counter.
    #[error("no variable named {0:?} is visible here")]
    UnknownVariable(String),
    /// A location expression failed to resolve.
    #[error(transparent)]
    Location(#[from] LocExprError),
    /// A memory address could not be read (or written).
    #[error("memory access failed at address {0:#x}")]
    MemoryAccess(u64),
    /// An operator was applied to an incompatible type (e.g. indexing a
    /// plain integer, or adding a struct to a float).
    #[error("operator not supported for this value's type")]
    TypeMismatch,
    /// A struct had no field with the requested name.
    #[error("no field named {0:?}")]
    UnknownField(String),
    /// The left-hand side of an assignment was not an addressable place
    /// (e.g. `1 + 1 = x`).
    #[error("left-hand side of assignment is not assignable")]
    NotAssignable,
    /// An `EvaluatedExpr(n)` reference named a slot the session's history
    /// does not have (or has not reached yet).
    #[error("no evaluated result ${0} in this session")]
    UnknownEvaluatedExpr(usize),
    /// Integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Read/write access to the running CPU, kept as trait objects so the
/// evaluator does not depend on `t86::cpu::Cpu` directly and can be
/// driven from tests with a plain in-memory model.
pub trait EvalContext {
    /// Reads one word of memory.
    fn read_memory(&self, address: u64) -> Option<i64>;
    /// Writes one word of memory.
    fn write_memory(&mut self, address: u64, value: i64);
    /// The current value of the frame-base register (`BP`).
    fn frame_base(&self) -> i64;
}

/// Evaluates `expr` for reading, resolving variable references through
/// `scope`, memory through `ctx`, and any `$N` references against
/// `history` (results of previously evaluated expressions in the same
/// debug session, oldest first — spec §4.12, "EvaluatedExpr").
///
/// # Errors
/// Returns [`EvalError`] if a variable is undefined, a memory access is
/// out of bounds, an operator is applied to an incompatible type, or a
/// `$N` reference names a slot `history` does not have.
pub fn evaluate(expr: &Expr, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<TypedValue, EvalError> {
    match expr {
        Expr::Int(n) => Ok(TypedValue::Integer(*n)),
        Expr::Float(f) => Ok(TypedValue::Float(*f)),
        Expr::Char(c) => Ok(TypedValue::Char(*c)),
        Expr::Ident(name) => load_variable(name, scope, ctx),
        Expr::EvaluatedExpr(n) => history.get(*n).cloned().ok_or(EvalError::UnknownEvaluatedExpr(*n)),
        Expr::Unary(op, inner) => evaluate_unary(*op, inner, scope, ctx, history),
        Expr::Binary(op, lhs, rhs) => evaluate_binary(*op, lhs, rhs, scope, ctx, history),
        Expr::Index(base, index) => evaluate_index(base, index, scope, ctx, history),
        Expr::Member(base, field) => evaluate_member(base, field, scope, ctx, history),
        Expr::MemberDeref(base, field) => evaluate_member_deref(base, field, scope, ctx, history),
        Expr::Assign(lhs, rhs) => {
            let value = evaluate(rhs, scope, ctx, history)?;
            assign(lhs, &value, scope, ctx, history)?;
            Ok(value)
        }
    }
}

fn load_variable(name: &str, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext) -> Result<TypedValue, EvalError> {
    let (ty, location) = scope.get(name).ok_or_else(|| EvalError::UnknownVariable(name.to_string()))?;
    let address = location.evaluate(ctx.frame_base())?;
    load_typed(ty, address, ctx)
}

fn load_typed(ty: &Type, address: u64, ctx: &mut impl EvalContext) -> Result<TypedValue, EvalError> {
    match ty {
        Type::Integer => Ok(TypedValue::Integer(ctx.read_memory(address).ok_or(EvalError::MemoryAccess(address))?)),
        Type::Float => Ok(TypedValue::Float(f64::from_bits(ctx.read_memory(address).ok_or(EvalError::MemoryAccess(address))? as u64))),
        Type::Char => {
            let raw = ctx.read_memory(address).ok_or(EvalError::MemoryAccess(address))?;
            Ok(TypedValue::Char(char::from_u32(raw as u32).unwrap_or('\u{FFFD}')))
        }
        Type::Pointer(pointee) => Ok(TypedValue::Pointer {
            pointee: (**pointee).clone(),
            address: ctx.read_memory(address).ok_or(EvalError::MemoryAccess(address))? as u64,
        }),
        Type::Array { element, length } => Ok(TypedValue::Array {
            element: (**element).clone(),
            base_address: address,
            length: *length,
        }),
        Type::Struct { .. } => Ok(TypedValue::Struct { ty: ty.clone(), base_address: address }),
    }
}

fn evaluate_unary(op: UnaryOp, inner: &Expr, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<TypedValue, EvalError> {
    match op {
        UnaryOp::Neg => {
            let value = evaluate(inner, scope, ctx, history)?;
            value.as_float().map(TypedValue::Float).or_else(|| value.as_integer().map(|n| TypedValue::Integer(-n))).map(negate).transpose()?.ok_or(EvalError::TypeMismatch)
        }
        UnaryOp::Deref => {
            let value = evaluate(inner, scope, ctx, history)?;
            match value {
                TypedValue::Pointer { pointee, address } => load_typed(&pointee, address, ctx),
                _ => Err(EvalError::TypeMismatch),
            }
        }
        UnaryOp::AddressOf => {
            let address = address_of(inner, scope, ctx, history)?;
            Ok(TypedValue::Pointer { pointee: type_of_place(inner, scope, ctx, history)?, address })
        }
    }
}

fn negate(value: TypedValue) -> Result<TypedValue, EvalError> {
    match value {
        TypedValue::Integer(n) => Ok(TypedValue::Integer(-n)),
        TypedValue::Float(f) => Ok(TypedValue::Float(-f)),
        _ => Err(EvalError::TypeMismatch),
    }
}

fn evaluate_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<TypedValue, EvalError> {
    let lhs = evaluate(lhs, scope, ctx, history)?;
    let rhs = evaluate(rhs, scope, ctx, history)?;
    if let Some(result) = pointer_arithmetic(op, &lhs, &rhs)? {
        return Ok(result);
    }
    if let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) {
        if matches!(lhs, TypedValue::Float(_)) || matches!(rhs, TypedValue::Float(_)) {
            return Ok(apply_float(op, a, b));
        }
    }
    let a = lhs.as_integer().ok_or(EvalError::TypeMismatch)?;
    let b = rhs.as_integer().ok_or(EvalError::TypeMismatch)?;
    apply_integer(op, a, b)
}

/// Handles `Int`/`Pointer` arithmetic that scales by the pointee's size
/// instead of treating the address as a plain integer (`p + 1` advances by
/// one element, `p2 - p1` counts elements between them), matching how the
/// original's `Expression` evaluator special-cases pointer operands before
/// falling back to its generic arithmetic (spec §4.16 supplement).
///
/// Returns `Ok(None)` when neither operand is a pointer, so the caller
/// falls through to the ordinary float/integer arithmetic paths.
fn pointer_arithmetic(op: BinaryOp, lhs: &TypedValue, rhs: &TypedValue) -> Result<Option<TypedValue>, EvalError> {
    match (lhs, rhs) {
        (TypedValue::Pointer { pointee: lp, address: la }, TypedValue::Pointer { pointee: rp, address: ra }) => match op {
            BinaryOp::Sub => {
                if lp != rp {
                    return Err(EvalError::TypeMismatch);
                }
                let scale = lp.size_in_words().max(1) as i64;
                Ok(Some(TypedValue::Integer((*la as i64).wrapping_sub(*ra as i64) / scale)))
            }
            BinaryOp::Add => Err(EvalError::TypeMismatch),
            _ => Ok(None),
        },
        (TypedValue::Pointer { pointee, address }, other) => match op {
            BinaryOp::Add | BinaryOp::Sub => {
                let offset = other.as_integer().ok_or(EvalError::TypeMismatch)?;
                let scale = pointee.size_in_words().max(1) as i64;
                let delta = offset.wrapping_mul(scale);
                let new_address = if op == BinaryOp::Add { (*address as i64).wrapping_add(delta) } else { (*address as i64).wrapping_sub(delta) };
                Ok(Some(TypedValue::Pointer { pointee: pointee.clone(), address: new_address as u64 }))
            }
            _ => Ok(None),
        },
        (other, TypedValue::Pointer { pointee, address }) => match op {
            BinaryOp::Add => {
                let offset = other.as_integer().ok_or(EvalError::TypeMismatch)?;
                let scale = pointee.size_in_words().max(1) as i64;
                let new_address = (*address as i64).wrapping_add(offset.wrapping_mul(scale));
                Ok(Some(TypedValue::Pointer { pointee: pointee.clone(), address: new_address as u64 }))
            }
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn apply_integer(op: BinaryOp, a: i64, b: i64) -> Result<TypedValue, EvalError> {
    Ok(match op {
        BinaryOp::Add => TypedValue::Integer(a.wrapping_add(b)),
        BinaryOp::Sub => TypedValue::Integer(a.wrapping_sub(b)),
        BinaryOp::Mul => TypedValue::Integer(a.wrapping_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            TypedValue::Integer(a.wrapping_div(b))
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            TypedValue::Integer(a.wrapping_rem(b))
        }
        BinaryOp::Eq => TypedValue::Integer(i64::from(a == b)),
        BinaryOp::Ne => TypedValue::Integer(i64::from(a != b)),
        BinaryOp::Lt => TypedValue::Integer(i64::from(a < b)),
        BinaryOp::Le => TypedValue::Integer(i64::from(a <= b)),
        BinaryOp::Gt => TypedValue::Integer(i64::from(a > b)),
        BinaryOp::Ge => TypedValue::Integer(i64::from(a >= b)),
    })
}

fn apply_float(op: BinaryOp, a: f64, b: f64) -> TypedValue {
    match op {
        BinaryOp::Add => TypedValue::Float(a + b),
        BinaryOp::Sub => TypedValue::Float(a - b),
        BinaryOp::Mul => TypedValue::Float(a * b),
        BinaryOp::Div => TypedValue::Float(a / b),
        BinaryOp::Mod => TypedValue::Float(a % b),
        BinaryOp::Eq => TypedValue::Integer(i64::from((a - b).abs() < f64::EPSILON)),
        BinaryOp::Ne => TypedValue::Integer(i64::from((a - b).abs() >= f64::EPSILON)),
        BinaryOp::Lt => TypedValue::Integer(i64::from(a < b)),
        BinaryOp::Le => TypedValue::Integer(i64::from(a <= b)),
        BinaryOp::Gt => TypedValue::Integer(i64::from(a > b)),
        BinaryOp::Ge => TypedValue::Integer(i64::from(a >= b)),
    }
}

fn evaluate_index(base: &Expr, index: &Expr, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<TypedValue, EvalError> {
    let base_value = evaluate(base, scope, ctx, history)?;
    let index_value = evaluate(index, scope, ctx, history)?.as_integer().ok_or(EvalError::TypeMismatch)?;
    match base_value {
        TypedValue::Array { element, base_address, .. } => {
            let address = base_address + (index_value as u64) * element.size_in_words() as u64;
            load_typed(&element, address, ctx)
        }
        TypedValue::Pointer { pointee, address } => {
            let elem_address = address + (index_value as u64) * pointee.size_in_words() as u64;
            load_typed(&pointee, elem_address, ctx)
        }
        _ => Err(EvalError::TypeMismatch),
    }
}

fn evaluate_member(base: &Expr, field: &str, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<TypedValue, EvalError> {
    let base_value = evaluate(base, scope, ctx, history)?;
    match base_value {
        TypedValue::Struct { ty, base_address } => {
            let member = ty.field(field).ok_or_else(|| EvalError::UnknownField(field.to_string()))?;
            load_typed(&member.ty, base_address + member.offset, ctx)
        }
        _ => Err(EvalError::TypeMismatch),
    }
}

/// Evaluates `base->field`, equivalent to `(*base).field`: `base` must be a
/// pointer to a struct, and the field is loaded from the pointee's memory
/// rather than from `base`'s own address.
fn evaluate_member_deref(base: &Expr, field: &str, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<TypedValue, EvalError> {
    let base_value = evaluate(base, scope, ctx, history)?;
    match base_value {
        TypedValue::Pointer { pointee, address } => {
            let member = pointee.field(field).ok_or_else(|| EvalError::UnknownField(field.to_string()))?;
            load_typed(&member.ty, address + member.offset, ctx)
        }
        _ => Err(EvalError::TypeMismatch),
    }
}

/// Resolves the memory address an expression names, for assignment and
/// `&expr`. Only identifiers, dereferences, indices, and member accesses
/// are addressable places; literals and arithmetic results are not.
fn address_of(expr: &Expr, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<u64, EvalError> {
    match expr {
        Expr::Ident(name) => {
            let (_, location) = scope.get(name.as_str()).ok_or_else(|| EvalError::UnknownVariable(name.clone()))?;
            Ok(location.evaluate(ctx.frame_base())?)
        }
        Expr::Unary(UnaryOp::Deref, inner) => match evaluate(inner, scope, ctx, history)? {
            TypedValue::Pointer { address, .. } => Ok(address),
            _ => Err(EvalError::TypeMismatch),
        },
        Expr::Index(base, index) => {
            let base_value = evaluate(base, scope, ctx, history)?;
            let index_value = evaluate(index, scope, ctx, history)?.as_integer().ok_or(EvalError::TypeMismatch)?;
            match base_value {
                TypedValue::Array { element, base_address, .. } => Ok(base_address + (index_value as u64) * element.size_in_words() as u64),
                TypedValue::Pointer { pointee, address } => Ok(address + (index_value as u64) * pointee.size_in_words() as u64),
                _ => Err(EvalError::TypeMismatch),
            }
        }
        Expr::Member(base, field) => match evaluate(base, scope, ctx, history)? {
            TypedValue::Struct { ty, base_address } => {
                let member = ty.field(field).ok_or_else(|| EvalError::UnknownField(field.clone()))?;
                Ok(base_address + member.offset)
            }
            _ => Err(EvalError::TypeMismatch),
        },
        Expr::MemberDeref(base, field) => match evaluate(base, scope, ctx, history)? {
            TypedValue::Pointer { pointee, address } => {
                let member = pointee.field(field).ok_or_else(|| EvalError::UnknownField(field.clone()))?;
                Ok(address + member.offset)
            }
            _ => Err(EvalError::TypeMismatch),
        },
        _ => Err(EvalError::NotAssignable),
    }
}

fn type_of_place(expr: &Expr, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<Type, EvalError> {
    Ok(evaluate(expr, scope, ctx, history)?.type_of())
}

fn assign(lhs: &Expr, value: &TypedValue, scope: &HashMap<String, (&Type, &LocExpr)>, ctx: &mut impl EvalContext, history: &[TypedValue]) -> Result<(), EvalError> {
    let address = address_of(lhs, scope, ctx, history)?;
    let raw = match value {
        TypedValue::Integer(n) => *n,
        TypedValue::Float(f) => f.to_bits() as i64,
        TypedValue::Char(c) => i64::from(*c as u32),
        TypedValue::Pointer { address, .. } => *address as i64,
        TypedValue::Array { .. } | TypedValue::Struct { .. } => return Err(EvalError::TypeMismatch),
    };
    ctx.write_memory(address, raw);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::expr_parser::parse;
    use std::collections::HashMap as Map;

    struct FakeMemory {
        words: Vec<i64>,
        frame_base: i64,
    }

    impl EvalContext for FakeMemory {
        fn read_memory(&self, address: u64) -> Option<i64> {
            self.words.get(address as usize).copied()
        }
        fn write_memory(&mut self, address: u64, value: i64) {
            if let Some(slot) = self.words.get_mut(address as usize) {
                *slot = value;
            }
        }
        fn frame_base(&self) -> i64 {
            self.frame_base
        }
    }

    #[test]
    fn evaluates_arithmetic_without_any_scope() {
        let expr = parse("2 + 3 * 4").unwrap();
        let mut ctx = FakeMemory { words: vec![], frame_base: 0 };
        let value = evaluate(&expr, &Map::new(), &mut ctx, &[]).unwrap();
        assert_eq!(value, TypedValue::Integer(14));
    }

    #[test]
    fn reads_a_scoped_variable_through_its_location() {
        let location = LocExpr(vec![crate::source::loc_expr::LocOp::Push(2)]);
        let ty = Type::Integer;
        let mut scope = Map::new();
        scope.insert("x".to_string(), (&ty, &location));
        let mut ctx = FakeMemory { words: vec![0, 0, 42], frame_base: 0 };
        let expr = parse("x").unwrap();
        assert_eq!(evaluate(&expr, &scope, &mut ctx, &[]).unwrap(), TypedValue::Integer(42));
    }

    #[test]
    fn assignment_writes_through_to_memory() {
        let location = LocExpr(vec![crate::source::loc_expr::LocOp::Push(0)]);
        let ty = Type::Integer;
        let mut scope = Map::new();
        scope.insert("x".to_string(), (&ty, &location));
        let mut ctx = FakeMemory { words: vec![0], frame_base: 0 };
        let expr = parse("x = 99").unwrap();
        evaluate(&expr, &scope, &mut ctx, &[]).unwrap();
        assert_eq!(ctx.words[0], 99);
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let expr = parse("missing").unwrap();
        let mut ctx = FakeMemory { words: vec![], frame_base: 0 };
        assert!(matches!(evaluate(&expr, &Map::new(), &mut ctx, &[]), Err(EvalError::UnknownVariable(_))));
    }

    #[test]
    fn evaluated_expr_reference_resolves_from_history() {
        let expr = parse("$0 + 1").unwrap();
        let mut ctx = FakeMemory { words: vec![], frame_base: 0 };
        let history = [TypedValue::Integer(41)];
        assert_eq!(evaluate(&expr, &Map::new(), &mut ctx, &history).unwrap(), TypedValue::Integer(42));
    }

    #[test]
    fn evaluated_expr_out_of_range_is_an_error() {
        let expr = parse("$5").unwrap();
        let mut ctx = FakeMemory { words: vec![], frame_base: 0 };
        assert!(matches!(evaluate(&expr, &Map::new(), &mut ctx, &[]), Err(EvalError::UnknownEvaluatedExpr(5))));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let expr = parse("1 / 0").unwrap();
        let mut ctx = FakeMemory { words: vec![], frame_base: 0 };
        assert!(matches!(evaluate(&expr, &Map::new(), &mut ctx, &[]), Err(EvalError::DivisionByZero)));
    }

    #[test]
    fn modulo_by_zero_is_an_error() {
        let expr = parse("1 % 0").unwrap();
        let mut ctx = FakeMemory { words: vec![], frame_base: 0 };
        assert!(matches!(evaluate(&expr, &Map::new(), &mut ctx, &[]), Err(EvalError::DivisionByZero)));
    }

    #[test]
    fn modulo_computes_the_remainder() {
        let expr = parse("7 % 3").unwrap();
        let mut ctx = FakeMemory { words: vec![], frame_base: 0 };
        assert_eq!(evaluate(&expr, &Map::new(), &mut ctx, &[]).unwrap(), TypedValue::Integer(1));
    }

    #[test]
    fn pointer_plus_int_scales_by_pointee_size() {
        let location = LocExpr(vec![crate::source::loc_expr::LocOp::Push(0)]);
        let ty = Type::Pointer(Box::new(Type::Integer));
        let mut scope = Map::new();
        scope.insert("p".to_string(), (&ty, &location));
        // Word at address 0 (p's own storage) holds the pointer value 10.
        let mut ctx = FakeMemory { words: vec![10], frame_base: 0 };
        let expr = parse("p + 2").unwrap();
        assert_eq!(evaluate(&expr, &scope, &mut ctx, &[]).unwrap(), TypedValue::Pointer { pointee: Type::Integer, address: 12 });
    }

    #[test]
    fn int_plus_pointer_scales_by_pointee_size() {
        let location = LocExpr(vec![crate::source::loc_expr::LocOp::Push(0)]);
        let ty = Type::Pointer(Box::new(Type::Integer));
        let mut scope = Map::new();
        scope.insert("p".to_string(), (&ty, &location));
        let mut ctx = FakeMemory { words: vec![10], frame_base: 0 };
        let expr = parse("2 + p").unwrap();
        assert_eq!(evaluate(&expr, &scope, &mut ctx, &[]).unwrap(), TypedValue::Pointer { pointee: Type::Integer, address: 12 });
    }

    #[test]
    fn pointer_minus_pointer_divides_by_pointee_size() {
        let a = TypedValue::Pointer { pointee: Type::Integer, address: 20 };
        let b = TypedValue::Pointer { pointee: Type::Integer, address: 8 };
        let result = pointer_arithmetic(BinaryOp::Sub, &a, &b).unwrap().unwrap();
        assert_eq!(result, TypedValue::Integer(12));
    }

    #[test]
    fn pointer_minus_pointer_with_mismatched_pointees_is_an_error() {
        let a = TypedValue::Pointer { pointee: Type::Integer, address: 20 };
        let b = TypedValue::Pointer { pointee: Type::Float, address: 8 };
        assert!(matches!(pointer_arithmetic(BinaryOp::Sub, &a, &b), Err(EvalError::TypeMismatch)));
    }

    #[test]
    fn member_deref_reads_field_through_pointer() {
        let struct_ty = Type::Struct {
            name: "Point".to_string(),
            fields: vec![
                crate::source::type_info::StructField { name: "x".to_string(), ty: Type::Integer, offset: 0 },
                crate::source::type_info::StructField { name: "y".to_string(), ty: Type::Integer, offset: 1 },
            ],
        };
        let location = LocExpr(vec![crate::source::loc_expr::LocOp::Push(0)]);
        let ptr_ty = Type::Pointer(Box::new(struct_ty));
        let mut scope = Map::new();
        scope.insert("p".to_string(), (&ptr_ty, &location));
        // p's own storage at address 0 holds the struct's base address, 5;
        // the struct's y field lives at address 5 + 1.
        let mut ctx = FakeMemory { words: vec![5, 0, 0, 0, 0, 11, 22], frame_base: 0 };
        let expr = parse("p->y").unwrap();
        assert_eq!(evaluate(&expr, &scope, &mut ctx, &[]).unwrap(), TypedValue::Integer(22));
    }
}
