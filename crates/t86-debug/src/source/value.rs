//! Runtime values produced by the expression evaluator.
//!
//! Grounded in `t86/debugger/Source/Expression.h`'s `TypedValue` variant,
//! the tagged union the original uses to carry an evaluated expression's
//! result alongside enough type information to format and further
//! manipulate it (member access, indexing, dereference).

use crate::source::type_info::Type;

/// A value produced by evaluating a source-level expression.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A 64-bit float.
    Float(f64),
    /// A single character.
    Char(char),
    /// A pointer: the pointee type and the address it points to.
    Pointer { pointee: Type, address: u64 },
    /// An array's base address, for indexing without a full load.
    Array { element: Type, base_address: u64, length: usize },
    /// A struct's base address, for member access without a full load.
    Struct { ty: Type, base_address: u64 },
}

impl TypedValue {
    /// The [`Type`] this value was evaluated as.
    #[must_use]
    pub fn type_of(&self) -> Type {
        match self {
            Self::Integer(_) => Type::Integer,
            Self::Float(_) => Type::Float,
            Self::Char(_) => Type::Char,
            Self::Pointer { pointee, .. } => Type::Pointer(Box::new(pointee.clone())),
            Self::Array { element, length, .. } => Type::Array { element: Box::new(element.clone()), length: *length },
            Self::Struct { ty, .. } => ty.clone(),
        }
    }

    /// Reinterprets this value as a plain integer for arithmetic, the way
    /// the original's expression evaluator treats pointers and chars as
    /// integers in mixed arithmetic.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Char(c) => Some(*c as i64),
            Self::Pointer { address, .. } => Some(*address as i64),
            _ => None,
        }
    }

    /// Reinterprets this value as a float, widening an integer if needed.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_widens_to_integer() {
        assert_eq!(TypedValue::Char('A').as_integer(), Some(65));
    }

    #[test]
    fn integer_widens_to_float() {
        assert_eq!(TypedValue::Integer(3).as_float(), Some(3.0));
    }

    #[test]
    fn pointer_type_of_wraps_pointee() {
        let value = TypedValue::Pointer { pointee: Type::Integer, address: 100 };
        assert_eq!(value.type_of(), Type::Pointer(Box::new(Type::Integer)));
    }
}
