//! Source-level type descriptions.
//!
//! Grounded in `t86/debugger/Source/Type.h`: a small closed hierarchy
//! covering the primitive and compound types a T86 compiler's debug info
//! can describe, collapsed from the original's class hierarchy into one
//! sum type per the same redesign principle applied to [`crate::value::TypedValue`].

/// A source-level type as recorded in debug info.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// A 64-bit signed integer.
    Integer,
    /// A 64-bit IEEE-754 float.
    Float,
    /// A single character (stored as one word, low byte significant).
    Char,
    /// A pointer to another type.
    Pointer(Box<Type>),
    /// A fixed-length array of elements.
    Array { element: Box<Type>, length: usize },
    /// A named aggregate of fields, each at a byte offset from the
    /// struct's base address.
    Struct { name: String, fields: Vec<StructField> },
}

/// One field of a [`Type::Struct`].
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: Type,
    /// Byte offset from the struct's base address.
    pub offset: u64,
}

impl Type {
    /// Size of one value of this type, in 64-bit words (T86 has no sub-word
    /// addressing; every scalar occupies exactly one word, matching the
    /// original's `sizeof` always being a multiple of the machine word).
    #[must_use]
    pub fn size_in_words(&self) -> usize {
        match self {
            Self::Integer | Self::Float | Self::Char | Self::Pointer(_) => 1,
            Self::Array { element, length } => element.size_in_words() * length,
            Self::Struct { fields, .. } => fields.iter().map(|f| f.ty.size_in_words()).sum(),
        }
    }

    /// Looks up a named field on a struct type.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&StructField> {
        match self {
            Self::Struct { fields, .. } => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// The element type of an array or pointer, used when evaluating `[]`
    /// or unary `*` on a value of this type.
    #[must_use]
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Self::Pointer(inner) | Self::Array { element: inner, .. } => Some(inner),
            _ => None,
        }
    }
}
