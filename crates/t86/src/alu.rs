//! Pure arithmetic-logic unit.
//!
//! Grounded in `t86/t86/cpu/alu.cpp`/`alu.h`: a collection of free functions
//! over 64-bit signed integers and IEEE-754 doubles, each producing a
//! `(value, flags)` pair. No state, no side effects — the reservation
//! station owns ALU *allocation* (see [`crate::reservation_station`]); this
//! module only computes.

use crate::common::error::ExecutionError;

/// Condition flags produced by an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// Result is negative under signed interpretation.
    pub sign: bool,
    /// Result is zero.
    pub zero: bool,
    /// Unsigned overflow on add/sub, or the last bit shifted out on shifts.
    pub carry: bool,
    /// Signed overflow on add/sub/mul, or `isinf` for floating-point ops.
    pub overflow: bool,
}

impl Flags {
    /// Packs the four flags into the low nibble of a value, matching the
    /// original's `operator int64_t()` conversion (bit 0 = sign, bit 1 =
    /// zero, bit 2 = carry, bit 3 = overflow).
    #[must_use]
    pub const fn to_bits(self) -> i64 {
        (self.sign as i64) | ((self.zero as i64) << 1) | ((self.carry as i64) << 2) | ((self.overflow as i64) << 3)
    }

    /// Unpacks flags from the low nibble of a value (the `Flags(int64_t)`
    /// constructor in the original).
    #[must_use]
    pub const fn from_bits(bits: i64) -> Self {
        Self {
            sign: bits & 0b0001 != 0,
            zero: bits & 0b0010 != 0,
            carry: bits & 0b0100 != 0,
            overflow: bits & 0b1000 != 0,
        }
    }

    fn from_signed_result(value: i64) -> Self {
        Self {
            sign: value < 0,
            zero: value == 0,
            carry: false,
            overflow: false,
        }
    }
}

/// Result of an integer ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntResult {
    /// The computed value.
    pub value: i64,
    /// Flags describing the result.
    pub flags: Flags,
}

/// Result of a floating-point ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FloatResult {
    /// The computed value.
    pub value: f64,
    /// Flags describing the result.
    pub flags: Flags,
}

/// `x + y`, with unsigned carry and signed overflow flags.
#[must_use]
pub fn add(x: i64, y: i64) -> IntResult {
    let (value, overflow) = x.overflowing_add(y);
    let carry = (x as u64).overflowing_add(y as u64).1;
    IntResult {
        value,
        flags: Flags {
            carry,
            overflow,
            ..Flags::from_signed_result(value)
        },
    }
}

/// `x - y`, with unsigned borrow (carry) and signed overflow flags.
#[must_use]
pub fn sub(x: i64, y: i64) -> IntResult {
    let (value, overflow) = x.overflowing_sub(y);
    let carry = (x as u64) < (y as u64);
    IntResult {
        value,
        flags: Flags {
            carry,
            overflow,
            ..Flags::from_signed_result(value)
        },
    }
}

/// `-x`.
#[must_use]
pub fn neg(x: i64) -> IntResult {
    let (value, overflow) = x.overflowing_neg();
    IntResult {
        value,
        flags: Flags {
            overflow,
            ..Flags::from_signed_result(value)
        },
    }
}

/// Unsigned multiplication; `overflow` set when the true product does not
/// fit in 64 bits.
#[must_use]
pub fn mul(x: i64, y: i64) -> IntResult {
    let (value, overflow) = (x as u64).overflowing_mul(y as u64);
    let value = value as i64;
    IntResult {
        value,
        flags: Flags {
            overflow,
            ..Flags::from_signed_result(value)
        },
    }
}

/// Signed multiplication; `overflow` set on signed overflow.
#[must_use]
pub fn signed_mul(x: i64, y: i64) -> IntResult {
    let (value, overflow) = x.overflowing_mul(y);
    IntResult {
        value,
        flags: Flags {
            overflow,
            ..Flags::from_signed_result(value)
        },
    }
}

/// Unsigned division. Division by zero is a fatal execution error
/// (spec §4.1).
pub fn div(x: i64, y: i64) -> Result<IntResult, ExecutionError> {
    if y == 0 {
        return Err(ExecutionError::DivisionByZero);
    }
    let value = ((x as u64) / (y as u64)) as i64;
    Ok(IntResult {
        value,
        flags: Flags::from_signed_result(value),
    })
}

/// Signed division. Division by zero is a fatal execution error.
pub fn signed_div(x: i64, y: i64) -> Result<IntResult, ExecutionError> {
    if y == 0 {
        return Err(ExecutionError::DivisionByZero);
    }
    let value = x.wrapping_div(y);
    Ok(IntResult {
        value,
        flags: Flags::from_signed_result(value),
    })
}

/// Signed modulus. Modulus by zero is a fatal execution error.
pub fn modulo(x: i64, y: i64) -> Result<IntResult, ExecutionError> {
    if y == 0 {
        return Err(ExecutionError::DivisionByZero);
    }
    let value = x.wrapping_rem(y);
    Ok(IntResult {
        value,
        flags: Flags::from_signed_result(value),
    })
}

/// Bitwise AND.
#[must_use]
pub fn bit_and(x: i64, y: i64) -> IntResult {
    let value = x & y;
    IntResult {
        value,
        flags: Flags::from_signed_result(value),
    }
}

/// Bitwise OR.
#[must_use]
pub fn bit_or(x: i64, y: i64) -> IntResult {
    let value = x | y;
    IntResult {
        value,
        flags: Flags::from_signed_result(value),
    }
}

/// Bitwise XOR.
#[must_use]
pub fn bit_xor(x: i64, y: i64) -> IntResult {
    let value = x ^ y;
    IntResult {
        value,
        flags: Flags::from_signed_result(value),
    }
}

/// Bitwise NOT.
#[must_use]
pub fn bit_not(x: i64) -> IntResult {
    let value = !x;
    IntResult {
        value,
        flags: Flags::from_signed_result(value),
    }
}

/// Left shift by `y` bits; carry is the last bit shifted out.
#[must_use]
pub fn left_shift(x: i64, y: i64) -> IntResult {
    let shift = (y & 63) as u32;
    let value = ((x as u64) << shift) as i64;
    let carry = shift > 0 && ((x as u64) >> (64 - shift)) & 1 != 0;
    IntResult {
        value,
        flags: Flags {
            carry,
            ..Flags::from_signed_result(value)
        },
    }
}

/// Arithmetic right shift by `y` bits; carry is the last bit shifted out.
#[must_use]
pub fn right_shift(x: i64, y: i64) -> IntResult {
    let shift = (y & 63) as u32;
    let value = x >> shift;
    let carry = shift > 0 && (x >> (shift - 1)) & 1 != 0;
    IntResult {
        value,
        flags: Flags {
            carry,
            ..Flags::from_signed_result(value)
        },
    }
}

fn float_flags(value: f64) -> Flags {
    Flags {
        sign: value.is_sign_negative(),
        zero: value == 0.0,
        carry: false,
        overflow: value.is_infinite(),
    }
}

/// `x + y`, floating point.
#[must_use]
pub fn fadd(x: f64, y: f64) -> FloatResult {
    let value = x + y;
    FloatResult {
        value,
        flags: float_flags(value),
    }
}

/// `x - y`, floating point.
#[must_use]
pub fn fsub(x: f64, y: f64) -> FloatResult {
    let value = x - y;
    FloatResult {
        value,
        flags: float_flags(value),
    }
}

/// `x * y`, floating point.
#[must_use]
pub fn fmul(x: f64, y: f64) -> FloatResult {
    let value = x * y;
    FloatResult {
        value,
        flags: float_flags(value),
    }
}

/// `x / y`, floating point. Division by zero is a fatal execution error,
/// matching the integer ALU (the original's comment above `mod` notwithstanding,
/// spec §4.1 requires this for both integer and float paths).
pub fn fdiv(x: f64, y: f64) -> Result<FloatResult, ExecutionError> {
    if y == 0.0 {
        return Err(ExecutionError::DivisionByZero);
    }
    let value = x / y;
    Ok(FloatResult {
        value,
        flags: float_flags(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1, 2)]
    #[case(i64::MAX, 1, i64::MIN)]
    #[case(-1, -1, -2)]
    fn add_matches(#[case] x: i64, #[case] y: i64, #[case] expected: i64) {
        assert_eq!(add(x, y).value, expected);
    }

    #[test]
    fn add_signed_overflow_sets_overflow_flag() {
        let r = add(i64::MAX, 1);
        assert!(r.flags.overflow);
        assert!(r.flags.sign);
    }

    #[test]
    fn sub_sets_carry_on_unsigned_borrow() {
        let r = sub(0, 1);
        assert!(r.flags.carry);
    }

    #[test]
    fn div_by_zero_is_fatal() {
        assert!(matches!(div(1, 0), Err(ExecutionError::DivisionByZero)));
        assert!(matches!(signed_div(1, 0), Err(ExecutionError::DivisionByZero)));
        assert!(matches!(modulo(1, 0), Err(ExecutionError::DivisionByZero)));
    }

    #[test]
    fn fdiv_by_zero_is_fatal() {
        assert!(matches!(fdiv(1.0, 0.0), Err(ExecutionError::DivisionByZero)));
    }

    #[test]
    fn float_overflow_sets_flag_on_infinity() {
        let r = fmul(f64::MAX, 2.0);
        assert!(r.flags.overflow);
    }

    #[test]
    fn left_shift_carry_is_last_bit_out() {
        let r = left_shift(0b1, 1);
        assert_eq!(r.value, 0b10);
        assert!(!r.flags.carry);
        let r2 = left_shift(1i64 << 63, 1);
        assert!(r2.flags.carry);
    }

    #[test]
    fn flags_roundtrip_through_bits() {
        let flags = Flags {
            sign: true,
            zero: false,
            carry: true,
            overflow: false,
        };
        assert_eq!(Flags::from_bits(flags.to_bits()), flags);
    }

    proptest::proptest! {
        /// Any nibble packed by `to_bits` unpacks back to the same flags
        /// (spec §8's flag-representation invariant: `Flags` is a lossless
        /// view of the low four bits of a value).
        #[test]
        fn flags_bits_roundtrip_for_every_nibble(bits in 0i64..16) {
            proptest::prop_assert_eq!(Flags::from_bits(bits).to_bits(), bits);
        }

        /// `add`/`sub` never panic across the full `i64` domain, and the
        /// zero/sign flags always agree with the returned value regardless
        /// of overflow (spec §8, "for all ticks... " invariants apply to
        /// every ALU result, not just the hand-picked cases above).
        #[test]
        fn add_and_sub_flags_always_match_their_value(x: i64, y: i64) {
            let added = add(x, y);
            proptest::prop_assert_eq!(added.flags.zero, added.value == 0);
            proptest::prop_assert_eq!(added.flags.sign, added.value < 0);

            let subtracted = sub(x, y);
            proptest::prop_assert_eq!(subtracted.flags.zero, subtracted.value == 0);
            proptest::prop_assert_eq!(subtracted.flags.sign, subtracted.value < 0);
        }

        /// `sub(x, y)` undoes `add(x, y)`: adding `y` back to the difference
        /// recovers `x`, independent of overflow (two's-complement wraparound
        /// is self-inverse).
        #[test]
        fn sub_is_the_inverse_of_add(x: i64, y: i64) {
            let added = add(x, y);
            proptest::prop_assert_eq!(sub(added.value, y).value, x);
        }
    }
}
