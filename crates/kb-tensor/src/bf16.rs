use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::Sum;
use std::num::{FpCategory, ParseFloatError};
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};
use std::str::FromStr;

const SIGN_MASK: u16 = 0x8000;
const EXPONENT_MASK: u16 = 0x7F80;
const SIGNIFICAND_MASK: u16 = 0x007F;
const QUIET_BIT: u16 = 0x0040;

/// A 16-bit brain floating point number, emulated in software.
///
/// The layout is the upper half of an IEEE 754 single: 1 sign bit, 8 exponent
/// bits and 7 significand bits. The exponent range is the same as `f32`, only
/// precision is reduced.
///
/// Every arithmetic operation widens its operands to `f32` (exact), computes
/// there, and narrows the result back with round-to-nearest-even. Nothing is
/// ever computed natively in 16 bits.
#[derive(Clone, Copy, Default)]
#[repr(transparent)]
pub struct BFloat16(u16);

impl BFloat16 {
    pub const ZERO: BFloat16 = BFloat16(0x0000);
    pub const NEG_ZERO: BFloat16 = BFloat16(0x8000);
    pub const ONE: BFloat16 = BFloat16(0x3F80);
    pub const NEG_ONE: BFloat16 = BFloat16(0xBF80);
    pub const INFINITY: BFloat16 = BFloat16(0x7F80);
    pub const NEG_INFINITY: BFloat16 = BFloat16(0xFF80);
    /// Canonical quiet NaN.
    pub const NAN: BFloat16 = BFloat16(0xFFC1);
    /// Canonical signaling NaN.
    pub const SIGNALING_NAN: BFloat16 = BFloat16(0xFF81);
    /// Largest finite value.
    pub const MAX: BFloat16 = BFloat16(0x7F7F);
    /// Most negative finite value.
    pub const MIN: BFloat16 = BFloat16(0xFF7F);
    /// Smallest positive normal value (2^-126).
    pub const MIN_POSITIVE: BFloat16 = BFloat16(0x0080);
    /// Smallest positive subnormal value (2^-133).
    pub const MIN_POSITIVE_SUBNORMAL: BFloat16 = BFloat16(0x0001);
    /// Difference between 1.0 and the next larger value (2^-7).
    pub const EPSILON: BFloat16 = BFloat16(0x3C00);
    pub const PI: BFloat16 = BFloat16(0x4049);

    pub const EXPONENT_BITS: u32 = 8;
    pub const SIGNIFICAND_BITS: u32 = 7;
    pub const EXPONENT_BIAS: i32 = 127;

    /// Reinterpret a raw bit pattern.
    #[inline]
    pub const fn from_bits(bits: u16) -> Self {
        BFloat16(bits)
    }

    /// Returns the raw bit pattern.
    #[inline]
    pub const fn to_bits(self) -> u16 {
        self.0
    }

    /// Assemble a value from its three bit fields. Fields wider than their
    /// slot are masked.
    pub const fn from_parts(negative: bool, exponent: u8, significand: u8) -> Self {
        let sign = if negative { SIGN_MASK } else { 0 };
        BFloat16(sign | ((exponent as u16) << 7) | (significand as u16 & SIGNIFICAND_MASK))
    }

    /// Narrow an `f32` with round-to-nearest-even on the 16 dropped bits.
    ///
    /// Values beyond the finite range round to signed infinity. NaNs keep
    /// their sign and upper payload and are forced quiet.
    #[inline]
    pub fn from_f32(value: f32) -> Self {
        let x = value.to_bits();
        if x & 0x7FFF_FFFF > 0x7F80_0000 {
            return BFloat16(((x >> 16) as u16) | QUIET_BIT);
        }
        // Round up when the round bit is set and either a sticky bit or the
        // retained LSB is set.
        let round_bit = 0x0000_8000u32;
        if x & round_bit != 0 && x & (3 * round_bit - 1) != 0 {
            BFloat16((x >> 16) as u16 + 1)
        } else {
            BFloat16((x >> 16) as u16)
        }
    }

    /// Narrow an `f64` through `f32`.
    pub fn from_f64(value: f64) -> Self {
        Self::from_f32(value as f32)
    }

    /// Widen to `f32`. Exact.
    #[inline]
    pub fn to_f32(self) -> f32 {
        f32::from_bits((self.0 as u32) << 16)
    }

    /// Widen to `f64`. Exact.
    #[inline]
    pub fn to_f64(self) -> f64 {
        f64::from(self.to_f32())
    }

    #[inline]
    fn map(self, f: impl FnOnce(f32) -> f32) -> Self {
        Self::from_f32(f(self.to_f32()))
    }

    #[inline]
    fn zip(self, other: Self, f: impl FnOnce(f32, f32) -> f32) -> Self {
        Self::from_f32(f(self.to_f32(), other.to_f32()))
    }

    // Bit fields.

    pub const fn sign_bit(self) -> bool {
        self.0 & SIGN_MASK != 0
    }

    pub const fn exponent_bits(self) -> u8 {
        ((self.0 & EXPONENT_MASK) >> 7) as u8
    }

    pub const fn significand_bits(self) -> u8 {
        (self.0 & SIGNIFICAND_MASK) as u8
    }

    // Classification, derived from the bit pattern only.

    pub const fn is_nan(self) -> bool {
        self.0 & EXPONENT_MASK == EXPONENT_MASK && self.0 & SIGNIFICAND_MASK != 0
    }

    pub const fn is_signaling_nan(self) -> bool {
        self.is_nan() && self.0 & QUIET_BIT == 0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 & !SIGN_MASK == EXPONENT_MASK
    }

    pub const fn is_finite(self) -> bool {
        self.0 & EXPONENT_MASK != EXPONENT_MASK
    }

    pub const fn is_zero(self) -> bool {
        self.0 & !SIGN_MASK == 0
    }

    pub const fn is_subnormal(self) -> bool {
        self.0 & EXPONENT_MASK == 0 && self.0 & SIGNIFICAND_MASK != 0
    }

    pub const fn is_normal(self) -> bool {
        let exponent = self.0 & EXPONENT_MASK;
        exponent != 0 && exponent != EXPONENT_MASK
    }

    pub const fn is_sign_negative(self) -> bool {
        self.sign_bit()
    }

    pub const fn is_sign_positive(self) -> bool {
        !self.sign_bit()
    }

    pub const fn classify(self) -> FpCategory {
        if self.is_nan() {
            FpCategory::Nan
        } else if self.is_infinite() {
            FpCategory::Infinite
        } else if self.is_zero() {
            FpCategory::Zero
        } else if self.is_subnormal() {
            FpCategory::Subnormal
        } else {
            FpCategory::Normal
        }
    }

    // Sign manipulation is exact and bitwise.

    pub const fn abs(self) -> Self {
        BFloat16(self.0 & !SIGN_MASK)
    }

    pub const fn copysign(self, sign: Self) -> Self {
        BFloat16((self.0 & !SIGN_MASK) | (sign.0 & SIGN_MASK))
    }

    pub fn signum(self) -> Self {
        self.map(f32::signum)
    }

    // Rounding and elementary functions.

    pub fn sqrt(self) -> Self {
        self.map(f32::sqrt)
    }

    /// Round half away from zero.
    pub fn round(self) -> Self {
        self.map(f32::round)
    }

    pub fn round_ties_even(self) -> Self {
        self.map(f32::round_ties_even)
    }

    pub fn floor(self) -> Self {
        self.map(f32::floor)
    }

    pub fn ceil(self) -> Self {
        self.map(f32::ceil)
    }

    pub fn trunc(self) -> Self {
        self.map(f32::trunc)
    }

    pub fn min(self, other: Self) -> Self {
        self.zip(other, f32::min)
    }

    pub fn max(self, other: Self) -> Self {
        self.zip(other, f32::max)
    }

    /// Fused `self * a + b`, rounded once to `f32` and once more to 16 bits.
    pub fn mul_add(self, a: Self, b: Self) -> Self {
        Self::from_f32(self.to_f32().mul_add(a.to_f32(), b.to_f32()))
    }

    /// `self += lhs * rhs` with a fused multiply-add.
    pub fn add_product(&mut self, lhs: Self, rhs: Self) {
        *self = lhs.mul_add(rhs, *self);
    }

    /// IEEE 754 remainder: `self - n * other` where `n` is `self / other`
    /// rounded to the nearest integer, ties to even.
    ///
    /// The truncating remainder (same sign as `self`) is the `%` operator.
    pub fn remainder(self, other: Self) -> Self {
        Self::from_f32(ieee_remainder(self.to_f32(), other.to_f32()))
    }

    /// Next representable value towards positive infinity.
    pub fn next_up(self) -> Self {
        if self.is_nan() || self.0 == Self::INFINITY.0 {
            return self;
        }
        if self.is_zero() {
            return Self::MIN_POSITIVE_SUBNORMAL;
        }
        if self.sign_bit() {
            BFloat16(self.0 - 1)
        } else {
            BFloat16(self.0 + 1)
        }
    }

    /// Next representable value towards negative infinity.
    pub fn next_down(self) -> Self {
        -(-self).next_up()
    }

    /// Distance from `|self|` to the next value of larger magnitude. For
    /// `MAX` this is the spacing below it. NaN for non-finite input.
    pub fn ulp(self) -> Self {
        if !self.is_finite() {
            return Self::NAN;
        }
        let magnitude = self.abs();
        if magnitude.0 == Self::MAX.0 {
            return Self::from_f32(magnitude.to_f32() - magnitude.next_down().to_f32());
        }
        Self::from_f32(magnitude.next_up().to_f32() - magnitude.to_f32())
    }

    /// Total order over bit patterns, as `f32::total_cmp`.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        let mut left = self.0 as i16;
        let mut right = other.0 as i16;
        left ^= (((left >> 15) as u16) >> 1) as i16;
        right ^= (((right >> 15) as u16) >> 1) as i16;
        left.cmp(&right)
    }
}

/// IEEE remainder on `f32`. Every step is exact.
fn ieee_remainder(x: f32, y: f32) -> f32 {
    if x.is_nan() || y.is_nan() || x.is_infinite() || y == 0.0 {
        return f32::NAN;
    }
    if y.is_infinite() {
        return x;
    }
    let negative = x.is_sign_negative();
    let mut x = x.abs();
    let y = y.abs();
    if x == y {
        return if negative { -0.0 } else { 0.0 };
    }
    if y <= f32::MAX / 2.0 {
        // Now x < 2y.
        x %= y + y;
    }
    if y < 2.0 * f32::MIN_POSITIVE {
        if x + x > y {
            x -= y;
            if x + x >= y {
                x -= y;
            }
        }
    } else {
        let half = 0.5 * y;
        if x > half {
            x -= y;
            if x >= half {
                x -= y;
            }
        }
    }
    if negative {
        -x
    } else {
        x
    }
}

impl From<f32> for BFloat16 {
    fn from(value: f32) -> Self {
        BFloat16::from_f32(value)
    }
}

impl From<BFloat16> for f32 {
    fn from(value: BFloat16) -> Self {
        value.to_f32()
    }
}

impl From<BFloat16> for f64 {
    fn from(value: BFloat16) -> Self {
        value.to_f64()
    }
}

impl From<half::bf16> for BFloat16 {
    fn from(value: half::bf16) -> Self {
        BFloat16(value.to_bits())
    }
}

impl From<BFloat16> for half::bf16 {
    fn from(value: BFloat16) -> Self {
        half::bf16::from_bits(value.0)
    }
}

impl PartialEq for BFloat16 {
    fn eq(&self, other: &Self) -> bool {
        self.to_f32() == other.to_f32()
    }
}

impl PartialOrd for BFloat16 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.to_f32().partial_cmp(&other.to_f32())
    }
}

impl Hash for BFloat16 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // -0 and +0 compare equal, so they must hash equal.
        let bits = if self.is_zero() { 0 } else { self.0 };
        bits.hash(state);
    }
}

impl Neg for BFloat16 {
    type Output = BFloat16;

    fn neg(self) -> BFloat16 {
        BFloat16(self.0 ^ SIGN_MASK)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $op:tt) => {
        impl $trait for BFloat16 {
            type Output = BFloat16;

            #[inline]
            fn $method(self, rhs: BFloat16) -> BFloat16 {
                self.zip(rhs, |a, b| a $op b)
            }
        }

        impl $assign_trait for BFloat16 {
            #[inline]
            fn $assign_method(&mut self, rhs: BFloat16) {
                *self = *self $op rhs;
            }
        }
    };
}

impl_binary_op!(Add, add, AddAssign, add_assign, +);
impl_binary_op!(Sub, sub, SubAssign, sub_assign, -);
impl_binary_op!(Mul, mul, MulAssign, mul_assign, *);
impl_binary_op!(Div, div, DivAssign, div_assign, /);
impl_binary_op!(Rem, rem, RemAssign, rem_assign, %);

impl Sum for BFloat16 {
    fn sum<I: Iterator<Item = BFloat16>>(iter: I) -> Self {
        iter.fold(BFloat16::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a BFloat16> for BFloat16 {
    fn sum<I: Iterator<Item = &'a BFloat16>>(iter: I) -> Self {
        iter.fold(BFloat16::ZERO, |acc, x| acc + *x)
    }
}

impl FromStr for BFloat16 {
    type Err = ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<f32>().map(BFloat16::from_f32)
    }
}

impl fmt::Display for BFloat16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_f32(), f)
    }
}

impl fmt::Debug for BFloat16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_f32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::hash_map::DefaultHasher;

    fn bf(v: f32) -> BFloat16 {
        BFloat16::from_f32(v)
    }

    fn hash_of(v: BFloat16) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_constants() {
        assert_eq!(BFloat16::ONE.to_f32(), 1.0);
        assert_eq!(BFloat16::NEG_ONE.to_f32(), -1.0);
        assert_eq!(BFloat16::EPSILON.to_f32(), 2f32.powi(-7));
        assert_eq!(BFloat16::MIN_POSITIVE.to_f32(), f32::MIN_POSITIVE);
        assert_eq!(BFloat16::MIN_POSITIVE_SUBNORMAL.to_f32(), 2f32.powi(-133));
        assert_eq!(BFloat16::MAX.to_f32(), f32::from_bits(0x7F7F_0000));
        assert_eq!(BFloat16::MIN.to_f32(), -BFloat16::MAX.to_f32());
        assert!((BFloat16::PI.to_f32() - std::f32::consts::PI).abs() < 0.01);
        assert_eq!(BFloat16::INFINITY.to_f32(), f32::INFINITY);
        assert_eq!(BFloat16::NEG_INFINITY.to_f32(), f32::NEG_INFINITY);
    }

    #[test]
    fn test_exact_values_round_trip() {
        for v in [0.0f32, 1.0, -2.0, 0.5, 256.0, -0.15625, 65536.0] {
            assert_eq!(bf(v).to_f32(), v);
        }
    }

    #[test]
    fn test_round_to_nearest_even() {
        // 1.0 + 2^-8 is exactly halfway between 1.0 and 1.0 + 2^-7; ties go
        // to the even significand, which is 1.0.
        let halfway = f32::from_bits(0x3F80_8000);
        assert_eq!(bf(halfway).to_bits(), 0x3F80);
        // Halfway above an odd significand rounds up.
        let halfway_odd = f32::from_bits(0x3F81_8000);
        assert_eq!(bf(halfway_odd).to_bits(), 0x3F82);
        // Anything above halfway rounds up.
        assert_eq!(bf(f32::from_bits(0x3F80_8001)).to_bits(), 0x3F81);
        // Anything below halfway truncates.
        assert_eq!(bf(f32::from_bits(0x3F80_7FFF)).to_bits(), 0x3F80);
    }

    #[test]
    fn test_rounding_carries_into_exponent() {
        // Largest significand + round up => next binade.
        let v = f32::from_bits(0x3FFF_C000);
        assert_eq!(bf(v).to_bits(), 0x4000);
        assert_eq!(bf(v).to_f32(), 2.0);
    }

    #[test]
    fn test_overflow_saturates_to_infinity() {
        assert_eq!(bf(f32::MAX).to_bits(), BFloat16::INFINITY.to_bits());
        assert_eq!(bf(f32::MIN).to_bits(), BFloat16::NEG_INFINITY.to_bits());
        assert_eq!(bf(f32::INFINITY).to_bits(), 0x7F80);
        assert_eq!(bf(f32::NEG_INFINITY).to_bits(), 0xFF80);
        // Just above MAX but below the rounding midpoint stays finite.
        let just_above = f32::from_bits(0x7F7F_7FFF);
        assert_eq!(bf(just_above).to_bits(), BFloat16::MAX.to_bits());
    }

    #[test]
    fn test_nan_narrowing_is_quiet() {
        let n = bf(f32::NAN);
        assert!(n.is_nan());
        assert!(!n.is_signaling_nan());
        // A signaling f32 NaN whose payload lives only in the low bits must
        // not collapse into infinity.
        let snan = f32::from_bits(0x7F80_0001);
        let narrowed = bf(snan);
        assert!(narrowed.is_nan());
        assert!(!narrowed.is_infinite());
    }

    #[test]
    fn test_nan_narrowing_keeps_sign_and_payload() {
        assert_eq!(bf(f32::NAN).to_bits(), 0x7FC0);
        assert_eq!(bf(f32::from_bits(0xFFC0_0000)).to_bits(), 0xFFC0);
        // Signaling input: upper payload survives, quiet bit is added.
        assert_eq!(bf(f32::from_bits(0xFFA1_0000)).to_bits(), 0xFFE1);
        assert_eq!(bf(f32::from_bits(0x7F80_0001)).to_bits(), 0x7FC0);
        assert_eq!(bf(BFloat16::NAN.to_f32()).to_bits(), BFloat16::NAN.to_bits());
        // Arithmetic payloads follow the host FPU; only NaN-ness is fixed.
        assert!((BFloat16::NAN + bf(1.0)).is_nan());
        assert!((bf(0.0) / bf(0.0)).is_nan());
    }

    #[test]
    fn test_canonical_nan_patterns() {
        assert!(BFloat16::NAN.is_nan());
        assert!(!BFloat16::NAN.is_signaling_nan());
        assert!(BFloat16::SIGNALING_NAN.is_nan());
        assert!(BFloat16::SIGNALING_NAN.is_signaling_nan());
        assert!(BFloat16::NAN.to_f32().is_nan());
        assert_eq!(BFloat16::NAN.to_bits(), 0xFFC1);
    }

    #[test]
    fn test_classification() {
        assert!(BFloat16::ZERO.is_zero());
        assert!(BFloat16::NEG_ZERO.is_zero());
        assert!(!BFloat16::ZERO.is_subnormal());
        assert!(BFloat16::MIN_POSITIVE_SUBNORMAL.is_subnormal());
        assert!(!BFloat16::MIN_POSITIVE.is_subnormal());
        assert!(BFloat16::MIN_POSITIVE.is_normal());
        assert!(BFloat16::INFINITY.is_infinite());
        assert!(!BFloat16::INFINITY.is_finite());
        assert!(!BFloat16::INFINITY.is_nan());
        assert!(BFloat16::MAX.is_finite());
        assert!(BFloat16::NEG_INFINITY.is_sign_negative());
        assert_eq!(BFloat16::ONE.classify(), FpCategory::Normal);
        assert_eq!(BFloat16::NAN.classify(), FpCategory::Nan);
        assert_eq!(BFloat16::NEG_ZERO.classify(), FpCategory::Zero);
        assert_eq!(
            BFloat16::MIN_POSITIVE_SUBNORMAL.classify(),
            FpCategory::Subnormal
        );
    }

    #[test]
    fn test_bit_fields() {
        let v = bf(-1.5);
        assert!(v.sign_bit());
        assert_eq!(v.exponent_bits(), 127);
        assert_eq!(v.significand_bits(), 0x40);
        assert_eq!(BFloat16::from_parts(true, 127, 0x40).to_bits(), v.to_bits());
    }

    #[test]
    fn test_signed_zero_identity() {
        let pos = bf(0.0);
        let neg = bf(-0.0);
        assert_ne!(pos.to_bits(), neg.to_bits());
        assert_eq!(pos, neg);
        assert_eq!(hash_of(pos), hash_of(neg));
        assert_eq!(pos.partial_cmp(&neg), Some(Ordering::Equal));
    }

    #[test]
    fn test_nan_is_unordered() {
        assert_ne!(BFloat16::NAN, BFloat16::NAN);
        assert_eq!(BFloat16::NAN.partial_cmp(&BFloat16::ONE), None);
        assert!(!(BFloat16::NAN < BFloat16::ONE));
    }

    #[test]
    fn test_ordering_matches_f32() {
        let values = [-3.0f32, -1.0, -0.0, 0.5, 2.0, 1e30];
        for &a in &values {
            for &b in &values {
                assert_eq!(bf(a).partial_cmp(&bf(b)), a.partial_cmp(&b));
            }
        }
        assert!(BFloat16::NEG_ONE < BFloat16::ONE);
        assert!(BFloat16::NEG_INFINITY < BFloat16::MIN);
    }

    #[test]
    fn test_arithmetic_promotes_through_f32() {
        assert_eq!((bf(1.5) + bf(2.25)).to_f32(), 3.75);
        assert_eq!((bf(1.5) - bf(2.25)).to_f32(), -0.75);
        assert_eq!((bf(3.0) * bf(-0.5)).to_f32(), -1.5);
        assert_eq!((bf(1.0) / bf(4.0)).to_f32(), 0.25);
        assert_eq!((bf(7.0) % bf(4.0)).to_f32(), 3.0);
        assert_eq!((-bf(2.0)).to_f32(), -2.0);
        // 1 + 2^-8 is not representable; the sum rounds back to 1.
        let tiny = bf(2f32.powi(-8));
        assert_eq!((BFloat16::ONE + tiny).to_f32(), 1.0);

        let mut acc = bf(1.0);
        acc += bf(1.0);
        acc *= bf(3.0);
        acc -= bf(2.0);
        acc /= bf(2.0);
        assert_eq!(acc.to_f32(), 2.0);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(bf(1.0) / bf(0.0), BFloat16::INFINITY);
        assert_eq!(bf(-1.0) / bf(0.0), BFloat16::NEG_INFINITY);
        assert!((bf(0.0) / bf(0.0)).is_nan());
    }

    #[test]
    fn test_sqrt_and_rounding() {
        assert_eq!(bf(16.0).sqrt().to_f32(), 4.0);
        assert!(bf(-1.0).sqrt().is_nan());
        assert_eq!(bf(2.5).round().to_f32(), 3.0);
        assert_eq!(bf(2.5).round_ties_even().to_f32(), 2.0);
        assert_eq!(bf(-2.5).floor().to_f32(), -3.0);
        assert_eq!(bf(-2.5).ceil().to_f32(), -2.0);
        assert_eq!(bf(-2.5).trunc().to_f32(), -2.0);
    }

    #[test]
    fn test_ieee_remainder() {
        assert_eq!(bf(5.0).remainder(bf(3.0)).to_f32(), -1.0);
        assert_eq!(bf(7.0).remainder(bf(2.0)).to_f32(), -1.0);
        assert_eq!(bf(5.0).remainder(bf(2.0)).to_f32(), 1.0);
        assert_eq!(bf(-5.0).remainder(bf(3.0)).to_f32(), 1.0);
        assert_eq!(bf(4.0).remainder(bf(4.0)).to_f32(), 0.0);
        assert!(bf(1.0).remainder(bf(0.0)).is_nan());
        assert!(BFloat16::INFINITY.remainder(bf(1.0)).is_nan());
        assert_eq!(bf(1.5).remainder(BFloat16::INFINITY).to_f32(), 1.5);
    }

    #[test]
    fn test_mul_add() {
        let mut acc = bf(1.0);
        acc.add_product(bf(2.0), bf(3.0));
        assert_eq!(acc.to_f32(), 7.0);
        assert_eq!(bf(2.0).mul_add(bf(3.0), bf(-6.0)), BFloat16::ZERO);
    }

    #[test]
    fn test_sign_helpers() {
        assert_eq!(bf(-3.0).abs().to_f32(), 3.0);
        assert_eq!(bf(3.0).copysign(bf(-0.0)).to_f32(), -3.0);
        assert_eq!(bf(-7.0).signum().to_f32(), -1.0);
        assert_eq!(bf(1.0).min(bf(-1.0)).to_f32(), -1.0);
        assert_eq!(bf(1.0).max(BFloat16::NAN).to_f32(), 1.0);
    }

    #[test]
    fn test_next_up_down_and_ulp() {
        assert_eq!(BFloat16::ONE.next_up().to_bits(), 0x3F81);
        assert_eq!(BFloat16::ONE.next_down().to_bits(), 0x3F7F);
        assert_eq!(BFloat16::ZERO.next_up(), BFloat16::MIN_POSITIVE_SUBNORMAL);
        assert_eq!(BFloat16::NEG_ZERO.next_up(), BFloat16::MIN_POSITIVE_SUBNORMAL);
        assert_eq!(BFloat16::MAX.next_up(), BFloat16::INFINITY);
        assert_eq!(BFloat16::NEG_INFINITY.next_up(), BFloat16::MIN);
        assert_eq!(BFloat16::INFINITY.next_up(), BFloat16::INFINITY);
        assert_eq!(BFloat16::ONE.ulp(), BFloat16::EPSILON);
        assert_eq!(BFloat16::ZERO.ulp(), BFloat16::MIN_POSITIVE_SUBNORMAL);
        assert!(BFloat16::MAX.ulp().is_finite());
        assert!(BFloat16::INFINITY.ulp().is_nan());
    }

    #[test]
    fn test_total_cmp() {
        let mut values = vec![
            BFloat16::ONE,
            BFloat16::NEG_ZERO,
            BFloat16::ZERO,
            BFloat16::NEG_INFINITY,
            BFloat16::MAX,
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        let bits: Vec<u16> = values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, vec![0xFF80, 0x8000, 0x0000, 0x3F80, 0x7F7F]);
    }

    #[test]
    fn test_parse_display_sum() {
        let v: BFloat16 = "1.5".parse().unwrap();
        assert_eq!(v.to_f32(), 1.5);
        assert!("nope".parse::<BFloat16>().is_err());
        assert_eq!(format!("{}", bf(0.25)), "0.25");
        assert_eq!(format!("{:?}", bf(-2.0)), "-2.0");
        let total: BFloat16 = [bf(1.0), bf(2.0), bf(3.5)].iter().sum();
        assert_eq!(total.to_f32(), 6.5);
    }

    #[test]
    fn test_matches_half_crate_on_random_bit_patterns() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100_000 {
            let x = f32::from_bits(rng.gen::<u32>());
            if x.is_nan() {
                continue;
            }
            let ours = BFloat16::from_f32(x).to_bits();
            let theirs = half::bf16::from_f32(x).to_bits();
            assert_eq!(ours, theirs, "mismatch for {:#010x}", x.to_bits());
        }
    }

    #[test]
    fn test_round_trip_within_one_ulp_and_idempotent() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100_000 {
            let x = f32::from_bits(rng.gen::<u32>());
            if !x.is_finite() || x.abs() >= BFloat16::MAX.to_f32() {
                continue;
            }
            let narrowed = BFloat16::from_f32(x);
            let widened = narrowed.to_f32();
            let error = (f64::from(widened) - f64::from(x)).abs();
            assert!(
                error <= narrowed.ulp().to_f64(),
                "x={x:e} widened={widened:e} error={error:e}"
            );
            assert_eq!(
                BFloat16::from_f32(widened).to_bits(),
                narrowed.to_bits(),
                "narrowing is not idempotent for {x:e}"
            );
        }
    }

    #[test]
    fn test_half_interop() {
        let v = half::bf16::from_f32(3.0);
        let ours: BFloat16 = v.into();
        assert_eq!(ours.to_f32(), 3.0);
        let back: half::bf16 = ours.into();
        assert_eq!(back.to_bits(), v.to_bits());
    }
}
