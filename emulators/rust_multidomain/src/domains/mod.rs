//! The three semantic domains. Each one implements [`SemanticDomain`] over its
//! own value representation; `MultiPolicy` drives all of them in lock-step.

pub mod concrete;
pub mod interval;
pub mod symbolic;

pub use concrete::Concrete;
pub use interval::{Interval, IntervalDomain};
pub use symbolic::{ExprKind, SymExpr, Symbolic};

use crate::domain::Domain;
use std::fmt;

/// Widest value any domain handles.
pub const MAX_BITS: u8 = 32;

pub fn mask(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// Shared operation contract. Widths are passed explicitly; a domain value
/// never outlives the `MultiValue` that records its width.
pub trait SemanticDomain {
    type Value: Clone + fmt::Debug;

    const DOMAIN: Domain;

    fn number(&mut self, bits: u8, value: u32) -> Self::Value;
    fn undefined(&mut self, bits: u8) -> Self::Value;

    fn add(&mut self, bits: u8, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn sub(&mut self, bits: u8, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn and(&mut self, bits: u8, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn or(&mut self, bits: u8, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn xor(&mut self, bits: u8, a: &Self::Value, b: &Self::Value) -> Self::Value;
    fn invert(&mut self, bits: u8, a: &Self::Value) -> Self::Value;

    /// Bits `[lo, hi)` of a `bits`-wide value.
    fn extract(&mut self, bits: u8, a: &Self::Value, lo: u8, hi: u8) -> Self::Value;

    /// `lo` fills the low `lo_bits` of the result, `hi` sits directly above.
    fn concat(&mut self, lo: &Self::Value, lo_bits: u8, hi: &Self::Value, hi_bits: u8)
        -> Self::Value;

    /// `cond` is one bit wide.
    fn ite(&mut self, bits: u8, cond: &Self::Value, t: &Self::Value, f: &Self::Value)
        -> Self::Value;

    /// One-bit result, set when `a` is zero.
    fn equal_to_zero(&mut self, bits: u8, a: &Self::Value) -> Self::Value;
}
