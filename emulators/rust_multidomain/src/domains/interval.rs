use super::{mask, SemanticDomain};
use crate::domain::Domain;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The set `{ x mod 2^bits : lo <= x <= hi }`. Bounds are kept in `i64` so a
/// range straddling zero (e.g. `[-100, 100]`) stays a single interval. A span
/// of `2^bits` or more collapses to the full range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub lo: i64,
    pub hi: i64,
}

fn modulus(bits: u8) -> i64 {
    1i64 << bits
}

impl Interval {
    pub fn new(bits: u8, lo: i64, hi: i64) -> Self {
        let m = modulus(bits);
        if lo > hi || hi - lo >= m {
            return Self::top(bits);
        }
        // Shift so that `hi` lands in [0, 2^bits); `lo` may end up negative.
        let shift = hi.div_euclid(m) * m;
        Self {
            lo: lo - shift,
            hi: hi - shift,
        }
    }

    pub fn exact(bits: u8, value: u32) -> Self {
        let v = (value & mask(bits)) as i64;
        Self { lo: v, hi: v }
    }

    pub fn top(bits: u8) -> Self {
        Self {
            lo: 0,
            hi: mask(bits) as i64,
        }
    }

    pub fn is_top(&self, bits: u8) -> bool {
        self.hi - self.lo >= mask(bits) as i64
    }

    pub fn singleton(&self, bits: u8) -> Option<u32> {
        (self.lo == self.hi).then(|| self.lo.rem_euclid(modulus(bits)) as u32)
    }

    /// Both bounds within `[0, 2^bits)`, i.e. the range does not wrap.
    pub fn is_canonical(&self, bits: u8) -> bool {
        self.lo >= 0 && self.hi <= mask(bits) as i64
    }

    pub fn contains(&self, bits: u8, value: u32) -> bool {
        let m = modulus(bits);
        let v = (value & mask(bits)) as i64;
        let base = self.lo.div_euclid(m) * m;
        // `value` is in the set if one of its representatives lies in [lo, hi].
        [base + v, base + m + v]
            .iter()
            .any(|cand| *cand >= self.lo && *cand <= self.hi)
    }

    pub fn hull(&self, bits: u8, other: &Interval) -> Interval {
        Interval::new(bits, self.lo.min(other.lo), self.hi.max(other.hi))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lo == self.hi {
            write!(f, "{{{}}}", self.lo)
        } else {
            write!(f, "[{},{}]", self.lo, self.hi)
        }
    }
}

fn fill_below(value: i64) -> i64 {
    if value <= 0 {
        0
    } else {
        let width = 64 - value.leading_zeros();
        ((1u64 << width) - 1) as i64
    }
}

/// Range arithmetic. Bitwise operators are only precise on singletons and fall
/// back to coarse bounds (or the full range) otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntervalDomain;

impl IntervalDomain {
    fn bitwise(
        bits: u8,
        a: &Interval,
        b: &Interval,
        exact: impl Fn(u32, u32) -> u32,
        coarse: impl Fn(&Interval, &Interval) -> (i64, i64),
    ) -> Interval {
        if let (Some(x), Some(y)) = (a.singleton(bits), b.singleton(bits)) {
            return Interval::exact(bits, exact(x, y));
        }
        if a.is_canonical(bits) && b.is_canonical(bits) {
            let (lo, hi) = coarse(a, b);
            return Interval::new(bits, lo, hi.min(mask(bits) as i64));
        }
        Interval::top(bits)
    }
}

impl SemanticDomain for IntervalDomain {
    type Value = Interval;

    const DOMAIN: Domain = Domain::Interval;

    fn number(&mut self, bits: u8, value: u32) -> Interval {
        Interval::exact(bits, value)
    }

    fn undefined(&mut self, bits: u8) -> Interval {
        Interval::top(bits)
    }

    fn add(&mut self, bits: u8, a: &Interval, b: &Interval) -> Interval {
        Interval::new(bits, a.lo + b.lo, a.hi + b.hi)
    }

    fn sub(&mut self, bits: u8, a: &Interval, b: &Interval) -> Interval {
        Interval::new(bits, a.lo - b.hi, a.hi - b.lo)
    }

    fn and(&mut self, bits: u8, a: &Interval, b: &Interval) -> Interval {
        Self::bitwise(bits, a, b, |x, y| x & y, |a, b| (0, a.hi.min(b.hi)))
    }

    fn or(&mut self, bits: u8, a: &Interval, b: &Interval) -> Interval {
        Self::bitwise(
            bits,
            a,
            b,
            |x, y| x | y,
            |a, b| (a.lo.max(b.lo), fill_below(a.hi.max(b.hi))),
        )
    }

    fn xor(&mut self, bits: u8, a: &Interval, b: &Interval) -> Interval {
        Self::bitwise(
            bits,
            a,
            b,
            |x, y| x ^ y,
            |a, b| (0, fill_below(a.hi.max(b.hi))),
        )
    }

    fn invert(&mut self, bits: u8, a: &Interval) -> Interval {
        // !x == -1 - x (mod 2^bits)
        Interval::new(bits, -1 - a.hi, -1 - a.lo)
    }

    fn extract(&mut self, bits: u8, a: &Interval, lo: u8, hi: u8) -> Interval {
        let width = hi - lo;
        if let Some(v) = a.singleton(bits) {
            return Interval::exact(width, v >> lo);
        }
        if a.is_canonical(bits) {
            if lo == 0 && a.hi <= mask(width) as i64 {
                return *a;
            }
            if hi == bits {
                return Interval::new(width, a.lo >> lo, a.hi >> lo);
            }
        }
        Interval::top(width)
    }

    fn concat(&mut self, lo: &Interval, lo_bits: u8, hi: &Interval, hi_bits: u8) -> Interval {
        let width = lo_bits + hi_bits;
        if lo.is_canonical(lo_bits) && hi.is_canonical(hi_bits) {
            return Interval::new(
                width,
                (hi.lo << lo_bits) + lo.lo,
                (hi.hi << lo_bits) + lo.hi,
            );
        }
        Interval::top(width)
    }

    fn ite(&mut self, bits: u8, cond: &Interval, t: &Interval, f: &Interval) -> Interval {
        match cond.singleton(1) {
            Some(1) => *t,
            Some(_) => *f,
            None => t.hull(bits, f),
        }
    }

    fn equal_to_zero(&mut self, bits: u8, a: &Interval) -> Interval {
        if let Some(v) = a.singleton(bits) {
            return Interval::exact(1, (v == 0) as u32);
        }
        if a.contains(bits, 0) {
            Interval::top(1)
        } else {
            Interval::exact(1, 0)
        }
    }
}
