use super::{mask, SemanticDomain};
use crate::domain::Domain;

/// The simulator's own domain: every value is a known bit pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct Concrete;

impl SemanticDomain for Concrete {
    type Value = u32;

    const DOMAIN: Domain = Domain::Concrete;

    fn number(&mut self, bits: u8, value: u32) -> u32 {
        value & mask(bits)
    }

    // There is no "unknown" bit pattern; MultiPolicy leaves the concrete slot
    // empty for undefined values instead of calling this.
    fn undefined(&mut self, _bits: u8) -> u32 {
        0
    }

    fn add(&mut self, bits: u8, a: &u32, b: &u32) -> u32 {
        a.wrapping_add(*b) & mask(bits)
    }

    fn sub(&mut self, bits: u8, a: &u32, b: &u32) -> u32 {
        a.wrapping_sub(*b) & mask(bits)
    }

    fn and(&mut self, bits: u8, a: &u32, b: &u32) -> u32 {
        (a & b) & mask(bits)
    }

    fn or(&mut self, bits: u8, a: &u32, b: &u32) -> u32 {
        (a | b) & mask(bits)
    }

    fn xor(&mut self, bits: u8, a: &u32, b: &u32) -> u32 {
        (a ^ b) & mask(bits)
    }

    fn invert(&mut self, bits: u8, a: &u32) -> u32 {
        !a & mask(bits)
    }

    fn extract(&mut self, _bits: u8, a: &u32, lo: u8, hi: u8) -> u32 {
        a.checked_shr(lo as u32).unwrap_or(0) & mask(hi - lo)
    }

    fn concat(&mut self, lo: &u32, lo_bits: u8, hi: &u32, hi_bits: u8) -> u32 {
        let high = (hi & mask(hi_bits)).checked_shl(lo_bits as u32).unwrap_or(0);
        (high | (lo & mask(lo_bits))) & mask(lo_bits + hi_bits)
    }

    fn ite(&mut self, bits: u8, cond: &u32, t: &u32, f: &u32) -> u32 {
        let picked = if cond & 1 != 0 { t } else { f };
        picked & mask(bits)
    }

    fn equal_to_zero(&mut self, bits: u8, a: &u32) -> u32 {
        (a & mask(bits) == 0) as u32
    }
}
