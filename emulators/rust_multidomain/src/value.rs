use crate::domain::{Domain, DomainMask};
use crate::domains::{mask, Interval, SymExpr, MAX_BITS};
use crate::error::{Error, Result};
use std::fmt;

pub fn check_width(bits: u8) -> Result<()> {
    if bits == 0 || bits > MAX_BITS {
        return Err(Error::invariant(format!(
            "width {bits} outside 1..={MAX_BITS}"
        )));
    }
    Ok(())
}

/// One operand-sized value with an independent, optional sub-value per domain.
/// All sub-values share `bits`.
#[derive(Clone, PartialEq, Eq)]
pub struct MultiValue {
    bits: u8,
    concrete: Option<u32>,
    interval: Option<Interval>,
    symbolic: Option<SymExpr>,
}

impl MultiValue {
    /// No domain valid yet.
    pub fn empty(bits: u8) -> Self {
        Self {
            bits,
            concrete: None,
            interval: None,
            symbolic: None,
        }
    }

    /// Concretely `concrete`, interval-unknown, and symbolically `expr`. The
    /// width comes from `expr`.
    pub fn seeded(concrete: u32, expr: SymExpr) -> Self {
        let bits = expr.bits();
        Self {
            bits,
            concrete: Some(concrete & mask(bits)),
            interval: Some(Interval::top(bits)),
            symbolic: Some(expr),
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn concrete(&self) -> Option<u32> {
        self.concrete
    }

    pub fn interval(&self) -> Option<Interval> {
        self.interval
    }

    pub fn symbolic(&self) -> Option<&SymExpr> {
        self.symbolic.as_ref()
    }

    pub fn set_concrete(&mut self, value: Option<u32>) {
        self.concrete = value.map(|v| v & mask(self.bits));
    }

    pub fn set_interval(&mut self, value: Option<Interval>) {
        self.interval = value;
    }

    pub fn set_symbolic(&mut self, value: Option<SymExpr>) -> Result<()> {
        if let Some(expr) = &value {
            if expr.bits() != self.bits {
                return Err(Error::invariant(format!(
                    "symbolic sub-value is {} bits in a {}-bit value",
                    expr.bits(),
                    self.bits
                )));
            }
        }
        self.symbolic = value;
        Ok(())
    }

    #[must_use]
    pub fn with_concrete(mut self, value: u32) -> Self {
        self.set_concrete(Some(value));
        self
    }

    #[must_use]
    pub fn with_interval(mut self, value: Interval) -> Self {
        self.set_interval(Some(value));
        self
    }

    pub fn with_symbolic(mut self, value: SymExpr) -> Result<Self> {
        self.set_symbolic(Some(value))?;
        Ok(self)
    }

    pub fn is_valid(&self, domain: Domain) -> bool {
        match domain {
            Domain::Concrete => self.concrete.is_some(),
            Domain::Interval => self.interval.is_some(),
            Domain::Symbolic => self.symbolic.is_some(),
        }
    }

    pub fn valid_domains(&self) -> DomainMask {
        Domain::ALL
            .into_iter()
            .filter(|d| self.is_valid(*d))
            .fold(DomainMask::NONE, DomainMask::with)
    }

    pub fn invalidate(&mut self, domain: Domain) {
        match domain {
            Domain::Concrete => self.concrete = None,
            Domain::Interval => self.interval = None,
            Domain::Symbolic => self.symbolic = None,
        }
    }

    /// Copy of `self` with every domain outside `keep` dropped.
    #[must_use]
    pub fn restrict(&self, keep: DomainMask) -> Self {
        let mut out = self.clone();
        for d in Domain::ALL {
            if !keep.contains(d) {
                out.invalidate(d);
            }
        }
        out
    }

    /// Domains in `mask` come from `update`, all others from `self`.
    pub fn overlay(&self, update: &MultiValue, mask: DomainMask) -> Result<Self> {
        if update.bits != self.bits {
            return Err(Error::invariant(format!(
                "cannot overlay a {}-bit value on a {}-bit slot",
                update.bits, self.bits
            )));
        }
        let mut out = self.clone();
        if mask.contains(Domain::Concrete) {
            out.concrete = update.concrete;
        }
        if mask.contains(Domain::Interval) {
            out.interval = update.interval;
        }
        if mask.contains(Domain::Symbolic) {
            out.symbolic = update.symbolic.clone();
        }
        Ok(out)
    }

    /// Address and data operands need at least one valid domain.
    pub fn check_operand(&self, role: &str) -> Result<()> {
        if self.valid_domains().is_empty() {
            return Err(Error::invariant(format!(
                "{role} operand has no valid domain"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for MultiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.concrete {
            Some(v) => write!(f, "concrete=0x{v:x}")?,
            None => f.write_str("concrete=--")?,
        }
        match &self.interval {
            Some(i) => write!(f, " interval={i}")?,
            None => f.write_str(" interval=--")?,
        }
        match &self.symbolic {
            Some(e) => write!(f, " symbolic={e}"),
            None => f.write_str(" symbolic=--"),
        }
    }
}

impl fmt::Debug for MultiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MultiValue<{}>({})", self.bits, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbolic_width_must_match() {
        let mut v = MultiValue::empty(8);
        let err = v.set_symbolic(Some(SymExpr::var(32, 0))).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(!v.is_valid(Domain::Symbolic));
    }

    #[test]
    fn seeded_value_takes_width_from_expression() {
        let v = MultiValue::seeded(0x1_00, SymExpr::var(8, 3));
        assert_eq!(v.bits(), 8);
        assert_eq!(v.concrete(), Some(0));
        assert_eq!(v.interval(), Some(Interval::top(8)));
        assert_eq!(v.valid_domains(), DomainMask::ALL);
    }

    #[test]
    fn overlay_only_touches_masked_domains() {
        let old = MultiValue::empty(32)
            .with_concrete(1)
            .with_interval(Interval::top(32));
        let new = MultiValue::empty(32).with_concrete(2);
        let merged = old.overlay(&new, DomainMask::ALL.without(Domain::Interval)).unwrap();
        assert_eq!(merged.concrete(), Some(2));
        assert_eq!(merged.interval(), Some(Interval::top(32)));
    }

    #[test]
    fn empty_value_is_not_an_operand() {
        assert!(MultiValue::empty(32).check_operand("address").is_err());
        assert!(MultiValue::empty(32).with_concrete(0).check_operand("address").is_ok());
    }
}
