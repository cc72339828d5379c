//! Moving information between domains: filling a domain a value lacks from
//! one it has, and the symbolic-to-interval zero refinement after `xor`.

use crate::bus::Bus;
use crate::domain::Domain;
use crate::domains::{Interval, SymExpr};
use crate::error::{Error, Result};
use crate::policy::MultiPolicy;
use crate::solver::Tribool;
use crate::value::MultiValue;
use tracing::debug;

/// The exact bit pattern, if any populated domain pins it down.
pub fn known_value(value: &MultiValue) -> Option<u32> {
    value
        .concrete()
        .or_else(|| value.interval().and_then(|i| i.singleton(value.bits())))
        .or_else(|| value.symbolic().and_then(SymExpr::as_const))
}

pub fn derive_concrete(value: &MultiValue) -> Option<u32> {
    known_value(value)
}

pub fn derive_interval(value: &MultiValue) -> Option<Interval> {
    value
        .interval()
        .or_else(|| known_value(value).map(|v| Interval::exact(value.bits(), v)))
}

// A non-singleton interval has no symbolic counterpart; that gap is left open.
pub fn derive_symbolic(value: &MultiValue) -> Option<SymExpr> {
    value
        .symbolic()
        .cloned()
        .or_else(|| known_value(value).map(|v| SymExpr::constant(value.bits(), v)))
}

/// Make sure `value` carries a `domain` sub-value, building it from the other
/// domains when needed. Fails when `domain` is not active or nothing known
/// about `value` can be carried over.
pub fn ensure<B: Bus>(
    policy: &MultiPolicy<B>,
    domain: Domain,
    mut value: MultiValue,
) -> Result<MultiValue> {
    if !policy.is_active(domain) {
        return Err(Error::missing(domain, "a domain that is not active"));
    }
    if value.is_valid(domain) {
        return Ok(value);
    }
    match domain {
        Domain::Concrete => {
            let v = derive_concrete(&value)
                .ok_or_else(|| Error::missing(domain, format!("value {value}")))?;
            value.set_concrete(Some(v));
        }
        Domain::Interval => {
            let i = derive_interval(&value)
                .ok_or_else(|| Error::missing(domain, format!("value {value}")))?;
            value.set_interval(Some(i));
        }
        Domain::Symbolic => {
            let e = derive_symbolic(&value)
                .ok_or_else(|| Error::missing(domain, format!("value {value}")))?;
            value.set_symbolic(Some(e))?;
        }
    }
    Ok(value)
}

/// `x xor x` is zero, but interval arithmetic only sees two equal ranges. When
/// the symbolic result is provably zero, pin the interval to {0}.
pub fn refine_xor_zero<B: Bus>(policy: &mut MultiPolicy<B>, mut value: MultiValue) -> MultiValue {
    if !policy.is_active(Domain::Symbolic) || !policy.is_active(Domain::Interval) {
        return value;
    }
    let Some(expr) = value.symbolic().cloned() else {
        return value;
    };
    if policy.symbolic_mut().prove_zero(&expr) == Tribool::True {
        debug!("xor_ optimization triggered for interval domain");
        value.set_interval(Some(Interval::exact(value.bits(), 0)));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_value_prefers_any_exact_domain() {
        let v = MultiValue::empty(8).with_interval(Interval::exact(8, 9));
        assert_eq!(known_value(&v), Some(9));
        let v = MultiValue::empty(8)
            .with_symbolic(SymExpr::constant(8, 3))
            .unwrap();
        assert_eq!(known_value(&v), Some(3));
        let v = MultiValue::empty(8).with_interval(Interval::top(8));
        assert_eq!(known_value(&v), None);
    }

    #[test]
    fn symbolic_from_range_is_a_gap() {
        let v = MultiValue::empty(32).with_interval(Interval::new(32, 0, 10));
        assert!(derive_symbolic(&v).is_none());
    }
}
