use serde::{Deserialize, Serialize};
use std::fmt;

/// One abstract interpretation strategy. The set is closed; evaluation order
/// inside an operation always follows `Domain::ALL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Concrete,
    Interval,
    Symbolic,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Concrete, Domain::Interval, Domain::Symbolic];

    pub const fn bit(self) -> u8 {
        match self {
            Domain::Concrete => 0b001,
            Domain::Interval => 0b010,
            Domain::Symbolic => 0b100,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Domain::Concrete => "concrete",
            Domain::Interval => "interval",
            Domain::Symbolic => "symbolic",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Domain>", into = "Vec<Domain>")]
pub struct DomainMask(u8);

impl DomainMask {
    pub const NONE: DomainMask = DomainMask(0);
    pub const CONCRETE: DomainMask = DomainMask(Domain::Concrete.bit());
    pub const ALL: DomainMask =
        DomainMask(Domain::Concrete.bit() | Domain::Interval.bit() | Domain::Symbolic.bit());

    pub fn of(domains: &[Domain]) -> Self {
        domains.iter().fold(Self::NONE, |mask, d| mask.with(*d))
    }

    pub fn contains(self, domain: Domain) -> bool {
        self.0 & domain.bit() != 0
    }

    #[must_use]
    pub fn with(self, domain: Domain) -> Self {
        DomainMask(self.0 | domain.bit())
    }

    #[must_use]
    pub fn without(self, domain: Domain) -> Self {
        DomainMask(self.0 & !domain.bit())
    }

    #[must_use]
    pub fn intersect(self, other: DomainMask) -> Self {
        DomainMask(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn iter(self) -> impl Iterator<Item = Domain> {
        Domain::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl From<Vec<Domain>> for DomainMask {
    fn from(domains: Vec<Domain>) -> Self {
        DomainMask::of(&domains)
    }
}

impl From<DomainMask> for Vec<Domain> {
    fn from(mask: DomainMask) -> Self {
        mask.iter().collect()
    }
}

impl fmt::Debug for DomainMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for DomainMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(Domain::name).collect();
        f.write_str(&names.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_set_operations() {
        let mask = DomainMask::ALL.without(Domain::Symbolic);
        assert!(mask.contains(Domain::Concrete));
        assert!(mask.contains(Domain::Interval));
        assert!(!mask.contains(Domain::Symbolic));
        assert_eq!(mask.with(Domain::Symbolic), DomainMask::ALL);
        assert_eq!(mask.to_string(), "concrete+interval");
        assert_eq!(DomainMask::NONE.to_string(), "none");
    }

    #[test]
    fn mask_serializes_as_domain_list() {
        let json = serde_json::to_string(&DomainMask::of(&[Domain::Symbolic, Domain::Concrete]))
            .unwrap();
        assert_eq!(json, r#"["concrete","symbolic"]"#);
        let back: DomainMask = serde_json::from_str(r#"["interval"]"#).unwrap();
        assert_eq!(back, DomainMask::of(&[Domain::Interval]));
    }
}
