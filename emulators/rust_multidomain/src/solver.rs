//! Decision-procedure boundary. The engine only ever asks one question ("is
//! this bit-vector zero under every assignment?") and reads usage counters.

use crate::domains::{ExprKind, SymExpr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tribool {
    True,
    False,
    Unknown,
}

impl From<bool> for Tribool {
    fn from(value: bool) -> Self {
        if value {
            Tribool::True
        } else {
            Tribool::False
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub calls: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("solver backend unavailable: {0}")]
    Unavailable(String),
}

pub trait Solver: Send {
    /// `True`: zero for every assignment. `False`: never zero. `Unknown`:
    /// anything else, including "the backend could not tell".
    fn equal_to_zero(&mut self, expr: &SymExpr) -> Result<Tribool, SolverError>;

    fn stats(&self) -> SolverStats;

    fn reset_stats(&mut self);
}

/// Render the query the way an SMT-LIB backend would receive it.
pub fn render_zero_query(expr: &SymExpr) -> String {
    let mut text = String::new();
    for (id, bits) in expr.variables() {
        let _ = writeln!(text, "(declare-fun v{id} () (_ BitVec {bits}))");
    }
    let _ = writeln!(
        text,
        "(assert (not (= {} (_ bv0 {}))))",
        expr,
        expr.bits()
    );
    text.push_str("(check-sat)\n");
    text
}

/// Sum of `coefficient * atom` plus a constant, all modulo `2^bits`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Linear {
    modulus_mask: u64,
    terms: BTreeMap<String, u64>,
    constant: u64,
}

impl Linear {
    fn new(bits: u8) -> Self {
        Self {
            modulus_mask: (1u64 << bits) - 1,
            terms: BTreeMap::new(),
            constant: 0,
        }
    }

    fn scaled_add(mut self, other: Linear, factor: u64) -> Self {
        let m = self.modulus_mask;
        self.constant = self
            .constant
            .wrapping_add(other.constant.wrapping_mul(factor))
            & m;
        for (atom, coeff) in other.terms {
            let slot = self.terms.entry(atom).or_insert(0);
            *slot = slot.wrapping_add(coeff.wrapping_mul(factor)) & m;
        }
        self.terms.retain(|_, c| *c != 0);
        self
    }

    fn negate(self) -> Self {
        let m = self.modulus_mask;
        Linear::new_like(&self).scaled_add(self, m)
    }

    fn new_like(other: &Linear) -> Self {
        Self {
            modulus_mask: other.modulus_mask,
            terms: BTreeMap::new(),
            constant: 0,
        }
    }

    fn of(expr: &SymExpr) -> Linear {
        let bits = expr.bits();
        match expr.kind() {
            ExprKind::Const(v) => {
                let mut lin = Linear::new(bits);
                lin.constant = *v as u64;
                lin
            }
            ExprKind::Add(a, b) => Linear::of(a).scaled_add(Linear::of(b), 1),
            ExprKind::Sub(a, b) => {
                let rhs = Linear::of(b).negate();
                Linear::of(a).scaled_add(rhs, 1)
            }
            ExprKind::Not(a) => {
                // !a == -a - 1
                let mut lin = Linear::of(a).negate();
                lin.constant = lin.constant.wrapping_add(lin.modulus_mask) & lin.modulus_mask;
                lin
            }
            _ => {
                let mut lin = Linear::new(bits);
                lin.terms.insert(expr.to_string(), 1);
                lin
            }
        }
    }
}

/// Built-in backend: decides queries whose expression reduces to a constant
/// once add/sub/not chains are normalized to a linear form over opaque atoms.
/// Everything else is `Unknown`.
#[derive(Debug, Default)]
pub struct NormalizingSolver {
    stats: SolverStats,
    debug: bool,
}

impl NormalizingSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every query and answer at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn decide(expr: &SymExpr) -> Tribool {
        if let ExprKind::Xor(a, b) = expr.kind() {
            if Linear::of(a) == Linear::of(b) {
                return Tribool::True;
            }
        }
        let lin = Linear::of(expr);
        if lin.terms.is_empty() {
            Tribool::from(lin.constant == 0)
        } else {
            Tribool::Unknown
        }
    }
}

impl Solver for NormalizingSolver {
    fn equal_to_zero(&mut self, expr: &SymExpr) -> Result<Tribool, SolverError> {
        let query = render_zero_query(expr);
        let answer = Self::decide(expr);
        let reply = match answer {
            Tribool::True => "unsat\n",
            Tribool::False => "sat\n",
            Tribool::Unknown => "unknown\n",
        };
        self.stats.calls += 1;
        self.stats.input_bytes += query.len() as u64;
        self.stats.output_bytes += reply.len() as u64;
        if self.debug {
            debug!("solver input:\n{query}solver output: {}", reply.trim_end());
        }
        Ok(answer)
    }

    fn stats(&self) -> SolverStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = SolverStats::default();
    }
}
