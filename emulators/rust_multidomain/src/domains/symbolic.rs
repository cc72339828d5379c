use super::{mask, SemanticDomain};
use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::solver::{Solver, Tribool};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Const(u32),
    Var(u64),
    Add(SymExpr, SymExpr),
    Sub(SymExpr, SymExpr),
    And(SymExpr, SymExpr),
    Or(SymExpr, SymExpr),
    Xor(SymExpr, SymExpr),
    Not(SymExpr),
    /// Node width bits starting at `lo`.
    Extract { arg: SymExpr, lo: u8 },
    Concat { lo: SymExpr, hi: SymExpr },
    Ite { cond: SymExpr, then: SymExpr, other: SymExpr },
    /// One bit wide.
    Eq(SymExpr, SymExpr),
}

#[derive(Debug, PartialEq, Eq)]
struct Node {
    bits: u8,
    nnodes: usize,
    kind: ExprKind,
}

/// Immutable, shared bit-vector expression.
#[derive(Clone)]
pub struct SymExpr(Arc<Node>);

impl PartialEq for SymExpr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for SymExpr {}

impl SymExpr {
    fn make(bits: u8, kind: ExprKind) -> Self {
        let children: usize = match &kind {
            ExprKind::Const(_) | ExprKind::Var(_) => 0,
            ExprKind::Not(a) | ExprKind::Extract { arg: a, .. } => a.node_count(),
            ExprKind::Add(a, b)
            | ExprKind::Sub(a, b)
            | ExprKind::And(a, b)
            | ExprKind::Or(a, b)
            | ExprKind::Xor(a, b)
            | ExprKind::Eq(a, b)
            | ExprKind::Concat { lo: a, hi: b } => a.node_count().saturating_add(b.node_count()),
            ExprKind::Ite { cond, then, other } => cond
                .node_count()
                .saturating_add(then.node_count())
                .saturating_add(other.node_count()),
        };
        SymExpr(Arc::new(Node {
            bits,
            nnodes: children.saturating_add(1),
            kind,
        }))
    }

    pub fn constant(bits: u8, value: u32) -> Self {
        Self::make(bits, ExprKind::Const(value & mask(bits)))
    }

    pub fn var(bits: u8, id: u64) -> Self {
        Self::make(bits, ExprKind::Var(id))
    }

    pub fn bits(&self) -> u8 {
        self.0.bits
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Size of the expression tree, shared subtrees counted once per use.
    pub fn node_count(&self) -> usize {
        self.0.nnodes
    }

    pub fn as_const(&self) -> Option<u32> {
        match self.0.kind {
            ExprKind::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Free variables and their widths.
    pub fn variables(&self) -> BTreeMap<u64, u8> {
        let mut out = BTreeMap::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeMap<u64, u8>) {
        match self.kind() {
            ExprKind::Const(_) => {}
            ExprKind::Var(id) => {
                out.insert(*id, self.bits());
            }
            ExprKind::Not(a) | ExprKind::Extract { arg: a, .. } => a.collect_vars(out),
            ExprKind::Add(a, b)
            | ExprKind::Sub(a, b)
            | ExprKind::And(a, b)
            | ExprKind::Or(a, b)
            | ExprKind::Xor(a, b)
            | ExprKind::Eq(a, b)
            | ExprKind::Concat { lo: a, hi: b } => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            ExprKind::Ite { cond, then, other } => {
                cond.collect_vars(out);
                then.collect_vars(out);
                other.collect_vars(out);
            }
        }
    }
}

// SMT-LIB flavoured rendering; the solver layer sends exactly this text.
impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Const(v) => write!(f, "(_ bv{} {})", v, self.bits()),
            ExprKind::Var(id) => write!(f, "v{id}"),
            ExprKind::Add(a, b) => write!(f, "(bvadd {a} {b})"),
            ExprKind::Sub(a, b) => write!(f, "(bvsub {a} {b})"),
            ExprKind::And(a, b) => write!(f, "(bvand {a} {b})"),
            ExprKind::Or(a, b) => write!(f, "(bvor {a} {b})"),
            ExprKind::Xor(a, b) => write!(f, "(bvxor {a} {b})"),
            ExprKind::Not(a) => write!(f, "(bvnot {a})"),
            ExprKind::Extract { arg, lo } => {
                write!(f, "((_ extract {} {}) {})", lo + self.bits() - 1, lo, arg)
            }
            ExprKind::Concat { lo, hi } => write!(f, "(concat {hi} {lo})"),
            ExprKind::Ite { cond, then, other } => {
                write!(f, "(ite (= {cond} (_ bv1 1)) {then} {other})")
            }
            ExprKind::Eq(a, b) => write!(f, "(ite (= {a} {b}) (_ bv1 1) (_ bv0 1))"),
        }
    }
}

impl fmt::Debug for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self, self.bits())
    }
}

/// Symbolic domain: builds expressions with local constant folding and asks
/// the attached solver (if any) for anything folding cannot decide.
pub struct Symbolic {
    next_var: u64,
    solver: Option<Box<dyn Solver>>,
}

impl Default for Symbolic {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Symbolic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbolic")
            .field("next_var", &self.next_var)
            .field("solver", &self.solver.is_some())
            .finish()
    }
}

impl Symbolic {
    pub fn new() -> Self {
        Self {
            next_var: 0,
            solver: None,
        }
    }

    pub fn with_solver(solver: Box<dyn Solver>) -> Self {
        Self {
            next_var: 0,
            solver: Some(solver),
        }
    }

    pub fn set_solver(&mut self, solver: Option<Box<dyn Solver>>) {
        self.solver = solver;
    }

    pub fn solver(&self) -> Option<&dyn Solver> {
        self.solver.as_deref()
    }

    pub fn solver_mut(&mut self) -> Option<&mut (dyn Solver + 'static)> {
        self.solver.as_deref_mut()
    }

    pub fn fresh(&mut self, bits: u8) -> SymExpr {
        let id = self.next_var;
        self.next_var += 1;
        SymExpr::var(bits, id)
    }

    pub fn equal(&mut self, a: &SymExpr, b: &SymExpr) -> SymExpr {
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return SymExpr::constant(1, (x == y) as u32);
        }
        if a == b {
            return SymExpr::constant(1, 1);
        }
        SymExpr::make(1, ExprKind::Eq(a.clone(), b.clone()))
    }

    /// One solver call, no folding.
    pub fn query_zero(&mut self, expr: &SymExpr) -> Result<Tribool> {
        let solver = self
            .solver
            .as_deref_mut()
            .ok_or_else(|| Error::SolverUnavailable("no solver attached".into()))?;
        Ok(solver.equal_to_zero(expr)?)
    }

    /// Is `expr` zero under every assignment? Constant folding answers first;
    /// otherwise one solver call. A solver failure is reported as `Unknown`.
    pub fn prove_zero(&mut self, expr: &SymExpr) -> Tribool {
        if let Some(v) = expr.as_const() {
            return Tribool::from(v == 0);
        }
        if self.solver.is_none() {
            return Tribool::Unknown;
        }
        self.query_zero(expr).unwrap_or_else(|err| {
            warn!("solver query failed, treating as unknown: {err}");
            Tribool::Unknown
        })
    }

    fn fold2(
        &self,
        bits: u8,
        a: &SymExpr,
        b: &SymExpr,
        exact: impl Fn(u32, u32) -> u32,
    ) -> Option<SymExpr> {
        match (a.as_const(), b.as_const()) {
            (Some(x), Some(y)) => Some(SymExpr::constant(bits, exact(x, y))),
            _ => None,
        }
    }
}

impl SemanticDomain for Symbolic {
    type Value = SymExpr;

    const DOMAIN: Domain = Domain::Symbolic;

    fn number(&mut self, bits: u8, value: u32) -> SymExpr {
        SymExpr::constant(bits, value)
    }

    fn undefined(&mut self, bits: u8) -> SymExpr {
        self.fresh(bits)
    }

    fn add(&mut self, bits: u8, a: &SymExpr, b: &SymExpr) -> SymExpr {
        if let Some(e) = self.fold2(bits, a, b, u32::wrapping_add) {
            return e;
        }
        match (a.as_const(), b.as_const()) {
            (Some(0), _) => b.clone(),
            (_, Some(0)) => a.clone(),
            _ => SymExpr::make(bits, ExprKind::Add(a.clone(), b.clone())),
        }
    }

    fn sub(&mut self, bits: u8, a: &SymExpr, b: &SymExpr) -> SymExpr {
        if let Some(e) = self.fold2(bits, a, b, u32::wrapping_sub) {
            return e;
        }
        if a == b {
            return SymExpr::constant(bits, 0);
        }
        if b.as_const() == Some(0) {
            return a.clone();
        }
        SymExpr::make(bits, ExprKind::Sub(a.clone(), b.clone()))
    }

    fn and(&mut self, bits: u8, a: &SymExpr, b: &SymExpr) -> SymExpr {
        if let Some(e) = self.fold2(bits, a, b, |x, y| x & y) {
            return e;
        }
        let all = mask(bits);
        match (a.as_const(), b.as_const()) {
            (Some(0), _) | (_, Some(0)) => SymExpr::constant(bits, 0),
            (Some(m), _) if m == all => b.clone(),
            (_, Some(m)) if m == all => a.clone(),
            _ if a == b => a.clone(),
            _ => SymExpr::make(bits, ExprKind::And(a.clone(), b.clone())),
        }
    }

    fn or(&mut self, bits: u8, a: &SymExpr, b: &SymExpr) -> SymExpr {
        if let Some(e) = self.fold2(bits, a, b, |x, y| x | y) {
            return e;
        }
        let all = mask(bits);
        match (a.as_const(), b.as_const()) {
            (Some(0), _) => b.clone(),
            (_, Some(0)) => a.clone(),
            (Some(m), _) | (_, Some(m)) if m == all => SymExpr::constant(bits, all),
            _ if a == b => a.clone(),
            _ => SymExpr::make(bits, ExprKind::Or(a.clone(), b.clone())),
        }
    }

    fn xor(&mut self, bits: u8, a: &SymExpr, b: &SymExpr) -> SymExpr {
        if let Some(e) = self.fold2(bits, a, b, |x, y| x ^ y) {
            return e;
        }
        if a == b {
            return SymExpr::constant(bits, 0);
        }
        match (a.as_const(), b.as_const()) {
            (Some(0), _) => b.clone(),
            (_, Some(0)) => a.clone(),
            _ => SymExpr::make(bits, ExprKind::Xor(a.clone(), b.clone())),
        }
    }

    fn invert(&mut self, bits: u8, a: &SymExpr) -> SymExpr {
        if let Some(v) = a.as_const() {
            return SymExpr::constant(bits, !v);
        }
        if let ExprKind::Not(inner) = a.kind() {
            return inner.clone();
        }
        SymExpr::make(bits, ExprKind::Not(a.clone()))
    }

    fn extract(&mut self, bits: u8, a: &SymExpr, lo: u8, hi: u8) -> SymExpr {
        let width = hi - lo;
        if let Some(v) = a.as_const() {
            return SymExpr::constant(width, v.checked_shr(lo as u32).unwrap_or(0));
        }
        if lo == 0 && hi == bits {
            return a.clone();
        }
        match a.kind() {
            ExprKind::Extract { arg, lo: inner_lo } => {
                let arg = arg.clone();
                let base = *inner_lo;
                self.extract(arg.bits(), &arg, base + lo, base + hi)
            }
            ExprKind::Concat { lo: low, hi: high } => {
                let split = low.bits();
                if hi <= split {
                    let low = low.clone();
                    self.extract(split, &low, lo, hi)
                } else if lo >= split {
                    let high = high.clone();
                    self.extract(high.bits(), &high, lo - split, hi - split)
                } else {
                    SymExpr::make(width, ExprKind::Extract { arg: a.clone(), lo })
                }
            }
            _ => SymExpr::make(width, ExprKind::Extract { arg: a.clone(), lo }),
        }
    }

    fn concat(&mut self, lo: &SymExpr, lo_bits: u8, hi: &SymExpr, hi_bits: u8) -> SymExpr {
        let width = lo_bits + hi_bits;
        if let (Some(l), Some(h)) = (lo.as_const(), hi.as_const()) {
            let high = h.checked_shl(lo_bits as u32).unwrap_or(0);
            return SymExpr::constant(width, high | l);
        }
        // Adjacent slices of the same value glue back together.
        if let (
            ExprKind::Extract { arg: la, lo: llo },
            ExprKind::Extract { arg: ha, lo: hlo },
        ) = (lo.kind(), hi.kind())
        {
            if la == ha && *hlo == *llo + lo_bits {
                let arg = la.clone();
                let start = *llo;
                return self.extract(arg.bits(), &arg, start, start + width);
            }
        }
        SymExpr::make(
            width,
            ExprKind::Concat {
                lo: lo.clone(),
                hi: hi.clone(),
            },
        )
    }

    fn ite(&mut self, bits: u8, cond: &SymExpr, t: &SymExpr, f: &SymExpr) -> SymExpr {
        match cond.as_const() {
            Some(c) if c & 1 != 0 => t.clone(),
            Some(_) => f.clone(),
            None if t == f => t.clone(),
            None => SymExpr::make(
                bits,
                ExprKind::Ite {
                    cond: cond.clone(),
                    then: t.clone(),
                    other: f.clone(),
                },
            ),
        }
    }

    fn equal_to_zero(&mut self, bits: u8, a: &SymExpr) -> SymExpr {
        let zero = SymExpr::constant(bits, 0);
        self.equal(a, &zero)
    }
}
