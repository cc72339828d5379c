//! Z3 backend for the zero query. Each query gets its own context, so the
//! solver itself holds no Z3 handles and stays `Send`.

use crate::domains::{ExprKind, SymExpr};
use crate::solver::{render_zero_query, Solver, SolverError, SolverStats, Tribool};
use tracing::debug;
use z3::ast::{Ast, BV};
use z3::{Config, Context, Params, SatResult};

const DEFAULT_TIMEOUT_MS: u32 = 5_000;

fn to_bv<'ctx>(ctx: &'ctx Context, expr: &SymExpr) -> BV<'ctx> {
    let bits = u32::from(expr.bits());
    let bit = |v: u64| BV::from_u64(ctx, v, 1);
    match expr.kind() {
        ExprKind::Const(v) => BV::from_u64(ctx, u64::from(*v), bits),
        ExprKind::Var(id) => BV::new_const(ctx, format!("v{id}"), bits),
        ExprKind::Add(a, b) => to_bv(ctx, a).bvadd(&to_bv(ctx, b)),
        ExprKind::Sub(a, b) => to_bv(ctx, a).bvsub(&to_bv(ctx, b)),
        ExprKind::And(a, b) => to_bv(ctx, a).bvand(&to_bv(ctx, b)),
        ExprKind::Or(a, b) => to_bv(ctx, a).bvor(&to_bv(ctx, b)),
        ExprKind::Xor(a, b) => to_bv(ctx, a).bvxor(&to_bv(ctx, b)),
        ExprKind::Not(a) => to_bv(ctx, a).bvnot(),
        ExprKind::Extract { arg, lo } => {
            let lo = u32::from(*lo);
            to_bv(ctx, arg).extract(lo + bits - 1, lo)
        }
        // Z3 puts the receiver in the high bits.
        ExprKind::Concat { lo, hi } => to_bv(ctx, hi).concat(&to_bv(ctx, lo)),
        ExprKind::Ite { cond, then, other } => to_bv(ctx, cond)
            ._eq(&bit(1))
            .ite(&to_bv(ctx, then), &to_bv(ctx, other)),
        ExprKind::Eq(a, b) => to_bv(ctx, a)._eq(&to_bv(ctx, b)).ite(&bit(1), &bit(0)),
    }
}

#[derive(Debug)]
pub struct Z3Solver {
    stats: SolverStats,
    timeout_ms: u32,
    debug: bool,
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self {
            stats: SolverStats::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            debug: false,
        }
    }
}

impl Z3Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Log every query and answer at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn decide(&self, expr: &SymExpr) -> Result<Tribool, SolverError> {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let solver = z3::Solver::new(&ctx);
        let mut params = Params::new(&ctx);
        params.set_u32("timeout", self.timeout_ms);
        solver.set_params(&params);

        let bv = to_bv(&ctx, expr);
        let zero = BV::from_u64(&ctx, 0, u32::from(expr.bits()));
        let unknown = |solver: &z3::Solver| {
            SolverError::Unavailable(
                solver
                    .get_reason_unknown()
                    .unwrap_or_else(|| "z3 returned unknown".to_string()),
            )
        };

        solver.assert(&bv._eq(&zero).not());
        match solver.check() {
            SatResult::Unsat => return Ok(Tribool::True),
            SatResult::Unknown => return Err(unknown(&solver)),
            SatResult::Sat => {}
        }
        solver.reset();
        solver.assert(&bv._eq(&zero));
        match solver.check() {
            SatResult::Unsat => Ok(Tribool::False),
            SatResult::Sat => Ok(Tribool::Unknown),
            SatResult::Unknown => Err(unknown(&solver)),
        }
    }
}

impl Solver for Z3Solver {
    fn equal_to_zero(&mut self, expr: &SymExpr) -> Result<Tribool, SolverError> {
        let query = render_zero_query(expr);
        let answer = self.decide(expr);
        let reply = match &answer {
            Ok(Tribool::True) => "unsat\n",
            Ok(Tribool::False) => "sat\n",
            Ok(Tribool::Unknown) | Err(_) => "unknown\n",
        };
        self.stats.calls += 1;
        self.stats.input_bytes += query.len() as u64;
        self.stats.output_bytes += reply.len() as u64;
        if self.debug {
            debug!("z3 input:\n{query}z3 output: {}", reply.trim_end());
        }
        answer
    }

    fn stats(&self) -> SolverStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats = SolverStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::{SemanticDomain, Symbolic};

    #[test]
    fn offsets_of_same_base_are_decided() {
        let mut s = Symbolic::new();
        let x = s.fresh(32);
        let one = s.number(32, 1);
        let x1 = s.add(32, &x, &one);
        let apart = s.sub(32, &x, &x1);
        let mut solver = Z3Solver::new();
        assert_eq!(solver.equal_to_zero(&apart).unwrap(), Tribool::False);
        assert_eq!(solver.stats().calls, 1);
    }

    #[test]
    fn bitwise_identities_are_proved() {
        let mut s = Symbolic::new();
        let x = s.fresh(16);
        let not_x = s.invert(16, &x);
        let e = s.and(16, &x, &not_x);
        assert!(e.as_const().is_none());
        let mut solver = Z3Solver::new();
        assert_eq!(solver.equal_to_zero(&e).unwrap(), Tribool::True);
    }

    #[test]
    fn independent_variables_stay_unknown() {
        let mut s = Symbolic::new();
        let x = s.fresh(8);
        let y = s.fresh(8);
        let e = s.xor(8, &x, &y);
        let mut solver = Z3Solver::new();
        assert_eq!(solver.equal_to_zero(&e).unwrap(), Tribool::Unknown);
        solver.reset_stats();
        assert_eq!(solver.stats(), SolverStats::default());
    }

    #[test]
    fn low_byte_of_xor_is_xor_of_low_bytes() {
        let mut s = Symbolic::new();
        let x = s.fresh(16);
        let lo = s.extract(16, &x, 0, 8);
        let k = s.number(16, 0x1234);
        let masked = s.xor(16, &x, &k);
        let m_lo = s.extract(16, &masked, 0, 8);
        let k_lo = s.number(8, 0x34);
        let lo_k = s.xor(8, &lo, &k_lo);
        let diff = s.sub(8, &m_lo, &lo_k);
        let mut solver = Z3Solver::new();
        assert_eq!(solver.equal_to_zero(&diff).unwrap(), Tribool::True);
    }
}
