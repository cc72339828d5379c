mod common;

use common::{insn, konst, offset, reg, sym_const, symbolic_address, triggered, START};
use rust_multidomain::ast::{BinOp, Expr, InsnKind, Stmt};
use rust_multidomain::domains::ExprKind;
use rust_multidomain::solver::SolverError;
use rust_multidomain::{
    Domain, DomainMask, Engine, EngineConfig, Error, Interval, MemoryBus, MultiValue, Solver,
    SolverStats, SymExpr, TriggerState, Tribool,
};

/// A backend that never answers.
struct Offline;

impl Solver for Offline {
    fn equal_to_zero(&mut self, _expr: &SymExpr) -> Result<Tribool, SolverError> {
        Err(SolverError::Unavailable("backend offline".into()))
    }

    fn stats(&self) -> SolverStats {
        SolverStats::default()
    }

    fn reset_stats(&mut self) {}
}

fn offline_engine() -> Engine<MemoryBus> {
    let mut engine = Engine::with_solver(
        MemoryBus::default(),
        EngineConfig::default(),
        Some(Box::new(Offline)),
    );
    engine.trigger(START).unwrap();
    engine
}

fn ranged_address() -> MultiValue {
    MultiValue::empty(32).with_interval(Interval::new(32, 0x40, 0x4F))
}

#[test]
fn adjacent_symbolic_writes_read_back_little_endian() {
    let mut engine = triggered(EngineConfig::default());
    let x = symbolic_address(&mut engine);
    let x1 = offset(&mut engine, &x, 1);
    let a = engine.policy_mut().number(8, 0x41).unwrap();
    let b = engine.policy_mut().number(8, 0x00).unwrap();
    engine.write_memory(&x, &a).unwrap();
    engine.write_memory(&x1, &b).unwrap();
    assert_eq!(engine.memory_log().len(), 2);

    let value = engine.read_memory(&x, 16).unwrap();
    assert_eq!(value.bits(), 16);
    assert_eq!(value.concrete(), Some(0x0041));
    assert_eq!(sym_const(&value), Some(0x0041));
    assert_eq!(value.interval(), Some(Interval::exact(16, 0x0041)));
}

#[test]
fn later_write_to_same_address_wins() {
    let mut engine = triggered(EngineConfig::default());
    let x = symbolic_address(&mut engine);
    for byte in [0x01, 0x02] {
        let v = engine.policy_mut().number(8, byte).unwrap();
        engine.write_memory(&x, &v).unwrap();
    }
    let value = engine.read_memory(&x, 8).unwrap();
    assert_eq!(value.concrete(), Some(0x02));
    assert_eq!(sym_const(&value), Some(0x02));
}

#[test]
fn xor_of_register_with_itself_pins_interval_to_zero() {
    let mut engine = Engine::new(MemoryBus::default(), EngineConfig::default());
    let policy = engine.policy_mut();
    let eax = policy
        .registers()
        .get("eax")
        .unwrap()
        .clone()
        .with_interval(Interval::new(32, -100, 100));
    policy.seed_register("eax", eax).unwrap();
    engine.trigger(START).unwrap();

    let xor = insn(
        START,
        2,
        InsnKind::Other,
        vec![Stmt::SetReg {
            reg: "eax".into(),
            value: Expr::BinOp {
                op: BinOp::Xor,
                a: Box::new(reg("eax")),
                b: Box::new(reg("eax")),
            },
        }],
    );
    engine.execute(&xor).unwrap();
    let eax = engine.policy().read_register("eax").unwrap();
    assert_eq!(eax.interval(), Some(Interval::exact(32, 0)));
    assert_eq!(eax.concrete(), Some(0));
    assert_eq!(sym_const(&eax), Some(0));
}

#[test]
fn trap_runs_concrete_only_and_restores_mask() {
    let mut engine = triggered(EngineConfig::default());
    let before = engine.policy().read_register("eax").unwrap();
    let int80 = insn(
        START,
        2,
        InsnKind::Int,
        vec![
            Stmt::SetReg {
                reg: "eax".into(),
                value: konst(7, 32),
            },
            Stmt::Trap { vector: 0x80 },
        ],
    );
    engine.execute(&int80).unwrap();

    assert_eq!(engine.policy().get_active(), DomainMask::ALL);
    let eax = engine.policy().read_register("eax").unwrap();
    assert_eq!(eax.concrete(), Some(7));
    assert_eq!(eax.symbolic(), before.symbolic());
    assert_eq!(eax.interval(), before.interval());
    assert_eq!(engine.last_trap(), Some(0x80));
}

#[test]
fn ip_tracks_the_instruction_in_every_domain() {
    let mut engine = triggered(EngineConfig::default());
    engine
        .execute(&insn(START, 3, InsnKind::Other, vec![]))
        .unwrap();
    let eip = engine.policy().read_register("eip").unwrap();
    assert_eq!(eip.concrete(), Some(START + 3));
    assert_eq!(eip.interval(), Some(Interval::exact(32, START + 3)));
    assert_eq!(sym_const(&eip), Some(START + 3));
}

#[test]
fn complexity_budget_disables_symbolic_for_good() {
    let config = EngineConfig {
        complexity_threshold: 5,
        ..EngineConfig::default()
    };
    let mut engine = triggered(config);
    let mut ip = START;
    for _ in 0..4 {
        engine.execute(&insn(ip, 1, InsnKind::Other, vec![])).unwrap();
        ip += 1;
        assert!(!engine.governor().allowed().contains(Domain::Symbolic));
        assert!(!engine.policy().is_active(Domain::Symbolic));
    }
    let value = MultiValue::empty(32).with_concrete(3);
    assert!(matches!(
        engine.ensure(Domain::Symbolic, value),
        Err(Error::MissingDomainData {
            domain: Domain::Symbolic,
            ..
        })
    ));
    assert_eq!(engine.state(), TriggerState::Triggered);
}

#[test]
fn solver_statistics_are_reported_on_the_interval() {
    let config = EngineConfig {
        report_interval: 2,
        ..EngineConfig::default()
    };
    let mut engine = triggered(config);
    let esi_plus_one = Expr::BinOp {
        op: BinOp::Add,
        a: Box::new(reg("esi")),
        b: Box::new(konst(1, 32)),
    };
    let body = vec![
        Stmt::Store {
            size: 8,
            addr: reg("esi"),
            value: konst(0x5A, 8),
        },
        Stmt::SetReg {
            reg: "eax".into(),
            value: Expr::Concat {
                lo: Box::new(Expr::Mem {
                    size: 8,
                    addr: Box::new(esi_plus_one),
                }),
                hi: Box::new(konst(0, 24)),
            },
        },
    ];
    engine
        .execute(&insn(START, 4, InsnKind::Other, body.clone()))
        .unwrap();
    assert!(engine.last_solver_report().is_none());
    let first = engine.solver_statistics().unwrap();
    assert!(first.calls > 0);

    // The report is taken before the second instruction runs.
    engine
        .execute(&insn(START + 4, 4, InsnKind::Other, body))
        .unwrap();
    let report = engine.last_solver_report().copied().unwrap();
    assert_eq!(report.instruction, 2);
    assert_eq!(report.stats, first);
    assert!(report.stats.input_bytes > 0);

    engine.reset_solver_statistics();
    assert_eq!(engine.governor().instructions(), 0);
    assert_eq!(engine.solver_statistics().map(|s| s.calls), Some(0));
}

#[test]
fn unwritten_symbolic_address_reads_as_unknown() {
    let mut engine = triggered(EngineConfig::default());
    let x = symbolic_address(&mut engine);
    let value = engine.read_memory(&x, 8).unwrap();
    assert_eq!(value.concrete(), None);
    assert_eq!(value.interval(), Some(Interval::top(8)));
    assert!(value.symbolic().is_some());
    assert_eq!(sym_const(&value), None);
}

#[test]
fn failed_instruction_still_restores_the_mask() {
    let mut engine = triggered(EngineConfig::default());
    let bad = insn(
        START,
        2,
        InsnKind::Syscall,
        vec![Stmt::SetReg {
            reg: "eax".into(),
            value: konst(1, 16),
        }],
    );
    assert!(matches!(
        engine.execute(&bad),
        Err(Error::InvariantViolation(_))
    ));
    assert_eq!(engine.policy().get_active(), DomainMask::ALL);
}

#[test]
fn idle_engine_only_runs_concrete() {
    let mut engine = Engine::new(MemoryBus::default(), EngineConfig::default());
    let ip = MultiValue::empty(32).with_concrete(0x40);
    engine.policy_mut().write_register("eip", &ip).unwrap();
    engine
        .execute(&insn(
            0x40,
            1,
            InsnKind::Other,
            vec![Stmt::SetReg {
                reg: "ebx".into(),
                value: konst(9, 32),
            }],
        ))
        .unwrap();
    let ebx = engine.policy().registers().get("ebx").unwrap().clone();
    assert_eq!(ebx.concrete(), Some(9));
    assert_eq!(sym_const(&ebx), None);
    assert_eq!(engine.state(), TriggerState::Idle);
    assert!(engine.last_solver_report().is_none());
}

#[test]
fn failed_instruction_commits_no_memory_writes() {
    let mut engine = triggered(EngineConfig::default());
    let bad = insn(
        START,
        3,
        InsnKind::Other,
        vec![
            Stmt::Store {
                size: 8,
                addr: konst(0x40, 32),
                value: konst(0x11, 8),
            },
            Stmt::SetReg {
                reg: "eax".into(),
                value: konst(1, 16),
            },
        ],
    );
    assert!(matches!(
        engine.execute(&bad),
        Err(Error::InvariantViolation(_))
    ));
    assert_eq!(engine.memory_log().len(), 0);
    assert!(engine.policy().bus().dump().is_empty());
    let eip = engine.policy().read_register("eip").unwrap();
    assert_eq!(eip.concrete(), Some(START));

    // The same store in a well-formed instruction goes through.
    let good = insn(
        START,
        3,
        InsnKind::Other,
        vec![Stmt::Store {
            size: 8,
            addr: konst(0x40, 32),
            value: konst(0x11, 8),
        }],
    );
    engine.execute(&good).unwrap();
    assert_eq!(engine.memory_log().len(), 1);
    assert_eq!(engine.policy().bus().dump(), vec![(0x40, 0x11)]);
}

#[test]
fn unreachable_solver_degrades_reads_to_unknown() {
    let mut engine = offline_engine();
    let x = symbolic_address(&mut engine);
    let y = symbolic_address(&mut engine);
    let data = engine.policy_mut().number(8, 0x41).unwrap();
    engine.write_memory(&x, &data).unwrap();

    let value = engine.read_memory(&y, 8).unwrap();
    assert_eq!(value.concrete(), None);
    assert_eq!(value.interval(), Some(Interval::top(8)));
    assert!(matches!(
        value.symbolic().map(SymExpr::kind),
        Some(ExprKind::Ite { .. })
    ));
}

#[test]
fn unreachable_solver_leaves_xor_interval_alone() {
    let mut engine = offline_engine();
    let esi = engine.policy().read_register("esi").unwrap();
    let edi = engine.policy().read_register("edi").unwrap();
    let value = engine.xor_(&esi, &edi).unwrap();
    assert_eq!(value.concrete(), Some(0));
    assert_ne!(value.interval(), Some(Interval::exact(32, 0)));
    assert_eq!(sym_const(&value), None);
}

#[test]
fn ranged_address_read_falls_back_per_domain() {
    let mut engine = triggered(EngineConfig::default());
    let value = engine.read_memory(&ranged_address(), 8).unwrap();
    assert_eq!(value.concrete(), None);
    assert_eq!(value.interval(), Some(Interval::top(8)));
    assert!(value.symbolic().is_some());
    assert_eq!(sym_const(&value), None);
    assert_eq!(engine.memory_log().len(), 0);
}

#[test]
fn ranged_address_write_is_not_logged() {
    let mut engine = triggered(EngineConfig::default());
    let data = engine.policy_mut().number(8, 0x11).unwrap();
    engine.write_memory(&ranged_address(), &data).unwrap();
    assert_eq!(engine.memory_log().len(), 0);
    assert!(engine.policy().bus().dump().is_empty());
}

#[test]
fn write_without_symbolic_keeps_the_concrete_effect() {
    let config = EngineConfig {
        allowed_domains: DomainMask::of(&[Domain::Concrete, Domain::Interval]),
        ..EngineConfig::default()
    };
    let mut engine = triggered(config);
    let addr = engine.policy_mut().number(32, 0x40).unwrap();
    let data = engine.policy_mut().number(8, 0x11).unwrap();
    engine.write_memory(&addr, &data).unwrap();
    assert_eq!(engine.memory_log().len(), 0);
    assert_eq!(engine.policy().bus().dump(), vec![(0x40, 0x11)]);

    let back = engine.read_memory(&addr, 8).unwrap();
    assert_eq!(back.concrete(), Some(0x11));
    assert_eq!(back.symbolic(), None);
}
