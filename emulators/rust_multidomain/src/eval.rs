use crate::ast::{BinOp, Expr, Instruction, Stmt};
use crate::bridge::known_value;
use crate::bus::Bus;
use crate::domain::Domain;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::memory::ADDRESS_BITS;
use crate::registers::IP_REGISTER;
use crate::value::MultiValue;

struct Env<'a, B: Bus> {
    engine: &'a mut Engine<B>,
    jumped: bool,
}

/// Runs one instruction's semantics against the engine's current domains.
/// Memory writes reach the bus and the memory log only if every statement
/// succeeds; a failed step leaves `eip` where it was.
pub fn step<B: Bus>(engine: &mut Engine<B>, insn: &Instruction) -> Result<()> {
    let log_len = engine.begin_writes();
    let result = run(engine, insn);
    if result.is_ok() {
        engine.commit_writes();
    } else {
        engine.discard_writes(log_len);
    }
    result
}

fn run<B: Bus>(engine: &mut Engine<B>, insn: &Instruction) -> Result<()> {
    check_ip(engine, insn)?;
    let mut env = Env {
        engine,
        jumped: false,
    };
    for stmt in &insn.semantics {
        exec_stmt(stmt, &mut env)?;
    }
    if !env.jumped {
        let policy = env.engine.policy_mut();
        let ip = policy.read_register(IP_REGISTER)?;
        let len = policy.number(ADDRESS_BITS, u32::from(insn.length))?;
        let next = policy.add(&ip, &len)?;
        policy.write_register(IP_REGISTER, &next)?;
    }
    Ok(())
}

/// Every active domain that knows `eip` exactly must agree with the address
/// the instruction was decoded from.
fn check_ip<B: Bus>(engine: &Engine<B>, insn: &Instruction) -> Result<()> {
    let ip = engine.policy().read_register(IP_REGISTER)?;
    for domain in engine.policy().get_active().iter() {
        let known = match domain {
            Domain::Concrete => ip.concrete(),
            Domain::Interval => ip.interval().and_then(|i| i.singleton(ip.bits())),
            Domain::Symbolic => ip.symbolic().and_then(|e| e.as_const()),
        };
        if let Some(value) = known {
            if value != insn.address {
                return Err(Error::invariant(format!(
                    "{domain} eip 0x{value:08x} does not match instruction at 0x{:08x}",
                    insn.address
                )));
            }
        }
    }
    Ok(())
}

fn exec_stmt<B: Bus>(stmt: &Stmt, env: &mut Env<B>) -> Result<()> {
    match stmt {
        Stmt::SetReg { reg, value } => {
            let val = eval_expr(value, env)?;
            env.engine.policy_mut().write_register(reg, &val)?;
        }
        Stmt::Store { size, addr, value } => {
            let addr = eval_expr(addr, env)?;
            let val = eval_expr(value, env)?;
            if val.bits() != *size {
                return Err(Error::invariant(format!(
                    "store of {size} bits given a {}-bit value",
                    val.bits()
                )));
            }
            env.engine.write_memory(&addr, &val)?;
        }
        Stmt::Goto { target } => {
            let target = eval_expr(target, env)?;
            env.engine
                .policy_mut()
                .write_register(IP_REGISTER, &target)?;
            env.jumped = true;
        }
        Stmt::Trap { vector } => env.engine.record_trap(*vector),
    }
    Ok(())
}

fn eval_expr<B: Bus>(expr: &Expr, env: &mut Env<B>) -> Result<MultiValue> {
    match expr {
        Expr::Const { value, size } => env.engine.policy_mut().number(*size, *value),
        Expr::Reg { name } => env.engine.policy().read_register(name),
        Expr::Mem { size, addr } => {
            let addr = eval_expr(addr, env)?;
            env.engine.read_memory(&addr, *size)
        }
        Expr::BinOp { op, a, b } => {
            let a = eval_expr(a, env)?;
            let b = eval_expr(b, env)?;
            match op {
                BinOp::Add => env.engine.policy_mut().add(&a, &b),
                BinOp::Sub => env.engine.policy_mut().sub(&a, &b),
                BinOp::And => env.engine.policy_mut().and_(&a, &b),
                BinOp::Or => env.engine.policy_mut().or_(&a, &b),
                BinOp::Xor => env.engine.xor_(&a, &b),
            }
        }
        Expr::Not { a } => {
            let a = eval_expr(a, env)?;
            env.engine.policy_mut().invert(&a)
        }
        Expr::Extract { a, lo, hi } => {
            let a = eval_expr(a, env)?;
            env.engine.policy_mut().extract(&a, *lo, *hi)
        }
        Expr::Concat { lo, hi } => {
            let lo = eval_expr(lo, env)?;
            let hi = eval_expr(hi, env)?;
            env.engine.policy_mut().concat(&lo, &hi)
        }
        Expr::EqZ { a } => {
            let a = eval_expr(a, env)?;
            env.engine.policy_mut().equal_to_zero(&a)
        }
        Expr::Ite { cond, t, f } => {
            let cond = eval_expr(cond, env)?;
            let t = eval_expr(t, env)?;
            let f = eval_expr(f, env)?;
            env.engine.policy_mut().ite(&cond, &t, &f)
        }
        Expr::Undefined { size } => env.engine.policy_mut().undefined(*size),
    }
}

/// Concrete `eip` after a step, if any domain pins it down.
pub fn next_ip<B: Bus>(engine: &Engine<B>) -> Option<u32> {
    engine
        .policy()
        .registers()
        .get(IP_REGISTER)
        .ok()
        .and_then(known_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::InsnKind;
    use crate::bus::MemoryBus;
    use crate::config::EngineConfig;

    fn insn(address: u32, length: u8, semantics: Vec<Stmt>) -> Instruction {
        Instruction {
            address,
            length,
            kind: InsnKind::Other,
            text: String::new(),
            semantics,
        }
    }

    fn c32(value: u32) -> Box<Expr> {
        Box::new(Expr::Const { value, size: 32 })
    }

    fn reg(name: &str) -> Box<Expr> {
        Box::new(Expr::Reg { name: name.into() })
    }

    fn engine_at(ip: u32) -> Engine<MemoryBus> {
        let mut engine = Engine::new(MemoryBus::default(), EngineConfig::default());
        let v = MultiValue::empty(32).with_concrete(ip);
        engine.policy_mut().write_register(IP_REGISTER, &v).unwrap();
        engine
    }

    #[test]
    fn straight_line_advances_ip() {
        let mut engine = engine_at(0x100);
        let add = insn(
            0x100,
            3,
            vec![Stmt::SetReg {
                reg: "eax".into(),
                value: Expr::BinOp {
                    op: BinOp::Add,
                    a: reg("eax"),
                    b: c32(5),
                },
            }],
        );
        step(&mut engine, &add).unwrap();
        assert_eq!(engine.policy().read_register("eax").unwrap().concrete(), Some(5));
        assert_eq!(next_ip(&engine), Some(0x103));
    }

    #[test]
    fn goto_overrides_fallthrough() {
        let mut engine = engine_at(0x100);
        let jmp = insn(0x100, 2, vec![Stmt::Goto { target: *c32(0x400) }]);
        step(&mut engine, &jmp).unwrap();
        assert_eq!(next_ip(&engine), Some(0x400));
    }

    #[test]
    fn mismatched_ip_is_rejected() {
        let mut engine = engine_at(0x100);
        let nop = insn(0x200, 1, vec![]);
        assert!(matches!(
            step(&mut engine, &nop),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn store_then_load_through_memory() {
        let mut engine = engine_at(0);
        let st = insn(
            0,
            4,
            vec![
                Stmt::Store {
                    size: 16,
                    addr: *c32(0x80),
                    value: Expr::Const {
                        value: 0xBEEF,
                        size: 16,
                    },
                },
                Stmt::SetReg {
                    reg: "ecx".into(),
                    value: Expr::Concat {
                        lo: Box::new(Expr::Mem {
                            size: 16,
                            addr: c32(0x80),
                        }),
                        hi: Box::new(Expr::Const { value: 0, size: 16 }),
                    },
                },
            ],
        );
        step(&mut engine, &st).unwrap();
        assert_eq!(
            engine.policy().read_register("ecx").unwrap().concrete(),
            Some(0xBEEF)
        );
    }

    #[test]
    fn failed_step_leaves_memory_untouched() {
        let mut engine = engine_at(0);
        let bad = insn(
            0,
            3,
            vec![
                Stmt::Store {
                    size: 8,
                    addr: *c32(0x40),
                    value: Expr::Const {
                        value: 0x11,
                        size: 8,
                    },
                },
                Stmt::SetReg {
                    reg: "eax".into(),
                    value: Expr::Const { value: 1, size: 16 },
                },
            ],
        );
        assert!(step(&mut engine, &bad).is_err());
        assert!(engine.policy().bus().dump().is_empty());
        assert_eq!(next_ip(&engine), Some(0));
    }

    #[test]
    fn trap_is_recorded() {
        let mut engine = engine_at(0);
        step(&mut engine, &insn(0, 2, vec![Stmt::Trap { vector: 0x80 }])).unwrap();
        assert_eq!(engine.last_trap(), Some(0x80));
    }
}
