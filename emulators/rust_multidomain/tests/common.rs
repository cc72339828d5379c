#![allow(dead_code)]

use rust_multidomain::ast::{Expr, InsnKind, Instruction, Stmt};
use rust_multidomain::{Engine, EngineConfig, MemoryBus, MultiValue, SymExpr};

pub const START: u32 = 0x1000;

pub fn triggered(config: EngineConfig) -> Engine<MemoryBus> {
    let mut engine = Engine::new(MemoryBus::default(), config);
    engine.trigger(START).expect("trigger");
    engine
}

pub fn insn(address: u32, length: u8, kind: InsnKind, semantics: Vec<Stmt>) -> Instruction {
    Instruction {
        address,
        length,
        kind,
        text: String::new(),
        semantics,
    }
}

pub fn konst(value: u32, size: u8) -> Expr {
    Expr::Const { value, size }
}

pub fn reg(name: &str) -> Expr {
    Expr::Reg { name: name.into() }
}

/// A 32-bit address known only symbolically.
pub fn symbolic_address(engine: &mut Engine<MemoryBus>) -> MultiValue {
    let var = engine.policy_mut().symbolic_mut().fresh(32);
    MultiValue::empty(32).with_symbolic(var).expect("width")
}

pub fn offset(engine: &mut Engine<MemoryBus>, addr: &MultiValue, by: u32) -> MultiValue {
    let policy = engine.policy_mut();
    let by = policy.number(32, by).expect("number");
    policy.add(addr, &by).expect("add")
}

pub fn sym_const(value: &MultiValue) -> Option<u32> {
    value.symbolic().and_then(SymExpr::as_const)
}
