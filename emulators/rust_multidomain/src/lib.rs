pub mod activation;
pub mod ast;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod domain;
pub mod domains;
pub mod engine;
pub mod error;
pub mod eval;
pub mod governor;
pub mod memory;
pub mod policy;
pub mod registers;
pub mod solver;
pub mod value;
#[cfg(feature = "z3")]
pub mod z3_solver;

pub use activation::{Activation, ActivationController};
pub use ast::{Instruction, InsnKind};
pub use bus::{Bus, MemoryBus};
pub use config::EngineConfig;
pub use domain::{Domain, DomainMask};
pub use domains::{Interval, SymExpr};
pub use engine::{Engine, StateSnapshot};
pub use error::{Error, Result};
pub use eval::step;
pub use governor::TriggerState;
pub use memory::{MemoryCell, SymbolicMemoryLog};
pub use policy::MultiPolicy;
pub use solver::{NormalizingSolver, Solver, SolverStats, Tribool};
pub use value::MultiValue;
#[cfg(feature = "z3")]
pub use z3_solver::Z3Solver;
