//! McCarthy-style memory for the triggered phase: every byte write is a cell
//! `(address expression, byte)`, and a read folds the cells that may alias the
//! requested address into one conditional value.

use crate::bridge::{derive_interval, derive_symbolic};
use crate::bus::Bus;
use crate::domains::{Interval, SemanticDomain, SymExpr};
use crate::error::{Error, Result};
use crate::policy::MultiPolicy;
use crate::solver::Tribool;
use crate::value::MultiValue;
use std::fmt;
use tracing::trace;

pub const ADDRESS_BITS: u8 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCell {
    addr: SymExpr,
    value: MultiValue,
}

impl MemoryCell {
    pub fn new(addr: SymExpr, value: MultiValue) -> Result<Self> {
        if addr.bits() != ADDRESS_BITS {
            return Err(Error::invariant(format!(
                "memory cell address is {} bits, expected {ADDRESS_BITS}",
                addr.bits()
            )));
        }
        if value.bits() != 8 {
            return Err(Error::invariant(format!(
                "memory cell holds {} bits, expected 8",
                value.bits()
            )));
        }
        value.check_operand("memory cell")?;
        Ok(Self { addr, value })
    }

    pub fn addr(&self) -> &SymExpr {
        &self.addr
    }

    pub fn value(&self) -> &MultiValue {
        &self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alias {
    Must,
    May,
    No,
}

/// Append-only; the newest cell is the last element.
#[derive(Debug, Clone, Default)]
pub struct SymbolicMemoryLog {
    cells: Vec<MemoryCell>,
}

impl SymbolicMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, cell: MemoryCell) {
        self.cells.push(cell);
    }

    /// Drops every cell written after the first `len`.
    pub fn truncate(&mut self, len: usize) {
        self.cells.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryCell> {
        self.cells.iter().rev()
    }

    fn classify<B: Bus>(
        policy: &mut MultiPolicy<B>,
        addr: &SymExpr,
        cell: &MemoryCell,
        prune: bool,
    ) -> Alias {
        let eq = policy.symbolic_mut().equal(addr, cell.addr());
        match eq.as_const() {
            Some(1) => return Alias::Must,
            Some(_) => return Alias::No,
            None => {}
        }
        if !prune {
            return Alias::May;
        }
        let diff = policy
            .symbolic_mut()
            .sub(ADDRESS_BITS, addr, cell.addr());
        match policy.symbolic_mut().prove_zero(&diff) {
            Tribool::True => Alias::Must,
            Tribool::False => Alias::No,
            Tribool::Unknown => Alias::May,
        }
    }

    /// One byte at `addr`, most recent write winning. Cells whose address may
    /// or may not match become a conditional chain over an older base.
    pub fn read_byte<B: Bus>(
        &self,
        addr: &SymExpr,
        policy: &mut MultiPolicy<B>,
        prune: bool,
    ) -> Result<MultiValue> {
        if addr.bits() != ADDRESS_BITS {
            return Err(Error::invariant(format!(
                "memory read address is {} bits, expected {ADDRESS_BITS}",
                addr.bits()
            )));
        }
        let mut candidates: Vec<&MemoryCell> = Vec::new();
        let mut base: Option<&MemoryCell> = None;
        for cell in self.iter() {
            match Self::classify(policy, addr, cell, prune) {
                Alias::No => {}
                Alias::May => candidates.push(cell),
                Alias::Must => {
                    base = Some(cell);
                    break;
                }
            }
        }
        trace!(
            "read [{addr}]: {} may-alias cells, must-alias {}",
            candidates.len(),
            base.is_some()
        );

        let mut out = MultiValue::empty(8);
        let Some(base) = base else {
            // Anything older than the log is unconstrained.
            out.set_interval(Some(Interval::top(8)));
            let mut sym = policy.symbolic_mut().fresh(8);
            for cell in candidates.iter().rev() {
                sym = Self::select(policy, addr, cell, &sym);
            }
            out.set_symbolic(Some(sym))?;
            return Ok(out);
        };

        let mut concrete = base.value().concrete();
        let mut interval = derive_interval(base.value());
        for cell in &candidates {
            if concrete.is_some() && cell.value().concrete() != concrete {
                concrete = None;
            }
            interval = match (interval, derive_interval(cell.value())) {
                (Some(a), Some(b)) => Some(a.hull(8, &b)),
                _ => Some(Interval::top(8)),
            };
        }
        let mut sym = match derive_symbolic(base.value()) {
            Some(expr) => expr,
            None => policy.symbolic_mut().fresh(8),
        };
        for cell in candidates.iter().rev() {
            sym = Self::select(policy, addr, cell, &sym);
        }
        out.set_concrete(concrete);
        out.set_interval(interval);
        out.set_symbolic(Some(sym))?;
        Ok(out)
    }

    fn select<B: Bus>(
        policy: &mut MultiPolicy<B>,
        addr: &SymExpr,
        cell: &MemoryCell,
        otherwise: &SymExpr,
    ) -> SymExpr {
        let value = match derive_symbolic(cell.value()) {
            Some(expr) => expr,
            None => policy.symbolic_mut().fresh(8),
        };
        let sym = policy.symbolic_mut();
        let cond = sym.equal(addr, cell.addr());
        sym.ite(8, &cond, &value, otherwise)
    }
}

impl fmt::Display for SymbolicMemoryLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "memory log ({} cells, newest first):", self.cells.len())?;
        for cell in self.iter() {
            writeln!(f, "  [{}] = {}", cell.addr, cell.value)?;
        }
        Ok(())
    }
}
