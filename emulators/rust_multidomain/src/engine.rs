//! The instruction-level driver. Before triggering, every instruction runs in
//! the concrete domain only and memory is the bus. After `trigger` the allowed
//! domains run side by side, memory goes through the symbolic log, and each
//! instruction is bracketed by the governor checks in `before_instruction` /
//! `after_instruction`.

use crate::activation::Activation;
use crate::ast::Instruction;
use crate::bridge::{derive_concrete, ensure, refine_xor_zero};
use crate::bus::Bus;
use crate::config::EngineConfig;
use crate::domain::{Domain, DomainMask};
use crate::domains::{SemanticDomain, SymExpr, Symbolic};
use crate::error::{Error, Result};
use crate::eval;
use crate::governor::{Governor, TriggerState};
use crate::memory::{MemoryCell, SymbolicMemoryLog, ADDRESS_BITS};
use crate::policy::{check_access_width, MultiPolicy};
use crate::registers::IP_REGISTER;
use crate::solver::{NormalizingSolver, Solver, SolverStats};
use crate::value::MultiValue;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SolverReport {
    /// Triggered instructions counted when the report was taken.
    pub instruction: u64,
    pub stats: SolverStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterSnapshot {
    pub name: &'static str,
    pub bits: u8,
    pub concrete: Option<u32>,
    pub interval: Option<String>,
    pub symbolic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellSnapshot {
    pub addr: String,
    pub value: String,
}

/// Every register in every domain plus the memory log, newest cell first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub active: DomainMask,
    pub registers: Vec<RegisterSnapshot>,
    pub memory_log: Vec<CellSnapshot>,
}

impl fmt::Display for StateSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "active domains: {}", self.active)?;
        for reg in &self.registers {
            write!(f, "  {:<4}", reg.name)?;
            match reg.concrete {
                Some(v) => write!(f, " concrete=0x{v:x}")?,
                None => write!(f, " concrete=--")?,
            }
            writeln!(
                f,
                " interval={} symbolic={}",
                reg.interval.as_deref().unwrap_or("--"),
                reg.symbolic.as_deref().unwrap_or("--")
            )?;
        }
        writeln!(f, "memory log ({} cells):", self.memory_log.len())?;
        for cell in &self.memory_log {
            writeln!(f, "  [{}] = {}", cell.addr, cell.value)?;
        }
        Ok(())
    }
}

pub struct Engine<B: Bus> {
    config: EngineConfig,
    policy: MultiPolicy<B>,
    log: SymbolicMemoryLog,
    governor: Governor,
    last_trap: Option<u8>,
    last_report: Option<SolverReport>,
}

impl<B: Bus> Engine<B> {
    /// Uses the built-in [`NormalizingSolver`].
    pub fn new(bus: B, config: EngineConfig) -> Self {
        let solver = NormalizingSolver::new().with_debug(config.solver_debug);
        Self::with_solver(bus, config, Some(Box::new(solver)))
    }

    pub fn with_solver(bus: B, config: EngineConfig, solver: Option<Box<dyn Solver>>) -> Self {
        let mut symbolic = Symbolic::new();
        symbolic.set_solver(solver);
        let governor = Governor::new(
            config.allowed_domains.with(Domain::Concrete),
            config.complexity_threshold,
            config.report_interval,
        );
        Self {
            policy: MultiPolicy::new(bus, symbolic),
            log: SymbolicMemoryLog::new(),
            governor,
            last_trap: None,
            last_report: None,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn policy(&self) -> &MultiPolicy<B> {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut MultiPolicy<B> {
        &mut self.policy
    }

    pub fn memory_log(&self) -> &SymbolicMemoryLog {
        &self.log
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn state(&self) -> TriggerState {
        self.governor.state()
    }

    pub fn last_trap(&self) -> Option<u8> {
        self.last_trap
    }

    pub fn record_trap(&mut self, vector: u8) {
        debug!("[{}] trap vector 0x{vector:02x}", self.config.name);
        self.last_trap = Some(vector);
    }

    pub fn last_solver_report(&self) -> Option<&SolverReport> {
        self.last_report.as_ref()
    }

    pub fn ensure(&self, domain: Domain, value: MultiValue) -> Result<MultiValue> {
        ensure(&self.policy, domain, value)
    }

    /// Switches from concrete-only execution to the allowed domains and starts
    /// analysis at `target`. A second call does nothing.
    pub fn trigger(&mut self, target: u32) -> Result<()> {
        if !self.governor.trigger() {
            return Ok(());
        }
        let allowed = self.governor.allowed();
        info!(
            "[{}] triggered at 0x{target:08x}, domains {allowed}",
            self.config.name
        );
        self.policy.set_active(allowed);
        self.write_ip(target)
    }

    fn write_ip(&mut self, address: u32) -> Result<()> {
        let ip = self.policy.number(ADDRESS_BITS, address)?;
        self.policy.write_register(IP_REGISTER, &ip)
    }

    /// Node count of every register's symbolic sub-value.
    pub fn symbolic_state_complexity(&self) -> usize {
        self.policy
            .registers()
            .iter()
            .filter_map(|(_, value)| value.symbolic())
            .map(SymExpr::node_count)
            .sum()
    }

    pub fn before_instruction(&mut self, insn: &Instruction) -> Result<()> {
        if !self.governor.is_triggered() {
            return Ok(());
        }
        let complexity = self.symbolic_state_complexity();
        if self.governor.check_complexity(complexity) {
            info!(
                "[{}] symbolic complexity {complexity} exceeds {}; symbolic domain disabled",
                self.config.name,
                self.governor.complexity_threshold()
            );
        }
        let mask = if insn.kind.is_trap_like() {
            DomainMask::CONCRETE
        } else {
            self.governor.allowed()
        };
        self.policy.set_active(mask);
        self.write_ip(insn.address)?;
        if self.governor.tick() {
            self.report_solver_statistics();
        }
        Ok(())
    }

    fn report_solver_statistics(&mut self) {
        let instruction = self.governor.instructions();
        let Some(solver) = self.policy.symbolic_mut().solver_mut() else {
            return;
        };
        let stats = solver.stats();
        if stats.calls == 0 {
            return;
        }
        info!(
            "[{}] solver: {} calls, {} bytes sent, {} bytes received",
            self.config.name, stats.calls, stats.input_bytes, stats.output_bytes
        );
        solver.reset_stats();
        self.last_report = Some(SolverReport { instruction, stats });
    }

    pub fn after_instruction(&mut self, insn: &Instruction) {
        if !self.governor.is_triggered() {
            return;
        }
        if tracing::enabled!(Level::DEBUG) {
            let snapshot = self.state_snapshot();
            debug!(
                "[{}] after 0x{:08x} {}:\n{snapshot}",
                self.config.name, insn.address, insn.text
            );
        }
        self.policy.set_active(self.governor.allowed());
    }

    pub fn execute(&mut self, insn: &Instruction) -> Result<()> {
        if !self.governor.is_triggered() {
            return eval::step(self, insn);
        }
        let result = self
            .before_instruction(insn)
            .and_then(|()| eval::step(self, insn));
        if let Err(err) = &result {
            warn!(
                "[{}] 0x{:08x} {}: {err}",
                self.config.name, insn.address, insn.text
            );
        }
        self.after_instruction(insn);
        result
    }

    /// `xor` that also tells the interval domain when the result is provably
    /// zero.
    pub fn xor_(&mut self, a: &MultiValue, b: &MultiValue) -> Result<MultiValue> {
        let value = self.policy.xor_(a, b)?;
        Ok(refine_xor_zero(&mut self.policy, value))
    }

    pub fn read_memory(&mut self, addr: &MultiValue, bits: u8) -> Result<MultiValue> {
        if !self.governor.is_triggered() {
            return self.policy.read_memory(addr, bits);
        }
        check_access_width(bits)?;
        addr.check_operand("address")?;
        if !self.policy.is_active(Domain::Symbolic) {
            return self.policy.read_memory(addr, bits);
        }
        let base = match ensure(&self.policy, Domain::Symbolic, addr.clone()) {
            Ok(value) => value,
            Err(err) => {
                warn!("[{}] memory read falls back to per-domain: {err}", self.config.name);
                return self.policy.read_memory(addr, bits);
            }
        };
        let base = base
            .symbolic()
            .cloned()
            .ok_or_else(|| Error::missing(Domain::Symbolic, "memory read address"))?;

        let mut value: Option<MultiValue> = None;
        for i in 0..u32::from(bits / 8) {
            let offset = SymExpr::constant(ADDRESS_BITS, i);
            let byte_addr = self.policy.symbolic_mut().add(ADDRESS_BITS, &base, &offset);
            let byte = self
                .log
                .read_byte(&byte_addr, &mut self.policy, self.config.read_pruning)?;
            value = Some(match value {
                None => byte,
                Some(lo) => self.policy.concat(&lo, &byte)?,
            });
        }
        let mut value = value.unwrap_or_else(|| MultiValue::empty(bits));
        // The bus sees every concrete write, so it stays authoritative there.
        if self.policy.is_active(Domain::Concrete) {
            if let Some(a) = derive_concrete(addr) {
                value.set_concrete(Some(self.policy.load(a, bits)));
            }
        }
        Ok(value.restrict(self.policy.get_active()))
    }

    pub fn write_memory(&mut self, addr: &MultiValue, data: &MultiValue) -> Result<()> {
        if !self.governor.is_triggered() {
            return self.policy.write_memory(addr, data);
        }
        check_access_width(data.bits())?;
        addr.check_operand("address")?;
        data.check_operand("data")?;

        if self.policy.is_active(Domain::Concrete) {
            let committed = self
                .policy
                .with_restricted(DomainMask::CONCRETE, |p| p.write_memory(addr, data));
            if let Err(err) = committed {
                warn!("[{}] concrete memory write skipped: {err}", self.config.name);
            }
        }
        if !self.policy.is_active(Domain::Symbolic) {
            return Ok(());
        }
        let base = match ensure(&self.policy, Domain::Symbolic, addr.clone()) {
            Ok(value) => value.symbolic().cloned(),
            Err(err) => {
                warn!("[{}] memory write not logged: {err}", self.config.name);
                return Ok(());
            }
        };
        let Some(base) = base else {
            return Ok(());
        };
        let data = ensure(&self.policy, Domain::Symbolic, data.clone())
            .unwrap_or_else(|_| data.clone());

        let mut cells = Vec::with_capacity(usize::from(data.bits() / 8));
        for i in 0..data.bits() / 8 {
            let offset = SymExpr::constant(ADDRESS_BITS, u32::from(i));
            let byte_addr = self.policy.symbolic_mut().add(ADDRESS_BITS, &base, &offset);
            let byte = self.policy.extract(&data, i * 8, i * 8 + 8)?;
            cells.push(MemoryCell::new(byte_addr, byte)?);
        }
        for cell in cells {
            self.log.write(cell);
        }
        Ok(())
    }

    /// Holds memory effects back until the running step finishes. Returns the
    /// log length to roll back to.
    pub(crate) fn begin_writes(&mut self) -> usize {
        self.policy.stage_stores();
        self.log.len()
    }

    pub(crate) fn commit_writes(&mut self) {
        self.policy.commit_stores();
    }

    /// Drops the bus stores and log cells of a failed step.
    pub(crate) fn discard_writes(&mut self, log_len: usize) {
        self.policy.discard_stores();
        self.log.truncate(log_len);
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        let registers = self
            .policy
            .registers()
            .iter()
            .map(|(desc, value)| RegisterSnapshot {
                name: desc.name,
                bits: desc.bits,
                concrete: value.concrete(),
                interval: value.interval().map(|i| i.to_string()),
                symbolic: value.symbolic().map(|e| e.to_string()),
            })
            .collect();
        let memory_log = self
            .log
            .iter()
            .map(|cell| CellSnapshot {
                addr: cell.addr().to_string(),
                value: cell.value().to_string(),
            })
            .collect();
        StateSnapshot {
            active: self.policy.get_active(),
            registers,
            memory_log,
        }
    }

    /// Current solver counters, if a solver is attached.
    pub fn solver_statistics(&self) -> Option<SolverStats> {
        self.policy.symbolic().solver().map(|s| s.stats())
    }

    pub fn reset_solver_statistics(&mut self) {
        if let Some(solver) = self.policy.symbolic_mut().solver_mut() {
            solver.reset_stats();
        }
        self.governor.reset_counter();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::domains::Interval;

    fn triggered() -> Engine<MemoryBus> {
        let mut engine = Engine::new(MemoryBus::default(), EngineConfig::default());
        engine.trigger(0x1000).unwrap();
        engine
    }

    #[test]
    fn trigger_writes_ip_in_every_domain() {
        let engine = triggered();
        let eip = engine.policy().read_register("eip").unwrap();
        assert_eq!(eip.concrete(), Some(0x1000));
        assert_eq!(eip.interval(), Some(Interval::exact(32, 0x1000)));
        assert_eq!(eip.symbolic().and_then(SymExpr::as_const), Some(0x1000));
    }

    #[test]
    fn second_trigger_is_ignored() {
        let mut engine = triggered();
        engine.trigger(0x2000).unwrap();
        let eip = engine.policy().read_register("eip").unwrap();
        assert_eq!(eip.concrete(), Some(0x1000));
    }

    #[test]
    fn idle_memory_goes_straight_to_the_bus() {
        let mut engine = Engine::new(MemoryBus::default(), EngineConfig::default());
        let addr = MultiValue::empty(32).with_concrete(0x40);
        let data = MultiValue::empty(32).with_concrete(0x1122_3344);
        engine.write_memory(&addr, &data).unwrap();
        assert!(engine.memory_log().is_empty());
        assert_eq!(engine.read_memory(&addr, 32).unwrap().concrete(), Some(0x1122_3344));
    }

    #[test]
    fn triggered_write_logs_one_cell_per_byte() {
        let mut engine = triggered();
        let addr = engine.policy_mut().number(32, 0x40).unwrap();
        let data = engine.policy_mut().number(24, 0xABCDEF).unwrap();
        engine.write_memory(&addr, &data).unwrap();
        assert_eq!(engine.memory_log().len(), 3);
        assert_eq!(engine.policy_mut().bus_mut().load(0x40, 24), 0xABCDEF);
        let back = engine.read_memory(&addr, 24).unwrap();
        assert_eq!(back.symbolic().and_then(SymExpr::as_const), Some(0xABCDEF));
    }

    #[test]
    fn rejected_width_logs_nothing() {
        let mut engine = triggered();
        let addr = engine.policy_mut().number(32, 0x40).unwrap();
        let data = engine.policy_mut().number(12, 0x123).unwrap();
        assert!(engine.write_memory(&addr, &data).is_err());
        assert!(engine.memory_log().is_empty());
    }

    #[test]
    fn snapshot_lists_every_register() {
        let engine = triggered();
        let snap = engine.state_snapshot();
        assert_eq!(snap.registers.len(), crate::registers::X86_REGISTERS.len());
        assert!(snap.to_string().contains("eip"));
    }
}
