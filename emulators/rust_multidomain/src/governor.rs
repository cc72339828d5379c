use crate::domain::{Domain, DomainMask};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerState {
    #[default]
    Idle,
    Triggered,
}

/// One-way trigger plus the symbolic complexity budget and the solver report
/// cadence.
#[derive(Debug, Clone)]
pub struct Governor {
    state: TriggerState,
    allowed: DomainMask,
    complexity_threshold: usize,
    report_interval: u64,
    instructions: u64,
}

impl Governor {
    pub fn new(allowed: DomainMask, complexity_threshold: usize, report_interval: u64) -> Self {
        Self {
            state: TriggerState::Idle,
            allowed,
            complexity_threshold,
            report_interval,
            instructions: 0,
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn is_triggered(&self) -> bool {
        self.state == TriggerState::Triggered
    }

    /// Domains the engine may activate from now on.
    pub fn allowed(&self) -> DomainMask {
        self.allowed
    }

    /// Returns false when already triggered.
    pub fn trigger(&mut self) -> bool {
        if self.is_triggered() {
            return false;
        }
        self.state = TriggerState::Triggered;
        true
    }

    /// Returns true exactly once: on the call that first sees `complexity`
    /// above the threshold while symbolic is still allowed.
    pub fn check_complexity(&mut self, complexity: usize) -> bool {
        if complexity <= self.complexity_threshold || !self.allowed.contains(Domain::Symbolic) {
            return false;
        }
        self.allowed = self.allowed.without(Domain::Symbolic);
        true
    }

    /// Counts one triggered instruction; true when a solver report is due.
    pub fn tick(&mut self) -> bool {
        self.instructions += 1;
        self.report_interval != 0 && self.instructions % self.report_interval == 0
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn reset_counter(&mut self) {
        self.instructions = 0;
    }

    pub fn complexity_threshold(&self) -> usize {
        self.complexity_threshold
    }

    pub fn report_interval(&self) -> u64 {
        self.report_interval
    }
}
