use crate::domain::{Domain, DomainMask};

/// Engine-local set of currently enabled domains. Every operation dispatch
/// reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationController {
    active: DomainMask,
}

impl Default for ActivationController {
    fn default() -> Self {
        Self {
            active: DomainMask::CONCRETE,
        }
    }
}

impl ActivationController {
    pub fn new(active: DomainMask) -> Self {
        Self { active }
    }

    pub fn set_active(&mut self, mask: DomainMask) {
        self.active = mask;
    }

    pub fn get_active(&self) -> DomainMask {
        self.active
    }

    pub fn is_active(&self, domain: Domain) -> bool {
        self.active.contains(domain)
    }

    /// Installs `mask` and returns the mask it replaced.
    pub fn replace(&mut self, mask: DomainMask) -> DomainMask {
        std::mem::replace(&mut self.active, mask)
    }
}

/// Anything that owns an [`ActivationController`] can run a body under a
/// temporarily forced domain set.
pub trait Activation {
    fn activation(&mut self) -> &mut ActivationController;

    /// Runs `body` with the active set forced to `mask`. The previous mask is
    /// back in place when this returns, whether `body` succeeded or failed.
    fn with_restricted<T, E, F>(&mut self, mask: DomainMask, body: F) -> Result<T, E>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        let saved = self.activation().replace(mask);
        let out = body(self);
        self.activation().set_active(saved);
        out
    }
}

impl Activation for ActivationController {
    fn activation(&mut self) -> &mut ActivationController {
        self
    }
}
