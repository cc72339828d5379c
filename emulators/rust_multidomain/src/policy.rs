use crate::activation::{Activation, ActivationController};
use crate::bridge::{derive_concrete, derive_interval, derive_symbolic};
use crate::bus::Bus;
use crate::domain::{Domain, DomainMask};
use crate::domains::{Concrete, IntervalDomain, SemanticDomain, Symbolic};
use crate::error::{Error, Result};
use crate::registers::{descriptor, RegisterFile};
use crate::value::{check_width, MultiValue};
use tracing::warn;

fn same_width(op: &str, a: &MultiValue, b: &MultiValue) -> Result<u8> {
    if a.bits() != b.bits() {
        return Err(Error::invariant(format!(
            "{op}: operand widths differ ({} vs {})",
            a.bits(),
            b.bits()
        )));
    }
    Ok(a.bits())
}

pub fn check_access_width(bits: u8) -> Result<()> {
    if !matches!(bits, 8 | 16 | 24 | 32) {
        return Err(Error::invariant(format!(
            "memory access of {bits} bits; expected 8, 16, 24 or 32"
        )));
    }
    Ok(())
}

macro_rules! binary_op {
    ($name:ident, $method:ident) => {
        pub fn $name(&mut self, a: &MultiValue, b: &MultiValue) -> Result<MultiValue> {
            let bits = same_width(stringify!($name), a, b)?;
            let mut out = MultiValue::empty(bits);
            if self.is_active(Domain::Concrete) {
                if let (Some(x), Some(y)) = (derive_concrete(a), derive_concrete(b)) {
                    out.set_concrete(Some(self.concrete.$method(bits, &x, &y)));
                }
            }
            if self.is_active(Domain::Interval) {
                if let (Some(x), Some(y)) = (derive_interval(a), derive_interval(b)) {
                    out.set_interval(Some(self.interval.$method(bits, &x, &y)));
                }
            }
            if self.is_active(Domain::Symbolic) {
                if let (Some(x), Some(y)) = (derive_symbolic(a), derive_symbolic(b)) {
                    out.set_symbolic(Some(self.symbolic.$method(bits, &x, &y)))?;
                }
            }
            Ok(out)
        }
    };
}

/// The three domain policies plus the machine state they operate on. Every
/// operation runs each *active* domain in `Domain::ALL` order; a domain whose
/// operands cannot supply (or be bridged to) a sub-value produces none.
pub struct MultiPolicy<B: Bus> {
    activation: ActivationController,
    concrete: Concrete,
    interval: IntervalDomain,
    symbolic: Symbolic,
    registers: RegisterFile,
    bus: B,
    /// Concrete stores held back from the bus, oldest first.
    staged: Option<Vec<(u32, u8)>>,
}

impl<B: Bus> Activation for MultiPolicy<B> {
    fn activation(&mut self) -> &mut ActivationController {
        &mut self.activation
    }
}

impl<B: Bus> MultiPolicy<B> {
    /// Registers start concretely zero, interval-unknown, and as fresh symbolic
    /// variables. Only the concrete domain is active.
    pub fn new(bus: B, mut symbolic: Symbolic) -> Self {
        let registers =
            RegisterFile::new(|desc| MultiValue::seeded(0, symbolic.fresh(desc.bits)));
        Self {
            activation: ActivationController::new(DomainMask::CONCRETE),
            concrete: Concrete,
            interval: IntervalDomain,
            symbolic,
            registers,
            bus,
            staged: None,
        }
    }

    pub fn set_active(&mut self, mask: DomainMask) {
        self.activation.set_active(mask);
    }

    pub fn get_active(&self) -> DomainMask {
        self.activation.get_active()
    }

    pub fn is_active(&self, domain: Domain) -> bool {
        self.activation.is_active(domain)
    }

    pub fn symbolic(&self) -> &Symbolic {
        &self.symbolic
    }

    pub fn symbolic_mut(&mut self) -> &mut Symbolic {
        &mut self.symbolic
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Concrete stores stay off the bus until [`commit_stores`](Self::commit_stores).
    /// Loads still see them.
    pub fn stage_stores(&mut self) {
        self.staged = Some(Vec::new());
    }

    pub fn commit_stores(&mut self) {
        for (addr, byte) in self.staged.take().unwrap_or_default() {
            self.bus.store_byte(addr, byte);
        }
    }

    pub fn discard_stores(&mut self) {
        self.staged = None;
    }

    /// Little-endian concrete load, staged stores first.
    pub fn load(&mut self, addr: u32, bits: u8) -> u32 {
        let mut value = 0u32;
        for i in 0..u32::from(bits / 8) {
            let at = addr.wrapping_add(i);
            let staged = self
                .staged
                .as_ref()
                .and_then(|s| s.iter().rev().find(|(a, _)| *a == at))
                .map(|&(_, byte)| byte);
            let byte = match staged {
                Some(byte) => byte,
                None => self.bus.load_byte(at),
            };
            value |= u32::from(byte) << (8 * i);
        }
        value
    }

    fn store(&mut self, addr: u32, bits: u8, value: u32) {
        match &mut self.staged {
            Some(staged) => {
                for i in 0..u32::from(bits / 8) {
                    staged.push((addr.wrapping_add(i), (value >> (8 * i)) as u8));
                }
            }
            None => self.bus.store(addr, bits, value),
        }
    }

    pub fn number(&mut self, bits: u8, value: u32) -> Result<MultiValue> {
        check_width(bits)?;
        let mut out = MultiValue::empty(bits);
        if self.is_active(Domain::Concrete) {
            out.set_concrete(Some(self.concrete.number(bits, value)));
        }
        if self.is_active(Domain::Interval) {
            out.set_interval(Some(self.interval.number(bits, value)));
        }
        if self.is_active(Domain::Symbolic) {
            out.set_symbolic(Some(self.symbolic.number(bits, value)))?;
        }
        Ok(out)
    }

    /// Concrete has no "unknown" pattern, so its slot stays empty.
    pub fn undefined(&mut self, bits: u8) -> Result<MultiValue> {
        check_width(bits)?;
        let mut out = MultiValue::empty(bits);
        if self.is_active(Domain::Interval) {
            out.set_interval(Some(self.interval.undefined(bits)));
        }
        if self.is_active(Domain::Symbolic) {
            out.set_symbolic(Some(self.symbolic.undefined(bits)))?;
        }
        Ok(out)
    }

    binary_op!(add, add);
    binary_op!(sub, sub);
    binary_op!(and_, and);
    binary_op!(or_, or);
    binary_op!(xor_, xor);

    pub fn invert(&mut self, a: &MultiValue) -> Result<MultiValue> {
        let bits = a.bits();
        let mut out = MultiValue::empty(bits);
        if self.is_active(Domain::Concrete) {
            if let Some(x) = derive_concrete(a) {
                out.set_concrete(Some(self.concrete.invert(bits, &x)));
            }
        }
        if self.is_active(Domain::Interval) {
            if let Some(x) = derive_interval(a) {
                out.set_interval(Some(self.interval.invert(bits, &x)));
            }
        }
        if self.is_active(Domain::Symbolic) {
            if let Some(x) = derive_symbolic(a) {
                out.set_symbolic(Some(self.symbolic.invert(bits, &x)))?;
            }
        }
        Ok(out)
    }

    /// Bits `[lo, hi)` of `a`.
    pub fn extract(&mut self, a: &MultiValue, lo: u8, hi: u8) -> Result<MultiValue> {
        let bits = a.bits();
        if lo >= hi || hi > bits {
            return Err(Error::invariant(format!(
                "extract [{lo}, {hi}) from a {bits}-bit value"
            )));
        }
        let width = hi - lo;
        let mut out = MultiValue::empty(width);
        if self.is_active(Domain::Concrete) {
            if let Some(x) = derive_concrete(a) {
                out.set_concrete(Some(self.concrete.extract(bits, &x, lo, hi)));
            }
        }
        if self.is_active(Domain::Interval) {
            if let Some(x) = derive_interval(a) {
                out.set_interval(Some(self.interval.extract(bits, &x, lo, hi)));
            }
        }
        if self.is_active(Domain::Symbolic) {
            if let Some(x) = derive_symbolic(a) {
                out.set_symbolic(Some(self.symbolic.extract(bits, &x, lo, hi)))?;
            }
        }
        Ok(out)
    }

    /// `lo` becomes the low bits of the result, `hi` the bits above it.
    pub fn concat(&mut self, lo: &MultiValue, hi: &MultiValue) -> Result<MultiValue> {
        let (lo_bits, hi_bits) = (lo.bits(), hi.bits());
        check_width(lo_bits + hi_bits)?;
        let mut out = MultiValue::empty(lo_bits + hi_bits);
        if self.is_active(Domain::Concrete) {
            if let (Some(l), Some(h)) = (derive_concrete(lo), derive_concrete(hi)) {
                out.set_concrete(Some(self.concrete.concat(&l, lo_bits, &h, hi_bits)));
            }
        }
        if self.is_active(Domain::Interval) {
            if let (Some(l), Some(h)) = (derive_interval(lo), derive_interval(hi)) {
                out.set_interval(Some(self.interval.concat(&l, lo_bits, &h, hi_bits)));
            }
        }
        if self.is_active(Domain::Symbolic) {
            if let (Some(l), Some(h)) = (derive_symbolic(lo), derive_symbolic(hi)) {
                out.set_symbolic(Some(self.symbolic.concat(&l, lo_bits, &h, hi_bits)))?;
            }
        }
        Ok(out)
    }

    /// `cond` must be one bit wide.
    pub fn ite(&mut self, cond: &MultiValue, t: &MultiValue, f: &MultiValue) -> Result<MultiValue> {
        if cond.bits() != 1 {
            return Err(Error::invariant(format!(
                "ite condition is {} bits",
                cond.bits()
            )));
        }
        let bits = same_width("ite", t, f)?;
        let mut out = MultiValue::empty(bits);
        if self.is_active(Domain::Concrete) {
            if let (Some(c), Some(x), Some(y)) =
                (derive_concrete(cond), derive_concrete(t), derive_concrete(f))
            {
                out.set_concrete(Some(self.concrete.ite(bits, &c, &x, &y)));
            }
        }
        if self.is_active(Domain::Interval) {
            if let (Some(c), Some(x), Some(y)) =
                (derive_interval(cond), derive_interval(t), derive_interval(f))
            {
                out.set_interval(Some(self.interval.ite(bits, &c, &x, &y)));
            }
        }
        if self.is_active(Domain::Symbolic) {
            if let (Some(c), Some(x), Some(y)) =
                (derive_symbolic(cond), derive_symbolic(t), derive_symbolic(f))
            {
                out.set_symbolic(Some(self.symbolic.ite(bits, &c, &x, &y)))?;
            }
        }
        Ok(out)
    }

    /// One-bit result, set when `a` is zero.
    pub fn equal_to_zero(&mut self, a: &MultiValue) -> Result<MultiValue> {
        let bits = a.bits();
        let mut out = MultiValue::empty(1);
        if self.is_active(Domain::Concrete) {
            if let Some(x) = derive_concrete(a) {
                out.set_concrete(Some(self.concrete.equal_to_zero(bits, &x)));
            }
        }
        if self.is_active(Domain::Interval) {
            if let Some(x) = derive_interval(a) {
                out.set_interval(Some(self.interval.equal_to_zero(bits, &x)));
            }
        }
        if self.is_active(Domain::Symbolic) {
            if let Some(x) = derive_symbolic(a) {
                out.set_symbolic(Some(self.symbolic.equal_to_zero(bits, &x)))?;
            }
        }
        Ok(out)
    }

    /// Inactive domains are stripped from the result.
    pub fn read_register(&self, name: &str) -> Result<MultiValue> {
        Ok(self.registers.get(name)?.restrict(self.get_active()))
    }

    /// Replaces the register's slot: active domains take `value`'s sub-values
    /// (including "unknown"), inactive domains keep the previous ones.
    pub fn write_register(&mut self, name: &str, value: &MultiValue) -> Result<()> {
        let desc = descriptor(name)?;
        if value.bits() != desc.bits {
            return Err(Error::invariant(format!(
                "{}-bit value written to {}-bit register {}",
                value.bits(),
                desc.bits,
                desc.name
            )));
        }
        let merged = self
            .registers
            .get(desc.name)?
            .overlay(value, self.get_active())?;
        self.registers.replace(desc.name, merged)?;
        Ok(())
    }

    /// Installs `value` wholesale, ignoring the active mask. Used to seed state.
    pub fn seed_register(&mut self, name: &str, value: MultiValue) -> Result<()> {
        self.registers.replace(name, value).map(|_| ())
    }

    /// Per-domain memory read: concrete from the bus, the other domains know
    /// nothing about memory on their own.
    pub fn read_memory(&mut self, addr: &MultiValue, bits: u8) -> Result<MultiValue> {
        check_access_width(bits)?;
        addr.check_operand("address")?;
        let mut out = MultiValue::empty(bits);
        if self.is_active(Domain::Concrete) {
            match derive_concrete(addr) {
                Some(a) => out.set_concrete(Some(self.load(a, bits))),
                None => warn!("memory read with no concrete address; concrete result unknown"),
            }
        }
        if self.is_active(Domain::Interval) {
            out.set_interval(Some(self.interval.undefined(bits)));
        }
        if self.is_active(Domain::Symbolic) {
            out.set_symbolic(Some(self.symbolic.undefined(bits)))?;
        }
        Ok(out)
    }

    /// Per-domain memory write. Only the concrete domain has memory of its own.
    pub fn write_memory(&mut self, addr: &MultiValue, data: &MultiValue) -> Result<()> {
        check_access_width(data.bits())?;
        addr.check_operand("address")?;
        data.check_operand("data")?;
        if self.is_active(Domain::Concrete) {
            let a = derive_concrete(addr)
                .ok_or_else(|| Error::missing(Domain::Concrete, "memory write address"))?;
            let v = derive_concrete(data)
                .ok_or_else(|| Error::missing(Domain::Concrete, "memory write data"))?;
            self.store(a, data.bits(), v);
        }
        Ok(())
    }
}
