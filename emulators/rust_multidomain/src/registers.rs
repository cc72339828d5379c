use crate::error::{Error, Result};
use crate::value::MultiValue;
use serde::Serialize;
use std::collections::HashMap;

pub const IP_REGISTER: &str = "eip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub bits: u8,
}

const fn reg(name: &'static str, bits: u8) -> RegisterDescriptor {
    RegisterDescriptor { name, bits }
}

/// 32-bit x86 register dictionary. Sub-registers (ax, al, ...) are not
/// modelled; flags are individual one-bit registers.
pub const X86_REGISTERS: [RegisterDescriptor; 22] = [
    reg("eax", 32),
    reg("ecx", 32),
    reg("edx", 32),
    reg("ebx", 32),
    reg("esp", 32),
    reg("ebp", 32),
    reg("esi", 32),
    reg("edi", 32),
    reg("eip", 32),
    reg("es", 16),
    reg("cs", 16),
    reg("ss", 16),
    reg("ds", 16),
    reg("fs", 16),
    reg("gs", 16),
    reg("cf", 1),
    reg("pf", 1),
    reg("af", 1),
    reg("zf", 1),
    reg("sf", 1),
    reg("df", 1),
    reg("of", 1),
];

pub fn descriptor(name: &str) -> Result<RegisterDescriptor> {
    X86_REGISTERS
        .iter()
        .find(|r| r.name == name)
        .copied()
        .ok_or_else(|| Error::UnknownRegister(name.to_string()))
}

/// Current value of every register. Each slot holds exactly one
/// `MultiValue`; writes replace it.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs: HashMap<&'static str, MultiValue>,
}

impl RegisterFile {
    pub fn new(mut init: impl FnMut(&RegisterDescriptor) -> MultiValue) -> Self {
        let regs = X86_REGISTERS
            .iter()
            .map(|desc| (desc.name, init(desc)))
            .collect();
        Self { regs }
    }

    pub fn get(&self, name: &str) -> Result<&MultiValue> {
        self.regs
            .get(name)
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))
    }

    pub fn replace(&mut self, name: &str, value: MultiValue) -> Result<MultiValue> {
        let desc = descriptor(name)?;
        if value.bits() != desc.bits {
            return Err(Error::invariant(format!(
                "{}-bit value written to {}-bit register {}",
                value.bits(),
                desc.bits,
                desc.name
            )));
        }
        self.regs
            .insert(desc.name, value)
            .ok_or_else(|| Error::UnknownRegister(name.to_string()))
    }

    /// Registers in dictionary order.
    pub fn iter(&self) -> impl Iterator<Item = (&RegisterDescriptor, &MultiValue)> {
        X86_REGISTERS
            .iter()
            .filter_map(|desc| self.regs.get(desc.name).map(|v| (desc, v)))
    }
}
