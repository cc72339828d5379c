use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    #[serde(rename = "const")]
    Const { value: u32, size: u8 },
    #[serde(rename = "reg")]
    Reg { name: String },
    #[serde(rename = "mem")]
    Mem { size: u8, addr: Box<Expr> },
    #[serde(rename = "binop")]
    BinOp { op: BinOp, a: Box<Expr>, b: Box<Expr> },
    #[serde(rename = "not")]
    Not { a: Box<Expr> },
    /// Bits `[lo, hi)`.
    #[serde(rename = "extract")]
    Extract { a: Box<Expr>, lo: u8, hi: u8 },
    #[serde(rename = "concat")]
    Concat { lo: Box<Expr>, hi: Box<Expr> },
    /// One bit, set when `a` is zero.
    #[serde(rename = "eqz")]
    EqZ { a: Box<Expr> },
    #[serde(rename = "ite")]
    Ite {
        cond: Box<Expr>,
        t: Box<Expr>,
        f: Box<Expr>,
    },
    #[serde(rename = "undefined")]
    Undefined { size: u8 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    #[serde(rename = "set_reg")]
    SetReg { reg: String, value: Expr },
    #[serde(rename = "store")]
    Store { size: u8, addr: Expr, value: Expr },
    #[serde(rename = "goto")]
    Goto { target: Expr },
    #[serde(rename = "trap")]
    Trap { vector: u8 },
}

/// Mnemonic class; only the trap-like ones change how the engine evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsnKind {
    Int,
    Int3,
    Into,
    Syscall,
    Sysenter,
    #[default]
    #[serde(other)]
    Other,
}

impl InsnKind {
    /// Instructions that hand control to the OS or a debugger.
    pub fn is_trap_like(self) -> bool {
        !matches!(self, InsnKind::Other)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub address: u32,
    pub length: u8,
    #[serde(default)]
    pub kind: InsnKind,
    #[serde(default)]
    pub text: String,
    pub semantics: Vec<Stmt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_from_json() {
        let insn: Instruction = serde_json::from_str(
            r#"{
                "address": 4096, "length": 2, "text": "xor eax, eax",
                "semantics": [{"type": "set_reg", "reg": "eax", "value":
                    {"type": "binop", "op": "xor",
                     "a": {"type": "reg", "name": "eax"},
                     "b": {"type": "reg", "name": "eax"}}}]
            }"#,
        )
        .unwrap();
        assert_eq!(insn.kind, InsnKind::Other);
        assert!(matches!(
            &insn.semantics[0],
            Stmt::SetReg { reg, value: Expr::BinOp { op: BinOp::Xor, .. } } if reg == "eax"
        ));
    }

    #[test]
    fn unrecognised_kinds_are_ordinary() {
        let kind: InsnKind = serde_json::from_str(r#""mov""#).unwrap();
        assert_eq!(kind, InsnKind::Other);
        let kind: InsnKind = serde_json::from_str(r#""int3""#).unwrap();
        assert!(kind.is_trap_like());
    }
}
