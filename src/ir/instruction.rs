//! Instructions as seen by the analyses.
//!
//! An instruction is an operation plus the variable annotation produced by
//! the external pre-pass: which abstract variables it reads (`uses`) and
//! which it writes (`defs`). Control instructions additionally carry the
//! fresh global variables in scope after a call (`globals_post`). Every
//! instruction has a module-wide unique `label`.

use crate::ir::{ValType, Var};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A module-wide unique instruction label.
pub type Label = usize;

/// A sub-word width on a memory access.
///
/// The analyses do not model sub-word packing; an access carrying one is
/// rejected as unsupported.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Pack {
    Pack8,
    Pack16,
    Pack32,
}

/// The static argument of a load or store.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct MemArg {
    pub offset: u32,
    pub sz: Option<Pack>,
}

impl MemArg {
    pub fn new(offset: u32) -> MemArg {
        MemArg { offset, sz: None }
    }

    pub fn packed(offset: u32, sz: Pack) -> MemArg {
        MemArg {
            offset,
            sz: Some(sz),
        }
    }
}

/// An operation appearing in a data block.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum DataOp {
    Nop,
    Drop,
    Select,
    Const(ValType),
    Unary(ValType),
    Binary(ValType),
    Compare(ValType),
    Test(ValType),
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),
    Load(ValType, MemArg),
    Store(ValType, MemArg),
    MemorySize,
    MemoryGrow,
}

impl DataOp {
    /// The memory argument of a load or store, if this is one.
    pub fn mem_arg(&self) -> Option<&MemArg> {
        match self {
            DataOp::Load(_, memarg) | DataOp::Store(_, memarg) => Some(memarg),
            _ => None,
        }
    }
}

impl fmt::Display for DataOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataOp::Nop => write!(f, "nop"),
            DataOp::Drop => write!(f, "drop"),
            DataOp::Select => write!(f, "select"),
            DataOp::Const(t) => write!(f, "{}.const", t),
            DataOp::Unary(t) => write!(f, "{}.unary", t),
            DataOp::Binary(t) => write!(f, "{}.binary", t),
            DataOp::Compare(t) => write!(f, "{}.compare", t),
            DataOp::Test(t) => write!(f, "{}.test", t),
            DataOp::LocalGet(i) => write!(f, "local.get {}", i),
            DataOp::LocalSet(i) => write!(f, "local.set {}", i),
            DataOp::LocalTee(i) => write!(f, "local.tee {}", i),
            DataOp::GlobalGet(i) => write!(f, "global.get {}", i),
            DataOp::GlobalSet(i) => write!(f, "global.set {}", i),
            DataOp::Load(t, memarg) => write!(f, "{}.load offset={}", t, memarg.offset),
            DataOp::Store(t, memarg) => write!(f, "{}.store offset={}", t, memarg.offset),
            DataOp::MemorySize => write!(f, "memory.size"),
            DataOp::MemoryGrow => write!(f, "memory.grow"),
        }
    }
}

/// An operation ending a block or transferring control.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ControlOp {
    /// Direct call of the function with the given index.
    Call(u32),
    /// Indirect call through the table, of the given type index.
    CallIndirect(u32),
    /// Conditional split; the out-edges carry the true/false labels.
    If,
    Br(u32),
    BrIf(u32),
    BrTable(Vec<u32>, u32),
    Return,
    Unreachable,
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlOp::Call(i) => write!(f, "call {}", i),
            ControlOp::CallIndirect(t) => write!(f, "call_indirect {}", t),
            ControlOp::If => write!(f, "if"),
            ControlOp::Br(l) => write!(f, "br {}", l),
            ControlOp::BrIf(l) => write!(f, "br_if {}", l),
            ControlOp::BrTable(ls, d) => {
                let labels: Vec<String> = ls.iter().map(|l| l.to_string()).collect();
                write!(f, "br_table {} {}", labels.join(" "), d)
            }
            ControlOp::Return => write!(f, "return"),
            ControlOp::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// A data instruction together with its pre-pass variable annotation.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct DataInstr {
    label: Label,
    op: DataOp,
    uses: Vec<Var>,
    defs: Vec<Var>,
}

impl DataInstr {
    pub fn new(label: Label, op: DataOp, uses: Vec<Var>, defs: Vec<Var>) -> DataInstr {
        DataInstr {
            label,
            op,
            uses,
            defs,
        }
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn op(&self) -> &DataOp {
        &self.op
    }

    /// The abstract variables this instruction reads.
    pub fn uses(&self) -> &[Var] {
        &self.uses
    }

    /// The abstract variables this instruction writes.
    pub fn defs(&self) -> &[Var] {
        &self.defs
    }
}

impl fmt::Display for DataInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02} {}", self.label, self.op)
    }
}

/// A control instruction together with its pre-pass variable annotation.
///
/// For calls, `globals_post` holds the fresh variables naming the module's
/// globals after the call returns; it is empty for every other operation.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ControlInstr {
    label: Label,
    op: ControlOp,
    uses: Vec<Var>,
    defs: Vec<Var>,
    globals_post: Vec<Var>,
}

impl ControlInstr {
    pub fn new(label: Label, op: ControlOp, uses: Vec<Var>, defs: Vec<Var>) -> ControlInstr {
        ControlInstr {
            label,
            op,
            uses,
            defs,
            globals_post: Vec::new(),
        }
    }

    pub fn with_globals_post(mut self, globals_post: Vec<Var>) -> ControlInstr {
        self.globals_post = globals_post;
        self
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn op(&self) -> &ControlOp {
        &self.op
    }

    pub fn uses(&self) -> &[Var] {
        &self.uses
    }

    pub fn defs(&self) -> &[Var] {
        &self.defs
    }

    /// The post-call global variables; empty unless this is a call.
    pub fn globals_post(&self) -> &[Var] {
        &self.globals_post
    }
}

impl fmt::Display for ControlInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02} {}", self.label, self.op)
    }
}
