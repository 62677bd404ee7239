//! The symbolic value instance of the fixed-point engine.
//!
//! A value is a primitive type tagged with where it came from, between the
//! lattice markers bottom and top. Memory is an append-only log of
//! (address, value) cells: stores prepend, loads join every cell whose
//! address compares equal, and joining two memories concatenates their
//! logs. Overlapping addresses are not resolved; the imprecision is
//! deliberate.

use crate::analysis::fixed_point::{self, Flow, IntraResults, Transfer};
use crate::ir::{
    Block, Cfg, ControlInstr, ControlOp, DataInstr, DataOp, Function, Module, ValType, Var,
};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Compute the symbolic value annotations for one function.
///
/// The value analysis is intra-procedural: calls havoc their results and
/// the post-call globals.
pub fn function_values(
    module: &Module,
    function: &Function,
) -> Result<IntraResults<ValueState>, Error> {
    let analysis = ValueAnalysis;
    fixed_point::analyze(module, function.cfg(), &analysis)
}

/// Where a symbolic value originated.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Origin {
    /// The function's i-th parameter.
    Parameter(usize),
    /// The module's g-th global.
    Global(usize),
    /// Loaded from the heap at the given static address.
    Heap(u32),
    /// A compile-time constant.
    Constant,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Origin::Parameter(i) => write!(f, "param{}", i),
            Origin::Global(g) => write!(f, "global{}", g),
            Origin::Heap(a) => write!(f, "heap@0x{:x}", a),
            Origin::Constant => write!(f, "const"),
        }
    }
}

/// An abstract value: a typed origin between bottom and top.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum SymbolicValue {
    Bottom,
    Value(ValType, Origin),
    Top,
}

impl SymbolicValue {
    /// Joins two abstract values. Distinct non-bottom values join to top.
    pub fn join(self, other: &SymbolicValue) -> SymbolicValue {
        match (self, other) {
            (SymbolicValue::Bottom, other) => *other,
            (this, SymbolicValue::Bottom) => this,
            (this, other) if this == *other => this,
            _ => SymbolicValue::Top,
        }
    }
}

impl fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolicValue::Bottom => write!(f, "bottom"),
            SymbolicValue::Value(ty, origin) => write!(f, "{}:{}", ty, origin),
            SymbolicValue::Top => write!(f, "top"),
        }
    }
}

/// The append-only memory log.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemoryLog {
    cells: Vec<(SymbolicValue, SymbolicValue)>,
}

impl MemoryLog {
    pub fn new() -> MemoryLog {
        MemoryLog { cells: Vec::new() }
    }

    /// Prepends a cell; previous cells for the same address stay in the
    /// log.
    pub fn store(&mut self, addr: SymbolicValue, value: SymbolicValue) {
        self.cells.insert(0, (addr, value));
    }

    /// The join of every stored value whose address compares equal to the
    /// query, or top when no cell matches.
    pub fn load(&self, addr: &SymbolicValue) -> SymbolicValue {
        let mut result = SymbolicValue::Bottom;
        let mut matched = false;
        for (cell_addr, cell_value) in &self.cells {
            if cell_addr == addr {
                matched = true;
                result = result.join(cell_value);
            }
        }
        if matched {
            result
        } else {
            SymbolicValue::Top
        }
    }

    /// Concatenates another log onto this one.
    ///
    /// Cells already present are not duplicated; duplicates would not
    /// change any load result, and skipping them keeps the log's height
    /// finite so the fixpoint terminates.
    pub fn join(mut self, other: &MemoryLog) -> MemoryLog {
        for cell in &other.cells {
            if !self.cells.contains(cell) {
                self.cells.push(*cell);
            }
        }
        self
    }

    pub fn cells(&self) -> &[(SymbolicValue, SymbolicValue)] {
        &self.cells
    }
}

/// The value analysis state: per-variable values plus the memory log.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValueState {
    values: BTreeMap<Var, SymbolicValue>,
    memory: MemoryLog,
}

impl ValueState {
    pub fn new() -> ValueState {
        ValueState::default()
    }

    /// The value of a variable; bottom if unknown.
    pub fn get(&self, var: Var) -> SymbolicValue {
        self.values
            .get(&var)
            .copied()
            .unwrap_or(SymbolicValue::Bottom)
    }

    pub fn set(&mut self, var: Var, value: SymbolicValue) {
        if value == SymbolicValue::Bottom {
            self.values.remove(&var);
        } else {
            self.values.insert(var, value);
        }
    }

    pub fn memory(&self) -> &MemoryLog {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryLog {
        &mut self.memory
    }

    pub fn join(mut self, other: &ValueState) -> ValueState {
        for (var, value) in &other.values {
            let joined = self.get(*var).join(value);
            self.set(*var, joined);
        }
        self.memory = self.memory.join(&other.memory);
        self
    }
}

/// The symbolic value transfer.
pub struct ValueAnalysis;

impl Transfer for ValueAnalysis {
    type State = ValueState;

    fn bottom_state(&self, _cfg: &Cfg) -> ValueState {
        ValueState::new()
    }

    fn init_state(&self, module: &Module, cfg: &Cfg) -> ValueState {
        let mut state = ValueState::new();

        if let Ok(function) = module.function(cfg.function_index()) {
            for (i, ty) in function.ftype().params().iter().enumerate() {
                state.set(
                    Var::Local(i),
                    SymbolicValue::Value(*ty, Origin::Parameter(i)),
                );
            }
            // Locals beyond the parameters are zero-initialized.
            let nparams = function.ftype().params().len();
            for (i, ty) in function.locals().iter().enumerate() {
                state.set(
                    Var::Local(nparams + i),
                    SymbolicValue::Value(*ty, Origin::Constant),
                );
            }
        }
        for (g, global) in module.globals().iter().enumerate() {
            state.set(
                Var::Sym(g),
                SymbolicValue::Value(global.ty(), Origin::Global(g)),
            );
        }

        state
    }

    fn join_state(&self, state0: ValueState, state1: &ValueState) -> ValueState {
        state0.join(state1)
    }

    fn widen_state(&self, state0: ValueState, state1: &ValueState) -> ValueState {
        // The value lattice is three levels deep and the deduplicated log
        // is finite, so the join already converges.
        state0.join(state1)
    }

    fn equal_state(&self, state0: &ValueState, state1: &ValueState) -> bool {
        state0 == state1
    }

    fn data_instr_transfer(
        &self,
        _module: &Module,
        cfg: &Cfg,
        instr: &DataInstr,
        mut state: ValueState,
    ) -> Result<ValueState, Error> {
        if let Some(memarg) = instr.op().mem_arg() {
            if memarg.sz.is_some() {
                return Err(Error::SubWordMemoryAccess(
                    cfg.function_index(),
                    instr.label(),
                ));
            }
        }

        match instr.op() {
            DataOp::Const(ty) => {
                for defined in instr.defs() {
                    state.set(*defined, SymbolicValue::Value(*ty, Origin::Constant));
                }
            }
            DataOp::Load(..) => {
                let addr = state.get(*instr.uses().first().ok_or_else(|| {
                    Error::Analysis(format!("load {} has no address operand", instr.label()))
                })?);
                let value = state.memory().load(&addr);
                for defined in instr.defs() {
                    state.set(*defined, value);
                }
            }
            DataOp::Store(..) => {
                // uses are [address, value]
                if instr.uses().len() != 2 {
                    return Err(Error::Analysis(format!(
                        "store {} expects an address and a value operand",
                        instr.label()
                    )));
                }
                let addr = state.get(instr.uses()[0]);
                let value = state.get(instr.uses()[1]);
                state.memory_mut().store(addr, value);
            }
            DataOp::MemorySize | DataOp::MemoryGrow => {
                for defined in instr.defs() {
                    state.set(*defined, SymbolicValue::Top);
                }
            }
            _ => {
                let mut value = SymbolicValue::Bottom;
                for used in instr.uses() {
                    value = value.join(&state.get(*used));
                }
                for defined in instr.defs() {
                    state.set(*defined, value);
                }
            }
        }

        Ok(state)
    }

    fn control_instr_transfer(
        &self,
        _module: &Module,
        _cfg: &Cfg,
        instr: &ControlInstr,
        mut state: ValueState,
    ) -> Result<Flow<ValueState>, Error> {
        match instr.op() {
            ControlOp::Call(_) | ControlOp::CallIndirect(_) => {
                // No value summaries: a call may produce anything and
                // rewrite every global.
                for defined in instr.defs() {
                    state.set(*defined, SymbolicValue::Top);
                }
                for global in instr.globals_post() {
                    state.set(*global, SymbolicValue::Top);
                }
                Ok(Flow::Simple(state))
            }
            ControlOp::If | ControlOp::BrIf(_) => Ok(Flow::Branch(state.clone(), state)),
            ControlOp::Br(_)
            | ControlOp::BrTable(..)
            | ControlOp::Return
            | ControlOp::Unreachable => Ok(Flow::Simple(state)),
        }
    }

    fn merge_flows(
        &self,
        _module: &Module,
        _cfg: &Cfg,
        _block: &Block,
        states: Vec<(usize, ValueState)>,
    ) -> Result<ValueState, Error> {
        let mut merged = ValueState::new();
        for (_, state) in states {
            merged = merged.join(&state);
        }
        Ok(merged)
    }
}
