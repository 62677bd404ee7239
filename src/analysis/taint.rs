//! The taint instance of the fixed-point engine.
//!
//! Taint flows pointwise from the variables an instruction reads to the
//! variables it writes. Function parameters and globals are their own
//! sources at entry; calls are modelled by applying the callee's summary
//! instead of descending into it.

use crate::analysis::fixed_point::{self, Flow, IntraResults, Transfer};
use crate::analysis::lattice::{Taint, TaintState};
use crate::analysis::summary::Summaries;
use crate::ir::{
    Block, Cfg, ControlInstr, ControlOp, DataInstr, Function, Module, Var,
};
use crate::Error;

/// Compute the taint annotations for one function under the given summary
/// table.
pub fn function_taints(
    module: &Module,
    function: &Function,
    summaries: &Summaries,
) -> Result<IntraResults<TaintState>, Error> {
    let analysis = TaintAnalysis::new(summaries);
    fixed_point::analyze(module, function.cfg(), &analysis)
}

/// The taint transfer. Borrows the summary table for the duration of one
/// intra-procedural run; the table is never mutated during a run.
pub struct TaintAnalysis<'a> {
    summaries: &'a Summaries,
}

impl<'a> TaintAnalysis<'a> {
    pub fn new(summaries: &'a Summaries) -> TaintAnalysis<'a> {
        TaintAnalysis { summaries }
    }

    // Models a call by applying the callee's summary and joining the result
    // into the state at the call's post-point.
    fn apply_call(
        &self,
        state: TaintState,
        target: u32,
        instr: &ControlInstr,
    ) -> Result<TaintState, Error> {
        let summary = self.summaries.get(target)?;
        let ret = instr.defs().first().copied();

        if summary.ret().is_some() != ret.is_some() {
            return Err(Error::ReturnMismatch(target));
        }

        let applied = summary.apply(&state, instr.uses(), instr.globals_post(), ret)?;
        Ok(state.join(&applied))
    }
}

impl Transfer for TaintAnalysis<'_> {
    type State = TaintState;

    fn bottom_state(&self, _cfg: &Cfg) -> TaintState {
        TaintState::new()
    }

    fn init_state(&self, module: &Module, cfg: &Cfg) -> TaintState {
        let mut state = TaintState::new();

        let nparams = match module.function(cfg.function_index()) {
            Ok(function) => function.ftype().params().len(),
            Err(_) => 0,
        };
        for i in 0..nparams {
            state.replace(Var::Local(i), Taint::source(Var::Local(i)));
        }
        // Locals beyond the parameters are zero-initialized and untainted.
        for g in 0..module.nglobals() {
            state.replace(Var::Sym(g), Taint::source(Var::Sym(g)));
        }

        state
    }

    fn join_state(&self, state0: TaintState, state1: &TaintState) -> TaintState {
        state0.join(state1)
    }

    fn widen_state(&self, state0: TaintState, state1: &TaintState) -> TaintState {
        state0.widen(state1)
    }

    fn equal_state(&self, state0: &TaintState, state1: &TaintState) -> bool {
        state0 == state1
    }

    fn data_instr_transfer(
        &self,
        _module: &Module,
        cfg: &Cfg,
        instr: &DataInstr,
        mut state: TaintState,
    ) -> Result<TaintState, Error> {
        if let Some(memarg) = instr.op().mem_arg() {
            if memarg.sz.is_some() {
                return Err(Error::SubWordMemoryAccess(
                    cfg.function_index(),
                    instr.label(),
                ));
            }
        }

        let mut taint = Taint::bottom();
        for used in instr.uses() {
            taint = taint.join(&state.get(*used));
        }
        for defined in instr.defs() {
            state.replace(*defined, taint.clone());
        }

        Ok(state)
    }

    fn control_instr_transfer(
        &self,
        module: &Module,
        cfg: &Cfg,
        instr: &ControlInstr,
        state: TaintState,
    ) -> Result<Flow<TaintState>, Error> {
        match instr.op() {
            ControlOp::Call(target) => {
                let state = self.apply_call(state, *target, instr).map_err(|e| {
                    call_context(cfg.function_index(), *target, e)
                })?;
                Ok(Flow::Simple(state))
            }
            ControlOp::CallIndirect(type_index) => {
                // Join the effect of every resolvable target.
                let mut out = state.clone();
                for target in module.resolve_indirect_targets(*type_index)? {
                    let applied = self
                        .apply_call(state.clone(), target, instr)
                        .map_err(|e| call_context(cfg.function_index(), target, e))?;
                    out = out.join(&applied);
                }
                Ok(Flow::Simple(out))
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
        states: Vec<(usize, TaintState)>,
    ) -> Result<TaintState, Error> {
        let mut merged = TaintState::new();
        for (_, state) in states {
            merged = merged.join(&state);
        }
        Ok(merged)
    }
}

fn call_context(caller: u32, callee: u32, error: Error) -> Error {
    match error {
        Error::ReturnMismatch(_) => Error::ReturnMismatch(callee),
        error => Error::Analysis(format!(
            "in function {}, call to function {}: {}",
            caller, callee, error
        )),
    }
}
