//! Per-function summaries: the abstract input/output relation used in place
//! of re-analysis at every call site.

use crate::analysis::lattice::TaintState;
use crate::ir::{Function, FunctionType, Module, Var};
use crate::Error;
use log::warn;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Imports known to neither taint a global nor their return value.
const PURE_IMPORTS: &[&str] = &["fd_write", "fd_close", "proc_exit"];

/// How summaries of defined functions are seeded before the driver runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SummarySeed {
    /// Start from bottom and iterate upward; the most precise choice.
    Bottom,
    /// Start from top; a quick conservative over-approximation.
    Top,
}

/// A function's outward-facing abstract relation.
///
/// `state` is restricted to `globals_post` and `ret`: the only variables a
/// caller can observe. `args` names the formal parameters the relation's
/// sources refer to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Summary {
    args: Vec<Var>,
    globals_post: Vec<Var>,
    ret: Option<Var>,
    state: TaintState,
}

impl Summary {
    /// The bottom seed for a defined function.
    ///
    /// The return value, when present, is named `Sym(nglobals)`, right
    /// after the global prefix. Imports use `Sym(nglobals + 1)` instead;
    /// see [`Summary::of_import`].
    pub fn bottom(module: &Module, function: &Function) -> Result<Summary, Error> {
        Summary::seeded(module, function.index(), function.ftype(), false)
    }

    /// The top seed for a defined function: every observable variable
    /// carries the universal source set.
    pub fn top(module: &Module, function: &Function) -> Result<Summary, Error> {
        Summary::seeded(module, function.index(), function.ftype(), true)
    }

    fn seeded(
        module: &Module,
        index: u32,
        ftype: &FunctionType,
        top: bool,
    ) -> Result<Summary, Error> {
        let nglobals = module.nglobals();
        let args = (0..ftype.params().len()).map(Var::Local).collect();
        let globals_post: Vec<Var> = (0..nglobals).map(Var::Sym).collect();
        let ret = match ftype.results().len() {
            0 => None,
            1 => Some(Var::Sym(nglobals)),
            _ => return Err(Error::MultiValueReturn(index)),
        };

        let state = if top {
            TaintState::top(globals_post.iter().cloned().chain(ret))
        } else {
            TaintState::new()
        };

        Ok(Summary {
            args,
            globals_post,
            ret,
            state,
        })
    }

    /// The summary of an imported function.
    ///
    /// Imports on the pure allow-list get a bottom relation. Every other
    /// import is unmodeled: its globals and return are assumed top, and a
    /// warning identifies it. The return variable at an import boundary is
    /// `Sym(nglobals + 1)`.
    pub fn of_import(
        index: u32,
        name: &str,
        nglobals: usize,
        ftype: &FunctionType,
    ) -> Result<Summary, Error> {
        let args = (0..ftype.params().len()).map(Var::Local).collect();
        let globals_post: Vec<Var> = (0..nglobals).map(Var::Sym).collect();
        let ret = match ftype.results().len() {
            0 => None,
            1 => Some(Var::Sym(nglobals + 1)),
            _ => return Err(Error::MultiValueReturn(index)),
        };

        let state = if PURE_IMPORTS.contains(&name) {
            TaintState::new()
        } else {
            warn!("Imported function is not modelled: {}", name);
            TaintState::top(globals_post.iter().cloned().chain(ret))
        };

        Ok(Summary {
            args,
            globals_post,
            ret,
            state,
        })
    }

    /// Builds a function's summary from the final state of an intra
    /// fixpoint, restricting it to the caller-observable variables.
    pub fn from_results(
        module: &Module,
        function: &Function,
        final_state: TaintState,
    ) -> Result<Summary, Error> {
        let cfg = function.cfg();
        let ret = cfg.result_var();

        match function.ftype().results().len() {
            0 if ret.is_some() => {
                return Err(Error::Analysis(format!(
                    "function {} has a result variable but returns nothing",
                    function.index()
                )))
            }
            1 if ret.is_none() => {
                return Err(Error::Analysis(format!(
                    "function {} returns a value but has no result variable",
                    function.index()
                )))
            }
            0 | 1 => {}
            _ => return Err(Error::MultiValueReturn(function.index())),
        }

        let globals_post = cfg.exit_globals().to_vec();
        if globals_post.len() != module.nglobals() {
            return Err(Error::Analysis(format!(
                "function {} tracks {} globals at exit, module has {}",
                function.index(),
                globals_post.len(),
                module.nglobals()
            )));
        }

        let keys: BTreeSet<Var> = globals_post.iter().cloned().chain(ret).collect();
        let mut state = final_state;
        state.restrict(&keys);

        Ok(Summary {
            args: (0..function.ftype().params().len()).map(Var::Local).collect(),
            globals_post,
            ret,
            state,
        })
    }

    pub fn args(&self) -> &[Var] {
        &self.args
    }

    pub fn globals_post(&self) -> &[Var] {
        &self.globals_post
    }

    pub fn ret(&self) -> Option<Var> {
        self.ret
    }

    pub fn state(&self) -> &TaintState {
        &self.state
    }

    /// Applies this summary at a call site.
    ///
    /// `args` are the caller's actual argument variables, `globals` the
    /// caller's post-call global variables and `ret` the caller's receiving
    /// variable. Three stages, in order: rename the return key, rename each
    /// global key, then substitute each formal argument key with the
    /// caller-side taint of the corresponding actual. The caller joins the
    /// result into its state at the call's post-point.
    pub fn apply(
        &self,
        caller_state: &TaintState,
        args: &[Var],
        globals: &[Var],
        ret: Option<Var>,
    ) -> Result<TaintState, Error> {
        let mut state = self.state.clone();

        match (self.ret, ret) {
            (None, None) => {}
            (Some(callee_ret), Some(caller_ret)) => state.rename_key(callee_ret, caller_ret),
            _ => {
                return Err(Error::Analysis(
                    "caller and callee disagree on the returned value".to_string(),
                ))
            }
        }

        if globals.len() != self.globals_post.len() {
            return Err(Error::Analysis(format!(
                "call site tracks {} globals, summary has {}",
                globals.len(),
                self.globals_post.len()
            )));
        }
        for (callee_global, caller_global) in self.globals_post.iter().zip(globals) {
            state.rename_key(*callee_global, *caller_global);
        }

        if args.len() != self.args.len() {
            return Err(Error::Analysis(format!(
                "call site passes {} arguments, summary expects {}",
                args.len(),
                self.args.len()
            )));
        }
        for (formal, actual) in self.args.iter().zip(args) {
            state.replace(*formal, caller_state.get(*actual));
        }

        Ok(state)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ret {
            Some(ret) => write!(f, "ret {} {}", ret, self.state),
            None => write!(f, "ret _ {}", self.state),
        }
    }
}

/// The total summary table: every function in the index space, imported or
/// defined, has an entry at all times.
#[derive(Clone, Debug, Default)]
pub struct Summaries {
    summaries: FxHashMap<u32, Summary>,
}

impl Summaries {
    /// Seeds the table for a module: imports via [`Summary::of_import`],
    /// defined functions per the seed flag.
    pub fn new(module: &Module, seed: SummarySeed) -> Result<Summaries, Error> {
        let mut summaries = FxHashMap::default();

        for import in module.imports() {
            summaries.insert(
                import.index(),
                Summary::of_import(
                    import.index(),
                    import.name(),
                    module.nglobals(),
                    import.ftype(),
                )?,
            );
        }

        for function in module.functions() {
            let summary = match seed {
                SummarySeed::Bottom => Summary::bottom(module, function)?,
                SummarySeed::Top => Summary::top(module, function)?,
            };
            summaries.insert(function.index(), summary);
        }

        Ok(Summaries { summaries })
    }

    pub fn get(&self, fidx: u32) -> Result<&Summary, Error> {
        self.summaries.get(&fidx).ok_or(Error::FunctionNotFound(fidx))
    }

    /// Rewrites a function's summary.
    pub fn insert(&mut self, fidx: u32, summary: Summary) {
        self.summaries.insert(fidx, summary);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Summary)> {
        self.summaries.iter()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lattice::Taint;
    use crate::ir::{Cfg, ValType};

    fn module_with_one_global() -> Module {
        let mut module = Module::new();
        module.add_global(crate::ir::Global::new(ValType::I32, true));
        module
    }

    fn function(index: u32, params: usize, results: usize) -> Function {
        let ftype = FunctionType::new(
            vec![ValType::I32; params],
            vec![ValType::I32; results],
        );
        Function::new(index, ftype, vec![], Cfg::new(index))
    }

    #[test]
    fn test_seeded_return_variable_asymmetry() {
        // Defined functions place the seeded return right after the global
        // prefix; imports skip one more slot. Callers rely on this.
        let module = module_with_one_global();
        let f = function(0, 0, 1);

        let defined = Summary::bottom(&module, &f).unwrap();
        assert_eq!(defined.ret(), Some(Var::Sym(1)));

        let imported = Summary::of_import(
            0,
            "mystery",
            module.nglobals(),
            &FunctionType::new(vec![], vec![ValType::I32]),
        )
        .unwrap();
        assert_eq!(imported.ret(), Some(Var::Sym(2)));
    }

    #[test]
    fn test_multi_value_returns_are_rejected() {
        let module = Module::new();
        let f = function(0, 0, 2);

        assert!(matches!(
            Summary::bottom(&module, &f),
            Err(Error::MultiValueReturn(0))
        ));
        assert!(matches!(
            Summary::of_import(0, "x", 0, &FunctionType::new(vec![], vec![ValType::I32; 2])),
            Err(Error::MultiValueReturn(0))
        ));
    }

    #[test]
    fn test_pure_import_is_bottom() {
        let summary = Summary::of_import(
            0,
            "fd_write",
            1,
            &FunctionType::new(vec![ValType::I32], vec![ValType::I32]),
        )
        .unwrap();

        assert!(summary.state().is_bottom());
    }

    #[test]
    fn test_unmodeled_import_is_top_over_globals_and_return() {
        let summary = Summary::of_import(
            0,
            "mystery",
            1,
            &FunctionType::new(vec![], vec![ValType::I32]),
        )
        .unwrap();

        assert_eq!(summary.state().get(Var::Sym(0)), Taint::Top);
        assert_eq!(summary.state().get(Var::Sym(2)), Taint::Top);
    }

    #[test]
    fn test_apply_identity_on_bottom() {
        let module = Module::new();
        let f = function(0, 1, 1);
        let summary = Summary::bottom(&module, &f).unwrap();

        let caller = TaintState::new();
        let applied = summary
            .apply(&caller, &[Var::Sym(3)], &[], Some(Var::Sym(4)))
            .unwrap();

        assert!(applied.is_bottom());
    }

    #[test]
    fn test_apply_renames_return_and_substitutes_arguments() {
        let module = Module::new();
        let f = function(0, 1, 1);
        let mut summary = Summary::bottom(&module, &f).unwrap();
        summary.state.replace(Var::Sym(0), Taint::source(Var::Local(0)));

        let mut caller = TaintState::new();
        caller.replace(Var::Sym(3), Taint::source(Var::Local(2)));

        let applied = summary
            .apply(&caller, &[Var::Sym(3)], &[], Some(Var::Sym(4)))
            .unwrap();

        // the return key moved, and the formal now carries the actual's taint
        assert_eq!(applied.get(Var::Sym(4)), Taint::source(Var::Local(0)));
        assert_eq!(applied.get(Var::Local(0)), Taint::source(Var::Local(2)));
    }

    #[test]
    fn test_apply_rejects_return_mismatch() {
        let module = Module::new();
        let f = function(0, 0, 1);
        let summary = Summary::bottom(&module, &f).unwrap();

        assert!(summary.apply(&TaintState::new(), &[], &[], None).is_err());
    }

    #[test]
    fn test_summaries_are_total_over_the_index_space() {
        let mut module = module_with_one_global();
        module
            .add_import(crate::ir::ImportedFunction::new(
                0,
                "env",
                "mystery",
                FunctionType::new(vec![], vec![]),
            ))
            .unwrap();
        module.add_function(function(1, 0, 0)).unwrap();

        let summaries = Summaries::new(&module, SummarySeed::Bottom).unwrap();

        assert_eq!(summaries.len(), 2);
        assert!(summaries.get(0).is_ok());
        assert!(summaries.get(1).is_ok());
        assert!(summaries.get(2).is_err());
    }
}
