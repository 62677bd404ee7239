//! The inter-procedural driver: walks the SCC schedule and iterates each
//! component until its summaries stabilize.

use crate::analysis::call_graph::CallGraph;
use crate::analysis::fixed_point::IntraResults;
use crate::analysis::lattice::TaintState;
use crate::analysis::summary::{Summaries, Summary, SummarySeed};
use crate::analysis::taint;
use crate::ir::Module;
use crate::Error;
use log::debug;
use rustc_hash::FxHashMap;

/// The stable summary table plus the last intra-procedural annotations of
/// every defined function.
#[derive(Debug)]
pub struct InterResults {
    pub summaries: Summaries,
    pub results: FxHashMap<u32, IntraResults<TaintState>>,
}

/// Runs the whole-module taint analysis, seeding defined functions at
/// bottom.
pub fn taint_analysis(module: &Module) -> Result<InterResults, Error> {
    taint_analysis_options(module, SummarySeed::Bottom)
}

/// Runs the whole-module taint analysis with an explicit summary seed.
///
/// Callees are analyzed before their callers: the schedule is the reversed
/// topological SCC order of the import-free call graph. Within a component,
/// functions are re-analyzed until a full pass changes no summary; a
/// non-recursive singleton converges in one pass.
pub fn taint_analysis_options(
    module: &Module,
    seed: SummarySeed,
) -> Result<InterResults, Error> {
    let mut summaries = Summaries::new(module, seed)?;
    let call_graph = CallGraph::build(module)?;
    let schedule = call_graph.analysis_schedule()?;

    let mut results = FxHashMap::default();

    for component in schedule {
        debug!("analyzing component {:?}", component);
        let mut changed = true;
        while changed {
            changed = false;
            for &fidx in &component {
                let function = module.function(fidx)?;
                let analysis = taint::TaintAnalysis::new(&summaries);
                let intra =
                    crate::analysis::fixed_point::analyze(module, function.cfg(), &analysis)?;
                let final_state = intra.final_state(&analysis, function.cfg())?;
                let summary = Summary::from_results(module, function, final_state)?;

                if summaries.get(fidx)? != &summary {
                    debug!("function {} summary changed: {}", fidx, summary);
                    summaries.insert(fidx, summary);
                    changed = true;
                }
                results.insert(fidx, intra);
            }
        }
    }

    Ok(InterResults { summaries, results })
}
