//! Implementations and traits for static analysis over the module view.

pub mod call_graph;
pub mod fixed_point;
pub mod lattice;
mod interprocedural;
mod summary;
mod taint;
mod value;


pub use self::call_graph::CallGraph;
pub use self::fixed_point::{analyze, analyze_keep, BlockResult, Flow, IntraResults, Transfer};
pub use self::interprocedural::{taint_analysis, taint_analysis_options, InterResults};
pub use self::lattice::{Taint, TaintState};
pub use self::summary::{Summaries, Summary, SummarySeed};
pub use self::taint::{function_taints, TaintAnalysis};
pub use self::value::{
    function_values, MemoryLog, Origin, SymbolicValue, ValueAnalysis, ValueState,
};
