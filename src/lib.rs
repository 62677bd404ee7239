//! Saker: a summary-based static analyzer for WebAssembly modules.
//!
//! Saker implements an inter-procedural, summary-based abstract
//! interpretation over the call graph of a decoded WebAssembly module. A
//! quick synopsis of Saker's modules:
//!
//! * **analysis** - The fixed-point engine, the taint and symbolic value
//!   domains, function summaries, the call graph and the inter-procedural
//!   driver.
//! * **graph** - A simple directed graph library.
//! * **ir** - The analyzer's view of a decoded module: types, abstract
//!   variables, instructions and per-function control flow graphs.
//!
//! The decoder and the control-flow-graph builder are external: Saker
//! consumes a [`ir::Module`] whose functions already carry a [`ir::Cfg`]
//! annotated with the symbolic variables of each instruction, and produces
//! per-function summaries together with per-block and per-instruction state
//! annotations.
//!
//! ```
//! use saker::analysis;
//! use saker::ir::Module;
//!
//! # fn example(module: &Module) -> Result<(), saker::Error> {
//! let results = analysis::taint_analysis(module)?;
//! for (index, summary) in results.summaries.iter() {
//!     println!("function {}: {}", index, summary);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod graph;
pub mod ir;

/// Saker error types.
pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum Error {
        /// An error in the analysis.
        #[error("Analysis error: {0}")]
        Analysis(String),
        /// An edge was not found in a graph.
        #[error("The edge with head {0} and tail {1} does not exist in the graph")]
        GraphEdgeNotFound(usize, usize),
        /// A vertex was not found in a graph.
        #[error("The vertex id {0} does not exist in the graph")]
        GraphVertexNotFound(usize),
        /// The fixed-point engine needs an entry block to seed the worklist.
        #[error("Fixed point analysis requires an entry block")]
        FixedPointRequiresEntry,
        /// The fixed-point engine ran longer than its step budget.
        #[error("Fixed point analysis exceeded the maximum number of steps")]
        FixedPointMaxSteps,
        /// A predecessor produced a branching state over an unlabeled edge.
        #[error("Malformed control flow graph in function {0}: block {1} reaches a branching predecessor over an unlabeled edge")]
        MalformedControlFlowGraph(u32, usize),
        /// Branching and non-branching states met at a join point.
        #[error("Cannot combine branching and non-branching states in function {0} at block {1}")]
        ShapeMismatch(u32, usize),
        /// Multi-value returns are outside the supported module shape.
        #[error("Function {0} returns more than one value")]
        MultiValueReturn(u32),
        /// Caller and callee disagree on whether a value is returned.
        #[error("Call to function {0}: caller and callee disagree on the returned value")]
        ReturnMismatch(u32),
        /// Sub-word memory accesses are not modelled.
        #[error("Unsupported sub-word memory access in function {0} at instruction {1}")]
        SubWordMemoryAccess(u32, usize),
        /// A function index that is neither an import nor a defined function.
        #[error("Function index {0} does not exist in the module")]
        FunctionNotFound(u32),
        /// A type index past the end of the type section.
        #[error("Type index {0} does not exist in the module")]
        TypeNotFound(u32),
        #[error("Saker internal error: {0}")]
        Internal(String),
    }

    impl From<&str> for Error {
        fn from(s: &str) -> Error {
            Error::Internal(s.to_string())
        }
    }

    impl From<String> for Error {
        fn from(s: String) -> Error {
            Error::Internal(s)
        }
    }
}

pub use error::Error;
