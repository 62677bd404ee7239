//! The analyzer's view of a decoded WebAssembly module.
//!
//! Everything in this module is an *input* to the analyses: the decoder and
//! the control-flow-graph builder live outside this crate and hand over a
//! [`Module`] whose defined functions carry a [`Cfg`] already annotated with
//! the symbolic variables of each instruction.

mod cfg;
mod instruction;
mod module;
mod types;
mod var;

pub use self::cfg::{Block, BlockKind, Cfg, Edge};
pub use self::instruction::{
    ControlInstr, ControlOp, DataInstr, DataOp, Label, MemArg, Pack,
};
pub use self::module::{Function, Global, ImportedFunction, Module, Table};
pub use self::types::{FunctionType, ValType};
pub use self::var::Var;
