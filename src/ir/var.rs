use serde::{Deserialize, Serialize};
use std::fmt;

/// An abstract variable assigned by the stack-based pre-pass.
///
/// `Local(i)` names the function's i-th parameter or local slot. `Sym(i)` is
/// a freshly numbered symbolic value standing for an instruction operand or
/// result.
///
/// # Numbering convention
///
/// Global variables occupy a fixed prefix of the symbolic namespace: in
/// every frame, `Sym(g)` for `g < nglobals` names the module's g-th global.
/// Seeded summaries place the return value right after that prefix, at
/// `Sym(nglobals)` for defined functions and at `Sym(nglobals + 1)` for
/// imports. The off-by-one between the two seeds is deliberate and relied
/// upon by summary application; see `analysis::summary`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Var {
    Local(usize),
    Sym(usize),
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Var::Local(i) => write!(f, "l{}", i),
            Var::Sym(i) => write!(f, "s{}", i),
        }
    }
}
