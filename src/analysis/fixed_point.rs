//! A fixed-point engine for forward data-flow analysis over one function's
//! control flow graph.
//!
//! The engine is generic over a [`Transfer`]: the bundle of lattice
//! operations and instruction semantics a concrete analysis supplies. It
//! runs a worklist to a fixpoint, joining states at every block and widening
//! at loop heads, and records the state before and after every block and
//! every instruction.

use crate::ir::{Block, BlockKind, Cfg, ControlInstr, DataInstr, Label, Module};
use crate::Error;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt::Debug;

const DEFAULT_MAX_ANALYSIS_STEPS: usize = 250_000;

/// The outcome of transferring a state through one block or control
/// instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Flow<State> {
    /// A single out-state.
    Simple(State),
    /// Separate out-states for the taken and not-taken branches of a
    /// conditional transfer.
    Branch(State, State),
}

/// The recorded state at a program point.
///
/// `Uninitialized` marks points the worklist has not reached yet; it is the
/// identity of both joining and widening.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum BlockResult<State> {
    #[default]
    Uninitialized,
    Simple(State),
    Branch(State, State),
}

impl<State> BlockResult<State> {
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, BlockResult::Uninitialized)
    }

    /// The single state of a `Simple` result.
    pub fn as_simple(&self) -> Option<&State> {
        match self {
            BlockResult::Simple(state) => Some(state),
            _ => None,
        }
    }
}

impl<State> From<Flow<State>> for BlockResult<State> {
    fn from(flow: Flow<State>) -> BlockResult<State> {
        match flow {
            Flow::Simple(state) => BlockResult::Simple(state),
            Flow::Branch(t, f) => BlockResult::Branch(t, f),
        }
    }
}

/// The capability set a concrete analysis must satisfy.
///
/// Realizations are plain structs wired into the engine by this trait; no
/// inheritance is implied. The same bundle serves both the taint and the
/// symbolic value instances.
pub trait Transfer {
    type State: Clone + Debug;

    /// The least element of the state lattice for this graph.
    fn bottom_state(&self, cfg: &Cfg) -> Self::State;

    /// The state at the function's entry, built from actuals, locals,
    /// globals and memory.
    fn init_state(&self, module: &Module, cfg: &Cfg) -> Self::State;

    /// Joins two states into one.
    fn join_state(&self, state0: Self::State, state1: &Self::State) -> Self::State;

    /// Over-approximates the join to force convergence at loop heads.
    fn widen_state(&self, state0: Self::State, state1: &Self::State) -> Self::State;

    fn equal_state(&self, state0: &Self::State, state1: &Self::State) -> bool;

    /// Given the state before a data instruction, the state after it.
    fn data_instr_transfer(
        &self,
        module: &Module,
        cfg: &Cfg,
        instr: &DataInstr,
        state: Self::State,
    ) -> Result<Self::State, Error>;

    /// Given the state before a control instruction, the flow after it.
    fn control_instr_transfer(
        &self,
        module: &Module,
        cfg: &Cfg,
        instr: &ControlInstr,
        state: Self::State,
    ) -> Result<Flow<Self::State>, Error>;

    /// Merges the predecessor states entering a block.
    ///
    /// Called with the (predecessor id, state) pairs in ascending
    /// predecessor order; a domain with merge-point logic beyond the plain
    /// join implements it here.
    fn merge_flows(
        &self,
        module: &Module,
        cfg: &Cfg,
        block: &Block,
        states: Vec<(usize, Self::State)>,
    ) -> Result<Self::State, Error>;
}

/// The per-block and per-instruction annotations produced by one analysis.
///
/// Both tables hold (pre, post) pairs. They are local to one engine run and
/// survive it as the analysis result.
#[derive(Clone, Debug)]
pub struct IntraResults<State> {
    block_data: FxHashMap<usize, (BlockResult<State>, BlockResult<State>)>,
    instr_data: FxHashMap<Label, (BlockResult<State>, BlockResult<State>)>,
}

impl<State: Clone> IntraResults<State> {
    /// The recorded state entering a block.
    pub fn block_pre(&self, index: usize) -> Option<&BlockResult<State>> {
        self.block_data.get(&index).map(|pair| &pair.0)
    }

    /// The recorded state leaving a block.
    pub fn block_post(&self, index: usize) -> Option<&BlockResult<State>> {
        self.block_data.get(&index).map(|pair| &pair.1)
    }

    /// The recorded state before an instruction.
    pub fn instr_pre(&self, label: Label) -> Option<&BlockResult<State>> {
        self.instr_data.get(&label).map(|pair| &pair.0)
    }

    /// The recorded state after an instruction.
    pub fn instr_post(&self, label: Label) -> Option<&BlockResult<State>> {
        self.instr_data.get(&label).map(|pair| &pair.1)
    }

    /// The state at the function's exit block, as a plain state.
    ///
    /// A branching exit joins its two arms; an exit the fixpoint never
    /// reached yields the bottom state, since such a function has no
    /// outward-visible effects.
    pub fn final_state<T>(&self, transfer: &T, cfg: &Cfg) -> Result<T::State, Error>
    where
        T: Transfer<State = State>,
    {
        let exit = cfg
            .exit()
            .ok_or_else(|| Error::Analysis(format!(
                "function {} has no exit block",
                cfg.function_index()
            )))?;
        let out = self
            .block_post(exit)
            .ok_or(Error::GraphVertexNotFound(exit))?;
        Ok(match out {
            BlockResult::Uninitialized => transfer.bottom_state(cfg),
            BlockResult::Simple(state) => state.clone(),
            BlockResult::Branch(t, f) => transfer.join_state(t.clone(), f),
        })
    }

    /// Pairs these annotations pointwise with another set over the same
    /// graph, keeping these on the left.
    pub fn zip<Other: Clone>(
        &self,
        other: &IntraResults<Other>,
    ) -> Result<IntraResults<(State, Other)>, Error> {
        fn zip_result<A: Clone, B: Clone>(
            a: &BlockResult<A>,
            b: &BlockResult<B>,
        ) -> Result<BlockResult<(A, B)>, Error> {
            match (a, b) {
                (BlockResult::Uninitialized, BlockResult::Uninitialized) => {
                    Ok(BlockResult::Uninitialized)
                }
                (BlockResult::Simple(a), BlockResult::Simple(b)) => {
                    Ok(BlockResult::Simple((a.clone(), b.clone())))
                }
                (BlockResult::Branch(at, af), BlockResult::Branch(bt, bf)) => Ok(
                    BlockResult::Branch((at.clone(), bt.clone()), (af.clone(), bf.clone())),
                ),
                _ => Err("cannot pair annotations of different shapes".into()),
            }
        }

        let mut block_data = FxHashMap::default();
        for (index, (pre, post)) in &self.block_data {
            let other_pair = other
                .block_data
                .get(index)
                .ok_or(Error::GraphVertexNotFound(*index))?;
            block_data.insert(
                *index,
                (zip_result(pre, &other_pair.0)?, zip_result(post, &other_pair.1)?),
            );
        }

        let mut instr_data = FxHashMap::default();
        for (label, (pre, post)) in &self.instr_data {
            let other_pair = other
                .instr_data
                .get(label)
                .ok_or_else(|| Error::Analysis(format!("no annotation for instruction {}", label)))?;
            instr_data.insert(
                *label,
                (zip_result(pre, &other_pair.0)?, zip_result(post, &other_pair.1)?),
            );
        }

        Ok(IntraResults {
            block_data,
            instr_data,
        })
    }
}

/// Runs an analysis over one function to a fixpoint, replacing any previous
/// annotations.
pub fn analyze<T: Transfer>(
    module: &Module,
    cfg: &Cfg,
    transfer: &T,
) -> Result<IntraResults<T::State>, Error> {
    analyze_options(module, cfg, transfer, DEFAULT_MAX_ANALYSIS_STEPS)
}

/// Runs an analysis over one function, pairing the previous annotations
/// with the new states.
pub fn analyze_keep<T: Transfer, Previous: Clone>(
    module: &Module,
    cfg: &Cfg,
    transfer: &T,
    previous: &IntraResults<Previous>,
) -> Result<IntraResults<(Previous, T::State)>, Error> {
    let results = analyze(module, cfg, transfer)?;
    previous.zip(&results)
}

/// Runs an analysis with an explicit step budget.
pub fn analyze_options<T: Transfer>(
    module: &Module,
    cfg: &Cfg,
    transfer: &T,
    max_steps: usize,
) -> Result<IntraResults<T::State>, Error> {
    FixedPoint::new(module, cfg, transfer, max_steps).run()
}

// Scratch state for one fixpoint run. Exclusively owned by `run`; nothing
// here outlives the call except the returned annotations.
struct FixedPoint<'a, T: Transfer> {
    module: &'a Module,
    cfg: &'a Cfg,
    transfer: &'a T,
    block_data: FxHashMap<usize, (BlockResult<T::State>, BlockResult<T::State>)>,
    instr_data: FxHashMap<Label, (BlockResult<T::State>, BlockResult<T::State>)>,
    worklist: BTreeSet<usize>,
    max_steps: usize,
}

impl<'a, T: Transfer> FixedPoint<'a, T> {
    fn new(module: &'a Module, cfg: &'a Cfg, transfer: &'a T, max_steps: usize) -> FixedPoint<'a, T> {
        let mut block_data = FxHashMap::default();
        let mut instr_data = FxHashMap::default();
        for block in cfg.blocks() {
            block_data.insert(
                block.index(),
                (BlockResult::Uninitialized, BlockResult::Uninitialized),
            );
            match block.kind() {
                BlockKind::Data(instrs) => {
                    for instr in instrs {
                        instr_data.insert(
                            instr.label(),
                            (BlockResult::Uninitialized, BlockResult::Uninitialized),
                        );
                    }
                }
                BlockKind::Control(instr) => {
                    instr_data.insert(
                        instr.label(),
                        (BlockResult::Uninitialized, BlockResult::Uninitialized),
                    );
                }
                BlockKind::Merge => {}
            }
        }

        FixedPoint {
            module,
            cfg,
            transfer,
            block_data,
            instr_data,
            worklist: BTreeSet::new(),
            max_steps,
        }
    }

    fn run(mut self) -> Result<IntraResults<T::State>, Error> {
        let entry = self.cfg.entry().ok_or(Error::FixedPointRequiresEntry)?;
        let init = self.transfer.init_state(self.module, self.cfg);

        self.worklist.insert(entry);

        let mut steps = 0;
        // Dequeue the lowest block id first.
        while let Some(block_index) = self.worklist.iter().next().cloned() {
            self.worklist.remove(&block_index);

            if steps > self.max_steps {
                return Err(Error::FixedPointMaxSteps);
            }
            steps += 1;

            let in_state = self.input_state(block_index, entry, &init)?;
            let out = self.transfer_block(block_index, in_state.clone())?;

            let previous = &self.block_data[&block_index].1;
            if self.result_equal(previous, &out, block_index)? {
                continue;
            }

            let joined = self.join_result(previous.clone(), out, block_index)?;
            let new_out = if self.cfg.is_loop_head(block_index) {
                let previous = self.block_data[&block_index].1.clone();
                self.widen_result(previous, joined, block_index)?
            } else {
                joined
            };

            self.block_data
                .insert(block_index, (BlockResult::Simple(in_state), new_out));

            for successor in self.cfg.successor_indices(block_index)? {
                self.worklist.insert(successor);
            }
        }

        Ok(IntraResults {
            block_data: self.block_data,
            instr_data: self.instr_data,
        })
    }

    // Computes the state entering a block from its predecessors' recorded
    // out-states, then lets the transfer merge them.
    fn input_state(
        &self,
        block_index: usize,
        entry: usize,
        init: &T::State,
    ) -> Result<T::State, Error> {
        let mut states: Vec<(usize, T::State)> = Vec::new();

        for edge in self.cfg.edges_in(block_index)? {
            let pred = edge.head();
            let state = match &self.block_data[&pred].1 {
                BlockResult::Uninitialized => {
                    if block_index == entry {
                        init.clone()
                    } else {
                        self.transfer.bottom_state(self.cfg)
                    }
                }
                BlockResult::Simple(state) => state.clone(),
                BlockResult::Branch(taken, not_taken) => match edge.condition() {
                    Some(true) => taken.clone(),
                    Some(false) => not_taken.clone(),
                    None => {
                        return Err(Error::MalformedControlFlowGraph(
                            self.cfg.function_index(),
                            block_index,
                        ))
                    }
                },
            };
            states.push((pred, state));
        }

        if states.is_empty() {
            return Ok(if block_index == entry {
                init.clone()
            } else {
                self.transfer.bottom_state(self.cfg)
            });
        }

        let block = self.cfg.block(block_index)?;
        self.transfer.merge_flows(self.module, self.cfg, block, states)
    }

    // Transfers a state through one block, recording per-instruction pre
    // and post states as it goes.
    fn transfer_block(&mut self, block_index: usize, in_state: T::State) -> Result<Flow<T::State>, Error> {
        let block = self.cfg.block(block_index)?.clone();
        match block.kind() {
            BlockKind::Data(instrs) => {
                let mut state = in_state;
                for instr in instrs {
                    let pre = state.clone();
                    state = self
                        .transfer
                        .data_instr_transfer(self.module, self.cfg, instr, state)?;
                    self.instr_data.insert(
                        instr.label(),
                        (
                            BlockResult::Simple(pre),
                            BlockResult::Simple(state.clone()),
                        ),
                    );
                }
                Ok(Flow::Simple(state))
            }
            BlockKind::Control(instr) => {
                let pre = in_state.clone();
                let flow = self
                    .transfer
                    .control_instr_transfer(self.module, self.cfg, instr, in_state)?;
                self.instr_data.insert(
                    instr.label(),
                    (BlockResult::Simple(pre), flow.clone().into()),
                );
                Ok(flow)
            }
            BlockKind::Merge => Ok(Flow::Simple(in_state)),
        }
    }

    fn result_equal(
        &self,
        previous: &BlockResult<T::State>,
        out: &Flow<T::State>,
        block_index: usize,
    ) -> Result<bool, Error> {
        match (previous, out) {
            (BlockResult::Uninitialized, _) => Ok(false),
            (BlockResult::Simple(p), Flow::Simple(o)) => Ok(self.transfer.equal_state(p, o)),
            (BlockResult::Branch(pt, pf), Flow::Branch(ot, of)) => {
                Ok(self.transfer.equal_state(pt, ot) && self.transfer.equal_state(pf, of))
            }
            _ => Err(Error::ShapeMismatch(
                self.cfg.function_index(),
                block_index,
            )),
        }
    }

    fn join_result(
        &self,
        previous: BlockResult<T::State>,
        out: Flow<T::State>,
        block_index: usize,
    ) -> Result<BlockResult<T::State>, Error> {
        match (previous, out) {
            (BlockResult::Uninitialized, out) => Ok(out.into()),
            (BlockResult::Simple(p), Flow::Simple(o)) => {
                Ok(BlockResult::Simple(self.transfer.join_state(p, &o)))
            }
            (BlockResult::Branch(pt, pf), Flow::Branch(ot, of)) => Ok(BlockResult::Branch(
                self.transfer.join_state(pt, &ot),
                self.transfer.join_state(pf, &of),
            )),
            _ => Err(Error::ShapeMismatch(
                self.cfg.function_index(),
                block_index,
            )),
        }
    }

    fn widen_result(
        &self,
        previous: BlockResult<T::State>,
        joined: BlockResult<T::State>,
        block_index: usize,
    ) -> Result<BlockResult<T::State>, Error> {
        match (previous, joined) {
            (BlockResult::Uninitialized, joined) => Ok(joined),
            (BlockResult::Simple(p), BlockResult::Simple(j)) => {
                Ok(BlockResult::Simple(self.transfer.widen_state(p, &j)))
            }
            (BlockResult::Branch(pt, pf), BlockResult::Branch(jt, jf)) => Ok(BlockResult::Branch(
                self.transfer.widen_state(pt, &jt),
                self.transfer.widen_state(pf, &jf),
            )),
            _ => Err(Error::ShapeMismatch(
                self.cfg.function_index(),
                block_index,
            )),
        }
    }
}
