//! A `Cfg` is a directed `graph::Graph` of `Block` and `Edge` for one
//! function.
//!
//! The graph is built outside this crate. Blocks come in three kinds: a
//! linear sequence of data instructions, a single control instruction, or a
//! merge point where control flow joins. Edges leaving a conditional
//! control transfer are labeled with the branch they represent (`Some
//! (true)` / `Some(false)`); all other edges are unlabeled.

use crate::ir::{ControlInstr, DataInstr, Var};
use crate::{graph, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The payload of a basic block.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum BlockKind {
    /// A straight-line run of data instructions.
    Data(Vec<DataInstr>),
    /// A single control instruction.
    Control(ControlInstr),
    /// A join point carrying no instructions.
    Merge,
}

/// A basic block.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Block {
    index: usize,
    kind: BlockKind,
}

impl Block {
    pub fn data(index: usize, instrs: Vec<DataInstr>) -> Block {
        Block {
            index,
            kind: BlockKind::Data(instrs),
        }
    }

    pub fn control(index: usize, instr: ControlInstr) -> Block {
        Block {
            index,
            kind: BlockKind::Control(instr),
        }
    }

    pub fn merge(index: usize) -> Block {
        Block {
            index,
            kind: BlockKind::Merge,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }
}

impl graph::Vertex for Block {
    fn index(&self) -> usize {
        self.index
    }
    fn dot_label(&self) -> String {
        match &self.kind {
            BlockKind::Data(instrs) => {
                let lines: Vec<String> = instrs.iter().map(|i| i.to_string()).collect();
                lines.join("\n")
            }
            BlockKind::Control(instr) => instr.to_string(),
            BlockKind::Merge => "merge".to_string(),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            BlockKind::Data(instrs) => {
                writeln!(f, "[ Block: 0x{:X} ]", self.index)?;
                for instr in instrs {
                    writeln!(f, "{}", instr)?;
                }
                Ok(())
            }
            BlockKind::Control(instr) => writeln!(f, "[ Block: 0x{:X} ] {}", self.index, instr),
            BlockKind::Merge => writeln!(f, "[ Block: 0x{:X} ] merge", self.index),
        }
    }
}

/// An edge between blocks, optionally labeled with the branch it encodes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Edge {
    head: usize,
    tail: usize,
    condition: Option<bool>,
}

impl Edge {
    pub(crate) fn new(head: usize, tail: usize, condition: Option<bool>) -> Edge {
        Edge {
            head,
            tail,
            condition,
        }
    }

    /// The branch label of this edge, if it leaves a conditional transfer.
    pub fn condition(&self) -> Option<bool> {
        self.condition
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }
}

impl graph::Edge for Edge {
    fn head(&self) -> usize {
        self.head
    }
    fn tail(&self) -> usize {
        self.tail
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.condition {
            Some(c) => write!(f, "({}->{}) ? {}", self.head, self.tail, c),
            None => write!(f, "({}->{})", self.head, self.tail),
        }
    }
}

/// The control flow graph of one function.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Cfg {
    // The index of the function this graph belongs to.
    function_index: u32,
    // The internal graph used to store our blocks.
    graph: graph::Graph<Block, Edge>,
    // An optional entry index for the graph.
    entry: Option<usize>,
    // An optional exit index for the graph.
    exit: Option<usize>,
    // Blocks heading a loop; widening is applied here.
    loop_heads: BTreeSet<usize>,
    // The variable holding the function's return value at the exit block.
    result_var: Option<Var>,
    // The variables naming the module's globals at the exit block.
    exit_globals: Vec<Var>,
}

impl Cfg {
    pub fn new(function_index: u32) -> Cfg {
        Cfg {
            function_index,
            graph: graph::Graph::new(),
            entry: None,
            exit: None,
            loop_heads: BTreeSet::new(),
            result_var: None,
            exit_globals: Vec::new(),
        }
    }

    /// The index of the function this `Cfg` belongs to.
    pub fn function_index(&self) -> u32 {
        self.function_index
    }

    /// Returns the underlying graph
    pub fn graph(&self) -> &graph::Graph<Block, Edge> {
        &self.graph
    }

    /// Adds a basic block to the graph.
    pub fn add_block(&mut self, block: Block) -> Result<(), Error> {
        self.graph.insert_vertex(block)
    }

    /// Sets the entry point for this `Cfg` to the given `Block` index.
    pub fn set_entry(&mut self, entry: usize) -> Result<(), Error> {
        if self.graph.has_vertex(entry) {
            self.entry = Some(entry);
            return Ok(());
        }
        Err("Index does not exist for set_entry".into())
    }

    /// Sets the exit point for this `Cfg` to the given `Block` index.
    pub fn set_exit(&mut self, exit: usize) -> Result<(), Error> {
        if self.graph.has_vertex(exit) {
            self.exit = Some(exit);
            return Ok(());
        }
        Err("Index does not exist for set_exit".into())
    }

    /// Get the entry `Block` index for this `Cfg`.
    pub fn entry(&self) -> Option<usize> {
        self.entry
    }

    /// Get the exit `Block` index for this `Cfg`.
    pub fn exit(&self) -> Option<usize> {
        self.exit
    }

    /// Get a `Block` by index.
    pub fn block(&self, index: usize) -> Result<&Block, Error> {
        self.graph.vertex(index)
    }

    /// Get every `Block` in this `Cfg`.
    pub fn blocks(&self) -> Vec<&Block> {
        self.graph.vertices()
    }

    /// Get every `Edge` in this `Cfg`.
    pub fn edges(&self) -> Vec<&Edge> {
        self.graph.edges()
    }

    /// Get every incoming edge to a block
    pub fn edges_in(&self, index: usize) -> Result<Vec<&Edge>, Error> {
        self.graph.edges_in(index)
    }

    /// Get every outgoing edge from a block
    pub fn edges_out(&self, index: usize) -> Result<Vec<&Edge>, Error> {
        self.graph.edges_out(index)
    }

    /// Get the indices of every successor of a `Block` in this `Cfg`.
    pub fn successor_indices(&self, index: usize) -> Result<Vec<usize>, Error> {
        self.graph.successor_indices(index)
    }

    /// Creates an unconditional edge from one block to another block
    pub fn unconditional_edge(&mut self, head: usize, tail: usize) -> Result<(), Error> {
        self.graph.insert_edge(Edge::new(head, tail, None))
    }

    /// Creates an edge labeled with the branch of a conditional transfer.
    pub fn conditional_edge(&mut self, head: usize, tail: usize, taken: bool) -> Result<(), Error> {
        self.graph.insert_edge(Edge::new(head, tail, Some(taken)))
    }

    /// Marks a block as a loop head.
    pub fn add_loop_head(&mut self, index: usize) -> Result<(), Error> {
        if !self.graph.has_vertex(index) {
            return Err(Error::GraphVertexNotFound(index));
        }
        self.loop_heads.insert(index);
        Ok(())
    }

    /// The set of loop-head blocks.
    pub fn loop_heads(&self) -> &BTreeSet<usize> {
        &self.loop_heads
    }

    pub fn is_loop_head(&self, index: usize) -> bool {
        self.loop_heads.contains(&index)
    }

    /// Sets the variable holding the return value at the exit block.
    pub fn set_result_var(&mut self, var: Option<Var>) {
        self.result_var = var;
    }

    /// The variable holding the return value at the exit block.
    pub fn result_var(&self) -> Option<Var> {
        self.result_var
    }

    /// Sets the variables naming the globals at the exit block.
    pub fn set_exit_globals(&mut self, globals: Vec<Var>) {
        self.exit_globals = globals;
    }

    /// The variables naming the globals at the exit block.
    pub fn exit_globals(&self) -> &[Var] {
        &self.exit_globals
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for block in self.blocks() {
            writeln!(f, "{}", block)?;
        }
        for edge in self.edges() {
            writeln!(f, "edge {}", edge)?;
        }
        Ok(())
    }
}
