//! The module's call graph and the SCC schedule derived from it.

use crate::graph;
use crate::ir::{BlockKind, ControlOp, Module};
use crate::Error;
use serde::{Deserialize, Serialize};

/// A function in the call graph.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FunctionVertex {
    index: usize,
    name: String,
}

impl FunctionVertex {
    fn new(index: usize, name: String) -> FunctionVertex {
        FunctionVertex { index, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl graph::Vertex for FunctionVertex {
    fn index(&self) -> usize {
        self.index
    }
    fn dot_label(&self) -> String {
        self.name.clone()
    }
}

/// A caller-to-callee edge.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CallEdge {
    head: usize,
    tail: usize,
}

impl graph::Edge for CallEdge {
    fn head(&self) -> usize {
        self.head
    }
    fn tail(&self) -> usize {
        self.tail
    }
}

/// The call graph: one vertex per function in the index space, imports
/// included, and an edge for every direct call and every resolvable
/// indirect-call target.
#[derive(Clone, Debug)]
pub struct CallGraph {
    graph: graph::Graph<FunctionVertex, CallEdge>,
    nimports: usize,
}

impl CallGraph {
    /// Builds the call graph of a module.
    pub fn build(module: &Module) -> Result<CallGraph, Error> {
        let mut graph = graph::Graph::new();

        for fidx in 0..module.total_functions() as u32 {
            graph.insert_vertex(FunctionVertex::new(
                fidx as usize,
                module.function_name(fidx),
            ))?;
        }

        for function in module.functions() {
            let caller = function.index() as usize;
            for block in function.cfg().blocks() {
                let instr = match block.kind() {
                    BlockKind::Control(instr) => instr,
                    _ => continue,
                };
                match instr.op() {
                    ControlOp::Call(target) => {
                        insert_call_edge(&mut graph, caller, *target as usize)?;
                    }
                    ControlOp::CallIndirect(type_index) => {
                        for target in module.resolve_indirect_targets(*type_index)? {
                            insert_call_edge(&mut graph, caller, target as usize)?;
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(CallGraph {
            graph,
            nimports: module.nimports(),
        })
    }

    pub fn graph(&self) -> &graph::Graph<FunctionVertex, CallEdge> {
        &self.graph
    }

    pub fn has_edge(&self, caller: u32, callee: u32) -> bool {
        self.graph.has_edge(caller as usize, callee as usize)
    }

    /// The functions called, directly or through the table, by a function.
    pub fn callees(&self, caller: u32) -> Result<Vec<u32>, Error> {
        Ok(self
            .graph
            .successor_indices(caller as usize)?
            .into_iter()
            .map(|index| index as u32)
            .collect())
    }

    /// Drops the import vertices and every edge touching them.
    ///
    /// Defined-to-import edges disappear with their targets; imports have
    /// no outgoing edges to begin with.
    pub fn remove_imports(&mut self) -> Result<(), Error> {
        for index in 0..self.nimports {
            self.graph.remove_vertex(index)?;
        }
        Ok(())
    }

    /// The strongly connected components of the graph, in topological
    /// order: a component precedes every component it calls into.
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        self.graph.compute_strongly_connected_components()
    }

    /// The order in which the driver analyzes functions: the SCC list over
    /// the import-free graph, reversed, so every non-recursive callee is
    /// summarized before its callers.
    pub fn analysis_schedule(&self) -> Result<Vec<Vec<u32>>, Error> {
        let mut pruned = self.clone();
        pruned.remove_imports()?;

        let mut components = pruned.strongly_connected_components();
        components.reverse();

        Ok(components
            .into_iter()
            .map(|component| {
                let mut component: Vec<u32> =
                    component.into_iter().map(|index| index as u32).collect();
                component.sort_unstable();
                component
            })
            .collect())
    }

    /// Renders the call graph in dot graphviz format.
    pub fn to_dot(&self) -> String {
        use crate::graph::{Edge, Vertex};

        let vertices: Vec<String> = self
            .graph
            .vertices()
            .iter()
            .map(|v| format!("node{} [shape=record, mlabel=\"{{{}}}\"];", v.index(), v.dot_label()))
            .collect();

        let edges: Vec<String> = self
            .graph
            .edges()
            .iter()
            .map(|e| format!("node{} -> node{};", e.head(), e.tail()))
            .collect();

        format!(
            "digraph callgraph {{\n{}\n{}\n}}\n",
            vertices.join("\n"),
            edges.join("\n")
        )
    }
}

fn insert_call_edge(
    graph: &mut graph::Graph<FunctionVertex, CallEdge>,
    caller: usize,
    callee: usize,
) -> Result<(), Error> {
    // A function may call the same target from several sites.
    if graph.has_edge(caller, callee) {
        return Ok(());
    }
    graph.insert_edge(CallEdge {
        head: caller,
        tail: callee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        Block, Cfg, ControlInstr, Function, FunctionType, ImportedFunction, Module, Table,
        ValType,
    };

    fn nullary_type() -> FunctionType {
        FunctionType::new(vec![], vec![])
    }

    fn function_calling(index: u32, label: usize, targets: &[u32]) -> Function {
        let mut cfg = Cfg::new(index);
        let mut previous = None;
        for (i, target) in targets.iter().enumerate() {
            let block = Block::control(
                i,
                ControlInstr::new(label + i, ControlOp::Call(*target), vec![], vec![]),
            );
            cfg.add_block(block).unwrap();
            if let Some(previous) = previous {
                cfg.unconditional_edge(previous, i).unwrap();
            }
            previous = Some(i);
        }
        if targets.is_empty() {
            cfg.add_block(Block::merge(0)).unwrap();
        }
        cfg.set_entry(0).unwrap();
        cfg.set_exit(targets.len().saturating_sub(1)).unwrap();
        Function::new(index, nullary_type(), vec![], cfg)
    }

    #[test]
    fn test_direct_call_edges() {
        let mut module = Module::new();
        module
            .add_import(ImportedFunction::new(0, "env", "mystery", nullary_type()))
            .unwrap();
        module.add_function(function_calling(1, 0, &[0, 2])).unwrap();
        module.add_function(function_calling(2, 10, &[])).unwrap();

        let call_graph = CallGraph::build(&module).unwrap();

        assert!(call_graph.has_edge(1, 0));
        assert!(call_graph.has_edge(1, 2));
        assert_eq!(call_graph.callees(1).unwrap(), vec![0, 2]);
        assert_eq!(call_graph.callees(2).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_remove_imports_drops_their_edges() {
        let mut module = Module::new();
        module
            .add_import(ImportedFunction::new(0, "env", "mystery", nullary_type()))
            .unwrap();
        module.add_function(function_calling(1, 0, &[0])).unwrap();

        let mut call_graph = CallGraph::build(&module).unwrap();
        call_graph.remove_imports().unwrap();

        assert!(!call_graph.graph().has_vertex(0));
        assert!(call_graph.callees(1).unwrap().is_empty());
    }

    #[test]
    fn test_indirect_edges_respect_the_table() {
        let mut module = Module::new();
        let tidx = module.add_type(nullary_type());

        // function 0 calls through the table; 1 is installed, 2 is not
        let mut cfg = Cfg::new(0);
        cfg.add_block(Block::control(
            0,
            ControlInstr::new(0, ControlOp::CallIndirect(tidx), vec![], vec![]),
        ))
        .unwrap();
        cfg.set_entry(0).unwrap();
        cfg.set_exit(0).unwrap();
        module
            .add_function(Function::new(0, nullary_type(), vec![], cfg))
            .unwrap();
        module.add_function(function_calling(1, 10, &[])).unwrap();
        module.add_function(function_calling(2, 20, &[])).unwrap();
        module.set_table(Table::new(vec![Some(1)]));

        let call_graph = CallGraph::build(&module).unwrap();

        assert!(call_graph.has_edge(0, 1));
        assert!(!call_graph.has_edge(0, 2));

        // every resolved target's type equals the callee type
        for target in module.resolve_indirect_targets(tidx).unwrap() {
            assert_eq!(
                module.type_of(target).unwrap(),
                module.type_by_index(tidx).unwrap()
            );
        }
    }

    #[test]
    fn test_schedule_puts_callees_first() {
        let mut module = Module::new();
        module
            .add_import(ImportedFunction::new(0, "env", "mystery", nullary_type()))
            .unwrap();
        module.add_function(function_calling(1, 0, &[2, 0])).unwrap();
        module.add_function(function_calling(2, 10, &[3])).unwrap();
        module.add_function(function_calling(3, 20, &[])).unwrap();

        let call_graph = CallGraph::build(&module).unwrap();
        let schedule = call_graph.analysis_schedule().unwrap();

        let position = |fidx: u32| {
            schedule
                .iter()
                .position(|component| component.contains(&fidx))
                .unwrap()
        };

        // imports are pruned; every callee is scheduled strictly before
        // its caller
        assert_eq!(schedule.len(), 3);
        assert!(position(3) < position(2));
        assert!(position(2) < position(1));
    }

    #[test]
    fn test_schedule_keeps_a_recursive_component_together() {
        let mut module = Module::new();
        module.add_function(function_calling(0, 0, &[1])).unwrap();
        module.add_function(function_calling(1, 10, &[0])).unwrap();
        module.add_function(function_calling(2, 20, &[0])).unwrap();

        let call_graph = CallGraph::build(&module).unwrap();
        let schedule = call_graph.analysis_schedule().unwrap();

        assert_eq!(schedule, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_dot_export_format() {
        let mut module = Module::new();
        module.add_function(function_calling(0, 0, &[1])).unwrap();
        module.add_function(function_calling(1, 10, &[])).unwrap();

        let dot = CallGraph::build(&module).unwrap().to_dot();

        assert!(dot.starts_with("digraph callgraph {"));
        assert!(dot.contains("node0 [shape=record, mlabel=\"{f0}\"];"));
        assert!(dot.contains("node1 [shape=record, mlabel=\"{f1}\"];"));
        assert!(dot.contains("node0 -> node1;"));
    }
}
