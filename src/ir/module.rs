//! The read-only module view consumed by the analyses.

use crate::ir::{Cfg, FunctionType, ValType};
use crate::Error;
use serde::{Deserialize, Serialize};

/// An imported function.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ImportedFunction {
    index: u32,
    module: String,
    name: String,
    ftype: FunctionType,
}

impl ImportedFunction {
    pub fn new(index: u32, module: &str, name: &str, ftype: FunctionType) -> ImportedFunction {
        ImportedFunction {
            index,
            module: module.to_string(),
            name: name.to_string(),
            ftype,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ftype(&self) -> &FunctionType {
        &self.ftype
    }
}

/// A function defined in the module.
///
/// The index is absolute: imports come first, so the first defined function
/// has index `nimports`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Function {
    index: u32,
    ftype: FunctionType,
    locals: Vec<ValType>,
    cfg: Cfg,
    name: Option<String>,
}

impl Function {
    pub fn new(index: u32, ftype: FunctionType, locals: Vec<ValType>, cfg: Cfg) -> Function {
        Function {
            index,
            ftype,
            locals,
            cfg,
            name: None,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn ftype(&self) -> &FunctionType {
        &self.ftype
    }

    /// The types of the locals declared beyond the parameters.
    pub fn locals(&self) -> &[ValType] {
        &self.locals
    }

    pub fn cfg(&self) -> &Cfg {
        &self.cfg
    }

    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => format!("f{}", self.index),
        }
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }
}

/// A global variable declaration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Global {
    ty: ValType,
    mutable: bool,
}

impl Global {
    pub fn new(ty: ValType, mutable: bool) -> Global {
        Global { ty, mutable }
    }

    pub fn ty(&self) -> ValType {
        self.ty
    }

    pub fn mutable(&self) -> bool {
        self.mutable
    }
}

/// The module's function table, used by indirect calls.
///
/// Slot i holds the index of the function installed there, or `None` when
/// the slot is uninitialized.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Table {
    elements: Vec<Option<u32>>,
}

impl Table {
    pub fn new(elements: Vec<Option<u32>>) -> Table {
        Table { elements }
    }

    pub fn elements(&self) -> &[Option<u32>] {
        &self.elements
    }

    /// The indices of all functions installed in the table.
    pub fn initialized(&self) -> impl Iterator<Item = u32> + '_ {
        self.elements.iter().filter_map(|slot| *slot)
    }
}

/// A decoded WebAssembly module, reduced to what the analyses consume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Module {
    types: Vec<FunctionType>,
    imports: Vec<ImportedFunction>,
    functions: Vec<Function>,
    globals: Vec<Global>,
    table: Option<Table>,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    /// Appends a type to the type section and returns its index.
    pub fn add_type(&mut self, ftype: FunctionType) -> u32 {
        self.types.push(ftype);
        (self.types.len() - 1) as u32
    }

    /// Appends an imported function.
    ///
    /// Imports must be added before defined functions; their indices form
    /// the prefix of the function index space.
    pub fn add_import(&mut self, import: ImportedFunction) -> Result<(), Error> {
        if import.index() as usize != self.imports.len() {
            return Err(Error::Analysis(format!(
                "import {} added out of order",
                import.index()
            )));
        }
        if !self.functions.is_empty() {
            return Err("imports must precede defined functions".into());
        }
        self.imports.push(import);
        Ok(())
    }

    /// Appends a defined function.
    pub fn add_function(&mut self, function: Function) -> Result<(), Error> {
        let expected = self.imports.len() + self.functions.len();
        if function.index() as usize != expected {
            return Err(Error::Analysis(format!(
                "function {} added out of order",
                function.index()
            )));
        }
        self.functions.push(function);
        Ok(())
    }

    /// Appends a global declaration.
    pub fn add_global(&mut self, global: Global) {
        self.globals.push(global);
    }

    /// Installs the function table.
    pub fn set_table(&mut self, table: Table) {
        self.table = Some(table);
    }

    pub fn nimports(&self) -> usize {
        self.imports.len()
    }

    pub fn nglobals(&self) -> usize {
        self.globals.len()
    }

    /// The number of functions in the index space, imports included.
    pub fn total_functions(&self) -> usize {
        self.imports.len() + self.functions.len()
    }

    pub fn imports(&self) -> &[ImportedFunction] {
        &self.imports
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    pub fn is_import(&self, fidx: u32) -> bool {
        (fidx as usize) < self.imports.len()
    }

    /// Fetches a defined function by absolute index.
    pub fn function(&self, fidx: u32) -> Result<&Function, Error> {
        if self.is_import(fidx) {
            return Err(Error::Analysis(format!(
                "function {} is an import and has no body",
                fidx
            )));
        }
        self.functions
            .get(fidx as usize - self.imports.len())
            .ok_or(Error::FunctionNotFound(fidx))
    }

    /// Fetches an imported function by absolute index.
    pub fn import(&self, fidx: u32) -> Result<&ImportedFunction, Error> {
        self.imports
            .get(fidx as usize)
            .ok_or(Error::FunctionNotFound(fidx))
    }

    /// The type of any function in the index space, import or defined.
    pub fn type_of(&self, fidx: u32) -> Result<&FunctionType, Error> {
        if self.is_import(fidx) {
            Ok(self.imports[fidx as usize].ftype())
        } else {
            self.function(fidx).map(|f| f.ftype())
        }
    }

    /// The type at the given index of the type section.
    pub fn type_by_index(&self, tidx: u32) -> Result<&FunctionType, Error> {
        self.types.get(tidx as usize).ok_or(Error::TypeNotFound(tidx))
    }

    /// A printable name for any function in the index space.
    pub fn function_name(&self, fidx: u32) -> String {
        if self.is_import(fidx) {
            self.imports[fidx as usize].name().to_string()
        } else {
            match self.function(fidx) {
                Ok(function) => function.name(),
                Err(_) => format!("f{}", fidx),
            }
        }
    }

    /// Resolves the possible targets of an indirect call of the given type
    /// index.
    ///
    /// When the module carries a table instance, the candidates are the
    /// functions installed in initialized slots; otherwise every function in
    /// the index space is a candidate. In both cases only candidates whose
    /// type is structurally equal to the callee type are kept.
    pub fn resolve_indirect_targets(&self, type_index: u32) -> Result<Vec<u32>, Error> {
        let callee_type = self.type_by_index(type_index)?.clone();

        let candidates: Vec<u32> = match &self.table {
            Some(table) => table.initialized().collect(),
            None => (0..self.total_functions() as u32).collect(),
        };

        let mut targets = Vec::new();
        for fidx in candidates {
            if *self.type_of(fidx)? == callee_type {
                targets.push(fidx);
            }
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Cfg;

    fn ftype(params: Vec<ValType>, results: Vec<ValType>) -> FunctionType {
        FunctionType::new(params, results)
    }

    fn empty_function(index: u32, t: FunctionType) -> Function {
        Function::new(index, t, vec![], Cfg::new(index))
    }

    #[test]
    fn test_function_index_space() {
        let mut module = Module::new();
        module
            .add_import(ImportedFunction::new(
                0,
                "env",
                "mystery",
                ftype(vec![], vec![ValType::I32]),
            ))
            .unwrap();
        module
            .add_function(empty_function(1, ftype(vec![ValType::I32], vec![])))
            .unwrap();

        assert!(module.is_import(0));
        assert!(!module.is_import(1));
        assert_eq!(module.type_of(0).unwrap().results(), &[ValType::I32]);
        assert_eq!(module.type_of(1).unwrap().params(), &[ValType::I32]);
        assert_eq!(module.function_name(0), "mystery");
        assert_eq!(module.function_name(1), "f1");
        assert!(module.function(0).is_err());
        assert!(module.type_of(2).is_err());
    }

    #[test]
    fn test_out_of_order_insertion_is_rejected() {
        let mut module = Module::new();
        assert!(module
            .add_function(empty_function(3, ftype(vec![], vec![])))
            .is_err());

        let mut module = Module::new();
        module
            .add_function(empty_function(0, ftype(vec![], vec![])))
            .unwrap();
        assert!(module
            .add_import(ImportedFunction::new(0, "env", "late", ftype(vec![], vec![])))
            .is_err());
    }

    #[test]
    fn test_resolve_indirect_targets_through_table() {
        let mut module = Module::new();
        let unary = module.add_type(ftype(vec![ValType::I32], vec![ValType::I32]));
        let nullary = module.add_type(ftype(vec![], vec![]));

        module
            .add_function(empty_function(0, ftype(vec![ValType::I32], vec![ValType::I32])))
            .unwrap();
        module
            .add_function(empty_function(1, ftype(vec![], vec![])))
            .unwrap();
        module
            .add_function(empty_function(2, ftype(vec![ValType::I32], vec![ValType::I32])))
            .unwrap();

        // function 2 is not installed in the table
        module.set_table(Table::new(vec![Some(0), None, Some(1)]));

        assert_eq!(module.resolve_indirect_targets(unary).unwrap(), vec![0]);
        assert_eq!(module.resolve_indirect_targets(nullary).unwrap(), vec![1]);
    }

    #[test]
    fn test_resolve_indirect_targets_without_table() {
        let mut module = Module::new();
        let unary = module.add_type(ftype(vec![ValType::I32], vec![ValType::I32]));

        module
            .add_import(ImportedFunction::new(
                0,
                "env",
                "imported",
                ftype(vec![ValType::I32], vec![ValType::I32]),
            ))
            .unwrap();
        module
            .add_function(empty_function(1, ftype(vec![ValType::I32], vec![ValType::I32])))
            .unwrap();
        module
            .add_function(empty_function(2, ftype(vec![], vec![])))
            .unwrap();

        // no table: every type-equal function, imports included
        assert_eq!(module.resolve_indirect_targets(unary).unwrap(), vec![0, 1]);
    }
}
