use std::collections::{BTreeMap, HashMap, HashSet};

use inkwell::{
    context::Context,
    execution_engine::{ExecutionEngine, FunctionLookupError, JitFunction},
    module::Module,
    values::FunctionValue,
    OptimizationLevel,
};

use crate::runtime;

type EntryFunc = unsafe extern "C" fn() -> f64;

/// Removed units whose code still sits in the engine before it is rebuilt.
const MAX_STALE_UNITS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("module failed verification: {0}")]
    InvalidModule(String),
    #[error("failed to create execution engine: {0}")]
    EngineCreation(String),
    #[error("failed to link module into execution engine")]
    Link,
    #[error("no callable function {0}")]
    UnknownSymbol(String),
    #[error("failed to look up {0}: {1}")]
    Lookup(String, FunctionLookupError),
    #[error("no module with handle {0:?}")]
    UnknownModule(ModuleHandle),
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct ModuleHandle(usize);

/// Something that can make compiled units callable. A unit stays callable
/// until its handle is removed or a later unit redefines one of its functions.
pub trait ExecutionBackend<'ctx> {
    fn add_module(&mut self, module: Module<'ctx>) -> Result<ModuleHandle, BackendError>;

    fn remove_module(&mut self, handle: ModuleHandle) -> Result<(), BackendError>;

    /// looks up a zero argument function by name and runs it
    fn invoke(&mut self, name: &str) -> Result<f64, BackendError>;
}

fn functions<'ctx>(module: &Module<'ctx>) -> impl Iterator<Item = FunctionValue<'ctx>> {
    std::iter::successors(module.get_first_function(), |func| func.get_next_function())
}

fn function_name(func: &FunctionValue<'_>) -> String {
    func.get_name().to_string_lossy().into_owned()
}

fn is_declaration(func: &FunctionValue<'_>) -> bool {
    func.count_basic_blocks() == 0
}

fn defined_functions(module: &Module<'_>) -> Vec<String> {
    functions(module)
        .filter(|func| !is_declaration(func))
        .map(|func| function_name(&func))
        .collect()
}

fn declared_functions(module: &Module<'_>) -> Vec<String> {
    functions(module)
        .filter(is_declaration)
        .map(|func| function_name(&func))
        .collect()
}

fn rename(func: FunctionValue<'_>, symbol: &str) {
    func.as_global_value().as_pointer_value().set_name(symbol);
}

/// An MCJIT engine plus what has been linked into it. MCJIT never forgets a
/// symbol once it has emitted it, so a function whose name was used by a
/// removed unit is linked under a fresh symbol, and callers linked later are
/// pointed at that symbol.
struct LinkedEngine<'ctx> {
    engine: ExecutionEngine<'ctx>,
    units: HashSet<ModuleHandle>,
    /// callable name -> symbol it is linked under
    symbols: HashMap<String, String>,
    /// every symbol ever defined in the engine
    taken: HashSet<String>,
    stale: usize,
}

impl<'ctx> LinkedEngine<'ctx> {
    fn new(context: &'ctx Context, opt_level: OptimizationLevel) -> Result<Self, BackendError> {
        let root = context.create_module("jit");
        let engine = root
            .create_jit_execution_engine(opt_level)
            .map_err(|e| BackendError::EngineCreation(e.to_string()))?;

        Ok(Self {
            engine,
            units: HashSet::new(),
            symbols: HashMap::new(),
            taken: HashSet::new(),
            stale: 0,
        })
    }

    /// whether the unit's declarations can be linked without one of them
    /// binding to code of a removed unit
    fn can_link(&self, module: &Module<'ctx>) -> bool {
        declared_functions(module)
            .iter()
            .all(|name| !self.taken.contains(name) || self.symbols.contains_key(name))
    }

    fn link(&mut self, handle: ModuleHandle, module: &Module<'ctx>) -> Result<(), BackendError> {
        let unit = module.clone();
        let mut builtins = Vec::new();
        for func in functions(&unit) {
            let name = function_name(&func);
            if is_declaration(&func) {
                if let Some(symbol) = self.symbols.get(&name).filter(|symbol| **symbol != name) {
                    rename(func, symbol);
                } else if let Some(addr) = runtime::builtin_address(&name) {
                    builtins.push((func, addr));
                }
                continue;
            }

            let symbol = if self.taken.contains(&name) {
                let symbol = format!("{}.{}", name, handle.0);
                rename(func, &symbol);
                symbol
            } else {
                name.clone()
            };
            self.taken.insert(symbol.clone());
            self.symbols.insert(name, symbol);
        }

        self.engine
            .add_module(&unit)
            .map_err(|()| BackendError::Link)?;
        for (func, addr) in builtins {
            self.engine.add_global_mapping(&func, addr);
        }
        self.units.insert(handle);
        Ok(())
    }

    fn unlink(&mut self, handle: ModuleHandle, defined: &[String]) {
        for name in defined {
            self.symbols.remove(name);
        }
        self.units.remove(&handle);
        self.stale += 1;
    }

    fn call(&self, name: &str) -> Result<f64, BackendError> {
        let symbol = self
            .symbols
            .get(name)
            .ok_or_else(|| BackendError::UnknownSymbol(name.to_string()))?;

        let entry: JitFunction<EntryFunc> = unsafe { self.engine.get_function(symbol) }
            .map_err(|e| BackendError::Lookup(name.to_string(), e))?;

        Ok(unsafe { entry.call() })
    }
}

/// MCJIT backed implementation. Units are kept as IR by handle and linked
/// into a shared engine on demand. Replacing a definition, or removing a unit
/// that others call into, throws the engine away so the next invocation
/// relinks everything against the newest definitions.
pub struct JitBackend<'ctx> {
    context: &'ctx Context,
    opt_level: OptimizationLevel,
    modules: BTreeMap<ModuleHandle, Module<'ctx>>,
    next_handle: usize,
    linked: Option<LinkedEngine<'ctx>>,
}

impl<'ctx> JitBackend<'ctx> {
    pub fn new(context: &'ctx Context, opt_level: OptimizationLevel) -> Self {
        Self {
            context,
            opt_level,
            modules: BTreeMap::new(),
            next_handle: 0,
            linked: None,
        }
    }

    /// names of every function the backend can currently call
    #[cfg(test)]
    pub fn defined_functions(&self) -> Vec<String> {
        self.modules.values().flat_map(defined_functions).collect()
    }

    fn engine_is_reusable(&self, linked: &LinkedEngine<'ctx>) -> bool {
        linked.stale <= MAX_STALE_UNITS
            && self
                .modules
                .iter()
                .filter(|(handle, _)| !linked.units.contains(*handle))
                .all(|(_, module)| linked.can_link(module))
    }
}

impl<'ctx> ExecutionBackend<'ctx> for JitBackend<'ctx> {
    fn add_module(&mut self, module: Module<'ctx>) -> Result<ModuleHandle, BackendError> {
        module
            .verify()
            .map_err(|e| BackendError::InvalidModule(e.to_string()))?;

        let defined = defined_functions(&module);
        let evicted: Vec<ModuleHandle> = self
            .modules
            .iter()
            .filter(|(_, existing)| {
                defined_functions(existing)
                    .iter()
                    .any(|name| defined.contains(name))
            })
            .map(|(handle, _)| *handle)
            .collect();

        for handle in &evicted {
            self.modules.remove(handle);
        }
        let evicted_linked = match &self.linked {
            Some(linked) => evicted.iter().any(|handle| linked.units.contains(handle)),
            None => false,
        };
        if evicted_linked {
            self.linked = None;
        }

        let handle = ModuleHandle(self.next_handle);
        self.next_handle += 1;
        self.modules.insert(handle, module);
        Ok(handle)
    }

    fn remove_module(&mut self, handle: ModuleHandle) -> Result<(), BackendError> {
        let module = self
            .modules
            .remove(&handle)
            .ok_or(BackendError::UnknownModule(handle))?;

        let modules = &self.modules;
        let drop_engine = match &mut self.linked {
            Some(linked) if linked.units.contains(&handle) => {
                let defined = defined_functions(&module);
                let has_callers = modules
                    .iter()
                    .filter(|(other, _)| linked.units.contains(*other))
                    .any(|(_, other)| {
                        declared_functions(other)
                            .iter()
                            .any(|name| defined.contains(name))
                    });
                if !has_callers {
                    linked.unlink(handle, &defined);
                }
                has_callers
            }
            _ => false,
        };
        if drop_engine {
            self.linked = None;
        }
        Ok(())
    }

    fn invoke(&mut self, name: &str) -> Result<f64, BackendError> {
        let mut linked = match self.linked.take() {
            Some(linked) if self.engine_is_reusable(&linked) => linked,
            _ => LinkedEngine::new(self.context, self.opt_level)?,
        };

        for (handle, module) in &self.modules {
            if !linked.units.contains(handle) {
                linked.link(*handle, module)?;
            }
        }

        let result = linked.call(name);
        self.linked = Some(linked);
        result
    }
}
