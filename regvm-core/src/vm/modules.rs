//! Native module registry
//!
//! Fixed table of module slots. A slot holds either a platform shared library
//! opened with `libloading`, or a builtin module registered in-process on the
//! machine before it runs. Loading a name consults the builtins first.
//!
//! # ABI
//!
//! Every native function has the signature [`NativeFn`]:
//!
//! ```text
//! sp' = f(sp, top, bottom, data)
//! ```
//!
//! `sp`, `top` and `bottom` point into the calling core's stack window inside
//! the data segment, `data` is the segment base. The function pops its own
//! arguments and pushes its own results (see [`StackView`]) and returns the
//! new stack pointer, or null on failure.

use std::collections::HashMap;
use std::sync::Arc;

use libloading::{Library, Symbol};

use super::error::{VmError, VmResult};

/// Native function under the four-pointer stack ABI
pub type NativeFn =
    unsafe extern "C" fn(sp: *mut u8, top: *mut u8, bottom: *mut u8, data: *mut u8) -> *mut u8;

/// Module provided in-process, resolved by name like a library
#[derive(Debug, Clone)]
pub struct BuiltinModule {
    name: String,
    functions: HashMap<String, NativeFn>,
}

impl BuiltinModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: HashMap::new(),
        }
    }

    /// Exports `f` under `symbol`
    pub fn with_function(mut self, symbol: impl Into<String>, f: NativeFn) -> Self {
        self.functions.insert(symbol.into(), f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

enum ModuleSource {
    Library(Arc<Library>),
    Builtin(Arc<BuiltinModule>),
}

struct ModuleDescriptor {
    name: String,
    source: ModuleSource,
    functions: Vec<Option<NativeFn>>,
}

/// Function resolved out of the table, callable without holding the lock
///
/// Keeps its library mapped even if the slot is freed meanwhile.
pub struct BoundFunction {
    func: NativeFn,
    _library: Option<Arc<Library>>,
}

impl BoundFunction {
    /// Calls the native function
    ///
    /// # Safety
    ///
    /// The pointers must describe the caller's live stack window inside the
    /// data segment, and the function must honor the stack ABI.
    #[inline]
    pub unsafe fn invoke(
        &self,
        sp: *mut u8,
        top: *mut u8,
        bottom: *mut u8,
        data: *mut u8,
    ) -> *mut u8 {
        unsafe { (self.func)(sp, top, bottom, data) }
    }
}

/// Tabela de módulos
pub struct ModuleTable {
    slots: Vec<Option<ModuleDescriptor>>,
    max_functions: usize,
    builtins: HashMap<String, Arc<BuiltinModule>>,
}

impl ModuleTable {
    pub fn new(max_modules: usize, max_functions: usize) -> Self {
        Self {
            slots: (0..max_modules).map(|_| None).collect(),
            max_functions,
            builtins: HashMap::new(),
        }
    }

    /// Registers a builtin module, replacing one with the same name
    pub fn register_builtin(&mut self, module: BuiltinModule) {
        tracing::debug!("builtin module registered: {}", module.name);
        self.builtins.insert(module.name.clone(), Arc::new(module));
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Name of the module in `slot`, if any
    pub fn name(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot)?.as_ref().map(|m| m.name.as_str())
    }

    /// Lowest empty slot
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    fn slot_index(&self, slot: i64) -> VmResult<usize> {
        usize::try_from(slot)
            .ok()
            .filter(|&s| s < self.slots.len())
            .ok_or(VmError::ModuleSlotOutOfRange(slot))
    }

    fn loaded(&self, slot: i64) -> VmResult<&ModuleDescriptor> {
        let index = self.slot_index(slot)?;
        self.slots[index].as_ref().ok_or(VmError::ModuleNotLoaded(index))
    }

    /// Loads module `name` into `slot`
    pub fn load(&mut self, slot: i64, name: &str) -> VmResult<()> {
        let index = self.slot_index(slot)?;
        if let Some(existing) = &self.slots[index] {
            return Err(VmError::ModuleSlotInUse {
                slot: index,
                name: existing.name.clone(),
            });
        }

        let source = match self.builtins.get(name) {
            Some(builtin) => ModuleSource::Builtin(Arc::clone(builtin)),
            None => {
                let lib = unsafe { Library::new(name) }.map_err(|e| VmError::ModuleLoad {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                ModuleSource::Library(Arc::new(lib))
            }
        };

        self.slots[index] = Some(ModuleDescriptor {
            name: name.to_string(),
            source,
            functions: vec![None; self.max_functions],
        });
        tracing::info!("module loaded: {} -> slot {}", name, index);
        Ok(())
    }

    /// Releases `slot`, making it reusable. An empty slot is left as is.
    pub fn free(&mut self, slot: i64) -> VmResult<()> {
        let index = self.slot_index(slot)?;
        match self.slots[index].take() {
            Some(module) => tracing::info!("module freed: {} (slot {})", module.name, index),
            None => tracing::warn!("free module: slot {} is empty", index),
        }
        Ok(())
    }

    /// Resolves `symbol` of module `slot` into function slot `fn_slot`
    pub fn bind(&mut self, slot: i64, fn_slot: i64, symbol: &str) -> VmResult<()> {
        let index = self.slot_index(slot)?;
        let max_functions = self.max_functions;
        let module = self.slots[index]
            .as_mut()
            .ok_or(VmError::ModuleNotLoaded(index))?;

        let bind_error = |reason: String| VmError::ModuleBind {
            module: module.name.clone(),
            symbol: symbol.to_string(),
            reason,
        };

        let fn_index = usize::try_from(fn_slot)
            .ok()
            .filter(|&f| f < max_functions)
            .ok_or_else(|| bind_error(format!("function slot {fn_slot} out of range")))?;

        let func = match &module.source {
            ModuleSource::Builtin(builtin) => *builtin
                .functions
                .get(symbol)
                .ok_or_else(|| bind_error("no such function".into()))?,
            ModuleSource::Library(lib) => {
                let sym: Symbol<NativeFn> = unsafe { lib.get(symbol.as_bytes()) }
                    .map_err(|e| bind_error(e.to_string()))?;
                *sym
            }
        };

        module.functions[fn_index] = Some(func);
        tracing::debug!("bound {}::{} -> function slot {}", module.name, symbol, fn_index);
        Ok(())
    }

    /// Looks up a bound function for invocation
    pub fn resolve(&self, slot: i64, fn_slot: i64) -> VmResult<BoundFunction> {
        let module = self.loaded(slot)?;
        let func = usize::try_from(fn_slot)
            .ok()
            .and_then(|f| module.functions.get(f).copied().flatten())
            .ok_or_else(|| VmError::FunctionNotBound {
                module: module.name.clone(),
                slot: fn_slot,
            })?;
        let library = match &module.source {
            ModuleSource::Library(lib) => Some(Arc::clone(lib)),
            ModuleSource::Builtin(_) => None,
        };
        Ok(BoundFunction {
            func,
            _library: library,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════
// STACK VIEW (helper para autores de módulos nativos)
// ═══════════════════════════════════════════════════════════════════

/// Width-specific push/pop over the raw ABI pointer triple
///
/// Same contract as the core's operand stack: push moves `sp` toward
/// `bottom`, pop moves it toward `top`, and neither crosses its bound.
#[derive(Debug)]
pub struct StackView {
    sp: *mut u8,
    top: *mut u8,
    bottom: *mut u8,
}

impl StackView {
    /// # Safety
    ///
    /// `bottom <= sp <= top` must hold and `[bottom, top)` must be valid for
    /// reads and writes for the lifetime of the view.
    pub unsafe fn new(sp: *mut u8, top: *mut u8, bottom: *mut u8) -> Self {
        Self { sp, top, bottom }
    }

    /// Current stack pointer, the value a native function returns
    pub fn sp(&self) -> *mut u8 {
        self.sp
    }

    fn room(&self) -> usize {
        self.sp as usize - self.bottom as usize
    }

    fn depth(&self) -> usize {
        self.top as usize - self.sp as usize
    }

    fn push_bytes<const N: usize>(&mut self, bytes: [u8; N]) -> Option<()> {
        if self.room() < N {
            return None;
        }
        unsafe {
            self.sp = self.sp.sub(N);
            std::ptr::write_unaligned(self.sp as *mut [u8; N], bytes);
        }
        Some(())
    }

    fn pop_bytes<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.depth() < N {
            return None;
        }
        unsafe {
            let bytes = std::ptr::read_unaligned(self.sp as *const [u8; N]);
            self.sp = self.sp.add(N);
            Some(bytes)
        }
    }

    pub fn push_u8(&mut self, value: u8) -> Option<()> {
        self.push_bytes([value])
    }

    pub fn pop_u8(&mut self) -> Option<u8> {
        self.pop_bytes::<1>().map(|b| b[0])
    }

    pub fn push_i64(&mut self, value: i64) -> Option<()> {
        self.push_bytes(value.to_ne_bytes())
    }

    pub fn pop_i64(&mut self) -> Option<i64> {
        self.pop_bytes().map(i64::from_ne_bytes)
    }

    pub fn push_f64(&mut self, value: f64) -> Option<()> {
        self.push_bytes(value.to_ne_bytes())
    }

    pub fn pop_f64(&mut self) -> Option<f64> {
        self.pop_bytes().map(f64::from_ne_bytes)
    }
}
