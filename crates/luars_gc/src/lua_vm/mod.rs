// Lua runtime context: owns the collector and is the only way the mutator
// touches the heap. Every store that could break the tri-color invariant
// goes through a method here that applies the right barrier.
mod gc_api;
mod lua_error;
mod object_api;

use crate::gc::{Allocator, BudgetAllocator, GC, GcBody, GcList, GcOption, GcStats};
use crate::lua_value::{LuaThread, LuaValue};

pub use lua_error::{LuaError, LuaResult};

/// Calls a Lua function on behalf of the collector (finalizers written in
/// Lua). Without a hook such finalizers are skipped.
pub type LuaCallHook = fn(&mut LuaVM, LuaValue, &[LuaValue]) -> LuaResult<()>;

pub struct LuaVM {
    pub(crate) gc: GC,
    /// Message of the last error, see [`LuaVM::error`]
    pub(crate) error_message: String,
    pub(crate) lua_call_hook: Option<LuaCallHook>,
}

impl LuaVM {
    /// Runtime with the default allocator, limited to `option.max_memory`
    pub fn new(option: GcOption) -> LuaResult<Self> {
        let allocator = Box::new(BudgetAllocator::new(option.max_memory));
        Self::with_allocator(option, allocator)
    }

    pub fn with_allocator(option: GcOption, allocator: Box<dyn Allocator>) -> LuaResult<Self> {
        let mut vm = LuaVM {
            gc: GC::new(option, allocator),
            error_message: String::new(),
            lua_call_hook: None,
        };

        let main = vm.alloc_object(GcBody::Thread(LuaThread::new()))?;
        vm.gc.roots.main_thread = Some(main);
        let registry = vm.create_table(0)?;
        vm.gc.roots.registry = registry.as_table_id();

        // tag method names are never collected
        let tm_gc = vm.create_string("__gc")?;
        vm.fix_object(tm_gc)?;
        vm.gc.tm_gc = tm_gc.as_gc_id();
        let tm_mode = vm.create_string("__mode")?;
        vm.fix_object(tm_mode)?;
        vm.gc.tm_mode = tm_mode.as_gc_id();

        tracing::debug!(bytes = vm.gc.total_bytes(), "runtime created");
        Ok(vm)
    }

    #[inline]
    pub fn gc(&self) -> &GC {
        &self.gc
    }

    /// Set runtime error and return lightweight error enum
    pub fn error(&mut self, message: impl Into<String>) -> LuaError {
        self.error_message = message.into();
        LuaError::RuntimeError
    }

    #[inline]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn registry(&self) -> LuaValue {
        self.gc
            .roots
            .registry
            .map(LuaValue::Table)
            .unwrap_or_default()
    }

    pub fn main_thread(&self) -> LuaValue {
        self.gc
            .roots
            .main_thread
            .map(LuaValue::Thread)
            .unwrap_or_default()
    }

    pub fn set_lua_call_hook(&mut self, hook: Option<LuaCallHook>) {
        self.lua_call_hook = hook;
    }

    /// luaC_freeallobjects: run every pending finalizer, then release the
    /// whole heap regardless of reachability.
    pub fn close(mut self) -> GcStats {
        tracing::info!(
            objects = self.gc.pool.total_len(),
            bytes = self.gc.total_bytes(),
            "closing runtime"
        );
        if let Some(main) = self.gc.roots.main_thread {
            self.close_thread_upvalues(main, 0);
        }
        self.gc.separate_tobefnz(true);
        // no new finalizers and no more cycles from here on
        self.gc.closing = true;
        self.gc.gc_running = false;
        self.call_all_pending_finalizers();

        self.gc.sweep_cursor = None;
        for list in [GcList::FinObj, GcList::AllGc, GcList::Fixed, GcList::ToBeFnz] {
            self.gc.free_list(list);
        }
        debug_assert!(self.gc.pool.is_empty());
        tracing::info!(
            freed = self.gc.stats.objects_freed,
            remaining_bytes = self.gc.total_bytes(),
            "runtime closed"
        );
        self.gc.stats.clone()
    }
}
