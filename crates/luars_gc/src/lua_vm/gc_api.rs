// Step driver, full collections and finalizer calls (luaC_step, luaC_fullgc,
// GCTM and the lua_gc entry points).

use crate::gc::{
    GCFINALIZECOST, GcKind, GcList, GcState, GcStats, HeapCheckError, STEPMULADJ, StepResult,
};
use crate::lua_value::{LuaFunction, LuaValue};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

/// How a `__gc` field can be called
enum Finalizer {
    Native(crate::lua_value::CFunction),
    Lua(LuaValue),
    None,
}

impl LuaVM {
    // ============ Step driver ============

    /// luaC_checkGC: do a step when the allocation debt is positive. The
    /// mutator calls this at its safe points.
    #[inline]
    pub fn check_gc(&mut self) -> LuaResult<()> {
        if self.gc.gc_debt <= 0 {
            return Ok(());
        }
        self.check_gc_slow()
    }

    #[cold]
    #[inline(never)]
    fn check_gc_slow(&mut self) -> LuaResult<()> {
        self.gc_step()
    }

    /// luaC_step: pay the current debt with collector work
    pub fn gc_step(&mut self) -> LuaResult<()> {
        let step_size = self.gc.option.step_size;
        if !self.gc.gc_running {
            // avoid being called too often
            self.gc.set_debt(-step_size * 10);
            return Ok(());
        }
        let mut debt = self.gc.get_debt();
        loop {
            let work = match self.gc.single_step() {
                StepResult::Work(work) => work,
                StepResult::CallFinalizers => {
                    self.run_a_few_finalizers()? as isize * GCFINALIZECOST
                }
            };
            debt -= work;
            if debt <= -step_size || self.gc.gc_state == GcState::Pause {
                break;
            }
        }
        tracing::trace!(state = ?self.gc.gc_state, debt, "gc step");
        if self.gc.gc_state == GcState::Pause {
            self.gc.set_pause();
        } else {
            let stepmul = self.gc.option.step_mul.max(1) as isize;
            // convert work units back into bytes
            self.gc.set_debt((debt / stepmul) * STEPMULADJ);
            self.run_a_few_finalizers()?;
        }
        Ok(())
    }

    /// lua_gc(LUA_GCSTEP): with `kb == 0` do one basic step, otherwise
    /// add `kb` kilobytes of debt first. Returns true when the step finished
    /// a cycle.
    pub fn collect_step(&mut self, kb: usize) -> LuaResult<bool> {
        let old_running = self.gc.gc_running;
        self.gc.gc_running = true;
        let result = if kb == 0 {
            self.gc.set_debt(0);
            self.gc_step()
        } else {
            let debt = (kb as isize).saturating_mul(1024) + self.gc.gc_debt;
            self.gc.set_debt(debt);
            self.check_gc()
        };
        self.gc.gc_running = old_running;
        result?;
        Ok(self.gc.gc_state == GcState::Pause)
    }

    /// luaC_runtilstate
    pub fn run_until_state(&mut self, state: GcState) -> LuaResult<()> {
        while self.gc.gc_state != state {
            if let StepResult::CallFinalizers = self.gc.single_step() {
                self.run_a_few_finalizers()?;
            }
        }
        Ok(())
    }

    /// luaC_fullgc: finish the pending cycle and run a complete new one.
    /// An emergency cycle calls no finalizers and does not shrink stacks.
    pub fn full_gc(&mut self, emergency: bool) -> LuaResult<()> {
        if self.gc.closing {
            return Ok(());
        }
        if emergency {
            self.gc.gc_kind = GcKind::Emergency;
            self.gc.stats.emergency_collections += 1;
            tracing::warn!(bytes = self.gc.total_bytes(), "emergency collection");
        } else {
            tracing::info!(bytes = self.gc.total_bytes(), "full collection");
        }
        if self.gc.keep_invariant() {
            // sweep everything back to white, no object is dead yet
            self.gc.enter_sweep();
        }
        let result = self.finish_full_cycle();
        self.gc.gc_kind = GcKind::Normal;
        result?;
        self.gc.set_pause();
        Ok(())
    }

    fn finish_full_cycle(&mut self) -> LuaResult<()> {
        self.run_until_state(GcState::Pause)?;
        // start a new collection
        self.run_until_state(GcState::Propagate)?;
        self.run_until_state(GcState::CallFin)?;
        debug_assert_eq!(self.gc.gc_estimate, self.gc.total_bytes());
        self.run_until_state(GcState::Pause)
    }

    // ============ Finalizers ============

    /// runafewfinalizers: call up to `gc_finnum` pending finalizers and
    /// double the batch while work remains.
    pub(crate) fn run_a_few_finalizers(&mut self) -> LuaResult<usize> {
        let quota = self.gc.gc_finnum.max(1);
        let mut called = 0;
        while called < quota && self.gc.pool.head(GcList::ToBeFnz).is_some() {
            self.call_finalizer()?;
            called += 1;
        }
        self.gc.gc_finnum = if self.gc.pool.head(GcList::ToBeFnz).is_none() {
            0
        } else {
            quota * 2
        };
        Ok(called)
    }

    /// GCTM: call the `__gc` metamethod of the next object in `tobefnz`.
    /// The object goes back to `allgc` first, so a finalizer runs at most
    /// once; it stays on the stack while its finalizer runs.
    fn call_finalizer(&mut self) -> LuaResult<()> {
        let main = self.main_thread();
        let saved_top = self.stack_top();
        // grow the stack while the object is still queued
        self.thread_set_top(main, saved_top + 2)?;
        self.thread_set_top(main, saved_top)?;
        let Some(id) = self.gc.udata_to_finalize() else {
            return Ok(());
        };
        let Some(obj) = self.gc.get(id) else {
            return Err(LuaError::DeadObject);
        };
        let Some(value) = obj.as_value(id) else {
            return Ok(());
        };
        let tm = self.gc.gc_metamethod(obj.metatable()).unwrap_or_default();
        let finalizer = match tm {
            LuaValue::CFunction(f) => Finalizer::Native(f),
            LuaValue::Function(fid) => match self.gc.get(fid).and_then(|o| o.as_function()) {
                Some(LuaFunction::C { func, .. }) => Finalizer::Native(*func),
                Some(LuaFunction::Lua { .. }) => Finalizer::Lua(tm),
                None => Finalizer::None,
            },
            _ => Finalizer::None,
        };

        self.thread_push(main, tm)?;
        self.thread_push(main, value)?;
        let running = self.gc.gc_running;
        // avoid collector steps inside the finalizer
        self.gc.gc_running = false;
        let result = match finalizer {
            Finalizer::Native(f) => f(self, &[value]),
            Finalizer::Lua(func) => match self.lua_call_hook {
                Some(hook) => hook(self, func, &[value]),
                None => {
                    tracing::warn!(%id, "no call hook installed, skipping Lua finalizer");
                    Ok(())
                }
            },
            Finalizer::None => Ok(()),
        };
        self.gc.gc_running = running;
        self.thread_set_top(main, saved_top)?;
        self.gc.stats.finalizers_called += 1;

        if let Err(e) = result {
            let msg = if self.error_message.is_empty() {
                "no message".to_string()
            } else {
                std::mem::take(&mut self.error_message)
            };
            tracing::warn!(%id, error = %e, message = %msg, "error in __gc metamethod");
            self.error_message = format!("error in __gc metamethod ({msg})");
            return Err(LuaError::GcMetamethod);
        }
        Ok(())
    }

    /// callallpendingfinalizers, errors are dropped. Without memory for the
    /// call the remaining objects are freed unfinalized.
    pub(crate) fn call_all_pending_finalizers(&mut self) {
        while self.gc.pool.head(GcList::ToBeFnz).is_some() {
            match self.call_finalizer() {
                Ok(()) => {}
                Err(LuaError::OutOfMemory) => {
                    tracing::warn!(
                        pending = self.gc.pool.len(GcList::ToBeFnz),
                        "no memory left to call finalizers"
                    );
                    self.error_message.clear();
                    break;
                }
                Err(_) => self.error_message.clear(),
            }
        }
    }

    // ============ Control ============

    /// lua_gc(LUA_GCSTOP)
    pub fn stop_gc(&mut self) {
        self.gc.gc_running = false;
    }

    /// lua_gc(LUA_GCRESTART)
    pub fn restart_gc(&mut self) {
        self.gc.set_debt(0);
        self.gc.gc_running = true;
    }

    pub fn is_gc_running(&self) -> bool {
        self.gc.gc_running
    }

    /// lua_gc(LUA_GCSETPAUSE), returns the previous value
    pub fn set_pause(&mut self, pause: i32) -> i32 {
        std::mem::replace(&mut self.gc.option.pause, pause)
    }

    /// lua_gc(LUA_GCSETSTEPMUL), returns the previous value
    pub fn set_step_mul(&mut self, step_mul: i32) -> i32 {
        // avoid ridiculous low values (and 0)
        std::mem::replace(&mut self.gc.option.step_mul, step_mul.max(40))
    }

    /// Bytes in use (lua_gc(LUA_GCCOUNT) * 1024 + LUA_GCCOUNTB)
    pub fn memory_in_use(&self) -> usize {
        self.gc.total_bytes().max(0) as usize
    }

    pub fn gc_state(&self) -> GcState {
        self.gc.gc_state
    }

    pub fn gc_stats(&self) -> &GcStats {
        &self.gc.stats
    }

    pub fn check_heap(&self) -> Result<(), HeapCheckError> {
        self.gc.check_heap()
    }
}
