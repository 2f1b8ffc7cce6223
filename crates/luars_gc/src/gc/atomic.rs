// Atomic phase: runs to completion with no mutator steps in between.

use crate::gc::{GC, GcId, GcState};
use crate::lua_value::LuaValue;

impl GC {
    /// atomic: finish marking, resolve weak tables, separate finalizable
    /// objects and flip the current white. Returns the work performed.
    pub(crate) fn atomic(&mut self) -> isize {
        let grayagain = std::mem::take(&mut self.grayagain);
        self.gc_state = GcState::Atomic;
        self.gc_memtrav = 0;

        // roots may have been changed by the API since the cycle started
        self.mark_roots();
        self.remark_upvalues();
        self.propagate_all();
        let mut work = self.gc_memtrav;

        // objects touched by backward barriers, weak tables and threads
        self.gray = grayagain;
        self.propagate_all();
        self.gc_memtrav = 0;
        self.converge_ephemerons();

        // all strongly reachable objects are marked now
        self.clear_by_values(0, 0);
        let orig_weak = self.weak.len();
        let orig_all = self.allweak.len();
        work += self.gc_memtrav;

        self.separate_tobefnz(false);
        self.gc_finnum = self.option.finalizer_quota.max(1);
        self.mark_being_finalized();
        self.propagate_all();
        self.gc_memtrav = 0;
        self.converge_ephemerons();

        // resurrected objects are marked now
        self.clear_by_keys();
        self.clear_by_values(orig_weak, orig_all);

        self.current_white = self.current_white.other();
        work += self.gc_memtrav;
        tracing::debug!(work, total_bytes = self.total_bytes(), "gc atomic");
        work
    }

    /// convergeephemerons: repeat ephemeron traversals until nothing new
    /// gets marked.
    pub(crate) fn converge_ephemerons(&mut self) {
        loop {
            let tables = std::mem::take(&mut self.ephemeron);
            let mut changed = false;
            for id in tables {
                if self.traverse_ephemeron(id) {
                    self.propagate_all();
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// clearkeys: drop entries with unmarked keys from every ephemeron and
    /// all-weak table.
    fn clear_by_keys(&mut self) {
        let tables: Vec<GcId> = self
            .ephemeron
            .iter()
            .chain(self.allweak.iter())
            .copied()
            .collect();
        for id in tables {
            let dead = self.collect_cleared(id, true);
            self.remove_keys(id, dead);
        }
    }

    /// clearvalues: drop entries with unmarked values, starting at the given
    /// positions of `weak` and `allweak`.
    fn clear_by_values(&mut self, weak_from: usize, all_from: usize) {
        let tables: Vec<GcId> = self.weak[weak_from.min(self.weak.len())..]
            .iter()
            .chain(self.allweak[all_from.min(self.allweak.len())..].iter())
            .copied()
            .collect();
        for id in tables {
            let dead = self.collect_cleared(id, false);
            self.remove_keys(id, dead);
        }
    }

    fn collect_cleared(&mut self, id: GcId, by_key: bool) -> Vec<LuaValue> {
        let mut dead = Vec::new();
        for (k, v) in self.table_entries(id) {
            let checked = if by_key { k } else { v };
            if self.is_cleared(&checked) {
                dead.push(k);
            }
        }
        dead
    }

    fn remove_keys(&mut self, id: GcId, keys: Vec<LuaValue>) {
        if keys.is_empty() {
            return;
        }
        if let Some(table) = self.pool.get_mut(id).and_then(|o| o.as_table_mut()) {
            for k in keys {
                table.raw_set(k, LuaValue::Nil);
            }
        }
    }
}
