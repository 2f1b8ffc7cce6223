// Mark phase: gray propagation and per-type traversal

use crate::gc::{GC, GcBody, GcId, GcKind, GcList, GcObjectKind, GcState};
use crate::lua_value::{LuaFunction, LuaValue, Upvalue};

impl GC {
    #[inline]
    pub(crate) fn mark_value(&mut self, value: &LuaValue) {
        if let Some(id) = value.as_gc_id() {
            self.mark_object(id);
        }
    }

    /// reallymarkobject: white objects become gray and join the gray list.
    /// Strings have nothing to traverse and go straight to black; upvalues
    /// mark their value right away.
    pub(crate) fn mark_object(&mut self, id: GcId) {
        let Some(obj) = self.pool.get_mut(id) else {
            return;
        };
        if !obj.header.is_white() {
            return;
        }
        match &obj.body {
            GcBody::String(_) => {
                obj.header.make_black();
                self.gc_memtrav += obj.header.size() as isize;
            }
            GcBody::Upvalue(uv) => {
                let uv = *uv;
                // open upvalues are kept gray: their slot may still change
                if uv.is_open() {
                    obj.header.make_gray();
                } else {
                    obj.header.make_black();
                }
                self.gc_memtrav += obj.header.size() as isize;
                let value = self.upvalue_value(&uv);
                self.mark_value(&value);
            }
            _ => {
                obj.header.make_gray();
                self.gray.push(id);
            }
        }
    }

    /// Current value of an upvalue, reading the stack slot while it is open.
    pub(crate) fn upvalue_value(&self, uv: &Upvalue) -> LuaValue {
        match *uv {
            Upvalue::Closed(v) => v,
            Upvalue::Open { thread, level } => self
                .pool
                .get(thread)
                .and_then(|o| o.as_thread())
                .map(|th| th.slot(level))
                .unwrap_or_default(),
        }
    }

    /// Main thread, registry and basic-type metatables
    pub(crate) fn mark_roots(&mut self) {
        if let Some(th) = self.roots.main_thread {
            self.mark_object(th);
        }
        if let Some(reg) = self.roots.registry {
            self.mark_object(reg);
        }
        for i in 0..self.roots.type_metatables.len() {
            if let Some(mt) = self.roots.type_metatables[i] {
                self.mark_object(mt);
            }
        }
    }

    /// markbeingfnz: objects waiting for their finalizer stay alive
    pub(crate) fn mark_being_finalized(&mut self) {
        let pending: Vec<GcId> = self.pool.iter(GcList::ToBeFnz).collect();
        for id in pending {
            self.mark_object(id);
        }
    }

    /// propagatemark: traverse one gray object
    pub(crate) fn propagate_mark(&mut self) {
        let Some(id) = self.gray.pop() else {
            return;
        };
        let Some(obj) = self.pool.get_mut(id) else {
            return;
        };
        obj.header.make_black();
        let size = obj.header.size() as isize;
        match obj.kind() {
            GcObjectKind::Table => self.traverse_table(id),
            GcObjectKind::Function => self.traverse_function(id),
            GcObjectKind::Proto => self.traverse_proto(id),
            GcObjectKind::Thread => self.traverse_thread(id),
            GcObjectKind::Userdata => self.traverse_userdata(id),
            GcObjectKind::String | GcObjectKind::Upvalue => {}
        }
        self.gc_memtrav += size;
    }

    pub(crate) fn propagate_all(&mut self) {
        while !self.gray.is_empty() {
            self.propagate_mark();
        }
    }

    // ============ Tables ============

    /// Weakness of a table with metatable `mt`: (weak keys, weak values)
    pub(crate) fn weak_mode(&self, mt: Option<GcId>) -> (bool, bool) {
        let (Some(mt), Some(tm_mode)) = (mt, self.tm_mode) else {
            return (false, false);
        };
        let mode = self
            .pool
            .get(mt)
            .and_then(|o| o.as_table())
            .and_then(|t| t.raw_get(&LuaValue::String(tm_mode)));
        match mode {
            Some(LuaValue::String(sid)) => match self.pool.get(sid).and_then(|o| o.as_string()) {
                Some(s) => (s.as_str().contains('k'), s.as_str().contains('v')),
                None => (false, false),
            },
            _ => (false, false),
        }
    }

    pub(crate) fn table_entries(&self, id: GcId) -> Vec<(LuaValue, LuaValue)> {
        self.pool
            .get(id)
            .and_then(|o| o.as_table())
            .map(|t| t.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }

    fn traverse_table(&mut self, id: GcId) {
        let mt = self.pool.get(id).and_then(|o| o.metatable());
        if let Some(mt) = mt {
            self.mark_object(mt);
        }
        let (weak_keys, weak_values) = self.weak_mode(mt);
        if !weak_keys && !weak_values {
            self.traverse_strong_table(id);
            return;
        }
        // weak tables stay gray
        if let Some(obj) = self.pool.get_mut(id) {
            obj.header.make_gray();
        }
        if !weak_keys {
            self.traverse_weak_value(id);
        } else if !weak_values {
            self.traverse_ephemeron(id);
        } else {
            // nothing to traverse now
            self.allweak.push(id);
        }
    }

    fn traverse_strong_table(&mut self, id: GcId) {
        for (k, v) in self.table_entries(id) {
            self.mark_value(&k);
            self.mark_value(&v);
        }
    }

    fn traverse_weak_value(&mut self, id: GcId) {
        let mut has_clears = false;
        for (k, v) in self.table_entries(id) {
            self.mark_value(&k);
            if !has_clears && self.is_cleared(&v) {
                has_clears = true;
            }
        }
        if self.gc_state == GcState::Propagate {
            self.grayagain.push(id);
        } else if has_clears {
            self.weak.push(id);
        }
    }

    /// Mark values whose keys are already marked. Returns whether anything
    /// was marked.
    pub(crate) fn traverse_ephemeron(&mut self, id: GcId) -> bool {
        let mut marked = false;
        let mut has_clears = false;
        let mut has_ww = false;
        for (k, v) in self.table_entries(id) {
            if self.is_cleared(&k) {
                has_clears = true;
                if self.value_is_white(&v) {
                    has_ww = true;
                }
            } else if self.value_is_white(&v) {
                marked = true;
                self.mark_value(&v);
            }
        }
        if self.gc_state == GcState::Propagate {
            self.grayagain.push(id);
        } else if has_ww {
            self.ephemeron.push(id);
        } else if has_clears {
            self.allweak.push(id);
        }
        marked
    }

    #[inline]
    fn value_is_white(&self, v: &LuaValue) -> bool {
        v.as_gc_id().is_some_and(|id| self.is_white(id))
    }

    /// iscleared: may this entry be removed from a weak table? Strings are
    /// values, never weak references, so they are marked instead.
    pub(crate) fn is_cleared(&mut self, v: &LuaValue) -> bool {
        match v {
            LuaValue::String(id) => {
                self.mark_object(*id);
                false
            }
            _ => match v.as_gc_id() {
                Some(id) => self.pool.get(id).is_none_or(|o| o.header.is_white()),
                None => false,
            },
        }
    }

    // ============ Other objects ============

    fn traverse_function(&mut self, id: GcId) {
        let func = match self.pool.get(id).and_then(|o| o.as_function()) {
            Some(f) => f.clone(),
            None => return,
        };
        match func {
            LuaFunction::Lua { proto, upvalues } => {
                self.mark_object(proto);
                for uv in upvalues {
                    self.mark_object(uv);
                }
            }
            LuaFunction::C { upvalues, .. } => {
                for v in &upvalues {
                    self.mark_value(v);
                }
            }
        }
    }

    fn traverse_proto(&mut self, id: GcId) {
        let cache = self.pool.get(id).and_then(|o| o.as_proto()).and_then(|p| p.cache);
        if let Some(c) = cache {
            // the cache is weak
            if self.pool.get(c).is_none_or(|o| o.header.is_white()) {
                if let Some(p) = self.pool.get_mut(id).and_then(|o| o.as_proto_mut()) {
                    p.cache = None;
                }
            }
        }
        let Some(proto) = self.pool.get(id).and_then(|o| o.as_proto()) else {
            return;
        };
        let mut refs: Vec<GcId> = Vec::with_capacity(
            proto.protos.len() + proto.upvalue_names.len() + proto.local_names.len() + 1,
        );
        refs.extend(proto.source);
        refs.extend(proto.upvalue_names.iter().flatten());
        refs.extend(proto.protos.iter());
        refs.extend(proto.local_names.iter().flatten());
        let constants = proto.constants.clone();
        for v in &constants {
            self.mark_value(v);
        }
        for r in refs {
            self.mark_object(r);
        }
    }

    fn traverse_userdata(&mut self, id: GcId) {
        let Some(ud) = self.pool.get(id).and_then(|o| o.as_userdata()) else {
            return;
        };
        let mt = ud.metatable;
        let user_value = ud.user_value;
        if let Some(mt) = mt {
            self.mark_object(mt);
        }
        self.mark_value(&user_value);
    }

    /// Threads are traversed again in the atomic phase because stack writes
    /// are not guarded by barriers.
    fn traverse_thread(&mut self, id: GcId) {
        let in_propagate = self.gc_state == GcState::Propagate;
        let Some(th) = self.pool.get(id).and_then(|o| o.as_thread()) else {
            return;
        };
        let live: Vec<LuaValue> = th.live().to_vec();
        let upvalues = th.open_upvalues.clone();
        if in_propagate {
            if let Some(obj) = self.pool.get_mut(id) {
                obj.header.make_gray();
            }
            self.grayagain.push(id);
        }
        for v in &live {
            self.mark_value(v);
        }
        for uv in upvalues {
            self.mark_object(uv);
        }
        let atomic = self.gc_state == GcState::Atomic;
        let emergency = self.gc_kind == GcKind::Emergency;
        let mut relink = false;
        let mut shrunk = None;
        if let Some(th) = self.pool.get_mut(id).and_then(|o| o.as_thread_mut()) {
            if atomic {
                th.clear_dead_slots();
                // remark_upvalues may have dropped it from twups
                if !th.in_twups && th.has_open_upvalues() {
                    th.in_twups = true;
                    relink = true;
                }
            } else if !emergency {
                th.shrink_stack();
                shrunk = Some(th.estimated_size());
            }
        }
        if relink {
            self.twups.push(id);
        }
        if let Some(size) = shrunk {
            self.release_bytes(id, size);
        }
    }

    /// remarkupvals: threads that were not marked (or lost their upvalues)
    /// leave the twups set; values of their visited open upvalues are marked
    /// again since the stack may have changed without a barrier.
    pub(crate) fn remark_upvalues(&mut self) -> isize {
        let mut work = 0;
        let threads = std::mem::take(&mut self.twups);
        let mut kept = Vec::with_capacity(threads.len());
        for th_id in threads {
            work += 1;
            let Some(obj) = self.pool.get_mut(th_id) else {
                continue;
            };
            let white = obj.header.is_white();
            let Some(th) = obj.as_thread_mut() else {
                continue;
            };
            if !white && th.has_open_upvalues() {
                kept.push(th_id);
                continue;
            }
            th.in_twups = false;
            let upvalues = th.open_upvalues.clone();
            for uv in upvalues {
                work += 1;
                let Some(uv_obj) = self.pool.get(uv) else {
                    continue;
                };
                if uv_obj.header.is_white() {
                    continue;
                }
                if let Some(upvalue) = uv_obj.as_upvalue().copied() {
                    let value = self.upvalue_value(&upvalue);
                    self.mark_value(&value);
                }
            }
        }
        self.twups = kept;
        work
    }
}
