// Object creation and barrier-guarded mutation.
//
// New objects are not rooted: anything the caller keeps must be stored in a
// rooted place (a stack, the registry or a reachable table) before the next
// collector step or allocation, since an allocation may run an emergency
// collection.

use crate::gc::{GcBody, GcId, GcObjectKind};
use crate::lua_value::{
    CFunction, LuaFunction, LuaProto, LuaString, LuaTable, LuaThread, LuaUserdata, LuaValue,
    LuaValueKind, Upvalue,
};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

impl LuaVM {
    // ============ Allocation ============

    /// luaM_realloc_: charge a resize to the allocator. On failure run one
    /// emergency collection and retry before giving up.
    pub(crate) fn reserve(&mut self, old_size: usize, new_size: usize) -> LuaResult<()> {
        if self.gc.try_realloc(old_size, new_size).is_ok() {
            return Ok(());
        }
        self.emergency_collect(new_size)?;
        self.gc
            .try_realloc(old_size, new_size)
            .map_err(|_| self.out_of_memory(new_size))
    }

    fn emergency_collect(&mut self, requested: usize) -> LuaResult<()> {
        if !self.gc.option.emergency_gc || self.gc.closing {
            return Err(self.out_of_memory(requested));
        }
        tracing::warn!(
            requested,
            in_use = self.gc.allocator.in_use(),
            "allocation failed, running emergency collection"
        );
        self.full_gc(true)
    }

    fn out_of_memory(&mut self, requested: usize) -> LuaError {
        tracing::warn!(requested, "not enough memory");
        self.error_message = "not enough memory".to_string();
        LuaError::OutOfMemory
    }

    pub(crate) fn alloc_object(&mut self, body: GcBody) -> LuaResult<GcId> {
        let size = body.estimated_size();
        self.reserve(0, size)?;
        Ok(self.gc.link_new_object(body, size))
    }

    /// Re-account an object whose payload grew or shrank. An unrooted object
    /// may be freed by the emergency collection its growth runs; it is then
    /// reported dead.
    fn resize_object(&mut self, id: GcId) -> LuaResult<()> {
        let Some(obj) = self.gc.get(id) else {
            return Err(LuaError::DeadObject);
        };
        let old_size = obj.header.size() as usize;
        let new_size = obj.body.estimated_size();
        if old_size == new_size {
            return Ok(());
        }
        if self.gc.try_realloc(old_size, new_size).is_err() {
            self.emergency_collect(new_size)?;
            if self.gc.get(id).is_none() {
                return Err(LuaError::DeadObject);
            }
            self.gc
                .try_realloc(old_size, new_size)
                .map_err(|_| self.out_of_memory(new_size))?;
        }
        if let Some(obj) = self.gc.get_mut(id) {
            obj.header.set_size(new_size as u32);
        }
        Ok(())
    }

    // ============ Creation ============

    /// luaS_new: strings are interned, equal content gives the same value.
    pub fn create_string(&mut self, s: &str) -> LuaResult<LuaValue> {
        let hash = self.gc.strings.hash_string(s);
        if let Some(id) = self.gc.find_interned(hash, s) {
            return Ok(LuaValue::String(id));
        }
        let string = LuaString::new(s, hash);
        let size = string.estimated_size();
        self.reserve(0, size)?;
        Ok(LuaValue::String(self.gc.link_new_string(string, size)))
    }

    pub fn create_table(&mut self, capacity: usize) -> LuaResult<LuaValue> {
        let id = self.alloc_object(GcBody::Table(LuaTable::new(capacity)))?;
        Ok(LuaValue::Table(id))
    }

    pub fn create_userdata(&mut self, data: Vec<u8>) -> LuaResult<LuaValue> {
        let id = self.alloc_object(GcBody::Userdata(LuaUserdata::new(data)))?;
        Ok(LuaValue::Userdata(id))
    }

    pub fn create_thread(&mut self) -> LuaResult<LuaValue> {
        let id = self.alloc_object(GcBody::Thread(LuaThread::new()))?;
        Ok(LuaValue::Thread(id))
    }

    pub fn create_c_closure(
        &mut self,
        func: CFunction,
        upvalues: Vec<LuaValue>,
    ) -> LuaResult<LuaValue> {
        let id = self.alloc_object(GcBody::Function(LuaFunction::C { func, upvalues }))?;
        Ok(LuaValue::Function(id))
    }

    pub fn create_proto(&mut self, proto: LuaProto) -> LuaResult<GcId> {
        self.alloc_object(GcBody::Proto(proto))
    }

    /// A Lua closure over `proto`. It becomes the prototype's cached closure
    /// unless the prototype is already black, since the cache is written
    /// without a barrier.
    pub fn create_lua_closure(&mut self, proto: GcId, upvalues: Vec<GcId>) -> LuaResult<LuaValue> {
        self.expect_kind(proto, GcObjectKind::Proto)?;
        for &uv in &upvalues {
            self.expect_kind(uv, GcObjectKind::Upvalue)?;
        }
        let id = self.alloc_object(GcBody::Function(LuaFunction::Lua { proto, upvalues }))?;
        if !self.gc.is_black(proto) {
            if let Some(p) = self.gc.get_mut(proto).and_then(|o| o.as_proto_mut()) {
                p.cache = Some(id);
            }
        }
        Ok(LuaValue::Function(id))
    }

    /// A fresh closed upvalue holding `value`
    pub fn create_upvalue(&mut self, value: LuaValue) -> LuaResult<GcId> {
        self.alloc_object(GcBody::Upvalue(Upvalue::Closed(value)))
    }

    // ============ Handles ============

    fn expect_kind(&self, id: GcId, kind: GcObjectKind) -> LuaResult<()> {
        let obj = self.gc.get(id).ok_or(LuaError::DeadObject)?;
        if obj.header.is_dead(self.gc.current_white) {
            return Err(LuaError::DeadObject);
        }
        if obj.kind() != kind {
            return Err(LuaError::RuntimeError);
        }
        Ok(())
    }

    fn table_id(&mut self, table: LuaValue) -> LuaResult<GcId> {
        match table {
            LuaValue::Table(id) => {
                self.expect_kind(id, GcObjectKind::Table)?;
                Ok(id)
            }
            other => Err(self.error(format!("table expected, got {}", other.kind().name()))),
        }
    }

    fn thread_id(&mut self, thread: LuaValue) -> LuaResult<GcId> {
        match thread {
            LuaValue::Thread(id) => {
                self.expect_kind(id, GcObjectKind::Thread)?;
                Ok(id)
            }
            other => Err(self.error(format!("thread expected, got {}", other.kind().name()))),
        }
    }

    /// Is the object behind `value` still usable? Non-collectable values
    /// always are.
    pub fn is_alive(&self, value: LuaValue) -> bool {
        match value.as_gc_id() {
            Some(id) => self.gc.is_alive(id),
            None => true,
        }
    }

    /// Content of a string value
    pub fn string_content(&self, value: LuaValue) -> Option<&str> {
        let id = value.as_gc_id().filter(|_| value.is_string())?;
        self.gc.get(id).and_then(|o| o.as_string()).map(|s| s.as_str())
    }

    /// luaC_fix: the string is never collected
    pub fn fix_object(&mut self, value: LuaValue) -> LuaResult<()> {
        match value {
            LuaValue::String(id) => self.gc.fix_object(id),
            other => Err(self.error(format!("cannot fix a {}", other.kind().name()))),
        }
    }

    // ============ Tables ============

    pub fn table_get(&mut self, table: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
        let id = self.table_id(table)?;
        let Ok(key) = key.normalize_key() else {
            return Ok(LuaValue::Nil);
        };
        Ok(self
            .gc
            .get(id)
            .and_then(|o| o.as_table())
            .and_then(|t| t.raw_get(&key))
            .unwrap_or_default())
    }

    /// Raw store with the backward barrier. Storing nil removes the key.
    pub fn table_set(&mut self, table: LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        let id = self.table_id(table)?;
        let key = key.normalize_key()?;
        let Some(t) = self.gc.get_mut(id).and_then(|o| o.as_table_mut()) else {
            return Err(LuaError::DeadObject);
        };
        let previous = t.raw_set(key, value);

        let gc = &self.gc;
        let white_ref = [key, value]
            .iter()
            .any(|v| v.as_gc_id().is_some_and(|r| gc.is_white(r)));
        if white_ref {
            self.gc.barrier_back(id);
        }

        if let Err(e) = self.resize_object(id) {
            // roll the store back, the table stays as it was
            if let Some(t) = self.gc.get_mut(id).and_then(|o| o.as_table_mut()) {
                t.raw_set(key, previous.unwrap_or_default());
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn table_len(&mut self, table: LuaValue) -> LuaResult<usize> {
        let id = self.table_id(table)?;
        Ok(self.gc.get(id).and_then(|o| o.as_table()).map_or(0, |t| t.len()))
    }

    // ============ Metatables ============

    /// lua_setmetatable. Tables and userdata keep their own metatable and
    /// get registered for finalization when it has `__gc`; other types
    /// share one metatable per type.
    pub fn set_metatable(&mut self, value: LuaValue, mt: Option<LuaValue>) -> LuaResult<()> {
        let mt = match mt {
            None => None,
            Some(m) => Some(self.table_id(m)?),
        };
        let id = match value {
            LuaValue::Table(id) | LuaValue::Userdata(id) => id,
            other => return self.set_type_metatable(other.kind(), mt.map(LuaValue::Table)),
        };
        if !self.gc.is_alive(id) {
            return Err(LuaError::DeadObject);
        }
        let obj = self.gc.get_mut(id).ok_or(LuaError::DeadObject)?;
        match &mut obj.body {
            GcBody::Table(t) => t.metatable = mt,
            GcBody::Userdata(u) => u.metatable = mt,
            _ => return Err(LuaError::RuntimeError),
        }
        if let Some(mt) = mt {
            self.gc.barrier_forward(id, mt);
        }
        self.gc.check_finalizer(id, mt)
    }

    pub fn get_metatable(&self, value: LuaValue) -> Option<LuaValue> {
        let mt = match value {
            LuaValue::Table(id) | LuaValue::Userdata(id) => self.gc.get(id)?.metatable(),
            other => self.gc.roots.type_metatables[other.kind() as usize],
        };
        mt.map(LuaValue::Table)
    }

    /// Metatable shared by every value of a basic type. These are roots, so
    /// no barrier is needed.
    pub fn set_type_metatable(&mut self, kind: LuaValueKind, mt: Option<LuaValue>) -> LuaResult<()> {
        let mt = match mt {
            None => None,
            Some(m) => Some(self.table_id(m)?),
        };
        self.gc.roots.type_metatables[kind as usize] = mt;
        Ok(())
    }

    // ============ Userdata ============

    pub fn set_user_value(&mut self, userdata: LuaValue, value: LuaValue) -> LuaResult<()> {
        let LuaValue::Userdata(id) = userdata else {
            return Err(self.error("userdata expected"));
        };
        self.expect_kind(id, GcObjectKind::Userdata)?;
        if let Some(u) = self.gc.get_mut(id).and_then(|o| o.as_userdata_mut()) {
            u.user_value = value;
        }
        self.gc.barrier_value(id, &value);
        Ok(())
    }

    pub fn get_user_value(&self, userdata: LuaValue) -> LuaResult<LuaValue> {
        let LuaValue::Userdata(id) = userdata else {
            return Err(LuaError::RuntimeError);
        };
        self.gc
            .get(id)
            .and_then(|o| o.as_userdata())
            .map(|u| u.user_value)
            .ok_or(LuaError::DeadObject)
    }

    // ============ Closures & upvalues ============

    /// Store `value` as upvalue `index` of a native closure.
    pub fn set_c_upvalue(&mut self, closure: LuaValue, index: usize, value: LuaValue) -> LuaResult<()> {
        let LuaValue::Function(id) = closure else {
            return Err(self.error("function expected"));
        };
        match self.gc.get_mut(id).and_then(|o| o.as_function_mut()) {
            Some(LuaFunction::C { upvalues, .. }) if index < upvalues.len() => {
                upvalues[index] = value;
            }
            Some(_) => return Err(self.error("invalid upvalue index")),
            None => return Err(LuaError::DeadObject),
        }
        self.gc.barrier_value(id, &value);
        Ok(())
    }

    /// Make upvalue cell `uv` the `index`th upvalue of a Lua closure
    /// (lua_upvaluejoin).
    pub fn set_lua_upvalue(&mut self, closure: LuaValue, index: usize, uv: GcId) -> LuaResult<()> {
        let LuaValue::Function(id) = closure else {
            return Err(self.error("function expected"));
        };
        self.expect_kind(uv, GcObjectKind::Upvalue)?;
        match self.gc.get_mut(id).and_then(|o| o.as_function_mut()) {
            Some(LuaFunction::Lua { upvalues, .. }) if index < upvalues.len() => {
                upvalues[index] = uv;
            }
            Some(_) => return Err(self.error("invalid upvalue index")),
            None => return Err(LuaError::DeadObject),
        }
        self.gc.barrier_forward(id, uv);
        Ok(())
    }

    pub fn get_lua_upvalue(&self, closure: LuaValue, index: usize) -> LuaResult<GcId> {
        let LuaValue::Function(id) = closure else {
            return Err(LuaError::RuntimeError);
        };
        match self.gc.get(id).and_then(|o| o.as_function()) {
            Some(LuaFunction::Lua { upvalues, .. }) => {
                upvalues.get(index).copied().ok_or(LuaError::RuntimeError)
            }
            Some(LuaFunction::C { .. }) => Err(LuaError::RuntimeError),
            None => Err(LuaError::DeadObject),
        }
    }

    /// Current value of an upvalue cell
    pub fn upvalue_get(&self, uv: GcId) -> LuaResult<LuaValue> {
        let upvalue = self
            .gc
            .get(uv)
            .and_then(|o| o.as_upvalue())
            .copied()
            .ok_or(LuaError::DeadObject)?;
        Ok(self.gc.upvalue_value(&upvalue))
    }

    /// Write through an upvalue. Open upvalues write the stack slot (stacks
    /// are rescanned atomically); closed ones need the upvalue barrier.
    pub fn upvalue_set(&mut self, uv: GcId, value: LuaValue) -> LuaResult<()> {
        let upvalue = self
            .gc
            .get_mut(uv)
            .and_then(|o| o.as_upvalue_mut())
            .ok_or(LuaError::DeadObject)?;
        match *upvalue {
            Upvalue::Closed(_) => {
                *upvalue = Upvalue::Closed(value);
                self.gc.barrier_upvalue(uv);
            }
            Upvalue::Open { thread, level } => {
                if let Some(th) = self.gc.get_mut(thread).and_then(|o| o.as_thread_mut()) {
                    th.set_slot(level, value);
                }
            }
        }
        Ok(())
    }

    /// luaF_findupval: the open upvalue for stack slot `level`, created on
    /// first use. Threads with open upvalues join the twups set.
    pub fn find_upvalue(&mut self, thread: LuaValue, level: usize) -> LuaResult<GcId> {
        let th_id = self.thread_id(thread)?;
        let existing = {
            let th = self
                .gc
                .get(th_id)
                .and_then(|o| o.as_thread())
                .ok_or(LuaError::DeadObject)?;
            if level >= th.top() {
                return Err(self.error("upvalue level outside the live stack"));
            }
            th.open_upvalues.iter().copied().find(|&uv| {
                self.gc
                    .get(uv)
                    .and_then(|o| o.as_upvalue())
                    .and_then(|u| u.stack_level())
                    == Some(level)
            })
        };
        if let Some(uv) = existing {
            return Ok(uv);
        }

        let uv = self.alloc_object(GcBody::Upvalue(Upvalue::Open {
            thread: th_id,
            level,
        }))?;
        let levels: Vec<usize> = self.open_upvalue_levels(th_id);
        let mut join_twups = false;
        if let Some(th) = self.gc.get_mut(th_id).and_then(|o| o.as_thread_mut()) {
            let pos = levels.partition_point(|&l| l < level);
            th.open_upvalues.insert(pos, uv);
            if !th.in_twups {
                th.in_twups = true;
                join_twups = true;
            }
        }
        if join_twups {
            self.gc.twups.push(th_id);
        }
        Ok(uv)
    }

    fn open_upvalue_levels(&self, th_id: GcId) -> Vec<usize> {
        let Some(th) = self.gc.get(th_id).and_then(|o| o.as_thread()) else {
            return Vec::new();
        };
        th.open_upvalues
            .iter()
            .map(|&uv| {
                self.gc
                    .get(uv)
                    .and_then(|o| o.as_upvalue())
                    .and_then(|u| u.stack_level())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// luaF_close: close every open upvalue of `thread` at or above `level`.
    pub fn close_upvalues(&mut self, thread: LuaValue, level: usize) -> LuaResult<()> {
        let th_id = self.thread_id(thread)?;
        self.close_thread_upvalues(th_id, level);
        Ok(())
    }

    pub(crate) fn close_thread_upvalues(&mut self, th_id: GcId, level: usize) {
        let levels = self.open_upvalue_levels(th_id);
        let split = levels.partition_point(|&l| l < level);
        let Some(th) = self.gc.get_mut(th_id).and_then(|o| o.as_thread_mut()) else {
            return;
        };
        let closing = th.open_upvalues.split_off(split);
        let values: Vec<LuaValue> = levels[split..].iter().map(|&l| th.slot(l)).collect();
        for (uv, value) in closing.into_iter().zip(values) {
            let Some(obj) = self.gc.get_mut(uv) else {
                continue;
            };
            if let GcBody::Upvalue(upvalue) = &mut obj.body {
                *upvalue = Upvalue::Closed(value);
            }
            // an open upvalue may be gray, a closed one is never left gray
            if !obj.header.is_white() {
                obj.header.make_black();
                self.gc.barrier_value(uv, &value);
            }
        }
    }

    // ============ Stacks ============

    pub fn push(&mut self, value: LuaValue) -> LuaResult<()> {
        let main = self.main_thread();
        self.thread_push(main, value)
    }

    pub fn pop(&mut self) -> LuaResult<LuaValue> {
        let main = self.main_thread();
        self.thread_pop(main)
    }

    /// Value at absolute stack index `index` of the main thread
    pub fn stack_get(&self, index: usize) -> Option<LuaValue> {
        let main = self.gc.roots.main_thread?;
        self.gc.get(main)?.as_thread()?.get(index)
    }

    pub fn stack_set(&mut self, index: usize, value: LuaValue) -> LuaResult<()> {
        let main = self.main_thread();
        let th_id = self.thread_id(main)?;
        let stored = self
            .gc
            .get_mut(th_id)
            .and_then(|o| o.as_thread_mut())
            .is_some_and(|th| th.set(index, value));
        if stored {
            Ok(())
        } else {
            Err(self.error("stack index out of range"))
        }
    }

    pub fn stack_top(&self) -> usize {
        self.gc
            .roots
            .main_thread
            .and_then(|id| self.gc.get(id))
            .and_then(|o| o.as_thread())
            .map_or(0, |th| th.top())
    }

    pub fn set_top(&mut self, top: usize) -> LuaResult<()> {
        let main = self.main_thread();
        self.thread_set_top(main, top)
    }

    /// Stack writes need no barrier: threads are never black while the
    /// collector is marking.
    pub fn thread_push(&mut self, thread: LuaValue, value: LuaValue) -> LuaResult<()> {
        let th_id = self.thread_id(thread)?;
        let Some(th) = self.gc.get_mut(th_id).and_then(|o| o.as_thread_mut()) else {
            return Err(LuaError::DeadObject);
        };
        let (len, top) = (th.stack.len(), th.top());
        th.push(value);
        if th.stack.len() > len {
            self.pay_stack_growth(th_id, len, top)?;
        }
        Ok(())
    }

    /// Charge a grown stack, or shrink it back when memory runs out.
    fn pay_stack_growth(&mut self, th_id: GcId, len: usize, top: usize) -> LuaResult<()> {
        self.resize_object(th_id).inspect_err(|_| {
            if let Some(th) = self.gc.get_mut(th_id).and_then(|o| o.as_thread_mut()) {
                th.rollback_growth(len, top);
            }
        })
    }

    pub fn thread_pop(&mut self, thread: LuaValue) -> LuaResult<LuaValue> {
        let th_id = self.thread_id(thread)?;
        let top = self.thread_top(th_id);
        if top == 0 {
            return Err(self.error("stack is empty"));
        }
        self.close_thread_upvalues(th_id, top - 1);
        self.gc
            .get_mut(th_id)
            .and_then(|o| o.as_thread_mut())
            .and_then(|th| th.pop())
            .ok_or(LuaError::DeadObject)
    }

    /// Shrinking the stack closes the upvalues of the dropped slots.
    pub fn thread_set_top(&mut self, thread: LuaValue, top: usize) -> LuaResult<()> {
        let th_id = self.thread_id(thread)?;
        if top < self.thread_top(th_id) {
            self.close_thread_upvalues(th_id, top);
        }
        let Some(th) = self.gc.get_mut(th_id).and_then(|o| o.as_thread_mut()) else {
            return Err(LuaError::DeadObject);
        };
        let (len, old_top) = (th.stack.len(), th.top());
        th.set_top(top);
        if th.stack.len() > len {
            self.pay_stack_growth(th_id, len, old_top)?;
        }
        Ok(())
    }

    fn thread_top(&self, th_id: GcId) -> usize {
        self.gc
            .get(th_id)
            .and_then(|o| o.as_thread())
            .map_or(0, |th| th.top())
    }

    // ============ Prototypes ============

    pub fn proto_add_constant(&mut self, proto: GcId, value: LuaValue) -> LuaResult<()> {
        self.expect_kind(proto, GcObjectKind::Proto)?;
        if let Some(p) = self.gc.get_mut(proto).and_then(|o| o.as_proto_mut()) {
            p.constants.push(value);
        }
        self.gc.barrier_value(proto, &value);
        self.resize_object(proto).inspect_err(|_| {
            if let Some(p) = self.gc.get_mut(proto).and_then(|o| o.as_proto_mut()) {
                p.constants.pop();
            }
        })
    }

    pub fn proto_add_child(&mut self, proto: GcId, child: GcId) -> LuaResult<()> {
        self.expect_kind(proto, GcObjectKind::Proto)?;
        self.expect_kind(child, GcObjectKind::Proto)?;
        if let Some(p) = self.gc.get_mut(proto).and_then(|o| o.as_proto_mut()) {
            p.protos.push(child);
        }
        self.gc.barrier_forward(proto, child);
        self.resize_object(proto).inspect_err(|_| {
            if let Some(p) = self.gc.get_mut(proto).and_then(|o| o.as_proto_mut()) {
                p.protos.pop();
            }
        })
    }
}
