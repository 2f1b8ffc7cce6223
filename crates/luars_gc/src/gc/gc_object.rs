use crate::gc::{GcHeader, GcId, GcList, GcObjectKind};
use crate::lua_value::{
    LuaFunction, LuaProto, LuaString, LuaTable, LuaThread, LuaUserdata, LuaValue, UPVALUE_SIZE,
    Upvalue,
};

/// Payload of a collectable object
#[derive(Debug, Clone)]
pub enum GcBody {
    String(LuaString),
    Table(LuaTable),
    Function(LuaFunction),
    Upvalue(Upvalue),
    Proto(LuaProto),
    Userdata(LuaUserdata),
    Thread(LuaThread),
}

impl GcBody {
    pub fn kind(&self) -> GcObjectKind {
        match self {
            GcBody::String(_) => GcObjectKind::String,
            GcBody::Table(_) => GcObjectKind::Table,
            GcBody::Function(_) => GcObjectKind::Function,
            GcBody::Upvalue(_) => GcObjectKind::Upvalue,
            GcBody::Proto(_) => GcObjectKind::Proto,
            GcBody::Userdata(_) => GcObjectKind::Userdata,
            GcBody::Thread(_) => GcObjectKind::Thread,
        }
    }

    /// Bytes charged against the debt when the object is created
    pub(crate) fn estimated_size(&self) -> usize {
        match self {
            GcBody::String(s) => s.estimated_size(),
            GcBody::Table(t) => t.estimated_size(),
            GcBody::Function(f) => f.estimated_size(),
            GcBody::Upvalue(_) => UPVALUE_SIZE,
            GcBody::Proto(p) => p.estimated_size(),
            GcBody::Userdata(u) => u.estimated_size(),
            GcBody::Thread(t) => t.estimated_size(),
        }
    }

    /// Visit every strong outgoing reference. Weak proto caches are skipped;
    /// weak table entries are not, the caller decides what weakness means.
    pub(crate) fn for_each_ref(&self, mut f: impl FnMut(GcId)) {
        match self {
            GcBody::String(_) => {}
            GcBody::Table(t) => {
                if let Some(mt) = t.metatable {
                    f(mt);
                }
                for (k, v) in t.iter() {
                    visit_value(k, &mut f);
                    visit_value(v, &mut f);
                }
            }
            GcBody::Function(LuaFunction::Lua { proto, upvalues }) => {
                f(*proto);
                for uv in upvalues {
                    f(*uv);
                }
            }
            GcBody::Function(LuaFunction::C { upvalues, .. }) => {
                for v in upvalues {
                    visit_value(v, &mut f);
                }
            }
            // an open upvalue does not keep its thread alive
            GcBody::Upvalue(Upvalue::Open { .. }) => {}
            GcBody::Upvalue(Upvalue::Closed(v)) => visit_value(v, &mut f),
            GcBody::Proto(p) => {
                for id in p.source.iter().chain(p.protos.iter()) {
                    f(*id);
                }
                for v in &p.constants {
                    visit_value(v, &mut f);
                }
                for id in p.upvalue_names.iter().chain(p.local_names.iter()).flatten() {
                    f(*id);
                }
            }
            GcBody::Userdata(u) => {
                if let Some(mt) = u.metatable {
                    f(mt);
                }
                visit_value(&u.user_value, &mut f);
            }
            GcBody::Thread(th) => {
                for v in th.live() {
                    visit_value(v, &mut f);
                }
                for uv in &th.open_upvalues {
                    f(*uv);
                }
            }
        }
    }
}

#[inline]
fn visit_value(v: &LuaValue, f: &mut impl FnMut(GcId)) {
    if let Some(id) = v.as_gc_id() {
        f(id);
    }
}

/// Arena slot content: header, intrusive list link and payload
#[derive(Debug, Clone)]
pub struct GcObject {
    pub header: GcHeader,
    pub(crate) next: Option<GcId>,
    pub(crate) list: GcList,
    pub body: GcBody,
}

impl GcObject {
    pub(crate) fn new(header: GcHeader, body: GcBody) -> Self {
        GcObject {
            header,
            next: None,
            list: GcList::AllGc,
            body,
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> GcObjectKind {
        self.body.kind()
    }

    #[inline(always)]
    pub fn list(&self) -> GcList {
        self.list
    }

    pub fn as_string(&self) -> Option<&LuaString> {
        match &self.body {
            GcBody::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&LuaTable> {
        match &self.body {
            GcBody::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_table_mut(&mut self) -> Option<&mut LuaTable> {
        match &mut self.body {
            GcBody::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&LuaFunction> {
        match &self.body {
            GcBody::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut LuaFunction> {
        match &mut self.body {
            GcBody::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&Upvalue> {
        match &self.body {
            GcBody::Upvalue(uv) => Some(uv),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut Upvalue> {
        match &mut self.body {
            GcBody::Upvalue(uv) => Some(uv),
            _ => None,
        }
    }

    pub fn as_proto(&self) -> Option<&LuaProto> {
        match &self.body {
            GcBody::Proto(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_proto_mut(&mut self) -> Option<&mut LuaProto> {
        match &mut self.body {
            GcBody::Proto(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<&LuaUserdata> {
        match &self.body {
            GcBody::Userdata(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_userdata_mut(&mut self) -> Option<&mut LuaUserdata> {
        match &mut self.body {
            GcBody::Userdata(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_thread(&self) -> Option<&LuaThread> {
        match &self.body {
            GcBody::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_thread_mut(&mut self) -> Option<&mut LuaThread> {
        match &mut self.body {
            GcBody::Thread(t) => Some(t),
            _ => None,
        }
    }

    /// Metatable of a table or userdata
    pub fn metatable(&self) -> Option<GcId> {
        match &self.body {
            GcBody::Table(t) => t.metatable,
            GcBody::Userdata(u) => u.metatable,
            _ => None,
        }
    }

    /// The value a mutator would see for this object, if it has one.
    pub fn as_value(&self, id: GcId) -> Option<LuaValue> {
        match self.kind() {
            GcObjectKind::String => Some(LuaValue::String(id)),
            GcObjectKind::Table => Some(LuaValue::Table(id)),
            GcObjectKind::Function => Some(LuaValue::Function(id)),
            GcObjectKind::Userdata => Some(LuaValue::Userdata(id)),
            GcObjectKind::Thread => Some(LuaValue::Thread(id)),
            GcObjectKind::Upvalue | GcObjectKind::Proto => None,
        }
    }
}
