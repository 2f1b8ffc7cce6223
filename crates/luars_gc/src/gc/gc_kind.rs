/// Type tag of a collectable object
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcObjectKind {
    String = 0,
    Table = 1,
    Function = 2,
    Upvalue = 3,
    Proto = 4,
    Userdata = 5,
    Thread = 6,
}

impl GcObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            GcObjectKind::String => "string",
            GcObjectKind::Table => "table",
            GcObjectKind::Function => "function",
            GcObjectKind::Upvalue => "upvalue",
            GcObjectKind::Proto => "proto",
            GcObjectKind::Userdata => "userdata",
            GcObjectKind::Thread => "thread",
        }
    }
}
