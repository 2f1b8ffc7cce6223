use smol_str::SmolStr;

/// Immutable string payload. All strings are interned, so two live string
/// objects never share the same content.
#[derive(Debug, Clone)]
pub struct LuaString {
    data: SmolStr,
    hash: u64,
}

/// sizeof(TString) on a 64-bit build
pub(crate) const STRING_HEADER_SIZE: usize = 24;

impl LuaString {
    pub(crate) fn new(data: &str, hash: u64) -> Self {
        LuaString {
            data: SmolStr::new(data),
            hash,
        }
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        self.data.as_str()
    }

    #[inline(always)]
    pub fn hash(&self) -> u64 {
        self.hash
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn estimated_size(&self) -> usize {
        STRING_HEADER_SIZE + self.data.len() + 1
    }
}
