use smol_str::SmolStr;

/// Immutable string payload. Short strings are interned, long strings are not.
#[derive(Debug, Clone)]
pub struct LuaString {
    data: SmolStr,
    hash: u64,
    short: bool,
}

impl LuaString {
    pub(crate) fn new(s: &str, hash: u64, short: bool) -> Self {
        LuaString {
            data: SmolStr::new(s),
            hash,
            short,
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
    pub fn is_short(&self) -> bool {
        self.short
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn mem_size(&self) -> usize {
        std::mem::size_of::<LuaString>() + self.data.len() + 1
    }
}
