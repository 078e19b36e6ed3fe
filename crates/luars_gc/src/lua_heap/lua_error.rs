use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LuaError {
    /// The allocator refused a request even after an emergency collection
    #[error("not enough memory")]
    OutOfMemory,
    #[error("{0}")]
    RuntimeError(String),
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),
    /// A Lua closure was called but no interpreter is installed
    #[error("no interpreter installed to call a Lua function")]
    NoCaller,
    #[error("{0}")]
    InvalidKey(&'static str),
}

pub type LuaResult<T> = Result<T, LuaError>;
