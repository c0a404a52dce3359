//! Shared types for the netweave engine.
//!
//! This crate defines the module IR the engine consumes and mutates, source
//! spans, the structured error type, and the nested diagnostic stream used
//! by every later stage.

mod diagnostics;
mod error;
mod span;
pub mod body;
pub mod ir;
pub mod rpc;

pub use diagnostics::{Diagnostics, LogEntry, LogLevel};
pub use error::{ErrorCategory, ErrorCode, Subject, WeaveError};
pub use span::Span;

/// Result type used throughout the engine.
pub type WeaveResult<T> = std::result::Result<T, WeaveError>;

/// Size in bytes of one word, the addressing unit of every generated layout.
pub const WORD_SIZE: u32 = 4;

/// Number of words needed to hold `bytes` bytes.
pub fn words_for_bytes(bytes: u32) -> u32 {
    bytes.div_ceil(WORD_SIZE)
}
