//! Runtime error types for the reference runtime.

use thiserror::Error;

/// Evaluation error: traps raised by generated code, container misuse,
/// and malformed or inconsistent modules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// Generated guard fired (`Trap` intrinsic).
    #[error("trap: {0}")]
    Trap(String),
    /// A bounded container or text has no room left.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    /// Null object, state pointer or receiver.
    #[error("null access: {0}")]
    NullAccess(String),
    /// A load or store outside its buffer.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
    /// Unknown field or property, or a property without the needed accessor.
    #[error("undefined member: {0}")]
    UndefinedMember(String),
    #[error("undefined method: {0}")]
    UndefinedMethod(String),
    #[error("unknown type: {0}")]
    UnknownType(String),
    /// The type has no layout stamp.
    #[error("not laid out: {0}")]
    NotLaidOut(String),
    /// No receiver is registered for an incoming message.
    #[error("unroutable message: {0}")]
    Unroutable(String),
    #[error("gas exhausted")]
    GasExhausted,
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result alias for runtime operations.
pub type EvalResult<T> = Result<T, EvalError>;
