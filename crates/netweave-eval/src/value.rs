//! Runtime values.

use std::fmt;

use netweave_types::body::ViewSpec;
use netweave_types::ir::TypeId;
use netweave_types::rpc::{Channel, LocalInvokeResult, SendCullResult};
use netweave_types::WORD_SIZE;

use crate::error::{EvalError, EvalResult};

/// Handle of a live object. Id 0 is never issued; it encodes null on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

/// Handle of a message allocated by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub usize);

/// A byte address inside one of the runtime's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ptr {
    pub buffer: usize,
    pub byte: usize,
}

impl Ptr {
    pub fn new(buffer: usize, byte: usize) -> Self {
        Self { buffer, byte }
    }

    pub fn add_words(self, words: u32) -> Self {
        self.add_bytes(words as usize * WORD_SIZE as usize)
    }

    pub fn add_bytes(self, bytes: usize) -> Self {
        Self {
            byte: self.byte + bytes,
            ..self
        }
    }
}

/// A container region together with the parameters to interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub spec: ViewSpec,
    pub ptr: Ptr,
}

/// Metadata handed to an RPC body's info parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcInfo {
    /// Player that sent the call.
    pub source: i32,
    pub channel: Channel,
    pub tick_aligned: bool,
    /// The body runs on the calling peer.
    pub is_local: bool,
}

/// Outcome record returned by RPCs declared to return one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeInfo {
    pub local: LocalInvokeResult,
    pub send: SendCullResult,
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    /// Every integer kind, players and outcome codes.
    Int(i64),
    Float(f64),
    Text(String),
    Vector(Vec<f64>),
    /// A composite value held in its own buffer.
    Struct { ty: TypeId, ptr: Ptr },
    Object(ObjectId),
    Ptr(Ptr),
    View(Box<View>),
    Runner,
    Message(MessageId),
    RpcInfo(RpcInfo),
    InvokeInfo(InvokeInfo),
    /// Container snapshots and literal contents.
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Vector(_) => "vector",
            Self::Struct { .. } => "struct",
            Self::Object(_) => "object",
            Self::Ptr(_) => "pointer",
            Self::View(_) => "view",
            Self::Runner => "runner",
            Self::Message(_) => "message",
            Self::RpcInfo(_) => "rpc info",
            Self::InvokeInfo(_) => "invoke info",
            Self::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Condition value. Unset flags read as null and count as false.
    pub fn truthy(&self) -> EvalResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Null => Ok(false),
            Self::Int(i) => Ok(*i != 0),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_int(&self) -> EvalResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Float(f) => Ok(*f as i64),
            Self::Null => Ok(0),
            other => Err(mismatch("int", other)),
        }
    }

    pub fn as_float(&self) -> EvalResult<f64> {
        match self {
            Self::Float(f) => Ok(*f),
            Self::Int(i) => Ok(*i as f64),
            Self::Null => Ok(0.0),
            other => Err(mismatch("float", other)),
        }
    }

    pub fn as_text(&self) -> EvalResult<String> {
        match self {
            Self::Text(s) => Ok(s.clone()),
            Self::Null => Ok(String::new()),
            other => Err(mismatch("text", other)),
        }
    }

    pub fn as_ptr(&self) -> EvalResult<Ptr> {
        match self {
            Self::Ptr(p) => Ok(*p),
            Self::Null => Err(EvalError::NullAccess("null pointer".into())),
            other => Err(mismatch("pointer", other)),
        }
    }

    pub fn as_list(&self) -> EvalResult<&[Value]> {
        match self {
            Self::List(items) => Ok(items),
            Self::Null => Ok(&[]),
            other => Err(mismatch("list", other)),
        }
    }

    pub fn as_view(&self) -> EvalResult<&View> {
        match self {
            Self::View(view) => Ok(view),
            Self::Null => Err(EvalError::NullAccess("view of a detached member".into())),
            other => Err(mismatch("view", other)),
        }
    }

    pub fn as_object(&self) -> EvalResult<ObjectId> {
        match self {
            Self::Object(id) => Ok(*id),
            Self::Null => Err(EvalError::NullAccess("null object".into())),
            other => Err(mismatch("object", other)),
        }
    }

    pub fn as_message(&self) -> EvalResult<MessageId> {
        match self {
            Self::Message(id) => Ok(*id),
            other => Err(mismatch("message", other)),
        }
    }
}

pub(crate) fn mismatch(expected: &str, found: &Value) -> EvalError {
    EvalError::TypeMismatch(format!("expected {expected}, found {}", found.type_name()))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Vector(lanes) => {
                let lanes: Vec<String> = lanes.iter().map(|l| l.to_string()).collect();
                write!(f, "({})", lanes.join(", "))
            }
            Self::Struct { ty, .. } => write!(f, "struct {ty}"),
            Self::Object(id) => write!(f, "object {}", id.0),
            Self::Ptr(p) => write!(f, "ptr {}:{}", p.buffer, p.byte),
            Self::View(v) => write!(f, "view {:?}", v.spec.kind),
            Self::Runner => write!(f, "runner"),
            Self::Message(id) => write!(f, "message {}", id.0),
            Self::RpcInfo(info) => write!(f, "rpc info from {}", info.source),
            Self::InvokeInfo(info) => write!(f, "{:?}/{:?}", info.local, info.send),
            Self::List(items) => {
                let items: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.truthy().unwrap());
        assert!(Value::Bool(true).truthy().unwrap());
        assert!(Value::Int(2).truthy().unwrap());
        assert!(Value::Text("x".into()).truthy().is_err());
    }

    #[test]
    fn test_numeric_coercions() {
        assert_eq!(Value::Null.as_int().unwrap(), 0);
        assert_eq!(Value::Bool(true).as_int().unwrap(), 1);
        assert_eq!(Value::Int(3).as_float().unwrap(), 3.0);
        assert!(Value::Text("3".into()).as_int().is_err());
    }

    #[test]
    fn test_ptr_arithmetic() {
        let p = Ptr::new(2, 4).add_words(3);
        assert_eq!(p, Ptr::new(2, 16));
    }

    #[test]
    fn test_display() {
        let list = Value::List(vec![Value::Int(1), Value::Text("a".into())]);
        assert_eq!(list.to_string(), "[1, \"a\"]");
    }
}
