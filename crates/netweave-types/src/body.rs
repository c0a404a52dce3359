//! Method bodies: statements and expressions.
//!
//! Bodies are small structured trees rather than an instruction stream, so
//! the engine can match accessor shapes, capture initializer templates and
//! splice generated code without stack bookkeeping. Buffer access is
//! explicit: a pointer expression, a word offset, and a typed load or store.

use serde::{Deserialize, Serialize};

use crate::ir::{ScalarKind, TypeId, VectorKind};
use crate::rpc::Channel;

// ══════════════════════════════════════════════════════════════════════════════
// Statements
// ══════════════════════════════════════════════════════════════════════════════

/// A statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    /// `let name = value;`
    Let { name: String, value: Expr },
    /// `place = value;`
    Assign { place: Place, value: Expr },
    /// Typed store of `value` at `ptr`.
    Store {
        scalar: ScalarKind,
        ptr: Expr,
        value: Expr,
    },
    /// Expression evaluated for its side effects.
    Expr { expr: Expr },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        #[serde(default)]
        otherwise: Vec<Stmt>,
    },
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
    },
}

impl Stmt {
    pub fn let_(name: impl Into<String>, value: Expr) -> Self {
        Self::Let {
            name: name.into(),
            value,
        }
    }

    pub fn assign(place: Place, value: Expr) -> Self {
        Self::Assign { place, value }
    }

    pub fn expr(expr: Expr) -> Self {
        Self::Expr { expr }
    }

    pub fn if_then(cond: Expr, then: Vec<Stmt>) -> Self {
        Self::If {
            cond,
            then,
            otherwise: Vec::new(),
        }
    }

    pub fn ret(value: Expr) -> Self {
        Self::Return { value: Some(value) }
    }

    pub fn ret_void() -> Self {
        Self::Return { value: None }
    }

    /// Whether any expression inside this statement satisfies `pred`.
    pub fn any_expr(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        match self {
            Self::Let { value, .. } => value.any(pred),
            Self::Assign { place, value } => place.any_expr(pred) || value.any(pred),
            Self::Store { ptr, value, .. } => ptr.any(pred) || value.any(pred),
            Self::Expr { expr } => expr.any(pred),
            Self::If {
                cond,
                then,
                otherwise,
            } => {
                cond.any(pred)
                    || then.iter().any(|s| s.any_expr(pred))
                    || otherwise.iter().any(|s| s.any_expr(pred))
            }
            Self::Return { value } => value.as_ref().is_some_and(|v| v.any(pred)),
        }
    }

    /// Rewrite every expression (children first) and every assigned place
    /// in this statement and its nested blocks.
    pub fn rewrite(
        &mut self,
        exprs: &mut dyn FnMut(&mut Expr),
        places: &mut dyn FnMut(&mut Place),
    ) {
        match self {
            Self::Let { value, .. } => value.rewrite(exprs),
            Self::Assign { place, value } => {
                place.rewrite_targets(exprs);
                places(place);
                value.rewrite(exprs);
            }
            Self::Store { ptr, value, .. } => {
                ptr.rewrite(exprs);
                value.rewrite(exprs);
            }
            Self::Expr { expr } => expr.rewrite(exprs),
            Self::If {
                cond,
                then,
                otherwise,
            } => {
                cond.rewrite(exprs);
                for stmt in then.iter_mut().chain(otherwise.iter_mut()) {
                    stmt.rewrite(exprs, places);
                }
            }
            Self::Return { value } => {
                if let Some(value) = value {
                    value.rewrite(exprs);
                }
            }
        }
    }
}

/// An assignable location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "place", rename_all = "snake_case")]
pub enum Place {
    Local { name: String },
    /// A stored field on an object.
    Field { target: Expr, name: String },
    StaticField { ty: TypeId, name: String },
    /// A property; assignment runs its setter.
    Member { target: Expr, name: String },
}

impl Place {
    pub fn local(name: impl Into<String>) -> Self {
        Self::Local { name: name.into() }
    }

    pub fn this_field(name: impl Into<String>) -> Self {
        Self::Field {
            target: Expr::This,
            name: name.into(),
        }
    }

    pub fn this_member(name: impl Into<String>) -> Self {
        Self::Member {
            target: Expr::This,
            name: name.into(),
        }
    }

    fn any_expr(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        match self {
            Self::Field { target, .. } | Self::Member { target, .. } => target.any(pred),
            Self::Local { .. } | Self::StaticField { .. } => false,
        }
    }

    fn rewrite_targets(&mut self, exprs: &mut dyn FnMut(&mut Expr)) {
        match self {
            Self::Field { target, .. } | Self::Member { target, .. } => target.rewrite(exprs),
            Self::Local { .. } | Self::StaticField { .. } => {}
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Expressions
// ══════════════════════════════════════════════════════════════════════════════

/// A literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "lit", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    /// The zero value of whatever type is expected.
    Default,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Container contents; dictionary entries are two-element lists.
    List(Vec<Literal>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
    BitNot,
}

/// A method named by its declaring type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRef {
    pub ty: TypeId,
    pub name: String,
}

impl MethodRef {
    pub fn new(ty: TypeId, name: impl Into<String>) -> Self {
        Self {
            ty,
            name: name.into(),
        }
    }
}

/// How a call picks its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// Exactly the named method (or the nearest ancestor declaring it).
    #[default]
    Direct,
    /// The most derived override on the receiver's runtime type.
    Virtual,
}

/// An expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum Expr {
    Lit { value: Literal },
    Local { name: String },
    This,
    /// A stored field on an object.
    Field { target: Box<Expr>, name: String },
    StaticField { ty: TypeId, name: String },
    /// A property read; runs the getter.
    GetMember { target: Box<Expr>, name: String },
    Call {
        method: MethodRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver: Option<Box<Expr>>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        dispatch: Dispatch,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Numeric conversion to a scalar kind.
    Cast { to: ScalarKind, value: Box<Expr> },
    /// Pointer to the start of the object's state buffer (null when unattached).
    StatePtr { target: Box<Expr> },
    /// `ptr + words * WORD_SIZE`.
    PtrOffset { ptr: Box<Expr>, words: u32 },
    /// Typed load from `ptr`.
    Load { scalar: ScalarKind, ptr: Box<Expr> },
    /// Float to fixed-point: `round(value / accuracy)` as an i32.
    Quantize { accuracy: f32, value: Box<Expr> },
    /// Fixed-point to float: `value * accuracy`.
    Dequantize { accuracy: f32, value: Box<Expr> },
    MakeVector { kind: VectorKind, lanes: Vec<Expr> },
    /// One f32 lane of a vector value.
    Lane { value: Box<Expr>, index: u32 },
    /// A fresh zeroed instance of a type.
    New { ty: TypeId },
    Intrinsic { op: Intrinsic, args: Vec<Expr> },
}

impl Expr {
    pub fn lit(value: Literal) -> Self {
        Self::Lit { value }
    }

    pub fn int(value: i64) -> Self {
        Self::lit(Literal::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::lit(Literal::Bool(value))
    }

    pub fn null() -> Self {
        Self::lit(Literal::Null)
    }

    pub fn default_value() -> Self {
        Self::lit(Literal::Default)
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::Local { name: name.into() }
    }

    pub fn field(target: Expr, name: impl Into<String>) -> Self {
        Self::Field {
            target: Box::new(target),
            name: name.into(),
        }
    }

    pub fn this_field(name: impl Into<String>) -> Self {
        Self::field(Self::This, name)
    }

    pub fn member(target: Expr, name: impl Into<String>) -> Self {
        Self::GetMember {
            target: Box::new(target),
            name: name.into(),
        }
    }

    pub fn static_field(ty: TypeId, name: impl Into<String>) -> Self {
        Self::StaticField {
            ty,
            name: name.into(),
        }
    }

    /// Call a static method.
    pub fn call_static(method: MethodRef, args: Vec<Expr>) -> Self {
        Self::Call {
            method,
            receiver: None,
            args,
            dispatch: Dispatch::Direct,
        }
    }

    /// Call an instance method.
    pub fn call(method: MethodRef, receiver: Expr, args: Vec<Expr>, dispatch: Dispatch) -> Self {
        Self::Call {
            method,
            receiver: Some(Box::new(receiver)),
            args,
            dispatch,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn state_ptr(target: Expr) -> Self {
        Self::StatePtr {
            target: Box::new(target),
        }
    }

    /// Offset a pointer by whole words; zero offsets are folded away.
    pub fn offset(ptr: Expr, words: u32) -> Self {
        match (ptr, words) {
            (ptr, 0) => ptr,
            (Self::PtrOffset { ptr, words: inner }, words) => Self::PtrOffset {
                ptr,
                words: inner + words,
            },
            (ptr, words) => Self::PtrOffset {
                ptr: Box::new(ptr),
                words,
            },
        }
    }

    pub fn load(scalar: ScalarKind, ptr: Expr) -> Self {
        Self::Load {
            scalar,
            ptr: Box::new(ptr),
        }
    }

    pub fn intrinsic(op: Intrinsic, args: Vec<Expr>) -> Self {
        Self::Intrinsic { op, args }
    }

    /// An expression that traps with `message` when evaluated.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::intrinsic(Intrinsic::trap(message), Vec::new())
    }

    /// Whether evaluating this expression twice is observably the same as once.
    pub fn is_pure_leaf(&self) -> bool {
        matches!(
            self,
            Self::Lit { .. } | Self::Local { .. } | Self::This | Self::StaticField { .. }
        )
    }

    /// Whether this expression or any sub-expression satisfies `pred`.
    pub fn any(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Self::Lit { .. }
            | Self::Local { .. }
            | Self::This
            | Self::StaticField { .. }
            | Self::New { .. } => false,
            Self::Field { target, .. }
            | Self::GetMember { target, .. }
            | Self::StatePtr { target } => target.any(pred),
            Self::Call { receiver, args, .. } => {
                receiver.as_ref().is_some_and(|r| r.any(pred)) || args.iter().any(|a| a.any(pred))
            }
            Self::Binary { lhs, rhs, .. } => lhs.any(pred) || rhs.any(pred),
            Self::Unary { operand, .. } => operand.any(pred),
            Self::Cast { value, .. }
            | Self::Quantize { value, .. }
            | Self::Dequantize { value, .. }
            | Self::Lane { value, .. } => value.any(pred),
            Self::PtrOffset { ptr, .. } | Self::Load { ptr, .. } => ptr.any(pred),
            Self::MakeVector { lanes, .. } => lanes.iter().any(|l| l.any(pred)),
            Self::Intrinsic { args, .. } => args.iter().any(|a| a.any(pred)),
        }
    }

    /// Apply `f` to every sub-expression, children before parents.
    pub fn rewrite(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        match self {
            Self::Lit { .. }
            | Self::Local { .. }
            | Self::This
            | Self::StaticField { .. }
            | Self::New { .. } => {}
            Self::Field { target, .. }
            | Self::GetMember { target, .. }
            | Self::StatePtr { target } => target.rewrite(f),
            Self::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    receiver.rewrite(f);
                }
                for arg in args {
                    arg.rewrite(f);
                }
            }
            Self::Binary { lhs, rhs, .. } => {
                lhs.rewrite(f);
                rhs.rewrite(f);
            }
            Self::Unary { operand, .. } => operand.rewrite(f),
            Self::Cast { value, .. }
            | Self::Quantize { value, .. }
            | Self::Dequantize { value, .. }
            | Self::Lane { value, .. } => value.rewrite(f),
            Self::PtrOffset { ptr, .. } | Self::Load { ptr, .. } => ptr.rewrite(f),
            Self::MakeVector { lanes, .. } => {
                for lane in lanes {
                    lane.rewrite(f);
                }
            }
            Self::Intrinsic { args, .. } => {
                for arg in args {
                    arg.rewrite(f);
                }
            }
        }
        f(self);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Intrinsics
// ══════════════════════════════════════════════════════════════════════════════

/// Container shapes a view can present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    /// Packed scalars addressed by byte.
    FixedBuffer,
    Array,
    LinkedList,
    Dictionary,
}

/// Everything a view needs to interpret a raw region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub kind: ViewKind,
    pub capacity: u32,
    /// Words per element (per value for dictionaries).
    pub element_words: u32,
    #[serde(default)]
    pub key_words: u32,
    /// Codec type with static `read`/`write` for elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<TypeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_codec: Option<TypeId>,
    /// Element scalar of a fixed buffer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar: Option<ScalarKind>,
    /// Dictionary bucket count.
    #[serde(default)]
    pub buckets: u32,
}

/// Delivery flags applied to an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub channel: Channel,
    pub tick_aligned: bool,
    /// The message carries an explicit recipient player.
    pub targeted: bool,
}

/// Operations provided by the runtime. Argument conventions are listed per op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Intrinsic {
    // ── Buffer codecs ──
    /// `(ptr) -> string`
    ReadText { capacity: u32 },
    /// `(ptr, string)`; truncates to `capacity` code units.
    WriteText { capacity: u32 },
    /// `(ptr) -> struct` copy of a laid-out composite.
    ReadBlock { ty: TypeId, words: u32 },
    /// `(ptr, struct)`
    WriteBlock { words: u32 },
    /// `(value) -> bool`
    IsNull,
    /// `() -> !`
    Trap { message: String },

    // ── Views ──
    /// `(ptr) -> view`
    MakeView { spec: ViewSpec },
    /// `(view) -> int`
    ViewLen,
    /// `(view, index | key) -> value`
    ViewGet,
    /// `(view, index | key, value)`
    ViewSet,
    /// `(view, value)` appends to a linked list.
    ViewAdd,
    /// `(view, index | key) -> bool`
    ViewRemove,
    /// `(view, key) -> bool`
    ViewContains,
    /// `(view)`
    ViewClear,
    /// `(view, list)` replaces the contents.
    ViewFill,
    /// `(view) -> list`
    ViewSnapshot,

    // ── Runner and authority ──
    /// `(object) -> runner | null`
    Runner,
    /// `(runner) -> bool`
    IsResimulation,
    /// `(object) -> int` local authority bits over the object.
    AuthorityMask,
    /// `(object) -> int`, 0 for null.
    ObjectId,
    /// `(id) -> object | null`
    ResolveObject,
    /// `(runner, player) -> int` a `TargetClass` code.
    ClassifyTarget,
    /// `(runner) -> player`
    LocalPlayer,
    /// `(runner) -> rpc info` for a local invocation.
    LocalInfo { channel: Channel },

    // ── Messages ──
    /// `(runner) -> message` with room for `words` words.
    AllocMessage { words: u32 },
    /// `(message) -> ptr`
    MessagePtr,
    /// `(runner) -> int`
    NextSequence,
    /// `(message, player | null)`
    SetMessageFlags { flags: MessageFlags },
    /// `(runner, message)`
    SendMessage,
    /// `(message) -> rpc info`
    MessageInfo,
    /// `(local code, send code) -> invoke info`
    MakeInvokeInfo,
}

impl Intrinsic {
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }
}
