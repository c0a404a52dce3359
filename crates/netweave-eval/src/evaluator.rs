//! Tree-walking evaluator for method bodies.
//!
//! Executes statements and expressions of the body IR against a [`Memory`],
//! an object table and the runner's [`NetState`]. Method lookup follows the
//! module: direct calls resolve from the named type upward, virtual calls
//! from the receiver's runtime type.

use std::collections::BTreeMap;
use std::rc::Rc;

use netweave_codegen::types::{
    RPC_HEADER_DISCRIMINATOR, RPC_HEADER_KEY, RPC_HEADER_OBJECT, RPC_HEADER_SEQUENCE,
};
use netweave_types::body::{BinaryOp, Dispatch, Expr, Intrinsic, Literal, Place, Stmt, UnaryOp};
use netweave_types::ir::{Module, Param, ScalarKind, TypeId, TypeRef};
use netweave_types::rpc::{Channel, LocalInvokeResult, RpcKey, RpcMask, SendCullResult};
use netweave_types::WORD_SIZE;

use crate::env::Environment;
use crate::error::{EvalError, EvalResult};
use crate::memory::Memory;
use crate::net::{NetState, SentMessage};
use crate::value::{mismatch, InvokeInfo, MessageId, ObjectId, Ptr, RpcInfo, Value, View};

/// Nested calls allowed before evaluation aborts.
const MAX_CALL_DEPTH: usize = 256;

/// Authority a freshly constructed object grants its local peer.
pub(crate) const DEFAULT_AUTHORITY: RpcMask = RpcMask(3);

/// `round(value / accuracy)`, saturated to the i32 range.
pub fn quantize(value: f64, accuracy: f32) -> i32 {
    let scaled = (value / f64::from(accuracy)).round();
    scaled.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

pub fn dequantize(value: i64, accuracy: f32) -> f64 {
    value as f64 * f64::from(accuracy)
}

/// One live object.
#[derive(Debug, Clone)]
pub(crate) struct ObjectRecord {
    pub ty: TypeId,
    pub fields: BTreeMap<String, Value>,
    /// State buffer; `None` until attached.
    pub state: Option<Ptr>,
    pub authority: RpcMask,
    pub destroyed: bool,
}

/// Control flow out of a block.
enum Flow {
    Normal,
    Return(Value),
}

/// The receiver and locals of one invocation.
struct Frame {
    this: Value,
    env: Environment,
}

/// Tree-walking evaluator with gas metering.
pub struct Evaluator {
    module: Rc<Module>,
    pub memory: Memory,
    objects: Vec<ObjectRecord>,
    statics: BTreeMap<(TypeId, String), Value>,
    pub net: NetState,
    /// Gas consumed so far.
    pub gas: u64,
    /// Maximum gas before [`EvalError::GasExhausted`].
    pub gas_limit: u64,
    depth: usize,
}

impl Evaluator {
    pub fn new(module: Module, gas_limit: u64) -> Self {
        Self {
            module: Rc::new(module),
            memory: Memory::new(),
            objects: Vec::new(),
            statics: BTreeMap::new(),
            net: NetState::default(),
            gas: 0,
            gas_limit,
            depth: 0,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub(crate) fn shared_module(&self) -> Rc<Module> {
        Rc::clone(&self.module)
    }

    /// Consume one unit of gas.
    fn tick(&mut self) -> EvalResult<()> {
        self.gas += 1;
        if self.gas > self.gas_limit {
            return Err(EvalError::GasExhausted);
        }
        Ok(())
    }

    pub fn reset_gas(&mut self) {
        self.gas = 0;
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Objects
    // ══════════════════════════════════════════════════════════════════════════

    pub(crate) fn object(&self, id: ObjectId) -> EvalResult<&ObjectRecord> {
        id.0.checked_sub(1)
            .and_then(|i| self.objects.get(i as usize))
            .ok_or_else(|| EvalError::NullAccess(format!("no object with id {}", id.0)))
    }

    pub(crate) fn object_mut(&mut self, id: ObjectId) -> EvalResult<&mut ObjectRecord> {
        id.0.checked_sub(1)
            .and_then(|i| self.objects.get_mut(i as usize))
            .ok_or_else(|| EvalError::NullAccess(format!("no object with id {}", id.0)))
    }

    /// A new unattached object with every declared field at its zero value.
    pub(crate) fn instantiate(&mut self, ty: TypeId) -> EvalResult<ObjectId> {
        let module = Rc::clone(&self.module);
        if module.get(ty).is_none() {
            return Err(EvalError::UnknownType(ty.to_string()));
        }
        let mut fields = BTreeMap::new();
        for t in std::iter::once(ty).chain(module.ancestors(ty)) {
            let Some(def) = module.get(t) else { continue };
            for field in def.fields.iter().filter(|f| !f.is_static) {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| zero_value(&field.ty));
            }
        }
        self.objects.push(ObjectRecord {
            ty,
            fields,
            state: None,
            authority: DEFAULT_AUTHORITY,
            destroyed: false,
        });
        Ok(ObjectId(self.objects.len() as u32))
    }

    /// Run the parameterless constructors of `ty` and its ancestors, bases first.
    pub(crate) fn run_constructors(&mut self, ty: TypeId, this: &Value) -> EvalResult<()> {
        let module = Rc::clone(&self.module);
        let mut chain = module.ancestors(ty);
        chain.reverse();
        chain.push(ty);
        for t in chain {
            let Some(def) = module.get(t) else { continue };
            if let Some(ctor) = def.constructors.iter().find(|c| c.params.is_empty()) {
                self.run_body(&ctor.params, &ctor.body, this.clone(), Vec::new())?;
            }
        }
        Ok(())
    }

    /// Runtime type of an object or composite value.
    pub(crate) fn type_of(&self, value: &Value) -> EvalResult<TypeId> {
        match value {
            Value::Object(id) => Ok(self.object(*id)?.ty),
            Value::Struct { ty, .. } => Ok(*ty),
            Value::Null => Err(EvalError::NullAccess("member access on null".into())),
            other => Err(mismatch("object or struct", other)),
        }
    }

    fn state_ptr(&self, value: &Value) -> EvalResult<Value> {
        match value {
            Value::Object(id) => Ok(self.object(*id)?.state.map_or(Value::Null, Value::Ptr)),
            Value::Struct { ptr, .. } => Ok(Value::Ptr(*ptr)),
            Value::Null => Err(EvalError::NullAccess("state of null".into())),
            other => Err(mismatch("object or struct", other)),
        }
    }

    fn resolve_object(&self, id: i64) -> Value {
        let Ok(id) = u32::try_from(id) else {
            return Value::Null;
        };
        match self.object(ObjectId(id)) {
            Ok(record) if !record.destroyed => Value::Object(ObjectId(id)),
            _ => Value::Null,
        }
    }

    /// A fresh zeroed value of `ty`: a composite buffer or an unattached object.
    pub(crate) fn new_value(&mut self, ty: TypeId) -> EvalResult<Value> {
        let module = Rc::clone(&self.module);
        let def = module
            .get(ty)
            .ok_or_else(|| EvalError::UnknownType(ty.to_string()))?;
        if def.is_composite() {
            let words = def
                .stamped_words()
                .ok_or_else(|| EvalError::NotLaidOut(def.name.clone()))?;
            return Ok(Value::Struct {
                ty,
                ptr: self.memory.alloc(words),
            });
        }
        Ok(Value::Object(self.instantiate(ty)?))
    }

    fn static_field(&self, ty: TypeId, name: &str) -> Value {
        if let Some(value) = self.statics.get(&(ty, name.to_string())) {
            return value.clone();
        }
        self.module
            .get(ty)
            .and_then(|def| def.field(name))
            .map_or(Value::Null, |f| zero_value(&f.ty))
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Calls
    // ══════════════════════════════════════════════════════════════════════════

    /// Call `name` as declared on `owner` (or inherited by it).
    pub fn invoke(
        &mut self,
        owner: TypeId,
        name: &str,
        this: Value,
        args: Vec<Value>,
        dispatch: Dispatch,
    ) -> EvalResult<Value> {
        let module = Rc::clone(&self.module);
        let start = match (dispatch, &this) {
            (Dispatch::Virtual, Value::Null) => {
                return Err(EvalError::NullAccess(format!(
                    "virtual call of {name} on null"
                )))
            }
            (Dispatch::Virtual, receiver) => self.type_of(receiver)?,
            (Dispatch::Direct, _) => owner,
        };
        let (_, method) = module.find_method(start, name).ok_or_else(|| {
            EvalError::UndefinedMethod(format!("{}::{name}", module.type_name(start)))
        })?;
        let this = if method.is_static { Value::Null } else { this };
        self.run_body(&method.params, &method.body, this, args)
    }

    pub fn call_static(&mut self, owner: TypeId, name: &str, args: Vec<Value>) -> EvalResult<Value> {
        self.invoke(owner, name, Value::Null, args, Dispatch::Direct)
    }

    pub(crate) fn run_body(
        &mut self,
        params: &[Param],
        body: &[Stmt],
        this: Value,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        if params.len() != args.len() {
            return Err(EvalError::TypeMismatch(format!(
                "expected {} argument(s), got {}",
                params.len(),
                args.len()
            )));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::Runtime("call depth exceeded".into()));
        }
        self.tick()?;
        let mut frame = Frame {
            this,
            env: Environment::new(),
        };
        for (param, arg) in params.iter().zip(args) {
            frame.env.define(&param.name, arg);
        }
        self.depth += 1;
        let flow = self.exec_block(&mut frame, body);
        self.depth -= 1;
        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    /// Run a property getter.
    pub fn get_member(&mut self, target: Value, name: &str) -> EvalResult<Value> {
        let module = Rc::clone(&self.module);
        let ty = self.type_of(&target)?;
        let (_, prop) = module.find_property(ty, name).ok_or_else(|| {
            EvalError::UndefinedMember(format!("{}.{name}", module.type_name(ty)))
        })?;
        let getter = prop.getter.as_ref().ok_or_else(|| {
            EvalError::UndefinedMember(format!("{}.{name} has no getter", module.type_name(ty)))
        })?;
        self.run_body(&[], getter, target, Vec::new())
    }

    /// Run a property setter with `value`.
    pub fn set_member(&mut self, target: Value, name: &str, value: Value) -> EvalResult<()> {
        let module = Rc::clone(&self.module);
        let ty = self.type_of(&target)?;
        let (_, prop) = module.find_property(ty, name).ok_or_else(|| {
            EvalError::UndefinedMember(format!("{}.{name}", module.type_name(ty)))
        })?;
        let setter = prop.setter.as_ref().ok_or_else(|| {
            EvalError::UndefinedMember(format!("{}.{name} has no setter", module.type_name(ty)))
        })?;
        let params = [Param::new("value", prop.ty.clone())];
        self.run_body(&params, setter, target, vec![value])?;
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Statements
    // ══════════════════════════════════════════════════════════════════════════

    fn exec_block(&mut self, frame: &mut Frame, stmts: &[Stmt]) -> EvalResult<Flow> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec_stmt(frame, stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, frame: &mut Frame, stmt: &Stmt) -> EvalResult<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value } => {
                let value = self.eval_expr(frame, value)?;
                frame.env.define(name, value);
            }
            Stmt::Assign { place, value } => self.assign(frame, place, value)?,
            Stmt::Store { scalar, ptr, value } => {
                let ptr = self.eval_expr(frame, ptr)?.as_ptr()?;
                let value = self.eval_expr(frame, value)?;
                self.memory.store(*scalar, ptr, &value)?;
            }
            Stmt::Expr { expr } => {
                self.eval_expr(frame, expr)?;
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let branch = if self.eval_expr(frame, cond)?.truthy()? {
                    then
                } else {
                    otherwise
                };
                frame.env.push_scope();
                let flow = self.exec_block(frame, branch);
                frame.env.pop_scope();
                return flow;
            }
            Stmt::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval_expr(frame, expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, frame: &mut Frame, place: &Place, value: &Expr) -> EvalResult<()> {
        match place {
            Place::Local { name } => {
                let value = self.eval_expr(frame, value)?;
                if !frame.env.set(name, value.clone()) {
                    frame.env.define(name, value);
                }
            }
            Place::Field { target, name } => {
                let target = self.eval_expr(frame, target)?;
                let value = self.eval_expr(frame, value)?;
                let id = target.as_object()?;
                self.object_mut(id)?.fields.insert(name.clone(), value);
            }
            Place::StaticField { ty, name } => {
                let value = self.eval_expr(frame, value)?;
                self.statics.insert((*ty, name.clone()), value);
            }
            Place::Member { target, name } => {
                let target = self.eval_expr(frame, target)?;
                let value = self.eval_expr(frame, value)?;
                self.set_member(target, name, value)?;
            }
        }
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Expressions
    // ══════════════════════════════════════════════════════════════════════════

    fn eval_expr(&mut self, frame: &mut Frame, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Lit { value } => Ok(literal_value(value)),
            Expr::Local { name } => frame
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UndefinedVariable(name.clone())),
            Expr::This => Ok(frame.this.clone()),
            Expr::Field { target, name } => {
                let target = self.eval_expr(frame, target)?;
                let record = self.object(target.as_object()?)?;
                record.fields.get(name).cloned().ok_or_else(|| {
                    EvalError::UndefinedMember(format!(
                        "{}.{name}",
                        self.module.type_name(record.ty)
                    ))
                })
            }
            Expr::StaticField { ty, name } => Ok(self.static_field(*ty, name)),
            Expr::GetMember { target, name } => {
                let target = self.eval_expr(frame, target)?;
                self.get_member(target, name)
            }
            Expr::Call {
                method,
                receiver,
                args,
                dispatch,
            } => {
                let this = match receiver {
                    Some(receiver) => {
                        let this = self.eval_expr(frame, receiver)?;
                        if this.is_null() {
                            return Err(EvalError::NullAccess(format!(
                                "call of {} on null",
                                method.name
                            )));
                        }
                        this
                    }
                    None => Value::Null,
                };
                let args = self.eval_args(frame, args)?;
                self.invoke(method.ty, &method.name, this, args, *dispatch)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval_expr(frame, lhs)?;
                match op {
                    BinaryOp::And if !lhs.truthy()? => Ok(Value::Bool(false)),
                    BinaryOp::Or if lhs.truthy()? => Ok(Value::Bool(true)),
                    BinaryOp::And | BinaryOp::Or => {
                        Ok(Value::Bool(self.eval_expr(frame, rhs)?.truthy()?))
                    }
                    _ => {
                        let rhs = self.eval_expr(frame, rhs)?;
                        binary(*op, &lhs, &rhs)
                    }
                }
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(frame, operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy()?)),
                    UnaryOp::Neg => match value {
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Ok(Value::Int(other.as_int()?.wrapping_neg())),
                    },
                    UnaryOp::BitNot => Ok(Value::Int(!value.as_int()?)),
                }
            }
            Expr::Cast { to, value } => {
                let value = self.eval_expr(frame, value)?;
                cast(*to, &value)
            }
            Expr::StatePtr { target } => {
                let target = self.eval_expr(frame, target)?;
                self.state_ptr(&target)
            }
            Expr::PtrOffset { ptr, words } => {
                let ptr = self.eval_expr(frame, ptr)?.as_ptr()?;
                Ok(Value::Ptr(ptr.add_words(*words)))
            }
            Expr::Load { scalar, ptr } => {
                let ptr = self.eval_expr(frame, ptr)?.as_ptr()?;
                self.memory.load(*scalar, ptr)
            }
            Expr::Quantize { accuracy, value } => {
                let value = self.eval_expr(frame, value)?.as_float()?;
                Ok(Value::Int(i64::from(quantize(value, *accuracy))))
            }
            Expr::Dequantize { accuracy, value } => {
                let value = self.eval_expr(frame, value)?.as_int()?;
                Ok(Value::Float(dequantize(value, *accuracy)))
            }
            Expr::MakeVector { lanes, .. } => {
                let lanes = lanes
                    .iter()
                    .map(|lane| self.eval_expr(frame, lane)?.as_float())
                    .collect::<EvalResult<Vec<f64>>>()?;
                Ok(Value::Vector(lanes))
            }
            Expr::Lane { value, index } => match self.eval_expr(frame, value)? {
                Value::Vector(lanes) => lanes
                    .get(*index as usize)
                    .map(|l| Value::Float(*l))
                    .ok_or_else(|| EvalError::IndexOutOfRange(format!("vector lane {index}"))),
                Value::Null => Ok(Value::Float(0.0)),
                other => Err(mismatch("vector", &other)),
            },
            Expr::New { ty } => self.new_value(*ty),
            Expr::Intrinsic { op, args } => {
                let args = self.eval_args(frame, args)?;
                self.intrinsic(op, args)
            }
        }
    }

    fn eval_args(&mut self, frame: &mut Frame, args: &[Expr]) -> EvalResult<Vec<Value>> {
        args.iter().map(|a| self.eval_expr(frame, a)).collect()
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Intrinsics
    // ══════════════════════════════════════════════════════════════════════════

    fn intrinsic(&mut self, op: &Intrinsic, args: Vec<Value>) -> EvalResult<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
        match op {
            // ── Buffer codecs ──
            Intrinsic::ReadText { capacity } => {
                let ptr = arg(0).as_ptr()?;
                Ok(Value::Text(self.memory.read_text(ptr, *capacity)?))
            }
            Intrinsic::WriteText { capacity } => {
                let ptr = arg(0).as_ptr()?;
                self.memory.write_text(ptr, &arg(1).as_text()?, *capacity)?;
                Ok(Value::Null)
            }
            Intrinsic::ReadBlock { ty, words } => {
                let from = arg(0).as_ptr()?;
                let to = self.memory.alloc(*words);
                self.memory.copy(from, to, block_bytes(*words))?;
                Ok(Value::Struct { ty: *ty, ptr: to })
            }
            Intrinsic::WriteBlock { words } => {
                let to = arg(0).as_ptr()?;
                match arg(1) {
                    Value::Struct { ptr, .. } => self.memory.copy(ptr, to, block_bytes(*words))?,
                    Value::Null => self.memory.zero(to, block_bytes(*words))?,
                    other => return Err(mismatch("struct", &other)),
                }
                Ok(Value::Null)
            }
            Intrinsic::IsNull => Ok(Value::Bool(arg(0).is_null())),
            Intrinsic::Trap { message } => Err(EvalError::Trap(message.clone())),

            // ── Views ──
            Intrinsic::MakeView { spec } => Ok(Value::View(Box::new(View {
                spec: spec.clone(),
                ptr: arg(0).as_ptr()?,
            }))),
            Intrinsic::ViewLen
            | Intrinsic::ViewGet
            | Intrinsic::ViewSet
            | Intrinsic::ViewAdd
            | Intrinsic::ViewRemove
            | Intrinsic::ViewContains
            | Intrinsic::ViewClear
            | Intrinsic::ViewFill
            | Intrinsic::ViewSnapshot => {
                let view = arg(0).as_view()?.clone();
                self.view_op(op, &view, &args[1.min(args.len())..])
            }

            // ── Runner and authority ──
            Intrinsic::Runner => match arg(0) {
                Value::Object(id) => {
                    let record = self.object(id)?;
                    Ok(if record.state.is_some() && !record.destroyed {
                        Value::Runner
                    } else {
                        Value::Null
                    })
                }
                Value::Null => Ok(Value::Null),
                other => Err(mismatch("object", &other)),
            },
            Intrinsic::IsResimulation => Ok(Value::Bool(self.net.resimulating)),
            Intrinsic::AuthorityMask => {
                let id = arg(0).as_object()?;
                Ok(Value::Int(i64::from(self.object(id)?.authority.bits())))
            }
            Intrinsic::ObjectId => match arg(0) {
                Value::Object(id) => Ok(Value::Int(i64::from(id.0))),
                Value::Null => Ok(Value::Int(0)),
                other => Err(mismatch("object", &other)),
            },
            Intrinsic::ResolveObject => Ok(self.resolve_object(arg(0).as_int()?)),
            Intrinsic::ClassifyTarget => {
                let player = arg(1).as_int()? as i32;
                Ok(Value::Int(self.net.classify(player).code()))
            }
            Intrinsic::LocalPlayer => Ok(Value::Int(i64::from(self.net.local_player))),
            Intrinsic::LocalInfo { channel } => Ok(Value::RpcInfo(RpcInfo {
                source: self.net.local_player,
                channel: *channel,
                tick_aligned: false,
                is_local: true,
            })),

            // ── Messages ──
            Intrinsic::AllocMessage { words } => {
                let ptr = self.memory.alloc(*words);
                Ok(Value::Message(self.net.add_message(ptr, *words)))
            }
            Intrinsic::MessagePtr => {
                let id = arg(0).as_message()?;
                Ok(Value::Ptr(self.net.message(id)?.ptr))
            }
            Intrinsic::NextSequence => Ok(Value::Int(self.net.next_sequence())),
            Intrinsic::SetMessageFlags { flags } => {
                let id = arg(0).as_message()?;
                let target = match arg(1) {
                    Value::Null => None,
                    player => Some(player.as_int()? as i32),
                };
                let record = self.net.message_mut(id)?;
                record.flags = Some(*flags);
                record.target = target;
                Ok(Value::Null)
            }
            Intrinsic::SendMessage => {
                let id = arg(1).as_message()?;
                self.net.send(id)?;
                tracing::trace!(message = id.0, "rpc message queued");
                Ok(Value::Null)
            }
            Intrinsic::MessageInfo => {
                let id = arg(0).as_message()?;
                let record = self.net.message(id)?;
                let (channel, tick_aligned) = record
                    .flags
                    .map_or((Channel::default(), false), |f| (f.channel, f.tick_aligned));
                Ok(Value::RpcInfo(RpcInfo {
                    source: record.source,
                    channel,
                    tick_aligned,
                    is_local: false,
                }))
            }
            Intrinsic::MakeInvokeInfo => {
                let local = arg(0).as_int()?;
                let send = arg(1).as_int()?;
                match (
                    LocalInvokeResult::from_code(local),
                    SendCullResult::from_code(send),
                ) {
                    (Some(local), Some(send)) => Ok(Value::InvokeInfo(InvokeInfo { local, send })),
                    _ => Err(EvalError::TypeMismatch(format!(
                        "invalid outcome codes {local}/{send}"
                    ))),
                }
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Messages
    // ══════════════════════════════════════════════════════════════════════════

    /// Decode the header of message `id`.
    pub fn describe_message(&self, id: MessageId) -> EvalResult<SentMessage> {
        let record = self.net.message(id)?;
        let word = |w: u32| self.memory.load_word(record.ptr.add_words(w));
        let discriminator = word(RPC_HEADER_DISCRIMINATOR)?;
        let raw_key = word(RPC_HEADER_KEY)?;
        let key = RpcKey::from_header(i64::from(discriminator), raw_key as u32).ok_or_else(|| {
            EvalError::Unroutable(format!(
                "message {} has discriminator {discriminator}",
                id.0
            ))
        })?;
        let flags = record.flags.ok_or_else(|| {
            EvalError::Runtime(format!("message {} has no delivery flags", id.0))
        })?;
        Ok(SentMessage {
            id,
            object: word(RPC_HEADER_OBJECT)?,
            key,
            sequence: word(RPC_HEADER_SEQUENCE)?,
            words: self.memory.words(record.ptr, record.words)?,
            channel: flags.channel,
            tick_aligned: flags.tick_aligned,
            target: record.target,
            source: record.source,
        })
    }

    /// Route message `id` to its receiver stub.
    ///
    /// Returns `false` when the addressed object no longer exists; the
    /// message is dropped, as a remote peer would drop it.
    pub fn deliver(&mut self, id: MessageId) -> EvalResult<bool> {
        let message = self.describe_message(id)?;
        let module = Rc::clone(&self.module);
        let route = match message.key {
            RpcKey::Instance(_) => {
                let Value::Object(object) = self.resolve_object(i64::from(message.object)) else {
                    tracing::debug!(object = message.object, "rpc target object is gone");
                    return Ok(false);
                };
                let ty = self.object(object)?.ty;
                std::iter::once(ty)
                    .chain(module.ancestors(ty))
                    .find_map(|t| route_in(&module, t, message.key))
            }
            RpcKey::Static(_) => module.type_ids().find_map(|t| route_in(&module, t, message.key)),
        };
        let (owner, receiver) = route
            .ok_or_else(|| EvalError::Unroutable(format!("no receiver for {:?}", message.key)))?;
        tracing::trace!(message = id.0, receiver = %receiver, "delivering rpc");
        self.call_static(owner, &receiver, vec![Value::Runner, Value::Message(id)])?;
        Ok(true)
    }
}

fn route_in(module: &Module, ty: TypeId, key: RpcKey) -> Option<(TypeId, String)> {
    module
        .get(ty)?
        .rpc_table
        .iter()
        .find(|e| e.key == key)
        .map(|e| (ty, e.receiver.clone()))
}

fn block_bytes(words: u32) -> usize {
    words as usize * WORD_SIZE as usize
}

/// Zero value of a declared field type.
pub(crate) fn zero_value(ty: &TypeRef) -> Value {
    match ty {
        TypeRef::Scalar(ScalarKind::Bool) => Value::Bool(false),
        TypeRef::Scalar(s) if s.is_float() => Value::Float(0.0),
        TypeRef::Scalar(_) | TypeRef::Player => Value::Int(0),
        TypeRef::String => Value::Text(String::new()),
        TypeRef::Vector(kind) => Value::Vector(vec![0.0; kind.lanes() as usize]),
        _ => Value::Null,
    }
}

pub(crate) fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null | Literal::Default => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Text(s) => Value::Text(s.clone()),
        Literal::List(items) => Value::List(items.iter().map(literal_value).collect()),
    }
}

/// Structural equality, numeric across int and float.
pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => i64::from(*a) == *b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => lhs == rhs,
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    let floats = matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_));
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
            _ if floats => Ok(Value::Float(lhs.as_float()? + rhs.as_float()?)),
            _ => Ok(Value::Int(lhs.as_int()?.wrapping_add(rhs.as_int()?))),
        },
        BinaryOp::Sub if floats => Ok(Value::Float(lhs.as_float()? - rhs.as_float()?)),
        BinaryOp::Sub => Ok(Value::Int(lhs.as_int()?.wrapping_sub(rhs.as_int()?))),
        BinaryOp::Mul if floats => Ok(Value::Float(lhs.as_float()? * rhs.as_float()?)),
        BinaryOp::Mul => Ok(Value::Int(lhs.as_int()?.wrapping_mul(rhs.as_int()?))),
        BinaryOp::Div if floats => Ok(Value::Float(lhs.as_float()? / rhs.as_float()?)),
        BinaryOp::Div => {
            let divisor = rhs.as_int()?;
            if divisor == 0 {
                return Err(EvalError::Runtime("division by zero".into()));
            }
            Ok(Value::Int(lhs.as_int()?.wrapping_div(divisor)))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = if floats {
                lhs.as_float()?.partial_cmp(&rhs.as_float()?)
            } else {
                Some(lhs.as_int()?.cmp(&rhs.as_int()?))
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::BitAnd => Ok(Value::Int(lhs.as_int()? & rhs.as_int()?)),
        BinaryOp::BitOr => Ok(Value::Int(lhs.as_int()? | rhs.as_int()?)),
        BinaryOp::And => Ok(Value::Bool(lhs.truthy()? && rhs.truthy()?)),
        BinaryOp::Or => Ok(Value::Bool(lhs.truthy()? || rhs.truthy()?)),
    }
}

fn cast(to: ScalarKind, value: &Value) -> EvalResult<Value> {
    Ok(match to {
        ScalarKind::Bool => Value::Bool(value.truthy()?),
        ScalarKind::F32 => Value::Float(f64::from(value.as_float()? as f32)),
        ScalarKind::F64 => Value::Float(value.as_float()?),
        ScalarKind::I8 => Value::Int(i64::from(value.as_int()? as i8)),
        ScalarKind::U8 => Value::Int(i64::from(value.as_int()? as u8)),
        ScalarKind::I16 => Value::Int(i64::from(value.as_int()? as i16)),
        ScalarKind::U16 | ScalarKind::Char => Value::Int(i64::from(value.as_int()? as u16)),
        ScalarKind::I32 => Value::Int(i64::from(value.as_int()? as i32)),
        ScalarKind::U32 => Value::Int(i64::from(value.as_int()? as u32)),
        ScalarKind::I64 | ScalarKind::U64 => Value::Int(value.as_int()?),
    })
}
