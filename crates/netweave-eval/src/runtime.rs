//! Runtime: one peer executing a woven module.
//!
//! Spawns behaviours into state buffers, runs their generated accessors and
//! RPC stubs, and exposes the loopback outbox so tests and tools can
//! inspect or deliver the messages a call produced.

use netweave_codegen::types::COPY_DEFAULTS_TO_BUFFER;
use netweave_types::body::Dispatch;
use netweave_types::ir::{Module, TypeId};
use netweave_types::rpc::RpcMask;

use crate::error::{EvalError, EvalResult};
use crate::evaluator::Evaluator;
use crate::net::SentMessage;
use crate::value::{ObjectId, Value, View};

/// Default gas budget per top-level operation.
const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// A single peer running a woven module.
pub struct Runtime {
    eval: Evaluator,
}

impl Runtime {
    pub fn new(module: Module) -> Self {
        Self::with_gas_limit(module, DEFAULT_GAS_LIMIT)
    }

    /// Create with a custom gas limit, applied to each top-level operation.
    pub fn with_gas_limit(module: Module, gas_limit: u64) -> Self {
        Self {
            eval: Evaluator::new(module, gas_limit),
        }
    }

    /// Load a woven module from its JSON representation.
    pub fn from_json(json: &str) -> EvalResult<Self> {
        let module = Module::from_json(json)
            .map_err(|e| EvalError::Runtime(format!("invalid module JSON: {e}")))?;
        Ok(Self::new(module))
    }

    pub fn module(&self) -> &Module {
        self.eval.module()
    }

    fn type_id(&self, name: &str) -> EvalResult<TypeId> {
        self.module()
            .find(name)
            .ok_or_else(|| EvalError::UnknownType(name.to_string()))
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ══════════════════════════════════════════════════════════════════════════

    /// Construct a behaviour and attach it to the runner.
    pub fn spawn(&mut self, type_name: &str) -> EvalResult<Value> {
        let object = self.construct(type_name)?;
        self.attach(&object)?;
        Ok(object)
    }

    /// Construct an object without attaching it. Networked members of an
    /// unattached behaviour have no state to read.
    pub fn construct(&mut self, type_name: &str) -> EvalResult<Value> {
        self.eval.reset_gas();
        let ty = self.type_id(type_name)?;
        let object = Value::Object(self.eval.instantiate(ty)?);
        self.eval.run_constructors(ty, &object)?;
        Ok(object)
    }

    /// Give `object` a zeroed state buffer and write its captured defaults.
    pub fn attach(&mut self, object: &Value) -> EvalResult<()> {
        self.eval.reset_gas();
        let id = object.as_object()?;
        let ty = self.eval.object(id)?.ty;
        let module = self.eval.shared_module();
        let def = module
            .get(ty)
            .ok_or_else(|| EvalError::UnknownType(ty.to_string()))?;
        if !def.is_behaviour() {
            return Err(EvalError::TypeMismatch(format!(
                "{} is not a behaviour",
                def.name
            )));
        }
        let words = def
            .stamped_words()
            .ok_or_else(|| EvalError::NotLaidOut(def.name.clone()))?;
        if self.eval.object(id)?.state.is_some() {
            return Err(EvalError::Runtime(format!(
                "object {} is already attached",
                id.0
            )));
        }
        let state = self.eval.memory.alloc(words);
        self.eval.object_mut(id)?.state = Some(state);
        if module.find_method(ty, COPY_DEFAULTS_TO_BUFFER).is_some() {
            self.eval.invoke(
                ty,
                COPY_DEFAULTS_TO_BUFFER,
                object.clone(),
                Vec::new(),
                Dispatch::Virtual,
            )?;
        }
        tracing::debug!(object = id.0, ty = %def.name, words, "attached");
        Ok(())
    }

    /// Remove an object. Messages addressed to it are dropped on delivery.
    pub fn despawn(&mut self, object: &Value) -> EvalResult<()> {
        let record = self.eval.object_mut(object.as_object()?)?;
        record.destroyed = true;
        record.state = None;
        Ok(())
    }

    /// A zeroed composite value with its constructor run.
    pub fn new_struct(&mut self, type_name: &str) -> EvalResult<Value> {
        self.eval.reset_gas();
        let ty = self.type_id(type_name)?;
        let value = self.eval.new_value(ty)?;
        self.eval.run_constructors(ty, &value)?;
        Ok(value)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Members and calls
    // ══════════════════════════════════════════════════════════════════════════

    /// Read a property through its getter.
    pub fn get(&mut self, target: &Value, member: &str) -> EvalResult<Value> {
        self.eval.reset_gas();
        self.eval.get_member(target.clone(), member)
    }

    /// Assign a property through its setter.
    pub fn set(&mut self, target: &Value, member: &str, value: Value) -> EvalResult<()> {
        self.eval.reset_gas();
        self.eval.set_member(target.clone(), member, value)
    }

    /// A stored field of an object.
    pub fn field(&self, target: &Value, name: &str) -> EvalResult<Value> {
        let record = self.eval.object(target.as_object()?)?;
        record
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedMember(name.to_string()))
    }

    /// Call an instance method with virtual dispatch.
    pub fn call(&mut self, target: &Value, method: &str, args: Vec<Value>) -> EvalResult<Value> {
        self.eval.reset_gas();
        let ty = self.eval.type_of(target)?;
        self.eval
            .invoke(ty, method, target.clone(), args, Dispatch::Virtual)
    }

    pub fn call_static(
        &mut self,
        type_name: &str,
        method: &str,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        self.eval.reset_gas();
        let ty = self.type_id(type_name)?;
        self.eval.call_static(ty, method, args)
    }

    /// The runner handle static RPCs take as their first argument.
    pub fn runner(&self) -> Value {
        Value::Runner
    }

    /// Raw words of an attached object's state buffer.
    pub fn state_words(&self, object: &Value) -> EvalResult<Vec<i32>> {
        let record = self.eval.object(object.as_object()?)?;
        let ptr = record
            .state
            .ok_or_else(|| EvalError::NullAccess("object is not attached".into()))?;
        let words = self.eval.memory.buffer_len(ptr) / netweave_types::WORD_SIZE as usize;
        self.eval.memory.words(ptr, words as u32)
    }

    /// Raw words of a composite value.
    pub fn struct_words(&self, value: &Value) -> EvalResult<Vec<i32>> {
        let Value::Struct { ptr, .. } = value else {
            return Err(EvalError::TypeMismatch(format!(
                "expected struct, found {}",
                value.type_name()
            )));
        };
        let words = self.eval.memory.buffer_len(*ptr) / netweave_types::WORD_SIZE as usize;
        self.eval.memory.words(*ptr, words as u32)
    }

    // ── Views ────────────────────────────────────────────────────────────

    fn view(value: &Value) -> EvalResult<View> {
        value.as_view().cloned()
    }

    pub fn view_len(&mut self, view: &Value) -> EvalResult<u32> {
        self.eval.view_len(&Self::view(view)?)
    }

    pub fn view_get(&mut self, view: &Value, index_or_key: Value) -> EvalResult<Value> {
        self.eval.reset_gas();
        self.eval.view_get(&Self::view(view)?, &index_or_key)
    }

    pub fn view_set(&mut self, view: &Value, index_or_key: Value, value: Value) -> EvalResult<()> {
        self.eval.reset_gas();
        self.eval.view_set(&Self::view(view)?, &index_or_key, value)
    }

    pub fn view_add(&mut self, view: &Value, value: Value) -> EvalResult<()> {
        self.eval.reset_gas();
        self.eval.view_add(&Self::view(view)?, value)
    }

    pub fn view_remove(&mut self, view: &Value, index_or_key: Value) -> EvalResult<bool> {
        self.eval.reset_gas();
        self.eval.view_remove(&Self::view(view)?, &index_or_key)
    }

    pub fn view_contains(&mut self, view: &Value, key: Value) -> EvalResult<bool> {
        self.eval.reset_gas();
        self.eval.view_contains(&Self::view(view)?, &key)
    }

    pub fn view_clear(&mut self, view: &Value) -> EvalResult<()> {
        self.eval.view_clear(&Self::view(view)?)
    }

    pub fn view_fill(&mut self, view: &Value, items: Vec<Value>) -> EvalResult<()> {
        self.eval.reset_gas();
        self.eval.view_fill(&Self::view(view)?, &Value::List(items))
    }

    pub fn view_snapshot(&mut self, view: &Value) -> EvalResult<Vec<Value>> {
        self.eval.reset_gas();
        self.eval.view_snapshot(&Self::view(view)?)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Session
    // ══════════════════════════════════════════════════════════════════════════

    /// Replace the authority this peer holds over `object`.
    pub fn set_authority(&mut self, object: &Value, mask: RpcMask) -> EvalResult<()> {
        self.eval.object_mut(object.as_object()?)?.authority = mask;
        Ok(())
    }

    pub fn authority(&self, object: &Value) -> EvalResult<RpcMask> {
        Ok(self.eval.object(object.as_object()?)?.authority)
    }

    pub fn set_local_player(&mut self, player: i32) {
        self.eval.net.local_player = player;
    }

    pub fn local_player(&self) -> i32 {
        self.eval.net.local_player
    }

    /// Make `player` reachable as a remote peer.
    pub fn connect_player(&mut self, player: i32) {
        self.eval.net.connect(player);
    }

    pub fn disconnect_player(&mut self, player: i32) {
        self.eval.net.disconnect(player);
    }

    pub fn set_resimulating(&mut self, resimulating: bool) {
        self.eval.net.resimulating = resimulating;
    }

    /// Messages sent since the outbox was last taken, oldest first.
    pub fn outbox(&self) -> EvalResult<Vec<SentMessage>> {
        self.eval
            .net
            .outbox_ids()
            .iter()
            .map(|id| self.eval.describe_message(*id))
            .collect()
    }

    /// Drain the outbox.
    pub fn take_outbox(&mut self) -> EvalResult<Vec<SentMessage>> {
        let ids = self.eval.net.take_outbox_ids();
        ids.into_iter()
            .map(|id| self.eval.describe_message(id))
            .collect()
    }

    /// The outbox as pretty JSON, for logging and fixtures.
    pub fn outbox_json(&self) -> EvalResult<String> {
        serde_json::to_string_pretty(&self.outbox()?)
            .map_err(|e| EvalError::Runtime(format!("cannot serialize outbox: {e}")))
    }

    /// Run the receiver stub for `message` on this peer. Returns `false`
    /// when the addressed object no longer exists.
    pub fn deliver(&mut self, message: &SentMessage) -> EvalResult<bool> {
        self.eval.reset_gas();
        self.eval.deliver(message.id)
    }

    /// Object handle for a wire id, if it is alive.
    pub fn resolve(&self, id: i32) -> Option<Value> {
        let id = u32::try_from(id).ok()?;
        let record = self.eval.object(ObjectId(id)).ok()?;
        (!record.destroyed).then_some(Value::Object(ObjectId(id)))
    }

    /// Gas used by the last top-level operation.
    pub fn gas_used(&self) -> u64 {
        self.eval.gas
    }
}
