//! Container views over inline state regions.
//!
//! A view never owns storage: every operation reads and writes the region
//! the view points at, so changes are immediately part of the object's
//! state. Elements go through the codec type named in the view spec;
//! fixed buffers store their scalars directly.
//!
//! ```text
//! linked list : [count] [head] [tail] { [prev] [next] [elem] } * capacity
//! dictionary  : [count] [free] [used] [bucket] * buckets { [next] [key] [value] } * capacity
//! ```
//!
//! Links are 1-based slot numbers; 0 means none.

use netweave_codegen::collections;
use netweave_codegen::types::{
    CODEC_READ, CODEC_WRITE, DICT_ENTRY_LINK_WORDS, DICT_META_WORDS, LIST_BOOKKEEPING_WORDS,
    LIST_META_WORDS,
};
use netweave_types::body::{Intrinsic, ViewKind};
use netweave_types::ir::{ScalarKind, TypeId};
use netweave_types::WORD_SIZE;

use crate::error::{EvalError, EvalResult};
use crate::evaluator::{values_equal, Evaluator};
use crate::value::{Ptr, Value, View};

// ── Linked list header words ──
const LIST_COUNT: u32 = 0;
const LIST_HEAD: u32 = 1;
const LIST_TAIL: u32 = 2;
const NODE_PREV: u32 = 0;
const NODE_NEXT: u32 = 1;

// ── Dictionary header words ──
const DICT_COUNT: u32 = 0;
const DICT_FREE: u32 = 1;
const DICT_USED: u32 = 2;

/// Bytes covered by the view's region.
pub(crate) fn region_bytes(view: &View) -> EvalResult<usize> {
    let spec = &view.spec;
    let words = match spec.kind {
        ViewKind::FixedBuffer => collections::fixed_buffer_words(
            spec.capacity,
            spec.scalar.map_or(1, |s| s.byte_size()),
        ),
        ViewKind::Array => collections::array_words(spec.capacity, spec.element_words),
        ViewKind::LinkedList => collections::linked_list_words(spec.capacity, spec.element_words),
        ViewKind::Dictionary => spec
            .key_words
            .checked_add(spec.element_words)
            .and_then(|entry| entry.checked_add(DICT_ENTRY_LINK_WORDS))
            .and_then(|entry| spec.capacity.checked_mul(entry))
            .and_then(|entries| entries.checked_add(spec.buckets))
            .and_then(|words| words.checked_add(DICT_META_WORDS)),
    };
    words.map(|w| w as usize * WORD_SIZE as usize).ok_or_else(|| {
        EvalError::OutOfBounds(format!("{:?} view of {} slots", spec.kind, spec.capacity))
    })
}

impl Evaluator {
    /// Dispatch a view intrinsic; `args` excludes the view itself.
    pub(crate) fn view_op(
        &mut self,
        op: &Intrinsic,
        view: &View,
        args: &[Value],
    ) -> EvalResult<Value> {
        let arg = |i: usize| {
            args.get(i)
                .ok_or_else(|| EvalError::TypeMismatch(format!("{op:?} is missing an argument")))
        };
        match op {
            Intrinsic::ViewLen => Ok(Value::Int(i64::from(self.view_len(view)?))),
            Intrinsic::ViewGet => self.view_get(view, arg(0)?),
            Intrinsic::ViewSet => {
                self.view_set(view, arg(0)?, arg(1)?.clone())?;
                Ok(Value::Null)
            }
            Intrinsic::ViewAdd => {
                self.view_add(view, arg(0)?.clone())?;
                Ok(Value::Null)
            }
            Intrinsic::ViewRemove => Ok(Value::Bool(self.view_remove(view, arg(0)?)?)),
            Intrinsic::ViewContains => Ok(Value::Bool(self.view_contains(view, arg(0)?)?)),
            Intrinsic::ViewClear => {
                self.view_clear(view)?;
                Ok(Value::Null)
            }
            Intrinsic::ViewFill => {
                self.view_fill(view, arg(0)?)?;
                Ok(Value::Null)
            }
            Intrinsic::ViewSnapshot => Ok(Value::List(self.view_snapshot(view)?)),
            other => Err(EvalError::Runtime(format!("{other:?} is not a view operation"))),
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Operations
    // ══════════════════════════════════════════════════════════════════════════

    pub fn view_len(&mut self, view: &View) -> EvalResult<u32> {
        match view.spec.kind {
            ViewKind::FixedBuffer | ViewKind::Array => Ok(view.spec.capacity),
            ViewKind::LinkedList => self.word(view, LIST_COUNT),
            ViewKind::Dictionary => self.word(view, DICT_COUNT),
        }
    }

    pub fn view_get(&mut self, view: &View, index_or_key: &Value) -> EvalResult<Value> {
        match view.spec.kind {
            ViewKind::FixedBuffer => {
                let (scalar, ptr) = self.fixed_slot(view, index_or_key)?;
                self.memory.load(scalar, ptr)
            }
            ViewKind::Array => {
                let ptr = self.array_slot(view, index_or_key)?;
                self.read_element(view.spec.codec, ptr)
            }
            ViewKind::LinkedList => {
                let slot = self.list_slot_at(view, index_or_key)?;
                self.read_element(view.spec.codec, self.list_elem(view, slot))
            }
            ViewKind::Dictionary => match self.dict_find(view, index_or_key)? {
                Some((slot, _)) => self.read_element(view.spec.codec, self.dict_value(view, slot)),
                None => Err(EvalError::KeyNotFound(index_or_key.to_string())),
            },
        }
    }

    pub fn view_set(&mut self, view: &View, index_or_key: &Value, value: Value) -> EvalResult<()> {
        match view.spec.kind {
            ViewKind::FixedBuffer => {
                let (scalar, ptr) = self.fixed_slot(view, index_or_key)?;
                self.memory.store(scalar, ptr, &value)
            }
            ViewKind::Array => {
                let ptr = self.array_slot(view, index_or_key)?;
                self.write_element(view.spec.codec, ptr, value)
            }
            ViewKind::LinkedList => {
                let slot = self.list_slot_at(view, index_or_key)?;
                self.write_element(view.spec.codec, self.list_elem(view, slot), value)
            }
            ViewKind::Dictionary => self.dict_insert(view, index_or_key, value),
        }
    }

    /// Append to a linked list.
    pub fn view_add(&mut self, view: &View, value: Value) -> EvalResult<()> {
        if view.spec.kind != ViewKind::LinkedList {
            return Err(EvalError::TypeMismatch(format!(
                "cannot append to a {:?} view",
                view.spec.kind
            )));
        }
        let count = self.word(view, LIST_COUNT)?;
        if count >= view.spec.capacity {
            return Err(capacity_exceeded(view));
        }
        let used = self.list_slots(view)?;
        let slot = (1..=view.spec.capacity)
            .find(|s| !used.contains(s))
            .ok_or_else(|| capacity_exceeded(view))?;
        let tail = self.word(view, LIST_TAIL)?;

        let node = self.list_node(view, slot);
        self.memory.store_word(node.add_words(NODE_PREV), tail as i32)?;
        self.memory.store_word(node.add_words(NODE_NEXT), 0)?;
        self.write_element(view.spec.codec, self.list_elem(view, slot), value)?;
        if tail == 0 {
            self.set_word(view, LIST_HEAD, slot)?;
        } else {
            let tail_node = self.list_node(view, tail);
            self.memory
                .store_word(tail_node.add_words(NODE_NEXT), slot as i32)?;
        }
        self.set_word(view, LIST_TAIL, slot)?;
        self.set_word(view, LIST_COUNT, count + 1)
    }

    /// Remove by index (linked list) or key (dictionary). Returns whether
    /// anything was removed.
    pub fn view_remove(&mut self, view: &View, index_or_key: &Value) -> EvalResult<bool> {
        match view.spec.kind {
            ViewKind::LinkedList => {
                let index = index_or_key.as_int()?;
                let count = self.word(view, LIST_COUNT)?;
                if index < 0 || index >= i64::from(count) {
                    return Ok(false);
                }
                let slot = self.list_slot_at(view, index_or_key)?;
                self.list_unlink(view, slot)?;
                Ok(true)
            }
            ViewKind::Dictionary => self.dict_remove(view, index_or_key),
            kind => Err(EvalError::TypeMismatch(format!(
                "cannot remove from a {kind:?} view; its length is fixed"
            ))),
        }
    }

    /// Key membership for dictionaries, element membership otherwise.
    pub fn view_contains(&mut self, view: &View, key_or_value: &Value) -> EvalResult<bool> {
        if view.spec.kind == ViewKind::Dictionary {
            return Ok(self.dict_find(view, key_or_value)?.is_some());
        }
        Ok(self
            .view_snapshot(view)?
            .iter()
            .any(|v| values_equal(v, key_or_value)))
    }

    pub fn view_clear(&mut self, view: &View) -> EvalResult<()> {
        let bytes = region_bytes(view)?;
        self.memory.zero(view.ptr, bytes)
    }

    /// Replace the contents with `items`. Dictionary items are `[key, value]`
    /// pairs.
    pub fn view_fill(&mut self, view: &View, items: &Value) -> EvalResult<()> {
        let items = items.as_list()?.to_vec();
        if items.len() > view.spec.capacity as usize {
            return Err(capacity_exceeded(view));
        }
        self.view_clear(view)?;
        for (i, item) in items.into_iter().enumerate() {
            match view.spec.kind {
                ViewKind::FixedBuffer | ViewKind::Array => {
                    self.view_set(view, &Value::Int(i as i64), item)?
                }
                ViewKind::LinkedList => self.view_add(view, item)?,
                ViewKind::Dictionary => match item.as_list()? {
                    [key, value] => self.dict_insert(view, key, value.clone())?,
                    _ => {
                        return Err(EvalError::TypeMismatch(
                            "dictionary entries are [key, value] pairs".into(),
                        ))
                    }
                },
            }
        }
        Ok(())
    }

    /// Current contents, in index order (bucket order for dictionaries).
    pub fn view_snapshot(&mut self, view: &View) -> EvalResult<Vec<Value>> {
        match view.spec.kind {
            ViewKind::FixedBuffer | ViewKind::Array => (0..view.spec.capacity)
                .map(|i| self.view_get(view, &Value::Int(i64::from(i))))
                .collect(),
            ViewKind::LinkedList => {
                let mut out = Vec::new();
                for slot in self.list_slots(view)? {
                    let ptr = self.list_elem(view, slot);
                    out.push(self.read_element(view.spec.codec, ptr)?);
                }
                Ok(out)
            }
            ViewKind::Dictionary => {
                let mut out = Vec::new();
                for slot in self.dict_slots(view)? {
                    let key = self.read_element(view.spec.key_codec, self.dict_key(view, slot))?;
                    let value = self.read_element(view.spec.codec, self.dict_value(view, slot))?;
                    out.push(Value::List(vec![key, value]));
                }
                Ok(out)
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Shared helpers
    // ══════════════════════════════════════════════════════════════════════════

    fn word(&self, view: &View, word: u32) -> EvalResult<u32> {
        Ok(self.memory.load_word(view.ptr.add_words(word))?.max(0) as u32)
    }

    fn set_word(&mut self, view: &View, word: u32, value: u32) -> EvalResult<()> {
        self.memory
            .store_word(view.ptr.add_words(word), value as i32)
    }

    fn read_element(&mut self, codec: Option<TypeId>, ptr: Ptr) -> EvalResult<Value> {
        let codec = codec.ok_or_else(|| EvalError::Runtime("view has no element codec".into()))?;
        self.call_static(codec, CODEC_READ, vec![Value::Ptr(ptr)])
    }

    fn write_element(&mut self, codec: Option<TypeId>, ptr: Ptr, value: Value) -> EvalResult<()> {
        let codec = codec.ok_or_else(|| EvalError::Runtime("view has no element codec".into()))?;
        self.call_static(codec, CODEC_WRITE, vec![Value::Ptr(ptr), value])?;
        Ok(())
    }

    fn index(view: &View, index: &Value) -> EvalResult<u32> {
        let i = index.as_int()?;
        if i < 0 || i >= i64::from(view.spec.capacity) {
            return Err(EvalError::IndexOutOfRange(format!(
                "{i} not in 0..{}",
                view.spec.capacity
            )));
        }
        Ok(i as u32)
    }

    // ── Fixed buffer and array ───────────────────────────────────────────

    fn fixed_slot(
        &self,
        view: &View,
        index: &Value,
    ) -> EvalResult<(ScalarKind, Ptr)> {
        let i = Self::index(view, index)?;
        let scalar = view
            .spec
            .scalar
            .ok_or_else(|| EvalError::Runtime("fixed buffer view has no element scalar".into()))?;
        Ok((
            scalar,
            view.ptr.add_bytes(i as usize * scalar.byte_size() as usize),
        ))
    }

    fn array_slot(&self, view: &View, index: &Value) -> EvalResult<Ptr> {
        let i = Self::index(view, index)?;
        Ok(view.ptr.add_words(i * view.spec.element_words))
    }

    // ── Linked list ──────────────────────────────────────────────────────

    fn list_node(&self, view: &View, slot: u32) -> Ptr {
        view.ptr.add_words(
            LIST_META_WORDS + (slot - 1) * (view.spec.element_words + LIST_BOOKKEEPING_WORDS),
        )
    }

    fn list_elem(&self, view: &View, slot: u32) -> Ptr {
        self.list_node(view, slot).add_words(LIST_BOOKKEEPING_WORDS)
    }

    fn link(&self, view: &View, slot: u32, which: u32) -> EvalResult<u32> {
        Ok(self
            .memory
            .load_word(self.list_node(view, slot).add_words(which))?
            .max(0) as u32)
    }

    fn set_link(&mut self, view: &View, slot: u32, which: u32, to: u32) -> EvalResult<()> {
        let node = self.list_node(view, slot);
        self.memory.store_word(node.add_words(which), to as i32)
    }

    /// Occupied slots from head to tail.
    fn list_slots(&self, view: &View) -> EvalResult<Vec<u32>> {
        let count = self.word(view, LIST_COUNT)?.min(view.spec.capacity);
        let mut slots = Vec::with_capacity(count as usize);
        let mut slot = self.word(view, LIST_HEAD)?;
        while slot != 0 && slots.len() < count as usize {
            if slot > view.spec.capacity {
                return Err(EvalError::Runtime(format!("corrupt list link {slot}")));
            }
            slots.push(slot);
            slot = self.link(view, slot, NODE_NEXT)?;
        }
        Ok(slots)
    }

    fn list_slot_at(&self, view: &View, index: &Value) -> EvalResult<u32> {
        let i = index.as_int()?;
        let slots = self.list_slots(view)?;
        usize::try_from(i)
            .ok()
            .and_then(|i| slots.get(i).copied())
            .ok_or_else(|| EvalError::IndexOutOfRange(format!("{i} not in 0..{}", slots.len())))
    }

    fn list_unlink(&mut self, view: &View, slot: u32) -> EvalResult<()> {
        let prev = self.link(view, slot, NODE_PREV)?;
        let next = self.link(view, slot, NODE_NEXT)?;
        if prev == 0 {
            self.set_word(view, LIST_HEAD, next)?;
        } else {
            self.set_link(view, prev, NODE_NEXT, next)?;
        }
        if next == 0 {
            self.set_word(view, LIST_TAIL, prev)?;
        } else {
            self.set_link(view, next, NODE_PREV, prev)?;
        }
        let node_bytes =
            (view.spec.element_words + LIST_BOOKKEEPING_WORDS) as usize * WORD_SIZE as usize;
        self.memory.zero(self.list_node(view, slot), node_bytes)?;
        let count = self.word(view, LIST_COUNT)?;
        self.set_word(view, LIST_COUNT, count.saturating_sub(1))
    }

    // ── Dictionary ───────────────────────────────────────────────────────

    fn dict_entry(&self, view: &View, slot: u32) -> Ptr {
        let spec = &view.spec;
        view.ptr.add_words(
            DICT_META_WORDS
                + spec.buckets
                + (slot - 1) * (DICT_ENTRY_LINK_WORDS + spec.key_words + spec.element_words),
        )
    }

    fn dict_key(&self, view: &View, slot: u32) -> Ptr {
        self.dict_entry(view, slot).add_words(DICT_ENTRY_LINK_WORDS)
    }

    fn dict_value(&self, view: &View, slot: u32) -> Ptr {
        self.dict_key(view, slot).add_words(view.spec.key_words)
    }

    fn dict_next(&self, view: &View, slot: u32) -> EvalResult<u32> {
        Ok(self.memory.load_word(self.dict_entry(view, slot))?.max(0) as u32)
    }

    fn bucket_ptr(&self, view: &View, bucket: u32) -> Ptr {
        view.ptr.add_words(DICT_META_WORDS + bucket)
    }

    /// Encode `key` into scratch words, hash it and return both.
    fn encode_key(&mut self, view: &View, key: &Value) -> EvalResult<(Vec<u8>, u32)> {
        let scratch = self.memory.alloc(view.spec.key_words);
        let encoded = self
            .write_element(view.spec.key_codec, scratch, key.clone())
            .and_then(|()| {
                self.memory
                    .read_bytes(scratch, view.spec.key_words as usize * WORD_SIZE as usize)
            });
        self.memory.release(scratch);
        let encoded = encoded?;
        let bucket = fnv1a(&encoded) % view.spec.buckets.max(1);
        Ok((encoded, bucket))
    }

    /// Slot holding `key` and the slot before it in its chain.
    fn dict_find(&mut self, view: &View, key: &Value) -> EvalResult<Option<(u32, u32)>> {
        let (encoded, bucket) = self.encode_key(view, key)?;
        let mut prev = 0;
        let mut slot = self.memory.load_word(self.bucket_ptr(view, bucket))?.max(0) as u32;
        let mut steps = 0;
        while slot != 0 {
            if slot > view.spec.capacity || steps > view.spec.capacity {
                return Err(EvalError::Runtime(format!("corrupt dictionary link {slot}")));
            }
            let stored = self
                .memory
                .read_bytes(self.dict_key(view, slot), encoded.len())?;
            if stored == encoded {
                return Ok(Some((slot, prev)));
            }
            prev = slot;
            slot = self.dict_next(view, slot)?;
            steps += 1;
        }
        Ok(None)
    }

    fn dict_insert(&mut self, view: &View, key: &Value, value: Value) -> EvalResult<()> {
        if let Some((slot, _)) = self.dict_find(view, key)? {
            return self.write_element(view.spec.codec, self.dict_value(view, slot), value);
        }
        let free = self.word(view, DICT_FREE)?;
        let used = self.word(view, DICT_USED)?;
        let slot = if free != 0 {
            let next = self.dict_next(view, free)?;
            self.set_word(view, DICT_FREE, next)?;
            free
        } else if used < view.spec.capacity {
            self.set_word(view, DICT_USED, used + 1)?;
            used + 1
        } else {
            return Err(capacity_exceeded(view));
        };

        let (_, bucket) = self.encode_key(view, key)?;
        let bucket_ptr = self.bucket_ptr(view, bucket);
        let head = self.memory.load_word(bucket_ptr)?;
        self.memory.store_word(self.dict_entry(view, slot), head)?;
        self.write_element(view.spec.key_codec, self.dict_key(view, slot), key.clone())?;
        self.write_element(view.spec.codec, self.dict_value(view, slot), value)?;
        self.memory.store_word(bucket_ptr, slot as i32)?;
        let count = self.word(view, DICT_COUNT)?;
        self.set_word(view, DICT_COUNT, count + 1)
    }

    fn dict_remove(&mut self, view: &View, key: &Value) -> EvalResult<bool> {
        let Some((slot, prev)) = self.dict_find(view, key)? else {
            return Ok(false);
        };
        let next = self.dict_next(view, slot)?;
        if prev == 0 {
            let (_, bucket) = self.encode_key(view, key)?;
            self.memory
                .store_word(self.bucket_ptr(view, bucket), next as i32)?;
        } else {
            self.memory
                .store_word(self.dict_entry(view, prev), next as i32)?;
        }
        let entry_bytes = (DICT_ENTRY_LINK_WORDS + view.spec.key_words + view.spec.element_words)
            as usize
            * WORD_SIZE as usize;
        self.memory.zero(self.dict_entry(view, slot), entry_bytes)?;
        let free = self.word(view, DICT_FREE)?;
        self.memory
            .store_word(self.dict_entry(view, slot), free as i32)?;
        self.set_word(view, DICT_FREE, slot)?;
        let count = self.word(view, DICT_COUNT)?;
        self.set_word(view, DICT_COUNT, count.saturating_sub(1))?;
        Ok(true)
    }

    /// Occupied slots, bucket by bucket.
    fn dict_slots(&self, view: &View) -> EvalResult<Vec<u32>> {
        let mut slots = Vec::new();
        for bucket in 0..view.spec.buckets {
            let mut slot = self.memory.load_word(self.bucket_ptr(view, bucket))?.max(0) as u32;
            while slot != 0 {
                if slot > view.spec.capacity || slots.len() > view.spec.capacity as usize {
                    return Err(EvalError::Runtime(format!("corrupt dictionary link {slot}")));
                }
                slots.push(slot);
                slot = self.dict_next(view, slot)?;
            }
        }
        Ok(slots)
    }
}

fn capacity_exceeded(view: &View) -> EvalError {
    EvalError::CapacityExceeded(format!(
        "{:?} view holds at most {} element(s)",
        view.spec.kind, view.spec.capacity
    ))
}

/// 32-bit FNV-1a over encoded key bytes.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}
