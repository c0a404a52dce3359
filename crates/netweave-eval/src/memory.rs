//! Word-addressed buffers: object state, messages and composite values.
//!
//! Every buffer is a whole number of words and starts zeroed. Scalars are
//! stored little-endian at their native width; loads and stores outside a
//! buffer are errors, never silent growth.

use netweave_codegen::types::{TEXT_CHAR_SIZE, TEXT_HEADER_WORDS};
use netweave_types::ir::ScalarKind;
use netweave_types::{words_for_bytes, WORD_SIZE};

use crate::error::{EvalError, EvalResult};
use crate::value::{Ptr, Value};

#[derive(Debug, Clone, Default)]
pub struct Memory {
    buffers: Vec<Vec<u8>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh zeroed buffer of `words` words.
    pub fn alloc(&mut self, words: u32) -> Ptr {
        self.buffers
            .push(vec![0; words as usize * WORD_SIZE as usize]);
        Ptr::new(self.buffers.len() - 1, 0)
    }

    /// Drop the contents of a scratch buffer. Its pointers become invalid.
    pub fn release(&mut self, ptr: Ptr) {
        if let Some(buffer) = self.buffers.get_mut(ptr.buffer) {
            *buffer = Vec::new();
        }
    }

    /// Size in bytes of the buffer `ptr` points into.
    pub fn buffer_len(&self, ptr: Ptr) -> usize {
        self.buffers.get(ptr.buffer).map_or(0, Vec::len)
    }

    fn bytes(&self, ptr: Ptr, len: usize) -> EvalResult<&[u8]> {
        self.buffers
            .get(ptr.buffer)
            .and_then(|b| b.get(ptr.byte..ptr.byte + len))
            .ok_or_else(|| out_of_bounds(ptr, len))
    }

    fn bytes_mut(&mut self, ptr: Ptr, len: usize) -> EvalResult<&mut [u8]> {
        self.buffers
            .get_mut(ptr.buffer)
            .and_then(|b| b.get_mut(ptr.byte..ptr.byte + len))
            .ok_or_else(|| out_of_bounds(ptr, len))
    }

    fn read_array<const N: usize>(&self, ptr: Ptr) -> EvalResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(ptr, N)?);
        Ok(out)
    }

    // ── Scalars ──────────────────────────────────────────────────────────

    pub fn load(&self, scalar: ScalarKind, ptr: Ptr) -> EvalResult<Value> {
        Ok(match scalar {
            ScalarKind::Bool => Value::Bool(self.read_array::<1>(ptr)?[0] != 0),
            ScalarKind::I8 => Value::Int(i64::from(i8::from_le_bytes(self.read_array(ptr)?))),
            ScalarKind::U8 => Value::Int(i64::from(u8::from_le_bytes(self.read_array(ptr)?))),
            ScalarKind::I16 => Value::Int(i64::from(i16::from_le_bytes(self.read_array(ptr)?))),
            ScalarKind::U16 | ScalarKind::Char => {
                Value::Int(i64::from(u16::from_le_bytes(self.read_array(ptr)?)))
            }
            ScalarKind::I32 => Value::Int(i64::from(i32::from_le_bytes(self.read_array(ptr)?))),
            ScalarKind::U32 => Value::Int(i64::from(u32::from_le_bytes(self.read_array(ptr)?))),
            ScalarKind::F32 => Value::Float(f64::from(f32::from_le_bytes(self.read_array(ptr)?))),
            ScalarKind::I64 => Value::Int(i64::from_le_bytes(self.read_array(ptr)?)),
            ScalarKind::U64 => Value::Int(u64::from_le_bytes(self.read_array(ptr)?) as i64),
            ScalarKind::F64 => Value::Float(f64::from_le_bytes(self.read_array(ptr)?)),
        })
    }

    /// Store `value` narrowed to `scalar`. Integers wrap to the target width.
    pub fn store(&mut self, scalar: ScalarKind, ptr: Ptr, value: &Value) -> EvalResult<()> {
        let bytes: Vec<u8> = match scalar {
            ScalarKind::Bool => vec![u8::from(value.truthy()?)],
            ScalarKind::I8 | ScalarKind::U8 => (value.as_int()? as u8).to_le_bytes().to_vec(),
            ScalarKind::I16 | ScalarKind::U16 | ScalarKind::Char => {
                (value.as_int()? as u16).to_le_bytes().to_vec()
            }
            ScalarKind::I32 | ScalarKind::U32 => (value.as_int()? as u32).to_le_bytes().to_vec(),
            ScalarKind::F32 => (value.as_float()? as f32).to_le_bytes().to_vec(),
            ScalarKind::I64 | ScalarKind::U64 => (value.as_int()? as u64).to_le_bytes().to_vec(),
            ScalarKind::F64 => value.as_float()?.to_le_bytes().to_vec(),
        };
        self.bytes_mut(ptr, bytes.len())?.copy_from_slice(&bytes);
        Ok(())
    }

    pub fn load_word(&self, ptr: Ptr) -> EvalResult<i32> {
        Ok(i32::from_le_bytes(self.read_array(ptr)?))
    }

    pub fn store_word(&mut self, ptr: Ptr, value: i32) -> EvalResult<()> {
        self.bytes_mut(ptr, WORD_SIZE as usize)?
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    // ── Blocks ───────────────────────────────────────────────────────────

    pub fn copy(&mut self, from: Ptr, to: Ptr, bytes: usize) -> EvalResult<()> {
        let data = self.bytes(from, bytes)?.to_vec();
        self.bytes_mut(to, bytes)?.copy_from_slice(&data);
        Ok(())
    }

    pub fn zero(&mut self, ptr: Ptr, bytes: usize) -> EvalResult<()> {
        self.bytes_mut(ptr, bytes)?.fill(0);
        Ok(())
    }

    pub fn equal(&self, a: Ptr, b: Ptr, bytes: usize) -> EvalResult<bool> {
        Ok(self.bytes(a, bytes)? == self.bytes(b, bytes)?)
    }

    pub fn read_bytes(&self, ptr: Ptr, bytes: usize) -> EvalResult<Vec<u8>> {
        Ok(self.bytes(ptr, bytes)?.to_vec())
    }

    /// `words` consecutive words starting at `ptr`.
    pub fn words(&self, ptr: Ptr, words: u32) -> EvalResult<Vec<i32>> {
        (0..words).map(|w| self.load_word(ptr.add_words(w))).collect()
    }

    // ── Text ─────────────────────────────────────────────────────────────

    /// Bounded text: a length word, then UTF-16 units packed two per word.
    pub fn read_text(&self, ptr: Ptr, capacity: u32) -> EvalResult<String> {
        let len = self.load_word(ptr)?.clamp(0, capacity as i32) as usize;
        let start = ptr.add_words(TEXT_HEADER_WORDS);
        let units = (0..len)
            .map(|i| {
                self.read_array::<2>(start.add_bytes(i * TEXT_CHAR_SIZE as usize))
                    .map(u16::from_le_bytes)
            })
            .collect::<EvalResult<Vec<u16>>>()?;
        Ok(String::from_utf16_lossy(&units))
    }

    /// Write `text` truncated to `capacity` code units; unused units are zeroed.
    pub fn write_text(&mut self, ptr: Ptr, text: &str, capacity: u32) -> EvalResult<()> {
        let units: Vec<u16> = text.encode_utf16().take(capacity as usize).collect();
        let start = ptr.add_words(TEXT_HEADER_WORDS);
        let payload = words_for_bytes(capacity.saturating_mul(TEXT_CHAR_SIZE)) as usize;
        self.zero(start, payload * WORD_SIZE as usize)?;
        self.store_word(ptr, units.len() as i32)?;
        for (i, unit) in units.iter().enumerate() {
            self.bytes_mut(start.add_bytes(i * TEXT_CHAR_SIZE as usize), 2)?
                .copy_from_slice(&unit.to_le_bytes());
        }
        Ok(())
    }
}

fn out_of_bounds(ptr: Ptr, len: usize) -> EvalError {
    EvalError::OutOfBounds(format!(
        "{len} byte(s) at buffer {} offset {}",
        ptr.buffer, ptr.byte
    ))
}
