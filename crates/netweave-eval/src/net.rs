//! The runner's view of the session: players, resimulation and messages.

use std::collections::BTreeSet;

use serde::Serialize;

use netweave_codegen::types::RPC_HEADER_WORDS;
use netweave_types::body::MessageFlags;
use netweave_types::rpc::{Channel, RpcKey, TargetClass};

use crate::error::{EvalError, EvalResult};
use crate::value::{MessageId, Ptr};

/// A message allocated by a caller stub.
#[derive(Debug, Clone)]
pub(crate) struct MessageRecord {
    pub ptr: Ptr,
    pub words: u32,
    pub source: i32,
    pub flags: Option<MessageFlags>,
    pub target: Option<i32>,
}

/// A message as it left the runner, with its decoded header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentMessage {
    #[serde(skip)]
    pub id: MessageId,
    pub object: i32,
    pub key: RpcKey,
    pub sequence: i32,
    /// Every word of the message, header included.
    pub words: Vec<i32>,
    pub channel: Channel,
    pub tick_aligned: bool,
    pub target: Option<i32>,
    pub source: i32,
}

impl SentMessage {
    /// Words after the header.
    pub fn payload(&self) -> &[i32] {
        self.words.get(RPC_HEADER_WORDS as usize..).unwrap_or(&[])
    }
}

/// Session state consulted by the runner intrinsics.
#[derive(Debug, Clone)]
pub struct NetState {
    pub local_player: i32,
    /// Remote players reachable from this peer.
    players: BTreeSet<i32>,
    pub resimulating: bool,
    sequence: i64,
    messages: Vec<MessageRecord>,
    outbox: Vec<MessageId>,
}

impl Default for NetState {
    fn default() -> Self {
        Self {
            local_player: 1,
            players: BTreeSet::new(),
            resimulating: false,
            sequence: 0,
            messages: Vec::new(),
            outbox: Vec::new(),
        }
    }
}

impl NetState {
    pub fn connect(&mut self, player: i32) {
        if player != self.local_player {
            self.players.insert(player);
        }
    }

    pub fn disconnect(&mut self, player: i32) {
        self.players.remove(&player);
    }

    pub fn classify(&self, player: i32) -> TargetClass {
        if player == self.local_player {
            TargetClass::Local
        } else if self.players.contains(&player) {
            TargetClass::Remote
        } else {
            TargetClass::Unreachable
        }
    }

    pub fn next_sequence(&mut self) -> i64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    pub(crate) fn add_message(&mut self, ptr: Ptr, words: u32) -> MessageId {
        self.messages.push(MessageRecord {
            ptr,
            words,
            source: self.local_player,
            flags: None,
            target: None,
        });
        MessageId(self.messages.len() - 1)
    }

    pub(crate) fn message(&self, id: MessageId) -> EvalResult<&MessageRecord> {
        self.messages
            .get(id.0)
            .ok_or_else(|| EvalError::Runtime(format!("unknown message {}", id.0)))
    }

    pub(crate) fn message_mut(&mut self, id: MessageId) -> EvalResult<&mut MessageRecord> {
        self.messages
            .get_mut(id.0)
            .ok_or_else(|| EvalError::Runtime(format!("unknown message {}", id.0)))
    }

    pub(crate) fn send(&mut self, id: MessageId) -> EvalResult<()> {
        let message = self.message(id)?;
        if message.flags.is_none() {
            return Err(EvalError::Runtime(format!(
                "message {} was sent before its flags were set",
                id.0
            )));
        }
        self.outbox.push(id);
        Ok(())
    }

    pub(crate) fn outbox_ids(&self) -> &[MessageId] {
        &self.outbox
    }

    pub(crate) fn take_outbox_ids(&mut self) -> Vec<MessageId> {
        std::mem::take(&mut self.outbox)
    }
}
