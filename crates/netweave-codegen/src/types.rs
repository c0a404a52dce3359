//! Wire-format constants shared by every generated layout.
//!
//! All sizes are in words unless the name says otherwise. A word is
//! [`WORD_SIZE`] bytes; every member, container and message region starts on
//! a word boundary.
//!
//! # Container regions
//!
//! ```text
//! text         : [len] [utf-16 units, packed two per word ...]
//! fixed buffer : [packed scalars ...]
//! array        : [elem 0] [elem 1] ...
//! linked list  : [count] [head] [tail] { [prev] [next] [elem] } * capacity
//! dictionary   : [count] [free] [used] [bucket] * next_prime(capacity)
//!                { [next] [key] [value] } * capacity
//! ```
//!
//! # RPC messages
//!
//! ```text
//! word 0 : object id (0 for static RPCs)
//! word 1 : discriminator (0 instance, 1 static)
//! word 2 : key
//! word 3 : sequence
//! word 4 : first parameter ...
//! ```

pub use netweave_types::WORD_SIZE;

// ── Text ─────────────────────────────────────────────────────────────────────

/// Bytes per text code unit (UTF-16).
pub const TEXT_CHAR_SIZE: u32 = 2;
/// Words before the text payload (the length).
pub const TEXT_HEADER_WORDS: u32 = 1;

// ── Linked list ──────────────────────────────────────────────────────────────

/// Count, head and tail.
pub const LIST_META_WORDS: u32 = 3;
/// Prev and next links carried by every node.
pub const LIST_BOOKKEEPING_WORDS: u32 = 2;

// ── Dictionary ───────────────────────────────────────────────────────────────

/// Count, free-list head and used-slot high-water mark.
pub const DICT_META_WORDS: u32 = 3;
/// Chain link carried by every entry.
pub const DICT_ENTRY_LINK_WORDS: u32 = 1;

// ── RPC ──────────────────────────────────────────────────────────────────────

/// Words in every RPC message header.
pub const RPC_HEADER_WORDS: u32 = 4;
pub const RPC_HEADER_OBJECT: u32 = 0;
pub const RPC_HEADER_DISCRIMINATOR: u32 = 1;
pub const RPC_HEADER_KEY: u32 = 2;
pub const RPC_HEADER_SEQUENCE: u32 = 3;

// ── Generated member names ───────────────────────────────────────────────────

/// Instance method writing captured initializers into the state buffer.
pub const COPY_DEFAULTS_TO_BUFFER: &str = "@CopyDefaultsToBuffer";
/// Instance method snapshotting the state buffer into the default fields.
pub const COPY_BUFFER_TO_DEFAULTS: &str = "@CopyBufferToDefaults";
/// Static method names on synthesized element codec types.
pub const CODEC_READ: &str = "read";
pub const CODEC_WRITE: &str = "write";

/// Field holding the relocated default of a networked member.
pub fn default_field_name(member: &str) -> String {
    format!("{member}@Default")
}

/// Method that receives an RPC's original body.
pub fn rpc_body_name(method: &str) -> String {
    format!("{method}@Body")
}

/// Static method decoding an incoming RPC message.
pub fn rpc_receiver_name(method: &str) -> String {
    format!("{method}@Receive")
}

/// Per-object flag marking an RPC body already being invoked.
pub const RPC_INVOKING_FLAG: &str = "@InvokeRpc";
/// Per-type flag for static RPCs.
pub const RPC_INVOKING_STATIC_FLAG: &str = "@InvokeRpcStatic";
