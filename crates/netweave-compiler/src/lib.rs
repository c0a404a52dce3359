//! netweave compiler: weaves networking support into a compiled module.
//!
//! ```text
//! Module → exclusions → struct layout → behaviour layout → RPC stubs → woven Module
//! ```
//!
//! The single entry point is [`weave`]. It lays out every networked struct,
//! input and behaviour into word-aligned state buffers, replaces member
//! accessors with buffer reads and writes, and turns every RPC into a caller
//! stub, its original body and a receiver stub. Processed types are stamped,
//! so weaving a woven module changes nothing.
//!
//! Any error aborts the whole pass and leaves the module untouched.

mod accessors;
mod layout;
mod rpc;
mod settings;
mod weaver;

pub use accessors::{check_replaceable, is_trivial_getter, is_trivial_setter};
pub use rpc::{has_rpc_marker, static_rpc_key};
pub use settings::{DictionaryBacking, WeaverSettings};
pub use weaver::{weave, MemberLayout, TypeLayout, WeaveOutcome, Weaver};
