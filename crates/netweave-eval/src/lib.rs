//! netweave reference runtime.
//!
//! Executes woven modules directly from the body IR. State buffers, messages
//! and composite values live in a word-addressed [`Memory`]; container
//! members are reached through views over their inline regions.
//!
//! The runtime is a single peer with a loopback transport: RPC messages sent
//! by generated caller stubs land in an outbox and can be delivered back
//! through the generated receiver stubs. It is the golden reference for what
//! woven code does, not a network stack.

mod env;
mod error;
mod evaluator;
mod memory;
mod net;
mod runtime;
mod value;
mod views;

pub use env::Environment;
pub use error::{EvalError, EvalResult};
pub use evaluator::{dequantize, quantize, Evaluator};
pub use memory::Memory;
pub use net::{NetState, SentMessage};
pub use runtime::Runtime;
pub use value::{InvokeInfo, MessageId, ObjectId, Ptr, RpcInfo, Value, View};
