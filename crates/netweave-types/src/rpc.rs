//! RPC vocabulary shared by the compiler and the runtime.
//!
//! Outcome codes are plain integers in generated code; the enums here give
//! them names on both sides of the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

// ══════════════════════════════════════════════════════════════════════════════
// Authority masks
// ══════════════════════════════════════════════════════════════════════════════

/// Bitset of participants allowed to originate or receive an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpcMask(pub u32);

impl RpcMask {
    pub const NONE: Self = Self(0);
    /// The peer simulating the object.
    pub const STATE_AUTHORITY: Self = Self(1);
    /// The peer providing input for the object.
    pub const INPUT_AUTHORITY: Self = Self(2);
    /// Every other peer.
    pub const PROXIES: Self = Self(4);
    pub const ALL: Self = Self(7);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn intersects(self, other: RpcMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether every bit of `self` is also set in `other`.
    pub fn is_subset_of(self, other: RpcMask) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn union(self, other: RpcMask) -> RpcMask {
        RpcMask(self.0 | other.0)
    }
}

impl fmt::Display for RpcMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            return write!(f, "All");
        }
        let mut names = Vec::new();
        if self.intersects(Self::STATE_AUTHORITY) {
            names.push("StateAuthority");
        }
        if self.intersects(Self::INPUT_AUTHORITY) {
            names.push("InputAuthority");
        }
        if self.intersects(Self::PROXIES) {
            names.push("Proxies");
        }
        if names.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Delivery channel of an RPC message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Reliable,
    Unreliable,
}

/// The declarative part of an RPC: who may call it, who receives it, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcAttr {
    pub sources: RpcMask,
    pub targets: RpcMask,
    pub channel: Channel,
    /// Apply in lockstep with the simulation tick rather than immediately.
    pub tick_aligned: bool,
    /// Also run the body on the calling peer when it is a target.
    pub invoke_local: bool,
    /// Allow invocation while the simulation is resimulating.
    pub invoke_resim: bool,
}

impl Default for RpcAttr {
    fn default() -> Self {
        Self {
            sources: RpcMask::ALL,
            targets: RpcMask::ALL,
            channel: Channel::Reliable,
            tick_aligned: true,
            invoke_local: true,
            invoke_resim: false,
        }
    }
}

impl RpcAttr {
    pub fn new(sources: RpcMask, targets: RpcMask) -> Self {
        Self {
            sources,
            targets,
            ..Self::default()
        }
    }

    pub fn unreliable(mut self) -> Self {
        self.channel = Channel::Unreliable;
        self
    }

    pub fn not_tick_aligned(mut self) -> Self {
        self.tick_aligned = false;
        self
    }

    pub fn no_local_invoke(mut self) -> Self {
        self.invoke_local = false;
        self
    }

    pub fn invokable_during_resim(mut self) -> Self {
        self.invoke_resim = true;
        self
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Keys
// ══════════════════════════════════════════════════════════════════════════════

/// Routing key of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RpcKey {
    /// Index within the declaring behaviour's inheritance chain.
    Instance(u32),
    /// Name-derived id of a static RPC.
    Static(u32),
}

impl RpcKey {
    /// Header discriminator written into every message.
    pub fn discriminator(self) -> i64 {
        match self {
            Self::Instance(_) => 0,
            Self::Static(_) => 1,
        }
    }

    pub fn value(self) -> u32 {
        match self {
            Self::Instance(v) | Self::Static(v) => v,
        }
    }

    pub fn from_header(discriminator: i64, value: u32) -> Option<Self> {
        match discriminator {
            0 => Some(Self::Instance(value)),
            1 => Some(Self::Static(value)),
            _ => None,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ══════════════════════════════════════════════════════════════════════════════

/// Outcome of the local-invocation half of an RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalInvokeResult {
    NotInvoked = 0,
    Invoked = 1,
    NotInvokableLocally = 2,
    NotInvokableDuringResim = 3,
    InsufficientSourceAuthority = 4,
    InsufficientTargetAuthority = 5,
    TargetPlayerIsNotLocal = 6,
}

impl LocalInvokeResult {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::NotInvoked,
            1 => Self::Invoked,
            2 => Self::NotInvokableLocally,
            3 => Self::NotInvokableDuringResim,
            4 => Self::InsufficientSourceAuthority,
            5 => Self::InsufficientTargetAuthority,
            6 => Self::TargetPlayerIsNotLocal,
            _ => return None,
        })
    }
}

/// Outcome of the send half of an RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendCullResult {
    NotSent = 0,
    NotCulled = 1,
    NotInvokableDuringResim = 2,
    InsufficientSourceAuthority = 3,
    TargetPlayerUnreachable = 4,
    TargetPlayerIsLocalButRpcIsNotInvokableLocally = 5,
}

impl SendCullResult {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Self::NotSent,
            1 => Self::NotCulled,
            2 => Self::NotInvokableDuringResim,
            3 => Self::InsufficientSourceAuthority,
            4 => Self::TargetPlayerUnreachable,
            5 => Self::TargetPlayerIsLocalButRpcIsNotInvokableLocally,
            _ => return None,
        })
    }
}

/// Reachability of an explicit RPC target player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetClass {
    Local = 0,
    Unreachable = 1,
    Remote = 2,
}

impl TargetClass {
    pub fn code(self) -> i64 {
        self as i64
    }
}
