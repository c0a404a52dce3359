//! netweave descriptor layer: word sizes and buffer codegen per type.
//!
//! # Architecture
//!
//! Every type that can live in a network buffer has a [`TypeDescriptor`]
//! describing its word count and how to read or write it. Descriptors are
//! obtained from a [`TypeDescriptorRegistry`], which classifies types in a
//! fixed order:
//!
//! 1. pointer and by-ref forms delegate to their element, read-only
//! 2. fixed-capacity containers (fixed buffer, array, linked list, dictionary)
//! 3. types declaring a wrap/unwrap pair ([`wrap`])
//! 4. networked composites, then enums and behaviour references
//! 5. anything else is a configuration error
//!
//! Generated code is expressed in the body IR of `netweave_types::body`.
//! Descriptors emit it at a [`CodeGenContext`], a cursor naming the buffer,
//! the current word offset and the declaring member's configuration. The
//! same descriptor therefore serves property accessors, element codecs and
//! RPC argument marshalling.
//!
//! The registry never drives layout itself. It calls back into the owning
//! pass through [`CodegenHost`] when a nested composite needs sizing or a
//! container needs an element codec.

pub mod collections;
pub mod context;
pub mod descriptor;
pub mod registry;
pub mod types;
pub mod wrap;

pub use collections::{next_prime, ContainerKind};
pub use context::CodeGenContext;
pub use descriptor::{DescriptorKind, ElementDescriptor, MemberConfig, TypeDescriptor};
pub use registry::{CodegenHost, TypeDescriptorRegistry};
pub use wrap::{WrapDescriptor, WrapShape, WrapSignature};
