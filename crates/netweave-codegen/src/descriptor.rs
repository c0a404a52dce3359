//! Per-type serialization contracts.
//!
//! A [`TypeDescriptor`] knows how many words a value of its type occupies and
//! how to generate code that reads or writes one at a [`CodeGenContext`].
//! Size may depend on the declaring member (capacity, accuracy), so word
//! counts are always computed against a [`MemberConfig`].

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use netweave_types::body::{Expr, Intrinsic, Stmt, ViewKind, ViewSpec};
use netweave_types::ir::{ScalarKind, TypeId, TypeRef, VectorKind};
use netweave_types::{words_for_bytes, ErrorCode, Subject, WeaveError, WeaveResult};

use crate::collections::{self, ContainerKind};
use crate::context::CodeGenContext;
use crate::registry::CodegenHost;
use crate::wrap::WrapDescriptor;

// ══════════════════════════════════════════════════════════════════════════════
// Member configuration
// ══════════════════════════════════════════════════════════════════════════════

/// Per-member settings that change a type's encoding, resolved from
/// attributes and settings before any descriptor is consulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Explicit capacity; `None` means the settings default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    /// Quantization step; `None` means full precision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f32>,
}

impl MemberConfig {
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            capacity: Some(capacity),
            accuracy: None,
        }
    }

    pub fn with_accuracy(accuracy: f32) -> Self {
        Self {
            capacity: None,
            accuracy: Some(accuracy),
        }
    }

    /// Configuration for the elements of a container declared with `self`.
    /// Accuracy carries over; capacity belongs to the container.
    pub fn for_elements(&self) -> Self {
        Self {
            capacity: None,
            accuracy: self.accuracy,
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Descriptors
// ══════════════════════════════════════════════════════════════════════════════

/// Element of a container: its declared type and descriptor.
#[derive(Debug, Clone)]
pub struct ElementDescriptor {
    pub ty: TypeRef,
    pub descriptor: Rc<TypeDescriptor>,
}

/// How a type is encoded.
#[derive(Debug, Clone)]
pub enum DescriptorKind {
    Scalar(ScalarKind),
    Vector(VectorKind),
    /// Bounded text.
    Text,
    /// A laid-out composite, copied as a block.
    Composite(TypeId),
    /// A behaviour reference, stored as its object id.
    ObjectRef(TypeId),
    Wrapped(WrapDescriptor),
    FixedBuffer { element: ScalarKind, capacity: u32 },
    Array(ElementDescriptor),
    LinkedList(ElementDescriptor),
    Dictionary {
        key: ElementDescriptor,
        value: ElementDescriptor,
    },
}

/// The serialization contract of one type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    /// The type this descriptor encodes.
    pub source: TypeRef,
    pub kind: DescriptorKind,
    /// Reached through a pointer or by-ref form; no setter may be generated.
    pub read_only: bool,
}

impl TypeDescriptor {
    pub fn new(source: TypeRef, kind: DescriptorKind) -> Self {
        Self {
            source,
            kind,
            read_only: false,
        }
    }

    /// The same encoding, reached through a reference.
    pub fn as_read_only(&self, source: TypeRef) -> Self {
        Self {
            source,
            kind: self.kind.clone(),
            read_only: true,
        }
    }

    /// Short name of the encoding, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            DescriptorKind::Scalar(_) => "scalar",
            DescriptorKind::Vector(_) => "vector",
            DescriptorKind::Text => "text",
            DescriptorKind::Composite(_) => "composite",
            DescriptorKind::ObjectRef(_) => "object reference",
            DescriptorKind::Wrapped(_) => "wrapped",
            DescriptorKind::FixedBuffer { .. } => "fixed buffer",
            DescriptorKind::Array(_) => "array",
            DescriptorKind::LinkedList(_) => "linked list",
            DescriptorKind::Dictionary { .. } => "dictionary",
        }
    }

    pub fn is_accuracy_supported(&self) -> bool {
        match &self.kind {
            DescriptorKind::Scalar(s) => s.is_float(),
            DescriptorKind::Vector(_) => true,
            DescriptorKind::Array(e) | DescriptorKind::LinkedList(e) => {
                e.descriptor.is_accuracy_supported()
            }
            DescriptorKind::Dictionary { value, .. } => value.descriptor.is_accuracy_supported(),
            DescriptorKind::Wrapped(wrap) => wrap
                .wrapper()
                .is_some_and(|w| w.is_accuracy_supported()),
            _ => false,
        }
    }

    pub fn is_capacity_supported(&self) -> bool {
        match &self.kind {
            DescriptorKind::Text
            | DescriptorKind::Array(_)
            | DescriptorKind::LinkedList(_)
            | DescriptorKind::Dictionary { .. } => true,
            DescriptorKind::Wrapped(wrap) => wrap
                .wrapper()
                .is_some_and(|w| w.is_capacity_supported()),
            _ => false,
        }
    }

    /// Whether a byte copy of the encoded words is a faithful copy of the value.
    pub fn is_trivially_copyable(&self) -> bool {
        matches!(
            self.kind,
            DescriptorKind::Scalar(_)
                | DescriptorKind::Vector(_)
                | DescriptorKind::Composite(_)
                | DescriptorKind::FixedBuffer { .. }
        )
    }

    /// Containers are mutated through a view and never replaced.
    pub fn is_container(&self) -> bool {
        matches!(
            self.kind,
            DescriptorKind::FixedBuffer { .. }
                | DescriptorKind::Array(_)
                | DescriptorKind::LinkedList(_)
                | DescriptorKind::Dictionary { .. }
        )
    }

    /// Reject attributes this type cannot honor.
    pub fn check_config(&self, config: &MemberConfig, subject: &Subject) -> WeaveResult<()> {
        if config.accuracy.is_some() && !self.is_accuracy_supported() {
            return Err(WeaveError::configuration(
                ErrorCode::INVALID_ATTRIBUTE,
                subject.clone(),
                format!("accuracy is not supported on a {} member", self.kind_name()),
            )
            .with_suggestion("accuracy applies to f32, f64 and vector members"));
        }
        if config.capacity.is_some() && !self.is_capacity_supported() {
            return Err(WeaveError::configuration(
                ErrorCode::INVALID_ATTRIBUTE,
                subject.clone(),
                format!("capacity is not supported on a {} member", self.kind_name()),
            ));
        }
        Ok(())
    }

    // ── Size ─────────────────────────────────────────────────────────────

    /// Word count of a member of this type configured with `config`.
    pub fn words(&self, host: &mut dyn CodegenHost, config: &MemberConfig) -> WeaveResult<u32> {
        Ok(match &self.kind {
            DescriptorKind::Scalar(s) => {
                if config.accuracy.is_some() && s.is_float() {
                    1
                } else {
                    words_for_bytes(s.byte_size())
                }
            }
            DescriptorKind::Vector(v) => v.lanes(),
            DescriptorKind::Text => {
                let capacity = capacity_of(host, config, ContainerKind::Text, &self.source)?;
                self.fits(host, collections::text_words(capacity))?
            }
            DescriptorKind::Composite(id) => host.composite_words(*id)?,
            DescriptorKind::ObjectRef(_) => 1,
            DescriptorKind::Wrapped(wrap) => wrap.words(host, config)?,
            DescriptorKind::FixedBuffer { element, capacity } => self.fits(
                host,
                collections::fixed_buffer_words(*capacity, element.byte_size()),
            )?,
            DescriptorKind::Array(e) => {
                let capacity = capacity_of(host, config, ContainerKind::Array, &self.source)?;
                let element = e.descriptor.words(host, &config.for_elements())?;
                self.fits(host, collections::array_words(capacity, element))?
            }
            DescriptorKind::LinkedList(e) => {
                let capacity = capacity_of(host, config, ContainerKind::LinkedList, &self.source)?;
                let element = e.descriptor.words(host, &config.for_elements())?;
                self.fits(host, collections::linked_list_words(capacity, element))?
            }
            DescriptorKind::Dictionary { key, value } => {
                let capacity = capacity_of(host, config, ContainerKind::Dictionary, &self.source)?;
                let key_words = key.descriptor.words(host, &MemberConfig::default())?;
                let value_words = value.descriptor.words(host, &config.for_elements())?;
                self.fits(
                    host,
                    collections::dictionary_words(capacity, key_words, value_words),
                )?
            }
        })
    }

    fn fits(&self, host: &dyn CodegenHost, words: Option<u32>) -> WeaveResult<u32> {
        words.ok_or_else(|| {
            WeaveError::layout(
                ErrorCode::SIZE_OVERFLOW,
                Subject::ty(host.module().display_type(&self.source)),
                "size does not fit in a 32-bit word count",
            )
        })
    }

    // ── Codegen ──────────────────────────────────────────────────────────

    /// An expression producing the value stored at the context's address.
    pub fn emit_read(&self, host: &mut dyn CodegenHost, ctx: &CodeGenContext) -> WeaveResult<Expr> {
        let addr = ctx.address();
        let accuracy = ctx.config().accuracy;
        Ok(match &self.kind {
            DescriptorKind::Scalar(s) => match accuracy {
                Some(accuracy) if s.is_float() => Expr::Dequantize {
                    accuracy,
                    value: Box::new(Expr::load(ScalarKind::I32, addr)),
                },
                _ => Expr::load(*s, addr),
            },
            DescriptorKind::Vector(kind) => Expr::MakeVector {
                kind: *kind,
                lanes: (0..kind.lanes())
                    .map(|i| {
                        let lane = Expr::offset(addr.clone(), i);
                        match accuracy {
                            Some(accuracy) => Expr::Dequantize {
                                accuracy,
                                value: Box::new(Expr::load(ScalarKind::I32, lane)),
                            },
                            None => Expr::load(ScalarKind::F32, lane),
                        }
                    })
                    .collect(),
            },
            DescriptorKind::Text => {
                let capacity = capacity_of(host, ctx.config(), ContainerKind::Text, &self.source)?;
                Expr::intrinsic(Intrinsic::ReadText { capacity }, vec![addr])
            }
            DescriptorKind::Composite(id) => {
                let words = host.composite_words(*id)?;
                Expr::intrinsic(Intrinsic::ReadBlock { ty: *id, words }, vec![addr])
            }
            DescriptorKind::ObjectRef(_) => Expr::intrinsic(
                Intrinsic::ResolveObject,
                vec![Expr::load(ScalarKind::I32, addr)],
            ),
            DescriptorKind::Wrapped(wrap) => wrap.emit_read(host, ctx)?,
            _ => {
                let spec = self.view_spec(host, ctx.config())?;
                Expr::intrinsic(Intrinsic::MakeView { spec }, vec![addr])
            }
        })
    }

    /// Statements storing `value` at the context's address.
    pub fn emit_write(
        &self,
        host: &mut dyn CodegenHost,
        ctx: &CodeGenContext,
        value: Expr,
    ) -> WeaveResult<Vec<Stmt>> {
        let addr = ctx.address();
        let accuracy = ctx.config().accuracy;
        let mut out = Vec::new();
        match &self.kind {
            DescriptorKind::Scalar(s) => out.push(match accuracy {
                Some(accuracy) if s.is_float() => Stmt::Store {
                    scalar: ScalarKind::I32,
                    ptr: addr,
                    value: Expr::Quantize {
                        accuracy,
                        value: Box::new(value),
                    },
                },
                _ => Stmt::Store {
                    scalar: *s,
                    ptr: addr,
                    value,
                },
            }),
            DescriptorKind::Vector(kind) => {
                let value = ctx.bind(value, "vec", &mut out);
                for i in 0..kind.lanes() {
                    let lane = Expr::Lane {
                        value: Box::new(value.clone()),
                        index: i,
                    };
                    let ptr = Expr::offset(addr.clone(), i);
                    out.push(match accuracy {
                        Some(accuracy) => Stmt::Store {
                            scalar: ScalarKind::I32,
                            ptr,
                            value: Expr::Quantize {
                                accuracy,
                                value: Box::new(lane),
                            },
                        },
                        None => Stmt::Store {
                            scalar: ScalarKind::F32,
                            ptr,
                            value: lane,
                        },
                    });
                }
            }
            DescriptorKind::Text => {
                let capacity = capacity_of(host, ctx.config(), ContainerKind::Text, &self.source)?;
                out.push(Stmt::expr(Expr::intrinsic(
                    Intrinsic::WriteText { capacity },
                    vec![addr, value],
                )));
            }
            DescriptorKind::Composite(id) => {
                let words = host.composite_words(*id)?;
                out.push(Stmt::expr(Expr::intrinsic(
                    Intrinsic::WriteBlock { words },
                    vec![addr, value],
                )));
            }
            DescriptorKind::ObjectRef(_) => out.push(Stmt::Store {
                scalar: ScalarKind::I32,
                ptr: addr,
                value: Expr::intrinsic(Intrinsic::ObjectId, vec![value]),
            }),
            DescriptorKind::Wrapped(wrap) => out.extend(wrap.emit_write(host, ctx, value)?),
            _ => {
                return Err(WeaveError::configuration(
                    ErrorCode::CONTAINER_SETTER,
                    ctx.subject().clone(),
                    format!(
                        "a {} member cannot be assigned; mutate it in place through its view",
                        self.kind_name()
                    ),
                )
                .with_suggestion("remove the setter"))
            }
        }
        Ok(out)
    }

    /// The view parameters of a container member.
    pub fn view_spec(
        &self,
        host: &mut dyn CodegenHost,
        config: &MemberConfig,
    ) -> WeaveResult<ViewSpec> {
        let elements = config.for_elements();
        let empty = ViewSpec {
            kind: ViewKind::Array,
            capacity: 0,
            element_words: 0,
            key_words: 0,
            codec: None,
            key_codec: None,
            scalar: None,
            buckets: 0,
        };
        Ok(match &self.kind {
            DescriptorKind::FixedBuffer { element, capacity } => ViewSpec {
                kind: ViewKind::FixedBuffer,
                capacity: *capacity,
                element_words: 0,
                scalar: Some(*element),
                ..empty
            },
            DescriptorKind::Array(e) | DescriptorKind::LinkedList(e) => {
                let (kind, container) = match self.kind {
                    DescriptorKind::Array(_) => (ViewKind::Array, ContainerKind::Array),
                    _ => (ViewKind::LinkedList, ContainerKind::LinkedList),
                };
                ViewSpec {
                    kind,
                    capacity: capacity_of(host, config, container, &self.source)?,
                    element_words: e.descriptor.words(host, &elements)?,
                    codec: Some(host.element_codec(&e.ty, &elements)?),
                    ..empty
                }
            }
            DescriptorKind::Dictionary { key, value } => {
                let keys = MemberConfig::default();
                let capacity = capacity_of(host, config, ContainerKind::Dictionary, &self.source)?;
                ViewSpec {
                    kind: ViewKind::Dictionary,
                    capacity,
                    element_words: value.descriptor.words(host, &elements)?,
                    key_words: key.descriptor.words(host, &keys)?,
                    codec: Some(host.element_codec(&value.ty, &elements)?),
                    key_codec: Some(host.element_codec(&key.ty, &keys)?),
                    buckets: self.fits(host, collections::next_prime(capacity))?,
                    ..empty
                }
            }
            _ => {
                return Err(WeaveError::configuration(
                    ErrorCode::UNSUPPORTED_TYPE,
                    Subject::ty(host.module().display_type(&self.source)),
                    format!("a {} value has no view", self.kind_name()),
                ))
            }
        })
    }
}

/// Explicit capacity, else the settings default. Zero is a layout error.
fn capacity_of(
    host: &dyn CodegenHost,
    config: &MemberConfig,
    kind: ContainerKind,
    source: &TypeRef,
) -> WeaveResult<u32> {
    let capacity = config
        .capacity
        .unwrap_or_else(|| host.default_capacity(kind));
    if capacity == 0 {
        return Err(WeaveError::layout(
            ErrorCode::ZERO_SIZE,
            Subject::ty(host.module().display_type(source)),
            "capacity must be at least 1",
        ));
    }
    Ok(capacity)
}
