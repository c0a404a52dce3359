//! The per-pass catalog of type descriptors.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use netweave_types::ir::{Module, ScalarKind, TypeId, TypeKind, TypeRef, VectorKind};
use netweave_types::{ErrorCode, Subject, WeaveError, WeaveResult};

use crate::collections::ContainerKind;
use crate::descriptor::{DescriptorKind, ElementDescriptor, MemberConfig, TypeDescriptor};
use crate::wrap::{self, WrapDescriptor, WrapShape};

/// What the registry needs from the pass that owns it.
///
/// Descriptors never lay out composites themselves: sizing a nested
/// composite calls back into the pass, which may recurse into the registry.
pub trait CodegenHost {
    /// The module being woven.
    fn module(&self) -> &Module;

    /// Total word count of a composite, laying it out first if needed.
    fn composite_words(&mut self, ty: TypeId) -> WeaveResult<u32>;

    /// The codec type providing static `read(ptr)` and `write(ptr, value)`
    /// for container elements of `element`, synthesized on first use.
    fn element_codec(&mut self, element: &TypeRef, config: &MemberConfig) -> WeaveResult<TypeId>;

    /// Capacity used when a member declares none.
    fn default_capacity(&self, kind: ContainerKind) -> u32;
}

/// Maps type references to descriptors, memoized for one pass.
///
/// Built-in scalars, vectors, text and player references are seeded at
/// construction; everything else is classified on first request. The cache
/// is behind a `RefCell` so a registry shared through `Rc` can be consulted
/// while the host is mutably borrowed; no borrow is held across host calls.
#[derive(Debug)]
pub struct TypeDescriptorRegistry {
    cache: RefCell<HashMap<TypeRef, Rc<TypeDescriptor>>>,
    building: RefCell<Vec<TypeRef>>,
}

impl Default for TypeDescriptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeDescriptorRegistry {
    pub fn new() -> Self {
        const SCALARS: [ScalarKind; 12] = [
            ScalarKind::Bool,
            ScalarKind::I8,
            ScalarKind::U8,
            ScalarKind::I16,
            ScalarKind::U16,
            ScalarKind::Char,
            ScalarKind::I32,
            ScalarKind::U32,
            ScalarKind::F32,
            ScalarKind::I64,
            ScalarKind::U64,
            ScalarKind::F64,
        ];
        const VECTORS: [VectorKind; 4] = [
            VectorKind::Vec2,
            VectorKind::Vec3,
            VectorKind::Vec4,
            VectorKind::Quat,
        ];

        let mut cache = HashMap::new();
        let mut seed = |ty: TypeRef, kind: DescriptorKind| {
            cache.insert(ty.clone(), Rc::new(TypeDescriptor::new(ty, kind)));
        };
        for s in SCALARS {
            seed(TypeRef::Scalar(s), DescriptorKind::Scalar(s));
        }
        for v in VECTORS {
            seed(TypeRef::Vector(v), DescriptorKind::Vector(v));
        }
        seed(TypeRef::String, DescriptorKind::Text);
        seed(TypeRef::Player, DescriptorKind::Scalar(ScalarKind::I32));

        Self {
            cache: RefCell::new(cache),
            building: RefCell::new(Vec::new()),
        }
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    /// Whether `ty` already has a descriptor.
    pub fn contains(&self, ty: &TypeRef) -> bool {
        self.cache.borrow().contains_key(ty)
    }

    /// The descriptor of `ty`, building and caching it on first request.
    /// Errors name `subject`, the declaration that needed the type.
    pub fn descriptor(
        &self,
        host: &mut dyn CodegenHost,
        ty: &TypeRef,
        subject: &Subject,
    ) -> WeaveResult<Rc<TypeDescriptor>> {
        if let Some(found) = self.cache.borrow().get(ty) {
            return Ok(Rc::clone(found));
        }
        if self.building.borrow().contains(ty) {
            return Err(WeaveError::layout(
                ErrorCode::CYCLIC_COMPOSITE,
                subject.clone(),
                format!(
                    "{} is defined in terms of itself",
                    host.module().display_type(ty)
                ),
            ));
        }

        self.building.borrow_mut().push(ty.clone());
        let built = self.build(host, ty, subject);
        self.building.borrow_mut().retain(|t| t != ty);

        let descriptor = Rc::new(built?);
        tracing::debug!(
            ty = %host.module().display_type(ty),
            kind = descriptor.kind_name(),
            "registered descriptor"
        );
        self.cache
            .borrow_mut()
            .insert(ty.clone(), Rc::clone(&descriptor));
        Ok(descriptor)
    }

    fn build(
        &self,
        host: &mut dyn CodegenHost,
        ty: &TypeRef,
        subject: &Subject,
    ) -> WeaveResult<TypeDescriptor> {
        let unsupported = |host: &dyn CodegenHost, why: &str| {
            WeaveError::configuration(
                ErrorCode::UNSUPPORTED_TYPE,
                subject.clone(),
                format!("{} {why}", host.module().display_type(ty)),
            )
        };

        match ty {
            // ── (a) references delegate to their element ──
            TypeRef::Pointer(inner) | TypeRef::ByRef(inner) => {
                let element = self.descriptor(host, inner, subject)?;
                Ok(element.as_read_only(ty.clone()))
            }

            // ── (b) fixed-capacity containers ──
            TypeRef::FixedBuffer { element, capacity } => {
                if *capacity == 0 {
                    return Err(WeaveError::layout(
                        ErrorCode::ZERO_SIZE,
                        subject.clone(),
                        "fixed buffer capacity must be at least 1",
                    ));
                }
                Ok(TypeDescriptor::new(
                    ty.clone(),
                    DescriptorKind::FixedBuffer {
                        element: *element,
                        capacity: *capacity,
                    },
                ))
            }
            TypeRef::Array(element) => {
                let element = self.element(host, element, subject)?;
                Ok(TypeDescriptor::new(ty.clone(), DescriptorKind::Array(element)))
            }
            TypeRef::LinkedList(element) => {
                let element = self.element(host, element, subject)?;
                Ok(TypeDescriptor::new(
                    ty.clone(),
                    DescriptorKind::LinkedList(element),
                ))
            }
            TypeRef::Dictionary(key, value) => {
                let key = self.element(host, key, subject)?;
                let value = self.element(host, value, subject)?;
                Ok(TypeDescriptor::new(
                    ty.clone(),
                    DescriptorKind::Dictionary { key, value },
                ))
            }

            TypeRef::Named(id) => self.build_named(host, ty, *id, subject),

            TypeRef::Scalar(s) => Ok(TypeDescriptor::new(ty.clone(), DescriptorKind::Scalar(*s))),
            TypeRef::Vector(v) => Ok(TypeDescriptor::new(ty.clone(), DescriptorKind::Vector(*v))),
            TypeRef::String => Ok(TypeDescriptor::new(ty.clone(), DescriptorKind::Text)),
            TypeRef::Player => Ok(TypeDescriptor::new(
                ty.clone(),
                DescriptorKind::Scalar(ScalarKind::I32),
            )),

            TypeRef::Generic(name) => Err(WeaveError::configuration(
                ErrorCode::UNRESOLVED_GENERIC,
                subject.clone(),
                format!("open generic parameter `{name}` cannot be laid out"),
            )
            .with_suggestion("use a closed type")),
            TypeRef::Void => Err(unsupported(&*host, "has no encoding")),
            TypeRef::Runner | TypeRef::Message | TypeRef::RpcInfo | TypeRef::RpcInvokeInfo => {
                Err(unsupported(&*host, "is a runtime type and cannot be serialized"))
            }
        }
    }

    fn build_named(
        &self,
        host: &mut dyn CodegenHost,
        ty: &TypeRef,
        id: TypeId,
        subject: &Subject,
    ) -> WeaveResult<TypeDescriptor> {
        let module = host.module();
        let Some(def) = module.get(id) else {
            return Err(WeaveError::configuration(
                ErrorCode::UNSUPPORTED_TYPE,
                subject.clone(),
                format!("type {id} is not defined in module {}", module.name),
            ));
        };
        if def.is_generic_definition() {
            return Err(WeaveError::configuration(
                ErrorCode::UNRESOLVED_GENERIC,
                subject.clone(),
                format!(
                    "{} is an open generic type ({} unresolved)",
                    def.name,
                    def.generic_params.join(", ")
                ),
            ));
        }
        let name = def.name.clone();
        let kind = def.kind;
        let is_composite = def.is_composite();
        let is_behaviour = def.is_behaviour();
        let signature = wrap::discover(module, id)?;

        // ── (c) wrap pairs ──
        if let Some(signature) = signature {
            let wrap = match &signature.shape {
                WrapShape::Raw { .. } => WrapDescriptor::raw(signature),
                WrapShape::Wrapper { wrapper } => {
                    let wrapper_ty = wrapper.clone();
                    let inner = self.descriptor(host, &wrapper_ty, subject)?;
                    if inner.is_container() {
                        return Err(WeaveError::configuration(
                            ErrorCode::WRAP_SIGNATURE,
                            subject.clone(),
                            format!(
                                "wrapper type {} is a container; wrappers must be assignable",
                                host.module().display_type(&wrapper_ty)
                            ),
                        ));
                    }
                    WrapDescriptor::wrapped(signature, inner)
                }
            };
            return Ok(TypeDescriptor::new(ty.clone(), DescriptorKind::Wrapped(wrap)));
        }

        // ── (d) composites, then enums and behaviour references ──
        if is_composite {
            return Ok(TypeDescriptor::new(ty.clone(), DescriptorKind::Composite(id)));
        }
        if let TypeKind::Enum(underlying) = kind {
            return Ok(TypeDescriptor::new(
                ty.clone(),
                DescriptorKind::Scalar(underlying),
            ));
        }
        if is_behaviour {
            return Ok(TypeDescriptor::new(ty.clone(), DescriptorKind::ObjectRef(id)));
        }

        // ── (e) nothing matched ──
        let (why, suggestion) = match kind {
            TypeKind::Class => (
                "is a reference type with no wrap pair",
                "declare WrapSerialize/WrapDeserialize methods on it",
            ),
            _ => (
                "is a value type that is not a networked struct",
                "implement the NetworkStruct capability",
            ),
        };
        Err(WeaveError::configuration(
            ErrorCode::UNSUPPORTED_TYPE,
            subject.clone(),
            format!("{name} {why}"),
        )
        .with_suggestion(suggestion))
    }

    fn element(
        &self,
        host: &mut dyn CodegenHost,
        element: &TypeRef,
        subject: &Subject,
    ) -> WeaveResult<ElementDescriptor> {
        let descriptor = self.descriptor(host, element, subject)?;
        if descriptor.is_container() || descriptor.read_only {
            return Err(WeaveError::configuration(
                ErrorCode::UNSUPPORTED_TYPE,
                subject.clone(),
                format!(
                    "{} cannot be a container element",
                    host.module().display_type(element)
                ),
            )
            .with_suggestion("containers do not nest; wrap the inner container in a networked struct"));
        }
        Ok(ElementDescriptor {
            ty: element.clone(),
            descriptor,
        })
    }
}
