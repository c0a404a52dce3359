//! Descriptor classification, sizing and codegen against a stub host.

use std::collections::HashMap;
use std::rc::Rc;

use netweave_codegen::{
    CodeGenContext, CodegenHost, ContainerKind, DescriptorKind, MemberConfig,
    TypeDescriptorRegistry,
};
use netweave_types::body::{Expr, Intrinsic, Stmt, ViewKind};
use netweave_types::ir::{
    Attribute, MethodDef, Module, ScalarKind, TypeDef, TypeId, TypeKind, TypeRef, VectorKind,
};
use netweave_types::{ErrorCode, Subject, WeaveResult};
use proptest::prelude::*;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

struct StubHost {
    module: Module,
    composite_words: HashMap<TypeId, u32>,
    codecs: HashMap<TypeRef, TypeId>,
}

impl StubHost {
    fn new(module: Module) -> Self {
        Self {
            module,
            composite_words: HashMap::new(),
            codecs: HashMap::new(),
        }
    }
}

impl CodegenHost for StubHost {
    fn module(&self) -> &Module {
        &self.module
    }

    fn composite_words(&mut self, ty: TypeId) -> WeaveResult<u32> {
        Ok(self.composite_words.get(&ty).copied().unwrap_or(2))
    }

    fn element_codec(&mut self, element: &TypeRef, _config: &MemberConfig) -> WeaveResult<TypeId> {
        if let Some(id) = self.codecs.get(element) {
            return Ok(*id);
        }
        let name = format!("@Codec<{}>", self.module.display_type(element));
        let id = self.module.add_type(TypeDef::new(name, TypeKind::Class));
        self.codecs.insert(element.clone(), id);
        Ok(id)
    }

    fn default_capacity(&self, kind: ContainerKind) -> u32 {
        match kind {
            ContainerKind::Text => 16,
            _ => 1,
        }
    }
}

fn subject() -> Subject {
    Subject::member("Test", "Member")
}

fn words_of(host: &mut StubHost, ty: TypeRef, config: MemberConfig) -> WeaveResult<u32> {
    let registry = TypeDescriptorRegistry::new();
    let descriptor = registry.descriptor(host, &ty, &subject())?;
    descriptor.check_config(&config, &subject())?;
    descriptor.words(host, &config)
}

fn empty_host() -> StubHost {
    StubHost::new(Module::new("Test"))
}

const I32: TypeRef = TypeRef::Scalar(ScalarKind::I32);
const F32: TypeRef = TypeRef::Scalar(ScalarKind::F32);

// ══════════════════════════════════════════════════════════════════════════════
// Sizing
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_scalar_word_counts() {
    let mut host = empty_host();
    for (scalar, words) in [
        (ScalarKind::Bool, 1),
        (ScalarKind::U8, 1),
        (ScalarKind::Char, 1),
        (ScalarKind::I32, 1),
        (ScalarKind::F32, 1),
        (ScalarKind::I64, 2),
        (ScalarKind::F64, 2),
    ] {
        let got = words_of(&mut host, TypeRef::Scalar(scalar), MemberConfig::default()).unwrap();
        assert_eq!(got, words, "{scalar:?}");
    }
}

#[test]
fn test_double_with_accuracy_takes_one_word() {
    let mut host = empty_host();
    let words = words_of(
        &mut host,
        TypeRef::Scalar(ScalarKind::F64),
        MemberConfig::with_accuracy(0.01),
    )
    .unwrap();
    assert_eq!(words, 1);
}

#[test]
fn test_vector_lanes() {
    let mut host = empty_host();
    let vec3 = TypeRef::Vector(VectorKind::Vec3);
    assert_eq!(words_of(&mut host, vec3.clone(), MemberConfig::default()).unwrap(), 3);
    assert_eq!(words_of(&mut host, vec3, MemberConfig::with_accuracy(0.1)).unwrap(), 3);
    let quat = TypeRef::Vector(VectorKind::Quat);
    assert_eq!(words_of(&mut host, quat, MemberConfig::default()).unwrap(), 4);
}

#[test]
fn test_text_capacity() {
    let mut host = empty_host();
    assert_eq!(words_of(&mut host, TypeRef::String, MemberConfig::default()).unwrap(), 9);
    assert_eq!(words_of(&mut host, TypeRef::String, MemberConfig::with_capacity(3)).unwrap(), 3);
}

#[test]
fn test_fixed_byte_buffer_of_ten() {
    let mut host = empty_host();
    let buffer = TypeRef::FixedBuffer {
        element: ScalarKind::U8,
        capacity: 10,
    };
    assert_eq!(words_of(&mut host, buffer, MemberConfig::default()).unwrap(), 3);
}

#[test]
fn test_container_word_counts() {
    let mut host = empty_host();
    let array = TypeRef::array(TypeRef::Vector(VectorKind::Vec3));
    assert_eq!(words_of(&mut host, array, MemberConfig::with_capacity(2)).unwrap(), 6);

    let list = TypeRef::linked_list(I32);
    assert_eq!(words_of(&mut host, list, MemberConfig::with_capacity(4)).unwrap(), 3 + 4 * 3);

    let dict = TypeRef::dictionary(I32, F32);
    assert_eq!(
        words_of(&mut host, dict, MemberConfig::with_capacity(4)).unwrap(),
        3 + 5 + 4 * 3
    );
}

#[test]
fn test_zero_capacity_is_layout_error() {
    let mut host = empty_host();
    let err = words_of(&mut host, TypeRef::array(I32), MemberConfig::with_capacity(0)).unwrap_err();
    assert_eq!(err.code, ErrorCode::ZERO_SIZE);
}

#[test]
fn test_enum_and_behaviour_reference() {
    let mut module = Module::new("Test");
    let color = module.add_type(TypeDef::new("Color", TypeKind::Enum(ScalarKind::U8)));
    let actor = module.add_type(TypeDef::behaviour("Actor"));
    let mut host = StubHost::new(module);
    assert_eq!(
        words_of(&mut host, TypeRef::Named(color), MemberConfig::default()).unwrap(),
        1
    );
    assert_eq!(
        words_of(&mut host, TypeRef::Named(actor), MemberConfig::default()).unwrap(),
        1
    );
}

#[test]
fn test_composite_sizes_come_from_host() {
    let mut module = Module::new("Test");
    let stats = module.add_type(TypeDef::network_struct("Stats"));
    let mut host = StubHost::new(module);
    host.composite_words.insert(stats, 7);
    let array = TypeRef::array(TypeRef::Named(stats));
    assert_eq!(words_of(&mut host, array, MemberConfig::with_capacity(3)).unwrap(), 21);
}

proptest! {
    #[test]
    fn prop_array_words_match_formula(capacity in 1u32..64, composite in 1u32..32) {
        let mut module = Module::new("Test");
        let item = module.add_type(TypeDef::network_struct("Item"));
        let mut host = StubHost::new(module);
        host.composite_words.insert(item, composite);
        let words = words_of(
            &mut host,
            TypeRef::array(TypeRef::Named(item)),
            MemberConfig::with_capacity(capacity),
        ).unwrap();
        prop_assert_eq!(words, capacity * composite);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Classification errors
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_generic_parameter_is_unresolved() {
    let mut host = empty_host();
    let err = words_of(&mut host, TypeRef::Generic("T".into()), MemberConfig::default())
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UNRESOLVED_GENERIC);
    assert_eq!(err.subject, subject());
}

#[test]
fn test_plain_class_is_unsupported() {
    let mut module = Module::new("Test");
    let item = module.add_type(TypeDef::new("Item", TypeKind::Class));
    let mut host = StubHost::new(module);
    let err = words_of(&mut host, TypeRef::Named(item), MemberConfig::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::UNSUPPORTED_TYPE);
    assert!(err.message.contains("no wrap pair"));
}

#[test]
fn test_nested_containers_rejected() {
    let mut host = empty_host();
    let nested = TypeRef::array(TypeRef::array(I32));
    let err = words_of(&mut host, nested, MemberConfig::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::UNSUPPORTED_TYPE);
}

#[test]
fn test_accuracy_on_integer_rejected() {
    let mut host = empty_host();
    let err = words_of(&mut host, I32, MemberConfig::with_accuracy(0.5)).unwrap_err();
    assert_eq!(err.code, ErrorCode::INVALID_ATTRIBUTE);
}

#[test]
fn test_mutual_wrappers_are_cyclic() {
    let mut module = Module::new("Test");
    let a = TypeId(0);
    let b = TypeId(1);
    let pair = |this: TypeId, other: TypeId| {
        vec![
            MethodDef::new("Wrap")
                .static_method()
                .with_attribute(Attribute::WrapSerialize)
                .param("value", TypeRef::Named(this))
                .returns(TypeRef::Named(other)),
            MethodDef::new("Unwrap")
                .static_method()
                .with_attribute(Attribute::WrapDeserialize)
                .param("value", TypeRef::Named(other))
                .returns(TypeRef::Named(this)),
        ]
    };
    let mut def_a = TypeDef::new("A", TypeKind::Class);
    def_a.methods = pair(a, b);
    let mut def_b = TypeDef::new("B", TypeKind::Class);
    def_b.methods = pair(b, a);
    module.add_type(def_a);
    module.add_type(def_b);
    let mut host = StubHost::new(module);
    let err = words_of(&mut host, TypeRef::Named(a), MemberConfig::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::CYCLIC_COMPOSITE);
}

// ══════════════════════════════════════════════════════════════════════════════
// Codegen
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_registry_memoizes() {
    let mut host = empty_host();
    let registry = TypeDescriptorRegistry::new();
    let seeded = registry.len();
    let ty = TypeRef::array(I32);
    let first = registry.descriptor(&mut host, &ty, &subject()).unwrap();
    let second = registry.descriptor(&mut host, &ty, &subject()).unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), seeded + 1);
}

#[test]
fn test_quantized_float_codegen() {
    let mut host = empty_host();
    let registry = TypeDescriptorRegistry::new();
    let descriptor = registry.descriptor(&mut host, &F32, &subject()).unwrap();
    let ctx = CodeGenContext::new(Expr::local("ptr"), subject())
        .at(1)
        .with_config(MemberConfig::with_accuracy(0.01));

    let read = descriptor.emit_read(&mut host, &ctx).unwrap();
    assert!(matches!(read, Expr::Dequantize { .. }));

    let write = descriptor.emit_write(&mut host, &ctx, Expr::local("value")).unwrap();
    match write.as_slice() {
        [Stmt::Store { scalar, value, .. }] => {
            assert_eq!(*scalar, ScalarKind::I32);
            assert!(matches!(value, Expr::Quantize { .. }));
        }
        other => panic!("unexpected write: {other:?}"),
    }
}

#[test]
fn test_container_setter_rejected_and_view_built() {
    let mut host = empty_host();
    let registry = TypeDescriptorRegistry::new();
    let ty = TypeRef::dictionary(I32, F32);
    let descriptor = registry.descriptor(&mut host, &ty, &subject()).unwrap();
    let ctx = CodeGenContext::new(Expr::local("ptr"), subject())
        .with_config(MemberConfig::with_capacity(4));

    let err = descriptor
        .emit_write(&mut host, &ctx, Expr::local("value"))
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::CONTAINER_SETTER);

    match descriptor.emit_read(&mut host, &ctx).unwrap() {
        Expr::Intrinsic {
            op: Intrinsic::MakeView { spec },
            ..
        } => {
            assert_eq!(spec.kind, ViewKind::Dictionary);
            assert_eq!(spec.buckets, 5);
            assert_eq!(spec.capacity, 4);
            assert!(spec.codec.is_some() && spec.key_codec.is_some());
        }
        other => panic!("unexpected read: {other:?}"),
    }
}

#[test]
fn test_wrapper_reuses_wrapper_encoding() {
    let mut module = Module::new("Test");
    let data = module.add_type(TypeDef::network_struct("ItemData"));
    let item = TypeId(1);
    module.add_type(
        TypeDef::new("Item", TypeKind::Class)
            .with_method(
                MethodDef::new("Wrap")
                    .static_method()
                    .with_attribute(Attribute::WrapSerialize)
                    .param("runner", TypeRef::Runner)
                    .param("value", TypeRef::Named(item))
                    .returns(TypeRef::Named(data)),
            )
            .with_method(
                MethodDef::new("Unwrap")
                    .static_method()
                    .with_attribute(Attribute::WrapDeserialize)
                    .param("runner", TypeRef::Runner)
                    .param("data", TypeRef::Named(data))
                    .returns(TypeRef::Named(item)),
            ),
    );
    let mut host = StubHost::new(module);
    host.composite_words.insert(data, 5);
    let registry = TypeDescriptorRegistry::new();
    let descriptor = registry
        .descriptor(&mut host, &TypeRef::Named(item), &subject())
        .unwrap();
    assert!(matches!(descriptor.kind, DescriptorKind::Wrapped(_)));
    assert_eq!(descriptor.words(&mut host, &MemberConfig::default()).unwrap(), 5);

    // Without a runner in scope the conversion cannot be called.
    let bare = CodeGenContext::new(Expr::local("ptr"), subject());
    let err = descriptor.emit_read(&mut host, &bare).unwrap_err();
    assert_eq!(err.code, ErrorCode::STATIC_CONTEXT);

    let ctx = bare.with_runner(Expr::local("runner"));
    let write = descriptor
        .emit_write(&mut host, &ctx, Expr::local("value"))
        .unwrap();
    match write.as_slice() {
        [Stmt::Expr {
            expr: Expr::Intrinsic {
                op: Intrinsic::WriteBlock { words },
                args,
            },
        }] => {
            assert_eq!(*words, 5);
            assert!(matches!(&args[1], Expr::Call { method, .. } if method.name == "Wrap"));
        }
        other => panic!("unexpected write: {other:?}"),
    }
}
