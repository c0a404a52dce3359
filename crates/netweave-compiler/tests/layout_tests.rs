//! Integration tests for struct and behaviour layout.
//!
//! Each test builds a module by hand, weaves it, and checks the result both
//! structurally (layouts, stamps, generated members) and by running the
//! woven module in the reference runtime:
//! - word-aligned member layout and inheritance
//! - fixed-capacity containers and text
//! - initializer relocation and struct constructors
//! - wrap pairs
//! - idempotence and transactional failure
//! - configuration, layout and validation errors

use proptest::prelude::*;

use netweave_codegen::types::{default_field_name, COPY_BUFFER_TO_DEFAULTS, COPY_DEFAULTS_TO_BUFFER};
use netweave_compiler::{weave, DictionaryBacking, WeaveOutcome, WeaverSettings};
use netweave_eval::{EvalError, Runtime, Value};
use netweave_types::body::{BinaryOp, Expr, Place, Stmt};
use netweave_types::ir::{
    AccuracySpec, Attribute, FieldDef, MethodDef, Module, PropertyDef, ScalarKind, Stamp, TypeDef,
    TypeId, TypeKind, TypeRef,
};
use netweave_types::{ErrorCategory, ErrorCode, LogLevel, Subject, WeaveError};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

const BOOL: TypeRef = TypeRef::Scalar(ScalarKind::Bool);
const I32: TypeRef = TypeRef::Scalar(ScalarKind::I32);
const F32: TypeRef = TypeRef::Scalar(ScalarKind::F32);

fn weave_with(mut module: Module, settings: &WeaverSettings) -> (Module, WeaveOutcome) {
    let outcome = weave(&mut module, settings).unwrap();
    (module, outcome)
}

fn weave_ok(module: Module) -> (Module, WeaveOutcome) {
    weave_with(module, &WeaverSettings::default())
}

fn weave_err(module: Module) -> WeaveError {
    let mut module = module;
    weave(&mut module, &WeaverSettings::default()).unwrap_err()
}

/// A module holding the single type `def`.
fn single(def: TypeDef) -> Module {
    let mut module = Module::new("Game");
    module.add_type(def);
    module
}

fn def<'m>(module: &'m Module, name: &str) -> &'m TypeDef {
    module.get(module.find(name).unwrap()).unwrap()
}

/// `Vec2i { X: i32, Y: i32 }`, a two-word networked struct.
fn vec2i() -> TypeDef {
    TypeDef::network_struct("Vec2i")
        .with_property(PropertyDef::networked("X", I32))
        .with_property(PropertyDef::networked("Y", I32))
}

fn int(v: i64) -> Value {
    Value::Int(v)
}

// ══════════════════════════════════════════════════════════════════════════════
// Struct layout
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn bool_and_float_struct_takes_two_words() {
    let (module, outcome) = weave_ok(single(
        TypeDef::network_struct("Sample")
            .with_property(PropertyDef::networked("Flag", BOOL))
            .with_property(PropertyDef::networked("Value", F32)),
    ));
    assert!(outcome.modified);

    let layout = &outcome.layouts["Sample"];
    assert_eq!(layout.base_words, 0);
    assert_eq!(layout.total_words, 2);
    let slots: Vec<(&str, u32, u32)> = layout
        .members
        .iter()
        .map(|m| (m.name.as_str(), m.offset_words, m.words))
        .collect();
    assert_eq!(slots, vec![("Flag", 0, 1), ("Value", 1, 1)]);

    let sample = def(&module, "Sample");
    assert_eq!(sample.stamp, Some(Stamp::Laid { words: 2 }));
    assert!(sample.fields.is_empty(), "backing fields are removed");
    assert!(sample.property("Value").unwrap().slot.is_some());
}

#[test]
fn struct_members_read_and_write_their_words() {
    let (module, _) = weave_ok(single(vec2i()));
    let mut rt = Runtime::new(module);
    let v = rt.new_struct("Vec2i").unwrap();
    rt.set(&v, "X", int(3)).unwrap();
    rt.set(&v, "Y", int(-4)).unwrap();
    assert_eq!(rt.get(&v, "X").unwrap(), int(3));
    assert_eq!(rt.get(&v, "Y").unwrap(), int(-4));
    assert_eq!(rt.struct_words(&v).unwrap(), vec![3, -4]);
}

#[test]
fn struct_constructor_assignments_become_buffer_writes() {
    let (module, _) = weave_ok(single(vec2i().with_constructor(MethodDef::constructor(vec![
        Stmt::assign(Place::this_member("Y"), Expr::int(7)),
    ]))));
    let ctor = &def(&module, "Vec2i").constructors[0];
    assert!(matches!(ctor.body.as_slice(), [Stmt::Store { .. }]));

    let mut rt = Runtime::new(module);
    let v = rt.new_struct("Vec2i").unwrap();
    assert_eq!(rt.struct_words(&v).unwrap(), vec![0, 7]);
}

#[test]
fn byte_buffer_of_ten_takes_three_words() {
    let (module, outcome) = weave_ok(single(
        TypeDef::network_struct("Packet").with_property(
            PropertyDef::auto_readonly(
                "Data",
                TypeRef::FixedBuffer {
                    element: ScalarKind::U8,
                    capacity: 10,
                },
            )
            .with_attribute(Attribute::Networked),
        ),
    ));
    assert_eq!(outcome.layouts["Packet"].total_words, 3);
    assert_eq!(outcome.layouts["Packet"].members[0].encoding, "fixed buffer");
    assert_eq!(outcome.warnings().count(), 0, "containers are never reported as unassigned");

    let mut rt = Runtime::new(module);
    let packet = rt.new_struct("Packet").unwrap();
    let data = rt.get(&packet, "Data").unwrap();
    rt.view_set(&data, int(9), int(0xAB)).unwrap();
    assert_eq!(rt.view_get(&data, int(9)).unwrap(), int(0xAB));
    assert_eq!(rt.view_len(&data).unwrap(), 10);
}

#[test]
fn struct_embedded_in_a_behaviour() {
    let mut module = Module::new("Game");
    let v = module.add_type(vec2i());
    module.add_type(
        TypeDef::behaviour("Holder")
            .with_property(PropertyDef::networked("Pos", TypeRef::Named(v)))
            .with_property(PropertyDef::networked("Hp", I32)),
    );
    let (module, outcome) = weave_ok(module);
    let holder = &outcome.layouts["Holder"];
    assert_eq!(holder.total_words, 3);
    assert_eq!(holder.members[0].encoding, "composite");
    assert_eq!(holder.members[1].offset_words, 2);

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Holder").unwrap();
    let pos = rt.new_struct("Vec2i").unwrap();
    rt.set(&pos, "X", int(11)).unwrap();
    rt.set(&obj, "Pos", pos).unwrap();
    rt.set(&obj, "Hp", int(50)).unwrap();
    assert_eq!(rt.state_words(&obj).unwrap(), vec![11, 0, 50]);

    let copy = rt.get(&obj, "Pos").unwrap();
    assert_eq!(rt.get(&copy, "X").unwrap(), int(11));
}

#[test]
fn derived_struct_declared_before_its_base() {
    let mut module = Module::new("Game");
    module.add_type(
        TypeDef::network_struct("Vec3i")
            .with_base(TypeId(1))
            .with_property(PropertyDef::networked("Z", I32)),
    );
    module.add_type(vec2i());
    let (module, outcome) = weave_ok(module);

    let derived = &outcome.layouts["Vec3i"];
    assert_eq!(derived.base_words, 2);
    assert_eq!(derived.total_words, 3);
    assert_eq!(derived.members.len(), 1);
    assert_eq!(derived.members[0].offset_words, 2);
    assert_eq!(outcome.layouts["Vec2i"].total_words, 2);
    assert_eq!(def(&module, "Vec3i").stamp, Some(Stamp::Laid { words: 3 }));

    let mut rt = Runtime::new(module);
    let v = rt.new_struct("Vec3i").unwrap();
    rt.set(&v, "X", int(4)).unwrap();
    rt.set(&v, "Z", int(9)).unwrap();
    assert_eq!(rt.struct_words(&v).unwrap(), vec![4, 0, 9]);
    assert_eq!(rt.get(&v, "X").unwrap(), int(4));
}

#[test]
fn quantized_float_takes_one_word() {
    let (module, outcome) = weave_ok(single(
        TypeDef::behaviour("Car")
            .with_property(PropertyDef::networked("Speed", F32).with_accuracy(0.01))
            .with_property(PropertyDef::networked("Heading", TypeRef::Scalar(ScalarKind::F64)).with_accuracy(0.5)),
    ));
    let car = &outcome.layouts["Car"];
    assert_eq!(car.members[0].words, 1);
    assert_eq!(car.members[1].words, 1);

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Car").unwrap();
    rt.set(&obj, "Speed", Value::Float(1.234)).unwrap();
    assert_eq!(rt.state_words(&obj).unwrap()[0], 123);
    let speed = rt.get(&obj, "Speed").unwrap().as_float().unwrap();
    assert!((speed - 1.23).abs() < 1e-4, "got {speed}");
}

#[test]
fn named_accuracy_comes_from_settings() {
    let car = || {
        single(TypeDef::behaviour("Car").with_property(
            PropertyDef::networked("Speed", F32)
                .with_attribute(Attribute::Accuracy(AccuracySpec::Named("fine".into()))),
        ))
    };
    assert_eq!(weave_err(car()).code, ErrorCode::UNKNOWN_ACCURACY);

    let settings = WeaverSettings::default().with_accuracy("fine", 0.1);
    let (module, _) = weave_with(car(), &settings);
    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Car").unwrap();
    rt.set(&obj, "Speed", Value::Float(2.0)).unwrap();
    assert_eq!(rt.state_words(&obj).unwrap(), vec![20]);
}

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

proptest! {
    #[test]
    fn member_words_add_up_to_the_stamp(
        kinds in prop::collection::vec(prop::sample::select(SCALARS.to_vec()), 1..12)
    ) {
        let mut packed = TypeDef::network_struct("Packed");
        for (i, kind) in kinds.iter().enumerate() {
            packed = packed.with_property(PropertyDef::networked(format!("M{i}"), TypeRef::Scalar(*kind)));
        }
        let (module, outcome) = weave_ok(single(packed));
        let layout = &outcome.layouts["Packed"];

        let mut next = 0;
        for (member, kind) in layout.members.iter().zip(&kinds) {
            prop_assert_eq!(member.offset_words, next);
            prop_assert_eq!(member.words, kind.byte_size().div_ceil(4));
            next += member.words;
        }
        prop_assert_eq!(layout.total_words, next);
        prop_assert_eq!(def(&module, "Packed").stamp, Some(Stamp::Laid { words: next }));
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Behaviours
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn derived_behaviour_starts_after_its_base() {
    let mut module = Module::new("Game");
    let base = module.add_type(
        TypeDef::behaviour("Unit")
            .with_property(PropertyDef::networked("Hp", I32))
            .with_property(PropertyDef::networked("Alive", BOOL)),
    );
    module.add_type(
        TypeDef::behaviour("Tank")
            .with_base(base)
            .with_property(PropertyDef::networked("Armor", I32)),
    );
    let (module, outcome) = weave_ok(module);
    let tank = &outcome.layouts["Tank"];
    assert_eq!(tank.base_words, 2);
    assert_eq!(tank.total_words, 3);
    assert_eq!(tank.members[0].offset_words, 2);

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Tank").unwrap();
    rt.set(&obj, "Hp", int(100)).unwrap();
    rt.set(&obj, "Armor", int(25)).unwrap();
    assert_eq!(rt.state_words(&obj).unwrap(), vec![100, 0, 25]);
}

#[test]
fn initializers_move_into_the_default_copy() {
    let (module, _) = weave_ok(single(
        TypeDef::behaviour("Player")
            .with_property(PropertyDef::networked("Hp", I32))
            .with_property(PropertyDef::networked("Name", TypeRef::String).with_capacity(8))
            .with_constructor(MethodDef::constructor(vec![
                Stmt::assign(Place::this_member("Hp"), Expr::int(100)),
                Stmt::assign(
                    Place::this_member("Name"),
                    Expr::lit(netweave_types::body::Literal::Text("anon".into())),
                ),
            ])),
    ));
    let player = def(&module, "Player");
    assert!(player.constructors[0].body.is_empty());
    assert!(player.method(COPY_DEFAULTS_TO_BUFFER).is_some());
    assert!(player.method(COPY_BUFFER_TO_DEFAULTS).is_some());
    assert!(player.field(&default_field_name("Hp")).is_some());

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Player").unwrap();
    assert_eq!(rt.get(&obj, "Hp").unwrap(), int(100));
    assert_eq!(rt.get(&obj, "Name").unwrap(), Value::Text("anon".into()));

    rt.set(&obj, "Hp", int(40)).unwrap();
    rt.call(&obj, COPY_BUFFER_TO_DEFAULTS, Vec::new()).unwrap();
    assert_eq!(rt.field(&obj, &default_field_name("Hp")).unwrap(), int(40));
}

#[test]
fn derived_default_copy_runs_the_base_copy_first() {
    let mut module = Module::new("Game");
    let base = module.add_type(
        TypeDef::behaviour("Unit")
            .with_property(PropertyDef::networked("Hp", I32))
            .with_constructor(MethodDef::constructor(vec![Stmt::assign(
                Place::this_member("Hp"),
                Expr::int(10),
            )])),
    );
    module.add_type(
        TypeDef::behaviour("Tank")
            .with_base(base)
            .with_property(PropertyDef::networked("Armor", I32))
            .with_constructor(MethodDef::constructor(vec![Stmt::assign(
                Place::this_member("Armor"),
                Expr::int(3),
            )])),
    );
    let (module, _) = weave_ok(module);
    assert!(def(&module, "Tank").method(COPY_DEFAULTS_TO_BUFFER).unwrap().is_override);

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Tank").unwrap();
    assert_eq!(rt.state_words(&obj).unwrap(), vec![10, 3]);
}

#[test]
fn first_constructor_initializer_wins() {
    let hp = |value| MethodDef::constructor(vec![Stmt::assign(Place::this_member("Hp"), Expr::int(value))]);
    let (module, outcome) = weave_ok(single(
        TypeDef::behaviour("Unit")
            .with_property(PropertyDef::networked("Hp", I32))
            .with_constructor(hp(10))
            .with_constructor(hp(20).param("level", I32)),
    ));
    let warnings: Vec<_> = outcome.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("different initial values"));
    assert!(def(&module, "Unit").constructors.iter().all(|c| c.body.is_empty()));

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Unit").unwrap();
    assert_eq!(rt.get(&obj, "Hp").unwrap(), int(10));
}

#[test]
fn readonly_member_keeps_its_initializer() {
    let seed = PropertyDef::auto_readonly("Seed", I32).with_attribute(Attribute::Networked);
    let backing = PropertyDef::backing_name("Seed");
    let (module, outcome) = weave_ok(single(
        TypeDef::behaviour("World")
            .with_property(seed)
            .with_constructor(MethodDef::constructor(vec![Stmt::assign(
                Place::this_field(&backing),
                Expr::int(4),
            )])),
    ));
    assert_eq!(outcome.warnings().count(), 0);

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("World").unwrap();
    assert_eq!(rt.get(&obj, "Seed").unwrap(), int(4));
}

#[test]
fn unassigned_readonly_member_is_reported() {
    let (_, outcome) = weave_ok(single(
        TypeDef::behaviour("World")
            .with_property(PropertyDef::auto_readonly("Seed", I32).with_attribute(Attribute::Networked)),
    ));
    let warnings: Vec<_> = outcome.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].level, LogLevel::Warning);
    assert_eq!(warnings[0].subject, Some(Subject::member("World", "Seed")));
    assert!(warnings[0].message.contains("never assigned"));
}

#[test]
fn methods_using_backing_fields_go_through_the_buffer() {
    let backing = PropertyDef::backing_name("Hp");
    let (module, _) = weave_ok(single(
        TypeDef::behaviour("Unit")
            .with_property(PropertyDef::networked("Hp", I32))
            .with_method(MethodDef::new("Heal").with_body(vec![Stmt::assign(
                Place::this_field(&backing),
                Expr::binary(BinaryOp::Add, Expr::this_field(&backing), Expr::int(10)),
            )])),
    ));
    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Unit").unwrap();
    rt.set(&obj, "Hp", int(5)).unwrap();
    rt.call(&obj, "Heal", Vec::new()).unwrap();
    assert_eq!(rt.state_words(&obj).unwrap(), vec![15]);
}

#[test]
fn unattached_behaviour_access_traps() {
    let (module, _) = weave_ok(single(
        TypeDef::behaviour("Unit").with_property(PropertyDef::networked("Hp", I32)),
    ));
    let mut rt = Runtime::new(module);
    let obj = rt.construct("Unit").unwrap();
    match rt.get(&obj, "Hp").unwrap_err() {
        EvalError::Trap(message) => {
            assert!(message.contains("Unit.Hp"));
            assert!(message.contains("before the object was attached"));
        }
        other => panic!("expected trap, got {other:?}"),
    }
}

#[test]
fn null_checks_can_be_disabled() {
    let settings = WeaverSettings {
        null_checks: false,
        ..WeaverSettings::default()
    };
    let (module, _) = weave_with(
        single(TypeDef::behaviour("Unit").with_property(PropertyDef::networked("Hp", I32))),
        &settings,
    );
    let getter = def(&module, "Unit").property("Hp").unwrap().getter.clone().unwrap();
    assert!(matches!(getter.as_slice(), [Stmt::Return { .. }]));
}

// ══════════════════════════════════════════════════════════════════════════════
// Containers and text
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn container_sizes_follow_capacity() {
    let (module, outcome) = weave_ok(single(
        TypeDef::behaviour("Bag")
            .with_property(
                PropertyDef::auto_readonly("Slots", TypeRef::array(I32))
                    .with_attribute(Attribute::Networked)
                    .with_capacity(4),
            )
            .with_property(
                PropertyDef::auto_readonly("Queue", TypeRef::linked_list(I32))
                    .with_attribute(Attribute::Networked)
                    .with_capacity(2),
            )
            .with_property(
                PropertyDef::auto_readonly("Scores", TypeRef::dictionary(I32, I32))
                    .with_attribute(Attribute::Networked)
                    .with_capacity(3),
            ),
    ));
    let words: Vec<u32> = outcome.layouts["Bag"].members.iter().map(|m| m.words).collect();
    assert_eq!(words, vec![4, 9, 15]);
    assert_eq!(outcome.layouts["Bag"].total_words, 28);
    assert!(module.find("@Codec<i32>").is_some());

    let mut rt = Runtime::new(module);
    let bag = rt.spawn("Bag").unwrap();
    let queue = rt.get(&bag, "Queue").unwrap();
    rt.view_add(&queue, int(5)).unwrap();
    rt.view_add(&queue, int(6)).unwrap();
    assert!(matches!(
        rt.view_add(&queue, int(7)),
        Err(EvalError::CapacityExceeded(_))
    ));
    assert_eq!(rt.view_snapshot(&queue).unwrap(), vec![int(5), int(6)]);

    let scores = rt.get(&bag, "Scores").unwrap();
    rt.view_set(&scores, int(1), int(100)).unwrap();
    assert!(rt.view_contains(&scores, int(1)).unwrap());
    assert_eq!(rt.view_get(&scores, int(1)).unwrap(), int(100));
}

#[test]
fn default_capacities_come_from_settings() {
    let bag = || {
        single(
            TypeDef::behaviour("Bag").with_property(
                PropertyDef::auto_readonly("Slots", TypeRef::array(I32))
                    .with_attribute(Attribute::Networked),
            ),
        )
    };
    let (_, outcome) = weave_ok(bag());
    assert_eq!(outcome.layouts["Bag"].total_words, 1);

    let settings = WeaverSettings {
        default_array_capacity: 6,
        ..WeaverSettings::default()
    };
    let (_, outcome) = weave_with(bag(), &settings);
    assert_eq!(outcome.layouts["Bag"].total_words, 6);
}

#[test]
fn text_is_truncated_to_capacity() {
    let (module, outcome) = weave_ok(single(
        TypeDef::behaviour("Tag")
            .with_property(PropertyDef::networked("Short", TypeRef::String).with_capacity(4))
            .with_property(PropertyDef::networked("Long", TypeRef::String)),
    ));
    let words: Vec<u32> = outcome.layouts["Tag"].members.iter().map(|m| m.words).collect();
    assert_eq!(words, vec![3, 9]);

    let mut rt = Runtime::new(module);
    let tag = rt.spawn("Tag").unwrap();
    rt.set(&tag, "Short", Value::Text("netweave".into())).unwrap();
    assert_eq!(rt.get(&tag, "Short").unwrap(), Value::Text("netw".into()));
    rt.set(&tag, "Long", Value::Text("netweave".into())).unwrap();
    assert_eq!(rt.get(&tag, "Long").unwrap(), Value::Text("netweave".into()));
}

#[test]
fn serializable_dictionary_defaults_use_an_entry_list() {
    let settings = WeaverSettings {
        dictionary_backing: DictionaryBacking::SerializableList,
        ..WeaverSettings::default()
    };
    let (module, _) = weave_with(
        single(
            TypeDef::behaviour("Bag")
                .with_property(
                    PropertyDef::auto_readonly("Scores", TypeRef::dictionary(I32, I32))
                        .with_attribute(Attribute::Networked)
                        .with_capacity(2),
                )
                .with_constructor(MethodDef::constructor(vec![Stmt::assign(
                    Place::this_member("Scores"),
                    Expr::null(),
                )])),
        ),
        &settings,
    );
    let field = def(&module, "Bag").field(&default_field_name("Scores")).unwrap();
    let TypeRef::Array(entry) = &field.ty else {
        panic!("expected an entry array, got {:?}", field.ty);
    };
    let TypeRef::Named(entry) = **entry else {
        panic!("expected a named entry type");
    };
    let entry = module.get(entry).unwrap();
    assert_eq!(entry.name, "@Entry<i32, i32>");
    assert!(entry.synthesized);
    assert!(entry.field("Key").is_some() && entry.field("Value").is_some());
}

// ══════════════════════════════════════════════════════════════════════════════
// Wrap pairs
// ══════════════════════════════════════════════════════════════════════════════

/// `Badge` holds a `Tag` class that converts through the `TagData` struct.
fn badge_module() -> Module {
    let mut module = Module::new("Game");
    let data = module.add_type(
        TypeDef::network_struct("TagData").with_property(PropertyDef::networked("Id", I32)),
    );
    let tag = TypeId(data.0 + 1);
    module.add_type(
        TypeDef::new("Tag", TypeKind::Class)
            .with_property(PropertyDef::auto("Id", I32))
            .with_method(
                MethodDef::new("Wrap")
                    .static_method()
                    .with_attribute(Attribute::WrapSerialize)
                    .param("runner", TypeRef::Runner)
                    .param("value", TypeRef::Named(tag))
                    .returns(TypeRef::Named(data))
                    .with_body(vec![
                        Stmt::let_("d", Expr::New { ty: data }),
                        Stmt::assign(
                            Place::Member {
                                target: Expr::local("d"),
                                name: "Id".into(),
                            },
                            Expr::member(Expr::local("value"), "Id"),
                        ),
                        Stmt::ret(Expr::local("d")),
                    ]),
            )
            .with_method(
                MethodDef::new("Unwrap")
                    .static_method()
                    .with_attribute(Attribute::WrapDeserialize)
                    .param("runner", TypeRef::Runner)
                    .param("data", TypeRef::Named(data))
                    .returns(TypeRef::Named(tag))
                    .with_body(vec![
                        Stmt::let_("t", Expr::New { ty: tag }),
                        Stmt::assign(
                            Place::Member {
                                target: Expr::local("t"),
                                name: "Id".into(),
                            },
                            Expr::member(Expr::local("data"), "Id"),
                        ),
                        Stmt::ret(Expr::local("t")),
                    ]),
            ),
    );
    module.add_type(
        TypeDef::behaviour("Badge").with_property(PropertyDef::networked("Tag", TypeRef::Named(tag))),
    );
    module
}

#[test]
fn wrapped_member_converts_through_its_wrapper() {
    let (module, outcome) = weave_ok(badge_module());
    let badge = &outcome.layouts["Badge"];
    assert_eq!(badge.total_words, 1);
    assert_eq!(badge.members[0].encoding, "wrapped");

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Badge").unwrap();
    let tag = rt.construct("Tag").unwrap();
    rt.set(&tag, "Id", int(42)).unwrap();
    rt.set(&obj, "Tag", tag).unwrap();
    assert_eq!(rt.state_words(&obj).unwrap(), vec![42]);

    let back = rt.get(&obj, "Tag").unwrap();
    assert!(matches!(back, Value::Object(_)));
    assert_eq!(rt.get(&back, "Id").unwrap(), int(42));
}

#[test]
fn half_a_wrap_pair_is_rejected() {
    let mut module = badge_module();
    let tag = module.find("Tag").unwrap();
    module
        .get_mut(tag)
        .unwrap()
        .methods
        .retain(|m| m.name != "Unwrap");
    assert_eq!(weave_err(module).code, ErrorCode::WRAP_PAIR_INCOMPLETE);
}

/// `Holder` keeps a raw-encoded `Blob` between two plain words. `Blob::Write`
/// stores `Id` and a marker word, then reports `Size` bytes written.
fn blob_module() -> Module {
    let mut module = Module::new("Game");
    let blob = TypeId(0);
    let buffer = || Expr::local("buffer");
    module.add_type(
        TypeDef::new("Blob", TypeKind::Class)
            .with_property(PropertyDef::auto("Id", I32))
            .with_property(PropertyDef::auto("Tail", I32))
            .with_property(PropertyDef::auto("Size", I32))
            .with_method(
                MethodDef::new("Write")
                    .static_method()
                    .with_attribute(Attribute::WrapSerialize)
                    .with_attribute(Attribute::MaxByteCount(6))
                    .param("value", TypeRef::Named(blob))
                    .param("buffer", TypeRef::byte_ptr())
                    .returns(I32)
                    .with_body(vec![
                        Stmt::Store {
                            scalar: ScalarKind::I32,
                            ptr: buffer(),
                            value: Expr::member(Expr::local("value"), "Id"),
                        },
                        Stmt::Store {
                            scalar: ScalarKind::I32,
                            ptr: Expr::offset(buffer(), 1),
                            value: Expr::int(7),
                        },
                        Stmt::ret(Expr::member(Expr::local("value"), "Size")),
                    ]),
            )
            .with_method(
                MethodDef::new("Read")
                    .static_method()
                    .with_attribute(Attribute::WrapDeserialize)
                    .param("buffer", TypeRef::byte_ptr())
                    .returns(TypeRef::Named(blob))
                    .with_body(vec![
                        Stmt::let_("b", Expr::New { ty: blob }),
                        Stmt::assign(
                            Place::Member {
                                target: Expr::local("b"),
                                name: "Id".into(),
                            },
                            Expr::load(ScalarKind::I32, buffer()),
                        ),
                        Stmt::assign(
                            Place::Member {
                                target: Expr::local("b"),
                                name: "Tail".into(),
                            },
                            Expr::load(ScalarKind::I32, Expr::offset(buffer(), 1)),
                        ),
                        Stmt::ret(Expr::local("b")),
                    ]),
            ),
    );
    module.add_type(
        TypeDef::behaviour("Holder")
            .with_property(PropertyDef::networked("Hp", I32))
            .with_property(PropertyDef::networked("Blob", TypeRef::Named(blob)))
            .with_property(PropertyDef::networked("After", I32)),
    );
    module
}

#[test]
fn raw_wrap_writes_into_the_member_words() {
    let (module, outcome) = weave_ok(blob_module());
    let holder = &outcome.layouts["Holder"];
    let slots: Vec<(&str, u32, u32)> = holder
        .members
        .iter()
        .map(|m| (m.name.as_str(), m.offset_words, m.words))
        .collect();
    assert_eq!(slots, vec![("Hp", 0, 1), ("Blob", 1, 2), ("After", 3, 1)]);
    assert_eq!(holder.members[1].encoding, "wrapped");
    assert_eq!(holder.total_words, 4);

    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Holder").unwrap();
    rt.set(&obj, "Hp", int(5)).unwrap();
    let blob = rt.construct("Blob").unwrap();
    rt.set(&blob, "Id", int(42)).unwrap();
    rt.set(&blob, "Size", int(6)).unwrap();
    rt.set(&obj, "Blob", blob).unwrap();
    assert_eq!(rt.state_words(&obj).unwrap(), vec![5, 42, 7, 0]);

    let back = rt.get(&obj, "Blob").unwrap();
    assert_eq!(rt.get(&back, "Id").unwrap(), int(42));
    assert_eq!(rt.get(&back, "Tail").unwrap(), int(7));
}

#[test]
fn raw_wrap_writing_past_its_max_byte_count_traps() {
    let (module, _) = weave_ok(blob_module());
    let mut rt = Runtime::new(module);
    let obj = rt.spawn("Holder").unwrap();
    let blob = rt.construct("Blob").unwrap();
    rt.set(&blob, "Size", int(7)).unwrap();
    let Err(EvalError::Trap(message)) = rt.set(&obj, "Blob", blob) else {
        panic!("expected the MaxByteCount guard to trap");
    };
    assert!(message.contains("Blob::Write"), "{message}");
    assert!(message.contains("MaxByteCount of 6"), "{message}");
}

// ══════════════════════════════════════════════════════════════════════════════
// Idempotence and exclusions
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn weaving_twice_changes_nothing() {
    let mut module = Module::new("Game");
    let v = module.add_type(vec2i());
    module.add_type(
        TypeDef::behaviour("Holder")
            .with_property(PropertyDef::networked("Pos", TypeRef::Named(v)))
            .with_property(
                PropertyDef::auto_readonly("Items", TypeRef::linked_list(I32))
                    .with_attribute(Attribute::Networked)
                    .with_capacity(3),
            ),
    );
    let (mut module, first) = weave_ok(module);
    assert!(first.modified);

    let before = module.clone();
    let second = weave(&mut module, &WeaverSettings::default()).unwrap();
    assert!(!second.modified);
    assert!(second.layouts.is_empty());
    assert_eq!(module, before);
}

#[test]
fn woven_module_survives_json() {
    let (module, _) = weave_ok(single(vec2i()));
    let json = module.to_json().unwrap();
    let mut reloaded = Module::from_json(&json).unwrap();
    assert_eq!(reloaded, module);
    let outcome = weave(&mut reloaded, &WeaverSettings::default()).unwrap();
    assert!(!outcome.modified);
}

#[test]
fn tampered_stamp_is_inconsistent_and_leaves_module_untouched() {
    let (mut module, _) = weave_ok(single(vec2i()));
    let v = module.find("Vec2i").unwrap();
    module.get_mut(v).unwrap().stamp = Some(Stamp::Laid { words: 5 });
    module.add_type(
        TypeDef::behaviour("Holder").with_property(PropertyDef::networked("Pos", TypeRef::Named(v))),
    );

    let before = module.clone();
    let err = weave(&mut module, &WeaverSettings::default()).unwrap_err();
    assert_eq!(err.code, ErrorCode::INCONSISTENT_SIZE);
    assert_eq!(err.category, ErrorCategory::Layout);
    assert_eq!(err.subject, Subject::ty("Vec2i"));
    assert_eq!(module, before);
}

#[test]
fn skipped_and_generic_types_are_excluded() {
    let mut module = Module::new("Game");
    module.add_type(
        TypeDef::network_struct("Scratch")
            .with_attribute(Attribute::SkipWeaving)
            .with_field(FieldDef::new("anything", I32)),
    );
    module.add_type(
        TypeDef::behaviour("Pool")
            .with_generic("T")
            .with_property(PropertyDef::networked("Item", TypeRef::Generic("T".into()))),
    );
    let (module, outcome) = weave_ok(module);
    assert!(outcome.modified);
    assert!(outcome.layouts.is_empty());
    assert_eq!(def(&module, "Scratch").stamp, Some(Stamp::Excluded));
    assert_eq!(def(&module, "Pool").stamp, Some(Stamp::Excluded));
}

#[test]
fn embedding_an_excluded_struct_is_unsupported() {
    let mut module = Module::new("Game");
    let s = module.add_type(
        TypeDef::network_struct("Scratch")
            .with_attribute(Attribute::SkipWeaving)
            .with_property(PropertyDef::networked("X", I32)),
    );
    module.add_type(
        TypeDef::behaviour("Holder").with_property(PropertyDef::networked("S", TypeRef::Named(s))),
    );
    let err = weave_err(module);
    assert_eq!(err.code, ErrorCode::UNSUPPORTED_TYPE);
    assert!(err.message.contains("excluded"));
}

#[test]
fn empty_settings_json_is_the_default() {
    assert_eq!(WeaverSettings::from_json("{}").unwrap(), WeaverSettings::default());
}

// ══════════════════════════════════════════════════════════════════════════════
// Errors
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn mutually_embedded_structs_are_cyclic() {
    let mut module = Module::new("Game");
    let a = TypeId(0);
    let b = TypeId(1);
    module.add_type(TypeDef::network_struct("A").with_property(PropertyDef::networked("B", TypeRef::Named(b))));
    module.add_type(TypeDef::network_struct("B").with_property(PropertyDef::networked("A", TypeRef::Named(a))));
    let err = weave_err(module);
    assert_eq!(err.code, ErrorCode::CYCLIC_COMPOSITE);
    assert!(err.message.contains("A -> B -> A"), "{}", err.message);
}

#[test]
fn struct_without_networked_members_is_zero_size() {
    let err = weave_err(single(TypeDef::network_struct("Empty")));
    assert_eq!(err.code, ErrorCode::ZERO_SIZE);
    assert_eq!(err.category, ErrorCategory::Layout);
}

#[test]
fn text_capacity_past_the_word_range_overflows() {
    let err = weave_err(single(
        TypeDef::network_struct("Name")
            .with_property(PropertyDef::networked("Value", TypeRef::String).with_capacity(u32::MAX)),
    ));
    assert_eq!(err.code, ErrorCode::SIZE_OVERFLOW);
    assert_eq!(err.category, ErrorCategory::Layout);
}

#[test]
fn members_adding_up_past_the_word_range_overflow() {
    // each buffer takes 2^30 words, the fourth pushes the offset past u32::MAX
    let buffer = TypeRef::FixedBuffer {
        element: ScalarKind::U8,
        capacity: u32::MAX,
    };
    let mut wide = TypeDef::network_struct("Wide");
    for name in ["A", "B", "C", "D"] {
        wide = wide.with_property(
            PropertyDef::auto_readonly(name, buffer.clone()).with_attribute(Attribute::Networked),
        );
    }
    let err = weave_err(single(wide));
    assert_eq!(err.code, ErrorCode::SIZE_OVERFLOW);
    assert_eq!(err.subject, Subject::ty("Wide"));
    assert!(err.message.contains("layout"), "{}", err.message);
}

#[test]
fn empty_behaviour_is_allowed() {
    let (_, outcome) = weave_ok(single(TypeDef::behaviour("Marker")));
    assert_eq!(outcome.layouts["Marker"].total_words, 0);
}

#[test]
fn plain_field_in_a_struct_is_unsupported() {
    let err = weave_err(single(vec2i().with_field(FieldDef::new("cache", I32))));
    assert_eq!(err.code, ErrorCode::UNSUPPORTED_MEMBER);
    assert_eq!(err.subject, Subject::member("Vec2i", "cache"));
}

#[test]
fn static_networked_member_is_rejected() {
    let err = weave_err(single(
        TypeDef::behaviour("Unit").with_property(PropertyDef::networked("Count", I32).static_member()),
    ));
    assert_eq!(err.code, ErrorCode::STATIC_CONTEXT);
    assert_eq!(err.category, ErrorCategory::Validation);
}

#[test]
fn getter_with_logic_is_rejected() {
    let err = weave_err(single(TypeDef::behaviour("Unit").with_property(
        PropertyDef::networked("Hp", I32).with_getter(vec![Stmt::ret(Expr::int(1))]),
    )));
    assert_eq!(err.code, ErrorCode::NON_TRIVIAL_ACCESSOR);
    assert_eq!(err.subject, Subject::member("Unit", "Hp"));
}

#[test]
fn member_without_getter_is_rejected() {
    let err = weave_err(single(TypeDef::behaviour("Unit").with_property(
        PropertyDef::bare("Hp", I32)
            .with_attribute(Attribute::Networked)
            .with_setter(Vec::new()),
    )));
    assert_eq!(err.code, ErrorCode::MISSING_ACCESSOR);
}

#[test]
fn container_with_setter_is_rejected() {
    let err = weave_err(single(TypeDef::behaviour("Bag").with_property(
        PropertyDef::networked("Slots", TypeRef::array(I32)).with_capacity(2),
    )));
    assert_eq!(err.code, ErrorCode::CONTAINER_SETTER);
}

#[test]
fn reference_member_with_setter_is_rejected() {
    let err = weave_err(single(
        TypeDef::behaviour("Unit").with_property(PropertyDef::networked("Ref", TypeRef::by_ref(I32))),
    ));
    assert_eq!(err.code, ErrorCode::UNSUPPORTED_MEMBER);
}

#[test]
fn accuracy_on_an_integer_is_invalid() {
    let err = weave_err(single(
        TypeDef::behaviour("Unit").with_property(PropertyDef::networked("Hp", I32).with_accuracy(0.5)),
    ));
    assert_eq!(err.code, ErrorCode::INVALID_ATTRIBUTE);
}

#[test]
fn plain_class_member_is_unsupported() {
    let mut module = Module::new("Game");
    let blob = module.add_type(TypeDef::new("Blob", TypeKind::Class));
    module.add_type(
        TypeDef::behaviour("Unit").with_property(PropertyDef::networked("B", TypeRef::Named(blob))),
    );
    let err = weave_err(module);
    assert_eq!(err.code, ErrorCode::UNSUPPORTED_TYPE);
    assert!(err.suggestion.is_some());
}

#[test]
fn initializer_reading_constructor_state_is_rejected() {
    let err = weave_err(single(
        TypeDef::behaviour("Unit")
            .with_property(PropertyDef::networked("Hp", I32))
            .with_constructor(MethodDef::constructor(vec![
                Stmt::let_("base", Expr::int(10)),
                Stmt::assign(Place::this_member("Hp"), Expr::local("base")),
            ])),
    ));
    assert_eq!(err.code, ErrorCode::INVALID_INITIALIZER);
    assert_eq!(err.subject, Subject::member("Unit", "Hp"));
}

#[test]
fn failed_weave_leaves_module_untouched() {
    let mut module = Module::new("Game");
    module.add_type(vec2i());
    module.add_type(TypeDef::network_struct("Empty"));
    let before = module.clone();
    assert!(weave(&mut module, &WeaverSettings::default()).is_err());
    assert_eq!(module, before);
}
