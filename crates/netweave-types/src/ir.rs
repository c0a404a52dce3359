//! Module IR: the compiled module the engine receives and mutates.
//!
//! A [`Module`] is an arena of [`TypeDef`]s addressed by [`TypeId`]. Type
//! references inside members and methods point back into the arena, so the
//! whole module serializes as plain data.
//!
//! Declaration order of properties is preserved everywhere; it is what
//! decides member offsets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::body::{Expr, Place, Stmt};
use crate::rpc::{RpcAttr, RpcKey};
use crate::Span;

// ══════════════════════════════════════════════════════════════════════════════
// Module
// ══════════════════════════════════════════════════════════════════════════════

/// Index of a type within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A compiled module: every type the engine may look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub types: Vec<TypeDef>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    /// Append a type and return its id.
    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(def);
        id
    }

    /// Look up a type by id. Returns `None` for ids from another module.
    pub fn get(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: TypeId) -> Option<&mut TypeDef> {
        self.types.get_mut(id.0 as usize)
    }

    /// Look up a type by name.
    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| TypeId(i as u32))
    }

    /// All type ids in declaration order.
    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.types.len() as u32).map(TypeId)
    }

    /// Name of a type, or its id when it does not resolve.
    pub fn type_name(&self, id: TypeId) -> String {
        self.get(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Human-readable rendering of a type reference.
    pub fn display_type(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Void => "void".into(),
            TypeRef::Scalar(s) => s.name().into(),
            TypeRef::Vector(v) => v.name().into(),
            TypeRef::String => "string".into(),
            TypeRef::Player => "PlayerRef".into(),
            TypeRef::Named(id) => self.type_name(*id),
            TypeRef::FixedBuffer { element, capacity } => {
                format!("{}[{}]", element.name(), capacity)
            }
            TypeRef::Array(e) => format!("NetworkArray<{}>", self.display_type(e)),
            TypeRef::LinkedList(e) => format!("NetworkLinkedList<{}>", self.display_type(e)),
            TypeRef::Dictionary(k, v) => format!(
                "NetworkDictionary<{}, {}>",
                self.display_type(k),
                self.display_type(v)
            ),
            TypeRef::Pointer(e) => format!("*{}", self.display_type(e)),
            TypeRef::ByRef(e) => format!("&{}", self.display_type(e)),
            TypeRef::Generic(name) => name.clone(),
            TypeRef::Runner => "NetworkRunner".into(),
            TypeRef::Message => "RpcMessage".into(),
            TypeRef::RpcInfo => "RpcInfo".into(),
            TypeRef::RpcInvokeInfo => "RpcInvokeInfo".into(),
        }
    }

    /// Ancestors of `id`, nearest first. Stops at the first base that does
    /// not resolve or would revisit a type.
    pub fn ancestors(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|t| t.base);
        while let Some(base) = current {
            if base == id || chain.contains(&base) {
                break;
            }
            chain.push(base);
            current = self.get(base).and_then(|t| t.base);
        }
        chain
    }

    /// Whether `id` is `ancestor` or derives from it.
    pub fn derives_from(&self, id: TypeId, ancestor: TypeId) -> bool {
        id == ancestor || self.ancestors(id).contains(&ancestor)
    }

    /// Find a method by name on `id` or its ancestors.
    pub fn find_method(&self, id: TypeId, name: &str) -> Option<(TypeId, &MethodDef)> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find_map(|t| self.get(t)?.method(name).map(|m| (t, m)))
    }

    /// Find a property by name on `id` or its ancestors.
    pub fn find_property(&self, id: TypeId, name: &str) -> Option<(TypeId, &PropertyDef)> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find_map(|t| self.get(t)?.property(name).map(|p| (t, p)))
    }

    /// Parse a module from its JSON representation.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Serialize the module to pretty JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Types
// ══════════════════════════════════════════════════════════════════════════════

/// What sort of type a definition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "underlying", rename_all = "snake_case")]
pub enum TypeKind {
    /// Value type.
    Struct,
    /// Reference type.
    Class,
    /// Enumeration stored as its underlying scalar.
    Enum(ScalarKind),
}

/// Networking capabilities a type declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// A composite value type eligible for layout.
    NetworkStruct,
    /// A composite value type carrying player input.
    NetworkInput,
    /// A simulated object whose state lives in a runtime buffer.
    NetworkBehaviour,
}

/// Result stamped on a type once the engine has processed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stamp {
    /// Laid out with this total word count (ancestors included).
    Laid { words: u32 },
    /// Intentionally skipped.
    Excluded,
}

/// One row of a behaviour's RPC routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcTableEntry {
    pub key: RpcKey,
    /// The RPC method (caller stub) name.
    pub method: String,
    /// The static receiver stub that decodes a message and invokes the RPC.
    pub receiver: String,
}

/// A type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<TypeId>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Names of open generic parameters; non-empty means a generic definition.
    #[serde(default)]
    pub generic_params: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    #[serde(default)]
    pub constructors: Vec<MethodDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<Stamp>,
    #[serde(default)]
    pub rpc_table: Vec<RpcTableEntry>,
    /// Created by the engine rather than by the user.
    #[serde(default)]
    pub synthesized: bool,
    #[serde(default)]
    pub span: Span,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            capabilities: Vec::new(),
            generic_params: Vec::new(),
            attributes: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            stamp: None,
            rpc_table: Vec::new(),
            synthesized: false,
            span: Span::synthesized(),
        }
    }

    /// A value type implementing the networked-struct capability.
    pub fn network_struct(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Struct).with_capability(Capability::NetworkStruct)
    }

    /// A value type implementing the networked-input capability.
    pub fn network_input(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Struct).with_capability(Capability::NetworkInput)
    }

    /// A behaviour class.
    pub fn behaviour(name: impl Into<String>) -> Self {
        Self::new(name, TypeKind::Class).with_capability(Capability::NetworkBehaviour)
    }

    // ── Builders ─────────────────────────────────────────────────────────

    pub fn with_base(mut self, base: TypeId) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_capability(mut self, cap: Capability) -> Self {
        if !self.capabilities.contains(&cap) {
            self.capabilities.push(cap);
        }
        self
    }

    pub fn with_generic(mut self, name: impl Into<String>) -> Self {
        self.generic_params.push(name.into());
        self
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a property. Auto-properties also get their backing field.
    pub fn with_property(mut self, prop: PropertyDef) -> Self {
        if let Some(backing) = &prop.backing_field {
            self.fields.push(FieldDef::new(backing.clone(), prop.ty.clone()));
        }
        self.properties.push(prop);
        self
    }

    pub fn with_method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_constructor(mut self, ctor: MethodDef) -> Self {
        self.constructors.push(ctor);
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Value types laid out as composites: networked structs and inputs.
    pub fn is_composite(&self) -> bool {
        self.kind == TypeKind::Struct
            && (self.has_capability(Capability::NetworkStruct)
                || self.has_capability(Capability::NetworkInput))
    }

    pub fn is_behaviour(&self) -> bool {
        self.kind == TypeKind::Class && self.has_capability(Capability::NetworkBehaviour)
    }

    pub fn is_generic_definition(&self) -> bool {
        !self.generic_params.is_empty()
    }

    pub fn has_attribute(&self, pred: impl Fn(&Attribute) -> bool) -> bool {
        self.attributes.iter().any(pred)
    }

    pub fn stamped_words(&self) -> Option<u32> {
        match self.stamp {
            Some(Stamp::Laid { words }) => Some(words),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut PropertyDef> {
        self.properties.iter_mut().find(|p| p.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn method_mut(&mut self, name: &str) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|m| m.name == name)
    }

    /// Networked properties in declaration order.
    pub fn networked_properties(&self) -> impl Iterator<Item = &PropertyDef> {
        self.properties.iter().filter(|p| p.is_networked())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Members
// ══════════════════════════════════════════════════════════════════════════════

/// A plain data field with real storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub is_static: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            is_static: false,
        }
    }

    pub fn static_field(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            is_static: true,
            ..Self::new(name, ty)
        }
    }
}

/// Where a laid-out member lives within its owner's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSlot {
    pub offset_words: u32,
    pub words: u32,
}

/// A property: a member with accessor bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<Vec<Stmt>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<Vec<Stmt>>,
    /// Compiler-generated storage of an auto-property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backing_field: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<MemberSlot>,
    #[serde(default)]
    pub span: Span,
}

impl PropertyDef {
    /// Name of the backing field an auto-property `name` gets.
    pub fn backing_name(name: &str) -> String {
        format!("<{name}>k__BackingField")
    }

    /// An auto-property with a getter and setter over a backing field.
    pub fn auto(name: impl Into<String>, ty: TypeRef) -> Self {
        let name = name.into();
        let backing = Self::backing_name(&name);
        Self {
            getter: Some(vec![Stmt::ret(Expr::this_field(&backing))]),
            setter: Some(vec![Stmt::Assign {
                place: Place::Field {
                    target: Expr::This,
                    name: backing.clone(),
                },
                value: Expr::local("value"),
            }]),
            backing_field: Some(backing),
            ..Self::bare(name, ty)
        }
    }

    /// A get-only auto-property.
    pub fn auto_readonly(name: impl Into<String>, ty: TypeRef) -> Self {
        let mut prop = Self::auto(name, ty);
        prop.setter = None;
        prop
    }

    /// A property with no accessors; add them with the builders.
    pub fn bare(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            getter: None,
            setter: None,
            backing_field: None,
            attributes: Vec::new(),
            is_static: false,
            slot: None,
            span: Span::synthesized(),
        }
    }

    /// Shorthand for a networked auto-property.
    pub fn networked(name: impl Into<String>, ty: TypeRef) -> Self {
        Self::auto(name, ty).with_attribute(Attribute::Networked)
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_capacity(self, capacity: u32) -> Self {
        self.with_attribute(Attribute::Capacity(capacity))
    }

    pub fn with_accuracy(self, accuracy: f32) -> Self {
        self.with_attribute(Attribute::Accuracy(AccuracySpec::Value(accuracy)))
    }

    pub fn with_getter(mut self, body: Vec<Stmt>) -> Self {
        self.getter = Some(body);
        self
    }

    pub fn with_setter(mut self, body: Vec<Stmt>) -> Self {
        self.setter = Some(body);
        self
    }

    pub fn without_setter(mut self) -> Self {
        self.setter = None;
        self
    }

    pub fn static_member(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_networked(&self) -> bool {
        self.attributes.iter().any(|a| matches!(a, Attribute::Networked))
    }

    pub fn capacity(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Capacity(n) => Some(*n),
            _ => None,
        })
    }

    pub fn accuracy(&self) -> Option<&AccuracySpec> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Accuracy(spec) => Some(spec),
            _ => None,
        })
    }
}

/// A method parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            attributes: Vec::new(),
        }
    }

    /// A player parameter naming the single recipient of an RPC.
    pub fn rpc_target(name: impl Into<String>) -> Self {
        Self {
            attributes: vec![Attribute::RpcTarget],
            ..Self::new(name, TypeRef::Player)
        }
    }

    pub fn is_rpc_target(&self) -> bool {
        self.attributes.iter().any(|a| matches!(a, Attribute::RpcTarget))
    }
}

/// A method or constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default = "TypeRef::void")]
    pub ret: TypeRef,
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_override: bool,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc: Option<RpcStamp>,
    #[serde(default)]
    pub span: Span,
}

/// Stamp on an RPC method that has been woven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStamp {
    pub key: RpcKey,
}

impl MethodDef {
    pub const CONSTRUCTOR: &'static str = ".ctor";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret: TypeRef::Void,
            body: Vec::new(),
            is_static: false,
            is_override: false,
            attributes: Vec::new(),
            rpc: None,
            span: Span::synthesized(),
        }
    }

    pub fn constructor(body: Vec<Stmt>) -> Self {
        Self::new(Self::CONSTRUCTOR).with_body(body)
    }

    /// A method marked as an RPC.
    pub fn rpc(name: impl Into<String>, attr: RpcAttr) -> Self {
        Self::new(name).with_attribute(Attribute::Rpc(attr))
    }

    pub fn param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.params.push(Param::new(name, ty));
        self
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn returns(mut self, ty: TypeRef) -> Self {
        self.ret = ty;
        self
    }

    pub fn with_body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }

    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn overriding(mut self) -> Self {
        self.is_override = true;
        self
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn rpc_attr(&self) -> Option<&RpcAttr> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Rpc(attr) => Some(attr),
            _ => None,
        })
    }

    pub fn has_attribute(&self, pred: impl Fn(&Attribute) -> bool) -> bool {
        self.attributes.iter().any(pred)
    }

    pub fn max_byte_count(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::MaxByteCount(n) => Some(*n),
            _ => None,
        })
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Attributes
// ══════════════════════════════════════════════════════════════════════════════

/// A quantization step: either a literal value or a name in the settings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccuracySpec {
    Value(f32),
    Named(String),
}

/// Declarative annotations on types, members, methods and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "attr", content = "args", rename_all = "snake_case")]
pub enum Attribute {
    /// The member's state lives in the network buffer.
    Networked,
    /// Fixed maximum element count of a bounded member.
    Capacity(u32),
    /// Quantization step for floating-point members.
    Accuracy(AccuracySpec),
    /// The method is a remote procedure.
    Rpc(RpcAttr),
    /// The player parameter names the single recipient of an RPC.
    RpcTarget,
    /// The static method serializes its declaring type.
    WrapSerialize,
    /// The static method deserializes its declaring type.
    WrapDeserialize,
    /// Upper bound on bytes a raw serialize method writes.
    MaxByteCount(u32),
    /// Leave the type alone.
    SkipWeaving,
}

// ══════════════════════════════════════════════════════════════════════════════
// Type references
// ══════════════════════════════════════════════════════════════════════════════

/// Primitive storage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    Char,
    I32,
    U32,
    F32,
    I64,
    U64,
    F64,
}

impl ScalarKind {
    /// Native size in bytes.
    pub fn byte_size(self) -> u32 {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 | Self::Char => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::Char => "char",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F64 => "f64",
        }
    }
}

/// Built-in float vector types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Vec2,
    Vec3,
    Vec4,
    Quat,
}

impl VectorKind {
    pub fn lanes(self) -> u32 {
        match self {
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::Quat => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vec2 => "Vector2",
            Self::Vec3 => "Vector3",
            Self::Vec4 => "Vector4",
            Self::Quat => "Quaternion",
        }
    }
}

/// A reference to a type, as written on members, params and returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "snake_case")]
pub enum TypeRef {
    Void,
    Scalar(ScalarKind),
    Vector(VectorKind),
    /// Bounded-length text.
    String,
    /// Reference to a connected player.
    Player,
    Named(TypeId),
    /// Inline fixed-size array of a scalar, packed by bytes.
    FixedBuffer { element: ScalarKind, capacity: u32 },
    Array(Box<TypeRef>),
    LinkedList(Box<TypeRef>),
    Dictionary(Box<TypeRef>, Box<TypeRef>),
    Pointer(Box<TypeRef>),
    /// Pass-by-reference (`in`/`ref`) form of a type.
    ByRef(Box<TypeRef>),
    /// An unresolved generic parameter.
    Generic(String),
    /// The runtime context object.
    Runner,
    /// An opaque transport message.
    Message,
    /// Metadata about an incoming RPC.
    RpcInfo,
    /// Opt-in outcome record of an RPC call.
    RpcInvokeInfo,
}

impl TypeRef {
    pub fn void() -> Self {
        Self::Void
    }

    pub fn scalar(kind: ScalarKind) -> Self {
        Self::Scalar(kind)
    }

    pub fn array(element: TypeRef) -> Self {
        Self::Array(Box::new(element))
    }

    pub fn linked_list(element: TypeRef) -> Self {
        Self::LinkedList(Box::new(element))
    }

    pub fn dictionary(key: TypeRef, value: TypeRef) -> Self {
        Self::Dictionary(Box::new(key), Box::new(value))
    }

    pub fn pointer(element: TypeRef) -> Self {
        Self::Pointer(Box::new(element))
    }

    pub fn by_ref(element: TypeRef) -> Self {
        Self::ByRef(Box::new(element))
    }

    /// Byte pointer, the buffer type of raw wrap methods.
    pub fn byte_ptr() -> Self {
        Self::pointer(Self::Scalar(ScalarKind::U8))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Capacity-bounded containers, which are mutated in place.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Self::FixedBuffer { .. } | Self::Array(_) | Self::LinkedList(_) | Self::Dictionary(..)
        )
    }

    /// Whether the reference mentions an unresolved generic parameter.
    pub fn contains_generic(&self) -> bool {
        match self {
            Self::Generic(_) => true,
            Self::Array(e) | Self::LinkedList(e) | Self::Pointer(e) | Self::ByRef(e) => {
                e.contains_generic()
            }
            Self::Dictionary(k, v) => k.contains_generic() || v.contains_generic(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcMask;

    fn sample_module() -> Module {
        let mut module = Module::new("Game");
        let base = module.add_type(
            TypeDef::behaviour("Actor")
                .with_property(PropertyDef::networked("Health", TypeRef::Scalar(ScalarKind::I32)))
                .with_method(MethodDef::rpc("RpcPing", RpcAttr::default())),
        );
        module.add_type(
            TypeDef::behaviour("Player")
                .with_base(base)
                .with_property(PropertyDef::auto("Name", TypeRef::String)),
        );
        module
    }

    #[test]
    fn test_auto_property_adds_backing_field() {
        let module = sample_module();
        let actor = module.get(TypeId(0)).unwrap();
        assert!(actor.field("<Health>k__BackingField").is_some());
        let health = actor.property("Health").unwrap();
        assert!(health.is_networked());
        assert!(health.getter.is_some());
        assert!(health.setter.is_some());
    }

    #[test]
    fn test_ancestry_and_lookup() {
        let module = sample_module();
        let player = module.find("Player").unwrap();
        assert_eq!(module.ancestors(player), vec![TypeId(0)]);
        assert!(module.derives_from(player, TypeId(0)));
        let (owner, method) = module.find_method(player, "RpcPing").unwrap();
        assert_eq!(owner, TypeId(0));
        assert_eq!(method.rpc_attr().unwrap().sources, RpcMask::ALL);
        let (owner, _) = module.find_property(player, "Health").unwrap();
        assert_eq!(owner, TypeId(0));
    }

    #[test]
    fn test_ancestors_stop_on_cycle() {
        let mut module = Module::new("Broken");
        module.add_type(TypeDef::network_struct("A").with_base(TypeId(1)));
        module.add_type(TypeDef::network_struct("B").with_base(TypeId(0)));
        assert_eq!(module.ancestors(TypeId(0)), vec![TypeId(1)]);
    }

    #[test]
    fn test_display_type() {
        let module = sample_module();
        let ty = TypeRef::dictionary(TypeRef::Scalar(ScalarKind::I32), TypeRef::Named(TypeId(1)));
        assert_eq!(module.display_type(&ty), "NetworkDictionary<i32, Player>");
        let buf = TypeRef::FixedBuffer {
            element: ScalarKind::U8,
            capacity: 10,
        };
        assert_eq!(module.display_type(&buf), "u8[10]");
    }

    #[test]
    fn test_contains_generic() {
        assert!(TypeRef::array(TypeRef::Generic("T".into())).contains_generic());
        assert!(!TypeRef::array(TypeRef::String).contains_generic());
    }

    #[test]
    fn test_module_json_round_trip() {
        let module = sample_module();
        let json = module.to_json().unwrap();
        let back = Module::from_json(&json).unwrap();
        assert_eq!(back, module);
    }

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(ScalarKind::Bool.byte_size(), 1);
        assert_eq!(ScalarKind::Char.byte_size(), 2);
        assert_eq!(ScalarKind::F32.byte_size(), 4);
        assert_eq!(ScalarKind::F64.byte_size(), 8);
        assert!(ScalarKind::F64.is_float());
        assert!(!ScalarKind::I64.is_float());
    }
}
