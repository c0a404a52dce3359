//! Wrap/surrogate conversion pairs.
//!
//! A type that cannot be laid out directly may declare one static serialize
//! method (`WrapSerialize`) and one static deserialize method
//! (`WrapDeserialize`). Two shapes are accepted:
//!
//! ```text
//! raw      wrap([runner], value: T, buffer: *u8) -> i32   + MaxByteCount(n)
//!          unwrap([runner], buffer: *u8) -> T
//! wrapper  wrap([runner], value: T) -> W
//!          unwrap([runner], wrapper: W) -> T
//! ```
//!
//! Raw pairs occupy `ceil(n / WORD_SIZE)` words. Wrapper pairs reuse the
//! encoding of `W` unchanged.

use std::rc::Rc;

use netweave_types::body::{BinaryOp, Expr, MethodRef, Stmt};
use netweave_types::ir::{Attribute, MethodDef, Module, Param, ScalarKind, TypeId, TypeRef};
use netweave_types::{words_for_bytes, ErrorCode, Subject, WeaveError, WeaveResult};

use crate::context::CodeGenContext;
use crate::descriptor::{MemberConfig, TypeDescriptor};
use crate::registry::CodegenHost;

const RAW_SERIALIZE_SHAPE: &str = "static wrap([runner], value: T, buffer: *u8) -> i32";
const WRAPPER_SERIALIZE_SHAPE: &str = "static wrap([runner], value: T) -> W";
const RAW_DESERIALIZE_SHAPE: &str = "static unwrap([runner], buffer: *u8) -> T";
const WRAPPER_DESERIALIZE_SHAPE: &str = "static unwrap([runner], wrapper: W) -> T";

/// Encoding selected by the serialize method's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum WrapShape {
    /// Writes straight into a fixed buffer of at most `max_bytes`.
    Raw { max_bytes: u32 },
    /// Converts through a registrable wrapper type.
    Wrapper { wrapper: TypeRef },
}

/// A validated conversion pair, before the wrapper type is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct WrapSignature {
    pub owner: TypeId,
    pub serialize: MethodRef,
    pub deserialize: MethodRef,
    /// Both methods take a leading runtime context argument.
    pub needs_runner: bool,
    pub shape: WrapShape,
}

/// A conversion pair ready for codegen.
#[derive(Debug, Clone)]
pub struct WrapDescriptor {
    pub signature: WrapSignature,
    wrapper: Option<Rc<TypeDescriptor>>,
}

impl WrapDescriptor {
    pub fn raw(signature: WrapSignature) -> Self {
        Self {
            signature,
            wrapper: None,
        }
    }

    pub fn wrapped(signature: WrapSignature, wrapper: Rc<TypeDescriptor>) -> Self {
        Self {
            signature,
            wrapper: Some(wrapper),
        }
    }

    /// Descriptor of the wrapper type, for wrapper-shaped pairs.
    pub fn wrapper(&self) -> Option<&TypeDescriptor> {
        self.wrapper.as_deref()
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.signature.shape, WrapShape::Raw { .. })
    }

    pub fn words(&self, host: &mut dyn CodegenHost, config: &MemberConfig) -> WeaveResult<u32> {
        match (&self.signature.shape, &self.wrapper) {
            (WrapShape::Raw { max_bytes }, _) => Ok(words_for_bytes(*max_bytes)),
            (WrapShape::Wrapper { .. }, Some(wrapper)) => wrapper.words(host, config),
            (WrapShape::Wrapper { .. }, None) => Err(self.unresolved(host.module())),
        }
    }

    pub fn emit_read(&self, host: &mut dyn CodegenHost, ctx: &CodeGenContext) -> WeaveResult<Expr> {
        let mut args = self.leading_args(host.module(), ctx)?;
        match (&self.signature.shape, &self.wrapper) {
            (WrapShape::Raw { .. }, _) => args.push(ctx.address()),
            (WrapShape::Wrapper { .. }, Some(wrapper)) => args.push(wrapper.emit_read(host, ctx)?),
            (WrapShape::Wrapper { .. }, None) => return Err(self.unresolved(host.module())),
        }
        Ok(Expr::call_static(self.signature.deserialize.clone(), args))
    }

    pub fn emit_write(
        &self,
        host: &mut dyn CodegenHost,
        ctx: &CodeGenContext,
        value: Expr,
    ) -> WeaveResult<Vec<Stmt>> {
        let mut args = self.leading_args(host.module(), ctx)?;
        args.push(value);
        match (&self.signature.shape, &self.wrapper) {
            (WrapShape::Raw { max_bytes }, _) => {
                args.push(ctx.address());
                let written = ctx.fresh_local("written");
                let owner = host.module().type_name(self.signature.owner);
                Ok(vec![
                    Stmt::let_(
                        written.clone(),
                        Expr::call_static(self.signature.serialize.clone(), args),
                    ),
                    Stmt::if_then(
                        Expr::binary(
                            BinaryOp::Gt,
                            Expr::local(written),
                            Expr::int(i64::from(*max_bytes)),
                        ),
                        vec![Stmt::expr(Expr::trap(format!(
                            "{owner}::{} wrote more than its MaxByteCount of {max_bytes} bytes",
                            self.signature.serialize.name
                        )))],
                    ),
                ])
            }
            (WrapShape::Wrapper { .. }, Some(wrapper)) => {
                let converted = Expr::call_static(self.signature.serialize.clone(), args);
                wrapper.emit_write(host, ctx, converted)
            }
            (WrapShape::Wrapper { .. }, None) => Err(self.unresolved(host.module())),
        }
    }

    fn leading_args(&self, module: &Module, ctx: &CodeGenContext) -> WeaveResult<Vec<Expr>> {
        if !self.signature.needs_runner {
            return Ok(Vec::new());
        }
        let feature = format!("the wrap conversion of {}", module.type_name(self.signature.owner));
        Ok(vec![ctx.require_runner(&feature)?])
    }

    fn unresolved(&self, module: &Module) -> WeaveError {
        WeaveError::configuration(
            ErrorCode::WRAP_SIGNATURE,
            Subject::ty(module.type_name(self.signature.owner)),
            "wrapper type was not resolved",
        )
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Discovery
// ══════════════════════════════════════════════════════════════════════════════

/// Find and validate the conversion pair declared on `ty`.
///
/// Returns `Ok(None)` when the type declares neither method.
pub fn discover(module: &Module, ty: TypeId) -> WeaveResult<Option<WrapSignature>> {
    let Some(def) = module.get(ty) else {
        return Ok(None);
    };
    let serializers: Vec<&MethodDef> = def
        .methods
        .iter()
        .filter(|m| m.has_attribute(|a| matches!(a, Attribute::WrapSerialize)))
        .collect();
    let deserializers: Vec<&MethodDef> = def
        .methods
        .iter()
        .filter(|m| m.has_attribute(|a| matches!(a, Attribute::WrapDeserialize)))
        .collect();

    let (serialize, deserialize) = match (serializers.as_slice(), deserializers.as_slice()) {
        ([], []) => return Ok(None),
        ([s], [d]) => (*s, *d),
        ([], [_]) => {
            return Err(incomplete(&def.name, "a deserialize method without a serialize method"))
        }
        ([_], []) => {
            return Err(incomplete(&def.name, "a serialize method without a deserialize method"))
        }
        _ => {
            return Err(WeaveError::configuration(
                ErrorCode::AMBIGUOUS_HANDLER,
                Subject::ty(&def.name),
                format!(
                    "found {} serialize and {} deserialize methods; exactly one of each is allowed",
                    serializers.len(),
                    deserializers.len()
                ),
            )
            .at(def.span))
        }
    };

    let value_ty = TypeRef::Named(ty);
    let subject = |m: &MethodDef| Subject::method(&def.name, &m.name);
    let signature_error = |m: &MethodDef, expected: &str| {
        WeaveError::configuration(
            ErrorCode::WRAP_SIGNATURE,
            subject(m),
            format!(
                "conversion method `{}` has signature ({}) -> {}; expected `{expected}`",
                m.name,
                m.params
                    .iter()
                    .map(|p| module.display_type(&p.ty))
                    .collect::<Vec<_>>()
                    .join(", "),
                module.display_type(&m.ret),
            ),
        )
        .at(m.span)
    };

    // ── Serialize ──
    let expected_serialize = format!("{RAW_SERIALIZE_SHAPE}` or `{WRAPPER_SERIALIZE_SHAPE}");
    if !serialize.is_static {
        return Err(signature_error(serialize, &expected_serialize));
    }
    let (ser_runner, ser_params) = split_runner(&serialize.params);
    let shape = match ser_params {
        [value, buffer]
            if is_value_param(&value.ty, &value_ty) && buffer.ty == TypeRef::byte_ptr() =>
        {
            if serialize.ret != TypeRef::Scalar(ScalarKind::I32) {
                return Err(signature_error(serialize, RAW_SERIALIZE_SHAPE));
            }
            let max_bytes = match serialize.max_byte_count() {
                Some(n) if n > 0 => n,
                _ => {
                    return Err(WeaveError::configuration(
                        ErrorCode::WRAP_SIGNATURE,
                        subject(serialize),
                        "a raw serialize method must declare a positive MaxByteCount",
                    )
                    .at(serialize.span))
                }
            };
            WrapShape::Raw { max_bytes }
        }
        [value] if is_value_param(&value.ty, &value_ty) => {
            if serialize.ret.is_void() || serialize.ret == value_ty {
                return Err(signature_error(serialize, WRAPPER_SERIALIZE_SHAPE));
            }
            WrapShape::Wrapper {
                wrapper: serialize.ret.clone(),
            }
        }
        _ => return Err(signature_error(serialize, &expected_serialize)),
    };

    // ── Deserialize ──
    let expected_deserialize = match &shape {
        WrapShape::Raw { .. } => RAW_DESERIALIZE_SHAPE,
        WrapShape::Wrapper { .. } => WRAPPER_DESERIALIZE_SHAPE,
    };
    if !deserialize.is_static || deserialize.ret != value_ty {
        return Err(signature_error(deserialize, expected_deserialize));
    }
    let (de_runner, de_params) = split_runner(&deserialize.params);
    let matches_shape = match (&shape, de_params) {
        (WrapShape::Raw { .. }, [buffer]) => buffer.ty == TypeRef::byte_ptr(),
        (WrapShape::Wrapper { wrapper }, [param]) => {
            param.ty == *wrapper || param.ty == TypeRef::by_ref(wrapper.clone())
        }
        _ => false,
    };
    if !matches_shape {
        return Err(signature_error(deserialize, expected_deserialize));
    }
    if ser_runner != de_runner {
        return Err(WeaveError::configuration(
            ErrorCode::WRAP_SIGNATURE,
            Subject::ty(&def.name),
            "either both conversion methods take a leading runner or neither does",
        )
        .at(def.span));
    }

    Ok(Some(WrapSignature {
        owner: ty,
        serialize: MethodRef::new(ty, &serialize.name),
        deserialize: MethodRef::new(ty, &deserialize.name),
        needs_runner: ser_runner,
        shape,
    }))
}

fn split_runner(params: &[Param]) -> (bool, &[Param]) {
    match params.split_first() {
        Some((first, rest)) if first.ty == TypeRef::Runner => (true, rest),
        _ => (false, params),
    }
}

fn is_value_param(param: &TypeRef, value: &TypeRef) -> bool {
    param == value || *param == TypeRef::by_ref(value.clone())
}

fn incomplete(ty: &str, found: &str) -> WeaveError {
    WeaveError::configuration(
        ErrorCode::WRAP_PAIR_INCOMPLETE,
        Subject::ty(ty),
        format!("found {found}; conversions come in pairs"),
    )
    .with_suggestion("declare both a WrapSerialize and a WrapDeserialize method")
}
