//! RPC weaving: validation, keys, caller and receiver stubs.
//!
//! For every RPC `M` on a behaviour:
//!
//! ```text
//! M           caller stub   gates, encodes and sends, optionally invokes locally
//! M@Body      the user's original body
//! M@Receive   static receiver stub, decodes a message and invokes M@Body
//! ```
//!
//! The behaviour's routing table gets a `(key, M, M@Receive)` row. Instance
//! keys are numbered along the inheritance chain; overrides reuse the key of
//! the RPC they override. Static keys are derived from the qualified name.

use std::rc::Rc;

use sha2::{Digest, Sha256};

use netweave_codegen::types::{
    rpc_body_name, rpc_receiver_name, RPC_HEADER_DISCRIMINATOR, RPC_HEADER_KEY,
    RPC_HEADER_OBJECT, RPC_HEADER_SEQUENCE, RPC_HEADER_WORDS, RPC_INVOKING_FLAG,
    RPC_INVOKING_STATIC_FLAG,
};
use netweave_codegen::{CodeGenContext, MemberConfig, TypeDescriptor};
use netweave_types::body::{
    BinaryOp, Dispatch, Expr, Intrinsic, MessageFlags, MethodRef, Place, Stmt, UnaryOp,
};
use netweave_types::ir::{
    Attribute, FieldDef, MethodDef, Param, RpcStamp, RpcTableEntry, ScalarKind, TypeId, TypeRef,
};
use netweave_types::rpc::{
    LocalInvokeResult, RpcAttr, RpcKey, RpcMask, SendCullResult, TargetClass,
};
use netweave_types::{ErrorCode, Subject, WeaveError, WeaveResult};

use crate::layout::size_overflow;
use crate::weaver::Weaver;

/// Name-derived key of a static RPC: the first four bytes of
/// SHA-256(`"Type::Method"`), big-endian, masked to 31 bits.
pub fn static_rpc_key(type_name: &str, method: &str) -> u32 {
    let digest = Sha256::digest(format!("{type_name}::{method}").as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF
}

/// Whether `name` carries the RPC naming marker.
pub fn has_rpc_marker(name: &str) -> bool {
    name.starts_with("Rpc") || name.ends_with("Rpc") || name.ends_with("RPC")
}

// ══════════════════════════════════════════════════════════════════════════════
// Parameter plans
// ══════════════════════════════════════════════════════════════════════════════

/// How one parameter crosses the wire.
enum ParamPlan {
    /// Encoded into the payload at a word offset.
    Marshalled {
        descriptor: Rc<TypeDescriptor>,
        config: MemberConfig,
        offset_words: u32,
    },
    /// The explicit recipient; the receiver sees its own local player.
    Target,
    /// Rebuilt from the message on the receiving side.
    Info,
    /// The runtime context.
    Runner,
}

/// A validated RPC, ready for stub generation.
struct RpcPlan {
    owner: TypeId,
    owner_name: String,
    method: MethodDef,
    attr: RpcAttr,
    key: RpcKey,
    params: Vec<ParamPlan>,
    payload_words: u32,
}

impl RpcPlan {
    fn subject(&self) -> Subject {
        Subject::method(&self.owner_name, &self.method.name)
    }

    fn is_static(&self) -> bool {
        self.method.is_static
    }

    fn returns_info(&self) -> bool {
        self.method.ret == TypeRef::RpcInvokeInfo
    }

    fn target_param(&self) -> Option<&str> {
        self.method
            .params
            .iter()
            .zip(&self.params)
            .find(|(_, plan)| matches!(plan, ParamPlan::Target))
            .map(|(p, _)| p.name.as_str())
    }

    fn flag_expr(&self, object: Expr) -> Expr {
        if self.is_static() {
            Expr::static_field(self.owner, RPC_INVOKING_STATIC_FLAG)
        } else {
            Expr::field(object, RPC_INVOKING_FLAG)
        }
    }

    fn flag_place(&self, object: Expr) -> Place {
        if self.is_static() {
            Place::StaticField {
                ty: self.owner,
                name: RPC_INVOKING_STATIC_FLAG.into(),
            }
        } else {
            Place::Field {
                target: object,
                name: RPC_INVOKING_FLAG.into(),
            }
        }
    }

    /// Call `M@Body` on `object` (ignored for static RPCs) with `args`.
    fn body_call(&self, object: Expr, args: Vec<Expr>) -> Expr {
        let body = MethodRef::new(self.owner, rpc_body_name(&self.method.name));
        if self.is_static() {
            Expr::call_static(body, args)
        } else {
            Expr::call(body, object, args, Dispatch::Virtual)
        }
    }

    /// `saved = flag; flag = true; M@Body(args); flag = saved;`
    fn flagged_invoke(&self, object: Expr, args: Vec<Expr>, saved: &str) -> Vec<Stmt> {
        vec![
            Stmt::let_(saved, self.flag_expr(object.clone())),
            Stmt::assign(self.flag_place(object.clone()), Expr::bool(true)),
            Stmt::expr(self.body_call(object.clone(), args)),
            Stmt::assign(self.flag_place(object), Expr::local(saved)),
        ]
    }
}

// ── Small expression helpers ─────────────────────────────────────────────────

fn bit_and(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::BitAnd, lhs, rhs)
}

fn eq(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Eq, lhs, rhs)
}

fn ne(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Ne, lhs, rhs)
}

fn mask(m: RpcMask) -> Expr {
    Expr::int(i64::from(m.bits()))
}

const LOCAL: &str = "@local";
const SEND: &str = "@send";
const RUNNER: &str = "@runner";
const AUTH: &str = "@auth";
const TARGET: &str = "@target";
const MESSAGE: &str = "@message";
const PTR: &str = "@ptr";
const OBJECT: &str = "@obj";

impl Weaver<'_> {
    // ══════════════════════════════════════════════════════════════════════════
    // Entry
    // ══════════════════════════════════════════════════════════════════════════

    /// RPC attributes are only meaningful on behaviours.
    pub(crate) fn reject_misplaced_rpcs(&self) -> WeaveResult<()> {
        for def in &self.module.types {
            if def.is_behaviour() {
                continue;
            }
            if let Some(method) = def.methods.iter().find(|m| m.rpc_attr().is_some()) {
                return Err(WeaveError::configuration(
                    ErrorCode::INVALID_ATTRIBUTE,
                    Subject::method(&def.name, &method.name),
                    "RPCs can only be declared on behaviours",
                )
                .at(method.span));
            }
        }
        Ok(())
    }

    /// Weave every RPC of behaviour `id` not yet woven.
    pub(crate) fn weave_rpcs(&mut self, id: TypeId) -> WeaveResult<()> {
        let def = self.type_def(id)?;
        let type_name = def.name.clone();
        let ancestors = self.module.ancestors(id);

        let mut pending = Vec::new();
        for method in &def.methods {
            if method.rpc.is_some() {
                continue;
            }
            let overridden = self.overridden_rpc(&ancestors, method);
            if method.rpc_attr().is_none() && overridden.is_none() {
                continue;
            }
            if def.methods.iter().filter(|m| m.name == method.name).count() > 1 {
                return Err(WeaveError::configuration(
                    ErrorCode::AMBIGUOUS_HANDLER,
                    Subject::method(&type_name, &method.name),
                    "more than one RPC has this name; RPCs cannot be overloaded",
                )
                .at(method.span));
            }
            pending.push((method.name.clone(), overridden));
        }
        if pending.is_empty() {
            return Ok(());
        }

        self.scoped(format!("rpcs {type_name}"), |w| {
            let mut next_key = w.next_instance_key(id);
            for (name, overridden) in pending {
                match overridden {
                    Some((base_owner, key)) => w.weave_override(id, &name, base_owner, key)?,
                    None => w.weave_rpc(id, &name, &mut next_key)?,
                }
            }
            Ok(())
        })
    }

    /// The nearest ancestor RPC `method` overrides, with its key.
    fn overridden_rpc(&self, ancestors: &[TypeId], method: &MethodDef) -> Option<(TypeId, RpcKey)> {
        if !method.is_override || method.is_static {
            return None;
        }
        ancestors.iter().find_map(|a| {
            let stamp = self.module.get(*a)?.method(&method.name)?.rpc?;
            Some((*a, stamp.key))
        })
    }

    /// One past the highest instance key used along the inheritance chain.
    fn next_instance_key(&self, id: TypeId) -> u32 {
        std::iter::once(id)
            .chain(self.module.ancestors(id))
            .filter_map(|t| self.module.get(t))
            .flat_map(|t| t.rpc_table.iter())
            .filter_map(|e| match e.key {
                RpcKey::Instance(k) => Some(k + 1),
                RpcKey::Static(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Validation
    // ══════════════════════════════════════════════════════════════════════════

    fn plan_rpc(&mut self, id: TypeId, method: MethodDef, next_key: &mut u32) -> WeaveResult<RpcPlan> {
        let owner_name = self.module.type_name(id);
        let subject = Subject::method(&owner_name, &method.name);
        let Some(attr) = method.rpc_attr().copied() else {
            return Err(WeaveError::configuration(
                ErrorCode::INVALID_ATTRIBUTE,
                subject,
                "method is not marked as an RPC",
            ));
        };

        if !has_rpc_marker(&method.name) {
            return Err(WeaveError::configuration(
                ErrorCode::RPC_NAMING,
                subject,
                "RPC method names must start with `Rpc` or end with `Rpc`/`RPC`",
            )
            .at(method.span)
            .with_suggestion(format!("rename it to `Rpc{}`", method.name)));
        }
        if !matches!(method.ret, TypeRef::Void | TypeRef::RpcInvokeInfo) {
            return Err(WeaveError::configuration(
                ErrorCode::RPC_SIGNATURE,
                subject,
                format!(
                    "RPCs return nothing or RpcInvokeInfo, not {}",
                    self.module.display_type(&method.ret)
                ),
            )
            .at(method.span));
        }
        if method.is_static {
            if !matches!(method.params.first(), Some(Param { ty: TypeRef::Runner, .. })) {
                return Err(WeaveError::configuration(
                    ErrorCode::RPC_SIGNATURE,
                    subject,
                    "static RPCs must take the runner as their first parameter",
                )
                .at(method.span));
            }
            if attr.sources != RpcMask::ALL || attr.targets != RpcMask::ALL {
                return Err(WeaveError::validation(
                    ErrorCode::STATIC_CONTEXT,
                    subject,
                    format!(
                        "static RPCs have no object to hold authority over; sources {} and targets {} must both be All",
                        attr.sources, attr.targets
                    ),
                )
                .at(method.span));
            }
        }

        let mut params = Vec::with_capacity(method.params.len());
        let mut offset = 0;
        let mut targets = 0;
        for param in &method.params {
            let psubject = Subject::param(&owner_name, &method.name, &param.name);
            let plan = match &param.ty {
                _ if param.is_rpc_target() => {
                    targets += 1;
                    if param.ty != TypeRef::Player || targets > 1 {
                        return Err(WeaveError::configuration(
                            ErrorCode::RPC_SIGNATURE,
                            psubject,
                            "an RPC takes at most one target parameter, of player type",
                        ));
                    }
                    ParamPlan::Target
                }
                TypeRef::RpcInfo => ParamPlan::Info,
                TypeRef::Runner => ParamPlan::Runner,
                ty => {
                    let config = self.param_config(param, &psubject)?;
                    let descriptor = self.descriptor(ty, &psubject)?;
                    descriptor.check_config(&config, &psubject)?;
                    if descriptor.is_container() {
                        return Err(WeaveError::configuration(
                            ErrorCode::RPC_SIGNATURE,
                            psubject,
                            "containers cannot be passed to an RPC",
                        )
                        .with_suggestion("pass the elements in a networked struct instead"));
                    }
                    let words = descriptor.words(self, &config)?;
                    let plan = ParamPlan::Marshalled {
                        descriptor,
                        config,
                        offset_words: offset,
                    };
                    offset = offset
                        .checked_add(words)
                        .filter(|payload| payload.checked_add(RPC_HEADER_WORDS).is_some())
                        .ok_or_else(|| size_overflow(psubject, "message"))?;
                    plan
                }
            };
            params.push(plan);
        }

        let key = if method.is_static {
            RpcKey::Static(static_rpc_key(&owner_name, &method.name))
        } else {
            let key = RpcKey::Instance(*next_key);
            *next_key += 1;
            key
        };

        Ok(RpcPlan {
            owner: id,
            owner_name,
            method,
            attr,
            key,
            params,
            payload_words: offset,
        })
    }

    fn param_config(&self, param: &Param, subject: &Subject) -> WeaveResult<MemberConfig> {
        let mut config = MemberConfig::default();
        for attr in &param.attributes {
            match attr {
                Attribute::Capacity(n) => config.capacity = Some(*n),
                Attribute::Accuracy(spec) => {
                    config.accuracy = Some(self.settings.resolve_accuracy(spec, subject)?)
                }
                _ => {}
            }
        }
        Ok(config)
    }

    fn lint_rpc(&mut self, plan: &RpcPlan) {
        if !self.settings.check_rpc_usage || plan.target_param().is_some() {
            return;
        }
        let RpcAttr {
            sources,
            targets,
            invoke_local,
            ..
        } = plan.attr;
        if targets == RpcMask::NONE {
            self.diagnostics.warn(
                Some(plan.subject()),
                "RPC has an empty target mask and never runs anywhere",
            );
        } else if sources == targets && sources.bits().count_ones() == 1 && !plan.is_static() {
            let message = if invoke_local {
                format!("RPC is only ever targeted at its caller ({targets}); it is never sent")
            } else {
                format!(
                    "RPC is only ever targeted at its caller ({targets}) and local invocation is disabled; it never runs"
                )
            };
            self.diagnostics.warn(Some(plan.subject()), message);
        }
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Weaving
    // ══════════════════════════════════════════════════════════════════════════

    fn weave_rpc(&mut self, id: TypeId, name: &str, next_key: &mut u32) -> WeaveResult<()> {
        let Some(method) = self.type_def(id)?.method(name).cloned() else {
            return Ok(());
        };
        let span = method.span;
        let plan = self
            .scoped(format!("rpc {name}"), |w| w.plan_rpc(id, method, next_key))
            .map_err(|e| if e.span.is_synthesized() { e.at(span) } else { e })?;
        self.lint_rpc(&plan);

        let caller = self.caller_stub(&plan)?;
        let receiver = self.receiver_stub(&plan)?;

        let mut body = plan.method.clone();
        body.name = rpc_body_name(name);
        body.attributes.retain(|a| !matches!(a, Attribute::Rpc(_)));
        body.rpc = None;
        body.is_override = false;

        let ancestors = self.module.ancestors(id);
        let inherited_flag = ancestors.iter().any(|a| {
            self.module
                .get(*a)
                .is_some_and(|t| t.field(RPC_INVOKING_FLAG).is_some())
        });

        let key = plan.key;
        let Some(def) = self.module.get_mut(id) else {
            return Ok(());
        };
        def.methods.retain(|m| m.name != name);
        def.methods.push(caller);
        def.methods.push(body);
        def.methods.push(receiver);
        if plan.is_static() {
            if def.field(RPC_INVOKING_STATIC_FLAG).is_none() {
                def.fields.push(FieldDef::static_field(
                    RPC_INVOKING_STATIC_FLAG,
                    TypeRef::Scalar(ScalarKind::Bool),
                ));
            }
        } else if !inherited_flag && def.field(RPC_INVOKING_FLAG).is_none() {
            def.fields.push(FieldDef::new(
                RPC_INVOKING_FLAG,
                TypeRef::Scalar(ScalarKind::Bool),
            ));
        }
        def.rpc_table.push(RpcTableEntry {
            key,
            method: name.to_string(),
            receiver: rpc_receiver_name(name),
        });
        self.modified = true;
        self.diagnostics.debug(
            Some(plan.subject()),
            format!(
                "woven with key {key:?}, {} payload word(s)",
                plan.payload_words
            ),
        );
        Ok(())
    }

    /// An override keeps the inherited stub; its body overrides `M@Body`.
    fn weave_override(
        &mut self,
        id: TypeId,
        name: &str,
        base_owner: TypeId,
        key: RpcKey,
    ) -> WeaveResult<()> {
        let type_name = self.module.type_name(id);
        let subject = Subject::method(&type_name, name);
        let Some(base) = self.module.get(base_owner).and_then(|t| t.method(name)) else {
            return Ok(());
        };
        let (base_params, base_ret) = (
            base.params.iter().map(|p| p.ty.clone()).collect::<Vec<_>>(),
            base.ret.clone(),
        );
        let Some(def) = self.module.get_mut(id) else {
            return Ok(());
        };
        let Some(pos) = def.methods.iter().position(|m| m.name == name) else {
            return Ok(());
        };
        let method = &def.methods[pos];
        let params: Vec<TypeRef> = method.params.iter().map(|p| p.ty.clone()).collect();
        if params != base_params || method.ret != base_ret {
            return Err(WeaveError::configuration(
                ErrorCode::RPC_SIGNATURE,
                subject,
                "an RPC override must keep the signature of the RPC it overrides",
            )
            .at(method.span));
        }

        let mut body = def.methods.remove(pos);
        body.name = rpc_body_name(name);
        body.attributes.retain(|a| !matches!(a, Attribute::Rpc(_)));
        body.rpc = None;
        body.is_override = true;
        def.methods.push(body);
        self.modified = true;
        self.diagnostics.debug(
            Some(subject),
            format!("override of an RPC, keeps key {key:?}"),
        );
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Caller stub
    // ══════════════════════════════════════════════════════════════════════════

    fn caller_stub(&mut self, plan: &RpcPlan) -> WeaveResult<MethodDef> {
        let attr = plan.attr;
        let finish = |local: Expr, send: Expr| {
            if plan.returns_info() {
                Stmt::ret(Expr::intrinsic(Intrinsic::MakeInvokeInfo, vec![local, send]))
            } else {
                Stmt::ret_void()
            }
        };
        let code = |l: LocalInvokeResult, s: SendCullResult| {
            finish(Expr::int(l.code()), Expr::int(s.code()))
        };

        let runner = if plan.is_static() {
            let first = plan.method.params.first().map(|p| p.name.clone());
            Expr::local(first.unwrap_or_default())
        } else {
            Expr::local(RUNNER)
        };
        let direct_args = self.call_args(plan);
        let mut body = Vec::new();

        // 1. Already inside an invocation: run the body directly.
        let mut reentry = vec![Stmt::expr(plan.body_call(Expr::This, direct_args.clone()))];
        reentry.push(code(LocalInvokeResult::Invoked, SendCullResult::NotSent));
        body.push(Stmt::if_then(plan.flag_expr(Expr::This), reentry));

        // 2. The object must be attached.
        if !plan.is_static() {
            body.push(Stmt::let_(
                RUNNER,
                Expr::intrinsic(Intrinsic::Runner, vec![Expr::This]),
            ));
        }
        body.push(Stmt::if_then(
            Expr::intrinsic(Intrinsic::IsNull, vec![runner.clone()]),
            vec![Stmt::expr(Expr::trap(format!(
                "RPC {} was called on an object that is not attached to a runner",
                plan.subject()
            )))],
        ));

        // 3. Resimulation gate.
        if !attr.invoke_resim {
            body.push(Stmt::if_then(
                Expr::intrinsic(Intrinsic::IsResimulation, vec![runner.clone()]),
                vec![code(
                    LocalInvokeResult::NotInvokableDuringResim,
                    SendCullResult::NotInvokableDuringResim,
                )],
            ));
        }

        // 4. Explicit target.
        let target = plan.target_param().map(str::to_string);
        if let Some(target) = &target {
            body.push(Stmt::let_(
                TARGET,
                Expr::intrinsic(
                    Intrinsic::ClassifyTarget,
                    vec![runner.clone(), Expr::local(target.clone())],
                ),
            ));
            body.push(Stmt::if_then(
                eq(Expr::local(TARGET), Expr::int(TargetClass::Unreachable.code())),
                vec![code(
                    LocalInvokeResult::TargetPlayerIsNotLocal,
                    SendCullResult::TargetPlayerUnreachable,
                )],
            ));
            if !attr.invoke_local {
                body.push(Stmt::if_then(
                    eq(Expr::local(TARGET), Expr::int(TargetClass::Local.code())),
                    vec![code(
                        LocalInvokeResult::NotInvokableLocally,
                        SendCullResult::TargetPlayerIsLocalButRpcIsNotInvokableLocally,
                    )],
                ));
            }
        }

        // 5. Source authority.
        let auth = if plan.is_static() {
            mask(RpcMask::ALL)
        } else {
            Expr::intrinsic(Intrinsic::AuthorityMask, vec![Expr::This])
        };
        body.push(Stmt::let_(AUTH, auth));
        body.push(Stmt::if_then(
            eq(bit_and(Expr::local(AUTH), mask(attr.sources)), Expr::int(0)),
            vec![code(
                LocalInvokeResult::InsufficientSourceAuthority,
                SendCullResult::InsufficientSourceAuthority,
            )],
        ));
        body.push(Stmt::let_(LOCAL, Expr::int(LocalInvokeResult::NotInvoked.code())));
        body.push(Stmt::let_(SEND, Expr::int(SendCullResult::NotSent.code())));

        // 6. Send.
        let send_when = match (&target, plan.is_static()) {
            (Some(_), _) => eq(Expr::local(TARGET), Expr::int(TargetClass::Remote.code())),
            (None, true) => Expr::bool(true),
            (None, false) => ne(
                bit_and(
                    mask(attr.targets),
                    Expr::Unary {
                        op: UnaryOp::BitNot,
                        operand: Box::new(Expr::local(AUTH)),
                    },
                ),
                Expr::int(0),
            ),
        };
        let mut send = self.encode_message(plan, &runner)?;
        send.push(Stmt::assign(
            Place::local(SEND),
            Expr::int(SendCullResult::NotCulled.code()),
        ));
        body.push(Stmt::if_then(send_when, send));

        // 7. Local invocation.
        let local_args = self.local_args(plan, &runner);
        let mut invoke = plan.flagged_invoke(Expr::This, local_args, "@saved");
        invoke.push(Stmt::assign(
            Place::local(LOCAL),
            Expr::int(LocalInvokeResult::Invoked.code()),
        ));
        match (&target, attr.invoke_local) {
            (Some(_), true) => body.push(Stmt::if_then(
                eq(Expr::local(TARGET), Expr::int(TargetClass::Local.code())),
                invoke,
            )),
            (Some(_), false) => {}
            (None, true) => body.push(Stmt::If {
                cond: ne(bit_and(mask(attr.targets), Expr::local(AUTH)), Expr::int(0)),
                then: invoke,
                otherwise: vec![Stmt::assign(
                    Place::local(LOCAL),
                    Expr::int(LocalInvokeResult::InsufficientTargetAuthority.code()),
                )],
            }),
            (None, false) => body.push(Stmt::assign(
                Place::local(LOCAL),
                Expr::int(LocalInvokeResult::NotInvokableLocally.code()),
            )),
        }

        // 8. Outcome.
        body.push(finish(Expr::local(LOCAL), Expr::local(SEND)));

        let mut stub = plan.method.clone();
        stub.body = body;
        stub.rpc = Some(RpcStamp { key: plan.key });
        Ok(stub)
    }

    /// Allocate, fill and send the message for `plan`.
    fn encode_message(&mut self, plan: &RpcPlan, runner: &Expr) -> WeaveResult<Vec<Stmt>> {
        let words = RPC_HEADER_WORDS
            .checked_add(plan.payload_words)
            .ok_or_else(|| size_overflow(plan.subject(), "message"))?;
        let mut out = vec![
            Stmt::let_(
                MESSAGE,
                Expr::intrinsic(Intrinsic::AllocMessage { words }, vec![runner.clone()]),
            ),
            Stmt::let_(
                PTR,
                Expr::intrinsic(Intrinsic::MessagePtr, vec![Expr::local(MESSAGE)]),
            ),
        ];
        let header = |word: u32, value: Expr| Stmt::Store {
            scalar: ScalarKind::I32,
            ptr: Expr::offset(Expr::local(PTR), word),
            value,
        };
        let object = if plan.is_static() {
            Expr::int(0)
        } else {
            Expr::intrinsic(Intrinsic::ObjectId, vec![Expr::This])
        };
        out.push(header(RPC_HEADER_OBJECT, object));
        out.push(header(
            RPC_HEADER_DISCRIMINATOR,
            Expr::int(plan.key.discriminator()),
        ));
        out.push(header(RPC_HEADER_KEY, Expr::int(i64::from(plan.key.value()))));
        out.push(header(
            RPC_HEADER_SEQUENCE,
            Expr::intrinsic(Intrinsic::NextSequence, vec![runner.clone()]),
        ));

        let base = CodeGenContext::new(Expr::local(PTR), plan.subject()).with_runner(runner.clone());
        for (param, p) in plan.params.iter().zip(&plan.method.params) {
            if let ParamPlan::Marshalled {
                descriptor,
                config,
                offset_words,
            } = param
            {
                let ctx = base
                    .at(RPC_HEADER_WORDS + offset_words)
                    .with_config(config.clone())
                    .with_subject(Subject::param(&plan.owner_name, &plan.method.name, &p.name));
                out.extend(descriptor.emit_write(self, &ctx, Expr::local(p.name.clone()))?);
            }
        }

        let target = plan
            .target_param()
            .map_or_else(Expr::null, |t| Expr::local(t.to_string()));
        out.push(Stmt::expr(Expr::intrinsic(
            Intrinsic::SetMessageFlags {
                flags: MessageFlags {
                    channel: plan.attr.channel,
                    tick_aligned: plan.attr.tick_aligned,
                    targeted: plan.target_param().is_some(),
                },
            },
            vec![Expr::local(MESSAGE), target],
        )));
        out.push(Stmt::expr(Expr::intrinsic(
            Intrinsic::SendMessage,
            vec![runner.clone(), Expr::local(MESSAGE)],
        )));
        Ok(out)
    }

    /// The caller's own arguments, passed through unchanged.
    fn call_args(&self, plan: &RpcPlan) -> Vec<Expr> {
        plan.method
            .params
            .iter()
            .map(|p| Expr::local(p.name.clone()))
            .collect()
    }

    /// Arguments for a local invocation: info parameters describe the call.
    fn local_args(&self, plan: &RpcPlan, runner: &Expr) -> Vec<Expr> {
        plan.method
            .params
            .iter()
            .zip(&plan.params)
            .map(|(p, role)| match role {
                ParamPlan::Info => Expr::intrinsic(
                    Intrinsic::LocalInfo {
                        channel: plan.attr.channel,
                    },
                    vec![runner.clone()],
                ),
                _ => Expr::local(p.name.clone()),
            })
            .collect()
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Receiver stub
    // ══════════════════════════════════════════════════════════════════════════

    fn receiver_stub(&mut self, plan: &RpcPlan) -> WeaveResult<MethodDef> {
        let runner = Expr::local(RUNNER);
        let mut body = vec![Stmt::let_(
            PTR,
            Expr::intrinsic(Intrinsic::MessagePtr, vec![Expr::local(MESSAGE)]),
        )];

        let object = if plan.is_static() {
            Expr::null()
        } else {
            body.push(Stmt::let_(
                OBJECT,
                Expr::intrinsic(
                    Intrinsic::ResolveObject,
                    vec![Expr::load(
                        ScalarKind::I32,
                        Expr::offset(Expr::local(PTR), RPC_HEADER_OBJECT),
                    )],
                ),
            ));
            body.push(Stmt::if_then(
                Expr::intrinsic(Intrinsic::IsNull, vec![Expr::local(OBJECT)]),
                vec![Stmt::ret_void()],
            ));
            Expr::local(OBJECT)
        };

        let base = CodeGenContext::new(Expr::local(PTR), plan.subject()).with_runner(runner.clone());
        let mut args = Vec::with_capacity(plan.params.len());
        for (i, (role, p)) in plan.params.iter().zip(&plan.method.params).enumerate() {
            let value = match role {
                ParamPlan::Marshalled {
                    descriptor,
                    config,
                    offset_words,
                } => {
                    let ctx = base
                        .at(RPC_HEADER_WORDS + offset_words)
                        .with_config(config.clone())
                        .with_subject(Subject::param(&plan.owner_name, &plan.method.name, &p.name));
                    descriptor.emit_read(self, &ctx)?
                }
                ParamPlan::Target => Expr::intrinsic(Intrinsic::LocalPlayer, vec![runner.clone()]),
                ParamPlan::Info => {
                    Expr::intrinsic(Intrinsic::MessageInfo, vec![Expr::local(MESSAGE)])
                }
                ParamPlan::Runner => runner.clone(),
            };
            let local = format!("@arg{i}");
            body.push(Stmt::let_(local.clone(), value));
            args.push(Expr::local(local));
        }
        body.extend(plan.flagged_invoke(object, args, "@saved"));

        Ok(MethodDef::new(rpc_receiver_name(&plan.method.name))
            .static_method()
            .param(RUNNER, TypeRef::Runner)
            .param(MESSAGE, TypeRef::Message)
            .with_body(body))
    }
}
