//! Struct and behaviour layout.
//!
//! Networked members are assigned consecutive word ranges in declaration
//! order, after whatever the ancestors occupy. Each member's user accessors
//! are replaced with generated ones that read or write the state buffer, and
//! its backing field is removed.
//!
//! Behaviours keep their declared initial values: top-level constructor
//! assignments to networked members are moved into a generated
//! `@CopyDefaultsToBuffer` method that the runtime calls once the object has
//! a state buffer. Networked structs have their buffer from the start, so
//! their constructor assignments are rewritten into direct buffer writes.

use std::collections::BTreeMap;
use std::rc::Rc;

use netweave_codegen::types::{
    default_field_name, COPY_BUFFER_TO_DEFAULTS, COPY_DEFAULTS_TO_BUFFER,
};
use netweave_codegen::{CodeGenContext, MemberConfig, TypeDescriptor};
use netweave_types::body::{Dispatch, Expr, Intrinsic, MethodRef, Place, Stmt};
use netweave_types::ir::{
    FieldDef, MemberSlot, MethodDef, PropertyDef, Stamp, TypeDef, TypeId, TypeKind, TypeRef,
};
use netweave_types::{ErrorCode, Span, Subject, WeaveError, WeaveResult};

use crate::accessors;
use crate::settings::DictionaryBacking;
use crate::weaver::{MemberLayout, TypeLayout, Weaver};

/// A member after layout, with what later steps need to emit code for it.
struct LaidMember {
    prop: PropertyDef,
    descriptor: Rc<TypeDescriptor>,
    ctx: CodeGenContext,
}

/// Initial value of a behaviour member, captured from its constructors.
struct Initializer {
    member: String,
    value: Expr,
}

/// Attach `span` to errors that do not carry one yet.
fn located(err: WeaveError, span: Span) -> WeaveError {
    if err.span.is_synthesized() {
        err.at(span)
    } else {
        err
    }
}

/// A running word count that no longer fits in a `u32`.
pub(crate) fn size_overflow(subject: Subject, what: &str) -> WeaveError {
    WeaveError::layout(
        ErrorCode::SIZE_OVERFLOW,
        subject,
        format!("{what} does not fit in a 32-bit word count"),
    )
    .with_suggestion("lower the capacities of the members involved")
}

impl Weaver<'_> {
    // ══════════════════════════════════════════════════════════════════════════
    // Entry
    // ══════════════════════════════════════════════════════════════════════════

    /// Total word count of `id`, laying it out first if it is not stamped.
    pub(crate) fn layout_type(&mut self, id: TypeId) -> WeaveResult<u32> {
        let Some(def) = self.module.get(id) else {
            return Err(WeaveError::configuration(
                ErrorCode::UNSUPPORTED_TYPE,
                Subject::module(&self.module.name),
                format!("type {id} is not defined"),
            ));
        };
        let name = def.name.clone();
        match def.stamp {
            Some(Stamp::Laid { words }) => return self.verify_stamp(id, words),
            Some(Stamp::Excluded) => {
                return Err(WeaveError::configuration(
                    ErrorCode::UNSUPPORTED_TYPE,
                    Subject::ty(&name),
                    format!("{name} is excluded from weaving and has no layout"),
                )
                .at(def.span)
                .with_suggestion("remove SkipWeaving or stop embedding the type"))
            }
            None => {}
        }
        if !(def.is_composite() || def.is_behaviour()) {
            return Err(WeaveError::configuration(
                ErrorCode::UNSUPPORTED_TYPE,
                Subject::ty(&name),
                format!("{name} is neither a networked struct nor a behaviour"),
            ));
        }
        if let Some(pos) = self.in_progress.iter().position(|t| *t == id) {
            let chain: Vec<String> = self.in_progress[pos..]
                .iter()
                .map(|t| self.module.type_name(*t))
                .chain(std::iter::once(name.clone()))
                .collect();
            return Err(WeaveError::layout(
                ErrorCode::CYCLIC_COMPOSITE,
                Subject::ty(&name),
                format!("{name} contains itself: {}", chain.join(" -> ")),
            )
            .at(def.span)
            .with_suggestion("break the cycle with a behaviour reference"));
        }

        self.in_progress.push(id);
        let result = self.scoped(format!("layout {name}"), |w| w.compute_layout(id));
        self.in_progress.pop();
        result
    }

    /// Words occupied by ancestors of the same family as `id`.
    fn base_words(&mut self, id: TypeId) -> WeaveResult<u32> {
        let def = self.type_def(id)?;
        let composite = def.is_composite();
        let Some(base) = def.base else {
            return Ok(0);
        };
        let contributes = self.module.get(base).is_some_and(|b| {
            b.stamp != Some(Stamp::Excluded)
                && ((composite && b.is_composite()) || (!composite && b.is_behaviour()))
        });
        if contributes {
            self.layout_type(base)
        } else {
            Ok(0)
        }
    }

    /// Check a stamped type against its own member slots.
    fn verify_stamp(&mut self, id: TypeId, words: u32) -> WeaveResult<u32> {
        let def = self.type_def(id)?;
        let name = def.name.clone();
        let mut member_words = 0u64;
        for prop in def.networked_properties() {
            let Some(slot) = prop.slot else {
                return Err(WeaveError::layout(
                    ErrorCode::INCONSISTENT_SIZE,
                    Subject::member(&name, &prop.name),
                    "type is stamped but this networked member has no slot",
                ));
            };
            member_words += u64::from(slot.words);
        }
        let counted = u64::from(self.base_words(id)?) + member_words;
        if counted != u64::from(words) {
            return Err(WeaveError::layout(
                ErrorCode::INCONSISTENT_SIZE,
                Subject::ty(&name),
                format!(
                    "stamped with {words} words but base and members add up to {counted}"
                ),
            )
            .with_suggestion("weave the unmodified module again"));
        }
        Ok(words)
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Layout
    // ══════════════════════════════════════════════════════════════════════════

    fn compute_layout(&mut self, id: TypeId) -> WeaveResult<u32> {
        let base_words = self.base_words(id)?;
        let mut def = self.type_def(id)?.clone();
        let is_behaviour = def.is_behaviour();
        if def.is_composite() {
            reject_plain_fields(&def)?;
        }

        let initializers = if is_behaviour {
            self.capture_initializers(&mut def)?
        } else {
            Vec::new()
        };
        let initialized: Vec<String> = if is_behaviour {
            initializers.iter().map(|i| i.member.clone()).collect()
        } else {
            assigned_in_constructors(&def)
        };

        let mut offset = base_words;
        let mut laid = Vec::new();
        for prop in def.properties.iter().filter(|p| p.is_networked()) {
            let has_initializer = initialized.contains(&prop.name);
            let span = prop.span;
            let member = self
                .scoped(format!("member {}", prop.name), |w| {
                    w.lay_member(&def.name, is_behaviour, prop, offset, has_initializer)
                })
                .map_err(|e| located(e, span))?;
            offset = offset.checked_add(member.ctx_words()).ok_or_else(|| {
                size_overflow(Subject::ty(&def.name), "layout").at(def.span)
            })?;
            laid.push(member);
        }

        if def.is_composite() && offset == 0 {
            return Err(WeaveError::layout(
                ErrorCode::ZERO_SIZE,
                Subject::ty(&def.name),
                format!("{} has no networked members", def.name),
            )
            .at(def.span)
            .with_suggestion("add a networked property or mark the type SkipWeaving"));
        }

        if is_behaviour {
            self.generate_default_copies(&mut def, &laid, &initializers)?;
        } else {
            self.rewrite_struct_constructors(&mut def, &laid)?;
        }
        redirect_backing_fields(&mut def, &laid);

        let backing: Vec<String> = self
            .type_def(id)?
            .networked_properties()
            .filter_map(|p| p.backing_field.clone())
            .collect();
        def.fields.retain(|f| !backing.contains(&f.name));

        let layout = TypeLayout {
            name: def.name.clone(),
            base_words,
            total_words: offset,
            members: laid
                .iter()
                .map(|m| MemberLayout {
                    name: m.prop.name.clone(),
                    offset_words: m.ctx.offset_words(),
                    words: m.ctx_words(),
                    encoding: m.descriptor.kind_name().to_string(),
                })
                .collect(),
        };
        for member in laid {
            if let Some(slot) = def.property_mut(&member.prop.name) {
                *slot = member.prop;
            }
        }
        def.stamp = Some(Stamp::Laid { words: offset });
        self.diagnostics.debug(
            Some(Subject::ty(&def.name)),
            format!(
                "laid out {} member(s), {offset} word(s) ({base_words} inherited)",
                layout.members.len()
            ),
        );
        let Some(slot) = self.module.get_mut(id) else {
            return Err(WeaveError::configuration(
                ErrorCode::UNSUPPORTED_TYPE,
                Subject::module(&self.module.name),
                format!("type {id} is not defined"),
            ));
        };
        *slot = def;
        self.layouts.insert(id, layout);
        self.modified = true;
        Ok(offset)
    }

    fn lay_member(
        &mut self,
        owner: &str,
        is_behaviour: bool,
        prop: &PropertyDef,
        offset: u32,
        has_initializer: bool,
    ) -> WeaveResult<LaidMember> {
        let subject = Subject::member(owner, &prop.name);
        if prop.is_static {
            return Err(WeaveError::validation(
                ErrorCode::STATIC_CONTEXT,
                subject,
                "networked members cannot be static; static members have no state buffer",
            ));
        }

        let accuracy = prop
            .accuracy()
            .map(|spec| self.settings.resolve_accuracy(spec, &subject))
            .transpose()?;
        let config = MemberConfig {
            capacity: prop.capacity(),
            accuracy,
        };
        let descriptor = self.descriptor(&prop.ty, &subject)?;
        descriptor.check_config(&config, &subject)?;
        accessors::check_replaceable(prop, &subject)?;
        if prop.getter.is_none() {
            return Err(WeaveError::configuration(
                ErrorCode::MISSING_ACCESSOR,
                subject,
                "networked member has no getter",
            )
            .with_suggestion("declare it as `{ get; set; }` or `{ get; }`"));
        }

        let words = descriptor.words(self, &config)?;
        if words == 0 {
            return Err(WeaveError::layout(
                ErrorCode::ZERO_SIZE,
                subject,
                format!("a {} member occupies no words", descriptor.kind_name()),
            ));
        }

        let mut ctx = CodeGenContext::new(Expr::state_ptr(Expr::This), subject.clone())
            .at(offset)
            .with_config(config);
        if is_behaviour {
            ctx = ctx.with_runner(Expr::intrinsic(Intrinsic::Runner, vec![Expr::This]));
        }
        let guard = self.null_guard(is_behaviour, owner, &prop.name);

        let mut getter = guard.clone();
        getter.push(Stmt::ret(descriptor.emit_read(self, &ctx)?));

        let setter = match &prop.setter {
            None => None,
            Some(_) if descriptor.read_only => {
                return Err(WeaveError::configuration(
                    ErrorCode::UNSUPPORTED_MEMBER,
                    subject,
                    format!(
                        "{} is a reference form and cannot have a setter",
                        self.module.display_type(&prop.ty)
                    ),
                )
                .with_suggestion("remove the setter"))
            }
            Some(_) => {
                let mut body = guard;
                body.extend(descriptor.emit_write(self, &ctx, Expr::local("value"))?);
                Some(body)
            }
        };

        if setter.is_none() && !descriptor.is_container() && !has_initializer {
            self.diagnostics.warn(
                Some(subject.clone()),
                "networked member is never assigned; it could be a plain field",
            );
        }
        self.diagnostics.debug(
            Some(subject),
            format!(
                "{} at word {offset}, {words} word(s)",
                descriptor.kind_name()
            ),
        );

        let mut laid = prop.clone();
        laid.getter = Some(getter);
        laid.setter = setter;
        laid.backing_field = None;
        laid.slot = Some(MemberSlot {
            offset_words: offset,
            words,
        });
        Ok(LaidMember {
            prop: laid,
            descriptor,
            ctx,
        })
    }

    /// Trap when a behaviour accessor runs before the object is attached.
    fn null_guard(&self, is_behaviour: bool, owner: &str, member: &str) -> Vec<Stmt> {
        if !is_behaviour || !self.settings.null_checks {
            return Vec::new();
        }
        vec![Stmt::if_then(
            Expr::intrinsic(Intrinsic::IsNull, vec![Expr::state_ptr(Expr::This)]),
            vec![Stmt::expr(Expr::trap(format!(
                "{owner}.{member} was accessed before the object was attached to a runner"
            )))],
        )]
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Initializers
    // ══════════════════════════════════════════════════════════════════════════

    /// Remove top-level constructor assignments to networked members and
    /// return the first value assigned to each.
    fn capture_initializers(&mut self, def: &mut TypeDef) -> WeaveResult<Vec<Initializer>> {
        let targets = networked_targets(def);
        let mut captured: Vec<Initializer> = Vec::new();
        for ctor in &mut def.constructors {
            let mut kept = Vec::with_capacity(ctor.body.len());
            for stmt in ctor.body.drain(..) {
                let Some(member) = initialized_member(&stmt, &targets) else {
                    kept.push(stmt);
                    continue;
                };
                let Stmt::Assign { value, .. } = stmt else {
                    continue;
                };
                let subject = Subject::member(&def.name, &member);
                if value.any(&mut |e| matches!(e, Expr::Local { .. } | Expr::This)) {
                    return Err(WeaveError::configuration(
                        ErrorCode::INVALID_INITIALIZER,
                        subject,
                        "initial value depends on constructor state and cannot be replayed",
                    )
                    .at(ctor.span)
                    .with_suggestion("initialize from constants, or assign after the object is attached"));
                }
                match captured.iter().find(|i| i.member == member) {
                    Some(first) if first.value != value => self.diagnostics.warn(
                        Some(subject),
                        "constructors assign different initial values; the first one is used",
                    ),
                    Some(_) => {}
                    None => captured.push(Initializer { member, value }),
                }
            }
            ctor.body = kept;
        }
        // Keep declaration order so defaults are written in layout order.
        let order: Vec<&str> = def
            .networked_properties()
            .map(|p| p.name.as_str())
            .collect();
        captured.sort_by_key(|i| order.iter().position(|n| *n == i.member));
        Ok(captured)
    }

    /// Generate `@CopyDefaultsToBuffer` and `@CopyBufferToDefaults`.
    fn generate_default_copies(
        &mut self,
        def: &mut TypeDef,
        laid: &[LaidMember],
        initializers: &[Initializer],
    ) -> WeaveResult<()> {
        let base = def.base;
        let inherited = |name: &str| {
            base.and_then(|b| self.module.find_method(b, name))
                .map(|(owner, _)| MethodRef::new(owner, name))
        };
        let base_to_buffer = inherited(COPY_DEFAULTS_TO_BUFFER);
        let base_to_defaults = inherited(COPY_BUFFER_TO_DEFAULTS);

        let mut to_buffer = Vec::new();
        let mut to_defaults = Vec::new();
        if let Some(method) = base_to_buffer.clone() {
            to_buffer.push(Stmt::expr(Expr::call(method, Expr::This, Vec::new(), Dispatch::Direct)));
        }
        if let Some(method) = base_to_defaults.clone() {
            to_defaults.push(Stmt::expr(Expr::call(method, Expr::This, Vec::new(), Dispatch::Direct)));
        }

        for init in initializers {
            let Some(member) = laid.iter().find(|m| m.prop.name == init.member) else {
                continue;
            };
            let read = member.descriptor.emit_read(self, &member.ctx)?;
            if member.descriptor.is_container() {
                to_buffer.push(Stmt::expr(Expr::intrinsic(
                    Intrinsic::ViewFill,
                    vec![read.clone(), init.value.clone()],
                )));
                to_defaults.push(Stmt::assign(
                    Place::this_field(default_field_name(&init.member)),
                    Expr::intrinsic(Intrinsic::ViewSnapshot, vec![read]),
                ));
            } else {
                to_buffer.extend(member.descriptor.emit_write(
                    self,
                    &member.ctx,
                    init.value.clone(),
                )?);
                to_defaults.push(Stmt::assign(
                    Place::this_field(default_field_name(&init.member)),
                    read,
                ));
            }

            let field = default_field_name(&init.member);
            let ty = self.default_field_type(&member.prop.ty);
            if def.field(&field).is_none() {
                def.fields.push(FieldDef::new(field, ty));
            }
        }

        let mut install = |name: &str, body: Vec<Stmt>, overrides: bool| {
            let mut method = MethodDef::new(name).with_body(body);
            method.is_override = overrides;
            def.methods.retain(|m| m.name != name);
            def.methods.push(method);
        };
        install(COPY_DEFAULTS_TO_BUFFER, to_buffer, base_to_buffer.is_some());
        install(COPY_BUFFER_TO_DEFAULTS, to_defaults, base_to_defaults.is_some());
        Ok(())
    }

    /// Declared type of the field holding a member's relocated default.
    fn default_field_type(&mut self, ty: &TypeRef) -> TypeRef {
        match (ty, self.settings.dictionary_backing) {
            (TypeRef::Dictionary(key, value), DictionaryBacking::SerializableList) => {
                TypeRef::array(TypeRef::Named(self.entry_type(key, value)))
            }
            _ => ty.clone(),
        }
    }

    /// Plain key/value struct backing serializable dictionary defaults.
    fn entry_type(&mut self, key: &TypeRef, value: &TypeRef) -> TypeId {
        let name = format!(
            "@Entry<{}, {}>",
            self.module.display_type(key),
            self.module.display_type(value)
        );
        if let Some(id) = self.module.find(&name) {
            return id;
        }
        let mut entry = TypeDef::new(name, TypeKind::Struct)
            .with_field(FieldDef::new("Key", key.clone()))
            .with_field(FieldDef::new("Value", value.clone()));
        entry.synthesized = true;
        self.module.add_type(entry)
    }

    /// Turn constructor assignments of networked struct members into
    /// direct buffer writes.
    fn rewrite_struct_constructors(
        &mut self,
        def: &mut TypeDef,
        laid: &[LaidMember],
    ) -> WeaveResult<()> {
        let targets = networked_targets(def);
        let mut constructors = std::mem::take(&mut def.constructors);
        for ctor in &mut constructors {
            let mut body = Vec::with_capacity(ctor.body.len());
            for stmt in ctor.body.drain(..) {
                let Some(name) = initialized_member(&stmt, &targets) else {
                    body.push(stmt);
                    continue;
                };
                let (Stmt::Assign { value, .. }, Some(member)) =
                    (stmt, laid.iter().find(|m| m.prop.name == name))
                else {
                    continue;
                };
                if member.descriptor.is_container() {
                    let read = member.descriptor.emit_read(self, &member.ctx)?;
                    body.push(Stmt::expr(Expr::intrinsic(
                        Intrinsic::ViewFill,
                        vec![read, value],
                    )));
                } else {
                    body.extend(member.descriptor.emit_write(self, &member.ctx, value)?);
                }
            }
            ctor.body = body;
        }
        def.constructors = constructors;
        Ok(())
    }
}

impl LaidMember {
    fn ctx_words(&self) -> u32 {
        self.prop.slot.map_or(0, |s| s.words)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Networked member names keyed by every name an assignment may use:
/// the member itself and its backing field.
fn networked_targets(def: &TypeDef) -> BTreeMap<String, String> {
    let mut targets = BTreeMap::new();
    for prop in def.networked_properties() {
        targets.insert(prop.name.clone(), prop.name.clone());
        if let Some(backing) = &prop.backing_field {
            targets.insert(backing.clone(), prop.name.clone());
        }
    }
    targets
}

/// The member a `this.<x> = value;` statement initializes, if any.
fn initialized_member(stmt: &Stmt, targets: &BTreeMap<String, String>) -> Option<String> {
    let Stmt::Assign { place, .. } = stmt else {
        return None;
    };
    let (Place::Field { target, name } | Place::Member { target, name }) = place else {
        return None;
    };
    if !matches!(target, Expr::This) {
        return None;
    }
    targets.get(name).cloned()
}

/// Networked members assigned at the top level of any constructor.
fn assigned_in_constructors(def: &TypeDef) -> Vec<String> {
    let targets = networked_targets(def);
    def.constructors
        .iter()
        .flat_map(|c| c.body.iter())
        .filter_map(|s| initialized_member(s, &targets))
        .collect()
}

/// Networked structs hold nothing outside their layout.
fn reject_plain_fields(def: &TypeDef) -> WeaveResult<()> {
    let backing: Vec<&str> = def
        .networked_properties()
        .filter_map(|p| p.backing_field.as_deref())
        .collect();
    match def
        .fields
        .iter()
        .find(|f| !f.is_static && !backing.contains(&f.name.as_str()))
    {
        Some(field) => Err(WeaveError::configuration(
            ErrorCode::UNSUPPORTED_MEMBER,
            Subject::member(&def.name, &field.name),
            "networked structs cannot hold plain instance fields",
        )
        .at(def.span)
        .with_suggestion("make it a networked property or move it out of the struct")),
        None => Ok(()),
    }
}

/// Point remaining uses of removed backing fields at the generated accessors.
fn redirect_backing_fields(def: &mut TypeDef, laid: &[LaidMember]) {
    let backing: BTreeMap<String, String> = def
        .networked_properties()
        .filter_map(|p| Some((p.backing_field.clone()?, p.name.clone())))
        .collect();
    if backing.is_empty() {
        return;
    }
    let settable: Vec<&str> = laid
        .iter()
        .filter(|m| m.prop.setter.is_some())
        .map(|m| m.prop.name.as_str())
        .collect();

    let mut redirect_expr = |e: &mut Expr| {
        if let Expr::Field { target, name } = e {
            if matches!(**target, Expr::This) {
                if let Some(member) = backing.get(name.as_str()) {
                    *e = Expr::member(Expr::This, member.clone());
                }
            }
        }
    };
    let mut redirect_place = |p: &mut Place| {
        if let Place::Field { target, name } = p {
            if matches!(target, Expr::This) {
                if let Some(member) = backing.get(name.as_str()) {
                    if settable.contains(&member.as_str()) {
                        *p = Place::this_member(member.clone());
                    }
                }
            }
        }
    };
    for method in def.methods.iter_mut().chain(def.constructors.iter_mut()) {
        for stmt in &mut method.body {
            stmt.rewrite(&mut redirect_expr, &mut redirect_place);
        }
    }
}
