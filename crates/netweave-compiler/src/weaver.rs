//! The weaving pass: ordering, stamping and the codegen host.
//!
//! ```text
//! exclusions → composites/inputs → behaviours (bases first) → RPCs
//! ```
//!
//! The pass works on a private copy of the module and hands it back only
//! when every stage succeeded.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::Serialize;

use netweave_codegen::types::{CODEC_READ, CODEC_WRITE};
use netweave_codegen::{
    CodeGenContext, CodegenHost, ContainerKind, MemberConfig, TypeDescriptor,
    TypeDescriptorRegistry,
};
use netweave_types::body::{Expr, Stmt};
use netweave_types::ir::{
    Attribute, MethodDef, Module, Stamp, TypeDef, TypeId, TypeKind, TypeRef,
};
use netweave_types::{Diagnostics, ErrorCode, LogEntry, Subject, WeaveError, WeaveResult};

use crate::settings::WeaverSettings;

// ══════════════════════════════════════════════════════════════════════════════
// Public entry point
// ══════════════════════════════════════════════════════════════════════════════

/// One laid-out member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberLayout {
    pub name: String,
    pub offset_words: u32,
    pub words: u32,
    /// Short name of the member's encoding.
    pub encoding: String,
}

/// The layout computed for one type in this pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeLayout {
    pub name: String,
    /// Words contributed by ancestors; the first member starts here.
    pub base_words: u32,
    pub total_words: u32,
    pub members: Vec<MemberLayout>,
}

/// Result of a successful pass.
#[derive(Debug, Serialize)]
pub struct WeaveOutcome {
    /// Whether anything in the module changed.
    pub modified: bool,
    pub diagnostics: Vec<LogEntry>,
    /// Layouts computed by this pass, keyed by type name.
    pub layouts: BTreeMap<String, TypeLayout>,
}

impl WeaveOutcome {
    pub fn warnings(&self) -> impl Iterator<Item = &LogEntry> {
        self.diagnostics
            .iter()
            .filter(|e| e.level == netweave_types::LogLevel::Warning)
    }
}

/// Weave `module` in place.
///
/// On error the module is left exactly as it was passed in. Re-weaving an
/// already woven module is a no-op reporting `modified == false`.
pub fn weave(module: &mut Module, settings: &WeaverSettings) -> WeaveResult<WeaveOutcome> {
    let mut weaver = Weaver::new(module.clone(), settings);
    if let Err(err) = weaver.run() {
        tracing::error!(error = %err, "weaving failed; module left untouched");
        return Err(err);
    }
    let (woven, outcome) = weaver.finish();
    if outcome.modified {
        *module = woven;
    }
    Ok(outcome)
}

// ══════════════════════════════════════════════════════════════════════════════
// Weaver
// ══════════════════════════════════════════════════════════════════════════════

/// State of one pass over one module.
pub struct Weaver<'s> {
    pub(crate) module: Module,
    pub(crate) settings: &'s WeaverSettings,
    registry: Rc<TypeDescriptorRegistry>,
    pub(crate) diagnostics: Diagnostics,
    /// Types whose layout is being computed, outermost first.
    pub(crate) in_progress: Vec<TypeId>,
    pub(crate) layouts: BTreeMap<TypeId, TypeLayout>,
    pub(crate) modified: bool,
}

impl<'s> Weaver<'s> {
    pub fn new(module: Module, settings: &'s WeaverSettings) -> Self {
        Self {
            module,
            settings,
            registry: Rc::new(TypeDescriptorRegistry::new()),
            diagnostics: Diagnostics::new(),
            in_progress: Vec::new(),
            layouts: BTreeMap::new(),
            modified: false,
        }
    }

    /// Run every stage in order.
    pub fn run(&mut self) -> WeaveResult<()> {
        let name = format!("module {}", self.module.name);
        self.scoped(name, |w| {
            w.mark_exclusions();

            let composites: Vec<TypeId> = w
                .module
                .type_ids()
                .filter(|id| w.module.get(*id).is_some_and(|t| t.is_composite()))
                .collect();
            for id in composites {
                if w.module.get(id).is_some_and(|t| t.stamp.is_none()) {
                    w.layout_type(id)?;
                }
            }

            let behaviours = w.behaviours_bases_first();
            for &id in &behaviours {
                if w.module.get(id).is_some_and(|t| t.stamp.is_none()) {
                    w.layout_type(id)?;
                }
            }
            w.reject_misplaced_rpcs()?;
            for &id in &behaviours {
                w.weave_rpcs(id)?;
            }
            Ok(())
        })
    }

    /// Hand back the woven module and the outcome.
    pub fn finish(self) -> (Module, WeaveOutcome) {
        let layouts = self
            .layouts
            .into_values()
            .map(|l| (l.name.clone(), l))
            .collect();
        (
            self.module,
            WeaveOutcome {
                modified: self.modified,
                diagnostics: self.diagnostics.into_entries(),
                layouts,
            },
        )
    }

    /// Run `f` inside a named diagnostic scope.
    pub(crate) fn scoped<T>(
        &mut self,
        name: impl Into<String>,
        f: impl FnOnce(&mut Self) -> WeaveResult<T>,
    ) -> WeaveResult<T> {
        self.diagnostics.push_scope(name);
        let result = f(self);
        self.diagnostics.pop_scope();
        result
    }

    /// Descriptor of `ty`, errors naming `subject`.
    pub(crate) fn descriptor(
        &mut self,
        ty: &TypeRef,
        subject: &Subject,
    ) -> WeaveResult<Rc<TypeDescriptor>> {
        let registry = Rc::clone(&self.registry);
        registry.descriptor(self, ty, subject)
    }

    pub(crate) fn type_def(&self, id: TypeId) -> WeaveResult<&TypeDef> {
        self.module.get(id).ok_or_else(|| {
            WeaveError::configuration(
                ErrorCode::UNSUPPORTED_TYPE,
                Subject::module(&self.module.name),
                format!("type {id} is not defined"),
            )
        })
    }

    // ── Stages ───────────────────────────────────────────────────────────

    /// Stamp skipped and open generic networked types as excluded.
    fn mark_exclusions(&mut self) {
        for id in self.module.type_ids().collect::<Vec<_>>() {
            let Some(def) = self.module.get(id) else {
                continue;
            };
            let networked = def.is_composite() || def.is_behaviour();
            let skipped = def.has_attribute(|a| matches!(a, Attribute::SkipWeaving));
            if def.stamp.is_some() || !networked || !(skipped || def.is_generic_definition()) {
                continue;
            }
            let name = def.name.clone();
            let reason = if skipped {
                "marked SkipWeaving"
            } else {
                "open generic definition"
            };
            if let Some(def) = self.module.get_mut(id) {
                def.stamp = Some(Stamp::Excluded);
            }
            self.modified = true;
            self.diagnostics
                .debug(Some(Subject::ty(name)), format!("excluded: {reason}"));
        }
    }

    /// Behaviours ordered so every base precedes its derived types.
    fn behaviours_bases_first(&self) -> Vec<TypeId> {
        let mut ordered: Vec<TypeId> = self
            .module
            .type_ids()
            .filter(|id| {
                self.module
                    .get(*id)
                    .is_some_and(|def| def.is_behaviour() && def.stamp != Some(Stamp::Excluded))
            })
            .collect();
        ordered.sort_by_key(|id| (self.module.ancestors(*id).len(), *id));
        ordered
    }

    // ── Element codecs ───────────────────────────────────────────────────

    fn codec_name(&self, element: &TypeRef, config: &MemberConfig) -> String {
        let mut name = format!("@Codec<{}>", self.module.display_type(element));
        if let Some(accuracy) = config.accuracy {
            name.push_str(&format!("@{accuracy}"));
        }
        name
    }

    fn synthesize_codec(&mut self, element: &TypeRef, config: &MemberConfig) -> WeaveResult<TypeId> {
        let name = self.codec_name(element, config);
        if let Some(existing) = self.module.find(&name) {
            return Ok(existing);
        }
        let subject = Subject::ty(&name);
        let descriptor = self.descriptor(element, &subject)?;
        let ctx = CodeGenContext::new(Expr::local("ptr"), subject).with_config(config.clone());
        let read = descriptor.emit_read(self, &ctx)?;
        let write = descriptor.emit_write(self, &ctx, Expr::local("value"))?;

        let mut codec = TypeDef::new(name.clone(), TypeKind::Class)
            .with_method(
                MethodDef::new(CODEC_READ)
                    .static_method()
                    .param("ptr", TypeRef::byte_ptr())
                    .returns(element.clone())
                    .with_body(vec![Stmt::ret(read)]),
            )
            .with_method(
                MethodDef::new(CODEC_WRITE)
                    .static_method()
                    .param("ptr", TypeRef::byte_ptr())
                    .param("value", element.clone())
                    .with_body(write),
            );
        codec.synthesized = true;
        let id = self.module.add_type(codec);
        self.modified = true;
        self.diagnostics
            .debug(Some(Subject::ty(name)), "synthesized element codec");
        Ok(id)
    }
}

impl CodegenHost for Weaver<'_> {
    fn module(&self) -> &Module {
        &self.module
    }

    fn composite_words(&mut self, ty: TypeId) -> WeaveResult<u32> {
        self.layout_type(ty)
    }

    fn element_codec(&mut self, element: &TypeRef, config: &MemberConfig) -> WeaveResult<TypeId> {
        self.synthesize_codec(element, config)
    }

    fn default_capacity(&self, kind: ContainerKind) -> u32 {
        self.settings.default_capacity(kind)
    }
}
