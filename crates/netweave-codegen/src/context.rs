//! The cursor threaded through every read/write generator.
//!
//! A [`CodeGenContext`] answers three questions for a descriptor: where the
//! buffer is, which word within it is current, and how the member being
//! generated is configured. The same descriptor code therefore serves
//! property accessors, container element codecs and RPC argument marshalling;
//! only the context differs.

use std::cell::Cell;
use std::rc::Rc;

use netweave_types::body::{Expr, Stmt};
use netweave_types::{ErrorCode, Subject, WeaveError, WeaveResult};

use crate::descriptor::MemberConfig;

/// Where generated code reads from or writes to.
#[derive(Debug, Clone)]
pub struct CodeGenContext {
    base: Expr,
    offset_words: u32,
    config: MemberConfig,
    runner: Option<Expr>,
    subject: Subject,
    temps: Rc<Cell<u32>>,
}

impl CodeGenContext {
    /// A context at word 0 of `base`, generating code for `subject`.
    pub fn new(base: Expr, subject: Subject) -> Self {
        Self {
            base,
            offset_words: 0,
            config: MemberConfig::default(),
            runner: None,
            subject,
            temps: Rc::new(Cell::new(0)),
        }
    }

    /// The same buffer at an absolute word offset.
    pub fn at(&self, offset_words: u32) -> Self {
        Self {
            offset_words,
            ..self.clone()
        }
    }

    pub fn with_config(mut self, config: MemberConfig) -> Self {
        self.config = config;
        self
    }

    /// Make a runtime context available to wrap conversions.
    pub fn with_runner(mut self, runner: Expr) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Pointer to the current word.
    pub fn address(&self) -> Expr {
        Expr::offset(self.base.clone(), self.offset_words)
    }

    pub fn offset_words(&self) -> u32 {
        self.offset_words
    }

    pub fn config(&self) -> &MemberConfig {
        &self.config
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn runner(&self) -> Option<&Expr> {
        self.runner.as_ref()
    }

    /// The runtime context, or a validation error naming `feature`.
    pub fn require_runner(&self, feature: &str) -> WeaveResult<Expr> {
        self.runner.clone().ok_or_else(|| {
            WeaveError::validation(
                ErrorCode::STATIC_CONTEXT,
                self.subject.clone(),
                format!("{feature} needs a runtime context, which is not available here"),
            )
            .with_suggestion("move the member onto a behaviour, or drop the runner parameter from the conversion")
        })
    }

    /// A local name unique within the body being generated.
    pub fn fresh_local(&self, hint: &str) -> String {
        let n = self.temps.get();
        self.temps.set(n + 1);
        format!("@{hint}{n}")
    }

    /// Ensure `value` is evaluated once: leaves pass through, anything else is
    /// bound to a fresh local in `out`.
    pub fn bind(&self, value: Expr, hint: &str, out: &mut Vec<Stmt>) -> Expr {
        if value.is_pure_leaf() {
            return value;
        }
        let name = self.fresh_local(hint);
        out.push(Stmt::let_(name.clone(), value));
        Expr::local(name)
    }
}
