use crate::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error category, determined by error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Malformed annotations, unsupported type shapes, bad wrap pairs.
    Configuration,
    /// Zero or inconsistent word counts, cyclic composites.
    Layout,
    /// User code the engine refuses to overwrite or misuse of static context.
    Validation,
}

/// Numeric error code (E100–E399).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ── Configuration errors (E100–E199) ──
    pub const UNSUPPORTED_TYPE: Self = Self(100);
    pub const UNRESOLVED_GENERIC: Self = Self(101);
    pub const WRAP_PAIR_INCOMPLETE: Self = Self(102);
    pub const WRAP_SIGNATURE: Self = Self(103);
    pub const CONTAINER_SETTER: Self = Self(104);
    pub const INVALID_ATTRIBUTE: Self = Self(105);
    pub const RPC_NAMING: Self = Self(106);
    pub const RPC_SIGNATURE: Self = Self(107);
    pub const AMBIGUOUS_HANDLER: Self = Self(108);
    pub const UNKNOWN_ACCURACY: Self = Self(109);
    pub const MISSING_ACCESSOR: Self = Self(110);
    pub const INVALID_INITIALIZER: Self = Self(111);
    pub const UNSUPPORTED_MEMBER: Self = Self(112);

    // ── Layout errors (E200–E299) ──
    pub const ZERO_SIZE: Self = Self(200);
    pub const INCONSISTENT_SIZE: Self = Self(201);
    pub const CYCLIC_COMPOSITE: Self = Self(202);
    pub const SIZE_OVERFLOW: Self = Self(203);

    // ── Validation errors (E300–E399) ──
    pub const NON_TRIVIAL_ACCESSOR: Self = Self(300);
    pub const STATIC_CONTEXT: Self = Self(301);

    /// Get the category for this error code.
    pub fn category(self) -> ErrorCategory {
        match self.0 {
            200..=299 => ErrorCategory::Layout,
            300..=399 => ErrorCategory::Validation,
            _ => ErrorCategory::Configuration,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Layout => write!(f, "layout"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// The declaration an error or log entry is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    Module { name: String },
    Type { name: String },
    Member { ty: String, member: String },
    Method { ty: String, method: String },
    Param { ty: String, method: String, param: String },
}

impl Subject {
    pub fn module(name: impl Into<String>) -> Self {
        Self::Module { name: name.into() }
    }

    pub fn ty(name: impl Into<String>) -> Self {
        Self::Type { name: name.into() }
    }

    pub fn member(ty: impl Into<String>, member: impl Into<String>) -> Self {
        Self::Member {
            ty: ty.into(),
            member: member.into(),
        }
    }

    pub fn method(ty: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Method {
            ty: ty.into(),
            method: method.into(),
        }
    }

    pub fn param(
        ty: impl Into<String>,
        method: impl Into<String>,
        param: impl Into<String>,
    ) -> Self {
        Self::Param {
            ty: ty.into(),
            method: method.into(),
            param: param.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module { name } => write!(f, "module {name}"),
            Self::Type { name } => write!(f, "{name}"),
            Self::Member { ty, member } => write!(f, "{ty}.{member}"),
            Self::Method { ty, method } => write!(f, "{ty}::{method}"),
            Self::Param { ty, method, param } => write!(f, "{ty}::{method}({param})"),
        }
    }
}

/// A structured weaving error.
///
/// Every error names the offending declaration. Any error aborts the whole
/// pass; callers must not persist a partially mutated module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaveError {
    /// Error code (e.g., E103).
    pub code: ErrorCode,
    /// Error category (derived from code).
    pub category: ErrorCategory,
    /// The declaration at fault.
    pub subject: Subject,
    /// Human-readable error message.
    pub message: String,
    /// Source location of the subject, if known.
    pub span: Span,
    /// Optional fix suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// The error that caused this one, e.g. a nested member failing to lay out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<WeaveError>>,
}

impl WeaveError {
    /// Create a new error.
    pub fn new(code: ErrorCode, subject: Subject, message: impl Into<String>) -> Self {
        Self {
            code,
            category: code.category(),
            subject,
            message: message.into(),
            span: Span::synthesized(),
            suggestion: None,
            cause: None,
        }
    }

    /// Shorthand for a configuration error.
    pub fn configuration(code: ErrorCode, subject: Subject, message: impl Into<String>) -> Self {
        debug_assert_eq!(code.category(), ErrorCategory::Configuration);
        Self::new(code, subject, message)
    }

    /// Shorthand for a layout error.
    pub fn layout(code: ErrorCode, subject: Subject, message: impl Into<String>) -> Self {
        debug_assert_eq!(code.category(), ErrorCategory::Layout);
        Self::new(code, subject, message)
    }

    /// Shorthand for a validation error.
    pub fn validation(code: ErrorCode, subject: Subject, message: impl Into<String>) -> Self {
        debug_assert_eq!(code.category(), ErrorCategory::Validation);
        Self::new(code, subject, message)
    }

    /// Attach the source location of the subject.
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Attach a fix suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach the inner cause.
    pub fn caused_by(mut self, cause: WeaveError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Walk to the innermost cause.
    pub fn root_cause(&self) -> &WeaveError {
        let mut current = self;
        while let Some(inner) = &current.cause {
            current = inner;
        }
        current
    }
}

impl fmt::Display for WeaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.code, self.category, self.subject, self.message
        )?;
        if !self.span.is_synthesized() {
            write!(f, " (at {})", self.span)?;
        }
        Ok(())
    }
}

impl std::error::Error for WeaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
