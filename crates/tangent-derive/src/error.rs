//! Derivation errors and advisory diagnostics.
//!
//! [`DeriveError`] is the outcome returned across the public contract when a
//! derivation cannot proceed. [`DeriveDiagnostic`]s are collected in the
//! session as a side channel, like type errors and warnings in an inference
//! context, and rendered by [`crate::diagnostics`].

use std::fmt;

use rowan::TextRange;

use tangent_ir::capability::KnownCapability;
use tangent_ir::ty::Ty;

use crate::fields::ExclusionReason;

/// Why the declaration context forbids synthesis.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DisallowedReason {
    /// The conformance is declared in an extension in another file.
    CrossFileExtension,
    /// A non-final class cannot receive a synthesized initializer from an extension.
    InitializerInNonFinalClassExtension { initializer: String },
}

/// A derivation that could not produce a member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeriveError {
    /// The record does not qualify for the capability.
    Ineligible {
        record: String,
        capability: KnownCapability,
    },
    /// A participating field's tangent type could not be determined.
    PartialFailure {
        record: String,
        capability: KnownCapability,
        field: String,
        reason: String,
    },
    /// The conformance context forbids synthesis.
    DisallowedContext {
        record: String,
        capability: KnownCapability,
        reason: DisallowedReason,
    },
    /// No known capability has a requirement with this signature.
    NoMatchingRequirement { record: String, requirement: String },
    /// The requirement belongs to a capability whose members are derived elsewhere.
    NoSynthesizer {
        record: String,
        capability: KnownCapability,
        requirement: String,
    },
    /// The capability's synthesizer does not handle this requirement.
    BrokenRequirement {
        record: String,
        capability: KnownCapability,
        requirement: String,
    },
    /// The mirror type has no field matching a participating field.
    MirrorFieldMismatch { record: String, field: String },
}

impl fmt::Display for DeriveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeriveError::Ineligible { record, capability } => {
                write!(f, "`{}` cannot derive a conformance to `{}`", record, capability)
            }
            DeriveError::PartialFailure {
                record,
                capability,
                field,
                reason,
            } => write!(
                f,
                "cannot derive `{}` for `{}`: field `{}` {}",
                capability, record, field, reason
            ),
            DeriveError::DisallowedContext {
                record,
                capability,
                reason,
            } => match reason {
                DisallowedReason::CrossFileExtension => write!(
                    f,
                    "implementation of `{}` for `{}` cannot be synthesized in an extension in a different file",
                    capability, record
                ),
                DisallowedReason::InitializerInNonFinalClassExtension { initializer } => write!(
                    f,
                    "`{}` requirement `{}` cannot be synthesized in an extension of non-final class `{}`",
                    capability, initializer, record
                ),
            },
            DeriveError::NoMatchingRequirement { record, requirement } => {
                write!(f, "`{}` on `{}` is not a derivable requirement", requirement, record)
            }
            DeriveError::NoSynthesizer {
                record,
                capability,
                requirement,
            } => write!(
                f,
                "`{}` of `{}` is not synthesized for `{}` by this engine",
                requirement, capability, record
            ),
            DeriveError::BrokenRequirement {
                record,
                capability,
                requirement,
            } => write!(
                f,
                "broken `{}` requirement `{}` while deriving for `{}`",
                capability, requirement, record
            ),
            DeriveError::MirrorFieldMismatch { record, field } => {
                write!(f, "tangent vector of `{}` has no field `{}`", record, field)
            }
        }
    }
}

impl std::error::Error for DeriveError {}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// What a diagnostic reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A field silently left out of derivation.
    ImplicitExclusion {
        record: String,
        field: String,
        ty: Ty,
        reason: ExclusionReason,
        /// The record could derive `AdditiveArithmetic` instead.
        suggest_additive: bool,
    },
    /// A participating field's tangent type could not be determined.
    UnresolvedTangent {
        record: String,
        field: String,
        ty: Ty,
    },
    /// Synthesis attempted from a forbidden declaration context.
    DisallowedContext {
        record: String,
        capability: KnownCapability,
        reason: DisallowedReason,
    },
    /// A capability's synthesizer was asked for a requirement it does not handle.
    BrokenRequirement {
        capability: KnownCapability,
        requirement: String,
    },
}

/// A source edit attached to a diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixIt {
    /// Insertion point (an empty range) or replaced range.
    pub range: TextRange,
    pub replacement: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeriveDiagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub span: TextRange,
    /// Secondary location, e.g. where the record itself is declared.
    pub related: Option<TextRange>,
    pub fix_it: Option<FixIt>,
}

impl DeriveDiagnostic {
    pub fn error(kind: DiagnosticKind, span: TextRange) -> Self {
        DeriveDiagnostic {
            severity: Severity::Error,
            kind,
            span,
            related: None,
            fix_it: None,
        }
    }

    pub fn warning(kind: DiagnosticKind, span: TextRange) -> Self {
        DeriveDiagnostic {
            severity: Severity::Warning,
            kind,
            span,
            related: None,
            fix_it: None,
        }
    }

    pub fn with_related(mut self, range: TextRange) -> Self {
        self.related = Some(range);
        self
    }

    pub fn with_fix_it(mut self, range: TextRange, replacement: impl Into<String>) -> Self {
        self.fix_it = Some(FixIt {
            range,
            replacement: replacement.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for DeriveDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::ImplicitExclusion {
                record,
                field,
                ty,
                reason,
                ..
            } => match reason {
                ExclusionReason::NotConforming => write!(
                    f,
                    "stored property `{}` has no derivative because `{}` does not conform to `Differentiable`; add an explicit `@noDerivative` attribute",
                    field, ty
                ),
                ExclusionReason::ImmutableWithInitializer => write!(
                    f,
                    "synthesis of the `Differentiable` conformance for `{}` skips `let` property `{}` with an initial value; add an explicit `@noDerivative` attribute",
                    record, field
                ),
                ExclusionReason::Explicit => write!(f, "stored property `{}` is marked `@noDerivative`", field),
            },
            DiagnosticKind::UnresolvedTangent { record, field, ty } => write!(
                f,
                "cannot derive `Differentiable` for `{}`: tangent vector of field `{}` of type `{}` cannot be determined",
                record, field, ty
            ),
            DiagnosticKind::DisallowedContext {
                record,
                capability,
                reason,
            } => write!(
                f,
                "{}",
                DeriveError::DisallowedContext {
                    record: record.clone(),
                    capability: *capability,
                    reason: reason.clone(),
                }
            ),
            DiagnosticKind::BrokenRequirement {
                capability,
                requirement,
            } => write!(f, "broken `{}` requirement `{}`", capability, requirement),
        }
    }
}
