//! Ariadne-based rendering for derivation diagnostics.
//!
//! Terse messages, one labeled primary span, an optional secondary span on
//! the record declaration, and the fix-it text as help.

use std::ops::Range;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};

use crate::error::{DeriveDiagnostic, DiagnosticKind, DisallowedReason, Severity};
use crate::fields::ExclusionReason;

// ── Options ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiagnosticOptions {
    pub color: bool,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        DiagnosticOptions { color: true }
    }
}

impl DiagnosticOptions {
    /// No ANSI escapes. Deterministic output for tests and logs.
    pub fn colorless() -> Self {
        DiagnosticOptions { color: false }
    }
}

// ── Codes ──────────────────────────────────────────────────────────────

fn diagnostic_code(kind: &DiagnosticKind) -> &'static str {
    match kind {
        DiagnosticKind::ImplicitExclusion { .. } => "D0001",
        DiagnosticKind::UnresolvedTangent { .. } => "D0002",
        DiagnosticKind::DisallowedContext { .. } => "D0003",
        DiagnosticKind::BrokenRequirement { .. } => "D0004",
    }
}

fn text_range_to_range(range: rowan::TextRange) -> Range<usize> {
    let start: usize = range.start().into();
    let end: usize = range.end().into();
    start..end
}

fn primary_label(kind: &DiagnosticKind) -> String {
    match kind {
        DiagnosticKind::ImplicitExclusion { reason, ty, .. } => match reason {
            ExclusionReason::NotConforming => format!("`{}` is not differentiable", ty),
            ExclusionReason::ImmutableWithInitializer => "`let` with an initial value".to_string(),
            ExclusionReason::Explicit => "excluded here".to_string(),
        },
        DiagnosticKind::UnresolvedTangent { ty, .. } => format!("no tangent vector for `{}`", ty),
        DiagnosticKind::DisallowedContext { reason, .. } => match reason {
            DisallowedReason::CrossFileExtension => "conformance declared in another file".to_string(),
            DisallowedReason::InitializerInNonFinalClassExtension { .. } => {
                "extension of a non-final class".to_string()
            }
        },
        DiagnosticKind::BrokenRequirement { requirement, .. } => format!("`{}` required here", requirement),
    }
}

fn help_text(diag: &DeriveDiagnostic) -> Option<String> {
    let fix_it = diag.fix_it.as_ref().map(|fix| format!("insert `{}`", fix.replacement.trim_end()));
    match &diag.kind {
        DiagnosticKind::ImplicitExclusion {
            suggest_additive: true,
            ..
        } => Some(match fix_it {
            Some(fix) => format!("{}, or conform to `AdditiveArithmetic` to keep every property", fix),
            None => "conform to `AdditiveArithmetic` to keep every property".to_string(),
        }),
        DiagnosticKind::DisallowedContext {
            reason: DisallowedReason::CrossFileExtension,
            ..
        } => Some("move the conformance into the file declaring the type".to_string()),
        _ => fix_it,
    }
}

// ── Rendering ──────────────────────────────────────────────────────────

/// Render a diagnostic against `source`.
pub fn render_diagnostic(
    diag: &DeriveDiagnostic,
    source: &str,
    _filename: &str,
    options: &DiagnosticOptions,
) -> String {
    let config = Config::default().with_color(options.color);
    let source_len = source.len();

    let clamp = |r: Range<usize>| -> Range<usize> {
        let s = r.start.min(source_len);
        let e = r.end.min(source_len).max(s);
        if s == e {
            s..e.saturating_add(1).min(source_len)
        } else {
            s..e
        }
    };

    let kind = match diag.severity {
        Severity::Error => ReportKind::Error,
        Severity::Warning => ReportKind::Warning,
    };
    let color = match diag.severity {
        Severity::Error => Color::Red,
        Severity::Warning => Color::Yellow,
    };
    let span = clamp(text_range_to_range(diag.span));
    let message = diag.to_string();

    let mut builder = Report::build(kind, span.clone())
        .with_code(diagnostic_code(&diag.kind))
        .with_message(&message)
        .with_config(config)
        .with_label(
            Label::new(span)
                .with_message(primary_label(&diag.kind))
                .with_color(color),
        );
    if let Some(related) = diag.related {
        builder.add_label(
            Label::new(clamp(text_range_to_range(related)))
                .with_message("type declared here")
                .with_color(Color::Blue),
        );
    }
    if let Some(help) = help_text(diag) {
        builder = builder.with_help(help);
    }
    let report = builder.finish();

    let mut buf = Vec::new();
    match report.write(Source::from(source), &mut buf) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(err) => {
            log::warn!("failed to render diagnostic: {}", err);
            message
        }
    }
}
