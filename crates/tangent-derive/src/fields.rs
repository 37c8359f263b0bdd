//! Participating field selection.
//!
//! A field participates in derivation unless it is explicitly excluded, is
//! immutable with an initial value, or its type does not conform to
//! `Differentiable`. Every excluded field carries exactly one reason, checked
//! in that order.

use rowan::TextRange;
use serde::Serialize;

use tangent_ir::capability::KnownCapability;
use tangent_ir::decl::{Decls, Field, Record, RecordId};

use crate::error::{DeriveDiagnostic, DiagnosticKind};
use crate::host::Host;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Marked `@noDerivative`.
    Explicit,
    /// `let` with an initial value.
    ImmutableWithInitializer,
    /// The field's type does not conform to `Differentiable`.
    NotConforming,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExcludedField {
    pub index: usize,
    pub reason: ExclusionReason,
}

/// Indices into `Record::fields`, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldSelection {
    pub participating: Vec<usize>,
    pub excluded: Vec<ExcludedField>,
}

impl FieldSelection {
    pub fn fields<'a>(&'a self, record: &'a Record) -> impl Iterator<Item = &'a Field> + 'a {
        self.participating.iter().map(move |&i| &record.fields[i])
    }

    pub fn reason(&self, index: usize) -> Option<ExclusionReason> {
        self.excluded.iter().find(|e| e.index == index).map(|e| e.reason)
    }

    /// No field was left out.
    pub fn is_complete(&self) -> bool {
        self.excluded.is_empty()
    }
}

/// Why `field` of `context` is left out of derivation, if it is.
pub fn exclusion_reason(host: &dyn Host, decls: &Decls, context: RecordId, field: &Field) -> Option<ExclusionReason> {
    if field.excluded {
        Some(ExclusionReason::Explicit)
    } else if !field.mutable && field.has_initializer {
        Some(ExclusionReason::ImmutableWithInitializer)
    } else if host
        .conforms_to(decls, context, &field.ty, KnownCapability::Differentiable)
        .is_none()
    {
        Some(ExclusionReason::NotConforming)
    } else {
        None
    }
}

pub fn select_fields(host: &dyn Host, decls: &Decls, record: RecordId) -> FieldSelection {
    let mut selection = FieldSelection::default();
    for (index, field) in decls.get(record).fields.iter().enumerate() {
        match exclusion_reason(host, decls, record, field) {
            Some(reason) => selection.excluded.push(ExcludedField { index, reason }),
            None => selection.participating.push(index),
        }
    }
    selection
}

/// Whether every stored field's type conforms to `capability`.
pub fn all_fields_conform(host: &dyn Host, decls: &Decls, record: RecordId, capability: KnownCapability) -> bool {
    decls
        .get(record)
        .fields
        .iter()
        .all(|f| host.conforms_to(decls, record, &f.ty, capability).is_some())
}

/// Warn about fields excluded without an explicit `@noDerivative`, with a
/// fix-it inserting the attribute.
pub fn diagnose_implicit_exclusions(
    host: &dyn Host,
    decls: &Decls,
    record: RecordId,
    selection: &FieldSelection,
) -> Vec<DeriveDiagnostic> {
    let decl = decls.get(record);
    let suggest_additive = decl.kind.is_value()
        && all_fields_conform(host, decls, record, KnownCapability::AdditiveArithmetic);
    selection
        .excluded
        .iter()
        .filter(|e| e.reason != ExclusionReason::Explicit)
        .map(|e| {
            let field = &decl.fields[e.index];
            let insert_at = TextRange::empty(field.span.start());
            DeriveDiagnostic::warning(
                DiagnosticKind::ImplicitExclusion {
                    record: decl.name.clone(),
                    field: field.name.clone(),
                    ty: field.ty.clone(),
                    reason: e.reason,
                    suggest_additive,
                },
                field.span,
            )
            .with_fix_it(insert_at, "@noDerivative ")
        })
        .collect()
}
