//! The capability rule table.
//!
//! One rule per known capability: its requirements, the capabilities it
//! structurally depends on, an eligibility predicate, and (for the two
//! capabilities derived here) a synthesis procedure. The table is built once
//! on first use and never written afterwards.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

use tangent_ir::capability::{
    KnownCapability, Requirement, RequirementKind, ALL_KEY_PATHS, TANGENT_VECTOR, VECTOR_SPACE_SCALAR,
};
use tangent_ir::decl::{MemberType, Record, RecordId};
use tangent_ir::ty::Ty;

use crate::error::{DeriveDiagnostic, DeriveError, DiagnosticKind};
use crate::fields::{all_fields_conform, select_fields};
use crate::propagate::shared_scalar;
use crate::session::{DeriveSession, SynthesizedMember};

/// Decides whether a record qualifies for a capability. Pure.
pub type Eligibility = fn(&DeriveSession<'_>, RecordId) -> bool;

/// Produces the member satisfying one requirement.
pub type Synthesizer = fn(&mut DeriveSession<'_>, RecordId, &Requirement) -> Result<SynthesizedMember, DeriveError>;

pub struct CapabilityRule {
    pub capability: KnownCapability,
    pub requirements: Vec<Requirement>,
    pub prerequisites: &'static [KnownCapability],
    pub eligible: Eligibility,
    /// `None` for capabilities whose members are derived by a sibling rule.
    pub synthesize: Option<Synthesizer>,
}

impl std::fmt::Debug for CapabilityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRule")
            .field("capability", &self.capability)
            .field("requirements", &self.requirements)
            .field("prerequisites", &self.prerequisites)
            .field("synthesizes", &self.synthesize.is_some())
            .finish()
    }
}

const UNARY_ELEMENTARY: [&str; 21] = [
    "sqrt", "cos", "sin", "tan", "cosh", "sinh", "tanh", "acos", "asin", "atan", "acosh", "asinh", "atanh", "exp",
    "exp2", "exp10", "expm1", "log", "log2", "log10", "log1p",
];

static RULES: Lazy<FxHashMap<KnownCapability, CapabilityRule>> = Lazy::new(build_rules);

fn build_rules() -> FxHashMap<KnownCapability, CapabilityRule> {
    use KnownCapability::*;

    let mut elementary: Vec<Requirement> = UNARY_ELEMENTARY
        .iter()
        .map(|name| Requirement::static_method(name, &[""]))
        .collect();
    elementary.push(Requirement::static_method("root", &["", ""]).with_param_names(&["x", "n"]));
    elementary.push(Requirement::static_method("pow", &["", ""]).with_param_names(&["x", "y"]));
    elementary.push(Requirement::static_method("pow", &["", ""]).with_param_names(&["x", "n"]));

    let rules = [
        CapabilityRule {
            capability: Differentiable,
            requirements: vec![
                Requirement::associated_type(TANGENT_VECTOR),
                Requirement::method("move", &["along"]),
            ],
            prerequisites: &[AdditiveArithmetic],
            eligible: differentiable_eligible,
            synthesize: Some(synthesize_differentiable),
        },
        CapabilityRule {
            capability: EuclideanDifferentiable,
            requirements: vec![Requirement::property("differentiableVectorView")],
            prerequisites: &[Differentiable],
            eligible: euclidean_eligible,
            synthesize: Some(synthesize_euclidean),
        },
        CapabilityRule {
            capability: AdditiveArithmetic,
            requirements: vec![
                Requirement::static_property("zero"),
                Requirement::operator("+", 2),
                Requirement::operator("-", 2),
            ],
            prerequisites: &[],
            eligible: |s, r| struct_with_conforming_fields(s, r, AdditiveArithmetic),
            synthesize: None,
        },
        CapabilityRule {
            capability: VectorProtocol,
            requirements: vec![
                Requirement::associated_type(VECTOR_SPACE_SCALAR),
                Requirement::method("scaled", &["by"]),
                Requirement::method("adding", &[""]),
                Requirement::method("subtracting", &[""]),
            ],
            prerequisites: &[AdditiveArithmetic],
            eligible: vector_protocol_eligible,
            synthesize: None,
        },
        CapabilityRule {
            capability: PointwiseMultiplicative,
            requirements: vec![
                Requirement::static_property("one"),
                Requirement::property("reciprocal"),
                Requirement::operator(".*", 2),
            ],
            prerequisites: &[AdditiveArithmetic],
            eligible: |s, r| struct_with_conforming_fields(s, r, PointwiseMultiplicative),
            synthesize: None,
        },
        CapabilityRule {
            capability: ElementaryFunctions,
            requirements: elementary,
            prerequisites: &[],
            eligible: |s, r| struct_with_conforming_fields(s, r, ElementaryFunctions),
            synthesize: None,
        },
        CapabilityRule {
            capability: KeyPathIterable,
            requirements: vec![
                Requirement::property("allKeyPaths"),
                Requirement::associated_type(ALL_KEY_PATHS),
            ],
            prerequisites: &[],
            eligible: |_, _| true,
            synthesize: None,
        },
    ];
    rules.into_iter().map(|rule| (rule.capability, rule)).collect()
}

pub fn rule(capability: KnownCapability) -> Option<&'static CapabilityRule> {
    RULES.get(&capability)
}

/// Every rule, in `KnownCapability::ALL` order.
pub fn rules() -> impl Iterator<Item = &'static CapabilityRule> {
    KnownCapability::ALL.into_iter().filter_map(rule)
}

pub fn requirements(capability: KnownCapability) -> &'static [Requirement] {
    rule(capability).map(|r| r.requirements.as_slice()).unwrap_or(&[])
}

// ── Eligibility ────────────────────────────────────────────────────────

/// Whether a `TangentVector` member found on `record` leaves derivation sound.
fn is_valid_tangent_candidate(session: &DeriveSession<'_>, record: &Record, candidate: &MemberType) -> bool {
    let decls = session.decls();
    let target = match candidate {
        MemberType::Nested(id) => Some(*id),
        MemberType::Alias { target, .. } => decls.record_of(target),
    };
    let Some(target) = target else {
        return false;
    };
    let target_decl = decls.get(target);
    if !target_decl.kind.is_value() {
        return false;
    }
    if target_decl.implicit {
        return true;
    }
    if record.implicit && record.parent == Some(target) {
        let parent_ty = target_decl.declared_ty();
        return session.conforms(record.id, &parent_ty, KnownCapability::Differentiable);
    }
    target == record.id && session.conforms(record.id, &record.declared_ty(), KnownCapability::AdditiveArithmetic)
}

/// A record may derive `Differentiable` unless it customizes `TangentVector`
/// to something other than a synthesized mirror or itself.
fn differentiable_eligible(session: &DeriveSession<'_>, record: RecordId) -> bool {
    let decls = session.decls();
    let decl = decls.get(record);
    let candidates = decl.member_types(TANGENT_VECTOR, decls);
    let mut valid = 0;
    for candidate in &candidates {
        if !is_valid_tangent_candidate(session, decl, candidate) {
            log::debug!("`{}` declares an unusable {} member", decl.name, TANGENT_VECTOR);
            return false;
        }
        valid += 1;
    }
    valid <= 1
}

fn euclidean_eligible(session: &DeriveSession<'_>, record: RecordId) -> bool {
    if !differentiable_eligible(session, record) {
        return false;
    }
    let decls = session.decls();
    let selection = select_fields(session.host(), decls, record);
    let decl = decls.get(record);
    let all_euclidean = selection
        .fields(decl)
        .all(|f| session.conforms(record, &f.ty, KnownCapability::EuclideanDifferentiable));
    all_euclidean
}

fn struct_with_conforming_fields(session: &DeriveSession<'_>, record: RecordId, capability: KnownCapability) -> bool {
    let decls = session.decls();
    decls.get(record).kind.is_value() && all_fields_conform(session.host(), decls, record, capability)
}

fn vector_protocol_eligible(session: &DeriveSession<'_>, record: RecordId) -> bool {
    if !struct_with_conforming_fields(session, record, KnownCapability::VectorProtocol) {
        return false;
    }
    let decls = session.decls();
    let field_types: Vec<Ty> = decls.get(record).fields.iter().map(|f| f.ty.clone()).collect();
    shared_scalar(session.host(), decls, record, &field_types).is_some()
}

// ── Synthesis ──────────────────────────────────────────────────────────

fn broken_requirement(
    session: &mut DeriveSession<'_>,
    record: RecordId,
    capability: KnownCapability,
    requirement: &Requirement,
) -> DeriveError {
    let decl = session.decls().get(record);
    let (name, span) = (decl.name.clone(), decl.span);
    session.report(DeriveDiagnostic::error(
        DiagnosticKind::BrokenRequirement {
            capability,
            requirement: requirement.to_string(),
        },
        span,
    ));
    DeriveError::BrokenRequirement {
        record: name,
        capability,
        requirement: requirement.to_string(),
    }
}

fn synthesize_differentiable(
    session: &mut DeriveSession<'_>,
    record: RecordId,
    requirement: &Requirement,
) -> Result<SynthesizedMember, DeriveError> {
    match (requirement.kind, requirement.name.base.as_str()) {
        (RequirementKind::AssociatedType, TANGENT_VECTOR) => {
            let mirror = session.synthesize_mirror(record)?;
            Ok(SynthesizedMember::TypeWitness {
                name: TANGENT_VECTOR.to_string(),
                ty: mirror.ty,
            })
        }
        (RequirementKind::Method, "move") => session.synthesize_move(record).map(SynthesizedMember::Method),
        _ => Err(broken_requirement(session, record, KnownCapability::Differentiable, requirement)),
    }
}

fn synthesize_euclidean(
    session: &mut DeriveSession<'_>,
    record: RecordId,
    requirement: &Requirement,
) -> Result<SynthesizedMember, DeriveError> {
    match (requirement.kind, requirement.name.base.as_str()) {
        (RequirementKind::Property, "differentiableVectorView") => {
            session.synthesize_vector_view(record).map(SynthesizedMember::Property)
        }
        _ => Err(broken_requirement(
            session,
            record,
            KnownCapability::EuclideanDifferentiable,
            requirement,
        )),
    }
}
