//! Structural conformance synthesis for the `Differentiable` family.
//!
//! Given a record and a declared capability, this crate decides whether the
//! record qualifies for a derived implementation and, if so, builds the
//! missing members by delegating to each participating field: the
//! `TangentVector` mirror type, `move(along:)`, and
//! `differentiableVectorView`.
//!
//! # Architecture
//!
//! - [`host`]: The conformance oracle the engine consults (Host, Conformance)
//! - [`table`]: Reference host backed by a structural conformance table
//! - [`unify`]: Pattern matching of conformance definitions via union-find
//! - [`registry`]: Process-wide capability rules (requirements, eligibility, synthesis)
//! - [`dispatch`]: Requirement-to-capability resolution and per-field call dispatch
//! - [`fields`]: Participating field selection and exclusion diagnostics
//! - [`propagate`]: Secondary capability propagation onto mirror types
//! - [`session`]: The derivation session and `try_derive` entry point
//! - [`mirror`]: Mirror type synthesis with forward handles for cycles
//! - [`body`]: Delegating member bodies
//! - [`state`]: Eligibility state machine and the mirror cache
//! - [`error`]: Derivation errors and advisory diagnostics
//! - [`diagnostics`]: Ariadne rendering of diagnostics
//! - [`options`], [`trace`]: Session knobs and the opt-in synthesis trace

pub mod body;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod fields;
pub mod host;
pub mod mirror;
pub mod options;
pub mod propagate;
pub mod registry;
pub mod session;
pub mod state;
pub mod table;
pub mod trace;
pub mod unify;

use tangent_ir::capability::{KnownCapability, Requirement, RequirementKind};
use tangent_ir::decl::{ConformanceSite, Decls, Record, RecordId};

pub use error::{DeriveDiagnostic, DeriveError};
pub use host::Host;
pub use options::DeriveOptions;
pub use session::{DeriveSession, SynthesizedMember};
pub use table::ConformanceTable;

/// The outcome of deriving every record in a declaration set.
#[derive(Debug, Default)]
pub struct DeriveReport {
    /// Members installed, with the record that received them.
    pub members: Vec<(RecordId, SynthesizedMember)>,
    pub errors: Vec<DeriveError>,
    pub diagnostics: Vec<DeriveDiagnostic>,
}

impl DeriveReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.diagnostics.iter().all(|d| !d.is_error())
    }
}

fn is_missing(record: &Record, decls: &Decls, requirement: &Requirement) -> bool {
    match requirement.kind {
        RequirementKind::AssociatedType => record.member_types(&requirement.name.base, decls).is_empty(),
        RequirementKind::Method => record
            .method(&requirement.name.base)
            .map_or(true, |m| m.name != requirement.name),
        RequirementKind::Property => record.property(&requirement.name.base).is_none(),
        RequirementKind::Operator | RequirementKind::Initializer => false,
    }
}

/// Derive and install the missing `Differentiable` and
/// `EuclideanDifferentiable` members of every user record declaring them.
///
/// This is the main entry point for a host that wants whole-module
/// derivation rather than per-requirement calls to
/// [`DeriveSession::try_derive`].
pub fn derive_all(host: &dyn Host, decls: &mut Decls, options: DeriveOptions) -> DeriveReport {
    let targets: Vec<RecordId> = decls
        .iter()
        .filter(|r| !r.implicit && !r.retracted)
        .filter(|r| {
            r.declares_conformance(KnownCapability::Differentiable)
                || r.declares_conformance(KnownCapability::EuclideanDifferentiable)
        })
        .map(|r| r.id)
        .collect();

    let mut report = DeriveReport::default();
    let mut session = DeriveSession::with_options(host, decls, options);
    'records: for record in targets {
        let decl = session.decls().get(record);
        let mut capabilities = vec![KnownCapability::Differentiable];
        if decl.declares_conformance(KnownCapability::EuclideanDifferentiable) {
            capabilities.push(KnownCapability::EuclideanDifferentiable);
        }
        for capability in capabilities {
            let decl = session.decls().get(record);
            let site = decl
                .conformance(capability)
                .or_else(|| decl.conformance(KnownCapability::EuclideanDifferentiable))
                .map(|c| c.site.clone())
                .unwrap_or(ConformanceSite::Primary);
            for requirement in registry::requirements(capability) {
                let decl = session.decls().get(record);
                if !is_missing(decl, session.decls(), requirement) {
                    continue;
                }
                match session.try_derive(record, &site, capability, requirement) {
                    Ok(member) => {
                        session.install(record, member.clone());
                        report.members.push((record, member));
                    }
                    Err(err) => {
                        log::debug!("{}", err);
                        report.errors.push(err);
                        continue 'records;
                    }
                }
            }
        }
    }
    report.diagnostics = session.take_diagnostics();
    report
}
