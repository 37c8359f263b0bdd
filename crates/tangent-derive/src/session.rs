//! The derivation session: the single upward entry point.
//!
//! A session borrows the host oracle and the declaration arena for one
//! type-checking pass. It owns the per-pass state (eligibility, the mirror
//! cache, in-flight forward handles), the collected diagnostics and the
//! optional trace.

use tangent_ir::capability::{KnownCapability, Requirement, RequirementKind, TANGENT_VECTOR};
use tangent_ir::decl::{ConformanceSite, Decls, Member, MemberType, RecordId, RecordKind};
use tangent_ir::synth::{FuncDecl, PropertyDecl, TypeAliasDecl};
use tangent_ir::ty::Ty;

use crate::dispatch;
use crate::error::{DeriveDiagnostic, DeriveError, DiagnosticKind, DisallowedReason};
use crate::host::Host;
use crate::options::DeriveOptions;
use crate::registry;
use crate::state::{DerivationState, MirrorType, SynthesisState};
use crate::trace::{SynthesisTrace, TraceAction};

/// A member produced for one requirement, ready for the host to install.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SynthesizedMember {
    /// An associated type binding, e.g. `TangentVector`.
    TypeWitness { name: String, ty: Ty },
    Method(FuncDecl),
    Property(PropertyDecl),
}

pub struct DeriveSession<'a> {
    host: &'a dyn Host,
    pub(crate) decls: &'a mut Decls,
    options: DeriveOptions,
    pub(crate) state: SynthesisState,
    diagnostics: Vec<DeriveDiagnostic>,
    trace: SynthesisTrace,
}

impl<'a> DeriveSession<'a> {
    pub fn new(host: &'a dyn Host, decls: &'a mut Decls) -> Self {
        Self::with_options(host, decls, DeriveOptions::default())
    }

    pub fn with_options(host: &'a dyn Host, decls: &'a mut Decls, options: DeriveOptions) -> Self {
        DeriveSession {
            host,
            decls,
            options,
            state: SynthesisState::new(),
            diagnostics: Vec::new(),
            trace: SynthesisTrace::default(),
        }
    }

    pub fn host(&self) -> &'a dyn Host {
        self.host
    }

    pub fn decls(&self) -> &Decls {
        self.decls
    }

    pub fn options(&self) -> &DeriveOptions {
        &self.options
    }

    pub fn diagnostics(&self) -> &[DeriveDiagnostic] {
        &self.diagnostics
    }

    /// Drain the diagnostics collected so far.
    pub fn take_diagnostics(&mut self) -> Vec<DeriveDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn trace(&self) -> &SynthesisTrace {
        &self.trace
    }

    pub fn state(&self, record: RecordId, capability: KnownCapability) -> DerivationState {
        self.state.get(record, capability)
    }

    /// The finished mirror for `record`, if one was synthesized this session.
    pub fn mirror(&self, record: RecordId) -> Option<&MirrorType> {
        self.state.mirror(record)
    }

    pub(crate) fn conforms(&self, context: RecordId, ty: &Ty, capability: KnownCapability) -> bool {
        self.host.conforms_to(self.decls, context, ty, capability).is_some()
    }

    pub(crate) fn report(&mut self, diagnostic: DeriveDiagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn note(
        &mut self,
        record: RecordId,
        capability: KnownCapability,
        action: TraceAction,
        detail: impl Into<String>,
    ) {
        if self.options.trace {
            let name = &self.decls.get(record).name;
            self.trace.push(name, capability, action, detail);
        }
    }

    pub(crate) fn transition(&mut self, record: RecordId, capability: KnownCapability, next: DerivationState) -> bool {
        let from = self.state.get(record, capability);
        if !self.state.transition(record, capability, next) {
            return false;
        }
        log::debug!(
            "{} for `{}`: {:?} -> {:?}",
            capability,
            self.decls.get(record).name,
            from,
            next
        );
        self.note(record, capability, TraceAction::Transition, format!("{:?} -> {:?}", from, next));
        true
    }

    /// Whether `record` qualifies for `capability`. The first answer is
    /// recorded in the state machine; later queries agree with it.
    pub fn can_derive(&mut self, record: RecordId, capability: KnownCapability) -> bool {
        match self.state.get(record, capability) {
            DerivationState::Ineligible => false,
            DerivationState::Eligible | DerivationState::Synthesizing | DerivationState::Synthesized => true,
            DerivationState::NotChecked => {
                let eligible = registry::rule(capability).is_some_and(|rule| (rule.eligible)(self, record));
                let next = if eligible {
                    DerivationState::Eligible
                } else {
                    DerivationState::Ineligible
                };
                self.transition(record, capability, next);
                eligible
            }
        }
    }

    pub(crate) fn ineligible(&self, record: RecordId, capability: KnownCapability) -> DeriveError {
        DeriveError::Ineligible {
            record: self.decls.get(record).name.clone(),
            capability,
        }
    }

    /// Reject synthesis the declaration context forbids, before any work starts.
    pub(crate) fn check_context(
        &mut self,
        record: RecordId,
        capability: KnownCapability,
        site: &ConformanceSite,
        requirement: Option<&Requirement>,
    ) -> Result<(), DeriveError> {
        let ConformanceSite::Extension { file, span, .. } = site else {
            return Ok(());
        };
        let decl = self.decls.get(record);
        let reason = if *file != decl.file {
            DisallowedReason::CrossFileExtension
        } else if let Some(init) = requirement.filter(|r| r.kind == RequirementKind::Initializer) {
            if decl.kind != (RecordKind::Class { is_final: false }) {
                return Ok(());
            }
            DisallowedReason::InitializerInNonFinalClassExtension {
                initializer: init.name.to_string(),
            }
        } else {
            return Ok(());
        };

        let name = decl.name.clone();
        let record_span = decl.span;
        log::debug!("`{}` cannot synthesize {} here: {:?}", name, capability, reason);
        if self.state.note_disallowed(record, *span, &reason) {
            self.report(
                DeriveDiagnostic::error(
                    DiagnosticKind::DisallowedContext {
                        record: name.clone(),
                        capability,
                        reason: reason.clone(),
                    },
                    *span,
                )
                .with_related(record_span),
            );
        }
        Err(DeriveError::DisallowedContext {
            record: name,
            capability,
            reason,
        })
    }

    /// Derive the member satisfying `requirement` for `record`'s conformance
    /// to `capability`, declared at `site`.
    pub fn try_derive(
        &mut self,
        record: RecordId,
        site: &ConformanceSite,
        capability: KnownCapability,
        requirement: &Requirement,
    ) -> Result<SynthesizedMember, DeriveError> {
        self.check_context(record, capability, site, Some(requirement))?;

        let record_name = || self.decls.get(record).name.clone();
        let found = dispatch::resolve(requirement)
            .filter(|m| capability.implies(m.capability))
            .ok_or_else(|| DeriveError::NoMatchingRequirement {
                record: record_name(),
                requirement: requirement.to_string(),
            })?;
        let synthesize = registry::rule(found.capability)
            .and_then(|rule| rule.synthesize)
            .ok_or_else(|| DeriveError::NoSynthesizer {
                record: record_name(),
                capability: found.capability,
                requirement: requirement.to_string(),
            })?;

        if !self.can_derive(record, capability) {
            return Err(self.ineligible(record, capability));
        }
        if found.capability != capability && !self.can_derive(record, found.capability) {
            return Err(self.ineligible(record, found.capability));
        }
        log::trace!("deriving {} for `{}`", found.requirement, self.decls.get(record).name);
        synthesize(self, record, &found.requirement)
    }

    /// Install a synthesized member into `record` unless an equivalent member
    /// is already there.
    pub fn install(&mut self, record: RecordId, member: SynthesizedMember) {
        let decl = self.decls.get(record);
        let member = match member {
            SynthesizedMember::TypeWitness { name, ty } => {
                if !decl.member_types(&name, self.decls).is_empty() {
                    return;
                }
                Member::TypeAlias(TypeAliasDecl {
                    name,
                    target: ty,
                    visibility: decl.visibility,
                    implicit: true,
                })
            }
            SynthesizedMember::Method(func) => {
                if decl.method(&func.name.base).is_some_and(|m| m.name == func.name) {
                    return;
                }
                Member::Method(func)
            }
            SynthesizedMember::Property(prop) => {
                if decl.property(&prop.name).is_some() {
                    return;
                }
                Member::Property(prop)
            }
        };
        self.decls.install_member(record, member);
    }

    /// The `TangentVector` the record already declares, written by the user
    /// or installed by an earlier pass. Only meaningful once the record is
    /// known to be eligible.
    pub(crate) fn existing_mirror(&self, record: RecordId) -> Option<MirrorType> {
        let decl = self.decls.get(record);
        let own_ty = decl.declared_ty();
        decl.member_types(TANGENT_VECTOR, self.decls)
            .into_iter()
            .find_map(|candidate| match candidate {
                MemberType::Nested(id) => Some(MirrorType {
                    ty: self.decls.get(id).declared_ty(),
                    record: Some(id),
                    reused_self: false,
                }),
                MemberType::Alias { target, .. } if target == own_ty => Some(MirrorType {
                    ty: target,
                    record: Some(record),
                    reused_self: true,
                }),
                MemberType::Alias { target, .. } => self.decls.record_of(&target).map(|id| MirrorType {
                    ty: target,
                    record: Some(id),
                    reused_self: false,
                }),
            })
    }
}
