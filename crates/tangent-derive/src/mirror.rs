//! Mirror type (`TangentVector`) synthesis.
//!
//! A record's mirror holds one tangent value per participating field. The
//! record is reused as its own mirror when it is already flat; otherwise a
//! nested `TangentVector` struct is built with a memberwise initializer and
//! whatever secondary capabilities its fields allow.
//!
//! Synthesis is re-entrant. A request for a record whose mirror is still being
//! built receives a forward handle; every mirror that captured the handle is
//! patched once the outer synthesis finishes, or retracted if it fails.

use rustc_hash::FxHashMap;

use tangent_ir::capability::{KnownCapability, TANGENT_VECTOR, VECTOR_SPACE_SCALAR};
use tangent_ir::decl::{ConformanceSite, DerivativeAttr, Field, Member, Record, RecordId};
use tangent_ir::synth::{Body, Expr, InitializerDecl, Param, Stmt, TypeAliasDecl};
use tangent_ir::ty::{ForwardId, Ty};

use crate::error::{DeriveDiagnostic, DeriveError, DiagnosticKind};
use crate::fields::{diagnose_implicit_exclusions, select_fields, FieldSelection};
use crate::host::TypeWitness;
use crate::options::LayoutPolicy;
use crate::propagate::{propagate, SECONDARY};
use crate::registry;
use crate::session::DeriveSession;
use crate::state::{DerivationState, MirrorType};
use crate::trace::TraceAction;
use crate::unify::substitute;

const DIFF: KnownCapability = KnownCapability::Differentiable;

/// `ty` is written in the generic context of `owner`; rewrite it for the
/// instantiation `actual` of that record.
fn instantiate(ty: &Ty, owner: &Record, actual: &Ty) -> Ty {
    let subst: FxHashMap<String, Ty> = owner
        .generic_params
        .iter()
        .map(|p| p.name.clone())
        .zip(actual.type_args().iter().cloned())
        .collect();
    substitute(ty, &subst)
}

/// Where the record's differentiable conformance is declared.
fn differentiable_site(record: &Record) -> ConformanceSite {
    record
        .conformance(DIFF)
        .or_else(|| record.conformance(KnownCapability::EuclideanDifferentiable))
        .map(|c| c.site.clone())
        .unwrap_or(ConformanceSite::Primary)
}

impl DeriveSession<'_> {
    /// The mirror type for `record`'s conformance to `Differentiable`,
    /// building it on first request.
    pub fn synthesize_mirror(&mut self, record: RecordId) -> Result<MirrorType, DeriveError> {
        if let Some(mirror) = self.state.mirror(record).cloned() {
            self.note(record, DIFF, TraceAction::CacheHit, mirror.ty.to_string());
            return Ok(mirror);
        }
        if let Some(forward) = self.state.forward_of(record) {
            log::trace!("re-entrant mirror request for `{}`", self.decls.get(record).name);
            self.note(record, DIFF, TraceAction::ForwardIssued, format!("#{}", forward.0));
            return Ok(MirrorType::pending(forward));
        }
        if let Some(err) = self.state.failure(record) {
            return Err(err.clone());
        }

        let site = differentiable_site(self.decls.get(record));
        if let Err(err) = self.check_context(record, DIFF, &site, None) {
            self.state.record_failure(record, err.clone());
            return Err(err);
        }

        if !self.can_derive(record, DIFF) {
            return Err(self.ineligible(record, DIFF));
        }

        if let Some(existing) = self.existing_mirror(record) {
            self.transition(record, DIFF, DerivationState::Synthesizing);
            self.transition(record, DIFF, DerivationState::Synthesized);
            self.state.cache_mirror(record, existing.clone());
            self.note(record, DIFF, TraceAction::CacheHit, existing.ty.to_string());
            return Ok(existing);
        }

        self.transition(record, DIFF, DerivationState::Synthesizing);
        let forward = self.state.begin(record);
        match self.build_mirror(record, &site) {
            Ok(mirror) => {
                self.complete(record, forward, &mirror);
                Ok(mirror)
            }
            Err(err) => {
                self.abort(record, forward, &err);
                Err(err)
            }
        }
    }

    fn build_mirror(&mut self, record: RecordId, site: &ConformanceSite) -> Result<MirrorType, DeriveError> {
        let host = self.host();
        let selection = select_fields(host, self.decls, record);
        let decl = self.decls.get(record).clone();
        self.note(
            record,
            DIFF,
            TraceAction::SelectFields,
            selection.fields(&decl).map(|f| f.name.as_str()).collect::<Vec<_>>().join(", "),
        );

        let mut tangents = Vec::with_capacity(selection.participating.len());
        for field in selection.fields(&decl) {
            tangents.push(self.field_tangent(&decl, field)?);
        }

        // Forward handles this mirror is provisional on, directly or through
        // mirrors that are themselves still provisional.
        let mut forwards = Vec::new();
        let mut heads = Vec::new();
        for tangent in &tangents {
            tangent.collect_forwards(&mut forwards);
            tangent.collect_heads(&mut heads);
        }
        for head in heads {
            let Some(id) = self.decls.by_name(head) else {
                continue;
            };
            let referenced = self.decls.get(id);
            let owner = if referenced.implicit {
                referenced.parent.unwrap_or(id)
            } else {
                id
            };
            for pending in self.state.pending_on(owner) {
                if !forwards.contains(&pending) {
                    forwards.push(pending);
                }
            }
        }
        for pending in forwards {
            log::trace!("`{}` waits on mirror #{}", decl.name, pending.0);
            self.state.add_dependent(pending, record);
        }

        if self.options().warn_implicit_exclusions {
            for diagnostic in diagnose_implicit_exclusions(host, self.decls, record, &selection) {
                self.report(diagnostic);
            }
        }

        if self.can_reuse_self(&decl, &selection, &tangents) {
            return Ok(self.reuse_self(&decl));
        }
        Ok(self.build_mirror_record(&decl, &selection, tangents, site))
    }

    /// The tangent type of a participating field.
    fn field_tangent(&mut self, decl: &Record, field: &Field) -> Result<Ty, DeriveError> {
        let host = self.host();
        let witness = host
            .conforms_to(self.decls, decl.id, &field.ty, DIFF)
            .and_then(|c| c.type_witness(TANGENT_VECTOR).cloned());
        let resolved = match witness {
            Some(TypeWitness::Known(ty)) => self.expand_derived(&ty),
            Some(TypeWitness::Derived) => match self.decls.record_of(&field.ty) {
                Some(id) => self.synthesize_mirror(id).map(|mirror| {
                    let owner = self.decls.get(id);
                    instantiate(&mirror.ty, owner, &field.ty)
                }),
                None => Err(self.ineligible(decl.id, DIFF)),
            },
            None => Err(self.ineligible(decl.id, DIFF)),
        };
        resolved.map_err(|inner| {
            log::debug!("no tangent for `{}.{}`: {}", decl.name, field.name, inner);
            self.report(DeriveDiagnostic::error(
                DiagnosticKind::UnresolvedTangent {
                    record: decl.name.clone(),
                    field: field.name.clone(),
                    ty: field.ty.clone(),
                },
                field.span,
            ));
            DeriveError::PartialFailure {
                record: decl.name.clone(),
                capability: DIFF,
                field: field.name.clone(),
                reason: inner.to_string(),
            }
        })
    }

    /// Resolve `R.TangentVector` projections the host left open because
    /// `R`'s tangent is itself derived.
    fn expand_derived(&mut self, ty: &Ty) -> Result<Ty, DeriveError> {
        Ok(match ty {
            Ty::Assoc(base, name) if name == TANGENT_VECTOR => {
                let base = self.expand_derived(base)?;
                let target = match base {
                    Ty::Con(_) | Ty::App(..) => self.decls.record_of(&base),
                    _ => None,
                };
                match target {
                    Some(id) => {
                        let mirror = self.synthesize_mirror(id)?;
                        instantiate(&mirror.ty, self.decls.get(id), &base)
                    }
                    None => Ty::assoc(base, name.clone()),
                }
            }
            Ty::App(con, args) => Ty::App(
                Box::new(self.expand_derived(con)?),
                args.iter().map(|a| self.expand_derived(a)).collect::<Result<_, _>>()?,
            ),
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| self.expand_derived(e)).collect::<Result<_, _>>()?),
            Ty::Fun(params, ret) => Ty::Fun(
                params.iter().map(|p| self.expand_derived(p)).collect::<Result<_, _>>()?,
                Box::new(self.expand_derived(ret)?),
            ),
            other => other.clone(),
        })
    }

    /// A value type with every field participating, each already its own
    /// tangent, that conforms to `AdditiveArithmetic` is its own mirror.
    fn can_reuse_self(&self, decl: &Record, selection: &FieldSelection, tangents: &[Ty]) -> bool {
        self.options().allow_self_reuse
            && decl.kind.is_value()
            && selection.is_complete()
            && selection.fields(decl).zip(tangents).all(|(f, t)| f.ty == *t)
            && self.conforms(decl.id, &decl.declared_ty(), KnownCapability::AdditiveArithmetic)
    }

    fn reuse_self(&mut self, decl: &Record) -> MirrorType {
        let ty = decl.declared_ty();
        log::debug!("`{}` is its own tangent vector", decl.name);
        self.decls.install_member(
            decl.id,
            Member::TypeAlias(TypeAliasDecl {
                name: TANGENT_VECTOR.to_string(),
                target: ty.clone(),
                visibility: decl.visibility,
                implicit: true,
            }),
        );
        self.note(decl.id, DIFF, TraceAction::MirrorReused, ty.to_string());
        MirrorType {
            ty,
            record: Some(decl.id),
            reused_self: true,
        }
    }

    fn build_mirror_record(
        &mut self,
        decl: &Record,
        selection: &FieldSelection,
        tangents: Vec<Ty>,
        site: &ConformanceSite,
    ) -> MirrorType {
        let host = self.host();
        let has_key_paths = self.conforms(decl.id, &decl.declared_ty(), KnownCapability::KeyPathIterable);
        let propagation = propagate(host, self.decls, decl.id, &tangents, has_key_paths, &SECONDARY);
        self.note(
            decl.id,
            DIFF,
            TraceAction::Propagate,
            propagation.granted.iter().map(|c| c.name()).collect::<Vec<_>>().join(", "),
        );

        let mut mirror = Record::structure(format!("{}.{}", decl.name, TANGENT_VECTOR));
        mirror.generic_params = decl.generic_params.clone();
        mirror.visibility = decl.visibility;
        mirror.file = decl.file;
        mirror.span = decl.span;
        mirror.parent = Some(decl.id);
        mirror.implicit = true;
        mirror.fixed_layout = match self.options().layout_policy {
            LayoutPolicy::CopyFromRecord => decl.fixed_layout,
            LayoutPolicy::FromMirrorFields => tangents.iter().all(|t| host.has_fixed_layout(self.decls, t)),
        };
        let mirror_ty = mirror.declared_ty();

        let mut params = Vec::with_capacity(tangents.len());
        let mut assignments = Vec::with_capacity(tangents.len());
        for (field, tangent) in selection.fields(decl).zip(tangents) {
            params.push(Param {
                label: Some(field.name.clone()),
                name: field.name.clone(),
                ty: tangent.clone(),
            });
            assignments.push(Stmt::Assign {
                target: Expr::self_member(field.name.clone()),
                value: Expr::Param(field.name.clone()),
            });
            let mut mirrored = Field::new(field.name.clone(), tangent)
                .with_visibility(field.visibility)
                .with_span(field.span);
            mirrored.mutable = field.mutable;
            mirror.fields.push(mirrored);
        }

        mirror.members.push(Member::TypeAlias(TypeAliasDecl {
            name: TANGENT_VECTOR.to_string(),
            target: mirror_ty.clone(),
            visibility: decl.visibility,
            implicit: true,
        }));
        if let Some(scalar) = &propagation.shared_scalar {
            mirror.members.push(Member::TypeAlias(TypeAliasDecl {
                name: VECTOR_SPACE_SCALAR.to_string(),
                target: scalar.clone(),
                visibility: decl.visibility,
                implicit: true,
            }));
        }
        mirror.members.push(Member::Initializer(InitializerDecl {
            params,
            visibility: decl.visibility,
            implicit: true,
            memberwise: true,
            body: Body { stmts: assignments },
        }));

        let mirror_id = self.decls.add(mirror);
        let prerequisites = registry::rule(DIFF).map(|r| r.prerequisites).unwrap_or(&[]);
        for capability in std::iter::once(DIFF)
            .chain(prerequisites.iter().copied())
            .chain(propagation.granted.iter().copied())
        {
            self.decls.add_synthesized_conformance(mirror_id, capability);
        }
        self.decls.install_member(decl.id, Member::NestedRecord(mirror_id));
        log::debug!("built `{}`", mirror_ty);
        self.note(decl.id, DIFF, TraceAction::MirrorBuilt, mirror_ty.to_string());

        self.mark_exported_getters(decl, selection, site);

        MirrorType {
            ty: mirror_ty,
            record: Some(mirror_id),
            reused_self: false,
        }
    }

    /// Give participating fields visible outside the module a differentiable getter so callers
    /// outside the module reach the derivative through the original field.
    fn mark_exported_getters(&mut self, decl: &Record, selection: &FieldSelection, site: &ConformanceSite) {
        let requirements = match site {
            ConformanceSite::Extension { generic_requirements, .. } => generic_requirements.clone(),
            ConformanceSite::Primary => Vec::new(),
        };
        let exported: Vec<usize> = selection
            .participating
            .iter()
            .copied()
            .filter(|&index| {
                self.decls
                    .effective_visibility(decl.id, decl.fields[index].visibility)
                    .is_exported()
            })
            .collect();
        let mut marked = Vec::new();
        let record = self.decls.get_mut(decl.id);
        for index in exported {
            let field = &mut record.fields[index];
            if field.getter_derivative.is_none() {
                field.getter_derivative = Some(DerivativeAttr {
                    implicit: true,
                    parameter_indices: vec![0],
                    requirements: requirements.clone(),
                });
                marked.push(index);
            }
        }
        self.state.mark_getters(decl.id, marked);
    }

    fn complete(&mut self, record: RecordId, forward: ForwardId, mirror: &MirrorType) {
        self.transition(record, DIFF, DerivationState::Synthesized);
        self.state.cache_mirror(record, mirror.clone());
        self.state.finish(record);
        for dependent in self.state.take_dependents(forward) {
            self.patch_forward(dependent, forward, &mirror.ty);
        }
    }

    /// Replace `forward` with the final mirror type throughout the mirror
    /// record of `dependent`.
    fn patch_forward(&mut self, dependent: RecordId, forward: ForwardId, ty: &Ty) {
        let Some(mirror_record) = self.state.mirror(dependent).and_then(|m| m.record) else {
            return;
        };
        let record = self.decls.get_mut(mirror_record);
        for field in &mut record.fields {
            field.ty = field.ty.replace_forward(forward, ty);
        }
        for member in &mut record.members {
            match member {
                Member::TypeAlias(alias) => alias.target = alias.target.replace_forward(forward, ty),
                Member::Initializer(init) => {
                    for param in &mut init.params {
                        param.ty = param.ty.replace_forward(forward, ty);
                    }
                }
                _ => {}
            }
        }
        log::trace!("patched mirror #{} into `{}`", forward.0, record.name);
        self.note(dependent, DIFF, TraceAction::ForwardPatched, format!("#{} -> {}", forward.0, ty));
    }

    fn abort(&mut self, record: RecordId, forward: ForwardId, err: &DeriveError) {
        self.transition(record, DIFF, DerivationState::Ineligible);
        self.state.finish(record);
        self.state.record_failure(record, err.clone());
        for dependent in self.state.take_dependents(forward) {
            if dependent != record {
                self.roll_back(dependent);
            }
        }
    }

    /// Undo a finished mirror that captured a failed forward handle.
    fn roll_back(&mut self, record: RecordId) {
        if let Some(mirror) = self.state.evict_mirror(record) {
            match mirror.record {
                Some(id) if mirror.reused_self => {
                    let ty = mirror.ty.clone();
                    self.decls.get_mut(id).members.retain(|member| {
                        !matches!(member, Member::TypeAlias(alias) if alias.implicit && alias.target == ty)
                    });
                }
                Some(id) if self.decls.get(id).implicit => self.decls.retract(id),
                _ => {}
            }
        }
        let fields = &mut self.decls.get_mut(record).fields;
        for index in self.state.take_getter_marks(record) {
            fields[index].getter_derivative = None;
        }
        self.state.reset(record, DIFF);
        log::debug!("rolled back mirror of `{}`", self.decls.get(record).name);
        self.note(record, DIFF, TraceAction::RolledBack, String::new());
    }
}
