//! Delegating member bodies.
//!
//! Both synthesized members walk the participating fields in declaration
//! order and delegate to each field's own implementation: `move(along:)`
//! emits one call per field, `differentiableVectorView` constructs the mirror
//! from each field's view.

use tangent_ir::capability::{DeclName, KnownCapability, Requirement};
use tangent_ir::decl::{Field, RecordId};
use tangent_ir::synth::{Arg, Body, Dispatch, Expr, FuncDecl, Param, PropertyDecl, Stmt};
use tangent_ir::ty::Ty;

use crate::dispatch::field_dispatch;
use crate::error::DeriveError;
use crate::fields::select_fields;
use crate::session::DeriveSession;
use crate::state::{DerivationState, MirrorType};
use crate::trace::TraceAction;

const MOVE_LABEL: &str = "along";
const MOVE_PARAM: &str = "direction";
const VECTOR_VIEW: &str = "differentiableVectorView";

impl DeriveSession<'_> {
    /// Participating fields paired with the dispatch reaching their
    /// implementation of `requirement`. Fails if the mirror does not have a
    /// field for each of them.
    fn delegates(
        &self,
        record: RecordId,
        mirror: &MirrorType,
        capability: KnownCapability,
        requirement: &Requirement,
    ) -> Result<Vec<(Field, Dispatch)>, DeriveError> {
        let decls = self.decls();
        let decl = decls.get(record);
        let mirror_record = mirror.record.map(|id| decls.get(id));
        let selection = select_fields(self.host(), decls, record);

        let mut delegates = Vec::with_capacity(selection.participating.len());
        for field in selection.fields(decl) {
            if let Some(m) = mirror_record {
                if !m.fields.iter().any(|f| f.name == field.name) {
                    return Err(DeriveError::MirrorFieldMismatch {
                        record: decl.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            let dispatch = field_dispatch(self.host(), decls, record, &field.ty, capability, requirement).ok_or_else(
                || DeriveError::PartialFailure {
                    record: decl.name.clone(),
                    capability,
                    field: field.name.clone(),
                    reason: format!("does not conform to `{}`", capability),
                },
            )?;
            delegates.push((field.clone(), dispatch));
        }
        Ok(delegates)
    }

    /// `move(along:)`: one delegated call per participating field.
    pub fn synthesize_move(&mut self, record: RecordId) -> Result<FuncDecl, DeriveError> {
        let capability = KnownCapability::Differentiable;
        let mirror = self.synthesize_mirror(record)?;
        let requirement = Requirement::method("move", &[MOVE_LABEL]);
        let delegates = self.delegates(record, &mirror, capability, &requirement)?;

        let stmts = delegates
            .into_iter()
            .map(|(field, dispatch)| {
                Stmt::Expr(Expr::MethodCall {
                    receiver: Box::new(Expr::self_member(field.name.clone())),
                    dispatch,
                    args: vec![Arg::labeled(
                        MOVE_LABEL,
                        Expr::member(Expr::Param(MOVE_PARAM.to_string()), field.name),
                    )],
                })
            })
            .collect::<Vec<_>>();

        let decl = self.decls().get(record);
        let func = FuncDecl {
            name: DeclName::compound("move", &[MOVE_LABEL]),
            params: vec![Param {
                label: Some(MOVE_LABEL.to_string()),
                name: MOVE_PARAM.to_string(),
                ty: mirror.ty,
            }],
            return_ty: Ty::unit(),
            is_mutating: decl.kind.is_value(),
            visibility: decl.visibility,
            implicit: true,
            capability,
            body: Body { stmts },
        };
        self.note(record, capability, TraceAction::BodyEmitted, func.name.to_string());
        Ok(func)
    }

    /// `differentiableVectorView`: the mirror built from each field's view.
    pub fn synthesize_vector_view(&mut self, record: RecordId) -> Result<PropertyDecl, DeriveError> {
        let capability = KnownCapability::EuclideanDifferentiable;
        if !self.can_derive(record, capability) {
            return Err(self.ineligible(record, capability));
        }
        let entered = self.state(record, capability) == DerivationState::Eligible
            && self.transition(record, capability, DerivationState::Synthesizing);

        let built = self.build_vector_view(record, capability);
        if entered {
            let next = if built.is_ok() {
                DerivationState::Synthesized
            } else {
                DerivationState::Ineligible
            };
            self.transition(record, capability, next);
        }
        built
    }

    fn build_vector_view(&mut self, record: RecordId, capability: KnownCapability) -> Result<PropertyDecl, DeriveError> {
        let mirror = self.synthesize_mirror(record)?;
        let requirement = Requirement::property(VECTOR_VIEW);
        let delegates = self.delegates(record, &mirror, capability, &requirement)?;

        let args = delegates
            .into_iter()
            .map(|(field, dispatch)| {
                Arg::labeled(
                    field.name.clone(),
                    Expr::PropertyRef {
                        base: Box::new(Expr::self_member(field.name)),
                        dispatch,
                    },
                )
            })
            .collect();

        let decl = self.decls().get(record);
        let prop = PropertyDecl {
            name: VECTOR_VIEW.to_string(),
            ty: mirror.ty.clone(),
            is_final: true,
            visibility: decl.visibility,
            implicit: true,
            capability,
            getter: Body {
                stmts: vec![Stmt::Return(Expr::Construct { ty: mirror.ty, args })],
            },
        };
        self.note(record, capability, TraceAction::BodyEmitted, VECTOR_VIEW);
        Ok(prop)
    }
}
