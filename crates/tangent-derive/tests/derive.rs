//! Integration tests for conformance derivation: mirror type synthesis,
//! delegating bodies, eligibility, cycles, and rollback.

use tangent_derive::error::{DeriveError, DiagnosticKind, DisallowedReason};
use tangent_derive::fields::ExclusionReason;
use tangent_derive::options::DeriveOptions;
use tangent_derive::state::DerivationState;
use tangent_derive::trace::TraceAction;
use tangent_derive::{derive_all, ConformanceTable, DeriveSession, SynthesizedMember};
use tangent_ir::capability::{KnownCapability, Requirement, TANGENT_VECTOR, VECTOR_SPACE_SCALAR};
use tangent_ir::decl::{
    ConformanceSite, Decls, Field, FileId, Member, MemberType, Record, RecordId, Visibility,
};
use tangent_ir::synth::{Dispatch, Expr, Stmt, TypeAliasDecl};
use tangent_ir::ty::Ty;

// ── Helpers ────────────────────────────────────────────────────────────

const DIFF: KnownCapability = KnownCapability::Differentiable;

fn alias(name: &str, target: Ty) -> Member {
    Member::TypeAlias(TypeAliasDecl {
        name: name.into(),
        target,
        visibility: Visibility::Internal,
        implicit: false,
    })
}

/// A flat vector type that is its own tangent vector, with `Float` scalars.
fn self_tangent(name: &str) -> Record {
    Record::structure(name)
        .field(Field::new("value", Ty::float()))
        .conforms(KnownCapability::Differentiable)
        .conforms(KnownCapability::AdditiveArithmetic)
        .conforms(KnownCapability::VectorProtocol)
        .member(alias(TANGENT_VECTOR, Ty::con(name)))
        .member(alias(VECTOR_SPACE_SCALAR, Ty::float()))
}

/// `struct P: Differentiable { var x: A; var y: B }`
fn composite() -> (Decls, RecordId) {
    let mut decls = Decls::new();
    decls.add(self_tangent("A"));
    decls.add(self_tangent("B"));
    let p = decls.add(
        Record::structure("P")
            .field(Field::new("x", Ty::con("A")))
            .field(Field::new("y", Ty::con("B")))
            .conforms(DIFF),
    );
    (decls, p)
}

fn mirror_field_names(decls: &Decls, mirror: RecordId) -> Vec<&str> {
    decls.get(mirror).fields.iter().map(|f| f.name.as_str()).collect()
}

fn nested_tangents(decls: &Decls, record: RecordId) -> Vec<MemberType> {
    decls.get(record).member_types(TANGENT_VECTOR, decls)
}

// ── Mirror type synthesis ──────────────────────────────────────────────

/// Two self-tangent fields sharing a scalar: a nested mirror with both
/// fields, `VectorProtocol` granted with `Float`, and no reuse since `P` is
/// not `AdditiveArithmetic`.
#[test]
fn test_mirror_for_composite_record() {
    let table = ConformanceTable::with_builtins();
    let (mut decls, p) = composite();
    let mut session = DeriveSession::new(&table, &mut decls);

    let mirror = session.synthesize_mirror(p).unwrap();
    assert!(!mirror.reused_self);
    assert_eq!(mirror.ty, Ty::con("P.TangentVector"));
    let mirror_id = mirror.record.unwrap();
    assert!(session.diagnostics().is_empty());
    assert_eq!(session.state(p, DIFF), DerivationState::Synthesized);

    let decls = session.decls();
    let mirror_decl = decls.get(mirror_id);
    assert!(mirror_decl.implicit);
    assert_eq!(mirror_decl.parent, Some(p));
    assert_eq!(mirror_field_names(decls, mirror_id), vec!["x", "y"]);
    for cap in [
        KnownCapability::Differentiable,
        KnownCapability::AdditiveArithmetic,
        KnownCapability::VectorProtocol,
    ] {
        assert!(mirror_decl.declares_conformance(cap), "missing {}", cap);
    }
    assert!(!mirror_decl.declares_conformance(KnownCapability::ElementaryFunctions));
    assert_eq!(
        mirror_decl.member_types(VECTOR_SPACE_SCALAR, decls),
        vec![MemberType::Alias {
            target: Ty::float(),
            implicit: true
        }]
    );
    insta::assert_snapshot!(mirror_decl.to_string(), @r"
    struct P.TangentVector: Differentiable, AdditiveArithmetic, VectorProtocol {
        var x: A
        var y: B
        typealias TangentVector = P.TangentVector
        typealias VectorSpaceScalar = Float
        init(x: A, y: B) {
            self.x = x
            self.y = y
        }
    }
    ");

    // The original record gains the nested type and nothing else.
    assert_eq!(nested_tangents(decls, p), vec![MemberType::Nested(mirror_id)]);
    assert_eq!(decls.get(p).members.len(), 1);
}

/// Asking twice yields the same mirror without building another record.
#[test]
fn test_mirror_is_idempotent_within_a_session() {
    let table = ConformanceTable::with_builtins();
    let (mut decls, p) = composite();
    let mut session = DeriveSession::new(&table, &mut decls);

    let first = session.synthesize_mirror(p).unwrap();
    let count = session.decls().len();
    let second = session.synthesize_mirror(p).unwrap();
    assert_eq!(first, second);
    assert_eq!(session.decls().len(), count);
}

/// A later pass over the same declarations finds the installed mirror.
#[test]
fn test_mirror_is_stable_across_sessions() {
    let table = ConformanceTable::with_builtins();
    let (mut decls, p) = composite();
    let first = {
        let mut session = DeriveSession::new(&table, &mut decls);
        session.synthesize_mirror(p).unwrap()
    };
    let count = decls.len();

    let mut session = DeriveSession::new(&table, &mut decls);
    assert!(session.can_derive(p, DIFF));
    let second = session.synthesize_mirror(p).unwrap();
    assert_eq!(first.record, second.record);
    assert_eq!(first.ty, second.ty);
    assert_eq!(session.decls().len(), count);
}

/// Participating fields keep declaration order; excluded fields never show up.
#[test]
fn test_mirror_fields_follow_declaration_order() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let model = decls.add(
        Record::structure("Model")
            .field(Field::new("a", Ty::float()))
            .field(Field::new("b", Ty::float()).excluded())
            .field(Field::new("c", Ty::float()).immutable().with_initializer())
            .field(Field::new("d", Ty::double()))
            .field(Field::new("e", Ty::int()))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let mirror = session.synthesize_mirror(model).unwrap();
    let mirror_id = mirror.record.unwrap();
    assert_eq!(mirror_field_names(session.decls(), mirror_id), vec!["a", "d"]);

    // Float and Double disagree on the scalar.
    let mirror_decl = session.decls().get(mirror_id);
    assert!(!mirror_decl.declares_conformance(KnownCapability::VectorProtocol));
    assert!(mirror_decl.declares_conformance(KnownCapability::ElementaryFunctions));

    let reasons: Vec<ExclusionReason> = session
        .diagnostics()
        .iter()
        .filter_map(|d| match &d.kind {
            DiagnosticKind::ImplicitExclusion { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons,
        vec![
            ExclusionReason::ImmutableWithInitializer,
            ExclusionReason::NotConforming
        ]
    );
}

/// Silencing the warnings leaves the mirror unchanged.
#[test]
fn test_exclusion_warnings_can_be_disabled() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let model = decls.add(
        Record::structure("Model")
            .field(Field::new("a", Ty::float()))
            .field(Field::new("steps", Ty::int()))
            .conforms(DIFF),
    );
    let options = DeriveOptions {
        warn_implicit_exclusions: false,
        ..DeriveOptions::default()
    };
    let mut session = DeriveSession::with_options(&table, &mut decls, options);
    let mirror = session.synthesize_mirror(model).unwrap();
    assert_eq!(mirror_field_names(session.decls(), mirror.record.unwrap()), vec!["a"]);
    assert!(session.diagnostics().is_empty());
}

/// A flat additive value type is its own tangent vector.
#[test]
fn test_flat_additive_record_reuses_itself() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let point = decls.add(
        Record::structure("Point")
            .field(Field::new("x", Ty::float()))
            .field(Field::new("y", Ty::float()))
            .conforms(DIFF)
            .conforms(KnownCapability::AdditiveArithmetic),
    );
    let count = decls.len();
    {
        let mut session = DeriveSession::new(&table, &mut decls);
        let mirror = session.synthesize_mirror(point).unwrap();
        assert!(mirror.reused_self);
        assert_eq!(mirror.ty, Ty::con("Point"));
        assert_eq!(mirror.record, Some(point));
    }
    assert_eq!(decls.len(), count);
    assert_eq!(
        nested_tangents(&decls, point),
        vec![MemberType::Alias {
            target: Ty::con("Point"),
            implicit: true
        }]
    );

    // The implicit alias keeps the record eligible on a later pass.
    let mut session = DeriveSession::new(&table, &mut decls);
    assert!(session.can_derive(point, DIFF));
}

#[test]
fn test_self_reuse_disabled_builds_nested_mirror() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let point = decls.add(
        Record::structure("Point")
            .field(Field::new("x", Ty::float()))
            .field(Field::new("y", Ty::float()))
            .conforms(DIFF)
            .conforms(KnownCapability::AdditiveArithmetic),
    );
    let options = DeriveOptions {
        allow_self_reuse: false,
        ..DeriveOptions::default()
    };
    let mut session = DeriveSession::with_options(&table, &mut decls, options);
    let mirror = session.synthesize_mirror(point).unwrap();
    assert!(!mirror.reused_self);
    assert_eq!(mirror.ty, Ty::con("Point.TangentVector"));

    let mirror_id = mirror.record.unwrap();
    let decls = session.decls();
    assert_eq!(mirror_field_names(decls, mirror_id), vec!["x", "y"]);
    assert_eq!(nested_tangents(decls, point), vec![MemberType::Nested(mirror_id)]);
}

/// One non-differentiable field is enough to need a separate mirror.
#[test]
fn test_excluded_field_prevents_reuse() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let point = decls.add(
        Record::structure("Point")
            .field(Field::new("x", Ty::float()))
            .field(Field::new("y", Ty::float()))
            .field(Field::new("count", Ty::int()))
            .conforms(DIFF)
            .conforms(KnownCapability::AdditiveArithmetic),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let mirror = session.synthesize_mirror(point).unwrap();
    assert!(!mirror.reused_self);
    assert_eq!(mirror.ty, Ty::con("Point.TangentVector"));
    assert_eq!(mirror_field_names(session.decls(), mirror.record.unwrap()), vec!["x", "y"]);

    let diagnostics = session.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert!(matches!(
        diagnostics[0].kind,
        DiagnosticKind::ImplicitExclusion {
            reason: ExclusionReason::NotConforming,
            suggest_additive: true,
            ..
        }
    ));
}

/// Reference types never reuse themselves, even when flat.
#[test]
fn test_class_gets_a_separate_mirror() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let cell = decls.add(
        Record::class("Cell", true)
            .field(Field::new("value", Ty::float()))
            .conforms(DIFF)
            .conforms(KnownCapability::AdditiveArithmetic),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let mirror = session.synthesize_mirror(cell).unwrap();
    assert!(!mirror.reused_self);
    assert_eq!(mirror.ty, Ty::con("Cell.TangentVector"));
}

/// Generic mirrors carry the record's parameters and project field tangents.
#[test]
fn test_generic_mirror_projects_parameter_tangents() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let pair = decls.add(
        Record::structure("Pair")
            .generic("T", &[KnownCapability::Differentiable])
            .field(Field::new("first", Ty::param("T")))
            .field(Field::new("second", Ty::param("T")))
            .conforms(DIFF),
    );
    let holder = decls.add(
        Record::structure("Holder")
            .field(Field::new("pair", Ty::app("Pair", vec![Ty::float()])))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::new(&table, &mut decls);

    let mirror = session.synthesize_mirror(pair).unwrap();
    assert_eq!(mirror.ty.to_string(), "Pair.TangentVector<T>");
    let mirror_decl = session.decls().get(mirror.record.unwrap());
    assert_eq!(
        mirror_decl.fields[0].ty,
        Ty::assoc(Ty::param("T"), TANGENT_VECTOR)
    );

    let holder_mirror = session.synthesize_mirror(holder).unwrap();
    let holder_decl = session.decls().get(holder_mirror.record.unwrap());
    assert_eq!(
        holder_decl.fields[0].ty,
        Ty::app("Pair.TangentVector", vec![Ty::float()])
    );
}

/// A layout policy reading the mirror's own fields.
#[test]
fn test_layout_from_mirror_fields() {
    use tangent_derive::options::LayoutPolicy;

    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let model = decls.add(
        Record::structure("Model")
            .field(Field::new("a", Ty::float()))
            .field(Field::new("b", Ty::double()))
            .conforms(DIFF),
    );
    let options = DeriveOptions {
        layout_policy: LayoutPolicy::FromMirrorFields,
        ..DeriveOptions::default()
    };
    let mut session = DeriveSession::with_options(&table, &mut decls, options);
    let mirror = session.synthesize_mirror(model).unwrap();
    assert!(!session.decls().get(model).fixed_layout);
    assert!(session.decls().get(mirror.record.unwrap()).fixed_layout);
}

/// Exported fields get an implicit differentiable getter.
#[test]
fn test_exported_fields_get_differentiable_getters() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let model = decls.add(
        Record::structure("Model")
            .with_visibility(Visibility::Public)
            .field(Field::new("weight", Ty::float()).with_visibility(Visibility::Public))
            .field(Field::new("cache", Ty::float()))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let mirror = session.synthesize_mirror(model).unwrap();

    let decls = session.decls();
    let fields = &decls.get(model).fields;
    let attr = fields[0].getter_derivative.as_ref().unwrap();
    assert!(attr.implicit);
    assert_eq!(attr.parameter_indices, vec![0]);
    assert!(fields[1].getter_derivative.is_none());
    assert_eq!(decls.get(mirror.record.unwrap()).visibility, Visibility::Public);
}

/// A public field of an internal record is not visible outside the module.
#[test]
fn test_internal_record_public_field_gets_no_getter() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let model = decls.add(
        Record::structure("Model")
            .field(Field::new("weight", Ty::float()).with_visibility(Visibility::Public))
            .field(Field::new("n", Ty::int()))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    session.synthesize_mirror(model).unwrap();

    let fields = &session.decls().get(model).fields;
    assert!(fields.iter().all(|f| f.getter_derivative.is_none()));
}

// ── Eligibility ────────────────────────────────────────────────────────

/// A user-declared `TangentVector` that is neither a mirror nor the record.
#[test]
fn test_custom_tangent_vector_is_ineligible() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    decls.add(self_tangent("A"));
    let p = decls.add(
        Record::structure("P")
            .field(Field::new("x", Ty::float()))
            .conforms(DIFF)
            .member(alias(TANGENT_VECTOR, Ty::con("A"))),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let err = session.synthesize_mirror(p).unwrap_err();
    assert!(matches!(err, DeriveError::Ineligible { .. }));
    assert_eq!(session.state(p, DIFF), DerivationState::Ineligible);
}

/// A user-declared self alias is used as is.
#[test]
fn test_declared_self_tangent_is_used() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let a = decls.add(self_tangent("A"));
    let count = decls.len();
    let members = decls.get(a).members.len();
    let mut session = DeriveSession::new(&table, &mut decls);
    let mirror = session.synthesize_mirror(a).unwrap();
    assert!(mirror.reused_self);
    assert_eq!(mirror.record, Some(a));
    assert_eq!(session.decls().len(), count);
    assert_eq!(session.decls().get(a).members.len(), members);
}

/// Cross-file extensions are rejected before any work starts.
#[test]
fn test_cross_file_extension_is_disallowed() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let p = decls.add(
        Record::structure("P")
            .in_file(FileId(0))
            .field(Field::new("x", Ty::float()))
            .conforms_in_extension(DIFF, FileId(1), Vec::new()),
    );
    let count = decls.len();
    let mut session = DeriveSession::new(&table, &mut decls);
    let site = session.decls().get(p).conformances[0].site.clone();
    let err = session
        .try_derive(p, &site, DIFF, &Requirement::associated_type(TANGENT_VECTOR))
        .unwrap_err();
    assert_eq!(
        err,
        DeriveError::DisallowedContext {
            record: "P".into(),
            capability: DIFF,
            reason: DisallowedReason::CrossFileExtension,
        }
    );
    assert_eq!(session.state(p, DIFF), DerivationState::NotChecked);
    assert_eq!(session.diagnostics().len(), 1);
    assert_eq!(session.decls().len(), count);
}

/// Same-file extensions derive normally.
#[test]
fn test_same_file_extension_derives() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let p = decls.add(
        Record::structure("P")
            .in_file(FileId(2))
            .field(Field::new("x", Ty::float()))
            .conforms_in_extension(DIFF, FileId(2), Vec::new()),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let site = session.decls().get(p).conformances[0].site.clone();
    let member = session
        .try_derive(p, &site, DIFF, &Requirement::associated_type(TANGENT_VECTOR))
        .unwrap();
    assert_eq!(
        member,
        SynthesizedMember::TypeWitness {
            name: TANGENT_VECTOR.into(),
            ty: Ty::con("P.TangentVector"),
        }
    );
}

// ── Member bodies ──────────────────────────────────────────────────────

/// `move(along:)` delegates to each field in declaration order.
#[test]
fn test_move_delegates_per_field() {
    let table = ConformanceTable::with_builtins();
    let (mut decls, p) = composite();
    let mut session = DeriveSession::new(&table, &mut decls);

    let member = session
        .try_derive(
            p,
            &ConformanceSite::Primary,
            DIFF,
            &Requirement::method("move", &["along"]),
        )
        .unwrap();
    let func = match member {
        SynthesizedMember::Method(func) => func,
        other => panic!("expected a method, got {:?}", other),
    };
    assert!(func.implicit);
    assert!(func.is_mutating);
    assert_eq!(func.body.stmts.len(), 2);
    for stmt in &func.body.stmts {
        let Stmt::Expr(Expr::MethodCall { dispatch, .. }) = stmt else {
            panic!("expected a call, got {}", stmt);
        };
        assert!(dispatch.is_static());
    }
    insta::assert_snapshot!(func.to_string(), @r"
    mutating func move(along direction: P.TangentVector) {
        self.x.move(along: direction.x)
        self.y.move(along: direction.y)
    }
    ");
}

/// Generic fields dispatch through the capability, not a concrete witness.
#[test]
fn test_generic_fields_dispatch_through_interface() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let wrapper = decls.add(
        Record::class("Wrapper", true)
            .generic("T", &[KnownCapability::Differentiable])
            .field(Field::new("inner", Ty::param("T")))
            .field(Field::new("scale", Ty::float()))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let func = session.synthesize_move(wrapper).unwrap();
    assert!(!func.is_mutating);

    let dispatches: Vec<&Dispatch> = func
        .body
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Expr(Expr::MethodCall { dispatch, .. }) => Some(dispatch),
            _ => None,
        })
        .collect();
    assert_eq!(dispatches.len(), 2);
    assert!(matches!(dispatches[0], Dispatch::ViaInterface(_)));
    assert!(dispatches[1].is_static());
}

/// `differentiableVectorView` builds the mirror from each field's view.
#[test]
fn test_vector_view_constructs_mirror() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let v = decls.add(
        Record::structure("V")
            .field(Field::new("x", Ty::float()))
            .field(Field::new("y", Ty::double()))
            .conforms(KnownCapability::EuclideanDifferentiable),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let prop = session.synthesize_vector_view(v).unwrap();
    assert!(prop.is_final);
    assert_eq!(
        session.state(v, KnownCapability::EuclideanDifferentiable),
        DerivationState::Synthesized
    );
    insta::assert_snapshot!(prop.to_string(), @r"
    var differentiableVectorView: V.TangentVector {
        return V.TangentVector(x: self.x.differentiableVectorView, y: self.y.differentiableVectorView)
    }
    ");
}

/// A participating field without a Euclidean conformance blocks the view.
#[test]
fn test_vector_view_needs_euclidean_fields() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    decls.add(self_tangent("A"));
    let v = decls.add(
        Record::structure("V")
            .field(Field::new("x", Ty::float()))
            .field(Field::new("a", Ty::con("A")))
            .conforms(KnownCapability::EuclideanDifferentiable),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let err = session.synthesize_vector_view(v).unwrap_err();
    assert_eq!(
        err,
        DeriveError::Ineligible {
            record: "V".into(),
            capability: KnownCapability::EuclideanDifferentiable,
        }
    );
    // `Differentiable` itself is unaffected.
    assert!(session.can_derive(v, DIFF));
}

// ── Failure and cycles ─────────────────────────────────────────────────

/// A field whose own derivation is disallowed; `W`'s conformance lives in
/// an extension in another file.
fn unreachable_tangent() -> Record {
    Record::structure("W")
        .in_file(FileId(0))
        .field(Field::new("w", Ty::float()))
        .conforms_in_extension(DIFF, FileId(1), Vec::new())
}

/// Failure on one field leaves nothing behind.
#[test]
fn test_partial_failure_installs_nothing() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    decls.add(unreachable_tangent());
    let q = decls.add(
        Record::structure("Q")
            .field(Field::new("x", Ty::float()))
            .field(Field::new("w", Ty::con("W")))
            .conforms(DIFF),
    );
    let count = decls.len();
    let mut session = DeriveSession::new(&table, &mut decls);

    let err = session.synthesize_mirror(q).unwrap_err();
    match &err {
        DeriveError::PartialFailure { record, field, .. } => {
            assert_eq!(record, "Q");
            assert_eq!(field, "w");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(session.state(q, DIFF), DerivationState::Ineligible);
    assert!(session.mirror(q).is_none());
    assert_eq!(session.decls().len(), count);
    assert!(session.decls().get(q).members.is_empty());
    assert!(session
        .diagnostics()
        .iter()
        .any(|d| matches!(d.kind, DiagnosticKind::UnresolvedTangent { .. })));

    // The failure is remembered rather than retried.
    assert_eq!(session.synthesize_mirror(q).unwrap_err(), err);
}

/// `final class Node { var value: Float; var next: [Node] }`: the inner
/// request receives a forward handle, patched once the mirror is built.
#[test]
fn test_self_referential_record_is_patched() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let node = decls.add(
        Record::class("Node", true)
            .field(Field::new("value", Ty::float()))
            .field(Field::new("next", Ty::array(Ty::con("Node"))))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::with_options(&table, &mut decls, DeriveOptions::traced());
    let mirror = session.synthesize_mirror(node).unwrap();
    assert_eq!(mirror.ty, Ty::con("Node.TangentVector"));

    let mirror_decl = session.decls().get(mirror.record.unwrap());
    assert_eq!(mirror_decl.fields[0].ty, Ty::float());
    assert_eq!(
        mirror_decl.fields[1].ty,
        Ty::array(Ty::con("Node.TangentVector"))
    );
    assert!(mirror_decl.fields.iter().all(|f| !f.ty.has_forward()));
    let init = mirror_decl.memberwise_initializer().unwrap();
    assert!(init.params.iter().all(|p| !p.ty.has_forward()));

    let actions = session.trace().actions();
    assert!(actions.contains(&TraceAction::ForwardIssued));
    assert!(actions.contains(&TraceAction::ForwardPatched));
}

/// Mutual recursion through two classes, where the outer record later fails:
/// the inner mirror captured the outer forward handle and is rolled back.
#[test]
fn test_dependent_mirror_is_rolled_back() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    decls.add(unreachable_tangent());
    let a = decls.add(
        Record::class("A", true)
            .field(Field::new("b", Ty::con("B")))
            .field(Field::new("w", Ty::con("W")))
            .conforms(DIFF),
    );
    let b = decls.add(
        Record::class("B", true)
            .field(Field::new("a", Ty::con("A")))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::with_options(&table, &mut decls, DeriveOptions::traced());

    assert!(session.synthesize_mirror(a).is_err());
    assert_eq!(session.state(a, DIFF), DerivationState::Ineligible);
    assert_eq!(session.state(b, DIFF), DerivationState::NotChecked);
    assert!(session.mirror(b).is_none());
    assert_eq!(session.decls().by_name("B.TangentVector"), None);
    assert!(nested_tangents(session.decls(), b).is_empty());
    assert!(session.trace().actions().contains(&TraceAction::RolledBack));
}

/// Two records referring to each other both complete and point at each
/// other's final mirror.
#[test]
fn test_mutual_recursion_completes() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let a = decls.add(
        Record::class("A", true)
            .field(Field::new("b", Ty::con("B")))
            .conforms(DIFF),
    );
    let b = decls.add(
        Record::class("B", true)
            .field(Field::new("a", Ty::con("A")))
            .conforms(DIFF),
    );
    let mut session = DeriveSession::new(&table, &mut decls);
    let a_mirror = session.synthesize_mirror(a).unwrap();
    let b_mirror = session.synthesize_mirror(b).unwrap();

    let decls = session.decls();
    assert_eq!(decls.get(a_mirror.record.unwrap()).fields[0].ty, Ty::con("B.TangentVector"));
    assert_eq!(decls.get(b_mirror.record.unwrap()).fields[0].ty, Ty::con("A.TangentVector"));
}

// ── Whole-module derivation ────────────────────────────────────────────

#[test]
fn test_derive_all_installs_missing_members() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let a = decls.add(self_tangent("A"));
    decls.add(self_tangent("B"));
    let p = decls.add(
        Record::structure("P")
            .field(Field::new("x", Ty::con("A")))
            .field(Field::new("y", Ty::con("B")))
            .conforms(DIFF),
    );
    decls.add(
        Record::structure("V")
            .field(Field::new("x", Ty::float()))
            .conforms(KnownCapability::EuclideanDifferentiable),
    );

    let report = derive_all(&table, &mut decls, DeriveOptions::default());
    assert!(report.is_ok(), "{:?}", report.errors);

    // `A` and `B` bring their own tangent vector; only `move` is derived.
    let for_a: Vec<&SynthesizedMember> = report
        .members
        .iter()
        .filter(|(r, _)| *r == a)
        .map(|(_, m)| m)
        .collect();
    assert_eq!(for_a.len(), 1);
    assert!(matches!(for_a[0], SynthesizedMember::Method(_)));
    assert!(decls.get(a).method("move").is_some());

    // Only `V` declares `EuclideanDifferentiable`.
    let v = decls.by_name("V").unwrap();
    assert!(decls.get(p).method("move").is_some());
    assert!(decls.get(p).property("differentiableVectorView").is_none());
    assert!(decls.get(v).property("differentiableVectorView").is_some());
    assert_eq!(decls.by_name("P.TangentVector").map(|id| decls.get(id).parent), Some(Some(p)));
}

#[test]
fn test_derive_all_reports_and_continues() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    let w = decls.add(unreachable_tangent());
    let ok = decls.add(
        Record::structure("Ok")
            .field(Field::new("x", Ty::float()))
            .conforms(DIFF),
    );

    let report = derive_all(&table, &mut decls, DeriveOptions::default());
    assert!(!report.is_ok());
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(report.errors[0], DeriveError::DisallowedContext { .. }));
    assert!(decls.get(w).members.is_empty());
    assert!(decls.get(ok).method("move").is_some());
}

/// One offending extension yields one context error however many records
/// reach it through their fields.
#[test]
fn test_disallowed_context_reported_once() {
    let table = ConformanceTable::with_builtins();
    let mut decls = Decls::new();
    decls.add(unreachable_tangent());
    for name in ["Q", "R"] {
        decls.add(
            Record::structure(name)
                .field(Field::new("w", Ty::con("W")))
                .conforms(DIFF),
        );
    }

    let report = derive_all(&table, &mut decls, DeriveOptions::default());
    let disallowed = report
        .diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagnosticKind::DisallowedContext { .. }))
        .count();
    assert_eq!(disallowed, 1);
    assert_eq!(report.errors.len(), 3);
}

// ── Trace ──────────────────────────────────────────────────────────────

#[test]
fn test_trace_is_off_by_default() {
    let table = ConformanceTable::with_builtins();
    let (mut decls, p) = composite();
    let mut session = DeriveSession::new(&table, &mut decls);
    session.synthesize_move(p).unwrap();
    assert!(session.trace().is_empty());
}

#[test]
fn test_trace_serializes_steps() {
    let table = ConformanceTable::with_builtins();
    let (mut decls, p) = composite();
    let mut session = DeriveSession::with_options(&table, &mut decls, DeriveOptions::traced());
    session.synthesize_move(p).unwrap();

    let actions = session.trace().actions();
    let position = |action| actions.iter().position(|a| *a == action).unwrap();
    assert!(position(TraceAction::SelectFields) < position(TraceAction::MirrorBuilt));
    assert!(position(TraceAction::MirrorBuilt) < position(TraceAction::BodyEmitted));

    let json = serde_json::to_value(session.trace()).unwrap();
    let first = &json["steps"][0];
    assert_eq!(first["step"], 0);
    assert_eq!(first["record"], "P");
    assert_eq!(first["capability"], "Differentiable");
    assert_eq!(first["action"], "transition");
    assert_eq!(first["detail"], "NotChecked -> Eligible");

    let propagated = json["steps"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["action"] == "propagate")
        .unwrap();
    assert_eq!(propagated["detail"], "VectorProtocol");
}
