//! Conformance table: the reference [`Host`] implementation.
//!
//! Library types (`Float`, `Array<T>`, ...) conform through registered
//! [`ConformanceDef`]s. Lookup is structural: the definition's type pattern is
//! freshened and unified against the query type, then its where clauses are
//! checked against the bound parameters. Records in [`Decls`] answer from their
//! declared conformances and member types; generic parameters answer from
//! their bounds with an abstract conformance.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use tangent_ir::capability::{DeclName, KnownCapability, Requirement, RequirementKind, TANGENT_VECTOR, VECTOR_SPACE_SCALAR};
use tangent_ir::decl::{ConformanceSite, Decls, Member, MemberType, Record, RecordId};
use tangent_ir::synth::Witness;
use tangent_ir::ty::Ty;

use crate::host::{Conformance, Host, TypeWitness};
use crate::registry;
use crate::unify::{substitute, MatchCtx};

/// A registered conformance: `impl_type: capability where ...`.
#[derive(Clone, Debug)]
pub struct ConformanceDef {
    pub capability: KnownCapability,
    /// Type pattern; `Ty::Param` entries are bound during matching.
    pub impl_type: Ty,
    /// A human-readable name for the implementing type.
    pub impl_type_name: String,
    /// Associated type bindings, may mention the pattern's parameters.
    pub type_witnesses: FxHashMap<String, Ty>,
    /// Members provided concretely.
    pub members: Vec<DeclName>,
    /// `(parameter, capability)` bounds the parameters must satisfy.
    pub where_clauses: Vec<(String, KnownCapability)>,
}

impl ConformanceDef {
    /// A definition providing every member the capability requires.
    pub fn new(capability: KnownCapability, impl_type: Ty) -> Self {
        let members = registry::requirements(capability)
            .iter()
            .filter(|r| r.kind != RequirementKind::AssociatedType)
            .map(|r| r.name.clone())
            .collect();
        ConformanceDef {
            capability,
            impl_type_name: impl_type.to_string(),
            impl_type,
            type_witnesses: FxHashMap::default(),
            members,
            where_clauses: Vec::new(),
        }
    }

    pub fn witness(mut self, name: &str, ty: Ty) -> Self {
        self.type_witnesses.insert(name.to_string(), ty);
        self
    }

    pub fn where_clause(mut self, param: &str, capability: KnownCapability) -> Self {
        self.where_clauses.push((param.to_string(), capability));
        self
    }
}

/// Two registered conformances of the same capability overlap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlapError {
    pub capability: KnownCapability,
    pub impl_type: String,
    pub existing: String,
}

impl fmt::Display for OverlapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conformance of `{}` to `{}` overlaps the one for `{}`",
            self.impl_type, self.capability, self.existing
        )
    }
}

impl std::error::Error for OverlapError {}

#[derive(Default, Debug)]
pub struct ConformanceTable {
    defs: FxHashMap<KnownCapability, Vec<ConformanceDef>>,
    fixed_layout: FxHashSet<String>,
}

impl ConformanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table seeded with the scalar and collection conformances of the
    /// standard library.
    pub fn with_builtins() -> Self {
        use KnownCapability::*;

        let mut table = Self::new();
        let mut defs = Vec::new();
        for scalar in [Ty::float(), Ty::double()] {
            defs.push(ConformanceDef::new(Differentiable, scalar.clone()).witness(TANGENT_VECTOR, scalar.clone()));
            defs.push(
                ConformanceDef::new(EuclideanDifferentiable, scalar.clone()).witness(TANGENT_VECTOR, scalar.clone()),
            );
            defs.push(ConformanceDef::new(AdditiveArithmetic, scalar.clone()));
            defs.push(ConformanceDef::new(VectorProtocol, scalar.clone()).witness(VECTOR_SPACE_SCALAR, scalar.clone()));
            defs.push(ConformanceDef::new(PointwiseMultiplicative, scalar.clone()));
            defs.push(ConformanceDef::new(ElementaryFunctions, scalar));
        }
        defs.push(ConformanceDef::new(AdditiveArithmetic, Ty::int()));

        let t = || Ty::param("T");
        let elements = Ty::array(t());
        defs.push(
            ConformanceDef::new(Differentiable, elements.clone())
                .witness(TANGENT_VECTOR, Ty::array(Ty::assoc(t(), TANGENT_VECTOR)))
                .where_clause("T", Differentiable),
        );
        defs.push(
            ConformanceDef::new(EuclideanDifferentiable, elements.clone())
                .witness(TANGENT_VECTOR, Ty::array(Ty::assoc(t(), TANGENT_VECTOR)))
                .where_clause("T", EuclideanDifferentiable),
        );
        defs.push(ConformanceDef::new(AdditiveArithmetic, elements.clone()).where_clause("T", AdditiveArithmetic));
        defs.push(
            ConformanceDef::new(VectorProtocol, elements)
                .witness(VECTOR_SPACE_SCALAR, Ty::assoc(t(), VECTOR_SPACE_SCALAR))
                .where_clause("T", VectorProtocol),
        );

        for def in defs {
            if let Err(err) = table.register(def) {
                log::error!("builtin conformance table: {}", err);
            }
        }
        for name in ["Float", "Double", "Int", "Bool"] {
            table.mark_fixed_layout(name);
        }
        table
    }

    /// Register a conformance. Rejects one that overlaps an existing
    /// conformance of the same capability.
    pub fn register(&mut self, def: ConformanceDef) -> Result<(), OverlapError> {
        let existing = self.defs.entry(def.capability).or_default();
        for other in existing.iter() {
            let mut ctx = MatchCtx::new();
            let mut params = FxHashMap::default();
            let a = ctx.freshen(&other.impl_type, &mut params);
            let mut params = FxHashMap::default();
            let b = ctx.freshen(&def.impl_type, &mut params);
            if ctx.unify(a, b).is_ok() {
                return Err(OverlapError {
                    capability: def.capability,
                    impl_type: def.impl_type_name.clone(),
                    existing: other.impl_type_name.clone(),
                });
            }
        }
        existing.push(def);
        Ok(())
    }

    pub fn mark_fixed_layout(&mut self, name: &str) {
        self.fixed_layout.insert(name.to_string());
    }

    /// Definitions for `capability` (or a refinement of it) whose pattern
    /// matches `ty`, with the pattern's parameter bindings.
    fn matching_defs<'t>(
        &'t self,
        ty: &'t Ty,
        capability: KnownCapability,
    ) -> impl Iterator<Item = (&'t ConformanceDef, FxHashMap<String, Ty>)> + 't {
        KnownCapability::ALL
            .into_iter()
            .filter(move |c| c.implies(capability))
            .filter_map(move |c| self.defs.get(&c))
            .flatten()
            .filter_map(move |def| {
                let mut ctx = MatchCtx::new();
                let mut params = FxHashMap::default();
                let pattern = ctx.freshen(&def.impl_type, &mut params);
                ctx.unify(pattern, ty.clone()).ok()?;
                let subst: FxHashMap<String, Ty> =
                    params.into_iter().map(|(name, var)| (name, ctx.resolve(var))).collect();
                Some((def, subst))
            })
    }

    fn def_conformance(&self, decls: &Decls, context: RecordId, ty: &Ty, capability: KnownCapability) -> Option<Conformance> {
        self.matching_defs(ty, capability).find_map(|(def, subst)| {
            let satisfied = def.where_clauses.iter().all(|(param, bound)| {
                subst
                    .get(param)
                    .is_some_and(|arg| self.conforms_to(decls, context, arg, *bound).is_some())
            });
            if !satisfied {
                return None;
            }
            let mut conformance = Conformance::new(capability, ty.clone(), true);
            for assoc in capability.associated_types() {
                if let Some(witness) = def.type_witnesses.get(*assoc) {
                    let witness = self.normalize(decls, context, &substitute(witness, &subst));
                    conformance = conformance.with_witness(assoc, TypeWitness::Known(witness));
                }
            }
            Some(conformance)
        })
    }

    fn record_conformance(
        &self,
        decls: &Decls,
        context: RecordId,
        record: &Record,
        ty: &Ty,
        capability: KnownCapability,
    ) -> Option<Conformance> {
        let declared = record.conformances.iter().find(|c| c.capability.implies(capability))?;
        let subst: FxHashMap<String, Ty> = record
            .generic_params
            .iter()
            .map(|p| p.name.clone())
            .zip(ty.type_args().iter().cloned())
            .collect();

        if let ConformanceSite::Extension { generic_requirements, .. } = &declared.site {
            for (param, bound) in generic_requirements {
                let arg = subst.get(param).cloned().unwrap_or_else(|| Ty::param(param.clone()));
                self.conforms_to(decls, context, &arg, *bound)?;
            }
        }

        let mut conformance = Conformance::new(capability, ty.clone(), true);
        for assoc in capability.associated_types() {
            let witness = match record.member_types(assoc, decls).first() {
                Some(MemberType::Alias { target, .. }) => {
                    TypeWitness::Known(self.normalize(decls, context, &substitute(target, &subst)))
                }
                Some(MemberType::Nested(id)) => TypeWitness::Known(substitute(&decls.get(*id).declared_ty(), &subst)),
                None => TypeWitness::Derived,
            };
            conformance = conformance.with_witness(assoc, witness);
        }
        Some(conformance)
    }

    /// An abstract conformance whose associated types are projections off `ty`.
    fn abstract_conformance(ty: &Ty, capability: KnownCapability) -> Conformance {
        let mut conformance = Conformance::new(capability, ty.clone(), false);
        for assoc in capability.associated_types() {
            conformance = conformance.with_witness(assoc, TypeWitness::Known(Ty::assoc(ty.clone(), *assoc)));
        }
        conformance
    }

    fn param_conformance(&self, decls: &Decls, context: RecordId, name: &str, capability: KnownCapability) -> Option<Conformance> {
        let mut scope = Some(context);
        while let Some(id) = scope {
            let record = decls.get(id);
            if let Some(param) = record.generic_param(name) {
                let bounded = param.bounds.iter().any(|b| b.implies(capability));
                return bounded.then(|| Self::abstract_conformance(&Ty::param(name), capability));
            }
            scope = record.parent;
        }
        None
    }

    /// Conformances of an irreducible projection such as `T.TangentVector`.
    fn projection_conformance(ty: &Ty, assoc: &str, capability: KnownCapability) -> Option<Conformance> {
        match (assoc, capability) {
            // A tangent vector is its own tangent vector.
            (TANGENT_VECTOR, KnownCapability::Differentiable) => Some(
                Conformance::new(capability, ty.clone(), false)
                    .with_witness(TANGENT_VECTOR, TypeWitness::Known(ty.clone())),
            ),
            (TANGENT_VECTOR, KnownCapability::AdditiveArithmetic)
            | (VECTOR_SPACE_SCALAR, KnownCapability::AdditiveArithmetic) => {
                Some(Conformance::new(capability, ty.clone(), false))
            }
            _ => None,
        }
    }

    /// Rewrite associated type projections on concrete bases to their witnesses.
    pub fn normalize(&self, decls: &Decls, context: RecordId, ty: &Ty) -> Ty {
        match ty {
            Ty::Assoc(base, name) => {
                let base = self.normalize(decls, context, base);
                if name == TANGENT_VECTOR && matches!(&base, Ty::Assoc(_, inner) if inner == TANGENT_VECTOR) {
                    return base;
                }
                let projection = || Ty::assoc(base.clone(), name.clone());
                if matches!(base, Ty::Param(_) | Ty::Assoc(..) | Ty::Var(_) | Ty::Forward(_)) {
                    return projection();
                }
                let Some(owner) = KnownCapability::owning_associated_type(name) else {
                    return projection();
                };
                self.conforms_to(decls, context, &base, owner)
                    .and_then(|c| c.known_witness(name).cloned())
                    .unwrap_or_else(projection)
            }
            Ty::App(con, args) => Ty::App(
                Box::new(self.normalize(decls, context, con)),
                args.iter().map(|a| self.normalize(decls, context, a)).collect(),
            ),
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| self.normalize(decls, context, e)).collect()),
            Ty::Fun(params, ret) => Ty::Fun(
                params.iter().map(|p| self.normalize(decls, context, p)).collect(),
                Box::new(self.normalize(decls, context, ret)),
            ),
            other => other.clone(),
        }
    }
}

fn member_implements(member: &Member, requirement: &Requirement) -> Option<bool> {
    match member {
        Member::Method(func) if func.name == requirement.name => Some(func.implicit),
        Member::Property(prop) if requirement.name.is_simple() && prop.name == requirement.name.base => {
            Some(prop.implicit)
        }
        _ => None,
    }
}

impl Host for ConformanceTable {
    fn conforms_to(&self, decls: &Decls, context: RecordId, ty: &Ty, capability: KnownCapability) -> Option<Conformance> {
        let ty = self.normalize(decls, context, ty);
        match &ty {
            Ty::Var(_) | Ty::Forward(_) | Ty::Fun(..) => None,
            Ty::Param(name) => self.param_conformance(decls, context, name, capability),
            Ty::Assoc(_, assoc) => Self::projection_conformance(&ty, assoc, capability),
            _ => match decls.record_of(&ty) {
                Some(id) => self.record_conformance(decls, context, decls.get(id), &ty, capability),
                None => self.def_conformance(decls, context, &ty, capability),
            },
        }
    }

    fn lookup_witness(&self, decls: &Decls, conformance: &Conformance, requirement: &Requirement) -> Option<Witness> {
        if !conformance.concrete {
            return None;
        }
        let witness = |synthesized| Witness {
            owner: conformance.ty.clone(),
            capability: conformance.capability,
            name: requirement.name.clone(),
            synthesized,
        };
        if let Some(id) = decls.record_of(&conformance.ty) {
            // Without a declared member the witness comes from derivation.
            let implicit = decls
                .get(id)
                .members
                .iter()
                .find_map(|m| member_implements(m, requirement))
                .unwrap_or(true);
            return Some(witness(implicit));
        }
        self.matching_defs(&conformance.ty, conformance.capability)
            .find(|(def, _)| def.members.contains(&requirement.name))
            .map(|_| witness(false))
    }

    fn has_fixed_layout(&self, decls: &Decls, ty: &Ty) -> bool {
        match ty {
            Ty::Tuple(elems) => elems.iter().all(|e| self.has_fixed_layout(decls, e)),
            Ty::Con(_) | Ty::App(..) => match decls.record_of(ty) {
                Some(id) => decls.get(id).fixed_layout,
                None => ty.head_name().is_some_and(|name| self.fixed_layout.contains(name)),
            },
            _ => false,
        }
    }
}
