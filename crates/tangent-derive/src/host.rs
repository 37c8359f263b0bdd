//! The boundary with the host type checker.
//!
//! The engine never decides on its own whether an arbitrary type satisfies a
//! capability. It asks a [`Host`], treating the answer as an oracle. The
//! in-crate [`ConformanceTable`](crate::table::ConformanceTable) is the
//! reference implementation.

use rustc_hash::FxHashMap;

use tangent_ir::capability::{KnownCapability, Requirement};
use tangent_ir::decl::{Decls, RecordId};
use tangent_ir::synth::Witness;
use tangent_ir::ty::Ty;

/// The binding of an associated type inside a conformance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeWitness {
    /// The associated type is known.
    Known(Ty),
    /// The associated type is produced by derivation and has not been
    /// synthesized yet.
    Derived,
}

/// Evidence that a type satisfies a capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conformance {
    pub capability: KnownCapability,
    /// The type that conforms.
    pub ty: Ty,
    /// False when the conformance is only known abstractly, e.g. through a
    /// generic parameter's bound. Witness lookup then falls back to
    /// interface dispatch.
    pub concrete: bool,
    pub type_witnesses: FxHashMap<String, TypeWitness>,
}

impl Conformance {
    pub fn new(capability: KnownCapability, ty: Ty, concrete: bool) -> Self {
        Conformance {
            capability,
            ty,
            concrete,
            type_witnesses: FxHashMap::default(),
        }
    }

    pub fn with_witness(mut self, name: &str, witness: TypeWitness) -> Self {
        self.type_witnesses.insert(name.to_string(), witness);
        self
    }

    pub fn type_witness(&self, name: &str) -> Option<&TypeWitness> {
        self.type_witnesses.get(name)
    }

    /// The witness for `name` if it is already known.
    pub fn known_witness(&self, name: &str) -> Option<&Ty> {
        match self.type_witnesses.get(name) {
            Some(TypeWitness::Known(ty)) => Some(ty),
            _ => None,
        }
    }
}

/// Conformance oracle supplied by the host type checker.
pub trait Host {
    /// Does `ty`, as seen from inside `context`, satisfy `capability`?
    ///
    /// `context` supplies the generic environment: a `Ty::Param` is answered
    /// from the bounds of the context record's generic parameters.
    fn conforms_to(
        &self,
        decls: &Decls,
        context: RecordId,
        ty: &Ty,
        capability: KnownCapability,
    ) -> Option<Conformance>;

    /// The concrete member implementing `requirement` for a conformance.
    ///
    /// Returns `None` for abstract conformances; callers then dispatch
    /// through the requirement itself.
    fn lookup_witness(
        &self,
        decls: &Decls,
        conformance: &Conformance,
        requirement: &Requirement,
    ) -> Option<Witness>;

    /// Whether values of `ty` have a frozen memory layout.
    fn has_fixed_layout(&self, decls: &Decls, ty: &Ty) -> bool;
}
