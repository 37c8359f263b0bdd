//! Secondary capability propagation onto mirror types.
//!
//! A mirror type claims a secondary capability only when every participating
//! field's tangent type already has it. `VectorProtocol` additionally needs a
//! non-empty field set whose tangents agree on a single scalar type.
//! `KeyPathIterable` follows the original record instead of the fields.

use tangent_ir::capability::{KnownCapability, VECTOR_SPACE_SCALAR};
use tangent_ir::decl::{Decls, RecordId};
use tangent_ir::ty::Ty;

use crate::host::Host;

/// Capabilities considered for every mirror, beyond `Differentiable` and
/// `AdditiveArithmetic`, in the order they are granted.
pub const SECONDARY: [KnownCapability; 4] = [
    KnownCapability::VectorProtocol,
    KnownCapability::PointwiseMultiplicative,
    KnownCapability::ElementaryFunctions,
    KnownCapability::KeyPathIterable,
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropagationResult {
    /// Granted capabilities, in candidate order.
    pub granted: Vec<KnownCapability>,
    /// The scalar shared by every tangent, when `VectorProtocol` is granted.
    pub shared_scalar: Option<Ty>,
}

impl PropagationResult {
    pub fn grants(&self, capability: KnownCapability) -> bool {
        self.granted.contains(&capability)
    }
}

/// The one scalar type every tangent declares, if they agree.
pub fn shared_scalar(host: &dyn Host, decls: &Decls, context: RecordId, tangents: &[Ty]) -> Option<Ty> {
    let mut shared: Option<Ty> = None;
    for tangent in tangents {
        let conformance = host.conforms_to(decls, context, tangent, KnownCapability::VectorProtocol)?;
        let scalar = conformance.known_witness(VECTOR_SPACE_SCALAR)?.clone();
        match &shared {
            None => shared = Some(scalar),
            Some(seen) if *seen == scalar => {}
            Some(seen) => {
                log::debug!("scalar mismatch: `{}` against `{}` on `{}`", seen, scalar, tangent);
                return None;
            }
        }
    }
    shared
}

/// Decide which of `candidates` a mirror with the given tangent field types
/// may claim. A pending (forward) tangent never conforms.
pub fn propagate(
    host: &dyn Host,
    decls: &Decls,
    context: RecordId,
    tangents: &[Ty],
    record_has_key_paths: bool,
    candidates: &[KnownCapability],
) -> PropagationResult {
    let mut result = PropagationResult::default();
    for &capability in candidates {
        let granted = match capability {
            KnownCapability::VectorProtocol => match shared_scalar(host, decls, context, tangents) {
                Some(scalar) => {
                    result.shared_scalar = Some(scalar);
                    true
                }
                None => false,
            },
            KnownCapability::KeyPathIterable => record_has_key_paths,
            _ => tangents
                .iter()
                .all(|t| !t.has_forward() && host.conforms_to(decls, context, t, capability).is_some()),
        };
        if granted {
            log::trace!("granting `{}` to mirror of record #{}", capability, context.0);
            result.granted.push(capability);
        }
    }
    result
}
