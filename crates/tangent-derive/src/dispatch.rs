//! Requirement dispatch.
//!
//! Maps a missing requirement to the capability that declares it, purely by
//! structural signature, and picks how a delegated call reaches each field's
//! implementation.

use tangent_ir::capability::{KnownCapability, Requirement};
use tangent_ir::decl::{Decls, RecordId};
use tangent_ir::synth::{Dispatch, RequirementRef};
use tangent_ir::ty::Ty;

use crate::host::Host;
use crate::registry;

/// A requirement matched to the capability declaring it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub capability: KnownCapability,
    /// The registered form of the requirement.
    pub requirement: Requirement,
}

/// Kind, base name, argument labels, and staticness must all agree.
/// Internal parameter names only count when both sides carry them.
fn signature_matches(registered: &Requirement, missing: &Requirement) -> bool {
    registered.kind == missing.kind
        && registered.name == missing.name
        && registered.is_static == missing.is_static
        && (missing.param_names.is_empty()
            || registered.param_names.is_empty()
            || registered.param_names == missing.param_names)
}

/// Find the capability declaring `requirement`. `None` means the requirement
/// is genuinely unimplemented and the host must report it.
pub fn resolve(requirement: &Requirement) -> Option<Match> {
    registry::rules().find_map(|rule| {
        rule.requirements
            .iter()
            .find(|registered| signature_matches(registered, requirement))
            .map(|registered| Match {
                capability: rule.capability,
                requirement: registered.clone(),
            })
    })
}

pub fn capability_of(requirement: &Requirement) -> Option<KnownCapability> {
    resolve(requirement).map(|m| m.capability)
}

/// How a call to `requirement` on a value of `field_ty` is reached: through
/// the concrete witness when the conformance is concretely known, through
/// the requirement otherwise. `None` if the type does not conform at all.
pub fn field_dispatch(
    host: &dyn Host,
    decls: &Decls,
    context: RecordId,
    field_ty: &Ty,
    capability: KnownCapability,
    requirement: &Requirement,
) -> Option<Dispatch> {
    let conformance = host.conforms_to(decls, context, field_ty, capability)?;
    let dispatch = match host.lookup_witness(decls, &conformance, requirement) {
        Some(witness) => Dispatch::Static(witness),
        None => Dispatch::ViaInterface(RequirementRef {
            capability,
            requirement: requirement.clone(),
        }),
    };
    Some(dispatch)
}
