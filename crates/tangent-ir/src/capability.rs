//! Capabilities (interface contracts) and their requirements.
//!
//! A capability is identified by a `KnownCapability`; its requirements are
//! matched purely by structural signature: requirement kind, base name, and
//! argument labels.

use std::fmt;

use serde::Serialize;

/// The capabilities the derivation engine knows about.
///
/// `Differentiable` is the base capability. The others are either refinements
/// (`EuclideanDifferentiable`), the mandatory prerequisite of every mirror type
/// (`AdditiveArithmetic`), or secondary capabilities a mirror type may claim
/// through propagation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum KnownCapability {
    Differentiable,
    EuclideanDifferentiable,
    AdditiveArithmetic,
    VectorProtocol,
    PointwiseMultiplicative,
    ElementaryFunctions,
    KeyPathIterable,
}

impl KnownCapability {
    pub const ALL: [KnownCapability; 7] = [
        KnownCapability::Differentiable,
        KnownCapability::EuclideanDifferentiable,
        KnownCapability::AdditiveArithmetic,
        KnownCapability::VectorProtocol,
        KnownCapability::PointwiseMultiplicative,
        KnownCapability::ElementaryFunctions,
        KnownCapability::KeyPathIterable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KnownCapability::Differentiable => "Differentiable",
            KnownCapability::EuclideanDifferentiable => "EuclideanDifferentiable",
            KnownCapability::AdditiveArithmetic => "AdditiveArithmetic",
            KnownCapability::VectorProtocol => "VectorProtocol",
            KnownCapability::PointwiseMultiplicative => "PointwiseMultiplicative",
            KnownCapability::ElementaryFunctions => "ElementaryFunctions",
            KnownCapability::KeyPathIterable => "KeyPathIterable",
        }
    }

    pub fn from_name(name: &str) -> Option<KnownCapability> {
        KnownCapability::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Capabilities this one refines. A type conforming to `self` also
    /// conforms to each of these.
    pub fn inherited(self) -> &'static [KnownCapability] {
        match self {
            KnownCapability::EuclideanDifferentiable => &[KnownCapability::Differentiable],
            KnownCapability::VectorProtocol | KnownCapability::PointwiseMultiplicative => {
                &[KnownCapability::AdditiveArithmetic]
            }
            _ => &[],
        }
    }

    /// Whether conforming to `self` entails conforming to `other`.
    pub fn implies(self, other: KnownCapability) -> bool {
        self == other || self.inherited().contains(&other)
    }

    /// Associated types visible through a conformance to this capability,
    /// including those of refined capabilities.
    pub fn associated_types(self) -> &'static [&'static str] {
        match self {
            KnownCapability::Differentiable | KnownCapability::EuclideanDifferentiable => &[TANGENT_VECTOR],
            KnownCapability::VectorProtocol => &[VECTOR_SPACE_SCALAR],
            KnownCapability::KeyPathIterable => &[ALL_KEY_PATHS],
            _ => &[],
        }
    }

    /// The capability that declares the named associated type, if any.
    pub fn owning_associated_type(assoc_name: &str) -> Option<KnownCapability> {
        match assoc_name {
            TANGENT_VECTOR => Some(KnownCapability::Differentiable),
            VECTOR_SPACE_SCALAR => Some(KnownCapability::VectorProtocol),
            ALL_KEY_PATHS => Some(KnownCapability::KeyPathIterable),
            _ => None,
        }
    }
}

impl fmt::Display for KnownCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `Differentiable.TangentVector`.
pub const TANGENT_VECTOR: &str = "TangentVector";
/// `VectorProtocol.VectorSpaceScalar`.
pub const VECTOR_SPACE_SCALAR: &str = "VectorSpaceScalar";
/// `KeyPathIterable.AllKeyPaths`.
pub const ALL_KEY_PATHS: &str = "AllKeyPaths";

/// A declaration name: a base name plus, for compound names, its argument labels.
///
/// An empty label stands for an unlabeled argument and prints as `_`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeclName {
    pub base: String,
    pub labels: Option<Vec<String>>,
}

impl DeclName {
    pub fn simple(base: impl Into<String>) -> Self {
        DeclName { base: base.into(), labels: None }
    }

    pub fn compound(base: impl Into<String>, labels: &[&str]) -> Self {
        DeclName {
            base: base.into(),
            labels: Some(labels.iter().map(|l| l.to_string()).collect()),
        }
    }

    pub fn is_simple(&self) -> bool {
        self.labels.is_none()
    }

    pub fn labels(&self) -> &[String] {
        self.labels.as_deref().unwrap_or(&[])
    }

    pub fn arity(&self) -> usize {
        self.labels().len()
    }
}

impl fmt::Display for DeclName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if let Some(labels) = &self.labels {
            write!(f, "(")?;
            for label in labels {
                if label.is_empty() {
                    write!(f, "_:")?;
                } else {
                    write!(f, "{}:", label)?;
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// What sort of member a requirement names.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RequirementKind {
    Property,
    Method,
    Operator,
    Initializer,
    AssociatedType,
}

/// One member a capability mandates.
///
/// The parameter and return shape is opaque here; matching looks at the
/// kind, the name, and staticness. Internal parameter names are only consulted
/// to tell apart overloads whose labels coincide (`pow(_ x:_ y:)` against
/// `pow(_ x:_ n:)`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub kind: RequirementKind,
    pub name: DeclName,
    pub is_static: bool,
    pub param_names: Vec<String>,
}

impl Requirement {
    pub fn associated_type(name: &str) -> Self {
        Requirement {
            kind: RequirementKind::AssociatedType,
            name: DeclName::simple(name),
            is_static: false,
            param_names: Vec::new(),
        }
    }

    pub fn property(name: &str) -> Self {
        Requirement {
            kind: RequirementKind::Property,
            name: DeclName::simple(name),
            is_static: false,
            param_names: Vec::new(),
        }
    }

    pub fn static_property(name: &str) -> Self {
        Requirement {
            kind: RequirementKind::Property,
            name: DeclName::simple(name),
            is_static: true,
            param_names: Vec::new(),
        }
    }

    pub fn method(base: &str, labels: &[&str]) -> Self {
        Requirement {
            kind: RequirementKind::Method,
            name: DeclName::compound(base, labels),
            is_static: false,
            param_names: Vec::new(),
        }
    }

    pub fn static_method(base: &str, labels: &[&str]) -> Self {
        Requirement {
            kind: RequirementKind::Method,
            name: DeclName::compound(base, labels),
            is_static: true,
            param_names: Vec::new(),
        }
    }

    /// A binary (or unary, with `arity == 1`) operator with unlabeled operands.
    pub fn operator(symbol: &str, arity: usize) -> Self {
        Requirement {
            kind: RequirementKind::Operator,
            name: DeclName {
                base: symbol.to_string(),
                labels: Some(vec![String::new(); arity]),
            },
            is_static: true,
            param_names: Vec::new(),
        }
    }

    /// Attach internal parameter names, for overloads that share labels.
    pub fn with_param_names(mut self, names: &[&str]) -> Self {
        self.param_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn initializer(labels: &[&str]) -> Self {
        Requirement {
            kind: RequirementKind::Initializer,
            name: DeclName::compound("init", labels),
            is_static: false,
            param_names: Vec::new(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RequirementKind::AssociatedType => write!(f, "associatedtype {}", self.name),
            RequirementKind::Property if self.is_static => write!(f, "static var {}", self.name),
            RequirementKind::Property => write!(f, "var {}", self.name),
            RequirementKind::Operator => write!(f, "static func {}", self.name),
            RequirementKind::Initializer => write!(f, "{}", self.name),
            RequirementKind::Method if self.is_static => write!(f, "static func {}", self.name),
            RequirementKind::Method => write!(f, "func {}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_names_print_labels() {
        assert_eq!(DeclName::compound("move", &["along"]).to_string(), "move(along:)");
        assert_eq!(DeclName::compound("adding", &[""]).to_string(), "adding(_:)");
        assert_eq!(DeclName::simple("zero").to_string(), "zero");
        assert_eq!(Requirement::operator("+", 2).to_string(), "static func +(_:_:)");
    }

    #[test]
    fn associated_types_map_to_owning_capability() {
        assert_eq!(
            KnownCapability::owning_associated_type(TANGENT_VECTOR),
            Some(KnownCapability::Differentiable)
        );
        assert_eq!(
            KnownCapability::owning_associated_type(VECTOR_SPACE_SCALAR),
            Some(KnownCapability::VectorProtocol)
        );
        assert_eq!(KnownCapability::owning_associated_type("Element"), None);
    }

    #[test]
    fn refinements_imply_their_base() {
        assert!(KnownCapability::EuclideanDifferentiable.implies(KnownCapability::Differentiable));
        assert!(KnownCapability::VectorProtocol.implies(KnownCapability::AdditiveArithmetic));
        assert!(!KnownCapability::Differentiable.implies(KnownCapability::AdditiveArithmetic));
        assert_eq!(
            KnownCapability::EuclideanDifferentiable.associated_types(),
            &[TANGENT_VECTOR]
        );
    }

    #[test]
    fn capability_names_round_trip() {
        for cap in KnownCapability::ALL {
            assert_eq!(KnownCapability::from_name(cap.name()), Some(cap));
        }
        assert_eq!(KnownCapability::from_name("Hashable"), None);
    }
}
