//! Record declarations and the declaration arena.
//!
//! Records are immutable once declared except for monotonic additions:
//! synthesized members, synthesized conformances, and derivative attributes
//! on field getters. The arena never removes a record; a synthesized record
//! whose synthesis is rolled back is marked `retracted` instead.

use std::fmt;

use rowan::TextRange;
use rustc_hash::FxHashMap;

use crate::capability::KnownCapability;
use crate::synth::{FuncDecl, InitializerDecl, PropertyDecl, TypeAliasDecl};
use crate::ty::Ty;

/// Index of a record in [`Decls`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u32);

/// The source file a declaration lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FileId(pub u32);

/// Effective access level. Ordered from least to most visible.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Visibility {
    Private,
    FilePrivate,
    Internal,
    Public,
    Open,
}

impl Visibility {
    /// Visible outside the defining module.
    pub fn is_exported(self) -> bool {
        self > Visibility::Internal
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Visibility::Private => "private",
            Visibility::FilePrivate => "fileprivate",
            Visibility::Internal => "internal",
            Visibility::Public => "public",
            Visibility::Open => "open",
        };
        f.write_str(text)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// A value type.
    Struct,
    /// A reference type.
    Class { is_final: bool },
}

impl RecordKind {
    pub fn is_value(self) -> bool {
        matches!(self, RecordKind::Struct)
    }

    pub fn is_reference(self) -> bool {
        matches!(self, RecordKind::Class { .. })
    }
}

/// Marks a field getter as differentiable, so external callers can reach its
/// derivative through the original field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivativeAttr {
    pub implicit: bool,
    /// Differentiability parameter indices of the getter (`self` is 0).
    pub parameter_indices: Vec<usize>,
    /// Conditional requirements copied from an extension conformance site.
    pub requirements: Vec<(String, KnownCapability)>,
}

/// A stored field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Ty,
    pub mutable: bool,
    pub has_initializer: bool,
    /// Explicit `@noDerivative`.
    pub excluded: bool,
    pub visibility: Visibility,
    pub span: TextRange,
    pub getter_derivative: Option<DerivativeAttr>,
}

impl Field {
    /// A mutable, internal field without an initial value.
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Field {
            name: name.into(),
            ty,
            mutable: true,
            has_initializer: false,
            excluded: false,
            visibility: Visibility::Internal,
            span: TextRange::default(),
            getter_derivative: None,
        }
    }

    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    pub fn with_initializer(mut self) -> Self {
        self.has_initializer = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_span(mut self, span: TextRange) -> Self {
        self.span = span;
        self
    }

    pub fn with_getter_derivative(mut self, attr: DerivativeAttr) -> Self {
        self.getter_derivative = Some(attr);
        self
    }
}

/// A generic parameter with its capability bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericParam {
    pub name: String,
    pub bounds: Vec<KnownCapability>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConformanceOrigin {
    /// Written by the user.
    Explicit,
    /// Attached by the synthesis engine.
    Synthesized,
}

/// Where a conformance is declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConformanceSite {
    /// On the record declaration itself.
    Primary,
    /// In an extension, possibly in another file and with conditional requirements.
    Extension {
        file: FileId,
        span: TextRange,
        generic_requirements: Vec<(String, KnownCapability)>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredConformance {
    pub capability: KnownCapability,
    pub origin: ConformanceOrigin,
    pub site: ConformanceSite,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Member {
    TypeAlias(TypeAliasDecl),
    NestedRecord(RecordId),
    Method(FuncDecl),
    Property(PropertyDecl),
    Initializer(InitializerDecl),
}

/// A member type found by name lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemberType {
    Alias { target: Ty, implicit: bool },
    Nested(RecordId),
}

/// A user-defined (or synthesized) record type.
#[derive(Clone, Debug)]
pub struct Record {
    pub id: RecordId,
    /// Fully qualified name, e.g. `Point` or `Point.TangentVector`.
    pub name: String,
    pub kind: RecordKind,
    pub fields: Vec<Field>,
    pub generic_params: Vec<GenericParam>,
    pub visibility: Visibility,
    pub file: FileId,
    pub span: TextRange,
    /// Enclosing record, for nested declarations.
    pub parent: Option<RecordId>,
    /// Produced by the synthesis engine.
    pub implicit: bool,
    pub fixed_layout: bool,
    pub retracted: bool,
    pub conformances: Vec<DeclaredConformance>,
    pub members: Vec<Member>,
}

impl Record {
    pub fn new(name: impl Into<String>, kind: RecordKind) -> Self {
        Record {
            id: RecordId(u32::MAX),
            name: name.into(),
            kind,
            fields: Vec::new(),
            generic_params: Vec::new(),
            visibility: Visibility::Internal,
            file: FileId::default(),
            span: TextRange::default(),
            parent: None,
            implicit: false,
            fixed_layout: false,
            retracted: false,
            conformances: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn structure(name: impl Into<String>) -> Self {
        Record::new(name, RecordKind::Struct)
    }

    pub fn class(name: impl Into<String>, is_final: bool) -> Self {
        Record::new(name, RecordKind::Class { is_final })
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn generic(mut self, name: impl Into<String>, bounds: &[KnownCapability]) -> Self {
        self.generic_params.push(GenericParam {
            name: name.into(),
            bounds: bounds.to_vec(),
        });
        self
    }

    pub fn conforms(mut self, capability: KnownCapability) -> Self {
        self.conformances.push(DeclaredConformance {
            capability,
            origin: ConformanceOrigin::Explicit,
            site: ConformanceSite::Primary,
        });
        self
    }

    pub fn conforms_in_extension(
        mut self,
        capability: KnownCapability,
        file: FileId,
        generic_requirements: Vec<(String, KnownCapability)>,
    ) -> Self {
        self.conformances.push(DeclaredConformance {
            capability,
            origin: ConformanceOrigin::Explicit,
            site: ConformanceSite::Extension {
                file,
                span: TextRange::default(),
                generic_requirements,
            },
        });
        self
    }

    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn in_file(mut self, file: FileId) -> Self {
        self.file = file;
        self
    }

    pub fn with_span(mut self, span: TextRange) -> Self {
        self.span = span;
        self
    }

    pub fn with_fixed_layout(mut self) -> Self {
        self.fixed_layout = true;
        self
    }

    /// The unqualified name: `TangentVector` for `Point.TangentVector`.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// The record's type inside its own declaration context.
    pub fn declared_ty(&self) -> Ty {
        if self.generic_params.is_empty() {
            Ty::con(self.name.clone())
        } else {
            Ty::app(
                self.name.clone(),
                self.generic_params.iter().map(|p| Ty::param(p.name.clone())).collect(),
            )
        }
    }

    pub fn declares_conformance(&self, capability: KnownCapability) -> bool {
        self.conformances.iter().any(|c| c.capability == capability)
    }

    pub fn conformance(&self, capability: KnownCapability) -> Option<&DeclaredConformance> {
        self.conformances.iter().find(|c| c.capability == capability)
    }

    pub fn generic_param(&self, name: &str) -> Option<&GenericParam> {
        self.generic_params.iter().find(|p| p.name == name)
    }

    /// Member types with the given simple name, in declaration order.
    pub fn member_types(&self, name: &str, decls: &Decls) -> Vec<MemberType> {
        self.members
            .iter()
            .filter_map(|member| match member {
                Member::TypeAlias(alias) if alias.name == name => Some(MemberType::Alias {
                    target: alias.target.clone(),
                    implicit: alias.implicit,
                }),
                Member::NestedRecord(id) => {
                    let nested = decls.get(*id);
                    (!nested.retracted && nested.simple_name() == name).then_some(MemberType::Nested(*id))
                }
                _ => None,
            })
            .collect()
    }

    pub fn memberwise_initializer(&self) -> Option<&InitializerDecl> {
        self.members.iter().find_map(|member| match member {
            Member::Initializer(init) if init.memberwise => Some(init),
            _ => None,
        })
    }

    pub fn method(&self, base: &str) -> Option<&FuncDecl> {
        self.members.iter().find_map(|member| match member {
            Member::Method(func) if func.name.base == base => Some(func),
            _ => None,
        })
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDecl> {
        self.members.iter().find_map(|member| match member {
            Member::Property(prop) if prop.name == name => Some(prop),
            _ => None,
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RecordKind::Struct => write!(f, "struct {}", self.name)?,
            RecordKind::Class { is_final: true } => write!(f, "final class {}", self.name)?,
            RecordKind::Class { is_final: false } => write!(f, "class {}", self.name)?,
        }
        if !self.generic_params.is_empty() {
            let params: Vec<String> = self
                .generic_params
                .iter()
                .map(|p| {
                    if p.bounds.is_empty() {
                        p.name.clone()
                    } else {
                        let bounds: Vec<&str> = p.bounds.iter().map(|b| b.name()).collect();
                        format!("{}: {}", p.name, bounds.join(" & "))
                    }
                })
                .collect();
            write!(f, "<{}>", params.join(", "))?;
        }
        if !self.conformances.is_empty() {
            let caps: Vec<&str> = self.conformances.iter().map(|c| c.capability.name()).collect();
            write!(f, ": {}", caps.join(", "))?;
        }
        writeln!(f, " {{")?;
        for field in &self.fields {
            let introducer = if field.mutable { "var" } else { "let" };
            writeln!(f, "    {} {}: {}", introducer, field.name, field.ty)?;
        }
        for member in &self.members {
            let text = match member {
                Member::TypeAlias(alias) => alias.to_string(),
                Member::NestedRecord(_) => continue,
                Member::Method(func) => func.to_string(),
                Member::Property(prop) => prop.to_string(),
                Member::Initializer(init) => init.to_string(),
            };
            for line in text.lines() {
                writeln!(f, "    {}", line)?;
            }
        }
        write!(f, "}}")
    }
}

/// Arena of all records visible to a derivation session.
#[derive(Default, Debug)]
pub struct Decls {
    records: Vec<Record>,
    by_name: FxHashMap<String, RecordId>,
}

impl Decls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, assigning its id. A later record with the same name
    /// shadows the earlier one for name lookup.
    pub fn add(&mut self, mut record: Record) -> RecordId {
        let id = RecordId(self.records.len() as u32);
        record.id = id;
        self.by_name.insert(record.name.clone(), id);
        self.records.push(record);
        id
    }

    pub fn get(&self, id: RecordId) -> &Record {
        &self.records[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: RecordId) -> &mut Record {
        &mut self.records[id.0 as usize]
    }

    pub fn by_name(&self, name: &str) -> Option<RecordId> {
        self.by_name
            .get(name)
            .copied()
            .filter(|id| !self.get(*id).retracted)
    }

    /// The record a type refers to, looking through type arguments.
    pub fn record_of(&self, ty: &Ty) -> Option<RecordId> {
        self.by_name(ty.head_name()?)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Visibility of a member of `id` declared with `declared`, capped by
    /// the record and every record enclosing it.
    pub fn effective_visibility(&self, id: RecordId, declared: Visibility) -> Visibility {
        let mut visibility = declared;
        let mut current = Some(id);
        while let Some(record) = current.map(|id| self.get(id)) {
            visibility = visibility.min(record.visibility);
            current = record.parent;
        }
        visibility
    }

    /// Append a member to a record.
    pub fn install_member(&mut self, id: RecordId, member: Member) {
        self.get_mut(id).members.push(member);
    }

    /// Append a synthesized conformance unless the record already declares it.
    pub fn add_synthesized_conformance(&mut self, id: RecordId, capability: KnownCapability) {
        let record = self.get_mut(id);
        if !record.declares_conformance(capability) {
            record.conformances.push(DeclaredConformance {
                capability,
                origin: ConformanceOrigin::Synthesized,
                site: ConformanceSite::Primary,
            });
        }
    }

    /// Detach a synthesized record: flag it retracted and drop it (and any
    /// implicit alias naming it) from its parent's members.
    pub fn retract(&mut self, id: RecordId) {
        let ty = self.get(id).declared_ty();
        let parent = self.get(id).parent;
        self.get_mut(id).retracted = true;
        if let Some(parent) = parent {
            self.get_mut(parent).members.retain(|member| match member {
                Member::NestedRecord(nested) => *nested != id,
                Member::TypeAlias(alias) => !(alias.implicit && alias.target == ty),
                _ => true,
            });
        }
    }
}
