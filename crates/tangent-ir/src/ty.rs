//! Type representation for derived conformance synthesis.
//!
//! Defines the `Ty` enum, type constructors (`TyCon`), inference variables
//! (`TyVar`), and forward handles (`ForwardId`) used while a mirror type is
//! still being built. Types are structural: two types are equal when their
//! constructors and arguments are equal.

use std::fmt;

/// A type variable, identified by a `u32` index into a unification table.
///
/// Variables only appear transiently, when a generic conformance pattern is
/// matched against a concrete query type. The `ena` crate handles the
/// union-find mechanics.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TyVar(pub u32);

/// A forward reference to a mirror type whose synthesis has not finished.
///
/// Handed out to re-entrant requests and patched to the final mirror type
/// once the owning synthesis completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForwardId(pub u32);

/// A type constructor -- a named type like `Float`, `Array`, or `Point.TangentVector`.
///
/// Nested types carry their fully qualified name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TyCon {
    pub name: String,
}

impl TyCon {
    pub fn new(name: impl Into<String>) -> Self {
        TyCon { name: name.into() }
    }
}

impl fmt::Display for TyCon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A type as seen by the synthesis engine.
///
/// - `Var`: an inference variable (conformance matching only)
/// - `Con`: a nominal type without arguments (`Float`, `Point`)
/// - `App`: a generic nominal type applied to arguments (`Array<Float>`)
/// - `Tuple`: a tuple type; the empty tuple is `Unit`
/// - `Fun`: a function type
/// - `Param`: a generic parameter of the enclosing record (`T`)
/// - `Assoc`: an associated type projection (`T.TangentVector`)
/// - `Forward`: a mirror type still under construction
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    Var(TyVar),
    Con(TyCon),
    App(Box<Ty>, Vec<Ty>),
    Tuple(Vec<Ty>),
    Fun(Vec<Ty>, Box<Ty>),
    Param(String),
    Assoc(Box<Ty>, String),
    Forward(ForwardId),
}

impl Ty {
    /// Create a nominal type by name.
    pub fn con(name: impl Into<String>) -> Ty {
        Ty::Con(TyCon::new(name))
    }

    /// Create a generic nominal type applied to arguments.
    pub fn app(name: impl Into<String>, args: Vec<Ty>) -> Ty {
        Ty::App(Box::new(Ty::con(name)), args)
    }

    /// Create a `Float` type.
    pub fn float() -> Ty {
        Ty::con("Float")
    }

    /// Create a `Double` type.
    pub fn double() -> Ty {
        Ty::con("Double")
    }

    /// Create an `Int` type.
    pub fn int() -> Ty {
        Ty::con("Int")
    }

    /// Create a `String` type.
    pub fn string() -> Ty {
        Ty::con("String")
    }

    /// The empty tuple.
    pub fn unit() -> Ty {
        Ty::Tuple(Vec::new())
    }

    /// Create an `Array<T>` type.
    pub fn array(inner: Ty) -> Ty {
        Ty::app("Array", vec![inner])
    }

    /// Create a generic parameter reference.
    pub fn param(name: impl Into<String>) -> Ty {
        Ty::Param(name.into())
    }

    /// Create an associated type projection `base.name`.
    pub fn assoc(base: Ty, name: impl Into<String>) -> Ty {
        Ty::Assoc(Box::new(base), name.into())
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Ty::Tuple(elems) if elems.is_empty())
    }

    /// The nominal head of this type: `Array` for `Array<Float>`, `Point` for `Point`.
    pub fn head_name(&self) -> Option<&str> {
        match self {
            Ty::Con(con) => Some(&con.name),
            Ty::App(base, _) => base.head_name(),
            _ => None,
        }
    }

    /// Type arguments of an applied type; empty for everything else.
    pub fn type_args(&self) -> &[Ty] {
        match self {
            Ty::App(_, args) => args,
            _ => &[],
        }
    }

    /// Whether the type mentions the given forward handle anywhere.
    pub fn mentions_forward(&self, id: ForwardId) -> bool {
        match self {
            Ty::Forward(other) => *other == id,
            Ty::App(base, args) => base.mentions_forward(id) || args.iter().any(|a| a.mentions_forward(id)),
            Ty::Tuple(elems) => elems.iter().any(|e| e.mentions_forward(id)),
            Ty::Fun(params, ret) => {
                params.iter().any(|p| p.mentions_forward(id)) || ret.mentions_forward(id)
            }
            Ty::Assoc(base, _) => base.mentions_forward(id),
            Ty::Var(_) | Ty::Con(_) | Ty::Param(_) => false,
        }
    }

    /// Whether the type contains an unresolved forward handle.
    pub fn has_forward(&self) -> bool {
        match self {
            Ty::Forward(_) => true,
            Ty::App(base, args) => base.has_forward() || args.iter().any(Ty::has_forward),
            Ty::Tuple(elems) => elems.iter().any(Ty::has_forward),
            Ty::Fun(params, ret) => params.iter().any(Ty::has_forward) || ret.has_forward(),
            Ty::Assoc(base, _) => base.has_forward(),
            Ty::Var(_) | Ty::Con(_) | Ty::Param(_) => false,
        }
    }

    /// Append every forward handle in the type to `out`, without duplicates.
    pub fn collect_forwards(&self, out: &mut Vec<ForwardId>) {
        match self {
            Ty::Forward(id) => {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
            Ty::App(base, args) => {
                base.collect_forwards(out);
                args.iter().for_each(|a| a.collect_forwards(out));
            }
            Ty::Tuple(elems) => elems.iter().for_each(|e| e.collect_forwards(out)),
            Ty::Fun(params, ret) => {
                params.iter().for_each(|p| p.collect_forwards(out));
                ret.collect_forwards(out);
            }
            Ty::Assoc(base, _) => base.collect_forwards(out),
            Ty::Var(_) | Ty::Con(_) | Ty::Param(_) => {}
        }
    }

    /// Append the names of all nominal types mentioned in the type to `out`.
    pub fn collect_heads<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Ty::Con(con) => out.push(&con.name),
            Ty::App(base, args) => {
                base.collect_heads(out);
                args.iter().for_each(|a| a.collect_heads(out));
            }
            Ty::Tuple(elems) => elems.iter().for_each(|e| e.collect_heads(out)),
            Ty::Fun(params, ret) => {
                params.iter().for_each(|p| p.collect_heads(out));
                ret.collect_heads(out);
            }
            Ty::Assoc(base, _) => base.collect_heads(out),
            Ty::Var(_) | Ty::Param(_) | Ty::Forward(_) => {}
        }
    }

    /// Replace every occurrence of the forward handle with `with`.
    pub fn replace_forward(&self, id: ForwardId, with: &Ty) -> Ty {
        match self {
            Ty::Forward(other) if *other == id => with.clone(),
            Ty::App(base, args) => Ty::App(
                Box::new(base.replace_forward(id, with)),
                args.iter().map(|a| a.replace_forward(id, with)).collect(),
            ),
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| e.replace_forward(id, with)).collect()),
            Ty::Fun(params, ret) => Ty::Fun(
                params.iter().map(|p| p.replace_forward(id, with)).collect(),
                Box::new(ret.replace_forward(id, with)),
            ),
            Ty::Assoc(base, name) => Ty::Assoc(Box::new(base.replace_forward(id, with)), name.clone()),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Var(v) => write!(f, "?{}", v.0),
            Ty::Con(c) => write!(f, "{}", c),
            Ty::App(con, args) => {
                write!(f, "{}", con)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", a)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Ty::Tuple(elems) => {
                write!(f, "(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            Ty::Fun(params, ret) => {
                write!(f, "(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ret)
            }
            Ty::Param(name) => write!(f, "{}", name),
            Ty::Assoc(base, name) => write!(f, "{}.{}", base, name),
            Ty::Forward(id) => write!(f, "<pending mirror #{}>", id.0),
        }
    }
}

// ── ena trait implementations ──────────────────────────────────────────

impl ena::unify::UnifyKey for TyVar {
    type Value = Option<Ty>;

    fn index(&self) -> u32 {
        self.0
    }

    fn from_index(u: u32) -> Self {
        TyVar(u)
    }

    fn tag() -> &'static str {
        "TyVar"
    }
}

impl ena::unify::EqUnifyValue for Ty {}
