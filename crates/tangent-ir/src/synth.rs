//! Synthesized member shapes.
//!
//! The engine does not own a full expression language; it builds exactly the
//! handful of node kinds delegating conformances need: member references,
//! calls resolved through a [`Dispatch`], memberwise construction, and
//! returns. Every node prints as source-like text so synthesized members can
//! be inspected and snapshotted.

use std::fmt;

use crate::capability::{DeclName, KnownCapability, Requirement};
use crate::decl::Visibility;
use crate::ty::Ty;

/// A concrete member implementing a requirement for a specific type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Witness {
    /// The type providing the member.
    pub owner: Ty,
    pub capability: KnownCapability,
    pub name: DeclName,
    /// True when the member is itself produced by derivation.
    pub synthesized: bool,
}

/// A requirement referenced through its capability rather than a concrete witness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequirementRef {
    pub capability: KnownCapability,
    pub requirement: Requirement,
}

/// How a delegated call reaches a field's implementation.
///
/// Resolved once per field and stored with that field's synthesis plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// The field's conformance is concretely known; call its witness directly.
    Static(Witness),
    /// The conformance is abstract (e.g. a generic parameter); dispatch dynamically.
    ViaInterface(RequirementRef),
}

impl Dispatch {
    pub fn name(&self) -> &DeclName {
        match self {
            Dispatch::Static(witness) => &witness.name,
            Dispatch::ViaInterface(req) => &req.requirement.name,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Dispatch::Static(_))
    }
}

/// A call argument with an optional label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arg {
    pub label: Option<String>,
    pub value: Expr,
}

impl Arg {
    pub fn labeled(label: impl Into<String>, value: Expr) -> Self {
        Arg { label: Some(label.into()), value }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    SelfRef,
    Param(String),
    /// Stored field access: `base.field`.
    Member { base: Box<Expr>, field: String },
    /// `receiver.method(label: arg, ...)`.
    MethodCall {
        receiver: Box<Expr>,
        dispatch: Dispatch,
        args: Vec<Arg>,
    },
    /// Requirement property read: `base.property`.
    PropertyRef { base: Box<Expr>, dispatch: Dispatch },
    /// Memberwise construction: `Ty(label: arg, ...)`.
    Construct { ty: Ty, args: Vec<Arg> },
}

impl Expr {
    pub fn member(base: Expr, field: impl Into<String>) -> Expr {
        Expr::Member {
            base: Box::new(base),
            field: field.into(),
        }
    }

    pub fn self_member(field: impl Into<String>) -> Expr {
        Expr::member(Expr::SelfRef, field)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    Expr(Expr),
    Assign { target: Expr, value: Expr },
    Return(Expr),
}

/// A synthesized body: a flat statement sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Body {
    pub stmts: Vec<Stmt>,
}

/// A function or initializer parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    /// External argument label; `None` prints as `_`.
    pub label: Option<String>,
    pub name: String,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncDecl {
    pub name: DeclName,
    pub params: Vec<Param>,
    pub return_ty: Ty,
    pub is_mutating: bool,
    pub visibility: Visibility,
    pub implicit: bool,
    pub capability: KnownCapability,
    pub body: Body,
}

/// A computed, read-only property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: Ty,
    pub is_final: bool,
    pub visibility: Visibility,
    pub implicit: bool,
    pub capability: KnownCapability,
    pub getter: Body,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitializerDecl {
    pub params: Vec<Param>,
    pub visibility: Visibility,
    pub implicit: bool,
    pub memberwise: bool,
    pub body: Body,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeAliasDecl {
    pub name: String,
    pub target: Ty,
    pub visibility: Visibility,
    pub implicit: bool,
}

// ── Display ────────────────────────────────────────────────────────────

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Arg]) -> fmt::Result {
    write!(f, "(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match &arg.label {
            Some(label) if !label.is_empty() => write!(f, "{}: {}", label, arg.value)?,
            _ => write!(f, "{}", arg.value)?,
        }
    }
    write!(f, ")")
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[Param]) -> fmt::Result {
    write!(f, "(")?;
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        match &param.label {
            Some(label) if *label == param.name => write!(f, "{}: {}", param.name, param.ty)?,
            Some(label) => write!(f, "{} {}: {}", label, param.name, param.ty)?,
            None => write!(f, "_ {}: {}", param.name, param.ty)?,
        }
    }
    write!(f, ")")
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &Body) -> fmt::Result {
    writeln!(f, " {{")?;
    for stmt in &body.stmts {
        writeln!(f, "    {}", stmt)?;
    }
    write!(f, "}}")
}

fn write_visibility(f: &mut fmt::Formatter<'_>, visibility: Visibility) -> fmt::Result {
    match visibility {
        Visibility::Internal => Ok(()),
        other => write!(f, "{} ", other),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::SelfRef => write!(f, "self"),
            Expr::Param(name) => write!(f, "{}", name),
            Expr::Member { base, field } => write!(f, "{}.{}", base, field),
            Expr::MethodCall {
                receiver,
                dispatch,
                args,
            } => {
                write!(f, "{}.{}", receiver, dispatch.name().base)?;
                write_args(f, args)
            }
            Expr::PropertyRef { base, dispatch } => write!(f, "{}.{}", base, dispatch.name().base),
            Expr::Construct { ty, args } => {
                write!(f, "{}", ty)?;
                write_args(f, args)
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expr(expr) => write!(f, "{}", expr),
            Stmt::Assign { target, value } => write!(f, "{} = {}", target, value),
            Stmt::Return(expr) => write!(f, "return {}", expr),
        }
    }
}

impl fmt::Display for FuncDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_visibility(f, self.visibility)?;
        if self.is_mutating {
            write!(f, "mutating ")?;
        }
        write!(f, "func {}", self.name.base)?;
        write_params(f, &self.params)?;
        if !self.return_ty.is_unit() {
            write!(f, " -> {}", self.return_ty)?;
        }
        write_body(f, &self.body)
    }
}

impl fmt::Display for PropertyDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_visibility(f, self.visibility)?;
        write!(f, "var {}: {}", self.name, self.ty)?;
        write_body(f, &self.getter)
    }
}

impl fmt::Display for InitializerDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_visibility(f, self.visibility)?;
        write!(f, "init")?;
        write_params(f, &self.params)?;
        write_body(f, &self.body)
    }
}

impl fmt::Display for TypeAliasDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_visibility(f, self.visibility)?;
        write!(f, "typealias {} = {}", self.name, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Requirement;

    fn move_dispatch(owner: Ty) -> Dispatch {
        Dispatch::Static(Witness {
            owner,
            capability: KnownCapability::Differentiable,
            name: DeclName::compound("move", &["along"]),
            synthesized: false,
        })
    }

    #[test]
    fn method_call_prints_labels() {
        let call = Expr::MethodCall {
            receiver: Box::new(Expr::self_member("x")),
            dispatch: move_dispatch(Ty::float()),
            args: vec![Arg::labeled("along", Expr::member(Expr::Param("direction".into()), "x"))],
        };
        assert_eq!(call.to_string(), "self.x.move(along: direction.x)");
    }

    #[test]
    fn interface_dispatch_prints_like_static() {
        let dispatch = Dispatch::ViaInterface(RequirementRef {
            capability: KnownCapability::Differentiable,
            requirement: Requirement::method("move", &["along"]),
        });
        assert!(!dispatch.is_static());
        assert_eq!(dispatch.name().base, "move");
    }

    #[test]
    fn func_decl_renders_body() {
        let func = FuncDecl {
            name: DeclName::compound("move", &["along"]),
            params: vec![Param {
                label: Some("along".into()),
                name: "direction".into(),
                ty: Ty::con("P.TangentVector"),
            }],
            return_ty: Ty::unit(),
            is_mutating: true,
            visibility: Visibility::Internal,
            implicit: true,
            capability: KnownCapability::Differentiable,
            body: Body {
                stmts: vec![Stmt::Expr(Expr::MethodCall {
                    receiver: Box::new(Expr::self_member("x")),
                    dispatch: move_dispatch(Ty::float()),
                    args: vec![Arg::labeled("along", Expr::member(Expr::Param("direction".into()), "x"))],
                })],
            },
        };
        insta::assert_snapshot!(func.to_string(), @r"
        mutating func move(along direction: P.TangentVector) {
            self.x.move(along: direction.x)
        }
        ");
    }
}
