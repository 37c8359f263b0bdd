//! Structural matching of conformance patterns against query types.
//!
//! A conformance definition such as `Array<T>: Differentiable` is stored with
//! generic parameters. To answer "does `Array<Float>` conform?" the pattern's
//! parameters are freshened into inference variables and unified against the
//! query type in a throwaway [`MatchCtx`]. The bindings of those variables
//! then instantiate the definition's type witnesses and where clauses.

use std::fmt;

use ena::unify::InPlaceUnificationTable;
use rustc_hash::FxHashMap;

use tangent_ir::ty::{Ty, TyVar};

/// Why two types failed to match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchError {
    Mismatch { expected: Ty, found: Ty },
    ArityMismatch { expected: usize, found: usize },
    InfiniteType { var: TyVar, ty: Ty },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::Mismatch { expected, found } => {
                write!(f, "expected `{}`, found `{}`", expected, found)
            }
            MatchError::ArityMismatch { expected, found } => {
                write!(f, "expected {} type arguments, found {}", expected, found)
            }
            MatchError::InfiniteType { var, ty } => {
                write!(f, "infinite type: ?{} occurs in `{}`", var.0, ty)
            }
        }
    }
}

/// The matching context: owns the unification table for one query.
pub struct MatchCtx {
    table: InPlaceUnificationTable<TyVar>,
}

impl Default for MatchCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchCtx {
    pub fn new() -> Self {
        MatchCtx {
            table: InPlaceUnificationTable::new(),
        }
    }

    pub fn fresh_var(&mut self) -> Ty {
        Ty::Var(self.table.new_key(None))
    }

    /// Replace every generic parameter in `ty` with a fresh variable.
    ///
    /// `params` maps parameter names to their variables and is shared across
    /// calls, so the same name freshens to the same variable within a pattern.
    pub fn freshen(&mut self, ty: &Ty, params: &mut FxHashMap<String, Ty>) -> Ty {
        match ty {
            Ty::Param(name) => params
                .entry(name.clone())
                .or_insert_with(|| self.fresh_var())
                .clone(),
            Ty::App(con, args) => Ty::App(
                Box::new(self.freshen(con, params)),
                args.iter().map(|a| self.freshen(a, params)).collect(),
            ),
            Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| self.freshen(e, params)).collect()),
            Ty::Fun(args, ret) => Ty::Fun(
                args.iter().map(|a| self.freshen(a, params)).collect(),
                Box::new(self.freshen(ret, params)),
            ),
            Ty::Assoc(base, name) => Ty::Assoc(Box::new(self.freshen(base, params)), name.clone()),
            other => other.clone(),
        }
    }

    /// Resolve a type by following union-find indirection.
    pub fn resolve(&mut self, ty: Ty) -> Ty {
        match ty {
            Ty::Var(v) => match self.table.probe_value(v) {
                Some(inner) => self.resolve(inner),
                None => Ty::Var(self.table.find(v)),
            },
            Ty::App(con, args) => {
                let con = Box::new(self.resolve(*con));
                let args = args.into_iter().map(|a| self.resolve(a)).collect();
                Ty::App(con, args)
            }
            Ty::Tuple(elems) => Ty::Tuple(elems.into_iter().map(|e| self.resolve(e)).collect()),
            Ty::Fun(params, ret) => {
                let params = params.into_iter().map(|p| self.resolve(p)).collect();
                let ret = Box::new(self.resolve(*ret));
                Ty::Fun(params, ret)
            }
            Ty::Assoc(base, name) => Ty::Assoc(Box::new(self.resolve(*base)), name),
            other => other,
        }
    }

    fn occurs_in(&mut self, var: TyVar, ty: &Ty) -> bool {
        match ty {
            Ty::Var(v) => {
                if *v == var {
                    return true;
                }
                match self.table.probe_value(*v) {
                    Some(inner) => self.occurs_in(var, &inner),
                    None => false,
                }
            }
            Ty::App(con, args) => self.occurs_in(var, con) || args.iter().any(|a| self.occurs_in(var, a)),
            Ty::Tuple(elems) => elems.iter().any(|e| self.occurs_in(var, e)),
            Ty::Fun(params, ret) => params.iter().any(|p| self.occurs_in(var, p)) || self.occurs_in(var, ret),
            Ty::Assoc(base, _) => self.occurs_in(var, base),
            Ty::Con(_) | Ty::Param(_) | Ty::Forward(_) => false,
        }
    }

    /// Unify two types, binding variables on either side.
    pub fn unify(&mut self, a: Ty, b: Ty) -> Result<(), MatchError> {
        let a = self.resolve(a);
        let b = self.resolve(b);

        match (a, b) {
            (Ty::Var(v1), Ty::Var(v2)) if v1 == v2 => Ok(()),

            (Ty::Var(v1), Ty::Var(v2)) => self
                .table
                .unify_var_var(v1, v2)
                .map_err(|(expected, found)| MatchError::Mismatch { expected, found }),

            (Ty::Var(v), ty) | (ty, Ty::Var(v)) => {
                if self.occurs_in(v, &ty) {
                    Err(MatchError::InfiniteType { var: v, ty })
                } else {
                    self.table
                        .unify_var_value(v, Some(ty))
                        .map_err(|(expected, found)| MatchError::Mismatch { expected, found })
                }
            }

            // `Con("Point")` and `App(Con("Point"), [])` are the same type.
            (Ty::Con(ref c), Ty::App(ref con, ref args)) | (Ty::App(ref con, ref args), Ty::Con(ref c))
                if args.is_empty() && matches!(con.as_ref(), Ty::Con(ac) if ac.name == c.name) =>
            {
                Ok(())
            }

            (Ty::App(c1, a1), Ty::App(c2, a2)) => {
                self.unify(*c1, *c2)?;
                self.unify_all(a1, a2)
            }

            (Ty::Tuple(e1), Ty::Tuple(e2)) => self.unify_all(e1, e2),

            (Ty::Fun(p1, r1), Ty::Fun(p2, r2)) => {
                self.unify_all(p1, p2)?;
                self.unify(*r1, *r2)
            }

            (Ty::Assoc(b1, n1), Ty::Assoc(b2, n2)) if n1 == n2 => self.unify(*b1, *b2),

            (a, b) if a == b => Ok(()),

            (expected, found) => Err(MatchError::Mismatch { expected, found }),
        }
    }

    fn unify_all(&mut self, left: Vec<Ty>, right: Vec<Ty>) -> Result<(), MatchError> {
        if left.len() != right.len() {
            return Err(MatchError::ArityMismatch {
                expected: left.len(),
                found: right.len(),
            });
        }
        for (a, b) in left.into_iter().zip(right) {
            self.unify(a, b)?;
        }
        Ok(())
    }
}

/// Replace generic parameters by name. Parameters not in `subst` are kept.
pub fn substitute(ty: &Ty, subst: &FxHashMap<String, Ty>) -> Ty {
    if subst.is_empty() {
        return ty.clone();
    }
    match ty {
        Ty::Param(name) => subst.get(name).cloned().unwrap_or_else(|| ty.clone()),
        Ty::App(con, args) => Ty::App(
            Box::new(substitute(con, subst)),
            args.iter().map(|a| substitute(a, subst)).collect(),
        ),
        Ty::Tuple(elems) => Ty::Tuple(elems.iter().map(|e| substitute(e, subst)).collect()),
        Ty::Fun(params, ret) => Ty::Fun(
            params.iter().map(|p| substitute(p, subst)).collect(),
            Box::new(substitute(ret, subst)),
        ),
        Ty::Assoc(base, name) => Ty::Assoc(Box::new(substitute(base, subst)), name.clone()),
        other => other.clone(),
    }
}
