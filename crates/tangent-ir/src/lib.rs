//! Declaration model for derived conformance synthesis.
//!
//! This crate holds the data the derivation engine reads and writes: types,
//! capabilities and their requirements, record declarations, and the shapes
//! of synthesized members. It has no knowledge of how conformances are
//! checked or derived; see the `tangent-derive` crate for that.
//!
//! # Architecture
//!
//! - [`ty`]: Core type representation (Ty, TyCon, TyVar, ForwardId)
//! - [`capability`]: Known capabilities, requirements, and declaration names
//! - [`decl`]: Records, fields, and the append-only declaration arena
//! - [`synth`]: Synthesized member shapes and call dispatch

pub mod capability;
pub mod decl;
pub mod synth;
pub mod ty;

pub use capability::{DeclName, KnownCapability, Requirement, RequirementKind};
pub use decl::{Decls, Field, Record, RecordId, RecordKind, Visibility};
pub use ty::Ty;
