//! Per-session derivation state.
//!
//! Tracks the eligibility state machine for every (record, capability) pair,
//! the write-once mirror cache, and the forward handles issued to re-entrant
//! requests while a mirror is still being built.

use rowan::TextRange;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use tangent_ir::capability::KnownCapability;
use tangent_ir::decl::RecordId;
use tangent_ir::ty::{ForwardId, Ty};

use crate::error::{DeriveError, DisallowedReason};

/// Where a (record, capability) pair is in its derivation lifecycle.
///
/// `NotChecked -> Eligible -> Synthesizing -> Synthesized`, or
/// `NotChecked -> Ineligible`. A synthesis that aborts moves from
/// `Synthesizing` to `Ineligible`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationState {
    NotChecked,
    Eligible,
    Ineligible,
    Synthesizing,
    Synthesized,
}

impl DerivationState {
    pub fn can_transition_to(self, next: DerivationState) -> bool {
        use DerivationState::*;
        matches!(
            (self, next),
            (NotChecked, Eligible)
                | (NotChecked, Ineligible)
                | (Eligible, Eligible)
                | (Eligible, Synthesizing)
                | (Synthesizing, Synthesized)
                | (Synthesizing, Ineligible)
        )
    }
}

/// The tangent vector type chosen for a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorType {
    /// The mirror type in the record's own generic context. A forward handle
    /// while the record's synthesis is in flight.
    pub ty: Ty,
    /// The record declaring the mirror: the original record itself when
    /// reused, `None` for a forward handle.
    pub record: Option<RecordId>,
    pub reused_self: bool,
}

impl MirrorType {
    pub fn pending(id: ForwardId) -> Self {
        MirrorType {
            ty: Ty::Forward(id),
            record: None,
            reused_self: false,
        }
    }
}

#[derive(Default, Debug)]
pub struct SynthesisState {
    states: FxHashMap<(RecordId, KnownCapability), DerivationState>,
    mirrors: FxHashMap<RecordId, MirrorType>,
    failures: FxHashMap<RecordId, DeriveError>,
    in_flight: FxHashMap<RecordId, ForwardId>,
    next_forward: u32,
    /// Records whose mirror is provisional on an in-flight forward handle.
    dependents: FxHashMap<ForwardId, Vec<RecordId>>,
    /// Field indices whose getter received an implicit derivative attribute.
    getter_marks: FxHashMap<RecordId, Vec<usize>>,
    /// Context errors already reported, by record and conformance site span.
    disallowed: FxHashSet<(RecordId, TextRange, DisallowedReason)>,
}

impl SynthesisState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record: RecordId, capability: KnownCapability) -> DerivationState {
        self.states
            .get(&(record, capability))
            .copied()
            .unwrap_or(DerivationState::NotChecked)
    }

    /// Move to `next` if the state machine allows it. Returns whether it moved.
    pub fn transition(&mut self, record: RecordId, capability: KnownCapability, next: DerivationState) -> bool {
        let current = self.get(record, capability);
        if !current.can_transition_to(next) {
            log::warn!(
                "rejected derivation state change {:?} -> {:?} for record #{} ({})",
                current,
                next,
                record.0,
                capability
            );
            return false;
        }
        self.states.insert((record, capability), next);
        true
    }

    /// Forget everything known about the pair.
    pub fn reset(&mut self, record: RecordId, capability: KnownCapability) {
        self.states.remove(&(record, capability));
    }

    /// Issue the forward handle re-entrant requests for `record` will receive.
    pub fn begin(&mut self, record: RecordId) -> ForwardId {
        let id = ForwardId(self.next_forward);
        self.next_forward += 1;
        self.in_flight.insert(record, id);
        id
    }

    pub fn forward_of(&self, record: RecordId) -> Option<ForwardId> {
        self.in_flight.get(&record).copied()
    }

    pub fn finish(&mut self, record: RecordId) -> Option<ForwardId> {
        self.in_flight.remove(&record)
    }

    pub fn add_dependent(&mut self, forward: ForwardId, record: RecordId) {
        let list = self.dependents.entry(forward).or_default();
        if !list.contains(&record) {
            list.push(record);
        }
    }

    pub fn take_dependents(&mut self, forward: ForwardId) -> Vec<RecordId> {
        self.dependents.remove(&forward).unwrap_or_default()
    }

    /// Forward handles the record's mirror is still provisional on.
    pub fn pending_on(&self, record: RecordId) -> Vec<ForwardId> {
        let mut pending: Vec<ForwardId> = self
            .dependents
            .iter()
            .filter(|(_, records)| records.contains(&record))
            .map(|(forward, _)| *forward)
            .collect();
        pending.sort();
        pending
    }

    pub fn mirror(&self, record: RecordId) -> Option<&MirrorType> {
        self.mirrors.get(&record)
    }

    pub fn cache_mirror(&mut self, record: RecordId, mirror: MirrorType) {
        self.mirrors.insert(record, mirror);
    }

    pub fn evict_mirror(&mut self, record: RecordId) -> Option<MirrorType> {
        self.mirrors.remove(&record)
    }

    pub fn record_failure(&mut self, record: RecordId, error: DeriveError) {
        self.failures.insert(record, error);
    }

    pub fn failure(&self, record: RecordId) -> Option<&DeriveError> {
        self.failures.get(&record)
    }

    /// Remember a context error. Returns false if it was already reported.
    pub fn note_disallowed(&mut self, record: RecordId, site: TextRange, reason: &DisallowedReason) -> bool {
        self.disallowed.insert((record, site, reason.clone()))
    }

    pub fn mark_getters(&mut self, record: RecordId, fields: Vec<usize>) {
        if !fields.is_empty() {
            self.getter_marks.insert(record, fields);
        }
    }

    pub fn take_getter_marks(&mut self, record: RecordId) -> Vec<usize> {
        self.getter_marks.remove(&record).unwrap_or_default()
    }
}
