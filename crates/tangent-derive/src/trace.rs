//! Step-by-step record of a derivation session.
//!
//! Opt-in via [`DeriveOptions::trace`](crate::options::DeriveOptions); no
//! steps are recorded otherwise. The trace is plain data and serializes with
//! serde for tooling that wants to show why a mirror type looks the way it does.

use serde::Serialize;

use tangent_ir::capability::KnownCapability;

/// What happened at a trace step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceAction {
    /// A (record, capability) pair changed derivation state.
    Transition,
    /// Participating fields were selected.
    SelectFields,
    /// Secondary capabilities were granted or withheld.
    Propagate,
    /// A new mirror record was built.
    MirrorBuilt,
    /// The record was reused as its own mirror.
    MirrorReused,
    /// A finished mirror was returned from the cache.
    CacheHit,
    /// A re-entrant request received a forward handle.
    ForwardIssued,
    /// A forward handle was replaced by the final mirror type.
    ForwardPatched,
    /// A dependent mirror was retracted after its dependency failed.
    RolledBack,
    /// A member body was synthesized.
    BodyEmitted,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub step: usize,
    pub record: String,
    pub capability: KnownCapability,
    pub action: TraceAction,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesisTrace {
    pub steps: Vec<TraceStep>,
}

impl SynthesisTrace {
    pub fn push(
        &mut self,
        record: &str,
        capability: KnownCapability,
        action: TraceAction,
        detail: impl Into<String>,
    ) {
        let step = self.steps.len();
        self.steps.push(TraceStep {
            step,
            record: record.to_string(),
            capability,
            action,
            detail: detail.into(),
        });
    }

    pub fn actions(&self) -> Vec<TraceAction> {
        self.steps.iter().map(|s| s.action).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
