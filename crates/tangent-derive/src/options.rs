//! Knobs for a derivation session.

/// How the mirror type's fixed-layout flag is computed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Copy the flag from the original record.
    #[default]
    CopyFromRecord,
    /// Set the flag only when every mirror field's type has a fixed layout.
    FromMirrorFields,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeriveOptions {
    /// Warn about fields left out of derivation without `@noDerivative`.
    pub warn_implicit_exclusions: bool,
    /// Allow a flat record to serve as its own tangent vector.
    pub allow_self_reuse: bool,
    pub layout_policy: LayoutPolicy,
    /// Record a [`SynthesisTrace`](crate::trace::SynthesisTrace).
    pub trace: bool,
}

impl Default for DeriveOptions {
    fn default() -> Self {
        DeriveOptions {
            warn_implicit_exclusions: true,
            allow_self_reuse: true,
            layout_policy: LayoutPolicy::CopyFromRecord,
            trace: false,
        }
    }
}

impl DeriveOptions {
    /// Default options with tracing switched on.
    pub fn traced() -> Self {
        DeriveOptions {
            trace: true,
            ..Self::default()
        }
    }
}
