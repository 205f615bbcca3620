//! The error taxonomy of §7: every error that can flip a condition's
//! `reason` field implements [`ReconcilerError`] so the controllers can map
//! it to a stable string without leaking internal error text into the fixed
//! reason enum.

/// Implemented by every error type that crosses a reconcile boundary.
/// Mirrors the teacher's `logging::controller::ReconcilerError` pattern
/// (`strum::EnumDiscriminants` + `IntoStaticStr`), just defined locally
/// since this workspace doesn't carry the teacher's internal operator
/// framework crate.
pub trait ReconcilerError: std::error::Error {
    /// A stable, short identifier for this error variant - used as part of
    /// a condition's `reason`, not shown to the user directly.
    fn category(&self) -> &'static str;

    /// `true` if this error should be treated as transient (§7): retried
    /// with back-off, without flipping a `*Failed` reason.
    fn is_transient(&self) -> bool {
        false
    }
}
