//! Contract a managed resource implements to plug into the manager.

/// Capabilities the reference manager requires from the managed resource.
///
/// The snapshot type is opaque to the manager: it never inspects a
/// snapshot's internals, it only moves handles around and drives the logical
/// reference count through this trait. The count itself is owned by the
/// implementor; once it reaches zero the snapshot is decommissioned and must
/// never be re-incremented.
pub trait SnapshotSource: Send + Sync {
	/// Immutable point-in-time view of the managed resource.
	type Snapshot: Send + Sync;

	/// Implementor-defined failure type, propagated unchanged by the manager.
	type Error: std::error::Error + 'static;

	/// Atomically increments the snapshot's count unless it is already zero.
	///
	/// Returns `Ok(false)`, without mutating state, when the snapshot has
	/// already been decommissioned. Success is the caller's proof that the
	/// count was still positive at that instant.
	fn try_inc_ref(&self, snapshot: &Self::Snapshot) -> Result<bool, Self::Error>;

	/// Atomically decrements the snapshot's count.
	///
	/// When the count reaches zero the implementor must physically release
	/// the underlying resource. The count must never go negative: callers
	/// match every successful increment with exactly one decrement.
	fn dec_ref(&self, snapshot: &Self::Snapshot) -> Result<(), Self::Error>;

	/// Builds a fresher snapshot, or returns `Ok(None)` when `current` is
	/// still up to date.
	///
	/// A returned snapshot starts with one implicit count, owned by the
	/// manager from this point on. `current` must not be mutated.
	fn refresh_if_needed(
		&self,
		current: &Self::Snapshot,
	) -> Result<Option<Self::Snapshot>, Self::Error>;

	/// Runs once, right after the manager's close transition completes.
	fn after_close(&self) {}

	/// Runs after a refresh attempt finishes without an escaping error;
	/// `refreshed` reports whether a new snapshot was published.
	fn after_maybe_refresh(&self, refreshed: bool) {
		let _ = refreshed;
	}
}
