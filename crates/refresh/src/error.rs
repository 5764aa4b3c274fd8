//! Error types surfaced by the reference manager.

/// Errors returned by [`ReferenceManager`](crate::ReferenceManager) operations.
///
/// Collaborator failures are carried opaquely in [`Source`](Self::Source)
/// and propagate unchanged to the caller of the public operation that
/// triggered them; the manager performs no retries at this layer.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError<E: std::error::Error + 'static> {
	/// The manager has been closed; the current slot is permanently empty.
	#[error("reference manager is closed")]
	AlreadyClosed,

	/// The snapshot source reported an error.
	#[error("snapshot source error")]
	Source(#[source] E),
}
