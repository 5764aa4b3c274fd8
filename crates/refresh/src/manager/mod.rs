//! The reference manager: lock-free acquire, mutually-exclusive refresh,
//! atomic swap, exactly-once teardown.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::error::ManagerError;
use crate::listener::{ListenerSet, RefreshListener};
use crate::source::SnapshotSource;

#[cfg(test)]
mod test_fixtures;

/// Hands out reference-counted handles to the current snapshot of a managed
/// resource and swaps in fresher snapshots without disrupting holders of
/// older ones.
///
/// The manager itself always holds exactly one implicit count on whatever
/// snapshot occupies the current slot; it is taken over from the initial
/// snapshot at construction, moved to each fresh snapshot on publication,
/// and given up at close.
///
/// # Concurrency
///
/// * [`acquire`](Self::acquire) and [`release`](Self::release) are lock-free
///   and fully concurrent with any in-flight refresh.
/// * At most one refresh protocol instance runs at a time, serialized by the
///   refresh gate; [`maybe_refresh`](Self::maybe_refresh) never waits on it.
/// * The current slot is written only under the swap gate, in short critical
///   sections (one store plus one release).
pub struct ReferenceManager<S: SnapshotSource> {
	source: S,
	/// Read lock-free by acquirers; written only under `swap_gate`. Becomes
	/// `None` exactly once, at close, and never transitions back.
	current: ArcSwapOption<S::Snapshot>,
	/// Guards transitions of `current`: publication and the close transition.
	swap_gate: Mutex<()>,
	/// Serializes the whole multi-step refresh attempt protocol. Plain
	/// acquire/release traffic never touches it.
	refresh_gate: Mutex<()>,
	listeners: ListenerSet,
}

impl<S: SnapshotSource> ReferenceManager<S> {
	/// Creates a manager already holding `initial`.
	///
	/// The manager takes over the one implicit count `initial` was
	/// constructed with and keeps it until the snapshot is superseded or the
	/// manager is closed.
	pub fn new(source: S, initial: S::Snapshot) -> Self {
		Self {
			source,
			current: ArcSwapOption::from_pointee(initial),
			swap_gate: Mutex::new(()),
			refresh_gate: Mutex::new(()),
			listeners: ListenerSet::new(),
		}
	}

	/// Returns the embedded snapshot source.
	pub fn source(&self) -> &S {
		&self.source
	}

	/// Reports whether the manager was still open at the instant of the check.
	pub fn is_open(&self) -> bool {
		self.current.load().is_some()
	}

	/// Borrows the current snapshot, incrementing its count.
	///
	/// Lock-free: never waits on an in-flight refresh, only retries past
	/// concurrent swaps. Every successful acquire must be matched by exactly
	/// one [`release`](Self::release).
	///
	/// The retry loop is what makes acquisition safe against concurrent
	/// refresh: a failed `try_inc_ref` means the snapshot read from the slot
	/// was swapped out and fully decommissioned before the increment landed,
	/// so the slot is re-read and the attempt repeated. A reader is never
	/// handed a snapshot whose count already reached zero.
	pub fn acquire(&self) -> Result<Arc<S::Snapshot>, ManagerError<S::Error>> {
		loop {
			let Some(snapshot) = self.current.load_full() else {
				return Err(ManagerError::AlreadyClosed);
			};
			if self
				.source
				.try_inc_ref(&snapshot)
				.map_err(ManagerError::Source)?
			{
				return Ok(snapshot);
			}
			tracing::trace!("snapshot decommissioned under acquire, retrying");
		}
	}

	/// Returns a borrowed snapshot, decrementing its count.
	///
	/// Legal after [`close`](Self::close) and on snapshots that have already
	/// been superseded; the caller may be the last live holder, in which
	/// case the source decommissions the snapshot.
	pub fn release(&self, snapshot: &S::Snapshot) -> Result<(), ManagerError<S::Error>> {
		self.source.dec_ref(snapshot).map_err(ManagerError::Source)
	}

	/// Attempts a refresh without waiting.
	///
	/// Returns `Ok(true)` when this call won the refresh gate and ran the
	/// full protocol (whether or not a new snapshot was published), and
	/// `Ok(false)` immediately when another thread is already refreshing.
	pub fn maybe_refresh(&self) -> Result<bool, ManagerError<S::Error>> {
		self.ensure_open()?;
		// try_lock, not lock: a losing caller must not wait. The winner's
		// protocol run covers this window.
		match self.refresh_gate.try_lock() {
			Some(_gate) => {
				self.do_maybe_refresh()?;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	/// Refreshes, waiting behind any in-flight attempt first.
	///
	/// By the time this returns, at least one refresh attempt has completed
	/// since the call began.
	pub fn maybe_refresh_blocking(&self) -> Result<(), ManagerError<S::Error>> {
		self.ensure_open()?;
		let _gate = self.refresh_gate.lock();
		self.do_maybe_refresh()
	}

	/// Closes the manager, releasing its implicit hold on the current
	/// snapshot and firing [`SnapshotSource::after_close`].
	///
	/// Idempotent: once closed, repeat calls are no-ops and never fail.
	/// Snapshots still held by consumers stay live until their holders
	/// release them.
	pub fn close(&self) -> Result<(), ManagerError<S::Error>> {
		let _gate = self.swap_gate.lock();
		let Some(old) = self.current.load_full() else {
			return Ok(());
		};
		self.current.store(None);
		self.source.dec_ref(&old).map_err(ManagerError::Source)?;
		tracing::debug!("reference manager closed");
		self.source.after_close();
		Ok(())
	}

	/// Registers a refresh listener; returns `false` when this exact object
	/// (by identity) was already registered.
	pub fn add_listener(&self, listener: Arc<dyn RefreshListener>) -> bool {
		self.listeners.add(listener)
	}

	/// Unregisters a refresh listener by identity; returns `false` when it
	/// was not registered.
	pub fn remove_listener(&self, listener: &Arc<dyn RefreshListener>) -> bool {
		self.listeners.remove(listener)
	}

	/// Best-effort openness gate for the public refresh entry points. A
	/// close that begins right after this check is caught again by the
	/// re-validation under the swap gate, which is the authoritative point.
	fn ensure_open(&self) -> Result<(), ManagerError<S::Error>> {
		if self.current.load().is_some() {
			Ok(())
		} else {
			Err(ManagerError::AlreadyClosed)
		}
	}

	/// Runs one refresh attempt. The caller must hold `refresh_gate`.
	fn do_maybe_refresh(&self) -> Result<(), ManagerError<S::Error>> {
		self.listeners.notify_before();
		let reference = self.acquire()?;

		let mut refreshed = false;
		let outcome = self.refresh_and_publish(&reference, &mut refreshed);

		// Both cleanup actions run even when the refresh step errored; the
		// error still propagates afterwards.
		let released = self.source.dec_ref(&reference);
		self.listeners.notify_after(refreshed);

		outcome?;
		released.map_err(ManagerError::Source)?;

		tracing::debug!(refreshed, "refresh attempt finished");
		self.source.after_maybe_refresh(refreshed);
		Ok(())
	}

	/// Asks the source for a fresher snapshot and publishes it if one is
	/// produced. Sets `refreshed` only when publication itself succeeded.
	fn refresh_and_publish(
		&self,
		reference: &Arc<S::Snapshot>,
		refreshed: &mut bool,
	) -> Result<(), ManagerError<S::Error>> {
		let Some(new) = self
			.source
			.refresh_if_needed(reference)
			.map_err(ManagerError::Source)?
		else {
			return Ok(());
		};

		let new = Arc::new(new);
		match self.publish(Arc::clone(&new)) {
			Ok(()) => {
				*refreshed = true;
				Ok(())
			}
			Err(err) => {
				// Drop the implicit count the fresh snapshot was constructed
				// with before surfacing the failure, so it is not leaked.
				if let Err(release_err) = self.source.dec_ref(&new) {
					tracing::warn!(
						error = %release_err,
						"failed to release fresh snapshot after swap failure"
					);
				}
				Err(err)
			}
		}
	}

	/// Installs `new` as the current snapshot and releases the one it
	/// supersedes. Fails `AlreadyClosed`, leaving `new` untouched, when the
	/// manager closed in the meantime.
	fn publish(&self, new: Arc<S::Snapshot>) -> Result<(), ManagerError<S::Error>> {
		let _gate = self.swap_gate.lock();
		let Some(old) = self.current.load_full() else {
			return Err(ManagerError::AlreadyClosed);
		};
		self.current.store(Some(new));
		self.source.dec_ref(&old).map_err(ManagerError::Source)
	}
}

impl<S: SnapshotSource> fmt::Debug for ReferenceManager<S> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReferenceManager")
			.field("open", &self.is_open())
			.finish_non_exhaustive()
	}
}
