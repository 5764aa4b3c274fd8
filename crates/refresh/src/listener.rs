//! Refresh observers and the identity-keyed listener registry.

use std::sync::Arc;

use parking_lot::RwLock;

/// Observer notified immediately before and after each refresh attempt.
pub trait RefreshListener: Send + Sync {
	/// Runs right before a refresh attempt starts.
	fn before_refresh(&self);

	/// Runs after a refresh attempt finishes; `refreshed` reports whether a
	/// new snapshot was published.
	fn after_refresh(&self, refreshed: bool);
}

/// Identity-keyed set of refresh listeners.
///
/// Membership is by `Arc` pointer identity, never by value equality: the
/// same listener object cannot be double-registered, while two distinct but
/// value-equal listener objects are tracked independently.
#[derive(Default)]
pub(crate) struct ListenerSet {
	entries: RwLock<Vec<Arc<dyn RefreshListener>>>,
}

impl ListenerSet {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Adds a listener; returns `false` when it was already registered.
	pub(crate) fn add(&self, listener: Arc<dyn RefreshListener>) -> bool {
		let mut entries = self.entries.write();
		if entries.iter().any(|l| same_object(l, &listener)) {
			return false;
		}
		entries.push(listener);
		true
	}

	/// Removes a listener by identity; returns `false` when absent.
	pub(crate) fn remove(&self, listener: &Arc<dyn RefreshListener>) -> bool {
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|l| !same_object(l, listener));
		entries.len() != before
	}

	/// Invokes every listener's pre-hook.
	pub(crate) fn notify_before(&self) {
		for listener in self.snapshot() {
			listener.before_refresh();
		}
	}

	/// Invokes every listener's post-hook with the outcome flag.
	pub(crate) fn notify_after(&self, refreshed: bool) {
		for listener in self.snapshot() {
			listener.after_refresh(refreshed);
		}
	}

	/// Clones the membership so callbacks never run under the registry lock.
	fn snapshot(&self) -> Vec<Arc<dyn RefreshListener>> {
		self.entries.read().clone()
	}
}

/// Identity by allocation address. `Arc::ptr_eq` also compares vtable
/// pointers, which codegen may duplicate for the same concrete type.
fn same_object(a: &Arc<dyn RefreshListener>, b: &Arc<dyn RefreshListener>) -> bool {
	std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
