//! Counted-snapshot fixtures shared by the manager tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::Mutex;

use super::ReferenceManager;
use crate::listener::RefreshListener;
use crate::source::SnapshotSource;

/// Collaborator failure injected by test knobs.
#[derive(Debug, Clone, thiserror::Error)]
#[error("injected source failure in {0}")]
pub(crate) struct InjectedFailure(pub(crate) &'static str);

/// Per-snapshot state the test body can inspect after the snapshot has been
/// handed to (and possibly retired by) the manager.
pub(crate) struct SnapState {
	pub(crate) version: u64,
	count: AtomicI64,
	decommissioned: AtomicBool,
}

impl SnapState {
	fn new(version: u64) -> Arc<Self> {
		Arc::new(Self {
			version,
			count: AtomicI64::new(1),
			decommissioned: AtomicBool::new(false),
		})
	}

	pub(crate) fn count(&self) -> i64 {
		self.count.load(Ordering::SeqCst)
	}

	pub(crate) fn is_decommissioned(&self) -> bool {
		self.decommissioned.load(Ordering::SeqCst)
	}
}

/// Snapshot type handed to the manager; clones share one logical state.
#[derive(Clone)]
pub(crate) struct CountedSnapshot {
	pub(crate) state: Arc<SnapState>,
}

/// Test source with stageable fresh snapshots and failure/rendezvous knobs.
///
/// Every snapshot ever minted is kept in `created` (in mint order) so tests
/// can assert counts and decommission flags after the manager is done with
/// them. Counts must never go negative and a snapshot must decommission at
/// most once; violations panic inside the source.
#[derive(Default)]
pub(crate) struct CountedSource {
	next_version: AtomicUsize,
	staged: Mutex<VecDeque<CountedSnapshot>>,
	created: Mutex<Vec<Arc<SnapState>>>,
	refresh_calls: AtomicUsize,
	fail_next_refresh: AtomicBool,
	fail_next_dec_ref: AtomicBool,
	refresh_rendezvous: Mutex<Option<(Arc<Barrier>, Arc<Barrier>)>>,
	after_close_calls: AtomicUsize,
	after_refresh_calls: AtomicUsize,
}

impl CountedSource {
	/// Mints a snapshot with count 1 and records its state.
	pub(crate) fn mint(&self) -> CountedSnapshot {
		let version = self.next_version.fetch_add(1, Ordering::SeqCst) as u64;
		let state = SnapState::new(version);
		self.created.lock().push(Arc::clone(&state));
		CountedSnapshot { state }
	}

	/// Stages a fresh snapshot for the next `refresh_if_needed` call.
	pub(crate) fn stage_fresh(&self) -> Arc<SnapState> {
		let snapshot = self.mint();
		let state = Arc::clone(&snapshot.state);
		self.staged.lock().push_back(snapshot);
		state
	}

	/// Makes the next `refresh_if_needed` fail instead of producing anything.
	pub(crate) fn fail_next_refresh(&self) {
		self.fail_next_refresh.store(true, Ordering::SeqCst);
	}

	/// Makes the next `dec_ref` fail without touching the count.
	pub(crate) fn fail_next_dec_ref(&self) {
		self.fail_next_dec_ref.store(true, Ordering::SeqCst);
	}

	/// Parks the next `refresh_if_needed` call on `entry`, then `exit`,
	/// letting the test interleave work while a refresh is mid-flight.
	pub(crate) fn rendezvous_next_refresh(&self, entry: Arc<Barrier>, exit: Arc<Barrier>) {
		*self.refresh_rendezvous.lock() = Some((entry, exit));
	}

	pub(crate) fn state(&self, index: usize) -> Arc<SnapState> {
		Arc::clone(&self.created.lock()[index])
	}

	pub(crate) fn created_states(&self) -> Vec<Arc<SnapState>> {
		self.created.lock().clone()
	}

	pub(crate) fn refresh_calls(&self) -> usize {
		self.refresh_calls.load(Ordering::SeqCst)
	}

	pub(crate) fn after_close_calls(&self) -> usize {
		self.after_close_calls.load(Ordering::SeqCst)
	}

	pub(crate) fn after_refresh_calls(&self) -> usize {
		self.after_refresh_calls.load(Ordering::SeqCst)
	}
}

impl SnapshotSource for CountedSource {
	type Snapshot = CountedSnapshot;
	type Error = InjectedFailure;

	fn try_inc_ref(&self, snapshot: &CountedSnapshot) -> Result<bool, InjectedFailure> {
		let count = &snapshot.state.count;
		let mut observed = count.load(Ordering::SeqCst);
		loop {
			if observed == 0 {
				return Ok(false);
			}
			match count.compare_exchange(observed, observed + 1, Ordering::SeqCst, Ordering::SeqCst)
			{
				Ok(_) => return Ok(true),
				Err(actual) => observed = actual,
			}
		}
	}

	fn dec_ref(&self, snapshot: &CountedSnapshot) -> Result<(), InjectedFailure> {
		if self.fail_next_dec_ref.swap(false, Ordering::SeqCst) {
			return Err(InjectedFailure("dec_ref"));
		}
		let remaining = snapshot.state.count.fetch_sub(1, Ordering::SeqCst) - 1;
		assert!(
			remaining >= 0,
			"snapshot v{} count went negative",
			snapshot.state.version
		);
		if remaining == 0 {
			let again = snapshot.state.decommissioned.swap(true, Ordering::SeqCst);
			assert!(
				!again,
				"snapshot v{} decommissioned twice",
				snapshot.state.version
			);
		}
		Ok(())
	}

	fn refresh_if_needed(
		&self,
		_current: &CountedSnapshot,
	) -> Result<Option<CountedSnapshot>, InjectedFailure> {
		self.refresh_calls.fetch_add(1, Ordering::SeqCst);
		let rendezvous = self.refresh_rendezvous.lock().take();
		if let Some((entry, exit)) = rendezvous {
			entry.wait();
			exit.wait();
		}
		if self.fail_next_refresh.swap(false, Ordering::SeqCst) {
			return Err(InjectedFailure("refresh_if_needed"));
		}
		Ok(self.staged.lock().pop_front())
	}

	fn after_close(&self) {
		self.after_close_calls.fetch_add(1, Ordering::SeqCst);
	}

	fn after_maybe_refresh(&self, _refreshed: bool) {
		self.after_refresh_calls.fetch_add(1, Ordering::SeqCst);
	}
}

/// Builds a manager over a freshly minted v0 snapshot.
pub(crate) fn counted_manager() -> ReferenceManager<CountedSource> {
	let source = CountedSource::default();
	let initial = source.mint();
	ReferenceManager::new(source, initial)
}

/// Listener probe counting before/after pairs and published outcomes.
#[derive(Default)]
pub(crate) struct CountingListener {
	before: AtomicUsize,
	after: AtomicUsize,
	published: AtomicUsize,
}

impl CountingListener {
	pub(crate) fn before(&self) -> usize {
		self.before.load(Ordering::SeqCst)
	}

	pub(crate) fn after(&self) -> usize {
		self.after.load(Ordering::SeqCst)
	}

	pub(crate) fn published(&self) -> usize {
		self.published.load(Ordering::SeqCst)
	}
}

impl RefreshListener for CountingListener {
	fn before_refresh(&self) {
		self.before.fetch_add(1, Ordering::SeqCst);
	}

	fn after_refresh(&self, refreshed: bool) {
		self.after.fetch_add(1, Ordering::SeqCst);
		if refreshed {
			self.published.fetch_add(1, Ordering::SeqCst);
		}
	}
}
