//! Reference-managed, refreshable snapshot primitives.
//!
//! A [`ReferenceManager`] hands out shared, reference-counted handles to an
//! immutable snapshot of an expensive-to-build resource (a search-index
//! view, a compiled configuration, ...), lets many concurrent consumers hold
//! and release handles safely, and swaps in a fresher snapshot on demand
//! without disrupting consumers still using an older one.
//!
//! * Consumers call [`ReferenceManager::acquire`] and
//!   [`ReferenceManager::release`]; acquisition is lock-free and never waits
//!   on an in-flight refresh.
//! * A driver calls [`ReferenceManager::maybe_refresh`] (best-effort,
//!   non-blocking) or [`ReferenceManager::maybe_refresh_blocking`]; the
//!   winner of the refresh gate runs the refresh protocol and may publish a
//!   new snapshot, retiring the old one once its last holder releases it.
//! * The managed resource plugs in through [`SnapshotSource`]; observers
//!   plug in through [`RefreshListener`].
//!
//! The manager never decides *when* a refresh is warranted (that is
//! [`SnapshotSource::refresh_if_needed`]'s call) and does not schedule
//! refreshes itself; an external timer or event loop drives it.

mod error;
mod listener;
mod manager;
mod source;

pub use error::ManagerError;
pub use listener::RefreshListener;
pub use manager::ReferenceManager;
pub use source::SnapshotSource;
