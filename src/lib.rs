//! Cross-process advisory region-locking core.
//!
//! Coordinates byte-range read/write locks over regular files across
//! independent processes, modelled on `fcntl(F_SETLK)`/`F_SETLKW` but with
//! per-descriptor ownership instead of the native primitive's per-process
//! semantics: a read lock admits multiple owners over overlapping regions,
//! a write lock is exclusive, a blocking request suspends the caller until
//! the region becomes compatible, and a forked child inherits its parent's
//! lock ownership.
//!
//! The pieces, leaf first: [`interval`] (pure region algebra), [`owner`]
//! and [`lock_table`] (the shared data model), [`oracle`] (conflict
//! detection), [`region_mutator`] (merge-on-acquire, split-on-release),
//! [`sweeper`] (dead-owner reclamation), [`sync`] (the process-shared
//! mutex/event/semaphore primitives), [`segment`] (naming and lifecycle of
//! the mapped region), [`handle`] and [`fork`] (the thin external-facing
//! layer), and [`request`] (the orchestration tying all of the above
//! together for one `fcntl`-style call).

pub mod error;
pub mod fork;
pub mod handle;
pub mod interval;
pub mod lock_table;
pub mod oracle;
pub mod owner;
pub mod region_mutator;
pub mod request;
pub mod segment;
pub mod sweeper;
pub mod sync;

pub use error::{Error, Result};
pub use handle::{attach, detach, duplicate, duplicate_to, snapshot, Handle};
pub use interval::{Region, Whence};
pub use lock_table::{LockKind, TableSnapshot, MAX_LOCKS};
pub use owner::{Owner, MAX_OWNERS};
pub use request::{request, LockMode, LockSpec, RequestKind};

pub use fork::inherit_on_fork;
