//! Process-shared mutex + broadcast event guarding a [`LockTableBody`] that
//! lives at a fixed offset inside a memory-mapped segment.
//!
//! A `raw_sync::locks::Mutex` is mapped directly over a live pointer inside
//! a `shared_memory::Shmem` region (`Mutex::new`/`Mutex::from_existing` over
//! `raw_ptr`/`raw_ptr.add(Mutex::size_of(...))`), immediately followed by a
//! `raw_sync::events::Event` used as the process-shared condition variable.

use crate::error::{Error, Result};
use crate::lock_table::LockTableBody;
use raw_sync::events::{Event, EventImpl, EventInit, EventState};
use raw_sync::locks::{LockGuard, LockImpl, LockInit, Mutex};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// How long [`TableSync::wait_for_signal`] blocks on the event between
/// rechecks. The coordinator loop tolerates spurious wakeups by re-checking
/// compatibility anyway, so a short bound here only closes the small window
/// between releasing the mutex and starting the wait.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes required to host the mutex, the table, and the event, in that
/// layout order, starting at a segment's base address.
pub fn layout_size() -> usize {
    let mutex_size = Mutex::size_of(None);
    let body_size = std::mem::size_of::<LockTableBody>();
    let event_size = Event::size_of(None);
    mutex_size + body_size + event_size
}

pub struct TableSync {
    mutex: Box<dyn LockImpl>,
    event: Box<dyn EventImpl>,
    table_ptr: *mut LockTableBody,
}

unsafe impl Send for TableSync {}
unsafe impl Sync for TableSync {}

impl TableSync {
    /// Initializes a freshly mapped, zeroed segment at `base`: lays down
    /// the mutex, zero/sentinel-inits the table, then lays down the event.
    /// Caller must ensure `base` points to at least [`layout_size`] bytes
    /// and that no other process observes the segment before this returns.
    pub unsafe fn init(base: *mut u8) -> Result<Self> {
        let mutex_size = Mutex::size_of(Some(base));
        let table_ptr = base.add(mutex_size) as *mut LockTableBody;

        let (mutex, _) = Mutex::new(base, table_ptr as *mut u8)
            .map_err(|e| Error::system("initializing process-shared mutex", e))?;

        LockTableBody::init_in_place(&mut *table_ptr);

        let event_ptr = base.add(mutex_size + std::mem::size_of::<LockTableBody>());
        let (event, _) = Event::new(event_ptr, true).map_err(|e| Error::system("initializing process-shared event", e))?;

        Ok(TableSync { mutex, event, table_ptr })
    }

    /// Attaches to an already-initialized segment at `base`.
    pub unsafe fn attach(base: *mut u8) -> Result<Self> {
        let mutex_size = Mutex::size_of(Some(base));
        let table_ptr = base.add(mutex_size) as *mut LockTableBody;

        let (mutex, _) = Mutex::from_existing(base, table_ptr as *mut u8)
            .map_err(|e| Error::system("attaching process-shared mutex", e))?;

        let event_ptr = base.add(mutex_size + std::mem::size_of::<LockTableBody>());
        let (event, _) =
            Event::from_existing(event_ptr).map_err(|e| Error::system("attaching process-shared event", e))?;

        Ok(TableSync { mutex, event, table_ptr })
    }

    /// Locks the table mutex and returns a guard giving `&mut LockTableBody`
    /// access. Dropping the guard unlocks.
    pub fn lock(&self) -> Result<TableGuard<'_>> {
        let _raw_guard = self
            .mutex
            .lock()
            .map_err(|e| Error::system("acquiring table mutex", e))?;
        Ok(TableGuard {
            sync: self,
            _raw_guard,
        })
    }

    /// Broadcasts to every waiter and clears `blocked_count` to zero. Must
    /// be called while holding the guard that performed the mutation.
    fn broadcast(&self, body: &mut LockTableBody) -> Result<()> {
        body.blocked_count = 0;
        self.event
            .set(EventState::Signaled)
            .map_err(|e| Error::system("broadcasting table event", e))
    }

    /// Blocks for up to [`POLL_INTERVAL`] waiting for a signal. Called with
    /// the mutex *not* held; the coordinator always re-locks and re-checks
    /// compatibility afterwards, so a timeout here is indistinguishable
    /// from a spurious wakeup to the caller.
    fn wait_for_signal(&self) {
        let _ = self.event.wait(raw_sync::Timeout::Val(POLL_INTERVAL));
    }
}

pub struct TableGuard<'a> {
    sync: &'a TableSync,
    _raw_guard: Box<dyn LockGuard<'a> + 'a>,
}

impl<'a> Deref for TableGuard<'a> {
    type Target = LockTableBody;
    fn deref(&self) -> &LockTableBody {
        unsafe { &*self.sync.table_ptr }
    }
}

impl<'a> DerefMut for TableGuard<'a> {
    fn deref_mut(&mut self) -> &mut LockTableBody {
        unsafe { &mut *self.sync.table_ptr }
    }
}

impl<'a> TableGuard<'a> {
    pub fn broadcast(&mut self) -> Result<()> {
        let sync = self.sync;
        sync.broadcast(&mut *self)
    }

    /// Releases the mutex, waits briefly for a signal, then re-acquires it.
    /// The coordinator's blocking loop calls this in place of
    /// `cond.wait(mutex)`; because the release/wait/reacquire is not a
    /// single atomic step with this primitive pairing, the wait is bounded
    /// and the caller re-checks compatibility regardless of why it woke.
    pub fn wait_and_relock(self) -> Result<TableGuard<'a>> {
        let sync = self.sync;
        drop(self);
        sync.wait_for_signal();
        sync.lock()
    }
}
