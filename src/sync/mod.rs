//! Process-shared synchronization primitives: a named semaphore used to
//! serialize shared-segment creation, and a mutex/event pair guarding the
//! lock table itself.

pub mod semaphore;
pub mod table_sync;

pub use semaphore::NamedSemaphore;
pub use table_sync::{TableGuard, TableSync};
