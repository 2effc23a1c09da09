//! Shared Segment Manager: names, creates-or-attaches, and reference-counts
//! the one memory-mapped region backing a file's lock table, shared by any
//! number of unrelated processes that open the same underlying file.

use crate::error::{Error, Result};
use crate::sync::{table_sync, NamedSemaphore, TableSync};
use shared_memory::{Shmem, ShmemConf, ShmemError};

/// Flink path for the segment backing `(dev, ino)`. Lives directly under
/// `/dev/shm` so the same path is reachable from every process, using the
/// `/f_<dev>_<ino>` naming for the underlying POSIX shared-memory object.
pub fn segment_path(dev: u64, ino: u64) -> String {
    format!("/dev/shm/f_{}_{}", dev, ino)
}

/// Name for the named semaphore serializing creation of that segment.
/// POSIX semaphore names must start with exactly one `/` and contain no
/// further slashes, hence the flat `s_<dev>_<ino>` body.
pub fn semaphore_name(dev: u64, ino: u64) -> String {
    format!("/s_{}_{}", dev, ino)
}

/// A mapped segment: the live mapping plus its synchronization primitives.
/// Shared (via `Arc`) by every [`crate::handle::Handle`] in this process
/// that refers to the same underlying file, so the mapping stays alive as
/// long as any of them do; unrelated to the `ref_count` field inside the
/// table itself, which spans every process and every handle, local or not.
pub struct SharedFile {
    pub dev: u64,
    pub ino: u64,
    shmem: Shmem,
    sync: TableSync,
}

unsafe impl Send for SharedFile {}
unsafe impl Sync for SharedFile {}

impl std::fmt::Debug for SharedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFile")
            .field("dev", &self.dev)
            .field("ino", &self.ino)
            .finish()
    }
}

impl SharedFile {
    /// Runs the full creation-serialization protocol and returns a mapped,
    /// synchronized segment for `(dev, ino)`.
    pub fn open(dev: u64, ino: u64) -> Result<Self> {
        let sem_name = semaphore_name(dev, ino);
        let path = segment_path(dev, ino);
        let size = table_sync::layout_size();

        match NamedSemaphore::create_exclusive(&sem_name, 0)? {
            Some(sem) => {
                // We won the creation race: nobody else can be between
                // create and post, so there is nothing to wait for.
                let result = Self::create_and_init(&path, size);
                sem.post()?;
                result
            }
            None => {
                let sem = NamedSemaphore::open(&sem_name)?;
                sem.wait()?;
                let result = Self::create_and_init(&path, size).or_else(|_| Self::attach_existing(&path));
                sem.post()?;
                result
            }
        }
    }

    fn create_and_init(path: &str, size: usize) -> Result<Self> {
        let shmem = match ShmemConf::new().size(size).flink(path).create() {
            Ok(shmem) => shmem,
            Err(ShmemError::LinkExists) => return Self::attach_existing(path),
            Err(e) => return Err(Error::system(format!("creating shared segment {}", path), e)),
        };
        let base = shmem.as_ptr();
        let (dev, ino) = parse_path(path)?;
        let sync = unsafe { TableSync::init(base)? };
        {
            let mut guard = sync.lock()?;
            guard.ref_count = 1;
        }
        Ok(SharedFile { dev, ino, shmem, sync })
    }

    fn attach_existing(path: &str) -> Result<Self> {
        let shmem = ShmemConf::new()
            .flink(path)
            .open()
            .map_err(|e| Error::system(format!("attaching shared segment {}", path), e))?;
        let base = shmem.as_ptr();
        let (dev, ino) = parse_path(path)?;
        let sync = unsafe { TableSync::attach(base)? };
        {
            let mut guard = sync.lock()?;
            guard.ref_count += 1;
        }
        Ok(SharedFile { dev, ino, shmem, sync })
    }

    pub fn sync(&self) -> &TableSync {
        &self.sync
    }

    /// Increments the shared `ref_count`. Called once per [`crate::handle::Handle`]
    /// that starts referring to this segment, including `duplicate`/`duplicate_to`
    /// and fork inheritance, not once per process.
    pub fn bump_ref_count(&self) -> Result<()> {
        let mut guard = self.sync.lock()?;
        guard.ref_count += 1;
        Ok(())
    }

    /// Decrements the shared `ref_count` under the table mutex; if it drops
    /// to zero, unlinks the segment and the bootstrap semaphore (the
    /// semaphore is unlinked only after the last handle).
    pub fn release_ref(&self) -> Result<()> {
        let last = {
            let mut guard = self.sync.lock()?;
            guard.ref_count = guard.ref_count.saturating_sub(1);
            guard.ref_count == 0
        };

        if last {
            let path = segment_path(self.dev, self.ino);
            if let Err(err) = std::fs::remove_file(&path) {
                log::warn!("failed to unlink shared segment {}: {}", path, err);
            }
            let sem_name = semaphore_name(self.dev, self.ino);
            if let Err(err) = NamedSemaphore::unlink(&sem_name) {
                log::warn!("failed to unlink bootstrap semaphore {}: {}", sem_name, err);
            }
        }

        Ok(())
    }
}

fn parse_path(path: &str) -> Result<(u64, u64)> {
    let name = path
        .rsplit('/')
        .next()
        .ok_or_else(|| Error::InvalidArgument(format!("malformed segment path {}", path)))?;
    let mut parts = name.trim_start_matches("f_").splitn(2, '_');
    let dev = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidArgument(format!("malformed segment name {}", name)))?;
    let ino = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::InvalidArgument(format!("malformed segment name {}", name)))?;
    Ok((dev, ino))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_path_embeds_dev_and_ino() {
        assert_eq!(segment_path(42, 7), "/dev/shm/f_42_7");
    }

    #[test]
    fn semaphore_name_embeds_dev_and_ino() {
        assert_eq!(semaphore_name(42, 7), "/s_42_7");
    }

    #[test]
    fn parse_path_round_trips_segment_path() {
        let path = segment_path(123, 456);
        assert_eq!(parse_path(&path).unwrap(), (123, 456));
    }
}
