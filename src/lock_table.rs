//! Fixed-capacity pool of lock records, linked as an intrusive free-ordered
//! list via integer indices.
//!
//! Living in shared memory rules out absolute pointers -- they would alias
//! differently in every mapping process -- so the list is addressed purely
//! by index into `slots`.

use crate::error::{Error, Result};
use crate::interval::Region;
use crate::owner::{Owner, OwnerSet};
use std::fmt;

pub const MAX_LOCKS: usize = 10;

pub const SENTINEL_LAST: i32 = -1;
pub const SENTINEL_FREE: i32 = -2;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct LockRecord {
    pub start: u64,
    pub length: u64,
    pub kind: LockKind,
    pub owners: OwnerSet,
    pub next: i32,
}

impl LockRecord {
    const FREE: LockRecord = LockRecord {
        start: 0,
        length: 0,
        kind: LockKind::Read,
        owners: OwnerSet::single(Owner { pid: 0, descriptor: 0 }),
        next: SENTINEL_FREE,
    };

    pub fn region(&self) -> Region {
        Region::new(self.start, self.length)
    }

    pub fn is_free(&self) -> bool {
        self.length == 0
    }
}

/// The part of [`crate::segment::SharedFile`]'s mapped memory that is
/// protected by the process-shared mutex: the table itself plus the
/// bookkeeping fields the coordinator and lifecycle need.
///
/// `repr(C)`, plain-old-data: every field is `Copy` and the struct is
/// placed directly at a fixed offset inside the mapped segment, never
/// serialized.
#[repr(C)]
pub struct LockTableBody {
    pub head: i32,
    pub slots: [LockRecord; MAX_LOCKS],
    pub blocked_count: u32,
    pub ref_count: u32,
}

impl LockTableBody {
    /// Zero/sentinel-initializes a freshly mapped segment.
    pub fn init_in_place(body: &mut LockTableBody) {
        body.head = SENTINEL_LAST;
        for slot in body.slots.iter_mut() {
            *slot = LockRecord::FREE;
        }
        body.blocked_count = 0;
        body.ref_count = 0;
    }

    /// Active record indices in list order (head-first). Collected into a
    /// small `Vec` for scratch-space convenience in the calling process;
    /// this allocation never touches the shared segment itself.
    pub fn active_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(MAX_LOCKS);
        let mut cursor = self.head;
        while cursor != SENTINEL_LAST {
            let idx = cursor as usize;
            out.push(idx);
            cursor = self.slots[idx].next;
        }
        out
    }

    /// Inserts `record` into the first free slot and links it at `head`.
    pub fn insert(&mut self, mut record: LockRecord) -> Result<usize> {
        let idx = self
            .slots
            .iter()
            .position(|s| s.is_free())
            .ok_or_else(|| Error::CapacityExceeded(format!("lock table is at capacity ({})", MAX_LOCKS)))?;
        record.next = self.head;
        self.slots[idx] = record;
        self.head = idx as i32;
        Ok(idx)
    }

    /// Unlinks and zeros the slot at `index`. `index` must currently be
    /// reachable from `head`.
    pub fn remove(&mut self, index: usize) {
        if self.head == index as i32 {
            self.head = self.slots[index].next;
        } else {
            let mut cursor = self.head;
            while cursor != SENTINEL_LAST {
                let cur = cursor as usize;
                if self.slots[cur].next == index as i32 {
                    self.slots[cur].next = self.slots[index].next;
                    break;
                }
                cursor = self.slots[cur].next;
            }
        }
        self.slots[index] = LockRecord::FREE;
    }

    /// Number of currently free slots. Used by [`crate::region_mutator::release`]
    /// to validate that a split has enough room before any record is touched.
    pub fn free_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_free()).count()
    }

    /// Copies out the currently active records, in list order, for
    /// diagnostics. Takes no lock itself: call this while holding the
    /// table's guard, the same way `rl_print` walked the table under the
    /// original's mutex.
    pub fn snapshot(&self) -> TableSnapshot {
        let records = self
            .active_indices()
            .into_iter()
            .map(|idx| {
                let slot = &self.slots[idx];
                SnapshotRecord {
                    start: slot.start,
                    length: slot.length,
                    kind: slot.kind,
                    owners: slot.owners.iter().collect(),
                }
            })
            .collect();
        TableSnapshot {
            records,
            blocked_count: self.blocked_count,
            ref_count: self.ref_count,
        }
    }
}

/// Owned, point-in-time copy of a table's active records for printing.
/// Unlike [`LockTableBody`] this is ordinary heap-allocated data and is
/// safe to hold outside the mutex guard.
#[derive(Debug)]
pub struct SnapshotRecord {
    pub start: u64,
    pub length: u64,
    pub kind: LockKind,
    pub owners: Vec<Owner>,
}

#[derive(Debug)]
pub struct TableSnapshot {
    pub records: Vec<SnapshotRecord>,
    pub blocked_count: u32,
    pub ref_count: u32,
}

impl fmt::Display for TableSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ref_count={} blocked={}", self.ref_count, self.blocked_count)?;
        for rec in &self.records {
            let kind = match rec.kind {
                LockKind::Read => "READ",
                LockKind::Write => "WRITE",
            };
            write!(f, "  [{}, {}) {}", rec.start, rec.start + rec.length, kind)?;
            for owner in &rec.owners {
                write!(f, " pid={},fd={}", owner.pid, owner.descriptor)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(start: u64, length: u64, kind: LockKind, owner: Owner) -> LockRecord {
        LockRecord {
            start,
            length,
            kind,
            owners: OwnerSet::single(owner),
            next: SENTINEL_FREE,
        }
    }

    fn fresh_body() -> Box<LockTableBody> {
        let mut body = Box::new(LockTableBody {
            head: SENTINEL_FREE,
            slots: [LockRecord::FREE; MAX_LOCKS],
            blocked_count: 0,
            ref_count: 0,
        });
        LockTableBody::init_in_place(&mut body);
        body
    }

    #[test]
    fn insert_links_at_head() {
        let mut body = fresh_body();
        let owner = Owner::new(1, 0);
        let i0 = body.insert(rec(0, 10, LockKind::Read, owner)).unwrap();
        let i1 = body.insert(rec(10, 10, LockKind::Read, owner)).unwrap();
        assert_eq!(body.head, i1 as i32);
        assert_eq!(body.slots[i1].next, i0 as i32);
        assert_eq!(body.slots[i0].next, SENTINEL_LAST);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut body = fresh_body();
        let owner = Owner::new(1, 0);
        for i in 0..MAX_LOCKS {
            body.insert(rec(i as u64 * 100, 1, LockKind::Read, owner)).unwrap();
        }
        assert!(body.insert(rec(99999, 1, LockKind::Read, owner)).is_err());
    }

    #[test]
    fn remove_unlinks_from_middle() {
        let mut body = fresh_body();
        let owner = Owner::new(1, 0);
        let i0 = body.insert(rec(0, 10, LockKind::Read, owner)).unwrap();
        let i1 = body.insert(rec(10, 10, LockKind::Read, owner)).unwrap();
        let i2 = body.insert(rec(20, 10, LockKind::Read, owner)).unwrap();
        body.remove(i1);
        assert!(body.slots[i1].is_free());
        let active = body.active_indices();
        assert_eq!(active, vec![i2, i0]);
    }

    #[test]
    fn remove_head_updates_head() {
        let mut body = fresh_body();
        let owner = Owner::new(1, 0);
        let i0 = body.insert(rec(0, 10, LockKind::Read, owner)).unwrap();
        body.remove(i0);
        assert_eq!(body.head, SENTINEL_LAST);
        assert!(body.active_indices().is_empty());
    }

    #[test]
    fn snapshot_reports_active_records_and_their_owners() {
        let mut body = fresh_body();
        let owner = Owner::new(42, 3);
        body.insert(rec(0, 10, LockKind::Write, owner)).unwrap();
        let snap = body.snapshot();
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.records[0].owners, vec![owner]);
        let rendered = snap.to_string();
        assert!(rendered.contains("WRITE"));
        assert!(rendered.contains("pid=42,fd=3"));
    }
}
