//! Liveness sweeper: removes owners whose pid no longer exists.
//!
//! Run at the start of every table operation, before the compatibility
//! oracle is consulted. It never broadcasts on its own -- the caller's
//! subsequent acquire either needs no wake (it succeeded) or is itself an
//! unlock, which broadcasts.

use crate::lock_table::LockTableBody;
use crate::owner::Owner;

/// `true` iff `pid` still exists. A `kill(pid, 0)` failing with `EPERM`
/// still proves the process is alive (just owned by another user) -- only
/// `ESRCH` proves it is dead. Easy to get backwards.
fn pid_is_alive(pid: libc::pid_t) -> bool {
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    let err = std::io::Error::last_os_error();
    err.raw_os_error() != Some(libc::ESRCH)
}

/// Removes owners of dead processes from every active record, deleting any
/// record that becomes ownerless as a result.
pub fn sweep(table: &mut LockTableBody) {
    for idx in table.active_indices() {
        let dead: Vec<Owner> = table.slots[idx]
            .owners
            .iter()
            .filter(|o| !pid_is_alive(o.pid))
            .collect();

        for owner in dead {
            log::debug!(
                "sweeper: reclaiming lock slot {} from dead owner pid={} fd={}",
                idx,
                owner.pid,
                owner.descriptor
            );
            table.slots[idx].owners.remove(owner);
        }

        if table.slots[idx].owners.is_empty() {
            table.remove(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock_table::{LockKind, LockRecord, MAX_LOCKS, SENTINEL_FREE, SENTINEL_LAST};
    use crate::owner::OwnerSet;

    fn fresh_body() -> Box<LockTableBody> {
        let mut body = Box::new(LockTableBody {
            head: SENTINEL_LAST,
            slots: [LockRecord {
                start: 0,
                length: 0,
                kind: LockKind::Read,
                owners: OwnerSet::single(Owner::new(0, 0)),
                next: SENTINEL_FREE,
            }; MAX_LOCKS],
            blocked_count: 0,
            ref_count: 0,
        });
        LockTableBody::init_in_place(&mut body);
        body
    }

    #[test]
    fn pid_zero_parent_group_is_alive() {
        // pid 1 (init/systemd) always exists on a running Unix system.
        assert!(pid_is_alive(1));
    }

    #[test]
    fn sweep_leaves_alive_owner_untouched() {
        let mut body = fresh_body();
        let me = Owner::new(std::process::id() as libc::pid_t, 0);
        body.insert(LockRecord {
            start: 0,
            length: 100,
            kind: LockKind::Read,
            owners: OwnerSet::single(me),
            next: SENTINEL_FREE,
        })
        .unwrap();

        sweep(&mut body);
        assert_eq!(body.active_indices().len(), 1);
    }

    #[test]
    fn sweep_removes_record_owned_only_by_dead_pid() {
        let mut body = fresh_body();
        // A pid astronomically unlikely to be in use; `kill(pid, 0)` on a
        // nonexistent pid fails with ESRCH.
        let dead = Owner::new(i32::MAX - 1, 0);
        body.insert(LockRecord {
            start: 0,
            length: 100,
            kind: LockKind::Write,
            owners: OwnerSet::single(dead),
            next: SENTINEL_FREE,
        })
        .unwrap();

        sweep(&mut body);
        assert!(body.active_indices().is_empty());
    }
}
