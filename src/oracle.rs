//! Compatibility oracle: decides whether a proposed lock conflicts with
//! existing locks owned by other owners.

use crate::interval::{intersects, Region};
use crate::lock_table::{LockKind, LockTableBody};
use crate::owner::Owner;

/// A proposed `(region, kind)` from `owner` is incompatible with the table
/// iff some active record intersects it, is owned by someone other than
/// `owner`, and either the proposal is a write or the record is a write.
///
/// Two read locks from disjoint owners on the same region are compatible.
/// A record `owner` itself already holds is never a conflict for `owner`.
pub fn is_compatible(table: &LockTableBody, region: Region, kind: LockKind, owner: Owner) -> bool {
    for idx in table.active_indices() {
        let record = &table.slots[idx];
        if !intersects(record.region(), region) {
            continue;
        }
        if !record.owners.contains_other(owner) {
            continue;
        }
        let conflicting = matches!(kind, LockKind::Write) || matches!(record.kind, LockKind::Write);
        if conflicting {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock_table::{LockRecord, MAX_LOCKS, SENTINEL_LAST};
    use crate::owner::OwnerSet;

    fn body_with(records: Vec<(Region, LockKind, Owner)>) -> Box<LockTableBody> {
        let mut body = Box::new(LockTableBody {
            head: SENTINEL_LAST,
            slots: [LockRecord {
                start: 0,
                length: 0,
                kind: LockKind::Read,
                owners: OwnerSet::single(Owner::new(0, 0)),
                next: crate::lock_table::SENTINEL_FREE,
            }; MAX_LOCKS],
            blocked_count: 0,
            ref_count: 0,
        });
        for (region, kind, owner) in records {
            body.insert(LockRecord {
                start: region.start,
                length: region.length,
                kind,
                owners: OwnerSet::single(owner),
                next: crate::lock_table::SENTINEL_FREE,
            })
            .unwrap();
        }
        body
    }

    #[test]
    fn two_reads_from_different_owners_are_compatible() {
        let h1 = Owner::new(1, 0);
        let h2 = Owner::new(2, 0);
        let body = body_with(vec![(Region::new(0, 100), LockKind::Read, h1)]);
        assert!(is_compatible(&body, Region::new(0, 100), LockKind::Read, h2));
    }

    #[test]
    fn write_conflicts_with_existing_read_from_other_owner() {
        let h1 = Owner::new(1, 0);
        let h2 = Owner::new(2, 0);
        let body = body_with(vec![(Region::new(0, 100), LockKind::Read, h1)]);
        assert!(!is_compatible(&body, Region::new(50, 10), LockKind::Write, h2));
    }

    #[test]
    fn self_owned_record_never_conflicts() {
        let h1 = Owner::new(1, 0);
        let body = body_with(vec![(Region::new(0, 100), LockKind::Write, h1)]);
        assert!(is_compatible(&body, Region::new(0, 100), LockKind::Write, h1));
    }

    #[test]
    fn non_overlapping_regions_are_compatible() {
        let h1 = Owner::new(1, 0);
        let h2 = Owner::new(2, 0);
        let body = body_with(vec![(Region::new(0, 100), LockKind::Write, h1)]);
        assert!(is_compatible(&body, Region::new(100, 50), LockKind::Write, h2));
    }
}
