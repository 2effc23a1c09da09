//! Region mutator: `acquire_read`, `acquire_write`, `release`.
//!
//! All three run under the table mutex (the caller holds the guard) and are
//! atomic to outside observers -- nothing here performs I/O or blocks.

use crate::error::{Error, Result};
use crate::interval::{equal, intersects, touches_or_intersects, union_bounds, Region};
use crate::lock_table::{LockKind, LockRecord, LockTableBody, SENTINEL_FREE};
use crate::owner::Owner;

/// Shared skeleton for `acquire_read`/`acquire_write`: fast-path on an exact
/// region+kind match, then repeatedly fold in any owner-held record the
/// `merge` predicate accepts, then insert the consolidated record.
fn acquire(
    table: &mut LockTableBody,
    mut region: Region,
    kind: LockKind,
    owner: Owner,
    merge: impl Fn(Region, Region, LockKind) -> bool,
) -> Result<()> {
    if let Some(idx) = table
        .active_indices()
        .into_iter()
        .find(|&i| table.slots[i].kind == kind && equal(table.slots[i].region(), region))
    {
        return table.slots[idx].owners.add(owner);
    }

    loop {
        let hit = table.active_indices().into_iter().find(|&i| {
            let r = &table.slots[i];
            r.owners.contains(owner) && merge(r.region(), region, r.kind)
        });
        let Some(idx) = hit else { break };
        region = union_bounds(region, table.slots[idx].region());
        table.slots[idx].owners.remove(owner);
        if table.slots[idx].owners.is_empty() {
            table.remove(idx);
        }
    }

    table
        .insert(LockRecord {
            start: region.start,
            length: region.length,
            kind,
            owners: crate::owner::OwnerSet::single(owner),
            next: SENTINEL_FREE,
        })
        .map(|_| ())
}

/// Any region owned by `owner` that touches or intersects the proposal is
/// absorbed regardless of its kind: an overlapping `WRITE` record owned by
/// the same owner is removed and folded into the consolidated `READ`, since
/// two overlapping records owned by the same owner with different kinds
/// would otherwise coexist illegally.
pub fn acquire_read(table: &mut LockTableBody, region: Region, owner: Owner) -> Result<()> {
    acquire(table, region, LockKind::Read, owner, |r, region, _kind| {
        touches_or_intersects(r, region)
    })
}

/// Any region owned by `owner` that strictly overlaps the proposal is
/// absorbed and promoted to `WRITE`; same-kind (`WRITE`) regions merely
/// touching also coalesce.
pub fn acquire_write(table: &mut LockTableBody, region: Region, owner: Owner) -> Result<()> {
    acquire(table, region, LockKind::Write, owner, |r, region, kind| {
        intersects(r, region) || (matches!(kind, LockKind::Write) && touches_or_intersects(r, region))
    })
}

enum Overlap {
    /// `record ⊆ region`: the whole record is released.
    FullyCovered,
    /// `region ⊂ record` (strict interior): two leftover pieces remain.
    Interior { left: Region, right: Region },
    /// `region` overlaps `record`'s left edge: the right piece remains.
    LeftCovered { right: Region },
    /// `region` overlaps `record`'s right edge: the left piece remains.
    RightCovered { left: Region },
}

fn classify(record: Region, region: Region) -> Overlap {
    let covers_start = region.start <= record.start;
    let covers_end = region.end() >= record.end();
    match (covers_start, covers_end) {
        (true, true) => Overlap::FullyCovered,
        (false, false) => Overlap::Interior {
            left: Region::new(record.start, region.start - record.start),
            right: Region::new(region.end(), record.end() - region.end()),
        },
        (true, false) => Overlap::LeftCovered {
            right: Region::new(region.end(), record.end() - region.end()),
        },
        (false, true) => Overlap::RightCovered {
            left: Region::new(record.start, region.start - record.start),
        },
    }
}

/// Releases `owner`'s claim on `region`. Never an error for a region the
/// caller does not hold -- a call that matches nothing is a silent no-op.
///
/// Capacity is validated for the *entire* operation before any record is
/// touched, so a `CapacityExceeded` here never leaves the table in a
/// partially-split state.
pub fn release(table: &mut LockTableBody, region: Region, owner: Owner) -> Result<()> {
    struct Plan {
        idx: usize,
        deletes_record: bool,
        kind: LockKind,
        pieces: Vec<Region>,
    }

    // A single owner's regions never overlap or touch (invariant 3), but an
    // owner can hold disjoint records of *different* kinds (e.g. a READ and
    // a WRITE on separate ranges) -- a release spanning both must keep each
    // leftover piece's kind tied to the record it came from, not a single
    // kind for the whole operation.
    let mut plans = Vec::new();
    let mut net_new_slots: i64 = 0;

    for idx in table.active_indices() {
        let record = &table.slots[idx];
        if !intersects(record.region(), region) || !record.owners.contains(owner) {
            continue;
        }
        let deletes_record = record.owners.len() == 1;
        let pieces = match classify(record.region(), region) {
            Overlap::FullyCovered => vec![],
            Overlap::Interior { left, right } => vec![left, right],
            Overlap::LeftCovered { right } => vec![right],
            Overlap::RightCovered { left } => vec![left],
        };
        net_new_slots += pieces.len() as i64 - deletes_record as i64;
        plans.push(Plan {
            idx,
            deletes_record,
            kind: record.kind,
            pieces,
        });
    }

    if plans.is_empty() {
        return Ok(());
    }

    if net_new_slots > 0 && (table.free_slot_count() as i64) < net_new_slots {
        return Err(Error::CapacityExceeded(format!(
            "unlock would require {} free slot(s), only {} available",
            net_new_slots,
            table.free_slot_count()
        )));
    }

    let mut leftovers = Vec::new();
    for plan in &plans {
        table.slots[plan.idx].owners.remove(owner);
        if plan.deletes_record {
            table.remove(plan.idx);
        }
        leftovers.extend(plan.pieces.iter().copied().map(|piece| (piece, plan.kind)));
    }

    for (piece, kind) in leftovers {
        table
            .insert(LockRecord {
                start: piece.start,
                length: piece.length,
                kind,
                owners: crate::owner::OwnerSet::single(owner),
                next: SENTINEL_FREE,
            })
            .map(|_| ())?;
    }

    Ok(())
}

/// Removes every trace of `owner` from the table with no splitting: every
/// record it is party to loses just that owner, and is deleted if that was
/// its last one. Used on handle close, where the descriptor disappears
/// entirely rather than releasing a specific region.
pub fn strip_owner(table: &mut LockTableBody, owner: Owner) {
    for idx in table.active_indices() {
        if !table.slots[idx].owners.contains(owner) {
            continue;
        }
        table.slots[idx].owners.remove(owner);
        if table.slots[idx].owners.is_empty() {
            table.remove(idx);
        }
    }
}

/// Adds `to` as a co-owner of every record currently owned by `from`,
/// respecting each record's `MAX_OWNERS` capacity. Used by `duplicate`/
/// `duplicate_to`, when the source handle owns the lock, and by fork
/// inheritance.
pub fn duplicate_owner(table: &mut LockTableBody, from: Owner, to: Owner) -> Result<()> {
    for idx in table.active_indices() {
        if table.slots[idx].owners.contains(from) {
            table.slots[idx].owners.add(to)?;
        }
    }
    Ok(())
}
