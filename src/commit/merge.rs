// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The per-table row-merging rule used while committing one file-group
//! partition (`spec.md` §4.7.1). Pure in-memory logic: it decides how a
//! table's newly-arrived rows are batched against any pre-existing "last"
//! super-block, without touching any file — [`super::commit_partition`]
//! turns the result into actual [`crate::codec::CompData`] writes.
//!
//! `spec.md` §9 calls this rule out as authoritative over the original's
//! unfinished, commented-out promotion logic.

use crate::codec::CompData;

/// The outcome of merge-committing one table's rows into one partition.
pub(super) struct MergeOutput {
    /// Zero or more full-size super-blocks to append to the `data` file, in
    /// the order they should be appended.
    pub(super) new_data_blocks: Vec<CompData>,
    /// Rows for a single new "last" super-block, if this round produced
    /// one (either a fresh small batch, or a batch merged with the
    /// pre-existing last block).
    pub(super) new_last_rows: Option<Vec<(i64, Vec<u8>)>>,
    /// The pre-existing last block's rows, if it was never consumed by a
    /// merge this round. The caller must carry it forward unchanged (or
    /// relocate it, if the last file is rotating).
    pub(super) leftover_last: Option<Vec<(i64, Vec<u8>)>>,
}

/// Merges `new_rows` (a table's cursor rows within one partition, already
/// sorted ascending by key) against `existing_last` (the rows of that
/// table's pre-existing "last" super-block, if any), per `spec.md` §4.7.1.
///
/// Reads batches of up to `max_rows * 4 / 5` rows at a time (keeping 20%
/// headroom), deciding per batch whether to promote it to a full data
/// block, merge it into the accumulating last block, or start a fresh
/// last block.
pub(super) fn merge_table_rows(
    mut new_rows: Vec<(i64, Vec<u8>)>,
    mut existing_last: Option<Vec<(i64, Vec<u8>)>>,
    min_rows_per_file_block: usize,
    max_rows_per_file_block: usize,
) -> MergeOutput {
    let mut new_data_blocks = Vec::new();
    let mut pending_last: Option<Vec<(i64, Vec<u8>)>> = None;
    let batch_cap = (max_rows_per_file_block * 4 / 5).max(1);

    while !new_rows.is_empty() {
        let take = new_rows.len().min(batch_cap);
        let batch: Vec<(i64, Vec<u8>)> = new_rows.drain(..take).collect();

        if batch.len() >= min_rows_per_file_block {
            new_data_blocks.push(CompData { rows: batch });
            continue;
        }

        // Small batch: merge with whichever last-block rows are still
        // unconsumed — the on-disk last block first, else whatever this
        // same loop has already accumulated as a pending last block.
        let base = existing_last.take().or_else(|| pending_last.take());
        pending_last = Some(match base {
            Some(base_rows) => stable_merge_by_key(base_rows, batch),
            None => batch,
        });
    }

    MergeOutput {
        new_data_blocks,
        new_last_rows: pending_last,
        leftover_last: existing_last,
    }
}

/// Merges two key-sorted row lists into one, preserving relative order
/// within equal keys: `old`'s rows for a given key precede `new`'s rows
/// for the same key, so that the newer (`imem`) rows are read last
/// (`spec.md` §3, §4.7.1 "Tie-break when merging").
fn stable_merge_by_key(
    old: Vec<(i64, Vec<u8>)>,
    new: Vec<(i64, Vec<u8>)>,
) -> Vec<(i64, Vec<u8>)> {
    let mut merged = Vec::with_capacity(old.len() + new.len());
    let mut old_iter = old.into_iter().peekable();
    let mut new_iter = new.into_iter().peekable();

    loop {
        match (old_iter.peek(), new_iter.peek()) {
            (Some(o), Some(n)) => {
                if o.0 <= n.0 {
                    merged.push(old_iter.next().expect("peeked"));
                } else {
                    merged.push(new_iter.next().expect("peeked"));
                }
            }
            (Some(_), None) => merged.push(old_iter.next().expect("peeked")),
            (None, Some(_)) => merged.push(new_iter.next().expect("peeked")),
            (None, None) => break,
        }
    }

    merged
}
