// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The commit worker: the flush pipeline that turns a frozen `imem`
//! generation into new, atomically-published file groups (`spec.md` §4.7).
//!
//! Runs on a dedicated background thread spawned by
//! [`crate::repo::Repository::trigger_commit`] and holds the repository
//! mutex only across the brief metadata operations called out in
//! `spec.md` §5 ("Hold it only across pointer swaps and metadata updates;
//! never across I/O"); the bulk of this module's work — reading and
//! writing `head`/`data`/`last` files — runs without any lock held.

mod merge;

use crate::cache::FrozenCache;
use crate::checksum::Checksum;
use crate::codec::{self, CompBlock, CompData, CompIdx, CompInfo, Compression};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::memtable::Memtable;
use crate::meta::TableId;
use crate::time_partition::{file_id_of, key_range_of};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::repo::Inner;

/// Past this size, a partition's `last` file is rotated to a fresh file
/// rather than appended to further (`spec.md` §4.7, §6.4).
pub(crate) const MAX_LAST_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// A frozen generation of one repository's tables and cache, owned
/// exclusively by a commit attempt (`spec.md` §3 "imem / mem").
///
/// Handed back to [`crate::repo::Inner::imem`] on a failed attempt so a
/// subsequent `trigger_commit` retries over the same snapshot
/// (`spec.md` §7).
pub(crate) struct ImemSnapshot {
    pub(crate) tables: HashMap<TableId, Memtable>,
    pub(crate) cache: FrozenCache,
}

/// Entry point run on the commit thread. Never panics on a failed commit
/// attempt — failures are logged and leave `imem` pinned for retry, per
/// `spec.md` §7.
pub(crate) fn commit_worker<FS: FileSystem>(
    inner: Arc<Mutex<Inner<FS>>>,
    config: Config,
    snapshot: ImemSnapshot,
) {
    let result = run_commit(&inner, &config, &snapshot);

    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
    let mut guard = inner.lock().expect("lock poisoned");
    guard.commit_pending = false;

    match result {
        Ok(()) => {
            guard.cache.reclaim(snapshot.cache);
            guard.imem = None;
            log::debug!("commit completed successfully");
        }
        Err(err) => {
            log::error!("commit failed, retaining imem snapshot for retry: {err}");
            guard.imem = Some(snapshot);
        }
    }
}

fn run_commit<FS: FileSystem>(
    inner: &Arc<Mutex<Inner<FS>>>,
    config: &Config,
    snapshot: &ImemSnapshot,
) -> Result<()> {
    let mut table_rows: HashMap<u32, (u64, Vec<(i64, Vec<u8>)>)> = HashMap::new();
    for (id, memtable) in &snapshot.tables {
        let rows: Vec<(i64, Vec<u8>)> = memtable
            .iter()
            .map(|(key, row)| (key, snapshot.cache.resolve(row.handle).to_vec()))
            .collect();
        if !rows.is_empty() {
            table_rows.insert(id.tid, (id.uid, rows));
        }
    }

    let (Some(key_first), Some(key_last)) = table_rows
        .values()
        .filter_map(|(_, rows)| Some((rows.first()?.0, rows.last()?.0)))
        .fold((None, None), |(min, max), (first, last)| {
            (
                Some(min.map_or(first, |m: i64| m.min(first))),
                Some(max.map_or(last, |m: i64| m.max(last))),
            )
        })
    else {
        log::debug!("trigger_commit on an empty imem snapshot: nothing to do");
        return Ok(());
    };

    let sfid = file_id_of(key_first, config.days_per_file, config.precision);
    let efid = file_id_of(key_last, config.days_per_file, config.precision);

    let mut pos: HashMap<u32, usize> = HashMap::new();

    for fid in sfid..=efid {
        let (_, max_key) = key_range_of(fid, config.days_per_file, config.precision);

        let mut batches: HashMap<u32, Vec<(i64, Vec<u8>)>> = HashMap::new();
        for (tid, (_, rows)) in &table_rows {
            let cursor = pos.entry(*tid).or_insert(0);
            let batch = take_batch_for_range(rows, cursor, max_key);
            if !batch.is_empty() {
                batches.insert(*tid, batch);
            }
        }

        if batches.is_empty() {
            // No table has rows in this partition: leave it untouched on
            // disk entirely (`spec.md` §4.7 step 3a).
            continue;
        }

        commit_partition(inner, config, fid, &table_rows, &batches)?;
    }

    Ok(())
}

/// Slices the prefix of `rows` (starting at `*cursor`) whose keys are
/// `<= max_key`, advancing `*cursor` past it. Rows are assumed sorted
/// ascending and partitions contiguous, so every row at or after `*cursor`
/// already satisfies the partition's `min_key`.
fn take_batch_for_range(rows: &[(i64, Vec<u8>)], cursor: &mut usize, max_key: i64) -> Vec<(i64, Vec<u8>)> {
    let start = *cursor;
    let mut end = start;
    while end < rows.len() && rows[end].0 <= max_key {
        end += 1;
    }
    *cursor = end;
    rows[start..end].to_vec()
}

/// Commits every table's rows destined for file-id `fid`, producing a new
/// `head` file and, if the `last` file is being rotated, a new `last`
/// file, then atomically publishing them (`spec.md` §4.7 step 3).
fn commit_partition<FS: FileSystem>(
    inner: &Arc<Mutex<Inner<FS>>>,
    config: &Config,
    fid: i32,
    table_rows: &HashMap<u32, (u64, Vec<(i64, Vec<u8>)>)>,
    batches: &HashMap<u32, Vec<(i64, Vec<u8>)>>,
) -> Result<()> {
    let max_tables = config.max_tables as u32;

    let group = {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = inner.lock().expect("lock poisoned");
        guard.store.get_or_create(fid)?.clone()
    };

    let mut old_head = FS::open(&group.head)?;
    let old_idx = codec::load_comp_idx(&mut old_head, config.max_tables)?;

    let rotate_last = FS::file_len(&group.last)? > MAX_LAST_FILE_SIZE;

    let new_head_path = tmp_path(&group.head);
    let mut new_head = FS::create_new(&new_head_path)?;
    init_head_prefix(&mut new_head, config.max_tables)?;

    let new_last_path = tmp_path(&group.last);
    let mut last_writer = if rotate_last {
        FS::create_new(&new_last_path)?
    } else {
        FS::open_append(&group.last)?
    };
    let mut old_last = FS::open(&group.last)?;
    let mut data_writer = FS::open_append(&group.data)?;

    let mut new_idx = vec![CompIdx::default(); config.max_tables as usize];

    for tid in 0..max_tables {
        let old = old_idx[tid as usize];
        let uid = table_rows.get(&tid).map_or(old.uid, |(uid, _)| *uid);

        match batches.get(&tid).cloned() {
            None => carry_forward_untouched_table(
                &mut old_head,
                &mut old_last,
                &mut new_head,
                &mut last_writer,
                old,
                uid,
                tid,
                rotate_last,
                &mut new_idx[tid as usize],
            )?,
            Some(batch) => merge_commit_table(
                &mut old_head,
                &mut old_last,
                &mut new_head,
                &mut data_writer,
                &mut last_writer,
                config,
                old,
                uid,
                tid,
                batch,
                rotate_last,
                &mut new_idx[tid as usize],
            )?,
        }
    }

    codec::store_comp_idx(&mut new_head, &new_idx)?;
    new_head.sync_all()?;
    FS::rename(&new_head_path, &group.head)?;

    if rotate_last {
        last_writer.sync_all()?;
        FS::rename(&new_last_path, &group.last)?;
    }

    Ok(())
}

/// A table with no rows in this partition this round: its existing data
/// and/or last super-blocks are either copied forward verbatim (zero-copy)
/// or, if the last file is rotating, physically relocated
/// (`spec.md` §4.7 step 3d).
#[expect(clippy::too_many_arguments, reason = "mirrors the commit loop's per-table state")]
fn carry_forward_untouched_table<R, W>(
    old_head: &mut R,
    old_last: &mut R,
    new_head: &mut W,
    new_last: &mut W,
    old: CompIdx,
    uid: u64,
    tid: u32,
    rotate_last: bool,
    out: &mut CompIdx,
) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    if old.is_empty() {
        return Ok(());
    }

    out.uid = uid;
    out.tid = tid;
    out.has_last = old.has_last;
    out.num_super_blocks = old.num_super_blocks;
    out.max_key = old.max_key;

    if old.data_len > 0 {
        let (offset, len, checksum) = relocate_region(old_head, old.data_offset, old.data_len, new_head)?;
        out.data_offset = offset;
        out.data_len = len;
        out.data_checksum = checksum.into_u32();
    }

    if old.last_len > 0 {
        if rotate_last {
            let info = codec::load_comp_blocks(old_head, old.last_offset, old.last_len)?;
            let block = *info
                .blocks
                .first()
                .ok_or_else(|| Error::FormatError("last CompInfo has no blocks".into()))?;
            let comp_data = codec::load_comp_cols(old_last, &block)?;
            let (data_offset, data_len) = codec::append_comp_data(new_last, &comp_data)?;
            let new_block = CompBlock { offset: data_offset, len: data_len, ..block };
            let new_info = CompInfo { uid, tid, blocks: vec![new_block] };
            let (offset, len, checksum) = write_table_region(new_head, &new_info)?;
            out.last_offset = offset;
            out.last_len = len;
            out.last_checksum = checksum;
        } else {
            let (offset, len, checksum) = relocate_region(old_head, old.last_offset, old.last_len, new_head)?;
            out.last_offset = offset;
            out.last_len = len;
            out.last_checksum = checksum.into_u32();
        }
    }

    Ok(())
}

/// A table with rows to merge-commit this round (`spec.md` §4.7.1).
#[expect(clippy::too_many_arguments, reason = "mirrors the commit loop's per-table state")]
fn merge_commit_table<R, W>(
    old_head: &mut R,
    old_last: &mut R,
    new_head: &mut W,
    data_writer: &mut W,
    last_writer: &mut W,
    config: &Config,
    old: CompIdx,
    uid: u64,
    tid: u32,
    batch: Vec<(i64, Vec<u8>)>,
    rotate_last: bool,
    out: &mut CompIdx,
) -> Result<()>
where
    R: Read + Seek,
    W: Write + Seek,
{
    let mut data_blocks: Vec<CompBlock> = if old.data_len > 0 {
        codec::load_comp_blocks(old_head, old.data_offset, old.data_len)?.blocks
    } else {
        Vec::new()
    };

    let existing_last_rows = if old.last_len > 0 {
        let info = codec::load_comp_blocks(old_head, old.last_offset, old.last_len)?;
        match info.blocks.first() {
            Some(block) => Some(codec::load_comp_cols(old_last, block)?.rows),
            None => None,
        }
    } else {
        None
    };

    let merged = merge::merge_table_rows(
        batch,
        existing_last_rows,
        config.min_rows_per_file_block as usize,
        config.max_rows_per_file_block as usize,
    );

    for block in &merged.new_data_blocks {
        let (offset, len) = codec::append_comp_data(data_writer, block)?;
        data_blocks.push(block_descriptor(block, offset, len, false));
    }

    let last_block = if let Some(rows) = merged.new_last_rows {
        let data = CompData { rows };
        let (offset, len) = codec::append_comp_data(last_writer, &data)?;
        Some(block_descriptor(&data, offset, len, true))
    } else if let Some(leftover) = merged.leftover_last {
        if rotate_last {
            let data = CompData { rows: leftover };
            let (offset, len) = codec::append_comp_data(last_writer, &data)?;
            Some(block_descriptor(&data, offset, len, true))
        } else {
            let info = codec::load_comp_blocks(old_head, old.last_offset, old.last_len)?;
            info.blocks.first().copied()
        }
    } else {
        None
    };

    out.uid = uid;
    out.tid = tid;
    out.has_last = last_block.is_some();
    out.num_super_blocks = data_blocks.len() as u32 + u32::from(last_block.is_some());
    out.max_key = data_blocks
        .iter()
        .map(|b| b.key_last)
        .chain(last_block.iter().map(|b| b.key_last))
        .max()
        .unwrap_or(old.max_key);

    if !data_blocks.is_empty() {
        let info = CompInfo { uid, tid, blocks: data_blocks };
        let (offset, len, checksum) = write_table_region(new_head, &info)?;
        out.data_offset = offset;
        out.data_len = len;
        out.data_checksum = checksum;
    }

    if let Some(block) = last_block {
        let info = CompInfo { uid, tid, blocks: vec![block] };
        let (offset, len, checksum) = write_table_region(new_head, &info)?;
        out.last_offset = offset;
        out.last_len = len;
        out.last_checksum = checksum;
    }

    Ok(())
}

fn block_descriptor(data: &CompData, offset: u64, len: u32, is_last: bool) -> CompBlock {
    let first = data.rows.first().expect("non-empty sub-block").0;
    let last = data.rows.last().expect("non-empty sub-block").0;
    CompBlock {
        offset,
        len,
        num_rows: data.rows.len() as u32,
        key_first: first,
        key_last: last,
        num_cols: 2,
        is_last,
        compression: Compression::None,
    }
}

/// Writes the 512-byte reserved header plus a zeroed `CompIdx[max_tables]`
/// placeholder, establishing a fresh head file's layout before any
/// `CompInfo` region is appended after it (`spec.md` §4.2 `create`,
/// mirrored here for the commit-rewrite path).
fn init_head_prefix<W: Write>(head: &mut W, max_tables: i32) -> Result<()> {
    use crate::coding::Encode;
    head.write_all(&vec![0u8; codec::HEAD_SIZE as usize])?;
    let zero_idx = CompIdx::default().encode_into_vec();
    for _ in 0..max_tables {
        head.write_all(&zero_idx)?;
    }
    Ok(())
}

fn write_table_region<W: Write + Seek>(head: &mut W, info: &CompInfo) -> Result<(u64, u32, u32)> {
    use crate::coding::Encode;
    let bytes = info.encode_into_vec();
    let checksum = Checksum::of(&bytes);
    let offset = head.seek(SeekFrom::End(0))?;
    head.write_all(&bytes)?;
    Ok((offset, bytes.len() as u32, checksum.into_u32()))
}

/// Copies `len` bytes at `offset` from `src` to the end of `dst`,
/// returning the destination offset/length/checksum of the copy
/// (`spec.md` §4.3 "copy_region", extended to also report a checksum so
/// the relocated `CompIdx` entry can record it).
fn relocate_region<R: Read + Seek, W: Write + Seek>(
    src: &mut R,
    offset: u64,
    len: u32,
    dst: &mut W,
) -> Result<(u64, u32, Checksum)> {
    src.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    src.read_exact(&mut buf)?;
    let checksum = Checksum::of(&buf);
    let dst_offset = dst.seek(SeekFrom::End(0))?;
    dst.write_all(&buf)?;
    Ok((dst_offset, len, checksum))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().expect("file-group paths always have a file name").to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_batch_for_range_splits_at_max_key() {
        let rows = vec![(1, vec![]), (2, vec![]), (3, vec![]), (10, vec![])];
        let mut cursor = 0;
        let batch = take_batch_for_range(&rows, &mut cursor, 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(cursor, 3);

        let batch = take_batch_for_range(&rows, &mut cursor, 9);
        assert!(batch.is_empty());
        assert_eq!(cursor, 3);

        let batch = take_batch_for_range(&rows, &mut cursor, 10);
        assert_eq!(batch.len(), 1);
        assert_eq!(cursor, 4);
    }

    #[test]
    fn tmp_path_appends_suffix() {
        let p = tmp_path(Path::new("/data/f3.head"));
        assert_eq!(p, Path::new("/data/f3.head.tmp"));
    }
}
