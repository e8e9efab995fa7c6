// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The insert path (`spec.md` §4.6): decodes a submit message via
//! [`crate::submit`], validates each block's table via [`TableCatalog`],
//! allocates row bytes from the [`Cache`], and buffers them into the
//! right table's [`Memtable`].
//!
//! Grounded on `original_source/tsdbMain.c`'s `tsdbInsertData`, which walks
//! the same three steps (iterate blocks, look up `STable` by `(uid, tid)`,
//! walk rows) but against a raw `void*` meta pointer and a C skip list; here
//! each step is a typed call into this crate's own modules.

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::meta::{TableCatalog, TableId};
use crate::submit::SubmitMsgIter;
use std::collections::HashMap;

/// Buffers every row of `msg` into `tables`, allocating row payloads from
/// `cache`.
///
/// On the first error — an unknown/incompatible table or a malformed
/// block — the whole message fails, but rows already buffered from earlier
/// blocks in the same message are **not** rolled back (`spec.md` §4.6,
/// "Errors": "Partial inserts already committed to a memtable remain
/// visible — the engine relies on idempotent re-submits at a higher
/// layer").
pub(crate) fn insert_submit_message(
    tables: &mut HashMap<TableId, Memtable>,
    cache: &mut Cache,
    catalog: &dyn TableCatalog,
    msg: &[u8],
) -> Result<()> {
    let mut iter = SubmitMsgIter::new(msg)?;

    while let Some(block) = iter.next_block()? {
        let id = TableId { uid: block.uid, tid: block.tid };
        let meta = catalog.resolve(id, block.sversion).ok_or_else(|| {
            Error::MetaReject(format!(
                "no table for uid={} tid={} at schema version {}",
                id.uid, id.tid, block.sversion
            ))
        })?;

        let memtable = tables.entry(id).or_default();
        for row in block.rows() {
            let row = row?;
            let handle = cache.alloc(row.payload)?;
            memtable.insert(row.key, handle, meta.schema_version);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::StaticCatalog;

    fn encode_row(key: i64, payload: &[u8]) -> Vec<u8> {
        let body_len = 8 + payload.len();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        buf.extend_from_slice(&key.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn encode_block(uid: u64, tid: u32, sversion: u32, rows: &[Vec<u8>]) -> Vec<u8> {
        let mut data = Vec::new();
        for r in rows {
            data.extend_from_slice(r);
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(rows.len() as u16).to_be_bytes());
        buf.extend_from_slice(&uid.to_be_bytes());
        buf.extend_from_slice(&tid.to_be_bytes());
        buf.extend_from_slice(&sversion.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&data);
        buf
    }

    fn encode_msg(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for b in blocks {
            body.extend_from_slice(b);
        }
        let total_len = crate::submit::SUBMIT_MSG_HEADER_SIZE + body.len();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        buf.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    #[test]
    fn inserts_rows_into_the_right_table() {
        let catalog = StaticCatalog::new();
        catalog.register(TableId { uid: 1, tid: 1 }, 0);

        let block = encode_block(1, 1, 0, &[encode_row(100, b"a"), encode_row(200, b"b")]);
        let msg = encode_msg(&[block]);

        let mut tables = HashMap::new();
        let mut cache = Cache::new(1024 * 1024);
        insert_submit_message(&mut tables, &mut cache, &catalog, &msg).unwrap();

        let memtable = &tables[&TableId { uid: 1, tid: 1 }];
        assert_eq!(memtable.num_points(), 2);
        assert_eq!(memtable.key_first(), Some(100));
        assert_eq!(memtable.key_last(), Some(200));
    }

    #[test]
    fn rejects_unknown_table_but_keeps_earlier_rows_visible() {
        let catalog = StaticCatalog::new();
        catalog.register(TableId { uid: 1, tid: 1 }, 0);

        let known = encode_block(1, 1, 0, &[encode_row(1, b"x")]);
        let unknown = encode_block(9, 9, 0, &[encode_row(2, b"y")]);
        let msg = encode_msg(&[known, unknown]);

        let mut tables = HashMap::new();
        let mut cache = Cache::new(1024 * 1024);
        let result = insert_submit_message(&mut tables, &mut cache, &catalog, &msg);

        assert!(matches!(result, Err(Error::MetaReject(_))));
        assert_eq!(tables[&TableId { uid: 1, tid: 1 }].num_points(), 1);
        assert!(!tables.contains_key(&TableId { uid: 9, tid: 9 }));
    }

    #[test]
    fn rejects_schema_version_mismatch() {
        let catalog = StaticCatalog::new();
        catalog.register(TableId { uid: 1, tid: 1 }, 5);

        let block = encode_block(1, 1, 0, &[encode_row(1, b"x")]);
        let msg = encode_msg(&[block]);

        let mut tables = HashMap::new();
        let mut cache = Cache::new(1024 * 1024);
        let result = insert_submit_message(&mut tables, &mut cache, &catalog, &msg);
        assert!(result.is_err());
    }

    #[test]
    fn arena_exhaustion_surfaces_as_an_error() {
        let catalog = StaticCatalog::new();
        catalog.register(TableId { uid: 1, tid: 1 }, 0);

        let block = encode_block(1, 1, 0, &[encode_row(1, &[0u8; 64])]);
        let msg = encode_msg(&[block]);

        let mut tables = HashMap::new();
        let mut cache = Cache::new(16); // too small for any row
        let result = insert_submit_message(&mut tables, &mut cache, &catalog, &msg);
        assert!(matches!(result, Err(Error::ArenaExhausted)));
    }
}
