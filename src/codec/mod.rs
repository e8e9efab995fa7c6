// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk record layouts for a file group's `head`/`data`/`last` files
//! (`spec.md` §6.1).
//!
//! Layout, top to bottom:
//!  - `head`: a [`HEAD_SIZE`]-byte reserved header, then a fixed
//!    `CompIdx[max_tables]` index table (one slot per table, whether or
//!    not the table has data in this file group yet).
//!  - `data` / `last`: a sequence of per-table super-blocks. Each
//!    [`CompInfo`] lists the [`CompBlock`] sub-blocks that make up one
//!    table's rows in that file; each sub-block's bytes are a
//!    [`CompData`] trailer (led by [`FILE_DELIMITER`]) followed by its
//!    column data.
//!
//! Constants are taken from `original_source/tsdbFile.c`
//! (`TSDB_FILE_HEAD_SIZE`, `TSDB_FILE_DELIMITER`).

mod comp_data;
mod comp_idx;
mod comp_info;

pub use comp_data::{CompCol, CompData, ColumnId};
pub use comp_idx::CompIdx;
pub use comp_info::{CompBlock, CompInfo, Compression, comp_info_encoded_len};

/// Reserved bytes at the start of a `head` file, before the `CompIdx`
/// array begins.
pub const HEAD_SIZE: u64 = 512;

/// Magic value preceding every [`CompData`] trailer, used to detect a torn
/// write during recovery.
pub const FILE_DELIMITER: u32 = 0xF00A_FA0F;

use crate::coding::{Decode, Encode};
use crate::error::Result;
use std::io::{Read, Seek, SeekFrom, Write};

/// Reads the `max_tables`-entry `CompIdx` index table out of a `head` file
/// (`spec.md` §4.3 `load_comp_idx`).
pub fn load_comp_idx<R: Read + Seek>(head: &mut R, max_tables: i32) -> Result<Vec<CompIdx>> {
    head.seek(SeekFrom::Start(HEAD_SIZE))?;
    (0..max_tables).map(|_| CompIdx::decode_from(head)).collect()
}

/// Overwrites the `max_tables`-entry `CompIdx` index table of a `head`
/// file in place (`spec.md` §4.3: "rewriting the index table at `HEAD_SIZE`").
pub fn store_comp_idx<W: Write + Seek>(head: &mut W, table: &[CompIdx]) -> Result<()> {
    head.seek(SeekFrom::Start(HEAD_SIZE))?;
    for idx in table {
        idx.encode_into(head).map_err(|e| match e {
            crate::coding::EncodeError::Io(e) => crate::Error::Io(e),
        })?;
    }
    Ok(())
}

/// Reads the `CompInfo` region `idx` points at (`spec.md` §4.3
/// `load_comp_blocks`).
pub fn load_comp_blocks<R: Read + Seek>(head: &mut R, offset: u64, len: u32) -> Result<CompInfo> {
    head.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    head.read_exact(&mut buf)?;
    CompInfo::decode_from(&mut std::io::Cursor::new(buf))
}

/// Appends `info`'s encoded bytes to `head` (the end-of-file temporary
/// region used while rewriting a file group, `spec.md` §4.3), returning
/// the `(offset, len)` it was written at.
pub fn append_comp_blocks<W: Write + Seek>(head: &mut W, info: &CompInfo) -> Result<(u64, u32)> {
    let offset = head.seek(SeekFrom::End(0))?;
    let bytes = info.encode_into_vec();
    head.write_all(&bytes)?;
    Ok((offset, bytes.len() as u32))
}

/// Reads one sub-block's `CompData` trailer plus column bytes out of a
/// `data`/`last` file (`spec.md` §4.3 `load_comp_cols`, folded together with
/// `load_col_data` since this crate's sub-blocks carry exactly the key and
/// payload columns — see `comp_data.rs`).
pub fn load_comp_cols<R: Read + Seek>(file: &mut R, block: &CompBlock) -> Result<CompData> {
    file.seek(SeekFrom::Start(block.offset))?;
    let mut buf = vec![0u8; block.len as usize];
    file.read_exact(&mut buf)?;
    CompData::decode_from(&mut std::io::Cursor::new(buf))
}

/// Appends a sub-block's encoded bytes to `file`, returning the
/// `(offset, len)` `CompBlock` fields it should be recorded under.
pub fn append_comp_data<W: Write + Seek>(file: &mut W, data: &CompData) -> Result<(u64, u32)> {
    let offset = file.seek(SeekFrom::End(0))?;
    let bytes = data.encode_into_vec();
    file.write_all(&bytes)?;
    Ok((offset, bytes.len() as u32))
}

/// Copies `len` raw bytes at `offset` from `src` into `dst`'s current
/// position (the "copy the existing `CompInfo` region verbatim" / raw
/// last-block relocation path used when a table is untouched by a commit,
/// `spec.md` §4.7 step 3d).
pub fn copy_region<R: Read + Seek, W: Write + Seek>(
    src: &mut R,
    offset: u64,
    len: u32,
    dst: &mut W,
) -> Result<(u64, u32)> {
    src.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    src.read_exact(&mut buf)?;
    let dst_offset = dst.seek(SeekFrom::End(0))?;
    dst.write_all(&buf)?;
    Ok((dst_offset, len))
}
