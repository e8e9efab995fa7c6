// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A table's super-block (`CompInfo`) and the sub-block descriptors
//! (`CompBlock`) it lists (`spec.md` §6.1, §4.7.1).

use crate::coding::{Decode, Encode, EncodeError};
use crate::error::Error;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// The sub-block's column compression, recorded but always [`Compression::None`]
/// (`spec.md` §3's `compression` tag; this crate's write path never
/// compresses a `CompData` trailer, but the tag is carried so a future
/// codec revision can introduce one without an on-disk format break).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Compression {
    #[default]
    None,
}

impl Compression {
    fn as_tag(self) -> u8 {
        match self {
            Self::None => 0,
        }
    }

    fn from_tag(tag: u8) -> crate::Result<Self> {
        match tag {
            0 => Ok(Self::None),
            _ => Err(Error::FormatError(format!("unknown compression tag {tag}"))),
        }
    }
}

/// One contiguous run of rows written as a single [`super::CompData`]
/// trailer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompBlock {
    /// Byte offset of the `CompData` trailer within the file.
    pub offset: u64,
    /// Encoded length of the `CompData` trailer (including its delimiter).
    pub len: u32,
    pub num_rows: u32,
    pub key_first: i64,
    pub key_last: i64,
    /// Number of columns in the `CompData` trailer's column region: always
    /// 2 (key, payload) per `comp_data.rs`'s Non-goals note.
    pub num_cols: u8,
    /// Whether this sub-block lives in the `last` file rather than `data`.
    pub is_last: bool,
    pub compression: Compression,
}

const COMP_BLOCK_SIZE: usize = 8 + 4 + 4 + 8 + 8 + 1 + 1 + 1;

impl Encode for CompBlock {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.len)?;
        writer.write_u32::<LittleEndian>(self.num_rows)?;
        writer.write_i64::<LittleEndian>(self.key_first)?;
        writer.write_i64::<LittleEndian>(self.key_last)?;
        writer.write_u8(self.num_cols)?;
        writer.write_u8(self.is_last as u8)?;
        writer.write_u8(self.compression.as_tag())?;
        Ok(())
    }
}

impl Decode for CompBlock {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        Ok(Self {
            offset: reader.read_u64::<LittleEndian>()?,
            len: reader.read_u32::<LittleEndian>()?,
            num_rows: reader.read_u32::<LittleEndian>()?,
            key_first: reader.read_i64::<LittleEndian>()?,
            key_last: reader.read_i64::<LittleEndian>()?,
            num_cols: reader.read_u8()?,
            is_last: reader.read_u8()? != 0,
            compression: Compression::from_tag(reader.read_u8()?)?,
        })
    }
}

/// A table's super-block: the ordered list of sub-blocks that together
/// hold every row this file stores for the table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompInfo {
    pub uid: u64,
    pub tid: u32,
    pub blocks: Vec<CompBlock>,
}

impl CompInfo {
    #[must_use]
    pub fn num_rows(&self) -> u32 {
        self.blocks.iter().map(|b| b.num_rows).sum()
    }

    #[must_use]
    pub fn key_first(&self) -> Option<i64> {
        self.blocks.iter().map(|b| b.key_first).min()
    }

    #[must_use]
    pub fn key_last(&self) -> Option<i64> {
        self.blocks.iter().map(|b| b.key_last).max()
    }
}

impl Encode for CompInfo {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u64::<LittleEndian>(self.uid)?;
        writer.write_u32::<LittleEndian>(self.tid)?;
        writer.write_u32::<LittleEndian>(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX))?;
        for block in &self.blocks {
            block.encode_into(writer)?;
        }
        Ok(())
    }
}

impl Decode for CompInfo {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let uid = reader.read_u64::<LittleEndian>()?;
        let tid = reader.read_u32::<LittleEndian>()?;
        let num_blocks = reader.read_u32::<LittleEndian>()?;
        let mut blocks = Vec::with_capacity(num_blocks as usize);
        for _ in 0..num_blocks {
            blocks.push(CompBlock::decode_from(reader)?);
        }
        Ok(Self { uid, tid, blocks })
    }
}

/// Encoded size, in bytes, a `CompInfo` with `num_blocks` sub-blocks would
/// occupy.
#[must_use]
pub fn comp_info_encoded_len(num_blocks: usize) -> usize {
    8 + 4 + 4 + num_blocks * COMP_BLOCK_SIZE
}
