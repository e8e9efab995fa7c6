// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The columnar row trailer a [`super::CompBlock`] points at
//! (`spec.md` §6.1).
//!
//! Rows reach this layer as an opaque, already-validated `(key, payload)`
//! pair (`submit.rs::DataRow`); this crate's scope stops short of a typed
//! column catalogue (`spec.md` §1, Non-goals: "schema storage"), so a
//! sub-block's columns are exactly two: the `i64` timestamp key (fixed
//! width) and the row payload (variable width, length-prefixed per row).
//! A catalogue-aware layer above this one is expected to split `payload`
//! into its own typed columns if it needs true per-column scans.

use crate::checksum::Checksum;
use crate::coding::{Decode, Encode, EncodeError};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Which of a `CompData`'s two columns a [`CompCol`] describes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnId {
    Key,
    Payload,
}

impl ColumnId {
    fn as_tag(self) -> u8 {
        match self {
            Self::Key => 0,
            Self::Payload => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Key),
            1 => Ok(Self::Payload),
            _ => Err(Error::FormatError(format!("unknown column id {tag}"))),
        }
    }
}

/// Describes one column's placement within a `CompData`'s column region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CompCol {
    pub id: ColumnId,
    /// Byte offset from the start of the column region (i.e. right after
    /// the trailer's fixed fields).
    pub offset: u32,
    pub len: u32,
}

/// One sub-block's worth of rows: the `key` column, the `payload` column,
/// and the checksum guarding both.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompData {
    pub rows: Vec<(i64, Vec<u8>)>,
}

impl CompData {
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    fn key_column_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.rows.len() * 8);
        for (key, _) in &self.rows {
            buf.extend_from_slice(&key.to_le_bytes());
        }
        buf
    }

    fn payload_column_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (_, payload) in &self.rows {
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(payload);
        }
        buf
    }
}

impl Encode for CompData {
    /// Writes this sub-block's full on-disk representation: the
    /// [`super::FILE_DELIMITER`], fixed fields, column descriptors, and
    /// column bytes, in that order.
    fn encode_into<W: Write>(&self, writer: &mut W) -> std::result::Result<(), EncodeError> {
        let key_bytes = self.key_column_bytes();
        let payload_bytes = self.payload_column_bytes();

        let cols = [
            CompCol { id: ColumnId::Key, offset: 0, len: key_bytes.len() as u32 },
            CompCol {
                id: ColumnId::Payload,
                offset: key_bytes.len() as u32,
                len: payload_bytes.len() as u32,
            },
        ];

        let mut column_region = Vec::with_capacity(key_bytes.len() + payload_bytes.len());
        column_region.extend_from_slice(&key_bytes);
        column_region.extend_from_slice(&payload_bytes);
        let checksum = Checksum::of(&column_region);

        writer.write_u32::<LittleEndian>(super::FILE_DELIMITER)?;
        writer.write_u32::<LittleEndian>(self.rows.len() as u32)?;
        writer.write_u32::<LittleEndian>(checksum.into_u32())?;
        writer.write_u8(cols.len() as u8)?;
        for col in &cols {
            writer.write_u8(col.id.as_tag())?;
            writer.write_u32::<LittleEndian>(col.offset)?;
            writer.write_u32::<LittleEndian>(col.len)?;
        }
        writer.write_all(&column_region)?;
        Ok(())
    }
}

impl Decode for CompData {
    /// Reads a sub-block back, verifying the delimiter and checksum.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let delimiter = reader.read_u32::<LittleEndian>()?;
        if delimiter != super::FILE_DELIMITER {
            return Err(Error::FormatError(format!(
                "bad sub-block delimiter: expected {:#x}, found {delimiter:#x}",
                super::FILE_DELIMITER
            )));
        }

        let num_rows = reader.read_u32::<LittleEndian>()? as usize;
        let expected_checksum = Checksum::from_raw(reader.read_u32::<LittleEndian>()?);
        let num_cols = reader.read_u8()?;

        let mut cols = Vec::with_capacity(num_cols as usize);
        for _ in 0..num_cols {
            let id = ColumnId::from_tag(reader.read_u8()?)?;
            let offset = reader.read_u32::<LittleEndian>()?;
            let len = reader.read_u32::<LittleEndian>()?;
            cols.push(CompCol { id, offset, len });
        }

        let region_len: u32 = cols.iter().map(|c| c.len).sum();
        let mut column_region = vec![0u8; region_len as usize];
        reader.read_exact(&mut column_region)?;
        Checksum::of(&column_region).check(expected_checksum)?;

        let key_col = cols
            .iter()
            .find(|c| c.id == ColumnId::Key)
            .ok_or_else(|| Error::FormatError("sub-block missing key column".into()))?;
        let payload_col = cols
            .iter()
            .find(|c| c.id == ColumnId::Payload)
            .ok_or_else(|| Error::FormatError("sub-block missing payload column".into()))?;

        let key_bytes = &column_region[key_col.offset as usize..(key_col.offset + key_col.len) as usize];
        if key_bytes.len() != num_rows * 8 {
            return Err(Error::FormatError("key column length does not match row count".into()));
        }

        let mut payload_cursor =
            &column_region[payload_col.offset as usize..(payload_col.offset + payload_col.len) as usize];

        let mut rows = Vec::with_capacity(num_rows);
        for i in 0..num_rows {
            let key = i64::from_le_bytes(key_bytes[i * 8..i * 8 + 8].try_into().expect("8 bytes"));
            let len = payload_cursor.read_u32::<LittleEndian>()? as usize;
            if payload_cursor.len() < len {
                return Err(Error::FormatError("payload column truncated".into()));
            }
            let (payload, rest) = payload_cursor.split_at(len);
            rows.push((key, payload.to_vec()));
            payload_cursor = rest;
        }

        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rows_through_bytes() {
        let block = CompData {
            rows: vec![(1, b"a".to_vec()), (2, b"bb".to_vec()), (3, b"ccc".to_vec())],
        };
        let mut buf = Vec::new();
        block.encode_into(&mut buf).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = CompData::decode_from(&mut cursor).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn empty_sub_block_round_trips() {
        let block = CompData { rows: vec![] };
        let mut buf = Vec::new();
        block.encode_into(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(CompData::decode_from(&mut cursor).unwrap(), block);
    }

    #[test]
    fn rejects_corrupted_column_bytes() {
        let block = CompData { rows: vec![(1, b"hello".to_vec())] };
        let mut buf = Vec::new();
        block.encode_into(&mut buf).unwrap();
        // Flip a byte inside the column region, after the fixed header.
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let mut cursor = std::io::Cursor::new(buf);
        assert!(CompData::decode_from(&mut cursor).is_err());
    }

    #[test]
    fn rejects_missing_delimiter() {
        let mut buf = vec![0u8; 32];
        let mut cursor = std::io::Cursor::new(&mut buf);
        assert!(CompData::decode_from(&mut cursor).is_err());
    }
}
