// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Decodes an incoming submit message into per-table row streams
//! (`spec.md` §4.6, §6.3). All multi-byte integers are network
//! (big-endian) byte order, matching `original_source/tsdbMain.c`'s
//! `tsdbInitSubmitMsgIter` / `tsdbGetSubmitMsgNext`, which call `htonl`
//! (this implementation reads big-endian directly instead of byte-swapping
//! in place, since Rust slices are immutable borrows of the wire buffer).

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// Size, in bytes, of the fixed `SubmitMsg` header: `length`, `num_blocks`,
/// `compressed`, each a `u32`.
pub const SUBMIT_MSG_HEADER_SIZE: usize = 4 + 4 + 4;

/// Size, in bytes, of the fixed `SubmitBlk` header preceding `data`.
pub const SUBMIT_BLK_HEADER_SIZE: usize = 4 + 2 + 8 + 4 + 4 + 4;

/// Iterates the blocks of a decoded submit message.
pub struct SubmitMsgIter<'a> {
    buf: &'a [u8],
    pos: usize,
    total_len: usize,
    pub num_blocks: u32,
    pub compressed: u32,
}

impl<'a> SubmitMsgIter<'a> {
    /// Parses the fixed header and prepares to iterate blocks.
    ///
    /// Fails if the buffer is shorter than the header, or if the header's
    /// own `length` field claims more bytes than the buffer actually holds.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < SUBMIT_MSG_HEADER_SIZE {
            return Err(Error::FormatError("submit message shorter than header".into()));
        }

        let total_len = BigEndian::read_u32(&buf[0..4]) as usize;
        let num_blocks = BigEndian::read_u32(&buf[4..8]);
        let compressed = BigEndian::read_u32(&buf[8..12]);

        if total_len > buf.len() {
            return Err(Error::FormatError(format!(
                "submit message length {total_len} exceeds buffer of {} bytes",
                buf.len()
            )));
        }

        Ok(Self {
            buf,
            pos: SUBMIT_MSG_HEADER_SIZE,
            total_len,
            num_blocks,
            compressed,
        })
    }

    /// Returns the next block, or `None` once the message is exhausted.
    pub fn next_block(&mut self) -> Result<Option<SubmitBlock<'a>>> {
        if self.pos >= self.total_len {
            return Ok(None);
        }

        if self.pos + SUBMIT_BLK_HEADER_SIZE > self.total_len {
            return Err(Error::FormatError("truncated submit block header".into()));
        }

        let header = &self.buf[self.pos..self.pos + SUBMIT_BLK_HEADER_SIZE];
        let len = BigEndian::read_u32(&header[0..4]) as usize;
        let num_rows = BigEndian::read_u16(&header[4..6]);
        let uid = BigEndian::read_u64(&header[6..14]);
        let tid = BigEndian::read_u32(&header[14..18]);
        let sversion = BigEndian::read_u32(&header[18..22]);
        let padding = BigEndian::read_u32(&header[22..26]);

        let data_start = self.pos + SUBMIT_BLK_HEADER_SIZE;
        let data_end = data_start
            .checked_add(len)
            .ok_or_else(|| Error::FormatError("submit block length overflow".into()))?;

        if data_end > self.total_len {
            return Err(Error::FormatError(format!(
                "submit block claims {len} bytes of data, exceeding remaining message"
            )));
        }

        self.pos = data_end;

        Ok(Some(SubmitBlock {
            uid,
            tid,
            sversion,
            num_rows,
            padding,
            data: &self.buf[data_start..data_end],
        }))
    }
}

/// One table's worth of rows within a submit message.
pub struct SubmitBlock<'a> {
    pub uid: u64,
    pub tid: u32,
    pub sversion: u32,
    pub num_rows: u16,
    pub padding: u32,
    data: &'a [u8],
}

impl<'a> SubmitBlock<'a> {
    /// Iterates the rows packed into this block's `data`.
    pub fn rows(&self) -> DataRowIter<'a> {
        DataRowIter { buf: self.data, pos: 0 }
    }
}

/// Iterates the length-prefixed `DataRow` records inside a block.
pub struct DataRowIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// One row: a 64-bit key followed by its schema-dependent payload.
pub struct DataRow<'a> {
    /// The row's timestamp ("key"); the first field of every row.
    pub key: i64,
    /// The remaining, schema-encoded column bytes.
    pub payload: &'a [u8],
    /// Total length of the row's wire body (`key` + `payload`), i.e. the
    /// value that was stored in the row's own length prefix.
    pub body_len: usize,
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Result<DataRow<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }

        if self.pos + 4 > self.buf.len() {
            return Some(Err(Error::FormatError("truncated row length prefix".into())));
        }

        let body_len = BigEndian::read_u32(&self.buf[self.pos..self.pos + 4]) as usize;
        let body_start = self.pos + 4;

        if body_len < 8 {
            return Some(Err(Error::FormatError("row body shorter than its key".into())));
        }

        let body_end = match body_start.checked_add(body_len) {
            Some(end) if end <= self.buf.len() => end,
            _ => return Some(Err(Error::FormatError("row body exceeds block data".into()))),
        };

        let key = BigEndian::read_i64(&self.buf[body_start..body_start + 8]);
        let payload = &self.buf[body_start + 8..body_end];

        self.pos = body_end;

        Some(Ok(DataRow { key, payload, body_len }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
        let total_len = SUBMIT_MSG_HEADER_SIZE + body.len();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        buf.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&body);
        buf
    }

    #[test]
    fn decodes_single_block_single_row() {
        let row = encode_row(1000, b"A");
        let block = encode_block(7, 1, 0, &[row]);
        let msg = encode_msg(&[block]);

        let mut iter = SubmitMsgIter::new(&msg).unwrap();
        assert_eq!(iter.num_blocks, 1);

        let block = iter.next_block().unwrap().unwrap();
        assert_eq!(block.uid, 7);
        assert_eq!(block.tid, 1);
        assert_eq!(block.num_rows, 1);

        let rows: Vec<_> = block.rows().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, 1000);
        assert_eq!(rows[0].payload, b"A");

        assert!(iter.next_block().unwrap().is_none());
    }

    #[test]
    fn decodes_multiple_blocks_preserving_order() {
        let r1 = encode_row(1, b"x");
        let r2 = encode_row(2, b"y");
        let block1 = encode_block(1, 10, 0, &[r1]);
        let block2 = encode_block(2, 20, 0, &[r2]);
        let msg = encode_msg(&[block1, block2]);

        let mut iter = SubmitMsgIter::new(&msg).unwrap();
        let b1 = iter.next_block().unwrap().unwrap();
        assert_eq!(b1.uid, 1);
        let b2 = iter.next_block().unwrap().unwrap();
        assert_eq!(b2.uid, 2);
        assert!(iter.next_block().unwrap().is_none());
    }

    #[test]
    fn rejects_truncated_message() {
        let mut msg = encode_msg(&[encode_block(1, 1, 0, &[encode_row(1, b"x")])]);
        msg.truncate(msg.len() - 2);
        // The header's length field now overstates the buffer.
        assert!(SubmitMsgIter::new(&msg).is_err());
    }

    #[test]
    fn rejects_block_overstating_its_length() {
        let mut block = encode_block(1, 1, 0, &[encode_row(1, b"x")]);
        // Bump the block's len field past what actually follows.
        let bumped = BigEndian::read_u32(&block[0..4]) + 100;
        BigEndian::write_u32(&mut block[0..4], bumped);
        let msg = encode_msg(&[block]);

        let mut iter = SubmitMsgIter::new(&msg).unwrap();
        assert!(iter.next_block().is_err());
    }
}
