// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The repository's configuration record (`spec.md` §6.2), persisted as a
//! fixed-layout binary `CONFIG` file at the repository root.
//!
//! Field ranges and defaults are taken from `original_source/tsdbMain.c`'s
//! `TSDB_*` constants and `tsdbCheckAndSetDefaultCfg`.

use crate::coding::{Decode, Encode, EncodeError};
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Timestamp precision a repository stores its keys in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Precision {
    /// Milliseconds since epoch (the default).
    #[default]
    Milli,
    /// Microseconds since epoch.
    Micro,
    /// Nanoseconds since epoch.
    Nano,
}

impl Precision {
    fn as_tag(self) -> u8 {
        match self {
            Self::Milli => 0,
            Self::Micro => 1,
            Self::Nano => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::Milli),
            1 => Ok(Self::Micro),
            2 => Ok(Self::Nano),
            _ => Err(Error::ConfigInvalid("precision")),
        }
    }
}

pub const MIN_TABLES: i32 = 10;
pub const MAX_TABLES: i32 = 100_000;
pub const DEFAULT_TABLES: i32 = 1_000;

pub const MIN_DAYS_PER_FILE: i32 = 1;
pub const MAX_DAYS_PER_FILE: i32 = 60;
pub const DEFAULT_DAYS_PER_FILE: i32 = 10;

pub const MIN_MIN_ROWS_PER_FILE_BLOCK: i32 = 10;
pub const MAX_MIN_ROWS_PER_FILE_BLOCK: i32 = 1_000;
pub const DEFAULT_MIN_ROWS_PER_FILE_BLOCK: i32 = 100;

pub const MIN_MAX_ROWS_PER_FILE_BLOCK: i32 = 200;
pub const MAX_MAX_ROWS_PER_FILE_BLOCK: i32 = 10_000;
pub const DEFAULT_MAX_ROWS_PER_FILE_BLOCK: i32 = 4_096;

pub const MIN_KEEP: i32 = 1;
pub const DEFAULT_KEEP: i32 = 3_650;

pub const MIN_CACHE_SIZE: u64 = 4 * 1024 * 1024;
pub const MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_CACHE_SIZE: u64 = 16 * 1024 * 1024;

/// The repository configuration record.
///
/// Every field is already resolved to a concrete value (unlike the
/// original C struct, where `-1` means "apply the default"); construct one
/// with [`Config::default`] and the builder-style setters below to
/// reproduce that resolution step.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Config {
    pub precision: Precision,
    pub tsdb_id: i32,
    pub max_tables: i32,
    pub days_per_file: i32,
    pub min_rows_per_file_block: i32,
    pub max_rows_per_file_block: i32,
    pub keep: i32,
    pub max_cache_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            precision: Precision::default(),
            tsdb_id: 0,
            max_tables: DEFAULT_TABLES,
            days_per_file: DEFAULT_DAYS_PER_FILE,
            min_rows_per_file_block: DEFAULT_MIN_ROWS_PER_FILE_BLOCK,
            max_rows_per_file_block: DEFAULT_MAX_ROWS_PER_FILE_BLOCK,
            keep: DEFAULT_KEEP,
            max_cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

impl Config {
    /// Sets the timestamp precision.
    #[must_use]
    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Sets the repository (vnode) id.
    #[must_use]
    pub fn tsdb_id(mut self, id: i32) -> Self {
        self.tsdb_id = id;
        self
    }

    /// Sets the maximum number of tables this repository can hold.
    #[must_use]
    pub fn max_tables(mut self, n: i32) -> Self {
        self.max_tables = n;
        self
    }

    /// Sets how many days of data each file group covers.
    #[must_use]
    pub fn days_per_file(mut self, n: i32) -> Self {
        self.days_per_file = n;
        self
    }

    /// Sets the minimum number of rows a super-block must hold to be
    /// written directly to the data file rather than the last file.
    #[must_use]
    pub fn min_rows_per_file_block(mut self, n: i32) -> Self {
        self.min_rows_per_file_block = n;
        self
    }

    /// Sets the maximum number of rows read from a table's cursor per
    /// commit iteration.
    #[must_use]
    pub fn max_rows_per_file_block(mut self, n: i32) -> Self {
        self.max_rows_per_file_block = n;
        self
    }

    /// Sets, in days, how long file groups are retained before they become
    /// eligible for deletion (retention/expiry is outside this crate's
    /// write-path scope, but the field is carried for callers who enforce
    /// it).
    #[must_use]
    pub fn keep(mut self, days: i32) -> Self {
        self.keep = days;
        self
    }

    /// Sets the cache arena's byte cap.
    #[must_use]
    pub fn max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }

    /// Derives the file-group store's capacity bound (`spec.md` §4.2
    /// `max_fgroups`) from the retention window: enough partitions to cover
    /// `keep` days at `days_per_file` days apiece, plus one for the
    /// partition currently being written.
    #[must_use]
    pub fn max_fgroups(&self) -> i32 {
        self.keep.div_ceil(self.days_per_file.max(1)).max(1) + 1
    }

    /// Validates every field is within its allowed range and that
    /// `min_rows_per_file_block <= max_rows_per_file_block`.
    pub fn validate(&self) -> Result<()> {
        if self.tsdb_id < 0 {
            return Err(Error::ConfigInvalid("tsdb_id"));
        }
        if !(MIN_TABLES..=MAX_TABLES).contains(&self.max_tables) {
            return Err(Error::ConfigInvalid("max_tables"));
        }
        if !(MIN_DAYS_PER_FILE..=MAX_DAYS_PER_FILE).contains(&self.days_per_file) {
            return Err(Error::ConfigInvalid("days_per_file"));
        }
        if !(MIN_MIN_ROWS_PER_FILE_BLOCK..=MAX_MIN_ROWS_PER_FILE_BLOCK)
            .contains(&self.min_rows_per_file_block)
        {
            return Err(Error::ConfigInvalid("min_rows_per_file_block"));
        }
        if !(MIN_MAX_ROWS_PER_FILE_BLOCK..=MAX_MAX_ROWS_PER_FILE_BLOCK)
            .contains(&self.max_rows_per_file_block)
        {
            return Err(Error::ConfigInvalid("max_rows_per_file_block"));
        }
        if self.min_rows_per_file_block > self.max_rows_per_file_block {
            return Err(Error::ConfigInvalid(
                "min_rows_per_file_block > max_rows_per_file_block",
            ));
        }
        if self.keep < MIN_KEEP {
            return Err(Error::ConfigInvalid("keep"));
        }
        if !(MIN_CACHE_SIZE..=MAX_CACHE_SIZE).contains(&self.max_cache_size) {
            return Err(Error::ConfigInvalid("max_cache_size"));
        }
        Ok(())
    }
}

/// Fixed on-disk size, in bytes, of the encoded `Config` record.
pub const CONFIG_RECORD_SIZE: usize = 1 + 4 * 6 + 8;

impl Encode for Config {
    fn encode_into<W: Write>(&self, writer: &mut W) -> std::result::Result<(), EncodeError> {
        writer.write_u8(self.precision.as_tag())?;
        writer.write_i32::<LittleEndian>(self.tsdb_id)?;
        writer.write_i32::<LittleEndian>(self.max_tables)?;
        writer.write_i32::<LittleEndian>(self.days_per_file)?;
        writer.write_i32::<LittleEndian>(self.min_rows_per_file_block)?;
        writer.write_i32::<LittleEndian>(self.max_rows_per_file_block)?;
        writer.write_i32::<LittleEndian>(self.keep)?;
        writer.write_u64::<LittleEndian>(self.max_cache_size)?;
        Ok(())
    }
}

impl Decode for Config {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self> {
        let precision = Precision::from_tag(reader.read_u8()?)?;
        let tsdb_id = reader.read_i32::<LittleEndian>()?;
        let max_tables = reader.read_i32::<LittleEndian>()?;
        let days_per_file = reader.read_i32::<LittleEndian>()?;
        let min_rows_per_file_block = reader.read_i32::<LittleEndian>()?;
        let max_rows_per_file_block = reader.read_i32::<LittleEndian>()?;
        let keep = reader.read_i32::<LittleEndian>()?;
        let max_cache_size = reader.read_u64::<LittleEndian>()?;
        Ok(Self {
            precision,
            tsdb_id,
            max_tables,
            days_per_file,
            min_rows_per_file_block,
            max_rows_per_file_block,
            keep,
            max_cache_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_row_bounds() {
        let cfg = Config::default()
            .min_rows_per_file_block(900)
            .max_rows_per_file_block(800);
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn max_fgroups_covers_the_retention_window() {
        let cfg = Config::default().keep(30).days_per_file(10);
        assert_eq!(cfg.max_fgroups(), 4);

        let cfg = Config::default().keep(25).days_per_file(10);
        assert_eq!(cfg.max_fgroups(), 4);
    }

    #[test]
    fn rejects_out_of_range_days_per_file() {
        let cfg = Config::default().days_per_file(0);
        assert!(cfg.validate().is_err());
        let cfg = Config::default().days_per_file(61);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trip_s6() {
        // spec.md S6: precision=MILLI, max_tables=1000, days_per_file=10
        let cfg = Config::default()
            .precision(Precision::Milli)
            .max_tables(1000)
            .days_per_file(10);

        let bytes = cfg.encode_into_vec();
        assert_eq!(bytes.len(), CONFIG_RECORD_SIZE);

        let mut cursor = std::io::Cursor::new(bytes);
        let decoded = Config::decode_from(&mut cursor).unwrap();
        assert_eq!(cfg, decoded);
    }
}
