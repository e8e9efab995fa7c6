// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Pure functions mapping a row's timestamp key to a file-group id and back
//! (`spec.md` §4.1). Grounded on `original_source/tsdbFile.c`'s
//! `tsdbGetKeyRangeOfFileId` and the file-id derivation implied by
//! `tsdbMain.c`'s `tsdbGetKeyFileId` calls in the commit worker.

use crate::config::Precision;

/// A row's timestamp, in whatever unit `Precision` denotes.
pub type TsKey = i64;

/// The number of `Precision` ticks in one day.
#[must_use]
pub fn ticks_per_day(precision: Precision) -> i64 {
    const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
    match precision {
        Precision::Milli => MS_PER_DAY,
        Precision::Micro => MS_PER_DAY * 1_000,
        Precision::Nano => MS_PER_DAY * 1_000_000,
    }
}

/// Width, in `Precision` ticks, of one file-id's time partition.
#[must_use]
pub fn file_window(days_per_file: i32, precision: Precision) -> i64 {
    i64::from(days_per_file) * ticks_per_day(precision)
}

/// Maps a timestamp key to the file-id of the partition containing it.
///
/// Floor division, so negative keys map to the partition below zero rather
/// than truncating toward it.
#[must_use]
pub fn file_id_of(key: TsKey, days_per_file: i32, precision: Precision) -> i32 {
    let window = file_window(days_per_file, precision);
    i32::try_from(key.div_euclid(window)).expect("file id must fit in i32 for any realistic key range")
}

/// Returns the inclusive `[min_key, max_key]` range covered by `fid`.
#[must_use]
pub fn key_range_of(fid: i32, days_per_file: i32, precision: Precision) -> (TsKey, TsKey) {
    let window = file_window(days_per_file, precision);
    let min_key = i64::from(fid) * window;
    let max_key = min_key + window - 1;
    (min_key, max_key)
}
