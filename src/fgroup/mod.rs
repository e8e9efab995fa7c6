// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The file-group store: the sorted array of on-disk `head`/`data`/`last`
//! file triples a repository's data is partitioned across (`spec.md`
//! §4.2), one triple per file-id produced by `time_partition::file_id_of`.

mod store;

pub use store::Store;

use std::path::{Path, PathBuf};

/// One file-id's `head`, `data`, and `last` file paths.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileGroup {
    pub fid: i32,
    pub head: PathBuf,
    pub data: PathBuf,
    pub last: PathBuf,
}

impl FileGroup {
    fn at(dir: &Path, fid: i32) -> Self {
        Self {
            fid,
            head: dir.join(format!("f{fid}.head")),
            data: dir.join(format!("f{fid}.data")),
            last: dir.join(format!("f{fid}.last")),
        }
    }
}

/// Parses an `f<fid>.<suffix>` file name, returning the file-id and suffix
/// if it matches (`original_source/tsdbFile.c`'s `f%d%s` naming).
fn parse_file_name(name: &str) -> Option<(i32, &str)> {
    let rest = name.strip_prefix('f')?;
    let (digits, suffix) = rest.split_once('.')?;
    let fid: i32 = digits.parse().ok()?;
    Some((fid, suffix))
}
