// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sorted-by-fid file-group array with binary-search lookup
//! (`spec.md` §4.2).

use super::{parse_file_name, FileGroup};
use crate::binary_search::partition_point;
use crate::coding::Encode;
use crate::codec::{CompIdx, HEAD_SIZE};
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use std::collections::HashMap;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// The sorted array of file groups backing one repository, plus the
/// directory they live in.
pub struct Store<FS: FileSystem> {
    dir: PathBuf,
    max_tables: i32,
    max_fgroups: i32,
    groups: Vec<FileGroup>,
    _fs: PhantomData<FS>,
}

impl<FS: FileSystem> Store<FS> {
    /// Creates an empty store rooted at `dir` (which must already exist),
    /// bounded to at most `max_fgroups` file groups (`spec.md` §4.2).
    #[must_use]
    pub fn empty(dir: PathBuf, max_tables: i32, max_fgroups: i32) -> Self {
        Self { dir, max_tables, max_fgroups, groups: Vec::new(), _fs: PhantomData }
    }

    /// Rebuilds the file-group array from whatever `f<fid>.{head,data,last}`
    /// triples already exist in `dir`, sorted ascending by fid.
    ///
    /// Used on repository open, since the array itself is not persisted
    /// separately from the files it describes (`spec.md` §9, resolving the
    /// original's `tsdbOpenRepo` omission: this implementation always
    /// rebuilds from `data/` rather than trusting stale in-memory state).
    pub fn init(dir: PathBuf, max_tables: i32, max_fgroups: i32) -> Result<Self> {
        let mut seen: HashMap<i32, [bool; 3]> = HashMap::new();

        for entry in FS::read_dir(&dir)? {
            if entry.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else { continue };
            let Some((fid, suffix)) = parse_file_name(name) else { continue };
            let slot = seen.entry(fid).or_insert([false; 3]);
            match suffix {
                "head" => slot[0] = true,
                "data" => slot[1] = true,
                "last" => slot[2] = true,
                _ => {}
            }
        }

        let mut fids: Vec<i32> = Vec::with_capacity(seen.len());
        for (fid, present) in &seen {
            if !present.iter().all(|p| *p) {
                return Err(Error::FormatError(format!(
                    "file group {fid} is missing one of head/data/last"
                )));
            }
            fids.push(*fid);
        }
        fids.sort_unstable();

        let groups = fids.into_iter().map(|fid| FileGroup::at(&dir, fid)).collect();
        Ok(Self { dir, max_tables, max_fgroups, groups, _fs: PhantomData })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn max_tables(&self) -> i32 {
        self.max_tables
    }

    #[must_use]
    pub fn max_fgroups(&self) -> i32 {
        self.max_fgroups
    }

    /// Finds the file group for `fid`, creating it first if absent.
    pub fn get_or_create(&mut self, fid: i32) -> Result<FileGroup> {
        if let Some(group) = self.search(fid) {
            return Ok(group.clone());
        }
        Ok(self.create(fid)?.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    #[must_use]
    pub fn groups(&self) -> &[FileGroup] {
        &self.groups
    }

    /// Finds the file group for `fid`, if one exists.
    #[must_use]
    pub fn search(&self, fid: i32) -> Option<&FileGroup> {
        let idx = partition_point(&self.groups, |g| g.fid < fid);
        self.groups.get(idx).filter(|g| g.fid == fid)
    }

    /// Creates a new, empty file group for `fid`.
    ///
    /// Fails if `fid` already has a group, if the array is already at
    /// `max_fgroups` capacity, or if any of its three files already exists
    /// on disk (the latter two cases should coincide, but the filesystem is
    /// checked directly so a partially-created group from a crashed prior
    /// attempt is never silently reused). Any file created before the
    /// failure is rolled back.
    pub fn create(&mut self, fid: i32) -> Result<&FileGroup> {
        let idx = partition_point(&self.groups, |g| g.fid < fid);
        if self.groups.get(idx).is_some_and(|g| g.fid == fid) {
            return Err(Error::StateViolation("file group already exists"));
        }
        if self.groups.len() >= self.max_fgroups as usize {
            return Err(Error::StateViolation("file group capacity exhausted"));
        }

        let group = FileGroup::at(&self.dir, fid);
        for path in [&group.head, &group.data, &group.last] {
            if FS::exists(path)? {
                return Err(Error::StateViolation("file group file already exists on disk"));
            }
        }

        let result = self.write_new_files(&group);
        if let Err(err) = result {
            for path in [&group.head, &group.data, &group.last] {
                let _ = FS::remove_file(path);
            }
            return Err(err);
        }

        self.groups.insert(idx, group);
        Ok(&self.groups[idx])
    }

    fn write_new_files(&self, group: &FileGroup) -> Result<()> {
        let mut head = FS::create_new(&group.head)?;
        head.write_all(&vec![0u8; HEAD_SIZE as usize])?;
        let zero_idx = CompIdx::default().encode_into_vec();
        for _ in 0..self.max_tables {
            head.write_all(&zero_idx)?;
        }
        head.flush()?;

        FS::create_new(&group.data)?;
        FS::create_new(&group.last)?;
        Ok(())
    }

    /// Removes the file group for `fid` from both disk and the array.
    pub fn remove(&mut self, fid: i32) -> Result<()> {
        let idx = partition_point(&self.groups, |g| g.fid < fid);
        if !self.groups.get(idx).is_some_and(|g| g.fid == fid) {
            return Err(Error::StateViolation("no such file group"));
        }
        let group = self.groups.remove(idx);
        FS::remove_file(&group.head)?;
        FS::remove_file(&group.data)?;
        FS::remove_file(&group.last)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use tempfile::tempdir;

    #[test]
    fn create_then_search_finds_the_group() {
        let dir = tempdir().unwrap();
        let mut store = Store::<StdFileSystem>::empty(dir.path().to_path_buf(), 10, 100);
        store.create(5).unwrap();
        assert!(store.search(5).is_some());
        assert!(store.search(6).is_none());
    }

    #[test]
    fn create_rejects_duplicate_fid() {
        let dir = tempdir().unwrap();
        let mut store = Store::<StdFileSystem>::empty(dir.path().to_path_buf(), 10, 100);
        store.create(1).unwrap();
        assert!(store.create(1).is_err());
    }

    #[test]
    fn remove_deletes_files_and_entry() {
        let dir = tempdir().unwrap();
        let mut store = Store::<StdFileSystem>::empty(dir.path().to_path_buf(), 10, 100);
        let group = store.create(2).unwrap().clone();
        store.remove(2).unwrap();
        assert!(store.search(2).is_none());
        assert!(!group.head.exists());
        assert!(!group.data.exists());
        assert!(!group.last.exists());
    }

    #[test]
    fn init_rebuilds_sorted_array_from_existing_files() {
        let dir = tempdir().unwrap();
        {
            let mut store = Store::<StdFileSystem>::empty(dir.path().to_path_buf(), 10, 100);
            store.create(3).unwrap();
            store.create(1).unwrap();
            store.create(2).unwrap();
        }

        let rebuilt = Store::<StdFileSystem>::init(dir.path().to_path_buf(), 10, 100).unwrap();
        let fids: Vec<i32> = rebuilt.groups().iter().map(|g| g.fid).collect();
        assert_eq!(fids, vec![1, 2, 3]);
    }

    #[test]
    fn head_file_is_prefixed_with_zeroed_index_table() {
        let dir = tempdir().unwrap();
        let mut store = Store::<StdFileSystem>::empty(dir.path().to_path_buf(), 4, 100);
        let group = store.create(0).unwrap().clone();
        let bytes = std::fs::read(&group.head).unwrap();
        let comp_idx_size = CompIdx::default().encode_into_vec().len();
        assert_eq!(bytes.len(), HEAD_SIZE as usize + 4 * comp_idx_size);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn create_rejects_once_max_fgroups_is_reached() {
        let dir = tempdir().unwrap();
        let mut store = Store::<StdFileSystem>::empty(dir.path().to_path_buf(), 10, 2);
        store.create(0).unwrap();
        store.create(1).unwrap();
        assert!(store.create(2).is_err());
        assert_eq!(store.len(), 2);
    }
}
