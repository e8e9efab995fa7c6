// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! End-to-end write-path scenarios (`spec.md` §8), driven entirely through
//! the public `Repository` API and then verified by reading the resulting
//! `head`/`data`/`last` files back with `tsdb_engine::codec` directly, since
//! the query/read path is out of this crate's scope.

use std::sync::Arc;
use test_log::test;
use tsdb_engine::codec::{self, CompIdx};
use tsdb_engine::config::Precision;
use tsdb_engine::meta::{StaticCatalog, TableCatalog, TableId};
use tsdb_engine::{create_repo, Config};

fn catalog_with(tables: &[(u64, u32)]) -> Arc<dyn TableCatalog> {
    let cat = StaticCatalog::new();
    for &(uid, tid) in tables {
        cat.register(TableId { uid, tid }, 0);
    }
    Arc::new(cat)
}

fn encode_row(key: i64, payload: &[u8]) -> Vec<u8> {
    let body_len = 8 + payload.len();
    let mut buf = Vec::new();
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
    buf.extend_from_slice(&key.to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn encode_block(uid: u64, tid: u32, rows: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    for r in rows {
        data.extend_from_slice(r);
    }
    let mut buf = Vec::new();
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(&(rows.len() as u16).to_be_bytes());
    buf.extend_from_slice(&uid.to_be_bytes());
    buf.extend_from_slice(&tid.to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // sversion
    buf.extend_from_slice(&0u32.to_be_bytes()); // padding
    buf.extend_from_slice(&data);
    buf
}

fn encode_msg(blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for b in blocks {
        body.extend_from_slice(b);
    }
    let total_len = tsdb_engine::submit::SUBMIT_MSG_HEADER_SIZE + body.len();
    let mut buf = Vec::new();
    buf.extend_from_slice(&(total_len as u32).to_be_bytes());
    buf.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(&body);
    buf
}

fn one_row_msg(uid: u64, tid: u32, key: i64, payload: &[u8]) -> Vec<u8> {
    encode_msg(&[encode_block(uid, tid, &[encode_row(key, payload)])])
}

/// Reads the `CompIdx` slot a table occupies in a file group's head file.
fn read_idx(data_dir: &std::path::Path, fid: i32, tid: u32, max_tables: i32) -> CompIdx {
    let mut head = std::fs::File::open(data_dir.join(format!("f{fid}.head"))).unwrap();
    let table = codec::load_comp_idx(&mut head, max_tables).unwrap();
    table[tid as usize]
}

fn read_last_rows(data_dir: &std::path::Path, fid: i32, idx: &CompIdx) -> Vec<(i64, Vec<u8>)> {
    let mut head = std::fs::File::open(data_dir.join(format!("f{fid}.head"))).unwrap();
    let mut last = std::fs::File::open(data_dir.join(format!("f{fid}.last"))).unwrap();
    let info = codec::load_comp_blocks(&mut head, idx.last_offset, idx.last_len).unwrap();
    let block = info.blocks.first().expect("last CompInfo has a block");
    codec::load_comp_cols(&mut last, block).unwrap().rows
}

fn read_data_rows(data_dir: &std::path::Path, fid: i32, idx: &CompIdx) -> Vec<(i64, Vec<u8>)> {
    let mut head = std::fs::File::open(data_dir.join(format!("f{fid}.head"))).unwrap();
    let mut data = std::fs::File::open(data_dir.join(format!("f{fid}.data"))).unwrap();
    let info = codec::load_comp_blocks(&mut head, idx.data_offset, idx.data_len).unwrap();
    let mut rows = Vec::new();
    for block in &info.blocks {
        rows.extend(codec::load_comp_cols(&mut data, block).unwrap().rows);
    }
    rows
}

/// S1 — single-row insert + commit.
#[test]
fn single_row_insert_and_commit_s1() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().precision(Precision::Milli).days_per_file(1);
    let catalog = catalog_with(&[(1, 0)]);

    let repo = create_repo(dir.path(), config, catalog).unwrap();
    repo.insert(&one_row_msg(1, 0, 0, b"hello")).unwrap();
    repo.trigger_commit().unwrap();
    repo.wait_for_commit();

    let data_dir = dir.path().join("data");
    let entries: Vec<_> = std::fs::read_dir(&data_dir).unwrap().flatten().collect();
    let fids: std::collections::HashSet<i32> = entries
        .iter()
        .filter_map(|e| e.file_name().to_str().and_then(|n| n.strip_prefix('f')).and_then(|n| n.split('.').next()).and_then(|n| n.parse().ok()))
        .collect();
    assert_eq!(fids, std::collections::HashSet::from([0]));

    let idx = read_idx(&data_dir, 0, 0, config.max_tables);
    assert_eq!(idx.data_len, 0, "a single small row belongs in the last file, not the data file");
    let rows = read_last_rows(&data_dir, 0, &idx);
    assert_eq!(rows, vec![(0, b"hello".to_vec())]);
}

/// S2 — rows straddling a partition boundary land in two file groups.
#[test]
fn straddling_partition_s2() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().precision(Precision::Milli).days_per_file(1);
    let catalog = catalog_with(&[(1, 0)]);

    let repo = create_repo(dir.path(), config, catalog).unwrap();
    let msg = encode_msg(&[encode_block(
        1,
        0,
        &[
            encode_row(0, b"a"),
            encode_row(86_399_999, b"b"),
            encode_row(86_400_000, b"c"),
        ],
    )]);
    repo.insert(&msg).unwrap();
    repo.trigger_commit().unwrap();
    repo.wait_for_commit();

    let data_dir = dir.path().join("data");
    let idx0 = read_idx(&data_dir, 0, 0, config.max_tables);
    let idx1 = read_idx(&data_dir, 1, 0, config.max_tables);

    let rows0 = read_last_rows(&data_dir, 0, &idx0);
    let rows1 = read_last_rows(&data_dir, 1, &idx1);
    assert_eq!(rows0.len(), 2);
    assert_eq!(rows1.len(), 1);
    assert_eq!(rows0.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![0, 86_399_999]);
    assert_eq!(rows1[0].0, 86_400_000);
}

/// S3 — below-threshold batches land in the last file; a second commit
/// whose batch already meets `min_rows_per_file_block` is promoted straight
/// to a data super-block, leaving the prior last block untouched
/// (`spec.md` §4.7.1, the authoritative rule DESIGN.md records).
#[test]
fn block_size_threshold_s3() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default()
        .precision(Precision::Milli)
        .days_per_file(1)
        .min_rows_per_file_block(3)
        .max_rows_per_file_block(10);
    let catalog = catalog_with(&[(1, 0)]);

    let repo = create_repo(dir.path(), config, catalog).unwrap();

    let first = encode_msg(&[encode_block(1, 0, &[encode_row(1, b"a"), encode_row(2, b"b")])]);
    repo.insert(&first).unwrap();
    repo.trigger_commit().unwrap();
    repo.wait_for_commit();

    let data_dir = dir.path().join("data");
    let idx = read_idx(&data_dir, 0, 0, config.max_tables);
    assert_eq!(idx.data_len, 0);
    assert_eq!(read_last_rows(&data_dir, 0, &idx).len(), 2);

    let second = encode_msg(&[encode_block(
        1,
        0,
        &[
            encode_row(3, b"c"),
            encode_row(4, b"d"),
            encode_row(5, b"e"),
            encode_row(6, b"f"),
        ],
    )]);
    repo.insert(&second).unwrap();
    repo.trigger_commit().unwrap();
    repo.wait_for_commit();

    let idx = read_idx(&data_dir, 0, 0, config.max_tables);
    assert!(idx.data_len > 0, "a 4-row batch meets min_rows_per_file_block(3) and promotes");
    let data_rows = read_data_rows(&data_dir, 0, &idx);
    assert_eq!(data_rows.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![3, 4, 5, 6]);

    assert!(idx.last_len > 0, "the first commit's last block carries forward untouched");
    let last_rows = read_last_rows(&data_dir, 0, &idx);
    assert_eq!(last_rows, vec![(1, b"a".to_vec()), (2, b"b".to_vec())]);
}

/// S4 — duplicate keys preserve insertion order, oldest first.
#[test]
fn duplicate_key_tie_break_s4() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().precision(Precision::Milli).days_per_file(1);
    let catalog = catalog_with(&[(1, 0)]);

    let repo = create_repo(dir.path(), config, catalog).unwrap();
    let msg = encode_msg(&[encode_block(1, 0, &[encode_row(1000, b"A"), encode_row(1000, b"B")])]);
    repo.insert(&msg).unwrap();
    repo.trigger_commit().unwrap();
    repo.wait_for_commit();

    let data_dir = dir.path().join("data");
    let idx = read_idx(&data_dir, 0, 0, config.max_tables);
    let rows = read_last_rows(&data_dir, 0, &idx);
    assert_eq!(rows, vec![(1000, b"A".to_vec()), (1000, b"B".to_vec())]);
}

/// S5 — a second cohort inserted while a commit is in flight lands in the
/// fresh active memtable and is durable after its own later commit; the
/// first cohort is unaffected.
#[test]
fn commit_while_inserting_s5() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().precision(Precision::Milli).days_per_file(1);
    let catalog = catalog_with(&[(1, 0)]);

    let repo = create_repo(dir.path(), config, catalog).unwrap();

    let first_rows: Vec<Vec<u8>> = (1..=100).map(|k| encode_row(k, b"first")).collect();
    repo.insert(&encode_msg(&[encode_block(1, 0, &first_rows)])).unwrap();
    repo.trigger_commit().unwrap();

    let second_rows: Vec<Vec<u8>> = (101..=200).map(|k| encode_row(k, b"second")).collect();
    repo.insert(&encode_msg(&[encode_block(1, 0, &second_rows)])).unwrap();

    repo.wait_for_commit();
    // The second cohort is only durable once it, too, is committed.
    repo.trigger_commit().unwrap();
    repo.wait_for_commit();

    let data_dir = dir.path().join("data");
    let idx = read_idx(&data_dir, 0, 0, config.max_tables);
    let mut all_rows = if idx.data_len > 0 { read_data_rows(&data_dir, 0, &idx) } else { Vec::new() };
    if idx.last_len > 0 {
        all_rows.extend(read_last_rows(&data_dir, 0, &idx));
    }
    all_rows.sort_by_key(|(k, _)| *k);

    let keys: Vec<i64> = all_rows.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, (1..=200).collect::<Vec<_>>());
}
