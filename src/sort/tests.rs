use super::core::*;
use super::error::SortError;
use super::runs;
use crate::common::io::input_dir_bytes;

use std::fs;
use std::path::Path;

use proptest::prelude::*;
use tempfile::TempDir;

fn write_values(path: &Path, values: &[i64]) {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for v in values {
        bytes.extend_from_slice(&v.to_ne_bytes());
    }
    fs::write(path, bytes).unwrap();
}

fn read_values(path: &Path) -> Vec<i64> {
    runs::read_run(path).unwrap()
}

/// Config rooted in a temp dir: data/ as input, intermediate/ as work dir,
/// result/sorted.bin as output. `total_bytes` is filled in by `run_sort`.
fn config_for(root: &TempDir, workers: usize, buffer_size: usize) -> SortConfig {
    let input_dir = root.path().join("data");
    fs::create_dir_all(&input_dir).unwrap();
    SortConfig {
        input_dir,
        work_dir: root.path().join("intermediate"),
        output_path: root.path().join("result").join("sorted.bin"),
        num_workers: workers,
        buffer_size,
        total_bytes: 0,
    }
}

fn run_sort(mut config: SortConfig) -> Result<SortStats, SortError> {
    config.total_bytes = input_dir_bytes(&config.input_dir).unwrap();
    SortEngine::new(config)?.run()
}

#[test]
fn test_concrete_three_file_scenario() {
    let root = TempDir::new().unwrap();
    let config = config_for(&root, 2, 64);
    write_values(&config.input_dir.join("a.bin"), &[5, 1, 4]);
    write_values(&config.input_dir.join("b.bin"), &[2, 9]);
    write_values(&config.input_dir.join("c.bin"), &[3]);

    let output = config.output_path.clone();
    let stats = run_sort(config).unwrap();
    assert_eq!(stats.values, 6);
    assert_eq!(read_values(&output), vec![1, 2, 3, 4, 5, 9]);
}

#[test]
fn test_empty_input_dir_yields_empty_output() {
    let root = TempDir::new().unwrap();
    let config = config_for(&root, 2, 64);
    let output = config.output_path.clone();

    let stats = run_sort(config).unwrap();
    assert_eq!(stats.values, 0);
    assert_eq!(fs::metadata(&output).unwrap().len(), 0);
}

#[test]
fn test_single_sub_buffer_file_completes_in_one_cycle() {
    let root = TempDir::new().unwrap();
    let config = config_for(&root, 2, 1024);
    write_values(&config.input_dir.join("only.bin"), &[9, -3, 7, 0, 2]);

    let output = config.output_path.clone();
    let work_dir = config.work_dir.clone();
    let stats = run_sort(config).unwrap();

    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.values, 5);
    assert_eq!(read_values(&output), vec![-3, 0, 2, 7, 9]);
    // Intermediate storage is released once the survivor is published.
    assert!(!work_dir.exists());
}

#[test]
fn test_multi_cycle_reduction() {
    let root = TempDir::new().unwrap();
    // 16-value buffer against 1000 values forces dozens of runs through
    // the pairwise reduction phase.
    let config = config_for(&root, 2, 16 * 8);
    let values: Vec<i64> = (0..1000).rev().collect();
    write_values(&config.input_dir.join("big.bin"), &values);

    let output = config.output_path.clone();
    let stats = run_sort(config).unwrap();

    assert!(stats.cycles > 1);
    assert_eq!(stats.values, 1000);
    assert_eq!(read_values(&output), (0..1000).collect::<Vec<i64>>());
}

#[test]
fn test_worker_count_invariance() {
    let mut outputs = Vec::new();
    let values: Vec<i64> = (0..500).map(|i| (i * 7919) % 251 - 125).collect();

    for workers in [1usize, 4] {
        let root = TempDir::new().unwrap();
        let config = config_for(&root, workers, 32 * 8);
        write_values(&config.input_dir.join("in.bin"), &values);
        let output = config.output_path.clone();
        run_sort(config).unwrap();
        outputs.push(fs::read(&output).unwrap());
    }

    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn test_duplicates_survive_as_multiset() {
    let root = TempDir::new().unwrap();
    let config = config_for(&root, 2, 4 * 8);
    write_values(&config.input_dir.join("a.bin"), &[3, 3, 1, 3]);
    write_values(&config.input_dir.join("b.bin"), &[1, 3, 2, 2]);

    let output = config.output_path.clone();
    run_sort(config).unwrap();
    assert_eq!(read_values(&output), vec![1, 1, 2, 2, 2, 3, 3, 3, 3]);
}

#[test]
fn test_truncated_input_is_fatal() {
    let root = TempDir::new().unwrap();
    let config = config_for(&root, 2, 64);
    fs::write(config.input_dir.join("bad.bin"), [0u8; 12]).unwrap();

    let err = run_sort(config).unwrap_err();
    assert!(matches!(err, SortError::TruncatedInput { trailing: 4, .. }));
}

#[test]
fn test_overstated_total_bytes_still_terminates() {
    let root = TempDir::new().unwrap();
    let mut config = config_for(&root, 2, 8 * 8);
    write_values(&config.input_dir.join("in.bin"), &[4, 1, 3, 2]);
    // A wrong size parameter must degrade to a correct sort, not a spin.
    config.total_bytes = input_dir_bytes(&config.input_dir).unwrap() + 4096;

    let output = config.output_path.clone();
    let stats = SortEngine::new(config).unwrap().run().unwrap();
    assert_eq!(stats.values, 4);
    assert_eq!(read_values(&output), vec![1, 2, 3, 4]);
}

#[test]
fn test_rejects_indivisible_buffer() {
    let root = TempDir::new().unwrap();
    let config = config_for(&root, 3, 64); // 64 bytes / 3 workers: no clean blocks
    assert!(matches!(run_sort(config), Err(SortError::Config(_))));
}

#[test]
fn test_rejects_zero_workers() {
    let root = TempDir::new().unwrap();
    let config = config_for(&root, 0, 64);
    assert!(matches!(run_sort(config), Err(SortError::Config(_))));
}

#[test]
fn test_merge_with_empty_run_is_identity() {
    let dir = TempDir::new().unwrap();
    runs::write_run(&runs::run_path(dir.path(), 0), &[1, 3, 5]).unwrap();
    runs::write_run(&runs::run_path(dir.path(), 1), &[]).unwrap();

    let survivor = runs::merge_two_intermediate(dir.path(), 0, 1).unwrap();
    assert_eq!(survivor, 0);
    assert_eq!(read_values(&runs::run_path(dir.path(), 0)), vec![1, 3, 5]);
    assert!(!runs::run_path(dir.path(), 1).exists());
    assert!(!runs::scratch_path(dir.path(), 0).exists());
}

#[test]
fn test_merge_interleaves_and_keeps_lower_id() {
    let dir = TempDir::new().unwrap();
    runs::write_run(&runs::run_path(dir.path(), 5), &[1, 4, 7]).unwrap();
    runs::write_run(&runs::run_path(dir.path(), 2), &[2, 2, 9]).unwrap();

    let survivor = runs::merge_two_intermediate(dir.path(), 5, 2).unwrap();
    assert_eq!(survivor, 2);
    assert_eq!(
        read_values(&runs::run_path(dir.path(), 2)),
        vec![1, 2, 2, 4, 7, 9]
    );
    assert!(!runs::run_path(dir.path(), 5).exists());
}

#[test]
fn test_missing_run_file_fails_merge() {
    let dir = TempDir::new().unwrap();
    runs::write_run(&runs::run_path(dir.path(), 0), &[1]).unwrap();
    assert!(runs::merge_two_intermediate(dir.path(), 0, 1).is_err());
}

#[test]
fn test_parse_buffer_size_suffixes() {
    assert_eq!(parse_buffer_size("1024").unwrap(), 1024);
    assert_eq!(parse_buffer_size("1K").unwrap(), 1024);
    assert_eq!(parse_buffer_size("1M").unwrap(), 1024 * 1024);
    assert_eq!(parse_buffer_size("1G").unwrap(), 1024 * 1024 * 1024);
    assert!(parse_buffer_size("").is_err());
    assert!(parse_buffer_size("12Q").is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Output is always the ascending permutation of the input multiset,
    /// for any file split, worker count, and (valid) buffer size.
    #[test]
    fn prop_output_is_sorted_input_multiset(
        values in proptest::collection::vec(any::<i64>(), 0..300),
        workers in 1usize..=4,
        values_per_block in 1usize..=16,
        split in 1usize..=97,
    ) {
        let root = TempDir::new().unwrap();
        let config = config_for(&root, workers, workers * values_per_block * 8);
        for (i, chunk) in values.chunks(split).enumerate() {
            write_values(&config.input_dir.join(format!("part{i}.bin")), chunk);
        }

        let output = config.output_path.clone();
        let stats = run_sort(config).unwrap();
        prop_assert_eq!(stats.values as usize, values.len());

        let mut expected = values;
        expected.sort_unstable();
        prop_assert_eq!(read_values(&output), expected);
    }
}
