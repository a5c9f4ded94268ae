use std::sync::Arc;

use synchrony::{iter::LazyIter, EFile, EFileKind};

mod test_utils;
use test_utils::{drain, settings, settings_with};

#[test]
fn sort_small_stays_in_memory() {
    test_utils::setup_tracing(None);
    let settings = settings_with(|s| s.card_cap = 10);
    let file = EFile::transient(LazyIter::from_vec(vec![3, 1, 2]), settings);

    let sorted = file.sorted().unwrap().stored().unwrap();
    assert_eq!(sorted.kind(), EFileKind::InMemory);
    assert_eq!(sorted.as_in_memory().unwrap(), &[1, 2, 3]);
}

#[test]
fn sort_spills_with_small_cap() {
    let settings = settings_with(|s| s.card_cap = 3);
    let file = EFile::transient(LazyIter::from_vec(vec![5, 4, 3, 2, 1]), Arc::clone(&settings));
    let cmp = Arc::clone(&settings.order);

    let mut sorted = file.sorted_with(cmp, Some(2), false).unwrap();
    assert_eq!(sorted.kind(), EFileKind::OnDisk);
    assert_eq!(drain(&mut sorted), vec![1, 2, 3, 4, 5]);
    sorted.destruct();
}

#[test]
fn sort_of_on_disk_input_lands_on_disk() {
    let file = EFile::in_memory(vec![2, 3, 1], settings())
        .serialized(None)
        .unwrap();
    let input_path = file.path().unwrap().to_path_buf();

    let mut sorted = file.sorted().unwrap();
    assert_eq!(sorted.kind(), EFileKind::OnDisk);
    assert_eq!(drain(&mut sorted), vec![1, 2, 3]);
    // The input file is the caller's; sorting must not delete it.
    assert!(input_path.exists());

    sorted.destruct();
    std::fs::remove_file(input_path).unwrap();
}

#[test]
fn sampling_derives_the_run_cap() {
    // Records serialize to ~4 bytes; an 8-byte budget forces multi-record
    // runs and therefore a merged on-disk result.
    let settings = settings_with(|s| {
        s.ram_cap = 8;
        s.card_cap = 2;
    });
    let file = EFile::transient(
        LazyIter::from_vec(vec![900, 300, 700, 100, 500]),
        settings,
    );

    let mut sorted = file.sorted().unwrap();
    assert_eq!(sorted.kind(), EFileKind::OnDisk);
    assert_eq!(drain(&mut sorted), vec![100, 300, 500, 700, 900]);
    sorted.destruct();
}

#[test]
fn sort_preserves_the_multiset() {
    let records = vec![42, 7, 42, -3, 0, 19, 7, 7, -3, 100, 55, 1];
    let mut expected = records.clone();
    expected.sort();

    let file = EFile::transient(LazyIter::from_vec(records), settings());
    let mut sorted = file.sorted().unwrap();
    assert_eq!(drain(&mut sorted), expected);
}

#[test]
fn sort_is_idempotent() {
    let settings = settings();
    let once = EFile::transient(
        LazyIter::from_vec(vec![4, 2, 9, 1]),
        Arc::clone(&settings),
    )
    .sorted()
    .unwrap();

    let mut expected = EFile::in_memory(vec![1, 2, 4, 9], settings);
    let mut twice = once.sorted().unwrap();
    assert!(twice.has_same_value_as(&mut expected, true, None).unwrap());
}

#[test]
fn sort_of_empty_input_is_a_no_op() {
    let mut sorted = EFile::transient(LazyIter::from_vec(Vec::new()), settings())
        .sorted()
        .unwrap();
    assert!(sorted.is_empty().unwrap());
}

#[test]
fn sorted_if_needed_skips_sorted_input() {
    let file = EFile::in_memory(vec![1, 2, 3], settings());
    let mut kept = file.sorted_if_needed().unwrap();
    assert_eq!(kept.kind(), EFileKind::InMemory);
    assert_eq!(drain(&mut kept), vec![1, 2, 3]);

    let file = EFile::in_memory(vec![3, 1, 2], settings());
    let mut resorted = file.sorted_if_needed().unwrap();
    assert_eq!(drain(&mut resorted), vec![1, 2, 3]);
}

#[test]
fn merge_interleaves_sorted_inputs() {
    let settings = settings();
    let a = EFile::in_memory(vec![1, 4, 7], Arc::clone(&settings));
    let b = EFile::in_memory(vec![2, 5, 8], Arc::clone(&settings));
    let c = EFile::in_memory(vec![3, 6, 9], settings);

    let merged = a.merged_with(vec![b, c], false).unwrap();
    assert_eq!(merged.kind(), EFileKind::Transient);

    let mut merged = merged;
    assert_eq!(drain(&mut merged), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn merge_on_disk_serializes_the_result() {
    let settings = settings();
    let a = EFile::in_memory(vec![1, 3], Arc::clone(&settings));
    let b = EFile::in_memory(vec![2, 4], settings);

    let mut merged = a.merged_with(vec![b], true).unwrap();
    assert_eq!(merged.kind(), EFileKind::OnDisk);
    assert_eq!(drain(&mut merged), vec![1, 2, 3, 4]);
    merged.destruct();
}

#[test]
fn merge_drops_empty_inputs() {
    let settings = settings();
    let a = EFile::in_memory(vec![5, 6], Arc::clone(&settings));
    let b = EFile::in_memory(Vec::new(), Arc::clone(&settings));
    let c = EFile::in_memory(vec![4], settings);

    let mut merged = a.merged_with(vec![b, c], false).unwrap();
    assert_eq!(drain(&mut merged), vec![4, 5, 6]);
}

#[test]
fn merge_keeps_duplicates() {
    let settings = settings();
    let a = EFile::in_memory(vec![1, 2, 2], Arc::clone(&settings));
    let b = EFile::in_memory(vec![2, 3], settings);

    let mut merged = a.merged_with(vec![b], false).unwrap();
    assert_eq!(drain(&mut merged), vec![1, 2, 2, 2, 3]);
}
