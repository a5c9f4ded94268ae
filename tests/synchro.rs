use synchrony::{synchro, EFile, EFileKind};

mod test_utils;
use test_utils::settings;

fn is_before(y: &i64, x: &i64) -> bool {
    y < x
}

fn can_see(y: &i64, x: &i64) -> bool {
    (x - y).abs() <= 10
}

#[test]
fn pairwise_fold_over_files() {
    let mut experiments = EFile::in_memory(vec![10, 20, 30], settings());
    let mut landmarks = EFile::in_memory(vec![5, 15, 25, 35], settings());

    let pairs = synchro::fold_pairwise(
        experiments.iterator().unwrap(),
        landmarks.iterator().unwrap(),
        is_before,
        can_see,
        Vec::new(),
        |x, y, mut acc| {
            acc.push((*x, *y));
            acc
        },
    )
    .unwrap();

    assert_eq!(
        pairs,
        vec![(10, 5), (10, 15), (20, 15), (20, 25), (30, 25), (30, 35)]
    );
}

#[test]
fn grouped_fold_over_files() {
    let mut experiments = EFile::in_memory(vec![10, 20, 30], settings());
    let mut landmarks = EFile::in_memory(vec![5, 15, 25, 35], settings());

    let groups = synchro::fold_grouped(
        experiments.iterator().unwrap(),
        landmarks.iterator().unwrap(),
        is_before,
        can_see,
        Vec::new(),
        |x, window, mut acc| {
            acc.push((*x, window.to_vec()));
            acc
        },
    )
    .unwrap();

    assert_eq!(
        groups,
        vec![(10, vec![5, 15]), (20, vec![15, 25]), (30, vec![25, 35])]
    );
}

#[test]
fn empty_landmark_stream_yields_zero() {
    let mut experiments = EFile::in_memory(vec![1, 2], settings());
    let mut landmarks = EFile::in_memory(Vec::new(), settings());

    let count = synchro::fold_pairwise(
        experiments.iterator().unwrap(),
        landmarks.iterator().unwrap(),
        is_before,
        can_see,
        0usize,
        |_, _, acc| acc + 1,
    )
    .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn synchronized_join_over_on_disk_tracks() {
    // The whole pipeline: spill both tracks, join them positionally, wrap
    // the result stream back into a transient file and store it.
    let mut experiments = EFile::in_memory(vec![10, 20, 30], settings())
        .serialized(None)
        .unwrap();
    let mut landmarks = EFile::in_memory(vec![5, 15, 25, 35], settings())
        .serialized(None)
        .unwrap();

    let matches = synchro::map_pairwise(
        experiments.iterator().unwrap(),
        landmarks.iterator().unwrap(),
        is_before,
        can_see,
        |x, y| x + y,
    );

    let joined = EFile::transient(matches, settings()).stored().unwrap();
    assert_eq!(joined.kind(), EFileKind::InMemory);
    assert_eq!(joined.as_in_memory().unwrap(), &[15, 25, 35, 45, 55, 65]);

    experiments.destruct();
    landmarks.destruct();
}

#[test]
fn grouped_map_counts_window_sizes() {
    let mut experiments = EFile::in_memory(vec![10, 20, 30], settings());
    let mut landmarks = EFile::in_memory(vec![5, 15, 25, 35], settings());

    let mut sizes = synchro::map_grouped(
        experiments.iterator().unwrap(),
        landmarks.iterator().unwrap(),
        is_before,
        can_see,
        |x, window| (*x, window.len()),
    );

    let mut seen = Vec::new();
    while let Some(entry) = sizes.try_next().unwrap() {
        seen.push(entry);
    }
    assert_eq!(seen, vec![(10, 2), (20, 2), (30, 2)]);
}

#[test]
fn flat_map_pairwise_expands_matches() {
    let mut experiments = EFile::in_memory(vec![10], settings());
    let mut landmarks = EFile::in_memory(vec![5, 15], settings());

    let mut out = synchro::flat_map_pairwise(
        experiments.iterator().unwrap(),
        landmarks.iterator().unwrap(),
        is_before,
        can_see,
        |x, y| vec![*x, *y],
    );

    let mut seen = Vec::new();
    while let Some(value) = out.try_next().unwrap() {
        seen.push(value);
    }
    assert_eq!(seen, vec![10, 5, 10, 15]);
}

#[test]
fn early_consumer_exit_closes_inputs() {
    let mut experiments = EFile::in_memory(vec![10, 20, 30], settings());
    let mut landmarks = EFile::in_memory(vec![5, 15, 25, 35], settings());

    let mut stream = synchro::map_pairwise(
        experiments.iterator().unwrap(),
        landmarks.iterator().unwrap(),
        is_before,
        can_see,
        |x, y| (*x, *y),
    );
    assert_eq!(stream.try_next().unwrap(), Some((10, 5)));
    stream.close();
    assert_eq!(stream.try_next().unwrap(), None);
}
