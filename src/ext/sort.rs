use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::{
    efile::{EFile, EFileKind},
    error::EfResult,
    ext::merge::MergeSource,
    iter::LazyIter,
    settings::{CmpFn, Settings},
};

/// External sort: distributes the input into sorted runs sized by the
/// (possibly sampled) run cap, then k-way merges the runs.
///
/// The output lands on disk when the input was on disk, when
/// `always_on_disk` is set, when the caller asks for `on_disk`, or when
/// more than one run had to be merged; a single small run stays in memory.
/// The input iterator and every intermediate run are released on all exit
/// paths.
#[instrument(name = "Sort", level = "debug", skip_all)]
pub fn sorted<T: Clone + 'static>(
    mut input: EFile<T>,
    cmp: Arc<CmpFn<T>>,
    cap: Option<usize>,
    on_disk: bool,
) -> EfResult<EFile<T>> {
    if input.is_empty()? {
        return Ok(input);
    }

    let settings = Arc::clone(input.settings());
    let spill_runs = settings.always_on_disk || input.kind() == EFileKind::OnDisk;

    let mut iter = input.iterator()?;

    let run_cap = match cap {
        Some(cap) => cap.max(1),
        None if settings.do_sampling => sampled_cap(&mut iter, &settings)?,
        None => settings.cap.max(1),
    };
    debug!(run_cap, spill_runs, "sort run cap derived");

    let runs_outcome = build_runs(&mut iter, &settings, &cmp, run_cap, spill_runs);
    iter.close();
    let mut runs = runs_outcome?;

    if runs.len() == 1 {
        let run = runs.pop().expect("one run");
        return if on_disk {
            run.serialized(None)
        } else {
            Ok(run)
        };
    }

    let merged = merge_runs(&mut runs, &settings, &cmp);
    for run in &mut runs {
        run.destruct();
    }
    merged
}

/// Stores the input and sorts it only when a linear scan finds it out of
/// order.
pub fn sorted_if_needed<T: Clone + 'static>(input: EFile<T>) -> EfResult<EFile<T>> {
    let mut stored = input.stored()?;
    if stored.is_sorted()? {
        trace!("input already sorted");
        return Ok(stored);
    }
    let cmp = Arc::clone(&stored.settings().order);
    sorted(stored, cmp, None, false)
}

/// Derives a run cap such that `cap * average serialized size <= ram_cap`,
/// from a non-destructive peek at the first `sampling_sz` records. Falls
/// back on the `ave_sz` hint when nothing could be sampled.
fn sampled_cap<T: Clone + 'static>(
    iter: &mut LazyIter<T>,
    settings: &Settings<T>,
) -> EfResult<usize> {
    let sample = iter.lookahead(settings.sampling_sz)?;
    let average = if sample.is_empty() {
        settings.ave_sz
    } else {
        let total: usize = sample
            .iter()
            .map(|record| settings.serializer.encoded_len(record))
            .sum();
        total / sample.len()
    };
    let cap = settings.ram_cap / average.max(1);
    trace!(sampled = sample.len(), average, cap, "sampled record size");
    Ok(cap.max(1))
}

/// Distribution phase: cuts the stream into contiguous groups of
/// `run_cap`, sorts each in memory, and materializes it as a run. Partial
/// runs are destructed if a later group fails.
fn build_runs<T: Clone + 'static>(
    iter: &mut LazyIter<T>,
    settings: &Arc<Settings<T>>,
    cmp: &Arc<CmpFn<T>>,
    run_cap: usize,
    spill_runs: bool,
) -> EfResult<Vec<EFile<T>>> {
    let mut runs = Vec::new();
    let outcome = (|| loop {
        let mut group = Vec::new();
        while group.len() < run_cap {
            match iter.try_next()? {
                Some(record) => group.push(record),
                None => break,
            }
        }
        if group.is_empty() {
            return Ok(());
        }
        let exhausted = group.len() < run_cap;

        group.sort_unstable_by(|a, b| cmp(a, b));
        let run = EFile::transient(LazyIter::from_vec(group), Arc::clone(settings));
        let run = if spill_runs {
            run.serialized(None)?
        } else {
            run.stored()?
        };
        trace!(run = runs.len(), "materialized sorted run");
        runs.push(run);

        if exhausted {
            return Ok(());
        }
    })();

    match outcome {
        Ok(()) => Ok(runs),
        Err(error) => {
            for run in &mut runs {
                run.destruct();
            }
            Err(error)
        }
    }
}

/// Merge phase: drains all runs through a k-way merge into one on-disk
/// file.
fn merge_runs<T: Clone + 'static>(
    runs: &mut [EFile<T>],
    settings: &Arc<Settings<T>>,
    cmp: &Arc<CmpFn<T>>,
) -> EfResult<EFile<T>> {
    let mut iters = Vec::with_capacity(runs.len());
    for run in runs.iter_mut() {
        iters.push(run.iterator()?);
    }
    let source = MergeSource::over(iters, Arc::clone(cmp))?;
    let merged = EFile::transient(LazyIter::from_source(source), Arc::clone(settings));
    merged.serialized(None)
}
