use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    efile::EFile,
    error::EfResult,
    iter::{LazyIter, Source},
    settings::CmpFn,
};

/// K-way merges pre-sorted files into one stream ordered under `cmp`.
///
/// Inputs are materialized first so the merge can re-read nothing; inputs
/// that prove empty on first peek are closed and dropped. The merged
/// stream is lazy — a `Transient` — unless `on_disk` asks for immediate
/// serialization.
#[instrument(name = "Merge", level = "debug", skip_all, fields(inputs = inputs.len()))]
pub fn merged<T: Clone + 'static>(
    inputs: Vec<EFile<T>>,
    cmp: Arc<CmpFn<T>>,
    on_disk: bool,
) -> EfResult<EFile<T>> {
    assert!(!inputs.is_empty(), "merge needs at least one input");

    let settings = Arc::clone(inputs[0].settings());

    let mut active: Vec<ActiveRun<T>> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let mut materialized = if on_disk {
            input.serialized(None)?
        } else {
            input.stored()?
        };
        let mut iter = materialized.iterator()?;
        match iter.try_next()? {
            Some(head) => active.push(ActiveRun { head, iter }),
            None => iter.close(),
        }
    }
    debug!(active = active.len(), "merge inputs materialized");

    // Position 0 must hold the minimal head. A stable sort keeps equal
    // heads in input order; re-seating inserts after equals, so runs that
    // arrived later stay later.
    active.sort_by(|a, b| cmp(&a.head, &b.head));

    let merged = EFile::transient(
        LazyIter::from_source(MergeSource { active, cmp }),
        settings,
    );
    if on_disk {
        merged.serialized(None)
    } else {
        Ok(merged)
    }
}

struct ActiveRun<T> {
    head: T,
    iter: LazyIter<T>,
}

pub(crate) struct MergeSource<T> {
    active: Vec<ActiveRun<T>>,
    cmp: Arc<CmpFn<T>>,
}

impl<T: Clone + 'static> MergeSource<T> {
    /// Builds a merge source directly over run iterators, pulling each
    /// run's first head and discarding exhausted runs.
    pub(crate) fn over(iters: Vec<LazyIter<T>>, cmp: Arc<CmpFn<T>>) -> EfResult<MergeSource<T>> {
        let mut active = Vec::with_capacity(iters.len());
        for mut iter in iters {
            match iter.try_next()? {
                Some(head) => active.push(ActiveRun { head, iter }),
                None => iter.close(),
            }
        }
        let mut source = MergeSource { active, cmp };
        source.active.sort_by(|a, b| (source.cmp)(&a.head, &b.head));
        Ok(source)
    }
}

impl<T: Clone + 'static> Source<T> for MergeSource<T> {
    fn pull(&mut self) -> EfResult<Option<T>> {
        if self.active.is_empty() {
            return Ok(None);
        }

        // XXX: Replace the sorted vector with a d-ary heap for large k.
        let ActiveRun { head, mut iter } = self.active.remove(0);
        match iter.try_next() {
            Ok(Some(next_head)) => {
                // Binary-search re-insertion after any equal heads.
                let at = self.active.partition_point(|run| {
                    (self.cmp)(&run.head, &next_head) != std::cmp::Ordering::Greater
                });
                self.active.insert(
                    at,
                    ActiveRun {
                        head: next_head,
                        iter,
                    },
                );
            }
            Ok(None) => iter.close(),
            Err(error) => {
                iter.close();
                self.close();
                return Err(error);
            }
        }
        Ok(Some(head))
    }

    fn close(&mut self) {
        for run in &mut self.active {
            run.iter.close();
        }
        self.active.clear();
    }
}
