use std::{
    cmp::Ordering,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info};

use crate::{
    config,
    error::{EfResult, Error},
    ext::{merge, sort},
    iter::LazyIter,
    settings::{CmpFn, EqFn, Settings},
};

/// An externalized file: a lazy record sequence in exactly one of four
/// physical representations.
///
/// - `OnDisk` — serialized on the filesystem; authoritative and
///   re-readable.
/// - `InMemory` — fully materialized; re-readable.
/// - `Slurped` — raw file contents held in memory, parsed on demand;
///   re-readable.
/// - `Transient` — a one-shot stream, invalidated by its first traversal.
///
/// Every operation dispatches exhaustively on the state tag. Operations
/// that need re-reading must canonicalize a `Transient` first (`stored`,
/// `serialized`, `slurped`).
pub struct EFile<T> {
    state: State<T>,
    settings: Arc<Settings<T>>,
}

enum State<T> {
    OnDisk { path: PathBuf },
    InMemory { records: Vec<T> },
    Slurped { raw: Arc<str>, origin: PathBuf },
    Transient { stream: Option<LazyIter<T>> },
}

/// The physical representation tag of an [`EFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EFileKind {
    OnDisk,
    InMemory,
    Slurped,
    Transient,
}

impl<T: Clone + 'static> EFile<T> {
    pub fn on_disk(path: impl Into<PathBuf>, settings: Arc<Settings<T>>) -> EFile<T> {
        EFile {
            state: State::OnDisk { path: path.into() },
            settings,
        }
    }

    pub fn in_memory(records: Vec<T>, settings: Arc<Settings<T>>) -> EFile<T> {
        EFile {
            state: State::InMemory { records },
            settings,
        }
    }

    pub fn slurped_raw(
        raw: impl Into<Arc<str>>,
        origin: impl Into<PathBuf>,
        settings: Arc<Settings<T>>,
    ) -> EFile<T> {
        EFile {
            state: State::Slurped {
                raw: raw.into(),
                origin: origin.into(),
            },
            settings,
        }
    }

    pub fn transient(stream: LazyIter<T>, settings: Arc<Settings<T>>) -> EFile<T> {
        EFile {
            state: State::Transient {
                stream: Some(stream),
            },
            settings,
        }
    }

    pub fn kind(&self) -> EFileKind {
        match &self.state {
            State::OnDisk { .. } => EFileKind::OnDisk,
            State::InMemory { .. } => EFileKind::InMemory,
            State::Slurped { .. } => EFileKind::Slurped,
            State::Transient { .. } => EFileKind::Transient,
        }
    }

    /// The backing path, for the states that have one.
    pub fn path(&self) -> Option<&Path> {
        match &self.state {
            State::OnDisk { path } => Some(path),
            State::Slurped { origin, .. } => Some(origin),
            _ => None,
        }
    }

    pub fn settings(&self) -> &Arc<Settings<T>> {
        &self.settings
    }

    /// The materialized records, when fully in memory.
    pub fn as_in_memory(&self) -> Option<&[T]> {
        match &self.state {
            State::InMemory { records } => Some(records),
            _ => None,
        }
    }

    /// Returns a fresh iterator over the current state.
    ///
    /// For `Transient` this hands out the underlying one-shot source and
    /// marks it consumed; a second call fails with
    /// [`Error::TransientConsumed`].
    pub fn iterator(&mut self) -> EfResult<LazyIter<T>> {
        match &mut self.state {
            State::OnDisk { path } => self.settings.deserializer.open(path),
            // XXX: Avoid cloning the backing vector for in-memory
            // iteration.
            State::InMemory { records } => Ok(LazyIter::from_vec(records.clone())),
            State::Slurped { raw, origin } => {
                self.settings.deserializer.parse(Arc::clone(raw), origin)
            }
            State::Transient { stream } => stream.take().ok_or(Error::TransientConsumed),
        }
    }

    /// Runs `op` over a scoped iterator, closing it on both normal and
    /// error exit.
    pub fn processed_with<R>(
        &mut self,
        op: impl FnOnce(&mut LazyIter<T>) -> EfResult<R>,
    ) -> EfResult<R> {
        let mut iter = self.iterator()?;
        let out = op(&mut iter);
        iter.close();
        out
    }

    /// Peek-based emptiness test; never consumes a record.
    pub fn is_empty(&mut self) -> EfResult<bool> {
        match &mut self.state {
            State::InMemory { records } => return Ok(records.is_empty()),
            State::Transient { stream } => {
                let stream = stream.as_mut().ok_or(Error::TransientConsumed)?;
                return Ok(!stream.has_next()?);
            }
            _ => {}
        }
        self.processed_with(|iter| Ok(!iter.has_next()?))
    }

    /// The `n`-th record (0-based). O(1) for `InMemory`, a scoped linear
    /// walk otherwise.
    pub fn nth(&mut self, n: usize) -> EfResult<Option<T>> {
        if let State::InMemory { records } = &self.state {
            return Ok(records.get(n).cloned());
        }
        self.processed_with(|iter| Ok(iter.peek_ahead(n + 1)?.cloned()))
    }

    /// Counts the records. Consumes a `Transient`.
    pub fn count(&mut self) -> EfResult<u64> {
        if let State::InMemory { records } = &self.state {
            return Ok(records.len() as u64);
        }
        self.processed_with(|iter| {
            let mut count = 0;
            while iter.try_next()?.is_some() {
                count += 1;
            }
            Ok(count)
        })
    }

    /// A transient view of the records matching `pred`.
    pub fn filtered(mut self, pred: impl Fn(&T) -> bool + 'static) -> EfResult<EFile<T>> {
        let settings = Arc::clone(&self.settings);
        let iter = self.iterator()?;
        Ok(EFile::transient(iter.filtered(pred), settings))
    }

    /// Canonicalizes a `Transient` into a re-readable state.
    ///
    /// Peeks `card_cap` records from the source: if fewer turn up and
    /// `always_on_disk` is unset, the records materialize as `InMemory`;
    /// otherwise the whole stream spills to a fresh temp file. Other
    /// states are already re-readable and pass through.
    pub fn stored(self) -> EfResult<EFile<T>> {
        let EFile { state, settings } = self;
        let mut stream = match state {
            State::Transient { stream } => stream.ok_or(Error::TransientConsumed)?,
            other => {
                return Ok(EFile {
                    state: other,
                    settings,
                })
            }
        };

        let peeked = stream.lookahead(settings.card_cap)?.len();
        if peeked < settings.card_cap && !settings.always_on_disk {
            let mut records = Vec::with_capacity(peeked);
            while let Some(record) = stream.try_next()? {
                records.push(record);
            }
            stream.close();
            log_transition("transient", "in-memory");
            return Ok(EFile::in_memory(records, settings));
        }

        let path = config::workspace().tmp_file(&settings.prefix, &settings.suffix_tmp)?;
        let written = settings.serializer.write(&mut stream, &path);
        stream.close();
        let count = written?;
        info!(path = %path.display(), count, "spilled transient to disk");
        Ok(EFile::on_disk(path, settings))
    }

    /// Loads an `OnDisk` file's raw contents into memory when it is small
    /// enough (or auto-slurp is on). Other states pass through.
    pub fn slurped(self) -> EfResult<EFile<T>> {
        let EFile { state, settings } = self;
        match state {
            State::OnDisk { path } => {
                let ws = config::workspace();
                let size = measured(&path)?;
                if !ws.auto_slurp() && size >= ws.sz_limit() {
                    return Ok(EFile {
                        state: State::OnDisk { path },
                        settings,
                    });
                }
                let raw = fs::read_to_string(&path)?;
                log_transition("on-disk", "slurped");
                Ok(EFile::slurped_raw(raw, path, settings))
            }
            other => Ok(EFile {
                state: other,
                settings,
            }),
        }
    }

    /// Canonicalizes to `OnDisk`, writing the stream to a fresh file in
    /// `folder` (the workspace temp dir when `folder` is `None` or empty).
    /// Already on disk with no folder override is the identity.
    pub fn serialized(mut self, folder: Option<&Path>) -> EfResult<EFile<T>> {
        let folder = folder.filter(|f| !f.as_os_str().is_empty());
        if matches!(self.state, State::OnDisk { .. }) && folder.is_none() {
            return Ok(self);
        }

        let settings = Arc::clone(&self.settings);
        let dir = folder.unwrap_or_else(|| config::workspace().tmp_dir());
        let path = config::workspace().tmp_file_in(dir, &settings.prefix, &settings.suffix_tmp)?;

        let mut iter = self.iterator()?;
        let written = settings.serializer.write(&mut iter, &path);
        iter.close();
        let count = written?;
        debug!(path = %path.display(), count, "serialized to disk");
        Ok(EFile::on_disk(path, settings))
    }

    /// Serializes, then moves the file to `folder/name`, appending the
    /// save suffix unless `name` already carries it. Replaces any existing
    /// file at the destination; the prior temp file no longer exists.
    pub fn saved_as(self, name: &str, folder: Option<&Path>) -> EfResult<EFile<T>> {
        let ef = self.serialized(None)?;
        let settings = Arc::clone(&ef.settings);
        let src = match &ef.state {
            State::OnDisk { path } => path.clone(),
            _ => unreachable!("serialized always yields on-disk"),
        };

        let dir = folder
            .filter(|f| !f.as_os_str().is_empty())
            .unwrap_or_else(|| config::workspace().ans_dir());
        let file_name = if name.ends_with(&settings.suffix_sav) {
            name.to_string()
        } else {
            format!("{name}{}", settings.suffix_sav)
        };
        let dest = dir.join(file_name);

        fs::rename(&src, &dest).map_err(|error| {
            Error::FileCannotSave(format!(
                "{} -> {}: {error}",
                src.display(),
                dest.display()
            ))
        })?;
        info!(dest = %dest.display(), "saved file");
        Ok(EFile::on_disk(dest, settings))
    }

    /// Best-effort release of backing storage: deletes the file behind
    /// `OnDisk`/`Slurped`, closes a live `Transient` stream. Idempotent;
    /// OS errors are swallowed (a stale file is left behind).
    pub fn destruct(&mut self) {
        match &mut self.state {
            State::OnDisk { path } => {
                if let Err(error) = fs::remove_file(path.as_path()) {
                    debug!(path = %path.display(), %error, "leaving stale file behind");
                }
            }
            State::Slurped { origin, .. } => {
                let _ = fs::remove_file(origin.as_path());
            }
            State::Transient { stream } => {
                if let Some(mut stream) = stream.take() {
                    stream.close();
                }
            }
            State::InMemory { .. } => {}
        }
    }

    /// Merges this file with `others`, all assumed sorted under this
    /// file's comparator.
    pub fn merged_with(self, others: Vec<EFile<T>>, on_disk: bool) -> EfResult<EFile<T>> {
        let cmp = Arc::clone(&self.settings.order);
        let mut inputs = Vec::with_capacity(others.len() + 1);
        inputs.push(self);
        inputs.extend(others);
        merge::merged(inputs, cmp, on_disk)
    }

    /// External sort under `cmp`. `cap` overrides the sampled run size;
    /// `on_disk` forces the output to disk.
    pub fn sorted_with(
        self,
        cmp: Arc<CmpFn<T>>,
        cap: Option<usize>,
        on_disk: bool,
    ) -> EfResult<EFile<T>> {
        sort::sorted(self, cmp, cap, on_disk)
    }

    /// External sort under the file's own comparator.
    pub fn sorted(self) -> EfResult<EFile<T>> {
        let cmp = Arc::clone(&self.settings.order);
        self.sorted_with(cmp, None, false)
    }

    /// Stores, then sorts only if a linear scan finds the records out of
    /// order.
    pub fn sorted_if_needed(self) -> EfResult<EFile<T>> {
        sort::sorted_if_needed(self)
    }

    /// Linear order check under the file's comparator. An empty file is
    /// sorted. Consumes a `Transient`.
    pub fn is_sorted(&mut self) -> EfResult<bool> {
        let cmp = Arc::clone(&self.settings.order);
        self.processed_with(|iter| {
            let mut prev: Option<T> = None;
            while let Some(cur) = iter.try_next()? {
                if let Some(prev) = &prev {
                    if cmp(prev, &cur) == Ordering::Greater {
                        return Ok(false);
                    }
                }
                prev = Some(cur);
            }
            Ok(true)
        })
    }

    /// Element-wise equivalence test.
    ///
    /// Two files backed by the same on-disk path are equal without a walk.
    /// Unless `forced`, a `Transient` on either side yields `false` — the
    /// stream cannot be safely consumed by a mere comparison. `same_elem`
    /// overrides the settings' equality.
    pub fn has_same_value_as(
        &mut self,
        other: &mut EFile<T>,
        forced: bool,
        same_elem: Option<Arc<EqFn<T>>>,
    ) -> EfResult<bool> {
        if !forced
            && (self.kind() == EFileKind::Transient || other.kind() == EFileKind::Transient)
        {
            return Ok(false);
        }
        if let (State::OnDisk { path: a }, State::OnDisk { path: b }) =
            (&self.state, &other.state)
        {
            if a == b {
                return Ok(true);
            }
        }

        let eq = same_elem.unwrap_or_else(|| Arc::clone(&self.settings.equality));
        let mut left = self.iterator()?;
        let mut right = match other.iterator() {
            Ok(right) => right,
            Err(error) => {
                left.close();
                return Err(error);
            }
        };
        let out = (|| loop {
            match (left.try_next()?, right.try_next()?) {
                (None, None) => return Ok(true),
                (Some(a), Some(b)) if eq(&a, &b) => continue,
                _ => return Ok(false),
            }
        })();
        left.close();
        right.close();
        out
    }

    /// Size of the primary backing file, in bytes.
    ///
    /// This is the extension hook for cross-file accounting; the base form
    /// deliberately ignores any sub-files a domain format might reference,
    /// and reports 0 for states without a backing file.
    pub fn total_size_on_disk(&self) -> EfResult<u64> {
        match &self.state {
            State::OnDisk { path } => measured(path),
            _ => Ok(0),
        }
    }
}

fn log_transition(from: &'static str, to: &'static str) {
    if config::workspace().debug() {
        debug!(from, to, "efile state transition");
    }
}

/// Measures a file that must exist.
fn measured(path: &Path) -> EfResult<u64> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            Err(Error::FileNotFound(path.display().to_string()))
        }
        Err(error) => Err(error.into()),
    }
}
