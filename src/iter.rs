use std::collections::VecDeque;

use crate::error::{EfResult, Error};

/// A pull-based, single-pass record source.
///
/// The core is strictly sequential: a source may block on I/O inside
/// [`pull`](Source::pull) and nowhere else. `close` must be idempotent and
/// release the underlying resource.
pub trait Source<T> {
    /// Produces the next record, or `None` on exhaustion.
    fn pull(&mut self) -> EfResult<Option<T>>;

    /// Releases the underlying resource. Safe to call multiple times.
    fn close(&mut self) {}
}

/// A single-pass cursor with bounded restartable lookahead.
///
/// `peek_ahead` and `lookahead` fill an internal FIFO which `next` drains
/// before pulling from the source again, so previewing never loses records.
pub struct LazyIter<T> {
    source: Box<dyn Source<T>>,
    buffer: VecDeque<T>,
    exhausted: bool,
    closed: bool,
}

impl<T: 'static> LazyIter<T> {
    pub fn from_source(source: impl Source<T> + 'static) -> LazyIter<T> {
        LazyIter {
            source: Box::new(source),
            buffer: VecDeque::new(),
            exhausted: false,
            closed: false,
        }
    }

    /// An iterator over an in-memory sequence.
    pub fn from_vec(records: Vec<T>) -> LazyIter<T> {
        LazyIter::from_source(VecSource(records.into_iter()))
    }

    pub fn empty() -> LazyIter<T> {
        LazyIter::from_vec(Vec::new())
    }

    /// Restricts this iterator to the records matching `pred`.
    pub fn filtered(self, pred: impl Fn(&T) -> bool + 'static) -> LazyIter<T> {
        LazyIter::from_source(FilterSource {
            inner: self,
            pred: Box::new(pred),
        })
    }

    /// Fills the lookahead buffer with up to `n` records.
    fn fill(&mut self, n: usize) -> EfResult<()> {
        while self.buffer.len() < n && !self.exhausted {
            match self.source.pull()? {
                Some(record) => self.buffer.push_back(record),
                None => {
                    self.exhausted = true;
                    self.source.close();
                }
            }
        }
        Ok(())
    }

    pub fn has_next(&mut self) -> EfResult<bool> {
        self.fill(1)?;
        Ok(!self.buffer.is_empty())
    }

    /// Advances the cursor. Fails with [`Error::EndOfStream`] on an
    /// exhausted iterator.
    pub fn next(&mut self) -> EfResult<T> {
        self.try_next()?.ok_or(Error::EndOfStream)
    }

    /// Advances the cursor, yielding `None` on exhaustion.
    pub fn try_next(&mut self) -> EfResult<Option<T>> {
        self.fill(1)?;
        Ok(self.buffer.pop_front())
    }

    /// Peeks at the next record without consuming it.
    pub fn head(&mut self) -> EfResult<Option<&T>> {
        self.peek_ahead(1)
    }

    /// Peeks at the `k`-th upcoming record (1-based) without consuming any,
    /// or `None` if fewer than `k` remain.
    pub fn peek_ahead(&mut self, k: usize) -> EfResult<Option<&T>> {
        assert!(k >= 1, "peek_ahead is 1-based");
        self.fill(k)?;
        Ok(self.buffer.get(k - 1))
    }

    /// Returns up to `k` upcoming records as a restartable prefix: the
    /// returned records will still be yielded by subsequent `next` calls.
    pub fn lookahead(&mut self, k: usize) -> EfResult<&[T]> {
        self.fill(k)?;
        let len = self.buffer.len().min(k);
        Ok(&self.buffer.make_contiguous()[..len])
    }

    /// Closes the underlying source. Idempotent; buffered records are
    /// discarded.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.exhausted = true;
            self.buffer.clear();
            self.source.close();
        }
    }
}

impl<T: 'static> From<Vec<T>> for LazyIter<T> {
    fn from(records: Vec<T>) -> Self {
        LazyIter::from_vec(records)
    }
}

impl<T: 'static> Source<T> for LazyIter<T> {
    fn pull(&mut self) -> EfResult<Option<T>> {
        self.try_next()
    }

    fn close(&mut self) {
        LazyIter::close(self)
    }
}

impl<T> Drop for LazyIter<T> {
    fn drop(&mut self) {
        if !self.closed {
            self.source.close();
        }
    }
}

struct VecSource<T>(std::vec::IntoIter<T>);

impl<T> Source<T> for VecSource<T> {
    fn pull(&mut self) -> EfResult<Option<T>> {
        Ok(self.0.next())
    }
}

struct FilterSource<T> {
    inner: LazyIter<T>,
    pred: Box<dyn Fn(&T) -> bool>,
}

impl<T: 'static> Source<T> for FilterSource<T> {
    fn pull(&mut self) -> EfResult<Option<T>> {
        while let Some(record) = self.inner.try_next()? {
            if (self.pred)(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
