//! Synchronized iteration over a landmark stream and an experiment stream.
//!
//! Given an experiment stream X and a landmark stream Y, each sorted under
//! orderings compatible with the caller's `is_before` and `can_see`
//! predicates, the engine co-traverses both in a single pass. A bounded
//! window Z buffers the landmarks that may still synchronize with later
//! experiment elements; landmarks proven unable to see any later
//! experiment are dropped, and the window is re-seated in front of the
//! remaining landmarks whenever the experiment cursor advances.
//!
//! Correctness rests on the caller's contract: `is_before` must be
//! monotone with both stream orders, and `can_see` antimonotone relative
//! to `is_before`. The engine cannot verify either.

use std::collections::VecDeque;

use crate::{
    error::EfResult,
    iter::{LazyIter, Source},
};

/// Match consumer driven by the engine: `on_pair` fires once per visible
/// `(x, y)` pair, `on_group` once per experiment element with its maximal
/// visible window. Operator shapes implement whichever they need.
trait SyncSink<X, Y> {
    fn on_pair(&mut self, x: &X, y: &Y) -> EfResult<()>;
    fn on_group(&mut self, x: &X, window: &[Y]) -> EfResult<()>;
}

/// The landmark cursor: buffered (re-seated) elements in front of the
/// not-yet-pulled tail.
struct Cursor<Y> {
    pending: VecDeque<Y>,
    tail: LazyIter<Y>,
}

impl<Y: 'static> Cursor<Y> {
    fn new(tail: LazyIter<Y>) -> Cursor<Y> {
        Cursor {
            pending: VecDeque::new(),
            tail,
        }
    }

    fn head(&mut self) -> EfResult<Option<&Y>> {
        if self.pending.front().is_some() {
            return Ok(self.pending.front());
        }
        self.tail.head()
    }

    fn advance(&mut self) -> EfResult<Option<Y>> {
        if let Some(y) = self.pending.pop_front() {
            return Ok(Some(y));
        }
        self.tail.try_next()
    }

    /// True when nothing remains after the current head.
    fn rest_is_empty(&mut self) -> EfResult<bool> {
        match self.pending.len() {
            0 => Ok(self.tail.peek_ahead(2)?.is_none()),
            1 => Ok(!self.tail.has_next()?),
            _ => Ok(false),
        }
    }

    /// Puts `window` back in front of the remaining landmarks.
    fn reseat(&mut self, window: Vec<Y>) {
        for y in window.into_iter().rev() {
            self.pending.push_front(y);
        }
    }

    fn close(&mut self) {
        self.pending.clear();
        self.tail.close();
    }
}

/// The generic driver. One [`step`](Engine::step) performs one transition
/// of the synchronization state machine.
struct Engine<X, Y, B, C> {
    xs: LazyIter<X>,
    ys: Cursor<Y>,
    z: Vec<Y>,
    x: Option<X>,
    is_before: B,
    can_see: C,
    done: bool,
}

impl<X, Y, B, C> Engine<X, Y, B, C>
where
    X: 'static,
    Y: 'static,
    B: Fn(&Y, &X) -> bool,
    C: Fn(&Y, &X) -> bool,
{
    fn new(experiments: LazyIter<X>, landmarks: LazyIter<Y>, is_before: B, can_see: C) -> Self {
        Engine {
            xs: experiments,
            ys: Cursor::new(landmarks),
            z: Vec::new(),
            x: None,
            is_before,
            can_see,
            done: false,
        }
    }

    /// Performs one transition, feeding any emission into `sink`. Returns
    /// `false` once the walk has terminated.
    fn step(&mut self, sink: &mut impl SyncSink<X, Y>) -> EfResult<bool> {
        if self.done {
            return Ok(false);
        }

        if self.x.is_none() {
            match self.xs.try_next()? {
                Some(x) => self.x = Some(x),
                None => {
                    // Experiments exhausted.
                    self.finish();
                    return Ok(false);
                }
            }
        }

        if self.ys.head()?.is_none() {
            if self.z.is_empty() {
                // Landmarks and window both exhausted.
                self.finish();
                return Ok(false);
            }
            // Replay the buffered window as the landmark stream.
            let window = std::mem::take(&mut self.z);
            self.ys.reseat(window);
            return Ok(true);
        }

        let (before, sees) = {
            let x = self.x.as_ref().expect("current experiment");
            let y = self.ys.head()?.expect("landmark head");
            ((self.is_before)(y, x), (self.can_see)(y, x))
        };

        if before && !sees {
            // This landmark can never see any later experiment.
            self.ys.advance()?;
            return Ok(true);
        }

        if !sees {
            // The experiment's maximal window is complete.
            let x = self.x.take().expect("current experiment");
            sink.on_group(&x, &self.z)?;
            let window = std::mem::take(&mut self.z);
            self.ys.reseat(window);
            return Ok(true);
        }

        if self.ys.rest_is_empty()? {
            // Final landmark: combine, then replay window ++ landmark for
            // the next experiment.
            let x = self.x.take().expect("current experiment");
            let y = self.ys.advance()?.expect("landmark head");
            sink.on_pair(&x, &y)?;
            let mut window = std::mem::take(&mut self.z);
            window.push(y);
            sink.on_group(&x, &window)?;
            self.ys.reseat(window);
            return Ok(true);
        }

        // Visible landmark with more to come: buffer it into the window.
        let y = self.ys.advance()?.expect("landmark head");
        {
            let x = self.x.as_ref().expect("current experiment");
            sink.on_pair(x, &y)?;
        }
        self.z.push(y);
        Ok(true)
    }

    /// Terminates the walk, closing both inputs and discarding the
    /// window. Idempotent.
    fn finish(&mut self) {
        self.done = true;
        self.z.clear();
        self.xs.close();
        self.ys.close();
    }
}

struct FnSink<P, G> {
    pair: P,
    group: G,
}

impl<X, Y, P, G> SyncSink<X, Y> for FnSink<P, G>
where
    P: FnMut(&X, &Y) -> EfResult<()>,
    G: FnMut(&X, &[Y]) -> EfResult<()>,
{
    fn on_pair(&mut self, x: &X, y: &Y) -> EfResult<()> {
        (self.pair)(x, y)
    }

    fn on_group(&mut self, x: &X, window: &[Y]) -> EfResult<()> {
        (self.group)(x, window)
    }
}

fn drive<X, Y, B, C>(
    mut engine: Engine<X, Y, B, C>,
    sink: &mut impl SyncSink<X, Y>,
) -> EfResult<()>
where
    X: 'static,
    Y: 'static,
    B: Fn(&Y, &X) -> bool,
    C: Fn(&Y, &X) -> bool,
{
    let outcome = (|| {
        while engine.step(&mut *sink)? {}
        Ok(())
    })();
    engine.finish();
    outcome
}

/// Pairwise fold: `acc = step(x, y, acc)` for every pair with
/// `can_see(y, x)`, in a single linear pass.
///
/// Both inputs are closed on normal and error exit. Eager use is a
/// `LazyIter::from_vec` away.
pub fn fold_pairwise<X, Y, A>(
    experiments: LazyIter<X>,
    landmarks: LazyIter<Y>,
    is_before: impl Fn(&Y, &X) -> bool,
    can_see: impl Fn(&Y, &X) -> bool,
    zero: A,
    mut step: impl FnMut(&X, &Y, A) -> A,
) -> EfResult<A>
where
    X: 'static,
    Y: 'static,
{
    let mut acc = Some(zero);
    let mut sink = FnSink {
        pair: |x: &X, y: &Y| -> EfResult<()> {
            let folded = step(x, y, acc.take().expect("accumulator"));
            acc = Some(folded);
            Ok(())
        },
        group: |_: &X, _: &[Y]| -> EfResult<()> { Ok(()) },
    };
    drive(
        Engine::new(experiments, landmarks, is_before, can_see),
        &mut sink,
    )?;
    drop(sink);
    Ok(acc.expect("accumulator"))
}

/// Grouped fold: `acc = step(x, window, acc)` once per experiment element,
/// with its maximal window of visible landmarks.
pub fn fold_grouped<X, Y, A>(
    experiments: LazyIter<X>,
    landmarks: LazyIter<Y>,
    is_before: impl Fn(&Y, &X) -> bool,
    can_see: impl Fn(&Y, &X) -> bool,
    zero: A,
    mut step: impl FnMut(&X, &[Y], A) -> A,
) -> EfResult<A>
where
    X: 'static,
    Y: 'static,
{
    let mut acc = Some(zero);
    let mut sink = FnSink {
        pair: |_: &X, _: &Y| -> EfResult<()> { Ok(()) },
        group: |x: &X, window: &[Y]| -> EfResult<()> {
            let folded = step(x, window, acc.take().expect("accumulator"));
            acc = Some(folded);
            Ok(())
        },
    };
    drive(
        Engine::new(experiments, landmarks, is_before, can_see),
        &mut sink,
    )?;
    drop(sink);
    Ok(acc.expect("accumulator"))
}

enum SyncOp<X, Y, O> {
    PairMap(Box<dyn FnMut(&X, &Y) -> O>),
    PairFlatMap(Box<dyn FnMut(&X, &Y) -> Vec<O>>),
    GroupMap(Box<dyn FnMut(&X, &[Y]) -> O>),
    GroupFlatMap(Box<dyn FnMut(&X, &[Y]) -> Vec<O>>),
}

/// The lazy operator shapes: a stream over the engine. Closing the stream
/// (or dropping it early) closes both inputs and discards the window.
struct SyncStream<X, Y, B, C, O> {
    engine: Engine<X, Y, B, C>,
    op: SyncOp<X, Y, O>,
    out: VecDeque<O>,
}

struct OpSink<'a, X, Y, O> {
    op: &'a mut SyncOp<X, Y, O>,
    out: &'a mut VecDeque<O>,
}

impl<X, Y, O> SyncSink<X, Y> for OpSink<'_, X, Y, O> {
    fn on_pair(&mut self, x: &X, y: &Y) -> EfResult<()> {
        match &mut *self.op {
            SyncOp::PairMap(op) => self.out.push_back(op(x, y)),
            SyncOp::PairFlatMap(op) => self.out.extend(op(x, y)),
            SyncOp::GroupMap(_) | SyncOp::GroupFlatMap(_) => {}
        }
        Ok(())
    }

    fn on_group(&mut self, x: &X, window: &[Y]) -> EfResult<()> {
        match &mut *self.op {
            SyncOp::GroupMap(op) => self.out.push_back(op(x, window)),
            SyncOp::GroupFlatMap(op) => self.out.extend(op(x, window)),
            SyncOp::PairMap(_) | SyncOp::PairFlatMap(_) => {}
        }
        Ok(())
    }
}

impl<X, Y, B, C, O> Source<O> for SyncStream<X, Y, B, C, O>
where
    X: 'static,
    Y: 'static,
    B: Fn(&Y, &X) -> bool,
    C: Fn(&Y, &X) -> bool,
{
    fn pull(&mut self) -> EfResult<Option<O>> {
        loop {
            if let Some(out) = self.out.pop_front() {
                return Ok(Some(out));
            }
            let mut sink = OpSink {
                op: &mut self.op,
                out: &mut self.out,
            };
            match self.engine.step(&mut sink) {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(error) => {
                    self.engine.finish();
                    return Err(error);
                }
            }
        }
    }

    fn close(&mut self) {
        self.engine.finish();
        self.out.clear();
    }
}

fn sync_stream<X, Y, O>(
    experiments: LazyIter<X>,
    landmarks: LazyIter<Y>,
    is_before: impl Fn(&Y, &X) -> bool + 'static,
    can_see: impl Fn(&Y, &X) -> bool + 'static,
    op: SyncOp<X, Y, O>,
) -> LazyIter<O>
where
    X: 'static,
    Y: 'static,
    O: 'static,
{
    LazyIter::from_source(SyncStream {
        engine: Engine::new(experiments, landmarks, is_before, can_see),
        op,
        out: VecDeque::new(),
    })
}

/// Lazily maps every visible `(x, y)` pair through `op`.
pub fn map_pairwise<X, Y, O>(
    experiments: LazyIter<X>,
    landmarks: LazyIter<Y>,
    is_before: impl Fn(&Y, &X) -> bool + 'static,
    can_see: impl Fn(&Y, &X) -> bool + 'static,
    op: impl FnMut(&X, &Y) -> O + 'static,
) -> LazyIter<O>
where
    X: 'static,
    Y: 'static,
    O: 'static,
{
    sync_stream(
        experiments,
        landmarks,
        is_before,
        can_see,
        SyncOp::PairMap(Box::new(op)),
    )
}

/// Lazily flat-maps every visible `(x, y)` pair through `op`.
pub fn flat_map_pairwise<X, Y, O>(
    experiments: LazyIter<X>,
    landmarks: LazyIter<Y>,
    is_before: impl Fn(&Y, &X) -> bool + 'static,
    can_see: impl Fn(&Y, &X) -> bool + 'static,
    op: impl FnMut(&X, &Y) -> Vec<O> + 'static,
) -> LazyIter<O>
where
    X: 'static,
    Y: 'static,
    O: 'static,
{
    sync_stream(
        experiments,
        landmarks,
        is_before,
        can_see,
        SyncOp::PairFlatMap(Box::new(op)),
    )
}

/// Lazily maps every experiment element with its maximal visible window.
pub fn map_grouped<X, Y, O>(
    experiments: LazyIter<X>,
    landmarks: LazyIter<Y>,
    is_before: impl Fn(&Y, &X) -> bool + 'static,
    can_see: impl Fn(&Y, &X) -> bool + 'static,
    op: impl FnMut(&X, &[Y]) -> O + 'static,
) -> LazyIter<O>
where
    X: 'static,
    Y: 'static,
    O: 'static,
{
    sync_stream(
        experiments,
        landmarks,
        is_before,
        can_see,
        SyncOp::GroupMap(Box::new(op)),
    )
}

/// Lazily flat-maps every experiment element with its maximal visible
/// window.
pub fn flat_map_grouped<X, Y, O>(
    experiments: LazyIter<X>,
    landmarks: LazyIter<Y>,
    is_before: impl Fn(&Y, &X) -> bool + 'static,
    can_see: impl Fn(&Y, &X) -> bool + 'static,
    op: impl FnMut(&X, &[Y]) -> Vec<O> + 'static,
) -> LazyIter<O>
where
    X: 'static,
    Y: 'static,
    O: 'static,
{
    sync_stream(
        experiments,
        landmarks,
        is_before,
        can_see,
        SyncOp::GroupFlatMap(Box::new(op)),
    )
}
