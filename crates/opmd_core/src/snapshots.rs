use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use opmd_io::{AdvanceStatus, IterationEncoding, StepStatus};
use opmd_types::{Error, Result};

use crate::iteration::{CloseStatus, Iteration, ParseState};
use crate::series;
use crate::state::SharedRef;

/// The read-side view over all snapshots of a series, step by step.
///
/// Iterate it to receive iterations in ascending index order; on
/// step-capable resources each exhausted step advances the engine and
/// parses whatever became visible.
pub struct ReadIterations {
    shared: SharedRef,
}

impl ReadIterations {
    pub(crate) fn new(shared: SharedRef) -> Self {
        Self { shared }
    }

    pub fn iter(&self) -> StatefulIterator {
        StatefulIterator::new(Arc::clone(&self.shared))
    }
}

impl IntoIterator for ReadIterations {
    type Item = Result<Iteration>;
    type IntoIter = StatefulIterator;

    fn into_iter(self) -> Self::IntoIter {
        StatefulIterator::new(self.shared)
    }
}

impl IntoIterator for &ReadIterations {
    type Item = Result<Iteration>;
    type IntoIter = StatefulIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Forward-only iterator over snapshots.
///
/// Yielding the next iteration closes the previous one; an iteration seen
/// twice (streams may repeat content across steps) is skipped.
pub struct StatefulIterator {
    shared: SharedRef,
    queue: VecDeque<u64>,
    seen: BTreeSet<u64>,
    current: Option<u64>,
    started: bool,
    finished: bool,
}

impl StatefulIterator {
    pub(crate) fn new(shared: SharedRef) -> Self {
        Self {
            shared,
            queue: VecDeque::new(),
            seen: BTreeSet::new(),
            current: None,
            started: false,
            finished: false,
        }
    }

    fn start(&mut self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let (status, available) = series::begin_step(&mut inner, None)?;
        match status {
            AdvanceStatus::Over => {
                self.finished = true;
                return Ok(());
            }
            AdvanceStatus::Ok => {
                let indices = match available {
                    Some(indices) => indices,
                    None => inner.iterations.keys().copied().collect(),
                };
                self.queue = indices.into_iter().collect();
            }
            AdvanceStatus::RandomAccess => {
                // everything is already visible; deliver in ascending
                // order (linear readers catch up on parsing first)
                series::parse_root_if_needed(&mut inner)?;
                if inner.encoding != IterationEncoding::FileBased
                    && inner.iterations.is_empty()
                {
                    series::visible_iterations(&mut inner)?;
                }
                self.queue = inner.iterations.keys().copied().collect();
            }
        }
        Ok(())
    }

    /// Advance the engine one step and refill the queue; `false` once the
    /// stream is over.
    fn next_step(&mut self) -> Result<bool> {
        let mut inner = self.shared.inner.lock();
        if inner.uses_steps != Some(true) {
            return Ok(false);
        }
        if inner.step_status == StepStatus::DuringStep {
            series::end_step(&mut inner, None)?;
        }
        let (status, available) = series::begin_step(&mut inner, None)?;
        if status == AdvanceStatus::Over {
            return Ok(false);
        }
        let indices = match available {
            Some(indices) => indices,
            None => inner.iterations.keys().copied().collect(),
        };
        drop(inner);
        self.queue = indices.into_iter().collect();
        Ok(true)
    }

    fn close_current(&mut self) -> Result<()> {
        let Some(index) = self.current.take() else {
            return Ok(());
        };
        let handle = {
            let inner = self.shared.inner.lock();
            inner
                .iterations
                .get(&index)
                .map(|state| Iteration::wrap_indexed(Arc::clone(&self.shared), state.node, index))
        };
        if let Some(iteration) = handle {
            if !iteration.closed() {
                iteration.close()?;
            }
        }
        Ok(())
    }

    fn open_iteration(&mut self, index: u64) -> Result<Iteration> {
        let mut inner = self.shared.inner.lock();
        let state = inner
            .iterations
            .get(&index)
            .ok_or_else(|| Error::Internal(format!("iteration {index} vanished mid-iteration")))?;
        let node = state.node;
        if state.parse_state == ParseState::Deferred {
            series::parse_iteration(&mut inner, index, false)?;
        }
        if inner.encoding == IterationEncoding::FileBased {
            series::open_iteration_file(&mut inner, index)?;
        }
        Ok(Iteration::wrap_indexed(Arc::clone(&self.shared), node, index))
    }

    fn next_impl(&mut self) -> Result<Option<Iteration>> {
        if self.finished {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            self.start()?;
            if self.finished {
                return Ok(None);
            }
        }

        self.close_current()?;

        loop {
            while let Some(index) = self.queue.pop_front() {
                if self.seen.contains(&index) {
                    continue;
                }
                let already_consumed = {
                    let inner = self.shared.inner.lock();
                    inner
                        .iterations
                        .get(&index)
                        .is_some_and(|state| state.close_status == CloseStatus::ClosedInBackend)
                };
                if already_consumed {
                    continue;
                }
                let iteration = self.open_iteration(index)?;
                self.seen.insert(index);
                self.current = Some(index);
                return Ok(Some(iteration));
            }

            if !self.next_step()? {
                self.finished = true;
                return Ok(None);
            }
        }
    }
}

impl Iterator for StatefulIterator {
    type Item = Result<Iteration>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_impl() {
            Ok(Some(iteration)) => Some(Ok(iteration)),
            Ok(None) => None,
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Random-access traversal over all snapshots of a file-like resource.
///
/// Unlike [`StatefulIterator`] this neither closes what it hands out nor
/// advances any step; it simply visits every known iteration in ascending
/// index order, parsing deferred ones on the way.
pub struct RandomAccessIterator {
    shared: SharedRef,
    indices: std::vec::IntoIter<u64>,
}

impl RandomAccessIterator {
    pub(crate) fn new(shared: SharedRef) -> Self {
        let indices: Vec<u64> = shared.inner.lock().iterations.keys().copied().collect();
        Self {
            shared,
            indices: indices.into_iter(),
        }
    }
}

impl Iterator for RandomAccessIterator {
    type Item = Result<Iteration>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.indices.next()?;
        let mut inner = self.shared.inner.lock();
        let Some(state) = inner.iterations.get(&index) else {
            return Some(Err(Error::Internal(format!(
                "iteration {index} vanished mid-iteration"
            ))));
        };
        let node = state.node;
        if state.parse_state == ParseState::Deferred {
            if let Err(err) = series::parse_iteration(&mut inner, index, false) {
                return Some(Err(err));
            }
        }
        drop(inner);
        Some(Ok(Iteration::wrap_indexed(Arc::clone(&self.shared), node, index)))
    }
}

/// The write-side iteration sequence.
///
/// Accessing index `i` closes a previously open, different iteration and
/// eagerly begins an engine step where the encoding uses them.
pub struct WriteIterations {
    shared: SharedRef,
}

impl WriteIterations {
    pub(crate) fn new(shared: SharedRef) -> Self {
        Self { shared }
    }

    pub fn get(&self, index: u64) -> Result<Iteration> {
        // close whatever was open before, outside the lock
        let previous = {
            let inner = self.shared.inner.lock();
            inner.currently_open.filter(|&open| open != index).and_then(|open| {
                inner
                    .iterations
                    .get(&open)
                    .map(|state| Iteration::wrap_indexed(Arc::clone(&self.shared), state.node, open))
            })
        };
        if let Some(previous) = previous {
            if !previous.closed() {
                previous.close()?;
            }
        }

        let mut inner = self.shared.inner.lock();
        if !inner.handler.access.writable() {
            return Err(Error::usage(format!(
                "cannot write iterations in access mode {}",
                inner.handler.access
            )));
        }
        let node = series::create_iteration(&mut inner, index, true)?;
        inner.currently_open = Some(index);

        // step-using engines get their step opened right away
        if inner.uses_steps != Some(false)
            && series::step_status_of(&inner, index) != StepStatus::DuringStep
        {
            series::begin_step(&mut inner, Some(index))?;
        }
        Ok(Iteration::wrap_indexed(Arc::clone(&self.shared), node, index))
    }
}
