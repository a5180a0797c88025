use std::sync::Arc;

use opmd_io::{IoTask, IterationEncoding, NodeId, Param, StepStatus};
use opmd_types::{Error, Result};

use crate::attributable::impl_attributable;
use crate::container::Container;
use crate::group::Group;
use crate::record::{Mesh, ParticleSpecies};
use crate::state::{Inner, NodeKind, SharedRef};
use crate::{attributable, series};

/// Whether an iteration has been closed, and how far the closing has
/// propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    Open,
    /// Logically closed by the user; the backend has not seen it yet.
    ClosedInFrontend,
    /// Closed on the backend; no further accesses may propagate.
    ClosedInBackend,
    /// Closed internally for housekeeping; may be reopened by the engine
    /// (never by the user).
    ClosedTemporarily,
}

/// Lifecycle of lazily parsed iterations.
///
/// `Parsing` guards re-entrancy: closing an iteration may trigger parsing
/// of its successor, which must not recurse into itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Deferred,
    Parsing,
    Parsed,
    Failed,
}

/// One snapshot of the series.
#[derive(Clone)]
pub struct Iteration {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
    pub(crate) index: u64,
}

impl Iteration {
    pub(crate) fn wrap_indexed(shared: SharedRef, node: NodeId, index: u64) -> Self {
        Self { shared, node, index }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn time(&self) -> f64 {
        self.get_attribute("time").and_then(|attr| attr.as_f64()).unwrap_or(0.0)
    }

    pub fn set_time(&self, time: f64) -> Result<()> {
        self.set_attribute("time", time)
    }

    pub fn dt(&self) -> f64 {
        self.get_attribute("dt").and_then(|attr| attr.as_f64()).unwrap_or(1.0)
    }

    pub fn set_dt(&self, dt: f64) -> Result<()> {
        self.set_attribute("dt", dt)
    }

    pub fn time_unit_si(&self) -> f64 {
        self.get_attribute("timeUnitSI")
            .and_then(|attr| attr.as_f64())
            .unwrap_or(1.0)
    }

    pub fn set_time_unit_si(&self, time_unit_si: f64) -> Result<()> {
        self.set_attribute("timeUnitSI", time_unit_si)
    }

    /// The meshes of this iteration.
    pub fn meshes(&self) -> Container<Mesh> {
        let node = self.structural_child_node(true);
        Container::new(Arc::clone(&self.shared), node)
    }

    /// The particle species of this iteration.
    pub fn particles(&self) -> Container<ParticleSpecies> {
        let node = self.structural_child_node(false);
        Container::new(Arc::clone(&self.shared), node)
    }

    /// Free-form groups next to `meshes`/`particles`.
    pub fn subgroups(&self) -> Container<Group> {
        Container::new(Arc::clone(&self.shared), self.node)
    }

    fn structural_child_node(&self, meshes: bool) -> NodeId {
        let mut inner = self.shared.inner.lock();
        let name = if meshes {
            inner.meshes_path.trim_end_matches('/').to_owned()
        } else {
            inner.particles_path.trim_end_matches('/').to_owned()
        };
        match inner.handler.registry.child(self.node, &name) {
            Some(node) => node,
            None => {
                let node = inner.handler.registry.create_child(self.node, &name);
                inner.aux_mut(node).kind = NodeKind::Group;
                node
            }
        }
    }

    /// Close this iteration.
    ///
    /// No further backend-propagating accesses may be performed on it, and
    /// it cannot be reopened. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let inner = &mut *inner;
        let Some(state) = inner.iterations.get_mut(&self.index) else {
            return Err(Error::Internal(format!("iteration {} has no state", self.index)));
        };
        match state.close_status {
            CloseStatus::ClosedInBackend => return Ok(()),
            CloseStatus::Open | CloseStatus::ClosedInFrontend => {
                state.close_status = CloseStatus::ClosedInFrontend;
            }
            CloseStatus::ClosedTemporarily => {
                state.close_status = if inner.handler.registry.dirty_recursive(self.node) {
                    CloseStatus::ClosedInFrontend
                } else {
                    CloseStatus::ClosedInBackend
                };
            }
        }

        // leave the marker the reading side checks via closed_by_writer
        if inner.handler.access.writable() {
            attributable::set_attribute(inner, self.node, "closed", true.into(), false)?;
        }

        let step_status = series::step_status_of(inner, self.index);
        if step_status == StepStatus::DuringStep {
            series::end_step(inner, Some(self.index))?;
        } else {
            series::flush_iterations(inner, &[self.index])?;
        }

        // propagate the close to the backend
        let state = inner
            .iterations
            .get_mut(&self.index)
            .expect("state checked above");
        if state.close_status == CloseStatus::ClosedInFrontend {
            state.close_status = CloseStatus::ClosedInBackend;
            if inner.encoding == IterationEncoding::FileBased {
                inner.handler.enqueue(IoTask::new(self.node, Param::CloseFile));
            } else {
                inner.handler.enqueue(IoTask::new(self.node, Param::ClosePath));
            }
            inner.handler.flush()?;
        }
        Ok(())
    }

    /// Explicitly open this iteration (deferred parses run now; file-based
    /// files are opened collectively here rather than at first access).
    pub fn open(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        let Some(state) = inner.iterations.get(&self.index) else {
            return Err(Error::Internal(format!("iteration {} has no state", self.index)));
        };
        if state.close_status == CloseStatus::ClosedInBackend {
            return Err(Error::usage(format!(
                "iteration {} is closed and cannot be reopened",
                self.index
            )));
        }
        if state.parse_state == ParseState::Deferred {
            series::parse_iteration(&mut inner, self.index, false)?;
        } else if inner.encoding == IterationEncoding::FileBased
            && inner.handler.access.readable()
        {
            series::open_iteration_file(&mut inner, self.index)?;
        }
        Ok(())
    }

    /// Whether the user has closed this iteration.
    pub fn closed(&self) -> bool {
        let inner = self.shared.inner.lock();
        matches!(
            close_status(&inner, self.index),
            Some(CloseStatus::ClosedInFrontend | CloseStatus::ClosedInBackend)
        )
    }

    /// Whether the producing side closed this iteration (streaming
    /// consumers use this to learn that no more data will arrive for it).
    pub fn closed_by_writer(&self) -> bool {
        self.get_attribute("closed")
            .map(|attr| match attr {
                opmd_types::Value::Bool(b) => b,
                other => other.as_u64().unwrap_or(0) != 0,
            })
            .unwrap_or(false)
    }

    /// Re-read this iteration's hierarchy from the backend.
    ///
    /// The explicit replacement for access-mode juggling: refreshing an
    /// already parsed iteration simply parses it again.
    pub fn refresh(&self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if !inner.handler.access.readable() {
            return Err(Error::usage(
                "refresh only makes sense on a readable series".to_owned(),
            ));
        }
        series::parse_iteration(&mut inner, self.index, true)
    }

    pub fn parse_state(&self) -> ParseState {
        let inner = self.shared.inner.lock();
        inner
            .iterations
            .get(&self.index)
            .map(|state| state.parse_state)
            .unwrap_or(ParseState::Failed)
    }
}

fn close_status(inner: &Inner, index: u64) -> Option<CloseStatus> {
    inner.iterations.get(&index).map(|state| state.close_status)
}

impl_attributable!(Iteration);
