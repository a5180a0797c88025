use std::sync::Arc;

use parking_lot::Mutex;

use opmd_chunk::{ChunkTable, WrittenChunkInfo};
use opmd_io::{
    DatasetElement, IoTask, NodeId, OutCell, Param, TargetCell,
};
use opmd_types::{
    bounds_check, volume, Dataset, Datatype, Error, Extent, Offset, Result,
};

use crate::attributable::impl_attributable;
use crate::container::impl_container_for;
use crate::state::{Inner, NodeKind, SharedRef, SpanPolicy};

/// A typed n-dimensional dataset handle.
///
/// Everything here is deferred: `store_chunk`/`load_chunk` enqueue work
/// that only becomes real (respectively observable) after the next
/// successful [`crate::Series::flush`].
#[derive(Clone)]
pub struct RecordComponent {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
}

/// The result cell of a deferred read.
pub struct ChunkHandle<T> {
    cell: TargetCell<T>,
}

impl<T: DatasetElement> ChunkHandle<T> {
    /// Consume the loaded data. Errors until the defining flush ran.
    pub fn get(&self) -> Result<Vec<T>> {
        self.cell.lock().take().ok_or_else(|| {
            Error::usage("chunk not loaded yet, flush the series first".to_owned())
        })
    }
}

/// A driver-managed buffer the caller fills instead of supplying their
/// own; contents are committed by the next flush.
pub struct SpanBuffer<T> {
    cell: TargetCell<T>,
}

impl<T: DatasetElement> SpanBuffer<T> {
    /// Mutate the span contents in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut [T]) -> R) -> Result<R> {
        let mut guard = self.cell.lock();
        let data = guard.as_mut().ok_or_else(|| {
            Error::usage("span buffer already consumed by a flush".to_owned())
        })?;
        Ok(f(data.as_mut_slice()))
    }
}

impl RecordComponent {
    pub(crate) fn wrap(shared: SharedRef, node: NodeId) -> Self {
        Self { shared, node }
    }

    /// Declare (or re-declare, before anything was written) the dataset
    /// behind this component.
    pub fn reset_dataset(&self, dataset: Dataset) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if !inner.handler.access.writable() {
            return Err(Error::usage(format!(
                "cannot define a dataset in access mode {}",
                inner.handler.access
            )));
        }
        dataset.validate()?;
        let written = inner.handler.registry.node(self.node).written;
        let aux = inner.aux_mut(self.node);
        if let (true, Some(existing)) = (written, &aux.dataset) {
            if existing.dtype != dataset.dtype || existing.rank() != dataset.rank() {
                return Err(Error::usage(format!(
                    "dataset is already written as {} with rank {}; cannot redefine as {} with \
                     rank {}",
                    existing.dtype,
                    existing.rank(),
                    dataset.dtype,
                    dataset.rank()
                )));
            }
        }
        aux.kind = NodeKind::Dataset;
        aux.constant = None;
        aux.dataset = Some(dataset);
        inner.handler.registry.mark_dirty(self.node);
        Ok(())
    }

    /// Grow a resizable dataset; the new extent must dominate the old one.
    pub fn extend_dataset(&self, new_extent: impl Into<Extent>) -> Result<()> {
        let new_extent = new_extent.into();
        let mut inner = self.shared.inner.lock();
        let written = inner.handler.registry.node(self.node).written;
        let aux = inner.aux_mut(self.node);
        let Some(dataset) = aux.dataset.as_mut() else {
            return Err(Error::usage("no dataset to extend, call reset_dataset first".to_owned()));
        };
        if written && !dataset.resizable {
            return Err(Error::usage(
                "dataset was not declared resizable, cannot extend it".to_owned(),
            ));
        }
        if new_extent.len() != dataset.rank()
            || dataset.extent.iter().zip(&new_extent).any(|(old, new)| new < old)
        {
            return Err(Error::usage(format!(
                "new extent {new_extent:?} does not dominate the current extent {:?}",
                dataset.extent
            )));
        }
        dataset.extent = new_extent.clone();
        aux.pending.push(Param::ExtendDataset { extent: new_extent });
        inner.handler.registry.mark_dirty(self.node);
        Ok(())
    }

    /// Make this a constant component: every element reads as `value`,
    /// nothing is stored beyond the attributes.
    pub fn make_constant<T: DatasetElement>(&self, value: T, extent: impl Into<Extent>) -> Result<()> {
        let extent = extent.into();
        let mut inner = self.shared.inner.lock();
        if !inner.handler.access.writable() {
            return Err(Error::usage(format!(
                "cannot define a constant component in access mode {}",
                inner.handler.access
            )));
        }
        if inner.handler.registry.node(self.node).written {
            return Err(Error::usage(
                "component already written, cannot turn it constant".to_owned(),
            ));
        }
        let aux = inner.aux_mut(self.node);
        aux.kind = NodeKind::Constant;
        aux.dataset = Some(Dataset::new(T::DTYPE, extent.clone()));
        aux.constant = Some(value.clone().into_value());
        crate::attributable::set_attribute(
            &mut inner,
            self.node,
            "value",
            value.into_value(),
            false,
        )?;
        crate::attributable::set_attribute(
            &mut inner,
            self.node,
            "shape",
            opmd_types::Value::VecU64(extent.to_vec()),
            false,
        )?;
        inner.handler.registry.mark_dirty(self.node);
        Ok(())
    }

    /// A component of known type and rank holding no data at all.
    pub fn make_empty<T: DatasetElement>(&self, rank: usize) -> Result<()> {
        self.make_constant(T::default(), Extent::from_elem(0, rank))
    }

    pub fn dtype(&self) -> Option<Datatype> {
        let inner = self.shared.inner.lock();
        inner.aux_of(self.node).and_then(|aux| aux.dataset.as_ref()).map(|ds| ds.dtype)
    }

    pub fn extent(&self) -> Option<Extent> {
        let inner = self.shared.inner.lock();
        inner
            .aux_of(self.node)
            .and_then(|aux| aux.dataset.as_ref())
            .map(|ds| ds.extent.clone())
    }

    pub fn rank(&self) -> Option<usize> {
        self.extent().map(|extent| extent.len())
    }

    pub fn is_constant(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.aux_of(self.node).is_some_and(|aux| aux.constant.is_some())
    }

    /// Whether this component holds no elements (a placeholder written by
    /// a rank that owns no data).
    pub fn is_empty(&self) -> bool {
        self.extent().is_some_and(|extent| volume(&extent) == 0)
    }

    /// Schedule a chunk for writing.
    ///
    /// The buffer is shared with the task queue and must not be mutated
    /// until the next successful flush.
    pub fn store_chunk<T: DatasetElement>(
        &self,
        data: impl Into<Arc<[T]>>,
        offset: impl Into<Offset>,
        extent: impl Into<Extent>,
    ) -> Result<()> {
        let data = data.into();
        let offset = offset.into();
        let extent = extent.into();
        let mut inner = self.shared.inner.lock();
        if !inner.handler.access.writable() {
            return Err(Error::usage(format!(
                "cannot store chunks in access mode {}",
                inner.handler.access
            )));
        }
        self.check_access::<T>(&inner, &offset, &extent)?;
        if inner.aux_of(self.node).is_some_and(|aux| aux.constant.is_some()) {
            return Err(Error::usage(
                "cannot store chunks into a constant component".to_owned(),
            ));
        }
        if data.len() as u64 != volume(&extent) {
            return Err(Error::usage(format!(
                "buffer holds {} element(s) but the chunk covers {}",
                data.len(),
                volume(&extent)
            )));
        }
        let aux = inner.aux_mut(self.node);
        aux.pending.push(Param::WriteDataset {
            offset,
            extent,
            data: T::make_buffer(data),
        });
        inner.handler.registry.mark_dirty(self.node);
        Ok(())
    }

    /// Schedule a chunk for reading; the handle delivers after the next
    /// flush. Constant components are synthesised immediately.
    pub fn load_chunk<T: DatasetElement>(
        &self,
        offset: impl Into<Offset>,
        extent: impl Into<Extent>,
    ) -> Result<ChunkHandle<T>> {
        let offset = offset.into();
        let extent = extent.into();
        let mut inner = self.shared.inner.lock();
        self.check_access::<T>(&inner, &offset, &extent)?;

        let constant = inner.aux_of(self.node).and_then(|aux| aux.constant.clone());
        if let Some(value) = constant {
            let fill = T::from_value(&value).ok_or_else(|| {
                Error::usage(format!(
                    "constant component holds {}, cannot load as {:?}",
                    value.dtype(),
                    T::DTYPE
                ))
            })?;
            let cell: TargetCell<T> =
                Arc::new(Mutex::new(Some(vec![fill; volume(&extent) as usize])));
            return Ok(ChunkHandle { cell });
        }

        let cell: TargetCell<T> = Arc::new(Mutex::new(None));
        let aux = inner.aux_mut(self.node);
        aux.pending.push(Param::ReadDataset {
            offset,
            extent,
            target: T::make_target(Arc::clone(&cell)),
        });
        inner.handler.registry.mark_dirty(self.node);
        Ok(ChunkHandle { cell })
    }

    /// Ask the driver for a span to fill in place of a user buffer.
    ///
    /// `Ok(None)` means the driver (or the `use_span_based_put` policy)
    /// does not offer one here; fall back to [`Self::store_chunk`].
    pub fn get_buffer_view<T: DatasetElement>(
        &self,
        offset: impl Into<Offset>,
        extent: impl Into<Extent>,
    ) -> Result<Option<SpanBuffer<T>>> {
        let offset = offset.into();
        let extent = extent.into();
        let mut inner = self.shared.inner.lock();
        if !inner.handler.access.writable() {
            return Err(Error::usage(format!(
                "cannot request buffer views in access mode {}",
                inner.handler.access
            )));
        }
        self.check_access::<T>(&inner, &offset, &extent)?;

        let policy = inner.span_policy;
        if policy == SpanPolicy::No {
            return Ok(None);
        }
        let has_operators = inner
            .aux_of(self.node)
            .and_then(|aux| aux.dataset.as_ref())
            .is_some_and(|ds| !ds.operators.is_empty());
        if has_operators && policy == SpanPolicy::Auto {
            return Ok(None);
        }

        // the dataset must exist on the backend before the driver can
        // hand out memory for it
        crate::series::flush_inner(&mut inner)?;

        let span = OutCell::new();
        inner.handler.enqueue(IoTask::new(
            self.node,
            Param::GetBufferView {
                offset,
                extent,
                dtype: T::DTYPE,
                span: span.clone(),
            },
        ));
        inner.handler.flush()?;
        match span.take().flatten() {
            Some(target) => {
                let cell = T::as_target(&target).ok_or_else(|| {
                    Error::Internal("driver returned a span of the wrong datatype".to_owned())
                })?;
                Ok(Some(SpanBuffer { cell: Arc::clone(cell) }))
            }
            None if policy == SpanPolicy::Yes => Err(Error::unsupported(
                inner.handler.backend().backend_name(),
                "span-based writing was requested but is not available here",
            )),
            None => Ok(None),
        }
    }

    /// The chunks of this dataset that physically exist.
    pub fn available_chunks(&self) -> Result<ChunkTable> {
        let mut inner = self.shared.inner.lock();
        let dataset = inner
            .aux_of(self.node)
            .and_then(|aux| aux.dataset.clone())
            .ok_or_else(|| Error::usage("no dataset defined yet".to_owned()))?;

        if inner.aux_of(self.node).is_some_and(|aux| aux.constant.is_some()) {
            let offset = Offset::from_elem(0, dataset.rank());
            return Ok(vec![WrittenChunkInfo::new(offset, dataset.extent, 0)]);
        }

        crate::series::flush_inner(&mut inner)?;
        let chunks = OutCell::new();
        inner
            .handler
            .enqueue(IoTask::new(self.node, Param::AvailableChunks { chunks: chunks.clone() }));
        inner.handler.flush()?;
        chunks
            .take()
            .ok_or_else(|| Error::Internal("AVAILABLE_CHUNKS produced no result".to_owned()))
    }

    /// The SI conversion factor of this component.
    pub fn unit_si(&self) -> f64 {
        self.get_attribute("unitSI")
            .and_then(|attr| attr.as_f64())
            .unwrap_or(1.0)
    }

    pub fn set_unit_si(&self, unit_si: f64) -> Result<()> {
        self.set_attribute("unitSI", unit_si)
    }

    fn check_access<T: DatasetElement>(
        &self,
        inner: &Inner,
        offset: &Offset,
        extent: &Extent,
    ) -> Result<()> {
        let Some(dataset) = inner.aux_of(self.node).and_then(|aux| aux.dataset.as_ref()) else {
            return Err(Error::usage(
                "no dataset defined yet, call reset_dataset first".to_owned(),
            ));
        };
        if dataset.dtype != T::DTYPE {
            return Err(Error::usage(format!(
                "dataset stores {}, cannot access it as {:?}",
                dataset.dtype,
                T::DTYPE
            )));
        }
        bounds_check(offset, extent, &dataset.extent)
    }
}

impl_attributable!(RecordComponent);
impl_container_for!(RecordComponent, NodeKind::Dataset);
