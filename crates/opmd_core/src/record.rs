use opmd_io::NodeId;
use opmd_types::{Error, Result};

use crate::attributable::{impl_attributable, set_attribute};
use crate::container::{impl_container_for, Container};
use crate::record_component::RecordComponent;
use crate::state::{Inner, NodeKind, SharedRef};

/// A named n-dimensional quantity of an iteration, either scalar (the
/// record itself is the dataset) or decomposed into vector components.
#[derive(Clone)]
pub struct Record {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
}

impl Record {
    pub(crate) fn wrap(shared: SharedRef, node: NodeId) -> Self {
        Self { shared, node }
    }

    pub(crate) fn init_new(inner: &mut Inner, node: NodeId) -> Result<()> {
        set_attribute(inner, node, "unitDimension", [0.0_f64; 7].into(), false)?;
        set_attribute(inner, node, "timeOffset", 0.0_f64.into(), false)
    }

    /// The vector components of this record.
    pub fn components(&self) -> Container<RecordComponent> {
        Container::new(std::sync::Arc::clone(&self.shared), self.node)
    }

    /// Shorthand for `components().at(name)`.
    pub fn component(&self, name: &str) -> Result<RecordComponent> {
        self.components().at(name)
    }

    /// View this record as a scalar component (it carries the dataset
    /// itself). Mutually exclusive with vector components.
    pub fn scalar(&self) -> Result<RecordComponent> {
        let inner = self.shared.inner.lock();
        if !inner.handler.registry.node(self.node).children.is_empty() {
            return Err(Error::usage(
                "record already has vector components, it cannot also be scalar".to_owned(),
            ));
        }
        drop(inner);
        Ok(RecordComponent::wrap(std::sync::Arc::clone(&self.shared), self.node))
    }

    /// Powers of the seven base SI quantities making up this record's
    /// unit.
    pub fn unit_dimension(&self) -> [f64; 7] {
        self.get_attribute("unitDimension")
            .and_then(|attr| attr.as_unit_dimension())
            .unwrap_or([0.0; 7])
    }

    pub fn set_unit_dimension(&self, unit_dimension: [f64; 7]) -> Result<()> {
        self.set_attribute("unitDimension", unit_dimension)
    }

    pub fn time_offset(&self) -> f64 {
        self.get_attribute("timeOffset")
            .and_then(|attr| attr.as_f64())
            .unwrap_or(0.0)
    }

    pub fn set_time_offset(&self, time_offset: f64) -> Result<()> {
        self.set_attribute("timeOffset", time_offset)
    }
}

impl_attributable!(Record);
impl_container_for!(Record, NodeKind::Group, Record::init_new);

/// A structured mesh record: a [`Record`] plus the grid geometry
/// attributes the standard mandates.
#[derive(Clone)]
pub struct Mesh {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
}

impl Mesh {
    pub(crate) fn wrap(shared: SharedRef, node: NodeId) -> Self {
        Self { shared, node }
    }

    pub(crate) fn init_new(inner: &mut Inner, node: NodeId) -> Result<()> {
        set_attribute(inner, node, "geometry", "cartesian".into(), false)?;
        set_attribute(inner, node, "dataOrder", "C".into(), false)?;
        set_attribute(inner, node, "axisLabels", vec!["x".to_owned()].into(), false)?;
        set_attribute(inner, node, "gridSpacing", vec![1.0_f64].into(), false)?;
        set_attribute(inner, node, "gridGlobalOffset", vec![0.0_f64].into(), false)?;
        set_attribute(inner, node, "gridUnitSI", 1.0_f64.into(), false)?;
        Record::init_new(inner, node)
    }

    /// The record half of this mesh.
    pub fn as_record(&self) -> Record {
        Record::wrap(std::sync::Arc::clone(&self.shared), self.node)
    }

    pub fn components(&self) -> Container<RecordComponent> {
        self.as_record().components()
    }

    pub fn component(&self, name: &str) -> Result<RecordComponent> {
        self.as_record().component(name)
    }

    pub fn scalar(&self) -> Result<RecordComponent> {
        self.as_record().scalar()
    }

    pub fn geometry(&self) -> String {
        self.get_attribute("geometry")
            .and_then(|attr| attr.as_str().map(str::to_owned))
            .unwrap_or_else(|| "cartesian".to_owned())
    }

    pub fn set_geometry(&self, geometry: &str) -> Result<()> {
        self.set_attribute("geometry", geometry)
    }

    pub fn axis_labels(&self) -> Vec<String> {
        self.get_attribute("axisLabels")
            .and_then(|attr| attr.get_vec::<String>().ok())
            .unwrap_or_default()
    }

    pub fn set_axis_labels(&self, labels: Vec<String>) -> Result<()> {
        self.set_attribute("axisLabels", labels)
    }

    pub fn grid_spacing(&self) -> Vec<f64> {
        self.get_attribute("gridSpacing")
            .and_then(|attr| attr.get_vec::<f64>().ok())
            .unwrap_or_default()
    }

    pub fn set_grid_spacing(&self, spacing: Vec<f64>) -> Result<()> {
        self.set_attribute("gridSpacing", spacing)
    }

    pub fn set_grid_global_offset(&self, offset: Vec<f64>) -> Result<()> {
        self.set_attribute("gridGlobalOffset", offset)
    }

    pub fn set_grid_unit_si(&self, unit: f64) -> Result<()> {
        self.set_attribute("gridUnitSI", unit)
    }
}

impl_attributable!(Mesh);
impl_container_for!(Mesh, NodeKind::Group, Mesh::init_new);

/// One species of particles: a container of records (`position`,
/// `momentum`, `charge`, …).
#[derive(Clone)]
pub struct ParticleSpecies {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
}

impl ParticleSpecies {
    pub(crate) fn wrap(shared: SharedRef, node: NodeId) -> Self {
        Self { shared, node }
    }

    pub fn records(&self) -> Container<Record> {
        Container::new(std::sync::Arc::clone(&self.shared), self.node)
    }

    pub fn record(&self, name: &str) -> Result<Record> {
        self.records().at(name)
    }
}

impl_attributable!(ParticleSpecies);
impl_container_for!(ParticleSpecies, NodeKind::Group);
