//! Attribute staging and the recursive enqueue pass of a flush.
//!
//! These are the engine-internal halves of every public handle: a handle
//! method locks the series, then calls in here with the lock held.

use opmd_io::{IoTask, NodeId, OutCell, Param};
use opmd_types::{Attribute, Error, Result};

use crate::state::{AttrState, Inner, NodeKind};

/// Stage an attribute value on a node.
///
/// Re-staging the identical value is a no-op. A *different* value is
/// accepted as long as nothing reached the backend yet, or the driver can
/// overwrite committed attributes; anything else is `WrongAPIUsage`.
pub(crate) fn set_attribute(
    inner: &mut Inner,
    node: NodeId,
    name: &str,
    value: Attribute,
    changes_over_steps: bool,
) -> Result<()> {
    if !inner.handler.access.writable() && !inner.parsing {
        return Err(Error::usage(format!(
            "cannot write attribute '{name}' in access mode {}",
            inner.handler.access
        )));
    }

    if let Some(existing) = inner.handler.registry.node(node).attributes.get(name) {
        if *existing == value {
            return Ok(());
        }
        let state = inner.aux_of(node).and_then(|aux| aux.attr_state.get(name));
        if let Some(state) = state {
            if state.flushed
                && !state.changes_over_steps
                && !changes_over_steps
                && !inner.handler.backend().variable_attributes_supported()
            {
                return Err(Error::usage(format!(
                    "attribute '{name}' was already committed in a previous step; backend '{}' \
                     cannot overwrite committed attributes",
                    inner.handler.backend().backend_name()
                )));
            }
        }
    }

    record_attribute(inner, node, name, value);
    let generation = inner.step_generation;
    let aux = inner.aux_mut(node);
    let entry = aux.attr_state.entry(name.to_owned()).or_insert(AttrState {
        generation,
        staged_dirty: true,
        flushed: false,
        changes_over_steps,
    });
    entry.generation = generation;
    entry.staged_dirty = true;
    entry.changes_over_steps |= changes_over_steps;
    inner.handler.registry.mark_dirty(node);
    Ok(())
}

/// Drop a value into the frontend map without staging a write (used when
/// materialising read results).
pub(crate) fn record_attribute(inner: &mut Inner, node: NodeId, name: &str, value: Attribute) {
    inner
        .handler
        .registry
        .node_mut(node)
        .attributes
        .insert(name.to_owned(), value);
}

pub(crate) fn get_attribute(inner: &Inner, node: NodeId, name: &str) -> Option<Attribute> {
    inner.handler.registry.node(node).attributes.get(name).cloned()
}

pub(crate) fn contains_attribute(inner: &Inner, node: NodeId, name: &str) -> bool {
    inner.handler.registry.node(node).attributes.contains_key(name)
}

/// Delete an attribute; refused at flush time by drivers that cannot.
pub(crate) fn delete_attribute(inner: &mut Inner, node: NodeId, name: &str) -> Result<()> {
    if !inner.handler.access.writable() {
        return Err(Error::usage(format!(
            "cannot delete attribute '{name}' in access mode {}",
            inner.handler.access
        )));
    }
    inner.handler.registry.node_mut(node).attributes.shift_remove(name);
    inner.aux_mut(node).attr_state.remove(name);
    inner
        .handler
        .enqueue(IoTask::new(node, Param::DeleteAttribute { name: name.to_owned() }));
    inner.handler.flush()
}

/// Populate the frontend map from the backend; clears the node's dirty
/// flag per the attribute-map contract.
pub(crate) fn read_all_attributes(inner: &mut Inner, node: NodeId) -> Result<()> {
    let names = OutCell::new();
    inner
        .handler
        .enqueue(IoTask::new(node, Param::ListAttributes { attributes: names.clone() }));
    inner.handler.flush()?;
    let names = names.take().ok_or_else(|| {
        Error::Internal("LIST_ATTS produced no result".to_owned())
    })?;

    let mut cells = Vec::with_capacity(names.len());
    for name in names {
        let value = OutCell::new();
        inner.handler.enqueue(IoTask::new(
            node,
            Param::ReadAttribute { name: name.clone(), value: value.clone() },
        ));
        cells.push((name, value));
    }
    inner.handler.flush()?;

    let generation = inner.step_generation;
    for (name, cell) in cells {
        let value = cell.take().ok_or_else(|| {
            Error::Internal(format!("READ_ATT '{name}' produced no result"))
        })?;
        record_attribute(inner, node, &name, value);
        inner.aux_mut(node).attr_state.insert(
            name,
            AttrState {
                generation,
                staged_dirty: false,
                flushed: true,
                changes_over_steps: false,
            },
        );
    }
    inner.handler.registry.node_mut(node).dirty = false;
    Ok(())
}

/// Read one attribute from the backend right now.
pub(crate) fn read_attribute_now(inner: &mut Inner, node: NodeId, name: &str) -> Result<Attribute> {
    let value = OutCell::new();
    inner.handler.enqueue(IoTask::new(
        node,
        Param::ReadAttribute { name: name.to_owned(), value: value.clone() },
    ));
    inner.handler.flush()?;
    value
        .take()
        .ok_or_else(|| Error::Internal(format!("READ_ATT '{name}' produced no result")))
}

/// Enqueue everything a subtree owes the backend: structure for unwritten
/// nodes, staged attributes, deferred data operations, then the children.
///
/// `skeleton` restricts the pass to structure only (files, groups,
/// datasets); step begins use it so that attribute values stay mutable
/// until the user's own flush commits them.
pub(crate) fn enqueue_subtree(inner: &mut Inner, node: NodeId, skeleton: bool) -> Result<()> {
    let writable_mode = inner.handler.access.writable();
    let (written, own_key) = {
        let n = inner.handler.registry.node(node);
        (n.written, n.own_key.clone())
    };

    let needs_structure = {
        let aux = inner.aux_mut(node);
        if writable_mode && !written && !aux.structure_enqueued {
            aux.structure_enqueued = true;
            Some(aux.kind)
        } else {
            None
        }
    };
    if let Some(kind) = needs_structure {
        match kind {
            NodeKind::Group | NodeKind::Constant => {
                let path = own_key.clone().unwrap_or_default();
                inner.handler.enqueue(IoTask::new(node, Param::CreatePath { path }));
            }
            NodeKind::Dataset => {
                let dataset = inner
                    .aux_of(node)
                    .and_then(|aux| aux.dataset.clone())
                    .ok_or_else(|| {
                        Error::usage(
                            "a record component is dirty but its dataset was never reset"
                                .to_owned(),
                        )
                    })?;
                let name = own_key.clone().ok_or_else(|| {
                    Error::Internal("dataset node without a key in its parent".to_owned())
                })?;
                inner
                    .handler
                    .enqueue(IoTask::new(node, Param::CreateDataset { name, dataset }));
            }
        }
    }

    if !skeleton {
        enqueue_staged_attributes(inner, node, false)?;
        let pending = std::mem::take(&mut inner.aux_mut(node).pending);
        for param in pending {
            inner.handler.enqueue(IoTask::new(node, param));
        }
    }

    let children: Vec<NodeId> = inner
        .handler
        .registry
        .node(node)
        .children
        .values()
        .copied()
        .collect();
    for child in children {
        enqueue_subtree(inner, child, skeleton)?;
    }
    Ok(())
}

/// Enqueue staged attribute writes of one node; with `force`, re-enqueue
/// every attribute regardless of staging (file-based encodings write the
/// root metadata into every file).
pub(crate) fn enqueue_staged_attributes(inner: &mut Inner, node: NodeId, force: bool) -> Result<()> {
    if !inner.handler.access.writable() {
        return Ok(());
    }
    let names: Vec<String> = inner
        .handler
        .registry
        .node(node)
        .attributes
        .keys()
        .cloned()
        .collect();
    for name in names {
        let staged = inner
            .aux_of(node)
            .and_then(|aux| aux.attr_state.get(&name))
            .map(|state| (state.staged_dirty, state.changes_over_steps));
        let (staged_dirty, changes_over_steps) = staged.unwrap_or((false, false));
        if !(staged_dirty || force) {
            continue;
        }
        let value = get_attribute(inner, node, &name)
            .ok_or_else(|| Error::Internal(format!("attribute '{name}' vanished mid-flush")))?;
        inner.handler.enqueue(IoTask::new(
            node,
            Param::WriteAttribute {
                name: name.clone(),
                value,
                changes_over_steps,
            },
        ));
        if let Some(state) = inner.aux_mut(node).attr_state.get_mut(&name) {
            state.staged_dirty = false;
        }
    }
    Ok(())
}

/// Enqueue only the deferred data operations of a subtree (the read-side
/// half of a flush, where no structure is ever written).
pub(crate) fn enqueue_pending_subtree(inner: &mut Inner, node: NodeId) {
    let pending = std::mem::take(&mut inner.aux_mut(node).pending);
    for param in pending {
        inner.handler.enqueue(IoTask::new(node, param));
    }
    let children: Vec<NodeId> = inner
        .handler
        .registry
        .node(node)
        .children
        .values()
        .copied()
        .collect();
    for child in children {
        enqueue_pending_subtree(inner, child);
    }
}

/// After a successful handler flush: everything that was enqueued is now
/// committed.
pub(crate) fn mark_attributes_flushed(inner: &mut Inner) {
    for aux in inner.aux.values_mut() {
        for state in aux.attr_state.values_mut() {
            if !state.staged_dirty {
                state.flushed = true;
            }
        }
    }
}

/// The attribute surface shared by every frontend handle.
macro_rules! impl_attributable {
    ($ty:ty) => {
        impl $ty {
            pub fn set_attribute(
                &self,
                name: &str,
                value: impl Into<opmd_types::Attribute>,
            ) -> opmd_types::Result<()> {
                let mut inner = self.shared.inner.lock();
                crate::attributable::set_attribute(&mut inner, self.node, name, value.into(), false)
            }

            pub fn get_attribute(&self, name: &str) -> Option<opmd_types::Attribute> {
                let inner = self.shared.inner.lock();
                crate::attributable::get_attribute(&inner, self.node, name)
            }

            pub fn contains_attribute(&self, name: &str) -> bool {
                let inner = self.shared.inner.lock();
                crate::attributable::contains_attribute(&inner, self.node, name)
            }

            pub fn attribute_names(&self) -> Vec<String> {
                let inner = self.shared.inner.lock();
                inner
                    .handler
                    .registry
                    .node(self.node)
                    .attributes
                    .keys()
                    .cloned()
                    .collect()
            }

            pub fn delete_attribute(&self, name: &str) -> opmd_types::Result<()> {
                let mut inner = self.shared.inner.lock();
                crate::attributable::delete_attribute(&mut inner, self.node, name)
            }

            /// Whether this node or any descendant has unflushed changes.
            pub fn dirty_recursive(&self) -> bool {
                let inner = self.shared.inner.lock();
                inner.handler.registry.dirty_recursive(self.node)
            }
        }
    };
}

pub(crate) use impl_attributable;
