use std::marker::PhantomData;
use std::sync::Arc;

use opmd_io::NodeId;

use crate::state::SharedRef;

/// Ordered name → child mapping below one node of the hierarchy.
///
/// Under writable access modes, [`Container::at`] creates missing children
/// on the fly; read modes surface *NotFound* instead. Children keep
/// deterministic (lexicographic) order.
pub struct Container<H> {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
    pub(crate) _marker: PhantomData<fn() -> H>,
}

impl<H> Container<H> {
    pub(crate) fn new(shared: SharedRef, node: NodeId) -> Self {
        Self {
            shared,
            node,
            _marker: PhantomData,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let inner = self.shared.inner.lock();
        inner
            .handler
            .registry
            .node(self.node)
            .children
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.shared.inner.lock();
        inner.handler.registry.node(self.node).children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        let inner = self.shared.inner.lock();
        inner.handler.registry.child(self.node, name).is_some()
    }
}

impl<H> Clone for Container<H> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.shared), self.node)
    }
}

/// The type-specific half of [`Container`]: construction of handles and
/// create-on-access, with an optional initialiser writing the type's
/// default attributes onto freshly created children.
macro_rules! impl_container_for {
    ($ty:ty, $kind:expr $(, $init:expr)?) => {
        impl crate::container::Container<$ty> {
            /// The child of that name, if it exists in the frontend view.
            pub fn get(&self, name: &str) -> Option<$ty> {
                let inner = self.shared.inner.lock();
                inner
                    .handler
                    .registry
                    .child(self.node, name)
                    .map(|child| <$ty>::wrap(std::sync::Arc::clone(&self.shared), child))
            }

            /// The child of that name, created on the fly under writable
            /// access modes.
            pub fn at(&self, name: &str) -> opmd_types::Result<$ty> {
                let mut inner = self.shared.inner.lock();
                if let Some(child) = inner.handler.registry.child(self.node, name) {
                    drop(inner);
                    return Ok(<$ty>::wrap(std::sync::Arc::clone(&self.shared), child));
                }
                if !inner.handler.access.writable() && !inner.parsing {
                    return Err(opmd_types::Error::read(
                        opmd_types::AffectedObject::Group,
                        opmd_types::Reason::NotFound,
                        format!("no child named '{name}' here"),
                    ));
                }
                let child = inner.handler.registry.create_child(self.node, name);
                inner.aux_mut(child).kind = $kind;
                $( ($init)(&mut inner, child)?; )?
                inner.handler.registry.mark_dirty(child);
                drop(inner);
                Ok(<$ty>::wrap(std::sync::Arc::clone(&self.shared), child))
            }

            /// Remove a child; drivers that cannot delete refuse at flush.
            pub fn remove(&self, name: &str) -> opmd_types::Result<()> {
                let mut inner = self.shared.inner.lock();
                let Some(child) = inner.handler.registry.child(self.node, name) else {
                    return Ok(());
                };
                if !inner.handler.access.writable() {
                    return Err(opmd_types::Error::usage(format!(
                        "cannot remove '{name}' in access mode {}",
                        inner.handler.access
                    )));
                }
                inner.handler.enqueue(opmd_io::IoTask::new(
                    self.node,
                    opmd_io::Param::DeletePath { path: name.to_owned() },
                ));
                inner.handler.flush()?;
                inner.handler.registry.deregister(child);
                Ok(())
            }

            /// Snapshot of all (name, handle) pairs in order.
            pub fn iter(&self) -> Vec<(String, $ty)> {
                self.keys()
                    .into_iter()
                    .filter_map(|name| self.get(&name).map(|child| (name, child)))
                    .collect()
            }
        }
    };
}

pub(crate) use impl_container_for;
