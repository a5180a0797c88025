use opmd_io::NodeId;

use crate::attributable::impl_attributable;
use crate::container::{impl_container_for, Container};
use crate::state::{NodeKind, SharedRef};

/// A free-form group in the custom hierarchy of an iteration: attributes
/// plus arbitrarily nested child groups.
#[derive(Clone)]
pub struct Group {
    pub(crate) shared: SharedRef,
    pub(crate) node: NodeId,
}

impl Group {
    pub(crate) fn wrap(shared: SharedRef, node: NodeId) -> Self {
        Self { shared, node }
    }

    /// Child groups of this group.
    pub fn subgroups(&self) -> Container<Group> {
        Container::new(std::sync::Arc::clone(&self.shared), self.node)
    }
}

impl_attributable!(Group);
impl_container_for!(Group, NodeKind::Group);
