use std::fmt::{Display, Formatter};

use crate::resources::crd::v1alpha2::ippool::IPAddressOwner;

/// Picks allocations by who holds them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerSelector {
    /// any container of the given pod
    Pod { namespace: String, name: String },
    Container { container_id: String },
    /// exactly this owner
    Owner(IPAddressOwner),
}

impl OwnerSelector {
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        OwnerSelector::Pod {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn container(container_id: impl Into<String>) -> Self {
        OwnerSelector::Container {
            container_id: container_id.into(),
        }
    }

    pub fn matches(&self, owner: &IPAddressOwner) -> bool {
        match (self, owner) {
            (OwnerSelector::Pod { namespace, name }, IPAddressOwner::Pod(pod)) => {
                &pod.namespace == namespace && &pod.name == name
            }
            (OwnerSelector::Container { container_id }, IPAddressOwner::Pod(pod)) => {
                &pod.container_id == container_id
            }
            (OwnerSelector::Owner(expected), owner) => expected == owner,
            _ => false,
        }
    }
}

/// Identity used to tell whether an owner already holds an address:
/// pods by container, stateful sets by their replica.
impl From<&IPAddressOwner> for OwnerSelector {
    fn from(value: &IPAddressOwner) -> Self {
        match value {
            IPAddressOwner::Pod(pod) => OwnerSelector::container(pod.container_id.clone()),
            owner @ IPAddressOwner::StatefulSet(_) => OwnerSelector::Owner(owner.clone()),
        }
    }
}

impl Display for OwnerSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerSelector::Pod { namespace, name } => {
                f.write_fmt(format_args!("Pod {namespace}/{name}"))
            }
            OwnerSelector::Container { container_id } => {
                f.write_fmt(format_args!("Container {container_id}"))
            }
            OwnerSelector::Owner(owner) => Display::fmt(owner, f),
        }
    }
}
