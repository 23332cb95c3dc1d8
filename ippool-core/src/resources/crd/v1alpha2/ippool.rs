use std::{
    fmt::{Display, Formatter},
    net::IpAddr,
};

use ipnet::IpNet;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ip::{IpRange, RangeError};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "ipam.ippool.dev",
    version = "v1alpha2",
    kind = "IPPool",
    plural = "ippools",
    status = "IPPoolStatus",
    derive = "Default",
    printcolumn = r#"{"name":"Total", "type":"integer", "description":"Allocatable addresses", "jsonPath":".status.usage.total"}"#,
    printcolumn = r#"{"name":"Used", "type":"integer", "description":"Allocated addresses", "jsonPath":".status.usage.used"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct IPPoolSpec {
    /// address ranges of this pool, earlier entries are preferred when allocating
    ///
    /// ranges may be appended or widened, but never shrunk past allocated addresses
    pub ip_ranges: Vec<SubnetIPRange>,
}

/// Either `cidr` or both `start` and `end` must be set.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetIPRange {
    /// allocation CIDR, may be a carved out part of the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<IpNet>,
    /// first address of an explicit range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<IpAddr>,
    /// last address of an explicit range (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<IpAddr>,
    pub subnet_info: SubnetInfo,
}

impl SubnetIPRange {
    pub fn cidr(cidr: IpNet, subnet_info: SubnetInfo) -> Self {
        Self {
            cidr: Some(cidr),
            start: None,
            end: None,
            subnet_info,
        }
    }

    pub fn bounds(start: IpAddr, end: IpAddr, subnet_info: SubnetInfo) -> Self {
        Self {
            cidr: None,
            start: Some(start),
            end: Some(end),
            subnet_info,
        }
    }

    pub fn range(&self) -> Result<IpRange, RangeError> {
        match (self.cidr, self.start, self.end) {
            (Some(cidr), None, None) => Ok(IpRange::Cidr(cidr)),
            (None, Some(start), Some(end)) => Ok(IpRange::Bounds { start, end }),
            (Some(_), _, _) => Err(RangeError::Invalid(
                "cidr can't be combined with start/end".into(),
            )),
            _ => Err(RangeError::Invalid(
                "range needs either a cidr or both start and end".into(),
            )),
        }
    }
}

/// Subnet details handed back to the caller along with an allocated address.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetInfo {
    pub gateway: IpAddr,
    pub prefix_length: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct IPPoolStatus {
    /// every address currently handed out from this pool
    pub ip_addresses: Vec<IPAddressState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<IPPoolUsage>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct IPPoolUsage {
    /// allocatable addresses, reserved ones excluded
    pub total: u64,
    pub used: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IPAddressState {
    pub ip_address: IpAddr,
    pub phase: IPAddressPhase,
    pub owner: IPAddressOwner,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum IPAddressPhase {
    #[default]
    Allocated,
    Preallocated,
    Reserved,
}

impl Display for IPAddressPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IPAddressPhase::Allocated => f.write_str("Allocated"),
            IPAddressPhase::Preallocated => f.write_str("Preallocated"),
            IPAddressPhase::Reserved => f.write_str("Reserved"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum IPAddressOwner {
    Pod(PodOwner),
    StatefulSet(StatefulSetOwner),
}

impl Display for IPAddressOwner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IPAddressOwner::Pod(pod) => f.write_fmt(format_args!(
                "Pod {}/{} (container {}, interface {})",
                pod.namespace,
                pod.name,
                pod.container_id,
                pod.interface.as_deref().unwrap_or("-")
            )),
            IPAddressOwner::StatefulSet(set) => f.write_fmt(format_args!(
                "StatefulSet {}/{} (index {})",
                set.namespace, set.name, set.index
            )),
        }
    }
}

impl From<PodOwner> for IPAddressOwner {
    fn from(value: PodOwner) -> Self {
        IPAddressOwner::Pod(value)
    }
}

impl From<StatefulSetOwner> for IPAddressOwner {
    fn from(value: StatefulSetOwner) -> Self {
        IPAddressOwner::StatefulSet(value)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodOwner {
    pub name: String,
    pub namespace: String,
    pub container_id: String,
    /// interface the address is configured on inside the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetOwner {
    pub name: String,
    pub namespace: String,
    pub index: u32,
}
