//! Typed property records.
//!
//! Field names follow the keys used in the YAML property files, so a file
//! written for one deployment can be read back without translation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Transport protocol of a container port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Resource limit applied to a container process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ulimit {
    pub name: String,
    pub soft_limit: u64,
    pub hard_limit: u64,
}

/// Where a container pulls its image from.
///
/// Absent in a property file, the image is chosen from the role of the
/// task definition the container belongs to. Written as a single-key map
/// (`image: {external: redis}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageRef {
    /// One of the repositories created for this deployment (e.g. `backend`).
    Repository(String),
    /// A repository that exists outside this deployment (e.g. `redis`).
    External(String),
}

/// A single container inside a Fargate task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FargateContainerDef {
    pub name: String,
    pub essential: bool,
    pub memory_limit_mib: u32,
    pub memory_reservation_mib: u32,
    pub cpu: u32,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub expose_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub ulimits: Option<Ulimit>,
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub image: Option<ImageRef>,
}

/// Task-level sizing and the containers it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FargateTaskDef {
    pub task_memory_limit_mib: u32,
    pub task_cpu: u32,
    pub port: u16,
    pub container_def_l: Vec<FargateContainerDef>,
}

/// An existing Route 53 hosted zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksHostZone {
    pub id: String,
    pub domain_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub volume_gb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EbsStorage {
    pub general_storage: StorageConfig,
}

/// A managed node group attached to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksNodeGroup {
    #[serde(rename = "id_surfix")]
    pub id_suffix: String,
    pub instance_type: String,
    pub min_size: u32,
    pub max_size: u32,
    pub label: BTreeMap<String, String>,
    pub node_label: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub taints: BTreeMap<String, String>,
}

/// A CIDR block allowed to reach the public endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistIp {
    pub ip: String,
    pub entity: String,
    #[serde(default = "default_enable_80")]
    pub enable_80: bool,
}

fn default_enable_80() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EksClusterCfg {
    pub whitelist_ips: Vec<WhitelistIp>,
    pub node_group: Vec<EksNodeGroup>,
}

/// Properties that differ per deployment environment
/// (`env_props.<env>.yaml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvDepProperties {
    pub whitelist_ips: Vec<WhitelistIp>,
    pub ebs_storage: EbsStorage,
    pub eks_host_zone: EksHostZone,
    pub eks_cluster_cfg: EksClusterCfg,
    pub backend_task_def: FargateTaskDef,
    pub frontend_task_def: FargateTaskDef,
    pub doc_task_def: FargateTaskDef,
}

impl EnvDepProperties {
    /// Comma-joined EKS endpoint whitelist, as consumed by shell tooling.
    pub fn eks_whitelist_csv(&self) -> String {
        self.eks_cluster_cfg
            .whitelist_ips
            .iter()
            .map(|w| w.ip.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Properties shared by every environment (`comm_props.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonProperties {
    pub product_prefix: String,
    pub vpc_default_cidr: String,
    pub subnet_cidr_mask: u8,
    pub ecr_assume_role_expiration_min: u32,
    pub cd_user_arn: String,
}
