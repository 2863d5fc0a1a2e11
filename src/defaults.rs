use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

pub fn default_replicas() -> i32 {
    1
}

pub fn default_image() -> String {
    "ghcr.io/dittofs/server:latest".to_owned()
}

pub fn default_resources() -> ResourceRequirements {
    let limits: BTreeMap<String, Quantity> = BTreeMap::from([
        ("cpu".to_owned(), Quantity("1".to_string())),
        ("memory".to_owned(), Quantity("1Gi".to_string())),
    ]);
    let requests: BTreeMap<String, Quantity> = BTreeMap::from([
        ("cpu".to_owned(), Quantity("250m".to_string())),
        ("memory".to_owned(), Quantity("256Mi".to_string())),
    ]);
    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..ResourceRequirements::default()
    }
}

pub fn default_service_type() -> String {
    "LoadBalancer".to_string()
}

pub fn default_control_plane_port() -> i32 {
    8080
}

pub fn default_metrics_port() -> i32 {
    9090
}

pub fn default_nfs_port() -> i32 {
    12049
}

pub fn default_secret_key() -> String {
    "value".to_owned()
}

pub fn default_polling_interval() -> String {
    "30s".to_owned()
}

/// Well-known NFS portmapper port exposed on the cluster-facing Service.
pub const NFS_PORTMAPPER_SERVICE_PORT: i32 = 111;
/// Unprivileged container-side port the portmapper actually listens on.
pub const NFS_PORTMAPPER_CONTAINER_PORT: i32 = 10111;

pub fn default_pod_security_context_fs_group() -> i64 {
    65532
}
