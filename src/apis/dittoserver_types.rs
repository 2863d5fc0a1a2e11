use k8s_openapi::{
    api::core::v1::{PodSecurityContext, ResourceRequirements, SecurityContext},
    apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::Condition},
};

use crate::defaults;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to a single key inside a `Secret` in the same namespace as the CR.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct SecretKeyRef {
    pub name: String,
    #[serde(default = "defaults::default_secret_key")]
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct StorageSpec {
    pub metadataSize: Quantity,
    pub cacheSize: Quantity,
    pub contentSize: Option<Quantity>,
    pub storageClassName: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct ServiceSpec {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ServiceSpec {
    pub fn effective_type(&self) -> String {
        self.r#type
            .clone()
            .unwrap_or_else(defaults::default_service_type)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct ControlPlaneSpec {
    pub port: Option<i32>,
}

impl ControlPlaneSpec {
    pub fn effective_port(&self) -> i32 {
        self.port.unwrap_or_else(defaults::default_control_plane_port)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct MetricsSpec {
    pub enabled: Option<bool>,
    pub port: Option<i32>,
}

impl MetricsSpec {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn effective_port(&self) -> i32 {
        self.port.unwrap_or_else(defaults::default_metrics_port)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct SmbSpec {
    pub enabled: Option<bool>,
    pub port: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct NfsSpec {
    pub port: Option<i32>,
}

impl NfsSpec {
    pub fn effective_port(&self) -> i32 {
        self.port.unwrap_or_else(defaults::default_nfs_port)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct JwtSpec {
    pub secretRef: Option<SecretKeyRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct AdminSpec {
    pub passwordSecretRef: Option<SecretKeyRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct IdentitySpec {
    #[serde(default)]
    pub jwt: JwtSpec,
    #[serde(default)]
    pub admin: AdminSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct DatabaseSpec {
    pub postgresSecretRef: Option<SecretKeyRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct S3Spec {
    pub credentialsSecretRef: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct PerconaSpec {
    pub enabled: Option<bool>,
    pub deleteWithServer: Option<bool>,
}

impl PerconaSpec {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }

    pub fn delete_with_server(&self) -> bool {
        self.deleteWithServer.unwrap_or(false)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct AdapterServicesSpec {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl AdapterServicesSpec {
    pub fn effective_type(&self) -> String {
        self.r#type
            .clone()
            .unwrap_or_else(defaults::default_service_type)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
pub struct AdapterDiscoverySpec {
    pub pollingInterval: Option<String>,
}

/// Generate the Kubernetes wrapper struct `DittoServer` from our Spec and Status struct.
///
/// This provides a hook for generating the CRD yaml (in crdgen.rs).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "DittoServer",
    group = "dittofs.dittofs.com",
    version = "v1alpha1",
    namespaced
)]
#[kube(status = "DittoServerStatus", shortname = "dfs")]
#[allow(non_snake_case)]
pub struct DittoServerSpec {
    #[serde(default = "defaults::default_replicas")]
    pub replicas: i32,

    #[serde(default = "defaults::default_image")]
    pub image: String,

    #[serde(default = "defaults::default_resources")]
    pub resources: ResourceRequirements,

    pub securityContext: Option<SecurityContext>,
    pub podSecurityContext: Option<PodSecurityContext>,

    pub storage: StorageSpec,

    #[serde(default)]
    pub service: ServiceSpec,

    #[serde(default)]
    pub controlPlane: ControlPlaneSpec,

    #[serde(default)]
    pub metrics: MetricsSpec,

    #[serde(default)]
    pub smb: SmbSpec,

    #[serde(default)]
    pub nfs: NfsSpec,

    #[serde(default)]
    pub identity: IdentitySpec,

    #[serde(default)]
    pub database: DatabaseSpec,

    #[serde(default)]
    pub s3: S3Spec,

    #[serde(default)]
    pub percona: PerconaSpec,

    #[serde(default)]
    pub adapterServices: AdapterServicesSpec,

    #[serde(default)]
    pub adapterDiscovery: AdapterDiscoverySpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Stopped,
    Deleting,
}

/// The status object of `DittoServer`.
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[allow(non_snake_case)]
pub struct DittoServerStatus {
    pub observedGeneration: Option<i64>,
    #[serde(default)]
    pub phase: Phase,
    pub replicas: i32,
    pub readyReplicas: i32,
    pub availableReplicas: i32,
    pub configHash: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub nfsEndpoint: Option<String>,
    pub perconaClusterName: Option<String>,
}
