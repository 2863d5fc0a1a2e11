//! The stateful workload reconciler (§4.11): one StatefulSet named
//! `{name}`, with volume-claim templates, probes, an init container that
//! waits on the managed database, and environment variables assembled from
//! the CR's secrets.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetPersistentVolumeClaimRetentionPolicy, StatefulSetSpec, StatefulSetUpdateStrategy},
        core::v1::{
            Container, ContainerPort, EnvVar, EnvVarSource, ExecAction, Lifecycle, LifecycleHandler, PersistentVolumeClaim,
            PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
            SecretKeySelector,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use kube::{
    api::{Api, Patch, PatchParams},
    Client, Resource, ResourceExt,
};

use crate::{
    apis::dittoserver_types::DittoServer, config_hash, database, defaults, naming, secret, server_config, service::standard_labels,
    Error, CONFIG_HASH_ANNOTATION,
};

const PRE_STOP_SLEEP_SECS: i64 = 5;

fn volume_claim(name: &str, size: &Quantity, storage_class: Option<&str>) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_owned(), size.clone());
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_owned()]),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            storage_class_name: storage_class.map(|s| s.to_owned()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_from_secret_key(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_owned(),
                key: key.to_owned(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_env(cr: &DittoServer) -> Vec<EnvVar> {
    let name = cr.name_any();
    let mut env = Vec::new();

    let jwt_secret_name = cr
        .spec
        .identity
        .jwt
        .secretRef
        .as_ref()
        .map(|r| r.name.clone())
        .unwrap_or_else(|| naming::jwt_secret_name(&name));
    let jwt_key = cr.spec.identity.jwt.secretRef.as_ref().map(|r| r.key.clone()).unwrap_or_else(|| "jwt-secret".to_owned());
    env.push(env_from_secret_key("DITTOFS_JWT_SECRET", &jwt_secret_name, &jwt_key));

    if let Some(admin_ref) = &cr.spec.identity.admin.passwordSecretRef {
        env.push(env_from_secret_key("DITTOFS_ADMIN_PASSWORD", &admin_ref.name, &admin_ref.key));
    } else {
        env.push(env_from_secret_key("DITTOFS_ADMIN_PASSWORD", &naming::admin_credentials_secret_name(&name), "password"));
    }

    if !cr.spec.percona.is_enabled() {
        if let Some(pg_ref) = &cr.spec.database.postgresSecretRef {
            env.push(env_from_secret_key("DITTOFS_POSTGRES_URI", &pg_ref.name, &pg_ref.key));
        }
    } else {
        env.push(env_from_secret_key("DITTOFS_POSTGRES_URI", &database::cluster_name(&name), "uri"));
    }

    if let Some(s3_secret) = &cr.spec.s3.credentialsSecretRef {
        env.push(env_from_secret_key("DITTOFS_S3_ACCESS_KEY_ID", s3_secret, "access-key-id"));
        env.push(env_from_secret_key("DITTOFS_S3_SECRET_ACCESS_KEY", s3_secret, "secret-access-key"));
        env.push(env_from_secret_key("DITTOFS_S3_BUCKET", s3_secret, "bucket"));
        env.push(env_from_secret_key("DITTOFS_S3_ENDPOINT", s3_secret, "endpoint"));
        if let Some(region) = &cr.spec.s3.region {
            env.push(EnvVar {
                name: "DITTOFS_S3_REGION".to_owned(),
                value: Some(region.clone()),
                ..Default::default()
            });
        }
    }

    env
}

fn probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(k8s_openapi::api::core::v1::HTTPGetAction {
            path: Some(path.to_owned()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(10),
        ..Default::default()
    }
}

fn init_container(cr: &DittoServer) -> Option<Container> {
    if !cr.spec.percona.is_enabled() {
        return None;
    }
    Some(Container {
        name: "wait-for-database".to_owned(),
        image: Some("postgres:16-alpine".to_owned()),
        command: Some(vec!["sh".to_owned(), "-c".to_owned()]),
        args: Some(vec!["until pg_isready -d \"$DITTOFS_POSTGRES_URI\"; do sleep 2; done".to_owned()]),
        env: Some(vec![env_from_secret_key("DITTOFS_POSTGRES_URI", &database::cluster_name(&cr.name_any()), "uri")]),
        ..Default::default()
    })
}

fn build_container(cr: &DittoServer) -> Container {
    let api_port = cr.spec.controlPlane.effective_port();
    Container {
        name: "dittofs".to_owned(),
        image: Some(cr.spec.image.clone()),
        resources: Some(cr.spec.resources.clone()),
        security_context: cr.spec.securityContext.clone(),
        ports: Some(vec![ContainerPort {
            name: Some("api".to_owned()),
            container_port: api_port,
            protocol: Some("TCP".to_owned()),
            ..Default::default()
        }]),
        env: Some(build_env(cr)),
        volume_mounts: Some(vec![
            k8s_openapi::api::core::v1::VolumeMount { name: "metadata".to_owned(), mount_path: "/var/lib/dittofs/metadata".to_owned(), ..Default::default() },
            k8s_openapi::api::core::v1::VolumeMount { name: "cache".to_owned(), mount_path: "/var/lib/dittofs/cache".to_owned(), ..Default::default() },
        ]),
        readiness_probe: Some(probe("/health/ready", api_port)),
        liveness_probe: Some(probe("/health", api_port)),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec!["sleep".to_owned(), PRE_STOP_SLEEP_SECS.to_string()]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_security_context(cr: &DittoServer) -> PodSecurityContext {
    cr.spec.podSecurityContext.clone().unwrap_or(PodSecurityContext {
        fs_group: Some(defaults::default_pod_security_context_fs_group()),
        ..Default::default()
    })
}

fn build_statefulset(cr: &DittoServer, config_hash_value: &str) -> StatefulSet {
    let name = naming::workload_name(&cr.name_any());
    let labels = standard_labels(&cr.name_any());
    let oref = cr.controller_owner_ref(&()).unwrap();

    let mut pod_annotations = BTreeMap::new();
    pod_annotations.insert(CONFIG_HASH_ANNOTATION.to_owned(), config_hash_value.to_owned());

    let containers = vec![build_container(cr)];
    let init_containers = init_container(cr).map(|c| vec![c]);

    let mut volume_claims = vec![volume_claim("metadata", &cr.spec.storage.metadataSize, cr.spec.storage.storageClassName.as_deref())];
    volume_claims.push(volume_claim("cache", &cr.spec.storage.cacheSize, cr.spec.storage.storageClassName.as_deref()));
    if let Some(content_size) = &cr.spec.storage.contentSize {
        volume_claims.push(volume_claim("content", content_size, cr.spec.storage.storageClassName.as_deref()));
    }

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(cr.namespace().unwrap()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![oref]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(cr.spec.replicas),
            service_name: naming::headless_service_name(&cr.name_any()),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers,
                    init_containers,
                    security_context: Some(pod_security_context(cr)),
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(volume_claims),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_owned()),
                ..Default::default()
            }),
            persistent_volume_claim_retention_policy: Some(StatefulSetPersistentVolumeClaimRetentionPolicy {
                when_deleted: Some("Retain".to_owned()),
                when_scaled: Some("Retain".to_owned()),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Renders the config document, writes the ConfigMap, computes the config
/// hash over the persisted bytes plus referenced secrets, and
/// create-or-updates the StatefulSet with that hash on its pod template.
pub async fn reconcile(client: &Client, cr: &DittoServer) -> Result<String, Error> {
    let ns = cr.namespace().unwrap();
    let config_document = server_config::render_config_document(&cr.spec);
    crate::configmap::apply_configmap(client, cr, &config_document).await?;

    let referenced_secrets = collect_referenced_secret_bytes(client, cr, &ns).await?;
    let generation = cr.meta().generation.unwrap_or(0);
    let hash = config_hash::compute_config_hash(config_document.as_bytes(), &referenced_secrets, generation);

    let sts = build_statefulset(cr, &hash);
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &ns);
    let pp = PatchParams::apply(crate::FIELD_MANAGER).force();
    api.patch(&naming::workload_name(&cr.name_any()), &pp, &Patch::Apply(&sts)).await?;

    Ok(hash)
}

async fn collect_referenced_secret_bytes(client: &Client, cr: &DittoServer, ns: &str) -> Result<Vec<Vec<u8>>, Error> {
    let mut bytes = Vec::new();
    let name = cr.name_any();

    let jwt_secret_name = cr.spec.identity.jwt.secretRef.as_ref().map(|r| r.name.clone()).unwrap_or_else(|| naming::jwt_secret_name(&name));
    let jwt_key = cr.spec.identity.jwt.secretRef.as_ref().map(|r| r.key.clone()).unwrap_or_else(|| "jwt-secret".to_owned());
    if let Some(data) = secret::read_secret_data(client, ns, &jwt_secret_name).await? {
        if let Some(v) = data.get(&jwt_key) {
            bytes.push(v.clone().into_bytes());
        }
    }

    if let Some(admin_ref) = &cr.spec.identity.admin.passwordSecretRef {
        if let Some(data) = secret::read_secret_data(client, ns, &admin_ref.name).await? {
            if let Some(v) = data.get(&admin_ref.key) {
                bytes.push(v.clone().into_bytes());
            }
        }
    } else if let Some(data) = secret::read_secret_data(client, ns, &naming::admin_credentials_secret_name(&name)).await? {
        if let Some(v) = data.get("password") {
            bytes.push(v.clone().into_bytes());
        }
    }

    if !cr.spec.percona.is_enabled() {
        if let Some(pg_ref) = &cr.spec.database.postgresSecretRef {
            if let Some(data) = secret::read_secret_data(client, ns, &pg_ref.name).await? {
                if let Some(v) = data.get(&pg_ref.key) {
                    bytes.push(v.clone().into_bytes());
                }
            }
        }
    } else if let Some(data) = secret::read_secret_data(client, ns, &database::cluster_name(&name)).await? {
        if let Some(v) = data.get("uri") {
            bytes.push(v.clone().into_bytes());
        }
    }

    if let Some(s3_secret) = &cr.spec.s3.credentialsSecretRef {
        if let Some(data) = secret::read_secret_data(client, ns, s3_secret).await? {
            for v in data.values() {
                bytes.push(v.clone().into_bytes());
            }
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statefulset_carries_config_hash_annotation() {
        let mut cr = DittoServer::default();
        cr.metadata.name = Some("hello".to_owned());
        cr.metadata.namespace = Some("default".to_owned());
        cr.spec.storage.metadataSize = Quantity("10Gi".to_owned());
        cr.spec.storage.cacheSize = Quantity("5Gi".to_owned());

        let sts = build_statefulset(&cr, "deadbeef");
        let annotations = sts.spec.unwrap().template.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations.get(CONFIG_HASH_ANNOTATION), Some(&"deadbeef".to_owned()));
    }

    #[test]
    fn volume_claim_templates_include_content_only_when_specified() {
        let mut cr = DittoServer::default();
        cr.metadata.name = Some("hello".to_owned());
        cr.metadata.namespace = Some("default".to_owned());
        cr.spec.storage.metadataSize = Quantity("10Gi".to_owned());
        cr.spec.storage.cacheSize = Quantity("5Gi".to_owned());
        cr.spec.storage.contentSize = Some(Quantity("100Gi".to_owned()));

        let sts = build_statefulset(&cr, "hash");
        let claims = sts.spec.unwrap().volume_claim_templates.unwrap();
        let names: Vec<_> = claims.iter().filter_map(|c| c.metadata.name.clone()).collect();
        assert_eq!(names, vec!["metadata", "cache", "content"]);
    }
}
