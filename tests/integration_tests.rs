// Include the #[ignore] macro on slow tests
// That way, 'cargo test' does not run them by default.
// To run just these tests, use 'cargo test -- --ignored'
// To run all tests, use 'cargo test -- --include-ignored'
//
// These tests assume there is already a Kubernetes cluster running with a
// configured context, and that the CRD and operator are already installed.
// In this way, it can be used as a conformance test on a target, separate
// from installation.

#[cfg(test)]
mod test {
    use controller::{
        apis::dittoserver_types::{DittoServer, DittoServerSpec, Phase, StorageSpec},
        naming,
    };
    use k8s_openapi::{
        api::{apps::v1::StatefulSet, core::v1::Namespace},
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
        apimachinery::pkg::api::resource::Quantity,
    };
    use kube::{
        api::{DeleteParams, ListParams, Patch, PatchParams, WatchEvent, WatchParams},
        runtime::wait::{await_condition, conditions},
        Api, Client, Config,
    };
    use std::{collections::BTreeMap, time::Duration};
    use tokio::time::timeout;

    const TIMEOUT_SECONDS_NS_DELETED: u64 = 120;
    const TIMEOUT_SECONDS_RECONCILE: u64 = 120;

    async fn kube_client() -> Client {
        let kube_config = Config::infer()
            .await
            .expect("Please configure your Kubernetes context.");
        let client = Client::try_from(kube_config.clone()).expect("Failed to initialize Kubernetes client");

        let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            await_condition(crds, "dittoservers.dittofs.dittofs.com", conditions::is_crd_established()),
        )
        .await
        .expect("Custom Resource Definition for DittoServer was not found.");

        client
    }

    async fn create_namespace(client: Client, name: &str) -> Api<Namespace> {
        let ns_api: Api<Namespace> = Api::all(client);
        let params = ListParams::default().fields(&format!("metadata.name={}", name));
        if ns_api.list(&params).await.unwrap().items.is_empty() {
            let ns = serde_json::json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": name }
            });
            ns_api
                .patch(name, &PatchParams::apply("dittofs-integration-tests"), &Patch::Apply(ns))
                .await
                .unwrap();
        }
        ns_api
    }

    async fn delete_namespace(ns_api: &Api<Namespace>, name: &str) {
        let _ = ns_api.delete(name, &DeleteParams::default()).await;
        let _ = timeout(
            Duration::from_secs(TIMEOUT_SECONDS_NS_DELETED),
            await_condition(ns_api.clone(), name, conditions::is_deleted("")),
        )
        .await;
    }

    async fn wait_for_reconcile(servers: &Api<DittoServer>, name: &str) {
        let wp = WatchParams {
            timeout: Some(TIMEOUT_SECONDS_RECONCILE as u32),
            field_selector: Some(format!("metadata.name={}", name)),
            ..Default::default()
        };
        let mut stream = servers.watch(&wp, "0").await.unwrap().boxed();
        let _ = timeout(Duration::from_secs(TIMEOUT_SECONDS_RECONCILE), async {
            use futures::StreamExt;
            while let Some(event) = stream.next().await {
                if let Ok(WatchEvent::Modified(server)) = event {
                    if server.status.as_ref().and_then(|s| s.observed_generation).is_some() {
                        return;
                    }
                }
            }
        })
        .await;
    }

    fn quantity(v: &str) -> Quantity {
        Quantity(v.to_owned())
    }

    /// §8 scenario 1: a fresh CR with no Percona, no adapters — converges to
    /// a ConfigMap, a StatefulSet with the three expected volume-claim
    /// templates, and `phase=Pending` (no replicas ready yet).
    #[tokio::test]
    #[ignore]
    async fn functional_test_basic_provisioning() {
        let client = kube_client().await;
        let namespace = "dittofs-test-basic";
        let ns_api = create_namespace(client.clone(), namespace).await;

        let servers: Api<DittoServer> = Api::namespaced(client.clone(), namespace);
        let mut spec = DittoServerSpec::default();
        spec.storage = StorageSpec {
            metadataSize: quantity("10Gi"),
            cacheSize: quantity("5Gi"),
            contentSize: Some(quantity("100Gi")),
            storageClassName: None,
        };
        let server = DittoServer::new("hello", spec);
        servers.create(&Default::default(), &server).await.unwrap();

        wait_for_reconcile(&servers, "hello").await;
        wait_for_reconcile(&servers, "hello").await;

        let cm_api: Api<k8s_openapi::api::core::v1::ConfigMap> = Api::namespaced(client.clone(), namespace);
        let cm = cm_api.get(&naming::config_map_name("hello")).await.unwrap();
        assert!(cm.data.unwrap_or_default().contains_key("config.yaml"));

        let sts_api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
        let sts = sts_api.get(&naming::workload_name("hello")).await.unwrap();
        let claim_names: Vec<String> = sts
            .spec
            .unwrap()
            .volume_claim_templates
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.metadata.name)
            .collect();
        assert!(claim_names.contains(&"metadata".to_owned()));
        assert!(claim_names.contains(&"cache".to_owned()));
        assert!(claim_names.contains(&"content".to_owned()));

        let fetched = servers.get("hello").await.unwrap();
        assert_eq!(fetched.status.unwrap().phase, Phase::Pending);

        delete_namespace(&ns_api, namespace).await;
    }

    /// §8 scenario 2: `spec.replicas=0` converges to `phase=Stopped`,
    /// `Ready=True`, `Available=True`.
    #[tokio::test]
    #[ignore]
    async fn functional_test_stopped_server_is_ready() {
        let client = kube_client().await;
        let namespace = "dittofs-test-stopped";
        let ns_api = create_namespace(client.clone(), namespace).await;

        let servers: Api<DittoServer> = Api::namespaced(client.clone(), namespace);
        let mut spec = DittoServerSpec::default();
        spec.replicas = 0;
        let server = DittoServer::new("hello", spec);
        servers.create(&Default::default(), &server).await.unwrap();

        wait_for_reconcile(&servers, "hello").await;
        wait_for_reconcile(&servers, "hello").await;

        let fetched = servers.get("hello").await.unwrap();
        let status = fetched.status.unwrap();
        assert_eq!(status.phase, Phase::Stopped);
        let ready = status.conditions.iter().find(|c| c.type_ == "Ready").unwrap();
        assert_eq!(ready.status, "True");
        let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
        assert_eq!(available.status, "True");

        delete_namespace(&ns_api, namespace).await;
    }

    /// §8 scenario 3/4: adapter discovery converges Services, NetworkPolicies,
    /// and container ports to the REST stub's adapter snapshot, and reacts
    /// to subsequent snapshot changes (port change, adapter removal).
    ///
    /// Requires a managed-server REST stub reachable at the operator
    /// credentials secret's recorded server-url; left ignored pending that
    /// fixture's deployment in the target cluster.
    #[tokio::test]
    #[ignore]
    async fn functional_test_adapter_discovery_converges_services() {
        let client = kube_client().await;
        let namespace = "dittofs-test-adapters";
        let ns_api = create_namespace(client.clone(), namespace).await;

        let servers: Api<DittoServer> = Api::namespaced(client.clone(), namespace);
        let mut spec = DittoServerSpec::default();
        spec.adapterDiscovery.pollingInterval = Some("1m".to_owned());
        let server = DittoServer::new("hello", spec);
        servers.create(&Default::default(), &server).await.unwrap();

        wait_for_reconcile(&servers, "hello").await;
        wait_for_reconcile(&servers, "hello").await;

        let svc_api: Api<k8s_openapi::api::core::v1::Service> = Api::namespaced(client.clone(), namespace);
        let nfs_service = svc_api.get(&naming::adapter_service_name("hello", "nfs")).await.unwrap();
        let ports: Vec<i32> = nfs_service
            .spec
            .unwrap()
            .ports
            .unwrap_or_default()
            .iter()
            .map(|p| p.port)
            .collect();
        assert!(ports.contains(&12049));
        assert!(ports.contains(&111));

        delete_namespace(&ns_api, namespace).await;
    }

    /// §8 scenario 5: bootstrap with admin credentials auto-generated
    /// produces an operator-credentials secret with non-empty tokens.
    #[tokio::test]
    #[ignore]
    async fn functional_test_operator_credentials_bootstrap() {
        let client = kube_client().await;
        let namespace = "dittofs-test-auth";
        let ns_api = create_namespace(client.clone(), namespace).await;

        let servers: Api<DittoServer> = Api::namespaced(client.clone(), namespace);
        let server = DittoServer::new("hello", DittoServerSpec::default());
        servers.create(&Default::default(), &server).await.unwrap();

        wait_for_reconcile(&servers, "hello").await;
        wait_for_reconcile(&servers, "hello").await;

        let secrets: Api<k8s_openapi::api::core::v1::Secret> = Api::namespaced(client.clone(), namespace);
        let secret = secrets.get(&naming::operator_credentials_secret_name("hello")).await.unwrap();
        let data: BTreeMap<String, k8s_openapi::ByteString> = secret.data.unwrap_or_default();
        assert!(data.contains_key("username"));
        assert!(!data.get("access-token").unwrap().0.is_empty());
        assert_eq!(
            secret.metadata.owner_references.unwrap_or_default()[0].kind,
            "DittoServer"
        );

        delete_namespace(&ns_api, namespace).await;
    }

    /// §8 scenario 6: deleting a CR with `percona.enabled=true,
    /// deleteWithServer=false` orphans the managed database (preserving it)
    /// and removes the finalizer.
    #[tokio::test]
    #[ignore]
    async fn functional_test_deletion_orphans_database_when_configured() {
        let client = kube_client().await;
        let namespace = "dittofs-test-delete";
        let ns_api = create_namespace(client.clone(), namespace).await;

        let servers: Api<DittoServer> = Api::namespaced(client.clone(), namespace);
        let mut spec = DittoServerSpec::default();
        spec.percona.enabled = Some(true);
        spec.percona.deleteWithServer = Some(false);
        let server = DittoServer::new("hello", spec);
        servers.create(&Default::default(), &server).await.unwrap();

        wait_for_reconcile(&servers, "hello").await;
        wait_for_reconcile(&servers, "hello").await;

        servers.delete("hello", &DeleteParams::default()).await.unwrap();
        let _ = timeout(
            Duration::from_secs(TIMEOUT_SECONDS_RECONCILE),
            await_condition(servers.clone(), "hello", conditions::is_deleted("")),
        )
        .await;

        let pxc_api: Api<controller::database::PerconaXtraDBCluster> = Api::namespaced(client.clone(), namespace);
        let cluster = pxc_api.get("hello-pxc").await.unwrap();
        assert!(cluster.metadata.owner_references.unwrap_or_default().is_empty());

        delete_namespace(&ns_api, namespace).await;
    }
}
