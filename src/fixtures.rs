//! Helper methods only available for tests
use crate::{
    apis::dittoserver_types::{DittoServer, DittoServerSpec},
    adapter_poller::AdapterSnapshotStore,
    config::Config,
    controller::{Context, Diagnostics},
    FINALIZER,
};
use futures::pin_mut;
use http::{Request, Response};
use kube::{client::Body, Client, Resource, ResourceExt};
use std::sync::Arc;
use tokio::sync::RwLock;

impl DittoServer {
    /// A normal test DittoServer
    pub fn test() -> Self {
        let mut d = DittoServer::new("test-server", DittoServerSpec::default());
        d.meta_mut().namespace = Some("testns".into());
        d.meta_mut().uid = Some("752d59ef-2671-4890-9feb-0097459b18c8".into());
        d.meta_mut().generation = Some(1);
        d.spec.replicas = 1;
        d
    }

    /// Modify a DittoServer to have the expected finalizer
    pub fn finalized(mut self) -> Self {
        self.finalizers_mut().push(FINALIZER.to_owned());
        self
    }
}

type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
pub struct ApiServerVerifier(ApiServerHandle);

/// Scenarios we test for in ApiServerVerifier
pub enum Scenario {
    /// objects without finalizers get one applied and nothing else happens this pass
    FinalizerCreation(DittoServer),
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario succeeded")
}

impl ApiServerVerifier {
    /// Tests only get to run specific scenarios that have matching handlers.
    ///
    /// NB: if the controller makes more calls than the scenario handles, the
    /// reconciler will see a `KubeError(Service(Closed(())))` instead.
    pub fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::FinalizerCreation(server) => self.handle_finalizer_creation(server).await,
            }
            .expect("scenario completed without errors");
        })
    }

    async fn handle_finalizer_creation(mut self, server: DittoServer) -> Result<Self, kube::Error> {
        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::GET);

        let body = request.into_body();
        pin_mut!(body);
        let response = serde_json::to_vec(&server).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());

        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert_eq!(
            request.uri().to_string(),
            format!(
                "/apis/dittofs.dittofs.com/v1alpha1/namespaces/testns/dittoservers/{}?",
                server.name_any()
            )
        );
        let response = serde_json::to_vec(&server.clone().finalized()).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());

        let (request, send) = self.0.next_request().await.expect("service not called");
        assert_eq!(request.method(), http::Method::POST);
        let response = request.into_body();
        send.send_response(Response::builder().body(response).unwrap());

        Ok(self)
    }
}

impl Context {
    /// Creates a test context with a mocked kube client, fresh metrics and default diagnostics
    pub fn test() -> (Arc<Self>, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        let mock_client = Client::new(mock_service, "testns");
        let ctx = Self {
            client: mock_client,
            metrics: Default::default(),
            diagnostics: Arc::new(RwLock::new(Diagnostics::default())),
            adapter_snapshots: AdapterSnapshotStore::new(),
            config: Config::default(),
        };
        (Arc::new(ctx), ApiServerVerifier(handle))
    }
}
