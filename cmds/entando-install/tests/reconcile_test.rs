//! Reconciliation passes against the HTTP mock server.

use assert_matches::assert_matches;
use entando_install::{
	k8s::{client::ClusterConnection, gateway::KubeGateway},
	reconcile::{Action, ReconcileError, Reconciler, WriteKind},
	yaml::parse_all_documents,
};
use indoc::indoc;
use k8s_mock::{HttpMockK8sServer, MockDiscovery, RunningHttpMockK8sServer};
use serde_json::json;

const NAMESPACE_RESOURCES: &str = indoc! {"
	apiVersion: v1
	kind: ServiceAccount
	metadata:
	  name: entando-operator
	---
	apiVersion: rbac.authorization.k8s.io/v1
	kind: Role
	metadata:
	  name: entando-operator
	rules: []
	---
	note: release metadata
	---
	apiVersion: v1
	kind: ConfigMap
	metadata:
	  name: entando-docker-image-info
	data:
	  app-builder: '{\"version\":\"6.3.2\"}'
"};

async fn gateway_for(server: &RunningHttpMockK8sServer) -> KubeGateway {
	let conn = ClusterConnection::connect_with_kubeconfig(server.kubeconfig(), "mock-context")
		.await
		.expect("connection should succeed");
	KubeGateway::new(conn.client().clone())
}

#[tokio::test]
async fn test_apply_twice_converges() {
	let server = HttpMockK8sServer::builder().build().start().await;
	let gateway = gateway_for(&server).await;
	let reconciler = Reconciler::new(&gateway, "entando");

	let mut records = parse_all_documents(NAMESPACE_RESOURCES).unwrap();
	let first = reconciler.apply(&mut records).await.into_result().unwrap();
	assert_eq!(first.count(Action::Created), 3);
	assert_eq!(first.skipped_count(), 1);

	assert_eq!(
		server.names_in("/api/v1/namespaces/entando/serviceaccounts"),
		vec!["entando-operator"]
	);
	assert_eq!(
		server.names_in("/apis/rbac.authorization.k8s.io/v1/namespaces/entando/roles"),
		vec!["entando-operator"]
	);

	let mut records = parse_all_documents(NAMESPACE_RESOURCES).unwrap();
	let second = reconciler.apply(&mut records).await.into_result().unwrap();
	assert_eq!(second.count(Action::Patched), 3);
	assert_eq!(second.count(Action::Created), 0);
}

#[tokio::test]
async fn test_existing_resource_is_updated_in_place() {
	let server = HttpMockK8sServer::builder()
		.resources(vec![json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "entando-docker-image-info", "namespace": "entando"},
			"data": {"app-builder": "old", "keycloak": "kept"}
		})])
		.build()
		.start()
		.await;
	let gateway = gateway_for(&server).await;
	let reconciler = Reconciler::new(&gateway, "entando");

	let mut records = parse_all_documents(NAMESPACE_RESOURCES).unwrap();
	let report = reconciler.apply(&mut records).await.into_result().unwrap();
	assert_eq!(report.count(Action::Created), 2);
	assert_eq!(report.count(Action::Patched), 1);

	let stored = server
		.get(
			"/api/v1/namespaces/entando/configmaps",
			"entando-docker-image-info",
		)
		.unwrap();
	assert_eq!(stored["data"]["app-builder"], "{\"version\":\"6.3.2\"}");
	assert_eq!(stored["data"]["keycloak"], "kept");
}

#[tokio::test]
async fn test_first_failure_stops_the_pass() {
	let server = HttpMockK8sServer::builder()
		.rejected_names(vec!["entando-operator".to_string()])
		.build()
		.start()
		.await;
	let gateway = gateway_for(&server).await;
	let reconciler = Reconciler::new(&gateway, "entando");

	let mut records = parse_all_documents(NAMESPACE_RESOURCES).unwrap();
	let report = reconciler.apply(&mut records).await;

	assert_eq!(report.outcomes().len(), 1);
	assert_matches!(
		report.failure(),
		Some(ReconcileError::Write { kind: WriteKind::Create, id, .. }) if id.kind == "ServiceAccount"
	);
	assert_eq!(
		server.writes().await,
		vec!["POST /api/v1/namespaces/entando/serviceaccounts"]
	);
	assert!(server
		.names_in("/api/v1/namespaces/entando/configmaps")
		.is_empty());
}

#[tokio::test]
async fn test_custom_resource_needs_its_definition() {
	let server = HttpMockK8sServer::builder()
		.discovery(MockDiscovery::default().without_group("entando.org/v1"))
		.build()
		.start()
		.await;
	let gateway = gateway_for(&server).await;
	let reconciler = Reconciler::new(&gateway, "entando");

	let mut records = parse_all_documents(indoc! {"
		apiVersion: entando.org/v1
		kind: EntandoApp
		metadata:
		  name: quickstart
		spec:
		  dbms: postgresql
	"})
	.unwrap();
	let err = reconciler
		.apply(&mut records)
		.await
		.into_result()
		.unwrap_err();

	assert_matches!(
		err,
		ReconcileError::Write { kind: WriteKind::Create, ref source, .. } if source.is_unknown_type()
	);
	assert_eq!(err.id().name, "quickstart");
}
