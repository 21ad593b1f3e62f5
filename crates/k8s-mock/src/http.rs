//! HTTP-based mock Kubernetes server using wiremock.
//!
//! The server keeps an in-memory object store and answers the subset of the
//! API an installer needs: legacy discovery, get, list, create and patch.
//! Creating an existing object answers 409, patching a missing one 404, and
//! a strategic merge patch of a custom resource 415.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{MockApiResource, MockDiscovery},
	helpers::{list_response, merge_json, status_response},
};

/// Objects keyed by (collection path, name).
pub type SharedResources = Arc<RwLock<HashMap<(String, String), Value>>>;

/// A mock Kubernetes server exposed over HTTP.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// Kinds the cluster knows about.
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects present at startup, as raw manifests. The collection path is
	/// derived from apiVersion/kind through the discovery data.
	#[builder(default)]
	resources: Vec<Value>,
	/// Object names whose create or patch is refused with 422.
	#[builder(default)]
	rejected_names: Vec<String>,
}

/// A running HTTP mock server instance.
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	resources: SharedResources,
}

impl HttpMockK8sServer {
	/// Start the mock server with all configured resources.
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;

		debug!(uri = %server.uri(), "Started mock K8s server");

		let mut resources: HashMap<(String, String), Value> = HashMap::new();
		for manifest in self.resources {
			if let Some((api_path, name)) = api_path_for_manifest(&manifest, &self.discovery) {
				trace!(api_path = %api_path, name = %name, "Registered resource");
				resources.insert((api_path, name), manifest);
			}
		}

		let ns_key = ("/api/v1/namespaces".to_string(), "default".to_string());
		resources.entry(ns_key).or_insert_with(|| {
			json!({
				"apiVersion": "v1",
				"kind": "Namespace",
				"metadata": {
					"name": "default"
				}
			})
		});

		let shared_resources = Arc::new(RwLock::new(resources));
		let rejected = Arc::new(self.rejected_names);

		mount_version(&server).await;
		mount_discovery(&server, &self.discovery).await;
		mount_resources(&server, &shared_resources, &rejected).await;

		RunningHttpMockK8sServer {
			server,
			resources: shared_resources,
		}
	}
}

/// Derive the collection path for a manifest using discovery data.
fn api_path_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<(String, String)> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?.to_string();
	let namespace = manifest
		.pointer("/metadata/namespace")
		.and_then(Value::as_str)
		.unwrap_or("default");

	let resource = discovery.find(api_version, kind)?;
	let root = if api_version.contains('/') {
		"apis"
	} else {
		"api"
	};

	let path = if resource.namespaced {
		format!(
			"/{root}/{api_version}/namespaces/{namespace}/{}",
			resource.name
		)
	} else {
		format!("/{root}/{api_version}/{}", resource.name)
	};

	Some((path, name))
}

impl RunningHttpMockK8sServer {
	/// Get the server's URI (e.g., "http://127.0.0.1:12345").
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Create a Kubeconfig pointing to this mock server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	/// Create a Kubeconfig pointing to this mock server with a custom context name.
	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// Stored object under a collection path, e.g.
	/// `get("/api/v1/namespaces/entando/configmaps", "settings")`.
	pub fn get(&self, collection: &str, name: &str) -> Option<Value> {
		self.resources
			.read()
			.ok()?
			.get(&(collection.to_string(), name.to_string()))
			.cloned()
	}

	/// Sorted names of the objects stored under a collection path.
	pub fn names_in(&self, collection: &str) -> Vec<String> {
		let Ok(resources) = self.resources.read() else {
			return Vec::new();
		};
		let mut names: Vec<_> = resources
			.keys()
			.filter(|(api_path, _)| api_path == collection)
			.map(|(_, name)| name.clone())
			.collect();
		names.sort();
		names
	}

	/// `METHOD path` of every create and patch received so far, in order.
	pub async fn writes(&self) -> Vec<String> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.filter(|req| req.method.as_str() == "POST" || req.method.as_str() == "PATCH")
			.map(|req| format!("{} {}", req.method, req.url.path()))
			.collect()
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.22.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn resource_list(group_version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"name": r.name,
				"singularName": "",
				"namespaced": r.namespaced,
				"kind": r.kind,
				"verbs": r.verbs,
			})
		})
		.collect();
	json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery) {
	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.group_resources
		.keys()
		.map(|gv| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(resource_list("v1", &discovery.core_resources)),
		)
		.mount(server)
		.await;

	for (gv, rs) in &discovery.group_resources {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{gv}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(resource_list(gv, rs)))
			.mount(server)
			.await;
	}
}

async fn mount_resources(
	server: &MockServer,
	resources: &SharedResources,
	rejected: &Arc<Vec<String>>,
) {
	let patch_resources = Arc::clone(resources);
	let post_resources = Arc::clone(resources);
	let get_resources = Arc::clone(resources);
	let patch_rejected = Arc::clone(rejected);
	let post_rejected = Arc::clone(rejected);

	Mock::given(method("PATCH"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(ResourcePath::Item { collection, name }) = ResourcePath::parse(req.url.path())
			else {
				return status_response(405, "MethodNotAllowed", "patch needs an object path");
			};
			if patch_rejected.contains(&name) {
				return rejected_response(&name);
			}
			if is_strategic_merge(req) && !supports_strategic_merge(&collection) {
				return status_response(
					415,
					"UnsupportedMediaType",
					"the body of the request was in an unknown format",
				);
			}
			let Ok(patch) = serde_json::from_slice::<Value>(&req.body) else {
				return status_response(400, "BadRequest", "patch body is not JSON");
			};

			let Ok(mut store) = patch_resources.write() else {
				return status_response(500, "InternalError", "store poisoned");
			};
			let key = (collection, name);
			let Some(existing) = store.get(&key) else {
				return not_found(&key.1);
			};
			let merged = merge_json(existing.clone(), patch);
			if !is_dry_run(req) {
				store.insert(key, merged.clone());
			}
			ResponseTemplate::new(200).set_body_json(merged)
		})
		.mount(server)
		.await;

	Mock::given(method("POST"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Some(ResourcePath::Collection(collection)) = ResourcePath::parse(req.url.path())
			else {
				return status_response(405, "MethodNotAllowed", "create needs a collection path");
			};
			let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
			let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) else {
				return status_response(422, "Invalid", "metadata.name: Required value");
			};
			if post_rejected.iter().any(|n| n == name) {
				return rejected_response(name);
			}

			let Ok(mut store) = post_resources.write() else {
				return status_response(500, "InternalError", "store poisoned");
			};
			let key = (collection, name.to_string());
			if store.contains_key(&key) {
				return status_response(
					409,
					"AlreadyExists",
					&format!("\"{name}\" already exists"),
				);
			}
			if !is_dry_run(req) {
				store.insert(key, body.clone());
			}
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path_regex(r"^/api(s)?/.*"))
		.respond_with(move |req: &Request| {
			let Ok(store) = get_resources.read() else {
				return status_response(500, "InternalError", "store poisoned");
			};
			match ResourcePath::parse(req.url.path()) {
				Some(ResourcePath::Item { collection, name }) => {
					match store.get(&(collection, name.clone())) {
						Some(resource) => ResponseTemplate::new(200).set_body_json(resource),
						None => not_found(&name),
					}
				}
				Some(ResourcePath::Collection(collection)) => {
					// `/api/v1/configmaps` lists the configmaps of every namespace
					let items = store
						.iter()
						.filter(|((api_path, _), _)| {
							*api_path == collection
								|| extract_cluster_wide_path(api_path).as_deref()
									== Some(collection.as_str())
						})
						.map(|(_, v)| v.clone())
						.collect();
					list_response(items)
				}
				None => not_found(req.url.path()),
			}
		})
		.mount(server)
		.await;
}

fn is_strategic_merge(req: &Request) -> bool {
	req.headers
		.get("content-type")
		.and_then(|v| v.to_str().ok())
		.is_some_and(|v| v.starts_with("application/strategic-merge-patch+json"))
}

/// Strategic merge only works for built-in kinds, custom resources answer 415.
fn supports_strategic_merge(collection: &str) -> bool {
	let Some(rest) = collection.strip_prefix("/apis/") else {
		return true;
	};
	let group = rest.split('/').next().unwrap_or_default();
	group == "apps" || group.ends_with(".k8s.io")
}

fn is_dry_run(req: &Request) -> bool {
	req.url.query().unwrap_or("").contains("dryRun")
}

fn not_found(name: &str) -> ResponseTemplate {
	status_response(404, "NotFound", &format!("\"{name}\" not found"))
}

fn rejected_response(name: &str) -> ResponseTemplate {
	status_response(
		422,
		"Invalid",
		&format!("\"{name}\" is invalid: rejected by admission"),
	)
}

/// What a resource URL points at.
#[derive(Debug, PartialEq, Eq)]
enum ResourcePath {
	/// A collection, e.g. `/api/v1/namespaces/default/configmaps`.
	Collection(String),
	/// A single object, e.g. `/api/v1/namespaces/default/configmaps/settings`.
	Item { collection: String, name: String },
}

impl ResourcePath {
	/// Classify by the number of segments after `/api/<v>` or `/apis/<g>/<v>`:
	/// odd counts are collections, even counts are objects. Group roots and
	/// subresources past an object are not served.
	fn parse(url_path: &str) -> Option<Self> {
		let trimmed = url_path.trim_matches('/');
		let segments: Vec<&str> = trimmed.split('/').collect();
		let prefix = match segments.first()? {
			&"api" => 2,
			&"apis" => 3,
			_ => return None,
		};
		let rest = segments.len().checked_sub(prefix)?;
		match rest {
			1 | 3 => Some(Self::Collection(format!("/{trimmed}"))),
			2 | 4 => {
				let (collection, name) = trimmed.rsplit_once('/')?;
				Some(Self::Item {
					collection: format!("/{collection}"),
					name: name.to_string(),
				})
			}
			_ => None,
		}
	}
}

/// Extract a cluster-wide path from a namespaced collection path.
///
/// - `/api/v1/namespaces/default/configmaps` -> Some(`/api/v1/configmaps`)
/// - `/api/v1/namespaces` -> None
fn extract_cluster_wide_path(path: &str) -> Option<String> {
	let ns_idx = path.find("/namespaces/")?;
	let before_ns = &path[..ns_idx];
	let after_ns = &path[ns_idx + "/namespaces/".len()..];
	let slash_idx = after_ns.find('/')?;
	Some(format!("{}{}", before_ns, &after_ns[slash_idx..]))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_core_paths() {
		assert_eq!(
			ResourcePath::parse("/api/v1/namespaces"),
			Some(ResourcePath::Collection("/api/v1/namespaces".into()))
		);
		assert_eq!(
			ResourcePath::parse("/api/v1/namespaces/entando"),
			Some(ResourcePath::Item {
				collection: "/api/v1/namespaces".into(),
				name: "entando".into()
			})
		);
		assert_eq!(
			ResourcePath::parse("/api/v1/namespaces/entando/configmaps"),
			Some(ResourcePath::Collection(
				"/api/v1/namespaces/entando/configmaps".into()
			))
		);
		assert_eq!(
			ResourcePath::parse("/api/v1/namespaces/entando/configmaps/settings"),
			Some(ResourcePath::Item {
				collection: "/api/v1/namespaces/entando/configmaps".into(),
				name: "settings".into()
			})
		);
	}

	#[test]
	fn test_parse_group_paths() {
		assert_eq!(ResourcePath::parse("/apis/entando.org/v1"), None);
		assert_eq!(
			ResourcePath::parse("/apis/apiextensions.k8s.io/v1/customresourcedefinitions/x"),
			Some(ResourcePath::Item {
				collection: "/apis/apiextensions.k8s.io/v1/customresourcedefinitions".into(),
				name: "x".into()
			})
		);
		assert_eq!(
			ResourcePath::parse("/apis/entando.org/v1/namespaces/entando/entandoapps"),
			Some(ResourcePath::Collection(
				"/apis/entando.org/v1/namespaces/entando/entandoapps".into()
			))
		);
	}

	#[test]
	fn test_manifest_paths_follow_scope() {
		let discovery = MockDiscovery::default();
		assert_eq!(
			api_path_for_manifest(
				&json!({
					"apiVersion": "entando.org/v1",
					"kind": "EntandoApp",
					"metadata": {"name": "quickstart", "namespace": "entando"}
				}),
				&discovery
			),
			Some((
				"/apis/entando.org/v1/namespaces/entando/entandoapps".to_string(),
				"quickstart".to_string()
			))
		);
		assert_eq!(
			api_path_for_manifest(
				&json!({
					"apiVersion": "rbac.authorization.k8s.io/v1",
					"kind": "ClusterRole",
					"metadata": {"name": "entando-operator"}
				}),
				&discovery
			),
			Some((
				"/apis/rbac.authorization.k8s.io/v1/clusterroles".to_string(),
				"entando-operator".to_string()
			))
		);
		assert_eq!(
			api_path_for_manifest(
				&json!({"apiVersion": "v1", "kind": "Unknown", "metadata": {"name": "x"}}),
				&discovery
			),
			None
		);
	}

	#[test]
	fn test_strategic_merge_only_for_built_in_groups() {
		assert!(supports_strategic_merge("/api/v1/namespaces/entando/configmaps"));
		assert!(supports_strategic_merge("/apis/apps/v1/namespaces/entando/deployments"));
		assert!(supports_strategic_merge(
			"/apis/rbac.authorization.k8s.io/v1/namespaces/entando/roles"
		));
		assert!(!supports_strategic_merge(
			"/apis/entando.org/v1/namespaces/entando/entandoapps"
		));
		assert!(!supports_strategic_merge(
			"/apis/cert-manager.io/v1/namespaces/entando/certificates"
		));
	}

	#[test]
	fn test_cluster_wide_path() {
		assert_eq!(
			extract_cluster_wide_path("/apis/apps/v1/namespaces/default/deployments"),
			Some("/apis/apps/v1/deployments".to_string())
		);
		assert_eq!(extract_cluster_wide_path("/api/v1/namespaces"), None);
	}
}
