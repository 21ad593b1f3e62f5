//! Mock Kubernetes API discovery types.

use std::collections::BTreeMap;

/// The API resources the mock server announces.
///
/// Kinds missing here are unknown to the cluster, like custom resources
/// whose CRD has not been installed yet.
#[derive(Clone)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
					],
				),
				(
					"rbac.authorization.k8s.io/v1".to_string(),
					vec![
						MockApiResource::namespaced("roles", "Role"),
						MockApiResource::namespaced("rolebindings", "RoleBinding"),
						MockApiResource::cluster_scoped("clusterroles", "ClusterRole"),
						MockApiResource::cluster_scoped(
							"clusterrolebindings",
							"ClusterRoleBinding",
						),
					],
				),
				(
					"apiextensions.k8s.io/v1".to_string(),
					vec![MockApiResource::cluster_scoped(
						"customresourcedefinitions",
						"CustomResourceDefinition",
					)],
				),
				(
					"entando.org/v1".to_string(),
					vec![
						MockApiResource::namespaced("entandoapps", "EntandoApp"),
						MockApiResource::namespaced("entandoplugins", "EntandoPlugin"),
						MockApiResource::namespaced(
							"entandodatabaseservices",
							"EntandoDatabaseService",
						),
					],
				),
				(
					"cert-manager.io/v1".to_string(),
					vec![MockApiResource::namespaced("certificates", "Certificate")],
				),
			]),
		}
	}
}

impl MockDiscovery {
	/// Stop serving a group version, e.g. `entando.org/v1`.
	pub fn without_group(mut self, group_version: &str) -> Self {
		self.group_resources.remove(group_version);
		self
	}

	/// Plural name and scope of a kind.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		let resources = if api_version.contains('/') {
			self.group_resources.get(api_version)?
		} else {
			&self.core_resources
		};
		resources.iter().find(|r| r.kind == kind)
	}
}

/// A mock API resource definition.
#[derive(Clone)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}

	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: ["create", "delete", "get", "list", "patch", "update", "watch"]
				.map(String::from)
				.to_vec(),
		}
	}
}
