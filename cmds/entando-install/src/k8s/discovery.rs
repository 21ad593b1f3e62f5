//! Kubernetes API resource discovery and caching.
//!
//! Kinds are discovered one at a time, on first use. Release manifests
//! install CRDs and then use the kinds they define, so a kind that is
//! unknown now may become known later in the same run: failed lookups are
//! never cached.

use std::{
	collections::HashMap,
	sync::{Mutex, PoisonError},
};

use kube::{
	core::GroupVersionKind,
	discovery::{oneshot::pinned_kind, ApiResource, Scope},
	Client,
};
use thiserror::Error;
use tracing::instrument;

use super::ResourceScope;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("unknown resource type: {api_version}/{kind}")]
	UnknownResourceType { api_version: String, kind: String },

	#[error("failed to discover resource {api_version}/{kind}")]
	ResourceDiscovery {
		api_version: String,
		kind: String,
		#[source]
		source: Box<kube::Error>,
	},
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	GroupVersionKind::gvk(group, version, kind)
}

/// Discovered API resource with its scope.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
}

/// Lazily filled cache of discovered API resources.
#[derive(Default)]
pub struct ApiResourceCache {
	resources: Mutex<HashMap<GroupVersionKind, DiscoveredResource>>,
}

impl ApiResourceCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Look up a resource, asking the cluster if it was not seen yet.
	#[instrument(skip(self, client), fields(api_version = %gvk.api_version(), kind = %gvk.kind))]
	pub async fn resolve(
		&self,
		client: &Client,
		gvk: &GroupVersionKind,
	) -> Result<DiscoveredResource, DiscoveryError> {
		if let Some(found) = self.lookup(gvk) {
			return Ok(found);
		}

		tracing::debug!("discovering resource");
		let (api_resource, capabilities) = match pinned_kind(client, gvk).await {
			Ok(found) => found,
			Err(kube::Error::Discovery(e)) => {
				tracing::debug!(error = %e, "resource type is not served");
				return Err(DiscoveryError::UnknownResourceType {
					api_version: gvk.api_version(),
					kind: gvk.kind.clone(),
				});
			}
			Err(kube::Error::Api(e)) if e.code == 404 => {
				return Err(DiscoveryError::UnknownResourceType {
					api_version: gvk.api_version(),
					kind: gvk.kind.clone(),
				});
			}
			Err(e) => {
				return Err(DiscoveryError::ResourceDiscovery {
					api_version: gvk.api_version(),
					kind: gvk.kind.clone(),
					source: Box::new(e),
				})
			}
		};

		let scope = match capabilities.scope {
			Scope::Namespaced => ResourceScope::Namespaced,
			Scope::Cluster => ResourceScope::ClusterWide,
		};
		let discovered = DiscoveredResource {
			api_resource,
			scope,
		};

		self.resources
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(gvk.clone(), discovered.clone());
		Ok(discovered)
	}

	/// Look up an already discovered resource.
	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<DiscoveredResource> {
		self.resources
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(gvk)
			.cloned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_gvk_from_group_api_version() {
		let gvk = gvk_from_api_version("entando.org/v1", "EntandoApp");
		assert_eq!(gvk.group, "entando.org");
		assert_eq!(gvk.version, "v1");
		assert_eq!(gvk.kind, "EntandoApp");
		assert_eq!(gvk.api_version(), "entando.org/v1");
	}

	#[test]
	fn test_gvk_from_core_api_version() {
		let gvk = gvk_from_api_version("v1", "ConfigMap");
		assert_eq!(gvk.group, "");
		assert_eq!(gvk.version, "v1");
		assert_eq!(gvk.api_version(), "v1");
	}

	#[test]
	fn test_empty_cache_lookup_misses() {
		let cache = ApiResourceCache::new();
		assert!(cache
			.lookup(&GroupVersionKind::gvk("", "v1", "Secret"))
			.is_none());
	}
}
