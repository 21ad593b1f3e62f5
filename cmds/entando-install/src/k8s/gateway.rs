//! Reading and writing single resources in the cluster.
//!
//! [`ClusterGateway`] is the capability set the installer needs from a
//! cluster. [`KubeGateway`] implements it with dynamic objects, so any kind
//! found in a release manifest can be handled without generated types.

use async_trait::async_trait;
use k8s_openapi::{api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::{
	api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams},
	discovery::ApiResource,
	Client,
};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use super::{
	discovery::{gvk_from_api_version, ApiResourceCache, DiscoveredResource, DiscoveryError},
	ResourceScope,
};
use crate::record::{ResourceId, ResourceRecord};

#[derive(Debug, Error)]
pub enum GatewayError {
	#[error("{0} already exists")]
	AlreadyExists(String),

	#[error("the cluster rejected the request ({code}): {message}")]
	Rejected { code: u16, message: String },

	#[error("manifest is not a resource (missing kind, metadata or name)")]
	NotAResource,

	#[error(transparent)]
	Discovery(#[from] DiscoveryError),

	#[error("converting manifest to DynamicObject")]
	ManifestConversion(#[source] serde_json::Error),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

impl GatewayError {
	/// Whether the error means the resource type does not exist in the cluster.
	pub fn is_unknown_type(&self) -> bool {
		matches!(
			self,
			GatewayError::Discovery(DiscoveryError::UnknownResourceType { .. })
		)
	}

	fn from_write(err: kube::Error, what: &str) -> Self {
		match err {
			kube::Error::Api(e) if e.code == 409 => GatewayError::AlreadyExists(what.to_string()),
			kube::Error::Api(e) => GatewayError::Rejected {
				code: e.code,
				message: e.message.clone(),
			},
			other => GatewayError::Kube(other),
		}
	}
}

/// Read/create/patch access to a live cluster.
///
/// Absence is not an error: reads return `Ok(None)` when the object does
/// not exist.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
	async fn read_namespace(&self, name: &str) -> Result<Option<Namespace>, GatewayError>;

	async fn create_namespace(&self, name: &str) -> Result<(), GatewayError>;

	/// Read a resource by identity. A kind the cluster does not serve reads
	/// as absent.
	async fn read_resource(&self, id: &ResourceId) -> Result<Option<Value>, GatewayError>;

	async fn create_resource(&self, record: &ResourceRecord) -> Result<(), GatewayError>;

	/// Patch an existing resource with the full desired document.
	async fn patch_resource(&self, record: &ResourceRecord) -> Result<(), GatewayError>;

	async fn list_resources(
		&self,
		api_version: &str,
		kind: &str,
		namespace: &str,
	) -> Result<Vec<Value>, GatewayError>;
}

/// [`ClusterGateway`] backed by a kube client.
pub struct KubeGateway {
	client: Client,
	api_cache: ApiResourceCache,
}

impl KubeGateway {
	pub fn new(client: Client) -> Self {
		Self {
			client,
			api_cache: ApiResourceCache::new(),
		}
	}

	async fn discover(
		&self,
		api_version: &str,
		kind: &str,
	) -> Result<DiscoveredResource, GatewayError> {
		let gvk = gvk_from_api_version(api_version, kind);
		Ok(self.api_cache.resolve(&self.client, &gvk).await?)
	}

	/// Create a dynamic API for the given resource.
	///
	/// The namespace is ignored for cluster-wide kinds, so defaulting a
	/// namespace on a CRD or ClusterRole is harmless.
	fn dynamic_api(
		&self,
		discovered: &DiscoveredResource,
		namespace: Option<&str>,
	) -> Api<DynamicObject> {
		let ar: &ApiResource = &discovered.api_resource;
		match (discovered.scope, namespace) {
			(ResourceScope::Namespaced, Some(ns)) => {
				Api::namespaced_with(self.client.clone(), ns, ar)
			}
			(ResourceScope::Namespaced, None) => {
				Api::default_namespaced_with(self.client.clone(), ar)
			}
			(ResourceScope::ClusterWide, _) => Api::all_with(self.client.clone(), ar),
		}
	}

	async fn api_for(&self, id: &ResourceId) -> Result<Api<DynamicObject>, GatewayError> {
		let discovered = self.discover(&id.api_version, &id.kind).await?;
		Ok(self.dynamic_api(&discovered, id.namespace.as_deref()))
	}
}

#[async_trait]
impl ClusterGateway for KubeGateway {
	#[instrument(skip(self))]
	async fn read_namespace(&self, name: &str) -> Result<Option<Namespace>, GatewayError> {
		let api: Api<Namespace> = Api::all(self.client.clone());
		Ok(api.get_opt(name).await?)
	}

	#[instrument(skip(self))]
	async fn create_namespace(&self, name: &str) -> Result<(), GatewayError> {
		let api: Api<Namespace> = Api::all(self.client.clone());
		let namespace = Namespace {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				..Default::default()
			},
			..Default::default()
		};
		api.create(&PostParams::default(), &namespace)
			.await
			.map_err(|e| GatewayError::from_write(e, &format!("namespace '{name}'")))?;
		Ok(())
	}

	#[instrument(skip(self), fields(resource = %id))]
	async fn read_resource(&self, id: &ResourceId) -> Result<Option<Value>, GatewayError> {
		let api = match self.api_for(id).await {
			Ok(api) => api,
			Err(e) if e.is_unknown_type() => {
				tracing::debug!("resource type is unknown, treating resource as absent");
				return Ok(None);
			}
			Err(e) => return Err(e),
		};
		let found = api.get_opt(&id.name).await?;
		found
			.map(|obj| serde_json::to_value(obj).map_err(GatewayError::ManifestConversion))
			.transpose()
	}

	#[instrument(skip_all, fields(name = record.name().unwrap_or("unknown")))]
	async fn create_resource(&self, record: &ResourceRecord) -> Result<(), GatewayError> {
		let id = record.id().ok_or(GatewayError::NotAResource)?;
		let api = self.api_for(&id).await?;

		let obj: DynamicObject = serde_json::from_value(record.document().clone())
			.map_err(GatewayError::ManifestConversion)?;
		api.create(&PostParams::default(), &obj)
			.await
			.map_err(|e| GatewayError::from_write(e, &id.to_string()))?;
		Ok(())
	}

	#[instrument(skip_all, fields(name = record.name().unwrap_or("unknown")))]
	async fn patch_resource(&self, record: &ResourceRecord) -> Result<(), GatewayError> {
		let id = record.id().ok_or(GatewayError::NotAResource)?;
		let api = self.api_for(&id).await?;
		let params = PatchParams::default();
		let manifest = record.document();

		// Custom resources do not support strategic merge
		match api
			.patch(&id.name, &params, &Patch::Strategic(manifest))
			.await
		{
			Ok(_) => Ok(()),
			Err(kube::Error::Api(ref err)) if err.code == 415 => {
				api.patch(&id.name, &params, &Patch::Merge(manifest))
					.await
					.map_err(|e| GatewayError::from_write(e, &id.to_string()))?;
				Ok(())
			}
			Err(e) => Err(GatewayError::from_write(e, &id.to_string())),
		}
	}

	#[instrument(skip(self))]
	async fn list_resources(
		&self,
		api_version: &str,
		kind: &str,
		namespace: &str,
	) -> Result<Vec<Value>, GatewayError> {
		let discovered = match self.discover(api_version, kind).await {
			Ok(discovered) => discovered,
			Err(e) if e.is_unknown_type() => return Ok(Vec::new()),
			Err(e) => return Err(e),
		};
		let api = self.dynamic_api(&discovered, Some(namespace));
		let list = api.list(&ListParams::default()).await?;
		list.items
			.into_iter()
			.map(|obj| serde_json::to_value(obj).map_err(GatewayError::ManifestConversion))
			.collect()
	}
}
