//! Kubernetes cluster connection management.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("your kubeconfig does not define any context. Please check your $KUBECONFIG")]
	NoContexts,

	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// Contexts known to a kubeconfig, in file order.
pub fn context_names(kubeconfig: &Kubeconfig) -> Vec<String> {
	kubeconfig.contexts.iter().map(|c| c.name.clone()).collect()
}

/// The context a kubeconfig selects by default, if it exists.
pub fn current_context(kubeconfig: &Kubeconfig) -> Option<&str> {
	let current = kubeconfig.current_context.as_deref()?;
	kubeconfig
		.contexts
		.iter()
		.any(|c| c.name == current)
		.then_some(current)
}

/// Server URL of the cluster a context points at.
pub fn cluster_server<'a>(kubeconfig: &'a Kubeconfig, context: &str) -> Option<&'a str> {
	let cluster = kubeconfig
		.contexts
		.iter()
		.find(|c| c.name == context)?
		.context
		.as_ref()?
		.cluster
		.as_str();
	kubeconfig
		.clusters
		.iter()
		.find(|c| c.name == cluster)?
		.cluster
		.as_ref()?
		.server
		.as_deref()
}

/// Represents a connection to a Kubernetes cluster through one kubeconfig context.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	server_version: Info,
	context: String,
	cluster_url: String,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("cluster_url", &self.cluster_url)
			.field("server_version", &self.server_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect using the kubeconfig from the default locations.
	#[instrument(skip_all)]
	pub async fn connect(context: &str) -> Result<Self, ConnectionError> {
		let kubeconfig = Kubeconfig::read()?;
		Self::connect_with_kubeconfig(kubeconfig, context).await
	}

	/// Connect to the cluster behind `context` of the given kubeconfig.
	///
	/// The context switch only affects this process; the kubeconfig on disk is
	/// left as it is.
	#[instrument(skip(kubeconfig))]
	pub async fn connect_with_kubeconfig(
		kubeconfig: Kubeconfig,
		context: &str,
	) -> Result<Self, ConnectionError> {
		if kubeconfig.contexts.is_empty() {
			return Err(ConnectionError::NoContexts);
		}
		if !kubeconfig.contexts.iter().any(|c| c.name == context) {
			return Err(ConnectionError::ContextNotFound(context.to_string()));
		}

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(context.to_string()),
				..Default::default()
			},
		)
		.await?;
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);
		let cluster_url = config.cluster_url.to_string();

		let client = Client::try_from(config)?;
		let server_version = client.apiserver_version().await?;

		tracing::debug!(
			context = %context,
			cluster_url = %cluster_url,
			server_version = %format!("{}.{}", server_version.major, server_version.minor),
			"connected to cluster"
		);

		Ok(Self {
			client,
			server_version,
			context: context.to_string(),
			cluster_url,
		})
	}

	/// Get a reference to the underlying kube client.
	pub fn client(&self) -> &Client {
		&self.client
	}

	pub fn server_version(&self) -> &Info {
		&self.server_version
	}

	/// Name of the kubeconfig context in use.
	pub fn context(&self) -> &str {
		&self.context
	}

	pub fn cluster_url(&self) -> &str {
		&self.cluster_url
	}
}
