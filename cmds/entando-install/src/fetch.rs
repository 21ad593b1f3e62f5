//! Retrieval of Entando release data over HTTP.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

pub const DEFAULT_TAGS_URL: &str =
	"https://api.github.com/repos/entando/entando-releases/tags?per_page=200";
pub const DEFAULT_RELEASES_BASE_URL: &str =
	"https://raw.githubusercontent.com/entando/entando-releases";

/// Deployment profile the manifests are taken from.
const PROFILE_DIR: &str = "dist/ge-1-1-6";

pub const CLUSTER_RESOURCES_FILE: &str = "cluster-resources.yaml";
pub const NAMESPACE_RESOURCES_FILE: &str = "namespace-resources.yaml";
pub const OPERATOR_CONFIG_FILE: &str = "entando-operator-config.yaml";

#[derive(Debug, Error)]
pub enum FetchError {
	#[error("Error fetching Entando tags")]
	Tags(#[source] reqwest::Error),

	#[error("Failed fetching {file} for Entando {version}")]
	Manifest {
		file: &'static str,
		version: String,
		#[source]
		source: reqwest::Error,
	},

	#[error("setting up the HTTP client")]
	Client(#[source] reqwest::Error),
}

#[derive(Deserialize)]
struct Tag {
	name: String,
}

/// The three manifests of one release, as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseManifests {
	pub cluster_resources: String,
	pub namespace_resources: String,
	pub operator_config: String,
}

/// Where release tags and manifests are downloaded from.
#[derive(Debug, Clone)]
pub struct ReleaseSource {
	client: reqwest::Client,
	tags_url: String,
	releases_base_url: String,
}

impl ReleaseSource {
	pub fn new(
		tags_url: impl Into<String>,
		releases_base_url: impl Into<String>,
	) -> Result<Self, FetchError> {
		let client = reqwest::Client::builder()
			// api.github.com refuses requests without one
			.user_agent(concat!("entando-install/", env!("CARGO_PKG_VERSION")))
			.timeout(Duration::from_secs(60))
			.build()
			.map_err(FetchError::Client)?;
		Ok(Self {
			client,
			tags_url: tags_url.into(),
			releases_base_url: releases_base_url.into().trim_end_matches('/').to_string(),
		})
	}

	/// Release tags, in the order the server lists them.
	#[instrument(skip(self), fields(url = %self.tags_url))]
	pub async fn fetch_tags(&self) -> Result<Vec<String>, FetchError> {
		let tags: Vec<Tag> = async {
			self.client
				.get(&self.tags_url)
				.send()
				.await?
				.error_for_status()?
				.json()
				.await
		}
		.await
		.map_err(FetchError::Tags)?;

		tracing::debug!(count = tags.len(), "fetched release tags");
		Ok(tags.into_iter().map(|t| t.name).collect())
	}

	pub fn manifest_url(&self, version: &str, file: &str) -> String {
		let dir = if file == OPERATOR_CONFIG_FILE {
			"samples"
		} else {
			"namespace-scoped-deployment"
		};
		format!(
			"{}/{version}/{PROFILE_DIR}/{dir}/{file}",
			self.releases_base_url
		)
	}

	#[instrument(skip(self))]
	pub async fn fetch_manifests(&self, version: &str) -> Result<ReleaseManifests, FetchError> {
		Ok(ReleaseManifests {
			cluster_resources: self.fetch_text(version, CLUSTER_RESOURCES_FILE).await?,
			namespace_resources: self.fetch_text(version, NAMESPACE_RESOURCES_FILE).await?,
			operator_config: self.fetch_text(version, OPERATOR_CONFIG_FILE).await?,
		})
	}

	async fn fetch_text(&self, version: &str, file: &'static str) -> Result<String, FetchError> {
		let url = self.manifest_url(version, file);
		tracing::debug!(%url, "fetching manifest");
		async {
			self.client
				.get(&url)
				.send()
				.await?
				.error_for_status()?
				.text()
				.await
		}
		.await
		.map_err(|source| FetchError::Manifest {
			file,
			version: version.to_string(),
			source,
		})
	}
}
