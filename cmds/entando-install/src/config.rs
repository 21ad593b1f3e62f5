//! Configuration file support.
//!
//! A `.entando-install.yaml` file placed anywhere in the directory hierarchy
//! provides defaults for the installer's questions. The installer searches
//! from the current directory upward to the filesystem root. Command line
//! flags take precedence over the file.

use std::{
	fs,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::fetch::{DEFAULT_RELEASES_BASE_URL, DEFAULT_TAGS_URL};

/// The name of the config file the installer looks for
pub const CONFIG_FILE_NAME: &str = ".entando-install.yaml";

/// Answers given ahead of time. Unset fields are asked interactively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstallerConfig {
	#[serde(default)]
	pub entando_version: Option<String>,
	#[serde(default)]
	pub namespace: Option<String>,
	#[serde(default)]
	pub project: Option<String>,
	#[serde(default)]
	pub hostname: Option<String>,
	#[serde(default)]
	pub tls: Option<bool>,
	#[serde(default)]
	pub local: Option<bool>,
	/// kubeconfig context to use without asking.
	#[serde(default)]
	pub context: Option<String>,

	#[serde(default)]
	pub release_source: ReleaseSourceConfig,
}

/// Where releases come from, for mirrors and air-gapped setups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReleaseSourceConfig {
	#[serde(default)]
	pub tags_url: Option<String>,
	#[serde(default)]
	pub releases_base_url: Option<String>,
}

impl ReleaseSourceConfig {
	pub fn tags_url(&self) -> &str {
		self.tags_url.as_deref().unwrap_or(DEFAULT_TAGS_URL)
	}

	pub fn releases_base_url(&self) -> &str {
		self.releases_base_url
			.as_deref()
			.unwrap_or(DEFAULT_RELEASES_BASE_URL)
	}
}

impl InstallerConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>> {
		if let Some(config_path) = find_config_file(start_dir) {
			tracing::debug!(path = %config_path.display(), "loading config file");
			let config = Self::load_from_file(&config_path)?;
			Ok(Some(config))
		} else {
			Ok(None)
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)
			.with_context(|| format!("failed to read config file: {}", path.display()))?;
		let value: serde_yaml::Value = serde_yaml::from_str(&content)
			.with_context(|| format!("failed to parse config file: {}", path.display()))?;
		// A file holding only comments is a valid, empty config
		if value.is_null() {
			return Ok(Self::default());
		}
		let config: InstallerConfig = serde_yaml::from_value(value)
			.with_context(|| format!("failed to parse config file: {}", path.display()))?;
		Ok(config)
	}

	/// Merge `overrides` over this config. Fields set there win.
	pub fn merge_from(&mut self, overrides: InstallerConfig) {
		fn take<T>(target: &mut Option<T>, value: Option<T>) {
			if value.is_some() {
				*target = value;
			}
		}

		take(&mut self.entando_version, overrides.entando_version);
		take(&mut self.namespace, overrides.namespace);
		take(&mut self.project, overrides.project);
		take(&mut self.hostname, overrides.hostname);
		take(&mut self.tls, overrides.tls);
		take(&mut self.local, overrides.local);
		take(&mut self.context, overrides.context);
		take(
			&mut self.release_source.tags_url,
			overrides.release_source.tags_url,
		);
		take(
			&mut self.release_source.releases_base_url,
			overrides.release_source.releases_base_url,
		);
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let mut current = start_dir.to_path_buf();

	// Canonicalize if possible to handle relative paths
	if let Ok(canonical) = current.canonicalize() {
		current = canonical;
	}

	loop {
		let config_path = current.join(CONFIG_FILE_NAME);
		if config_path.is_file() {
			return Some(config_path);
		}

		match current.parent() {
			Some(parent) if parent != current => current = parent.to_path_buf(),
			_ => break,
		}
	}

	None
}
