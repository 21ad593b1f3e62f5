//! Parameters of one installation.

use bon::Builder;

/// Everything the operator decided for this installation.
///
/// Filled in step by step by the install command, then handed by reference
/// to manifest generation and the final apply.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(on(String, into))]
pub struct InstallParams {
	/// kubeconfig context the cluster was reached through.
	pub context: String,
	pub namespace: String,
	/// Release tag, as found in the catalog.
	pub version: String,
	pub project: String,
	/// Ingress hostname of the app.
	pub hostname: String,
	#[builder(default)]
	pub tls: bool,
	/// Installing on a local cluster (minikube, k3s...).
	#[builder(default)]
	pub local: bool,
}

impl InstallParams {
	pub fn environment(&self) -> &'static str {
		if self.local {
			"local environment"
		} else {
			"Kubernetes cluster"
		}
	}

	pub fn tls_secret_name(&self) -> String {
		format!("{}-tls-secret", self.project)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder_defaults() {
		let params = InstallParams::builder()
			.context("kind-entando")
			.namespace("entando")
			.version("v7.3.0")
			.project("demo")
			.hostname("demo.example.com")
			.build();
		assert!(!params.tls);
		assert!(!params.local);
		assert_eq!(params.environment(), "Kubernetes cluster");
		assert_eq!(params.tls_secret_name(), "demo-tls-secret");
	}
}
