//! Waiting for cluster state the installation depends on.
//!
//! A [`Precondition`] is checked until it holds. Whenever it does not, the
//! operator is asked whether to fix it (create the namespace, install the
//! CRDs) or give up. There is no timeout and no backoff: progress only
//! depends on what the operator decides.

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use crate::{
	k8s::gateway::{ClusterGateway, GatewayError},
	prompt::{PromptError, Prompter},
	reconcile::{ReconcileError, Reconciler},
	record::ResourceRecord,
};

/// Why a precondition does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsatisfied {
	pub reason: String,
}

impl Unsatisfied {
	pub fn new(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
		}
	}
}

/// What to do after a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remedy {
	/// Something was done about it, check again.
	Retry,
	/// Stop the installation.
	Abort,
}

/// Final state of [`wait_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Waited<T> {
	Satisfied(T),
	Aborted,
}

#[async_trait]
pub trait Precondition: Send {
	type Output: Send;
	type Error: Send;

	async fn check(&mut self) -> Result<Self::Output, Unsatisfied>;

	/// Try to make the precondition hold, or decide to abort.
	async fn remedy(&mut self, unsatisfied: &Unsatisfied) -> Result<Remedy, Self::Error>;
}

/// Check `precondition` until it holds or its remedy aborts.
pub async fn wait_until<P: Precondition>(
	precondition: &mut P,
) -> Result<Waited<P::Output>, P::Error> {
	let mut attempt = 0usize;
	loop {
		attempt += 1;
		match precondition.check().await {
			Ok(output) => {
				tracing::debug!(attempt, "precondition satisfied");
				return Ok(Waited::Satisfied(output));
			}
			Err(unsatisfied) => {
				tracing::debug!(attempt, reason = %unsatisfied.reason, "precondition unsatisfied");
				match precondition.remedy(&unsatisfied).await? {
					Remedy::Retry => continue,
					Remedy::Abort => return Ok(Waited::Aborted),
				}
			}
		}
	}
}

#[derive(Debug, Error)]
pub enum PreconditionError {
	#[error(transparent)]
	Prompt(#[from] PromptError),

	#[error("Error while creating namespace '{namespace}'")]
	CreateNamespace {
		namespace: String,
		#[source]
		source: GatewayError,
	},

	#[error("installing the Entando CRDs")]
	InstallCrds(#[source] ReconcileError),
}

/// The target namespace exists. The remedy offers to create it.
pub struct NamespaceExists<'a> {
	gateway: &'a dyn ClusterGateway,
	prompter: &'a mut dyn Prompter,
	namespace: &'a str,
}

impl<'a> NamespaceExists<'a> {
	pub fn new(
		gateway: &'a dyn ClusterGateway,
		prompter: &'a mut dyn Prompter,
		namespace: &'a str,
	) -> Self {
		Self {
			gateway,
			prompter,
			namespace,
		}
	}
}

#[async_trait]
impl Precondition for NamespaceExists<'_> {
	type Output = ();
	type Error = PreconditionError;

	#[instrument(skip(self), fields(namespace = %self.namespace))]
	async fn check(&mut self) -> Result<(), Unsatisfied> {
		match self.gateway.read_namespace(self.namespace).await {
			Ok(Some(_)) => Ok(()),
			Ok(None) => Err(Unsatisfied::new(format!(
				"namespace '{}' does not exist",
				self.namespace
			))),
			Err(e) => {
				tracing::debug!(error = %e, "reading namespace failed");
				Err(Unsatisfied::new(format!(
					"namespace '{}' could not be read",
					self.namespace
				)))
			}
		}
	}

	async fn remedy(&mut self, _unsatisfied: &Unsatisfied) -> Result<Remedy, PreconditionError> {
		let create = self.prompter.confirm(&format!(
			"The namespace '{}' does not exist. Do you want to create it?",
			self.namespace
		))?;
		if !create {
			return Ok(Remedy::Abort);
		}

		tracing::info!(namespace = %self.namespace, "creating namespace");
		match self.gateway.create_namespace(self.namespace).await {
			// Someone else created it meanwhile, the next check will see it
			Ok(()) | Err(GatewayError::AlreadyExists(_)) => Ok(Remedy::Retry),
			Err(source) => Err(PreconditionError::CreateNamespace {
				namespace: self.namespace.to_string(),
				source,
			}),
		}
	}
}

/// Every resource of a cluster-resources set (the CRDs) can be read. The
/// remedy offers to apply the whole set.
pub struct CrdsInstalled<'a> {
	reconciler: &'a Reconciler<'a>,
	gateway: &'a dyn ClusterGateway,
	prompter: &'a mut dyn Prompter,
	crds: &'a mut [ResourceRecord],
}

impl<'a> CrdsInstalled<'a> {
	pub fn new(
		reconciler: &'a Reconciler<'a>,
		gateway: &'a dyn ClusterGateway,
		prompter: &'a mut dyn Prompter,
		crds: &'a mut [ResourceRecord],
	) -> Self {
		Self {
			reconciler,
			gateway,
			prompter,
			crds,
		}
	}
}

#[async_trait]
impl Precondition for CrdsInstalled<'_> {
	type Output = ();
	type Error = PreconditionError;

	#[instrument(skip(self), fields(crds = self.crds.len()))]
	async fn check(&mut self) -> Result<(), Unsatisfied> {
		tracing::info!("checking Entando CRDs");
		for id in self.crds.iter().filter_map(ResourceRecord::id) {
			match self.gateway.read_resource(&id).await {
				Ok(Some(_)) => {}
				Ok(None) => return Err(Unsatisfied::new(format!("{} not found", id.name))),
				Err(e) => {
					tracing::debug!(error = %e, resource = %id, "reading CRD failed");
					return Err(Unsatisfied::new(format!("{} not found", id.name)));
				}
			}
		}
		Ok(())
	}

	async fn remedy(&mut self, unsatisfied: &Unsatisfied) -> Result<Remedy, PreconditionError> {
		tracing::info!(reason = %unsatisfied.reason, "Entando CRDs are missing");
		let install = self.prompter.confirm(
			"One or more of the Entando CRDs are missing. \
			 Do you have cluster permission and do you want to install them?",
		)?;
		if !install {
			return Ok(Remedy::Abort);
		}

		self.reconciler
			.apply(&mut *self.crds)
			.await
			.into_result()
			.map_err(PreconditionError::InstallCrds)?;
		Ok(Remedy::Retry)
	}
}
