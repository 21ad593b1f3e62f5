//! Idempotent apply of a set of resource records.
//!
//! Every record is read first and then patched if it exists or created if
//! it does not, so running the same pass twice converges instead of failing
//! on "already exists". Records are applied strictly one after another and
//! the first failure ends the pass. Resources applied before the failure
//! stay in the cluster.

use std::fmt;

use thiserror::Error;
use tracing::instrument;

use crate::{
	k8s::gateway::{ClusterGateway, GatewayError},
	record::{ResourceId, ResourceRecord},
};

/// Which write was issued for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	Created,
	Patched,
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Action::Created => write!(f, "created"),
			Action::Patched => write!(f, "patched"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
	Create,
	Patch,
}

impl fmt::Display for WriteKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WriteKind::Create => write!(f, "creating"),
			WriteKind::Patch => write!(f, "patching"),
		}
	}
}

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("Error while reading {id}")]
	Read {
		id: ResourceId,
		#[source]
		source: GatewayError,
	},

	#[error("Error while {kind} {id}")]
	Write {
		kind: WriteKind,
		id: ResourceId,
		#[source]
		source: GatewayError,
	},
}

impl ReconcileError {
	/// The resource the failure is about.
	pub fn id(&self) -> &ResourceId {
		match self {
			ReconcileError::Read { id, .. } | ReconcileError::Write { id, .. } => id,
		}
	}
}

/// Result of applying one resource.
#[derive(Debug)]
pub struct ResourceOutcome {
	pub id: ResourceId,
	pub result: Result<Action, ReconcileError>,
}

/// Outcome of one reconciliation pass.
///
/// Holds one entry per attempted resource, in attempt order. If a resource
/// failed it is the last entry.
#[derive(Debug, Default)]
pub struct ApplyReport {
	outcomes: Vec<ResourceOutcome>,
	skipped: usize,
}

impl ApplyReport {
	pub fn outcomes(&self) -> &[ResourceOutcome] {
		&self.outcomes
	}

	/// Number of resources created or patched.
	pub fn applied_count(&self) -> usize {
		self.outcomes.iter().filter(|o| o.result.is_ok()).count()
	}

	/// Number of documents that were not resources.
	pub fn skipped_count(&self) -> usize {
		self.skipped
	}

	pub fn count(&self, action: Action) -> usize {
		self.outcomes
			.iter()
			.filter(|o| matches!(o.result, Ok(a) if a == action))
			.count()
	}

	pub fn failure(&self) -> Option<&ReconcileError> {
		self.outcomes.iter().find_map(|o| o.result.as_ref().err())
	}

	/// Turn a failed pass into its error.
	pub fn into_result(mut self) -> Result<Self, ReconcileError> {
		if let Some(index) = self.outcomes.iter().position(|o| o.result.is_err()) {
			if let Err(e) = self.outcomes.swap_remove(index).result {
				return Err(e);
			}
		}
		Ok(self)
	}
}

/// Applies record sets through a [`ClusterGateway`].
pub struct Reconciler<'a> {
	gateway: &'a dyn ClusterGateway,
	default_namespace: String,
}

impl<'a> Reconciler<'a> {
	/// `default_namespace` is given to records that do not name one.
	pub fn new(gateway: &'a dyn ClusterGateway, default_namespace: impl Into<String>) -> Self {
		Self {
			gateway,
			default_namespace: default_namespace.into(),
		}
	}

	/// Apply `targets` in order.
	///
	/// Records without a namespace get the default namespace written into
	/// them, so a second pass over the same records sees the same identity.
	#[instrument(skip_all, fields(targets = targets.len(), namespace = %self.default_namespace))]
	pub async fn apply(&self, targets: &mut [ResourceRecord]) -> ApplyReport {
		let mut report = ApplyReport::default();

		for record in targets.iter_mut() {
			if !record.is_resource() {
				report.skipped += 1;
				continue;
			}
			record.default_namespace(&self.default_namespace);
			let Some(id) = record.id() else {
				report.skipped += 1;
				continue;
			};

			let result = self.apply_one(record, &id).await;
			let failed = result.is_err();
			report.outcomes.push(ResourceOutcome { id, result });
			if failed {
				break;
			}
		}

		tracing::debug!(
			applied = report.applied_count(),
			skipped = report.skipped,
			failed = report.failure().is_some(),
			"reconciliation pass finished"
		);
		report
	}

	#[instrument(skip_all, fields(resource = %id))]
	async fn apply_one(
		&self,
		record: &ResourceRecord,
		id: &ResourceId,
	) -> Result<Action, ReconcileError> {
		let existing = self
			.gateway
			.read_resource(id)
			.await
			.map_err(|source| ReconcileError::Read {
				id: id.clone(),
				source,
			})?;

		if existing.is_some() {
			tracing::info!(name = %id.name, "patching");
			return self.patch(record, id).await;
		}

		tracing::info!(name = %id.name, "creating");
		match self.gateway.create_resource(record).await {
			Ok(()) => Ok(Action::Created),
			// Created by someone else since the read
			Err(GatewayError::AlreadyExists(_)) => {
				tracing::debug!("resource appeared after read, patching instead");
				self.patch(record, id).await
			}
			Err(source) => Err(ReconcileError::Write {
				kind: WriteKind::Create,
				id: id.clone(),
				source,
			}),
		}
	}

	async fn patch(
		&self,
		record: &ResourceRecord,
		id: &ResourceId,
	) -> Result<Action, ReconcileError> {
		self.gateway
			.patch_resource(record)
			.await
			.map_err(|source| ReconcileError::Write {
				kind: WriteKind::Patch,
				id: id.clone(),
				source,
			})?;
		Ok(Action::Patched)
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use serde_json::json;

	use super::*;
	use crate::test_utils::{GatewayCall, InMemoryGateway};

	fn config_map(name: &str) -> ResourceRecord {
		ResourceRecord::new(json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": name},
			"data": {"key": name},
		}))
	}

	#[tokio::test]
	async fn test_second_pass_patches_instead_of_creating() {
		let gateway = InMemoryGateway::new();
		let reconciler = Reconciler::new(&gateway, "entando");
		let mut targets = vec![config_map("a"), config_map("b")];

		let first = reconciler.apply(&mut targets).await;
		assert!(first.failure().is_none());
		assert_eq!(first.count(Action::Created), 2);
		assert_eq!(first.count(Action::Patched), 0);

		let second = reconciler.apply(&mut targets).await;
		assert!(second.failure().is_none());
		assert_eq!(second.count(Action::Created), 0);
		assert_eq!(second.count(Action::Patched), 2);
		assert_eq!(gateway.resource_count(), 2);
	}

	#[tokio::test]
	async fn test_missing_namespace_is_defaulted_and_kept() {
		let gateway = InMemoryGateway::new();
		let reconciler = Reconciler::new(&gateway, "entando");
		let mut explicit = config_map("explicit");
		explicit.default_namespace("other");
		let mut targets = vec![config_map("implicit"), explicit];

		reconciler.apply(&mut targets).await.into_result().unwrap();
		assert_eq!(targets[0].namespace(), Some("entando"));
		assert_eq!(targets[1].namespace(), Some("other"));

		let other = Reconciler::new(&gateway, "elsewhere");
		let report = other.apply(&mut targets).await.into_result().unwrap();
		assert_eq!(targets[0].namespace(), Some("entando"));
		assert_eq!(report.count(Action::Patched), 2);
		assert!(gateway.contains(&ResourceId::new("v1", "ConfigMap", Some("entando"), "implicit")));
	}

	#[tokio::test]
	async fn test_non_resources_do_not_change_applied_count() {
		let gateway = InMemoryGateway::new();
		let reconciler = Reconciler::new(&gateway, "entando");

		let mut clean = vec![config_map("a"), config_map("b")];
		let mut noisy = vec![
			ResourceRecord::new(json!({"metadata": {"name": "no-kind"}})),
			config_map("a"),
			ResourceRecord::new(json!({"kind": "ConfigMap"})),
			config_map("b"),
			ResourceRecord::new(json!("scalar")),
		];

		let clean_report = reconciler.apply(&mut clean).await;
		let noisy_report = Reconciler::new(&InMemoryGateway::new(), "entando")
			.apply(&mut noisy)
			.await;
		assert_eq!(clean_report.applied_count(), noisy_report.applied_count());
		assert_eq!(noisy_report.skipped_count(), 3);
	}

	#[tokio::test]
	async fn test_create_failure_stops_the_pass() {
		let gateway = InMemoryGateway::new().reject_writes_to("b");
		let reconciler = Reconciler::new(&gateway, "entando");
		let mut targets = vec![config_map("a"), config_map("b"), config_map("c")];

		let report = reconciler.apply(&mut targets).await;
		assert_eq!(report.applied_count(), 1);
		assert_eq!(report.outcomes().len(), 2);

		let failure = report.failure().expect("pass should fail");
		assert_eq!(failure.id().name, "b");
		assert_matches!(failure, ReconcileError::Write { kind: WriteKind::Create, .. });
		assert_eq!(
			failure.to_string(),
			"Error while creating ConfigMap/b in namespace 'entando'"
		);

		let calls = gateway.calls();
		assert!(
			!calls.iter().any(|c| c.name() == "c"),
			"c must not be attempted: {calls:?}"
		);
		assert!(gateway.contains(&ResourceId::new("v1", "ConfigMap", Some("entando"), "a")));
	}

	#[tokio::test]
	async fn test_patch_failure_is_fatal() {
		let gateway = InMemoryGateway::new();
		let mut targets = vec![config_map("a"), config_map("b")];
		Reconciler::new(&gateway, "entando")
			.apply(&mut targets)
			.await
			.into_result()
			.unwrap();

		let gateway = gateway.reject_writes_to("a");
		let err = Reconciler::new(&gateway, "entando")
			.apply(&mut targets)
			.await
			.into_result()
			.unwrap_err();
		assert_matches!(
			err,
			ReconcileError::Write { kind: WriteKind::Patch, ref id, .. } if id.name == "a"
		);
	}

	#[tokio::test]
	async fn test_concurrent_create_converges_to_patch() {
		let gateway = InMemoryGateway::new().hide_from_reads("a");
		let mut targets = vec![config_map("a")];
		Reconciler::new(&gateway, "entando")
			.apply(&mut targets)
			.await
			.into_result()
			.unwrap();

		let report = Reconciler::new(&gateway, "entando")
			.apply(&mut targets)
			.await
			.into_result()
			.unwrap();
		assert_eq!(report.count(Action::Patched), 1);
		assert_eq!(
			gateway.calls().last(),
			Some(&GatewayCall::Patch("a".to_string()))
		);
	}
}
