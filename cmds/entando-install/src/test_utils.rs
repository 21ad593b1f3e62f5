//! Common test utilities.

use std::{
	collections::{BTreeSet, HashMap, HashSet, VecDeque},
	sync::Mutex,
};

use async_trait::async_trait;
use k8s_openapi::{api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use serde_json::Value;

use crate::{
	k8s::gateway::{ClusterGateway, GatewayError},
	prompt::{PromptError, Prompter},
	record::{ResourceId, ResourceRecord},
};

/// A call received by [`InMemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
	ReadNamespace(String),
	CreateNamespace(String),
	Read(String),
	Create(String),
	Patch(String),
	List(String),
}

impl GatewayCall {
	/// The namespace, resource name or listed kind the call was about.
	pub fn name(&self) -> &str {
		match self {
			GatewayCall::ReadNamespace(n)
			| GatewayCall::CreateNamespace(n)
			| GatewayCall::Read(n)
			| GatewayCall::Create(n)
			| GatewayCall::Patch(n)
			| GatewayCall::List(n) => n,
		}
	}
}

#[derive(Default)]
struct State {
	namespaces: BTreeSet<String>,
	resources: HashMap<ResourceId, Value>,
	/// Namespaces whose next read finds nothing.
	stale_namespaces: HashSet<String>,
	calls: Vec<GatewayCall>,
}

/// A cluster kept in memory.
///
/// Knows every kind, records every call, and can be told to reject writes
/// to chosen resource names.
#[derive(Default)]
pub struct InMemoryGateway {
	state: Mutex<State>,
	rejected: HashSet<String>,
	hidden: HashSet<String>,
	reject_namespaces: bool,
}

impl InMemoryGateway {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_namespace(self, name: &str) -> Self {
		self.state
			.lock()
			.unwrap()
			.namespaces
			.insert(name.to_string());
		self
	}

	pub fn with_resource(self, record: &ResourceRecord) -> Self {
		let id = record.id().expect("test resource must be a resource");
		self.state
			.lock()
			.unwrap()
			.resources
			.insert(id, record.document().clone());
		self
	}

	/// Fail creates and patches of resources with this name.
	pub fn reject_writes_to(mut self, name: &str) -> Self {
		self.rejected.insert(name.to_string());
		self
	}

	/// Fail namespace creation.
	pub fn reject_namespaces(mut self) -> Self {
		self.reject_namespaces = true;
		self
	}

	/// Reads of resources with this name always find nothing, as if another
	/// client created them between our read and our write.
	pub fn hide_from_reads(mut self, name: &str) -> Self {
		self.hidden.insert(name.to_string());
		self
	}

	/// The next read of this namespace finds nothing, as if another client
	/// created it right after our read.
	pub fn hide_namespace_once(self, name: &str) -> Self {
		self.state
			.lock()
			.unwrap()
			.stale_namespaces
			.insert(name.to_string());
		self
	}

	pub fn calls(&self) -> Vec<GatewayCall> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn resource_count(&self) -> usize {
		self.state.lock().unwrap().resources.len()
	}

	pub fn contains(&self, id: &ResourceId) -> bool {
		self.state.lock().unwrap().resources.contains_key(id)
	}

	pub fn has_namespace(&self, name: &str) -> bool {
		self.state.lock().unwrap().namespaces.contains(name)
	}

	fn record(&self, call: GatewayCall) {
		self.state.lock().unwrap().calls.push(call);
	}

	fn check_write(&self, name: &str) -> Result<(), GatewayError> {
		if self.rejected.contains(name) {
			return Err(GatewayError::Rejected {
				code: 422,
				message: format!("{name} is invalid"),
			});
		}
		Ok(())
	}
}

#[async_trait]
impl ClusterGateway for InMemoryGateway {
	async fn read_namespace(&self, name: &str) -> Result<Option<Namespace>, GatewayError> {
		self.record(GatewayCall::ReadNamespace(name.to_string()));
		let mut state = self.state.lock().unwrap();
		let exists = !state.stale_namespaces.remove(name) && state.namespaces.contains(name);
		Ok(exists.then(|| Namespace {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				..Default::default()
			},
			..Default::default()
		}))
	}

	async fn create_namespace(&self, name: &str) -> Result<(), GatewayError> {
		self.record(GatewayCall::CreateNamespace(name.to_string()));
		if self.reject_namespaces {
			return Err(GatewayError::Rejected {
				code: 403,
				message: "namespaces is forbidden".to_string(),
			});
		}
		let mut state = self.state.lock().unwrap();
		if !state.namespaces.insert(name.to_string()) {
			return Err(GatewayError::AlreadyExists(format!("namespace '{name}'")));
		}
		Ok(())
	}

	async fn read_resource(&self, id: &ResourceId) -> Result<Option<Value>, GatewayError> {
		self.record(GatewayCall::Read(id.name.clone()));
		if self.hidden.contains(&id.name) {
			return Ok(None);
		}
		Ok(self.state.lock().unwrap().resources.get(id).cloned())
	}

	async fn create_resource(&self, record: &ResourceRecord) -> Result<(), GatewayError> {
		let id = record.id().ok_or(GatewayError::NotAResource)?;
		self.record(GatewayCall::Create(id.name.clone()));
		self.check_write(&id.name)?;

		let mut state = self.state.lock().unwrap();
		if state.resources.contains_key(&id) {
			return Err(GatewayError::AlreadyExists(id.to_string()));
		}
		state.resources.insert(id, record.document().clone());
		Ok(())
	}

	async fn patch_resource(&self, record: &ResourceRecord) -> Result<(), GatewayError> {
		let id = record.id().ok_or(GatewayError::NotAResource)?;
		self.record(GatewayCall::Patch(id.name.clone()));
		self.check_write(&id.name)?;

		self.state
			.lock()
			.unwrap()
			.resources
			.insert(id, record.document().clone());
		Ok(())
	}

	async fn list_resources(
		&self,
		api_version: &str,
		kind: &str,
		namespace: &str,
	) -> Result<Vec<Value>, GatewayError> {
		self.record(GatewayCall::List(kind.to_string()));
		let state = self.state.lock().unwrap();
		Ok(state
			.resources
			.iter()
			.filter(|(id, _)| {
				id.api_version == api_version
					&& id.kind == kind
					&& id.namespace.as_deref() == Some(namespace)
			})
			.map(|(_, v)| v.clone())
			.collect())
	}
}

/// One scripted answer for [`ScriptedPrompter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
	Confirm(bool),
	Input(String),
	/// Pick the choice with this text.
	Select(String),
}

/// A [`Prompter`] replaying a fixed list of answers.
///
/// Panics when the flow asks a question of a different type than scripted,
/// or asks more questions than scripted.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
	answers: VecDeque<Answer>,
	/// Every message asked, in order.
	pub asked: Vec<String>,
	/// Page size requested by each select.
	pub page_sizes: Vec<usize>,
}

impl ScriptedPrompter {
	pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
		Self {
			answers: answers.into_iter().collect(),
			..Self::default()
		}
	}

	pub fn remaining(&self) -> usize {
		self.answers.len()
	}

	fn next(&mut self, message: &str) -> Answer {
		self.asked.push(message.to_string());
		self.answers
			.pop_front()
			.unwrap_or_else(|| panic!("no scripted answer for {message:?}"))
	}
}

impl Prompter for ScriptedPrompter {
	fn confirm(&mut self, message: &str) -> Result<bool, PromptError> {
		match self.next(message) {
			Answer::Confirm(yes) => Ok(yes),
			other => panic!("expected a confirm answer for {message:?}, got {other:?}"),
		}
	}

	fn input(&mut self, message: &str) -> Result<String, PromptError> {
		match self.next(message) {
			Answer::Input(text) => Ok(text),
			other => panic!("expected an input answer for {message:?}, got {other:?}"),
		}
	}

	fn select(
		&mut self,
		message: &str,
		choices: &[String],
		page_size: usize,
	) -> Result<usize, PromptError> {
		self.page_sizes.push(page_size);
		match self.next(message) {
			Answer::Select(text) => Ok(choices
				.iter()
				.position(|c| *c == text)
				.unwrap_or_else(|| panic!("{text:?} is not among {choices:?}"))),
			other => panic!("expected a select answer for {message:?}, got {other:?}"),
		}
	}
}
