//! Parsed manifest documents.
//!
//! A [`ResourceRecord`] keeps the whole document as a json value, so fields
//! the installer does not care about (`spec`, `data`, `rules`, ...) travel to
//! the cluster untouched.

use std::fmt;

use serde_json::Value;

/// One parsed manifest document.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
	document: Value,
}

impl ResourceRecord {
	pub fn new(document: Value) -> Self {
		Self { document }
	}

	/// Whether this document describes a Kubernetes resource.
	///
	/// Documents without `kind`, `metadata` or `metadata.name` are not
	/// resources. Manifests from releases contain such documents (empty
	/// separators, commented-out templates), and they are skipped rather
	/// than reported.
	pub fn is_resource(&self) -> bool {
		self.kind().is_some()
			&& self.document.get("metadata").is_some_and(Value::is_object)
			&& self.name().is_some()
	}

	pub fn api_version(&self) -> Option<&str> {
		self.document.get("apiVersion").and_then(Value::as_str)
	}

	pub fn kind(&self) -> Option<&str> {
		self.document
			.get("kind")
			.and_then(Value::as_str)
			.filter(|k| !k.is_empty())
	}

	pub fn name(&self) -> Option<&str> {
		self.document
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.filter(|n| !n.is_empty())
	}

	pub fn namespace(&self) -> Option<&str> {
		self.document
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.filter(|n| !n.is_empty())
	}

	/// Set `metadata.namespace` if the document has none.
	///
	/// Returns `true` when the namespace was filled in.
	pub fn default_namespace(&mut self, namespace: &str) -> bool {
		if self.namespace().is_some() {
			return false;
		}
		let Some(Value::Object(metadata)) = self.document.get_mut("metadata") else {
			return false;
		};
		metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
		true
	}

	/// Identity of the resource, if this is a resource.
	pub fn id(&self) -> Option<ResourceId> {
		if !self.is_resource() {
			return None;
		}
		Some(ResourceId {
			api_version: self.api_version().unwrap_or_default().to_string(),
			kind: self.kind()?.to_string(),
			namespace: self.namespace().map(str::to_string),
			name: self.name()?.to_string(),
		})
	}

	pub fn document(&self) -> &Value {
		&self.document
	}

	pub fn document_mut(&mut self) -> &mut Value {
		&mut self.document
	}
}

/// Identity of a resource in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
	pub api_version: String,
	pub kind: String,
	pub namespace: Option<String>,
	pub name: String,
}

impl ResourceId {
	pub fn new(
		api_version: impl Into<String>,
		kind: impl Into<String>,
		namespace: Option<&str>,
		name: impl Into<String>,
	) -> Self {
		Self {
			api_version: api_version.into(),
			kind: kind.into(),
			namespace: namespace.map(str::to_string),
			name: name.into(),
		}
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.kind, self.name)?;
		if let Some(ns) = &self.namespace {
			write!(f, " in namespace '{ns}'")?;
		}
		Ok(())
	}
}
