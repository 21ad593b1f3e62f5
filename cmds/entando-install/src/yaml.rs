//! YAML reading and writing of manifest documents.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::record::ResourceRecord;

#[derive(Debug, Error)]
pub enum YamlError {
	#[error("parsing YAML document {index}")]
	Parse {
		index: usize,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("serializing YAML document")]
	Serialize(#[source] serde_yaml::Error),
}

/// Parse a multi-document YAML stream.
///
/// Empty documents (separators, comment-only documents) are dropped. The
/// remaining documents are returned as records whether or not they describe
/// a resource; filtering is up to the consumer.
pub fn parse_all_documents(text: &str) -> Result<Vec<ResourceRecord>, YamlError> {
	let mut records = Vec::new();
	for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
		let value =
			Value::deserialize(document).map_err(|source| YamlError::Parse { index, source })?;
		if value.is_null() {
			continue;
		}
		records.push(ResourceRecord::new(value));
	}
	Ok(records)
}

/// Parse a single YAML document.
pub fn parse_one_document(text: &str) -> Result<Value, YamlError> {
	serde_yaml::from_str(text).map_err(|source| YamlError::Parse { index: 0, source })
}

/// Serialize a single document, keeping key order.
pub fn serialize_document(value: &Value) -> Result<String, YamlError> {
	serde_yaml::to_string(value).map_err(YamlError::Serialize)
}
