//! Choosing the Entando release to install.

use thiserror::Error;

use crate::prompt::{PromptError, Prompter, DEFAULT_PAGE_SIZE};

#[derive(Debug, Error)]
pub enum VersionError {
	#[error("no Entando versions are available to choose from")]
	EmptyCatalog,

	#[error(transparent)]
	Prompt(#[from] PromptError),
}

/// Result of matching a requested version against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	/// The catalog entry to install.
	Matched(String),
	/// Nothing matched, the operator has to pick an entry.
	NeedsSelection { requested: Option<String> },
}

/// Match `requested` against `catalog`.
///
/// An exact match wins over a match with a `v` prefix added, so `1.0.0`
/// resolves to `v1.0.0` only when `1.0.0` itself is not a tag.
pub fn resolve(requested: Option<&str>, catalog: &[String]) -> Result<Resolution, VersionError> {
	if catalog.is_empty() {
		return Err(VersionError::EmptyCatalog);
	}
	let Some(requested) = requested else {
		return Ok(Resolution::NeedsSelection { requested: None });
	};

	if let Some(tag) = catalog.iter().find(|tag| *tag == requested) {
		return Ok(Resolution::Matched(tag.clone()));
	}
	let prefixed = format!("v{requested}");
	if let Some(tag) = catalog.iter().find(|tag| **tag == prefixed) {
		return Ok(Resolution::Matched(tag.clone()));
	}

	Ok(Resolution::NeedsSelection {
		requested: Some(requested.to_string()),
	})
}

/// Ask the operator to pick a version, catalog order preserved.
pub fn select_version(
	prompter: &mut dyn Prompter,
	catalog: &[String],
) -> Result<String, VersionError> {
	if catalog.is_empty() {
		return Err(VersionError::EmptyCatalog);
	}
	let index = prompter.select(
		"What version of Entando do you wish to install?",
		catalog,
		DEFAULT_PAGE_SIZE,
	)?;
	Ok(catalog[index].clone())
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;
	use crate::test_utils::{Answer, ScriptedPrompter};

	fn catalog() -> Vec<String> {
		vec!["v1.0.0".to_string(), "v2.0.0".to_string()]
	}

	#[rstest]
	#[case("1.0.0", "v1.0.0")]
	#[case("v2.0.0", "v2.0.0")]
	#[case("2.0.0", "v2.0.0")]
	fn test_matches(#[case] requested: &str, #[case] expected: &str) {
		assert_eq!(
			resolve(Some(requested), &catalog()).unwrap(),
			Resolution::Matched(expected.to_string())
		);
	}

	#[test]
	fn test_exact_match_wins_over_prefixed() {
		let catalog = vec!["v1.0".to_string(), "1.0".to_string()];
		assert_eq!(
			resolve(Some("1.0"), &catalog).unwrap(),
			Resolution::Matched("1.0".to_string())
		);
	}

	#[test]
	fn test_unknown_version_needs_selection() {
		assert_eq!(
			resolve(Some("9.9.9"), &catalog()).unwrap(),
			Resolution::NeedsSelection {
				requested: Some("9.9.9".to_string())
			}
		);
		assert_eq!(
			resolve(None, &catalog()).unwrap(),
			Resolution::NeedsSelection { requested: None }
		);
	}

	#[test]
	fn test_empty_catalog() {
		assert_matches!(resolve(Some("1.0.0"), &[]), Err(VersionError::EmptyCatalog));
		assert_matches!(resolve(None, &[]), Err(VersionError::EmptyCatalog));
	}

	#[test]
	fn test_selection_uses_fixed_page_size() {
		let mut prompter = ScriptedPrompter::new([Answer::Select("v2.0.0".to_string())]);
		let version = select_version(&mut prompter, &catalog()).unwrap();
		assert_eq!(version, "v2.0.0");
		assert_eq!(prompter.page_sizes, vec![DEFAULT_PAGE_SIZE]);
		assert_eq!(
			prompter.asked,
			vec!["What version of Entando do you wish to install?"]
		);
	}

	#[test]
	fn test_selection_from_empty_catalog() {
		let mut prompter = ScriptedPrompter::default();
		assert_matches!(
			select_version(&mut prompter, &[]),
			Err(VersionError::EmptyCatalog)
		);
		assert!(prompter.asked.is_empty());
	}
}
