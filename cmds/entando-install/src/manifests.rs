//! Project files generated for an installation.
//!
//! Every manifest is built as a structured document and serialized once.
//! Templates the operator may want to enable later are written as the same
//! YAML with every line commented out.

use std::{
	fs, io,
	path::{Path, PathBuf},
};

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{
	fetch::{NAMESPACE_RESOURCES_FILE, OPERATOR_CONFIG_FILE},
	params::InstallParams,
	yaml::{self, YamlError},
};

pub const POSTGRES_SECRET_FILE: &str = "postgres-secret.yaml";
pub const REDEPLOY_FILE: &str = "redeploy.yaml";

pub fn app_file(project: &str) -> String {
	format!("entando-{project}-app.yaml")
}

pub fn tls_cert_file(project: &str) -> String {
	format!("{project}-tls-cert.yaml")
}

#[derive(Debug, Error)]
pub enum GenerateError {
	#[error("the fetched entando-operator-config.yaml is not a mapping")]
	OperatorConfigShape,

	#[error("generating {file}")]
	Yaml {
		file: String,
		#[source]
		source: YamlError,
	},

	#[error("Error while creating folder '{}'", path.display())]
	CreateDir {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("Error while creating the file '{}'", path.display())]
	WriteFile {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
}

/// Name of the directory holding the files of one installation.
///
/// Date components are not zero padded.
pub fn project_folder_name(project: &str, namespace: &str, at: NaiveDateTime) -> String {
	format!(
		"entando-{project}-{namespace}-{}-{}-{}_{}_{}_{}",
		at.year(),
		at.month(),
		at.day(),
		at.hour(),
		at.minute(),
		at.second()
	)
}

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
	pub name: String,
	pub contents: String,
}

/// Build every project file, in writing order.
pub fn generate(
	params: &InstallParams,
	operator_config: &str,
	namespace_resources: &str,
) -> Result<Vec<GeneratedFile>, GenerateError> {
	let app_file = app_file(&params.project);
	let tls_file = tls_cert_file(&params.project);
	Ok(vec![
		GeneratedFile {
			name: OPERATOR_CONFIG_FILE.to_string(),
			contents: operator_config_file(params, operator_config)?,
		},
		GeneratedFile {
			contents: app_manifest(params).map_err(yaml_error(&app_file))?,
			name: app_file,
		},
		GeneratedFile {
			name: POSTGRES_SECRET_FILE.to_string(),
			contents: postgres_secret().map_err(yaml_error(POSTGRES_SECRET_FILE))?,
		},
		GeneratedFile {
			contents: tls_certificate(params).map_err(yaml_error(&tls_file))?,
			name: tls_file,
		},
		GeneratedFile {
			name: REDEPLOY_FILE.to_string(),
			contents: redeploy().map_err(yaml_error(REDEPLOY_FILE))?,
		},
		GeneratedFile {
			name: NAMESPACE_RESOURCES_FILE.to_string(),
			contents: namespace_resources.to_string(),
		},
	])
}

fn yaml_error(file: &str) -> impl FnOnce(YamlError) -> GenerateError + '_ {
	move |source| GenerateError::Yaml {
		file: file.to_string(),
		source,
	}
}

/// The fetched operator ConfigMap, with the keys the installer relies on
/// set, followed by the optional settings as comments.
pub fn operator_config_file(
	params: &InstallParams,
	fetched: &str,
) -> Result<String, GenerateError> {
	let mut config = yaml::parse_one_document(fetched).map_err(yaml_error(OPERATOR_CONFIG_FILE))?;
	let root = config
		.as_object_mut()
		.ok_or(GenerateError::OperatorConfigShape)?;
	let data = root
		.entry("data")
		.or_insert_with(|| Value::Object(Map::new()));
	if data.is_null() {
		*data = Value::Object(Map::new());
	}
	let data = data
		.as_object_mut()
		.ok_or(GenerateError::OperatorConfigShape)?;
	data.insert(
		"entando.requires.filesystem.group.override".to_string(),
		json!("true"),
	);
	data.insert("entando.ingress.class".to_string(), json!("nginx"));

	let mut out = yaml::serialize_document(&config).map_err(yaml_error(OPERATOR_CONFIG_FILE))?;
	out.push_str("\n# More..\n");
	out.push_str("#  entando.k8s.operator.image.pull.secrets: sample-pull-secret\n");
	out.push_str("#  entando.docker.registry.override: 'docker.io'\n");
	out.push_str(&toggled(
		&format!("  entando.tls.secret.name: {}\n", params.tls_secret_name()),
		params.tls,
	));
	out.push_str("#  entando.ca.secret.name: sample-ca-cert-secret\n");
	out.push_str("#  entando.assume.external.https.provider: 'true'\n");
	out.push_str(&toggled(
		"  entando.k8s.operator.impose.limits: 'true'\n",
		!params.local,
	));
	Ok(out)
}

fn toggled(line: &str, enabled: bool) -> String {
	if enabled {
		line.to_string()
	} else {
		format!("#{line}")
	}
}

/// Prefix every line with `#`.
fn commented(text: &str) -> String {
	text.lines().map(|line| format!("#{line}\n")).collect()
}

pub fn app_manifest(params: &InstallParams) -> Result<String, YamlError> {
	let app = json!({
		"apiVersion": "entando.org/v1",
		"kind": "EntandoApp",
		"metadata": {
			"namespace": params.namespace,
			"name": params.project,
		},
		"spec": {
			"dbms": "postgresql",
			"ingressHostName": params.hostname,
			"standardServerImage": "tomcat",
			"environmentVariables": [
				{"name": "MAX_RAM_PERCENTAGE", "value": "75"},
			],
			"replicas": 1,
			"resourceRequirements": {
				"requests": {"cpu": "100m", "memory": "448Mi"},
				"limits": {"cpu": "1500m", "memory": "3Gi"},
			},
		},
	});
	let database_service = json!({
		"apiVersion": "entando.org/v1",
		"kind": "EntandoDatabaseService",
		"metadata": {
			"name": format!("{}-ds", params.project),
			"annotations": {
				"entando.org/controller-image": "entando-k8s-database-service-controller",
				"entando.org/supported-capabilities": "mysql.dbms,oracle.dbms,postgresql.dbms,dbms",
			},
			"labels": {
				"entando.org/crd-of-interest": "EntandoDatabaseService",
			},
		},
		"spec": {
			"dbms": "postgresql",
			"provisioningStrategy": "UseExternal",
			"host": null,
			"port": 5432,
			"databaseName": format!("{}_db", params.project),
			"secretName": "postgresql-secret",
			"providedCapabilityScope": "Namespace",
			"replicas": 1,
		},
	});

	Ok(format!(
		"---\n{}---\n{}",
		yaml::serialize_document(&app)?,
		commented(&yaml::serialize_document(&database_service)?)
	))
}

pub fn postgres_secret() -> Result<String, YamlError> {
	let secret = json!({
		"apiVersion": "v1",
		"kind": "Secret",
		"metadata": {"name": "postgresql-secret"},
		"stringData": {"username": "postgres", "password": "postgres"},
	});
	Ok(commented(&yaml::serialize_document(&secret)?))
}

pub fn tls_certificate(params: &InstallParams) -> Result<String, YamlError> {
	let secret_name = params.tls_secret_name();
	yaml::serialize_document(&json!({
		"apiVersion": "cert-manager.io/v1",
		"kind": "Certificate",
		"metadata": {
			"name": secret_name,
			"namespace": params.namespace,
		},
		"spec": {
			"secretName": secret_name,
			"issuerRef": {
				"group": "cert-manager.io",
				"kind": "ClusterIssuer",
				"name": "letsencrypt-prod-cluster",
			},
			"dnsNames": [params.hostname],
			"usages": ["digital signature", "key encipherment"],
		},
	}))
}

/// Patch forcing the operator to process the app again.
pub fn redeploy() -> Result<String, YamlError> {
	yaml::serialize_document(&json!({
		"metadata": {
			"annotations": {"entando.org/processing-instruction": "force"},
		},
	}))
}

/// Create `parent/folder`, which must not exist yet. Returns its canonical
/// path.
pub fn create_project_dir(parent: &Path, folder: &str) -> Result<PathBuf, GenerateError> {
	let path = parent.join(folder);
	fs::create_dir(&path)
		.and_then(|()| path.canonicalize())
		.map_err(|source| GenerateError::CreateDir {
			path: PathBuf::from(folder),
			source,
		})
}

pub fn write_files(dir: &Path, files: &[GeneratedFile]) -> Result<(), GenerateError> {
	for file in files {
		let path = dir.join(&file.name);
		tracing::debug!(path = %path.display(), "writing project file");
		fs::write(&path, &file.contents)
			.map_err(|source| GenerateError::WriteFile { path, source })?;
	}
	Ok(())
}
