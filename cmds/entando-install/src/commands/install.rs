//! Install command handler.
//!
//! Walks the operator through the installation: context, namespace,
//! version, CRDs, namespace-scoped resources, project files and the final
//! apply. Every question can be answered ahead of time with a flag or in the
//! config file.

use std::{
	fs,
	io::Write,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Args;
use kube::config::Kubeconfig;
use tracing::instrument;

use crate::{
	config::InstallerConfig,
	fetch::{ReleaseSource, CLUSTER_RESOURCES_FILE, NAMESPACE_RESOURCES_FILE, OPERATOR_CONFIG_FILE},
	k8s::{
		client::{
			cluster_server, context_names, current_context, ClusterConnection, ConnectionError,
		},
		gateway::{ClusterGateway, KubeGateway},
	},
	manifests,
	params::InstallParams,
	precondition::{wait_until, CrdsInstalled, NamespaceExists, Waited},
	prompt::{Prompter, TerminalPrompter, DEFAULT_PAGE_SIZE},
	reconcile::Reconciler,
	record::ResourceRecord,
	version::{self, Resolution},
	yaml,
};

#[derive(Args, Debug, Default)]
pub struct InstallArgs {
	/// The version of Entando to install
	#[arg(short = 'v', long = "entandoversion")]
	pub entando_version: Option<String>,

	/// The namespace in which to install Entando
	#[arg(short, long)]
	pub namespace: Option<String>,

	/// The name of the project to deploy
	#[arg(short, long)]
	pub project: Option<String>,

	/// The hostname to use for the Entando app
	#[arg(short = 'h', long)]
	pub hostname: Option<String>,

	/// Whether you want to use TLS or not
	#[arg(short, long)]
	pub tls: bool,

	/// Whether you want to install Entando locally or in a cluster
	#[arg(short, long)]
	pub local: bool,

	/// kubeconfig context to use instead of asking
	#[arg(long)]
	pub context: Option<String>,
}

impl InstallArgs {
	/// The answers given on the command line. Boolean flags only answer when
	/// set.
	pub fn into_config(self) -> InstallerConfig {
		InstallerConfig {
			entando_version: self.entando_version,
			namespace: self.namespace,
			project: self.project,
			hostname: self.hostname,
			tls: self.tls.then_some(true),
			local: self.local.then_some(true),
			context: self.context,
			release_source: Default::default(),
		}
	}
}

/// How an installation run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
	Completed { project_dir: PathBuf },
	/// The operator declined to go on.
	Aborted,
}

const APPLY_ALL: &str = "Yes, please";
const APPLY_WITH_NAMESPACE_RESOURCES: &str = "Yes, and re-apply namespace resources too";
const APPLY_NOTHING: &str = "No, I will do it myself";

const KUBERNETES_CLUSTER: &str = "Kubernetes cluster";
const LOCAL_ENVIRONMENT: &str = "Local environment";

/// Context name kubeconfig loaders fall back to when nothing is configured.
const PLACEHOLDER_CONTEXT: &str = "loaded-context";

const RULER: &str =
	"------------------------------------------------------------------------------";

/// Run the install command.
pub fn run<W: Write>(args: InstallArgs, writer: W) -> Result<InstallOutcome> {
	let working_dir = std::env::current_dir().context("reading the current directory")?;
	let mut config = InstallerConfig::load_from_directory(&working_dir)?.unwrap_or_default();
	config.merge_from(args.into_config());

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;

	runtime.block_on(run_async(config, working_dir, writer))
}

async fn run_async<W: Write>(
	config: InstallerConfig,
	working_dir: PathBuf,
	mut writer: W,
) -> Result<InstallOutcome> {
	writeln!(writer, "\nWelcome! Let's install Entando together!")?;
	writeln!(writer, "\n* NOTE")?;
	writeln!(
		writer,
		"* This tool loads your initial Kubernetes configuration, but any subsequent change in \
		 context is only limited in scope to the execution environment."
	)?;

	let mut prompter = TerminalPrompter::stdio();

	let kubeconfig = Kubeconfig::read().context("loading kubeconfig")?;
	let Some(context) = select_context(
		&kubeconfig,
		config.context.as_deref(),
		&mut prompter,
		&mut writer,
	)?
	else {
		return Ok(InstallOutcome::Aborted);
	};
	writeln!(writer, "\nThe selected context is {context}")?;

	let connection = ClusterConnection::connect_with_kubeconfig(kubeconfig, &context)
		.await
		.with_context(|| format!("connecting to the cluster of context '{context}'"))?;
	let gateway = KubeGateway::new(connection.client().clone());
	let source = ReleaseSource::new(
		config.release_source.tags_url(),
		config.release_source.releases_base_url(),
	)?;

	Installer {
		gateway: &gateway,
		source: &source,
		prompter: &mut prompter,
		out: writer,
		context,
		working_dir,
		now: chrono::Local::now().naive_local(),
	}
	.install(&config)
	.await
}

/// Pick the kubeconfig context to install through.
///
/// A context given ahead of time must exist. Otherwise the current context
/// is offered first, then the full list. A kubeconfig that looks unset is
/// reported first and `None` is returned if the operator stops there.
pub fn select_context<W: Write>(
	kubeconfig: &Kubeconfig,
	requested: Option<&str>,
	prompter: &mut dyn Prompter,
	mut out: W,
) -> Result<Option<String>> {
	let contexts = context_names(kubeconfig);
	if contexts.is_empty() {
		return Err(ConnectionError::NoContexts.into());
	}

	if let Some(requested) = requested {
		if !contexts.iter().any(|c| c == requested) {
			return Err(ConnectionError::ContextNotFound(requested.to_string()).into());
		}
		return Ok(Some(requested.to_string()));
	}

	let current = current_context(kubeconfig);
	if current.is_none_or(|name| name == PLACEHOLDER_CONTEXT) {
		writeln!(out, "\nWARNING:")?;
		match current {
			Some(name) => writeln!(
				out,
				"The loaded context '{name}' and base path '{}' might indicate that your Kube \
				 Config isn't set correctly.",
				cluster_server(kubeconfig, name).unwrap_or_default()
			)?,
			None => writeln!(
				out,
				"No current context is set, which might indicate that your Kube Config isn't \
				 set correctly."
			)?,
		}
		if !prompter.confirm("Is this configuration correct and do you still wish to continue?")?
		{
			return Ok(None);
		}
	}

	if let Some(current) = current {
		writeln!(out, "\nYour current context is: {current}\n")?;
		if prompter.confirm("Is this the context you want to use?")? {
			return Ok(Some(current.to_string()));
		}
	}

	let index = prompter.select(
		"What context would you like to use?",
		&contexts,
		DEFAULT_PAGE_SIZE,
	)?;
	Ok(Some(contexts[index].clone()))
}

/// One installation run against a connected cluster.
pub struct Installer<'a, W> {
	pub gateway: &'a dyn ClusterGateway,
	pub source: &'a ReleaseSource,
	pub prompter: &'a mut dyn Prompter,
	pub out: W,
	/// kubeconfig context in use, for the closing instructions.
	pub context: String,
	/// Offered as the parent of the project directory.
	pub working_dir: PathBuf,
	/// Timestamp of the project directory name.
	pub now: NaiveDateTime,
}

impl<W: Write> Installer<'_, W> {
	#[instrument(skip_all, fields(context = %self.context))]
	pub async fn install(mut self, config: &InstallerConfig) -> Result<InstallOutcome> {
		// Namespace
		let namespace = match &config.namespace {
			Some(namespace) => namespace.to_lowercase(),
			None => {
				writeln!(self.out)?;
				self.prompter
					.input("Enter the target namespace:")?
					.to_lowercase()
			}
		};
		let mut namespace_exists =
			NamespaceExists::new(self.gateway, &mut *self.prompter, &namespace);
		if wait_until(&mut namespace_exists).await? == Waited::Aborted {
			return Ok(InstallOutcome::Aborted);
		}
		writeln!(self.out, "\nThe target namespace is: {namespace}")?;

		// Version
		let tags = self.source.fetch_tags().await?;
		let version = match version::resolve(config.entando_version.as_deref(), &tags)? {
			Resolution::Matched(tag) => tag,
			Resolution::NeedsSelection { requested } => {
				if let Some(requested) = requested {
					writeln!(
						self.out,
						"\nThe Entando version you specified ({requested}) could not be found.\n"
					)?;
				} else {
					writeln!(self.out)?;
				}
				version::select_version(&mut *self.prompter, &tags)?
			}
		};
		writeln!(self.out, "\nThe selected Entando version is {version}")?;

		let release = self.source.fetch_manifests(&version).await?;
		let reconciler = Reconciler::new(self.gateway, namespace.clone());

		// CRDs
		let mut crds = parse(&release.cluster_resources, CLUSTER_RESOURCES_FILE)?;
		crds.retain(ResourceRecord::is_resource);
		let mut crds_installed =
			CrdsInstalled::new(&reconciler, self.gateway, &mut *self.prompter, &mut crds);
		if wait_until(&mut crds_installed).await? == Waited::Aborted {
			return Ok(InstallOutcome::Aborted);
		}
		writeln!(self.out, "\nEntando CRDs are installed, so we can go on.\n")?;

		let existing_apps = self
			.gateway
			.list_resources("entando.org/v1", "EntandoApp", &namespace)
			.await
			.with_context(|| format!("listing EntandoApps in namespace '{namespace}'"))?;
		if let Some(app) = existing_apps.first() {
			let name = app
				.pointer("/metadata/name")
				.and_then(|n| n.as_str())
				.unwrap_or_default();
			writeln!(
				self.out,
				"It appears an EntandoApp called '{name}' already exists in namespace '{namespace}'."
			)?;
			return Ok(InstallOutcome::Aborted);
		}

		// Namespace-scoped resources
		if !self.prompter.confirm(&format!(
			"Namespace-scoped resources for Entando {version} will be applied to the namespace \
			 {namespace}. Continue? (They will be patched if already existing)"
		))? {
			return Ok(InstallOutcome::Aborted);
		}
		writeln!(
			self.out,
			"\nNow installing namespace-scoped resources for Entando {version}...\n"
		)?;
		let mut namespace_resources =
			parse(&release.namespace_resources, NAMESPACE_RESOURCES_FILE)?;
		self.apply(&reconciler, &mut namespace_resources).await?;

		// Project directory
		writeln!(self.out)?;
		let Some(parent) = self.choose_parent_dir()? else {
			return Ok(InstallOutcome::Aborted);
		};
		let project = match &config.project {
			Some(project) => project.clone(),
			None => {
				writeln!(self.out)?;
				self.prompter.input("Please, specify a project name:")?
			}
		};
		writeln!(self.out, "\nThe project name is '{project}'\n")?;
		let folder = manifests::project_folder_name(&project, &namespace, self.now);
		let project_dir = manifests::create_project_dir(&parent, &folder)?;
		writeln!(
			self.out,
			"The directory has been created here: '{}'",
			project_dir.display()
		)?;

		// Parameters
		let hostname = match &config.hostname {
			Some(hostname) => hostname.clone(),
			None => {
				writeln!(self.out)?;
				self.prompter
					.input("Please, enter the ingress hostname you want to use:")?
			}
		};
		writeln!(self.out, "\nThe selected hostname is '{hostname}'")?;

		let tls = match config.tls {
			Some(tls) => tls,
			None => {
				writeln!(self.out)?;
				self.prompter
					.confirm("Would you like to use TLS for your Entando installation?")?
			}
		};
		writeln!(
			self.out,
			"\nYou chose {}to use TLS.",
			if tls { "" } else { "not " }
		)?;

		let local = match config.local {
			Some(local) => local,
			None => {
				writeln!(self.out)?;
				let choice = self.prompter.select(
					"Are you installing Entando in a Kubernetes cluster or in a local \
					 environment (e.g. minikube, k3s)?",
					&[KUBERNETES_CLUSTER.to_string(), LOCAL_ENVIRONMENT.to_string()],
					DEFAULT_PAGE_SIZE,
				)?;
				choice == 1
			}
		};

		let params = InstallParams::builder()
			.context(self.context.clone())
			.namespace(namespace)
			.version(version)
			.project(project)
			.hostname(hostname)
			.tls(tls)
			.local(local)
			.build();
		writeln!(
			self.out,
			"\nYou are installing Entando in a {}.\n",
			params.environment()
		)?;

		// Project files
		let files = manifests::generate(
			&params,
			&release.operator_config,
			&release.namespace_resources,
		)?;
		manifests::write_files(&project_dir, &files)?;
		writeln!(self.out, "All resources have been created!\n")?;

		let choices = [APPLY_ALL, APPLY_WITH_NAMESPACE_RESOURCES, APPLY_NOTHING].map(String::from);
		let choice = self.prompter.select(
			"Now, do you want this program to apply the resources and start the deployment? \
			 (If you want, you can go edit the files now, before applying them)",
			&choices,
			DEFAULT_PAGE_SIZE,
		)?;

		if choices[choice] == APPLY_NOTHING {
			self.print_manual_instructions(&params, &project_dir)?;
		} else {
			writeln!(self.out)?;
			let mut files = Vec::new();
			if choices[choice] == APPLY_WITH_NAMESPACE_RESOURCES {
				files.push(NAMESPACE_RESOURCES_FILE.to_string());
			}
			files.push(OPERATOR_CONFIG_FILE.to_string());
			if params.tls {
				files.push(manifests::tls_cert_file(&params.project));
			}
			files.push(manifests::app_file(&params.project));
			files.push(manifests::POSTGRES_SECRET_FILE.to_string());

			for file in &files {
				self.apply_file(&reconciler, &project_dir, file).await?;
			}
			writeln!(self.out, "\nAll done! The deployment should be under way!")?;
			writeln!(
				self.out,
				"\nYou can check the created resources in '{}'.",
				project_dir.display()
			)?;
		}

		self.print_closing_notes(&params)?;
		Ok(InstallOutcome::Completed { project_dir })
	}

	/// Where to create the project directory, `None` to stop.
	fn choose_parent_dir(&mut self) -> Result<Option<PathBuf>> {
		if self.prompter.confirm(&format!(
			"You are here: '{}'. Do you want to create a directory here?",
			self.working_dir.display()
		))? {
			return Ok(Some(self.working_dir.clone()));
		}
		if self
			.prompter
			.confirm("Do you want to specify a custom path?")?
		{
			let path = self.prompter.input("Enter your custom path:")?;
			return Ok(Some(PathBuf::from(path)));
		}
		Ok(None)
	}

	/// Apply a project file as it is on disk now, so edits made by the
	/// operator before confirming are honored.
	async fn apply_file(
		&mut self,
		reconciler: &Reconciler<'_>,
		dir: &Path,
		file: &str,
	) -> Result<()> {
		let path = dir.join(file);
		let text = fs::read_to_string(&path)
			.with_context(|| format!("reading {}", path.display()))?;
		let mut records = parse(&text, file)?;
		self.apply(reconciler, &mut records).await
	}

	async fn apply(
		&mut self,
		reconciler: &Reconciler<'_>,
		records: &mut [ResourceRecord],
	) -> Result<()> {
		let report = reconciler.apply(records).await;
		for outcome in report.outcomes() {
			if let Ok(action) = &outcome.result {
				writeln!(self.out, "  {action} {}", outcome.id)?;
			}
		}
		report.into_result()?;
		Ok(())
	}

	fn print_manual_instructions(&mut self, params: &InstallParams, dir: &Path) -> Result<()> {
		writeln!(self.out, "\nUnderstood!")?;
		writeln!(
			self.out,
			"\nYou can check the created resources in '{}' and execute:",
			dir.display()
		)?;
		writeln!(
			self.out,
			"\n  kubectl apply -f {}",
			manifests::app_file(&params.project)
		)?;
		writeln!(
			self.out,
			"\nBe sure to edit and apply the other configuration files to your liking, if \
			 needed (e.g.: '{OPERATOR_CONFIG_FILE}')."
		)?;
		writeln!(self.out, "\nExample:")?;
		writeln!(
			self.out,
			"\n  kubectl apply -f {OPERATOR_CONFIG_FILE} -n {}",
			params.namespace
		)?;
		Ok(())
	}

	fn print_closing_notes(&mut self, params: &InstallParams) -> Result<()> {
		writeln!(self.out, "\n{RULER}")?;
		writeln!(
			self.out,
			"\nIf you need to restart the deployment of Entando after an error, execute this:"
		)?;
		writeln!(
			self.out,
			"\n  kubectl patch enap {} --type merge --patch-file {}",
			params.project,
			manifests::REDEPLOY_FILE
		)?;
		writeln!(self.out, "\n{RULER}")?;
		writeln!(
			self.out,
			"\n* REMINDER\n* Please, note that this program does not change your environment's \
			 Kubernetes configuration (e.g.: context, namespace)."
		)?;
		writeln!(self.out, "* As such, you may need to run")?;
		writeln!(self.out, "*\n*   kubectl config use-context {}", params.context)?;
		writeln!(self.out, "*\n* and/or")?;
		writeln!(
			self.out,
			"*\n*   kubectl config set-context --current --namespace={}",
			params.namespace
		)?;
		writeln!(
			self.out,
			"*\n* before executing the apply commands, in case your context at the start of \
			 the execution was different."
		)?;
		writeln!(
			self.out,
			"\nThank you for having used this tool! Have a good rest of the day!\n"
		)?;
		Ok(())
	}
}

fn parse(text: &str, file: &str) -> Result<Vec<ResourceRecord>> {
	yaml::parse_all_documents(text).with_context(|| format!("parsing {file}"))
}
