pub mod frames;

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use facegate_config::Config;
use facegate_domain::access::Role;
use facegate_service::{
	AuditQuery, BatchHandle, BatchItem, BatchRequest, EnrollImageRequest, FacegateService,
	IdentityQuery, MatchParams, NewUser, RealtimeOptions, RecognizeOptions, Session,
};
use facegate_storage::db::Db;

use crate::frames::SpoolSource;

const NEW_PASSWORD_ENV: &str = "FACEGATE_NEW_PASSWORD";
const SPOOL_POLL_MS: u64 = 100;

#[derive(Debug, Parser)]
#[command(
	version = facegate_cli::VERSION,
	rename_all = "kebab",
	styles = facegate_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Operator account; the password is read from `FACEGATE_PASSWORD`.
	#[arg(long, short = 'u', global = true)]
	pub username: Option<String>,
	#[arg(long, env = facegate_cli::PASSWORD_ENV, hide_env_values = true, global = true)]
	pub password: Option<String>,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
#[command(rename_all = "kebab")]
pub enum Command {
	/// Creates the schema. With `--full-name`, also creates the first administrator from the
	/// operator credentials.
	Init {
		#[arg(long)]
		full_name: Option<String>,
	},
	/// Encodes a face image and enrolls it under an identity.
	Enroll {
		identity_id: String,
		#[arg(long, value_name = "FILE")]
		image: PathBuf,
		/// Required when the identity is new.
		#[arg(long)]
		name: Option<String>,
	},
	/// Removes an identity and all of its embeddings.
	Remove { identity_id: String },
	/// Lists enrolled identities, optionally narrowed by status or a search term.
	Identities {
		/// Case-insensitive part of an identity id or name.
		#[arg(long, short = 'q')]
		query: Option<String>,
		#[arg(long)]
		status: Option<String>,
		#[arg(long, value_name = "N", default_value_t = 100)]
		limit: u32,
		#[arg(long, value_name = "N", default_value_t = 0)]
		offset: u32,
	},
	Recognize {
		#[arg(value_name = "FILE")]
		image: PathBuf,
		#[command(flatten)]
		matching: MatchArgs,
		#[arg(long)]
		persist: bool,
	},
	Batch {
		#[arg(value_name = "FILE", num_args = 1..)]
		images: Vec<PathBuf>,
		#[command(flatten)]
		matching: MatchArgs,
		#[arg(long)]
		persist: bool,
	},
	/// Runs real-time recognition over a spool directory until interrupted.
	Watch {
		#[arg(value_name = "DIR")]
		spool: PathBuf,
		#[arg(long, value_name = "N")]
		top_k: Option<u32>,
		#[arg(long, value_name = "SCORE")]
		threshold: Option<f32>,
		/// Stop after this many seconds instead of waiting for Ctrl-C.
		#[arg(long, value_name = "SECONDS")]
		duration: Option<u64>,
		#[arg(long)]
		persist: bool,
	},
	Audit {
		#[arg(long)]
		actor: Option<String>,
		#[arg(long)]
		action: Option<String>,
		/// Resume after this sequence number.
		#[arg(long, value_name = "SEQ", default_value_t = 0)]
		after: i64,
		#[arg(long, value_name = "N", default_value_t = 100)]
		limit: usize,
	},
	/// Creates an account; its password is read from `FACEGATE_NEW_PASSWORD`.
	UserAdd {
		new_username: String,
		#[arg(long)]
		full_name: String,
		#[arg(long, value_parser = parse_role)]
		role: Role,
		#[arg(long)]
		email: Option<String>,
		#[arg(long)]
		badge_number: Option<String>,
		#[arg(long)]
		department: Option<String>,
		#[arg(long, env = NEW_PASSWORD_ENV, hide_env_values = true)]
		new_password: String,
	},
	Users,
	/// Changes the operator's own password to `FACEGATE_NEW_PASSWORD`.
	Passwd {
		#[arg(long, env = NEW_PASSWORD_ENV, hide_env_values = true)]
		new_password: String,
	},
	Stats,
}

#[derive(Debug, clap::Args)]
pub struct MatchArgs {
	/// Zero returns every match above the threshold.
	#[arg(long, value_name = "N")]
	pub top_k: Option<u32>,
	#[arg(long, value_name = "SCORE")]
	pub threshold: Option<f32>,
}
impl MatchArgs {
	fn params(&self) -> MatchParams {
		MatchParams { top_k: self.top_k, min_threshold: self.threshold }
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = facegate_config::load(&args.config)?;

	init_tracing(&config)?;

	let db = Db::connect(&config.storage).await?;

	db.ensure_schema(config.storage.embedding_dim).await?;

	let service = FacegateService::new(config, db);
	let result = dispatch(&service, &args).await;

	service.db.close().await;

	result
}

async fn dispatch(service: &FacegateService, args: &Args) -> color_eyre::Result<()> {
	if let Command::Init { full_name } = &args.command {
		let Some(full_name) = full_name else {
			tracing::info!("Schema is ready.");

			return Ok(());
		};
		let (username, password) = credentials(args)?;
		let admin = service
			.bootstrap_admin(NewUser {
				username: username.to_string(),
				password: password.to_string(),
				full_name: full_name.clone(),
				role: Role::Admin,
				email: None,
				badge_number: None,
				department: None,
			})
			.await?;

		return print_json(&admin);
	}

	let (username, password) = credentials(args)?;
	let session = service.login(username, password).await?;
	let result = execute(service, &session, args).await;

	if let Err(err) = service.logout(&session).await {
		tracing::warn!(error = %err, "Logout failed.");
	}

	result
}

async fn execute(
	service: &FacegateService,
	session: &Session,
	args: &Args,
) -> color_eyre::Result<()> {
	match &args.command {
		Command::Init { .. } => Ok(()),
		Command::Enroll { identity_id, image, name } => {
			let image = tokio::fs::read(image).await?;
			let response = service
				.enroll_image(
					session,
					EnrollImageRequest {
						identity_id: identity_id.clone(),
						name: name.clone(),
						metadata: None,
						image,
					},
				)
				.await?;

			print_json(&response)
		},
		Command::Remove { identity_id } => {
			let removed = service.remove_identity(session, identity_id).await?;

			print_json(&serde_json::json!({ "identity_id": identity_id, "removed": removed }))
		},
		Command::Identities { query, status, limit, offset } => {
			let query = IdentityQuery {
				status: status.clone(),
				search: query.clone(),
				limit: Some(*limit),
				offset: *offset,
			};

			print_json(&service.list_identities(session, &query).await?)
		},
		Command::Recognize { image, matching, persist } => {
			let label = image.file_name().map(|name| name.to_string_lossy().into_owned());
			let bytes = tokio::fs::read(image).await?;
			let response = service
				.recognize_image(
					session,
					&bytes,
					RecognizeOptions { params: matching.params(), persist: *persist, label },
				)
				.await?;

			print_json(&response)
		},
		Command::Batch { images, matching, persist } => {
			let mut items = Vec::with_capacity(images.len());

			for path in images {
				items.push(BatchItem {
					label: path.display().to_string(),
					image: tokio::fs::read(path).await?,
				});
			}

			let handle = BatchHandle::new();
			let request = BatchRequest { items, params: matching.params(), persist: *persist };
			let batch = service.run_batch(session, request, &handle);

			tokio::pin!(batch);

			let report = tokio::select! {
				report = &mut batch => report?,
				_ = tokio::signal::ctrl_c() => {
					tracing::warn!(completed = handle.completed(), "Interrupted; cancelling the rest of the batch.");
					handle.cancel();

					batch.await?
				},
			};

			print_json(&report)
		},
		Command::Watch { spool, top_k, threshold, duration, persist } =>
			watch(service, session, spool, *top_k, *threshold, *duration, *persist).await,
		Command::Audit { actor, action, after, limit } => {
			let mut cursor = service
				.query_audit(
					session,
					AuditQuery {
						actor: actor.clone(),
						action: action.clone(),
						..AuditQuery::default()
					},
				)
				.await?
				.resume_after(*after);
			let mut entries = Vec::new();

			while entries.len() < *limit {
				let Some(page) = cursor.next_page().await? else {
					break;
				};

				entries.extend(page);
			}

			entries.truncate(*limit);

			print_json(&entries)
		},
		Command::UserAdd {
			new_username,
			full_name,
			role,
			email,
			badge_number,
			department,
			new_password,
		} => {
			let user = service
				.create_user(
					session,
					NewUser {
						username: new_username.clone(),
						password: new_password.clone(),
						full_name: full_name.clone(),
						role: *role,
						email: email.clone(),
						badge_number: badge_number.clone(),
						department: department.clone(),
					},
				)
				.await?;

			print_json(&user)
		},
		Command::Users => print_json(&service.list_users(session).await?),
		Command::Passwd { new_password } => {
			let (_, current) = credentials(args)?;

			service.change_password(session, current, new_password).await?;
			tracing::info!("Password changed.");

			Ok(())
		},
		Command::Stats => print_json(&service.statistics(session).await?),
	}
}

async fn watch(
	service: &FacegateService,
	session: &Session,
	spool: &Path,
	top_k: Option<u32>,
	min_threshold: Option<f32>,
	duration: Option<u64>,
	persist: bool,
) -> color_eyre::Result<()> {
	let source = SpoolSource::new(spool, Duration::from_millis(SPOOL_POLL_MS));
	let options = RealtimeOptions { min_threshold, top_k, persist };
	let mut running = service.start_realtime(session, source, options).await?;
	let deadline = async {
		match duration {
			Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
			None => std::future::pending().await,
		}
	};

	tokio::pin!(deadline);

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			_ = &mut deadline => break,
			outcome = running.next() => match outcome {
				Some(Ok(outcome)) => println!("{}", serde_json::to_string(&outcome)?),
				Some(Err(err)) => {
					tracing::error!(error = %err, "Real-time session failed.");

					break;
				},
				None => break,
			},
		}
	}

	let summary = running.stop().await?;

	print_json(&summary)
}

fn credentials(args: &Args) -> color_eyre::Result<(&str, &str)> {
	let username = args
		.username
		.as_deref()
		.ok_or_else(|| eyre::eyre!("--username is required for this command."))?;
	let password = args.password.as_deref().ok_or_else(|| {
		eyre::eyre!("Set {} to the operator password.", facegate_cli::PASSWORD_ENV)
	})?;

	Ok((username, password))
}

fn print_json<T>(value: &T) -> color_eyre::Result<()>
where
	T: Serialize,
{
	let json = serde_json::to_string_pretty(value)?;

	println!("{json}");

	Ok(())
}

fn parse_role(raw: &str) -> Result<Role, String> {
	Role::parse(raw).ok_or_else(|| {
		format!("Unknown role {raw:?}; expected admin, investigating_head, or investigating_officer.")
	})
}

fn init_tracing(config: &Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();

	Ok(())
}
