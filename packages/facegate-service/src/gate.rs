//! Security gate: credential checks, lockout, sessions and per-action authorization.
//!
//! Lockout state is never kept in memory. It is folded from the stored attempt history on every
//! login, so it survives restarts and is shared by every process on the same database.

use std::{
	collections::HashMap,
	fmt,
	sync::{Arc, Mutex as StdMutex},
};

use argon2::{
	Algorithm, Argon2, Params, Version,
	password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
	Error, FacegateService, Result, WriteTx,
	audit::{self, AuditOutcome},
};
use facegate_config::Argon2Params;
use facegate_domain::{
	access::{self, Action, Decision, Role},
	lockout::{self, Attempt, AttemptOutcome, LockoutPolicy},
	password,
	session::{self, EndReason, SessionEvent, SessionState},
};
use facegate_storage::{
	accounts,
	models::{NewLoginAttempt, SessionRecord, User},
};

const LOGIN_ACTION: &str = "login";
const LOGOUT_ACTION: &str = "logout";

/// The caller's handle to an authenticated session. Only the token is trusted; the other fields
/// are informational and are re-derived from the store on every gated call.
#[derive(Clone)]
pub struct Session {
	pub token: String,
	pub session_id: Uuid,
	pub user_id: Uuid,
	pub username: String,
	pub role: Role,
	pub expires_at: OffsetDateTime,
}
impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("token", &"<redacted>")
			.field("session_id", &self.session_id)
			.field("user_id", &self.user_id)
			.field("username", &self.username)
			.field("role", &self.role)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Identity of the caller once a gated call has been allowed.
#[derive(Clone, Debug)]
pub struct Principal {
	pub session_id: Uuid,
	pub user_id: Uuid,
	pub username: String,
	pub role: Role,
}

/// Serializes login attempts per normalized username within this process.
#[derive(Default)]
pub(crate) struct LoginLocks {
	inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}
impl LoginLocks {
	fn lock_for(&self, username: &str) -> Arc<Mutex<()>> {
		let mut map = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		map.retain(|_, lock| Arc::strong_count(lock) > 1);

		map.entry(username.to_string()).or_default().clone()
	}
}

pub(crate) fn token_digest(token: &str) -> String {
	blake3::hash(token.as_bytes()).to_hex().to_string()
}

fn new_token() -> String {
	format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn hasher(params: &Argon2Params) -> Result<Argon2<'static>> {
	let params = Params::new(params.m_cost_kib, params.t_cost, params.p_cost, None)
		.map_err(|err| Error::InvalidRequest { message: format!("Invalid Argon2 parameters: {err}.") })?;

	Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

pub(crate) fn hash_password(params: &Argon2Params, password: &str) -> Result<String> {
	let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
		.map_err(|err| Error::InvalidRequest { message: format!("Failed to build salt: {err}.") })?;
	let hash = hasher(params)?
		.hash_password(password.as_bytes(), &salt)
		.map_err(|err| Error::InvalidRequest { message: format!("Failed to hash password: {err}.") })?;

	Ok(hash.to_string())
}

/// [`hash_password`] on the blocking pool.
pub(crate) async fn hash_password_off_thread(
	params: &Argon2Params,
	password: &str,
) -> Result<String> {
	let params = *params;
	let password = password.to_string();

	tokio::task::spawn_blocking(move || hash_password(&params, &password))
		.await
		.map_err(|err| Error::InvalidRequest { message: format!("Password hashing stopped: {err}.") })?
}

/// Parameters come from the stored PHC string, so hashes made under older settings still verify.
pub(crate) fn verify_password(password: &str, phc: &str) -> bool {
	PasswordHash::new(phc)
		.is_ok_and(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
}

/// [`verify_password`] on the blocking pool.
pub(crate) async fn verify_password_off_thread(password: &str, phc: &str) -> Result<bool> {
	let password = password.to_string();
	let phc = phc.to_string();

	tokio::task::spawn_blocking(move || verify_password(&password, &phc))
		.await
		.map_err(|err| Error::InvalidRequest { message: format!("Password check stopped: {err}.") })
}

/// Why a credential check failed, or `None` when it passed.
///
/// Every call runs exactly one Argon2 verification. Unknown usernames are checked against
/// `decoy`, a hash of a random secret made with the configured parameters.
pub(crate) async fn credential_rejection(
	account: Option<&User>,
	password: &str,
	decoy: &str,
) -> Result<Option<&'static str>> {
	let phc = account.map_or(decoy, |user| user.password_hash.as_str());
	let verified = verify_password_off_thread(password, phc).await?;

	Ok(match account {
		None => Some("invalid_credentials"),
		Some(_) if !verified => Some("invalid_credentials"),
		Some(user) if !user.is_active => Some("inactive"),
		Some(_) => None,
	})
}

pub(crate) fn idle_timeout(cfg: &facegate_config::Security) -> Duration {
	Duration::seconds(i64::try_from(cfg.session_idle_timeout_seconds).unwrap_or(i64::MAX))
}

impl FacegateService {
	/// Made once per service on first use, with the configured Argon2 parameters.
	pub(crate) async fn decoy_hash(&self) -> Result<&str> {
		self.decoy_hash
			.get_or_try_init(|| async {
				hash_password_off_thread(&self.cfg.security.argon2, &new_token()).await
			})
			.await
			.map(String::as_str)
	}

	/// Checks credentials and opens a session.
	///
	/// Unknown usernames, wrong passwords, and deactivated accounts all fail with the same
	/// `AuthenticationFailure`. Once the failure streak reaches the configured maximum every
	/// attempt fails with `AccountLocked` until the window passes, whatever the credentials.
	pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
		let username = password::normalize_username(username);
		let user_lock = self.login_locks.lock_for(&username);
		let _serialized = user_lock.lock().await;
		let now = OffsetDateTime::now_utc();
		let policy = LockoutPolicy::from_config(&self.cfg.security);
		let history = accounts::current_streak(&self.db.pool, &username)
			.await?
			.into_iter()
			.filter_map(|row| {
				AttemptOutcome::parse(&row.outcome).map(|outcome| Attempt {
					outcome,
					at: row.attempted_at,
					opens_lockout: row.opens_lockout,
				})
			})
			.collect::<Vec<_>>();
		let state = lockout::lockout_state(&history, &policy, now);
		let submitted = SessionState::Anonymous.on(SessionEvent::SubmitCredentials);

		if let Some(locked_until) = state.locked_until.filter(|_| state.is_locked(now)) {
			let mut tx = self.begin_write().await?;

			accounts::insert_login_attempt(&mut *tx.tx, &NewLoginAttempt {
				username: &username,
				user_id: None,
				outcome: AttemptOutcome::Locked.as_str(),
				reason: Some("locked"),
				opens_lockout: false,
				attempted_at: now,
			})
			.await?;
			audit::append(
				&mut tx.tx,
				&username,
				LOGIN_ACTION,
				Some(&username),
				AuditOutcome::Locked,
				json!({ "locked_until_unix": locked_until.unix_timestamp() }),
			)
			.await?;
			audit::commit_audited(tx).await?;
			tracing::warn!(username = %username, "Login refused while account is locked.");

			return Err(Error::AccountLocked);
		}

		let user = accounts::get_user_by_username(&self.db.pool, &username).await?;
		let decoy = self.decoy_hash().await?;
		let rejection = credential_rejection(user.as_ref(), password, decoy).await?;

		if let Some(reason) = rejection {
			let failures = state.consecutive_failures.saturating_add(1);
			let now_locked = failures >= policy.max_failed_attempts;
			let mut tx = self.begin_write().await?;

			accounts::insert_login_attempt(&mut *tx.tx, &NewLoginAttempt {
				username: &username,
				user_id: user.as_ref().map(|user| user.user_id),
				outcome: AttemptOutcome::Failure.as_str(),
				reason: Some(reason),
				opens_lockout: now_locked,
				attempted_at: now,
			})
			.await?;
			audit::append(
				&mut tx.tx,
				&username,
				LOGIN_ACTION,
				Some(&username),
				AuditOutcome::Failure,
				json!({ "reason": reason, "consecutive_failures": failures, "locked": now_locked }),
			)
			.await?;
			audit::commit_audited(tx).await?;

			let state = submitted.and_then(|state| state.on(SessionEvent::CredentialsRejected));

			if now_locked {
				tracing::warn!(
					username = %username,
					failures,
					"Account locked after repeated failures."
				);
			} else {
				tracing::info!(username = %username, failures, ?state, "Login rejected.");
			}

			return Err(Error::AuthenticationFailure);
		}

		let Some(user) = user else {
			return Err(Error::AuthenticationFailure);
		};
		let role = parse_role(&user.role)?;
		let token = new_token();
		let record = SessionRecord {
			session_id: Uuid::new_v4(),
			token_hash: token_digest(&token),
			user_id: user.user_id,
			role: role.as_str().to_string(),
			created_at: now,
			last_activity_at: now,
			expires_at: now + idle_timeout(&self.cfg.security),
			ended_at: None,
			end_reason: None,
		};
		let mut tx = self.begin_write().await?;

		accounts::insert_login_attempt(&mut *tx.tx, &NewLoginAttempt {
			username: &username,
			user_id: Some(user.user_id),
			outcome: AttemptOutcome::Success.as_str(),
			reason: None,
			opens_lockout: false,
			attempted_at: now,
		})
		.await?;
		accounts::insert_session(&mut *tx.tx, &record).await?;
		accounts::record_login(&mut *tx.tx, user.user_id, now).await?;
		audit::append(
			&mut tx.tx,
			&username,
			LOGIN_ACTION,
			Some(&username),
			AuditOutcome::Success,
			json!({ "session_id": record.session_id, "role": role.as_str() }),
		)
		.await?;
		audit::commit_audited(tx).await?;

		let state = submitted.and_then(|state| state.on(SessionEvent::CredentialsAccepted));

		tracing::info!(username = %username, role = role.as_str(), ?state, "Login succeeded.");

		Ok(Session {
			token,
			session_id: record.session_id,
			user_id: user.user_id,
			username,
			role,
			expires_at: record.expires_at,
		})
	}

	pub async fn logout(&self, session: &Session) -> Result<()> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.begin_write().await?;
		let record = accounts::get_session_by_token_hash(&mut *tx.tx, &token_digest(&session.token))
			.await?;
		let next = record.as_ref().and_then(|record| {
			session_state(record).on(SessionEvent::Logout).map(|state| (record.session_id, state))
		});
		let Some((session_id, _)) = next else {
			audit::append(
				&mut tx.tx,
				&session.username,
				LOGOUT_ACTION,
				None,
				AuditOutcome::Expired,
				json!({ "reason": "session_not_open" }),
			)
			.await?;
			audit::commit_audited(tx).await?;

			return Err(Error::SessionExpired);
		};

		accounts::end_session(&mut *tx.tx, session_id, EndReason::Logout.as_str(), now).await?;
		audit::append(
			&mut tx.tx,
			&session.username,
			LOGOUT_ACTION,
			None,
			AuditOutcome::Success,
			json!({ "session_id": session_id }),
		)
		.await?;
		audit::commit_audited(tx).await?;
		tracing::info!(username = %session.username, "Logged out.");

		Ok(())
	}

	/// Runs the gate for `action`. When allowed, returns the principal and the open write
	/// transaction the action must use; the session's idle window has already been extended in
	/// it. Every refusal is audited and committed before the error is returned.
	pub(crate) async fn gate(
		&self,
		session: &Session,
		action: Action,
		target: Option<&str>,
	) -> Result<(Principal, WriteTx)> {
		self.open_session(session, action.as_str(), Some(action), target).await
	}

	/// Same checks as [`FacegateService::gate`] minus authorization, for operations every
	/// signed-in user may perform on their own account. `label` names the audit action.
	pub(crate) async fn open_session(
		&self,
		session: &Session,
		label: &str,
		action: Option<Action>,
		target: Option<&str>,
	) -> Result<(Principal, WriteTx)> {
		let now = OffsetDateTime::now_utc();
		let mut tx = self.begin_write().await?;
		let record = accounts::get_session_by_token_hash(&mut *tx.tx, &token_digest(&session.token))
			.await?;
		let Some(record) = record.filter(|record| !session_state(record).is_terminal()) else {
			self.refuse(
				tx,
				&session.username,
				label,
				target,
				AuditOutcome::Expired,
				json!({ "reason": "session_not_open" }),
			)
			.await?;

			return Err(Error::SessionExpired);
		};

		if session::idle_expired(record.expires_at, now) {
			let expired = session_state(&record).on(SessionEvent::IdleTimeout);

			accounts::end_session(&mut *tx.tx, record.session_id, EndReason::Expired.as_str(), now)
				.await?;
			self.refuse(
				tx,
				&session.username,
				label,
				target,
				AuditOutcome::Expired,
				json!({ "reason": "idle_timeout", "session_id": record.session_id }),
			)
			.await?;
			tracing::info!(
				username = %session.username,
				state = ?expired,
				"Session expired on idle timeout."
			);

			return Err(Error::SessionExpired);
		}

		let role = parse_role(&record.role)?;
		let Some(user) = accounts::get_user(&mut *tx.tx, record.user_id).await? else {
			self.refuse(
				tx,
				&session.username,
				label,
				target,
				AuditOutcome::Expired,
				json!({ "reason": "user_removed" }),
			)
			.await?;

			return Err(Error::SessionExpired);
		};

		if let Some(action) = action
			&& access::authorize(role, action) == Decision::Denied
		{
			self.refuse(
				tx,
				&user.username,
				label,
				target,
				AuditOutcome::Denied,
				json!({ "role": role.as_str() }),
			)
			.await?;
			tracing::warn!(
				username = %user.username,
				action = label,
				role = role.as_str(),
				"Permission denied."
			);

			return Err(Error::PermissionDenied { action: label.to_string() });
		}

		accounts::touch_session(
			&mut *tx.tx,
			record.session_id,
			now,
			now + idle_timeout(&self.cfg.security),
		)
		.await?;

		Ok((
			Principal {
				session_id: record.session_id,
				user_id: record.user_id,
				username: user.username,
				role,
			},
			tx,
		))
	}

	/// Runs the gate and commits right away, for actions whose work happens outside the store
	/// (encoding, pipelines). The action's own audit entry is written when it finishes.
	pub(crate) async fn gate_detached(
		&self,
		session: &Session,
		action: Action,
		target: Option<&str>,
	) -> Result<Principal> {
		let (principal, tx) = self.gate(session, action, target).await?;

		tx.commit().await?;

		Ok(principal)
	}

	async fn refuse(
		&self,
		mut tx: WriteTx,
		actor: &str,
		label: &str,
		target: Option<&str>,
		outcome: AuditOutcome,
		details: serde_json::Value,
	) -> Result<()> {
		audit::append(&mut tx.tx, actor, label, target, outcome, details).await?;
		audit::commit_audited(tx).await
	}
}

fn session_state(record: &SessionRecord) -> SessionState {
	SessionState::from_end_reason(record.end_reason.as_deref().and_then(EndReason::parse))
}

pub(crate) fn parse_role(raw: &str) -> Result<Role> {
	Role::parse(raw).ok_or_else(|| Error::StoreUnavailable { message: format!("Unknown stored role {raw:?}.") })
}
