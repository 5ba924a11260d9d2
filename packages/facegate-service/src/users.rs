//! Account administration and self-service password changes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqliteConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, FacegateService, Result, Session,
	audit::{self, AuditOutcome},
	gate,
};
use facegate_domain::{
	access::{Action, Role},
	password,
};
use facegate_storage::{
	accounts,
	models::{LoginAttempt, User},
};

const BOOTSTRAP_ACTION: &str = "bootstrap_admin";
const CHANGE_PASSWORD_ACTION: &str = "change_password";
const MAX_USERNAME_CHARS: usize = 64;
const MAX_HISTORY_LIMIT: u32 = 1_000;

#[derive(Clone, Deserialize, Serialize)]
pub struct NewUser {
	pub username: String,
	pub password: String,
	pub full_name: String,
	pub role: Role,
	pub email: Option<String>,
	pub badge_number: Option<String>,
	pub department: Option<String>,
}
impl fmt::Debug for NewUser {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("NewUser")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.field("full_name", &self.full_name)
			.field("role", &self.role)
			.finish_non_exhaustive()
	}
}

/// Fields left as `None` are unchanged. Blank strings clear the optional profile fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UserPatch {
	pub full_name: Option<String>,
	pub role: Option<Role>,
	pub email: Option<String>,
	pub badge_number: Option<String>,
	pub department: Option<String>,
	pub is_active: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserView {
	pub user_id: Uuid,
	pub username: String,
	pub full_name: String,
	pub role: String,
	pub email: Option<String>,
	pub badge_number: Option<String>,
	pub department: Option<String>,
	pub is_active: bool,
	pub created_by: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
	#[serde(default, with = "crate::time_serde::option")]
	pub last_login_at: Option<OffsetDateTime>,
}
impl From<User> for UserView {
	fn from(user: User) -> Self {
		Self {
			user_id: user.user_id,
			username: user.username,
			full_name: user.full_name,
			role: user.role,
			email: user.email,
			badge_number: user.badge_number,
			department: user.department,
			is_active: user.is_active,
			created_by: user.created_by,
			created_at: user.created_at,
			updated_at: user.updated_at,
			last_login_at: user.last_login_at,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRecord {
	pub seq: i64,
	pub username: String,
	pub outcome: String,
	pub reason: Option<String>,
	#[serde(with = "crate::time_serde")]
	pub attempted_at: OffsetDateTime,
}
impl From<LoginAttempt> for LoginRecord {
	fn from(attempt: LoginAttempt) -> Self {
		Self {
			seq: attempt.seq,
			username: attempt.username,
			outcome: attempt.outcome,
			reason: attempt.reason,
			attempted_at: attempt.attempted_at,
		}
	}
}

impl FacegateService {
	/// Creates the first administrator. Refused once any user exists.
	pub async fn bootstrap_admin(&self, new: NewUser) -> Result<UserView> {
		let username = validate_username(&new.username)?;
		let full_name = required_text(&new.full_name, "full_name")?;

		check_password(&new.password)?;

		let hash = gate::hash_password_off_thread(&self.cfg.security.argon2, &new.password).await?;
		let mut tx = self.begin_write().await?;

		if accounts::count_users(&mut *tx.tx).await? > 0 {
			return Err(Error::InvalidRequest {
				message: "Users already exist; bootstrap only runs on an empty store.".to_string(),
			});
		}

		let user = user_row(&new, username, full_name, Role::Admin, hash, None);

		accounts::insert_user(&mut *tx.tx, &user).await?;
		accounts::push_password_history(
			&mut *tx.tx,
			user.user_id,
			&user.password_hash,
			user.created_at,
		)
		.await?;
		audit::append(
			&mut tx.tx,
			&user.username,
			BOOTSTRAP_ACTION,
			Some(&user.username),
			AuditOutcome::Success,
			json!({ "role": Role::Admin.as_str() }),
		)
		.await?;
		audit::commit_audited(tx).await?;
		tracing::info!(username = %user.username, "Bootstrap administrator created.");

		Ok(UserView::from(user))
	}

	pub async fn create_user(&self, session: &Session, new: NewUser) -> Result<UserView> {
		let target = password::normalize_username(&new.username);
		let (principal, mut tx) = self.gate(session, Action::ManageUsers, Some(&target)).await?;
		let outcome = async {
			let username = validate_username(&new.username)?;
			let full_name = required_text(&new.full_name, "full_name")?;

			check_password(&new.password)?;

			if accounts::get_user_by_username(&mut *tx.tx, &username).await?.is_some() {
				return Err(Error::InvalidRequest {
					message: format!("User {username} already exists."),
				});
			}

			let hash =
				gate::hash_password_off_thread(&self.cfg.security.argon2, &new.password).await?;
			let user =
				user_row(&new, username, full_name, new.role, hash, Some(&principal.username));

			accounts::insert_user(&mut *tx.tx, &user).await?;
			accounts::push_password_history(
				&mut *tx.tx,
				user.user_id,
				&user.password_hash,
				user.created_at,
			)
			.await?;
			tracing::info!(username = %user.username, role = %user.role, "User created.");

			let details = json!({ "role": user.role, "user_id": user.user_id });

			Ok::<_, Error>((UserView::from(user), details))
		}
		.await;

		self.settle(tx, &principal, Action::ManageUsers, Some(&target), outcome).await
	}

	/// Applies the patch. A role change or deactivation ends the user's open sessions, and the
	/// last active administrator can be neither demoted nor deactivated.
	pub async fn update_user(
		&self,
		session: &Session,
		username: &str,
		patch: UserPatch,
	) -> Result<UserView> {
		let target = password::normalize_username(username);
		let (principal, mut tx) = self.gate(session, Action::ManageUsers, Some(&target)).await?;
		let outcome = async {
			let mut user = find_user(&mut tx.tx, &target).await?;
			let before = json!({ "role": user.role, "is_active": user.is_active });
			let was_admin = is_active_admin(&user);
			let (old_role, was_active) = (user.role.clone(), user.is_active);

			if let Some(full_name) = patch.full_name {
				user.full_name = required_text(&full_name, "full_name")?;
			}
			if let Some(role) = patch.role {
				user.role = role.as_str().to_string();
			}
			if let Some(email) = patch.email {
				user.email = non_blank(Some(email));
			}
			if let Some(badge_number) = patch.badge_number {
				user.badge_number = non_blank(Some(badge_number));
			}
			if let Some(department) = patch.department {
				user.department = non_blank(Some(department));
			}
			if let Some(is_active) = patch.is_active {
				user.is_active = is_active;
			}
			if was_admin && !is_active_admin(&user) {
				ensure_other_admin(&mut tx.tx).await?;
			}

			let now = OffsetDateTime::now_utc();

			user.updated_at = now;

			accounts::update_user_profile(&mut *tx.tx, &user).await?;

			let revoked = if user.role != old_role || user.is_active != was_active {
				accounts::revoke_user_sessions(&mut *tx.tx, user.user_id, now).await?
			} else {
				0
			};

			if revoked > 0 {
				tracing::info!(
					username = %user.username,
					revoked,
					"Sessions revoked after access change."
				);
			}

			let details = json!({
				"before": before,
				"after": { "role": user.role, "is_active": user.is_active },
				"revoked_sessions": revoked,
			});

			Ok::<_, Error>((UserView::from(user), details))
		}
		.await;

		self.settle(tx, &principal, Action::ManageUsers, Some(&target), outcome).await
	}

	/// Sets a new password chosen by an administrator and ends the user's open sessions.
	pub async fn reset_password(
		&self,
		session: &Session,
		username: &str,
		new_password: &str,
	) -> Result<()> {
		let target = password::normalize_username(username);
		let (principal, mut tx) = self.gate(session, Action::ManageUsers, Some(&target)).await?;
		let outcome = async {
			let user = find_user(&mut tx.tx, &target).await?;

			check_password(new_password)?;

			let hash =
				gate::hash_password_off_thread(&self.cfg.security.argon2, new_password).await?;
			let now = OffsetDateTime::now_utc();

			accounts::set_password_hash(&mut *tx.tx, user.user_id, &hash, now).await?;
			accounts::push_password_history(&mut *tx.tx, user.user_id, &hash, now).await?;

			let revoked = accounts::revoke_user_sessions(&mut *tx.tx, user.user_id, now).await?;

			Ok::<_, Error>(((), json!({ "password_reset": true, "revoked_sessions": revoked })))
		}
		.await;

		self.settle(tx, &principal, Action::ManageUsers, Some(&target), outcome).await
	}

	/// Returns `false` when no such user exists.
	pub async fn delete_user(&self, session: &Session, username: &str) -> Result<bool> {
		let target = password::normalize_username(username);
		let (principal, mut tx) = self.gate(session, Action::ManageUsers, Some(&target)).await?;
		let outcome = async {
			let Some(user) = accounts::get_user_by_username(&mut *tx.tx, &target).await? else {
				return Ok((false, json!({ "removed": false })));
			};

			if is_active_admin(&user) {
				ensure_other_admin(&mut tx.tx).await?;
			}

			let removed = accounts::delete_user(&mut *tx.tx, user.user_id).await?;

			tracing::info!(username = %target, "User removed.");

			Ok::<_, Error>((removed, json!({ "removed": removed, "role": user.role })))
		}
		.await;

		self.settle(tx, &principal, Action::ManageUsers, Some(&target), outcome).await
	}

	pub async fn list_users(&self, session: &Session) -> Result<Vec<UserView>> {
		let (principal, mut tx) = self.gate(session, Action::ManageUsers, None).await?;
		let outcome = accounts::list_users(&mut *tx.tx).await.map_err(Error::from).map(|users| {
			let count = users.len();

			(users.into_iter().map(UserView::from).collect(), json!({ "returned": count }))
		});

		self.settle(tx, &principal, Action::ManageUsers, None, outcome).await
	}

	/// Changes the caller's own password.
	///
	/// The current password must verify, the new one must pass the strength rules, and it may
	/// not match any of the last `security.password_history_depth` passwords.
	pub async fn change_password(
		&self,
		session: &Session,
		current_password: &str,
		new_password: &str,
	) -> Result<()> {
		let (principal, mut tx) = self
			.open_session(session, CHANGE_PASSWORD_ACTION, None, Some(&session.username))
			.await?;
		let outcome = async {
			let user = accounts::get_user(&mut *tx.tx, principal.user_id)
				.await?
				.ok_or_else(|| Error::NotFound { message: format!("User {}.", principal.username) })?;

			if !gate::verify_password_off_thread(current_password, &user.password_hash).await? {
				return Err(Error::AuthenticationFailure);
			}

			check_password(new_password)?;

			let depth = i64::from(self.cfg.security.password_history_depth);
			let recent = accounts::recent_password_hashes(&mut *tx.tx, user.user_id, depth).await?;
			let mut reused = false;

			for phc in std::iter::once(&user.password_hash).chain(recent.iter()) {
				if gate::verify_password_off_thread(new_password, phc).await? {
					reused = true;

					break;
				}
			}

			if reused {
				return Err(Error::InvalidRequest {
					message: format!(
						"Password matches one of the last {depth} passwords; choose a new one."
					),
				});
			}

			let hash =
				gate::hash_password_off_thread(&self.cfg.security.argon2, new_password).await?;
			let now = OffsetDateTime::now_utc();

			accounts::set_password_hash(&mut *tx.tx, user.user_id, &hash, now).await?;
			accounts::push_password_history(&mut *tx.tx, user.user_id, &hash, now).await?;

			Ok::<_, Error>(((), json!({ "password_changed": true })))
		}
		.await;

		if outcome.is_ok() {
			tracing::info!(username = %principal.username, "Password changed.");
		}

		self.settle_as(tx, &principal, CHANGE_PASSWORD_ACTION, Some(&principal.username), outcome)
			.await
	}

	/// Recent login attempts, newest first, optionally for one username.
	pub async fn login_history(
		&self,
		session: &Session,
		username: Option<&str>,
		limit: u32,
	) -> Result<Vec<LoginRecord>> {
		let target = username.map(password::normalize_username);
		let (principal, mut tx) =
			self.gate(session, Action::ManageUsers, target.as_deref()).await?;
		let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
		let outcome = accounts::login_history(&mut *tx.tx, target.as_deref(), i64::from(limit))
			.await
			.map_err(Error::from)
			.map(|rows| {
				let count = rows.len();

				(
					rows.into_iter().map(LoginRecord::from).collect(),
					json!({ "login_history": true, "returned": count }),
				)
			});

		self.settle(tx, &principal, Action::ManageUsers, target.as_deref(), outcome).await
	}
}

fn validate_username(raw: &str) -> Result<String> {
	let username = password::normalize_username(raw);
	let valid = !username.is_empty()
		&& username.chars().count() <= MAX_USERNAME_CHARS
		&& username.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));

	if !valid {
		return Err(Error::InvalidRequest {
			message: "Username must be 1-64 letters, digits, '.', '_' or '-'.".to_string(),
		});
	}

	Ok(username)
}

fn required_text(raw: &str, field: &str) -> Result<String> {
	let value = raw.trim();

	if value.is_empty() {
		return Err(Error::InvalidRequest { message: format!("{field} must not be empty.") });
	}

	Ok(value.to_string())
}

fn non_blank(raw: Option<String>) -> Option<String> {
	raw.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn check_password(candidate: &str) -> Result<()> {
	password::check_strength(candidate)
		.map_err(|weakness| Error::InvalidRequest { message: weakness.message().to_string() })
}

fn is_active_admin(user: &User) -> bool {
	user.is_active && user.role == Role::Admin.as_str()
}

async fn find_user(conn: &mut SqliteConnection, username: &str) -> Result<User> {
	accounts::get_user_by_username(conn, username)
		.await?
		.ok_or_else(|| Error::NotFound { message: format!("User {username}.") })
}

async fn ensure_other_admin(conn: &mut SqliteConnection) -> Result<()> {
	if accounts::count_active_admins(conn).await? <= 1 {
		return Err(Error::InvalidRequest {
			message: "Refusing to remove the last active administrator.".to_string(),
		});
	}

	Ok(())
}

fn user_row(
	new: &NewUser,
	username: String,
	full_name: String,
	role: Role,
	password_hash: String,
	created_by: Option<&str>,
) -> User {
	let now = OffsetDateTime::now_utc();

	User {
		user_id: Uuid::new_v4(),
		created_by: created_by.map_or_else(|| username.clone(), str::to_string),
		username,
		password_hash,
		full_name,
		role: role.as_str().to_string(),
		email: non_blank(new.email.clone()),
		badge_number: non_blank(new.badge_number.clone()),
		department: non_blank(new.department.clone()),
		is_active: true,
		created_at: now,
		updated_at: now,
		last_login_at: None,
	}
}
