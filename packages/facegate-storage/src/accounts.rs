use sqlx::SqliteExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{LoginAttempt, NewLoginAttempt, SessionRecord, User},
};

const USER_COLUMNS: &str = "\
	user_id,
	username,
	password_hash,
	full_name,
	role,
	email,
	badge_number,
	department,
	is_active,
	created_by,
	created_at,
	updated_at,
	last_login_at";

pub async fn count_users<'e, E>(executor: E) -> Result<i64>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(executor).await?)
}

pub async fn count_active_admins<'e, E>(executor: E) -> Result<i64>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin' AND is_active = 1")
		.fetch_one(executor)
		.await?)
}

pub async fn insert_user<'e, E>(executor: E, user: &User) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(&format!(
		"INSERT INTO users ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
	))
	.bind(user.user_id)
	.bind(user.username.as_str())
	.bind(user.password_hash.as_str())
	.bind(user.full_name.as_str())
	.bind(user.role.as_str())
	.bind(user.email.as_deref())
	.bind(user.badge_number.as_deref())
	.bind(user.department.as_deref())
	.bind(user.is_active)
	.bind(user.created_by.as_str())
	.bind(user.created_at)
	.bind(user.updated_at)
	.bind(user.last_login_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_user_by_username<'e, E>(executor: E, username: &str) -> Result<Option<User>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?"))
		.bind(username)
		.fetch_optional(executor)
		.await?)
}

pub async fn get_user<'e, E>(executor: E, user_id: Uuid) -> Result<Option<User>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?"))
		.bind(user_id)
		.fetch_optional(executor)
		.await?)
}

pub async fn list_users<'e, E>(executor: E) -> Result<Vec<User>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))
		.fetch_all(executor)
		.await?)
}

/// Updates profile fields, role and active flag. The password hash is left alone.
pub async fn update_user_profile<'e, E>(executor: E, user: &User) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE users
SET
	full_name = ?,
	role = ?,
	email = ?,
	badge_number = ?,
	department = ?,
	is_active = ?,
	updated_at = ?
WHERE user_id = ?",
	)
	.bind(user.full_name.as_str())
	.bind(user.role.as_str())
	.bind(user.email.as_deref())
	.bind(user.badge_number.as_deref())
	.bind(user.department.as_deref())
	.bind(user.is_active)
	.bind(user.updated_at)
	.bind(user.user_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn set_password_hash<'e, E>(
	executor: E,
	user_id: Uuid,
	password_hash: &str,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE user_id = ?")
		.bind(password_hash)
		.bind(now)
		.bind(user_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn record_login<'e, E>(executor: E, user_id: Uuid, now: OffsetDateTime) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query("UPDATE users SET last_login_at = ? WHERE user_id = ?")
		.bind(now)
		.bind(user_id)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn delete_user<'e, E>(executor: E, user_id: Uuid) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result =
		sqlx::query("DELETE FROM users WHERE user_id = ?").bind(user_id).execute(executor).await?;

	Ok(result.rows_affected() > 0)
}

pub async fn push_password_history<'e, E>(
	executor: E,
	user_id: Uuid,
	password_hash: &str,
	now: OffsetDateTime,
) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query("INSERT INTO password_history (user_id, password_hash, created_at) VALUES (?, ?, ?)")
		.bind(user_id)
		.bind(password_hash)
		.bind(now)
		.execute(executor)
		.await?;

	Ok(())
}

/// Most recent hashes first.
pub async fn recent_password_hashes<'e, E>(
	executor: E,
	user_id: Uuid,
	depth: i64,
) -> Result<Vec<String>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_scalar(
		"\
SELECT password_hash
FROM password_history
WHERE user_id = ?
ORDER BY seq DESC
LIMIT ?",
	)
	.bind(user_id)
	.bind(depth)
	.fetch_all(executor)
	.await?)
}

pub async fn insert_login_attempt<'e, E>(executor: E, attempt: &NewLoginAttempt<'_>) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO login_attempts (username, user_id, outcome, reason, opens_lockout, attempted_at)
VALUES (?, ?, ?, ?, ?, ?)",
	)
	.bind(attempt.username)
	.bind(attempt.user_id)
	.bind(attempt.outcome)
	.bind(attempt.reason)
	.bind(attempt.opens_lockout)
	.bind(attempt.attempted_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Attempts since the current streak began, oldest first.
///
/// A streak begins at the most recent success or at the most recent failure that opened a
/// lockout window, whichever is later, and that row is included. Older rows cannot change the
/// lockout state.
pub async fn current_streak<'e, E>(executor: E, username: &str) -> Result<Vec<LoginAttempt>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, LoginAttempt>(
		"\
SELECT seq, username, user_id, outcome, reason, opens_lockout, attempted_at
FROM login_attempts
WHERE username = ?1
	AND seq >= COALESCE(
		(
			SELECT seq
			FROM login_attempts
			WHERE username = ?1 AND (outcome = 'success' OR opens_lockout = 1)
			ORDER BY seq DESC
			LIMIT 1
		),
		0
	)
ORDER BY seq",
	)
	.bind(username)
	.fetch_all(executor)
	.await?)
}

/// Newest first.
pub async fn login_history<'e, E>(
	executor: E,
	username: Option<&str>,
	limit: i64,
) -> Result<Vec<LoginAttempt>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, LoginAttempt>(
		"\
SELECT seq, username, user_id, outcome, reason, opens_lockout, attempted_at
FROM login_attempts
WHERE (?1 IS NULL OR username = ?1)
ORDER BY seq DESC
LIMIT ?2",
	)
	.bind(username)
	.bind(limit)
	.fetch_all(executor)
	.await?)
}

pub async fn insert_session<'e, E>(executor: E, session: &SessionRecord) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO sessions (
	session_id,
	token_hash,
	user_id,
	role,
	created_at,
	last_activity_at,
	expires_at,
	ended_at,
	end_reason
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(session.session_id)
	.bind(session.token_hash.as_str())
	.bind(session.user_id)
	.bind(session.role.as_str())
	.bind(session.created_at)
	.bind(session.last_activity_at)
	.bind(session.expires_at)
	.bind(session.ended_at)
	.bind(session.end_reason.as_deref())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_session_by_token_hash<'e, E>(
	executor: E,
	token_hash: &str,
) -> Result<Option<SessionRecord>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, SessionRecord>(
		"\
SELECT
	session_id,
	token_hash,
	user_id,
	role,
	created_at,
	last_activity_at,
	expires_at,
	ended_at,
	end_reason
FROM sessions
WHERE token_hash = ?",
	)
	.bind(token_hash)
	.fetch_optional(executor)
	.await?)
}

pub async fn touch_session<'e, E>(
	executor: E,
	session_id: Uuid,
	now: OffsetDateTime,
	expires_at: OffsetDateTime,
) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
UPDATE sessions
SET last_activity_at = ?, expires_at = ?
WHERE session_id = ? AND ended_at IS NULL",
	)
	.bind(now)
	.bind(expires_at)
	.bind(session_id)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn end_session<'e, E>(
	executor: E,
	session_id: Uuid,
	reason: &str,
	now: OffsetDateTime,
) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE sessions
SET ended_at = ?, end_reason = ?
WHERE session_id = ? AND ended_at IS NULL",
	)
	.bind(now)
	.bind(reason)
	.bind(session_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

/// Ends every open session of the user; returns how many were open.
pub async fn revoke_user_sessions<'e, E>(
	executor: E,
	user_id: Uuid,
	now: OffsetDateTime,
) -> Result<u64>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE sessions
SET ended_at = ?, end_reason = 'revoked'
WHERE user_id = ? AND ended_at IS NULL",
	)
	.bind(now)
	.bind(user_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}
