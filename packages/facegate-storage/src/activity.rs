use sqlx::{SqliteExecutor, types::Json};
use time::OffsetDateTime;

use crate::{
	Result,
	models::{ActivityEntry, NewActivity},
};

/// Filters for a page of the activity log. `after_seq` is the keyset cursor.
#[derive(Clone, Debug, Default)]
pub struct ActivityFilter<'a> {
	pub actor: Option<&'a str>,
	pub action: Option<&'a str>,
	pub outcome: Option<&'a str>,
	pub since: Option<OffsetDateTime>,
	pub until: Option<OffsetDateTime>,
}

pub async fn insert_activity<'e, E>(executor: E, entry: &NewActivity<'_>) -> Result<i64>
where
	E: SqliteExecutor<'e>,
{
	let seq: i64 = sqlx::query_scalar(
		"\
INSERT INTO activity_log (actor, action, target, outcome, details, logged_at)
VALUES (?, ?, ?, ?, ?, ?)
RETURNING seq",
	)
	.bind(entry.actor)
	.bind(entry.action)
	.bind(entry.target)
	.bind(entry.outcome)
	.bind(Json(&entry.details))
	.bind(entry.logged_at)
	.fetch_one(executor)
	.await?;

	Ok(seq)
}

/// Entries with `seq > after_seq` matching the filter, oldest first.
pub async fn activity_page<'e, E>(
	executor: E,
	filter: &ActivityFilter<'_>,
	after_seq: i64,
	limit: i64,
) -> Result<Vec<ActivityEntry>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, ActivityEntry>(
		"\
SELECT seq, actor, action, target, outcome, details, logged_at
FROM activity_log
WHERE seq > ?1
	AND (?2 IS NULL OR actor = ?2)
	AND (?3 IS NULL OR action = ?3)
	AND (?4 IS NULL OR outcome = ?4)
	AND (?5 IS NULL OR julianday(logged_at) >= julianday(?5))
	AND (?6 IS NULL OR julianday(logged_at) <= julianday(?6))
ORDER BY seq
LIMIT ?7",
	)
	.bind(after_seq)
	.bind(filter.actor)
	.bind(filter.action)
	.bind(filter.outcome)
	.bind(filter.since)
	.bind(filter.until)
	.bind(limit)
	.fetch_all(executor)
	.await?)
}

pub async fn count_activity<'e, E>(executor: E) -> Result<i64>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_scalar("SELECT COUNT(*) FROM activity_log").fetch_one(executor).await?)
}
