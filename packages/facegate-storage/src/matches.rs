use sqlx::SqliteExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{MatchCounts, MatchExportRow, MatchResultRecord},
};

pub async fn insert_match_result<'e, E>(executor: E, record: &MatchResultRecord) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO match_results (
	result_id,
	query_id,
	query_label,
	identity_id,
	embedding_id,
	similarity,
	bucket,
	embedding_captured_at,
	matched_by,
	matched_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(record.result_id)
	.bind(record.query_id)
	.bind(record.query_label.as_deref())
	.bind(record.identity_id.as_str())
	.bind(record.embedding_id)
	.bind(record.similarity)
	.bind(record.bucket.as_str())
	.bind(record.embedding_captured_at)
	.bind(record.matched_by.as_str())
	.bind(record.matched_at)
	.execute(executor)
	.await?;

	Ok(())
}

/// Stored results, newest first, in rank order within one query.
pub async fn export_match_results<'e, E>(
	executor: E,
	query_id: Option<Uuid>,
	since: Option<OffsetDateTime>,
	limit: i64,
) -> Result<Vec<MatchExportRow>>
where
	E: SqliteExecutor<'e>,
{
	Ok(sqlx::query_as::<_, MatchExportRow>(
		"\
SELECT
	m.result_id,
	m.query_id,
	m.query_label,
	m.identity_id,
	m.embedding_id,
	m.similarity,
	m.bucket,
	m.embedding_captured_at,
	m.matched_by,
	m.matched_at,
	i.name AS identity_name
FROM match_results m
LEFT JOIN identities i ON i.identity_id = m.identity_id
WHERE (?1 IS NULL OR m.query_id = ?1)
	AND (?2 IS NULL OR julianday(m.matched_at) >= julianday(?2))
ORDER BY julianday(m.matched_at) DESC, m.query_id, m.similarity DESC, m.embedding_id
LIMIT ?3",
	)
	.bind(query_id)
	.bind(since)
	.bind(limit)
	.fetch_all(executor)
	.await?)
}

pub async fn match_counts<'e, E>(executor: E) -> Result<MatchCounts>
where
	E: SqliteExecutor<'e>,
{
	let (results, queries, high, medium, low): (i64, i64, i64, i64, i64) = sqlx::query_as(
		"\
SELECT
	COUNT(*),
	COUNT(DISTINCT query_id),
	COALESCE(SUM(bucket = 'high'), 0),
	COALESCE(SUM(bucket = 'medium'), 0),
	COALESCE(SUM(bucket = 'low'), 0)
FROM match_results",
	)
	.fetch_one(executor)
	.await?;

	Ok(MatchCounts { results, queries, high, medium, low })
}
