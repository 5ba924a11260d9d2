use serde_json::Value;
use sqlx::{SqliteExecutor, types::Json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{Embedding, GalleryCounts, GalleryEntry, Identity, IdentitySummary},
	vector,
};

/// Filters for a page of identities.
#[derive(Clone, Debug, Default)]
pub struct IdentityFilter<'a> {
	pub status: Option<&'a str>,
	/// Case-insensitive substring of the identity id or the name. `%` and `_` match literally.
	pub search: Option<&'a str>,
}

#[derive(sqlx::FromRow)]
struct EmbeddingRow {
	embedding_id: Uuid,
	identity_id: String,
	dim: i64,
	vec: Vec<u8>,
	quality: f32,
	captured_at: OffsetDateTime,
	captured_by: String,
}
impl EmbeddingRow {
	fn into_embedding(self) -> Result<Embedding> {
		Ok(Embedding {
			vec: vector::decode(&self.vec, self.dim)?,
			embedding_id: self.embedding_id,
			identity_id: self.identity_id,
			quality: self.quality,
			captured_at: self.captured_at,
			captured_by: self.captured_by,
		})
	}
}

#[derive(sqlx::FromRow)]
struct GalleryRow {
	identity_name: String,
	#[sqlx(flatten)]
	embedding: EmbeddingRow,
}

pub async fn gallery_version<'e, E>(executor: E) -> Result<i64>
where
	E: SqliteExecutor<'e>,
{
	let version: i64 =
		sqlx::query_scalar("SELECT version FROM gallery_meta WHERE singleton = 1")
			.fetch_one(executor)
			.await?;

	Ok(version)
}

/// Must run inside the transaction that performs the gallery write.
pub async fn bump_gallery_version<'e, E>(executor: E) -> Result<i64>
where
	E: SqliteExecutor<'e>,
{
	let version: i64 = sqlx::query_scalar(
		"UPDATE gallery_meta SET version = version + 1 WHERE singleton = 1 RETURNING version",
	)
	.fetch_one(executor)
	.await?;

	Ok(version)
}

pub async fn insert_identity<'e, E>(executor: E, identity: &Identity) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	sqlx::query(
		"\
INSERT INTO identities (
	identity_id,
	name,
	metadata,
	status,
	created_by,
	updated_by,
	created_at,
	updated_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(identity.identity_id.as_str())
	.bind(identity.name.as_str())
	.bind(Json(&identity.metadata))
	.bind(identity.status.as_str())
	.bind(identity.created_by.as_str())
	.bind(identity.updated_by.as_str())
	.bind(identity.created_at)
	.bind(identity.updated_at)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_identity<'e, E>(executor: E, identity_id: &str) -> Result<Option<Identity>>
where
	E: SqliteExecutor<'e>,
{
	let identity = sqlx::query_as::<_, Identity>(
		"\
SELECT
	identity_id,
	name,
	metadata,
	status,
	created_by,
	updated_by,
	created_at,
	updated_at
FROM identities
WHERE identity_id = ?",
	)
	.bind(identity_id)
	.fetch_optional(executor)
	.await?;

	Ok(identity)
}

pub async fn update_identity<'e, E>(executor: E, identity: &Identity) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query(
		"\
UPDATE identities
SET
	name = ?,
	metadata = ?,
	status = ?,
	updated_by = ?,
	updated_at = ?
WHERE identity_id = ?",
	)
	.bind(identity.name.as_str())
	.bind(Json(&identity.metadata))
	.bind(identity.status.as_str())
	.bind(identity.updated_by.as_str())
	.bind(identity.updated_at)
	.bind(identity.identity_id.as_str())
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}

/// Embeddings go with the identity through the foreign key cascade.
pub async fn delete_identity<'e, E>(executor: E, identity_id: &str) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM identities WHERE identity_id = ?")
		.bind(identity_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn list_identities<'e, E>(
	executor: E,
	filter: &IdentityFilter<'_>,
	limit: i64,
	offset: i64,
) -> Result<Vec<IdentitySummary>>
where
	E: SqliteExecutor<'e>,
{
	let pattern = filter.search.map(like_pattern);
	let rows = sqlx::query_as::<_, IdentitySummary>(
		"\
SELECT
	i.identity_id,
	i.name,
	i.metadata,
	i.status,
	i.created_by,
	i.updated_by,
	i.created_at,
	i.updated_at,
	COUNT(e.embedding_id) AS embedding_count
FROM identities i
LEFT JOIN embeddings e ON e.identity_id = i.identity_id
WHERE (? IS NULL OR i.status = ?)
	AND (? IS NULL OR i.identity_id LIKE ? ESCAPE '\\' OR i.name LIKE ? ESCAPE '\\')
GROUP BY i.identity_id
ORDER BY i.identity_id
LIMIT ? OFFSET ?",
	)
	.bind(filter.status)
	.bind(filter.status)
	.bind(pattern.as_deref())
	.bind(pattern.as_deref())
	.bind(pattern.as_deref())
	.bind(limit)
	.bind(offset)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

fn like_pattern(search: &str) -> String {
	let mut pattern = String::with_capacity(search.len() + 2);

	pattern.push('%');

	for c in search.chars() {
		if matches!(c, '\\' | '%' | '_') {
			pattern.push('\\');
		}

		pattern.push(c);
	}

	pattern.push('%');

	pattern
}

pub async fn insert_embedding<'e, E>(executor: E, embedding: &Embedding) -> Result<()>
where
	E: SqliteExecutor<'e>,
{
	let dim = i64::try_from(embedding.vec.len()).unwrap_or(i64::MAX);

	sqlx::query(
		"\
INSERT INTO embeddings (
	embedding_id,
	identity_id,
	dim,
	vec,
	quality,
	captured_at,
	captured_by
)
VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(embedding.embedding_id)
	.bind(embedding.identity_id.as_str())
	.bind(dim)
	.bind(vector::encode(&embedding.vec))
	.bind(embedding.quality)
	.bind(embedding.captured_at)
	.bind(embedding.captured_by.as_str())
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn get_embedding<'e, E>(executor: E, embedding_id: Uuid) -> Result<Option<Embedding>>
where
	E: SqliteExecutor<'e>,
{
	let row = sqlx::query_as::<_, EmbeddingRow>(
		"\
SELECT
	embedding_id,
	identity_id,
	dim,
	vec,
	quality,
	captured_at,
	captured_by
FROM embeddings
WHERE embedding_id = ?",
	)
	.bind(embedding_id)
	.fetch_optional(executor)
	.await?;

	row.map(EmbeddingRow::into_embedding).transpose()
}

pub async fn delete_embedding<'e, E>(executor: E, embedding_id: Uuid) -> Result<bool>
where
	E: SqliteExecutor<'e>,
{
	let result = sqlx::query("DELETE FROM embeddings WHERE embedding_id = ?")
		.bind(embedding_id)
		.execute(executor)
		.await?;

	Ok(result.rows_affected() > 0)
}

pub async fn list_embeddings<'e, E>(executor: E, identity_id: &str) -> Result<Vec<Embedding>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, EmbeddingRow>(
		"\
SELECT
	embedding_id,
	identity_id,
	dim,
	vec,
	quality,
	captured_at,
	captured_by
FROM embeddings
WHERE identity_id = ?
ORDER BY julianday(captured_at), embedding_id",
	)
	.bind(identity_id)
	.fetch_all(executor)
	.await?;

	rows.into_iter().map(EmbeddingRow::into_embedding).collect()
}

/// Every stored embedding with its owner's name. Ordering here carries no meaning.
pub async fn load_gallery<'e, E>(executor: E) -> Result<Vec<GalleryEntry>>
where
	E: SqliteExecutor<'e>,
{
	let rows = sqlx::query_as::<_, GalleryRow>(
		"\
SELECT
	i.name AS identity_name,
	e.embedding_id,
	e.identity_id,
	e.dim,
	e.vec,
	e.quality,
	e.captured_at,
	e.captured_by
FROM embeddings e
JOIN identities i ON i.identity_id = e.identity_id",
	)
	.fetch_all(executor)
	.await?;

	rows.into_iter()
		.map(|row| {
			Ok(GalleryEntry {
				identity_name: row.identity_name,
				embedding: row.embedding.into_embedding()?,
			})
		})
		.collect()
}

pub async fn gallery_counts<'e, E>(executor: E) -> Result<GalleryCounts>
where
	E: SqliteExecutor<'e>,
{
	let (identities, active_identities, embeddings): (i64, i64, i64) = sqlx::query_as(
		"\
SELECT
	(SELECT COUNT(*) FROM identities),
	(SELECT COUNT(*) FROM identities WHERE status = 'active'),
	(SELECT COUNT(*) FROM embeddings)",
	)
	.fetch_one(executor)
	.await?;

	Ok(GalleryCounts { identities, active_identities, embeddings })
}

pub fn empty_metadata() -> Value {
	Value::Object(Default::default())
}
