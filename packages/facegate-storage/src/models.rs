use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Identity {
	pub identity_id: String,
	pub name: String,
	pub metadata: Value,
	pub status: String,
	pub created_by: String,
	pub updated_by: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct IdentitySummary {
	#[sqlx(flatten)]
	pub identity: Identity,
	pub embedding_count: i64,
}

#[derive(Clone, Debug)]
pub struct Embedding {
	pub embedding_id: Uuid,
	pub identity_id: String,
	pub vec: Vec<f32>,
	pub quality: f32,
	pub captured_at: OffsetDateTime,
	pub captured_by: String,
}

/// One gallery row: an embedding joined with its owner's display name.
#[derive(Clone, Debug)]
pub struct GalleryEntry {
	pub identity_name: String,
	pub embedding: Embedding,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct User {
	pub user_id: Uuid,
	pub username: String,
	pub password_hash: String,
	pub full_name: String,
	pub role: String,
	pub email: Option<String>,
	pub badge_number: Option<String>,
	pub department: Option<String>,
	pub is_active: bool,
	pub created_by: String,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct LoginAttempt {
	pub seq: i64,
	pub username: String,
	pub user_id: Option<Uuid>,
	pub outcome: String,
	pub reason: Option<String>,
	pub opens_lockout: bool,
	pub attempted_at: OffsetDateTime,
}

#[derive(Clone, Copy, Debug)]
pub struct NewLoginAttempt<'a> {
	pub username: &'a str,
	pub user_id: Option<Uuid>,
	pub outcome: &'a str,
	pub reason: Option<&'a str>,
	pub opens_lockout: bool,
	pub attempted_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SessionRecord {
	pub session_id: Uuid,
	pub token_hash: String,
	pub user_id: Uuid,
	pub role: String,
	pub created_at: OffsetDateTime,
	pub last_activity_at: OffsetDateTime,
	pub expires_at: OffsetDateTime,
	pub ended_at: Option<OffsetDateTime>,
	pub end_reason: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ActivityEntry {
	pub seq: i64,
	pub actor: String,
	pub action: String,
	pub target: Option<String>,
	pub outcome: String,
	pub details: Value,
	pub logged_at: OffsetDateTime,
}

#[derive(Clone, Debug)]
pub struct NewActivity<'a> {
	pub actor: &'a str,
	pub action: &'a str,
	pub target: Option<&'a str>,
	pub outcome: &'a str,
	pub details: Value,
	pub logged_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MatchResultRecord {
	pub result_id: Uuid,
	pub query_id: Uuid,
	pub query_label: Option<String>,
	pub identity_id: String,
	pub embedding_id: Uuid,
	pub similarity: f32,
	pub bucket: String,
	pub embedding_captured_at: OffsetDateTime,
	pub matched_by: String,
	pub matched_at: OffsetDateTime,
}

/// Stored match joined with the identity name, when the identity still exists.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct MatchExportRow {
	#[sqlx(flatten)]
	pub record: MatchResultRecord,
	pub identity_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GalleryCounts {
	pub identities: i64,
	pub active_identities: i64,
	pub embeddings: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchCounts {
	pub results: i64,
	pub queries: i64,
	pub high: i64,
	pub medium: i64,
	pub low: i64,
}
