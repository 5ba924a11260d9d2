//! Embedding store: identities, their embeddings, and cached gallery snapshots.
//!
//! Writers run inside the caller's transaction and bump the gallery version in that same
//! transaction. Readers compare the stored version with the cached snapshot and reload only when
//! it moved, so writes from other processes are observed on the next snapshot.

use std::{slice, sync::Arc};

use serde_json::Value;
use sqlx::SqliteConnection;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Error, Result};
use facegate_domain::similarity::{self, VectorDefect};
use facegate_storage::{
	db::Db,
	gallery,
	models::{Embedding, Identity},
};

pub const IDENTITY_STATUSES: [&str; 3] = ["active", "inactive", "archived"];

#[derive(Clone, Debug)]
pub struct GalleryItem {
	pub identity_id: String,
	pub identity_name: String,
	pub embedding_id: Uuid,
	pub vector: Vec<f32>,
	pub quality: f32,
	pub captured_at: OffsetDateTime,
}

/// An immutable view of every stored embedding at one gallery version.
#[derive(Debug)]
pub struct GallerySnapshot {
	version: i64,
	dim: usize,
	items: Vec<GalleryItem>,
}
impl GallerySnapshot {
	pub fn new(version: i64, dim: usize, items: Vec<GalleryItem>) -> Self {
		Self { version, dim, items }
	}

	pub fn version(&self) -> i64 {
		self.version
	}

	pub fn dim(&self) -> usize {
		self.dim
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// Each call starts a fresh pass over the same items.
	pub fn iter(&self) -> slice::Iter<'_, GalleryItem> {
		self.items.iter()
	}
}
impl<'a> IntoIterator for &'a GallerySnapshot {
	type IntoIter = slice::Iter<'a, GalleryItem>;
	type Item = &'a GalleryItem;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

#[derive(Clone, Debug)]
pub struct NewEmbedding<'a> {
	pub identity_id: &'a str,
	pub name: Option<&'a str>,
	pub metadata: Option<&'a Value>,
	pub vector: &'a [f32],
	pub quality: f32,
	pub captured_at: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnrollOutcome {
	pub embedding_id: Uuid,
	pub identity_created: bool,
}

pub struct EmbeddingStore {
	db: Db,
	dim: usize,
	cached: RwLock<Option<Arc<GallerySnapshot>>>,
}
impl EmbeddingStore {
	pub fn new(db: Db, dim: usize) -> Self {
		Self { db, dim, cached: RwLock::new(None) }
	}

	pub fn dim(&self) -> usize {
		self.dim
	}

	pub fn check_vector(&self, vector: &[f32]) -> Result<()> {
		similarity::check_vector(vector, self.dim).map_err(invalid_embedding)
	}

	/// Adds one embedding, creating the identity when `name` is given and the id is new.
	pub async fn enroll(
		&self,
		conn: &mut SqliteConnection,
		embedding: &NewEmbedding<'_>,
		actor: &str,
	) -> Result<EnrollOutcome> {
		let identity_id = embedding.identity_id.trim();

		if identity_id.is_empty() {
			return Err(Error::InvalidRequest { message: "identity_id is required.".to_string() });
		}
		if !(0.0..=1.0).contains(&embedding.quality) {
			return Err(Error::InvalidRequest {
				message: "quality must be in the range 0.0-1.0.".to_string(),
			});
		}

		self.check_vector(embedding.vector)?;

		let name = embedding.name.map(str::trim).filter(|name| !name.is_empty());

		gallery::bump_gallery_version(&mut *conn).await?;

		let existing = gallery::get_identity(&mut *conn, identity_id).await?;
		let identity_created = match (existing, name) {
			(Some(identity), Some(name)) if !same_name(&identity.name, name) =>
				return Err(Error::DuplicateIdentity { identity_id: identity_id.to_string() }),
			(Some(_), _) => false,
			(None, None) =>
				return Err(Error::InvalidRequest {
					message: format!("Identity {identity_id} does not exist; a name is required to create it."),
				}),
			(None, Some(name)) => {
				let identity = Identity {
					identity_id: identity_id.to_string(),
					name: name.to_string(),
					metadata: embedding.metadata.cloned().unwrap_or_else(gallery::empty_metadata),
					status: "active".to_string(),
					created_by: actor.to_string(),
					updated_by: actor.to_string(),
					created_at: embedding.captured_at,
					updated_at: embedding.captured_at,
				};

				gallery::insert_identity(&mut *conn, &identity).await?;

				true
			},
		};
		let record = Embedding {
			embedding_id: Uuid::new_v4(),
			identity_id: identity_id.to_string(),
			vec: embedding.vector.to_vec(),
			quality: embedding.quality,
			captured_at: embedding.captured_at,
			captured_by: actor.to_string(),
		};

		gallery::insert_embedding(&mut *conn, &record).await?;

		Ok(EnrollOutcome { embedding_id: record.embedding_id, identity_created })
	}

	/// Returns whether the identity existed. Unknown ids are a no-op.
	pub async fn remove_identity(
		&self,
		conn: &mut SqliteConnection,
		identity_id: &str,
	) -> Result<bool> {
		gallery::bump_gallery_version(&mut *conn).await?;

		Ok(gallery::delete_identity(&mut *conn, identity_id.trim()).await?)
	}

	pub async fn remove_embedding(
		&self,
		conn: &mut SqliteConnection,
		embedding_id: Uuid,
	) -> Result<bool> {
		gallery::bump_gallery_version(&mut *conn).await?;

		Ok(gallery::delete_embedding(&mut *conn, embedding_id).await?)
	}

	pub async fn update_identity(
		&self,
		conn: &mut SqliteConnection,
		identity: &Identity,
	) -> Result<bool> {
		if !IDENTITY_STATUSES.contains(&identity.status.as_str()) {
			return Err(Error::InvalidRequest {
				message: format!("Unknown identity status {:?}.", identity.status),
			});
		}
		if identity.name.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "name must be non-empty.".to_string() });
		}

		gallery::bump_gallery_version(&mut *conn).await?;

		Ok(gallery::update_identity(&mut *conn, identity).await?)
	}

	/// The current gallery, reloaded only when another write moved the version.
	pub async fn all_embeddings(&self) -> Result<Arc<GallerySnapshot>> {
		let version = gallery::gallery_version(&self.db.pool).await?;

		if let Some(snapshot) = self.cached.read().await.as_ref()
			&& snapshot.version == version
		{
			return Ok(snapshot.clone());
		}

		let mut tx = self.db.begin().await?;
		let version = gallery::gallery_version(&mut *tx).await?;
		let entries = gallery::load_gallery(&mut *tx).await?;

		tx.commit().await?;

		let items = entries
			.into_iter()
			.map(|entry| GalleryItem {
				identity_id: entry.embedding.identity_id,
				identity_name: entry.identity_name,
				embedding_id: entry.embedding.embedding_id,
				vector: entry.embedding.vec,
				quality: entry.embedding.quality,
				captured_at: entry.embedding.captured_at,
			})
			.collect::<Vec<_>>();
		let snapshot = Arc::new(GallerySnapshot::new(version, self.dim, items));
		let mut cached = self.cached.write().await;

		if cached.as_ref().is_none_or(|current| current.version <= version) {
			*cached = Some(snapshot.clone());
		}

		tracing::debug!(version, embeddings = snapshot.len(), "Gallery snapshot loaded.");

		Ok(snapshot)
	}
}

pub(crate) fn invalid_embedding(defect: VectorDefect) -> Error {
	Error::InvalidEmbedding { message: defect.to_string() }
}

fn same_name(stored: &str, requested: &str) -> bool {
	stored.trim().to_lowercase() == requested.trim().to_lowercase()
}
