use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Error, FacegateService, Result, Session,
	recognize,
	store::{EnrollOutcome, NewEmbedding},
};
use facegate_domain::access::Action;
use facegate_storage::{
	gallery::{self, IdentityFilter},
	models::{Embedding, Identity, IdentitySummary},
};

const MAX_LIST_LIMIT: u32 = 1_000;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct IdentityQuery {
	pub status: Option<String>,
	/// Case-insensitive substring of the identity id or the name.
	pub search: Option<String>,
	pub limit: Option<u32>,
	pub offset: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnrollRequest {
	pub identity_id: String,
	/// Required when the identity does not exist yet.
	pub name: Option<String>,
	pub metadata: Option<Value>,
	pub embedding: Vec<f32>,
	pub quality: f32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EnrollImageRequest {
	pub identity_id: String,
	pub name: Option<String>,
	pub metadata: Option<Value>,
	pub image: Vec<u8>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EnrollResponse {
	pub identity_id: String,
	pub embedding_id: Uuid,
	pub identity_created: bool,
	pub quality: f32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct IdentityPatch {
	pub name: Option<String>,
	pub metadata: Option<Value>,
	pub status: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EmbeddingView {
	pub embedding_id: Uuid,
	pub quality: f32,
	#[serde(with = "crate::time_serde")]
	pub captured_at: OffsetDateTime,
	pub captured_by: String,
}
impl From<Embedding> for EmbeddingView {
	fn from(embedding: Embedding) -> Self {
		Self {
			embedding_id: embedding.embedding_id,
			quality: embedding.quality,
			captured_at: embedding.captured_at,
			captured_by: embedding.captured_by,
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct IdentityView {
	pub identity_id: String,
	pub name: String,
	pub metadata: Value,
	pub status: String,
	pub created_by: String,
	pub updated_by: String,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
	#[serde(with = "crate::time_serde")]
	pub updated_at: OffsetDateTime,
	pub embedding_count: i64,
	pub embeddings: Vec<EmbeddingView>,
}
impl IdentityView {
	fn from_identity(identity: Identity, embeddings: Vec<EmbeddingView>) -> Self {
		Self {
			identity_id: identity.identity_id,
			name: identity.name,
			metadata: identity.metadata,
			status: identity.status,
			created_by: identity.created_by,
			updated_by: identity.updated_by,
			created_at: identity.created_at,
			updated_at: identity.updated_at,
			embedding_count: embeddings.len() as i64,
			embeddings,
		}
	}
}
impl From<IdentitySummary> for IdentityView {
	fn from(summary: IdentitySummary) -> Self {
		let mut view = Self::from_identity(summary.identity, Vec::new());

		view.embedding_count = summary.embedding_count;

		view
	}
}

impl FacegateService {
	/// Stores a precomputed embedding. Creating a new identity is gated as `add_identity`,
	/// attaching to an existing one as `add_embedding`.
	pub async fn enroll(&self, session: &Session, req: EnrollRequest) -> Result<EnrollResponse> {
		let action = if req.name.is_some() { Action::AddIdentity } else { Action::AddEmbedding };
		let identity_id = req.identity_id.trim().to_string();
		let (principal, mut tx) = self.gate(session, action, Some(&identity_id)).await?;
		let embedding = NewEmbedding {
			identity_id: &identity_id,
			name: req.name.as_deref(),
			metadata: req.metadata.as_ref(),
			vector: &req.embedding,
			quality: req.quality,
			captured_at: OffsetDateTime::now_utc(),
		};
		let outcome = self
			.store
			.enroll(&mut tx.tx, &embedding, &principal.username)
			.await
			.map(|outcome| enrolled(&identity_id, outcome, req.quality));

		if let Ok((response, _)) = &outcome {
			tracing::info!(
				identity_id = %identity_id,
				embedding_id = %response.embedding_id,
				created = response.identity_created,
				"Embedding enrolled."
			);
		}

		self.settle(tx, &principal, action, Some(&identity_id), outcome).await
	}

	/// Encodes the image, then enrolls the resulting vector with the encoder's quality score.
	pub async fn enroll_image(
		&self,
		session: &Session,
		req: EnrollImageRequest,
	) -> Result<EnrollResponse> {
		let action = if req.name.is_some() { Action::AddIdentity } else { Action::AddEmbedding };
		let identity_id = req.identity_id.trim().to_string();
		let principal = self.gate_detached(session, action, Some(&identity_id)).await?;
		let encoded = recognize::encode_image(
			self.encoder.as_ref(),
			&self.cfg.providers.encoder,
			self.store.dim(),
			&req.image,
		)
		.await;
		let mut tx = self.begin_write().await?;
		let outcome = match encoded {
			Ok(face) => {
				let embedding = NewEmbedding {
					identity_id: &identity_id,
					name: req.name.as_deref(),
					metadata: req.metadata.as_ref(),
					vector: &face.vector,
					quality: face.quality,
					captured_at: OffsetDateTime::now_utc(),
				};

				self.store
					.enroll(&mut tx.tx, &embedding, &principal.username)
					.await
					.map(|outcome| enrolled(&identity_id, outcome, face.quality))
			},
			Err(err) => Err(err),
		};

		self.settle(tx, &principal, action, Some(&identity_id), outcome).await
	}

	/// Deletes the identity and every embedding it owns. Unknown ids succeed without effect.
	pub async fn remove_identity(&self, session: &Session, identity_id: &str) -> Result<bool> {
		let identity_id = identity_id.trim();
		let (principal, mut tx) =
			self.gate(session, Action::DeleteIdentity, Some(identity_id)).await?;
		let outcome = self
			.store
			.remove_identity(&mut tx.tx, identity_id)
			.await
			.map(|removed| (removed, json!({ "removed": removed })));

		if let Ok((true, _)) = &outcome {
			tracing::info!(identity_id = %identity_id, "Identity removed.");
		}

		self.settle(tx, &principal, Action::DeleteIdentity, Some(identity_id), outcome).await
	}

	pub async fn remove_embedding(&self, session: &Session, embedding_id: Uuid) -> Result<bool> {
		let target = embedding_id.to_string();
		let (principal, mut tx) =
			self.gate(session, Action::DeleteEmbedding, Some(&target)).await?;
		let outcome = self
			.store
			.remove_embedding(&mut tx.tx, embedding_id)
			.await
			.map(|removed| (removed, json!({ "removed": removed })));

		self.settle(tx, &principal, Action::DeleteEmbedding, Some(&target), outcome).await
	}

	pub async fn update_identity(
		&self,
		session: &Session,
		identity_id: &str,
		patch: IdentityPatch,
	) -> Result<IdentityView> {
		let identity_id = identity_id.trim();
		let (principal, mut tx) = self.gate(session, Action::EditIdentity, Some(identity_id)).await?;
		let outcome = async {
			let mut identity = gallery::get_identity(&mut *tx.tx, identity_id)
				.await?
				.ok_or_else(|| Error::NotFound { message: format!("Identity {identity_id}.") })?;
			let before = json!({ "name": identity.name, "status": identity.status });

			if let Some(name) = patch.name {
				identity.name = name.trim().to_string();
			}
			if let Some(metadata) = patch.metadata {
				if !metadata.is_object() {
					return Err(Error::InvalidRequest {
						message: "metadata must be a JSON object.".to_string(),
					});
				}

				identity.metadata = metadata;
			}
			if let Some(status) = patch.status {
				identity.status = status.trim().to_lowercase();
			}

			identity.updated_by = principal.username.clone();
			identity.updated_at = OffsetDateTime::now_utc();

			self.store.update_identity(&mut tx.tx, &identity).await?;

			let embeddings = gallery::list_embeddings(&mut *tx.tx, identity_id).await?;
			let after = json!({ "name": identity.name, "status": identity.status });
			let view = IdentityView::from_identity(
				identity,
				embeddings.into_iter().map(EmbeddingView::from).collect(),
			);

			Ok::<_, Error>((view, json!({ "before": before, "after": after })))
		}
		.await;

		self.settle(tx, &principal, Action::EditIdentity, Some(identity_id), outcome).await
	}

	pub async fn get_identity(&self, session: &Session, identity_id: &str) -> Result<IdentityView> {
		let identity_id = identity_id.trim();
		let (principal, mut tx) = self.gate(session, Action::ViewResults, Some(identity_id)).await?;
		let outcome = async {
			let identity = gallery::get_identity(&mut *tx.tx, identity_id)
				.await?
				.ok_or_else(|| Error::NotFound { message: format!("Identity {identity_id}.") })?;
			let embeddings = gallery::list_embeddings(&mut *tx.tx, identity_id).await?;
			let view = IdentityView::from_identity(
				identity,
				embeddings.into_iter().map(EmbeddingView::from).collect(),
			);

			Ok::<_, Error>((view, json!({})))
		}
		.await;

		self.settle(tx, &principal, Action::ViewResults, Some(identity_id), outcome).await
	}

	pub async fn list_identities(
		&self,
		session: &Session,
		query: &IdentityQuery,
	) -> Result<Vec<IdentityView>> {
		let (principal, mut tx) = self.gate(session, Action::ViewResults, None).await?;
		let limit = query.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
		let search = query.search.as_deref().map(str::trim).filter(|search| !search.is_empty());
		let filter = IdentityFilter { status: query.status.as_deref(), search };
		let outcome = gallery::list_identities(
			&mut *tx.tx,
			&filter,
			i64::from(limit),
			i64::from(query.offset),
		)
		.await
		.map_err(Error::from)
		.map(|rows| {
			let count = rows.len();

			(
				rows.into_iter().map(IdentityView::from).collect(),
				json!({ "search": search, "returned": count }),
			)
		});

		self.settle(tx, &principal, Action::ViewResults, None, outcome).await
	}
}

fn enrolled(identity_id: &str, outcome: EnrollOutcome, quality: f32) -> (EnrollResponse, Value) {
	let details = json!({
		"embedding_id": outcome.embedding_id,
		"identity_created": outcome.identity_created,
		"quality": quality,
	});

	(
		EnrollResponse {
			identity_id: identity_id.to_string(),
			embedding_id: outcome.embedding_id,
			identity_created: outcome.identity_created,
			quality,
		},
		details,
	)
}
