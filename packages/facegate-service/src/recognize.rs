use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqliteConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	EncodedFace, Error, FaceEncoder, FacegateService, MatchParams, MatchResult, Principal, Result,
	Session, matcher,
};
use facegate_config::EncoderProviderConfig;
use facegate_domain::{access::Action, similarity};
use facegate_storage::{matches, models::MatchResultRecord};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RecognizeOptions {
	#[serde(default)]
	pub params: MatchParams,
	/// Store the ranked results as match records.
	#[serde(default)]
	pub persist: bool,
	/// Free-form label kept with persisted results, such as a file name.
	pub label: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecognizeResponse {
	pub query_id: Uuid,
	pub gallery_version: i64,
	/// Encoder quality of the query face; absent when the caller supplied a vector.
	pub quality: Option<f32>,
	pub results: Vec<MatchResult>,
}

/// Encodes one image with the configured timeout and rejects faces the matcher cannot use.
pub(crate) async fn encode_image(
	encoder: &dyn FaceEncoder,
	cfg: &EncoderProviderConfig,
	dim: usize,
	image: &[u8],
) -> Result<EncodedFace> {
	if image.is_empty() {
		return Err(Error::NoFaceDetected);
	}

	let face = tokio::time::timeout(Duration::from_millis(cfg.timeout_ms), encoder.encode(cfg, image))
		.await
		.map_err(|_| Error::Timeout { operation: "Face encoding".to_string() })??;

	if !face.quality.is_finite() || face.quality < cfg.min_quality {
		return Err(Error::LowQuality { quality: face.quality });
	}

	similarity::check_vector(&face.vector, dim).map_err(crate::store::invalid_embedding)?;

	Ok(EncodedFace { vector: face.vector, quality: face.quality.clamp(0.0, 1.0) })
}

pub(crate) async fn persist_results(
	conn: &mut SqliteConnection,
	query_id: Uuid,
	label: Option<&str>,
	results: &[MatchResult],
	actor: &str,
	now: OffsetDateTime,
) -> Result<()> {
	for result in results {
		let record = MatchResultRecord {
			result_id: Uuid::new_v4(),
			query_id,
			query_label: label.map(str::to_string),
			identity_id: result.identity_id.clone(),
			embedding_id: result.embedding_id,
			similarity: result.similarity,
			bucket: result.bucket.as_str().to_string(),
			embedding_captured_at: result.embedding_timestamp,
			matched_by: actor.to_string(),
			matched_at: now,
		};

		matches::insert_match_result(&mut *conn, &record).await?;
	}

	Ok(())
}

impl FacegateService {
	/// Matches a precomputed query vector against the gallery.
	pub async fn recognize_embedding(
		&self,
		session: &Session,
		embedding: &[f32],
		options: RecognizeOptions,
	) -> Result<RecognizeResponse> {
		let principal =
			self.gate_detached(session, Action::Recognize, options.label.as_deref()).await?;
		let ranked = self.rank_query(embedding, None, &options).await;

		self.store_and_settle(&principal, &options, ranked).await
	}

	/// Encodes the image and matches the resulting face.
	pub async fn recognize_image(
		&self,
		session: &Session,
		image: &[u8],
		options: RecognizeOptions,
	) -> Result<RecognizeResponse> {
		let principal =
			self.gate_detached(session, Action::Recognize, options.label.as_deref()).await?;
		let encoded = encode_image(
			self.encoder.as_ref(),
			&self.cfg.providers.encoder,
			self.store.dim(),
			image,
		)
		.await;
		let ranked = match encoded {
			Ok(face) => self.rank_query(&face.vector, Some(face.quality), &options).await,
			Err(err) => Err(err),
		};

		self.store_and_settle(&principal, &options, ranked).await
	}

	/// Ranks against the current snapshot without holding the writer lock.
	async fn rank_query(
		&self,
		query: &[f32],
		quality: Option<f32>,
		options: &RecognizeOptions,
	) -> Result<RecognizeResponse> {
		let snapshot = self.store.all_embeddings().await?;
		let (top_k, min_threshold) = options.params.resolve(&self.cfg.matching);
		let results =
			matcher::rank(&snapshot, query, top_k, min_threshold, &self.cfg.matching.buckets)?;

		Ok(RecognizeResponse {
			query_id: Uuid::new_v4(),
			gallery_version: snapshot.version(),
			quality,
			results,
		})
	}

	async fn store_and_settle(
		&self,
		principal: &Principal,
		options: &RecognizeOptions,
		ranked: Result<RecognizeResponse>,
	) -> Result<RecognizeResponse> {
		let mut tx = self.begin_write().await?;
		let outcome = match ranked {
			Ok(response) => {
				let stored = if options.persist {
					persist_results(
						&mut tx.tx,
						response.query_id,
						options.label.as_deref(),
						&response.results,
						&principal.username,
						OffsetDateTime::now_utc(),
					)
					.await
				} else {
					Ok(())
				};

				stored.map(|()| {
					let top = response.results.first();

					tracing::info!(
						query_id = %response.query_id,
						results = response.results.len(),
						top = top.map(|result| result.similarity),
						"Recognition completed."
					);

					let details = json!({
						"query_id": response.query_id,
						"results": response.results.len(),
						"top_identity_id": top.map(|result| result.identity_id.as_str()),
						"top_similarity": top.map(|result| result.similarity),
						"persisted": options.persist,
						"gallery_version": response.gallery_version,
					});

					(response, details)
				})
			},
			Err(err) => Err(err),
		};

		self.settle(tx, principal, Action::Recognize, options.label.as_deref(), outcome).await
	}
}
