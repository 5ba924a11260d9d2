use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, FacegateService, Result, Session};
use facegate_domain::{access::Action, confidence::ConfidenceBucket};
use facegate_storage::{gallery, matches, models::MatchExportRow};

const DEFAULT_EXPORT_LIMIT: u32 = 500;
const MAX_EXPORT_LIMIT: u32 = 10_000;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExportRequest {
	/// Restricts the export to one recognition query.
	pub query_id: Option<Uuid>,
	#[serde(default, with = "crate::time_serde::option")]
	pub since: Option<OffsetDateTime>,
	pub limit: Option<u32>,
}

/// A stored match in report form. `identity_name` is absent when the identity was removed after
/// the match was recorded.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExportedMatch {
	pub identity_id: String,
	pub identity_name: Option<String>,
	pub similarity: f32,
	pub bucket: ConfidenceBucket,
	#[serde(with = "crate::time_serde")]
	pub embedding_timestamp: OffsetDateTime,
	pub query_id: Uuid,
	pub query_label: Option<String>,
	pub embedding_id: Uuid,
	#[serde(with = "crate::time_serde")]
	pub matched_at: OffsetDateTime,
	pub matched_by: String,
}
impl TryFrom<MatchExportRow> for ExportedMatch {
	type Error = Error;

	fn try_from(row: MatchExportRow) -> Result<Self> {
		let record = row.record;
		let bucket = ConfidenceBucket::parse(&record.bucket).ok_or_else(|| Error::StoreUnavailable {
			message: format!("Unknown stored bucket {:?}.", record.bucket),
		})?;

		Ok(Self {
			identity_id: record.identity_id,
			identity_name: row.identity_name,
			similarity: record.similarity,
			bucket,
			embedding_timestamp: record.embedding_captured_at,
			query_id: record.query_id,
			query_label: record.query_label,
			embedding_id: record.embedding_id,
			matched_at: record.matched_at,
			matched_by: record.matched_by,
		})
	}
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Statistics {
	pub gallery_version: i64,
	pub identities: i64,
	pub active_identities: i64,
	pub embeddings: i64,
	pub stored_results: i64,
	pub recognition_queries: i64,
	pub high_confidence: i64,
	pub medium_confidence: i64,
	pub low_confidence: i64,
}

impl FacegateService {
	/// Stored match results, newest first and in rank order within each query.
	pub async fn export_results(
		&self,
		session: &Session,
		req: ExportRequest,
	) -> Result<Vec<ExportedMatch>> {
		let target = req.query_id.map(|id| id.to_string());
		let (principal, mut tx) =
			self.gate(session, Action::ExportResults, target.as_deref()).await?;
		let limit = req.limit.unwrap_or(DEFAULT_EXPORT_LIMIT).clamp(1, MAX_EXPORT_LIMIT);
		let outcome = async {
			let rows =
				matches::export_match_results(&mut *tx.tx, req.query_id, req.since, i64::from(limit))
					.await?;
			let exported =
				rows.into_iter().map(ExportedMatch::try_from).collect::<Result<Vec<_>>>()?;
			let details = json!({ "exported": exported.len(), "query_id": req.query_id });

			Ok::<_, Error>((exported, details))
		}
		.await;

		self.settle(tx, &principal, Action::ExportResults, target.as_deref(), outcome).await
	}

	pub async fn statistics(&self, session: &Session) -> Result<Statistics> {
		let (principal, mut tx) = self.gate(session, Action::ViewStatistics, None).await?;
		let outcome = async {
			let gallery_version = gallery::gallery_version(&mut *tx.tx).await?;
			let counts = gallery::gallery_counts(&mut *tx.tx).await?;
			let results = matches::match_counts(&mut *tx.tx).await?;
			let stats = Statistics {
				gallery_version,
				identities: counts.identities,
				active_identities: counts.active_identities,
				embeddings: counts.embeddings,
				stored_results: results.results,
				recognition_queries: results.queries,
				high_confidence: results.high,
				medium_confidence: results.medium,
				low_confidence: results.low,
			};

			Ok::<_, Error>((stats, json!({ "gallery_version": gallery_version })))
		}
		.await;

		self.settle(tx, &principal, Action::ViewStatistics, None, outcome).await
	}
}
