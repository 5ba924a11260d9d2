use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{GallerySnapshot, Result, store};
use facegate_config::{ConfidenceBuckets, Matching};
use facegate_domain::{
	confidence::{self, ConfidenceBucket},
	similarity,
};

/// Caller overrides; unset fields fall back to `[matching]`. A `top_k` of zero means unbounded.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct MatchParams {
	pub top_k: Option<u32>,
	pub min_threshold: Option<f32>,
}
impl MatchParams {
	pub fn resolve(&self, cfg: &Matching) -> (usize, f32) {
		let top_k = self.top_k.unwrap_or(cfg.default_top_k) as usize;

		(top_k, self.min_threshold.unwrap_or(cfg.min_threshold))
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchResult {
	pub identity_id: String,
	pub identity_name: String,
	pub embedding_id: Uuid,
	pub similarity: f32,
	pub bucket: ConfidenceBucket,
	#[serde(with = "crate::time_serde")]
	pub embedding_timestamp: OffsetDateTime,
}

pub(crate) fn check_threshold(min_threshold: f32) -> Result<()> {
	if !(0.0..=1.0).contains(&min_threshold) {
		return Err(crate::Error::InvalidRequest {
			message: "min_threshold must be in the range 0.0-1.0.".to_string(),
		});
	}

	Ok(())
}

/// Ranks every embedding in the snapshot against `query`.
///
/// Results below `min_threshold` are dropped. Ordering is by similarity descending, then by
/// earliest capture time, then by embedding id, so equal scores rank the same way on every run.
pub fn rank(
	snapshot: &GallerySnapshot,
	query: &[f32],
	top_k: usize,
	min_threshold: f32,
	buckets: &ConfidenceBuckets,
) -> Result<Vec<MatchResult>> {
	similarity::check_vector(query, snapshot.dim()).map_err(store::invalid_embedding)?;

	check_threshold(min_threshold)?;

	let mut scored = Vec::new();

	for item in snapshot {
		let Some(score) = similarity::similarity(query, &item.vector) else {
			continue;
		};

		if score < min_threshold {
			continue;
		}

		scored.push((score, item));
	}

	scored.sort_by(|(a_score, a), (b_score, b)| {
		cmp_f32_desc(*a_score, *b_score)
			.then_with(|| a.captured_at.cmp(&b.captured_at))
			.then_with(|| a.embedding_id.cmp(&b.embedding_id))
	});

	if top_k > 0 {
		scored.truncate(top_k);
	}

	Ok(scored
		.into_iter()
		.map(|(score, item)| MatchResult {
			identity_id: item.identity_id.clone(),
			identity_name: item.identity_name.clone(),
			embedding_id: item.embedding_id,
			similarity: score,
			bucket: confidence::bucket_for(score, buckets),
			embedding_timestamp: item.captured_at,
		})
		.collect())
}

pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}
