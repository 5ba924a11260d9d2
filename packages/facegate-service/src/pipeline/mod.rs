//! Concurrent recognition over many images (batch) or a live frame stream (real-time).

pub mod batch;
pub mod realtime;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, FaceEncoder, GallerySnapshot, MatchResult, Result, matcher, recognize};
use facegate_config::{ConfidenceBuckets, EncoderProviderConfig};

/// Why a single batch item or frame produced no ranking. Never aborts the surrounding run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemFailure {
	NoFaceDetected,
	LowQuality { quality: f32 },
	InvalidEmbedding { message: String },
	Timeout,
	Encoder { message: String },
	Cancelled,
	Aborted { message: String },
}
impl From<Error> for ItemFailure {
	fn from(err: Error) -> Self {
		match err {
			Error::NoFaceDetected => Self::NoFaceDetected,
			Error::LowQuality { quality } => Self::LowQuality { quality },
			Error::InvalidEmbedding { message } => Self::InvalidEmbedding { message },
			Error::Timeout { .. } => Self::Timeout,
			Error::Provider { message } => Self::Encoder { message },
			other => Self::Aborted { message: other.to_string() },
		}
	}
}

/// Everything a worker needs to turn image bytes into ranked matches, detached from the service.
#[derive(Clone)]
pub(crate) struct MatchContext {
	pub(crate) encoder: Arc<dyn FaceEncoder>,
	pub(crate) encoder_cfg: Arc<EncoderProviderConfig>,
	pub(crate) buckets: ConfidenceBuckets,
	pub(crate) dim: usize,
	pub(crate) top_k: usize,
	pub(crate) min_threshold: f32,
}
impl MatchContext {
	pub(crate) async fn encode_and_rank(
		&self,
		snapshot: &GallerySnapshot,
		image: &[u8],
	) -> Result<(f32, Vec<MatchResult>)> {
		let face =
			recognize::encode_image(self.encoder.as_ref(), &self.encoder_cfg, self.dim, image)
				.await?;
		let results =
			matcher::rank(snapshot, &face.vector, self.top_k, self.min_threshold, &self.buckets)?;

		Ok((face.quality, results))
	}
}
