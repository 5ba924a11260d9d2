use std::time::Duration;

use reqwest::{Client, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// One face reported by the encoder service.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedFace {
	pub embedding: Vec<f32>,
	pub quality: f32,
	pub bounding_box: Option<BoundingBox>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct BoundingBox {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}
impl BoundingBox {
	pub fn area(&self) -> f64 {
		(self.width.max(0.0)) * (self.height.max(0.0))
	}
}

#[derive(Deserialize)]
struct FaceItem {
	embedding: Vec<f64>,
	#[serde(default)]
	quality: Option<f64>,
	#[serde(default, rename = "box")]
	bounding_box: Option<BoundingBox>,
}

/// Posts the raw image and returns the most prominent face, or `None` when no face was found.
pub async fn encode_face(
	cfg: &facegate_config::EncoderProviderConfig,
	image: &[u8],
) -> Result<Option<DetectedFace>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.header(CONTENT_TYPE, "application/octet-stream")
		.query(&[("model", cfg.model.as_str())])
		.body(image.to_vec())
		.send()
		.await
		.map_err(|err| map_transport_error(err, cfg.timeout_ms))?;
	let json: Value = res
		.error_for_status()?
		.json()
		.await
		.map_err(|err| map_transport_error(err, cfg.timeout_ms))?;

	parse_encode_response(json, cfg.dimensions as usize)
}

fn map_transport_error(err: reqwest::Error, timeout_ms: u64) -> Error {
	if err.is_timeout() { Error::Timeout { timeout_ms } } else { Error::Reqwest(err) }
}

/// Picks the face with the largest bounding box; faces without a box rank last.
pub fn parse_encode_response(json: Value, expected_dim: usize) -> Result<Option<DetectedFace>> {
	let faces = json
		.get("faces")
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Encoder response is missing faces array.".to_string(),
		})?;
	let mut best: Option<(f64, DetectedFace)> = None;

	for item in faces {
		let face: FaceItem = serde_json::from_value(item.clone())?;

		if face.embedding.len() != expected_dim {
			return Err(Error::InvalidResponse {
				message: format!(
					"Encoder returned a {}-dimensional embedding; expected {expected_dim}.",
					face.embedding.len()
				),
			});
		}

		let area = face.bounding_box.map_or(-1.0, |bounding_box| bounding_box.area());
		let candidate = DetectedFace {
			embedding: face.embedding.iter().map(|value| *value as f32).collect(),
			quality: face.quality.map_or(1.0, |quality| quality as f32),
			bounding_box: face.bounding_box,
		};

		if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
			best = Some((area, candidate));
		}
	}

	Ok(best.map(|(_, face)| face))
}
