//! Distance-to-similarity transform shared by every match path.
//!
//! Similarity is cosine similarity rescaled from [-1, 1] to [0, 1] with `(1 + cos) / 2`.
//! Thresholds and confidence breakpoints are expressed in this normalized space. The
//! accumulation runs in `f64` and in a single pass so that `similarity(a, b)` and
//! `similarity(b, a)` are bit-identical and `similarity(a, a)` is exactly [`MAX_SIMILARITY`].

pub const MIN_SIMILARITY: f32 = 0.0;
pub const MAX_SIMILARITY: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorDefect {
	DimensionMismatch { expected: usize, actual: usize },
	NonFinite,
	ZeroNorm,
}

/// Returns `None` when the vectors differ in length or either has zero norm.
pub fn similarity(a: &[f32], b: &[f32]) -> Option<f32> {
	if a.len() != b.len() || a.is_empty() {
		return None;
	}

	let mut dot = 0.0_f64;
	let mut norm_a = 0.0_f64;
	let mut norm_b = 0.0_f64;

	for (x, y) in a.iter().zip(b) {
		let x = f64::from(*x);
		let y = f64::from(*y);

		dot += x * y;
		norm_a += x * x;
		norm_b += y * y;
	}

	if norm_a == 0.0 || norm_b == 0.0 {
		return None;
	}

	let cosine = (dot / (norm_a * norm_b).sqrt()).clamp(-1.0, 1.0);
	let rescaled = ((1.0 + cosine) / 2.0) as f32;

	Some(rescaled.clamp(MIN_SIMILARITY, MAX_SIMILARITY))
}

pub fn check_vector(vec: &[f32], expected_dim: usize) -> Result<(), VectorDefect> {
	if vec.len() != expected_dim {
		return Err(VectorDefect::DimensionMismatch { expected: expected_dim, actual: vec.len() });
	}
	if vec.iter().any(|value| !value.is_finite()) {
		return Err(VectorDefect::NonFinite);
	}
	if vec.iter().all(|value| *value == 0.0) {
		return Err(VectorDefect::ZeroNorm);
	}

	Ok(())
}

impl std::fmt::Display for VectorDefect {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::DimensionMismatch { expected, actual } => {
				write!(f, "Embedding dimension {actual} does not match expected dimension {expected}.")
			},
			Self::NonFinite => write!(f, "Embedding contains a non-finite value."),
			Self::ZeroNorm => write!(f, "Embedding has zero norm."),
		}
	}
}
