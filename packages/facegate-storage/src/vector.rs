//! Embedding vectors are persisted as packed little-endian `f32` values.

use crate::{Error, Result};

pub fn encode(vec: &[f32]) -> Vec<u8> {
	let mut out = Vec::with_capacity(vec.len() * 4);

	for value in vec {
		out.extend_from_slice(&value.to_le_bytes());
	}

	out
}

pub fn decode(bytes: &[u8], dim: i64) -> Result<Vec<f32>> {
	let expected = usize::try_from(dim)
		.ok()
		.and_then(|dim| dim.checked_mul(4))
		.ok_or_else(|| Error::Corrupt(format!("Invalid embedding dimension {dim}.")))?;

	if bytes.len() != expected {
		return Err(Error::Corrupt(format!(
			"Embedding blob holds {} bytes; expected {expected}.",
			bytes.len()
		)));
	}

	Ok(bytes
		.chunks_exact(4)
		.map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
		.collect())
}
