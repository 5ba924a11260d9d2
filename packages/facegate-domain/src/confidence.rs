use serde::{Deserialize, Serialize};

use facegate_config::ConfidenceBuckets;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBucket {
	Low,
	Medium,
	High,
}
impl ConfidenceBucket {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Low => "low",
			Self::Medium => "medium",
			Self::High => "high",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"low" => Some(Self::Low),
			"medium" => Some(Self::Medium),
			"high" => Some(Self::High),
			_ => None,
		}
	}
}

/// Lower bounds are inclusive: a similarity equal to `buckets.high` is High.
pub fn bucket_for(similarity: f32, buckets: &ConfidenceBuckets) -> ConfidenceBucket {
	if similarity >= buckets.high {
		ConfidenceBucket::High
	} else if similarity >= buckets.medium {
		ConfidenceBucket::Medium
	} else {
		ConfidenceBucket::Low
	}
}
