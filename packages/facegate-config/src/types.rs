use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub matching: Matching,
	#[serde(default)]
	pub security: Security,
	#[serde(default)]
	pub pipeline: Pipeline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	/// SQLite connection string, e.g. "sqlite://data/facegate.db".
	pub dsn: String,
	pub pool_max_conns: u32,
	#[serde(default = "default_busy_timeout_ms")]
	pub busy_timeout_ms: u64,
	#[serde(default = "default_acquire_timeout_ms")]
	pub acquire_timeout_ms: u64,
	/// Fixed dimensionality of every stored embedding.
	pub embedding_dim: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub encoder: EncoderProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncoderProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	/// Faces reported below this quality are rejected as low quality.
	#[serde(default)]
	pub min_quality: f32,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Matching {
	/// Zero means "all qualifying results".
	pub default_top_k: u32,
	pub min_threshold: f32,
	pub realtime_min_threshold: f32,
	pub buckets: ConfidenceBuckets,
}
impl Default for Matching {
	fn default() -> Self {
		Self {
			default_top_k: 10,
			min_threshold: 0.6,
			realtime_min_threshold: 0.7,
			buckets: ConfidenceBuckets::default(),
		}
	}
}

/// Inclusive lower bounds of the High and Medium buckets.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ConfidenceBuckets {
	pub high: f32,
	pub medium: f32,
}
impl Default for ConfidenceBuckets {
	fn default() -> Self {
		Self { high: 0.75, medium: 0.60 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Security {
	pub max_failed_attempts: u32,
	pub lockout_seconds: u64,
	pub session_idle_timeout_seconds: u64,
	pub password_history_depth: u32,
	pub argon2: Argon2Params,
}
impl Default for Security {
	fn default() -> Self {
		Self {
			max_failed_attempts: 3,
			lockout_seconds: 300,
			session_idle_timeout_seconds: 3_600,
			password_history_depth: 3,
			argon2: Argon2Params::default(),
		}
	}
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Argon2Params {
	pub m_cost_kib: u32,
	pub t_cost: u32,
	pub p_cost: u32,
}
impl Default for Argon2Params {
	fn default() -> Self {
		Self { m_cost_kib: 19_456, t_cost: 2, p_cost: 1 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pipeline {
	/// Defaults to the available hardware parallelism when unset.
	pub batch_workers: Option<usize>,
	pub batch_max_images: u32,
	pub realtime_sample_interval_ms: u64,
	pub realtime_max_in_flight: usize,
	pub frame_timeout_ms: u64,
	pub drain_timeout_ms: u64,
}
impl Default for Pipeline {
	fn default() -> Self {
		Self {
			batch_workers: None,
			batch_max_images: 50,
			realtime_sample_interval_ms: 1_000,
			realtime_max_in_flight: 1,
			frame_timeout_ms: 2_000,
			drain_timeout_ms: 3_000,
		}
	}
}
impl Pipeline {
	pub fn resolved_batch_workers(&self) -> usize {
		self.batch_workers
			.unwrap_or_else(|| std::thread::available_parallelism().map_or(4, |count| count.get()))
			.max(1)
	}
}

fn default_busy_timeout_ms() -> u64 {
	5_000
}

fn default_acquire_timeout_ms() -> u64 {
	10_000
}
