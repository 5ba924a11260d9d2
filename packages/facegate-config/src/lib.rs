mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Argon2Params, Config, ConfidenceBuckets, EncoderProviderConfig, Matching, Pipeline, Providers,
	Security, Service, Storage,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.dsn.trim().is_empty() {
		return Err(Error::Validation { message: "storage.dsn must be non-empty.".to_string() });
	}
	if cfg.storage.pool_max_conns < 2 {
		return Err(Error::Validation {
			message: "storage.pool_max_conns must be at least 2.".to_string(),
		});
	}
	if cfg.storage.embedding_dim == 0 {
		return Err(Error::Validation {
			message: "storage.embedding_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.encoder.dimensions != cfg.storage.embedding_dim {
		return Err(Error::Validation {
			message: "providers.encoder.dimensions must match storage.embedding_dim.".to_string(),
		});
	}
	if cfg.providers.encoder.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "providers.encoder.timeout_ms must be greater than zero.".to_string(),
		});
	}
	if !(0.0..=1.0).contains(&cfg.providers.encoder.min_quality) {
		return Err(Error::Validation {
			message: "providers.encoder.min_quality must be in the range 0.0-1.0.".to_string(),
		});
	}

	for (label, value) in [
		("matching.min_threshold", cfg.matching.min_threshold),
		("matching.realtime_min_threshold", cfg.matching.realtime_min_threshold),
		("matching.buckets.high", cfg.matching.buckets.high),
		("matching.buckets.medium", cfg.matching.buckets.medium),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if cfg.matching.buckets.medium > cfg.matching.buckets.high {
		return Err(Error::Validation {
			message: "matching.buckets.medium must not exceed matching.buckets.high.".to_string(),
		});
	}
	if cfg.security.max_failed_attempts == 0 {
		return Err(Error::Validation {
			message: "security.max_failed_attempts must be greater than zero.".to_string(),
		});
	}
	if cfg.security.lockout_seconds == 0 {
		return Err(Error::Validation {
			message: "security.lockout_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.security.session_idle_timeout_seconds == 0 {
		return Err(Error::Validation {
			message: "security.session_idle_timeout_seconds must be greater than zero."
				.to_string(),
		});
	}
	if cfg.security.argon2.t_cost == 0 || cfg.security.argon2.p_cost == 0 {
		return Err(Error::Validation {
			message: "security.argon2.t_cost and security.argon2.p_cost must be greater than zero."
				.to_string(),
		});
	}
	if cfg.security.argon2.m_cost_kib < 8 * cfg.security.argon2.p_cost {
		return Err(Error::Validation {
			message: "security.argon2.m_cost_kib must be at least 8 times p_cost.".to_string(),
		});
	}
	if cfg.pipeline.batch_workers == Some(0) {
		return Err(Error::Validation {
			message: "pipeline.batch_workers must be greater than zero when set.".to_string(),
		});
	}
	if cfg.pipeline.batch_max_images == 0 {
		return Err(Error::Validation {
			message: "pipeline.batch_max_images must be greater than zero.".to_string(),
		});
	}
	if cfg.pipeline.realtime_max_in_flight == 0 {
		return Err(Error::Validation {
			message: "pipeline.realtime_max_in_flight must be greater than zero.".to_string(),
		});
	}

	for (label, value) in [
		("pipeline.realtime_sample_interval_ms", cfg.pipeline.realtime_sample_interval_ms),
		("pipeline.frame_timeout_ms", cfg.pipeline.frame_timeout_ms),
		("pipeline.drain_timeout_ms", cfg.pipeline.drain_timeout_ms),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();

	if cfg.service.log_level.is_empty() {
		cfg.service.log_level = "info".to_string();
	}

	cfg.storage.dsn = cfg.storage.dsn.trim().to_string();

	if !cfg.providers.encoder.path.is_empty() && !cfg.providers.encoder.path.starts_with('/') {
		cfg.providers.encoder.path.insert(0, '/');
	}
}
