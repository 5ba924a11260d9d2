pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid username or password.")]
	AuthenticationFailure,
	#[error("Account is temporarily locked.")]
	AccountLocked,
	#[error("Session has expired.")]
	SessionExpired,
	#[error("Permission denied for {action}.")]
	PermissionDenied { action: String },
	#[error("No face detected.")]
	NoFaceDetected,
	#[error("Face quality {quality:.2} is below the configured minimum.")]
	LowQuality { quality: f32 },
	#[error("Invalid embedding: {message}")]
	InvalidEmbedding { message: String },
	#[error("Identity {identity_id} is already enrolled under a different name.")]
	DuplicateIdentity { identity_id: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("{operation} timed out.")]
	Timeout { operation: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Store unavailable: {message}")]
	StoreUnavailable { message: String },
	#[error("Audit write failed: {message}")]
	AuditWriteFailure { message: String },
}
impl Error {
	/// Input problems that are attached to a batch item or a frame instead of aborting the run.
	pub fn is_item_failure(&self) -> bool {
		matches!(
			self,
			Self::NoFaceDetected
				| Self::LowQuality { .. }
				| Self::InvalidEmbedding { .. }
				| Self::Timeout { .. }
				| Self::Provider { .. }
		)
	}
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::StoreUnavailable { message: err.to_string() }
	}
}

impl From<facegate_storage::Error> for Error {
	fn from(err: facegate_storage::Error) -> Self {
		match err {
			facegate_storage::Error::Sqlx(inner) => Self::StoreUnavailable { message: inner.to_string() },
			facegate_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			facegate_storage::Error::NotFound(message) => Self::NotFound { message },
			facegate_storage::Error::Conflict(message) => Self::InvalidRequest { message },
			facegate_storage::Error::Corrupt(message) => Self::StoreUnavailable { message },
		}
	}
}

impl From<facegate_providers::Error> for Error {
	fn from(err: facegate_providers::Error) -> Self {
		match err {
			facegate_providers::Error::Timeout { .. } =>
				Self::Timeout { operation: "Face encoding".to_string() },
			other => Self::Provider { message: other.to_string() },
		}
	}
}
