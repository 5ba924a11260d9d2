pub mod audit;
pub mod gate;
pub mod identities;
pub mod matcher;
pub mod pipeline;
pub mod recognize;
pub mod reports;
pub mod store;
pub mod time_serde;
pub mod users;

mod error;

pub use error::{Error, Result};

use std::{future::Future, pin::Pin, sync::Arc};

use sqlx::{Sqlite, Transaction};
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};

pub use audit::{AuditCursor, AuditEntry, AuditOutcome, AuditQuery};
pub use gate::{Principal, Session};
pub use identities::{
	EmbeddingView, EnrollImageRequest, EnrollRequest, EnrollResponse, IdentityPatch, IdentityQuery,
	IdentityView,
};
pub use matcher::{MatchParams, MatchResult};
pub use pipeline::{
	ItemFailure,
	batch::{BatchHandle, BatchItem, BatchItemOutcome, BatchItemResult, BatchReport, BatchRequest},
	realtime::{
		Frame, FrameOutcome, FrameResult, FrameSource, RealtimeOptions, RealtimeSession,
		RealtimeSummary,
	},
};
pub use recognize::{RecognizeOptions, RecognizeResponse};
pub use reports::{ExportRequest, ExportedMatch, Statistics};
pub use store::{EmbeddingStore, GalleryItem, GallerySnapshot};
pub use users::{LoginRecord, NewUser, UserPatch, UserView};
use facegate_config::{Config, EncoderProviderConfig};
use facegate_providers::encoder;
use facegate_storage::db::Db;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A face vector produced by the encoder together with its source-quality score.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedFace {
	pub vector: Vec<f32>,
	pub quality: f32,
}

pub trait FaceEncoder
where
	Self: Send + Sync,
{
	/// Resolves to `Error::NoFaceDetected` when the image holds no face.
	fn encode<'a>(
		&'a self,
		cfg: &'a EncoderProviderConfig,
		image: &'a [u8],
	) -> BoxFuture<'a, Result<EncodedFace>>;
}

pub struct FacegateService {
	pub cfg: Config,
	pub db: Db,
	pub store: Arc<EmbeddingStore>,
	pub encoder: Arc<dyn FaceEncoder>,
	pub(crate) write_lock: Arc<Mutex<()>>,
	pub(crate) login_locks: gate::LoginLocks,
	pub(crate) decoy_hash: OnceCell<String>,
}

/// A write transaction that also holds the in-process writer lock until it is dropped.
pub(crate) struct WriteTx {
	pub(crate) tx: Transaction<'static, Sqlite>,
	_guard: OwnedMutexGuard<()>,
}
impl WriteTx {
	pub(crate) async fn commit(self) -> Result<()> {
		self.tx.commit().await?;

		Ok(())
	}

	/// Rolls back the work so far and opens a fresh transaction under the same lock.
	pub(crate) async fn restart(self, db: &Db) -> Result<Self> {
		let Self { tx, _guard } = self;

		tx.rollback().await?;

		Ok(Self { tx: db.begin().await?, _guard })
	}
}

struct HttpFaceEncoder;

impl FaceEncoder for HttpFaceEncoder {
	fn encode<'a>(
		&'a self,
		cfg: &'a EncoderProviderConfig,
		image: &'a [u8],
	) -> BoxFuture<'a, Result<EncodedFace>> {
		Box::pin(async move {
			let face = encoder::encode_face(cfg, image).await?.ok_or(Error::NoFaceDetected)?;

			Ok(EncodedFace { vector: face.embedding, quality: face.quality })
		})
	}
}

impl FacegateService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self::with_encoder(cfg, db, Arc::new(HttpFaceEncoder))
	}

	pub fn with_encoder(cfg: Config, db: Db, encoder: Arc<dyn FaceEncoder>) -> Self {
		let store = Arc::new(EmbeddingStore::new(db.clone(), cfg.storage.embedding_dim as usize));

		Self {
			cfg,
			db,
			store,
			encoder,
			write_lock: Arc::new(Mutex::new(())),
			login_locks: gate::LoginLocks::default(),
			decoy_hash: OnceCell::new(),
		}
	}

	pub(crate) async fn begin_write(&self) -> Result<WriteTx> {
		begin_write(&self.db, &self.write_lock).await
	}
}

pub(crate) async fn begin_write(db: &Db, write_lock: &Arc<Mutex<()>>) -> Result<WriteTx> {
	let guard = write_lock.clone().lock_owned().await;
	let tx = db.begin().await?;

	Ok(WriteTx { tx, _guard: guard })
}
