use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
	Error, FacegateService, GallerySnapshot, MatchParams, MatchResult, Result, Session, matcher,
	pipeline::{ItemFailure, MatchContext},
	recognize,
};
use facegate_domain::access::Action;

#[derive(Clone)]
pub struct BatchItem {
	/// Caller-chosen name for the image, such as its file name.
	pub label: String,
	pub image: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct BatchRequest {
	pub items: Vec<BatchItem>,
	pub params: MatchParams,
	/// Store the results of every item that matched at least one identity.
	pub persist: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemOutcome {
	/// Encoded and ranked; `results` is empty when nothing cleared the threshold.
	Completed { quality: f32, results: Vec<MatchResult> },
	Failed { failure: ItemFailure },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BatchItemResult {
	pub index: usize,
	pub label: String,
	/// Set when the item's results were stored.
	pub query_id: Option<Uuid>,
	pub outcome: BatchItemOutcome,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BatchReport {
	pub batch_id: Uuid,
	pub gallery_version: i64,
	/// One entry per input image, in input order.
	pub items: Vec<BatchItemResult>,
	pub matched: usize,
	pub unmatched: usize,
	pub failed: usize,
	pub cancelled: usize,
}
impl BatchReport {
	fn tally(batch_id: Uuid, gallery_version: i64, items: Vec<BatchItemResult>) -> Self {
		let mut report =
			Self { batch_id, gallery_version, items, matched: 0, unmatched: 0, failed: 0, cancelled: 0 };

		for item in &report.items {
			match &item.outcome {
				BatchItemOutcome::Completed { results, .. } if results.is_empty() =>
					report.unmatched += 1,
				BatchItemOutcome::Completed { .. } => report.matched += 1,
				BatchItemOutcome::Failed { failure: ItemFailure::Cancelled } => report.cancelled += 1,
				BatchItemOutcome::Failed { .. } => report.failed += 1,
			}
		}

		report
	}
}

/// Shared view of a running batch. Clone it into another task to poll progress or cancel.
///
/// Cancellation is cooperative: items already being encoded finish, items not yet started are
/// reported as cancelled.
#[derive(Clone, Debug, Default)]
pub struct BatchHandle {
	completed: Arc<AtomicUsize>,
	total: Arc<AtomicUsize>,
	cancel: CancellationToken,
}
impl BatchHandle {
	pub fn new() -> Self {
		Self::default()
	}

	/// Items finished so far, failures and cancellations included. Never decreases during a run.
	pub fn completed(&self) -> usize {
		self.completed.load(Ordering::Acquire)
	}

	pub fn total(&self) -> usize {
		self.total.load(Ordering::Acquire)
	}

	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}
}

impl FacegateService {
	/// Encodes and matches every image with a bounded worker pool and one gallery snapshot.
	///
	/// Per-image problems are attached to the item. The run as a whole fails only on security,
	/// validation, or store errors, and is audited once when it ends.
	pub async fn run_batch(
		&self,
		session: &Session,
		request: BatchRequest,
		handle: &BatchHandle,
	) -> Result<BatchReport> {
		let principal = self.gate_detached(session, Action::BatchProcess, None).await?;
		let batch_id = Uuid::new_v4();
		let target = batch_id.to_string();
		let persist = request.persist;

		tracing::info!(batch_id = %batch_id, items = request.items.len(), "Batch started.");

		let executed = self.execute_batch(batch_id, request, handle).await;
		let mut tx = self.begin_write().await?;
		let outcome = match executed {
			Ok(mut report) => {
				let stored = if persist {
					persist_batch(&mut tx.tx, &mut report, &principal.username).await
				} else {
					Ok(0)
				};

				stored.map(|stored| {
					tracing::info!(
						batch_id = %batch_id,
						matched = report.matched,
						unmatched = report.unmatched,
						failed = report.failed,
						cancelled = report.cancelled,
						"Batch finished."
					);

					let details = json!({
						"batch_id": batch_id,
						"total": report.items.len(),
						"matched": report.matched,
						"unmatched": report.unmatched,
						"failed": report.failed,
						"cancelled": report.cancelled,
						"stored_queries": stored,
						"gallery_version": report.gallery_version,
					});

					(report, details)
				})
			},
			Err(err) => Err(err),
		};

		self.settle(tx, &principal, Action::BatchProcess, Some(&target), outcome).await
	}

	async fn execute_batch(
		&self,
		batch_id: Uuid,
		request: BatchRequest,
		handle: &BatchHandle,
	) -> Result<BatchReport> {
		let max_images = self.cfg.pipeline.batch_max_images as usize;

		if request.items.len() > max_images {
			return Err(Error::InvalidRequest {
				message: format!(
					"Batch holds {} images; the limit is {max_images}.",
					request.items.len()
				),
			});
		}

		let (top_k, min_threshold) = request.params.resolve(&self.cfg.matching);

		matcher::check_threshold(min_threshold)?;

		let snapshot = self.store.all_embeddings().await?;
		let ctx = MatchContext {
			encoder: self.encoder.clone(),
			encoder_cfg: Arc::new(self.cfg.providers.encoder.clone()),
			buckets: self.cfg.matching.buckets,
			dim: self.store.dim(),
			top_k,
			min_threshold,
		};
		let total = request.items.len();
		let labels = request.items.iter().map(|item| item.label.clone()).collect::<Vec<_>>();

		handle.completed.store(0, Ordering::Release);
		handle.total.store(total, Ordering::Release);

		if total == 0 {
			return Ok(BatchReport::tally(batch_id, snapshot.version(), Vec::new()));
		}

		let (queue, tasks) = async_channel::bounded(total);

		for task in request.items.into_iter().enumerate() {
			queue.send(task).await.map_err(|_| Error::InvalidRequest {
				message: "Batch queue closed before all items were queued.".to_string(),
			})?;
		}

		drop(queue);

		let workers = self.cfg.pipeline.resolved_batch_workers().min(total);
		let (reported, results) = async_channel::bounded(total);
		let mut set = JoinSet::new();

		for _ in 0..workers {
			set.spawn(work_queue(
				tasks.clone(),
				reported.clone(),
				ctx.clone(),
				snapshot.clone(),
				handle.clone(),
			));
		}

		drop((tasks, reported));

		let mut slots = (0..total).map(|_| None).collect::<Vec<Option<BatchItemResult>>>();

		while let Ok(result) = results.recv().await {
			if let Some(slot) = slots.get_mut(result.index) {
				*slot = Some(result);
			}
		}
		while let Some(joined) = set.join_next().await {
			if let Err(err) = joined {
				tracing::error!(batch_id = %batch_id, error = %err, "Batch worker stopped.");
			}
		}

		let items = slots
			.into_iter()
			.zip(labels)
			.enumerate()
			.map(|(index, (slot, label))| {
				slot.unwrap_or_else(|| BatchItemResult {
					index,
					label,
					query_id: None,
					outcome: BatchItemOutcome::Failed {
						failure: ItemFailure::Aborted {
							message: "Worker stopped before reporting the item.".to_string(),
						},
					},
				})
			})
			.collect();

		Ok(BatchReport::tally(batch_id, snapshot.version(), items))
	}
}

/// Reports each item as soon as it finishes, so a worker that dies mid-run loses only the item
/// it was holding.
async fn work_queue(
	tasks: async_channel::Receiver<(usize, BatchItem)>,
	reported: async_channel::Sender<BatchItemResult>,
	ctx: MatchContext,
	snapshot: Arc<GallerySnapshot>,
	handle: BatchHandle,
) {
	while let Ok((index, item)) = tasks.recv().await {
		let outcome = if handle.is_cancelled() {
			BatchItemOutcome::Failed { failure: ItemFailure::Cancelled }
		} else {
			match ctx.encode_and_rank(&snapshot, &item.image).await {
				Ok((quality, results)) => BatchItemOutcome::Completed { quality, results },
				Err(err) => {
					tracing::debug!(index, label = %item.label, error = %err, "Batch item failed.");

					BatchItemOutcome::Failed { failure: ItemFailure::from(err) }
				},
			}
		};

		handle.completed.fetch_add(1, Ordering::AcqRel);

		if reported
			.send(BatchItemResult { index, label: item.label, query_id: None, outcome })
			.await
			.is_err()
		{
			break;
		}
	}
}

async fn persist_batch(
	conn: &mut sqlx::SqliteConnection,
	report: &mut BatchReport,
	actor: &str,
) -> Result<usize> {
	let now = OffsetDateTime::now_utc();
	let mut stored = 0;

	for item in &mut report.items {
		let BatchItemOutcome::Completed { results, .. } = &item.outcome else {
			continue;
		};

		if results.is_empty() {
			continue;
		}

		let query_id = Uuid::new_v4();

		recognize::persist_results(&mut *conn, query_id, Some(&item.label), results, actor, now)
			.await?;

		item.query_id = Some(query_id);
		stored += 1;
	}

	Ok(stored)
}
