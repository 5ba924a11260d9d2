//! Live recognition over a pulled frame stream.
//!
//! A reader task pulls frames and publishes only the newest one. A sampler wakes every
//! `pipeline.realtime_sample_interval_ms`, takes that frame if it has not been sampled yet, and
//! hands it to an encode+match task when one of `pipeline.realtime_max_in_flight` slots is free.
//! Frames that find every slot busy are dropped, never queued. Before a frame is handed off the
//! owning session is re-checked and its idle window extended; once the session is closed the
//! stream reports `SessionExpired` and ends.

use std::{
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tokio::{
	sync::{Mutex, Semaphore, mpsc, watch},
	task::{JoinHandle, JoinSet},
	time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, FacegateService, MatchResult, Principal, Result, Session,
	audit::{self, AuditOutcome},
	gate, matcher,
	pipeline::{ItemFailure, MatchContext},
	recognize,
	store::EmbeddingStore,
};
use facegate_domain::{
	access::{self, Action, Decision},
	session::{self, EndReason},
};
use facegate_storage::{accounts, db::Db};

const OUTCOME_BUFFER: usize = 64;
const MIN_PULL_RETRY_DELAY: Duration = Duration::from_millis(10);

pub struct Frame {
	/// Source-assigned name, such as a file name or a camera sequence number.
	pub label: String,
	pub image: Vec<u8>,
	pub captured_at: OffsetDateTime,
}

/// A pull-based camera or image source. `Ok(None)` means the source is exhausted.
pub trait FrameSource
where
	Self: Send,
{
	fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>>;
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct RealtimeOptions {
	/// Falls back to `matching.realtime_min_threshold`.
	pub min_threshold: Option<f32>,
	/// Best matches reported per frame; defaults to one.
	pub top_k: Option<u32>,
	/// Store matched frames as match results.
	pub persist: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FrameResult {
	Matched { matches: Vec<MatchResult> },
	NoMatch,
	Failed { failure: ItemFailure },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FrameOutcome {
	pub label: String,
	#[serde(with = "crate::time_serde")]
	pub captured_at: OffsetDateTime,
	pub result: FrameResult,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RealtimeSummary {
	pub received: u64,
	pub sampled: u64,
	pub dropped: u64,
	pub matched: u64,
	pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
	received: AtomicU64,
	sampled: AtomicU64,
	dropped: AtomicU64,
	matched: AtomicU64,
	failed: AtomicU64,
}
impl Counters {
	fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	fn summary(&self) -> RealtimeSummary {
		RealtimeSummary {
			received: self.received.load(Ordering::Relaxed),
			sampled: self.sampled.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
			matched: self.matched.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
		}
	}
}

type LatestFrame = Option<(u64, Arc<Frame>)>;

/// Settings the background tasks own once the session is running.
struct Runtime {
	ctx: MatchContext,
	store: Arc<EmbeddingStore>,
	db: Db,
	write_lock: Arc<Mutex<()>>,
	actor: String,
	token_hash: String,
	idle_timeout: time::Duration,
	persist: bool,
	sample_interval: Duration,
	frame_timeout: Duration,
	drain_timeout: Duration,
	max_in_flight: usize,
	counters: Arc<Counters>,
	cancel: CancellationToken,
}

/// A running real-time session. Read outcomes with [`RealtimeSession::next`] and end it with
/// [`RealtimeSession::stop`]; dropping it cancels the background work without an audit entry.
pub struct RealtimeSession {
	session_id: Uuid,
	outcomes: mpsc::Receiver<Result<FrameOutcome>>,
	cancel: CancellationToken,
	reader: JoinHandle<()>,
	sampler: JoinHandle<()>,
	counters: Arc<Counters>,
	db: Db,
	write_lock: Arc<Mutex<()>>,
	actor: String,
}
impl RealtimeSession {
	/// Next outcome, in completion order. `None` once the source is exhausted and all sampled
	/// frames are reported, or after a store error has been delivered.
	pub async fn next(&mut self) -> Option<Result<FrameOutcome>> {
		self.outcomes.recv().await
	}

	pub fn summary(&self) -> RealtimeSummary {
		self.counters.summary()
	}

	/// Stops sampling, waits up to `pipeline.drain_timeout_ms` for in-flight frames, aborts
	/// whatever is left, and records the stop.
	pub async fn stop(mut self) -> Result<RealtimeSummary> {
		self.cancel.cancel();
		self.outcomes.close();

		if let Err(err) = (&mut self.sampler).await {
			tracing::error!(session_id = %self.session_id, error = %err, "Sampler stopped abnormally.");
		}

		self.reader.abort();

		let summary = self.counters.summary();
		let mut tx = crate::begin_write(&self.db, &self.write_lock).await?;

		audit::append(
			&mut tx.tx,
			&self.actor,
			Action::RealtimeRecognition.as_str(),
			Some(&self.session_id.to_string()),
			AuditOutcome::Success,
			json!({ "event": "stop", "summary": summary }),
		)
		.await?;
		audit::commit_audited(tx).await?;
		tracing::info!(
			session_id = %self.session_id,
			received = summary.received,
			sampled = summary.sampled,
			dropped = summary.dropped,
			matched = summary.matched,
			failed = summary.failed,
			"Real-time session stopped."
		);

		Ok(summary)
	}
}
impl Drop for RealtimeSession {
	fn drop(&mut self) {
		self.cancel.cancel();
		self.reader.abort();
	}
}

impl FacegateService {
	pub async fn start_realtime<S>(
		&self,
		session: &Session,
		source: S,
		options: RealtimeOptions,
	) -> Result<RealtimeSession>
	where
		S: FrameSource + 'static,
	{
		let session_id = Uuid::new_v4();
		let target = session_id.to_string();
		let (principal, tx) =
			self.gate(session, Action::RealtimeRecognition, Some(&target)).await?;
		let min_threshold =
			options.min_threshold.unwrap_or(self.cfg.matching.realtime_min_threshold);
		let prepared = matcher::check_threshold(min_threshold).map(|()| {
			let details = json!({
				"event": "start",
				"min_threshold": min_threshold,
				"persist": options.persist,
			});

			((), details)
		});

		self.settle(tx, &principal, Action::RealtimeRecognition, Some(&target), prepared).await?;

		Ok(self.spawn_realtime(session_id, session, &principal, source, options, min_threshold))
	}

	fn spawn_realtime<S>(
		&self,
		session_id: Uuid,
		session: &Session,
		principal: &Principal,
		source: S,
		options: RealtimeOptions,
		min_threshold: f32,
	) -> RealtimeSession
	where
		S: FrameSource + 'static,
	{
		let pipeline = &self.cfg.pipeline;
		let counters = Arc::new(Counters::default());
		let cancel = CancellationToken::new();
		let runtime = Arc::new(Runtime {
			ctx: MatchContext {
				encoder: self.encoder.clone(),
				encoder_cfg: Arc::new(self.cfg.providers.encoder.clone()),
				buckets: self.cfg.matching.buckets,
				dim: self.store.dim(),
				top_k: options.top_k.unwrap_or(1) as usize,
				min_threshold,
			},
			store: self.store.clone(),
			db: self.db.clone(),
			write_lock: self.write_lock.clone(),
			actor: principal.username.clone(),
			token_hash: gate::token_digest(&session.token),
			idle_timeout: gate::idle_timeout(&self.cfg.security),
			persist: options.persist,
			sample_interval: Duration::from_millis(pipeline.realtime_sample_interval_ms.max(1)),
			frame_timeout: Duration::from_millis(pipeline.frame_timeout_ms),
			drain_timeout: Duration::from_millis(pipeline.drain_timeout_ms),
			max_in_flight: pipeline.realtime_max_in_flight.max(1),
			counters: counters.clone(),
			cancel: cancel.clone(),
		});
		let (latest_tx, latest_rx) = watch::channel::<LatestFrame>(None);
		let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_BUFFER);
		let reader = tokio::spawn(read_frames(source, latest_tx, runtime.clone()));
		let sampler = tokio::spawn(sample_frames(session_id, latest_rx, outcome_tx, runtime));

		tracing::info!(
			session_id = %session_id,
			username = %principal.username,
			min_threshold,
			"Real-time session started."
		);

		RealtimeSession {
			session_id,
			outcomes: outcome_rx,
			cancel,
			reader,
			sampler,
			counters,
			db: self.db.clone(),
			write_lock: self.write_lock.clone(),
			actor: principal.username.clone(),
		}
	}
}

async fn read_frames<S>(mut source: S, latest: watch::Sender<LatestFrame>, runtime: Arc<Runtime>)
where
	S: FrameSource,
{
	let mut seq = 0_u64;

	loop {
		let pulled = tokio::select! {
			biased;
			_ = runtime.cancel.cancelled() => break,
			pulled = tokio::time::timeout(runtime.frame_timeout, source.next_frame()) => pulled,
		};

		match pulled {
			Ok(Ok(Some(frame))) => {
				seq += 1;

				Counters::bump(&runtime.counters.received);
				latest.send_replace(Some((seq, Arc::new(frame))));
			},
			Ok(Ok(None)) => {
				tracing::info!("Frame source exhausted.");

				break;
			},
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "Frame pull failed; retrying after a pause.");

				tokio::select! {
					biased;
					_ = runtime.cancel.cancelled() => break,
					_ = tokio::time::sleep(pull_retry_delay(&runtime)) => {},
				}
			},
			Err(_) => tracing::warn!(
				timeout_ms = runtime.frame_timeout.as_millis() as u64,
				"Frame pull timed out; skipping."
			),
		}
	}
}

fn pull_retry_delay(runtime: &Runtime) -> Duration {
	runtime.sample_interval.min(runtime.frame_timeout).max(MIN_PULL_RETRY_DELAY)
}

async fn sample_frames(
	session_id: Uuid,
	mut latest: watch::Receiver<LatestFrame>,
	outcomes: mpsc::Sender<Result<FrameOutcome>>,
	runtime: Arc<Runtime>,
) {
	let slots = Arc::new(Semaphore::new(runtime.max_in_flight));
	let mut in_flight = JoinSet::new();
	let mut ticker = tokio::time::interval(runtime.sample_interval);
	let mut last_sampled = 0_u64;
	let mut source_done = false;

	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

	loop {
		tokio::select! {
			biased;
			_ = runtime.cancel.cancelled() => break,
			changed = latest.changed(), if !source_done => {
				if changed.is_err() {
					source_done = true;
				}
			},
			Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
				if let Err(err) = joined {
					tracing::error!(error = %err, "Frame task stopped abnormally.");
				}
			},
			_ = ticker.tick() => {
				let newest = latest.borrow().clone();

				match newest {
					Some((seq, frame)) if seq != last_sampled => {
						last_sampled = seq;

						match slots.clone().try_acquire_owned() {
							Ok(permit) => {
								match renew_session(&runtime).await {
									Ok(true) => {},
									Ok(false) => {
										close_for_session(session_id, &runtime, &outcomes).await;

										break;
									},
									Err(err) => {
										tracing::error!(
											error = %err,
											"Session check failed; ending real-time session."
										);

										let _ = outcomes.send(Err(err)).await;

										runtime.cancel.cancel();

										break;
									},
								}

								Counters::bump(&runtime.counters.sampled);

								let runtime = runtime.clone();
								let outcomes = outcomes.clone();

								in_flight.spawn(async move {
									let _permit = permit;

									process_frame(&runtime, &frame, &outcomes).await;
								});
							},
							Err(_) => {
								Counters::bump(&runtime.counters.dropped);
								tracing::debug!(label = %frame.label, "All slots busy; frame dropped.");
							},
						}
					},
					_ if source_done && in_flight.is_empty() => break,
					_ => {},
				}
			},
		}
	}

	drain(&mut in_flight, runtime.drain_timeout).await;
}

/// Confirms the owning session is still open and allowed to run real-time recognition, and
/// extends its idle window. `Ok(false)` once it was logged out, revoked, or idled out.
async fn renew_session(runtime: &Runtime) -> Result<bool> {
	let now = OffsetDateTime::now_utc();
	let mut tx = crate::begin_write(&runtime.db, &runtime.write_lock).await?;
	let Some(record) = accounts::get_session_by_token_hash(&mut *tx.tx, &runtime.token_hash).await?
	else {
		return Ok(false);
	};

	if record.end_reason.is_some() {
		return Ok(false);
	}
	if session::idle_expired(record.expires_at, now) {
		accounts::end_session(&mut *tx.tx, record.session_id, EndReason::Expired.as_str(), now)
			.await?;
		tx.commit().await?;

		return Ok(false);
	}

	let role = gate::parse_role(&record.role)?;

	if access::authorize(role, Action::RealtimeRecognition) == Decision::Denied {
		return Ok(false);
	}

	accounts::touch_session(&mut *tx.tx, record.session_id, now, now + runtime.idle_timeout)
		.await?;
	tx.commit().await?;

	Ok(true)
}

/// Records the closed session and hands `SessionExpired` to whoever reads the stream.
async fn close_for_session(
	session_id: Uuid,
	runtime: &Runtime,
	outcomes: &mpsc::Sender<Result<FrameOutcome>>,
) {
	runtime.cancel.cancel();
	tracing::warn!(
		session_id = %session_id,
		username = %runtime.actor,
		"Session closed; ending real-time session."
	);

	let recorded = async {
		let mut tx = crate::begin_write(&runtime.db, &runtime.write_lock).await?;

		audit::append(
			&mut tx.tx,
			&runtime.actor,
			Action::RealtimeRecognition.as_str(),
			Some(&session_id.to_string()),
			AuditOutcome::Expired,
			json!({ "event": "session_closed", "summary": runtime.counters.summary() }),
		)
		.await?;
		audit::commit_audited(tx).await
	}
	.await;

	let _ = match recorded {
		Ok(()) => outcomes.send(Err(Error::SessionExpired)).await,
		Err(err) => outcomes.send(Err(err)).await,
	};
}

async fn drain(in_flight: &mut JoinSet<()>, timeout: Duration) {
	let drained = tokio::time::timeout(timeout, async {
		while in_flight.join_next().await.is_some() {}
	})
	.await;

	if drained.is_err() {
		tracing::warn!(remaining = in_flight.len(), "Drain timed out; aborting in-flight frames.");
		in_flight.shutdown().await;
	}
}

async fn process_frame(
	runtime: &Runtime,
	frame: &Frame,
	outcomes: &mpsc::Sender<Result<FrameOutcome>>,
) {
	let snapshot = match runtime.store.all_embeddings().await {
		Ok(snapshot) => snapshot,
		Err(err) => {
			tracing::error!(error = %err, "Gallery unavailable; ending real-time session.");

			let _ = outcomes.send(Err(err)).await;

			runtime.cancel.cancel();

			return;
		},
	};
	let result = match runtime.ctx.encode_and_rank(&snapshot, &frame.image).await {
		Ok((_, matches)) if matches.is_empty() => FrameResult::NoMatch,
		Ok((_, matches)) => {
			Counters::bump(&runtime.counters.matched);

			if runtime.persist
				&& let Err(err) = persist_frame(runtime, frame, &matches).await
			{
				tracing::warn!(label = %frame.label, error = %err, "Failed to store frame matches.");
			}

			FrameResult::Matched { matches }
		},
		Err(err) => {
			Counters::bump(&runtime.counters.failed);
			tracing::debug!(label = %frame.label, error = %err, "Frame failed.");

			FrameResult::Failed { failure: ItemFailure::from(err) }
		},
	};
	let outcome =
		FrameOutcome { label: frame.label.clone(), captured_at: frame.captured_at, result };

	// The receiver is gone once the session stops; the outcome is simply discarded then.
	let _ = outcomes.send(Ok(outcome)).await;
}

async fn persist_frame(runtime: &Runtime, frame: &Frame, matches: &[MatchResult]) -> Result<()> {
	let mut tx = crate::begin_write(&runtime.db, &runtime.write_lock).await?;

	recognize::persist_results(
		&mut tx.tx,
		Uuid::new_v4(),
		Some(&frame.label),
		matches,
		&runtime.actor,
		OffsetDateTime::now_utc(),
	)
	.await?;

	tx.commit().await
}
