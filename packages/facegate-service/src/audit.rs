//! Append-only activity log and its paging cursor.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::SqliteConnection;
use time::OffsetDateTime;

use crate::{Error, FacegateService, Principal, Result, Session, WriteTx};
use facegate_domain::access::Action;
use facegate_storage::{
	activity::{self, ActivityFilter},
	db::Db,
	models::{ActivityEntry, NewActivity},
};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
	Success,
	Failure,
	Denied,
	Locked,
	Expired,
}
impl AuditOutcome {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Success => "success",
			Self::Failure => "failure",
			Self::Denied => "denied",
			Self::Locked => "locked",
			Self::Expired => "expired",
		}
	}
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuditEntry {
	pub seq: i64,
	pub actor: String,
	pub action: String,
	pub target: Option<String>,
	pub outcome: String,
	pub details: Value,
	#[serde(with = "crate::time_serde")]
	pub logged_at: OffsetDateTime,
}
impl From<ActivityEntry> for AuditEntry {
	fn from(entry: ActivityEntry) -> Self {
		Self {
			seq: entry.seq,
			actor: entry.actor,
			action: entry.action,
			target: entry.target,
			outcome: entry.outcome,
			details: entry.details,
			logged_at: entry.logged_at,
		}
	}
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AuditQuery {
	pub actor: Option<String>,
	pub action: Option<String>,
	pub outcome: Option<AuditOutcome>,
	#[serde(default, with = "crate::time_serde::option")]
	pub since: Option<OffsetDateTime>,
	#[serde(default, with = "crate::time_serde::option")]
	pub until: Option<OffsetDateTime>,
	pub page_size: Option<u32>,
}

/// Lazily pages through matching entries in sequence order. Nothing is read until the first
/// call to [`AuditCursor::next_page`].
pub struct AuditCursor {
	db: Db,
	query: AuditQuery,
	after_seq: i64,
	page_size: u32,
	exhausted: bool,
}
impl AuditCursor {
	pub(crate) fn new(db: Db, query: AuditQuery) -> Self {
		let page_size = query.page_size.filter(|size| *size > 0).unwrap_or(DEFAULT_PAGE_SIZE);

		Self { db, query, after_seq: 0, page_size, exhausted: false }
	}

	/// Resumes after a previously seen sequence number.
	pub fn resume_after(mut self, seq: i64) -> Self {
		self.after_seq = seq;

		self
	}

	pub fn last_seq(&self) -> i64 {
		self.after_seq
	}

	pub async fn next_page(&mut self) -> Result<Option<Vec<AuditEntry>>> {
		if self.exhausted {
			return Ok(None);
		}

		let filter = ActivityFilter {
			actor: self.query.actor.as_deref(),
			action: self.query.action.as_deref(),
			outcome: self.query.outcome.map(AuditOutcome::as_str),
			since: self.query.since,
			until: self.query.until,
		};
		let rows =
			activity::activity_page(&self.db.pool, &filter, self.after_seq, i64::from(self.page_size))
				.await?;

		if rows.len() < self.page_size as usize {
			self.exhausted = true;
		}
		if rows.is_empty() {
			return Ok(None);
		}

		self.after_seq = rows.last().map_or(self.after_seq, |row| row.seq);

		Ok(Some(rows.into_iter().map(AuditEntry::from).collect()))
	}

	/// Drains every remaining page.
	pub async fn collect_all(mut self) -> Result<Vec<AuditEntry>> {
		let mut out = Vec::new();

		while let Some(page) = self.next_page().await? {
			out.extend(page);
		}

		Ok(out)
	}
}

/// Writes one entry. Any failure is reported as `AuditWriteFailure` so callers fail closed.
pub(crate) async fn append(
	conn: &mut SqliteConnection,
	actor: &str,
	action: &str,
	target: Option<&str>,
	outcome: AuditOutcome,
	details: Value,
) -> Result<i64> {
	let entry = NewActivity {
		actor,
		action,
		target,
		outcome: outcome.as_str(),
		details,
		logged_at: OffsetDateTime::now_utc(),
	};

	activity::insert_activity(conn, &entry)
		.await
		.map_err(|err| Error::AuditWriteFailure { message: err.to_string() })
}

pub(crate) async fn commit_audited(tx: WriteTx) -> Result<()> {
	tx.tx.commit().await.map_err(|err| Error::AuditWriteFailure { message: err.to_string() })
}

impl FacegateService {
	/// Closes a gated action: on success the audit entry joins the action's transaction; on
	/// failure the action is rolled back and the failure alone is recorded.
	pub(crate) async fn settle<T>(
		&self,
		tx: WriteTx,
		principal: &Principal,
		action: Action,
		target: Option<&str>,
		outcome: Result<(T, Value)>,
	) -> Result<T> {
		self.settle_as(tx, principal, action.as_str(), target, outcome).await
	}

	pub(crate) async fn settle_as<T>(
		&self,
		mut tx: WriteTx,
		principal: &Principal,
		label: &str,
		target: Option<&str>,
		outcome: Result<(T, Value)>,
	) -> Result<T> {
		match outcome {
			Ok((value, details)) => {
				append(
					&mut tx.tx,
					&principal.username,
					label,
					target,
					AuditOutcome::Success,
					details,
				)
				.await?;
				commit_audited(tx).await?;

				Ok(value)
			},
			Err(err) => {
				let mut tx = tx.restart(&self.db).await?;

				append(
					&mut tx.tx,
					&principal.username,
					label,
					target,
					AuditOutcome::Failure,
					json!({ "error": err.to_string() }),
				)
				.await?;
				commit_audited(tx).await?;

				Err(err)
			},
		}
	}

	/// Opens a cursor over the activity log. The read itself is recorded.
	pub async fn query_audit(&self, session: &Session, query: AuditQuery) -> Result<AuditCursor> {
		let (principal, tx) = self.gate(session, Action::ViewAuditLog, None).await?;
		let details = json!({
			"actor": query.actor,
			"action": query.action,
			"outcome": query.outcome.map(AuditOutcome::as_str),
		});

		self.settle(tx, &principal, Action::ViewAuditLog, None, Ok(((), details))).await?;

		Ok(AuditCursor::new(self.db.clone(), query))
	}
}
