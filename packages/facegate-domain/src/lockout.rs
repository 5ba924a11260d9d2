//! Login throttling derived purely from the attempt history of one username.
//!
//! The history is folded oldest-first. A success clears the streak. An attempt refused while
//! locked neither counts as a failure nor extends the window. A failure that arrives after an
//! earlier window has expired starts a fresh streak. The failure that opened a window is marked,
//! so a fold may start at it instead of at the last success.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
	Success,
	Failure,
	Locked,
}
impl AttemptOutcome {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Success => "success",
			Self::Failure => "failure",
			Self::Locked => "locked",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"success" => Some(Self::Success),
			"failure" => Some(Self::Failure),
			"locked" => Some(Self::Locked),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attempt {
	pub outcome: AttemptOutcome,
	pub at: OffsetDateTime,
	/// Set on the failure that reached the limit and opened a lockout window.
	pub opens_lockout: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
	pub max_failed_attempts: u32,
	pub lockout: Duration,
}
impl LockoutPolicy {
	pub fn from_config(cfg: &facegate_config::Security) -> Self {
		Self {
			max_failed_attempts: cfg.max_failed_attempts,
			lockout: Duration::seconds(i64::try_from(cfg.lockout_seconds).unwrap_or(i64::MAX)),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockoutState {
	pub consecutive_failures: u32,
	pub locked_until: Option<OffsetDateTime>,
}
impl LockoutState {
	pub fn is_locked(&self, now: OffsetDateTime) -> bool {
		self.locked_until.is_some_and(|until| now < until)
	}
}

pub fn fold_attempts<'a, I>(attempts: I, policy: &LockoutPolicy) -> LockoutState
where
	I: IntoIterator<Item = &'a Attempt>,
{
	let mut state = LockoutState::default();

	for attempt in attempts {
		match attempt.outcome {
			AttemptOutcome::Success => state = LockoutState::default(),
			AttemptOutcome::Locked => {},
			AttemptOutcome::Failure => {
				if state.locked_until.is_some_and(|until| attempt.at >= until) {
					state = LockoutState::default();
				}

				state.consecutive_failures = state.consecutive_failures.saturating_add(1);

				if attempt.opens_lockout {
					state.consecutive_failures =
						state.consecutive_failures.max(policy.max_failed_attempts);
				}
				if state.locked_until.is_none()
					&& state.consecutive_failures >= policy.max_failed_attempts
				{
					state.locked_until = Some(attempt.at + policy.lockout);
				}
			},
		}
	}

	state
}

/// Lockout state as seen at `now`; an expired window reads as unlocked with a cleared streak.
pub fn lockout_state<'a, I>(attempts: I, policy: &LockoutPolicy, now: OffsetDateTime) -> LockoutState
where
	I: IntoIterator<Item = &'a Attempt>,
{
	let state = fold_attempts(attempts, policy);

	match state.locked_until {
		Some(until) if now >= until => LockoutState::default(),
		_ => state,
	}
}
