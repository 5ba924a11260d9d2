use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Anonymous,
	Authenticating,
	Authenticated,
	Expired,
	LoggedOut,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionEvent {
	SubmitCredentials,
	CredentialsAccepted,
	CredentialsRejected,
	IdleTimeout,
	Logout,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
	Logout,
	Expired,
	Revoked,
}
impl EndReason {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Logout => "logout",
			Self::Expired => "expired",
			Self::Revoked => "revoked",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"logout" => Some(Self::Logout),
			"expired" => Some(Self::Expired),
			"revoked" => Some(Self::Revoked),
			_ => None,
		}
	}
}

impl SessionState {
	/// Returns `None` for transitions the gate never performs.
	pub fn on(self, event: SessionEvent) -> Option<Self> {
		match (self, event) {
			(Self::Anonymous, SessionEvent::SubmitCredentials) => Some(Self::Authenticating),
			(Self::Authenticating, SessionEvent::CredentialsAccepted) => Some(Self::Authenticated),
			(Self::Authenticating, SessionEvent::CredentialsRejected) => Some(Self::Anonymous),
			(Self::Authenticated, SessionEvent::IdleTimeout) => Some(Self::Expired),
			(Self::Authenticated, SessionEvent::Logout) => Some(Self::LoggedOut),
			_ => None,
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Expired | Self::LoggedOut)
	}

	pub fn from_end_reason(reason: Option<EndReason>) -> Self {
		match reason {
			None => Self::Authenticated,
			Some(EndReason::Logout) => Self::LoggedOut,
			Some(EndReason::Expired | EndReason::Revoked) => Self::Expired,
		}
	}
}

/// A session idles out once `now` is past the end of its idle window; the boundary instant
/// itself is still inside it.
pub fn idle_expired(expires_at: OffsetDateTime, now: OffsetDateTime) -> bool {
	now > expires_at
}
