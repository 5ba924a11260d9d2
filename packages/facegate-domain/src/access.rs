use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Admin,
	InvestigatingHead,
	InvestigatingOfficer,
}
impl Role {
	pub const ALL: [Self; 3] = [Self::Admin, Self::InvestigatingHead, Self::InvestigatingOfficer];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Admin => "admin",
			Self::InvestigatingHead => "investigating_head",
			Self::InvestigatingOfficer => "investigating_officer",
		}
	}

	/// Accepts the stored snake_case label and the spaced display form, case-insensitively.
	pub fn parse(raw: &str) -> Option<Self> {
		let normalized = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");

		match normalized.as_str() {
			"admin" => Some(Self::Admin),
			"investigating_head" | "head" => Some(Self::InvestigatingHead),
			"investigating_officer" | "officer" => Some(Self::InvestigatingOfficer),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
	AddIdentity,
	AddEmbedding,
	EditIdentity,
	DeleteIdentity,
	DeleteEmbedding,
	Recognize,
	BatchProcess,
	RealtimeRecognition,
	ViewResults,
	ExportResults,
	ViewStatistics,
	ManageUsers,
	ViewAuditLog,
}
impl Action {
	pub const ALL: [Self; 13] = [
		Self::AddIdentity,
		Self::AddEmbedding,
		Self::EditIdentity,
		Self::DeleteIdentity,
		Self::DeleteEmbedding,
		Self::Recognize,
		Self::BatchProcess,
		Self::RealtimeRecognition,
		Self::ViewResults,
		Self::ExportResults,
		Self::ViewStatistics,
		Self::ManageUsers,
		Self::ViewAuditLog,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::AddIdentity => "add_identity",
			Self::AddEmbedding => "add_embedding",
			Self::EditIdentity => "edit_identity",
			Self::DeleteIdentity => "delete_identity",
			Self::DeleteEmbedding => "delete_embedding",
			Self::Recognize => "recognize",
			Self::BatchProcess => "batch_process",
			Self::RealtimeRecognition => "realtime_recognition",
			Self::ViewResults => "view_results",
			Self::ExportResults => "export_results",
			Self::ViewStatistics => "view_statistics",
			Self::ManageUsers => "manage_users",
			Self::ViewAuditLog => "view_audit_log",
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
	Allowed,
	Denied,
}

const EVERY_ROLE: &[Role] = &[Role::Admin, Role::InvestigatingHead, Role::InvestigatingOfficer];
const SUPERVISORS: &[Role] = &[Role::Admin, Role::InvestigatingHead];
const ADMIN_ONLY: &[Role] = &[Role::Admin];

pub fn allowed_roles(action: Action) -> &'static [Role] {
	match action {
		Action::AddIdentity
		| Action::AddEmbedding
		| Action::Recognize
		| Action::BatchProcess
		| Action::RealtimeRecognition
		| Action::ViewResults
		| Action::ExportResults => EVERY_ROLE,
		Action::EditIdentity
		| Action::DeleteIdentity
		| Action::DeleteEmbedding
		| Action::ViewStatistics => SUPERVISORS,
		Action::ManageUsers | Action::ViewAuditLog => ADMIN_ONLY,
	}
}

pub fn authorize(role: Role, action: Action) -> Decision {
	if allowed_roles(action).contains(&role) { Decision::Allowed } else { Decision::Denied }
}
