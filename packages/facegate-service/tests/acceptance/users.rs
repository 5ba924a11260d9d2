use facegate_domain::access::Role;
use facegate_service::{Error, IdentityQuery, UserPatch};

use super::{ADMIN_PASSWORD, Harness, ScriptedEncoder, USER_PASSWORD};

#[tokio::test]
async fn bootstrap_runs_once() {
	let harness = Harness::new(ScriptedEncoder::default()).await;

	harness.admin().await;

	let again = harness
		.service
		.bootstrap_admin(super::new_user("second", ADMIN_PASSWORD, Role::Admin))
		.await
		.expect_err("Bootstrap must be refused once users exist.");

	assert!(matches!(again, Error::InvalidRequest { .. }));
	assert_eq!(harness.count("users").await, 1);

	let audited = harness.activity("bootstrap_admin").await;

	assert_eq!(audited.len(), 1);
	assert_eq!(audited[0].actor, "admin");

	harness.finish().await;
}

#[tokio::test]
async fn weak_passwords_and_bad_usernames_are_refused() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	for weak in ["Short1", "alllowercase1", "ALLUPPERCASE1", "NoDigitsHere"] {
		let err = harness
			.service
			.create_user(&admin, super::new_user("officer1", weak, Role::InvestigatingOfficer))
			.await
			.expect_err("Weak password must be refused.");

		assert!(matches!(err, Error::InvalidRequest { .. }), "Accepted {weak}.");
	}

	for username in ["", "has space", "semi;colon"] {
		let err = harness
			.service
			.create_user(&admin, super::new_user(username, USER_PASSWORD, Role::InvestigatingOfficer))
			.await
			.expect_err("Bad username must be refused.");

		assert!(matches!(err, Error::InvalidRequest { .. }), "Accepted {username:?}.");
	}

	harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	let duplicate = harness
		.service
		.create_user(&admin, super::new_user("Officer1", USER_PASSWORD, Role::InvestigatingHead))
		.await
		.expect_err("Usernames are unique regardless of case.");

	assert!(matches!(duplicate, Error::InvalidRequest { .. }));
	assert_eq!(harness.count("users").await, 2);

	harness.finish().await;
}

#[tokio::test]
async fn password_changes_verify_and_respect_history() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;
	let wrong = harness
		.service
		.change_password(&officer, "Not-the-one1", "Brandnew123")
		.await
		.expect_err("Wrong current password must be refused.");

	assert!(matches!(wrong, Error::AuthenticationFailure));

	let reused = harness
		.service
		.change_password(&officer, USER_PASSWORD, USER_PASSWORD)
		.await
		.expect_err("Current password must not be reused.");

	assert!(matches!(reused, Error::InvalidRequest { .. }));

	harness
		.service
		.change_password(&officer, USER_PASSWORD, "Brandnew123")
		.await
		.expect("Failed to change password.");

	let back = harness
		.service
		.change_password(&officer, "Brandnew123", USER_PASSWORD)
		.await
		.expect_err("Recent password must not be reused.");

	assert!(matches!(back, Error::InvalidRequest { .. }));

	harness.login("officer1", "Brandnew123").await;

	let old = harness
		.service
		.login("officer1", USER_PASSWORD)
		.await
		.expect_err("Old password must stop working.");

	assert!(matches!(old, Error::AuthenticationFailure));

	let outcomes = harness
		.activity("change_password")
		.await
		.into_iter()
		.map(|entry| entry.outcome)
		.collect::<Vec<_>>();

	assert_eq!(outcomes, ["failure", "failure", "success", "failure"]);

	harness.finish().await;
}

#[tokio::test]
async fn last_admin_cannot_be_removed_or_demoted() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let deactivate = harness
		.service
		.update_user(&admin, "admin", UserPatch { is_active: Some(false), ..UserPatch::default() })
		.await
		.expect_err("Last admin must stay active.");

	assert!(matches!(deactivate, Error::InvalidRequest { .. }));

	let demote = harness
		.service
		.update_user(
			&admin,
			"admin",
			UserPatch { role: Some(Role::InvestigatingHead), ..UserPatch::default() },
		)
		.await
		.expect_err("Last admin must keep the role.");

	assert!(matches!(demote, Error::InvalidRequest { .. }));

	let delete = harness
		.service
		.delete_user(&admin, "admin")
		.await
		.expect_err("Last admin must not be deleted.");

	assert!(matches!(delete, Error::InvalidRequest { .. }));

	harness.user(&admin, "admin2", Role::Admin).await;

	assert!(harness.service.delete_user(&admin, "admin2").await.expect("Failed to delete user."));
	assert!(!harness.service.delete_user(&admin, "admin2").await.expect("Failed to delete user."));

	harness.finish().await;
}

#[tokio::test]
async fn role_changes_end_open_sessions() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;
	let promoted = harness
		.service
		.update_user(
			&admin,
			"officer1",
			UserPatch { role: Some(Role::InvestigatingHead), ..UserPatch::default() },
		)
		.await
		.expect("Failed to promote user.");

	assert_eq!(promoted.role, "investigating_head");

	let stale = harness
		.service
		.list_identities(&officer, &IdentityQuery::default())
		.await
		.expect_err("Session opened under the old role must end.");

	assert!(matches!(stale, Error::SessionExpired));

	let head = harness.login("officer1", USER_PASSWORD).await;

	assert_eq!(head.role, Role::InvestigatingHead);

	harness.service.statistics(&head).await.expect("Heads may view statistics.");

	let renamed = harness
		.service
		.update_user(
			&admin,
			"officer1",
			UserPatch { full_name: Some("Renamed".to_string()), ..UserPatch::default() },
		)
		.await
		.expect("Failed to update profile.");

	assert_eq!(renamed.full_name, "Renamed");

	harness.service.statistics(&head).await.expect("Profile edits keep sessions open.");
	harness.finish().await;
}

#[tokio::test]
async fn reset_password_and_login_history() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	harness.service.login("officer1", "Wrong-pass1").await.expect_err("Wrong password must fail.");
	harness
		.service
		.reset_password(&admin, "officer1", "Resetpass99")
		.await
		.expect("Failed to reset password.");

	let revoked = harness
		.service
		.list_identities(&officer, &IdentityQuery::default())
		.await
		.expect_err("Reset must end open sessions.");

	assert!(matches!(revoked, Error::SessionExpired));

	harness.login("officer1", "Resetpass99").await;

	let history = harness
		.service
		.login_history(&admin, Some("OFFICER1"), 10)
		.await
		.expect("Failed to read login history.");
	let outcomes = history.iter().map(|record| record.outcome.as_str()).collect::<Vec<_>>();

	assert_eq!(outcomes, ["success", "failure", "success"]);
	assert!(history.iter().all(|record| record.username == "officer1"));

	let users = harness.service.list_users(&admin).await.expect("Failed to list users.");

	assert_eq!(users.len(), 2);
	assert!(users.iter().any(|user| user.username == "officer1" && user.last_login_at.is_some()));

	harness.finish().await;
}
