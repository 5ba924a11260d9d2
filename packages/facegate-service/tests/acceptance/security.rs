use std::{
	sync::Arc,
	time::{Duration, Instant},
};

use facegate_config::Argon2Params;
use facegate_domain::access::Role;
use facegate_service::{Error, FacegateService, RecognizeOptions, UserPatch};

use super::{Harness, ScriptedEncoder, USER_PASSWORD};

#[tokio::test]
async fn fourth_attempt_is_locked_even_with_the_right_password() {
	let harness = Harness::with_config(ScriptedEncoder::default(), |cfg| {
		cfg.security.lockout_seconds = 1;
	})
	.await;
	let admin = harness.admin().await;

	harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	for _ in 0..3 {
		let err = harness
			.service
			.login("officer1", "Wrong-pass1")
			.await
			.expect_err("Wrong password must fail.");

		assert!(matches!(err, Error::AuthenticationFailure));
	}

	let locked = harness
		.service
		.login("officer1", USER_PASSWORD)
		.await
		.expect_err("Locked account must refuse the correct password.");

	assert!(matches!(locked, Error::AccountLocked));
	assert_eq!(locked.to_string(), "Account is temporarily locked.");

	tokio::time::sleep(Duration::from_millis(1_100)).await;

	harness.login("OFFICER1", USER_PASSWORD).await;

	let after_reset = harness
		.service
		.login("officer1", "Wrong-pass1")
		.await
		.expect_err("Wrong password must fail.");

	assert!(matches!(after_reset, Error::AuthenticationFailure));

	let outcomes = harness
		.activity("login")
		.await
		.into_iter()
		.filter(|entry| entry.actor == "officer1")
		.map(|entry| entry.outcome)
		.collect::<Vec<_>>();

	assert_eq!(
		outcomes,
		["success", "failure", "failure", "failure", "locked", "success", "failure"]
	);

	harness.finish().await;
}

#[tokio::test]
async fn unknown_users_fail_like_wrong_passwords() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	let unknown =
		harness.service.login("ghost", USER_PASSWORD).await.expect_err("Unknown user must fail.");
	let wrong =
		harness.service.login("officer1", "Wrong-pass1").await.expect_err("Wrong password must fail.");

	assert_eq!(unknown.to_string(), wrong.to_string());
	assert!(matches!(unknown, Error::AuthenticationFailure));

	harness.finish().await;
}

#[tokio::test]
async fn denied_action_changes_nothing() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;
	let enrolled = harness.enroll(&officer, "CR-100", "Subject", super::axis(2)).await;
	let version_before = harness.service.statistics(&admin).await.expect("Failed to read stats.");
	let denied = harness
		.service
		.remove_identity(&officer, "CR-100")
		.await
		.expect_err("Officers may not delete identities.");

	assert!(matches!(denied, Error::PermissionDenied { ref action } if action == "delete_identity"));

	let denied = harness
		.service
		.remove_embedding(&officer, enrolled.embedding_id)
		.await
		.expect_err("Officers may not delete embeddings.");

	assert!(matches!(denied, Error::PermissionDenied { .. }));

	let version_after = harness.service.statistics(&admin).await.expect("Failed to read stats.");

	assert_eq!(version_before, version_after);
	assert_eq!(harness.count("identities").await, 1);
	assert_eq!(harness.count("embeddings").await, 1);

	let response = harness
		.service
		.recognize_embedding(&officer, &super::axis(2), RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");

	assert_eq!(response.results[0].identity_id, "CR-100");

	let denials = harness
		.activity("delete_identity")
		.await
		.into_iter()
		.filter(|entry| entry.outcome == "denied" && entry.actor == "officer1")
		.count();

	assert_eq!(denials, 1);

	harness.finish().await;
}

#[tokio::test]
async fn idle_sessions_expire_and_stay_expired() {
	let harness = Harness::with_config(ScriptedEncoder::default(), |cfg| {
		cfg.security.session_idle_timeout_seconds = 1;
	})
	.await;
	let admin = harness.admin().await;

	harness
		.service
		.recognize_embedding(&admin, &super::axis(0), RecognizeOptions::default())
		.await
		.expect("Fresh session must be accepted.");

	tokio::time::sleep(Duration::from_millis(1_200)).await;

	for _ in 0..2 {
		let err = harness
			.service
			.recognize_embedding(&admin, &super::axis(0), RecognizeOptions::default())
			.await
			.expect_err("Idle session must be expired.");

		assert!(matches!(err, Error::SessionExpired));
	}

	let expired =
		harness.activity("recognize").await.into_iter().filter(|e| e.outcome == "expired").count();

	assert_eq!(expired, 2);

	harness.login("admin", super::ADMIN_PASSWORD).await;
	harness.finish().await;
}

#[tokio::test]
async fn logged_out_sessions_are_refused() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.service.logout(&admin).await.expect("Failed to log out.");

	let err = harness
		.service
		.recognize_embedding(&admin, &super::axis(0), RecognizeOptions::default())
		.await
		.expect_err("Logged-out session must be refused.");

	assert!(matches!(err, Error::SessionExpired));

	let again = harness.service.logout(&admin).await.expect_err("Second logout must fail.");

	assert!(matches!(again, Error::SessionExpired));

	harness.finish().await;
}

#[tokio::test]
async fn deactivation_ends_sessions_and_blocks_login() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	harness
		.service
		.update_user(&admin, "officer1", UserPatch { is_active: Some(false), ..UserPatch::default() })
		.await
		.expect("Failed to deactivate user.");

	let err = harness
		.service
		.recognize_embedding(&officer, &super::axis(0), RecognizeOptions::default())
		.await
		.expect_err("Revoked session must be refused.");

	assert!(matches!(err, Error::SessionExpired));

	let login = harness
		.service
		.login("officer1", USER_PASSWORD)
		.await
		.expect_err("Deactivated user must not log in.");

	assert!(matches!(login, Error::AuthenticationFailure));

	harness.finish().await;
}

#[tokio::test]
async fn heads_may_edit_but_not_administer() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let head = harness.user(&admin, "head1", Role::InvestigatingHead).await;

	harness.enroll(&head, "CR-200", "Subject", super::axis(3)).await;

	assert!(harness.service.remove_identity(&head, "CR-200").await.expect("Failed to remove."));

	let users = harness.service.list_users(&head).await.expect_err("Heads may not manage users.");

	assert!(matches!(users, Error::PermissionDenied { .. }));

	harness.service.statistics(&head).await.expect("Heads may view statistics.");
	harness.finish().await;
}

#[tokio::test]
async fn unknown_users_pay_for_a_password_check() {
	let harness = Harness::with_config(ScriptedEncoder::default(), |cfg| {
		cfg.security.argon2 = Argon2Params { m_cost_kib: 4 * 1024, t_cost: 2, p_cost: 1 };
		cfg.security.max_failed_attempts = 20;
	})
	.await;
	let admin = harness.admin().await;

	harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;
	// The first unknown-user login builds the decoy hash.
	harness.service.login("ghost", "Wrong-pass1").await.expect_err("Unknown user must fail.");

	let mut known = Duration::ZERO;
	let mut unknown = Duration::ZERO;

	for round in 0..3 {
		let started = Instant::now();

		harness.service.login("officer1", "Wrong-pass1").await.expect_err("Wrong password must fail.");
		known += started.elapsed();

		let started = Instant::now();

		harness
			.service
			.login(&format!("ghost{round}"), "Wrong-pass1")
			.await
			.expect_err("Unknown user must fail.");
		unknown += started.elapsed();
	}

	assert!(
		unknown * 3 >= known,
		"Unknown users took {unknown:?} against {known:?} for a known user."
	);

	harness.finish().await;
}

#[tokio::test]
async fn lockout_survives_a_service_restart() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	for _ in 0..3 {
		harness.service.login("officer1", "Wrong-pass1").await.expect_err("Wrong password must fail.");
	}

	let restarted = FacegateService::with_encoder(
		harness.service.cfg.clone(),
		harness.service.db.clone(),
		Arc::new(ScriptedEncoder::default()),
	);
	let err = restarted
		.login("officer1", USER_PASSWORD)
		.await
		.expect_err("Lockout must outlive the service that recorded it.");

	assert!(matches!(err, Error::AccountLocked));

	harness.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_failures_lock_exactly_at_the_limit() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	let service = &harness.service;
	let results = tokio::join!(
		service.login("officer1", "Wrong-pass1"),
		service.login("officer1", "Wrong-pass2"),
		service.login("OFFICER1", "Wrong-pass3"),
		service.login("officer1", "Wrong-pass4"),
		service.login(" officer1", "Wrong-pass5"),
		service.login("officer1", "Wrong-pass6"),
	);
	let errors = [results.0, results.1, results.2, results.3, results.4, results.5]
		.into_iter()
		.map(|result| result.expect_err("Wrong passwords must fail."))
		.collect::<Vec<_>>();

	assert_eq!(
		errors.iter().filter(|err| matches!(err, Error::AuthenticationFailure)).count(),
		3
	);
	assert_eq!(errors.iter().filter(|err| matches!(err, Error::AccountLocked)).count(), 3);

	let outcomes = harness
		.activity("login")
		.await
		.into_iter()
		.filter(|entry| entry.actor == "officer1")
		.map(|entry| entry.outcome)
		.collect::<Vec<_>>();

	assert_eq!(outcomes, ["success", "failure", "failure", "failure", "locked", "locked", "locked"]);

	harness.finish().await;
}
