use std::time::Duration;

use time::OffsetDateTime;

use facegate_domain::access::Role;
use facegate_service::{AuditOutcome, AuditQuery, Error, RecognizeOptions};

use super::{Harness, ScriptedEncoder};

#[tokio::test]
async fn cursor_pages_in_sequence_order() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	for _ in 0..5 {
		harness
			.service
			.recognize_embedding(&admin, &super::axis(0), RecognizeOptions::default())
			.await
			.expect("Failed to recognize.");
	}

	let mut cursor = harness
		.service
		.query_audit(
			&admin,
			AuditQuery {
				action: Some("recognize".to_string()),
				page_size: Some(2),
				..AuditQuery::default()
			},
		)
		.await
		.expect("Failed to open audit cursor.");
	let mut sizes = Vec::new();
	let mut seqs = Vec::new();

	while let Some(page) = cursor.next_page().await.expect("Failed to read audit page.") {
		sizes.push(page.len());
		seqs.extend(page.iter().map(|entry| entry.seq));
	}

	assert_eq!(sizes, [2, 2, 1]);
	assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
	assert!(cursor.next_page().await.expect("Exhausted cursor must stay readable.").is_none());

	let resumed = harness
		.service
		.query_audit(&admin, AuditQuery { action: Some("recognize".to_string()), ..AuditQuery::default() })
		.await
		.expect("Failed to open audit cursor.")
		.resume_after(seqs[2])
		.collect_all()
		.await
		.expect("Failed to drain audit cursor.");

	assert_eq!(resumed.iter().map(|entry| entry.seq).collect::<Vec<_>>(), seqs[3..]);

	harness.finish().await;
}

#[tokio::test]
async fn filters_narrow_the_log() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	harness
		.service
		.statistics(&officer)
		.await
		.expect_err("Officers may not view statistics.");
	harness
		.service
		.recognize_embedding(&officer, &super::axis(1), RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");
	tokio::time::sleep(Duration::from_millis(20)).await;

	let cutoff = OffsetDateTime::now_utc();

	tokio::time::sleep(Duration::from_millis(20)).await;
	harness
		.service
		.recognize_embedding(&officer, &super::axis(2), RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");

	let denied = harness
		.service
		.query_audit(
			&admin,
			AuditQuery {
				actor: Some("officer1".to_string()),
				outcome: Some(AuditOutcome::Denied),
				..AuditQuery::default()
			},
		)
		.await
		.expect("Failed to open audit cursor.")
		.collect_all()
		.await
		.expect("Failed to drain audit cursor.");

	assert_eq!(denied.len(), 1);
	assert_eq!(denied[0].action, "view_statistics");

	let recent = harness
		.service
		.query_audit(
			&admin,
			AuditQuery {
				actor: Some("officer1".to_string()),
				action: Some("recognize".to_string()),
				since: Some(cutoff),
				..AuditQuery::default()
			},
		)
		.await
		.expect("Failed to open audit cursor.")
		.collect_all()
		.await
		.expect("Failed to drain audit cursor.");

	assert_eq!(recent.len(), 1);
	assert!(recent[0].logged_at >= cutoff);

	harness.finish().await;
}

#[tokio::test]
async fn reading_the_log_is_admin_only_and_itself_recorded() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let head = harness.user(&admin, "head1", Role::InvestigatingHead).await;
	let denied = harness
		.service
		.query_audit(&head, AuditQuery::default())
		.await
		.err()
		.expect("Heads may not read the audit log.");

	assert!(matches!(denied, Error::PermissionDenied { .. }));

	harness
		.service
		.query_audit(&admin, AuditQuery::default())
		.await
		.expect("Failed to open audit cursor.");

	let outcomes = harness
		.activity("view_audit_log")
		.await
		.into_iter()
		.map(|entry| (entry.actor, entry.outcome))
		.collect::<Vec<_>>();

	assert_eq!(
		outcomes,
		[
			("head1".to_string(), "denied".to_string()),
			("admin".to_string(), "success".to_string()),
		]
	);

	harness.finish().await;
}

#[tokio::test]
async fn failed_audit_write_rolls_the_action_back() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	sqlx::query("DROP TABLE activity_log")
		.execute(&harness.service.db.pool)
		.await
		.expect("Failed to drop activity log.");

	let err = harness
		.service
		.enroll(
			&admin,
			facegate_service::EnrollRequest {
				identity_id: "CR-600".to_string(),
				name: Some("Subject".to_string()),
				metadata: None,
				embedding: super::axis(0),
				quality: 0.9,
			},
		)
		.await
		.expect_err("Enrollment must fail closed without an audit log.");

	assert!(matches!(err, Error::AuditWriteFailure { .. }), "Unexpected error: {err}.");
	assert_eq!(harness.count("identities").await, 0);
	assert_eq!(harness.count("embeddings").await, 0);

	harness.finish().await;
}
