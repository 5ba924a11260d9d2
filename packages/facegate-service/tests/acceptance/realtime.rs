use std::{sync::atomic::Ordering, time::Duration};

use facegate_domain::access::Role;
use facegate_service::{Error, FrameResult, RealtimeOptions, UserPatch};

use super::{BrokenSource, EndlessSource, Harness, Scripted, ScriptedEncoder, ScriptedSource};

#[tokio::test]
async fn exhausted_source_reports_every_sampled_frame() {
	let encoder =
		ScriptedEncoder::default().face(b"a.jpg", super::axis(0)).face(b"b.jpg", super::axis(1));
	let harness = Harness::new(encoder).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	harness.enroll(&admin, "CR-500", "First", super::axis(0)).await;
	harness.enroll(&admin, "CR-501", "Second", super::axis(1)).await;

	let source = ScriptedSource::new(&[b"a.jpg", b"none.jpg", b"b.jpg"], Duration::from_millis(60));
	let mut session = harness
		.service
		.start_realtime(&officer, source, RealtimeOptions::default())
		.await
		.expect("Failed to start real-time session.");
	let mut outcomes = Vec::new();

	tokio::time::timeout(Duration::from_secs(5), async {
		while let Some(outcome) = session.next().await {
			outcomes.push(outcome.expect("Store must stay available."));
		}
	})
	.await
	.expect("Session must end once the source is exhausted.");

	let summary = session.stop().await.expect("Failed to stop session.");

	assert_eq!(summary.received, 3);
	assert_eq!(summary.sampled as usize, outcomes.len());
	assert_eq!(summary.matched + summary.failed, summary.sampled);
	assert!(outcomes.iter().any(|outcome| matches!(outcome.result, FrameResult::Failed { .. })));

	let matched = outcomes
		.iter()
		.filter_map(|outcome| match &outcome.result {
			FrameResult::Matched { matches } => Some(matches),
			_ => None,
		})
		.collect::<Vec<_>>();

	assert!(!matched.is_empty());
	assert!(matched.iter().all(|matches| matches.len() == 1));

	let events = harness
		.activity("realtime_recognition")
		.await
		.into_iter()
		.map(|entry| entry.details["event"].as_str().map(str::to_string))
		.collect::<Vec<_>>();

	assert_eq!(events, [Some("start".to_string()), Some("stop".to_string())]);

	harness.finish().await;
}

#[tokio::test]
async fn stop_returns_promptly_while_the_encoder_stalls() {
	let encoder = ScriptedEncoder::default().with(b"cam.jpg", Scripted::Stall);
	let harness = Harness::with_config(encoder, |cfg| {
		cfg.providers.encoder.timeout_ms = 5_000;
		cfg.pipeline.drain_timeout_ms = 100;
	})
	.await;
	let admin = harness.admin().await;
	let session = harness
		.service
		.start_realtime(
			&admin,
			EndlessSource::new(b"cam.jpg", Duration::from_millis(5)),
			RealtimeOptions::default(),
		)
		.await
		.expect("Failed to start real-time session.");

	tokio::time::sleep(Duration::from_millis(200)).await;

	let summary = tokio::time::timeout(Duration::from_secs(2), session.stop())
		.await
		.expect("Stop must not wait for the stalled encoder.")
		.expect("Failed to stop session.");

	assert!(summary.sampled >= 1);
	assert!(summary.sampled <= 2);
	assert!(summary.dropped >= 1);
	assert_eq!(summary.matched, 0);

	harness.finish().await;
}

#[tokio::test]
async fn invalid_thresholds_never_start_a_session() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let err = harness
		.service
		.start_realtime(
			&admin,
			ScriptedSource::new(&[], Duration::from_millis(1)),
			RealtimeOptions { min_threshold: Some(-0.5), ..RealtimeOptions::default() },
		)
		.await
		.err()
		.expect("Invalid threshold must be refused.");

	assert!(matches!(err, Error::InvalidRequest { .. }));

	let audited = harness.activity("realtime_recognition").await;

	assert_eq!(audited.len(), 1);
	assert_eq!(audited[0].outcome, "failure");

	harness.finish().await;
}

#[tokio::test]
async fn deactivating_the_owner_ends_the_stream() {
	let encoder = ScriptedEncoder::default().face(b"cam.jpg", super::axis(0));
	let harness = Harness::new(encoder).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	harness.enroll(&admin, "CR-600", "Watched", super::axis(0)).await;

	let mut session = harness
		.service
		.start_realtime(
			&officer,
			EndlessSource::new(b"cam.jpg", Duration::from_millis(5)),
			RealtimeOptions { persist: true, ..RealtimeOptions::default() },
		)
		.await
		.expect("Failed to start real-time session.");
	let first = tokio::time::timeout(Duration::from_secs(2), session.next())
		.await
		.expect("First frame must arrive.")
		.expect("Stream must be open.")
		.expect("Store must stay available.");

	assert!(matches!(first.result, FrameResult::Matched { .. }));

	harness
		.service
		.update_user(&admin, "officer1", UserPatch { is_active: Some(false), ..UserPatch::default() })
		.await
		.expect("Failed to deactivate user.");

	let mut expired = false;

	tokio::time::timeout(Duration::from_secs(2), async {
		while let Some(outcome) = session.next().await {
			if matches!(outcome, Err(Error::SessionExpired)) {
				expired = true;
			}
		}
	})
	.await
	.expect("Stream must end once its session is revoked.");

	assert!(expired);

	let stored = harness.count("match_results").await;

	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(harness.count("match_results").await, stored);

	session.stop().await.expect("Failed to stop session.");

	let closed = harness
		.activity("realtime_recognition")
		.await
		.into_iter()
		.filter(|entry| entry.details["event"] == "session_closed")
		.collect::<Vec<_>>();

	assert_eq!(closed.len(), 1);
	assert_eq!(closed[0].outcome, "expired");
	assert_eq!(closed[0].actor, "officer1");

	harness.finish().await;
}

#[tokio::test]
async fn failing_source_does_not_starve_stop() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let source = BrokenSource::default();
	let pulls = source.pulls.clone();
	let session = harness
		.service
		.start_realtime(&admin, source, RealtimeOptions::default())
		.await
		.expect("Failed to start real-time session.");

	tokio::time::sleep(Duration::from_millis(200)).await;

	let summary = tokio::time::timeout(Duration::from_secs(2), session.stop())
		.await
		.expect("Stop must not wait on a failing source.")
		.expect("Failed to stop session.");

	assert_eq!(summary.received, 0);
	assert_eq!(summary.sampled, 0);
	assert!(pulls.load(Ordering::SeqCst) <= 50);

	harness.finish().await;
}

#[tokio::test]
async fn only_the_newest_frame_is_sampled() {
	let images = (0..10).map(|i| format!("burst-{i}.jpg").into_bytes()).collect::<Vec<_>>();
	let encoder = images
		.iter()
		.fold(ScriptedEncoder::default(), |encoder, image| encoder.face(image, super::axis(2)));
	let harness = Harness::with_config(encoder, |cfg| {
		cfg.pipeline.realtime_sample_interval_ms = 200;
	})
	.await;
	let admin = harness.admin().await;
	let burst = images.iter().map(Vec::as_slice).collect::<Vec<_>>();
	let mut session = harness
		.service
		.start_realtime(
			&admin,
			ScriptedSource::new(&burst, Duration::from_millis(1)),
			RealtimeOptions::default(),
		)
		.await
		.expect("Failed to start real-time session.");
	let mut outcomes = Vec::new();

	tokio::time::timeout(Duration::from_secs(5), async {
		while let Some(outcome) = session.next().await {
			outcomes.push(outcome.expect("Store must stay available."));
		}
	})
	.await
	.expect("Session must end once the source is exhausted.");

	let summary = session.stop().await.expect("Failed to stop session.");

	assert_eq!(summary.received, 10);
	assert!(summary.sampled >= 1);
	assert!(summary.sampled <= 2);
	assert_eq!(outcomes.last().map(|outcome| outcome.label.as_str()), Some("frame-9"));

	harness.finish().await;
}
