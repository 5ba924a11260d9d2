use facegate_domain::{access::Role, confidence::ConfidenceBucket};
use facegate_service::{Error, ExportRequest, MatchParams, RecognizeOptions};

use super::{Harness, Scripted, ScriptedEncoder};

#[tokio::test]
async fn enrolled_vector_is_its_own_best_match() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;
	let v1 = vec![0.12, -0.4, 0.33, 0.9];
	let enrolled = harness.enroll(&officer, "CR-001", "Case subject", v1.clone()).await;

	assert!(enrolled.identity_created);

	let response = harness
		.service
		.recognize_embedding(&officer, &v1, RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");
	let top = response.results.first().expect("Expected a match.");

	assert_eq!(top.identity_id, "CR-001");
	assert_eq!(top.identity_name, "Case subject");
	assert_eq!(top.embedding_id, enrolled.embedding_id);
	assert_eq!(top.similarity, 1.0);
	assert_eq!(top.bucket, ConfidenceBucket::High);

	harness.finish().await;
}

#[tokio::test]
async fn empty_gallery_yields_no_results() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let response = harness
		.service
		.recognize_embedding(&admin, &super::axis(0), RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");

	assert!(response.results.is_empty());
	assert_eq!(response.gallery_version, 0);

	harness.finish().await;
}

#[tokio::test]
async fn results_are_sorted_thresholded_and_capped() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.enroll(&admin, "CR-010", "Exact", vec![1.0, 0.0, 0.0, 0.0]).await;
	harness.enroll(&admin, "CR-011", "Close", vec![0.9, 0.3, 0.0, 0.0]).await;
	harness.enroll(&admin, "CR-012", "Near", vec![0.7, 0.7, 0.0, 0.0]).await;
	harness.enroll(&admin, "CR-013", "Opposite", vec![-1.0, 0.0, 0.0, 0.0]).await;

	let all = harness
		.service
		.recognize_embedding(
			&admin,
			&super::axis(0),
			RecognizeOptions {
				params: MatchParams { top_k: Some(0), min_threshold: Some(0.6) },
				..RecognizeOptions::default()
			},
		)
		.await
		.expect("Failed to recognize.");
	let ids = all.results.iter().map(|result| result.identity_id.as_str()).collect::<Vec<_>>();

	assert_eq!(ids, ["CR-010", "CR-011", "CR-012"]);
	assert!(all.results.windows(2).all(|pair| pair[0].similarity >= pair[1].similarity));
	assert!(all.results.iter().all(|result| result.similarity >= 0.6));

	let capped = harness
		.service
		.recognize_embedding(
			&admin,
			&super::axis(0),
			RecognizeOptions {
				params: MatchParams { top_k: Some(2), min_threshold: Some(0.6) },
				..RecognizeOptions::default()
			},
		)
		.await
		.expect("Failed to recognize.");

	assert_eq!(capped.results.len(), 2);
	assert_eq!(capped.results[0].identity_id, "CR-010");

	harness.finish().await;
}

#[tokio::test]
async fn image_recognition_persists_and_exports() {
	let encoder = ScriptedEncoder::default().face(b"suspect.jpg", super::axis(1));
	let harness = Harness::new(encoder).await;
	let admin = harness.admin().await;

	harness.enroll(&admin, "CR-020", "Subject", super::axis(1)).await;

	let response = harness
		.service
		.recognize_image(
			&admin,
			b"suspect.jpg",
			RecognizeOptions {
				persist: true,
				label: Some("suspect.jpg".to_string()),
				..RecognizeOptions::default()
			},
		)
		.await
		.expect("Failed to recognize image.");

	assert_eq!(response.quality, Some(0.9));
	assert_eq!(response.results.len(), 1);

	let exported = harness
		.service
		.export_results(
			&admin,
			ExportRequest { query_id: Some(response.query_id), ..ExportRequest::default() },
		)
		.await
		.expect("Failed to export results.");

	assert_eq!(exported.len(), 1);
	assert_eq!(exported[0].identity_id, "CR-020");
	assert_eq!(exported[0].identity_name.as_deref(), Some("Subject"));
	assert_eq!(exported[0].query_label.as_deref(), Some("suspect.jpg"));
	assert_eq!(exported[0].bucket, ConfidenceBucket::High);
	assert_eq!(exported[0].matched_by, "admin");

	let stats = harness.service.statistics(&admin).await.expect("Failed to read statistics.");

	assert_eq!(stats.identities, 1);
	assert_eq!(stats.embeddings, 1);
	assert_eq!(stats.stored_results, 1);
	assert_eq!(stats.recognition_queries, 1);
	assert_eq!(stats.high_confidence, 1);

	harness.finish().await;
}

#[tokio::test]
async fn unusable_images_fail_and_are_audited() {
	let encoder = ScriptedEncoder::default()
		.with(b"blurry.jpg", Scripted::Face { vector: super::axis(0), quality: 0.1 })
		.with(b"wall.jpg", Scripted::NoFace)
		.with(b"slow.jpg", Scripted::Stall);
	let harness = Harness::new(encoder).await;
	let admin = harness.admin().await;
	let low = harness
		.service
		.recognize_image(&admin, b"blurry.jpg", RecognizeOptions::default())
		.await
		.expect_err("Low-quality face must be refused.");

	assert!(matches!(low, Error::LowQuality { .. }));

	let none = harness
		.service
		.recognize_image(&admin, b"wall.jpg", RecognizeOptions::default())
		.await
		.expect_err("Faceless image must be refused.");

	assert!(matches!(none, Error::NoFaceDetected));

	let empty = harness
		.service
		.recognize_image(&admin, b"", RecognizeOptions::default())
		.await
		.expect_err("Empty image must be refused.");

	assert!(matches!(empty, Error::NoFaceDetected));

	let slow = harness
		.service
		.recognize_image(&admin, b"slow.jpg", RecognizeOptions::default())
		.await
		.expect_err("Stalled encoder must time out.");

	assert!(matches!(slow, Error::Timeout { .. }));

	let failures = harness
		.activity("recognize")
		.await
		.into_iter()
		.filter(|entry| entry.outcome == "failure")
		.count();

	assert_eq!(failures, 4);

	harness.finish().await;
}

#[tokio::test]
async fn malformed_query_vectors_are_rejected() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	for query in [vec![1.0, 0.0], vec![0.0; super::DIM], vec![f32::NAN, 0.0, 0.0, 0.0]] {
		let err = harness
			.service
			.recognize_embedding(&admin, &query, RecognizeOptions::default())
			.await
			.expect_err("Malformed query must be rejected.");

		assert!(matches!(err, Error::InvalidEmbedding { .. }), "Unexpected error: {err}.");
	}

	let err = harness
		.service
		.recognize_embedding(
			&admin,
			&super::axis(0),
			RecognizeOptions {
				params: MatchParams { top_k: None, min_threshold: Some(1.5) },
				..RecognizeOptions::default()
			},
		)
		.await
		.expect_err("Out-of-range threshold must be rejected.");

	assert!(matches!(err, Error::InvalidRequest { .. }));

	harness.finish().await;
}

#[tokio::test]
async fn recognition_fits_in_a_single_connection() {
	let encoder = ScriptedEncoder::default().face(b"query.jpg", super::axis(2));
	let harness = Harness::with_config(encoder, |cfg| {
		cfg.storage.pool_max_conns = 1;
		cfg.storage.acquire_timeout_ms = 1_000;
	})
	.await;
	let admin = harness.admin().await;

	harness.enroll(&admin, "CR-040", "Solo", super::axis(2)).await;

	let persisted = RecognizeOptions { persist: true, ..RecognizeOptions::default() };
	let by_vector = harness
		.service
		.recognize_embedding(&admin, &super::axis(2), persisted.clone())
		.await
		.expect("Recognition must not need a second connection.");
	let by_image = harness
		.service
		.recognize_image(&admin, b"query.jpg", persisted)
		.await
		.expect("Recognition must not need a second connection.");

	assert_eq!(by_vector.results[0].identity_id, "CR-040");
	assert_eq!(by_image.results[0].identity_id, "CR-040");
	assert_eq!(harness.count("match_results").await, 2);

	harness.finish().await;
}
