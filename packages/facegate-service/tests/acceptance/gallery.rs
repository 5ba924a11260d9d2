use serde_json::json;

use facegate_domain::access::Role;
use facegate_service::{
	EnrollImageRequest, EnrollRequest, Error, IdentityPatch, IdentityQuery, IdentityView,
	RecognizeOptions,
};

use super::{Harness, ScriptedEncoder};

#[tokio::test]
async fn second_embedding_joins_the_existing_identity() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let first = harness.enroll(&admin, "CR-300", "Subject", super::axis(0)).await;
	let second = harness
		.service
		.enroll(
			&admin,
			EnrollRequest {
				identity_id: "CR-300".to_string(),
				name: None,
				metadata: None,
				embedding: super::axis(1),
				quality: 0.7,
			},
		)
		.await
		.expect("Failed to add embedding.");

	assert!(first.identity_created);
	assert!(!second.identity_created);

	let view = harness.service.get_identity(&admin, "CR-300").await.expect("Failed to get identity.");

	assert_eq!(view.embedding_count, 2);
	assert_eq!(view.created_by, "admin");
	assert_eq!(harness.activity("add_embedding").await.len(), 1);

	harness.finish().await;
}

#[tokio::test]
async fn conflicting_names_and_bad_vectors_are_refused() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.enroll(&admin, "CR-301", "Original", super::axis(0)).await;

	let duplicate = harness
		.service
		.enroll(
			&admin,
			EnrollRequest {
				identity_id: "CR-301".to_string(),
				name: Some("Someone else".to_string()),
				metadata: None,
				embedding: super::axis(1),
				quality: 0.9,
			},
		)
		.await
		.expect_err("Conflicting name must be refused.");

	assert!(matches!(duplicate, Error::DuplicateIdentity { ref identity_id } if identity_id == "CR-301"));

	for embedding in [vec![1.0, 0.0, 0.0], vec![0.0; super::DIM], vec![f32::INFINITY, 0.0, 0.0, 0.0]]
	{
		let err = harness
			.service
			.enroll(
				&admin,
				EnrollRequest {
					identity_id: "CR-302".to_string(),
					name: Some("New".to_string()),
					metadata: None,
					embedding,
					quality: 0.9,
				},
			)
			.await
			.expect_err("Malformed embedding must be refused.");

		assert!(matches!(err, Error::InvalidEmbedding { .. }), "Unexpected error: {err}.");
	}

	let orphan = harness
		.service
		.enroll(
			&admin,
			EnrollRequest {
				identity_id: "CR-303".to_string(),
				name: None,
				metadata: None,
				embedding: super::axis(2),
				quality: 0.9,
			},
		)
		.await
		.expect_err("Unknown identity without a name must be refused.");

	assert!(matches!(orphan, Error::InvalidRequest { .. }));
	assert_eq!(harness.count("identities").await, 1);
	assert_eq!(harness.count("embeddings").await, 1);

	harness.finish().await;
}

#[tokio::test]
async fn removing_an_identity_removes_its_embeddings() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.enroll(&admin, "CR-310", "Subject", super::axis(0)).await;
	harness.enroll(&admin, "CR-310", "subject", super::axis(1)).await;
	harness.enroll(&admin, "CR-311", "Other", super::axis(3)).await;

	assert!(harness.service.remove_identity(&admin, "CR-310").await.expect("Failed to remove."));
	assert!(!harness.service.remove_identity(&admin, "CR-310").await.expect("Failed to remove."));
	assert_eq!(harness.count("embeddings").await, 1);

	let response = harness
		.service
		.recognize_embedding(&admin, &super::axis(0), RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");

	assert!(response.results.is_empty());

	let missing = harness
		.service
		.get_identity(&admin, "CR-310")
		.await
		.expect_err("Removed identity must be gone.");

	assert!(matches!(missing, Error::NotFound { .. }));

	harness.finish().await;
}

#[tokio::test]
async fn removing_one_embedding_keeps_the_identity() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let first = harness.enroll(&admin, "CR-320", "Subject", super::axis(0)).await;

	harness.enroll(&admin, "CR-320", "Subject", super::axis(1)).await;

	assert!(
		harness.service.remove_embedding(&admin, first.embedding_id).await.expect("Failed to remove.")
	);

	let view = harness.service.get_identity(&admin, "CR-320").await.expect("Failed to get identity.");

	assert_eq!(view.embedding_count, 1);
	assert!(view.embeddings.iter().all(|embedding| embedding.embedding_id != first.embedding_id));

	harness.finish().await;
}

#[tokio::test]
async fn renamed_identities_show_their_new_name_in_matches() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;

	harness.enroll(&admin, "CR-330", "Old name", super::axis(2)).await;

	let before = harness
		.service
		.recognize_embedding(&admin, &super::axis(2), RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");
	let updated = harness
		.service
		.update_identity(
			&admin,
			"CR-330",
			IdentityPatch {
				name: Some("New name".to_string()),
				metadata: Some(json!({ "case": "2026-114" })),
				status: None,
			},
		)
		.await
		.expect("Failed to update identity.");

	assert_eq!(updated.name, "New name");
	assert_eq!(updated.metadata["case"], "2026-114");

	let after = harness
		.service
		.recognize_embedding(&admin, &super::axis(2), RecognizeOptions::default())
		.await
		.expect("Failed to recognize.");

	assert_eq!(after.results[0].identity_name, "New name");
	assert!(after.gallery_version > before.gallery_version);

	let bad_status = harness
		.service
		.update_identity(
			&admin,
			"CR-330",
			IdentityPatch { status: Some("vanished".to_string()), ..IdentityPatch::default() },
		)
		.await
		.expect_err("Unknown status must be refused.");

	assert!(matches!(bad_status, Error::InvalidRequest { .. }));

	harness.finish().await;
}

#[tokio::test]
async fn listing_is_paged_and_open_to_every_role() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	for index in 0..3 {
		harness.enroll(&admin, &format!("CR-34{index}"), "Subject", super::axis(index)).await;
	}

	let page = |offset| IdentityQuery { limit: Some(2), offset, ..IdentityQuery::default() };
	let first_page =
		harness.service.list_identities(&officer, &page(0)).await.expect("Failed to list.");
	let second_page =
		harness.service.list_identities(&officer, &page(2)).await.expect("Failed to list.");

	assert_eq!(first_page.len(), 2);
	assert_eq!(second_page.len(), 1);
	assert!(first_page.iter().all(|view| view.embedding_count == 1));

	let inactive = harness
		.service
		.list_identities(
			&officer,
			&IdentityQuery { status: Some("inactive".to_string()), ..IdentityQuery::default() },
		)
		.await
		.expect("Failed to list.");

	assert!(inactive.is_empty());

	harness.finish().await;
}

#[tokio::test]
async fn search_matches_ids_and_names_in_any_case() {
	let harness = Harness::new(ScriptedEncoder::default()).await;
	let admin = harness.admin().await;
	let officer = harness.user(&admin, "officer1", Role::InvestigatingOfficer).await;

	harness.enroll(&admin, "CR-350", "Jane Roe", super::axis(0)).await;
	harness.enroll(&admin, "CR-351", "John Doe", super::axis(1)).await;
	harness.enroll(&admin, "MP-900", "Ann Roebuck", super::axis(2)).await;

	let search =
		|text: &str| IdentityQuery { search: Some(text.to_string()), ..IdentityQuery::default() };
	let ids = |views: Vec<IdentityView>| {
		views.into_iter().map(|view| view.identity_id).collect::<Vec<_>>()
	};
	let by_name =
		harness.service.list_identities(&officer, &search("ROE")).await.expect("Failed to search.");
	let by_id =
		harness.service.list_identities(&officer, &search("cr-35")).await.expect("Failed to search.");
	let blank =
		harness.service.list_identities(&officer, &search("  ")).await.expect("Failed to search.");
	let missing =
		harness.service.list_identities(&officer, &search("50%")).await.expect("Failed to search.");

	assert_eq!(ids(by_name), ["CR-350", "MP-900"]);
	assert_eq!(ids(by_id), ["CR-350", "CR-351"]);
	assert_eq!(blank.len(), 3);
	assert!(missing.is_empty());

	let audited = harness.activity("view_results").await;

	assert_eq!(audited.len(), 4);
	assert_eq!(audited[0].details["search"], "ROE");
	assert!(audited[2].details["search"].is_null());

	harness.finish().await;
}

#[tokio::test]
async fn image_enrollment_uses_the_encoder_quality() {
	let encoder = ScriptedEncoder::default().face(b"mugshot.jpg", super::axis(3));
	let harness = Harness::new(encoder).await;
	let admin = harness.admin().await;
	let enrolled = harness
		.service
		.enroll_image(
			&admin,
			EnrollImageRequest {
				identity_id: "CR-350".to_string(),
				name: Some("Subject".to_string()),
				metadata: None,
				image: b"mugshot.jpg".to_vec(),
			},
		)
		.await
		.expect("Failed to enroll image.");

	assert!(enrolled.identity_created);
	assert_eq!(enrolled.quality, 0.9);

	let faceless = harness
		.service
		.enroll_image(
			&admin,
			EnrollImageRequest {
				identity_id: "CR-351".to_string(),
				name: Some("Nobody".to_string()),
				metadata: None,
				image: b"wall.jpg".to_vec(),
			},
		)
		.await
		.expect_err("Faceless image must not be enrolled.");

	assert!(matches!(faceless, Error::NoFaceDetected));
	assert_eq!(harness.count("identities").await, 1);

	harness.finish().await;
}
