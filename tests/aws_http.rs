//! The real S3 and Rekognition clients against a local fake endpoint.

mod common;

use common::FakeAws;
use facematch::aws::AwsCredentials;
use facematch::face_index::{FaceIndex, FaceIndexError, RekognitionClient};
use facematch::models::ImageRef;
use facematch::object_store::{list_keys, ObjectStore, ObjectStoreError, S3ObjectStore};
use facematch::pipeline::{Pipeline, PipelineSettings, ProvisionOutcome};
use std::time::Duration;
use tempfile::TempDir;

fn credentials() -> AwsCredentials {
    AwsCredentials::new("AKIDTEST", "test-secret", None)
}

fn s3(endpoint: &str) -> S3ObjectStore {
    S3ObjectStore::new(
        credentials(),
        "us-east-2",
        Some(endpoint.to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn rekognition(endpoint: &str) -> RekognitionClient {
    RekognitionClient::new(credentials(), "us-east-2", Some(endpoint), Duration::from_secs(5))
        .unwrap()
}

// ─── S3 ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn s3_listing_follows_continuation_tokens() {
    let fake = FakeAws::new(
        "photos",
        &[
            "base/",
            "base/a.jpg",
            "base/b.jpg",
            "base/c & d.jpg",
            "base/e.jpg",
            "game/x.jpg",
        ],
    )
    .with_page_size(2);
    let (url, state) = common::spawn(fake).await;
    let store = s3(&url);

    let all = store.list_objects("photos", "base/").await.unwrap();
    assert_eq!(
        all,
        vec!["base/", "base/a.jpg", "base/b.jpg", "base/c & d.jpg", "base/e.jpg"]
    );

    let lists = state.lock().unwrap().lists.clone();
    assert_eq!(lists.len(), 3);
    assert_eq!(lists[0].bucket, "photos");
    assert_eq!(lists[0].params.get("list-type").map(String::as_str), Some("2"));
    assert_eq!(lists[0].params.get("prefix").map(String::as_str), Some("base/"));
    assert!(lists[0].params.get("continuation-token").is_none());
    assert_eq!(
        lists[1].params.get("continuation-token").map(String::as_str),
        Some("2")
    );
    let auth = lists[0].authorization.as_deref().unwrap();
    assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDTEST/"));
    assert!(auth.contains("/us-east-2/s3/aws4_request"));
    assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
}

#[tokio::test]
async fn s3_list_keys_drops_placeholders() {
    let fake = FakeAws::new("photos", &["game/", "game/x.jpg", "game/night/", "game/night/y.jpg"]);
    let (url, _state) = common::spawn(fake).await;

    let keys = list_keys(&s3(&url), "photos", "game/").await;
    assert_eq!(keys, vec!["game/x.jpg", "game/night/y.jpg"]);
}

#[tokio::test]
async fn s3_unknown_bucket_is_a_service_error() {
    let (url, _state) = common::spawn(FakeAws::new("photos", &["base/a.jpg"])).await;
    let store = s3(&url);

    match store.list_objects("nope", "base/").await {
        Err(ObjectStoreError::Service { status, body }) => {
            assert_eq!(status, 404);
            assert!(body.contains("NoSuchBucket"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(list_keys(&store, "nope", "base/").await.is_empty());
}

// ─── Rekognition ────────────────────────────────────────────────────

#[tokio::test]
async fn create_collection_reports_already_exists() {
    let (url, state) = common::spawn(FakeAws::new("photos", &[])).await;
    let client = rekognition(&url);

    client.create_collection("players").await.unwrap();
    let err = client.create_collection("players").await.unwrap_err();
    assert!(err.is_already_exists(), "unexpected error: {:?}", err);

    let calls = state.lock().unwrap().calls_for("CreateCollection");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].body["CollectionId"], "players");
    let auth = calls[0].authorization.as_deref().unwrap();
    assert!(auth.contains("/us-east-2/rekognition/aws4_request"));
    assert!(auth.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-target"));
}

#[tokio::test]
async fn delete_missing_collection_is_not_found() {
    let (url, _state) = common::spawn(FakeAws::new("photos", &[])).await;
    let client = rekognition(&url);

    let err = client.delete_collection("ghost").await.unwrap_err();
    assert!(matches!(err, FaceIndexError::NotFound(_)), "unexpected error: {:?}", err);

    client.create_collection("ghost").await.unwrap();
    client.delete_collection("ghost").await.unwrap();
}

#[tokio::test]
async fn index_faces_requests_all_attributes() {
    let (url, state) = common::spawn(FakeAws::new("photos", &[])).await;
    let client = rekognition(&url);
    client.create_collection("players").await.unwrap();

    let image = ImageRef::new("photos", "base/player_12.jpg");
    let indexed = client
        .index_faces("players", &image, "player_12.jpg")
        .await
        .unwrap();
    assert_eq!(indexed.face_ids, vec!["face-player_12.jpg"]);

    let call = state.lock().unwrap().calls_for("IndexFaces").remove(0);
    assert_eq!(call.body["ExternalImageId"], "player_12.jpg");
    assert_eq!(call.body["DetectionAttributes"], serde_json::json!(["ALL"]));
    assert_eq!(call.body["Image"]["S3Object"]["Bucket"], "photos");
    assert_eq!(call.body["Image"]["S3Object"]["Name"], "base/player_12.jpg");
}

#[tokio::test]
async fn search_faces_returns_matches_and_errors() {
    let fake = FakeAws::new("photos", &[])
        .with_matches("game/x.jpg", &[("a.jpg", 85.0), ("b.jpg", 70.0)])
        .with_faceless("game/crowd.jpg");
    let (url, state) = common::spawn(fake).await;
    let client = rekognition(&url);
    client.create_collection("players").await.unwrap();

    let matches = client
        .search_faces_by_image("players", &ImageRef::new("photos", "game/x.jpg"), 70.0, 70)
        .await
        .unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].external_id, "a.jpg");
    assert_eq!(matches[0].similarity, 85.0);
    assert_eq!(matches[1].similarity, 70.0);

    let none = client
        .search_faces_by_image("players", &ImageRef::new("photos", "game/empty.jpg"), 70.0, 70)
        .await
        .unwrap();
    assert!(none.is_empty());

    match client
        .search_faces_by_image("players", &ImageRef::new("photos", "game/crowd.jpg"), 70.0, 70)
        .await
    {
        Err(FaceIndexError::Service { status, code, .. }) => {
            assert_eq!(status, 400);
            assert_eq!(code, "InvalidParameterException");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let call = state.lock().unwrap().calls_for("SearchFacesByImage").remove(0);
    assert_eq!(call.body["FaceMatchThreshold"], 70.0);
    assert_eq!(call.body["MaxFaces"], 70);
}

// ─── Pipeline over HTTP ─────────────────────────────────────────────

#[tokio::test]
async fn pipeline_runs_against_http_clients() {
    let fake = FakeAws::new(
        "photos",
        &["base/", "base/a.jpg", "base/b.jpg", "game/x.jpg", "game/y.jpg", "game/z.jpg"],
    )
    .with_matches("game/x.jpg", &[("a.jpg", 85.0)])
    .with_faceless("game/z.jpg");
    let (url, state) = common::spawn(fake).await;
    let store = s3(&url);
    let faces = rekognition(&url);

    let settings = PipelineSettings {
        bucket: "photos".to_string(),
        collection_id: "players".to_string(),
        base_prefix: "base/".to_string(),
        query_prefix: "game/".to_string(),
        similarity_threshold: 70.0,
        max_matches: 70,
        recreate_collection: false,
    };
    let pipeline = Pipeline::new(&store, &faces, settings);

    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("results.csv");
    let summary = pipeline.run(&path).await.unwrap();

    assert_eq!(summary.provision, ProvisionOutcome::Created);
    assert_eq!(summary.population.indexed, 2);
    assert_eq!(summary.matching.searched, 2);
    assert_eq!(summary.matching.failed, 1);
    assert_eq!(summary.matching.without_match, 1);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("a.jpg,game/x.jpg,85"));

    let fake = state.lock().unwrap();
    let external_ids: Vec<_> = fake
        .calls_for("IndexFaces")
        .iter()
        .map(|c| c.body["ExternalImageId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(external_ids, vec!["a.jpg", "b.jpg"]);
    assert_eq!(fake.calls_for("SearchFacesByImage").len(), 3);
}
