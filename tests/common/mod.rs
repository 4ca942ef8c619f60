//! A local stand-in for S3 (`ListObjectsV2`, path-style) and Rekognition
//! (JSON 1.1 protocol), served with axum on an ephemeral port.
#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// One Rekognition call as received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: String,
    pub body: Value,
    pub authorization: Option<String>,
}

/// One S3 listing request as received.
#[derive(Debug, Clone)]
pub struct RecordedList {
    pub bucket: String,
    pub params: HashMap<String, String>,
    pub authorization: Option<String>,
}

#[derive(Debug)]
pub struct FakeAws {
    pub bucket: String,
    pub objects: Vec<String>,
    pub page_size: usize,
    pub collections: HashSet<String>,
    /// Search results by query image key: (external id, similarity).
    pub matches: HashMap<String, Vec<(String, f64)>>,
    pub faceless_images: HashSet<String>,
    pub calls: Vec<RecordedCall>,
    pub lists: Vec<RecordedList>,
}

impl FakeAws {
    pub fn new(bucket: &str, objects: &[&str]) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: objects.iter().map(|o| o.to_string()).collect(),
            page_size: 1000,
            collections: HashSet::new(),
            matches: HashMap::new(),
            faceless_images: HashSet::new(),
            calls: Vec::new(),
            lists: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_matches(mut self, key: &str, matches: &[(&str, f64)]) -> Self {
        self.matches.insert(
            key.to_string(),
            matches.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
        );
        self
    }

    pub fn with_faceless(mut self, key: &str) -> Self {
        self.faceless_images.insert(key.to_string());
        self
    }

    pub fn calls_for(&self, operation: &str) -> Vec<RecordedCall> {
        self.calls
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }
}

pub type SharedFake = Arc<Mutex<FakeAws>>;

/// Serve `fake` on 127.0.0.1 and return its base URL.
pub async fn spawn(fake: FakeAws) -> (String, SharedFake) {
    let state: SharedFake = Arc::new(Mutex::new(fake));
    let app = Router::new()
        .route("/", post(rekognition))
        .route("/{bucket}", get(list_objects))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

async fn list_objects(
    State(state): State<SharedFake>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut fake = state.lock().unwrap();
    fake.lists.push(RecordedList {
        bucket: bucket.clone(),
        params: params.clone(),
        authorization: authorization(&headers),
    });

    if bucket != fake.bucket {
        return (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "application/xml")],
            "<Error><Code>NoSuchBucket</Code></Error>",
        )
            .into_response();
    }

    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let keys: Vec<&String> = fake
        .objects
        .iter()
        .filter(|k| k.starts_with(&prefix))
        .collect();
    let start: usize = params
        .get("continuation-token")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let end = (start + fake.page_size).min(keys.len());
    let truncated = end < keys.len();

    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
    );
    xml.push_str(&format!("<Name>{}</Name>", bucket));
    xml.push_str(&format!("<Prefix>{}</Prefix>", xml_escape(&prefix)));
    xml.push_str(&format!("<KeyCount>{}</KeyCount>", end - start.min(end)));
    xml.push_str(&format!("<IsTruncated>{}</IsTruncated>", truncated));
    if truncated {
        xml.push_str(&format!(
            "<NextContinuationToken>{}</NextContinuationToken>",
            end
        ));
    }
    for key in keys.iter().take(end).skip(start) {
        xml.push_str(&format!(
            "<Contents><Key>{}</Key><Size>1024</Size><StorageClass>STANDARD</StorageClass></Contents>",
            xml_escape(key)
        ));
    }
    xml.push_str("</ListBucketResult>");

    (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], xml).into_response()
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/x-amz-json-1.1")],
        body.to_string(),
    )
        .into_response()
}

fn json_error(code: &str, message: &str) -> Response {
    json_response(
        StatusCode::BAD_REQUEST,
        json!({ "__type": code, "Message": message }),
    )
}

async fn rekognition(State(state): State<SharedFake>, headers: HeaderMap, body: Bytes) -> Response {
    let mut fake = state.lock().unwrap();

    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let operation = target
        .strip_prefix("RekognitionService.")
        .unwrap_or(target)
        .to_string();
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    fake.calls.push(RecordedCall {
        operation: operation.clone(),
        body: request.clone(),
        authorization: authorization(&headers),
    });

    let collection = request["CollectionId"].as_str().unwrap_or_default().to_string();
    let image_key = request["Image"]["S3Object"]["Name"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    match operation.as_str() {
        "CreateCollection" => {
            if !fake.collections.insert(collection.clone()) {
                return json_error(
                    "ResourceAlreadyExistsException",
                    &format!("The collection id: {} already exists", collection),
                );
            }
            json_response(
                StatusCode::OK,
                json!({
                    "StatusCode": 200,
                    "CollectionArn": format!("aws:rekognition:us-east-2:000000000000:collection/{}", collection),
                    "FaceModelVersion": "7.0"
                }),
            )
        }
        "DeleteCollection" => {
            if !fake.collections.remove(&collection) {
                return json_error(
                    "ResourceNotFoundException",
                    &format!("The collection id: {} does not exist", collection),
                );
            }
            json_response(StatusCode::OK, json!({ "StatusCode": 200 }))
        }
        "IndexFaces" => {
            if !fake.collections.contains(&collection) {
                return json_error("ResourceNotFoundException", "collection not found");
            }
            if fake.faceless_images.contains(&image_key) {
                return json_response(
                    StatusCode::OK,
                    json!({ "FaceRecords": [], "UnindexedFaces": [] }),
                );
            }
            let external_id = request["ExternalImageId"].as_str().unwrap_or_default();
            json_response(
                StatusCode::OK,
                json!({
                    "FaceRecords": [{
                        "Face": {
                            "FaceId": format!("face-{}", external_id),
                            "ExternalImageId": external_id,
                            "Confidence": 99.9
                        },
                        "FaceDetail": { "Confidence": 99.9 }
                    }],
                    "UnindexedFaces": [],
                    "FaceModelVersion": "7.0"
                }),
            )
        }
        "SearchFacesByImage" => {
            if !fake.collections.contains(&collection) {
                return json_error("ResourceNotFoundException", "collection not found");
            }
            if fake.faceless_images.contains(&image_key) {
                return json_error(
                    "InvalidParameterException",
                    "There are no faces in the image. Should be at least 1.",
                );
            }
            let matches: Vec<Value> = fake
                .matches
                .get(&image_key)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|(external_id, similarity)| {
                    json!({
                        "Similarity": similarity,
                        "Face": {
                            "FaceId": format!("face-{}", external_id),
                            "ExternalImageId": external_id,
                            "Confidence": 99.9
                        }
                    })
                })
                .collect();
            json_response(
                StatusCode::OK,
                json!({
                    "SearchedFaceConfidence": 99.0,
                    "FaceMatches": matches,
                    "FaceModelVersion": "7.0"
                }),
            )
        }
        _ => json_error("UnknownOperationException", target),
    }
}
