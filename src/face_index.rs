//! Face collections on Amazon Rekognition.
//!
//! [`FaceIndex`] is the seam the pipeline provisions, populates, and
//! searches a collection through. [`RekognitionClient`] implements it over
//! the Rekognition JSON 1.1 protocol: every operation is a signed
//! `POST /` with an `X-Amz-Target: RekognitionService.<Operation>` header.
//!
//! Images are always passed as S3 object references; bytes never pass
//! through this process.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

use crate::aws::{self, AwsCredentials, ServiceEndpoint, UnsignedRequest};
use crate::models::{FaceMatch, ImageRef};

const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Errors from the face index.
#[derive(Debug, thiserror::Error)]
pub enum FaceIndexError {
    #[error("collection '{0}' already exists")]
    AlreadyExists(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("{code} (HTTP {status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },
    #[error("request to Rekognition failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid Rekognition response: {0}")]
    InvalidResponse(String),
}

impl FaceIndexError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, FaceIndexError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FaceIndexError::NotFound(_))
    }
}

/// Result of indexing one reference image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedFaces {
    pub face_ids: Vec<String>,
    /// Faces detected but rejected (quality filter, face limit).
    pub unindexed: usize,
}

/// A named, persistent collection of indexed faces.
#[async_trait]
pub trait FaceIndex: Send + Sync {
    /// Create the collection. Fails with [`FaceIndexError::AlreadyExists`]
    /// when it is already there.
    async fn create_collection(&self, collection_id: &str) -> Result<(), FaceIndexError>;

    /// Delete the collection and every face in it.
    async fn delete_collection(&self, collection_id: &str) -> Result<(), FaceIndexError>;

    /// Detect faces in `image` and add them to the collection, labelled
    /// with `external_id`. All face attributes are requested.
    async fn index_faces(
        &self,
        collection_id: &str,
        image: &ImageRef,
        external_id: &str,
    ) -> Result<IndexedFaces, FaceIndexError>;

    /// Faces in the collection similar to the largest face in `image`, at
    /// or above `threshold` percent, at most `max_faces` of them.
    async fn search_faces_by_image(
        &self,
        collection_id: &str,
        image: &ImageRef,
        threshold: f64,
        max_faces: u32,
    ) -> Result<Vec<FaceMatch>, FaceIndexError>;
}

/// [`FaceIndex`] backed by the Rekognition API.
pub struct RekognitionClient {
    client: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    endpoint: ServiceEndpoint,
}

impl RekognitionClient {
    pub fn new(
        credentials: AwsCredentials,
        region: impl Into<String>,
        endpoint_url: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let region = region.into();
        let endpoint = ServiceEndpoint::resolve(
            endpoint_url,
            format!("rekognition.{}.amazonaws.com", region),
        )?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            credentials,
            region,
            endpoint,
        })
    }

    /// Send one signed JSON request and return the decoded response body.
    async fn call(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, FaceIndexError> {
        let payload = serde_json::to_vec(&body)
            .map_err(|e| FaceIndexError::InvalidResponse(e.to_string()))?;
        let target = format!("RekognitionService.{}", operation);

        let signed = aws::sign_request(
            &self.credentials,
            &self.region,
            "rekognition",
            UnsignedRequest {
                method: "POST",
                path: "/",
                query: vec![],
                headers: vec![
                    ("host".to_string(), self.endpoint.host.clone()),
                    ("content-type".to_string(), JSON_CONTENT_TYPE.to_string()),
                    ("x-amz-target".to_string(), target),
                ],
                payload: &payload,
            },
            Utc::now(),
        );

        let url = format!("{}/", self.endpoint.base_url);
        let resp = signed
            .apply(self.client.post(&url))
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        let error_type_header = resp
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(parse_error_response(
                status.as_u16(),
                error_type_header.as_deref(),
                &text,
            ));
        }

        if text.trim().is_empty() {
            return Ok(serde_json::Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(|e| FaceIndexError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl FaceIndex for RekognitionClient {
    async fn create_collection(&self, collection_id: &str) -> Result<(), FaceIndexError> {
        let body = serde_json::json!({ "CollectionId": collection_id });
        match self.call("CreateCollection", body).await {
            Ok(_) => Ok(()),
            Err(FaceIndexError::Service { code, .. }) if code == "ResourceAlreadyExistsException" => {
                Err(FaceIndexError::AlreadyExists(collection_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<(), FaceIndexError> {
        let body = serde_json::json!({ "CollectionId": collection_id });
        self.call("DeleteCollection", body).await.map(|_| ())
    }

    async fn index_faces(
        &self,
        collection_id: &str,
        image: &ImageRef,
        external_id: &str,
    ) -> Result<IndexedFaces, FaceIndexError> {
        let body = serde_json::json!({
            "CollectionId": collection_id,
            "Image": image.to_request_json(),
            "ExternalImageId": external_id,
            "DetectionAttributes": ["ALL"],
        });
        let json = self.call("IndexFaces", body).await?;
        parse_index_faces_response(json)
    }

    async fn search_faces_by_image(
        &self,
        collection_id: &str,
        image: &ImageRef,
        threshold: f64,
        max_faces: u32,
    ) -> Result<Vec<FaceMatch>, FaceIndexError> {
        let body = serde_json::json!({
            "CollectionId": collection_id,
            "Image": image.to_request_json(),
            "FaceMatchThreshold": threshold,
            "MaxFaces": max_faces,
        });
        let json = self.call("SearchFacesByImage", body).await?;
        parse_search_faces_response(json)
    }
}

// ============ Response Parsing ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IndexFacesResponse {
    #[serde(default)]
    face_records: Vec<FaceRecord>,
    #[serde(default)]
    unindexed_faces: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FaceRecord {
    face: Option<FaceDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FaceDescription {
    face_id: Option<String>,
    external_image_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchFacesResponse {
    #[serde(default)]
    face_matches: Vec<RawFaceMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFaceMatch {
    similarity: f64,
    face: FaceDescription,
}

fn parse_index_faces_response(json: serde_json::Value) -> Result<IndexedFaces, FaceIndexError> {
    let resp: IndexFacesResponse = serde_json::from_value(json)
        .map_err(|e| FaceIndexError::InvalidResponse(e.to_string()))?;

    Ok(IndexedFaces {
        face_ids: resp
            .face_records
            .into_iter()
            .filter_map(|r| r.face.and_then(|f| f.face_id))
            .collect(),
        unindexed: resp.unindexed_faces.len(),
    })
}

fn parse_search_faces_response(json: serde_json::Value) -> Result<Vec<FaceMatch>, FaceIndexError> {
    let resp: SearchFacesResponse = serde_json::from_value(json)
        .map_err(|e| FaceIndexError::InvalidResponse(e.to_string()))?;

    Ok(resp
        .face_matches
        .into_iter()
        .map(|m| FaceMatch {
            external_id: m.face.external_image_id.unwrap_or_default(),
            face_id: m.face.face_id,
            similarity: m.similarity,
        })
        .collect())
}

/// Map a JSON protocol error to a [`FaceIndexError`].
///
/// The error code comes from `__type` in the body (possibly prefixed with
/// a namespace, `com.amazonaws.rekognition#Code`) or from the
/// `x-amzn-ErrorType` header (possibly suffixed with `:<uri>`).
fn parse_error_response(status: u16, error_type_header: Option<&str>, body: &str) -> FaceIndexError {
    let json: serde_json::Value = serde_json::from_str(body).unwrap_or_default();

    let raw_code = json
        .get("__type")
        .and_then(|v| v.as_str())
        .or(error_type_header)
        .unwrap_or("UnknownError");
    let code = raw_code
        .rsplit('#')
        .next()
        .unwrap_or(raw_code)
        .split(':')
        .next()
        .unwrap_or(raw_code)
        .to_string();

    let message = json
        .get("Message")
        .or_else(|| json.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(500).collect());

    match code.as_str() {
        "ResourceNotFoundException" => FaceIndexError::NotFound(message),
        _ => FaceIndexError::Service {
            status,
            code,
            message,
        },
    }
}
