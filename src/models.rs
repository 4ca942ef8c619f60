//! Core data models that flow through the matching pipeline.

use serde::Serialize;

/// Reference to an image stored in S3, submitted to Rekognition by
/// bucket and key rather than as uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub bucket: String,
    pub key: String,
}

impl ImageRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// The `Image` member of a Rekognition request body.
    pub fn to_request_json(&self) -> serde_json::Value {
        serde_json::json!({
            "S3Object": {
                "Bucket": self.bucket,
                "Name": self.key,
            }
        })
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// A reference portrait registered in the face collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Label stored with the face: the last path segment of `source_key`.
    pub external_id: String,
    pub source_key: String,
}

impl IdentityRecord {
    pub fn from_key(key: &str) -> Self {
        Self {
            external_id: external_id_for(key).to_string(),
            source_key: key.to_string(),
        }
    }
}

/// Derive the external id for a storage key: everything after the last `/`.
///
/// `base_football/player_12.jpg` becomes `player_12.jpg`; a key without a
/// separator is returned unchanged.
pub fn external_id_for(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// One candidate returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    /// External id of the matched face (empty if it was indexed without one).
    pub external_id: String,
    pub face_id: Option<String>,
    /// Similarity percentage, 0-100.
    pub similarity: f64,
}

/// One row of the report: a query image matched to a known identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    #[serde(rename = "Base Image")]
    pub base_image: String,
    #[serde(rename = "Game Time Image")]
    pub game_time_image: String,
    #[serde(rename = "Confidence")]
    pub confidence: f64,
}

impl MatchRecord {
    pub fn new(face_match: &FaceMatch, game_time_key: &str) -> Self {
        Self {
            base_image: face_match.external_id.clone(),
            game_time_image: game_time_key.to_string(),
            confidence: face_match.similarity,
        }
    }
}
