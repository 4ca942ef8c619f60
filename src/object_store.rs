//! Object listing over Amazon S3.
//!
//! The [`ObjectStore`] trait is the seam the pipeline enumerates images
//! through. [`S3ObjectStore`] implements it with the S3 REST API
//! (`ListObjectsV2`) and SigV4 signing from [`crate::aws`].
//!
//! # Addressing
//!
//! Against AWS, requests use virtual-hosted addressing
//! (`https://<bucket>.s3.<region>.amazonaws.com/`). Path-style addressing
//! (`https://s3.<region>.amazonaws.com/<bucket>`) is used for bucket names
//! containing `.`, which the `*.s3.<region>.amazonaws.com` certificate does
//! not cover, and for a custom endpoint (MinIO, LocalStack):
//! `<endpoint>/<bucket>`.
//!
//! # Pagination
//!
//! Listings larger than one page (1000 keys) are followed through
//! `NextContinuationToken` until the result is no longer truncated.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

use crate::aws::{self, AwsCredentials, ServiceEndpoint, UnsignedRequest};

/// Errors from the object store.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("request to S3 failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("S3 ListObjectsV2 failed (HTTP {status}): {body}")]
    Service { status: u16, body: String },
    #[error("invalid ListObjectsV2 response: {0}")]
    InvalidResponse(String),
    #[error("invalid S3 endpoint: {0}")]
    Endpoint(String),
}

/// A bucket/prefix addressable object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every key under `prefix` in `bucket`, in the order the store returns
    /// them, across all pages. Placeholder keys are not filtered here.
    async fn list_objects(&self, bucket: &str, prefix: &str)
        -> Result<Vec<String>, ObjectStoreError>;
}

/// List image keys under `prefix`, skipping directory placeholders.
///
/// A listing failure is logged and treated as an empty listing so the
/// pipeline keeps going.
pub async fn list_keys(store: &dyn ObjectStore, bucket: &str, prefix: &str) -> Vec<String> {
    match store.list_objects(bucket, prefix).await {
        Ok(keys) => {
            let keys: Vec<String> = keys.into_iter().filter(|k| !k.ends_with('/')).collect();
            if keys.is_empty() {
                tracing::info!(bucket, prefix, "no objects found under prefix");
            } else {
                tracing::debug!(bucket, prefix, count = keys.len(), "listed objects");
            }
            keys
        }
        Err(e) => {
            tracing::warn!(bucket, prefix, error = %e, "failed to list objects");
            Vec::new()
        }
    }
}

/// [`ObjectStore`] backed by the S3 REST API.
pub struct S3ObjectStore {
    client: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    /// Set when a custom endpoint forces path-style addressing.
    custom_endpoint: Option<ServiceEndpoint>,
}

impl S3ObjectStore {
    pub fn new(
        credentials: AwsCredentials,
        region: impl Into<String>,
        endpoint_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ObjectStoreError> {
        let custom_endpoint = endpoint_url
            .as_deref()
            .map(ServiceEndpoint::custom)
            .transpose()
            .map_err(|e| ObjectStoreError::Endpoint(format!("{:#}", e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            credentials,
            region: region.into(),
            custom_endpoint,
        })
    }

    /// Endpoint and canonical path for listing `bucket`.
    fn bucket_location(&self, bucket: &str) -> (ServiceEndpoint, String) {
        match self.custom_endpoint {
            Some(ref endpoint) => (endpoint.clone(), format!("/{}", aws::uri_encode(bucket))),
            None if bucket.contains('.') => (
                ServiceEndpoint::aws(format!("s3.{}.amazonaws.com", self.region)),
                format!("/{}", aws::uri_encode(bucket)),
            ),
            None => (
                ServiceEndpoint::aws(format!("{}.s3.{}.amazonaws.com", bucket, self.region)),
                "/".to_string(),
            ),
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListBucketResult, ObjectStoreError> {
        let (endpoint, path) = self.bucket_location(bucket);

        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix".to_string(), prefix.to_string()));
        }
        if let Some(token) = continuation_token {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let signed = aws::sign_request(
            &self.credentials,
            &self.region,
            "s3",
            UnsignedRequest {
                method: "GET",
                path: &path,
                query,
                headers: vec![
                    ("host".to_string(), endpoint.host.clone()),
                    ("x-amz-content-sha256".to_string(), aws::hex_sha256(b"")),
                ],
                payload: b"",
            },
            Utc::now(),
        );

        let url = format!("{}{}?{}", endpoint.base_url, path, signed.query_string);
        let resp = signed.apply(self.client.get(&url)).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ObjectStoreError::Service {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        parse_list_objects_response(&body)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let page = self
                .list_page(bucket, prefix, continuation_token.as_deref())
                .await?;
            keys.extend(page.contents.into_iter().map(|o| o.key));

            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation_token = Some(token),
                (true, None) => {
                    return Err(ObjectStoreError::InvalidResponse(
                        "truncated listing without NextContinuationToken".to_string(),
                    ))
                }
                (false, _) => break,
            }
        }

        Ok(keys)
    }
}

// ============ XML Parsing ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ObjectEntry>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectEntry {
    key: String,
}

fn parse_list_objects_response(xml: &str) -> Result<ListBucketResult, ObjectStoreError> {
    quick_xml::de::from_str(xml).map_err(|e| ObjectStoreError::InvalidResponse(e.to_string()))
}
