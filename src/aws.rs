//! AWS credentials, endpoints, and Signature Version 4 request signing.
//!
//! Both remote clients ([`S3ObjectStore`](crate::object_store::S3ObjectStore)
//! and [`RekognitionClient`](crate::face_index::RekognitionClient)) talk to
//! AWS over plain HTTPS with `reqwest`. Every request is signed here using
//! [AWS Signature Version 4](https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv.html),
//! implemented with the pure-Rust `hmac` + `sha2` crates.
//!
//! # Credentials
//!
//! Credentials are resolved once per process with `aws-config`'s default
//! provider chain, in this order:
//!
//! 1. `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (+ `AWS_SESSION_TOKEN`)
//! 2. `~/.aws/credentials` and `~/.aws/config`, profile from `aws.profile`,
//!    then `AWS_PROFILE`, then `default` (includes SSO and `credential_process`)
//! 3. Web identity tokens, then container and EC2 instance roles
//!
//! Only the signing is done here; the resolved keys feed [`sign_request`].

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

// ============ Credentials ============

/// AWS credentials used to sign requests.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Resolve credentials through the default AWS provider chain.
    ///
    /// `profile` selects a named profile from the shared files; without it
    /// `AWS_PROFILE` (or `default`) applies.
    pub async fn load(profile: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(name) = profile {
            loader = loader.profile_name(name);
        }
        let sdk_config = loader.load().await;

        let provider = sdk_config
            .credentials_provider()
            .context("No AWS credentials provider available")?;
        let resolved = provider.provide_credentials().await.context(
            "No AWS credentials found: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY, \
             or configure a profile in ~/.aws/credentials",
        )?;

        let credentials = Self::new(
            resolved.access_key_id(),
            resolved.secret_access_key(),
            resolved.session_token().map(str::to_string),
        );
        tracing::debug!(
            access_key_id = credentials.access_key_id(),
            temporary = credentials.session_token.is_some(),
            "resolved AWS credentials"
        );
        Ok(credentials)
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============ Endpoints ============

/// Where requests for one AWS service are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Scheme and authority, without a trailing slash (e.g. `https://rekognition.us-east-2.amazonaws.com`).
    pub base_url: String,
    /// Value of the signed `host` header (includes a non-default port).
    pub host: String,
}

impl ServiceEndpoint {
    /// The public AWS endpoint for `host`, over HTTPS.
    pub fn aws(host: String) -> Self {
        Self {
            base_url: format!("https://{}", host),
            host,
        }
    }

    /// An explicit endpoint URL such as `http://localhost:4566`.
    pub fn custom(url: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .with_context(|| format!("Invalid endpoint URL: '{}'", url))?;
        let host_name = parsed
            .host_str()
            .with_context(|| format!("Endpoint URL has no host: '{}'", url))?;
        let host = match parsed.port() {
            Some(port) => format!("{}:{}", host_name, port),
            None => host_name.to_string(),
        };

        Ok(Self {
            base_url: format!("{}://{}", parsed.scheme(), host),
            host,
        })
    }

    /// Resolve an optional override, falling back to the AWS host.
    pub fn resolve(custom: Option<&str>, aws_host: String) -> Result<Self> {
        match custom {
            Some(url) => Self::custom(url),
            None => Ok(Self::aws(aws_host)),
        }
    }
}

// ============ Signing ============

/// A request described in canonical form, ready to be signed.
pub struct UnsignedRequest<'a> {
    pub method: &'a str,
    /// URI-encoded absolute path (e.g. `/` or `/my-bucket`).
    pub path: &'a str,
    pub query: Vec<(String, String)>,
    /// Headers to sign. Must include `host`.
    pub headers: Vec<(String, String)>,
    pub payload: &'a [u8],
}

/// Output of [`sign_request`]: the canonical query string and every header
/// the request must carry, including `authorization`.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub query_string: String,
    pub headers: Vec<(String, String)>,
}

impl SignedRequest {
    /// Attach the signed headers to a `reqwest` builder.
    ///
    /// `host` is skipped: reqwest derives it from the URL, and it is the
    /// same value that was signed.
    pub fn apply(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Sign a request for `service` in `region` at time `now`.
///
/// Adds `x-amz-date` (and `x-amz-security-token` for temporary
/// credentials) to the signed header set, then computes the
/// `authorization` header.
pub fn sign_request(
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
    request: UnsignedRequest<'_>,
    now: DateTime<Utc>,
) -> SignedRequest {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers: Vec<(String, String)> = request
        .headers
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
        .collect();
    headers.push(("x-amz-date".to_string(), amz_date.clone()));
    if let Some(ref token) = credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let query_string = canonical_query_string(&request.query);

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.path,
        query_string,
        canonical_headers,
        signed_headers,
        hex_sha256(request.payload)
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key =
        derive_signing_key(&credentials.secret_access_key, &date_stamp, region, service);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    );
    headers.push(("authorization".to_string(), authorization));

    SignedRequest {
        query_string,
        headers,
    }
}

/// Sorted, URI-encoded `key=value` pairs joined by `&`.
fn canonical_query_string(query: &[(String, String)]) -> String {
    let mut sorted: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the hex-encoded SHA-256 hash of data.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~`.
pub fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
