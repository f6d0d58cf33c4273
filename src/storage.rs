//! Object storage over the S3 REST API.
//!
//! Requests are signed with AWS Signature Version 4 using `hmac` + `sha2`.
//! Listing follows `ListObjectsV2` continuation tokens. When
//! `storage.endpoint_url` is set (MinIO, LocalStack) requests use path-style
//! addressing against that endpoint, keeping its scheme; otherwise the
//! virtual-hosted `<bucket>.s3.<region>.amazonaws.com` form is used.
//!
//! ```toml
//! [storage]
//! bucket = "mafood-data"
//! region = "us-east-2"
//! # endpoint_url = "http://localhost:9000"
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::{Secrets, StorageConfig};

type HmacSha256 = Hmac<Sha256>;

/// Blob storage used by the pipelines.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix` matching any of `include_globs` (all keys when
    /// empty), sorted. Globs match the key relative to the prefix.
    async fn list_keys(&self, prefix: &str, include_globs: &[String]) -> Result<Vec<String>>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
}

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

pub struct S3Client {
    client: reqwest::Client,
    bucket: String,
    region: String,
    /// `(scheme, host)` of a custom endpoint.
    endpoint: Option<(String, String)>,
    creds: AwsCredentials,
}

impl S3Client {
    pub fn new(config: &StorageConfig, secrets: &Secrets) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("storage.bucket must be set")?;
        let creds = AwsCredentials {
            access_key_id: Secrets::get(&secrets.aws_access_key_id, "AWS_ACCESS_KEY_ID")?,
            secret_access_key: Secrets::get(
                &secrets.aws_secret_access_key,
                "AWS_SECRET_ACCESS_KEY",
            )?,
            session_token: secrets.aws_session_token.clone(),
        };
        let endpoint = config.endpoint_url.as_deref().map(split_endpoint);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            bucket,
            region: config.region.clone(),
            endpoint,
            creds,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn host(&self) -> String {
        match &self.endpoint {
            Some((_, host)) => host.clone(),
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    /// Canonical URI path for `key` (empty key addresses the bucket).
    fn canonical_uri(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint {
            Some(_) if key.is_empty() => format!("/{}/", self.bucket),
            Some(_) => format!("/{}/{}", self.bucket, encoded_key),
            None => format!("/{}", encoded_key),
        }
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let host = self.host();
        let scheme = self
            .endpoint
            .as_ref()
            .map(|(s, _)| s.as_str())
            .unwrap_or("https");
        let canonical_uri = self.canonical_uri(key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_params = query.to_vec();
        sorted_params.sort();
        let canonical_querystring: String = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(&body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

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
            method.as_str(),
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        Ok(req.send().await?)
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_keys(&self, prefix: &str, include_globs: &[String]) -> Result<Vec<String>> {
        let include_set = build_globset(include_globs)?;
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self
                .send_signed(reqwest::Method::GET, "", &query, Vec::new(), None)
                .await
                .with_context(|| format!("Failed to list s3://{}/{}", self.bucket, prefix))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body);
            for key in batch {
                let rel_key = key
                    .strip_prefix(prefix)
                    .map(|s| s.trim_start_matches('/'))
                    .unwrap_or(&key);
                if include_globs.is_empty() || include_set.is_match(rel_key) {
                    keys.push(key.clone());
                }
            }

            if is_truncated && next_token.is_some() {
                continuation_token = next_token;
            } else {
                break;
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .send_signed(reqwest::Method::GET, key, &[], Vec::new(), None)
            .await
            .with_context(|| format!("Failed to get s3://{}/{}", self.bucket, key))?;

        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let size = body.len();
        let resp = self
            .send_signed(reqwest::Method::PUT, key, &[], body, Some(content_type))
            .await
            .with_context(|| format!("Failed to put s3://{}/{}", self.bucket, key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("S3 PutObject failed (HTTP {}) for key '{}': {}", status, key, text);
        }
        tracing::debug!(key, size, "uploaded object");
        Ok(())
    }
}

fn split_endpoint(endpoint: &str) -> (String, String) {
    let trimmed = endpoint.trim_end_matches('/');
    match trimmed.split_once("://") {
        Some((scheme, host)) => (scheme.to_string(), host.to_string()),
        None => ("https".to_string(), trimmed.to_string()),
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

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

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
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

// ============ XML Parsing ============

/// Keys, truncation flag and continuation token of a `ListObjectsV2` page.
/// Folder placeholder keys (ending in `/`) are skipped.
fn parse_list_objects_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let mut keys = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            let key = unescape_xml(&key);
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key);
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    (keys, is_truncated, next_token)
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
