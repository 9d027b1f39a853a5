//! Remote fetch primitive for the dialog workbook.
//!
//! Issues `GET <base_url>/<path>?t=<epoch-ms>`. The `t` parameter is a
//! cache-buster so intermediary caches cannot serve a stale byte stream.
//! Any non-2xx status is a failure.
//!
//! Public buckets need nothing else. For private buckets, set
//! `[dataset.signing]` and the request is signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using credentials from the environment:
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::config::{DatasetConfig, SigningConfig};
use crate::ingest::IngestError;
use crate::staleness::Clock;

/// Produces the raw workbook bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, IngestError>;
}

/// HTTP fetcher for the configured dataset location.
pub struct HttpFetcher {
    client: reqwest::Client,
    url: String,
    clock: Arc<dyn Clock>,
    signer: Option<Signer>,
}

impl HttpFetcher {
    pub fn new(base_url: &str, path: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: join_url(base_url, path),
            clock,
            signer: None,
        }
    }

    /// Build from configuration, loading signing credentials when configured.
    pub fn from_config(config: &DatasetConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut fetcher = Self::new(&config.base_url, &config.path, clock);
        if let Some(ref signing) = config.signing {
            fetcher.signer = Some(Signer::new(AwsCredentials::from_env()?, signing));
        }
        Ok(fetcher)
    }

    /// Resource URL without the cache-busting parameter.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_url(&self, now_ms: i64) -> String {
        format!("{}?t={}", self.url, now_ms)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, IngestError> {
        let now_ms = self.clock.now_millis();
        let url = self.request_url(now_ms);
        debug!(url = %url, "fetching dialog workbook");

        let mut req = self.client.get(&url);
        if let Some(ref signer) = self.signer {
            let headers = signer
                .sign_get(&self.url, &[("t", now_ms.to_string())], Utc::now())
                .map_err(|e| IngestError::Transport(e.to_string()))?;
            for (name, value) in headers {
                req = req.header(name, value);
            }
        }

        let resp = req
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ============ AWS SigV4 ============

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

struct Signer {
    creds: AwsCredentials,
    region: String,
    service: String,
}

impl Signer {
    fn new(creds: AwsCredentials, config: &SigningConfig) -> Self {
        Self {
            creds,
            region: config.region.clone(),
            service: config.service.clone(),
        }
    }

    /// Headers that authorize a bodiless GET of `url` with `query`.
    fn sign_get(
        &self,
        url: &str,
        query: &[(&str, String)],
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid url: {}", url))?;
        let host = match parsed.port() {
            Some(port) => format!("{}:{}", parsed.host_str().unwrap_or_default(), port),
            None => parsed.host_str().unwrap_or_default().to_string(),
        };
        let canonical_uri = canonical_path(parsed.path());

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (uri_encode(k), uri_encode(v)))
            .collect();
        sorted.sort();
        let canonical_querystring = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort();

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            &self.service,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        // `host` is set by the HTTP client itself.
        let mut out: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        out.push(("authorization".to_string(), authorization));
        Ok(out)
    }
}

/// Re-encode each path segment per SigV4 rules.
fn canonical_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|seg| uri_encode(&percent_decode(seg)))
        .collect::<Vec<_>>()
        .join("/")
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex_pair = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex_pair.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

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

/// RFC 3986 encoding of everything but `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
