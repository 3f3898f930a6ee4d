//! S3 PutObject over HTTPS.
//!
//! Against AWS the object is written through the regional virtual-hosted
//! endpoint and addressed publicly as `https://{bucket}.s3.amazonaws.com/{key}`.
//! A custom endpoint (MinIO, LocalStack, test servers) is addressed
//! path-style: `{endpoint}/{bucket}/{key}`.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::time::Duration;
use url::Url;

use super::sigv4::{self, Credentials, RequestToSign};
use super::ObjectStore;

const DEFAULT_REGION: &str = "us-east-1";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// S3-compatible endpoint; `None` means AWS.
    pub endpoint: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: DEFAULT_REGION.to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint: None,
        }
    }
}

impl S3Config {
    /// Checks everything an upload needs.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(anyhow!("S3 bucket must be set"));
        }
        if self.region.trim().is_empty() {
            return Err(anyhow!("S3 region must be set"));
        }
        if self.access_key_id.as_deref().unwrap_or("").is_empty() {
            return Err(anyhow!("AWS_ACCESS_KEY_ID must be set"));
        }
        if self.secret_access_key.as_deref().unwrap_or("").is_empty() {
            return Err(anyhow!("AWS_SECRET_ACCESS_KEY must be set"));
        }
        Ok(())
    }
}

enum Endpoint {
    Aws,
    Custom(Url),
}

struct ObjectTarget {
    url: String,
    host: String,
    canonical_uri: String,
}

pub struct S3ObjectStore {
    bucket: String,
    region: String,
    credentials: Credentials,
    endpoint: Endpoint,
    agent: ureq::Agent,
}

impl S3ObjectStore {
    pub fn new(config: S3Config) -> Result<Self> {
        config.validate()?;
        let endpoint = match config.endpoint.as_deref().map(str::trim) {
            None | Some("") => Endpoint::Aws,
            Some(raw) => {
                let url = Url::parse(raw).with_context(|| format!("parse S3 endpoint {}", raw))?;
                if url.host_str().is_none() {
                    return Err(anyhow!("S3 endpoint '{}' has no host", raw));
                }
                Endpoint::Custom(url)
            }
        };
        Ok(Self {
            bucket: config.bucket,
            region: config.region,
            credentials: Credentials {
                access_key_id: config.access_key_id.unwrap_or_default(),
                secret_access_key: config.secret_access_key.unwrap_or_default(),
            },
            endpoint,
            agent: ureq::AgentBuilder::new().timeout(UPLOAD_TIMEOUT).build(),
        })
    }

    fn target(&self, key: &str) -> Result<ObjectTarget> {
        let encoded_key = sigv4::uri_encode_path(key.trim_start_matches('/'));
        match &self.endpoint {
            Endpoint::Aws => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{}", encoded_key);
                Ok(ObjectTarget {
                    url: format!("https://{}{}", host, canonical_uri),
                    host,
                    canonical_uri,
                })
            }
            Endpoint::Custom(base) => {
                let host_name = base
                    .host_str()
                    .ok_or_else(|| anyhow!("S3 endpoint has no host"))?;
                let host = match base.port() {
                    Some(port) => format!("{}:{}", host_name, port),
                    None => host_name.to_string(),
                };
                let prefix = base.path().trim_end_matches('/');
                let canonical_uri = format!(
                    "{}/{}/{}",
                    prefix,
                    sigv4::uri_encode_path(&self.bucket),
                    encoded_key
                );
                Ok(ObjectTarget {
                    url: format!("{}://{}{}", base.scheme(), host, canonical_uri),
                    host,
                    canonical_uri,
                })
            }
        }
    }

    /// URL handed to consumers of the uploaded object.
    pub fn public_url(&self, key: &str) -> Result<String> {
        match &self.endpoint {
            Endpoint::Aws => Ok(format!(
                "https://{}.s3.amazonaws.com/{}",
                self.bucket,
                sigv4::uri_encode_path(key.trim_start_matches('/'))
            )),
            Endpoint::Custom(_) => Ok(self.target(key)?.url),
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn put(&mut self, key: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let target = self.target(key)?;
        let signed = sigv4::sign(
            &RequestToSign {
                method: "PUT",
                host: &target.host,
                canonical_uri: &target.canonical_uri,
                payload: bytes,
                region: &self.region,
                service: "s3",
            },
            &self.credentials,
            Utc::now(),
        )?;

        let result = self
            .agent
            .put(&target.url)
            .set("Content-Type", content_type)
            .set("x-amz-date", &signed.amz_date)
            .set("x-amz-content-sha256", &signed.payload_hash)
            .set("Authorization", &signed.authorization)
            .send_bytes(bytes);
        match result {
            Ok(_) => {}
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(anyhow!(
                    "S3 put of {} returned HTTP {}: {}",
                    key,
                    code,
                    body.trim()
                ));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err).context(format!("S3 put of {}", key)));
            }
        }

        log::debug!("uploaded {} bytes to {}", bytes.len(), target.url);
        self.public_url(key)
    }
}
