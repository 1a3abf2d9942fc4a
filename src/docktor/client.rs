//! HTTP client for the Docktor API.
//!
//! Logs in through `POST /api/auth/login?ldap=<bool>` and reads groups through
//! `GET /api/groups/<id>` with the returned bearer token.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use url::Url;

use super::{DocktorConfig, DocktorGroup, WorkloadInspector};
use crate::error::DocktorError;

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct DocktorClient {
    client: reqwest::Client,
    config: DocktorConfig,
    token: Mutex<Option<CachedToken>>,
}

impl DocktorClient {
    pub fn new(config: DocktorConfig) -> Result<Self, DocktorError> {
        config.validate()?;
        Url::parse(&config.address).map_err(|e| {
            DocktorError::Configuration(format!("Docktor address {} is invalid: {}", config.address, e))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocktorError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DocktorError> {
        let mut url = Url::parse(&self.config.address)
            .map_err(|e| DocktorError::Configuration(e.to_string()))?;
        url.set_path(path);
        url.set_query(None);
        Ok(url)
    }

    /// Log in and return a fresh bearer token.
    pub async fn authenticate(&self) -> Result<String, DocktorError> {
        if self.config.user.is_empty() || self.config.password.is_empty() {
            return Err(DocktorError::auth("Docktor username or password is empty"));
        }

        let mut url = self.endpoint("/api/auth/login")?;
        url.set_query(Some(&format!("ldap={}", self.config.ldap)));

        log::debug!(
            "Authenticating to Docktor at {} as {} (ldap={})",
            self.config.address,
            self.config.user,
            self.config.ldap
        );

        let body = serde_json::json!({
            "username": self.config.user,
            "password": self.config.password,
        });
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocktorError::from_transport(e, true))?;

        let status = resp.status();
        if !status.is_success() {
            let message = format!("server did not return OK: {}", status);
            return Err(if status.is_server_error() {
                DocktorError::Authentication {
                    message,
                    transport: true,
                }
            } else {
                DocktorError::auth(message)
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| DocktorError::from_transport(e, true))?;
        let token: String = serde_json::from_slice(&bytes)
            .map_err(|e| DocktorError::auth(format!("token is not a JSON string: {}", e)))?;
        if token.is_empty() {
            return Err(DocktorError::auth("Docktor returned an empty token"));
        }

        log::debug!("Docktor authentication successful");
        Ok(token)
    }

    /// Cached token if still valid, else a fresh login. The flag tells
    /// whether the token came from the cache.
    async fn token(&self) -> Result<(String, bool), DocktorError> {
        if self.config.token_ttl_secs > 0 {
            if let Some(cached) = self.token.lock().as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok((cached.value.clone(), true));
                }
            }
        }

        let value = self.authenticate().await?;
        if self.config.token_ttl_secs > 0 {
            *self.token.lock() = Some(CachedToken {
                value: value.clone(),
                expires_at: Instant::now() + Duration::from_secs(self.config.token_ttl_secs),
            });
        }
        Ok((value, false))
    }

    async fn get_group(&self, group_id: &str, token: &str) -> Result<reqwest::Response, DocktorError> {
        let url = self.endpoint(&format!("/api/groups/{}", group_id))?;
        log::debug!("Getting group {} from Docktor", group_id);
        self.client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| DocktorError::from_transport(e, false))
    }
}

#[async_trait]
impl WorkloadInspector for DocktorClient {
    fn resolve_group_id(&self, url: &str) -> Result<String, DocktorError> {
        resolve_group_id(url)
    }

    async fn fetch_group(&self, group_id: &str) -> Result<DocktorGroup, DocktorError> {
        let (token, from_cache) = self.token().await?;
        let mut resp = self.get_group(group_id, &token).await?;

        if resp.status() == StatusCode::UNAUTHORIZED && from_cache {
            log::info!("Cached Docktor token rejected, logging in again");
            self.token.lock().take();
            let (fresh, _) = self.token().await?;
            resp = self.get_group(group_id, &fresh).await?;
        }

        let status = resp.status();
        if !status.is_success() {
            let message = format!("server did not return OK for group {}: {}", group_id, status);
            return Err(if status.is_server_error() {
                DocktorError::Fetch {
                    message,
                    transport: true,
                }
            } else {
                DocktorError::fetch(message)
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| DocktorError::from_transport(e, false))?;
        let group: DocktorGroup = serde_json::from_slice(&bytes).map_err(|e| {
            DocktorError::fetch(format!("malformed group {} JSON: {}", group_id, e))
        })?;

        log::debug!(
            "Fetched Docktor group {} ({}) with {} containers",
            group.id,
            group.name,
            group.containers.len()
        );
        Ok(group)
    }
}

/// Extract the group id from `https://<docktor>/groups/<id>` (or `/api/groups/<id>`).
///
/// Hash-routed UI links (`https://<docktor>/#!/groups/<id>`) are accepted too:
/// the fragment is read as the rest of the path, minus any query.
pub fn resolve_group_id(group_url: &str) -> Result<String, DocktorError> {
    let url = Url::parse(group_url.trim()).map_err(|_| {
        DocktorError::Parse(format!(
            "expected 'https://<docktor>/groups/<id>', got '{}'",
            group_url
        ))
    })?;
    let route = match url.fragment() {
        Some(fragment) => fragment.split('?').next().unwrap_or_default(),
        None => url.path(),
    };
    let id = route.rsplit('/').next().unwrap_or_default();
    if id.is_empty() {
        return Err(DocktorError::Parse(format!(
            "no group id at the end of '{}'",
            group_url
        )));
    }
    Ok(id.to_string())
}
