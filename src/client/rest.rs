//! OceanStor REST Client
//!
//! `ArrayClient` adapter over the array's `deviceManager/rest` JSON API.
//! Login walks the configured endpoints in order; the endpoint that accepts
//! the login serves every later call of this session.

use crate::config::BackendConfig;
use crate::domain::context::RequestContext;
use crate::domain::ports::{ArrayClient, ClientFactory};
use crate::domain::types::{LicenseFeatureSet, Pool, SystemInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const TOKEN_HEADER: &str = "iBaseToken";

// =============================================================================
// Configuration
// =============================================================================

/// Transport options for the REST client
#[derive(Debug, Clone)]
pub struct RestClientOptions {
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Accept self-signed array certificates
    pub accept_invalid_certs: bool,
}

impl Default for RestClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            accept_invalid_certs: false,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    scope: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vstorename: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    deviceid: String,
    #[serde(rename = "iBaseToken")]
    token: String,
}

/// Authenticated session state
#[derive(Debug, Clone)]
struct RestSession {
    endpoint: String,
    device_id: String,
    token: String,
}

impl RestSession {
    fn url(&self, path: &str) -> String {
        format!("{}/{}{}", self.endpoint, self.device_id, path)
    }
}

// =============================================================================
// REST Client
// =============================================================================

/// Client for one array session
pub struct RestClient {
    urls: Vec<String>,
    user: String,
    password: String,
    vstore_name: Option<String>,
    http: Client,
    session: RwLock<Option<RestSession>>,
}

impl RestClient {
    /// Create an unauthenticated client
    pub fn new(config: &BackendConfig, options: &RestClientOptions) -> Result<Self> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(options.accept_invalid_certs)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            urls: config
                .urls
                .iter()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .collect(),
            user: config.user.clone(),
            password: config.password.clone(),
            vstore_name: config.vstore_name.clone(),
            http,
            session: RwLock::new(None),
        })
    }

    fn current(&self, operation: &str) -> Result<RestSession> {
        self.session
            .read()
            .clone()
            .ok_or_else(|| Error::query(operation, "not logged in"))
    }

    /// Issue a GET and return the `data` member
    async fn get_data<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let session = self.current(operation)?;
        let url = session.url(path);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, &session.token)
            .send()
            .await
            .map_err(|e| Error::query(operation, e))?;

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::query(operation, format!("malformed response: {}", e)))?;

        if envelope.error.code != 0 {
            return Err(Error::query(
                operation,
                format!(
                    "array error {}: {}",
                    envelope.error.code, envelope.error.description
                ),
            ));
        }

        serde_json::from_value(envelope.data)
            .map_err(|e| Error::query(operation, format!("unexpected data: {}", e)))
    }

    /// Attempt a login against one endpoint.
    ///
    /// Transport failures are `Ok(Err(..))` so the caller can fail over;
    /// a rejection by the array is a hard error.
    async fn login_endpoint(
        &self,
        endpoint: &str,
    ) -> Result<std::result::Result<RestSession, reqwest::Error>> {
        let body = LoginRequest {
            username: &self.user,
            password: &self.password,
            scope: "0",
            vstorename: self.vstore_name.as_deref(),
        };

        let response = match self
            .http
            .post(format!("{}/xxxxx/sessions", endpoint))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Ok(Err(e)),
        };

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::auth(endpoint, format!("malformed login response: {}", e)))?;

        if envelope.error.code != 0 {
            return Err(Error::auth(
                endpoint,
                format!(
                    "array error {}: {}",
                    envelope.error.code, envelope.error.description
                ),
            ));
        }

        let data: LoginData = serde_json::from_value(envelope.data)
            .map_err(|e| Error::auth(endpoint, format!("malformed login data: {}", e)))?;

        Ok(Ok(RestSession {
            endpoint: endpoint.to_string(),
            device_id: data.deviceid,
            token: data.token,
        }))
    }
}

#[async_trait]
impl ArrayClient for RestClient {
    #[instrument(skip(self, ctx), fields(user = %self.user))]
    async fn login(&self, ctx: &RequestContext) -> Result<()> {
        let mut last_error = String::from("no endpoints configured");

        for endpoint in &self.urls {
            if ctx.is_cancelled() {
                return Err(Error::auth(endpoint.as_str(), "request cancelled"));
            }

            match self.login_endpoint(endpoint).await? {
                Ok(session) => {
                    info!("Logged in to {} (device {})", endpoint, session.device_id);
                    *self.session.write() = Some(session);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Endpoint {} unreachable: {}", endpoint, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::auth(self.urls.join(","), last_error))
    }

    async fn logout(&self, _ctx: &RequestContext) -> Result<()> {
        let taken = self.session.write().take();
        let Some(session) = taken else {
            return Ok(());
        };

        self.http
            .delete(session.url("/sessions"))
            .header(TOKEN_HEADER, &session.token)
            .send()
            .await
            .map_err(|e| Error::auth(session.endpoint.as_str(), format!("logout failed: {}", e)))?;

        debug!("Logged out of {}", session.endpoint);
        Ok(())
    }

    async fn get_system(&self, _ctx: &RequestContext) -> Result<SystemInfo> {
        self.get_data("GetSystem", "/system/").await
    }

    async fn get_license_feature(&self, _ctx: &RequestContext) -> Result<LicenseFeatureSet> {
        let entries: Option<Vec<BTreeMap<String, serde_json::Value>>> =
            self.get_data("GetLicenseFeature", "/SUPPORT_LICENSE").await?;

        let mut features = LicenseFeatureSet::new();
        for entry in entries.unwrap_or_default() {
            for (name, status) in entry {
                features.insert_status(name, &status);
            }
        }
        Ok(features)
    }

    async fn get_all_pools(&self, _ctx: &RequestContext) -> Result<BTreeMap<String, Pool>> {
        let raw: Option<Vec<serde_json::Value>> =
            self.get_data("GetAllPools", "/storagepool").await?;

        let mut pools = BTreeMap::new();
        for value in raw.unwrap_or_default() {
            match serde_json::from_value::<Pool>(value) {
                Ok(pool) => {
                    pools.insert(pool.name.clone(), pool);
                }
                Err(e) => warn!("Ignoring malformed pool entry: {}", e),
            }
        }
        Ok(pools)
    }

    fn endpoint(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.endpoint.clone())
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates `RestClient` sessions sharing the same transport options
#[derive(Debug, Clone, Default)]
pub struct RestClientFactory {
    options: RestClientOptions,
}

impl RestClientFactory {
    pub fn new(options: RestClientOptions) -> Self {
        Self { options }
    }
}

impl ClientFactory for RestClientFactory {
    fn create(&self, config: &BackendConfig) -> Result<Arc<dyn ArrayClient>> {
        Ok(Arc::new(RestClient::new(config, &self.options)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config(urls: &[&str]) -> BackendConfig {
        BackendConfig::new(urls.iter().map(|u| u.to_string()).collect(), "admin", "secret")
    }

    #[test]
    fn test_urls_normalized() {
        let client = RestClient::new(
            &config(&["https://array:8088/deviceManager/rest/"]),
            &RestClientOptions::default(),
        )
        .unwrap();
        assert_eq!(client.urls, vec!["https://array:8088/deviceManager/rest"]);
        assert_eq!(client.endpoint(), None);
    }

    #[test]
    fn test_session_url() {
        let session = RestSession {
            endpoint: "https://array:8088/deviceManager/rest".into(),
            device_id: "2102351".into(),
            token: "t".into(),
        };
        assert_eq!(
            session.url("/storagepool"),
            "https://array:8088/deviceManager/rest/2102351/storagepool"
        );
    }

    #[test]
    fn test_login_body() {
        let body = LoginRequest {
            username: "admin",
            password: "secret",
            scope: "0",
            vstorename: Some("tenant-a"),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["vstorename"], "tenant-a");
        assert_eq!(json["scope"], "0");
    }

    #[test]
    fn test_envelope_parsing() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"data":{"deviceid":"1","iBaseToken":"abc"},"error":{"code":0,"description":"0"}}"#,
        )
        .unwrap();
        let login: LoginData = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(login.token, "abc");

        let envelope: Envelope =
            serde_json::from_str(r#"{"error":{"code":1077949061,"description":"bad user"}}"#)
                .unwrap();
        assert_eq!(envelope.error.code, 1077949061);
        assert!(envelope.data.is_null());
    }

    #[tokio::test]
    async fn test_queries_require_login() {
        let client =
            RestClient::new(&config(&["https://array:8088"]), &RestClientOptions::default())
                .unwrap();
        let err = client.get_system(&RequestContext::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);

        // Logging out an unauthenticated client is a no-op
        client.logout(&RequestContext::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_unreachable_endpoints() {
        let client = RestClient::new(
            &config(&["http://127.0.0.1:1", "http://127.0.0.1:2"]),
            &RestClientOptions {
                request_timeout: Duration::from_secs(2),
                accept_invalid_certs: false,
            },
        )
        .unwrap();
        let err = client.login(&RequestContext::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }
}
