//! In-Memory Array
//!
//! `ArrayClient` adapter backed by shared in-process state. Used by tests and
//! benches in place of a real array.

use crate::config::BackendConfig;
use crate::domain::context::RequestContext;
use crate::domain::ports::{ArrayClient, ClientFactory};
use crate::domain::types::{LicenseFeatureSet, Pool, SystemInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    system: SystemInfo,
    features: LicenseFeatureSet,
    pools: BTreeMap<String, Pool>,
    reachable_urls: Option<Vec<String>>,
    password: Option<String>,
    fail_queries: bool,
    latency: Option<Duration>,
    /// Tokens issued before the current epoch are rejected
    token_epoch: u64,
    logins: usize,
    logouts: usize,
    active_sessions: usize,
}

/// Simulated array shared by every client it creates
#[derive(Debug, Clone, Default)]
pub struct MockArray {
    state: Arc<Mutex<MockState>>,
}

impl MockArray {
    /// Array reporting the given product version and mode
    pub fn new(product_version: &str, product_mode: &str) -> Self {
        let array = Self::default();
        array.state.lock().system = SystemInfo::new(product_version, product_mode);
        array
    }

    pub fn with_feature(self, feature: &str, enabled: bool) -> Self {
        self.state.lock().features.insert(feature, enabled);
        self
    }

    pub fn with_pool(self, pool: Pool) -> Self {
        self.state.lock().pools.insert(pool.name.clone(), pool);
        self
    }

    /// Only accept this password
    pub fn with_password(self, password: &str) -> Self {
        self.state.lock().password = Some(password.to_string());
        self
    }

    /// Only these endpoints answer; the rest behave as unreachable
    pub fn with_reachable_urls(self, urls: &[&str]) -> Self {
        self.state.lock().reachable_urls = Some(urls.iter().map(|u| u.to_string()).collect());
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = Some(latency);
        self
    }

    pub fn set_system(&self, system: SystemInfo) {
        self.state.lock().system = system;
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.state.lock().fail_queries = fail;
    }

    /// Invalidate every token issued so far, as an array-side session timeout would
    pub fn expire_tokens(&self) {
        self.state.lock().token_epoch += 1;
    }

    pub fn logins(&self) -> usize {
        self.state.lock().logins
    }

    pub fn logouts(&self) -> usize {
        self.state.lock().logouts
    }

    /// Sessions logged in and not yet logged out
    pub fn active_sessions(&self) -> usize {
        self.state.lock().active_sessions
    }

    /// Factory handing out clients bound to this array
    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(self.clone())
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_query(&self, operation: &str) -> Result<()> {
        if self.state.lock().fail_queries {
            return Err(Error::query(operation, "injected failure"));
        }
        Ok(())
    }
}

impl ClientFactory for MockArray {
    fn create(&self, config: &BackendConfig) -> Result<Arc<dyn ArrayClient>> {
        Ok(Arc::new(MockArrayClient {
            array: self.clone(),
            urls: config.urls.clone(),
            password: config.password.clone(),
            endpoint: Mutex::new(None),
            logged_in: AtomicBool::new(false),
            token_epoch: AtomicU64::new(0),
        }))
    }
}

/// One session against a `MockArray`
#[derive(Debug)]
pub struct MockArrayClient {
    array: MockArray,
    urls: Vec<String>,
    password: String,
    endpoint: Mutex<Option<String>>,
    logged_in: AtomicBool,
    token_epoch: AtomicU64,
}

impl MockArrayClient {
    fn require_login(&self, operation: &str) -> Result<()> {
        if !self.logged_in.load(Ordering::Acquire) {
            return Err(Error::query(operation, "not logged in"));
        }
        if self.token_epoch.load(Ordering::Acquire) != self.array.state.lock().token_epoch {
            return Err(Error::query(operation, "token expired"));
        }
        self.array.check_query(operation)
    }
}

#[async_trait]
impl ArrayClient for MockArrayClient {
    async fn login(&self, _ctx: &RequestContext) -> Result<()> {
        self.array.delay().await;

        let mut state = self.array.state.lock();
        let endpoint = self
            .urls
            .iter()
            .find(|url| {
                state
                    .reachable_urls
                    .as_ref()
                    .map_or(true, |reachable| reachable.contains(*url))
            })
            .cloned()
            .ok_or_else(|| Error::auth(self.urls.join(","), "no endpoint reachable"))?;

        if state.password.as_deref().is_some_and(|p| p != self.password) {
            return Err(Error::auth(endpoint, "invalid username or password"));
        }

        if !self.logged_in.swap(true, Ordering::AcqRel) {
            state.active_sessions += 1;
        }
        state.logins += 1;
        self.token_epoch.store(state.token_epoch, Ordering::Release);
        *self.endpoint.lock() = Some(endpoint);
        Ok(())
    }

    async fn logout(&self, _ctx: &RequestContext) -> Result<()> {
        if self.logged_in.swap(false, Ordering::AcqRel) {
            let mut state = self.array.state.lock();
            state.active_sessions -= 1;
            state.logouts += 1;
        }
        *self.endpoint.lock() = None;
        Ok(())
    }

    async fn get_system(&self, _ctx: &RequestContext) -> Result<SystemInfo> {
        self.array.delay().await;
        self.require_login("GetSystem")?;
        Ok(self.array.state.lock().system.clone())
    }

    async fn get_license_feature(&self, _ctx: &RequestContext) -> Result<LicenseFeatureSet> {
        self.array.delay().await;
        self.require_login("GetLicenseFeature")?;
        Ok(self.array.state.lock().features.clone())
    }

    async fn get_all_pools(&self, _ctx: &RequestContext) -> Result<BTreeMap<String, Pool>> {
        self.array.delay().await;
        self.require_login("GetAllPools")?;
        Ok(self.array.state.lock().pools.clone())
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig::new(
            vec!["https://a:8088".into(), "https://b:8088".into()],
            "admin",
            "secret",
        )
    }

    #[tokio::test]
    async fn test_login_failover() {
        let array = MockArray::new("V600R005C00", "").with_reachable_urls(&["https://b:8088"]);
        let client = array.create(&config()).unwrap();

        client.login(&RequestContext::new()).await.unwrap();
        assert_eq!(client.endpoint().as_deref(), Some("https://b:8088"));
        assert_eq!(array.active_sessions(), 1);

        client.logout(&RequestContext::new()).await.unwrap();
        assert_eq!(array.active_sessions(), 0);
        assert_eq!(array.logouts(), 1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_password() {
        let array = MockArray::new("V600R005C00", "").with_password("other");
        let client = array.create(&config()).unwrap();
        assert!(client.login(&RequestContext::new()).await.is_err());
        assert_eq!(array.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_needs_new_login() {
        let array = MockArray::new("V600R005C00", "");
        let client = array.create(&config()).unwrap();
        let ctx = RequestContext::new();

        client.login(&ctx).await.unwrap();
        array.expire_tokens();
        assert!(client.get_system(&ctx).await.is_err());

        client.login(&ctx).await.unwrap();
        client.get_system(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_queries_need_session() {
        let array = MockArray::new("V600R005C00", "");
        let client = array.create(&config()).unwrap();
        assert!(client.get_all_pools(&RequestContext::new()).await.is_err());
    }
}
