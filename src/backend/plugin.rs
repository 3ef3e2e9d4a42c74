//! OceanStor Plugin
//!
//! Entry point used by the orchestration layer: initializes the session,
//! resolves the product family and exposes capability refresh, pool
//! capacity refresh, parameter resolution and QoS validation.

use crate::backend::capability;
use crate::backend::params::ProvisioningParameters;
use crate::backend::pool;
use crate::backend::qos::QosValidator;
use crate::backend::session::{BackendSession, PooledSession};
use crate::config::BackendConfig;
use crate::domain::context::RequestContext;
use crate::domain::ports::ClientFactoryRef;
use crate::domain::types::{CapabilitySet, PoolCapability, PoolUsage, ProductFamily};
use crate::error::{Error, Result};
use crate::metrics::PluginMetrics;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Produced Port
// =============================================================================

/// Interface consumed by the orchestration layer
#[async_trait]
pub trait BackendPlugin: Send + Sync + std::fmt::Debug {
    /// Backend name
    fn name(&self) -> &str;

    /// Product family resolved at initialization
    fn product(&self) -> ProductFamily;

    /// Negotiate and publish a fresh capability set
    async fn refresh_capabilities(&self, ctx: &RequestContext) -> Result<Arc<CapabilitySet>>;

    /// Free capacity of the requested pools usable by this plugin
    async fn update_pool_capabilities(
        &self,
        pool_names: &[String],
        ctx: &RequestContext,
    ) -> Result<IndexMap<String, PoolCapability>>;

    /// Build the provisioning request for a new volume
    fn build_parameters(
        &self,
        volume_name: &str,
        raw: &Map<String, Value>,
        requested_size_bytes: i64,
    ) -> Result<ProvisioningParameters>;

    /// Check a QoS profile against this product
    fn validate_qos(&self, qos_config: &str) -> Result<()>;

    /// Independent session for an operation overlapping the primary one.
    ///
    /// Releasing it is the caller's responsibility.
    async fn acquire_concurrent(&self, ctx: &RequestContext) -> Result<PooledSession>;

    /// Log out of the array
    async fn release(&self, ctx: &RequestContext) -> Result<()>;
}

// =============================================================================
// OceanStor Plugin
// =============================================================================

/// Plugin for one OceanStor array
pub struct OceanstorPlugin {
    name: String,
    usage: PoolUsage,
    product: ProductFamily,
    session: BackendSession,
    qos: QosValidator,
    metrics: Arc<PluginMetrics>,
}

impl std::fmt::Debug for OceanstorPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OceanstorPlugin")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("product", &self.product)
            .finish()
    }
}

impl OceanstorPlugin {
    /// Authenticate and resolve the product family.
    ///
    /// Fails fast on the first error. A session opened before a failure is
    /// logged out again so nothing is left behind. Unless `keep_login` is
    /// set the session is released once initialization completes; later
    /// calls log in again on demand.
    #[instrument(skip(config, factory, ctx), fields(urls = ?config.urls))]
    pub async fn init(
        name: &str,
        usage: PoolUsage,
        config: BackendConfig,
        factory: ClientFactoryRef,
        keep_login: bool,
        ctx: &RequestContext,
    ) -> Result<Self> {
        let config = config.validated()?;
        let metrics = Arc::new(PluginMetrics::new(name)?);

        let session = BackendSession::authenticate(config, factory, metrics.clone(), ctx).await?;

        let product = match session.resolve_product_identity(ctx).await {
            Ok(product) => product,
            Err(e) => {
                error!("Get product version error: {}", e);
                // Cleanup runs even when `ctx` was the cause of the failure
                if let Err(logout) = session.release(false, &RequestContext::new()).await {
                    warn!("Logout after failed initialization failed: {}", logout);
                }
                return Err(e);
            }
        };

        session.release(keep_login, ctx).await?;

        info!("Backend {} initialized ({}, {})", name, product, usage);
        Ok(Self {
            name: name.to_string(),
            usage,
            product,
            session,
            qos: QosValidator::default(),
            metrics,
        })
    }

    /// Replace the QoS validator
    pub fn with_qos_validator(mut self, qos: QosValidator) -> Self {
        self.qos = qos;
        self
    }

    pub fn usage(&self) -> PoolUsage {
        self.usage
    }

    pub fn metrics(&self) -> &Arc<PluginMetrics> {
        &self.metrics
    }

    /// Latest published capability set
    pub fn capabilities(&self) -> Option<Arc<CapabilitySet>> {
        self.session.capabilities()
    }

    /// Log out, or keep the session for further immediate calls
    pub async fn logout(&self, keep_alive: bool, ctx: &RequestContext) -> Result<()> {
        self.session.release(keep_alive, ctx).await
    }
}

#[async_trait]
impl BackendPlugin for OceanstorPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn product(&self) -> ProductFamily {
        self.product
    }

    #[instrument(skip_all, fields(backend = %self.name))]
    async fn refresh_capabilities(&self, ctx: &RequestContext) -> Result<Arc<CapabilitySet>> {
        let result = {
            let primary = self.session.primary(ctx).await?;
            capability::negotiate(&*primary, self.product, ctx).await
        };
        self.metrics.record_negotiation(result.is_ok());

        let capabilities = Arc::new(result?);
        self.session.store_capabilities(capabilities.clone());
        Ok(capabilities)
    }

    #[instrument(skip_all, fields(backend = %self.name, pools = pool_names.len()))]
    async fn update_pool_capabilities(
        &self,
        pool_names: &[String],
        ctx: &RequestContext,
    ) -> Result<IndexMap<String, PoolCapability>> {
        let primary = self.session.primary(ctx).await?;
        pool::aggregate(&*primary, pool_names, self.usage, &self.metrics, ctx).await
    }

    fn build_parameters(
        &self,
        volume_name: &str,
        raw: &Map<String, Value>,
        requested_size_bytes: i64,
    ) -> Result<ProvisioningParameters> {
        ProvisioningParameters::resolve(raw, volume_name, requested_size_bytes)
    }

    fn validate_qos(&self, qos_config: &str) -> Result<()> {
        self.qos.validate(self.product, qos_config)
    }

    async fn acquire_concurrent(&self, ctx: &RequestContext) -> Result<PooledSession> {
        self.session.acquire_concurrent(ctx).await
    }

    async fn release(&self, ctx: &RequestContext) -> Result<()> {
        self.session.release(false, ctx).await
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates plugins by backend type name
pub struct PluginFactory;

impl PluginFactory {
    /// Pool usage served by a backend type
    pub fn usage_for(backend_type: &str) -> Result<PoolUsage> {
        match backend_type.to_lowercase().as_str() {
            "oceanstor-san" | "san" => Ok(PoolUsage::San),
            "oceanstor-nas" | "nas" => Ok(PoolUsage::Nas),
            _ => Err(Error::Configuration(format!(
                "unknown backend type: {}",
                backend_type
            ))),
        }
    }

    /// Initialize a plugin for the named backend type
    pub async fn create(
        backend_type: &str,
        name: &str,
        config: BackendConfig,
        factory: ClientFactoryRef,
        keep_login: bool,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn BackendPlugin>> {
        let usage = Self::usage_for(backend_type)?;
        let plugin = OceanstorPlugin::init(name, usage, config, factory, keep_login, ctx).await?;
        Ok(Arc::new(plugin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockArray;
    use crate::domain::types::{Capability, Pool};
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;

    fn config() -> BackendConfig {
        BackendConfig::new(vec!["https://array:8088".into()], "admin", "secret")
    }

    async fn plugin(array: &MockArray, keep_login: bool) -> OceanstorPlugin {
        OceanstorPlugin::init(
            "array-1",
            PoolUsage::San,
            config(),
            array.factory(),
            keep_login,
            &RequestContext::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_init_releases_session_by_default() {
        let array = MockArray::new("V600R005C00", "");
        let plugin = plugin(&array, false).await;

        assert_eq!(plugin.product(), ProductFamily::DoradoV6);
        assert_eq!(array.active_sessions(), 0);
        assert!(plugin.capabilities().is_none());
    }

    #[tokio::test]
    async fn test_init_keep_login() {
        let array = MockArray::new("V600R005C00", "");
        let _plugin = plugin(&array, true).await;
        assert_eq!(array.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_no_session() {
        let array = MockArray::new("unknown", "");
        let err = OceanstorPlugin::init(
            "array-1",
            PoolUsage::San,
            config(),
            array.factory(),
            true,
            &RequestContext::new(),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::ProductVersionParse(_));
        assert_eq!(array.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let array = MockArray::new("V600R005C00", "");
        let err = OceanstorPlugin::init(
            "array-1",
            PoolUsage::San,
            BackendConfig::new(vec![], "admin", "secret"),
            array.factory(),
            false,
            &RequestContext::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(array.logins(), 0);
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let array = MockArray::new("V300R006C50", "61").with_feature("SmartQoS", true);
        let plugin = plugin(&array, false).await;
        let ctx = RequestContext::new();

        let caps = plugin.refresh_capabilities(&ctx).await.unwrap();
        assert!(caps.supports(Capability::SupportQoS));
        assert!(caps.supports(Capability::SupportThick));
        assert_eq!(plugin.capabilities().as_deref(), Some(&*caps));
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_snapshot() {
        let array = MockArray::new("V600R005C00", "").with_feature("SmartThin", true);
        let plugin = plugin(&array, true).await;
        let ctx = RequestContext::new();

        let first = plugin.refresh_capabilities(&ctx).await.unwrap();
        array.set_fail_queries(true);
        let err = plugin.refresh_capabilities(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(plugin.capabilities().as_deref(), Some(&*first));
    }

    #[tokio::test]
    async fn test_update_pool_capabilities_uses_plugin_usage() {
        let array = MockArray::new("V500R007C10", "")
            .with_pool(Pool::new("block", "1", "8"))
            .with_pool(Pool::new("file", "2", "8"));
        let plugin = plugin(&array, false).await;

        let pools = plugin
            .update_pool_capabilities(
                &["block".to_string(), "file".to_string()],
                &RequestContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools["block"].free_capacity_bytes, 4096);
    }

    #[tokio::test]
    async fn test_validate_qos_uses_product() {
        let array = MockArray::new("V300R002C10", "811");
        let plugin = plugin(&array, false).await;
        assert_eq!(plugin.product(), ProductFamily::Dorado);

        plugin
            .validate_qos(r#"{"IOTYPE": 2, "MAXIOPS": 1000}"#)
            .unwrap();
        assert!(plugin
            .validate_qos(r#"{"IOTYPE": 2, "LATENCY": 500}"#)
            .is_err());
    }

    #[test]
    fn test_usage_for_backend_type() {
        assert_eq!(PluginFactory::usage_for("oceanstor-san").unwrap(), PoolUsage::San);
        assert_eq!(PluginFactory::usage_for("OceanStor-NAS").unwrap(), PoolUsage::Nas);
        assert!(PluginFactory::usage_for("fusionstorage").is_err());
    }
}
