//! Integration tests for the OceanStor backend plugin
//!
//! Drive the public plugin surface against the in-memory array.

use assert_matches::assert_matches;
use oceanstor_backend::{
    ArrayClient, BackendConfig, BackendPlugin, Capability, Error, ErrorKind, MockArray,
    OceanstorPlugin, PluginFactory, Pool, PoolUsage, ProductFamily, RequestContext,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

fn config() -> BackendConfig {
    BackendConfig::new(
        vec![
            "https://array-a:8088".to_string(),
            "https://array-b:8088".to_string(),
        ],
        "admin",
        "secret",
    )
}

fn raw(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

async fn init(array: &MockArray, usage: PoolUsage, keep_login: bool) -> OceanstorPlugin {
    OceanstorPlugin::init(
        "integration",
        usage,
        config(),
        array.factory(),
        keep_login,
        &RequestContext::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_full_provisioning_flow() {
    let array = MockArray::new("V600R005C00", "")
        .with_feature("SmartThin", true)
        .with_feature("SmartQoS", true)
        .with_pool(Pool::new("pool1", "1", "1000"))
        .with_pool(Pool::new("pool3", "2", "1000"));
    let plugin = init(&array, PoolUsage::San, true).await;
    let ctx = RequestContext::new();

    assert_eq!(plugin.product(), ProductFamily::DoradoV6);

    let caps = plugin.refresh_capabilities(&ctx).await.unwrap();
    assert!(caps.supports(Capability::SupportThin));
    assert!(caps.supports(Capability::SupportQoS));
    assert!(!caps.supports(Capability::SupportThick));
    assert!(caps.supports(Capability::SupportApplicationType));

    let pools = plugin
        .update_pool_capabilities(
            &["pool1".to_string(), "pool2".to_string(), "pool3".to_string()],
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools["pool1"].free_capacity_bytes, 512_000);

    let params = plugin
        .build_parameters(
            "pvc-0001",
            &raw(json!({"storagepool": "pool1", "hyperMetro": "yes", "evil": "x"})),
            1000,
        )
        .unwrap();
    assert_eq!(params.capacity(), 1024);
    assert_eq!(params.storage_pool(), Some("pool1"));
    assert_eq!(params.hyper_metro(), Some(true));
    assert!(params.get("evil").is_none());

    plugin
        .validate_qos(r#"{"IOTYPE": 2, "MAXIOPS": 1000, "LATENCY": 1500}"#)
        .unwrap();

    plugin.release(&ctx).await.unwrap();
    assert_eq!(array.active_sessions(), 0);
}

#[tokio::test]
async fn test_failover_to_second_endpoint() {
    let array = MockArray::new("V500R007C10", "").with_reachable_urls(&["https://array-b:8088"]);
    let plugin = init(&array, PoolUsage::Nas, true).await;

    assert_eq!(plugin.product().to_string(), "V5");
    assert_eq!(array.active_sessions(), 1);
}

#[tokio::test]
async fn test_unreachable_array_fails_init() {
    let array = MockArray::new("V500R007C10", "").with_reachable_urls(&[]);
    let err = OceanstorPlugin::init(
        "integration",
        PoolUsage::San,
        config(),
        array.factory(),
        true,
        &RequestContext::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(array.active_sessions(), 0);
}

#[tokio::test]
async fn test_failed_identity_logs_out() {
    let array = MockArray::new("V600R005C00", "");
    array.set_fail_queries(true);

    let err = OceanstorPlugin::init(
        "integration",
        PoolUsage::San,
        config(),
        array.factory(),
        true,
        &RequestContext::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Query);
    assert_eq!(array.logins(), 1);
    assert_eq!(array.active_sessions(), 0);
}

#[tokio::test]
async fn test_calls_after_release_log_in_again() {
    let array = MockArray::new("V300R006C50", "61").with_pool(Pool::new("pool1", "0", "2"));
    let plugin = init(&array, PoolUsage::San, false).await;
    assert_eq!(array.active_sessions(), 0);

    let ctx = RequestContext::new();
    let pools = plugin
        .update_pool_capabilities(&["pool1".to_string()], &ctx)
        .await
        .unwrap();
    assert_eq!(pools["pool1"].free_capacity_bytes, 1024);
    assert_eq!(array.logins(), 2);

    plugin.release(&ctx).await.unwrap();
    assert_eq!(array.active_sessions(), 0);
}

#[tokio::test]
async fn test_cancelled_refresh_is_query_error() {
    let array = MockArray::new("V600R005C00", "");
    let plugin = init(&array, PoolUsage::San, true).await;

    let array = array.with_latency(Duration::from_secs(30));
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = plugin.refresh_capabilities(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Query);
    assert!(plugin.capabilities().is_none());
    drop(array);
}

#[tokio::test]
async fn test_refresh_timeout_is_query_error() {
    let array = MockArray::new("V600R005C00", "");
    let plugin = init(&array, PoolUsage::San, true).await;

    let array = array.with_latency(Duration::from_secs(30));
    let ctx = RequestContext::new().with_timeout(Duration::from_millis(20));

    let err = plugin
        .update_pool_capabilities(&["pool1".to_string()], &ctx)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Query { .. });
    drop(array);
}

#[tokio::test]
async fn test_concurrent_sessions_bounded_by_parallel_num() {
    let array = MockArray::new("V600R005C00", "").with_pool(Pool::new("pool1", "1", "8"));
    let plugin = Arc::new(
        OceanstorPlugin::init(
            "integration",
            PoolUsage::San,
            config().with_parallel_num(2),
            array.factory(),
            true,
            &RequestContext::new(),
        )
        .await
        .unwrap(),
    );
    let ctx = RequestContext::new();

    let first = plugin.acquire_concurrent(&ctx).await.unwrap();
    let second = plugin.acquire_concurrent(&ctx).await.unwrap();
    assert_eq!(array.active_sessions(), 3);

    let waiting = ctx.child().with_timeout(Duration::from_millis(20));
    let err = plugin.acquire_concurrent(&waiting).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);

    let pending = {
        let plugin = plugin.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let session = plugin.acquire_concurrent(&ctx).await?;
            let pools = session.get_all_pools(&ctx).await?;
            session.release(true, &ctx).await?;
            Ok::<_, Error>(pools.len())
        })
    };

    first.release(true, &ctx).await.unwrap();
    assert_eq!(pending.await.unwrap().unwrap(), 1);
    drop(second);

    // Pooled handles are reused with a fresh login, never more than the
    // bound plus the primary at once
    assert_eq!(array.logins(), 4);
    assert_eq!(array.active_sessions(), 3);

    plugin.release(&ctx).await.unwrap();
    assert_eq!(array.active_sessions(), 0);
}

#[tokio::test]
async fn test_release_reaches_checked_out_sessions() {
    let array = MockArray::new("V600R005C00", "").with_pool(Pool::new("pool1", "1", "8"));
    let plugin = init(&array, PoolUsage::San, true).await;
    let ctx = RequestContext::new();

    let pooled = plugin.acquire_concurrent(&ctx).await.unwrap();
    assert_eq!(array.active_sessions(), 2);

    plugin.release(&ctx).await.unwrap();
    assert_eq!(array.active_sessions(), 0);

    drop(pooled);
    assert_eq!(array.active_sessions(), 0);
}

#[tokio::test]
async fn test_plugin_factory() {
    let array = MockArray::new("V300R002C10", "821")
        .with_pool(Pool::new("fs", "2", "4"))
        .with_pool(Pool::new("lun", "1", "4"));

    let plugin = PluginFactory::create(
        "oceanstor-nas",
        "factory",
        config(),
        array.factory(),
        false,
        &RequestContext::new(),
    )
    .await
    .unwrap();

    assert_eq!(plugin.name(), "factory");
    assert_eq!(plugin.product(), ProductFamily::Dorado);

    let pools = plugin
        .update_pool_capabilities(&["fs".to_string(), "lun".to_string()], &RequestContext::new())
        .await
        .unwrap();
    let names: Vec<&str> = pools.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["fs"]);

    let err = PluginFactory::create(
        "unknown",
        "factory",
        config(),
        array.factory(),
        false,
        &RequestContext::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_config_file_round_trip() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "urls:\n  - https://array-a:8088\nuser: admin\npassword: secret\nparallelNum: \"4\""
    )
    .unwrap();

    let config = BackendConfig::from_file(file.path()).unwrap();
    assert_eq!(config.parallel_limit(), 4);

    let array = MockArray::new("V600R005C00", "");
    let plugin = OceanstorPlugin::init(
        "file",
        PoolUsage::San,
        config,
        array.factory(),
        false,
        &RequestContext::new(),
    )
    .await
    .unwrap();
    assert_eq!(plugin.product(), ProductFamily::DoradoV6);
}
