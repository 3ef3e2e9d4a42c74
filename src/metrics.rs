//! Plugin Metrics
//!
//! Prometheus collectors for session, negotiation and pool-refresh activity.
//! Each plugin owns its own registry so several backends can coexist.

use crate::error::{Error, Result};
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Collectors recorded by a single plugin instance
#[derive(Clone)]
pub struct PluginMetrics {
    registry: Registry,
    /// Successful logins, primary and pooled
    pub logins: IntCounter,
    /// Failed logins
    pub login_failures: IntCounter,
    /// Pooled sessions currently handed out
    pub pooled_sessions: IntGauge,
    /// Capability negotiations by result
    pub negotiations: IntCounterVec,
    /// Pool refreshes by result
    pub pool_refreshes: IntCounterVec,
    /// Requested pools left out of a refresh, by reason
    pub pools_skipped: IntCounterVec,
}

impl PluginMetrics {
    /// Create collectors labelled with the backend name
    pub fn new(backend: &str) -> Result<Self> {
        let registry = Registry::new();

        let logins = IntCounter::with_opts(
            opts("oceanstor_logins_total", "Successful logins", backend),
        )
        .map_err(metric_error)?;
        let login_failures = IntCounter::with_opts(
            opts("oceanstor_login_failures_total", "Failed logins", backend),
        )
        .map_err(metric_error)?;
        let pooled_sessions = IntGauge::with_opts(opts(
            "oceanstor_pooled_sessions",
            "Concurrent sessions currently checked out",
            backend,
        ))
        .map_err(metric_error)?;
        let negotiations = IntCounterVec::new(
            opts(
                "oceanstor_capability_negotiations_total",
                "Capability negotiations",
                backend,
            ),
            &["result"],
        )
        .map_err(metric_error)?;
        let pool_refreshes = IntCounterVec::new(
            opts("oceanstor_pool_refreshes_total", "Pool capacity refreshes", backend),
            &["result"],
        )
        .map_err(metric_error)?;
        let pools_skipped = IntCounterVec::new(
            opts(
                "oceanstor_pools_skipped_total",
                "Requested pools left out of a refresh",
                backend,
            ),
            &["reason"],
        )
        .map_err(metric_error)?;

        registry.register(Box::new(logins.clone())).map_err(metric_error)?;
        registry.register(Box::new(login_failures.clone())).map_err(metric_error)?;
        registry.register(Box::new(pooled_sessions.clone())).map_err(metric_error)?;
        registry.register(Box::new(negotiations.clone())).map_err(metric_error)?;
        registry.register(Box::new(pool_refreshes.clone())).map_err(metric_error)?;
        registry.register(Box::new(pools_skipped.clone())).map_err(metric_error)?;

        Ok(Self {
            registry,
            logins,
            login_failures,
            pooled_sessions,
            negotiations,
            pool_refreshes,
            pools_skipped,
        })
    }

    /// Registry to expose on a `/metrics` endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[inline]
    pub fn record_login(&self, ok: bool) {
        if ok {
            self.logins.inc();
        } else {
            self.login_failures.inc();
        }
    }

    #[inline]
    pub fn record_negotiation(&self, ok: bool) {
        self.negotiations
            .with_label_values(&[if ok { "success" } else { "error" }])
            .inc();
    }

    #[inline]
    pub fn record_pool_refresh(&self, ok: bool) {
        self.pool_refreshes
            .with_label_values(&[if ok { "success" } else { "error" }])
            .inc();
    }

    #[inline]
    pub fn record_pool_skipped(&self, reason: &str) {
        self.pools_skipped.with_label_values(&[reason]).inc();
    }
}

impl std::fmt::Debug for PluginMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginMetrics")
            .field("logins", &self.logins.get())
            .field("pooled_sessions", &self.pooled_sessions.get())
            .finish()
    }
}

fn opts(name: &str, help: &str, backend: &str) -> Opts {
    Opts::new(name, help).const_label("backend", backend)
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to register metric: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered() {
        let metrics = PluginMetrics::new("array-1").unwrap();
        metrics.record_login(true);
        metrics.record_login(false);
        metrics.record_pool_skipped("missing");
        metrics.record_negotiation(true);

        assert_eq!(metrics.logins.get(), 1);
        assert_eq!(metrics.login_failures.get(), 1);
        assert_eq!(
            metrics.pools_skipped.with_label_values(&["missing"]).get(),
            1
        );

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "oceanstor_logins_total"));
    }

    #[test]
    fn test_independent_registries() {
        let a = PluginMetrics::new("a").unwrap();
        let b = PluginMetrics::new("b").unwrap();
        a.record_login(true);
        assert_eq!(b.logins.get(), 0);
    }
}
