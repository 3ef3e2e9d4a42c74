//! Session Manager
//!
//! Owns the primary authenticated handle to the array and a bounded pool of
//! independent sessions for operations that overlap with the primary one.
//!
//! A session token is not safe for concurrent use, so the primary handle is
//! held behind an async mutex and concurrent callers draw their own
//! `PooledSession`.

use crate::config::BackendConfig;
use crate::domain::context::RequestContext;
use crate::domain::ports::{ArrayClient, ArrayClientRef, ClientFactoryRef};
use crate::domain::types::{CapabilitySet, ProductFamily};
use crate::error::{Error, Result};
use crate::metrics::PluginMetrics;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

// =============================================================================
// Primary Handle
// =============================================================================

struct PrimaryHandle {
    client: ArrayClientRef,
    logged_in: bool,
}

/// Exclusive access to the primary session
pub struct PrimaryGuard<'a> {
    guard: MutexGuard<'a, PrimaryHandle>,
}

impl std::ops::Deref for PrimaryGuard<'_> {
    type Target = dyn ArrayClient;

    fn deref(&self) -> &Self::Target {
        self.guard.client.as_ref()
    }
}

// =============================================================================
// Session Pool
// =============================================================================

#[derive(Default)]
struct PoolState {
    /// Authenticated handles waiting for reuse
    idle: Vec<ArrayClientRef>,
    /// Handles currently checked out
    leased: Vec<ArrayClientRef>,
    /// Bumped by every full release; older leases are never pooled again
    generation: u64,
}

impl PoolState {
    /// End a lease. Returns true when the caller must log the handle out.
    fn check_in(&mut self, client: &ArrayClientRef, generation: u64, keep_alive: bool) -> bool {
        self.leased.retain(|leased| !Arc::ptr_eq(leased, client));
        if generation != self.generation {
            // Logged out by the release that bumped the generation
            return false;
        }
        if keep_alive {
            self.idle.push(client.clone());
            return false;
        }
        true
    }
}

type SharedPool = Arc<Mutex<PoolState>>;

/// An independent session checked out of the pool.
///
/// Call [`PooledSession::release`] when done. Dropping it without release
/// returns the still-authenticated handle to the idle list, unless the
/// backend session was released in the meantime.
pub struct PooledSession {
    client: Option<ArrayClientRef>,
    generation: u64,
    pool: SharedPool,
    metrics: Arc<PluginMetrics>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// Return the handle to the pool (`keep_alive`) or log it out
    pub async fn release(mut self, keep_alive: bool, ctx: &RequestContext) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        let logout = self.pool.lock().check_in(&client, self.generation, keep_alive);
        if !logout {
            return Ok(());
        }

        let endpoint = client.endpoint().unwrap_or_default();
        ctx.auth(&endpoint, client.logout(ctx)).await
    }
}

impl std::ops::Deref for PooledSession {
    type Target = dyn ArrayClient;

    fn deref(&self) -> &Self::Target {
        match &self.client {
            Some(client) => client.as_ref(),
            // `client` is only taken by `release`, which consumes `self`
            None => unreachable!("pooled session used after release"),
        }
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field(
                "endpoint",
                &self.client.as_ref().and_then(|client| client.endpoint()),
            )
            .field("generation", &self.generation)
            .finish()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.metrics.pooled_sessions.dec();
        if let Some(client) = self.client.take() {
            self.pool.lock().check_in(&client, self.generation, true);
        }
    }
}

// =============================================================================
// Backend Session
// =============================================================================

/// Authenticated connection to one array
pub struct BackendSession {
    config: BackendConfig,
    factory: ClientFactoryRef,
    metrics: Arc<PluginMetrics>,
    primary: AsyncMutex<PrimaryHandle>,
    permits: Arc<Semaphore>,
    pool: SharedPool,
    capabilities: RwLock<Option<Arc<CapabilitySet>>>,
}

impl std::fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSession")
            .field("config", &self.config)
            .field("available_sessions", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl BackendSession {
    /// Log in to the first reachable endpoint.
    ///
    /// Endpoint failover happens inside the client; this fails with an
    /// authentication error when the credentials are rejected or no
    /// endpoint answers.
    #[instrument(skip_all, fields(user = %config.user))]
    pub async fn authenticate(
        config: BackendConfig,
        factory: ClientFactoryRef,
        metrics: Arc<PluginMetrics>,
        ctx: &RequestContext,
    ) -> Result<Self> {
        let client = factory.create(&config)?;
        let endpoints = config.urls.join(",");

        let result = ctx.auth(&endpoints, client.login(ctx)).await;
        metrics.record_login(result.is_ok());
        result?;

        info!(
            "Authenticated to {}",
            client.endpoint().unwrap_or_else(|| endpoints.clone())
        );

        let limit = config.parallel_limit();
        Ok(Self {
            config,
            factory,
            metrics,
            primary: AsyncMutex::new(PrimaryHandle {
                client,
                logged_in: true,
            }),
            permits: Arc::new(Semaphore::new(limit)),
            pool: SharedPool::default(),
            capabilities: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Lock the primary handle, logging in again if it was released
    pub async fn primary(&self, ctx: &RequestContext) -> Result<PrimaryGuard<'_>> {
        let mut guard = self.primary.lock().await;

        if !guard.logged_in {
            let endpoints = self.config.urls.join(",");
            let result = ctx.auth(&endpoints, guard.client.login(ctx)).await;
            self.metrics.record_login(result.is_ok());
            result?;
            guard.logged_in = true;
            debug!("Primary session re-authenticated");
        }

        Ok(PrimaryGuard { guard })
    }

    /// Fetch system metadata and resolve the product family
    #[instrument(skip_all)]
    pub async fn resolve_product_identity(&self, ctx: &RequestContext) -> Result<ProductFamily> {
        let primary = self.primary(ctx).await?;
        let system = ctx.query("GetSystem", primary.get_system(ctx)).await?;
        let product = ProductFamily::from_system(&system)?;

        info!(
            "Array {} runs {} ({})",
            system.name.as_deref().unwrap_or("<unnamed>"),
            system.product_version.as_deref().unwrap_or_default(),
            product
        );
        Ok(product)
    }

    /// Check out an independent session, bounded by `parallelNum`.
    ///
    /// Idle pooled handles are reused but always authenticate again, since
    /// their token may have expired while idle.
    pub async fn acquire_concurrent(&self, ctx: &RequestContext) -> Result<PooledSession> {
        let endpoints = self.config.urls.join(",");

        let permits = self.permits.clone();
        let permit = ctx
            .auth(&endpoints, async move {
                permits
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Internal("session pool semaphore closed".into()))
            })
            .await?;

        let reused = self.pool.lock().idle.pop();
        let client = match reused {
            Some(client) => {
                if let Err(e) = ctx.auth(&endpoints, client.logout(ctx)).await {
                    debug!("Dropping stale pooled token failed: {}", e);
                }
                client
            }
            None => self.factory.create(&self.config)?,
        };

        let result = ctx.auth(&endpoints, client.login(ctx)).await;
        self.metrics.record_login(result.is_ok());
        result?;
        debug!("Pooled session authenticated");

        let generation = {
            let mut pool = self.pool.lock();
            pool.leased.push(client.clone());
            pool.generation
        };

        self.metrics.pooled_sessions.inc();
        Ok(PooledSession {
            client: Some(client),
            generation,
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
            _permit: permit,
        })
    }

    /// Number of pooled sessions that can still be checked out
    pub fn available_sessions(&self) -> usize {
        self.permits.available_permits()
    }

    /// Log out unless the caller intends to issue further calls.
    ///
    /// Every pooled handle is logged out too, including ones still checked
    /// out; those are discarded instead of pooled when their holder returns
    /// them. A failure on a pooled handle is only logged, a failure on the
    /// primary session is returned.
    #[instrument(skip(self, ctx))]
    pub async fn release(&self, keep_alive: bool, ctx: &RequestContext) -> Result<()> {
        if keep_alive {
            return Ok(());
        }

        let handles = {
            let mut pool = self.pool.lock();
            pool.generation += 1;
            let mut handles = std::mem::take(&mut pool.idle);
            handles.append(&mut pool.leased);
            handles
        };
        for client in handles {
            let endpoint = client.endpoint().unwrap_or_default();
            if let Err(e) = ctx.auth(&endpoint, client.logout(ctx)).await {
                warn!("Failed to log out pooled session: {}", e);
            }
        }

        let mut primary = self.primary.lock().await;
        if !primary.logged_in {
            return Ok(());
        }
        primary.logged_in = false;

        let endpoint = primary.client.endpoint().unwrap_or_default();
        ctx.auth(&endpoint, primary.client.logout(ctx)).await?;
        info!("Logged out of {}", endpoint);
        Ok(())
    }

    /// Latest negotiated capabilities, if any
    pub fn capabilities(&self) -> Option<Arc<CapabilitySet>> {
        self.capabilities.read().clone()
    }

    /// Publish a freshly negotiated capability snapshot
    pub fn store_capabilities(&self, capabilities: Arc<CapabilitySet>) {
        *self.capabilities.write() = Some(capabilities);
    }
}
