//! Request Context
//!
//! Cancellation and deadline signal threaded through every call that may
//! block on the array's management API.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a guarded call was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    Cancelled,
    TimedOut,
}

impl std::fmt::Display for Abort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Abort::Cancelled => write!(f, "request cancelled"),
            Abort::TimedOut => write!(f, "request timed out"),
        }
    }
}

/// Cancellation token plus an optional per-call timeout
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl RequestContext {
    /// Context that is never cancelled and has no timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to an existing cancellation token
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            timeout: None,
        }
    }

    /// Apply a timeout to each guarded call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Child context cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            timeout: self.timeout,
        }
    }

    /// Cancel every call running under this context
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` until it completes, the context is cancelled, or the
    /// timeout elapses. An abort is converted with `on_abort`.
    pub async fn guard<T, F>(&self, fut: F, on_abort: impl FnOnce(Abort) -> Error) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(on_abort(Abort::Cancelled));
        }

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| Abort::TimedOut),
                None => Ok(fut.await),
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Abort::Cancelled),
            result = bounded => result,
        };

        outcome.unwrap_or_else(|abort| Err(on_abort(abort)))
    }

    /// Guard a metadata query; aborts surface as query errors
    pub async fn query<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.guard(fut, |abort| Error::query(operation, abort)).await
    }

    /// Guard a login; aborts surface as authentication errors
    pub async fn auth<T, F>(&self, endpoint: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.guard(fut, |abort| Error::auth(endpoint, abort)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let ctx = RequestContext::new();
        let value = ctx.query("GetSystem", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = ctx.query("GetSystem", async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(err.to_string().contains("cancelled"));

        let err = ctx.auth("https://array", async { Ok(()) }).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_cancel_while_running() {
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = ctx
            .query("GetAllPools", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(5));
        let err = ctx
            .query("GetLicenseFeature", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());

        let err = tokio_test::block_on(child.query("GetSystem", async { Ok(()) })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
    }
}
