use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Host-side termination signal, e.g. the caller's transaction being killed.
pub trait CancellationSource: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Cooperative, polled cancellation shared by every component of a run.
///
/// Polling the host source is comparatively expensive, so callers check on a
/// cadence. Once the source reports cancellation the token is tripped and
/// stays tripped.
#[derive(Clone, Default)]
pub struct CancellationGuard {
    token: CancellationToken,
    source: Option<Arc<dyn CancellationSource>>,
}

impl CancellationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(source: Arc<dyn CancellationSource>) -> Self {
        CancellationGuard {
            token: CancellationToken::new(),
            source: Some(source),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }

        if let Some(source) = &self.source
            && source.is_cancelled()
        {
            self.token.cancel();
            return true;
        }

        false
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token tripped together with this guard; awaitable via `cancelled()`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token that is cancelled with this guard but can also be cancelled on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl std::fmt::Debug for CancellationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationGuard")
            .field("cancelled", &self.token.is_cancelled())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
