//! Process-wide dry-run switch.
//!
//! Every mutating call against a download client or Arr instance is routed
//! through [`DryRun::intercept`]. When the switch is on the mutation is logged
//! and skipped; reads still go out so decisions are computed as usual.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

/// Shared toggle. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct DryRun(Arc<AtomicBool>);

impl DryRun {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    /// Runs `mutation` unless dry-run is on, in which case it is logged and
    /// reported as successful.
    ///
    /// # Errors
    ///
    /// Whatever `mutation` returns.
    pub async fn intercept<F, Fut, E>(
        &self,
        action: &'static str,
        subject: &str,
        mutation: F,
    ) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        if self.is_enabled() {
            info!(action, subject, "[dry run] skipping");
            return Ok(());
        }
        mutation().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn test_intercept_skips_when_enabled() {
        let dry_run = DryRun::new(true);
        let calls = AtomicUsize::new(0);

        let result: Result<(), ()> = dry_run
            .intercept("delete", "abc", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_intercept_runs_when_disabled() {
        let dry_run = DryRun::new(false);
        let result: Result<(), &str> = dry_run.intercept("delete", "abc", || async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn test_clones_share_flag() {
        let dry_run = DryRun::default();
        let clone = dry_run.clone();
        clone.set(true);
        assert!(dry_run.is_enabled());
    }
}
