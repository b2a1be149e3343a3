use std::sync::Arc;

use chargeback_proto::ClaimId;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::bootstrap::{BootstrapClient, BootstrapError};
use crate::handlers::{HandlerSet, Subscription};

/// Latest server-pushed claim summary plus the watchers that render it.
///
/// Snapshots are opaque and always replaced wholesale; watchers never see a
/// diff or a merge. Push and pull both funnel through [`SummaryRegistry::publish`].
pub struct SummaryRegistry {
    snapshot: RwLock<Arc<Value>>,
    watchers: Arc<HandlerSet<Value>>,
}

impl Default for SummaryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Value::Object(Default::default()))),
            watchers: HandlerSet::new(),
        }
    }

    pub fn snapshot(&self) -> Arc<Value> {
        self.snapshot.read().clone()
    }

    pub fn add_watcher<F>(&self, watcher: F) -> Subscription<Value>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.watchers.add(watcher)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    pub fn clear_watchers(&self) {
        self.watchers.clear();
    }

    /// Replaces the stored snapshot, then notifies every watcher in
    /// registration order.
    pub fn publish(&self, snapshot: Value) -> Arc<Value> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write() = Arc::clone(&snapshot);
        let notified = self.watchers.dispatch(&snapshot);
        debug!(target = "chargeback.summary", watchers = notified, "claim summary replaced");
        snapshot
    }

    /// Pull path: fetches the summary over HTTP and publishes it exactly like
    /// a push would.
    pub async fn refresh(
        &self,
        bootstrap: &BootstrapClient,
        claim_id: ClaimId,
    ) -> Result<Arc<Value>, BootstrapError> {
        let snapshot = bootstrap.get_structured_data(claim_id).await?;
        Ok(self.publish(snapshot))
    }
}
