use std::time::Duration;

use tokio::task::AbortHandle;

use crate::domain::envelope::CorrelationId;

/// Arms the one timer each pending request owns
///
/// When the timer fires, the implementation must route the id back to
/// [`CorrelationRegistry::expire`](crate::domain::correlation::CorrelationRegistry::expire)
/// on the registry's owner. The returned handle cancels the timer.
pub trait ExpiryScheduler: Send + Sync {
    fn schedule(&self, id: CorrelationId, after: Duration) -> AbortHandle;
}
