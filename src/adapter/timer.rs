use std::time::Duration;

use ractor::ActorRef;
use tokio::task::AbortHandle;

use crate::{actor::message::ShardManagerMessage, domain::envelope::CorrelationId, port::timer::ExpiryScheduler};

/// Delivers request expiry to the manager's own mailbox
///
/// Expiry then competes with replies on the same single-writer queue.
pub struct ActorExpiryScheduler {
    manager: ActorRef<ShardManagerMessage>
}

impl ActorExpiryScheduler {
    pub fn new(manager: ActorRef<ShardManagerMessage>) -> Self {
        Self { manager }
    }
}

impl ExpiryScheduler for ActorExpiryScheduler {
    fn schedule(&self, id: CorrelationId, after: Duration) -> AbortHandle {
        self.manager.send_after(after, move || ShardManagerMessage::RequestExpired { id: id.clone() }).abort_handle()
    }
}
