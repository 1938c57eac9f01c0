use async_trait::async_trait;
use ractor::ActorRef;
use tracing::{Level, event};

use crate::{
    actor::message::ShardManagerMessage,
    domain::{constant::transport, envelope::ShardIndex, error::ShardError}
};

/// Startup parameters every worker must be able to recover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSpec {
    pub index:       ShardIndex,
    pub shard_count: u32
}

/// How a worker's transport reported its end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process exited; `None` when it was killed by a signal
    Exited(Option<i32>),
    /// IPC channel closed without an exit status
    Disconnected
}

/// Reason attached to a forced termination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    RestartRequested,
    Shutdown
}

impl KillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillReason::RestartRequested => "restart requested",
            KillReason::Shutdown => "shutdown"
        }
    }
}

/// Live process for one shard, owned by the manager's process record
pub trait WorkerHandle: Send + Sync {
    /// OS process id, if the transport has one
    fn pid(&self) -> Option<u32>;

    /// Queue one serialized envelope; frames to one worker keep send order
    fn send(&self, frame: Vec<u8>) -> Result<(), ShardError>;

    /// Terminate forcibly
    fn kill(&self, reason: KillReason);
}

/// Platform-specific way of starting a shard worker
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn launch(&self, spec: LaunchSpec, events: WorkerEvents) -> Result<Box<dyn WorkerHandle>, ShardError>;
}

/// Observer handed to a launcher; reports a worker's traffic and end back to the manager
///
/// Every event is stamped with the spawn generation so reports from a replaced
/// process are recognised as stale.
#[derive(Clone)]
pub struct WorkerEvents {
    index:      ShardIndex,
    generation: u64,
    manager:    ActorRef<ShardManagerMessage>
}

impl WorkerEvents {
    pub fn new(index: ShardIndex, generation: u64, manager: ActorRef<ShardManagerMessage>) -> Self {
        Self { index, generation, manager }
    }

    pub fn index(&self) -> ShardIndex {
        self.index
    }

    /// One inbound frame
    pub fn frame(&self, frame: Vec<u8>) {
        self.notify(ShardManagerMessage::Inbound { index: self.index, generation: self.generation, frame });
    }

    pub fn exited(&self, code: Option<i32>) {
        self.terminated(Termination::Exited(code));
    }

    pub fn disconnected(&self) {
        self.terminated(Termination::Disconnected);
    }

    fn terminated(&self, termination: Termination) {
        self.notify(ShardManagerMessage::ProcessTerminated {
            index: self.index,
            generation: self.generation,
            termination
        });
    }

    fn notify(&self, message: ShardManagerMessage) {
        if let Err(e) = self.manager.cast(message) {
            event!(Level::DEBUG, event = transport::PROCESS_DISCONNECTED,
                   shard = %self.index, error = %e, message = "manager_unreachable");
        }
    }
}
