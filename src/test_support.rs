//! In-memory workers for exercising the manager without child processes

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration
};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    config::ManagerConfig,
    domain::{
        envelope::{Envelope, ShardIndex},
        error::ShardError
    },
    port::launcher::{KillReason, LaunchSpec, WorkerEvents, WorkerHandle, WorkerLauncher},
    worker::{EchoHandler, ValueProvider, WorkerRuntime}
};

pub fn test_config(shard_count: u32, request_timeout_ms: u64) -> ManagerConfig {
    ManagerConfig { shard_count, request_timeout_ms, ..ManagerConfig::default() }
}

/// Answers every key with the shard's own index
struct IndexValues(ShardIndex);

impl ValueProvider for IndexValues {
    fn value(&self, _key: &str) -> Option<Value> {
        Some(json!(self.0))
    }
}

#[derive(Default)]
struct WorkerLog {
    received: Vec<Envelope>,
    killed:   Option<KillReason>
}

/// One launched fake process; clones observe the same process
#[derive(Clone)]
pub struct FakeWorker {
    pub events: WorkerEvents,
    log:        Arc<Mutex<WorkerLog>>
}

impl FakeWorker {
    /// Envelopes the manager sent to this process, in send order
    pub fn received(&self) -> Vec<Envelope> {
        self.log.lock().unwrap().received.clone()
    }

    pub fn killed(&self) -> Option<KillReason> {
        self.log.lock().unwrap().killed
    }

    /// Deliver a frame as if the process wrote it to stdout
    pub fn emit(&self, envelope: &Envelope) {
        self.events.frame(envelope.to_bytes().unwrap());
    }
}

struct FakeHandle {
    pid:     u32,
    worker:  FakeWorker,
    runtime: Option<(Arc<WorkerRuntime>, Duration)>
}

impl WorkerHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), ShardError> {
        let mut log = self.worker.log.lock().unwrap();
        if log.killed.is_some() {
            return Err(ShardError::Transport("fake worker is dead".to_string()));
        }
        let envelope = Envelope::parse(&frame)?;
        log.received.push(envelope.clone());
        drop(log);

        if let Some((runtime, delay)) = &self.runtime
            && let Some(reply) = runtime.respond(envelope)
        {
            let events = self.worker.events.clone();
            let delay = *delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                events.frame(reply.to_bytes().unwrap());
            });
        }
        Ok(())
    }

    fn kill(&self, reason: KillReason) {
        self.worker.log.lock().unwrap().killed.get_or_insert(reason);
    }
}

#[derive(Default)]
struct LauncherLog {
    workers:  HashMap<ShardIndex, Vec<FakeWorker>>,
    failures: HashMap<ShardIndex, u32>
}

/// Launcher whose workers live in memory
///
/// Shards registered with [`FakeLauncher::responding`] answer pings, value
/// requests and interactions through a [`WorkerRuntime`] after a fixed delay;
/// the others stay silent.
#[derive(Default)]
pub struct FakeLauncher {
    responders: HashMap<ShardIndex, Duration>,
    log:        Mutex<LauncherLog>
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responding(mut self, shard: ShardIndex, delay: Duration) -> Self {
        self.responders.insert(shard, delay);
        self
    }

    /// Make the next `times` launches of `shard` fail
    pub fn failing(self, shard: ShardIndex, times: u32) -> Self {
        self.log.lock().unwrap().failures.insert(shard, times);
        self
    }

    pub fn launch_count(&self, index: ShardIndex) -> usize {
        self.log.lock().unwrap().workers.get(&index).map_or(0, Vec::len)
    }

    /// Most recent process launched for `index`
    pub fn worker(&self, index: ShardIndex) -> FakeWorker {
        self.workers(index).pop().unwrap_or_else(|| panic!("shard {} was never launched", index))
    }

    /// Every process launched for `index`, oldest first
    pub fn workers(&self, index: ShardIndex) -> Vec<FakeWorker> {
        self.log.lock().unwrap().workers.get(&index).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self, spec: LaunchSpec, events: WorkerEvents) -> Result<Box<dyn WorkerHandle>, ShardError> {
        let mut log = self.log.lock().unwrap();
        if let Some(remaining) = log.failures.get_mut(&spec.index)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ShardError::Spawn(format!("fake launch of shard {} failed", spec.index)));
        }

        let worker = FakeWorker { events, log: Arc::new(Mutex::new(WorkerLog::default())) };
        let launched = log.workers.entry(spec.index).or_default();
        launched.push(worker.clone());
        let pid = 10_000 + spec.index * 100 + launched.len() as u32;

        let runtime = self.responders.get(&spec.index).map(|delay| {
            let runtime = WorkerRuntime::new(
                spec.index,
                spec.shard_count,
                Arc::new(IndexValues(spec.index)),
                Arc::new(EchoHandler)
            );
            (Arc::new(runtime), *delay)
        });

        Ok(Box::new(FakeHandle { pid, worker, runtime }))
    }
}
