//! ShardManager Actor - Supervises shard workers and routes their traffic
//!
//! The ShardManager is the only writer of the manager's state:
//! - Spawns one worker per shard index and respawns crashed ones
//! - Classifies every inbound envelope through the router
//! - Owns the correlation registry for requests sent to shards
//! - Answers liveness queries

use std::{collections::HashSet, sync::Arc, time::Instant};

use chrono::{SecondsFormat, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, concurrency::JoinHandle};
use serde_json::{Map, Value, json};
use tracing::{Level, event};

use crate::{
    actor::message::ShardManagerMessage,
    adapter::timer::ActorExpiryScheduler,
    config::ManagerConfig,
    domain::{
        constant::{manager, router as router_events, supervisor},
        correlation::{AggregateReplyPort, CorrelationRegistry, SingleReplyPort, settle},
        envelope::{CorrelationId, Envelope, Recipients, Sender, ShardIndex},
        error::ShardError,
        interaction::{InteractionRequest, Partitioner},
        router::{self, ManagerKey, Route},
        supervision::{self, ProcessRecord, ShardHealth, ShardState}
    },
    port::launcher::{KillReason, LaunchSpec, Termination, WorkerEvents, WorkerLauncher}
};

/// Startup arguments of the ShardManager actor
pub struct ShardManagerArgs {
    pub config:      ManagerConfig,
    pub launcher:    Arc<dyn WorkerLauncher>,
    pub partitioner: Arc<dyn Partitioner>
}

/// ShardManager Actor State - every per-shard table is indexed by ShardIndex
pub struct ShardManagerState {
    config:          ManagerConfig,
    launcher:        Arc<dyn WorkerLauncher>,
    partitioner:     Arc<dyn Partitioner>,
    /// Live worker per index, `None` while absent
    records:         Vec<Option<ProcessRecord>>,
    /// Shards that exited with the no-restart code
    retired:         Vec<bool>,
    /// Respawns per index since startup
    restarts:        Vec<u32>,
    /// Terminations since the shard was last heard from, drives backoff
    crash_streak:    Vec<u32>,
    /// Indices with a delayed respawn in flight
    pending_respawn: HashSet<ShardIndex>,
    next_generation: u64,
    registry:        CorrelationRegistry,
    started_at:      Instant,
    heartbeat:       Option<JoinHandle<()>>
}

impl ShardManagerState {
    /// Indices with a live worker, ascending
    fn live_roster(&self) -> Vec<ShardIndex> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.is_some())
            .map(|(index, _)| index as ShardIndex)
            .collect()
    }

    fn record_mut(&mut self, index: ShardIndex) -> Option<&mut ProcessRecord> {
        self.records.get_mut(index as usize).and_then(Option::as_mut)
    }

    fn is_current(&self, index: ShardIndex, generation: u64) -> bool {
        matches!(self.records.get(index as usize), Some(Some(record)) if record.generation == generation)
    }

    fn send_to(&self, index: ShardIndex, frame: Vec<u8>) -> Result<(), ShardError> {
        match self.records.get(index as usize) {
            Some(Some(record)) => record.handle.send(frame),
            _ => Err(ShardError::Routing(index))
        }
    }

    fn send_envelope(&self, index: ShardIndex, envelope: &Envelope) -> Result<(), ShardError> {
        self.send_to(index, envelope.to_bytes()?)
    }

    fn health(&self) -> Vec<ShardHealth> {
        (0..self.config.shard_count)
            .map(|index| {
                let slot = index as usize;
                match &self.records[slot] {
                    Some(record) => ShardHealth {
                        index,
                        state: ShardState::Running,
                        pid: record.handle.pid(),
                        spawned_at: Some(record.spawned_at),
                        last_activity_at: Some(record.last_activity_at),
                        restarts: self.restarts[slot]
                    },
                    None => ShardHealth {
                        index,
                        state: if self.retired[slot] {
                            ShardState::Retired
                        } else if self.pending_respawn.contains(&index) {
                            ShardState::Spawning
                        } else {
                            ShardState::Absent
                        },
                        pid: None,
                        spawned_at: None,
                        last_activity_at: None,
                        restarts: self.restarts[slot]
                    }
                }
            })
            .collect()
    }
}

/// ShardManager Actor - supervisor of the shard fleet
pub struct ShardManager;

#[async_trait::async_trait]
impl Actor for ShardManager {
    type Arguments = ShardManagerArgs;
    type Msg = ShardManagerMessage;
    type State = ShardManagerState;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        ShardManagerArgs { config, launcher, partitioner }: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        config.validate().map_err(|e| ActorProcessingErr::from(e.to_string()))?;

        event!(Level::DEBUG, event = manager::MANAGER_STARTED,
               shard_count = %config.shard_count, respawn = %config.respawn);

        let heartbeat = config
            .heartbeat_interval()
            .map(|period| myself.send_interval(period, || ShardManagerMessage::Heartbeat));

        let slots = config.shard_count as usize;
        Ok(ShardManagerState {
            registry: CorrelationRegistry::new(Arc::new(ActorExpiryScheduler::new(myself.clone()))),
            records: (0..slots).map(|_| None).collect(),
            retired: vec![false; slots],
            restarts: vec![0; slots],
            crash_streak: vec![0; slots],
            pending_respawn: HashSet::new(),
            next_generation: 0,
            started_at: Instant::now(),
            heartbeat,
            config,
            launcher,
            partitioner
        })
    }

    async fn post_start(&self, myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        self.spawn_all(&myself, state).await;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ShardManagerMessage::Spawn { index } => {
                state.pending_respawn.remove(&index);
                let already_running = state.records.get(index as usize).is_some_and(Option::is_some);
                if !already_running {
                    self.spawn(&myself, index, state).await;
                }
            }
            ShardManagerMessage::Inbound { index, generation, frame } => {
                self.handle_inbound(index, generation, &frame, state)
            }
            ShardManagerMessage::ProcessTerminated { index, generation, termination } => {
                self.handle_terminated(&myself, index, generation, termination, state).await
            }
            ShardManagerMessage::RequestExpired { id } => {
                state.registry.expire(&id);
            }
            ShardManagerMessage::Heartbeat => self.handle_heartbeat(state),
            ShardManagerMessage::GetValues { targets, keys, reply } => {
                self.handle_get_values(targets, keys, reply, state)
            }
            ShardManagerMessage::DispatchInteraction { request, reply } => {
                self.handle_dispatch_interaction(request, reply, state)
            }
            ShardManagerMessage::Health { reply } => self.handle_health(reply, state)
        }

        Ok(())
    }

    async fn post_stop(&self, _myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        if let Some(heartbeat) = state.heartbeat.take() {
            heartbeat.abort();
        }

        for record in state.records.iter_mut().filter_map(Option::take) {
            record.handle.kill(KillReason::Shutdown);
        }
        state.registry.clear();

        event!(Level::INFO, event = manager::MANAGER_STOPPED);
        Ok(())
    }
}

impl ShardManager {
    /// Spawn the manager actor; workers for every index start before the first message is handled
    pub async fn spawn_system(
        name: Option<String>,
        args: ShardManagerArgs
    ) -> Result<(ActorRef<ShardManagerMessage>, JoinHandle<()>), ShardError> {
        Ok(Actor::spawn(name, ShardManager, args).await?)
    }

    async fn spawn_all(&self, myself: &ActorRef<ShardManagerMessage>, state: &mut ShardManagerState) {
        for index in 0..state.config.shard_count {
            self.spawn(myself, index, state).await;
        }
    }

    /// Launch a worker for `index`, replacing any previous record
    async fn spawn(&self, myself: &ActorRef<ShardManagerMessage>, index: ShardIndex, state: &mut ShardManagerState) {
        let slot = index as usize;
        if state.retired.get(slot).copied().unwrap_or(true) {
            return;
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        event!(Level::DEBUG, event = supervisor::SHARD_SPAWNING, shard = %index, generation = %generation);

        let spec = LaunchSpec { index, shard_count: state.config.shard_count };
        let events = WorkerEvents::new(index, generation, myself.clone());

        match state.launcher.launch(spec, events).await {
            Ok(handle) => {
                let pid = handle.pid();
                if let Some(previous) = state.records[slot].replace(ProcessRecord::new(handle, generation)) {
                    previous.handle.kill(KillReason::RestartRequested);
                }
                event!(Level::INFO, event = supervisor::SHARD_SPAWNED,
                       shard = %index, generation = %generation, pid = ?pid);
            }
            Err(e) => {
                event!(Level::ERROR, event = supervisor::SHARD_SPAWN_FAILED, shard = %index, error = %e);
                if state.config.respawn {
                    let delay = state.config.backoff.unwrap_or_default().delay(state.crash_streak[slot]);
                    state.crash_streak[slot] += 1;
                    self.schedule_respawn(myself, index, delay, state);
                }
            }
        }
    }

    fn schedule_respawn(
        &self,
        myself: &ActorRef<ShardManagerMessage>,
        index: ShardIndex,
        delay: std::time::Duration,
        state: &mut ShardManagerState
    ) {
        if !state.pending_respawn.insert(index) {
            return;
        }

        event!(Level::INFO, event = supervisor::SHARD_RESPAWN_SCHEDULED,
               shard = %index, delay_ms = %delay.as_millis());
        myself.send_after(delay, move || ShardManagerMessage::Spawn { index });
    }

    async fn handle_terminated(
        &self,
        myself: &ActorRef<ShardManagerMessage>,
        index: ShardIndex,
        generation: u64,
        termination: Termination,
        state: &mut ShardManagerState
    ) {
        if !state.is_current(index, generation) {
            event!(Level::DEBUG, event = supervisor::STALE_EVENT_IGNORED,
                   shard = %index, generation = %generation, termination = ?termination);
            return;
        }

        let slot = index as usize;
        let decision = supervision::decide(termination, state.config.no_restart_exit_code, state.config.respawn);

        let Some(record) = state.records[slot].take() else {
            return;
        };

        let reason = match termination {
            Termination::Exited(Some(code)) => format!("exited with code {}", code),
            Termination::Exited(None) => "killed by signal".to_string(),
            Termination::Disconnected => "transport disconnected".to_string()
        };
        event!(Level::WARN, event = supervisor::SHARD_TERMINATED, generation = %generation,
               error = %ShardError::ProcessCrash { index, reason });

        if decision.kill {
            event!(Level::DEBUG, event = supervisor::SHARD_KILLED,
                   shard = %index, reason = KillReason::RestartRequested.as_str());
            record.handle.kill(KillReason::RestartRequested);
        }
        drop(record);

        if decision.retire {
            state.retired[slot] = true;
            event!(Level::WARN, event = supervisor::SHARD_RETIRED, shard = %index);
            return;
        }

        if !decision.respawn {
            return;
        }

        state.restarts[slot] += 1;
        match state.config.backoff {
            None => self.spawn(myself, index, state).await,
            Some(policy) => {
                let delay = policy.delay(state.crash_streak[slot]);
                state.crash_streak[slot] += 1;
                self.schedule_respawn(myself, index, delay, state);
            }
        }
    }

    fn handle_inbound(&self, index: ShardIndex, generation: u64, frame: &[u8], state: &mut ShardManagerState) {
        if !state.is_current(index, generation) {
            event!(Level::DEBUG, event = supervisor::STALE_EVENT_IGNORED, shard = %index, generation = %generation);
            return;
        }

        if let Some(record) = state.record_mut(index) {
            record.touch();
        }
        state.crash_streak[index as usize] = 0;

        let envelope = match Envelope::parse(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                event!(Level::WARN, event = router_events::ENVELOPE_DROPPED, shard = %index, error = %e);
                return;
            }
        };

        if envelope.from != Sender::Shard(index) && envelope.from != Sender::Manager {
            event!(Level::WARN, event = router_events::ENVELOPE_DROPPED,
                   shard = %index, claimed = %envelope.from, message = "sender_mismatch");
            return;
        }

        let roster = state.live_roster();
        match router::route(envelope, &roster) {
            Route::Forward { targets, envelope } => {
                let frame = match envelope.to_bytes() {
                    Ok(frame) => frame,
                    Err(e) => {
                        event!(Level::ERROR, event = router_events::ENVELOPE_DROPPED, shard = %index, error = %e);
                        return;
                    }
                };
                for target in targets {
                    match state.send_to(target, frame.clone()) {
                        Ok(()) => event!(Level::DEBUG, event = router_events::ENVELOPE_FORWARDED,
                                         from = %index, to = %target, operation = %envelope.operation),
                        Err(e) => event!(Level::WARN, event = router_events::ROUTING_FAILED,
                                         from = %index, to = %target, error = %e)
                    }
                }
            }
            Route::AnswerPing { shard, nonce } => {
                let pong = Envelope::pong(Sender::Manager, router::reply_to(shard), nonce);
                match state.send_envelope(shard, &pong) {
                    Ok(()) => event!(Level::DEBUG, event = router_events::PING_ANSWERED, shard = %shard),
                    Err(e) => event!(Level::WARN, event = router_events::ROUTING_FAILED, to = %shard, error = %e)
                }
            }
            Route::RecordPong { shard } => {
                event!(Level::DEBUG, event = router_events::PONG_RECEIVED, shard = %shard);
            }
            Route::AnswerValues { shard, nonce, keys } => {
                let values = self.manager_values(shard, &keys, state);
                let reply = Envelope::reply_with_values(Sender::Manager, router::reply_to(shard), nonce, values);
                match state.send_envelope(shard, &reply) {
                    Ok(()) => event!(Level::DEBUG, event = router_events::VALUES_ANSWERED,
                                     shard = %shard, keys = %keys.len()),
                    Err(e) => event!(Level::WARN, event = router_events::ROUTING_FAILED, to = %shard, error = %e)
                }
            }
            Route::RefuseValues { shard, rejected } => {
                event!(Level::WARN, event = router_events::VALUES_REFUSED, shard = %shard, rejected = ?rejected);
            }
            Route::Resolve { nonce, reply } => {
                state.registry.resolve_one(&nonce, reply);
            }
            Route::Drop { reason } => {
                event!(Level::WARN, event = router_events::ENVELOPE_DROPPED, shard = %index, reason = %reason);
            }
        }
    }

    /// Values from the allow-list, as seen by `shard`
    fn manager_values(&self, shard: ShardIndex, keys: &[ManagerKey], state: &ShardManagerState) -> Map<String, Value> {
        let mut values = Map::new();
        for key in keys {
            let value = match key {
                ManagerKey::Pid => json!(std::process::id()),
                ManagerKey::Uptime => json!(state.started_at.elapsed().as_millis() as u64),
                ManagerKey::ShardCount => json!(state.config.shard_count),
                ManagerKey::LastActivity => match state.records.get(shard as usize) {
                    Some(Some(record)) => json!(record.last_activity_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    _ => Value::Null
                }
            };
            values.insert(key.as_str().to_string(), value);
        }
        values
    }

    fn handle_heartbeat(&self, state: &ShardManagerState) {
        let roster = state.live_roster();
        for index in &roster {
            let ping = Envelope::ping(Sender::Manager, router::reply_to(*index), None);
            if let Err(e) = state.send_envelope(*index, &ping) {
                event!(Level::WARN, event = router_events::ROUTING_FAILED, to = %index, error = %e);
            }
        }
        event!(Level::DEBUG, event = manager::HEARTBEAT_SENT, shards = %roster.len());
    }

    /// Broadcast `request_values` and aggregate one reply per reachable shard
    fn handle_get_values(
        &self,
        targets: Recipients,
        keys: Vec<String>,
        reply: AggregateReplyPort,
        state: &mut ShardManagerState
    ) {
        let roster = state.live_roster();
        let (live, missing): (Vec<ShardIndex>, Vec<ShardIndex>) =
            targets.resolve(&roster).into_iter().partition(|index| roster.contains(index));

        for index in &missing {
            event!(Level::WARN, event = router_events::ROUTING_FAILED, to = %index, error = %ShardError::Routing(*index));
        }

        let id = CorrelationId::generate();
        let envelope = Envelope::request_values(Sender::Manager, Recipients::Shards(live.clone()), id.clone(), keys);

        // no reply can be handled before this handler returns, so registering after the sends is safe
        let mut reached = 0;
        for index in &live {
            match state.send_envelope(*index, &envelope) {
                Ok(()) => reached += 1,
                Err(e) => event!(Level::WARN, event = router_events::ROUTING_FAILED, to = %index, error = %e)
            }
        }

        event!(Level::DEBUG, event = manager::VALUES_REQUESTED, nonce = %id, expected = %reached);
        state.registry.register_aggregate(id, reached, reply, state.config.request_timeout());
    }

    fn handle_dispatch_interaction(
        &self,
        request: InteractionRequest,
        reply: SingleReplyPort,
        state: &mut ShardManagerState
    ) {
        let Some(shard) = state.partitioner.shard_for(&request, state.config.shard_count) else {
            event!(Level::WARN, event = manager::INTERACTION_UNROUTABLE, routing_key = ?request.routing_key);
            settle(reply, Err(ShardError::Unroutable("no shard owns this interaction".to_string())));
            return;
        };

        let id = CorrelationId::generate();
        let envelope = Envelope::interaction(Sender::Manager, router::reply_to(shard), id.clone(), request.body);

        if let Err(e) = state.send_envelope(shard, &envelope) {
            event!(Level::WARN, event = manager::INTERACTION_UNROUTABLE, shard = %shard, error = %e);
            settle(reply, Err(e));
            return;
        }

        event!(Level::DEBUG, event = manager::INTERACTION_DISPATCHED, shard = %shard, nonce = %id);
        state.registry.register_simple(id, reply, state.config.request_timeout());
    }

    fn handle_health(&self, reply: RpcReplyPort<Vec<ShardHealth>>, state: &ShardManagerState) {
        let health = state.health();
        let running = health.iter().filter(|shard| shard.state == ShardState::Running).count();

        event!(Level::DEBUG, event = manager::HEALTH_CHECK_COMPLETED,
               running = %running, total = %health.len(), pending_requests = %state.registry.len(),
               at = %Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

        if reply.send(health).is_err() {
            event!(Level::DEBUG, event = manager::HEALTH_CHECK_COMPLETED, message = "caller_gone");
        }
    }
}
