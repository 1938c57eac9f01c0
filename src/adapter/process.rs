//! OS process transport for shard workers
//!
//! Each worker is a child process started with `SHARD_INDEX`/`SHARD_COUNT` in
//! its environment. Envelopes travel as length-delimited frames (4-byte
//! big-endian prefix) over the child's stdin and stdout; stderr is inherited.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot}
};
use tokio_util::{
    bytes::Bytes,
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
    sync::CancellationToken
};
use tracing::{Level, event};

use crate::{
    config::WorkerCommand,
    domain::{
        constant::{ENV_SHARD_COUNT, ENV_SHARD_INDEX, transport},
        error::ShardError
    },
    port::launcher::{KillReason, LaunchSpec, WorkerEvents, WorkerHandle, WorkerLauncher}
};

/// How long a worker may keep running after closing stdout before it counts as disconnected
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Launches workers as child processes
pub struct ProcessLauncher {
    command: WorkerCommand
}

impl ProcessLauncher {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: LaunchSpec, events: WorkerEvents) -> Result<Box<dyn WorkerHandle>, ShardError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .env(ENV_SHARD_INDEX, spec.index.to_string())
            .env(ENV_SHARD_COUNT, spec.shard_count.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ShardError::Spawn(format!("Failed to start {}: {}", self.command.program.display(), e))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ShardError::Spawn("worker stdin unavailable".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| ShardError::Spawn("worker stdout unavailable".to_string()))?;
        let pid = child.id();

        let (frames, outbound) = mpsc::unbounded_channel();
        let (stdout_closed, closed) = oneshot::channel();
        let kill = CancellationToken::new();

        tokio::spawn(write_frames(stdin, outbound, events.index()));
        tokio::spawn(read_frames(stdout, events.clone(), stdout_closed));
        tokio::spawn(await_exit(child, closed, kill.clone(), events));

        Ok(Box::new(ProcessHandle { pid, frames, kill }))
    }
}

/// Handle to one child process
pub struct ProcessHandle {
    pid:    Option<u32>,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    kill:   CancellationToken
}

impl WorkerHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), ShardError> {
        self.frames.send(frame).map_err(|_| ShardError::Transport("worker stdin is closed".to_string()))
    }

    fn kill(&self, reason: KillReason) {
        event!(Level::DEBUG, event = transport::PROCESS_EXITED, pid = ?self.pid, reason = reason.as_str());
        self.kill.cancel();
    }
}

/// Single writer per worker, so frames keep their send order
async fn write_frames(stdin: ChildStdin, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>, index: u32) {
    let mut sink = FramedWrite::new(stdin, LengthDelimitedCodec::new());

    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(Bytes::from(frame)).await {
            event!(Level::WARN, event = transport::FRAME_WRITE_FAILED, shard = %index, error = %e);
            break;
        }
    }
}

async fn read_frames(stdout: ChildStdout, events: WorkerEvents, stdout_closed: oneshot::Sender<()>) {
    let mut frames = FramedRead::new(stdout, LengthDelimitedCodec::new());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => events.frame(frame.to_vec()),
            Err(e) => {
                event!(Level::WARN, event = transport::FRAME_READ_FAILED, shard = %events.index(), error = %e);
                break;
            }
        }
    }

    let _ = stdout_closed.send(());
}

/// Reports exactly one termination per process
///
/// An exit status always wins; a closed stdout only becomes a disconnect if
/// the process is still alive after [`DISCONNECT_GRACE`].
async fn await_exit(mut child: Child, closed: oneshot::Receiver<()>, kill: CancellationToken, events: WorkerEvents) {
    let disconnected = async {
        let _ = closed.await;
        tokio::time::sleep(DISCONNECT_GRACE).await;
    };

    tokio::select! {
        status = child.wait() => {
            let code = status.ok().and_then(|status| status.code());
            event!(Level::INFO, event = transport::PROCESS_EXITED, shard = %events.index(), code = ?code);
            events.exited(code);
        }
        _ = kill.cancelled() => {
            let _ = child.start_kill();
            let code = child.wait().await.ok().and_then(|status| status.code());
            events.exited(code);
        }
        _ = disconnected => {
            event!(Level::WARN, event = transport::PROCESS_DISCONNECTED, shard = %events.index());
            events.disconnected();
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use super::*;
    use crate::{
        config::ManagerConfig,
        domain::{
            constant::EXIT_CODE_NO_RESTART,
            interaction::SnowflakePartitioner,
            supervision::{BackoffPolicy, ShardHealth, ShardState}
        },
        services::ShardFleet
    };

    async fn start_shell(script: &str, config: ManagerConfig) -> ShardFleet {
        let command =
            WorkerCommand { program: PathBuf::from("/bin/sh"), args: vec!["-c".to_string(), script.to_string()] };
        ShardFleet::start(config, Arc::new(ProcessLauncher::new(command)), Arc::new(SnowflakePartitioner))
            .await
            .unwrap()
    }

    /// Poll shard 0 until it leaves `Running`, or give up after `limit`
    async fn wait_until_down(fleet: &ShardFleet, limit: Duration) -> ShardHealth {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let health = fleet.health().await.unwrap().remove(0);
            if health.state != ShardState::Running || tokio::time::Instant::now() >= deadline {
                return health;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn slow_backoff() -> ManagerConfig {
        ManagerConfig {
            backoff: Some(BackoffPolicy { initial_ms: 10_000, max_ms: 10_000, factor: 2.0 }),
            ..ManagerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_no_restart_exit_code_reaches_the_manager() {
        let fleet = start_shell(&format!("exit {}", EXIT_CODE_NO_RESTART), slow_backoff()).await;

        let health = wait_until_down(&fleet, Duration::from_secs(5)).await;

        assert_eq!(health.state, ShardState::Retired);
        assert_eq!(health.restarts, 0);

        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_other_exit_codes_count_as_crashes() {
        let fleet = start_shell("exit 3", slow_backoff()).await;

        let health = wait_until_down(&fleet, Duration::from_secs(5)).await;

        assert_eq!(health.state, ShardState::Spawning);
        assert_eq!(health.restarts, 1);

        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_stdout_becomes_one_disconnect() {
        let fleet = start_shell("exec >&-; sleep 30", slow_backoff()).await;

        let early = fleet.health().await.unwrap().remove(0);
        assert_eq!(early.state, ShardState::Running);

        let health = wait_until_down(&fleet, DISCONNECT_GRACE + Duration::from_secs(3)).await;
        assert_eq!(health.state, ShardState::Spawning);
        assert_eq!(health.restarts, 1);

        // the killed process must not report a second termination
        tokio::time::sleep(Duration::from_millis(300)).await;
        let health = fleet.health().await.unwrap().remove(0);
        assert_eq!(health.state, ShardState::Spawning);
        assert_eq!(health.restarts, 1);

        fleet.shutdown().await;
    }
}
