//! Ports - boundaries the manager consumes but does not implement

pub mod launcher;
pub mod timer;

pub use launcher::{KillReason, LaunchSpec, Termination, WorkerEvents, WorkerHandle, WorkerLauncher};
pub use timer::ExpiryScheduler;
