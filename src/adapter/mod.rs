//! Adapters - concrete implementations of the ports

pub mod process;
pub mod timer;

pub use process::{ProcessHandle, ProcessLauncher};
pub use timer::ActorExpiryScheduler;
