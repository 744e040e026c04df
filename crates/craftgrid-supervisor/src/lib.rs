//! craftgrid-supervisor: ownership of game-server OS processes.
//!
//! One [`ProcessSupervisor`] spawns processes; each spawned process is
//! owned by exactly one background task, reachable only through its
//! [`ProcessHandle`].
//!
//! # Architecture
//!
//! ```text
//! ProcessSupervisor::start(server_dir)
//!   ├── spawn `start.sh` (cwd = server_dir, stdio piped)
//!   ├── stdout drain task → logs/latest.log, ReadinessProbe, ProcessEvent::Output/Ready
//!   ├── stderr drain task → logs/latest.log, ProcessEvent::Output
//!   └── supervise task (owns Child + stdin)
//!       ├── Control::Stop → write "stop", wait ≤ timeout, else SIGKILL
//!       ├── Control::Kill → SIGKILL
//!       └── child exit    → ProcessEvent::Exited
//! ```
//!
//! Readiness detection matches substrings of the server's console output.
//! The game server offers no structured health protocol, so this is a
//! heuristic; swap the [`ReadinessProbe`] per server type.

pub mod error;
pub mod readiness;
pub mod supervisor;

pub use error::{SupervisorError, SupervisorResult};
pub use readiness::{MarkerProbe, ReadinessProbe};
pub use supervisor::{
    launch_script, OutputStream, ProcessEvent, ProcessExit, ProcessHandle, ProcessId,
    ProcessSupervisor, StopOutcome, SupervisorConfig,
};
