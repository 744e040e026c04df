//! Process spawning and lifecycle control.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::{SupervisorError, SupervisorResult};
use crate::readiness::{MarkerProbe, ReadinessProbe};

#[cfg(windows)]
const LAUNCH_SCRIPT: &str = "start.bat";
#[cfg(not(windows))]
const LAUNCH_SCRIPT: &str = "start.sh";

/// How long to wait for output drains after the process exits.
/// A grandchild holding the pipes open must not block exit reporting.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Path of the launch script inside a server directory.
pub fn launch_script(server_dir: &Path) -> PathBuf {
    server_dir.join(LAUNCH_SCRIPT)
}

#[cfg(windows)]
fn launch_command() -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(LAUNCH_SCRIPT);
    cmd
}

#[cfg(not(windows))]
fn launch_command() -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg(LAUNCH_SCRIPT);
    cmd
}

/// Supervisor-local identity of one spawned process.
///
/// A server restarted twice gets two distinct ids, which lets observers
/// drop events from a process they no longer track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, absent when the process died from a signal.
    pub code: Option<i32>,
    pub success: bool,
    /// True when the exit followed a stop or kill request.
    pub requested: bool,
}

/// Events emitted by a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A readiness marker appeared on stdout. Emitted at most once.
    Ready { process: ProcessId },
    Output {
        process: ProcessId,
        stream: OutputStream,
        line: String,
    },
    /// Always the last event for a process.
    Exited { process: ProcessId, exit: ProcessExit },
}

/// Result of a stop or kill request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process honoured the stop command within the timeout.
    Graceful { code: Option<i32> },
    /// The process was killed.
    Forced,
    /// The process had already exited on its own, as reported.
    AlreadyExited { exit: ProcessExit },
}

#[derive(Debug)]
enum Control {
    Stop {
        timeout: Duration,
        reply: oneshot::Sender<StopOutcome>,
    },
    Kill {
        reply: oneshot::Sender<StopOutcome>,
    },
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Console command written to stdin to request shutdown.
    pub stop_command: String,
    /// Console log location, relative to the server directory.
    pub log_file: PathBuf,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_command: "stop".to_string(),
            log_file: PathBuf::from("logs").join("latest.log"),
        }
    }
}

/// Spawns server processes and hands out [`ProcessHandle`]s.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    probe: Arc<dyn ReadinessProbe>,
    next_id: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            probe: Arc::new(MarkerProbe::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Replace the readiness probe applied to stdout.
    pub fn with_probe(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Launch the server in `server_dir` via its launch script.
    ///
    /// Console output from both streams is appended to the log file and
    /// forwarded on `events`. The returned handle is the only way to stop
    /// the process; dropping it kills the process.
    pub async fn start(
        &self,
        server_id: &str,
        server_dir: &Path,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> SupervisorResult<ProcessHandle> {
        let script = launch_script(server_dir);
        if !tokio::fs::try_exists(&script).await.unwrap_or(false) {
            return Err(SupervisorError::ScriptNotFound(script));
        }

        let log_path = server_dir.join(&self.config.log_file);
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SupervisorError::Io {
                    context: format!("log directory {}", parent.display()),
                    source,
                })?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|source| SupervisorError::Io {
                context: format!("log file {}", log_path.display()),
                source,
            })?;
        let log = Arc::new(Mutex::new(log));

        let mut child = launch_command()
            .current_dir(server_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SupervisorError::Spawn)?;

        let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let pid = child.id();
        let stdin = child.stdin.take();

        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain_output(
                id,
                server_id.to_string(),
                OutputStream::Stdout,
                stdout,
                log.clone(),
                Some(self.probe.clone()),
                events.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain_output(
                id,
                server_id.to_string(),
                OutputStream::Stderr,
                stderr,
                log,
                None,
                events.clone(),
            )));
        }

        let (control_tx, control_rx) = mpsc::channel(4);
        let task = tokio::spawn(supervise(
            id,
            server_id.to_string(),
            child,
            stdin,
            self.config.stop_command.clone(),
            control_rx,
            drains,
            events,
        ));

        info!(server_id, process = %id, pid = ?pid, "server process started");

        Ok(ProcessHandle {
            id,
            server_id: server_id.to_string(),
            pid,
            control: control_tx,
            task,
        })
    }
}

/// Exclusive handle to a running process.
#[derive(Debug)]
pub struct ProcessHandle {
    id: ProcessId,
    server_id: String,
    pid: Option<u32>,
    control: mpsc::Sender<Control>,
    task: JoinHandle<ProcessExit>,
}

impl ProcessHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the process has exited and been reaped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the server to shut down, killing it if it has not exited
    /// within `timeout`. Resolves once the process is gone.
    pub async fn stop(self, timeout: Duration) -> StopOutcome {
        self.request(|reply| Control::Stop { timeout, reply }).await
    }

    /// Kill the process immediately.
    pub async fn kill(self) -> StopOutcome {
        self.request(|reply| Control::Kill { reply }).await
    }

    async fn request(
        self,
        make: impl FnOnce(oneshot::Sender<StopOutcome>) -> Control,
    ) -> StopOutcome {
        let (tx, rx) = oneshot::channel();
        let reply = match self.control.send(make(tx)).await {
            Ok(()) => rx.await.ok(),
            Err(_) => None,
        };
        // No reply means the task finished without reading the request.
        let exit = self.task.await.unwrap_or(ProcessExit {
            code: None,
            success: false,
            requested: false,
        });
        reply.unwrap_or(StopOutcome::AlreadyExited { exit })
    }
}

async fn drain_output<R>(
    process: ProcessId,
    server_id: String,
    stream: OutputStream,
    reader: R,
    log: Arc<Mutex<File>>,
    probe: Option<Arc<dyn ReadinessProbe>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut ready = false;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(server_id = %server_id, ?stream, error = %e, "console read failed");
                break;
            }
        };

        {
            let mut file = log.lock().await;
            let written = async {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(server_id = %server_id, error = %e, "failed to append to console log");
            }
        }

        debug!(server_id = %server_id, ?stream, "{line}");

        let became_ready =
            !ready && probe.as_ref().is_some_and(|probe| probe.is_ready(&line));

        let _ = events.send(ProcessEvent::Output {
            process,
            stream,
            line,
        });

        if became_ready {
            ready = true;
            info!(server_id = %server_id, process = %process, "server reported ready");
            let _ = events.send(ProcessEvent::Ready { process });
        }
    }
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Command(Option<Control>),
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    process: ProcessId,
    server_id: String,
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    stop_command: String,
    mut control: mpsc::Receiver<Control>,
    drains: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) -> ProcessExit {
    let wake = tokio::select! {
        status = child.wait() => Wake::Exited(status),
        cmd = control.recv() => Wake::Command(cmd),
    };

    let (exit, reply) = match wake {
        Wake::Exited(status) => (exit_from(status, false), None),
        Wake::Command(Some(Control::Stop { timeout, reply })) => {
            send_stop(&server_id, stdin.take(), &stop_command).await;
            match time::timeout(timeout, child.wait()).await {
                Ok(status) => {
                    let exit = exit_from(status, true);
                    (exit, Some((reply, StopOutcome::Graceful { code: exit.code })))
                }
                Err(_) => {
                    warn!(server_id = %server_id, ?timeout, "graceful stop timed out, killing process");
                    (force_kill(&server_id, &mut child).await, Some((reply, StopOutcome::Forced)))
                }
            }
        }
        Wake::Command(Some(Control::Kill { reply })) => {
            (force_kill(&server_id, &mut child).await, Some((reply, StopOutcome::Forced)))
        }
        Wake::Command(None) => {
            debug!(server_id = %server_id, "process handle dropped, killing process");
            (force_kill(&server_id, &mut child).await, None)
        }
    };
    drop(stdin);

    for drain in drains {
        if time::timeout(DRAIN_GRACE, drain).await.is_err() {
            debug!(server_id = %server_id, "console drain still open after exit");
        }
    }

    if exit.requested {
        info!(server_id = %server_id, process = %process, code = ?exit.code, "server process stopped");
    } else {
        warn!(server_id = %server_id, process = %process, code = ?exit.code, "server process exited unexpectedly");
    }

    let _ = events.send(ProcessEvent::Exited { process, exit });
    if let Some((reply, outcome)) = reply {
        let _ = reply.send(outcome);
    }
    exit
}

async fn send_stop(server_id: &str, stdin: Option<ChildStdin>, command: &str) {
    let Some(mut stdin) = stdin else {
        return;
    };
    let line = format!("{command}\n");
    let written = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }
    .await;
    if let Err(e) = written {
        warn!(server_id, error = %e, "failed to send stop command");
    }
}

async fn force_kill(server_id: &str, child: &mut Child) -> ProcessExit {
    if let Err(e) = child.kill().await {
        warn!(server_id, error = %e, "failed to kill server process");
    }
    exit_from(child.wait().await, true)
}

fn exit_from(status: std::io::Result<ExitStatus>, requested: bool) -> ProcessExit {
    match status {
        Ok(status) => ProcessExit {
            code: status.code(),
            success: status.success(),
            requested,
        },
        Err(_) => ProcessExit {
            code: None,
            success: false,
            requested,
        },
    }
}
