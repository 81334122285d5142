//! Process supervisor.
//!
//! Every configured provider gets one worker task that owns its child process for its whole
//! life: spawn, handshake, registration, monitoring, restart with backoff, and termination.
//! State changes are published on a `watch` channel per provider.
//!
//! ```text
//! starting -> ready -> disconnected -> restarting -> starting ...
//!                            \-> failed (restarts exhausted)
//! any state -> stopped (shutdown)
//! ```

use crate::config::{ProviderConfig, RestartPolicy, TimeoutConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::ToolRegistry;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toolgate_mcp::{ProviderSession, TransportChannel};
use tracing::{debug, error, info, warn};

/// How long to wait for the provider to take its end-of-input before signalling it.
const CLOSE_INPUT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    Starting,
    Ready,
    Disconnected,
    Restarting,
    Failed,
    Stopped,
}

impl ProviderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

/// Point-in-time view of one provider process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub state: ProviderState,
    pub restart_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pid: Option<u32>,
    pub tool_count: usize,
}

impl ProviderStatus {
    fn starting(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: ProviderState::Starting,
            restart_count: 0,
            last_failure: None,
            last_error: None,
            pid: None,
            tool_count: 0,
        }
    }
}

struct ProviderHandle {
    name: String,
    status: watch::Receiver<ProviderStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Starts, monitors, and restarts provider subprocesses.
pub struct Supervisor {
    registry: Arc<ToolRegistry>,
    restart: RestartPolicy,
    timeouts: TimeoutConfig,
    providers: RwLock<Vec<ProviderHandle>>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(registry: Arc<ToolRegistry>, restart: RestartPolicy, timeouts: TimeoutConfig) -> Self {
        Self {
            registry,
            restart,
            timeouts,
            providers: RwLock::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Launch a provider in the background. Returns once its worker is running; use
    /// [`wait_for`](Self::wait_for) to observe it becoming ready.
    pub fn start(&self, config: ProviderConfig) -> GatewayResult<()> {
        config.validate()?;
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::ProviderStartupFailure {
                provider: config.name,
                reason: "gateway is shutting down".to_string(),
            });
        }

        let mut providers = self.providers.write();
        if providers.iter().any(|p| p.name == config.name) {
            return Err(GatewayError::Config(format!(
                "provider '{}' is already running",
                config.name
            )));
        }

        let (status_tx, status_rx) = watch::channel(ProviderStatus::starting(&config.name));
        let name = config.name.clone();
        let worker = Worker {
            config,
            registry: Arc::clone(&self.registry),
            restart: self.restart,
            timeouts: self.timeouts,
            status: status_tx,
            shutdown: self.shutdown.clone(),
        };
        let task = tokio::spawn(worker.run());

        providers.push(ProviderHandle {
            name,
            status: status_rx,
            task: Mutex::new(Some(task)),
        });
        Ok(())
    }

    /// Status of every provider, in start order.
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.providers
            .read()
            .iter()
            .map(|p| p.status.borrow().clone())
            .collect()
    }

    pub fn status(&self, name: &str) -> Option<ProviderStatus> {
        self.providers
            .read()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.status.borrow().clone())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.name.clone()).collect()
    }

    /// Wait until `name`'s status satisfies `predicate`, or `timeout` elapses.
    ///
    /// Returns `None` for an unknown provider or on timeout.
    pub async fn wait_for<F>(&self, name: &str, predicate: F, timeout: Duration) -> Option<ProviderStatus>
    where
        F: FnMut(&ProviderStatus) -> bool,
    {
        let mut status = self
            .providers
            .read()
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.status.clone())?;

        let matched = match tokio::time::timeout(timeout, status.wait_for(predicate)).await {
            Ok(Ok(matched)) => Some(matched.clone()),
            _ => None,
        };
        matched
    }

    /// Stop every provider: pending calls fail with `ProviderDisconnected`, then each process
    /// group gets SIGTERM and is killed if it outlives the grace period.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down {} providers", self.providers.read().len());
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .providers
            .read()
            .iter()
            .filter_map(|p| p.task.lock().take())
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("provider worker ended abnormally: {}", e);
            }
        }
    }
}

/// A provider process that completed its handshake.
struct Running {
    child: Child,
    session: Arc<ProviderSession>,
    pid: Option<u32>,
}

enum Exit {
    Failed(String),
    Shutdown,
}

struct Worker {
    config: ProviderConfig,
    registry: Arc<ToolRegistry>,
    restart: RestartPolicy,
    timeouts: TimeoutConfig,
    status: watch::Sender<ProviderStatus>,
    shutdown: CancellationToken,
}

impl Worker {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn run(self) {
        let mut restarts = 0u32;

        loop {
            self.status.send_modify(|s| {
                s.state = ProviderState::Starting;
                s.pid = None;
                s.tool_count = 0;
            });

            let exit = match self.launch().await {
                Ok(running) => self.supervise(running).await,
                Err(exit) => exit,
            };

            let reason = match exit {
                Exit::Shutdown => break,
                Exit::Failed(reason) => reason,
            };

            self.status.send_modify(|s| {
                s.state = ProviderState::Disconnected;
                s.last_failure = Some(Utc::now());
                s.last_error = Some(reason.clone());
                s.pid = None;
                s.tool_count = 0;
            });
            if self.shutdown.is_cancelled() {
                break;
            }

            if restarts >= self.restart.max_restarts {
                error!(
                    provider = %self.name(),
                    restarts,
                    error = %reason,
                    "provider failed permanently; restarts exhausted"
                );
                self.status.send_modify(|s| s.state = ProviderState::Failed);
                return;
            }

            restarts += 1;
            let delay = self.restart.backoff_for_attempt(restarts);
            warn!(
                provider = %self.name(),
                attempt = restarts,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "provider exited; restarting"
            );
            self.status.send_modify(|s| {
                s.state = ProviderState::Restarting;
                s.restart_count = restarts;
            });

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(provider = %self.name(), "provider stopped");
        self.status.send_modify(|s| {
            s.state = ProviderState::Stopped;
            s.pid = None;
            s.tool_count = 0;
        });
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            command.current_dir(cwd);
        }
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Spawn the process and run the handshake. On success the session is registered.
    async fn launch(&self) -> Result<Running, Exit> {
        let name = self.name().to_string();
        info!(provider = %name, command = %self.config.command, "starting provider");

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Exit::Failed(format!("failed to spawn '{}': {}", self.config.command, e)))?;
        let pid = child.id();

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(Exit::Failed("provider stdio was not captured".to_string()));
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(name.clone(), stderr));
        }

        let session = ProviderSession::start(TransportChannel::new(&name, stdout, stdin, self.config.framing));

        let initialized = tokio::select! {
            result = session.initialize(self.timeouts.init_timeout()) => result,
            _ = self.shutdown.cancelled() => {
                session.close();
                self.terminate(&mut child, &session, pid).await;
                return Err(Exit::Shutdown);
            }
        };

        let registered = initialized
            .map_err(|e| format!("initialization failed: {}", e))
            .and_then(|_| self.registry.register(&session).map_err(|e| e.to_string()));
        let tool_count = match registered {
            Ok(count) => count,
            Err(reason) => {
                session.close();
                reap(&mut child, pid).await;
                return Err(Exit::Failed(reason));
            }
        };

        info!(provider = %name, pid = ?pid, tools = tool_count, "provider ready");
        self.status.send_modify(|s| {
            s.state = ProviderState::Ready;
            s.pid = pid;
            s.tool_count = tool_count;
        });

        Ok(Running { child, session, pid })
    }

    /// Wait for the provider to go away (or for shutdown), then clean up after it.
    async fn supervise(&self, running: Running) -> Exit {
        let Running {
            mut child,
            session,
            pid,
        } = running;

        let exit = tokio::select! {
            _ = session.closed() => Exit::Failed("provider closed its output stream".to_string()),
            status = child.wait() => Exit::Failed(match status {
                Ok(status) => format!("provider exited with {}", status),
                Err(e) => format!("failed to wait for provider: {}", e),
            }),
            _ = self.shutdown.cancelled() => Exit::Shutdown,
        };

        self.registry.unregister(&session.id());
        session.close();

        match exit {
            Exit::Shutdown => self.terminate(&mut child, &session, pid).await,
            Exit::Failed(ref reason) => {
                debug!(provider = %self.name(), reason = %reason, "provider went away");
                reap(&mut child, pid).await;
            }
        }
        exit
    }

    /// Graceful stop: close stdin, SIGTERM the process group, SIGKILL after the grace period.
    async fn terminate(&self, child: &mut Child, session: &ProviderSession, pid: Option<u32>) {
        let _ = tokio::time::timeout(CLOSE_INPUT_TIMEOUT, session.close_input()).await;

        #[cfg(unix)]
        if let (Some(pid), Ok(None)) = (pid, child.try_wait()) {
            signal_group(pid, nix::sys::signal::Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(self.timeouts.shutdown_grace(), child.wait()).await {
            Ok(Ok(status)) => debug!(provider = %self.name(), "provider exited with {}", status),
            _ => {
                warn!(provider = %self.name(), "provider ignored SIGTERM; killing");
                reap(child, pid).await;
            }
        }
    }
}

/// Make sure the provider and anything it left in its process group are gone.
///
/// The group is only signalled while the leader is unreaped; after that its id may belong
/// to an unrelated process group.
async fn reap(child: &mut Child, pid: Option<u32>) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(pid = ?pid, "provider already exited with {}", status);
            return;
        }
        Ok(None) => {}
        Err(e) => debug!(pid = ?pid, "failed to poll provider: {}", e),
    }

    #[cfg(unix)]
    if let Some(pid) = pid {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!("kill after exit: {}", e);
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, "failed to send {:?} to process group: {}", signal, e),
    }
}

async fn drain_stderr(provider: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(provider = %provider, "stderr: {}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(provider = %provider, "stopped reading stderr: {}", e);
                break;
            }
        }
    }
}
