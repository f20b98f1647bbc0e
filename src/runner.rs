// src/runner.rs
//! Process Supervisor
//!
//! Runs one sqlmap invocation at a time, streams its merged stdout/stderr as
//! line events while it runs, and turns the finished stream into a
//! `ScanResult`. Cancellation is cooperative first (terminate signal), then
//! forceful, each phase bounded by its own grace period.

use log::{debug, info, warn};
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::command::ScanCommand;
use crate::models::ScanResult;
use crate::parser::OutputInterpreter;

/// How long output is still read after the child has exited
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Lifecycle of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::Idle => "IDLE",
            SupervisorState::Starting => "STARTING",
            SupervisorState::Running => "RUNNING",
            SupervisorState::Completed => "COMPLETED",
            SupervisorState::Failed => "FAILED",
            SupervisorState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorState::Completed | SupervisorState::Failed | SupervisorState::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SupervisorState::Starting | SupervisorState::Running)
    }
}

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a terminate request is given before escalating
    pub grace_period: Duration,

    /// How long to wait after a forceful kill
    pub kill_grace_period: Duration,

    /// Packaged distribution directory; prepended to the child's PYTHONPATH
    pub bundle_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            kill_grace_period: Duration::from_secs(2),
            bundle_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a scan is already running under this supervisor")]
    AlreadyRunning,

    #[error("cannot start an empty command")]
    EmptyCommand,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Events delivered to the single consumer of a run
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// The child was spawned
    Started { pid: Option<u32> },

    /// One line of merged output, trailing whitespace removed
    Line(String),

    /// Always the last event of a run
    Finished(ScanResult),
}

/// Receiving side of a run's event channel.
#[derive(Debug)]
pub struct ScanEvents {
    rx: mpsc::UnboundedReceiver<ScanEvent>,
}

impl ScanEvents {
    pub async fn recv(&mut self) -> Option<ScanEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<ScanEvent> {
        UnboundedReceiverStream::new(self.rx)
    }

    /// Drains the remaining events and returns the final result.
    pub async fn result(mut self) -> Option<ScanResult> {
        while let Some(event) = self.rx.recv().await {
            if let ScanEvent::Finished(result) = event {
                return Some(result);
            }
        }
        None
    }
}

/// Owns at most one child process at a time.
pub struct ScanSupervisor {
    config: SupervisorConfig,
    state: Arc<watch::Sender<SupervisorState>>,
    cancel_tx: Mutex<Option<oneshot::Sender<()>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl ScanSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            config,
            state: Arc::new(state),
            cancel_tx: Mutex::new(None),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Message of the last spawn failure or abnormal exit
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Spawns `command` and returns its event stream. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, command: &ScanCommand) -> Result<ScanEvents, SupervisorError> {
        let program = command.program().ok_or(SupervisorError::EmptyCommand)?.to_string();

        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if state.is_active() {
                return false;
            }
            *state = SupervisorState::Starting;
            claimed = true;
            true
        });
        if !claimed {
            return Err(SupervisorError::AlreadyRunning);
        }
        set_error(&self.last_error, None);

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let spawned = self.spawn_merged(&program, command, line_tx);
        let (child, reader) = match spawned {
            Ok(spawned) => spawned,
            Err(source) => {
                let err = SupervisorError::Spawn { program, source };
                warn!("{}", err);
                set_error(&self.last_error, Some(err.to_string()));
                self.transition(SupervisorState::Failed);
                return Err(err);
            }
        };

        let pid = child.id();
        info!("Started {} (pid {:?})", program, pid);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        if let Ok(mut slot) = self.cancel_tx.lock() {
            *slot = Some(cancel_tx);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.transition(SupervisorState::Running);
        let _ = event_tx.send(ScanEvent::Started { pid });

        let run = Run {
            child,
            lines: line_rx,
            cancel: cancel_rx,
            events: event_tx,
            reader,
            state: self.state.clone(),
            last_error: self.last_error.clone(),
            command: command.as_slice().to_vec(),
            grace_period: self.config.grace_period,
            kill_grace_period: self.config.kill_grace_period,
        };
        tokio::spawn(run.drive());

        Ok(ScanEvents { rx: event_rx })
    }

    /// Spawns the child with stdout and stderr sharing one pipe, so lines
    /// arrive in the order they were written, and starts the line reader.
    fn spawn_merged(
        &self,
        program: &str,
        command: &ScanCommand,
        lines: mpsc::UnboundedSender<String>,
    ) -> io::Result<(Child, JoinHandle<()>)> {
        let (output, writer) = io::pipe()?;
        let writer_err = writer.try_clone()?;
        let output = OutputReader::new(output)?;

        let mut cmd = Command::new(program);
        cmd.args(command.arguments())
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err)
            .kill_on_drop(true);
        if let Some(bundle) = &self.config.bundle_dir {
            cmd.env("PYTHONPATH", python_path(bundle));
        }

        let spawned = cmd.spawn();
        // Close the parent's write ends, or the reader never sees EOF.
        drop(cmd);
        let child = spawned?;

        Ok((child, output.forward(lines)))
    }

    /// Requests termination of the running child and waits until the run is
    /// over. A no-op when nothing is running. Termination failures are
    /// swallowed.
    pub async fn cancel(&self) {
        let sender = self.cancel_tx.lock().ok().and_then(|mut slot| slot.take());
        let Some(sender) = sender else {
            debug!("Cancel requested with no active process");
            return;
        };
        if self.state().is_terminal() {
            return;
        }

        info!("Cancellation requested");
        if sender.send(()).is_err() {
            // Run already finished on its own.
            return;
        }

        let deadline = self.config.grace_period + self.config.kill_grace_period + Duration::from_secs(1);
        let mut rx = self.state.subscribe();
        if timeout(deadline, rx.wait_for(SupervisorState::is_terminal)).await.is_err() {
            warn!("Run did not report a terminal state within {:?}", deadline);
        }
    }

    /// Waits for the current run to reach a terminal state.
    pub async fn wait(&self) -> SupervisorState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal() || *s == SupervisorState::Idle).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    fn transition(&self, next: SupervisorState) {
        debug!("Supervisor -> {}", next.as_str());
        self.state.send_replace(next);
    }
}

impl Default for ScanSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

/// Everything the background driver owns for one run
struct Run {
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
    cancel: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ScanEvent>,
    reader: JoinHandle<()>,
    state: Arc<watch::Sender<SupervisorState>>,
    last_error: Arc<Mutex<Option<String>>>,
    command: Vec<String>,
    grace_period: Duration,
    kill_grace_period: Duration,
}

impl Run {
    async fn drive(self) {
        let Run {
            mut child,
            mut lines,
            mut cancel,
            events,
            reader,
            state,
            last_error,
            command,
            grace_period,
            kill_grace_period,
        } = self;

        let mut interpreter = OutputInterpreter::new();
        let mut streaming = true;
        let mut cancellable = true;
        let mut exit: Option<io::Result<ExitStatus>> = None;
        let mut drain_deadline: Option<Instant> = None;

        let cancelled = loop {
            if streaming && drain_deadline.is_some_and(|d| Instant::now() >= d) {
                // A descendant still holds the pipe open.
                debug!("Output still open {:?} after exit, no longer reading", OUTPUT_DRAIN);
                streaming = false;
            }
            if !streaming && exit.is_some() {
                break false;
            }
            let drain_at = drain_deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                signal = &mut cancel, if cancellable => match signal {
                    Ok(()) => break true,
                    // Supervisor dropped; nobody can cancel any more.
                    Err(_) => cancellable = false,
                },
                line = lines.recv(), if streaming => match line {
                    Some(line) => {
                        interpreter.feed(&line);
                        let _ = events.send(ScanEvent::Line(line));
                    }
                    None => streaming = false,
                },
                status = child.wait(), if exit.is_none() => {
                    exit = Some(status);
                    drain_deadline = Some(Instant::now() + OUTPUT_DRAIN);
                }
                _ = sleep_until(drain_at), if streaming && drain_deadline.is_some() => {}
            }
        };
        reader.abort();

        let (next, result) = if cancelled {
            terminate(&mut child, grace_period, kill_grace_period).await;
            info!("Scan cancelled");
            (SupervisorState::Cancelled, ScanResult::cancelled(interpreter.lines()))
        } else {
            match exit {
                Some(Ok(status)) if status.success() => {
                    info!("sqlmap exited successfully");
                    let mut result = interpreter.finish(&command);
                    result.exit_code = Some(0);
                    (SupervisorState::Completed, result)
                }
                Some(Ok(status)) => {
                    let message = match status.code() {
                        Some(code) => format!("Process exited with code {}", code),
                        None => format!("Process terminated abnormally ({})", status),
                    };
                    info!("{}", message);
                    set_error(&last_error, Some(message.clone()));
                    (
                        SupervisorState::Failed,
                        ScanResult::failed(message, status.code(), interpreter.lines()),
                    )
                }
                Some(Err(e)) => {
                    let message = format!("Failed to wait for process: {}", e);
                    warn!("{}", message);
                    set_error(&last_error, Some(message.clone()));
                    (SupervisorState::Failed, ScanResult::failed(message, None, interpreter.lines()))
                }
                None => {
                    let message = "Process exit status unavailable".to_string();
                    set_error(&last_error, Some(message.clone()));
                    (SupervisorState::Failed, ScanResult::failed(message, None, interpreter.lines()))
                }
            }
        };

        debug!("Supervisor -> {}", next.as_str());
        state.send_replace(next);
        let _ = events.send(ScanEvent::Finished(result));
    }
}

/// Terminate, wait `grace`, kill, wait `kill_grace`. Errors are logged only.
async fn terminate(child: &mut Child, grace: Duration, kill_grace: Duration) {
    if let Err(e) = request_terminate(child) {
        debug!("Terminate request failed: {}", e);
    }
    if timeout(grace, child.wait()).await.is_ok() {
        return;
    }

    warn!("Process still running after {:?}, killing", grace);
    if let Err(e) = child.start_kill() {
        debug!("Kill failed: {}", e);
    }
    if timeout(kill_grace, child.wait()).await.is_err() {
        warn!("Process not reaped {:?} after kill, assuming gone", kill_grace);
    }
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from),
        // Already reaped
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Read end of the merged stdout/stderr pipe
struct OutputReader {
    #[cfg(unix)]
    inner: tokio::net::unix::pipe::Receiver,
    #[cfg(not(unix))]
    inner: io::PipeReader,
}

impl OutputReader {
    #[cfg(unix)]
    fn new(reader: io::PipeReader) -> io::Result<Self> {
        use std::os::fd::OwnedFd;

        let inner = tokio::net::unix::pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
        Ok(Self { inner })
    }

    #[cfg(not(unix))]
    fn new(reader: io::PipeReader) -> io::Result<Self> {
        Ok(Self { inner: reader })
    }

    /// Forwards each line (and a final unterminated fragment) until EOF.
    #[cfg(unix)]
    fn forward(self, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        tokio::spawn(async move {
            let mut reader = BufReader::new(self.inner);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(decode_line(&buf)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Output read failed: {}", e);
                        break;
                    }
                }
            }
        })
    }

    #[cfg(not(unix))]
    fn forward(self, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()> {
        use std::io::{BufRead, BufReader};

        tokio::task::spawn_blocking(move || {
            let mut reader = BufReader::new(self.inner);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(decode_line(&buf)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Output read failed: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

fn decode_line(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).trim_end().to_string()
}

fn python_path(bundle: &Path) -> OsString {
    let mut paths = vec![bundle.to_path_buf()];
    if let Some(existing) = env::var_os("PYTHONPATH") {
        paths.extend(env::split_paths(&existing));
    }
    env::join_paths(paths).unwrap_or_else(|_| bundle.as_os_str().to_owned())
}

fn set_error(slot: &Mutex<Option<String>>, value: Option<String>) {
    if let Ok(mut guard) = slot.lock() {
        *guard = value;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::ScanStatus;
    use std::time::Instant;

    fn sh(script: &str) -> ScanCommand {
        ScanCommand::new(["sh", "-c", script])
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            grace_period: Duration::from_millis(300),
            kill_grace_period: Duration::from_millis(300),
            bundle_dir: None,
        }
    }

    async fn collect(mut events: ScanEvents) -> (Vec<String>, Option<ScanResult>) {
        let mut lines = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                ScanEvent::Line(line) => lines.push(line),
                ScanEvent::Finished(result) => return (lines, Some(result)),
                ScanEvent::Started { .. } => {}
            }
        }
        (lines, None)
    }

    #[tokio::test]
    async fn test_completed_run_is_interpreted() {
        let supervisor = ScanSupervisor::default();
        let events = supervisor
            .start(&sh(
                "echo '[INFO] the back-end DBMS is MySQL'; \
                 echo '[CRITICAL] sqlmap identified the following injection point(s):'; \
                 echo '[PAYLOAD] Parameter: id (GET)'; \
                 printf 'partial tail'",
            ))
            .unwrap();

        let (lines, result) = collect(events).await;
        let result = result.unwrap();

        assert_eq!(lines.last().map(String::as_str), Some("partial tail"));
        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.dbms, "MySQL");
        assert!(result.vulnerable);
        assert_eq!(result.vulnerabilities[0].parameter, "id");
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(supervisor.state(), SupervisorState::Completed);
    }

    #[tokio::test]
    async fn test_stderr_is_merged() {
        let supervisor = ScanSupervisor::default();
        let events = supervisor.start(&sh("echo out; echo err >&2")).unwrap();
        let (lines, _) = collect(events).await;
        assert!(lines.contains(&"out".to_string()));
        assert!(lines.contains(&"err".to_string()));
    }

    #[tokio::test]
    async fn test_merged_output_keeps_emission_order() {
        let supervisor = ScanSupervisor::default();
        let events = supervisor
            .start(&sh("for i in $(seq 1 50); do echo \"o$i\"; echo \"e$i\" >&2; done"))
            .unwrap();

        let (lines, result) = collect(events).await;
        let expected: Vec<String> = (1..=50)
            .flat_map(|i| [format!("o{}", i), format!("e{}", i)])
            .collect();
        assert_eq!(lines, expected);
        assert_eq!(result.unwrap().status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn test_retrieved_value_on_stderr_stays_in_section() {
        let supervisor = ScanSupervisor::default();
        let events = supervisor
            .start(&sh(
                "echo '[INFO] fetching current user'; \
                 echo '[INFO] retrieved: root@localhost' >&2; \
                 echo '[INFO] fetching database server version'; \
                 echo '[INFO] retrieved: 15.4' >&2",
            ))
            .unwrap();

        let result = events.result().await.unwrap();
        assert_eq!(result.database_info.get("current_user"), Some("root@localhost"));
        assert_eq!(result.database_info.get("version"), Some("15.4"));
        assert!(!result.vulnerable);
    }

    #[tokio::test]
    async fn test_background_descendant_does_not_block_completion() {
        let supervisor = ScanSupervisor::default();
        let events = supervisor.start(&sh("sleep 8 & echo done; exit 0")).unwrap();

        let (lines, result) = timeout(Duration::from_secs(3), collect(events))
            .await
            .expect("run should finish once the direct child exits");
        assert_eq!(lines, vec!["done".to_string()]);
        assert_eq!(result.unwrap().status, ScanStatus::Completed);
        assert_eq!(supervisor.state(), SupervisorState::Completed);
    }

    #[tokio::test]
    async fn test_events_as_stream() {
        use tokio_stream::StreamExt;

        let supervisor = ScanSupervisor::default();
        let mut stream = supervisor.start(&sh("echo one; echo two")).unwrap().into_stream();

        assert!(matches!(stream.next().await, Some(ScanEvent::Started { pid: Some(_) })));
        let mut lines = Vec::new();
        let mut finished = None;
        while let Some(event) = stream.next().await {
            match event {
                ScanEvent::Line(line) => lines.push(line),
                ScanEvent::Finished(result) => finished = Some(result),
                ScanEvent::Started { .. } => panic!("started twice"),
            }
        }
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(finished.unwrap().status, ScanStatus::Completed);
        assert_eq!(supervisor.wait().await, SupervisorState::Completed);
    }

    #[tokio::test]
    async fn test_lines_arrive_before_exit() {
        let supervisor = ScanSupervisor::default();
        let mut events = supervisor.start(&sh("echo first; sleep 3; echo second")).unwrap();

        let first = timeout(Duration::from_millis(2000), async {
            loop {
                match events.recv().await {
                    Some(ScanEvent::Line(line)) => return Some(line),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .expect("first line should be streamed while the process runs");
        assert_eq!(first.as_deref(), Some("first"));
        assert_eq!(supervisor.state(), SupervisorState::Running);

        supervisor.cancel().await;
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_regardless_of_output() {
        let supervisor = ScanSupervisor::default();
        let events = supervisor
            .start(&sh("echo '[CRITICAL] sqlmap identified the following injection point(s):'; exit 3"))
            .unwrap();

        let result = events.result().await.unwrap();
        assert_eq!(result.status, ScanStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.error.as_deref(), Some("Process exited with code 3"));
        assert!(!result.vulnerable);
        assert!(result.raw_output.contains("identified"));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
        assert_eq!(supervisor.last_error().as_deref(), Some("Process exited with code 3"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let supervisor = ScanSupervisor::default();
        let err = supervisor
            .start(&ScanCommand::new(["/nonexistent/dir/sqlmap-missing"]))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert_eq!(supervisor.state(), SupervisorState::Failed);
        assert!(supervisor.last_error().is_some());
    }

    #[tokio::test]
    async fn test_empty_command() {
        let supervisor = ScanSupervisor::default();
        let err = supervisor.start(&ScanCommand::default()).unwrap_err();
        assert!(matches!(err, SupervisorError::EmptyCommand));
        assert_eq!(supervisor.state(), SupervisorState::Idle);
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_running() {
        let supervisor = ScanSupervisor::new(fast_config());
        let _events = supervisor.start(&sh("exec sleep 30")).unwrap();
        assert!(matches!(
            supervisor.start(&sh("true")),
            Err(SupervisorError::AlreadyRunning)
        ));
        supervisor.cancel().await;
        assert_eq!(supervisor.state(), SupervisorState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_escalates_when_terminate_ignored() {
        let supervisor = ScanSupervisor::new(fast_config());
        let mut events = supervisor.start(&sh("trap '' TERM; echo ready; exec sleep 30")).unwrap();

        loop {
            match events.recv().await {
                Some(ScanEvent::Line(line)) if line == "ready" => break,
                Some(_) => continue,
                None => panic!("stream ended before ready"),
            }
        }

        let started = Instant::now();
        supervisor.cancel().await;
        assert_eq!(supervisor.state(), SupervisorState::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));

        let result = events.result().await.unwrap();
        assert_eq!(result.status, ScanStatus::Cancelled);
        assert!(result.raw_output.contains("ready"));
    }

    #[tokio::test]
    async fn test_cancel_with_default_grace_periods() {
        let supervisor = ScanSupervisor::default();
        let _events = supervisor.start(&sh("exec sleep 30")).unwrap();

        let started = Instant::now();
        supervisor.cancel().await;
        assert_eq!(supervisor.state(), SupervisorState::Cancelled);
        assert!(started.elapsed() <= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_cancel_is_noop_when_idle_or_finished() {
        let supervisor = ScanSupervisor::default();
        supervisor.cancel().await;
        assert_eq!(supervisor.state(), SupervisorState::Idle);

        let events = supervisor.start(&sh("echo done")).unwrap();
        events.result().await.unwrap();
        supervisor.cancel().await;
        supervisor.cancel().await;
        assert_eq!(supervisor.state(), SupervisorState::Completed);
    }

    #[tokio::test]
    async fn test_restart_after_terminal_state() {
        let supervisor = ScanSupervisor::default();
        supervisor.start(&sh("exit 1")).unwrap().result().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Failed);

        let result = supervisor.start(&sh("echo again")).unwrap().result().await.unwrap();
        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(supervisor.last_error(), None);
    }

    #[tokio::test]
    async fn test_bundle_dir_extends_python_path() {
        let supervisor = ScanSupervisor::new(SupervisorConfig {
            bundle_dir: Some(PathBuf::from("/opt/sqlmapper-bundle")),
            ..Default::default()
        });
        let (lines, _) = collect(supervisor.start(&sh("echo \"$PYTHONPATH\"")).unwrap()).await;
        assert!(lines[0].starts_with("/opt/sqlmapper-bundle"));
    }
}
