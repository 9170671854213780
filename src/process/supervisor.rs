//! Debuggee process supervision.
//!
//! Owned sessions spawn the interpreter with debugpy in listen-and-wait
//! mode, capture both output streams line by line, and classify what the
//! program prints. Termination is graceful first (SIGTERM), forced after a
//! grace period (SIGKILL).

use crate::bus::{DebugEvent, EventBus, OutputChannel};
use crate::{Error, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Noise the debugpy bootstrap prints on stderr before the program runs.
const BOOTSTRAP_MARKERS: &[&str] = &["debugpy", "Waiting for debugger"];

/// A line starting with any of these is program error output.
const ERROR_PREFIXES: &[&str] = &[
    "Traceback",
    "Exception",
    "TypeError:",
    "ValueError:",
    "KeyError:",
    "IndexError:",
    "AttributeError:",
    "NameError:",
    "SyntaxError:",
    "RuntimeError:",
    "ImportError:",
    "ModuleNotFoundError:",
    "FileNotFoundError:",
    "PermissionError:",
];

pub fn is_bootstrap_noise(line: &str) -> bool {
    BOOTSTRAP_MARKERS.iter().any(|marker| line.contains(marker))
}

pub fn classify_line(line: &str) -> OutputChannel {
    if ERROR_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        OutputChannel::Error
    } else {
        OutputChannel::Normal
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PythonSetupReport {
    pub python_available: bool,
    pub python_version: Option<String>,
    pub debugpy_available: bool,
}

/// Probe that the interpreter can import debugpy at all; called once
/// before the real spawn so a missing installation aborts early with a
/// dedicated error instead of a confusing connect timeout.
pub async fn probe_debugpy(python: &str) -> Result<()> {
    let output = Command::new(python)
        .args(["-c", "import debugpy"])
        .output()
        .await
        .map_err(|e| Error::PythonSetup(format!("failed to run {python}: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(Error::PythonSetup(format!(
            "debugpy is not installed for {python} (try: {python} -m pip install debugpy)"
        )))
    }
}

pub async fn check_python_setup(python: &str) -> PythonSetupReport {
    let version = match Command::new(python).arg("--version").output().await {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout);
            let text = if text.trim().is_empty() {
                String::from_utf8_lossy(&output.stderr)
            } else {
                text
            };
            Some(text.trim().to_string())
        }
        _ => None,
    };

    let debugpy_available = version.is_some() && probe_debugpy(python).await.is_ok();

    PythonSetupReport {
        python_available: version.is_some(),
        python_version: version,
        debugpy_available,
    }
}

pub struct ProcessSupervisor {
    session_id: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    bus: Arc<EventBus>,
}

impl ProcessSupervisor {
    /// Spawn `python -m debugpy --listen 127.0.0.1:<port> --wait-for-client
    /// <script> [args…]` with piped stdio and start the output readers.
    pub async fn spawn(
        python: &str,
        script: &str,
        script_args: &[String],
        cwd: Option<&Path>,
        extra_env: &HashMap<String, String>,
        port: u16,
        session_id: &str,
        bus: Arc<EventBus>,
    ) -> Result<Self> {
        let mut command = Command::new(python);
        command
            .arg("-m")
            .arg("debugpy")
            .arg("--listen")
            .arg(format!("127.0.0.1:{port}"))
            .arg("--wait-for-client")
            .arg(script)
            .args(script_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        for (key, value) in extra_env {
            command.env(key, value);
        }

        info!(
            "Spawning debuggee: {} -m debugpy --listen 127.0.0.1:{} --wait-for-client {}",
            python, port, script
        );

        let mut child = command
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {python}: {e}")))?;

        let pid = child.id();
        if let Some(pid) = pid {
            bus.publish(DebugEvent::ProcessSpawned {
                session_id: session_id.to_string(),
                pid,
            });
        }

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::read_output(
                stdout,
                OutputChannel::Normal,
                session_id.to_string(),
                bus.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::read_output(
                stderr,
                OutputChannel::Error,
                session_id.to_string(),
                bus.clone(),
            ));
        }

        Ok(Self {
            session_id: session_id.to_string(),
            pid,
            child: Mutex::new(Some(child)),
            bus,
        })
    }

    /// Capture one output stream line by line. Bootstrap noise is
    /// suppressed; everything else is classified and published. The
    /// stream's own channel is the floor: stdout lines may still be
    /// upgraded to the error channel by prefix match.
    async fn read_output<S: AsyncRead + Unpin + Send + 'static>(
        stream: S,
        stream_channel: OutputChannel,
        session_id: String,
        bus: Arc<EventBus>,
    ) {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let line = raw.trim();
            if line.is_empty() || is_bootstrap_noise(line) {
                debug!("suppressed bootstrap/empty line: {:?}", line);
                continue;
            }

            let channel = match stream_channel {
                OutputChannel::Error => OutputChannel::Error,
                OutputChannel::Normal => classify_line(line),
            };

            bus.publish(DebugEvent::ProgramOutput {
                session_id: session_id.clone(),
                channel,
                line: line.to_string(),
            });
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL. Publishes the
    /// observed exit.
    pub async fn terminate(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            debug!("sending SIGTERM to pid {}", pid);
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("SIGTERM to pid {} failed: {}", pid, e);
            }
        }

        let status = match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            Ok(result) => result.map_err(|e| Error::Process(format!("wait failed: {e}")))?,
            Err(_) => {
                warn!(
                    "debuggee did not exit within {:?}, sending SIGKILL",
                    TERMINATE_GRACE
                );
                child
                    .start_kill()
                    .map_err(|e| Error::Process(format!("SIGKILL failed: {e}")))?;
                child
                    .wait()
                    .await
                    .map_err(|e| Error::Process(format!("wait after SIGKILL failed: {e}")))?
            }
        };

        let exit_code = status.code();
        self.bus.publish(DebugEvent::ProcessExited {
            session_id: self.session_id.clone(),
            exit_code,
            normal: exit_code == Some(0),
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_noise_is_detected() {
        assert!(is_bootstrap_noise("I+00000.024: debugpy started"));
        assert!(is_bootstrap_noise("Waiting for debugger attach"));
        assert!(!is_bootstrap_noise("hello world"));
    }

    #[test]
    fn test_error_prefix_classification() {
        assert_eq!(
            classify_line("Traceback (most recent call last):"),
            OutputChannel::Error
        );
        assert_eq!(
            classify_line("ValueError: invalid literal for int()"),
            OutputChannel::Error
        );
        assert_eq!(
            classify_line("ModuleNotFoundError: No module named 'requests'"),
            OutputChannel::Error
        );
        assert_eq!(classify_line("processing item 3"), OutputChannel::Normal);
        // Prefix match, not substring: mentioning an error mid-line is not
        // error output.
        assert_eq!(
            classify_line("caught a ValueError: and recovered"),
            OutputChannel::Normal
        );
    }

    #[tokio::test]
    async fn test_read_output_suppresses_noise_and_classifies() {
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe();

        let data = b"Waiting for debugger attach\nhello\nKeyError: 'x'\n\n".to_vec();
        ProcessSupervisor::read_output(
            std::io::Cursor::new(data),
            OutputChannel::Normal,
            "s1".to_string(),
            bus.clone(),
        )
        .await;

        let first = rx.recv().unwrap();
        match first {
            DebugEvent::ProgramOutput { channel, line, .. } => {
                assert_eq!(channel, OutputChannel::Normal);
                assert_eq!(line, "hello");
            }
            other => panic!("Expected ProgramOutput, got {other:?}"),
        }

        let second = rx.recv().unwrap();
        match second {
            DebugEvent::ProgramOutput { channel, line, .. } => {
                assert_eq!(channel, OutputChannel::Error);
                assert_eq!(line, "KeyError: 'x'");
            }
            other => panic!("Expected ProgramOutput, got {other:?}"),
        }

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stderr_lines_stay_on_error_channel() {
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe();

        ProcessSupervisor::read_output(
            std::io::Cursor::new(b"plain stderr line\n".to_vec()),
            OutputChannel::Error,
            "s1".to_string(),
            bus.clone(),
        )
        .await;

        match rx.recv().unwrap() {
            DebugEvent::ProgramOutput { channel, .. } => {
                assert_eq!(channel, OutputChannel::Error)
            }
            other => panic!("Expected ProgramOutput, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_missing_interpreter_is_setup_error() {
        let err = probe_debugpy("definitely-not-a-python-binary")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PythonSetup(_)));
    }

    #[tokio::test]
    async fn test_check_setup_with_missing_interpreter() {
        let report = check_python_setup("definitely-not-a-python-binary").await;
        assert!(!report.python_available);
        assert!(!report.debugpy_available);
        assert!(report.python_version.is_none());
    }
}
