use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::GateError;
use crate::inputs::TargetRoot;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Validate,
    Report,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Validate => "validate",
            ToolKind::Report => "report",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one tool run. The output is opaque text: stdout followed by
/// stderr, otherwise untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationResult {
    pub tool: ToolKind,
    pub exit_code: i32,
    pub output: String,
}

impl InvocationResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Configured arguments plus `--root <path>` unless the target is the
    /// default root.
    pub fn args_for(&self, target: &TargetRoot) -> Vec<String> {
        let mut args = self.args.clone();
        if let TargetRoot::Path(path) = target {
            args.push("--root".to_owned());
            args.push(path.clone());
        }
        args
    }
}

pub trait ToolRunner {
    fn run(
        &self,
        tool: ToolKind,
        command: &ToolCommand,
        target: &TargetRoot,
    ) -> Result<InvocationResult, GateError>;
}

/// Runs tools as child processes and waits for them synchronously.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    capture_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            capture_dir: None,
        }
    }

    pub fn with_capture_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.capture_dir = dir;
        self
    }
}

impl ToolRunner for ProcessRunner {
    fn run(
        &self,
        tool: ToolKind,
        command: &ToolCommand,
        target: &TargetRoot,
    ) -> Result<InvocationResult, GateError> {
        let args = command.args_for(target);
        info!(
            target: "waf_gate.invoke",
            %tool,
            program = %command.program,
            ?args,
            "running tool"
        );

        let mut child = Command::new(&command.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| GateError::ToolLaunch {
                tool,
                program: command.program.clone(),
                source,
            })?;

        let deadline = Instant::now() + self.timeout;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let timed_out = || {
            warn!(target: "waf_gate.invoke", %tool, timeout_secs = self.timeout.as_secs(), "tool timed out");
            GateError::ToolTimeout {
                tool,
                after: self.timeout,
            }
        };

        let status = wait_until(&mut child, deadline)
            .map_err(|source| GateError::ToolIo { tool, source })?;
        let Some(status) = status else {
            // Reader threads are left detached; a grandchild may still hold
            // the pipes open.
            let _ = child.kill();
            let _ = child.wait();
            return Err(timed_out());
        };

        // A background process left behind by the tool can keep the pipes
        // open after the tool itself exits; the deadline covers that too.
        let mut bytes = match collect(&stdout, deadline) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(timed_out()),
            Err(source) => return Err(GateError::ToolIo { tool, source }),
        };
        match collect(&stderr, deadline) {
            Ok(Some(more)) => bytes.extend(more),
            Ok(None) => return Err(timed_out()),
            Err(source) => return Err(GateError::ToolIo { tool, source }),
        }
        let output = String::from_utf8_lossy(&bytes).into_owned();
        let exit_code = exit_code_of(tool, status);

        info!(target: "waf_gate.invoke", %tool, exit_code, bytes = output.len(), "tool finished");

        if let Some(dir) = &self.capture_dir {
            match write_capture(dir, tool, &output) {
                Ok(path) => {
                    debug!(target: "waf_gate.invoke", %tool, path = %path.display(), "captured output saved")
                }
                Err(err) => {
                    warn!(target: "waf_gate.invoke", %tool, error = %err, "could not save captured output")
                }
            }
        }

        Ok(InvocationResult {
            tool,
            exit_code,
            output,
        })
    }
}

fn drain<R>(pipe: Option<R>) -> Receiver<io::Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let read = match pipe {
            Some(mut pipe) => pipe.read_to_end(&mut buf).map(|_| buf),
            None => Ok(buf),
        };
        let _ = tx.send(read);
    });
    rx
}

/// `Ok(None)` when the pipe is still open at the deadline.
fn collect(rx: &Receiver<io::Result<Vec<u8>>>, deadline: Instant) -> io::Result<Option<Vec<u8>>> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(read) => read.map(Some),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
            io::ErrorKind::Other,
            "output reader stopped without a result",
        )),
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn exit_code_of(tool: ToolKind, status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => {
            warn!(target: "waf_gate.invoke", %tool, %status, "tool terminated without an exit code");
            1
        }
    }
}

fn write_capture(dir: &Path, tool: ToolKind, output: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let path = dir.join(format!("{tool}-{stamp}.log"));
    fs::write(&path, output)?;
    Ok(path)
}
