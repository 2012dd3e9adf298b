//! Builder for executing external tool commands under a deadline.
//!
//! [`ToolCommand::run`] is the spawn-with-deadline primitive: it never treats a
//! non-zero exit as an error, it kills and reaps the child when the deadline
//! passes (together with anything it forked), and it keeps only a bounded
//! prefix of stdout/stderr.
//! [`ToolCommand::execute`] layers the usual "non-zero exit is an error"
//! semantics on top for short probes such as `--version`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of bytes kept from each output stream.
const DEFAULT_CAPTURE_LIMIT: usize = 64 * 1024;

/// Output captured from a successful tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// Raw result of a supervised run.
#[derive(Debug, Clone, Default)]
pub struct CapturedRun {
    /// Exit code; `None` when the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    /// Leading bytes of standard output.
    pub stdout: Vec<u8>,
    /// Leading bytes of standard error.
    pub stderr: Vec<u8>,
    /// The deadline passed and the process was killed.
    pub timed_out: bool,
}

impl CapturedRun {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use pf_magick::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> pf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("magick"))
///     .arg("--version")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    capture_limit: usize,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Keep at most `bytes` of each output stream; the rest is drained.
    pub fn capture_limit(&mut self, bytes: usize) -> &mut Self {
        self.capture_limit = bytes;
        self
    }

    /// Short name of the program for messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Spawn the process and wait for it under the deadline.
    ///
    /// # Errors
    ///
    /// Only spawning or waiting failures are errors. A non-zero exit and a
    /// timeout are reported through [`CapturedRun`].
    pub async fn run(&self) -> pf_core::Result<CapturedRun> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers the tool forks die with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| pf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;
        let pid = child.id();

        let limit = self.capture_limit;
        let mut stdout_task = tokio::spawn(read_capped(child.stdout.take(), limit));
        let mut stderr_task = tokio::spawn(read_capped(child.stderr.take(), limit));

        // The deadline covers the pipes too: a forked helper can hold them
        // open after the tool itself has exited.
        let finished = tokio::time::timeout(self.timeout, async {
            let status = child.wait().await?;
            let stdout = (&mut stdout_task).await.ok().and_then(|r| r.ok());
            let stderr = (&mut stderr_task).await.ok().and_then(|r| r.ok());
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        match finished {
            Ok(Ok((status, stdout, stderr))) => Ok(CapturedRun {
                exit_code: status.code(),
                stdout: stdout.unwrap_or_default(),
                stderr: stderr.unwrap_or_default(),
                timed_out: false,
            }),
            Ok(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                Err(pf_core::Error::tool(
                    program_name,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    "{program_name} exceeded {:?}; killing process group {pid:?}",
                    self.timeout
                );
                #[cfg(unix)]
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                // kill() sends SIGKILL and reaps, so no zombie is left behind.
                // It fails harmlessly when the tool already exited.
                if let Err(e) = child.kill().await {
                    tracing::debug!("kill {program_name}: {e}");
                }
                stdout_task.abort();
                stderr_task.abort();
                Ok(CapturedRun {
                    timed_out: true,
                    ..CapturedRun::default()
                })
            }
        }
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`pf_core::Error::Timeout`] if the process exceeds the deadline.
    /// - [`pf_core::Error::Tool`] if the process exits with a non-zero status
    ///   (message includes stderr) or cannot be spawned.
    pub async fn execute(&self) -> pf_core::Result<ToolOutput> {
        let run = self.run().await?;

        if run.timed_out {
            return Err(pf_core::Error::Timeout {
                tool: self.program_name(),
                after: self.timeout,
            });
        }

        let stderr = String::from_utf8_lossy(&run.stderr).to_string();
        if run.exit_code != Some(0) {
            return Err(pf_core::Error::tool(
                self.program_name(),
                format!("exited with status {:?}: {}", run.exit_code, stderr.trim()),
            ));
        }

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&run.stdout).to_string(),
            stderr,
        })
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        tracing::debug!("killpg {pid}: {e}");
    }
}

/// Read a stream to the end, keeping at most `limit` bytes.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };

    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok(kept)
}
