//! Builder for executing external tool commands.
//!
//! Short-lived invocations (version checks) go through [`ToolCommand::execute`],
//! which captures output and enforces a timeout. Long-running processes (the
//! encoder) go through [`ToolCommand::spawn_supervised`], which hands back a
//! [`ToolProcess`] handle plus a channel of output lines.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Buffered output lines per supervised process before readers apply
/// backpressure.
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use lc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> lc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-version")
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
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
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

    /// Set the maximum execution time for [`ToolCommand::execute`].
    ///
    /// Supervised processes have no timeout.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - Returns [`lc_core::Error::Tool`] if the process times out (message
    ///   includes the timeout duration).
    /// - Returns [`lc_core::Error::Tool`] if the process exits with a non-zero
    ///   status (message includes stderr).
    /// - Returns [`lc_core::Error::Tool`] if spawning the process fails.
    pub async fn execute(&self) -> lc_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| lc_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(lc_core::Error::tool(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(lc_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            // The child future is dropped here and kill_on_drop reaps it.
            Err(_elapsed) => Err(lc_core::Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Spawn the command as a long-running process.
    ///
    /// On unix stdout and stderr share one pipe, so the channel carries a
    /// single combined stream in the exact order the process wrote it. The
    /// channel closes once every holder of the write end (the child and
    /// anything it spawned) has exited. Elsewhere the two streams are read
    /// separately and only keep their order relative to themselves.
    ///
    /// On unix the child leads its own process group so that
    /// [`ToolProcess::terminate`] reaches anything it spawned, and nothing
    /// else.
    pub fn spawn_supervised(&self) -> lc_core::Result<(ToolProcess, mpsc::Receiver<String>)> {
        let program_name = self.program_name();
        let spawn_err =
            |e: std::io::Error| lc_core::Error::tool(&program_name, format!("failed to spawn: {e}"));

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        #[cfg(unix)]
        let child = {
            let (reader, writer) = std::io::pipe().map_err(spawn_err)?;
            cmd.stdout(Stdio::from(writer.try_clone().map_err(spawn_err)?))
                .stderr(Stdio::from(writer))
                .process_group(0);
            let child = cmd.spawn().map_err(spawn_err)?;
            // The command owns the parent's copies of the write end.
            drop(cmd);

            let output =
                tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))
                    .map_err(spawn_err)?;
            tokio::spawn(read_lines(output, tx));
            child
        };

        #[cfg(not(unix))]
        let child = {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            let mut child = cmd.spawn().map_err(spawn_err)?;
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(read_lines(stdout, tx.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(read_lines(stderr, tx));
            }
            child
        };

        let pid = child.id();
        tracing::debug!(tool = %program_name, pid = ?pid, "Spawned supervised process");

        Ok((
            ToolProcess {
                child,
                program_name,
            },
            rx,
        ))
    }
}

/// Split a byte stream into lines on `\n` or `\r` and forward them.
///
/// ffmpeg rewrites its progress line in place with `\r`, so both count as
/// terminators. Empty segments (such as the gap in `\r\n`) are dropped.
async fn read_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let mut complete = Vec::new();
        let consumed = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(buf) => {
                for &byte in buf {
                    if byte == b'\n' || byte == b'\r' {
                        if !pending.is_empty() {
                            complete.push(String::from_utf8_lossy(&pending).into_owned());
                            pending.clear();
                        }
                    } else {
                        pending.push(byte);
                    }
                }
                buf.len()
            }
            Err(e) => {
                tracing::debug!("Output stream read error: {e}");
                break;
            }
        };
        reader.consume(consumed);

        for line in complete {
            if tx.send(line).await.is_err() {
                return;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
    }
}

/// Handle to a process started with [`ToolCommand::spawn_supervised`].
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct ToolProcess {
    child: Child,
    program_name: String,
}

impl ToolProcess {
    /// OS process id, or `None` once the exit status has been collected.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Ask the process to exit (SIGTERM to its process group on unix).
    ///
    /// A process that has already exited is not an error.
    pub fn terminate(&mut self) -> lc_core::Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                return self.signal_group(pid, nix::sys::signal::Signal::SIGTERM);
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            self.kill()
        }
    }

    /// Forcefully kill the process (and its process group on unix).
    pub fn kill(&mut self) -> lc_core::Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            self.signal_group(pid, nix::sys::signal::Signal::SIGKILL)?;
        }

        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(lc_core::Error::tool(
                &self.program_name,
                format!("failed to kill: {e}"),
            )),
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, pid: u32, signal: nix::sys::signal::Signal) -> lc_core::Result<()> {
        use nix::errno::Errno;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return Err(lc_core::Error::Internal(format!("pid out of range: {pid}")));
        };

        match nix::sys::signal::killpg(Pid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(lc_core::Error::tool(
                &self.program_name,
                format!("failed to send {signal}: {e}"),
            )),
        }
    }

    /// Wait for the process to exit. Cancel-safe.
    pub async fn wait(&mut self) -> lc_core::Result<ExitStatus> {
        self.child.wait().await.map_err(|e| {
            lc_core::Error::tool(
                &self.program_name,
                format!("I/O error waiting for process: {e}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("failed to spawn"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn spawn_supervised_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345")).spawn_supervised();
        assert!(matches!(result, Err(lc_core::Error::Tool { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn supervised_output_is_split_into_lines() {
        let (mut process, mut rx) = ToolCommand::new(PathBuf::from("/bin/sh"))
            .arg("-c")
            .arg("echo err >&2; printf 'one\\ntwo\\r\\nthree\\rfour'")
            .spawn_supervised()
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        let status = process.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(lines, vec!["err", "one", "two", "three", "four"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn supervised_interleaves_stdout_and_stderr_in_write_order() {
        let (mut process, mut rx) = ToolCommand::new(PathBuf::from("/bin/sh"))
            .arg("-c")
            .arg("i=1; while [ $i -le 300 ]; do echo o $i; echo e $i >&2; i=$((i+1)); done")
            .spawn_supervised()
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        process.wait().await.unwrap();

        let expected: Vec<_> = (1..=300)
            .flat_map(|i| [format!("o {i}"), format!("e {i}")])
            .collect();
        assert_eq!(lines, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn supervised_preserves_order_on_one_stream() {
        let (mut process, mut rx) = ToolCommand::new(PathBuf::from("/bin/sh"))
            .arg("-c")
            .arg("i=1; while [ $i -le 200 ]; do echo line $i >&2; i=$((i+1)); done")
            .spawn_supervised()
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        process.wait().await.unwrap();

        let expected: Vec<_> = (1..=200).map(|i| format!("line {i}")).collect();
        assert_eq!(lines, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_process_group() {
        let (mut process, mut rx) = ToolCommand::new(PathBuf::from("/bin/sh"))
            .arg("-c")
            .arg("echo ready; sleep 30 & wait")
            .spawn_supervised()
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("ready"));
        process.terminate().unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("process did not exit after SIGTERM")
            .unwrap();
        assert!(!status.success());

        // The backgrounded sleep held the pipes; it must be gone too.
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_after_exit_is_ok() {
        let (mut process, _rx) = ToolCommand::new(PathBuf::from("/bin/sh"))
            .arg("-c")
            .arg("exit 3")
            .spawn_supervised()
            .unwrap();

        let status = process.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        process.terminate().unwrap();
        process.kill().unwrap();
    }
}
