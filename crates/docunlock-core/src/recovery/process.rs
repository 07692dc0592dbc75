/// Bounded invocation of the external re-save program
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::config::FILE_PLACEHOLDER;
use crate::error::ExternalProgramError;

/// How often a running program is polled for exit, deadline and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes of captured stderr kept in a failure message.
const STDERR_TAIL_BYTES: usize = 2048;

/// An external program plus its argument template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalProgram {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalProgram {
    /// Program invoked as `<program> <file>`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![FILE_PLACEHOLDER.to_string()],
        }
    }

    /// Every `{file}` in `args` is replaced by the workspace copy. When no
    /// argument mentions it, the copy is appended as the last argument.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments for one invocation on `file`
    pub fn render_args(&self, file: &Path) -> Vec<String> {
        let file = file.to_string_lossy();
        let mut rendered: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, &file))
            .collect();
        if !self.args.iter().any(|arg| arg.contains(FILE_PLACEHOLDER)) {
            rendered.push(file.into_owned());
        }
        rendered
    }

    /// Run the program on `file` and wait for it, at most `timeout`.
    ///
    /// The program runs inside the workspace directory with no stdin or
    /// stdout; stderr goes to `stderr_path`. On timeout or when
    /// `is_cancelled` turns true the child and every process in its group
    /// are killed, and the child is reaped before this returns.
    pub fn run(
        &self,
        file: &Path,
        timeout: Duration,
        stderr_path: &Path,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<(), ExternalProgramError> {
        let stderr = File::create(stderr_path).map_err(|source| ExternalProgramError::Launch {
            program: self.program.clone(),
            source,
        })?;

        let mut command = Command::new(&self.program);
        command
            .args(self.render_args(file))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr));
        if let Some(dir) = file.parent() {
            command.current_dir(dir);
        }
        // Own process group, so helpers the program starts die with it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::debug!("launching {} on {}", self.program.display(), file.display());
        let mut child = command
            .spawn()
            .map_err(|source| ExternalProgramError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let status = self.wait_bounded(&mut child, timeout, is_cancelled)?;
        if status.success() {
            return Ok(());
        }

        Err(ExternalProgramError::NonZeroExit {
            program: self.program.clone(),
            status: status.to_string(),
            stderr: read_tail(stderr_path, STDERR_TAIL_BYTES),
        })
    }

    fn wait_bounded(
        &self,
        child: &mut Child,
        timeout: Duration,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<ExitStatus, ExternalProgramError> {
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if is_cancelled() {
                        self.kill_and_reap(child);
                        return Err(ExternalProgramError::Cancelled);
                    }
                    if start.elapsed() >= timeout {
                        self.kill_and_reap(child);
                        return Err(ExternalProgramError::TimedOut(timeout));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    self.kill_and_reap(child);
                    return Err(ExternalProgramError::Wait {
                        program: self.program.clone(),
                        source,
                    });
                }
            }
        }
    }

    fn kill_and_reap(&self, child: &mut Child) {
        #[cfg(unix)]
        kill_group(child.id());
        if let Err(e) = child.kill() {
            tracing::debug!("kill {} (pid {}): {}", self.program.display(), child.id(), e);
        }
        if let Err(e) = child.wait() {
            tracing::warn!("failed to reap {} (pid {}): {}", self.program.display(), child.id(), e);
        }
    }
}

/// SIGKILL the process group led by `pid`. A group that is already gone is
/// not an error.
#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(pid as i32);
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::debug!("killpg {}: {}", pid, e),
    }
}

/// Last `max` bytes of a file, lossily decoded. Empty on any error.
fn read_tail(path: &Path, max: usize) -> String {
    let Ok(bytes) = fs::read(path) else {
        return String::new();
    };
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
